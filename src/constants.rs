//! Various signer-wide constants.

//------------ Binary Names -------------------------------------------------

/// The friendly name of the `keysignerd` binary.
pub const KEYSIGNER_APP: &str = "Keysigner";

pub const KEYSIGNER_VERSION: &str = env!("CARGO_PKG_VERSION");

//------------ Config Files Paths -------------------------------------------

/// The default path to the signer config file.
pub const KEYSIGNER_DEFAULT_CONFIG_FILE: &str = "/etc/keysigner.conf";

//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const KEYSIGNER_ENV_LOG_LEVEL: &str = "KEYSIGNER_LOG_LEVEL";

/// The environment variable with the path to the config file.
pub const KEYSIGNER_ENV_CONFIG: &str = "KEYSIGNER_CONFIG";

/// The environment variable the command line tool takes token PINs from.
pub const KEYSIGNER_ENV_PIN: &str = "KEYSIGNER_PIN";

//------------ Data Layout --------------------------------------------------

/// The file under the data dir holding the token/key/certificate model.
pub const KEY_CONF_FILE: &str = "keyconf.json";

/// The sub dir of the data dir used by the software token keystore.
pub const SOFT_TOKEN_DIR: &str = "softtoken";

/// The file inside the software token dir that proves the token PIN.
pub const SOFT_TOKEN_PIN_FILE: &str = ".softtoken";

//------------ Tokens -------------------------------------------------------

/// The id of the one and only software token.
pub const SOFT_TOKEN_ID: &str = "0";

/// The friendly name a fresh software token starts out with.
pub const SOFT_TOKEN_DEFAULT_NAME: &str = "softToken-0";

/// The number of random bytes in a generated key id.
pub const KEY_ID_LEN: usize = 20;

//------------ Sign Mechanisms ----------------------------------------------

pub const CKM_RSA_PKCS: &str = "CKM_RSA_PKCS";
pub const CKM_RSA_PKCS_PSS: &str = "CKM_RSA_PKCS_PSS";
pub const CKM_ECDSA: &str = "CKM_ECDSA";

//------------ Certificates --------------------------------------------------

/// The longest validity, in days, of certificates made with sign_certificate.
pub const MAX_CERT_VALIDITY_DAYS: i64 = 36500;
