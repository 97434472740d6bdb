use std::{
    collections::HashSet,
    env, fmt,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{error, LevelFilter};
use serde::{de, Deserialize, Deserializer};
#[cfg(unix)]
use syslog::Facility;

use crate::{
    commons::{api::KeyAlgorithm, crypto::signing::KeySpec, util::ext_serde},
    constants::*,
};

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn data_dir() -> PathBuf {
        PathBuf::from("./data")
    }

    fn log_level() -> LevelFilter {
        match env::var(KEYSIGNER_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!("Unrecognized value for log level in env var {}", KEYSIGNER_ENV_LOG_LEVEL);
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::File
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./keysigner.log")
    }

    #[cfg(unix)]
    fn syslog_facility() -> Facility {
        Facility::LOG_DAEMON
    }

    fn key_algorithm() -> KeyAlgorithm {
        KeyAlgorithm::Rsa
    }

    fn key_length() -> u32 {
        2048
    }

    fn software_token() -> bool {
        true
    }

    fn software_token_batch_signing() -> bool {
        true
    }

    fn cert_validity_days() -> i64 {
        7300
    }

    fn batch_signing_enabled() -> bool {
        true
    }

    fn sign_mechanism() -> String {
        CKM_RSA_PKCS.to_string()
    }
}

//------------ Config --------------------------------------------------------

/// Global configuration for the signer.
///
/// This is read from a TOML file, every setting has a default so an empty
/// file is a valid configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::data_dir")]
    pub data_dir: PathBuf,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "ext_serde::de_level_filter"
    )]
    log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    log_file: PathBuf,

    #[cfg(unix)]
    #[serde(
        default = "ConfigDefaults::syslog_facility",
        deserialize_with = "ext_serde::de_facility"
    )]
    syslog_facility: Facility,

    /// The algorithm of newly generated keys.
    #[serde(default = "ConfigDefaults::key_algorithm")]
    pub key_algorithm: KeyAlgorithm,

    /// The modulus length of newly generated RSA keys.
    #[serde(default = "ConfigDefaults::key_length")]
    pub key_length: u32,

    #[serde(default = "ConfigDefaults::software_token")]
    pub software_token: bool,

    #[serde(default = "ConfigDefaults::software_token_batch_signing")]
    pub software_token_batch_signing: bool,

    #[serde(default)]
    pub pkcs11: Vec<Pkcs11Config>,

    /// How long certificates made by `sign_certificate` are valid.
    #[serde(default = "ConfigDefaults::cert_validity_days")]
    pub cert_validity_days: i64,
}

/// A PKCS#11 module, every slot with a token becomes a token of the signer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Pkcs11Config {
    /// Prefix of the ids of the tokens found through this module.
    pub name: String,

    pub lib_path: PathBuf,

    #[serde(default = "ConfigDefaults::batch_signing_enabled")]
    pub batch_signing_enabled: bool,

    /// The mechanism RSA keys sign with, `CKM_RSA_PKCS` or
    /// `CKM_RSA_PKCS_PSS`.
    #[serde(default = "ConfigDefaults::sign_mechanism")]
    pub sign_mechanism: String,
}

impl Config {
    pub fn set_data_dir(&mut self, data_dir: PathBuf) {
        self.data_dir = data_dir;
    }

    pub fn key_spec(&self) -> KeySpec {
        KeySpec {
            algorithm: self.key_algorithm,
            rsa_bits: self.key_length,
        }
    }
}

impl Config {
    /// A config for tests: everything default, logging to stderr.
    pub fn test(data_dir: &Path) -> Self {
        Config {
            data_dir: data_dir.to_path_buf(),
            log_level: LevelFilter::Debug,
            log_type: LogType::Stderr,
            log_file: ConfigDefaults::log_file(),
            #[cfg(unix)]
            syslog_facility: ConfigDefaults::syslog_facility(),
            key_algorithm: ConfigDefaults::key_algorithm(),
            key_length: ConfigDefaults::key_length(),
            software_token: true,
            software_token_batch_signing: true,
            pkcs11: vec![],
            cert_validity_days: ConfigDefaults::cert_validity_days(),
        }
    }

    /// Reads and verifies the config file.
    pub fn create(config_file: &str) -> Result<Self, ConfigError> {
        let config = Self::read_config(config_file)
            .map_err(|e| ConfigError::Other(format!("Error parsing config file: {}, error: {}", config_file, e)))?;
        config
            .verify()
            .map_err(|e| ConfigError::Other(format!("Error parsing config file: {}, error: {}", config_file, e)))?;
        Ok(config)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.key_algorithm == KeyAlgorithm::Rsa && self.key_length < 1024 {
            return Err(ConfigError::other("key_length must be at least 1024"));
        }

        if !(1..=MAX_CERT_VALIDITY_DAYS).contains(&self.cert_validity_days) {
            return Err(ConfigError::Other(format!(
                "cert_validity_days must be between 1 and {}",
                MAX_CERT_VALIDITY_DAYS
            )));
        }

        let mut names = HashSet::new();
        for pkcs11 in &self.pkcs11 {
            if pkcs11.name.is_empty() {
                return Err(ConfigError::other("pkcs11 name must not be empty"));
            }
            if !names.insert(pkcs11.name.as_str()) {
                return Err(ConfigError::Other(format!("Duplicate pkcs11 name '{}'", pkcs11.name)));
            }
            if pkcs11.sign_mechanism != CKM_RSA_PKCS && pkcs11.sign_mechanism != CKM_RSA_PKCS_PSS {
                return Err(ConfigError::Other(format!(
                    "Unsupported sign_mechanism '{}' for pkcs11 '{}'",
                    pkcs11.sign_mechanism, pkcs11.name
                )));
            }
        }

        Ok(())
    }

    pub fn read_config(file: &str) -> Result<Self, ConfigError> {
        let mut v = String::new();
        let mut f = File::open(file)?;
        f.read_to_string(&mut v)?;

        let c: Config = toml::from_str(&v)?;
        Ok(c)
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            #[cfg(unix)]
            LogType::Syslog => self.syslog_logger(self.syslog_facility),
            #[cfg(not(unix))]
            LogType::Syslog => Err(ConfigError::other("syslog is only supported on unix")),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init stderr logging: {}", e)))
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!("Failed to open log file '{}': {}", path.display(), err);
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init file logging: {}", e)))
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(&self, facility: Facility) -> Result<(), ConfigError> {
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("keysignerd"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514)));
        match logger {
            Ok(logger) => self
                .fern_logger()
                .chain(logger)
                .apply()
                .map_err(|e| ConfigError::Other(format!("Failed to init syslog: {}", e))),
            Err(err) => {
                let msg = format!("Cannot connect to syslog: {}", err);
                Err(ConfigError::Other(msg))
            }
        }
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // file writes happen on every model change, keep them out of debug
        let framework_level = self.log_level.min(LevelFilter::Debug);

        let show_target = self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("keysigner::commons::util::file", framework_level)
    }
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found : \"{}\"",
                string
            ))),
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn should_parse_default_config_file() {
        let c = Config::read_config("./defaults/keysigner.conf").unwrap();
        c.verify().unwrap();
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.log_type, LogType::File);
        assert!(c.software_token);
        assert!(c.pkcs11.is_empty());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let c = parse("");
        assert_eq!(c.key_spec(), KeySpec::default());
        assert!(c.software_token_batch_signing);
        assert_eq!(c.cert_validity_days, 7300);
    }

    #[test]
    fn should_parse_pkcs11_modules() {
        let c = parse(
            r#"
            key_algorithm = "ec"

            [[pkcs11]]
            name = "softhsm"
            lib_path = "/usr/lib/softhsm/libsofthsm2.so"

            [[pkcs11]]
            name = "luna"
            lib_path = "/usr/lib/libCryptoki2_64.so"
            batch_signing_enabled = false
            sign_mechanism = "CKM_RSA_PKCS_PSS"
            "#,
        );
        c.verify().unwrap();

        assert_eq!(c.key_algorithm, KeyAlgorithm::Ec);
        assert_eq!(c.pkcs11.len(), 2);
        assert_eq!(c.pkcs11[0].sign_mechanism, CKM_RSA_PKCS);
        assert!(c.pkcs11[0].batch_signing_enabled);
        assert_eq!(c.pkcs11[1].sign_mechanism, CKM_RSA_PKCS_PSS);
        assert!(!c.pkcs11[1].batch_signing_enabled);
    }

    #[test]
    fn should_reject_bad_settings() {
        assert!(toml::from_str::<Config>(r#"log_type = "journal""#).is_err());
        assert!(toml::from_str::<Config>(r#"key_algorithm = "dsa""#).is_err());

        assert!(parse("key_length = 512").verify().is_err());
        assert!(parse("cert_validity_days = 0").verify().is_err());
        assert!(parse("cert_validity_days = 36500").verify().is_ok());
        assert!(parse("cert_validity_days = 36501").verify().is_err());
        assert!(parse("cert_validity_days = 9223372036854775807").verify().is_err());

        let duplicate = r#"
            [[pkcs11]]
            name = "hsm"
            lib_path = "/a.so"
            [[pkcs11]]
            name = "hsm"
            lib_path = "/b.so"
            "#;
        assert!(parse(duplicate).verify().is_err());

        let mechanism = r#"
            [[pkcs11]]
            name = "hsm"
            lib_path = "/a.so"
            sign_mechanism = "CKM_DSA"
            "#;
        assert!(parse(mechanism).verify().is_err());
    }

    #[test]
    fn should_set_correct_log_levels() {
        use log::Level as LL;

        fn void_logger(config: &str) -> Box<dyn log::Log> {
            let c: Config = toml::from_str(config).unwrap();
            let void_output = fern::Output::writer(Box::new(io::sink()), "");
            let (_, void_logger) = c.fern_logger().chain(void_output).into_log();
            void_logger
        }

        fn for_target_at_level(target: &str, level: LL) -> log::Metadata {
            log::Metadata::builder().target(target).level(level).build()
        }

        for config_level in &["error", "warn", "info", "debug", "trace"] {
            let log = void_logger(&format!(r#"log_level = "{}""#, config_level));
            let configured = LL::from_str(config_level).unwrap();

            for level in &[LL::Error, LL::Warn, LL::Info, LL::Debug, LL::Trace] {
                let expected = *level <= configured;
                assert_eq!(
                    expected,
                    log.enabled(&for_target_at_level("keysigner::daemon::signer", *level)),
                    "Logging at level {} with log_level={}",
                    level,
                    config_level
                );

                // file writes never log at trace
                let expected = expected && *level < LL::Trace;
                assert_eq!(
                    expected,
                    log.enabled(&for_target_at_level("keysigner::commons::util::file", *level)),
                    "File logging at level {} with log_level={}",
                    level,
                    config_level
                );
            }
        }
    }
}
