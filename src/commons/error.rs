//! Defines all signer errors, and how they are presented to callers as
//! faults.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commons::{
    api::{ClientId, KeyUsage},
    crypto::{signing::SignerError, CryptoError},
    util::file::IoError,
};

//------------ CannotSign ----------------------------------------------------

/// The reasons why a signature could not be made.
#[derive(Debug)]
pub enum CannotSign {
    /// The request itself could not be processed, e.g. unknown algorithm.
    InternalError(String),

    /// Algorithm and key do not go together.
    UnsupportedAlgorithm { algorithm: String, key_id: String },

    /// The device refused or failed.
    DeviceError { key_id: String, reason: String },
}

//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // System Issues
    //-----------------------------------------------------------------
    IoError(IoError),
    Internal(String),

    //-----------------------------------------------------------------
    // Token Issues
    //-----------------------------------------------------------------
    TokenNotFound(String),
    TokenNotActive(String),
    TokenNotInitialized(String),
    TokenNotAvailable(String),
    TokenNotEmpty(String),
    TokenAlreadyInitialized(String),
    PinIncorrect,
    LoginFailed(String, String),
    DeviceError(String, String),

    //-----------------------------------------------------------------
    // Key Issues
    //-----------------------------------------------------------------
    KeyNotFound(String),
    KeyNotFoundForCertificate,
    WrongKeyUsage(String, KeyUsage, KeyUsage),
    CannotGenerateKey(String, String),

    //-----------------------------------------------------------------
    // Certificate Issues
    //-----------------------------------------------------------------
    CertNotFound(String),
    CertNotFoundForHash(String),
    CertExists(String),
    InvalidCert(String),
    MemberCertNotFound(ClientId),

    //-----------------------------------------------------------------
    // Certificate Request Issues
    //-----------------------------------------------------------------
    CsrNotFound(String),

    //-----------------------------------------------------------------
    // Signing Issues
    //-----------------------------------------------------------------
    CannotSign(CannotSign),

    //-----------------------------------------------------------------
    // Request Issues
    //-----------------------------------------------------------------
    InvalidRequest(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(e) => e.fmt(f),
            Error::Internal(msg) => write!(f, "{}", msg),

            Error::TokenNotFound(id) => write!(f, "Token '{}' not found", id),
            Error::TokenNotActive(id) => write!(f, "Token '{}' not active", id),
            Error::TokenNotInitialized(id) => write!(f, "Token '{}' not initialized", id),
            Error::TokenNotAvailable(id) => write!(f, "Token '{}' not available", id),
            Error::TokenNotEmpty(id) => write!(f, "Token '{}' still has keys", id),
            Error::TokenAlreadyInitialized(id) => write!(f, "Token '{}' is already initialized", id),
            Error::PinIncorrect => write!(f, "PIN incorrect"),
            Error::LoginFailed(id, reason) => write!(f, "Login failed for token '{}': {}", id, reason),
            Error::DeviceError(id, reason) => write!(f, "Token '{}' device error: {}", id, reason),

            Error::KeyNotFound(id) => write!(f, "Key '{}' not found", id),
            Error::KeyNotFoundForCertificate => write!(
                f,
                "Could not find key that has public key that matches the public key of certificate"
            ),
            Error::WrongKeyUsage(id, actual, requested) => {
                write!(f, "Key '{}' has usage {}, requested {}", id, actual, requested)
            }
            Error::CannotGenerateKey(id, reason) => {
                write!(f, "Could not generate key on token '{}': {}", id, reason)
            }

            Error::CertNotFound(id) => write!(f, "Certificate with id '{}' not found", id),
            Error::CertNotFoundForHash(hash) => write!(f, "Certificate with hash '{}' not found", hash),
            Error::CertExists(key_id) => write!(f, "Certificate already exists under key '{}'", key_id),
            Error::InvalidCert(reason) => write!(f, "Could not parse certificate: {}", reason),
            Error::MemberCertNotFound(member) => {
                write!(f, "Member '{}' has no suitable certificates", member)
            }

            Error::CsrNotFound(id) => write!(f, "Certificate request '{}' not found", id),

            Error::CannotSign(CannotSign::InternalError(msg)) => write!(f, "{}", msg),
            Error::CannotSign(CannotSign::UnsupportedAlgorithm { algorithm, key_id }) => {
                write!(f, "Algorithm '{}' cannot be used with key '{}'", algorithm, key_id)
            }
            Error::CannotSign(CannotSign::DeviceError { key_id, reason }) => {
                write!(f, "Signing with key '{}' failed: {}", key_id, reason)
            }

            Error::InvalidRequest(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::IoError(e)
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Error::Internal(format!("OpenSSL error: {}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("JSON error: {}", e))
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl Error {
    pub fn internal(msg: impl fmt::Display) -> Self {
        Error::Internal(msg.to_string())
    }

    pub fn invalid_request(msg: impl fmt::Display) -> Self {
        Error::InvalidRequest(msg.to_string())
    }

    pub fn unknown_sign_algorithm(algorithm_id: &str) -> Self {
        Error::CannotSign(CannotSign::InternalError(format!(
            "Unknown sign algorithm id: {}",
            algorithm_id
        )))
    }

    pub fn unsupported_algorithm(algorithm_id: &str, key_id: &str) -> Self {
        Error::CannotSign(CannotSign::UnsupportedAlgorithm {
            algorithm: algorithm_id.to_string(),
            key_id: key_id.to_string(),
        })
    }

    /// Classifies a failure reported by the device behind a token.
    pub fn device(token_id: &str, e: SignerError) -> Self {
        match e {
            SignerError::PinIncorrect => Error::PinIncorrect,
            SignerError::LoginFailed(reason) => Error::LoginFailed(token_id.to_string(), reason),
            SignerError::NotInitialized => Error::TokenNotInitialized(token_id.to_string()),
            SignerError::AlreadyInitialized => Error::TokenAlreadyInitialized(token_id.to_string()),
            SignerError::NotLoggedIn => Error::TokenNotActive(token_id.to_string()),
            SignerError::Unavailable => Error::TokenNotAvailable(token_id.to_string()),
            other => Error::DeviceError(token_id.to_string(), other.to_string()),
        }
    }

    /// Classifies a device failure that happened while signing.
    pub fn signing(token_id: &str, key_id: &str, e: SignerError) -> Self {
        match e {
            SignerError::NotLoggedIn => Error::TokenNotActive(token_id.to_string()),
            SignerError::Unavailable => Error::TokenNotAvailable(token_id.to_string()),
            other => Error::CannotSign(CannotSign::DeviceError {
                key_id: key_id.to_string(),
                reason: other.to_string(),
            }),
        }
    }
}

/// Translate an error to a fault for callers
impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::IoError(_) | Error::Internal(_) => "Signer.InternalError",

            Error::TokenNotFound(_) => "Signer.TokenNotFound",
            Error::TokenNotActive(_) => "Signer.TokenNotActive",
            Error::TokenNotInitialized(_) => "Signer.TokenNotInitialized",
            Error::TokenNotAvailable(_) => "Signer.TokenNotAvailable",
            Error::TokenNotEmpty(_) => "Signer.TokenNotEmpty",
            Error::TokenAlreadyInitialized(_) => "Signer.TokenAlreadyInitialized",
            Error::PinIncorrect => "Signer.PinIncorrect",
            Error::LoginFailed(_, _) => "Signer.LoginFailed",
            Error::DeviceError(_, _) => "Signer.DeviceError",

            Error::KeyNotFound(_) | Error::KeyNotFoundForCertificate => "Signer.KeyNotFound",
            Error::WrongKeyUsage(_, _, _) => "Signer.WrongCertUsage",
            Error::CannotGenerateKey(_, _) => "Signer.CannotGenerateKey",

            Error::CertNotFound(_) | Error::CertNotFoundForHash(_) | Error::MemberCertNotFound(_) => {
                "Signer.CertNotFound"
            }
            Error::CertExists(_) => "Signer.CertExists",
            Error::InvalidCert(_) => "Signer.InvalidCert",

            Error::CsrNotFound(_) => "Signer.CsrNotFound",

            Error::CannotSign(CannotSign::InternalError(_)) => "Signer.CannotSign.InternalError",
            Error::CannotSign(CannotSign::UnsupportedAlgorithm { .. }) => "Signer.CannotSign.UnsupportedAlgorithm",
            Error::CannotSign(CannotSign::DeviceError { .. }) => "Signer.CannotSign.DeviceError",

            Error::InvalidRequest(_) => "Signer.InvalidRequest",
        }
    }

    /// The key callers use to look up a localized message. Empty for
    /// failures that are not expected to be shown to users.
    pub fn translation(&self) -> &'static str {
        match self {
            Error::IoError(_) | Error::Internal(_) => "",

            Error::TokenNotFound(_) => "token_not_found",
            Error::TokenNotActive(_) => "token_not_active",
            Error::TokenNotInitialized(_) => "token_not_initialized",
            Error::TokenNotAvailable(_) => "token_not_available",
            Error::TokenNotEmpty(_) => "token_not_empty",
            Error::TokenAlreadyInitialized(_) => "token_already_initialized",
            Error::PinIncorrect => "pin_incorrect",
            Error::LoginFailed(_, _) => "login_failed",
            Error::DeviceError(_, _) => "device_error",

            Error::KeyNotFound(_) => "key_not_found",
            Error::KeyNotFoundForCertificate => "key_not_found_for_certificate",
            Error::WrongKeyUsage(_, _, _) => "wrong_cert_usage",
            Error::CannotGenerateKey(_, _) => "cannot_generate_key",

            Error::CertNotFound(_) => "cert_with_id_not_found",
            Error::CertNotFoundForHash(_) => "certificate_with_hash_not_found",
            Error::MemberCertNotFound(_) => "member_cert_not_found",
            Error::CertExists(_) => "cert_exists",
            Error::InvalidCert(_) => "invalid_cert",

            Error::CsrNotFound(_) => "csr_not_found",

            Error::CannotSign(CannotSign::InternalError(_)) => "",
            Error::CannotSign(CannotSign::UnsupportedAlgorithm { .. }) => "unsupported_sign_algorithm",
            Error::CannotSign(CannotSign::DeviceError { .. }) => "cannot_sign",

            Error::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn to_fault(&self) -> Fault {
        Fault {
            code: self.code().to_string(),
            translation: self.translation().to_string(),
            message: self.to_string(),
        }
    }
}

//------------ Fault ---------------------------------------------------------

/// The transport neutral form in which errors are handed to callers.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Fault {
    pub code: String,
    pub translation: String,
    pub message: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<&Error> for Fault {
    fn from(e: &Error) -> Self {
        e.to_fault()
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_fault(e: Error, code: &str, translation: &str, message: &str) {
        let fault = e.to_fault();
        assert_eq!(fault.code, code);
        assert_eq!(fault.translation, translation);
        assert_eq!(fault.message, message);
    }

    #[test]
    fn lookup_faults() {
        assert_fault(
            Error::TokenNotFound("a3f".to_string()),
            "Signer.TokenNotFound",
            "token_not_found",
            "Token 'a3f' not found",
        );
        assert_fault(
            Error::KeyNotFound("k1".to_string()),
            "Signer.KeyNotFound",
            "key_not_found",
            "Key 'k1' not found",
        );
        assert_fault(
            Error::CertNotFound("c1".to_string()),
            "Signer.CertNotFound",
            "cert_with_id_not_found",
            "Certificate with id 'c1' not found",
        );
        assert_fault(
            Error::CertNotFoundForHash("ab01".to_string()),
            "Signer.CertNotFound",
            "certificate_with_hash_not_found",
            "Certificate with hash 'ab01' not found",
        );
        assert_fault(
            Error::CsrNotFound("r1".to_string()),
            "Signer.CsrNotFound",
            "csr_not_found",
            "Certificate request 'r1' not found",
        );
    }

    #[test]
    fn key_not_found_for_certificate_shares_code() {
        assert_fault(
            Error::KeyNotFoundForCertificate,
            "Signer.KeyNotFound",
            "key_not_found_for_certificate",
            "Could not find key that has public key that matches the public key of certificate",
        );
    }

    #[test]
    fn cannot_sign_faults() {
        assert_fault(
            Error::unknown_sign_algorithm("NOT-ALGORITHM-ID"),
            "Signer.CannotSign.InternalError",
            "",
            "Unknown sign algorithm id: NOT-ALGORITHM-ID",
        );
        assert_fault(
            Error::unsupported_algorithm("SHA256withECDSA", "k1"),
            "Signer.CannotSign.UnsupportedAlgorithm",
            "unsupported_sign_algorithm",
            "Algorithm 'SHA256withECDSA' cannot be used with key 'k1'",
        );
        assert_fault(
            Error::signing("0", "k1", SignerError::Other("boom".to_string())),
            "Signer.CannotSign.DeviceError",
            "cannot_sign",
            "Signing with key 'k1' failed: Signer error: boom",
        );
    }

    #[test]
    fn device_errors_are_classified() {
        assert_eq!(Error::device("0", SignerError::PinIncorrect).code(), "Signer.PinIncorrect");
        assert_eq!(
            Error::device("0", SignerError::NotInitialized).code(),
            "Signer.TokenNotInitialized"
        );
        assert_eq!(
            Error::device("0", SignerError::Unavailable).code(),
            "Signer.TokenNotAvailable"
        );
        assert_eq!(
            Error::device("0", SignerError::LoginFailed("locked".to_string())).to_string(),
            "Login failed for token '0': locked"
        );
        assert_eq!(
            Error::device("0", SignerError::Other("gone".to_string())).code(),
            "Signer.DeviceError"
        );
    }

    #[test]
    fn fault_display_prefixes_code() {
        let fault = Error::KeyNotFound("k1".to_string()).to_fault();
        assert_eq!(fault.to_string(), "Signer.KeyNotFound: Key 'k1' not found");
    }

    #[test]
    fn fault_serializes_all_fields() {
        let fault = Error::PinIncorrect.to_fault();
        let json = serde_json::to_string(&fault).unwrap();
        assert_eq!(
            json,
            r#"{"code":"Signer.PinIncorrect","translation":"pin_incorrect","message":"PIN incorrect"}"#
        );
    }
}
