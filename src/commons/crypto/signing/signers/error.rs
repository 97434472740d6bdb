use std::fmt;

use openssl::error::ErrorStack;

use crate::commons::{crypto::CryptoError, util::file::IoError};

#[derive(Debug)]
pub enum SignerError {
    PinIncorrect,
    LoginFailed(String),
    NotInitialized,
    AlreadyInitialized,
    NotLoggedIn,
    Unavailable,
    KeyNotFound(String),
    Unsupported(String),
    OpenSslError(ErrorStack),
    CryptoError(CryptoError),
    JsonError(serde_json::Error),
    IoError(IoError),

    #[cfg(feature = "hsm")]
    Pkcs11Error(cryptoki::error::Error),

    Other(String),
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignerError::PinIncorrect => write!(f, "PIN incorrect"),
            SignerError::LoginFailed(e) => write!(f, "Login failed: {}", e),
            SignerError::NotInitialized => write!(f, "Token is not initialized"),
            SignerError::AlreadyInitialized => write!(f, "Token is already initialized"),
            SignerError::NotLoggedIn => write!(f, "Token is not logged in"),
            SignerError::Unavailable => write!(f, "Token is unavailable"),
            SignerError::KeyNotFound(id) => write!(f, "Could not find key '{}' on the device", id),
            SignerError::Unsupported(e) => write!(f, "Not supported: {}", e),
            SignerError::OpenSslError(e) => write!(f, "OpenSsl Error: {}", e),
            SignerError::CryptoError(e) => e.fmt(f),
            SignerError::JsonError(e) => write!(f, "Could not decode key file: {}", e),
            SignerError::IoError(e) => e.fmt(f),
            #[cfg(feature = "hsm")]
            SignerError::Pkcs11Error(e) => write!(f, "PKCS#11 Error: {}", e),
            SignerError::Other(e) => write!(f, "Signer error: {}", e),
        }
    }
}

impl std::error::Error for SignerError {}

impl From<ErrorStack> for SignerError {
    fn from(e: ErrorStack) -> Self {
        SignerError::OpenSslError(e)
    }
}

impl From<CryptoError> for SignerError {
    fn from(e: CryptoError) -> Self {
        SignerError::CryptoError(e)
    }
}

impl From<serde_json::Error> for SignerError {
    fn from(e: serde_json::Error) -> Self {
        SignerError::JsonError(e)
    }
}

impl From<IoError> for SignerError {
    fn from(e: IoError) -> Self {
        SignerError::IoError(e)
    }
}

#[cfg(feature = "hsm")]
impl From<cryptoki::error::Error> for SignerError {
    fn from(e: cryptoki::error::Error) -> Self {
        SignerError::Pkcs11Error(e)
    }
}
