use std::fmt;
use std::fmt::Display;

use openssl::error::ErrorStack;

#[derive(Debug)]
pub enum CryptoError {
    OpenSslError(ErrorStack),
    EncodeError(String),
    CertificateError(rcgen::Error),
    DecodeError(String),
    InvalidName(String),
    Unsupported(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CryptoError::OpenSslError(e) => write!(f, "OpenSsl Error: {}", e),
            CryptoError::EncodeError(e) => write!(f, "Could not encode: {}", e),
            CryptoError::CertificateError(e) => write!(f, "Could not build certificate: {}", e),
            CryptoError::DecodeError(e) => write!(f, "Could not decode: {}", e),
            CryptoError::InvalidName(e) => write!(f, "Invalid distinguished name: {}", e),
            CryptoError::Unsupported(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<ErrorStack> for CryptoError {
    fn from(e: ErrorStack) -> Self {
        CryptoError::OpenSslError(e)
    }
}

impl From<asn1_rs::SerializeError> for CryptoError {
    fn from(e: asn1_rs::SerializeError) -> Self {
        CryptoError::EncodeError(e.to_string())
    }
}

impl From<rcgen::Error> for CryptoError {
    fn from(e: rcgen::Error) -> Self {
        CryptoError::CertificateError(e)
    }
}

impl CryptoError {
    pub fn decode(e: impl Display) -> Self {
        CryptoError::DecodeError(e.to_string())
    }

    pub fn invalid_name(e: impl Display) -> Self {
        CryptoError::InvalidName(e.to_string())
    }

    pub fn unsupported(e: impl Display) -> Self {
        CryptoError::Unsupported(e.to_string())
    }
}
