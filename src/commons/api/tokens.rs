//! Tokens and the keys they hold.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::commons::{
    api::{CertRequestInfo, CertificateInfo},
    util::ext_serde,
};

//------------ TokenKind -----------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Software,
    Hardware,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::Software => write!(f, "software"),
            TokenKind::Hardware => write!(f, "hardware"),
        }
    }
}

//------------ TokenStatus ---------------------------------------------------

/// The activation state of a token, as last reported by its device.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    NotInitialized,
    Inactive,
    Active,
    LoginFailed,
}

impl TokenStatus {
    pub fn is_active(self) -> bool {
        self == TokenStatus::Active
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenStatus::NotInitialized => write!(f, "NOT_INITIALIZED"),
            TokenStatus::Inactive => write!(f, "INACTIVE"),
            TokenStatus::Active => write!(f, "ACTIVE"),
            TokenStatus::LoginFailed => write!(f, "LOGIN_FAILED"),
        }
    }
}

//------------ TokenInfo -----------------------------------------------------

/// A snapshot of a token and everything it holds.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TokenInfo {
    pub id: String,
    pub kind: TokenKind,
    pub friendly_name: String,
    pub status: TokenStatus,

    /// Whether the device behind this token is currently present.
    pub available: bool,
    pub read_only: bool,
    pub batch_signing_enabled: bool,

    /// Free form description of the device.
    pub info: String,
    pub keys: Vec<KeyInfo>,
}

impl TokenInfo {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn key(&self, key_id: &str) -> Option<&KeyInfo> {
        self.keys.iter().find(|k| k.id == key_id)
    }
}

//------------ KeyUsage ------------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyUsage {
    Signing,
    Authentication,
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyUsage::Signing => write!(f, "SIGNING"),
            KeyUsage::Authentication => write!(f, "AUTHENTICATION"),
        }
    }
}

impl FromStr for KeyUsage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "signing" | "sign" => Ok(KeyUsage::Signing),
            "authentication" | "auth" => Ok(KeyUsage::Authentication),
            _ => Err(format!("Unknown key usage: {}", s)),
        }
    }
}

//------------ KeyAlgorithm --------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => write!(f, "RSA"),
            KeyAlgorithm::Ec => write!(f, "EC"),
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyAlgorithm::Rsa),
            "ec" | "ecdsa" => Ok(KeyAlgorithm::Ec),
            _ => Err(format!("Unknown key algorithm: {}", s)),
        }
    }
}

//------------ KeyInfo -------------------------------------------------------

/// A key pair on a token, with the certificates and pending certificate
/// requests that were issued for it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyInfo {
    pub id: String,
    pub token_id: String,
    pub friendly_name: String,

    /// The label the key was given on the device.
    pub label: String,

    /// Decided by the first certificate request or certificate import.
    pub usage: Option<KeyUsage>,
    pub algorithm: KeyAlgorithm,

    /// DER encoded SubjectPublicKeyInfo.
    #[serde(serialize_with = "ext_serde::ser_bytes", deserialize_with = "ext_serde::de_bytes")]
    pub public_key: Vec<u8>,

    /// Whether the device reported this key on its last listing.
    pub available: bool,
    pub sign_mechanism: String,
    pub certs: Vec<CertificateInfo>,
    pub cert_requests: Vec<CertRequestInfo>,
}

impl KeyInfo {
    pub fn cert(&self, cert_id: &str) -> Option<&CertificateInfo> {
        self.certs.iter().find(|c| c.id == cert_id)
    }

    pub fn cert_request(&self, csr_id: &str) -> Option<&CertRequestInfo> {
        self.cert_requests.iter().find(|c| c.id == csr_id)
    }
}

//------------ TokenInfoAndKeyId ---------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TokenInfoAndKeyId {
    pub token_info: TokenInfo,
    pub key_id: String,
}

//------------ KeyIdInfo -----------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyIdInfo {
    pub key_id: String,
    pub sign_mechanism: String,
}
