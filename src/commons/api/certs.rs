//! Certificates and certificate requests bound to keys.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::commons::{
    api::{ClientId, KeyUsage},
    util::ext_serde,
};

//------------ CertStatus ----------------------------------------------------

/// The registration status of a certificate.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum CertStatus {
    Saved,
    RegistrationInProgress,
    Registered,
    DeletionInProgress,
    GlobalError,
}

impl CertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CertStatus::Saved => "saved",
            CertStatus::RegistrationInProgress => "registration in progress",
            CertStatus::Registered => "registered",
            CertStatus::DeletionInProgress => "deletion in progress",
            CertStatus::GlobalError => "global error",
        }
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saved" => Ok(CertStatus::Saved),
            "registration in progress" => Ok(CertStatus::RegistrationInProgress),
            "registered" => Ok(CertStatus::Registered),
            "deletion in progress" => Ok(CertStatus::DeletionInProgress),
            "global error" => Ok(CertStatus::GlobalError),
            _ => Err(format!("Unknown certificate status: '{}'", s)),
        }
    }
}

impl TryFrom<String> for CertStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        CertStatus::from_str(&s)
    }
}

impl From<CertStatus> for String {
    fn from(status: CertStatus) -> Self {
        status.as_str().to_string()
    }
}

//------------ CertificateInfo -----------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateInfo {
    pub id: String,
    pub member_id: Option<ClientId>,
    pub active: bool,
    pub status: CertStatus,

    /// The DER encoded certificate.
    #[serde(serialize_with = "ext_serde::ser_bytes", deserialize_with = "ext_serde::de_bytes")]
    pub certificate: Vec<u8>,

    /// Lower case hex SHA-1 of the DER encoding.
    pub hash: String,
}

//------------ CertRequestFormat ---------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertRequestFormat {
    Der,
    Pem,
}

impl FromStr for CertRequestFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "der" => Ok(CertRequestFormat::Der),
            "pem" => Ok(CertRequestFormat::Pem),
            _ => Err(format!("Unknown certificate request format: {}", s)),
        }
    }
}

//------------ CertRequestInfo -----------------------------------------------

/// A certificate request that was issued for a key and is waiting for its
/// certificate.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertRequestInfo {
    pub id: String,
    pub member_id: Option<ClientId>,
    pub subject_name: String,
    pub key_usage: KeyUsage,
}

//------------ GeneratedCertRequestInfo --------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GeneratedCertRequestInfo {
    pub cert_req_id: String,

    /// The request, encoded as `format` says.
    #[serde(serialize_with = "ext_serde::ser_bytes", deserialize_with = "ext_serde::de_bytes")]
    pub cert_request: Vec<u8>,
    pub format: CertRequestFormat,
    pub member_id: Option<ClientId>,
    pub key_usage: KeyUsage,
}

//------------ MemberSigningInfo ---------------------------------------------

/// What a caller needs to sign on behalf of a member.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MemberSigningInfo {
    pub key_id: String,
    pub cert: CertificateInfo,
    pub sign_mechanism: String,
}

//------------ Tests ---------------------------------------------------------
