//! The key configuration, i.e. what the signer remembers about its tokens
//! across restarts.
//!
//! Only what the signer decided itself is kept here: names, key usages,
//! certificates and pending certificate requests. Anything the devices can
//! tell us again (status, availability, sign mechanisms) is not stored.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::commons::{
    api::{CertRequestInfo, CertificateInfo, KeyAlgorithm, KeyInfo, KeyUsage, TokenInfo, TokenKind},
    util::{ext_serde, file},
    SignerEmptyResult, SignerResult,
};

//------------ KeyConf -------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyConf {
    pub tokens: Vec<TokenConf>,
}

impl KeyConf {
    /// Loads the key configuration, or returns an empty one if there is no
    /// file yet.
    pub fn load(path: &Path) -> SignerResult<Self> {
        if path.exists() {
            debug!("Loading key configuration from {}", path.display());
            Ok(file::load_json(path)?)
        } else {
            debug!("No key configuration at {}, starting empty", path.display());
            Ok(KeyConf::default())
        }
    }

    pub fn save(&self, path: &Path) -> SignerEmptyResult {
        file::save_json(self, path)?;
        Ok(())
    }

    /// Takes the entry for a token out of this configuration.
    pub fn take_token(&mut self, token_id: &str) -> Option<TokenConf> {
        let pos = self.tokens.iter().position(|t| t.id == token_id)?;
        Some(self.tokens.remove(pos))
    }
}

impl From<&[TokenInfo]> for KeyConf {
    fn from(tokens: &[TokenInfo]) -> Self {
        KeyConf {
            tokens: tokens.iter().map(TokenConf::from).collect(),
        }
    }
}

//------------ TokenConf -----------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TokenConf {
    pub id: String,
    pub kind: TokenKind,
    pub friendly_name: String,
    pub keys: Vec<KeyConfEntry>,
}

impl From<&TokenInfo> for TokenConf {
    fn from(token: &TokenInfo) -> Self {
        TokenConf {
            id: token.id.clone(),
            kind: token.kind,
            friendly_name: token.friendly_name.clone(),
            keys: token.keys.iter().map(KeyConfEntry::from).collect(),
        }
    }
}

//------------ KeyConfEntry --------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyConfEntry {
    pub id: String,
    pub friendly_name: String,
    pub label: String,
    pub usage: Option<KeyUsage>,
    pub algorithm: KeyAlgorithm,

    #[serde(serialize_with = "ext_serde::ser_bytes", deserialize_with = "ext_serde::de_bytes")]
    pub public_key: Vec<u8>,

    #[serde(default)]
    pub certs: Vec<CertificateInfo>,

    #[serde(default)]
    pub cert_requests: Vec<CertRequestInfo>,
}

impl KeyConfEntry {
    /// Turns the stored entry back into a key. The key is not available
    /// until its device lists it.
    pub fn into_key(self, token_id: &str, sign_mechanism: String) -> KeyInfo {
        KeyInfo {
            id: self.id,
            token_id: token_id.to_string(),
            friendly_name: self.friendly_name,
            label: self.label,
            usage: self.usage,
            algorithm: self.algorithm,
            public_key: self.public_key,
            available: false,
            sign_mechanism,
            certs: self.certs,
            cert_requests: self.cert_requests,
        }
    }
}

impl From<&KeyInfo> for KeyConfEntry {
    fn from(key: &KeyInfo) -> Self {
        KeyConfEntry {
            id: key.id.clone(),
            friendly_name: key.friendly_name.clone(),
            label: key.label.clone(),
            usage: key.usage,
            algorithm: key.algorithm,
            public_key: key.public_key.clone(),
            certs: key.certs.clone(),
            cert_requests: key.cert_requests.clone(),
        }
    }
}

//------------ Tests ---------------------------------------------------------
