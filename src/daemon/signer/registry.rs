//! The in-memory model of all tokens, their keys, and the certificates and
//! certificate requests issued for those keys.

use log::{info, warn};

use crate::{
    commons::{
        api::{
            CertRequestInfo, CertificateInfo, ClientId, KeyAlgorithm, KeyInfo, TokenInfo, TokenKind, TokenStatus,
        },
        crypto::signing::TokenProvider,
        error::Error,
        SignerResult,
    },
    constants::{CKM_ECDSA, CKM_RSA_PKCS, SOFT_TOKEN_DEFAULT_NAME},
    daemon::signer::keyconf::{KeyConf, TokenConf},
};

/// The mechanism a key of the given algorithm signs with on a token whose
/// RSA keys use `rsa_mechanism`.
pub fn sign_mechanism(algorithm: KeyAlgorithm, rsa_mechanism: &str) -> String {
    match algorithm {
        KeyAlgorithm::Rsa => rsa_mechanism.to_string(),
        KeyAlgorithm::Ec => CKM_ECDSA.to_string(),
    }
}

//------------ Registry ------------------------------------------------------

/// Tokens in registration order. Device backed tokens come first, in the
/// order the devices were found, followed by remembered tokens whose device
/// is gone.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    tokens: Vec<TokenInfo>,
}

impl Registry {
    pub fn build(mut keyconf: KeyConf, devices: &[TokenProvider]) -> Self {
        let mut tokens = vec![];

        for device in devices {
            let conf = keyconf.take_token(device.token_id());
            tokens.push(Self::device_token(device, conf));
        }

        for conf in keyconf.tokens {
            warn!("No device found for token '{}', marking it unavailable", conf.id);
            tokens.push(Self::stored_token(conf));
        }

        let mut registry = Registry { tokens };
        for device in devices {
            registry.merge_device_keys(device);
        }
        registry
    }

    /// The model of a token that has a device, enriched with what we
    /// remembered about it.
    pub fn device_token(device: &TokenProvider, conf: Option<TokenConf>) -> TokenInfo {
        let token_id = device.token_id().to_string();
        let kind = device.kind();
        let rsa_mechanism = device.rsa_sign_mechanism();

        let (friendly_name, keys) = match conf {
            Some(conf) => {
                let keys = conf
                    .keys
                    .into_iter()
                    .map(|k| {
                        let mechanism = sign_mechanism(k.algorithm, rsa_mechanism);
                        k.into_key(&token_id, mechanism)
                    })
                    .collect();
                (conf.friendly_name, keys)
            }
            None => {
                let name = match kind {
                    TokenKind::Software => SOFT_TOKEN_DEFAULT_NAME.to_string(),
                    TokenKind::Hardware => token_id.clone(),
                };
                (name, vec![])
            }
        };

        let status = if device.is_initialized() {
            TokenStatus::Inactive
        } else {
            TokenStatus::NotInitialized
        };

        TokenInfo {
            id: token_id,
            kind,
            friendly_name,
            status,
            available: device.is_available(),
            read_only: device.is_read_only(),
            batch_signing_enabled: device.supports_batch_signing(),
            info: device.info().to_string(),
            keys,
        }
    }

    fn stored_token(conf: TokenConf) -> TokenInfo {
        let token_id = conf.id.clone();
        let keys = conf
            .keys
            .into_iter()
            .map(|k| {
                let mechanism = sign_mechanism(k.algorithm, CKM_RSA_PKCS);
                k.into_key(&token_id, mechanism)
            })
            .collect();

        TokenInfo {
            id: conf.id,
            kind: conf.kind,
            friendly_name: conf.friendly_name,
            status: TokenStatus::Inactive,
            available: false,
            read_only: false,
            batch_signing_enabled: false,
            info: String::new(),
            keys,
        }
    }

    /// Brings the keys of a token in line with what its device reports.
    ///
    /// Keys that are unknown to the model are added, keys that the device no
    /// longer reports are kept but marked unavailable. Returns whether keys
    /// were added.
    pub fn merge_device_keys(&mut self, device: &TokenProvider) -> bool {
        let token_id = device.token_id();
        let rsa_mechanism = device.rsa_sign_mechanism();

        let Some(token) = self.tokens.iter_mut().find(|t| t.id == token_id) else {
            return false;
        };

        let device_keys = match device.list_keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Could not list keys on token '{}': {}", token_id, e);
                token.available = false;
                return false;
            }
        };

        for key in token.keys.iter_mut() {
            key.available = device_keys.iter().any(|k| k.id == key.id);
        }

        let mut added = false;
        for device_key in device_keys {
            if token.key(&device_key.id).is_some() {
                continue;
            }
            info!("Found new key '{}' on token '{}'", device_key.id, token_id);
            token.keys.push(KeyInfo {
                id: device_key.id,
                token_id: token_id.to_string(),
                friendly_name: device_key.label.clone(),
                label: device_key.label,
                usage: None,
                algorithm: device_key.algorithm,
                public_key: device_key.public_key,
                available: true,
                sign_mechanism: sign_mechanism(device_key.algorithm, rsa_mechanism),
                certs: vec![],
                cert_requests: vec![],
            });
            added = true;
        }
        added
    }

    pub fn to_keyconf(&self) -> KeyConf {
        KeyConf::from(self.tokens.as_slice())
    }
}

/// # Tokens
impl Registry {
    pub fn tokens(&self) -> &[TokenInfo] {
        &self.tokens
    }

    pub fn token(&self, token_id: &str) -> SignerResult<&TokenInfo> {
        self.tokens
            .iter()
            .find(|t| t.id == token_id)
            .ok_or_else(|| Error::TokenNotFound(token_id.to_string()))
    }

    pub fn token_mut(&mut self, token_id: &str) -> SignerResult<&mut TokenInfo> {
        self.tokens
            .iter_mut()
            .find(|t| t.id == token_id)
            .ok_or_else(|| Error::TokenNotFound(token_id.to_string()))
    }

    pub fn add_token(&mut self, token: TokenInfo) {
        self.tokens.push(token);
    }

    /// Removes a token that holds no keys.
    pub fn remove_token(&mut self, token_id: &str) -> SignerResult<TokenInfo> {
        let pos = self
            .tokens
            .iter()
            .position(|t| t.id == token_id)
            .ok_or_else(|| Error::TokenNotFound(token_id.to_string()))?;

        if !self.tokens[pos].keys.is_empty() {
            return Err(Error::TokenNotEmpty(token_id.to_string()));
        }
        Ok(self.tokens.remove(pos))
    }
}

/// # Keys
impl Registry {
    /// Returns the key and the token it lives on.
    pub fn key(&self, key_id: &str) -> SignerResult<(&TokenInfo, &KeyInfo)> {
        self.tokens
            .iter()
            .find_map(|t| t.key(key_id).map(|k| (t, k)))
            .ok_or_else(|| Error::KeyNotFound(key_id.to_string()))
    }

    pub fn key_mut(&mut self, key_id: &str) -> SignerResult<&mut KeyInfo> {
        self.keys_mut()
            .find(|k| k.id == key_id)
            .ok_or_else(|| Error::KeyNotFound(key_id.to_string()))
    }

    /// Removes a key, and with it its certificates and requests.
    pub fn remove_key(&mut self, key_id: &str) -> SignerResult<KeyInfo> {
        for token in self.tokens.iter_mut() {
            if let Some(pos) = token.keys.iter().position(|k| k.id == key_id) {
                return Ok(token.keys.remove(pos));
            }
        }
        Err(Error::KeyNotFound(key_id.to_string()))
    }

    /// Finds the key with the given DER encoded public key.
    pub fn key_for_public_key_mut(&mut self, public_key: &[u8]) -> Option<&mut KeyInfo> {
        self.keys_mut().find(|k| k.public_key == public_key)
    }

    fn keys_mut(&mut self) -> impl Iterator<Item = &mut KeyInfo> {
        self.tokens.iter_mut().flat_map(|t| t.keys.iter_mut())
    }
}

/// # Certificates
impl Registry {
    pub fn cert_mut(&mut self, cert_id: &str) -> SignerResult<&mut CertificateInfo> {
        self.keys_mut()
            .flat_map(|k| k.certs.iter_mut())
            .find(|c| c.id == cert_id)
            .ok_or_else(|| Error::CertNotFound(cert_id.to_string()))
    }

    pub fn remove_cert(&mut self, cert_id: &str) -> SignerResult<CertificateInfo> {
        for key in self.keys_mut() {
            if let Some(pos) = key.certs.iter().position(|c| c.id == cert_id) {
                return Ok(key.certs.remove(pos));
            }
        }
        Err(Error::CertNotFound(cert_id.to_string()))
    }

    /// Finds a certificate by its hex hash, in either case.
    pub fn cert_for_hash(&self, hash: &str) -> SignerResult<(&TokenInfo, &KeyInfo, &CertificateInfo)> {
        let lower = hash.to_ascii_lowercase();
        for token in &self.tokens {
            for key in &token.keys {
                if let Some(cert) = key.certs.iter().find(|c| c.hash == lower) {
                    return Ok((token, key, cert));
                }
            }
        }
        Err(Error::CertNotFoundForHash(hash.to_string()))
    }

    /// All certificates of a member, in whichever subsystem.
    pub fn member_certs(&self, member: &ClientId) -> Vec<CertificateInfo> {
        self.tokens
            .iter()
            .flat_map(|t| t.keys.iter())
            .flat_map(|k| k.certs.iter())
            .filter(|c| c.member_id.as_ref().is_some_and(|m| m.member_equals(member)))
            .cloned()
            .collect()
    }
}

/// # Certificate Requests
impl Registry {
    pub fn cert_request(&self, csr_id: &str) -> SignerResult<(&TokenInfo, &KeyInfo, &CertRequestInfo)> {
        for token in &self.tokens {
            for key in &token.keys {
                if let Some(csr) = key.cert_request(csr_id) {
                    return Ok((token, key, csr));
                }
            }
        }
        Err(Error::CsrNotFound(csr_id.to_string()))
    }

    pub fn remove_cert_request(&mut self, csr_id: &str) -> SignerResult<CertRequestInfo> {
        for key in self.keys_mut() {
            if let Some(pos) = key.cert_requests.iter().position(|r| r.id == csr_id) {
                return Ok(key.cert_requests.remove(pos));
            }
        }
        Err(Error::CsrNotFound(csr_id.to_string()))
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        commons::{
            api::{CertStatus, KeyUsage},
            crypto::signing::{
                signers::mocksigner::{MockSigner, MockSignerCallCounts},
                KeySpec,
            },
            test,
        },
        constants::CKM_RSA_PKCS_PSS,
        daemon::signer::keyconf::KeyConfEntry,
    };

    const EC: KeySpec = KeySpec {
        algorithm: KeyAlgorithm::Ec,
        rsa_bits: 0,
    };

    fn mock(token_id: &str) -> MockSigner {
        MockSigner::new(token_id, "1234", Arc::new(MockSignerCallCounts::new()))
    }

    fn cert(id: &str, hash: &str, member: Option<&str>) -> CertificateInfo {
        CertificateInfo {
            id: id.to_string(),
            member_id: member.map(test::client),
            active: true,
            status: CertStatus::Registered,
            certificate: vec![],
            hash: hash.to_string(),
        }
    }

    fn stored_key(id: &str, certs: Vec<CertificateInfo>) -> KeyConfEntry {
        KeyConfEntry {
            id: id.to_string(),
            friendly_name: format!("name-{}", id),
            label: id.to_string(),
            usage: Some(KeyUsage::Signing),
            algorithm: KeyAlgorithm::Rsa,
            public_key: id.as_bytes().to_vec(),
            certs,
            cert_requests: vec![],
        }
    }

    #[test]
    fn device_keys_are_merged() {
        let mut device = mock("hsm-1");
        device.set_rsa_sign_mechanism(CKM_RSA_PKCS_PSS);
        device.add_key("AA", "from-device", EC);

        let keyconf = KeyConf {
            tokens: vec![TokenConf {
                id: "hsm-1".to_string(),
                kind: TokenKind::Hardware,
                friendly_name: "My HSM".to_string(),
                keys: vec![stored_key("BB", vec![])],
            }],
        };

        let registry = Registry::build(keyconf, &[TokenProvider::Mock(device)]);
        let token = registry.token("hsm-1").unwrap();
        assert_eq!(token.friendly_name, "My HSM");
        assert_eq!(token.status, TokenStatus::Inactive);

        let stored = token.key("BB").unwrap();
        assert!(!stored.available);
        assert_eq!(stored.sign_mechanism, CKM_RSA_PKCS_PSS);

        let found = token.key("AA").unwrap();
        assert!(found.available);
        assert_eq!(found.friendly_name, "from-device");
        assert_eq!(found.usage, None);
        assert_eq!(found.sign_mechanism, CKM_ECDSA);
    }

    #[test]
    fn tokens_without_device_are_unavailable() {
        let keyconf = KeyConf {
            tokens: vec![TokenConf {
                id: "gone".to_string(),
                kind: TokenKind::Hardware,
                friendly_name: "gone".to_string(),
                keys: vec![stored_key("CC", vec![])],
            }],
        };

        let registry = Registry::build(keyconf, &[TokenProvider::Mock(mock("hsm-1"))]);
        let ids: Vec<&str> = registry.tokens().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["hsm-1", "gone"]);

        let gone = registry.token("gone").unwrap();
        assert!(!gone.available);
        assert_eq!(gone.key("CC").unwrap().sign_mechanism, CKM_RSA_PKCS);
        assert_eq!(registry.token("hsm-1").unwrap().friendly_name, "hsm-1");
    }

    #[test]
    fn lookups() {
        let keyconf = KeyConf {
            tokens: vec![TokenConf {
                id: "t".to_string(),
                kind: TokenKind::Hardware,
                friendly_name: "t".to_string(),
                keys: vec![
                    stored_key("K1", vec![cert("c1", "aa11", Some("EE:GOV:1:sub"))]),
                    stored_key("K2", vec![cert("c2", "bb22", Some("EE:GOV:2"))]),
                ],
            }],
        };
        let mut registry = Registry::build(keyconf, &[]);

        let (token, key) = registry.key("K2").unwrap();
        assert_eq!((token.id.as_str(), key.id.as_str()), ("t", "K2"));
        assert_eq!(registry.key("K3").unwrap_err().code(), "Signer.KeyNotFound");

        let (_, key, cert) = registry.cert_for_hash("AA11").unwrap();
        assert_eq!((key.id.as_str(), cert.id.as_str()), ("K1", "c1"));
        assert_eq!(
            registry.cert_for_hash("cc33").unwrap_err().to_string(),
            "Certificate with hash 'cc33' not found"
        );

        let member = test::client("EE:GOV:1");
        assert_eq!(registry.member_certs(&member).len(), 1);

        assert!(registry.key_for_public_key_mut(b"K1").is_some());
        assert!(registry.key_for_public_key_mut(b"K9").is_none());

        assert_eq!(registry.remove_token("t").unwrap_err().code(), "Signer.TokenNotEmpty");
        registry.remove_key("K1").unwrap();
        assert_eq!(registry.remove_cert("c1").unwrap_err().code(), "Signer.CertNotFound");
        registry.remove_cert("c2").unwrap();
        registry.remove_key("K2").unwrap();
        registry.remove_token("t").unwrap();
        assert_eq!(registry.token("t").unwrap_err().code(), "Signer.TokenNotFound");
    }
}
