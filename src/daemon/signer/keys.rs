//! Key generation, naming, deletion and the lookups from certificates and
//! requests back to their keys.

use log::{debug, info, warn};

use crate::{
    commons::{
        api::{KeyIdInfo, KeyInfo, TokenInfo, TokenInfoAndKeyId},
        crypto::signing::SignerError,
        error::Error,
        util::random_hex_id,
        SignerEmptyResult, SignerResult,
    },
    constants::KEY_ID_LEN,
    daemon::signer::{registry, Signer},
};

impl Signer {
    /// Generates a new key pair on an active token.
    ///
    /// The label is given to the key on the device and doubles as its
    /// initial friendly name.
    pub fn generate_key(&self, token_id: &str, label: &str) -> SignerResult<KeyInfo> {
        Self::require_active(&self.read_model(), token_id)?;

        let mut device = self.device(token_id)?.lock().unwrap();
        let key_id = random_hex_id(KEY_ID_LEN)?;

        let public_key = device
            .generate_key(&key_id, label, self.key_spec)
            .map_err(|e| match e {
                SignerError::NotLoggedIn => Error::TokenNotActive(token_id.to_string()),
                e => Error::CannotGenerateKey(token_id.to_string(), e.to_string()),
            })?;

        let key = KeyInfo {
            id: key_id,
            token_id: token_id.to_string(),
            friendly_name: label.to_string(),
            label: label.to_string(),
            usage: None,
            algorithm: self.key_spec.algorithm,
            public_key,
            available: true,
            sign_mechanism: registry::sign_mechanism(self.key_spec.algorithm, device.rsa_sign_mechanism()),
            certs: vec![],
            cert_requests: vec![],
        };

        let mut model = self.write_model();
        model.token_mut(token_id)?.keys.push(key.clone());
        info!(
            "Generated {} key '{}' on token '{}'",
            key.algorithm, key.id, token_id
        );
        self.save(&model)?;

        Ok(key)
    }

    pub fn set_key_friendly_name(&self, key_id: &str, name: &str) -> SignerEmptyResult {
        let mut model = self.write_model();
        model.key_mut(key_id)?.friendly_name = name.to_string();
        self.save(&model)
    }

    /// Deletes a key with all its certificates and certificate requests.
    ///
    /// When `delete_from_device` is set the device erases the key first and
    /// nothing is forgotten if that fails. A key that is already gone from
    /// the device is only forgotten.
    pub fn delete_key(&self, key_id: &str, delete_from_device: bool) -> SignerEmptyResult {
        let token_id = self.read_model().key(key_id)?.0.id.clone();

        if !delete_from_device {
            return self.forget_key(key_id);
        }

        Self::require_active(&self.read_model(), &token_id)?;
        let mut device = self.device(&token_id)?.lock().unwrap();
        match device.destroy_key(key_id) {
            Ok(()) => {}
            Err(SignerError::KeyNotFound(_)) => {
                warn!("Key '{}' was already gone from token '{}'", key_id, token_id)
            }
            Err(e) => return Err(Error::device(&token_id, e)),
        }
        self.forget_key(key_id)
    }

    fn forget_key(&self, key_id: &str) -> SignerEmptyResult {
        let mut model = self.write_model();
        let key = model.remove_key(key_id)?;
        info!(
            "Deleted key '{}' with {} certificate(s) and {} request(s)",
            key_id,
            key.certs.len(),
            key.cert_requests.len()
        );
        self.save(&model)
    }

    pub fn get_token_for_key_id(&self, key_id: &str) -> SignerResult<TokenInfo> {
        debug!("Looking up token for key '{}'", key_id);
        let model = self.read_model();
        let (token, _) = model.key(key_id)?;
        Ok(token.clone())
    }

    pub fn get_token_and_key_id_for_cert_hash(&self, hash: &str) -> SignerResult<TokenInfoAndKeyId> {
        let model = self.read_model();
        let (token, key, _) = model.cert_for_hash(hash)?;
        Ok(TokenInfoAndKeyId {
            token_info: token.clone(),
            key_id: key.id.clone(),
        })
    }

    pub fn get_token_and_key_id_for_cert_request_id(&self, csr_id: &str) -> SignerResult<TokenInfoAndKeyId> {
        let model = self.read_model();
        let (token, key, _) = model.cert_request(csr_id)?;
        Ok(TokenInfoAndKeyId {
            token_info: token.clone(),
            key_id: key.id.clone(),
        })
    }

    pub fn get_key_id_for_cert_hash(&self, hash: &str) -> SignerResult<KeyIdInfo> {
        let model = self.read_model();
        let (_, key, _) = model.cert_for_hash(hash)?;
        Ok(KeyIdInfo {
            key_id: key.id.clone(),
            sign_mechanism: key.sign_mechanism.clone(),
        })
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::{
        commons::{
            api::KeyAlgorithm,
            crypto::signing::{
                signers::mocksigner::{FnIdx, MockSignerCallCounts},
                KeySpec, SignerError,
            },
            test,
        },
        constants::{CKM_ECDSA, SOFT_TOKEN_ID},
        daemon::signer::tests::{mock, mock_signer, soft_signer, MOCK_TOKEN, PIN},
    };

    fn fail_always(_: &MockSignerCallCounts) -> Result<(), SignerError> {
        Err(SignerError::Other("device on fire".to_string()))
    }

    #[test]
    fn generate_two_keys() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();

            let k1 = signer.generate_key(SOFT_TOKEN_ID, "k1").unwrap();
            let k2 = signer.generate_key(SOFT_TOKEN_ID, "k2").unwrap();
            assert_ne!(k1.id, k2.id);
            assert_eq!(k1.id.len(), 40);
            assert_eq!(k1.algorithm, KeyAlgorithm::Ec);
            assert_eq!(k1.sign_mechanism, CKM_ECDSA);

            let token = signer.get_token(SOFT_TOKEN_ID).unwrap();
            let names: HashSet<&str> = token.keys.iter().map(|k| k.friendly_name.as_str()).collect();
            assert_eq!(names, HashSet::from(["k1", "k2"]));
            assert_eq!(token.keys.len(), 2);
        })
    }

    #[test]
    fn generate_key_requires_active_token() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let err = signer.generate_key(SOFT_TOKEN_ID, "k1").unwrap_err();
            assert_eq!(err.code(), "Signer.TokenNotActive");
            assert_eq!(
                signer.generate_key("a3f", "k1").unwrap_err().code(),
                "Signer.TokenNotFound"
            );
        })
    }

    #[test]
    fn device_failure_cannot_generate_key() {
        test::test_under_tmp(|dir| {
            let mut device = mock();
            device.set_generate_key_error_cb(fail_always);
            let signer = mock_signer(&dir, device);
            signer.activate_token(MOCK_TOKEN, PIN).unwrap();

            let err = signer.generate_key(MOCK_TOKEN, "k1").unwrap_err();
            assert_eq!(err.code(), "Signer.CannotGenerateKey");
            assert!(err.to_string().contains("device on fire"));
            assert!(signer.get_token(MOCK_TOKEN).unwrap().keys.is_empty());
        })
    }

    #[test]
    fn rename_key() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();
            let key = signer.generate_key(SOFT_TOKEN_ID, "k1").unwrap();

            signer.set_key_friendly_name(&key.id, "renamed").unwrap();
            let token = signer.get_token_for_key_id(&key.id).unwrap();
            assert_eq!(token.key(&key.id).unwrap().friendly_name, "renamed");
            assert_eq!(token.key(&key.id).unwrap().label, "k1");

            let err = signer.set_key_friendly_name("nope", "x").unwrap_err();
            assert_eq!(err.code(), "Signer.KeyNotFound");
        })
    }

    #[test]
    fn delete_key_from_device() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();
            let key = signer.generate_key(SOFT_TOKEN_ID, "k1").unwrap();

            signer.delete_key(&key.id, true).unwrap();
            assert!(signer.get_token(SOFT_TOKEN_ID).unwrap().keys.is_empty());
            assert_eq!(signer.delete_key(&key.id, true).unwrap_err().code(), "Signer.KeyNotFound");

            // the key does not come back from the device
            signer.deactivate_token(SOFT_TOKEN_ID).unwrap();
            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();
            assert!(signer.get_token(SOFT_TOKEN_ID).unwrap().keys.is_empty());
        })
    }

    #[test]
    fn forgotten_keys_return_from_the_device() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();
            let key = signer.generate_key(SOFT_TOKEN_ID, "k1").unwrap();

            signer.delete_key(&key.id, false).unwrap();
            assert!(signer.get_token(SOFT_TOKEN_ID).unwrap().keys.is_empty());

            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();
            let token = signer.get_token(SOFT_TOKEN_ID).unwrap();
            assert_eq!(token.key(&key.id).unwrap().friendly_name, "k1");
        })
    }

    #[test]
    fn device_failure_keeps_key() {
        test::test_under_tmp(|dir| {
            let mut device = mock();
            device.add_key(
                "AA",
                "k1",
                KeySpec {
                    algorithm: KeyAlgorithm::Ec,
                    rsa_bits: 0,
                },
            );
            device.set_destroy_key_error_cb(fail_always);
            let signer = mock_signer(&dir, device);

            assert_eq!(signer.delete_key("AA", true).unwrap_err().code(), "Signer.TokenNotActive");

            signer.activate_token(MOCK_TOKEN, PIN).unwrap();
            let err = signer.delete_key("AA", true).unwrap_err();
            assert_eq!(err.code(), "Signer.DeviceError");
            assert!(signer.get_token(MOCK_TOKEN).unwrap().key("AA").is_some());
        })
    }

    #[test]
    fn key_already_gone_from_device_is_forgotten() {
        test::test_under_tmp(|dir| {
            let counts = std::sync::Arc::new(MockSignerCallCounts::new());
            let mut device = crate::commons::crypto::signing::signers::mocksigner::MockSigner::new(
                MOCK_TOKEN,
                PIN,
                counts.clone(),
            );
            device.add_key(
                "AA",
                "k1",
                KeySpec {
                    algorithm: KeyAlgorithm::Ec,
                    rsa_bits: 0,
                },
            );
            device.set_destroy_key_error_cb(|_| Err(SignerError::KeyNotFound("AA".to_string())));
            let signer = mock_signer(&dir, device);
            signer.activate_token(MOCK_TOKEN, PIN).unwrap();

            signer.delete_key("AA", true).unwrap();
            assert_eq!(counts.get(FnIdx::DestroyKey), 1);
            assert!(signer.get_token(MOCK_TOKEN).unwrap().key("AA").is_none());
        })
    }
}
