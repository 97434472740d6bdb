//! An in-memory token for tests, which counts calls and can be told to fail.
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use openssl::pkey::{PKey, Private};

use crate::{
    commons::{
        api::{KeyAlgorithm, TokenKind},
        crypto::{
            signing::signers::{
                error::SignerError,
                softsigner::{generate_key_pair, sign_digest},
                DeviceKey, KeySpec,
            },
            SignAlgorithm,
        },
    },
    constants::CKM_RSA_PKCS,
};

pub enum FnIdx {
    Login,
    Logout,
    ChangePin,
    GenerateKey,
    ListKeys,
    DestroyKey,
    Sign,
    Count,
}

#[derive(Debug)]
pub struct MockSignerCallCounts {
    call_counts: RwLock<Vec<u32>>,
}

impl MockSignerCallCounts {
    pub fn new() -> Self {
        let mut call_counts = Vec::with_capacity(FnIdx::Count as usize);
        call_counts.resize(FnIdx::Count as usize, 0);

        Self {
            call_counts: RwLock::new(call_counts),
        }
    }

    pub fn get(&self, fn_idx: FnIdx) -> u32 {
        self.call_counts.read().unwrap()[fn_idx as usize]
    }

    pub fn inc(&self, fn_idx: FnIdx) {
        self.call_counts.write().unwrap()[fn_idx as usize] += 1;
    }
}

/// Decides whether a call fails, given the calls made so far.
pub type ErrorCb = fn(&MockSignerCallCounts) -> Result<(), SignerError>;

pub struct MockSigner {
    token_id: String,
    kind: TokenKind,
    pin: String,
    logged_in: bool,
    batch_signing: bool,
    rsa_sign_mechanism: &'static str,
    available: bool,
    fn_call_counts: Arc<MockSignerCallCounts>,
    keys: BTreeMap<String, (String, PKey<Private>)>,
    login_error_cb: Option<ErrorCb>,
    generate_key_error_cb: Option<ErrorCb>,
    destroy_key_error_cb: Option<ErrorCb>,
    sign_error_cb: Option<ErrorCb>,
}

impl std::fmt::Debug for MockSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSigner").field("token_id", &self.token_id).finish()
    }
}

// test interface
impl MockSigner {
    pub fn new(token_id: &str, pin: &str, fn_call_counts: Arc<MockSignerCallCounts>) -> Self {
        Self {
            token_id: token_id.to_string(),
            kind: TokenKind::Hardware,
            pin: pin.to_string(),
            logged_in: false,
            batch_signing: false,
            rsa_sign_mechanism: CKM_RSA_PKCS,
            available: true,
            fn_call_counts,
            keys: BTreeMap::new(),
            login_error_cb: None,
            generate_key_error_cb: None,
            destroy_key_error_cb: None,
            sign_error_cb: None,
        }
    }

    pub fn set_batch_signing(&mut self, enabled: bool) {
        self.batch_signing = enabled;
    }

    pub fn set_rsa_sign_mechanism(&mut self, mechanism: &'static str) {
        self.rsa_sign_mechanism = mechanism;
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn set_login_error_cb(&mut self, cb: ErrorCb) {
        self.login_error_cb = Some(cb);
    }

    pub fn set_generate_key_error_cb(&mut self, cb: ErrorCb) {
        self.generate_key_error_cb = Some(cb);
    }

    pub fn set_destroy_key_error_cb(&mut self, cb: ErrorCb) {
        self.destroy_key_error_cb = Some(cb);
    }

    pub fn set_sign_error_cb(&mut self, cb: ErrorCb) {
        self.sign_error_cb = Some(cb);
    }

    /// Puts a key on the device behind the back of the signer.
    pub fn add_key(&mut self, key_id: &str, label: &str, spec: KeySpec) -> Vec<u8> {
        let key = generate_key_pair(spec).unwrap();
        let public_key = key.public_key_to_der().unwrap();
        self.keys.insert(key_id.to_string(), (label.to_string(), key));
        public_key
    }

    fn inc_fn_call_count(&self, fn_idx: FnIdx) {
        self.fn_call_counts.inc(fn_idx)
    }

    fn check(&self, cb: Option<ErrorCb>) -> Result<(), SignerError> {
        match cb {
            Some(cb) => cb(&self.fn_call_counts),
            None => Ok(()),
        }
    }

    fn require_login(&self) -> Result<(), SignerError> {
        if self.logged_in {
            Ok(())
        } else {
            Err(SignerError::NotLoggedIn)
        }
    }
}

// device interface
impl MockSigner {
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn info(&self) -> &str {
        "Mock token"
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn supports_batch_signing(&self) -> bool {
        self.batch_signing
    }

    pub fn rsa_sign_mechanism(&self) -> &'static str {
        self.rsa_sign_mechanism
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn login(&mut self, pin: &str) -> Result<(), SignerError> {
        self.inc_fn_call_count(FnIdx::Login);
        self.check(self.login_error_cb)?;
        if pin != self.pin {
            return Err(SignerError::PinIncorrect);
        }
        self.logged_in = true;
        Ok(())
    }

    pub fn logout(&mut self) {
        self.inc_fn_call_count(FnIdx::Logout);
        self.logged_in = false;
    }

    pub fn change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<(), SignerError> {
        self.inc_fn_call_count(FnIdx::ChangePin);
        if old_pin != self.pin {
            return Err(SignerError::PinIncorrect);
        }
        self.pin = new_pin.to_string();
        Ok(())
    }

    pub fn generate_key(&mut self, key_id: &str, label: &str, spec: KeySpec) -> Result<Vec<u8>, SignerError> {
        self.inc_fn_call_count(FnIdx::GenerateKey);
        self.check(self.generate_key_error_cb)?;
        self.require_login()?;

        let key = generate_key_pair(spec)?;
        let public_key = key.public_key_to_der()?;
        self.keys.insert(key_id.to_string(), (label.to_string(), key));
        Ok(public_key)
    }

    pub fn list_keys(&self) -> Result<Vec<DeviceKey>, SignerError> {
        self.inc_fn_call_count(FnIdx::ListKeys);
        let mut res = vec![];
        for (id, (label, key)) in &self.keys {
            let algorithm = if key.rsa().is_ok() {
                KeyAlgorithm::Rsa
            } else {
                KeyAlgorithm::Ec
            };
            res.push(DeviceKey {
                id: id.clone(),
                label: label.clone(),
                algorithm,
                public_key: key.public_key_to_der()?,
            });
        }
        Ok(res)
    }

    pub fn destroy_key(&mut self, key_id: &str) -> Result<(), SignerError> {
        self.inc_fn_call_count(FnIdx::DestroyKey);
        self.check(self.destroy_key_error_cb)?;
        self.require_login()?;
        self.keys
            .remove(key_id)
            .map(|_| ())
            .ok_or_else(|| SignerError::KeyNotFound(key_id.to_string()))
    }

    pub fn sign(&self, key_id: &str, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.inc_fn_call_count(FnIdx::Sign);
        self.check(self.sign_error_cb)?;
        self.require_login()?;
        let (_, key) = self
            .keys
            .get(key_id)
            .ok_or_else(|| SignerError::KeyNotFound(key_id.to_string()))?;
        sign_digest(key, algorithm, digest)
    }
}
