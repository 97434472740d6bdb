//! Support for signing things using software keys (through openssl) and
//! storing them on disk, encrypted with the token PIN.
use std::{
    fs,
    path::{Path, PathBuf},
};

use log::warn;
use openssl::{
    ec::{EcGroup, EcKey},
    nid::Nid,
    pkey::{PKey, Private},
    pkey_ctx::PkeyCtx,
    rsa::{Padding, Rsa},
    sign::RsaPssSaltlen,
    symm::Cipher,
};
use serde::{Deserialize, Serialize};

use crate::{
    commons::{
        api::KeyAlgorithm,
        crypto::{
            signing::signers::{error::SignerError, DeviceKey, KeySpec},
            SignAlgorithm, SignScheme,
        },
        util::{ext_serde, file, file::IoError},
    },
    constants::{CKM_RSA_PKCS, SOFT_TOKEN_DIR, SOFT_TOKEN_ID, SOFT_TOKEN_PIN_FILE},
};

//------------ SoftSigner ----------------------------------------------------

/// The software token.
///
/// Every key lives in its own JSON file under the keystore dir. The private
/// key is kept as PKCS#8 encrypted with the token PIN, the public key in the
/// clear so keys can be listed without logging in. The PIN itself is never
/// stored: a throw-away key encrypted with it proves it instead.
#[derive(Debug)]
pub struct SoftSigner {
    keys_dir: PathBuf,
    info: String,
    batch_signing: bool,

    /// Set while logged in.
    pin: Option<String>,
}

impl SoftSigner {
    pub fn build(data_dir: &Path, batch_signing: bool) -> Result<Self, SignerError> {
        let keys_dir = file::sub_dir(data_dir, SOFT_TOKEN_DIR)?;
        let info = format!(
            "OpenSSL software token [version: {}, keys dir: {}]",
            openssl::version::version(),
            keys_dir.display()
        );

        Ok(SoftSigner {
            keys_dir,
            info,
            batch_signing,
            pin: None,
        })
    }

    pub fn token_id(&self) -> &str {
        SOFT_TOKEN_ID
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn supports_batch_signing(&self) -> bool {
        self.batch_signing
    }

    pub fn rsa_sign_mechanism(&self) -> &'static str {
        CKM_RSA_PKCS
    }

    pub fn is_initialized(&self) -> bool {
        self.pin_path().is_file()
    }

    pub fn is_logged_in(&self) -> bool {
        self.pin.is_some()
    }

    pub fn init_pin(&mut self, pin: &str) -> Result<(), SignerError> {
        if self.is_initialized() {
            return Err(SignerError::AlreadyInitialized);
        }
        let proof = generate_key_pair(KeySpec {
            algorithm: KeyAlgorithm::Ec,
            rsa_bits: 0,
        })?;
        file::save(&encrypt(&proof, pin)?, &self.pin_path())?;
        Ok(())
    }

    pub fn login(&mut self, pin: &str) -> Result<(), SignerError> {
        self.verify_pin(pin)?;
        self.pin = Some(pin.to_string());
        Ok(())
    }

    pub fn logout(&mut self) {
        self.pin = None;
    }

    /// Re-encrypts every key, and the PIN proof, with the new PIN.
    ///
    /// Every key is re-encrypted and written next to its file before any
    /// file is replaced. If one key cannot be done, nothing changes and the
    /// old PIN stays in use.
    pub fn change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<(), SignerError> {
        let proof = self.verify_pin(old_pin)?;

        let mut contents = vec![];
        for id in self.key_ids()? {
            let mut key_file = self.load_key_file(&id)?;
            let key = decrypt(key_file.private_key.as_bytes(), old_pin)
                .map_err(|_| SignerError::Other(format!("Could not decrypt key '{}'", id)))?;
            key_file.private_key = encrypt_to_string(&key, new_pin)?;
            contents.push((self.key_path(&id), serde_json::to_vec_pretty(&key_file)?));
        }
        // the proof goes last, the old PIN works until all keys are moved
        contents.push((self.pin_path(), encrypt(&proof, new_pin)?));

        let mut staged = vec![];
        for (path, content) in &contents {
            match file::stage(content, path) {
                Ok(tmp_path) => staged.push((tmp_path, path)),
                Err(e) => {
                    for (tmp_path, _) in &staged {
                        if let Err(e) = file::delete_file(tmp_path) {
                            warn!("Could not clean up after failed PIN change: {}", e);
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        for (tmp_path, path) in staged {
            file::commit(&tmp_path, path)?;
        }

        if self.pin.is_some() {
            self.pin = Some(new_pin.to_string());
        }
        Ok(())
    }

    /// Generates and stores a new key pair, returns its public key.
    pub fn generate_key(&mut self, key_id: &str, label: &str, spec: KeySpec) -> Result<Vec<u8>, SignerError> {
        let pin = self.pin()?;

        let key = generate_key_pair(spec)?;
        let public_key = key.public_key_to_der()?;
        let key_file = SoftKeyFile {
            label: label.to_string(),
            algorithm: spec.algorithm,
            public_key: public_key.clone(),
            private_key: encrypt_to_string(&key, pin)?,
        };
        file::save_json(&key_file, &self.key_path(key_id))?;

        Ok(public_key)
    }

    pub fn list_keys(&self) -> Result<Vec<DeviceKey>, SignerError> {
        let mut res = vec![];
        for id in self.key_ids()? {
            let key_file = self.load_key_file(&id)?;
            res.push(DeviceKey {
                id,
                label: key_file.label,
                algorithm: key_file.algorithm,
                public_key: key_file.public_key,
            });
        }
        Ok(res)
    }

    pub fn destroy_key(&mut self, key_id: &str) -> Result<(), SignerError> {
        self.pin()?;
        let path = self.key_path(key_id);
        if !path.is_file() {
            return Err(SignerError::KeyNotFound(key_id.to_string()));
        }
        file::delete_file(&path)?;
        Ok(())
    }

    pub fn sign(&self, key_id: &str, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>, SignerError> {
        let pin = self.pin()?;
        let key_file = self.load_key_file(key_id)?;
        let key = decrypt(key_file.private_key.as_bytes(), pin)
            .map_err(|_| SignerError::Other(format!("Could not decrypt key '{}'", key_id)))?;
        sign_digest(&key, algorithm, digest)
    }
}

impl SoftSigner {
    fn pin(&self) -> Result<&str, SignerError> {
        self.pin.as_deref().ok_or(SignerError::NotLoggedIn)
    }

    /// Checks the PIN against the stored proof, returns the proof key.
    fn verify_pin(&self, pin: &str) -> Result<PKey<Private>, SignerError> {
        if !self.is_initialized() {
            return Err(SignerError::NotInitialized);
        }
        let pem = file::read(&self.pin_path())?;
        decrypt(&pem, pin).map_err(|_| SignerError::PinIncorrect)
    }

    fn pin_path(&self) -> PathBuf {
        file::file_path(&self.keys_dir, SOFT_TOKEN_PIN_FILE)
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        file::file_path(&self.keys_dir, &format!("{}.json", key_id))
    }

    fn key_ids(&self) -> Result<Vec<String>, SignerError> {
        let entries = fs::read_dir(&self.keys_dir).map_err(|e| {
            IoError::new(
                format!("Could not list keys in '{}'", self.keys_dir.to_string_lossy()),
                e,
            )
        })?;

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(|id| id.to_string())
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load_key_file(&self, key_id: &str) -> Result<SoftKeyFile, SignerError> {
        let path = self.key_path(key_id);
        if !path.is_file() {
            return Err(SignerError::KeyNotFound(key_id.to_string()));
        }
        Ok(serde_json::from_slice(&file::read(&path)?)?)
    }
}

//------------ SoftKeyFile ---------------------------------------------------

#[derive(Deserialize, Serialize)]
struct SoftKeyFile {
    label: String,
    algorithm: KeyAlgorithm,

    #[serde(serialize_with = "ext_serde::ser_bytes", deserialize_with = "ext_serde::de_bytes")]
    public_key: Vec<u8>,

    /// Encrypted PKCS#8, PEM encoded.
    private_key: String,
}

//------------ Helpers -------------------------------------------------------

pub(crate) fn generate_key_pair(spec: KeySpec) -> Result<PKey<Private>, SignerError> {
    match spec.algorithm {
        KeyAlgorithm::Rsa => Ok(PKey::from_rsa(Rsa::generate(spec.rsa_bits)?)?),
        KeyAlgorithm::Ec => {
            let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
            Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
        }
    }
}

/// Signs a precomputed digest.
pub(crate) fn sign_digest(
    key: &PKey<Private>,
    algorithm: SignAlgorithm,
    digest: &[u8],
) -> Result<Vec<u8>, SignerError> {
    let md = algorithm.digest().md();

    let mut ctx = PkeyCtx::new(key)?;
    ctx.sign_init()?;
    match algorithm.scheme() {
        SignScheme::RsaPkcs1 => ctx.set_rsa_padding(Padding::PKCS1)?,
        SignScheme::RsaPss => ctx.set_rsa_padding(Padding::PKCS1_PSS)?,
        SignScheme::Ecdsa => {}
    }
    ctx.set_signature_md(md)?;
    if algorithm.scheme() == SignScheme::RsaPss {
        ctx.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
        ctx.set_rsa_mgf1_md(md)?;
    }

    let mut signature = vec![];
    ctx.sign_to_vec(digest, &mut signature)?;
    Ok(signature)
}

fn encrypt(key: &PKey<Private>, pin: &str) -> Result<Vec<u8>, SignerError> {
    Ok(key.private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), pin.as_bytes())?)
}

fn encrypt_to_string(key: &PKey<Private>, pin: &str) -> Result<String, SignerError> {
    String::from_utf8(encrypt(key, pin)?).map_err(|e| SignerError::Other(e.to_string()))
}

fn decrypt(pem: &[u8], pin: &str) -> Result<PKey<Private>, openssl::error::ErrorStack> {
    PKey::private_key_from_pem_passphrase(pem, pin.as_bytes())
}

//------------ Tests ---------------------------------------------------------
