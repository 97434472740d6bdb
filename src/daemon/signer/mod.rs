//! The signer: one synchronous entry point for everything that can be done
//! with tokens, keys, certificates and certificate requests.
//!
//! Every token has its own device behind a mutex, so that different tokens
//! can be used in parallel while each device only sees one call at a time.
//! The model of all tokens is kept behind a single lock. Operations that
//! need both always take the device lock first.
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::{error, info, warn};

use crate::{
    commons::{
        crypto::signing::{KeySpec, SoftSigner, TokenProvider},
        error::Error,
        util::file,
        SignerEmptyResult, SignerResult,
    },
    constants::{KEY_CONF_FILE, SOFT_TOKEN_ID},
    daemon::config::Config,
};

#[cfg(feature = "hsm")]
use crate::commons::crypto::signing::Pkcs11Signer;

mod certs;
mod csr;
mod keyconf;
mod keys;
mod ocsp;
mod registry;
mod signing;
mod tokens;

use self::{keyconf::KeyConf, ocsp::OcspCache, registry::Registry};

//------------ Signer --------------------------------------------------------

#[derive(Debug)]
pub struct Signer {
    key_spec: KeySpec,
    cert_validity_days: i64,
    keyconf_path: PathBuf,

    devices: HashMap<String, Mutex<TokenProvider>>,
    model: RwLock<Registry>,
    ocsp: OcspCache,
}

impl Signer {
    /// Builds the signer with the software token, if enabled, and every
    /// token found on the configured PKCS#11 modules.
    pub fn build(config: &Config) -> SignerResult<Self> {
        file::create_dir(&config.data_dir)?;

        let mut devices = vec![];
        if config.software_token {
            let soft = SoftSigner::build(&config.data_dir, config.software_token_batch_signing)
                .map_err(|e| Error::device(SOFT_TOKEN_ID, e))?;
            devices.push(TokenProvider::Soft(soft));
        }
        devices.extend(Self::pkcs11_devices(config));

        Self::build_with_devices(config, devices)
    }

    #[cfg(feature = "hsm")]
    fn pkcs11_devices(config: &Config) -> Vec<TokenProvider> {
        let mut devices = vec![];
        for module in &config.pkcs11 {
            match Pkcs11Signer::discover(module) {
                Ok(signers) => {
                    info!("Found {} token(s) on PKCS#11 module '{}'", signers.len(), module.name);
                    devices.extend(signers.into_iter().map(TokenProvider::Pkcs11));
                }
                Err(e) => warn!(
                    "Could not use PKCS#11 module '{}' at {}: {}",
                    module.name,
                    module.lib_path.display(),
                    e
                ),
            }
        }
        devices
    }

    #[cfg(not(feature = "hsm"))]
    fn pkcs11_devices(config: &Config) -> Vec<TokenProvider> {
        if !config.pkcs11.is_empty() {
            warn!(
                "Ignoring {} PKCS#11 module(s), this build has no HSM support",
                config.pkcs11.len()
            );
        }
        vec![]
    }

    pub(crate) fn build_with_devices(config: &Config, devices: Vec<TokenProvider>) -> SignerResult<Self> {
        let keyconf_path = file::file_path(&config.data_dir, KEY_CONF_FILE);
        let keyconf = KeyConf::load(&keyconf_path)?;

        let mut seen = HashSet::new();
        let devices: Vec<TokenProvider> = devices
            .into_iter()
            .filter(|d| {
                let unique = seen.insert(d.token_id().to_string());
                if !unique {
                    warn!("Ignoring second device for token '{}'", d.token_id());
                }
                unique
            })
            .collect();

        let registry = Registry::build(keyconf, &devices);
        info!("Signer started with {} token(s)", registry.tokens().len());

        let signer = Signer {
            key_spec: config.key_spec(),
            cert_validity_days: config.cert_validity_days,
            keyconf_path,
            devices: devices
                .into_iter()
                .map(|d| (d.token_id().to_string(), Mutex::new(d)))
                .collect(),
            model: RwLock::new(registry),
            ocsp: OcspCache::default(),
        };

        signer.save(&signer.read_model())?;
        Ok(signer)
    }
}

/// # Helpers shared by the operations
impl Signer {
    fn read_model(&self) -> RwLockReadGuard<'_, Registry> {
        self.model.read().unwrap()
    }

    fn write_model(&self) -> RwLockWriteGuard<'_, Registry> {
        self.model.write().unwrap()
    }

    /// The device behind a token, if it is present.
    fn device(&self, token_id: &str) -> SignerResult<&Mutex<TokenProvider>> {
        self.devices
            .get(token_id)
            .ok_or_else(|| Error::TokenNotAvailable(token_id.to_string()))
    }

    /// Runs `op` on the device of a token that is logged in.
    fn with_active_device<T, F>(&self, token_id: &str, op: F) -> SignerResult<T>
    where
        F: FnOnce(&TokenProvider) -> SignerResult<T>,
    {
        let device = self.device(token_id)?.lock().unwrap();
        if !device.is_logged_in() {
            return Err(Error::TokenNotActive(token_id.to_string()));
        }
        op(&device)
    }

    /// Fails unless the token is active in the model.
    fn require_active(registry: &Registry, token_id: &str) -> SignerEmptyResult {
        if registry.token(token_id)?.is_active() {
            Ok(())
        } else {
            Err(Error::TokenNotActive(token_id.to_string()))
        }
    }

    /// Writes the key configuration. Call while holding the write lock on
    /// the model, so that saves happen in the order of the changes.
    fn save(&self, registry: &Registry) -> SignerEmptyResult {
        registry.to_keyconf().save(&self.keyconf_path).map_err(|e| {
            error!("Could not save key configuration: {}", e);
            e
        })
    }
}

//------------ Tests ---------------------------------------------------------
