//! Support for keys held by PKCS#11 tokens, one signer per slot.
use std::os::raw::c_ulong;

use asn1_rs::{oid, FromDer, OctetString, ToDer};
use cryptoki::{
    context::{CInitializeArgs, Pkcs11},
    error::{Error as Pkcs11Error, RvError},
    mechanism::{
        rsa::{PkcsMgfType, PkcsPssParams},
        Mechanism, MechanismType,
    },
    object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle},
    session::{Session, UserType},
    slot::Slot,
    types::AuthPin,
};
use log::{debug, info, trace, warn};
use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey, EcPoint},
    ecdsa::EcdsaSig,
    nid::Nid,
    pkey::PKey,
    rsa::Rsa,
};

use crate::{
    commons::{
        api::KeyAlgorithm,
        crypto::{
            signing::signers::{error::SignerError, DeviceKey, KeySpec},
            CryptoError, DigestAlgorithm, SignAlgorithm, SignScheme,
        },
    },
    constants::{CKM_RSA_PKCS, CKM_RSA_PKCS_PSS},
    daemon::config::Pkcs11Config,
};

//------------ Pkcs11Signer --------------------------------------------------

/// A single PKCS#11 slot holding a token.
///
/// The logged in session is kept for as long as the token is active, all
/// key operations go through it. Keys are matched on CKA_ID, which is the
/// hex decoded key id.
pub struct Pkcs11Signer {
    pkcs11: Pkcs11,
    slot: Slot,

    token_id: String,
    info: String,
    initialized: bool,
    read_only: bool,
    batch_signing: bool,
    rsa_sign_mechanism: &'static str,

    session: Option<Session>,
}

impl std::fmt::Debug for Pkcs11Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11Signer")
            .field("token_id", &self.token_id)
            .field("logged_in", &self.session.is_some())
            .finish()
    }
}

impl Pkcs11Signer {
    /// Loads the module and returns a signer for every slot that holds a
    /// token.
    pub fn discover(config: &Pkcs11Config) -> Result<Vec<Pkcs11Signer>, SignerError> {
        let rsa_sign_mechanism = match config.sign_mechanism.as_str() {
            CKM_RSA_PKCS => CKM_RSA_PKCS,
            CKM_RSA_PKCS_PSS => CKM_RSA_PKCS_PSS,
            other => return Err(SignerError::Unsupported(format!("sign mechanism '{}'", other))),
        };

        debug!("Loading PKCS#11 module '{}'", config.lib_path.display());
        let pkcs11 = Pkcs11::new(&config.lib_path)?;
        pkcs11.initialize(CInitializeArgs::OsThreads)?;

        let mut res = vec![];
        for slot in pkcs11.get_slots_with_token()? {
            let token_info = pkcs11.get_token_info(slot)?;
            let token_id = format!(
                "{}-{}-{}",
                config.name,
                token_info.serial_number().trim(),
                token_info.label().trim()
            );
            let info = format!(
                "{} {} [serial: {}, slot: {}]",
                token_info.manufacturer_id().trim(),
                token_info.model().trim(),
                token_info.serial_number().trim(),
                slot.id()
            );
            info!("Found PKCS#11 token '{}' in slot {}", token_id, slot.id());

            res.push(Pkcs11Signer {
                pkcs11: pkcs11.clone(),
                slot,
                token_id,
                info,
                initialized: token_info.token_initialized(),
                read_only: token_info.write_protected(),
                batch_signing: config.batch_signing_enabled,
                rsa_sign_mechanism,
                session: None,
            });
        }

        Ok(res)
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The token is there as long as the module can still describe it.
    pub fn is_available(&self) -> bool {
        self.pkcs11.get_token_info(self.slot).is_ok()
    }

    pub fn supports_batch_signing(&self) -> bool {
        self.batch_signing
    }

    pub fn rsa_sign_mechanism(&self) -> &'static str {
        self.rsa_sign_mechanism
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    pub fn login(&mut self, pin: &str) -> Result<(), SignerError> {
        if !self.initialized {
            return Err(SignerError::NotInitialized);
        }

        let session = self.pkcs11.open_rw_session(self.slot).map_err(map_error)?;
        match session.login(UserType::User, Some(&auth_pin(pin))) {
            Ok(()) => {}
            Err(Pkcs11Error::Pkcs11(RvError::UserAlreadyLoggedIn, ..)) => {
                debug!("Token '{}' was already logged in", self.token_id);
            }
            Err(e) => return Err(map_error(e)),
        }

        self.session = Some(session);
        Ok(())
    }

    pub fn logout(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.logout() {
                warn!("Could not log out of token '{}': {}", self.token_id, e);
            }
        }
    }

    pub fn change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<(), SignerError> {
        let set_pin = |session: &Session| session.set_pin(&auth_pin(old_pin), &auth_pin(new_pin));

        match &self.session {
            Some(session) => set_pin(session).map_err(map_error),
            None => {
                let session = self.pkcs11.open_rw_session(self.slot).map_err(map_error)?;
                session
                    .login(UserType::User, Some(&auth_pin(old_pin)))
                    .map_err(map_error)?;
                let res = set_pin(&session).map_err(map_error);
                if let Err(e) = session.logout() {
                    warn!("Could not log out of token '{}' after changing its PIN: {}", self.token_id, e);
                }
                res
            }
        }
    }

    pub fn generate_key(&mut self, key_id: &str, label: &str, spec: KeySpec) -> Result<Vec<u8>, SignerError> {
        let session = self.session()?;
        let cka_id = cka_id(key_id)?;

        let (mechanism, mut pub_template) = match spec.algorithm {
            KeyAlgorithm::Rsa => (
                Mechanism::RsaPkcsKeyPairGen,
                vec![
                    Attribute::ModulusBits(c_ulong::from(spec.rsa_bits).into()),
                    Attribute::PublicExponent(vec![0x01, 0x00, 0x01]),
                ],
            ),
            KeyAlgorithm::Ec => (Mechanism::EccKeyPairGen, vec![Attribute::EcParams(p256_params()?)]),
        };
        pub_template.extend_from_slice(&[
            Attribute::Token(true),
            Attribute::Private(false),
            Attribute::Verify(true),
            Attribute::Label(label.as_bytes().to_vec()),
            Attribute::Id(cka_id.clone()),
        ]);

        let priv_template = [
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Extractable(false),
            Attribute::Sign(true),
            Attribute::Label(label.as_bytes().to_vec()),
            Attribute::Id(cka_id),
        ];

        trace!("PKCS#11: generating {} key pair '{}'", spec.algorithm, key_id);
        let (pub_handle, _) = session
            .generate_key_pair(&mechanism, &pub_template, &priv_template)
            .map_err(map_error)?;

        public_key(session, pub_handle, spec.algorithm)
    }

    pub fn list_keys(&self) -> Result<Vec<DeviceKey>, SignerError> {
        let opened;
        let session = match &self.session {
            Some(session) => session,
            None => {
                opened = self.pkcs11.open_ro_session(self.slot).map_err(map_error)?;
                &opened
            }
        };

        let handles = session
            .find_objects(&[Attribute::Token(true), Attribute::Class(ObjectClass::PUBLIC_KEY)])
            .map_err(map_error)?;

        let mut res = vec![];
        for handle in handles {
            let attrs = session
                .get_attributes(handle, &[AttributeType::Id, AttributeType::Label, AttributeType::KeyType])
                .map_err(map_error)?;

            let mut id = None;
            let mut label = String::new();
            let mut algorithm = None;
            for attr in attrs {
                match attr {
                    Attribute::Id(bytes) => id = Some(hex::encode_upper(bytes)),
                    Attribute::Label(bytes) => label = String::from_utf8_lossy(&bytes).to_string(),
                    Attribute::KeyType(kt) if kt == KeyType::RSA => algorithm = Some(KeyAlgorithm::Rsa),
                    Attribute::KeyType(kt) if kt == KeyType::EC => algorithm = Some(KeyAlgorithm::Ec),
                    _ => {}
                }
            }

            match (id, algorithm) {
                (Some(id), Some(algorithm)) if !id.is_empty() => {
                    let public_key = public_key(session, handle, algorithm)?;
                    res.push(DeviceKey {
                        id,
                        label,
                        algorithm,
                        public_key,
                    });
                }
                _ => debug!("Ignoring unsupported public key object on token '{}'", self.token_id),
            }
        }

        Ok(res)
    }

    pub fn destroy_key(&mut self, key_id: &str) -> Result<(), SignerError> {
        let session = self.session()?;
        let handles = session
            .find_objects(&[Attribute::Token(true), Attribute::Id(cka_id(key_id)?)])
            .map_err(map_error)?;

        if handles.is_empty() {
            return Err(SignerError::KeyNotFound(key_id.to_string()));
        }
        for handle in handles {
            session.destroy_object(handle).map_err(map_error)?;
        }
        Ok(())
    }

    pub fn sign(&self, key_id: &str, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>, SignerError> {
        let session = self.session()?;
        let handle = private_key(session, key_id)?;

        match algorithm.scheme() {
            SignScheme::RsaPkcs1 => {
                let digest_info = algorithm.digest().digest_info(digest)?;
                session
                    .sign(&Mechanism::RsaPkcs, handle, &digest_info)
                    .map_err(map_error)
            }
            SignScheme::RsaPss => {
                let params = pss_params(algorithm.digest());
                session
                    .sign(&Mechanism::RsaPkcsPss(params), handle, digest)
                    .map_err(map_error)
            }
            SignScheme::Ecdsa => {
                let raw = session.sign(&Mechanism::Ecdsa, handle, digest).map_err(map_error)?;
                ecdsa_to_der(&raw)
            }
        }
    }
}

impl Pkcs11Signer {
    fn session(&self) -> Result<&Session, SignerError> {
        self.session.as_ref().ok_or(SignerError::NotLoggedIn)
    }
}

//------------ Helpers -------------------------------------------------------

fn auth_pin(pin: &str) -> AuthPin {
    AuthPin::from(pin.to_string())
}

fn cka_id(key_id: &str) -> Result<Vec<u8>, SignerError> {
    hex::decode(key_id).map_err(|_| SignerError::KeyNotFound(key_id.to_string()))
}

fn private_key(session: &Session, key_id: &str) -> Result<ObjectHandle, SignerError> {
    session
        .find_objects(&[
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Id(cka_id(key_id)?),
        ])
        .map_err(map_error)?
        .into_iter()
        .next()
        .ok_or_else(|| SignerError::KeyNotFound(key_id.to_string()))
}

/// Reads the public key object and returns it as SubjectPublicKeyInfo.
fn public_key(session: &Session, handle: ObjectHandle, algorithm: KeyAlgorithm) -> Result<Vec<u8>, SignerError> {
    match algorithm {
        KeyAlgorithm::Rsa => {
            let mut modulus = None;
            let mut exponent = None;
            for attr in session
                .get_attributes(handle, &[AttributeType::Modulus, AttributeType::PublicExponent])
                .map_err(map_error)?
            {
                match attr {
                    Attribute::Modulus(m) => modulus = Some(m),
                    Attribute::PublicExponent(e) => exponent = Some(e),
                    _ => {}
                }
            }
            let (Some(modulus), Some(exponent)) = (modulus, exponent) else {
                return Err(SignerError::Other("RSA public key without modulus or exponent".to_string()));
            };
            let rsa = Rsa::from_public_components(BigNum::from_slice(&modulus)?, BigNum::from_slice(&exponent)?)?;
            Ok(PKey::from_rsa(rsa)?.public_key_to_der()?)
        }
        KeyAlgorithm::Ec => {
            let point = session
                .get_attributes(handle, &[AttributeType::EcPoint])
                .map_err(map_error)?
                .into_iter()
                .find_map(|attr| match attr {
                    Attribute::EcPoint(point) => Some(point),
                    _ => None,
                })
                .ok_or_else(|| SignerError::Other("EC public key without point".to_string()))?;

            // CKA_EC_POINT is the DER encoded octet string
            let (_, point) = OctetString::from_der(&point).map_err(CryptoError::decode)?;
            let point = point.into_cow();

            let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
            let mut ctx = BigNumContext::new()?;
            let point = EcPoint::from_bytes(&group, &point, &mut ctx)?;
            let key = EcKey::from_public_key(&group, &point)?;
            Ok(PKey::from_ec_key(key)?.public_key_to_der()?)
        }
    }
}

/// The DER encoded OID of the P-256 curve, used as CKA_EC_PARAMS.
fn p256_params() -> Result<Vec<u8>, SignerError> {
    Ok(oid!(1.2.840.10045.3.1.7).to_der_vec().map_err(CryptoError::from)?)
}

fn pss_params(digest: DigestAlgorithm) -> PkcsPssParams {
    let (hash_alg, mgf) = match digest {
        DigestAlgorithm::Sha1 => (MechanismType::SHA1, PkcsMgfType::MGF1_SHA1),
        DigestAlgorithm::Sha256 => (MechanismType::SHA256, PkcsMgfType::MGF1_SHA256),
        DigestAlgorithm::Sha384 => (MechanismType::SHA384, PkcsMgfType::MGF1_SHA384),
        DigestAlgorithm::Sha512 => (MechanismType::SHA512, PkcsMgfType::MGF1_SHA512),
    };
    PkcsPssParams {
        hash_alg,
        mgf,
        s_len: c_ulong::from(digest.len() as u32).into(),
    }
}

/// Tokens return ECDSA signatures as r || s, callers expect DER.
fn ecdsa_to_der(raw: &[u8]) -> Result<Vec<u8>, SignerError> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(SignerError::Other(format!("Invalid ECDSA signature length {}", raw.len())));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    let sig = EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;
    Ok(sig.to_der()?)
}

fn map_error(e: Pkcs11Error) -> SignerError {
    match e {
        Pkcs11Error::Pkcs11(RvError::PinIncorrect, ..) => SignerError::PinIncorrect,
        Pkcs11Error::Pkcs11(RvError::PinLocked, ..) => SignerError::LoginFailed("PIN locked".to_string()),
        Pkcs11Error::Pkcs11(RvError::PinExpired, ..) => SignerError::LoginFailed("PIN expired".to_string()),
        Pkcs11Error::Pkcs11(RvError::UserNotLoggedIn, ..) => SignerError::NotLoggedIn,
        Pkcs11Error::Pkcs11(RvError::TokenNotRecognized, ..) => SignerError::NotInitialized,
        Pkcs11Error::Pkcs11(RvError::TokenNotPresent | RvError::DeviceRemoved, ..) => SignerError::Unavailable,
        e => SignerError::Pkcs11Error(e),
    }
}

//------------ Tests ---------------------------------------------------------
