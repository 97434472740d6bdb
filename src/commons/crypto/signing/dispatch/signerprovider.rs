use crate::commons::{
    api::TokenKind,
    crypto::{
        signing::signers::{error::SignerError, softsigner::SoftSigner, DeviceKey, KeySpec},
        SignAlgorithm,
    },
};

#[cfg(feature = "hsm")]
use crate::commons::crypto::signing::signers::pkcs11::Pkcs11Signer;

#[cfg(test)]
use crate::commons::crypto::signing::signers::mocksigner::MockSigner;

//------------ TokenProvider -------------------------------------------------

/// Dispatches token requests to the device that implements them.
///
/// Every configured token gets exactly one provider, chosen when the signer
/// is built.
#[derive(Debug)]
pub enum TokenProvider {
    Soft(SoftSigner),

    #[cfg(feature = "hsm")]
    Pkcs11(Pkcs11Signer),

    #[cfg(test)]
    Mock(MockSigner),
}

impl TokenProvider {
    pub fn token_id(&self) -> &str {
        match self {
            TokenProvider::Soft(signer) => signer.token_id(),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.token_id(),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.token_id(),
        }
    }

    pub fn kind(&self) -> TokenKind {
        match self {
            TokenProvider::Soft(_) => TokenKind::Software,
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(_) => TokenKind::Hardware,
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.kind(),
        }
    }

    pub fn info(&self) -> &str {
        match self {
            TokenProvider::Soft(signer) => signer.info(),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.info(),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.info(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            TokenProvider::Soft(_) => false,
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.is_read_only(),
            #[cfg(test)]
            TokenProvider::Mock(_) => false,
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            TokenProvider::Soft(_) => true,
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.is_available(),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.is_available(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        match self {
            TokenProvider::Soft(signer) => signer.is_initialized(),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.is_initialized(),
            #[cfg(test)]
            TokenProvider::Mock(_) => true,
        }
    }

    pub fn supports_batch_signing(&self) -> bool {
        match self {
            TokenProvider::Soft(signer) => signer.supports_batch_signing(),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.supports_batch_signing(),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.supports_batch_signing(),
        }
    }

    /// The mechanism RSA keys on this token sign with.
    pub fn rsa_sign_mechanism(&self) -> &'static str {
        match self {
            TokenProvider::Soft(signer) => signer.rsa_sign_mechanism(),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.rsa_sign_mechanism(),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.rsa_sign_mechanism(),
        }
    }

    /// Sets the first PIN. Only the software token can be initialized here,
    /// hardware tokens come initialized by their own tooling.
    pub fn init_pin(&mut self, pin: &str) -> Result<(), SignerError> {
        match self {
            TokenProvider::Soft(signer) => signer.init_pin(pin),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(_) => Err(SignerError::Unsupported("initializing PKCS#11 tokens".to_string())),
            #[cfg(test)]
            TokenProvider::Mock(_) => Err(SignerError::AlreadyInitialized),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        match self {
            TokenProvider::Soft(signer) => signer.is_logged_in(),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.is_logged_in(),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.is_logged_in(),
        }
    }

    pub fn login(&mut self, pin: &str) -> Result<(), SignerError> {
        match self {
            TokenProvider::Soft(signer) => signer.login(pin),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.login(pin),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.login(pin),
        }
    }

    pub fn logout(&mut self) {
        match self {
            TokenProvider::Soft(signer) => signer.logout(),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.logout(),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.logout(),
        }
    }

    pub fn change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<(), SignerError> {
        match self {
            TokenProvider::Soft(signer) => signer.change_pin(old_pin, new_pin),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.change_pin(old_pin, new_pin),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.change_pin(old_pin, new_pin),
        }
    }

    pub fn generate_key(&mut self, key_id: &str, label: &str, spec: KeySpec) -> Result<Vec<u8>, SignerError> {
        match self {
            TokenProvider::Soft(signer) => signer.generate_key(key_id, label, spec),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.generate_key(key_id, label, spec),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.generate_key(key_id, label, spec),
        }
    }

    pub fn list_keys(&self) -> Result<Vec<DeviceKey>, SignerError> {
        match self {
            TokenProvider::Soft(signer) => signer.list_keys(),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.list_keys(),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.list_keys(),
        }
    }

    pub fn destroy_key(&mut self, key_id: &str) -> Result<(), SignerError> {
        match self {
            TokenProvider::Soft(signer) => signer.destroy_key(key_id),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.destroy_key(key_id),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.destroy_key(key_id),
        }
    }

    /// Signs a digest, which is passed to the device as is.
    pub fn sign(&self, key_id: &str, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>, SignerError> {
        match self {
            TokenProvider::Soft(signer) => signer.sign(key_id, algorithm, digest),
            #[cfg(feature = "hsm")]
            TokenProvider::Pkcs11(signer) => signer.sign(key_id, algorithm, digest),
            #[cfg(test)]
            TokenProvider::Mock(signer) => signer.sign(key_id, algorithm, digest),
        }
    }
}
