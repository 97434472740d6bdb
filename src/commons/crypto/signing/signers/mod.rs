pub mod error;

#[cfg(test)]
pub mod mocksigner;

#[cfg(feature = "hsm")]
pub mod pkcs11;

pub mod softsigner;

use crate::commons::api::KeyAlgorithm;

//------------ DeviceKey -----------------------------------------------------

/// A key pair as reported by the device that holds it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceKey {
    pub id: String,
    pub label: String,
    pub algorithm: KeyAlgorithm,

    /// DER encoded SubjectPublicKeyInfo.
    pub public_key: Vec<u8>,
}

//------------ KeySpec -------------------------------------------------------

/// What kind of key pairs to generate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeySpec {
    pub algorithm: KeyAlgorithm,

    /// Modulus length for RSA keys, EC keys always use P-256.
    pub rsa_bits: u32,
}

impl Default for KeySpec {
    fn default() -> Self {
        KeySpec {
            algorithm: KeyAlgorithm::Rsa,
            rsa_bits: 2048,
        }
    }
}
