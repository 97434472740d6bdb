//! Token devices, and the dispatch to them.
pub mod dispatch;

pub mod signers;

pub use dispatch::signerprovider::TokenProvider;
pub use signers::error::SignerError;
pub use signers::softsigner::SoftSigner;
pub use signers::{DeviceKey, KeySpec};

#[cfg(feature = "hsm")]
pub use signers::pkcs11::Pkcs11Signer;
