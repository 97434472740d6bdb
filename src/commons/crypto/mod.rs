//! Key, certificate and signature plumbing on top of openssl and rcgen.
use std::sync::Once;

mod error;
pub use self::error::*;

pub mod algorithm;
pub use self::algorithm::{DigestAlgorithm, SignAlgorithm, SignScheme};

pub mod cert;

pub mod signing;

pub type CryptoResult<T> = std::result::Result<T, self::error::CryptoError>;

static INIT: Once = Once::new();

/// Initializes the crypto library for this process.
///
/// Safe to call any number of times, only the first call does anything.
/// Nothing is ever torn down.
pub fn init() {
    INIT.call_once(|| {
        openssl::init();
        log::debug!("Initialized {}", openssl::version::version());
    });
}
