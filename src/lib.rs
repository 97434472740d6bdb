//! The _Keysigner_ library crate.
//!
//! Keysigner owns the private keys of a data exchange node. It keeps them on
//! software or PKCS#11 tokens, issues certificate requests for them, tracks
//! the certificates that come back and performs every signature on behalf of
//! its callers.

pub mod cli;
pub mod commons;
pub mod constants;
pub mod daemon;
