//! The signer daemon: its configuration and the signer itself.
pub mod config;
pub mod signer;
