//! Data structures for the signer API, shared between the daemon and its
//! callers.

mod certs;
mod member;
mod tokens;

pub use self::certs::*;
pub use self::member::*;
pub use self::tokens::*;
