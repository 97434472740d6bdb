//! Common types used by the various Keysigner components.
pub mod api;
pub mod crypto;
pub mod error;
pub mod util;


//------------ Response Aliases ----------------------------------------------

pub type SignerEmptyResult = std::result::Result<(), self::error::Error>;
pub type SignerResult<T> = std::result::Result<T, self::error::Error>;
