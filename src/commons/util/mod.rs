//! General utility modules for use all over the code base
pub mod ext_serde;
pub mod file;

/// Returns a fresh random identifier of `len` bytes as upper case hex.
pub fn random_hex_id(len: usize) -> Result<String, openssl::error::ErrorStack> {
    let mut bytes = vec![0; len];
    openssl::rand::rand_bytes(&mut bytes)?;
    Ok(hex::encode_upper(bytes))
}

//------------ Tests ---------------------------------------------------------
