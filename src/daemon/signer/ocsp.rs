//! The latest OCSP responses for our certificates, by certificate hash.

use std::{collections::HashMap, sync::RwLock};

use log::debug;

use crate::{
    commons::{error::Error, SignerEmptyResult, SignerResult},
    daemon::signer::Signer,
};

//------------ OcspCache -----------------------------------------------------

/// Responses are kept in memory only and replaced by whatever comes in
/// last. Hashes are matched in either case.
#[derive(Debug, Default)]
pub struct OcspCache {
    responses: RwLock<HashMap<String, Vec<u8>>>,
}

impl OcspCache {
    pub fn set(&self, hashes: &[String], responses: &[Vec<u8>]) -> SignerEmptyResult {
        if hashes.len() != responses.len() {
            return Err(Error::invalid_request(format!(
                "Got {} certificate hashes but {} OCSP responses",
                hashes.len(),
                responses.len()
            )));
        }

        let mut cache = self.responses.write().unwrap();
        for (hash, response) in hashes.iter().zip(responses) {
            cache.insert(hash.to_ascii_lowercase(), response.clone());
        }
        Ok(())
    }

    pub fn get(&self, hashes: &[String]) -> Vec<Option<Vec<u8>>> {
        let cache = self.responses.read().unwrap();
        hashes
            .iter()
            .map(|hash| cache.get(&hash.to_ascii_lowercase()).cloned())
            .collect()
    }
}

impl Signer {
    pub fn set_ocsp_responses(&self, hashes: &[String], responses: &[Vec<u8>]) -> SignerEmptyResult {
        debug!("Caching {} OCSP response(s)", responses.len());
        self.ocsp.set(hashes, responses)
    }

    /// Returns one entry per hash, in the same order, `None` where nothing
    /// is known.
    pub fn get_ocsp_responses(&self, hashes: &[String]) -> SignerResult<Vec<Option<Vec<u8>>>> {
        Ok(self.ocsp.get(hashes))
    }
}

//------------ Tests ---------------------------------------------------------
