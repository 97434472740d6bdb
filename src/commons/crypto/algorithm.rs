//! The signature algorithms callers can ask for by id.

use std::fmt;

use asn1_rs::{oid, Null, OctetString, Oid, Sequence, ToDer};
use openssl::{
    hash::{hash, MessageDigest},
    md::{Md, MdRef},
};

use crate::{
    commons::{
        api::KeyAlgorithm,
        crypto::CryptoResult,
    },
    constants::{CKM_ECDSA, CKM_RSA_PKCS, CKM_RSA_PKCS_PSS},
};

//------------ DigestAlgorithm -----------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn message_digest(self) -> MessageDigest {
        match self {
            DigestAlgorithm::Sha1 => MessageDigest::sha1(),
            DigestAlgorithm::Sha256 => MessageDigest::sha256(),
            DigestAlgorithm::Sha384 => MessageDigest::sha384(),
            DigestAlgorithm::Sha512 => MessageDigest::sha512(),
        }
    }

    pub fn md(self) -> &'static MdRef {
        match self {
            DigestAlgorithm::Sha1 => Md::sha1(),
            DigestAlgorithm::Sha256 => Md::sha256(),
            DigestAlgorithm::Sha384 => Md::sha384(),
            DigestAlgorithm::Sha512 => Md::sha512(),
        }
    }

    /// The length of a digest in octets.
    pub fn len(self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(hash(self.message_digest(), data)?.to_vec())
    }

    fn oid(self) -> Oid<'static> {
        match self {
            DigestAlgorithm::Sha1 => oid!(1.3.14.3.2.26),
            DigestAlgorithm::Sha256 => oid!(2.16.840.1.101.3.4.2.1),
            DigestAlgorithm::Sha384 => oid!(2.16.840.1.101.3.4.2.2),
            DigestAlgorithm::Sha512 => oid!(2.16.840.1.101.3.4.2.3),
        }
    }

    /// Wraps a digest into the DigestInfo structure that PKCS#1 v1.5
    /// signatures are made over.
    pub fn digest_info(self, digest: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut algorithm = Vec::new();
        self.oid().write_der(&mut algorithm)?;
        Null::new().write_der(&mut algorithm)?;

        let mut info = Vec::new();
        Sequence::new(algorithm.into()).write_der(&mut info)?;
        OctetString::new(digest).write_der(&mut info)?;
        Ok(Sequence::new(info.into()).to_der_vec()?)
    }
}

//------------ SignScheme ----------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignScheme {
    /// RSASSA-PKCS1-v1_5
    RsaPkcs1,

    /// RSASSA-PSS with MGF1 over the same digest, salt as long as the digest.
    RsaPss,

    Ecdsa,
}

impl SignScheme {
    pub fn key_algorithm(self) -> KeyAlgorithm {
        match self {
            SignScheme::RsaPkcs1 | SignScheme::RsaPss => KeyAlgorithm::Rsa,
            SignScheme::Ecdsa => KeyAlgorithm::Ec,
        }
    }

    /// The PKCS#11 mechanism name for this scheme.
    pub fn mechanism(self) -> &'static str {
        match self {
            SignScheme::RsaPkcs1 => CKM_RSA_PKCS,
            SignScheme::RsaPss => CKM_RSA_PKCS_PSS,
            SignScheme::Ecdsa => CKM_ECDSA,
        }
    }
}

//------------ SignAlgorithm -------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SignAlgorithm {
    id: &'static str,
    digest: DigestAlgorithm,
    scheme: SignScheme,
}

const fn alg(id: &'static str, digest: DigestAlgorithm, scheme: SignScheme) -> SignAlgorithm {
    SignAlgorithm { id, digest, scheme }
}

static ALGORITHMS: [SignAlgorithm; 10] = [
    alg("SHA1withRSA", DigestAlgorithm::Sha1, SignScheme::RsaPkcs1),
    alg("SHA256withRSA", DigestAlgorithm::Sha256, SignScheme::RsaPkcs1),
    alg("SHA384withRSA", DigestAlgorithm::Sha384, SignScheme::RsaPkcs1),
    alg("SHA512withRSA", DigestAlgorithm::Sha512, SignScheme::RsaPkcs1),
    alg("SHA256withRSAandMGF1", DigestAlgorithm::Sha256, SignScheme::RsaPss),
    alg("SHA384withRSAandMGF1", DigestAlgorithm::Sha384, SignScheme::RsaPss),
    alg("SHA512withRSAandMGF1", DigestAlgorithm::Sha512, SignScheme::RsaPss),
    alg("SHA256withECDSA", DigestAlgorithm::Sha256, SignScheme::Ecdsa),
    alg("SHA384withECDSA", DigestAlgorithm::Sha384, SignScheme::Ecdsa),
    alg("SHA512withECDSA", DigestAlgorithm::Sha512, SignScheme::Ecdsa),
];

impl SignAlgorithm {
    /// Looks up an algorithm by its id, e.g. `SHA256withRSA`.
    pub fn from_id(id: &str) -> Option<SignAlgorithm> {
        ALGORITHMS.iter().find(|a| a.id == id).copied()
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    pub fn scheme(&self) -> SignScheme {
        self.scheme
    }

    pub fn key_algorithm(&self) -> KeyAlgorithm {
        self.scheme.key_algorithm()
    }

    pub fn mechanism(&self) -> &'static str {
        self.scheme.mechanism()
    }
}

impl fmt::Display for SignAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.id)
    }
}

//------------ Tests ---------------------------------------------------------
