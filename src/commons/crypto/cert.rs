//! Certificates and certificate requests.
//!
//! The private keys never leave their tokens. rcgen builds the structures
//! and hands us the bytes to be signed, which the token signs through a
//! [`TokenKey`].

use std::cell::RefCell;

use chrono::{DateTime, Utc};
use openssl::{
    bn::BigNumContext,
    ec::PointConversionForm,
    nid::Nid,
    pkey::{Id, PKey, Public},
    x509::{X509Req, X509},
};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyUsagePurpose,
    PublicKeyData, SerialNumber, SigningKey,
};
use time::OffsetDateTime;

use crate::commons::{
    api::KeyUsage,
    crypto::{CryptoError, CryptoResult, DigestAlgorithm, SignAlgorithm, SignScheme},
};

//------------ Parsing -------------------------------------------------------

/// Parses a certificate given as either DER or PEM.
pub fn parse_certificate(bytes: &[u8]) -> CryptoResult<X509> {
    let trimmed = bytes.trim_ascii_start();
    if trimmed.starts_with(b"-----BEGIN") {
        X509::from_pem(trimmed).map_err(CryptoError::decode)
    } else {
        X509::from_der(bytes).map_err(CryptoError::decode)
    }
}

/// Returns the lower case hex SHA-1 hash of DER encoded bytes.
pub fn cert_hash(der: &[u8]) -> String {
    hex::encode(openssl::sha::sha1(der))
}

/// Returns the DER encoded SubjectPublicKeyInfo of a certificate.
pub fn cert_public_key(cert: &X509) -> CryptoResult<Vec<u8>> {
    Ok(cert.public_key()?.public_key_to_der()?)
}

pub fn public_key_from_der(der: &[u8]) -> CryptoResult<PKey<Public>> {
    PKey::public_key_from_der(der).map_err(CryptoError::decode)
}

/// Parses a distinguished name such as `C=FI, O=Org, CN=Name`.
///
/// Attribute values may contain commas when escaped with a backslash.
pub fn parse_name(dn: &str) -> CryptoResult<DistinguishedName> {
    let mut name = DistinguishedName::new();
    let mut found = false;

    for rdn in split_unescaped(dn, ',') {
        let rdn = rdn.trim();
        if rdn.is_empty() {
            continue;
        }
        let (field, value) = rdn
            .split_once('=')
            .ok_or_else(|| CryptoError::invalid_name(format!("'{}' is not of the form attribute=value", rdn)))?;
        let field = field.trim();
        let dn_type = dn_type(field)?;
        if name.get(&dn_type).is_some() {
            return Err(CryptoError::invalid_name(format!("attribute '{}' appears more than once", field)));
        }

        name.push(dn_type, value.trim().replace("\\,", ","));
        found = true;
    }

    if !found {
        return Err(CryptoError::invalid_name(format!("'{}' is empty", dn)));
    }
    Ok(name)
}

fn dn_type(field: &str) -> CryptoResult<DnType> {
    match field {
        "C" => Ok(DnType::CountryName),
        "ST" => Ok(DnType::StateOrProvinceName),
        "L" => Ok(DnType::LocalityName),
        "O" => Ok(DnType::OrganizationName),
        "OU" => Ok(DnType::OrganizationalUnitName),
        "CN" => Ok(DnType::CommonName),
        "SERIALNUMBER" | "serialNumber" => Ok(DnType::CustomDnType(vec![2, 5, 4, 5])),
        other => Err(CryptoError::invalid_name(format!("unsupported attribute '{}'", other))),
    }
}

fn split_unescaped(s: &str, separator: char) -> Vec<String> {
    let mut parts = vec![];
    let mut current = String::new();
    let mut escaped = false;

    for c in s.chars() {
        if c == separator && !escaped {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        escaped = c == '\\' && !escaped;
    }
    parts.push(current);
    parts
}

//------------ PublicKeyBits -------------------------------------------------

/// A public key the way rcgen puts it into a SubjectPublicKeyInfo: the
/// subjectPublicKey bits and the algorithm they are used with.
struct PublicKeyBits {
    bits: Vec<u8>,
    algorithm: &'static rcgen::SignatureAlgorithm,
}

impl PublicKeyBits {
    /// The public key of a key that signs with `algorithm`.
    fn for_algorithm(public_key: &[u8], algorithm: SignAlgorithm) -> CryptoResult<Self> {
        let key = public_key_from_der(public_key)?;
        let unsupported = || CryptoError::unsupported(format!("Certificates cannot be signed with {}", algorithm));

        match (key.id(), algorithm.scheme()) {
            (Id::RSA, SignScheme::RsaPkcs1) => {
                let rcgen_algorithm = match algorithm.digest() {
                    DigestAlgorithm::Sha256 => &rcgen::PKCS_RSA_SHA256,
                    DigestAlgorithm::Sha384 => &rcgen::PKCS_RSA_SHA384,
                    DigestAlgorithm::Sha512 => &rcgen::PKCS_RSA_SHA512,
                    DigestAlgorithm::Sha1 => return Err(unsupported()),
                };
                Ok(PublicKeyBits {
                    bits: key.rsa()?.public_key_to_der_pkcs1()?,
                    algorithm: rcgen_algorithm,
                })
            }
            (Id::EC, SignScheme::Ecdsa) => {
                let ec = key.ec_key()?;
                let rcgen_algorithm = match (ec.group().curve_name(), algorithm.digest()) {
                    (Some(Nid::X9_62_PRIME256V1), DigestAlgorithm::Sha256) => &rcgen::PKCS_ECDSA_P256_SHA256,
                    (Some(Nid::SECP384R1), DigestAlgorithm::Sha384) => &rcgen::PKCS_ECDSA_P384_SHA384,
                    _ => return Err(unsupported()),
                };
                let mut ctx = BigNumContext::new()?;
                let bits = ec
                    .public_key()
                    .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)?;
                Ok(PublicKeyBits {
                    bits,
                    algorithm: rcgen_algorithm,
                })
            }
            _ => Err(unsupported()),
        }
    }

    /// The public key of a certificate subject.
    fn for_subject(public_key: &[u8]) -> CryptoResult<Self> {
        Self::for_algorithm(public_key, request_algorithm(public_key)?)
    }
}

impl PublicKeyData for PublicKeyBits {
    fn der_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.algorithm
    }
}

//------------ TokenKey ------------------------------------------------------

/// A key on a token, seen by rcgen.
///
/// rcgen hands over the whole to-be-signed structure, `sign` gets its
/// digest. A failure of `sign` is kept in `failure` so that the caller gets
/// it back instead of the opaque rcgen error.
struct TokenKey<'a, E, F> {
    public_key: PublicKeyBits,
    digest: DigestAlgorithm,
    sign: F,
    failure: &'a RefCell<Option<E>>,
}

impl<'a, E, F> TokenKey<'a, E, F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, E>,
{
    fn new(public_key: &[u8], algorithm: SignAlgorithm, sign: F, failure: &'a RefCell<Option<E>>) -> CryptoResult<Self> {
        Ok(TokenKey {
            public_key: PublicKeyBits::for_algorithm(public_key, algorithm)?,
            digest: algorithm.digest(),
            sign,
            failure,
        })
    }
}

impl<E, F> PublicKeyData for TokenKey<'_, E, F> {
    fn der_bytes(&self) -> &[u8] {
        self.public_key.der_bytes()
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.public_key.algorithm()
    }
}

impl<E, F> SigningKey for TokenKey<'_, E, F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, E>,
{
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        let digest = self.digest.digest(msg).map_err(|_| rcgen::Error::RemoteKeyError)?;
        (self.sign)(&digest).map_err(|e| {
            self.failure.replace(Some(e));
            rcgen::Error::RemoteKeyError
        })
    }
}

/// Prefers the failure of the token over the error rcgen made of it.
fn token_result<T, E>(result: Result<T, rcgen::Error>, failure: &RefCell<Option<E>>) -> Result<T, E>
where
    E: From<CryptoError>,
{
    result.map_err(|e| failure.take().unwrap_or_else(|| CryptoError::from(e).into()))
}

//------------ Building ------------------------------------------------------

/// The algorithm our certificate requests are signed with, picked to go
/// with the key: SHA-256 for RSA and P-256 keys, SHA-384 for P-384 keys.
pub fn request_algorithm(public_key: &[u8]) -> CryptoResult<SignAlgorithm> {
    let key = public_key_from_der(public_key)?;
    let id = match key.id() {
        Id::RSA => "SHA256withRSA",
        Id::EC if key.ec_key()?.group().curve_name() == Some(Nid::SECP384R1) => "SHA384withECDSA",
        Id::EC => "SHA256withECDSA",
        _ => return Err(CryptoError::unsupported("Only RSA and EC keys are supported")),
    };
    SignAlgorithm::from_id(id).ok_or_else(|| CryptoError::unsupported(id))
}

/// Fails if a key cannot sign certificates with `algorithm`.
pub fn check_certificate_algorithm(public_key: &[u8], algorithm: SignAlgorithm) -> CryptoResult<()> {
    PublicKeyBits::for_algorithm(public_key, algorithm).map(|_| ())
}

/// What goes into a certificate that we sign.
pub struct CertificateTemplate<'a> {
    pub subject: &'a DistinguishedName,

    /// The certificate of the signing key, DER or PEM, or `None` for a
    /// certificate issued in the name of its own subject.
    pub issuer: Option<&'a [u8]>,

    /// DER encoded SubjectPublicKeyInfo of the subject.
    pub public_key: &'a [u8],
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,

    /// Adds the extensions for this usage, none if unset.
    pub usage: Option<KeyUsage>,
}

impl CertificateTemplate<'_> {
    fn params(&self) -> CryptoResult<CertificateParams> {
        if self.not_after <= self.not_before {
            return Err(CryptoError::unsupported("Certificate must not expire before it becomes valid"));
        }

        let mut serial = [0u8; 16];
        openssl::rand::rand_bytes(&mut serial)?;
        serial[0] &= 0x7f;

        let mut params = CertificateParams::default();
        params.distinguished_name = self.subject.clone();
        params.serial_number = Some(SerialNumber::from(serial.to_vec()));
        params.not_before = offset_date_time(self.not_before)?;
        params.not_after = offset_date_time(self.not_after)?;
        params.is_ca = IsCa::ExplicitNoCa;

        match self.usage {
            Some(KeyUsage::Signing) => {
                params.key_usages = vec![KeyUsagePurpose::ContentCommitment];
            }
            Some(KeyUsage::Authentication) => {
                params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
                params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth, ExtendedKeyUsagePurpose::ServerAuth];
            }
            None => {}
        }
        Ok(params)
    }
}

fn offset_date_time(time: DateTime<Utc>) -> CryptoResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(time.timestamp()).map_err(CryptoError::unsupported)
}

/// Builds a DER encoded PKCS#10 certificate request for the key with
/// `public_key`, which `sign` signs with `algorithm`.
pub fn build_cert_request<E, F>(
    subject: &DistinguishedName,
    public_key: &[u8],
    algorithm: SignAlgorithm,
    sign: F,
) -> Result<Vec<u8>, E>
where
    E: From<CryptoError>,
    F: Fn(&[u8]) -> Result<Vec<u8>, E>,
{
    let failure = RefCell::new(None);
    let key = TokenKey::new(public_key, algorithm, sign, &failure)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = subject.clone();

    let csr = token_result(params.serialize_request(&key), &failure)?;
    Ok(csr.der().to_vec())
}

/// Builds a DER encoded X.509 v3 certificate, signed by `sign` with the key
/// that has `signing_key` for its public key.
pub fn build_certificate<E, F>(
    template: &CertificateTemplate,
    signing_key: &[u8],
    algorithm: SignAlgorithm,
    sign: F,
) -> Result<Vec<u8>, E>
where
    E: From<CryptoError>,
    F: Fn(&[u8]) -> Result<Vec<u8>, E>,
{
    let params = template.params()?;
    let subject_key = PublicKeyBits::for_subject(template.public_key)?;

    let failure = RefCell::new(None);
    let key = TokenKey::new(signing_key, algorithm, sign, &failure)?;

    let issuer = match template.issuer {
        Some(der) => Issuer::from_ca_cert_pem(&issuer_pem(der)?, key).map_err(CryptoError::from)?,
        None => Issuer::new(params.clone(), key),
    };

    let cert = token_result(params.signed_by(&subject_key, &issuer), &failure)?;
    Ok(cert.der().to_vec())
}

fn issuer_pem(der: &[u8]) -> CryptoResult<String> {
    String::from_utf8(parse_certificate(der)?.to_pem()?).map_err(CryptoError::decode)
}

/// Re-encodes a DER certificate request as PEM.
pub fn cert_request_to_pem(der: &[u8]) -> CryptoResult<Vec<u8>> {
    Ok(X509Req::from_der(der)?.to_pem()?)
}

//------------ Tests ---------------------------------------------------------
