//! Certificates issued for our keys: import, activation, status tracking
//! and lookups.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::{debug, info};
use uuid::Uuid;

use crate::{
    commons::{
        api::{CertStatus, CertificateInfo, ClientId, KeyUsage, MemberSigningInfo},
        crypto::cert::{self, CertificateTemplate},
        error::Error,
        SignerEmptyResult, SignerResult,
    },
    daemon::signer::Signer,
};

/// Whether a request was made for the member a certificate is for.
/// Authentication requests and certificates have no member.
fn same_member(request: Option<&ClientId>, cert: Option<&ClientId>) -> bool {
    match (request, cert) {
        (Some(request), Some(cert)) => request.member_equals(cert),
        (None, None) => true,
        _ => false,
    }
}

impl Signer {
    /// Imports a DER or PEM certificate under the key with the same public
    /// key. Returns the id of that key.
    ///
    /// Pending requests of that key for the same member are done with once
    /// their certificate is in.
    pub fn import_cert(&self, cert_bytes: &[u8], initial_status: &str, client_id: Option<&ClientId>) -> SignerResult<String> {
        let status = CertStatus::from_str(initial_status).map_err(Error::InvalidRequest)?;
        let cert = cert::parse_certificate(cert_bytes).map_err(|e| Error::InvalidCert(e.to_string()))?;
        let der = cert.to_der()?;
        let hash = cert::cert_hash(&der);
        let public_key = cert::cert_public_key(&cert)?;

        let mut model = self.write_model();
        if let Ok((_, key, _)) = model.cert_for_hash(&hash) {
            return Err(Error::CertExists(key.id.clone()));
        }

        let key = model
            .key_for_public_key_mut(&public_key)
            .ok_or(Error::KeyNotFoundForCertificate)?;

        let usage = match (key.usage, client_id) {
            (Some(usage), _) => usage,
            (None, Some(_)) => KeyUsage::Signing,
            (None, None) => KeyUsage::Authentication,
        };
        if usage == KeyUsage::Signing && client_id.is_none() {
            return Err(Error::invalid_request("Signing certificates need a member id"));
        }

        key.usage = Some(usage);
        key.cert_requests
            .retain(|r| !same_member(r.member_id.as_ref(), client_id));
        key.certs.push(CertificateInfo {
            id: Uuid::new_v4().to_string(),
            member_id: client_id.cloned(),
            active: true,
            status,
            certificate: der,
            hash: hash.clone(),
        });

        let key_id = key.id.clone();
        info!("Imported certificate {} for key '{}'", hash, key_id);
        self.save(&model)?;

        Ok(key_id)
    }

    pub fn activate_cert(&self, cert_id: &str) -> SignerEmptyResult {
        self.update_cert(cert_id, |cert| cert.active = true)
    }

    pub fn deactivate_cert(&self, cert_id: &str) -> SignerEmptyResult {
        self.update_cert(cert_id, |cert| cert.active = false)
    }

    /// Overwrites the status of a certificate with any of the known status
    /// strings.
    pub fn set_cert_status(&self, cert_id: &str, status: &str) -> SignerEmptyResult {
        let status = CertStatus::from_str(status).map_err(Error::InvalidRequest)?;
        self.update_cert(cert_id, |cert| cert.status = status)
    }

    fn update_cert<F>(&self, cert_id: &str, op: F) -> SignerEmptyResult
    where
        F: FnOnce(&mut CertificateInfo),
    {
        let mut model = self.write_model();
        let cert = model.cert_mut(cert_id)?;
        op(cert);
        info!(
            "Certificate '{}' is now {} ({})",
            cert_id,
            cert.status,
            if cert.active { "active" } else { "inactive" }
        );
        self.save(&model)
    }

    pub fn delete_cert(&self, cert_id: &str) -> SignerEmptyResult {
        let mut model = self.write_model();
        let cert = model.remove_cert(cert_id)?;
        info!("Deleted certificate '{}' with hash {}", cert_id, cert.hash);
        self.save(&model)
    }

    pub fn get_cert_for_hash(&self, hash: &str) -> SignerResult<CertificateInfo> {
        debug!("Looking up certificate with hash {}", hash);
        let model = self.read_model();
        let (_, _, cert) = model.cert_for_hash(hash)?;
        Ok(cert.clone())
    }

    /// All certificates of the member, whichever subsystem they were
    /// imported for.
    pub fn get_member_certs(&self, client_id: &ClientId) -> SignerResult<Vec<CertificateInfo>> {
        Ok(self.read_model().member_certs(client_id))
    }

    /// Finds the key and certificate to sign with for a member: the first
    /// active and registered certificate on an active token.
    pub fn get_member_signing_info(&self, client_id: &ClientId) -> SignerResult<MemberSigningInfo> {
        let model = self.read_model();
        for token in model.tokens().iter().filter(|t| t.is_active()) {
            for key in &token.keys {
                let cert = key.certs.iter().find(|c| {
                    c.active
                        && c.status == CertStatus::Registered
                        && c.member_id.as_ref().is_some_and(|m| m.member_equals(client_id))
                });
                if let Some(cert) = cert {
                    return Ok(MemberSigningInfo {
                        key_id: key.id.clone(),
                        cert: cert.clone(),
                        sign_mechanism: key.sign_mechanism.clone(),
                    });
                }
            }
        }
        Err(Error::MemberCertNotFound(client_id.clone()))
    }

    /// Makes a self-signed certificate for a key. The certificate is only
    /// returned, importing it is up to the caller.
    pub fn generate_self_signed_cert(
        &self,
        key_id: &str,
        client_id: Option<&ClientId>,
        usage: KeyUsage,
        subject_dn: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> SignerResult<Vec<u8>> {
        if usage == KeyUsage::Signing && client_id.is_none() {
            return Err(Error::invalid_request("Signing certificates need a member id"));
        }
        if not_after <= not_before {
            return Err(Error::invalid_request("Certificate must not expire before it becomes valid"));
        }

        let (token_id, public_key) = {
            let model = self.read_model();
            let (token, key) = model.key(key_id)?;
            if !token.is_active() {
                return Err(Error::TokenNotActive(token.id.clone()));
            }
            (token.id.clone(), key.public_key.clone())
        };
        let algorithm = cert::request_algorithm(&public_key)?;

        let subject = cert::parse_name(subject_dn).map_err(Error::invalid_request)?;
        let template = CertificateTemplate {
            subject: &subject,
            issuer: None,
            public_key: &public_key,
            not_before,
            not_after,
            usage: Some(usage),
        };

        let der = self.with_active_device(&token_id, |device| {
            cert::build_certificate(&template, &public_key, algorithm, |digest| {
                device
                    .sign(key_id, algorithm, digest)
                    .map_err(|e| Error::signing(&token_id, key_id, e))
            })
        })?;
        info!("Generated self-signed certificate for key '{}'", key_id);
        Ok(der)
    }
}

//------------ Tests ---------------------------------------------------------
