//! Certificate requests for our keys.

use log::info;
use rcgen::DistinguishedName;
use uuid::Uuid;

use crate::{
    commons::{
        api::{CertRequestFormat, CertRequestInfo, ClientId, GeneratedCertRequestInfo, KeyUsage},
        crypto::cert,
        error::Error,
        SignerEmptyResult, SignerResult,
    },
    daemon::signer::Signer,
};

impl Signer {
    /// Creates a certificate request for a key on an active token.
    ///
    /// The first request decides the usage of a key, later requests must
    /// ask for the same usage. Signing requests are always made for a
    /// member.
    pub fn generate_cert_request(
        &self,
        key_id: &str,
        client_id: Option<&ClientId>,
        usage: KeyUsage,
        subject_dn: &str,
        format: CertRequestFormat,
    ) -> SignerResult<GeneratedCertRequestInfo> {
        let (token_id, public_key) = {
            let model = self.read_model();
            let (token, key) = model.key(key_id)?;
            if !token.is_active() {
                return Err(Error::TokenNotActive(token.id.clone()));
            }
            if let Some(current) = key.usage {
                if current != usage {
                    return Err(Error::WrongKeyUsage(key_id.to_string(), current, usage));
                }
            }
            (token.id.clone(), key.public_key.clone())
        };

        if usage == KeyUsage::Signing && client_id.is_none() {
            return Err(Error::invalid_request("Signing certificate requests need a member id"));
        }
        let subject = cert::parse_name(subject_dn).map_err(Error::invalid_request)?;

        let der = self.sign_cert_request(&token_id, key_id, &subject, &public_key)?;

        let csr = CertRequestInfo {
            id: Uuid::new_v4().to_string(),
            member_id: client_id.cloned(),
            subject_name: subject_dn.to_string(),
            key_usage: usage,
        };

        let mut model = self.write_model();
        let key = model.key_mut(key_id)?;
        key.usage = Some(usage);
        key.cert_requests.push(csr.clone());
        info!("Generated certificate request '{}' for key '{}'", csr.id, key_id);
        self.save(&model)?;

        Self::generated(csr, der, format)
    }

    /// Signs a stored request again, for when the first one got lost. The
    /// request keeps its id.
    pub fn regenerate_cert_request(
        &self,
        csr_id: &str,
        format: CertRequestFormat,
    ) -> SignerResult<GeneratedCertRequestInfo> {
        let (token_id, key_id, public_key, csr) = {
            let model = self.read_model();
            let (token, key, csr) = model.cert_request(csr_id)?;
            if !token.is_active() {
                return Err(Error::TokenNotActive(token.id.clone()));
            }
            (
                token.id.clone(),
                key.id.clone(),
                key.public_key.clone(),
                csr.clone(),
            )
        };

        let subject = cert::parse_name(&csr.subject_name).map_err(Error::invalid_request)?;
        let der = self.sign_cert_request(&token_id, &key_id, &subject, &public_key)?;
        info!("Regenerated certificate request '{}' for key '{}'", csr_id, key_id);

        Self::generated(csr, der, format)
    }

    pub fn delete_cert_request(&self, csr_id: &str) -> SignerEmptyResult {
        let mut model = self.write_model();
        model.remove_cert_request(csr_id)?;
        info!("Deleted certificate request '{}'", csr_id);
        self.save(&model)
    }

    fn sign_cert_request(
        &self,
        token_id: &str,
        key_id: &str,
        subject: &DistinguishedName,
        public_key: &[u8],
    ) -> SignerResult<Vec<u8>> {
        let algorithm = cert::request_algorithm(public_key)?;
        self.with_active_device(token_id, |device| {
            cert::build_cert_request(subject, public_key, algorithm, |digest| {
                device
                    .sign(key_id, algorithm, digest)
                    .map_err(|e| Error::signing(token_id, key_id, e))
            })
        })
    }

    fn generated(
        csr: CertRequestInfo,
        der: Vec<u8>,
        format: CertRequestFormat,
    ) -> SignerResult<GeneratedCertRequestInfo> {
        let cert_request = match format {
            CertRequestFormat::Der => der,
            CertRequestFormat::Pem => cert::cert_request_to_pem(&der)?,
        };

        Ok(GeneratedCertRequestInfo {
            cert_req_id: csr.id,
            cert_request,
            format,
            member_id: csr.member_id,
            key_usage: csr.key_usage,
        })
    }
}

//------------ Tests ---------------------------------------------------------
