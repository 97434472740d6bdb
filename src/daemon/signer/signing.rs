//! Signing digests and certificates with the keys on our tokens.

use chrono::{TimeDelta, Utc};
use log::debug;

use crate::{
    commons::{
        api::TokenKind,
        crypto::{
            cert::{self, CertificateTemplate},
            SignAlgorithm,
        },
        error::{CannotSign, Error},
        SignerResult,
    },
    daemon::signer::Signer,
};

/// What was resolved for a signing request before the device is involved.
struct SignRequest {
    token_id: String,
    algorithm: SignAlgorithm,
    batch_signing: bool,
}

impl Signer {
    /// Resolves the key, then the algorithm, and checks that they go
    /// together and that the token is active.
    fn resolve_sign_request(&self, key_id: &str, algorithm_id: &str) -> SignerResult<SignRequest> {
        let model = self.read_model();
        let (token, key) = model.key(key_id)?;

        let algorithm = SignAlgorithm::from_id(algorithm_id).ok_or_else(|| Error::unknown_sign_algorithm(algorithm_id))?;

        // Software keys can use any scheme of their algorithm, keys on
        // hardware only the mechanism their token was configured with.
        let supported = algorithm.key_algorithm() == key.algorithm
            && (token.kind == TokenKind::Software || algorithm.mechanism() == key.sign_mechanism);
        if !supported {
            return Err(Error::unsupported_algorithm(algorithm_id, key_id));
        }

        if !token.is_active() {
            return Err(Error::TokenNotActive(token.id.clone()));
        }

        Ok(SignRequest {
            token_id: token.id.clone(),
            algorithm,
            batch_signing: token.batch_signing_enabled,
        })
    }

    /// Signs a digest that the caller computed with the digest algorithm of
    /// `algorithm_id`.
    pub fn sign(&self, key_id: &str, algorithm_id: &str, digest: &[u8]) -> SignerResult<Vec<u8>> {
        let req = self.resolve_sign_request(key_id, algorithm_id)?;
        debug!("Signing with key '{}' using {}", key_id, algorithm_id);

        self.with_active_device(&req.token_id, |device| {
            device
                .sign(key_id, req.algorithm, digest)
                .map_err(|e| Error::signing(&req.token_id, key_id, e))
        })
    }

    /// Signs many digests while holding on to the device.
    pub fn sign_batch(&self, key_id: &str, algorithm_id: &str, digests: &[Vec<u8>]) -> SignerResult<Vec<Vec<u8>>> {
        let req = self.resolve_sign_request(key_id, algorithm_id)?;
        if !req.batch_signing {
            return Err(Error::CannotSign(CannotSign::InternalError(format!(
                "Batch signing not supported by token '{}'",
                req.token_id
            ))));
        }
        debug!(
            "Signing {} digests with key '{}' using {}",
            digests.len(),
            key_id,
            algorithm_id
        );

        self.with_active_device(&req.token_id, |device| {
            digests
                .iter()
                .map(|digest| {
                    device
                        .sign(key_id, req.algorithm, digest)
                        .map_err(|e| Error::signing(&req.token_id, key_id, e))
                })
                .collect()
        })
    }

    /// Issues a certificate for `public_key` signed with the key.
    ///
    /// The issuer is the subject of the first certificate of the key, or the
    /// new subject itself if the key has none yet.
    pub fn sign_certificate(
        &self,
        key_id: &str,
        algorithm_id: &str,
        subject_dn: &str,
        public_key: &[u8],
    ) -> SignerResult<Vec<u8>> {
        let req = self.resolve_sign_request(key_id, algorithm_id)?;

        let subject = cert::parse_name(subject_dn).map_err(Error::invalid_request)?;
        cert::public_key_from_der(public_key).map_err(Error::invalid_request)?;

        let (signing_key, issuer_cert) = {
            let model = self.read_model();
            let (_, key) = model.key(key_id)?;
            (key.public_key.clone(), key.certs.first().map(|c| c.certificate.clone()))
        };
        if cert::check_certificate_algorithm(&signing_key, req.algorithm).is_err() {
            return Err(Error::unsupported_algorithm(algorithm_id, key_id));
        }

        let now = Utc::now();
        let not_after = TimeDelta::try_days(self.cert_validity_days)
            .and_then(|validity| now.checked_add_signed(validity))
            .ok_or_else(|| {
                Error::Internal(format!(
                    "Certificate validity of {} days is out of range",
                    self.cert_validity_days
                ))
            })?;

        let template = CertificateTemplate {
            subject: &subject,
            issuer: issuer_cert.as_deref(),
            public_key,
            not_before: now,
            not_after,
            usage: None,
        };
        debug!("Signing certificate for '{}' with key '{}'", subject_dn, key_id);

        self.with_active_device(&req.token_id, |device| {
            cert::build_certificate(&template, &signing_key, req.algorithm, |digest| {
                device
                    .sign(key_id, req.algorithm, digest)
                    .map_err(|e| Error::signing(&req.token_id, key_id, e))
            })
        })
    }

    pub fn is_token_batch_signing_enabled(&self, key_id: &str) -> SignerResult<bool> {
        let model = self.read_model();
        let (token, _) = model.key(key_id)?;
        Ok(token.batch_signing_enabled)
    }

    pub fn get_sign_mechanism(&self, key_id: &str) -> SignerResult<String> {
        let model = self.read_model();
        let (_, key) = model.key(key_id)?;
        Ok(key.sign_mechanism.clone())
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use openssl::{
        ecdsa::EcdsaSig,
        nid::Nid,
        pkey::{PKey, Public},
        sha::sha256,
        x509::X509,
    };

    use crate::{
        commons::{
            api::{KeyInfo, KeyUsage},
            crypto::signing::{signers::mocksigner::MockSignerCallCounts, SignerError},
            test,
        },
        constants::{CKM_ECDSA, SOFT_TOKEN_ID},
        daemon::signer::{
            tests::{config, mock, mock_signer, soft_signer, MOCK_TOKEN, PIN},
            Signer,
        },
    };

    fn active_key(signer: &Signer, token_id: &str) -> KeyInfo {
        signer.activate_token(token_id, PIN).unwrap();
        signer.generate_key(token_id, "k1").unwrap()
    }

    fn verifies(key: &KeyInfo, digest: &[u8], signature: &[u8]) -> bool {
        let public_key: PKey<Public> = PKey::public_key_from_der(&key.public_key).unwrap();
        let sig = EcdsaSig::from_der(signature).unwrap();
        sig.verify(digest, &public_key.ec_key().unwrap()).unwrap()
    }

    #[test]
    fn sign_digest() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let key = active_key(&signer, SOFT_TOKEN_ID);

            let digest = sha256(b"some data");
            let signature = signer.sign(&key.id, "SHA256withECDSA", &digest).unwrap();
            assert!(verifies(&key, &digest, &signature));
        })
    }

    #[test]
    fn unknown_algorithm_is_internal_error() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let key = active_key(&signer, SOFT_TOKEN_ID);

            let err = signer.sign(&key.id, "NOT-ALGORITHM-ID", &[0; 32]).unwrap_err();
            let fault = err.to_fault();
            assert_eq!(fault.code, "Signer.CannotSign.InternalError");
            assert_eq!(fault.translation, "");
            assert_eq!(fault.message, "Unknown sign algorithm id: NOT-ALGORITHM-ID");
        })
    }

    #[test]
    fn key_is_resolved_before_algorithm() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let err = signer.sign("nope", "NOT-ALGORITHM-ID", &[0; 32]).unwrap_err();
            assert_eq!(err.code(), "Signer.KeyNotFound");
        })
    }

    #[test]
    fn incompatible_algorithm() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let key = active_key(&signer, SOFT_TOKEN_ID);

            let err = signer.sign(&key.id, "SHA256withRSA", &[0; 32]).unwrap_err();
            assert_eq!(err.code(), "Signer.CannotSign.UnsupportedAlgorithm");
            assert_eq!(err.translation(), "unsupported_sign_algorithm");
        })
    }

    #[test]
    fn inactive_token_cannot_sign() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let key = active_key(&signer, SOFT_TOKEN_ID);
            signer.deactivate_token(SOFT_TOKEN_ID).unwrap();

            let err = signer.sign(&key.id, "SHA256withECDSA", &[0; 32]).unwrap_err();
            assert_eq!(err.code(), "Signer.TokenNotActive");
        })
    }

    #[test]
    fn device_failure_is_cannot_sign() {
        test::test_under_tmp(|dir| {
            let mut device = mock();
            device.set_sign_error_cb(|_: &MockSignerCallCounts| Err(SignerError::Other("broken".to_string())));
            let signer = mock_signer(&dir, device);
            let key = active_key(&signer, MOCK_TOKEN);
            assert_eq!(key.sign_mechanism, CKM_ECDSA);

            let err = signer.sign(&key.id, "SHA256withECDSA", &[0; 32]).unwrap_err();
            assert_eq!(err.code(), "Signer.CannotSign.DeviceError");
            assert_eq!(err.translation(), "cannot_sign");
        })
    }

    #[test]
    fn batch_signing() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let key = active_key(&signer, SOFT_TOKEN_ID);
            assert!(signer.is_token_batch_signing_enabled(&key.id).unwrap());

            let digests = vec![sha256(b"one").to_vec(), sha256(b"two").to_vec()];
            let signatures = signer.sign_batch(&key.id, "SHA256withECDSA", &digests).unwrap();
            assert_eq!(signatures.len(), 2);
            assert!(verifies(&key, &digests[1], &signatures[1]));
        })
    }

    #[test]
    fn batch_signing_unsupported() {
        test::test_under_tmp(|dir| {
            let signer = mock_signer(&dir, mock());
            let key = active_key(&signer, MOCK_TOKEN);
            assert!(!signer.is_token_batch_signing_enabled(&key.id).unwrap());

            let err = signer
                .sign_batch(&key.id, "SHA256withECDSA", &[vec![0; 32]])
                .unwrap_err();
            assert_eq!(err.code(), "Signer.CannotSign.InternalError");
            assert_eq!(err.to_string(), "Batch signing not supported by token 'mock-0'");
        })
    }

    #[test]
    fn sign_mechanism_is_never_blank() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let key = active_key(&signer, SOFT_TOKEN_ID);
            signer.deactivate_token(SOFT_TOKEN_ID).unwrap();

            assert_eq!(signer.get_sign_mechanism(&key.id).unwrap(), CKM_ECDSA);
            assert_eq!(signer.get_sign_mechanism("nope").unwrap_err().code(), "Signer.KeyNotFound");
        })
    }

    #[test]
    fn sign_certificate_for_other_key() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let key = active_key(&signer, SOFT_TOKEN_ID);
            let subject_key = test::rsa_key();

            let der = signer
                .sign_certificate(
                    &key.id,
                    "SHA256withECDSA",
                    "C=FI, O=Test, CN=subject",
                    &test::public_key_der(&subject_key),
                )
                .unwrap();

            let cert = X509::from_der(&der).unwrap();
            let issuer_key = PKey::public_key_from_der(&key.public_key).unwrap();
            assert!(cert.verify(&issuer_key).unwrap());
            assert_eq!(
                cert.public_key().unwrap().public_key_to_der().unwrap(),
                test::public_key_der(&subject_key)
            );

            let err = signer
                .sign_certificate(&key.id, "SHA256withECDSA", "not a name", &test::public_key_der(&subject_key))
                .unwrap_err();
            assert_eq!(err.code(), "Signer.InvalidRequest");

            let err = signer
                .sign_certificate(&key.id, "SHA256withECDSA", "CN=subject", b"garbage")
                .unwrap_err();
            assert_eq!(err.code(), "Signer.InvalidRequest");
        })
    }

    #[test]
    fn sign_certificate_in_name_of_key_certificate() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let key = active_key(&signer, SOFT_TOKEN_ID);

            let now = Utc::now();
            let issuer = signer
                .generate_self_signed_cert(
                    &key.id,
                    None,
                    KeyUsage::Authentication,
                    "O=Test, CN=issuer",
                    now - Duration::days(1),
                    now + Duration::days(1),
                )
                .unwrap();
            signer.import_cert(&issuer, "registered", None).unwrap();

            let der = signer
                .sign_certificate(
                    &key.id,
                    "SHA256withECDSA",
                    "CN=subject",
                    &test::public_key_der(&test::ec_key()),
                )
                .unwrap();

            let cert = X509::from_der(&der).unwrap();
            let issuer_cn = cert.issuer_name().entries_by_nid(Nid::COMMONNAME).next().unwrap();
            assert_eq!(issuer_cn.data().as_slice(), b"issuer");
            let issuer_key = PKey::public_key_from_der(&key.public_key).unwrap();
            assert!(cert.verify(&issuer_key).unwrap());
        })
    }

    #[test]
    fn sign_certificate_needs_certificate_algorithm() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let key = active_key(&signer, SOFT_TOKEN_ID);

            // a P-256 key signs certificates with SHA-256 only
            let err = signer
                .sign_certificate(
                    &key.id,
                    "SHA384withECDSA",
                    "CN=subject",
                    &test::public_key_der(&test::ec_key()),
                )
                .unwrap_err();
            assert_eq!(err.code(), "Signer.CannotSign.UnsupportedAlgorithm");
        })
    }

    #[test]
    fn validity_out_of_range_is_an_error() {
        test::test_under_tmp(|dir| {
            let mut config = config(&dir);
            config.cert_validity_days = i64::MAX;
            let signer = Signer::build(&config).unwrap();
            signer.init_software_token(PIN).unwrap();
            let key = active_key(&signer, SOFT_TOKEN_ID);

            let err = signer
                .sign_certificate(
                    &key.id,
                    "SHA256withECDSA",
                    "CN=subject",
                    &test::public_key_der(&test::ec_key()),
                )
                .unwrap_err();
            assert_eq!(err.code(), "Signer.InternalError");
            assert_eq!(
                err.to_string(),
                format!("Certificate validity of {} days is out of range", i64::MAX)
            );
        })
    }
}
