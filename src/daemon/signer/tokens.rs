//! Token management: activation, PINs and names.

use log::{info, warn};

use crate::{
    commons::{
        api::{TokenInfo, TokenKind, TokenStatus},
        crypto::signing::SignerError,
        error::Error,
        SignerEmptyResult, SignerResult,
    },
    constants::SOFT_TOKEN_ID,
    daemon::signer::{registry::Registry, Signer},
};

impl Signer {
    pub fn list_tokens(&self) -> SignerResult<Vec<TokenInfo>> {
        Ok(self.read_model().tokens().to_vec())
    }

    pub fn get_token(&self, token_id: &str) -> SignerResult<TokenInfo> {
        self.read_model().token(token_id).cloned()
    }

    /// Logs in to the token with the given PIN.
    ///
    /// On success any keys that were put on the device behind our back are
    /// picked up.
    pub fn activate_token(&self, token_id: &str, pin: &str) -> SignerEmptyResult {
        self.read_model().token(token_id)?;

        let mut device = self.device(token_id)?.lock().unwrap();
        let res = device.login(pin);

        let mut model = self.write_model();
        match res {
            Ok(()) => {
                let token = model.token_mut(token_id)?;
                token.status = TokenStatus::Active;
                token.available = true;
                info!("Activated token '{}'", token_id);

                if model.merge_device_keys(&device) {
                    self.save(&model)?;
                }
                Ok(())
            }
            Err(e) => {
                warn!("Could not activate token '{}': {}", token_id, e);
                let token = model.token_mut(token_id)?;
                match e {
                    SignerError::PinIncorrect | SignerError::LoginFailed(_) => {
                        token.status = TokenStatus::LoginFailed
                    }
                    SignerError::NotInitialized => token.status = TokenStatus::NotInitialized,
                    SignerError::Unavailable => token.available = false,
                    _ => {}
                }
                Err(Error::device(token_id, e))
            }
        }
    }

    /// Logs out of the token. Deactivating an inactive token is fine.
    pub fn deactivate_token(&self, token_id: &str) -> SignerEmptyResult {
        self.read_model().token(token_id)?;

        let device = self.devices.get(token_id).map(|d| d.lock().unwrap());
        if let Some(mut device) = device {
            device.logout();
        }

        let mut model = self.write_model();
        let token = model.token_mut(token_id)?;
        if token.status != TokenStatus::NotInitialized {
            token.status = TokenStatus::Inactive;
        }
        info!("Deactivated token '{}'", token_id);
        Ok(())
    }

    /// Changes the PIN on the device. Whether the token is active does not
    /// change.
    pub fn update_token_pin(&self, token_id: &str, old_pin: &str, new_pin: &str) -> SignerEmptyResult {
        self.read_model().token(token_id)?;

        let mut device = self.device(token_id)?.lock().unwrap();
        device
            .change_pin(old_pin, new_pin)
            .map_err(|e| Error::device(token_id, e))?;

        info!("Changed the PIN of token '{}'", token_id);
        Ok(())
    }

    pub fn set_token_friendly_name(&self, token_id: &str, name: &str) -> SignerEmptyResult {
        let mut model = self.write_model();
        model.token_mut(token_id)?.friendly_name = name.to_string();
        self.save(&model)
    }

    /// Sets the first PIN of the software token.
    pub fn init_software_token(&self, pin: &str) -> SignerEmptyResult {
        let mut device = self
            .devices
            .get(SOFT_TOKEN_ID)
            .ok_or_else(|| Error::TokenNotFound(SOFT_TOKEN_ID.to_string()))?
            .lock()
            .unwrap();

        device.init_pin(pin).map_err(|e| Error::device(SOFT_TOKEN_ID, e))?;

        let mut model = self.write_model();
        if model.token(SOFT_TOKEN_ID).is_err() {
            model.add_token(Registry::device_token(&device, None));
        }
        model.token_mut(SOFT_TOKEN_ID)?.status = TokenStatus::Inactive;

        info!("Initialized the software token");
        self.save(&model)
    }

    /// Forgets a token. Only tokens without keys can be deleted.
    pub fn delete_token(&self, token_id: &str) -> SignerEmptyResult {
        let mut model = self.write_model();
        model.remove_token(token_id)?;
        info!("Deleted token '{}'", token_id);
        self.save(&model)
    }

    /// Whether all hardware tokens are present and none of them had a
    /// failed login.
    pub fn is_hsm_operational(&self) -> SignerResult<bool> {
        let mut presence = vec![];
        for (token_id, device) in &self.devices {
            let device = device.lock().unwrap();
            if device.kind() == TokenKind::Hardware {
                presence.push((token_id.as_str(), device.is_available()));
            }
        }

        let mut model = self.write_model();
        for (token_id, available) in presence {
            if let Ok(token) = model.token_mut(token_id) {
                token.available = available;
            }
        }

        Ok(model
            .tokens()
            .iter()
            .filter(|t| t.kind == TokenKind::Hardware)
            .all(|t| t.available && t.status != TokenStatus::LoginFailed))
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{
        commons::{
            api::{TokenKind, TokenStatus},
            crypto::signing::signers::mocksigner::FnIdx,
            test,
        },
        constants::SOFT_TOKEN_ID,
        daemon::signer::tests::{mock, mock_signer, soft_signer, MOCK_TOKEN, PIN},
    };

    #[test]
    fn unknown_tokens_are_not_found() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            for err in [
                signer.get_token("a3f").unwrap_err(),
                signer.activate_token("a3f", PIN).unwrap_err(),
                signer.deactivate_token("a3f").unwrap_err(),
                signer.update_token_pin("a3f", PIN, "other").unwrap_err(),
                signer.set_token_friendly_name("a3f", "name").unwrap_err(),
            ] {
                assert_eq!(err.code(), "Signer.TokenNotFound");
                assert!(err.to_string().contains("a3f"));
            }
        })
    }

    #[test]
    fn activate_and_deactivate() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            assert_eq!(signer.get_token(SOFT_TOKEN_ID).unwrap().status, TokenStatus::Inactive);

            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();
            assert!(signer.get_token(SOFT_TOKEN_ID).unwrap().is_active());

            signer.deactivate_token(SOFT_TOKEN_ID).unwrap();
            signer.deactivate_token(SOFT_TOKEN_ID).unwrap();
            assert_eq!(signer.get_token(SOFT_TOKEN_ID).unwrap().status, TokenStatus::Inactive);
        })
    }

    #[test]
    fn wrong_pin_fails_login() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            let err = signer.activate_token(SOFT_TOKEN_ID, "wrong").unwrap_err();
            assert_eq!(err.code(), "Signer.PinIncorrect");
            assert_eq!(signer.get_token(SOFT_TOKEN_ID).unwrap().status, TokenStatus::LoginFailed);

            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();
            assert!(signer.get_token(SOFT_TOKEN_ID).unwrap().is_active());
        })
    }

    #[test]
    fn uninitialized_software_token() {
        test::test_under_tmp(|dir| {
            let signer = crate::daemon::signer::Signer::build(&crate::daemon::signer::tests::config(&dir)).unwrap();
            let token = signer.get_token(SOFT_TOKEN_ID).unwrap();
            assert_eq!(token.status, TokenStatus::NotInitialized);
            assert_eq!(token.kind, TokenKind::Software);

            let err = signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap_err();
            assert_eq!(err.code(), "Signer.TokenNotInitialized");

            signer.init_software_token(PIN).unwrap();
            assert_eq!(signer.get_token(SOFT_TOKEN_ID).unwrap().status, TokenStatus::Inactive);

            let err = signer.init_software_token(PIN).unwrap_err();
            assert_eq!(err.code(), "Signer.TokenAlreadyInitialized");
        })
    }

    #[test]
    fn update_pin_keeps_activation_state() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();

            let err = signer.update_token_pin(SOFT_TOKEN_ID, "wrong", "new-pin").unwrap_err();
            assert_eq!(err.code(), "Signer.PinIncorrect");

            signer.update_token_pin(SOFT_TOKEN_ID, PIN, "new-pin").unwrap();
            assert!(signer.get_token(SOFT_TOKEN_ID).unwrap().is_active());

            signer.deactivate_token(SOFT_TOKEN_ID).unwrap();
            assert_eq!(
                signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap_err().code(),
                "Signer.PinIncorrect"
            );
            signer.activate_token(SOFT_TOKEN_ID, "new-pin").unwrap();
        })
    }

    #[test]
    fn friendly_names() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            assert_eq!(signer.get_token(SOFT_TOKEN_ID).unwrap().friendly_name, "softToken-0");
            signer.set_token_friendly_name(SOFT_TOKEN_ID, "renamed").unwrap();
            assert_eq!(signer.get_token(SOFT_TOKEN_ID).unwrap().friendly_name, "renamed");
        })
    }

    #[test]
    fn delete_token_requires_no_keys() {
        test::test_under_tmp(|dir| {
            let signer = soft_signer(&dir);
            signer.activate_token(SOFT_TOKEN_ID, PIN).unwrap();
            let key = signer.generate_key(SOFT_TOKEN_ID, "k1").unwrap();

            let err = signer.delete_token(SOFT_TOKEN_ID).unwrap_err();
            assert_eq!(err.code(), "Signer.TokenNotEmpty");

            signer.delete_key(&key.id, true).unwrap();
            signer.delete_token(SOFT_TOKEN_ID).unwrap();
            assert!(signer.list_tokens().unwrap().is_empty());
            assert_eq!(signer.delete_token(SOFT_TOKEN_ID).unwrap_err().code(), "Signer.TokenNotFound");
        })
    }

    #[test]
    fn failed_hardware_login_is_not_operational() {
        test::test_under_tmp(|dir| {
            let signer = mock_signer(&dir, mock());
            assert!(signer.is_hsm_operational().unwrap());

            let err = signer.activate_token(MOCK_TOKEN, "wrong").unwrap_err();
            assert_eq!(err.code(), "Signer.PinIncorrect");
            assert!(!signer.is_hsm_operational().unwrap());

            signer.activate_token(MOCK_TOKEN, PIN).unwrap();
            assert!(signer.is_hsm_operational().unwrap());
        })
    }

    #[test]
    fn missing_hardware_is_not_operational() {
        test::test_under_tmp(|dir| {
            let mut device = mock();
            device.set_available(false);
            let signer = mock_signer(&dir, device);
            assert!(!signer.get_token(MOCK_TOKEN).unwrap().available);
            assert!(!signer.is_hsm_operational().unwrap());
        })
    }

    #[test]
    fn login_errors_are_reported_once_per_call() {
        test::test_under_tmp(|dir| {
            let mut device = mock();
            device.set_login_error_cb(|counts| {
                if counts.get(FnIdx::Login) == 1 {
                    Err(crate::commons::crypto::signing::SignerError::LoginFailed("locked".to_string()))
                } else {
                    Ok(())
                }
            });
            let signer = mock_signer(&dir, device);

            let err = signer.activate_token(MOCK_TOKEN, PIN).unwrap_err();
            assert_eq!(err.code(), "Signer.LoginFailed");
            assert_eq!(err.to_string(), "Login failed for token 'mock-0': locked");

            signer.activate_token(MOCK_TOKEN, PIN).unwrap();
            assert!(signer.get_token(MOCK_TOKEN).unwrap().is_active());
        })
    }
}
