//! What the commands print.

use crate::commons::{
    api::{GeneratedCertRequestInfo, KeyInfo, TokenInfo},
    error::Fault,
};

//------------ Report --------------------------------------------------------

/// The outcome of a successful command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Report {
    Tokens(Vec<TokenInfo>),
    Key(KeyInfo),
    CertRequest(GeneratedCertRequestInfo),

    /// The key that an imported certificate was put under.
    KeyId(String),

    /// For commands that only change something.
    Empty,
}

impl Report {
    /// Renders the report as pretty printed JSON, or nothing for an empty
    /// report.
    pub fn to_json(&self) -> Result<Option<String>, serde_json::Error> {
        let json = match self {
            Report::Tokens(tokens) => serde_json::to_string_pretty(tokens)?,
            Report::Key(key) => serde_json::to_string_pretty(key)?,
            Report::CertRequest(req) => serde_json::to_string_pretty(req)?,
            Report::KeyId(key_id) => serde_json::to_string_pretty(&serde_json::json!({ "key_id": key_id }))?,
            Report::Empty => return Ok(None),
        };
        Ok(Some(json))
    }
}

/// Renders a fault the way failures are printed.
pub fn fault_json(fault: &Fault) -> String {
    serde_json::to_string_pretty(fault).unwrap_or_else(|_| fault.to_string())
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::error::Error;

    #[test]
    fn empty_report_prints_nothing() {
        assert_eq!(Report::Empty.to_json().unwrap(), None);
    }

    #[test]
    fn key_id_report() {
        let json = Report::KeyId("AB01".to_string()).to_json().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["key_id"], "AB01");
    }

    #[test]
    fn faults_print_all_fields() {
        let json = fault_json(&Error::TokenNotFound("a3f".to_string()).to_fault());
        let fault: Fault = serde_json::from_str(&json).unwrap();
        assert_eq!(fault.code, "Signer.TokenNotFound");
        assert_eq!(fault.message, "Token 'a3f' not found");
    }
}
