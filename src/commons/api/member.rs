//! Identities of the members and subsystems that keys and certificates
//! belong to.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

//------------ ClientId ------------------------------------------------------

/// Identifies a member, or one of its subsystems, of a data exchange
/// instance.
///
/// The textual form is `instance:class:code` for members, with an extra
/// `:subsystem` part for subsystems.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ClientId {
    instance: String,
    member_class: String,
    member_code: String,
    subsystem_code: Option<String>,
}

impl ClientId {
    pub fn member(instance: &str, member_class: &str, member_code: &str) -> Self {
        ClientId {
            instance: instance.to_string(),
            member_class: member_class.to_string(),
            member_code: member_code.to_string(),
            subsystem_code: None,
        }
    }

    pub fn subsystem(instance: &str, member_class: &str, member_code: &str, subsystem_code: &str) -> Self {
        ClientId {
            subsystem_code: Some(subsystem_code.to_string()),
            ..Self::member(instance, member_class, member_code)
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn member_class(&self) -> &str {
        &self.member_class
    }

    pub fn member_code(&self) -> &str {
        &self.member_code
    }

    pub fn subsystem_code(&self) -> Option<&str> {
        self.subsystem_code.as_deref()
    }

    /// Returns the member this identifier belongs to, dropping any
    /// subsystem.
    pub fn member_id(&self) -> ClientId {
        ClientId {
            subsystem_code: None,
            ..self.clone()
        }
    }

    /// Whether both identifiers refer to the same member, ignoring the
    /// subsystem parts.
    pub fn member_equals(&self, other: &ClientId) -> bool {
        self.instance == other.instance
            && self.member_class == other.member_class
            && self.member_code == other.member_code
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.instance, self.member_class, self.member_code)?;
        if let Some(subsystem) = &self.subsystem_code {
            write!(f, ":{}", subsystem)?;
        }
        Ok(())
    }
}

impl FromStr for ClientId {
    type Err = ClientIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(ClientIdParseError(s.to_string()));
        }

        match parts.as_slice() {
            [instance, class, code] => Ok(ClientId::member(instance, class, code)),
            [instance, class, code, subsystem] => Ok(ClientId::subsystem(instance, class, code, subsystem)),
            _ => Err(ClientIdParseError(s.to_string())),
        }
    }
}

impl Serialize for ClientId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D>(deserializer: D) -> Result<ClientId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        ClientId::from_str(&string).map_err(de::Error::custom)
    }
}

//------------ ClientIdParseError --------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientIdParseError(String);

impl fmt::Display for ClientIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Could not parse client id '{}', expected instance:class:code[:subsystem]",
            self.0
        )
    }
}

impl std::error::Error for ClientIdParseError {}

//------------ Tests ---------------------------------------------------------
