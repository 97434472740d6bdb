//! Defines helper methods for Serializing and Deserializing external types.
use std::str::FromStr;

use base64::Engine;
use log::LevelFilter;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

#[cfg(unix)]
use syslog::Facility;

//------------ Bytes ---------------------------------------------------------

pub fn de_bytes<'de, D>(d: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let some = String::deserialize(d)?;
    base64::engine::general_purpose::STANDARD
        .decode(&some)
        .map_err(de::Error::custom)
}

pub fn ser_bytes<S>(b: &[u8], s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    base64::engine::general_purpose::STANDARD.encode(b).serialize(s)
}

//------------ LevelFilter ---------------------------------------------------

pub fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}

//------------ Facility ------------------------------------------------------

#[cfg(unix)]
pub fn de_facility<'de, D>(d: D) -> Result<Facility, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    Facility::from_str(&string).map_err(|_| de::Error::custom(format!("Unsupported syslog_facility: \"{}\"", string)))
}

//------------ Tests ---------------------------------------------------------
