//! Circuit field elements.
//!
//! Proof coordinates, public signals and circuit inputs all travel as decimal
//! strings in snarkjs JSON. `FieldElement` keeps the arbitrary-precision value and
//! serializes back to the same decimal form.

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid field element: {0:?}")]
pub struct ParseFieldElementError(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldElement(BigUint);

impl FieldElement {
    pub fn from_u64(value: u64) -> Self {
        FieldElement(BigUint::from(value))
    }

    /// Interprets big-endian bytes as an unsigned integer.
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        FieldElement(BigUint::from_bytes_be(bytes))
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        FieldElement::from_u64(value)
    }
}

impl Display for FieldElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepts decimal, or hex with a `0x` prefix.
impl FromStr for FieldElement {
    type Err = ParseFieldElementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
            Some(hex) if !hex.is_empty() => BigUint::parse_bytes(hex.as_bytes(), 16),
            Some(_) => None,
            None if !trimmed.is_empty() => BigUint::parse_bytes(trimmed.as_bytes(), 10),
            None => None,
        };
        parsed
            .map(FieldElement)
            .ok_or_else(|| ParseFieldElementError(s.to_string()))
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawElement {
    Text(String),
    Number(u64),
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawElement::deserialize(deserializer)? {
            RawElement::Text(text) => text.parse().map_err(serde::de::Error::custom),
            RawElement::Number(n) => Ok(FieldElement::from_u64(n)),
        }
    }
}
