//! Entity identifiers
//!
//! Every entity is identified by a 128-bit UUID stored in its canonical
//! 36-character hyphenated form. The all-zero id is reserved for the
//! root (wrapper) entity.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(Uuid);

impl Uid {
    /// The reserved id of the root/wrapper entity.
    pub const ROOT: Uid = Uid(Uuid::nil());

    /// Length of the canonical textual form
    pub const TEXT_LEN: usize = 36;

    /// Generate a fresh random id
    pub fn generate() -> Self {
        Uid(Uuid::new_v4())
    }

    pub fn from_u128(value: u128) -> Self {
        Uid(Uuid::from_u128(value))
    }

    /// Parse the canonical textual form (any form accepted by `uuid` works)
    pub fn parse(text: &str) -> Result<Self> {
        Uuid::parse_str(text.trim())
            .map(Uid)
            .map_err(|e| Error::ValueConversion(format!("invalid uid '{}': {}", text, e)))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for Uid {
    fn from(value: Uuid) -> Self {
        Uid(value)
    }
}

impl FromStr for Uid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uid::parse(s)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_nil() {
        assert!(Uid::ROOT.is_root());
        assert_eq!(Uid::ROOT.to_string(), "00000000-0000-0000-0000-000000000000");
        assert!(!Uid::generate().is_root());
    }

    #[test]
    fn test_canonical_text_form() {
        let uid = Uid::from_u128(0x1234);
        let text = uid.to_string();
        assert_eq!(text.len(), Uid::TEXT_LEN);
        assert_eq!(Uid::parse(&text).unwrap(), uid);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(Uid::parse("not-a-uid"), Err(Error::ValueConversion(_))));
    }
}
