//! The persistent identifier value type.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-bit identifier naming an object for persistence purposes.
///
/// `0` is reserved as the "unassigned" sentinel. Equality and ordering are by
/// raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistentId(u32);

impl PersistentId {
    /// The "no identifier yet" value every object starts with.
    pub const UNASSIGNED: PersistentId = PersistentId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for PersistentId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<PersistentId> for u32 {
    fn from(id: PersistentId) -> Self {
        id.0
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Accepts decimal (`42`) or `0x`-prefixed hex (`0x2a`).
impl FromStr for PersistentId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => trimmed.parse::<u32>(),
        };

        parsed.map(PersistentId).map_err(|_| RegistryError::InvalidIdentifier {
            value: s.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unassigned_sentinel() {
        assert!(!PersistentId::UNASSIGNED.is_assigned());
        assert!(PersistentId::new(1).is_assigned());
        assert_eq!(PersistentId::default(), PersistentId::UNASSIGNED);
    }

    #[test]
    fn test_display_is_fixed_width_hex() {
        assert_eq!(PersistentId::new(42).to_string(), "0x0000002a");
        assert_eq!(PersistentId::new(u32::MAX).to_string(), "0xffffffff");
    }

    #[test]
    fn test_parse_decimal_and_hex() {
        assert_eq!("42".parse::<PersistentId>().unwrap(), PersistentId::new(42));
        assert_eq!("0x2a".parse::<PersistentId>().unwrap(), PersistentId::new(42));
        assert_eq!(
            PersistentId::new(7).to_string().parse::<PersistentId>().unwrap(),
            PersistentId::new(7)
        );
        assert!("forty-two".parse::<PersistentId>().is_err());
        assert!("0x1ffffffff".parse::<PersistentId>().is_err());
    }

    #[test]
    fn test_ordering_by_raw_value() {
        assert!(PersistentId::new(3) < PersistentId::new(10));
    }

    #[test]
    fn test_serde_is_plain_integer() {
        let json = serde_json::to_string(&PersistentId::new(42)).unwrap();
        assert_eq!(json, "42");
    }
}
