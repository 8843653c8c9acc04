//! Core identifiers shared by every escrow component.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Token amount in the asset's smallest unit.
pub type Amount = u64;

/// Raw oracle answer in the feed's fixed-point units.
pub type Price = i128;

/// Opaque account identity supplied by the host. Callers cannot choose it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a fungible asset (token mint / contract).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One of the two deposit pools.
///
/// Pool A stakes asset A and wins when the resolved price is at or above the
/// threshold. Pool B stakes asset B and wins when the price is below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pool {
    A,
    B,
}

impl Pool {
    pub const BOTH: [Pool; 2] = [Pool::A, Pool::B];

    pub fn opposite(self) -> Pool {
        match self {
            Pool::A => Pool::B,
            Pool::B => Pool::A,
        }
    }

    /// Which pool wins for a given resolved price.
    pub fn winner(price: Price, threshold: Price) -> Pool {
        if price >= threshold {
            Pool::A
        } else {
            Pool::B
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::A => f.write_str("A"),
            Pool::B => f.write_str("B"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_winner_boundary() {
        assert_eq!(Pool::winner(100, 100), Pool::A);
        assert_eq!(Pool::winner(101, 100), Pool::A);
        assert_eq!(Pool::winner(99, 100), Pool::B);
        assert_eq!(Pool::winner(-5, 0), Pool::B);
    }

    #[test]
    fn test_opposite() {
        assert_eq!(Pool::A.opposite(), Pool::B);
        assert_eq!(Pool::B.opposite().opposite(), Pool::B);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = AccountId::new("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        assert_eq!(AssetId::from("USDC").to_string(), "USDC");
    }
}
