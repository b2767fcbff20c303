//! Query identifiers
//!
//! Provides [`QueryId`], a strongly-typed 16-byte identifier derived from
//! the query text, the owning scenario and the time the query was issued.

use chrono::{DateTime, Utc};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 16-byte query identifier (truncated Blake3)
///
/// Derivation is deterministic: the same query text issued in the same
/// scenario at the same millisecond always yields the same id, so a
/// repeated add merges into the existing group. The timestamp breaks ties
/// between identical queries issued at different times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryId([u8; 16]);

impl QueryId {
    /// Create a `QueryId` from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Derive the id for a query issued in `scenario` at `timestamp`
    #[must_use]
    pub fn derive(scenario: &str, query_text: &str, timestamp: DateTime<Utc>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(scenario.as_bytes());
        hasher.update(&[0]);
        hasher.update(query_text.as_bytes());
        hasher.update(&[0]);
        hasher.update(&timestamp.timestamp_millis().to_le_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Create id from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, QueryIdError> {
        if bytes.len() != 16 {
            return Err(QueryIdError::InvalidLength {
                expected: 16,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Short string representation (first 8 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Display for QueryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for QueryId {
    type Err = QueryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for QueryId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for QueryId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors parsing a [`QueryId`]
#[derive(Debug, thiserror::Error)]
pub enum QueryIdError {
    /// Wrong number of bytes
    #[error("invalid query id length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Not a hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn derive_is_deterministic() {
        let a = QueryId::derive("s1", "find revenue", at(1_700_000_000));
        let b = QueryId::derive("s1", "find revenue", at(1_700_000_000));
        assert_eq!(a, b);
    }

    #[test]
    fn derive_separates_scenarios_and_times() {
        let base = QueryId::derive("s1", "find revenue", at(1_700_000_000));
        assert_ne!(base, QueryId::derive("s2", "find revenue", at(1_700_000_000)));
        assert_ne!(base, QueryId::derive("s1", "find revenue", at(1_700_000_001)));
        assert_ne!(base, QueryId::derive("s1", "find cost", at(1_700_000_000)));
    }

    #[test]
    fn separator_prevents_boundary_collisions() {
        let a = QueryId::derive("ab", "c", at(0));
        let b = QueryId::derive("a", "bc", at(0));
        assert_ne!(a, b);
    }

    #[test]
    fn display_parses_back() {
        let id = QueryId::derive("s1", "q", at(5));
        let parsed: QueryId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = "abcd".parse::<QueryId>().unwrap_err();
        assert!(matches!(err, QueryIdError::InvalidLength { actual: 2, .. }));
    }

    #[test]
    fn serializes_as_hex_string() {
        let id = QueryId::new([0xab; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(16)));
    }
}
