//! Canonical cache keys for query descriptors.
//!
//! A [`QueryDescriptor`] names a backend query plus its arguments. Its
//! [`CacheKey`] is the SHA-256 of a canonical encoding of the descriptor:
//! type-tagged, length-delimited, with all map keys visited in sorted order.
//! Two descriptors that are structurally equal (same name, same arguments
//! under any map-key insertion order) always produce the same key; distinct
//! descriptors collide only with cryptographic improbability.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ErasError, Result};

/// A named backend query plus canonicalizable arguments.
///
/// Arguments are restricted to JSON value shapes: null, booleans, numbers,
/// strings, sequences, and string-keyed mappings. Anything else (a map with
/// non-string keys, a type whose `Serialize` impl fails — e.g. one wrapping a
/// live handle) is rejected by [`QueryDescriptor::new`] with
/// [`ErasError::InvalidArgument`] before it can reach the transport.
///
/// # Example
///
/// ```
/// use eras_client::key::QueryDescriptor;
///
/// let d = QueryDescriptor::new("games.byJoinCode", &serde_json::json!({
///     "joinCode": "BRONZE-AGE",
/// })).unwrap();
/// assert_eq!(d.name(), "games.byJoinCode");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    name: String,
    args: Value,
}

impl QueryDescriptor {
    /// Create a descriptor from a query name and serializable arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ErasError::InvalidArgument`] if the arguments cannot be
    /// represented as a JSON value (e.g. a map with non-string keys, or a
    /// failing `Serialize` impl).
    pub fn new<A: Serialize>(name: impl Into<String>, args: &A) -> Result<Self> {
        let args =
            serde_json::to_value(args).map_err(|e| ErasError::InvalidArgument(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            args,
        })
    }

    /// Create a descriptor for a query that takes no arguments.
    pub fn no_args(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Value::Null,
        }
    }

    /// The query name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonicalized arguments.
    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Derive the canonical cache key for this descriptor.
    ///
    /// Pure and deterministic: structurally equal descriptors always yield
    /// the same key regardless of map-key insertion order.
    pub fn cache_key(&self) -> CacheKey {
        let mut hasher = Sha256::new();
        hash_str(&mut hasher, &self.name);
        hash_value(&mut hasher, &self.args);
        CacheKey(hasher.finalize().into())
    }
}

/// Opaque fixed-size cache key derived from a [`QueryDescriptor`].
///
/// Displayed and serialized as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 hex chars are plenty for log lines.
        let mut short = String::with_capacity(8);
        for byte in &self.0[..4] {
            short.push_str(&format!("{byte:02x}"));
        }
        write!(f, "CacheKey({short}…)")
    }
}

impl std::str::FromStr for CacheKey {
    type Err = ErasError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 64 {
            return Err(ErasError::InvalidArgument(format!(
                "cache key must be 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hi = hex_nibble(chunk[0])?;
            let lo = hex_nibble(chunk[1])?;
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        other => Err(ErasError::InvalidArgument(format!(
            "invalid hex character {:?} in cache key",
            other as char
        ))),
    }
}

impl Serialize for CacheKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Canonical hashing ───────────────────────────────────────────────

// Each node is tagged with a single byte and length-delimited so that
// distinct structures can never produce the same byte stream (e.g.
// ["ab", "c"] vs ["a", "bc"], or a string that looks like a number).

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update([b's']);
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update([b'n']),
        Value::Bool(true) => hasher.update([b't']),
        Value::Bool(false) => hasher.update([b'f']),
        Value::Number(n) => {
            // serde_json renders numbers deterministically; non-finite floats
            // cannot exist inside a Value.
            let repr = n.to_string();
            hasher.update([b'#']);
            hasher.update((repr.len() as u64).to_le_bytes());
            hasher.update(repr.as_bytes());
        }
        Value::String(s) => hash_str(hasher, s),
        Value::Array(items) => {
            hasher.update([b'[']);
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items {
                hash_value(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update([b'{']);
            hasher.update((map.len() as u64).to_le_bytes());
            // Sort keys so field order never affects the key.
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by_key(|(k, _)| k.as_str());
            for (k, v) in fields {
                hash_str(hasher, k);
                hash_value(hasher, v);
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_descriptors_yield_equal_keys() {
        let a = QueryDescriptor::new("games.get", &json!({ "id": "g1", "full": true })).unwrap();
        let b = QueryDescriptor::new("games.get", &json!({ "full": true, "id": "g1" })).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn nested_map_key_order_does_not_matter() {
        let a = QueryDescriptor::new(
            "games.list",
            &json!({ "filter": { "phase": "lobby", "open": true }, "limit": 10 }),
        )
        .unwrap();
        let b = QueryDescriptor::new(
            "games.list",
            &json!({ "limit": 10, "filter": { "open": true, "phase": "lobby" } }),
        )
        .unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn different_names_yield_different_keys() {
        let a = QueryDescriptor::new("games.get", &json!({ "id": "g1" })).unwrap();
        let b = QueryDescriptor::new("games.watch", &json!({ "id": "g1" })).unwrap();
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn different_args_yield_different_keys() {
        let a = QueryDescriptor::new("games.get", &json!({ "id": "g1" })).unwrap();
        let b = QueryDescriptor::new("games.get", &json!({ "id": "g2" })).unwrap();
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn length_delimiting_prevents_boundary_collisions() {
        let a = QueryDescriptor::new("q", &json!(["ab", "c"])).unwrap();
        let b = QueryDescriptor::new("q", &json!(["a", "bc"])).unwrap();
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn type_tags_distinguish_string_from_number() {
        let a = QueryDescriptor::new("q", &json!({ "v": "1" })).unwrap();
        let b = QueryDescriptor::new("q", &json!({ "v": 1 })).unwrap();
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn no_args_and_null_args_agree() {
        let a = QueryDescriptor::no_args("games.current");
        let b = QueryDescriptor::new("games.current", &Value::Null).unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn non_serializable_args_fail_with_invalid_argument() {
        // Maps with non-string keys cannot be represented as JSON objects.
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8, 2], "value");
        let err = QueryDescriptor::new("games.get", &map).unwrap_err();
        assert!(matches!(err, ErasError::InvalidArgument(_)));
    }

    #[test]
    fn failing_serialize_impl_fails_with_invalid_argument() {
        struct LiveHandle;
        impl Serialize for LiveHandle {
            fn serialize<S: serde::Serializer>(
                &self,
                _serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("live handles are not serializable"))
            }
        }
        let err = QueryDescriptor::new("games.get", &LiveHandle).unwrap_err();
        assert!(matches!(err, ErasError::InvalidArgument(_)));
    }

    #[test]
    fn cache_key_display_round_trips() {
        let key = QueryDescriptor::no_args("games.current").cache_key();
        let parsed: CacheKey = key.to_string().parse().unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn cache_key_serde_round_trips() {
        let key = QueryDescriptor::no_args("games.current").cache_key();
        let json = serde_json::to_string(&key).unwrap();
        let back: CacheKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }

    #[test]
    fn cache_key_rejects_bad_hex() {
        assert!("zz".repeat(32).parse::<CacheKey>().is_err());
        assert!("abcd".parse::<CacheKey>().is_err());
    }
}
