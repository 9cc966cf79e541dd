//! Node fingerprints and provenance hashes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::GraphNode;

/// SHA-256 digest identifying a node configuration or a result lineage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a digest from its hex representation.
    pub fn from_hex(value: &str) -> RuntimeResult<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(value, &mut bytes)
            .map_err(|e| RuntimeError::Configuration(format!("invalid fingerprint: {e}")))?;
        Ok(Self(bytes))
    }

    /// Computes the fingerprint of a graph node.
    ///
    /// Covers the node type, the bytes reported by its logic, its batching
    /// configuration and the incomplete-step policy it runs with, where
    /// `default_allow_incomplete` applies unless the node sets its own.
    pub fn of_node(node: &GraphNode, default_allow_incomplete: bool) -> RuntimeResult<Self> {
        let iteration = serde_json::to_vec(node.iteration()).map_err(|e| {
            RuntimeError::Configuration(format!("cannot serialize iteration config: {e}"))
        })?;
        let allow_incomplete = node
            .iteration()
            .allow_incomplete
            .unwrap_or(default_allow_incomplete);

        let mut hasher = FingerprintHasher::new();
        hasher
            .update(node.logic().node_type().as_bytes())
            .update(&node.logic().fingerprint())
            .update(&iteration)
            .update(&[u8::from(allow_incomplete)]);
        Ok(hasher.finish())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-256 over length-prefixed fields.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` apart.
#[derive(Clone, Default)]
pub struct FingerprintHasher {
    hasher: Sha256,
}

impl fmt::Debug for FingerprintHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintHasher").finish_non_exhaustive()
    }
}

impl FingerprintHasher {
    /// Creates an empty hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one field.
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Appends a previously computed fingerprint.
    pub fn update_fingerprint(&mut self, fingerprint: &Fingerprint) -> &mut Self {
        self.update(fingerprint.as_bytes())
    }

    /// Finalizes the digest.
    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(fields: &[&str]) -> Fingerprint {
        let mut hasher = FingerprintHasher::new();
        for field in fields {
            hasher.update(field.as_bytes());
        }
        hasher.finish()
    }

    #[test]
    fn test_fields_are_delimited() {
        assert_eq!(digest(&["ab", "c"]), digest(&["ab", "c"]));
        assert_ne!(digest(&["ab", "c"]), digest(&["a", "bc"]));
    }

    #[test]
    fn test_hex_round_trip() {
        let fingerprint = digest(&["node"]);
        let json = serde_json::to_string(&fingerprint).unwrap();
        assert_eq!(json.len(), 66);
        let parsed: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, fingerprint);
        assert!(Fingerprint::from_hex("zz").is_err());
    }
}
