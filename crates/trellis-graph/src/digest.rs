//! Content fingerprints for committed node data.
//!
//! Uses SHA-256 over the canonical JSON encoding of a node's data and its
//! dependency list, so a push can tell whether anything changed since the
//! last one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use trellis_core::{NodeId, Result};

/// A 32-byte SHA-256 fingerprint of committed node data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataDigest([u8; 32]);

impl DataDigest {
    /// Fingerprint `data` together with the node's dependency edges.
    pub fn compute(data: &Value, dependencies: &[NodeId]) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(data)?);
        for dependency in dependencies {
            hasher.update(dependency.as_ulid().to_bytes());
        }
        Ok(DataDigest(hasher.finalize().into()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string for display.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Truncated display (first 8 chars).
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for DataDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataDigest({}...)", self.short())
    }
}

impl fmt::Display for DataDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
