//! Cross-node sync protocol shared by the huginn and muninn roles.
//!
//! A node exchanges versioned delta envelopes with exactly one peer. The
//! modules here are transport-agnostic: envelopes are logically JSON-shaped,
//! and the concrete encoding is the transport's business.

pub mod conflict;
pub mod delta;
pub mod engine;
pub mod federation;
pub mod snapshot;

use serde::{Deserialize, Serialize};

/// Protocol magic identifying sync messages at schema version 1.
pub const SYNC_MAGIC: &str = "nullclaw-sync-v1";

/// Current sync schema version.
pub const SYNC_SCHEMA_VERSION: u32 = 1;

/// Monotonic per-node sequence counter.
pub type SequenceNum = u64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),
    #[error("invalid peer transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: federation::PeerState,
        to: federation::PeerState,
    },
    #[error("invalid sync message: {0}")]
    InvalidMessage(&'static str),
    #[error("sync backend error: {0}")]
    Backend(String),
}

/// Node identifier, 1..=64 characters, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Result<Self, SyncError> {
        let id = id.into();
        if id.is_empty() || id.len() > 64 {
            return Err(SyncError::InvalidNodeId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_bounds() {
        assert!(NodeId::new("huginn").is_ok());
        assert!(NodeId::new("a").is_ok());
        assert!(NodeId::new("x".repeat(64)).is_ok());
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_node_id_rejects_invalid_on_deserialize() {
        let ok: Result<NodeId, _> = serde_json::from_str("\"muninn\"");
        assert!(ok.is_ok());
        let bad: Result<NodeId, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_node_id_ordering_is_lexicographic() {
        let h = NodeId::new("huginn").unwrap();
        let m = NodeId::new("muninn").unwrap();
        assert!(h < m);
    }
}
