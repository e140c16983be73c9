//! Versioned delta envelopes exchanged between peers.
//!
//! A [`SyncMessage`] carries one header and exactly one payload whose kind
//! matches the header. Receivers reject anything else outright.

use serde::{Deserialize, Serialize};

use super::{NodeId, SequenceNum, SyncError, SYNC_SCHEMA_VERSION};
use crate::memory::{MemoryKind, MemoryTier};
use crate::task::{TaskPriority, TaskStatus};
use crate::timeline::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Memory,
    Task,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Create,
    Update,
    Delete,
}

/// Envelope header common to all delta kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaHeader {
    pub schema_version: u32,
    pub source_node: NodeId,
    pub sequence: SequenceNum,
    /// Milliseconds since epoch. Informational only, never causal.
    pub timestamp: u64,
    pub kind: DeltaKind,
    pub op: DeltaOp,
    pub record_id: String,
}

impl DeltaHeader {
    pub fn new(
        source_node: NodeId,
        sequence: SequenceNum,
        kind: DeltaKind,
        op: DeltaOp,
        record_id: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: SYNC_SCHEMA_VERSION,
            source_node,
            sequence,
            timestamp: super::now_ms(),
            kind,
            op,
            record_id: record_id.into(),
        }
    }
}

/// Memory change payload. Absent fields mean "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDelta {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MemoryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<MemoryTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Task change payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDelta {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Timeline event payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDelta {
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_json: Option<String>,
}

/// One sync message: header plus exactly one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub header: DeltaHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventDelta>,
}

impl SyncMessage {
    pub fn memory(header: DeltaHeader, payload: MemoryDelta) -> Self {
        Self {
            header,
            memory: Some(payload),
            task: None,
            event: None,
        }
    }

    pub fn task(header: DeltaHeader, payload: TaskDelta) -> Self {
        Self {
            header,
            memory: None,
            task: Some(payload),
            event: None,
        }
    }

    pub fn event(header: DeltaHeader, payload: EventDelta) -> Self {
        Self {
            header,
            memory: None,
            task: None,
            event: Some(payload),
        }
    }

    /// A message is valid iff the schema version matches, the source node id
    /// is within bounds, exactly one payload is present, and that payload
    /// matches `header.kind`.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.header.schema_version != SYNC_SCHEMA_VERSION {
            return Err(SyncError::InvalidMessage("schema version mismatch"));
        }
        // NodeId enforces its bounds on construction; re-check here so a
        // hand-built header cannot slip through.
        let node_len = self.header.source_node.as_str().len();
        if node_len == 0 || node_len > 64 {
            return Err(SyncError::InvalidMessage("source node out of bounds"));
        }

        let present =
            usize::from(self.memory.is_some()) + usize::from(self.task.is_some()) + usize::from(self.event.is_some());
        if present != 1 {
            return Err(SyncError::InvalidMessage("exactly one payload required"));
        }

        let matches = match self.header.kind {
            DeltaKind::Memory => self.memory.is_some(),
            DeltaKind::Task => self.task.is_some(),
            DeltaKind::Event => self.event.is_some(),
        };
        if !matches {
            return Err(SyncError::InvalidMessage("payload does not match header kind"));
        }
        Ok(())
    }
}

/// Receiver-side position in a peer's delta stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub remote_node: NodeId,
    pub last_sequence: SequenceNum,
    pub last_sync_ts: u64,
}

impl SyncCursor {
    pub fn new(remote_node: NodeId) -> Self {
        Self {
            remote_node,
            last_sequence: 0,
            last_sync_ts: 0,
        }
    }

    /// Record a received sequence number. Returns the gap size: the count of
    /// sequence numbers skipped since the last observation (0 when the
    /// stream is contiguous or the message is stale).
    pub fn advance(&mut self, sequence: SequenceNum, now_ms: u64) -> u64 {
        let gap = if sequence > self.last_sequence {
            sequence - self.last_sequence - 1
        } else {
            0
        };
        if sequence > self.last_sequence {
            self.last_sequence = sequence;
        }
        self.last_sync_ts = now_ms;
        gap
    }
}
