//! Delta exchange engine: stamps outbound messages with this node's
//! monotonic sequence, and applies inbound messages to the memory backend
//! after validation, cursor accounting, and conflict resolution.
//!
//! Both peers run the same resolution chain, so each side converges on the
//! same winner for a contested record without coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::conflict::{resolve, ConflictPolicy, ConflictRecord, DecidedBy, Winner};
use super::delta::{DeltaHeader, DeltaKind, DeltaOp, MemoryDelta, SyncCursor, SyncMessage};
use super::federation::Heartbeat;
use super::{NodeId, SequenceNum, SyncError};
use crate::memory::{MemoryBackend, MemoryKind, MemoryRecord, MemorySource, MemoryTier};

/// What happened to one inbound delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The remote change was written to the local backend.
    Applied,
    /// A conflict was resolved in favor of the local copy; nothing changed.
    LocalKept(DecidedBy),
    /// A delete removed the local record.
    Deleted,
    /// The delta referenced a record this node does not hold.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub outcome: ApplyOutcome,
    /// Sequence numbers skipped since the last message from this peer.
    pub gap: u64,
}

/// One engine per peer link.
pub struct SyncEngine {
    local_node: NodeId,
    sequence: AtomicU64,
    cursor: Mutex<SyncCursor>,
    policy: ConflictPolicy,
}

impl SyncEngine {
    pub fn new(local_node: NodeId, remote_node: NodeId) -> Self {
        Self {
            local_node,
            sequence: AtomicU64::new(0),
            cursor: Mutex::new(SyncCursor::new(remote_node)),
            policy: ConflictPolicy::Chain,
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    /// Allocate the next outbound sequence number (1-based, monotonic).
    pub fn next_sequence(&self) -> SequenceNum {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest sequence allocated so far.
    pub fn current_sequence(&self) -> SequenceNum {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Receiver-side cursor snapshot.
    pub fn cursor(&self) -> SyncCursor {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Build an outbound memory delta stamped with this node's identity.
    pub fn memory_message(&self, op: DeltaOp, payload: MemoryDelta) -> SyncMessage {
        let header = DeltaHeader::new(
            self.local_node.clone(),
            self.next_sequence(),
            DeltaKind::Memory,
            op,
            payload.key.clone(),
        );
        SyncMessage::memory(header, payload)
    }

    /// A liveness beacon carrying the current outbound sequence.
    pub fn heartbeat(&self, uptime_ms: u64) -> Heartbeat {
        Heartbeat {
            source_node: self.local_node.clone(),
            timestamp: super::now_ms(),
            sequence: self.current_sequence(),
            uptime_ms,
        }
    }

    /// Validate and apply one inbound memory delta.
    ///
    /// Invalid envelopes are rejected without touching the backend. A create
    /// or update that collides with an existing record goes through conflict
    /// resolution; the remote side only lands if it wins.
    pub fn apply_memory(
        &self,
        message: &SyncMessage,
        backend: &dyn MemoryBackend,
    ) -> Result<ApplyReport, SyncError> {
        message.validate()?;
        let delta = message
            .memory
            .as_ref()
            .ok_or(SyncError::InvalidMessage("expected a memory delta"))?;

        let gap = {
            let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
            cursor.advance(message.header.sequence, super::now_ms())
        };
        if gap > 0 {
            warn!(
                peer = %message.header.source_node,
                gap,
                "sequence gap detected in peer stream"
            );
        }

        let existing = backend
            .list()
            .map_err(|e| SyncError::Backend(e.to_string()))?
            .into_iter()
            .find(|r| r.key == delta.key);

        match message.header.op {
            DeltaOp::Delete => match existing {
                Some(_) => {
                    backend
                        .forget(&delta.key)
                        .map_err(|e| SyncError::Backend(e.to_string()))?;
                    Ok(ApplyReport {
                        outcome: ApplyOutcome::Deleted,
                        gap,
                    })
                }
                None => Ok(ApplyReport {
                    outcome: ApplyOutcome::Ignored,
                    gap,
                }),
            },
            DeltaOp::Create | DeltaOp::Update => {
                if let Some(local) = existing {
                    let local_score = ConflictRecord {
                        source_node: self.local_node.clone(),
                        updated_at: local.last_accessed.unwrap_or(local.created_at),
                        last_confirmed_at: 0,
                        confidence: local.confidence.unwrap_or(0.5),
                        sequence: self.current_sequence(),
                    };
                    let remote_score = ConflictRecord {
                        source_node: message.header.source_node.clone(),
                        updated_at: message.header.timestamp,
                        last_confirmed_at: 0,
                        confidence: delta.confidence.unwrap_or(0.5),
                        sequence: message.header.sequence,
                    };
                    let verdict = resolve(&local_score, &remote_score, self.policy);
                    if verdict.winner == Winner::Local {
                        debug!(key = %delta.key, decided_by = ?verdict.decided_by, "local copy kept");
                        return Ok(ApplyReport {
                            outcome: ApplyOutcome::LocalKept(verdict.decided_by),
                            gap,
                        });
                    }
                    let merged = merge_delta(local, delta);
                    backend
                        .store(merged)
                        .map_err(|e| SyncError::Backend(e.to_string()))?;
                } else {
                    backend
                        .store(record_from_delta(delta, &message.header))
                        .map_err(|e| SyncError::Backend(e.to_string()))?;
                }
                Ok(ApplyReport {
                    outcome: ApplyOutcome::Applied,
                    gap,
                })
            }
        }
    }
}

/// Overlay the delta's present fields onto the local record.
fn merge_delta(mut local: MemoryRecord, delta: &MemoryDelta) -> MemoryRecord {
    if let Some(content) = &delta.content {
        local.content = content.clone();
    }
    if let Some(category) = &delta.category {
        local.category = Some(category.clone());
    }
    if let Some(kind) = delta.kind {
        local.kind = kind;
    }
    if let Some(tier) = delta.tier {
        local.tier = tier;
    }
    if let Some(confidence) = delta.confidence {
        local.confidence = Some(confidence.clamp(0.0, 1.0));
    }
    local
}

/// Materialize a record a create delta describes.
fn record_from_delta(delta: &MemoryDelta, header: &DeltaHeader) -> MemoryRecord {
    let mut record = MemoryRecord::new(
        delta.key.clone(),
        delta.content.clone().unwrap_or_default(),
        delta.kind.unwrap_or(MemoryKind::Semantic),
        delta.tier.unwrap_or(MemoryTier::Standard),
        MemorySource {
            origin: format!("peer:{}", header.source_node),
            context_id: None,
            tool_tag: None,
        },
    );
    record.category = delta.category.clone();
    record.confidence = delta.confidence.map(|c| c.clamp(0.0, 1.0));
    record
}
