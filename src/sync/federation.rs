//! Peer federation: handshake, heartbeat accounting, and the peer state
//! machine.
//!
//! The state machine has a fixed edge set; `transition_to` refuses anything
//! else without mutating. Heartbeat misses degrade a connected peer, further
//! misses take a degraded peer offline, and any heartbeat received while
//! degraded restores the connection.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{NodeId, SequenceNum, SyncError, SYNC_SCHEMA_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Disconnected,
    HandshakePending,
    Connected,
    Degraded,
    Offline,
}

impl PeerState {
    /// The full transition relation. Self-transitions are always invalid.
    pub fn can_transition_to(&self, to: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (*self, to),
            (Disconnected, HandshakePending)
                | (HandshakePending, Connected)
                | (HandshakePending, Disconnected)
                | (Connected, Degraded)
                | (Connected, Disconnected)
                | (Degraded, Connected)
                | (Degraded, Offline)
                | (Degraded, Disconnected)
                | (Offline, Disconnected)
        )
    }

    pub const ALL: [PeerState; 5] = [
        Self::Disconnected,
        Self::HandshakePending,
        Self::Connected,
        Self::Degraded,
        Self::Offline,
    ];
}

/// Heartbeat cadence and miss thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub degraded_after_missed: u32,
    pub offline_after_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            degraded_after_missed: 2,
            offline_after_missed: 5,
        }
    }
}

/// Periodic liveness message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub source_node: NodeId,
    pub timestamp: u64,
    pub sequence: SequenceNum,
    pub uptime_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeResult {
    Accepted,
    Rejected,
    VersionMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub source_node: NodeId,
    pub schema_version: u32,
    pub timestamp: u64,
    pub last_seen_sequence: SequenceNum,
}

impl HandshakeRequest {
    pub fn new(source_node: NodeId, last_seen_sequence: SequenceNum) -> Self {
        Self {
            source_node,
            schema_version: SYNC_SCHEMA_VERSION,
            timestamp: super::now_ms(),
            last_seen_sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub source_node: NodeId,
    pub schema_version: u32,
    pub timestamp: u64,
    pub result: HandshakeResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub last_seen_sequence: SequenceNum,
}

/// Responder side of the handshake: equal schema versions are accepted, any
/// mismatch is answered with `VersionMismatch`.
pub fn respond_handshake(
    request: &HandshakeRequest,
    our_node: NodeId,
    our_last_seen: SequenceNum,
) -> HandshakeResponse {
    let (result, reason) = if request.schema_version == SYNC_SCHEMA_VERSION {
        (HandshakeResult::Accepted, None)
    } else {
        (
            HandshakeResult::VersionMismatch,
            Some(format!(
                "peer schema {} != local schema {}",
                request.schema_version, SYNC_SCHEMA_VERSION
            )),
        )
    };
    HandshakeResponse {
        source_node: our_node,
        schema_version: SYNC_SCHEMA_VERSION,
        timestamp: super::now_ms(),
        result,
        reason,
        last_seen_sequence: our_last_seen,
    }
}

/// Snapshot of what we know about the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub node: NodeId,
    pub state: PeerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ts: Option<u64>,
    pub missed_heartbeats: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<u64>,
    pub last_received_sequence: SequenceNum,
}

/// Owns the peer lifecycle. The federation loop mutates it; everyone else
/// reads `info()` snapshots.
#[derive(Debug, Clone)]
pub struct PeerTracker {
    info: PeerInfo,
    config: HeartbeatConfig,
}

impl PeerTracker {
    pub fn new(node: NodeId, config: HeartbeatConfig) -> Self {
        Self {
            info: PeerInfo {
                node,
                state: PeerState::Disconnected,
                last_heartbeat_ts: None,
                missed_heartbeats: 0,
                connected_at: None,
                last_received_sequence: 0,
            },
            config,
        }
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn state(&self) -> PeerState {
        self.info.state
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Move the peer to `to`, refusing edges outside the relation.
    pub fn transition_to(&mut self, to: PeerState) -> Result<(), SyncError> {
        if !self.info.state.can_transition_to(to) {
            return Err(SyncError::InvalidTransition {
                from: self.info.state,
                to,
            });
        }
        debug!(peer = %self.info.node, from = ?self.info.state, to = ?to, "peer transition");
        self.info.state = to;
        Ok(())
    }

    /// Initiator: disconnected → handshake_pending.
    pub fn begin_handshake(&mut self) -> Result<(), SyncError> {
        self.transition_to(PeerState::HandshakePending)
    }

    /// Apply the responder's verdict.
    pub fn complete_handshake(&mut self, response: &HandshakeResponse) -> Result<(), SyncError> {
        match response.result {
            HandshakeResult::Accepted => {
                self.transition_to(PeerState::Connected)?;
                self.info.connected_at = Some(super::now_ms());
                self.info.missed_heartbeats = 0;
                info!(peer = %self.info.node, "peer connected");
            }
            HandshakeResult::Rejected | HandshakeResult::VersionMismatch => {
                self.transition_to(PeerState::Disconnected)?;
                warn!(
                    peer = %self.info.node,
                    result = ?response.result,
                    reason = response.reason.as_deref().unwrap_or(""),
                    "handshake refused"
                );
            }
        }
        Ok(())
    }

    /// Record a received heartbeat. A degraded peer recovers to connected
    /// and the miss counter resets. Heartbeats arriving in other states
    /// update the tracking fields without forcing a transition.
    pub fn record_heartbeat(&mut self, heartbeat: &Heartbeat, now_ms: u64) {
        self.info.last_heartbeat_ts = Some(now_ms);
        if heartbeat.sequence > self.info.last_received_sequence {
            self.info.last_received_sequence = heartbeat.sequence;
        }
        if self.info.state == PeerState::Degraded {
            // Edge exists by construction.
            let _ = self.transition_to(PeerState::Connected);
            info!(peer = %self.info.node, "peer recovered");
        }
        self.info.missed_heartbeats = 0;
    }

    /// Account one missed heartbeat interval.
    pub fn record_miss(&mut self) {
        self.info.missed_heartbeats += 1;
        match self.info.state {
            PeerState::Connected
                if self.info.missed_heartbeats >= self.config.degraded_after_missed =>
            {
                let _ = self.transition_to(PeerState::Degraded);
                warn!(
                    peer = %self.info.node,
                    missed = self.info.missed_heartbeats,
                    "peer degraded"
                );
            }
            PeerState::Degraded
                if self.info.missed_heartbeats >= self.config.offline_after_missed =>
            {
                let _ = self.transition_to(PeerState::Offline);
                warn!(peer = %self.info.node, "peer offline");
            }
            _ => {}
        }
    }

    /// Clear all tracking but keep the node identity.
    pub fn reset(&mut self) {
        let node = self.info.node.clone();
        self.info = PeerInfo {
            node,
            state: PeerState::Disconnected,
            last_heartbeat_ts: None,
            missed_heartbeats: 0,
            connected_at: None,
            last_received_sequence: 0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn connected_tracker() -> PeerTracker {
        let mut t = PeerTracker::new(node("muninn"), HeartbeatConfig::default());
        t.begin_handshake().unwrap();
        let resp = respond_handshake(
            &HandshakeRequest::new(node("muninn"), 0),
            node("huginn"),
            0,
        );
        t.complete_handshake(&resp).unwrap();
        t
    }

    #[test]
    fn test_transition_relation_exact() {
        use PeerState::*;
        let valid = [
            (Disconnected, HandshakePending),
            (HandshakePending, Connected),
            (HandshakePending, Disconnected),
            (Connected, Degraded),
            (Connected, Disconnected),
            (Degraded, Connected),
            (Degraded, Offline),
            (Degraded, Disconnected),
            (Offline, Disconnected),
        ];
        for from in PeerState::ALL {
            for to in PeerState::ALL {
                let expected = valid.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn test_invalid_transition_rejected_without_mutation() {
        let mut t = PeerTracker::new(node("muninn"), HeartbeatConfig::default());
        let err = t.transition_to(PeerState::Connected).unwrap_err();
        assert_eq!(
            err,
            SyncError::InvalidTransition {
                from: PeerState::Disconnected,
                to: PeerState::Connected,
            }
        );
        assert_eq!(t.state(), PeerState::Disconnected);
    }

    #[test]
    fn test_handshake_accepted() {
        let t = connected_tracker();
        assert_eq!(t.state(), PeerState::Connected);
        assert!(t.info().connected_at.is_some());
    }

    #[test]
    fn test_handshake_version_mismatch() {
        let mut req = HandshakeRequest::new(node("muninn"), 0);
        req.schema_version = 99;
        let resp = respond_handshake(&req, node("huginn"), 5);
        assert_eq!(resp.result, HandshakeResult::VersionMismatch);
        assert!(resp.reason.is_some());
        assert_eq!(resp.last_seen_sequence, 5);

        let mut t = PeerTracker::new(node("muninn"), HeartbeatConfig::default());
        t.begin_handshake().unwrap();
        t.complete_handshake(&resp).unwrap();
        assert_eq!(t.state(), PeerState::Disconnected);
    }

    #[test]
    fn test_miss_accounting_degrades_then_offline() {
        let mut t = connected_tracker();
        t.record_miss();
        assert_eq!(t.state(), PeerState::Connected);
        t.record_miss();
        assert_eq!(t.state(), PeerState::Degraded);
        t.record_miss();
        t.record_miss();
        assert_eq!(t.state(), PeerState::Degraded);
        t.record_miss();
        assert_eq!(t.state(), PeerState::Offline);
    }

    #[test]
    fn test_heartbeat_recovers_degraded_peer() {
        let mut t = connected_tracker();
        t.record_miss();
        t.record_miss();
        assert_eq!(t.state(), PeerState::Degraded);

        let hb = Heartbeat {
            source_node: node("muninn"),
            timestamp: 1,
            sequence: 42,
            uptime_ms: 1000,
        };
        t.record_heartbeat(&hb, 123);
        assert_eq!(t.state(), PeerState::Connected);
        assert_eq!(t.info().missed_heartbeats, 0);
        assert_eq!(t.info().last_heartbeat_ts, Some(123));
        assert_eq!(t.info().last_received_sequence, 42);
    }

    #[test]
    fn test_heartbeat_while_offline_does_not_revive() {
        let mut t = connected_tracker();
        for _ in 0..5 {
            t.record_miss();
        }
        assert_eq!(t.state(), PeerState::Offline);

        let hb = Heartbeat {
            source_node: node("muninn"),
            timestamp: 1,
            sequence: 7,
            uptime_ms: 1,
        };
        t.record_heartbeat(&hb, 50);
        // Tracking updates, but offline requires a full reconnect.
        assert_eq!(t.state(), PeerState::Offline);
        assert_eq!(t.info().last_received_sequence, 7);
    }

    #[test]
    fn test_reset_preserves_identity() {
        let mut t = connected_tracker();
        t.record_miss();
        t.reset();
        assert_eq!(t.info().node, node("muninn"));
        assert_eq!(t.state(), PeerState::Disconnected);
        assert_eq!(t.info().missed_heartbeats, 0);
        assert_eq!(t.info().last_received_sequence, 0);
        assert!(t.info().last_heartbeat_ts.is_none());
    }

    #[test]
    fn test_heartbeat_sequence_never_rewinds() {
        let mut t = connected_tracker();
        let mk = |seq| Heartbeat {
            source_node: node("muninn"),
            timestamp: 1,
            sequence: seq,
            uptime_ms: 1,
        };
        t.record_heartbeat(&mk(10), 1);
        t.record_heartbeat(&mk(5), 2);
        assert_eq!(t.info().last_received_sequence, 10);
    }
}
