//! Deterministic conflict resolution between concurrent deltas.
//!
//! Both peers run the same precedence chain independently and reach the same
//! verdict without coordination. The final tiebreak is the node id: the
//! lexicographically smaller id wins. Both peers must use the same
//! convention, and identical ids resolve local.

use serde::{Deserialize, Serialize};

use super::NodeId;

/// The scored fields of one side of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub source_node: NodeId,
    /// Milliseconds since epoch of the last write.
    pub updated_at: u64,
    /// Milliseconds since epoch of the last explicit confirmation.
    pub last_confirmed_at: u64,
    pub confidence: f64,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Remote,
}

/// Which rule produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    LastConfirmedWins,
    HighestConfidence,
    LastWriterWins,
    SourcePriority,
}

/// Resolution policy. `Chain` applies every rule in precedence order;
/// single-rule policies apply their rule and fall back to source priority on
/// a tie so the outcome stays deterministic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Chain,
    LastConfirmedWins,
    HighestConfidence,
    LastWriterWins,
    SourcePriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictOutcome {
    pub winner: Winner,
    pub decided_by: DecidedBy,
}

fn by_last_confirmed(local: &ConflictRecord, remote: &ConflictRecord) -> Option<Winner> {
    match local.last_confirmed_at.cmp(&remote.last_confirmed_at) {
        std::cmp::Ordering::Greater => Some(Winner::Local),
        std::cmp::Ordering::Less => Some(Winner::Remote),
        std::cmp::Ordering::Equal => None,
    }
}

fn by_confidence(local: &ConflictRecord, remote: &ConflictRecord) -> Option<Winner> {
    if local.confidence > remote.confidence {
        Some(Winner::Local)
    } else if remote.confidence > local.confidence {
        Some(Winner::Remote)
    } else {
        None
    }
}

fn by_updated_at(local: &ConflictRecord, remote: &ConflictRecord) -> Option<Winner> {
    match local.updated_at.cmp(&remote.updated_at) {
        std::cmp::Ordering::Greater => Some(Winner::Local),
        std::cmp::Ordering::Less => Some(Winner::Remote),
        std::cmp::Ordering::Equal => None,
    }
}

/// Smaller node id wins; identical ids default to local.
fn by_source_priority(local: &ConflictRecord, remote: &ConflictRecord) -> Winner {
    if remote.source_node < local.source_node {
        Winner::Remote
    } else {
        Winner::Local
    }
}

/// Resolve a conflict between the local and remote version of one record.
pub fn resolve(
    local: &ConflictRecord,
    remote: &ConflictRecord,
    policy: ConflictPolicy,
) -> ConflictOutcome {
    match policy {
        ConflictPolicy::Chain => {
            if let Some(winner) = by_last_confirmed(local, remote) {
                return ConflictOutcome {
                    winner,
                    decided_by: DecidedBy::LastConfirmedWins,
                };
            }
            if let Some(winner) = by_confidence(local, remote) {
                return ConflictOutcome {
                    winner,
                    decided_by: DecidedBy::HighestConfidence,
                };
            }
            if let Some(winner) = by_updated_at(local, remote) {
                return ConflictOutcome {
                    winner,
                    decided_by: DecidedBy::LastWriterWins,
                };
            }
            ConflictOutcome {
                winner: by_source_priority(local, remote),
                decided_by: DecidedBy::SourcePriority,
            }
        }
        ConflictPolicy::LastConfirmedWins => match by_last_confirmed(local, remote) {
            Some(winner) => ConflictOutcome {
                winner,
                decided_by: DecidedBy::LastConfirmedWins,
            },
            None => ConflictOutcome {
                winner: by_source_priority(local, remote),
                decided_by: DecidedBy::SourcePriority,
            },
        },
        ConflictPolicy::HighestConfidence => match by_confidence(local, remote) {
            Some(winner) => ConflictOutcome {
                winner,
                decided_by: DecidedBy::HighestConfidence,
            },
            None => ConflictOutcome {
                winner: by_source_priority(local, remote),
                decided_by: DecidedBy::SourcePriority,
            },
        },
        ConflictPolicy::LastWriterWins => match by_updated_at(local, remote) {
            Some(winner) => ConflictOutcome {
                winner,
                decided_by: DecidedBy::LastWriterWins,
            },
            None => ConflictOutcome {
                winner: by_source_priority(local, remote),
                decided_by: DecidedBy::SourcePriority,
            },
        },
        ConflictPolicy::SourcePriority => ConflictOutcome {
            winner: by_source_priority(local, remote),
            decided_by: DecidedBy::SourcePriority,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(node: &str, updated: u64, confirmed: u64, confidence: f64) -> ConflictRecord {
        ConflictRecord {
            source_node: NodeId::new(node).unwrap(),
            updated_at: updated,
            last_confirmed_at: confirmed,
            confidence,
            sequence: 1,
        }
    }

    #[test]
    fn test_last_confirmed_takes_precedence() {
        let local = record("huginn", 100, 500, 0.1);
        let remote = record("muninn", 900, 400, 0.9);
        let out = resolve(&local, &remote, ConflictPolicy::Chain);
        assert_eq!(out.winner, Winner::Local);
        assert_eq!(out.decided_by, DecidedBy::LastConfirmedWins);
    }

    #[test]
    fn test_confidence_breaks_confirmed_tie() {
        let local = record("huginn", 100, 500, 0.4);
        let remote = record("muninn", 100, 500, 0.8);
        let out = resolve(&local, &remote, ConflictPolicy::Chain);
        assert_eq!(out.winner, Winner::Remote);
        assert_eq!(out.decided_by, DecidedBy::HighestConfidence);
    }

    #[test]
    fn test_updated_at_breaks_confidence_tie() {
        let local = record("huginn", 300, 500, 0.5);
        let remote = record("muninn", 200, 500, 0.5);
        let out = resolve(&local, &remote, ConflictPolicy::Chain);
        assert_eq!(out.winner, Winner::Local);
        assert_eq!(out.decided_by, DecidedBy::LastWriterWins);
    }

    #[test]
    fn test_source_priority_final_tiebreak() {
        // All scored fields equal: huginn < muninn, so huginn's side wins.
        let local = record("huginn", 100, 100, 0.5);
        let remote = record("muninn", 100, 100, 0.5);
        let out = resolve(&local, &remote, ConflictPolicy::Chain);
        assert_eq!(out.winner, Winner::Local);
        assert_eq!(out.decided_by, DecidedBy::SourcePriority);

        // Swap the sides: huginn is now remote and still wins.
        let out = resolve(&remote, &local, ConflictPolicy::Chain);
        assert_eq!(out.winner, Winner::Remote);
        assert_eq!(out.decided_by, DecidedBy::SourcePriority);
    }

    #[test]
    fn test_identical_ids_default_local() {
        let local = record("huginn", 100, 100, 0.5);
        let remote = record("huginn", 100, 100, 0.5);
        let out = resolve(&local, &remote, ConflictPolicy::Chain);
        assert_eq!(out.winner, Winner::Local);
    }

    #[test]
    fn test_antisymmetry_under_side_swap() {
        let cases = [
            (record("huginn", 10, 50, 0.3), record("muninn", 20, 40, 0.6)),
            (record("huginn", 10, 50, 0.3), record("muninn", 20, 50, 0.6)),
            (record("alpha", 10, 50, 0.6), record("beta", 20, 50, 0.6)),
            (record("alpha", 10, 50, 0.6), record("beta", 10, 50, 0.6)),
        ];
        for policy in [
            ConflictPolicy::Chain,
            ConflictPolicy::LastConfirmedWins,
            ConflictPolicy::HighestConfidence,
            ConflictPolicy::LastWriterWins,
            ConflictPolicy::SourcePriority,
        ] {
            for (a, b) in &cases {
                let forward = resolve(a, b, policy);
                let backward = resolve(b, a, policy);
                assert_eq!(
                    forward.winner == Winner::Local,
                    backward.winner == Winner::Remote,
                    "policy {policy:?} not antisymmetric for {a:?} vs {b:?}"
                );
            }
        }
    }

    #[test]
    fn test_single_rule_policies() {
        let local = record("huginn", 900, 100, 0.2);
        let remote = record("muninn", 100, 900, 0.8);

        let out = resolve(&local, &remote, ConflictPolicy::LastWriterWins);
        assert_eq!(out.winner, Winner::Local);
        assert_eq!(out.decided_by, DecidedBy::LastWriterWins);

        let out = resolve(&local, &remote, ConflictPolicy::HighestConfidence);
        assert_eq!(out.winner, Winner::Remote);

        let out = resolve(&local, &remote, ConflictPolicy::LastConfirmedWins);
        assert_eq!(out.winner, Winner::Remote);
    }

    #[test]
    fn test_single_rule_tie_falls_back_to_source_priority() {
        let local = record("muninn", 100, 100, 0.5);
        let remote = record("huginn", 100, 100, 0.5);
        let out = resolve(&local, &remote, ConflictPolicy::HighestConfidence);
        assert_eq!(out.winner, Winner::Remote);
        assert_eq!(out.decided_by, DecidedBy::SourcePriority);
    }

    #[test]
    fn test_determinism() {
        let local = record("huginn", 5, 5, 0.5);
        let remote = record("muninn", 5, 5, 0.5);
        let first = resolve(&local, &remote, ConflictPolicy::Chain);
        for _ in 0..10 {
            assert_eq!(resolve(&local, &remote, ConflictPolicy::Chain), first);
        }
    }
}
