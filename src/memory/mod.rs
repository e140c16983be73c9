//! Typed memory records and the backend seam.
//!
//! Records carry a kind (semantic / episodic / procedural) and a tier
//! (pinned / standard / ephemeral); recall ranks candidates by decayed
//! confidence blended with recency. Concrete persistence (SQLite, …) lives
//! behind [`MemoryBackend`]; the in-memory implementation here backs recall
//! ranking, snapshot export, and tests.

pub mod decay;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use decay::{combined_relevance, default_half_life_hours, effective_confidence, recency_score};

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Long-lived fact.
    Semantic,
    /// Short-lived experience.
    Episodic,
    /// Reusable procedure.
    Procedural,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Episodic => "episodic",
            Self::Procedural => "procedural",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "semantic" => Some(Self::Semantic),
            "episodic" => Some(Self::Episodic),
            "procedural" => Some(Self::Procedural),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Never pruned, never decays.
    Pinned,
    Standard,
    /// Aggressive decay, first to be pruned.
    Ephemeral,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pinned => "pinned",
            Self::Standard => "standard",
            Self::Ephemeral => "ephemeral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pinned" => Some(Self::Pinned),
            "standard" => Some(Self::Standard),
            "ephemeral" => Some(Self::Ephemeral),
            _ => None,
        }
    }
}

/// Where a memory came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySource {
    /// Producing component: a channel name, "llm", "user", ...
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub key: String,
    pub content: String,
    pub kind: MemoryKind,
    pub tier: MemoryTier,
    /// Free-form grouping label carried through sync and snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub source: MemorySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Milliseconds since epoch.
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<u64>,
}

impl MemoryRecord {
    pub fn new(
        key: impl Into<String>,
        content: impl Into<String>,
        kind: MemoryKind,
        tier: MemoryTier,
        source: MemorySource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: key.into(),
            content: content.into(),
            kind,
            tier,
            category: None,
            source,
            confidence: None,
            created_at: now_ms(),
            last_accessed: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Combined relevance at `now_ms`: decayed confidence (elapsed since
    /// creation) blended with recency (elapsed since last access).
    pub fn relevance(&self, now_ms: u64, alpha: f64) -> f64 {
        let initial = self.confidence.unwrap_or(0.5);
        let age_hours = elapsed_hours(self.created_at, now_ms);
        let decayed = effective_confidence(self.kind, self.tier, initial, age_hours);

        let accessed = self.last_accessed.unwrap_or(self.created_at);
        let recency = recency_score(
            elapsed_hours(accessed, now_ms),
            default_half_life_hours(self.kind),
        );
        combined_relevance(decayed, recency, alpha)
    }
}

fn elapsed_hours(from_ms: u64, to_ms: u64) -> f64 {
    (to_ms.saturating_sub(from_ms)) as f64 / 3_600_000.0
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory backend error: {0}")]
    Backend(String),
    #[error("memory io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared recall ranking: substring match on key/content, ordered by
/// combined relevance (best first), key as the deterministic tiebreak.
pub(crate) fn rank_records(
    records: impl Iterator<Item = MemoryRecord>,
    query: &str,
    limit: usize,
    alpha: f64,
    now_ms: u64,
) -> Vec<MemoryRecord> {
    let query = query.to_lowercase();
    let mut hits: Vec<(f64, MemoryRecord)> = records
        .filter(|r| {
            query.is_empty()
                || r.key.to_lowercase().contains(&query)
                || r.content.to_lowercase().contains(&query)
        })
        .map(|r| (r.relevance(now_ms, alpha), r))
        .collect();
    hits.sort_by(|(a, ra), (b, rb)| {
        b.partial_cmp(a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ra.key.cmp(&rb.key))
    });
    hits.into_iter().take(limit).map(|(_, r)| r).collect()
}

/// Persistence seam. SQLite and other concrete backends are external
/// collaborators implementing this trait.
pub trait MemoryBackend: Send + Sync {
    fn store(&self, record: MemoryRecord) -> Result<(), MemoryError>;
    fn list(&self) -> Result<Vec<MemoryRecord>, MemoryError>;
    fn count(&self) -> Result<usize, MemoryError>;
    /// Substring recall ranked by combined relevance, best first.
    fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError>;
    /// Returns whether a record with that key existed.
    fn forget(&self, key: &str) -> Result<bool, MemoryError>;
}

/// Map-backed reference backend.
pub struct InMemoryBackend {
    records: Mutex<HashMap<String, MemoryRecord>>,
    alpha: f64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            alpha: decay::DEFAULT_ALPHA,
        }
    }

    /// Drop non-pinned records whose relevance fell below `threshold`.
    /// Returns the removed keys.
    pub fn prune_below(&self, threshold: f64, now_ms: u64) -> Vec<String> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<String> = records
            .values()
            .filter(|r| r.tier != MemoryTier::Pinned && r.relevance(now_ms, self.alpha) < threshold)
            .map(|r| r.key.clone())
            .collect();
        for key in &doomed {
            records.remove(key);
        }
        doomed
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend for InMemoryBackend {
    fn store(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.key.clone(), record);
        Ok(())
    }

    fn list(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<MemoryRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    fn count(&self) -> Result<usize, MemoryError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.len())
    }

    fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rank_records(
            records.values().cloned(),
            query,
            limit,
            self.alpha,
            now_ms(),
        ))
    }

    fn forget(&self, key: &str) -> Result<bool, MemoryError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, content: &str, kind: MemoryKind, tier: MemoryTier) -> MemoryRecord {
        MemoryRecord::new(
            key,
            content,
            kind,
            tier,
            MemorySource {
                origin: "test".into(),
                context_id: None,
                tool_tag: None,
            },
        )
    }

    #[test]
    fn test_store_count_forget() {
        let backend = InMemoryBackend::new();
        backend
            .store(record("k1", "alpha", MemoryKind::Semantic, MemoryTier::Standard))
            .unwrap();
        backend
            .store(record("k2", "beta", MemoryKind::Episodic, MemoryTier::Ephemeral))
            .unwrap();
        assert_eq!(backend.count().unwrap(), 2);
        assert!(backend.forget("k1").unwrap());
        assert!(!backend.forget("k1").unwrap());
        assert_eq!(backend.count().unwrap(), 1);
    }

    #[test]
    fn test_store_overwrites_by_key() {
        let backend = InMemoryBackend::new();
        backend
            .store(record("k", "old", MemoryKind::Semantic, MemoryTier::Standard))
            .unwrap();
        backend
            .store(record("k", "new", MemoryKind::Semantic, MemoryTier::Standard))
            .unwrap();
        assert_eq!(backend.count().unwrap(), 1);
        assert_eq!(backend.list().unwrap()[0].content, "new");
    }

    #[test]
    fn test_recall_matches_key_and_content() {
        let backend = InMemoryBackend::new();
        backend
            .store(record("deploy-notes", "staging first", MemoryKind::Procedural, MemoryTier::Standard))
            .unwrap();
        backend
            .store(record("owner", "the deploy owner is uli", MemoryKind::Semantic, MemoryTier::Standard))
            .unwrap();
        backend
            .store(record("lunch", "soup", MemoryKind::Episodic, MemoryTier::Ephemeral))
            .unwrap();

        let hits = backend.recall("deploy", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(backend.recall("DEPLOY", 10).unwrap().len() == 2);
    }

    #[test]
    fn test_recall_ranks_fresh_over_stale() {
        let backend = InMemoryBackend::new();
        let mut stale = record("stale", "shared topic", MemoryKind::Episodic, MemoryTier::Standard)
            .with_confidence(0.9);
        // Pretend it is three weeks old and never touched since.
        stale.created_at = now_ms().saturating_sub(21 * 24 * 3_600_000);
        let fresh = record("fresh", "shared topic", MemoryKind::Episodic, MemoryTier::Standard)
            .with_confidence(0.9);
        backend.store(stale).unwrap();
        backend.store(fresh).unwrap();

        let hits = backend.recall("shared topic", 2).unwrap();
        assert_eq!(hits[0].key, "fresh");
        assert_eq!(hits[1].key, "stale");
    }

    #[test]
    fn test_recall_limit() {
        let backend = InMemoryBackend::new();
        for i in 0..10 {
            backend
                .store(record(
                    &format!("k{i}"),
                    "same",
                    MemoryKind::Semantic,
                    MemoryTier::Standard,
                ))
                .unwrap();
        }
        assert_eq!(backend.recall("same", 3).unwrap().len(), 3);
    }

    #[test]
    fn test_prune_spares_pinned() {
        let backend = InMemoryBackend::new();
        let mut old_pinned =
            record("pinned", "keep", MemoryKind::Episodic, MemoryTier::Pinned).with_confidence(0.9);
        let mut old_eph = record("eph", "drop", MemoryKind::Episodic, MemoryTier::Ephemeral)
            .with_confidence(0.9);
        let year_ago = now_ms().saturating_sub(365 * 24 * 3_600_000);
        old_pinned.created_at = year_ago;
        old_eph.created_at = year_ago;
        backend.store(old_pinned).unwrap();
        backend.store(old_eph).unwrap();

        let removed = backend.prune_below(0.5, now_ms());
        assert_eq!(removed, vec!["eph".to_string()]);
        assert_eq!(backend.count().unwrap(), 1);
    }

    #[test]
    fn test_confidence_clamped() {
        let r = record("k", "c", MemoryKind::Semantic, MemoryTier::Standard).with_confidence(7.0);
        assert_eq!(r.confidence, Some(1.0));
    }
}
