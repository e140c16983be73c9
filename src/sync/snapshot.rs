//! Schema-versioned hub snapshot import/export.
//!
//! A snapshot moves a node's memory between peers in one document. The
//! format magic and schema version are checked before anything else; a
//! rejected document imports nothing. Individual malformed entries are
//! skipped and counted, never fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::NodeId;
use crate::memory::{MemoryBackend, MemoryError, MemoryKind, MemoryRecord, MemorySource, MemoryTier};

/// Format magic every hub snapshot carries.
pub const SNAPSHOT_MAGIC: &str = "nullclaw-hub-snapshot";

/// Current snapshot schema version.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSnapshotMeta {
    pub schema_version: u32,
    pub format: String,
    pub source_node: NodeId,
    pub created_at: u64,
    pub entry_count: usize,
}

/// One exported memory. Kind, tier, confidence, and source metadata survive
/// the round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSnapshotEntry {
    pub key: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub kind: MemoryKind,
    pub tier: MemoryTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source: MemorySource,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSnapshot {
    pub meta: HubSnapshotMeta,
    pub entries: Vec<HubSnapshotEntry>,
}

impl HubSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is not a JSON object")]
    Malformed,
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Why an import was rejected wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportRejection {
    BadFormat,
    UnsupportedSchema,
}

/// Outcome of one import pass. `schema_version` is reported as received so
/// callers can log what the peer actually sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<ImportRejection>,
}

/// Export every record in the backend as a snapshot document.
pub fn export_hub_snapshot(
    backend: &dyn MemoryBackend,
    source_node: NodeId,
) -> Result<HubSnapshot, MemoryError> {
    let records = backend.list()?;
    let entries: Vec<HubSnapshotEntry> = records
        .into_iter()
        .map(|r| HubSnapshotEntry {
            key: r.key,
            content: r.content,
            category: r.category,
            kind: r.kind,
            tier: r.tier,
            confidence: r.confidence,
            source: r.source,
            created_at: r.created_at,
        })
        .collect();

    Ok(HubSnapshot {
        meta: HubSnapshotMeta {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            format: SNAPSHOT_MAGIC.to_string(),
            source_node,
            created_at: super::now_ms(),
            entry_count: entries.len(),
        },
        entries,
    })
}

/// Import a snapshot document into the backend.
///
/// A missing or mismatched format magic, or a schema version other than the
/// supported one, rejects the whole document with nothing imported or
/// skipped. Otherwise each entry is validated independently.
pub fn import_hub_snapshot(
    json: &str,
    backend: &dyn MemoryBackend,
) -> Result<ImportReport, SnapshotError> {
    let doc: Value = serde_json::from_str(json).map_err(|_| SnapshotError::Malformed)?;
    let meta = doc.get("meta").ok_or(SnapshotError::Malformed)?;

    let schema_version = meta
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;

    let format = meta.get("format").and_then(Value::as_str).unwrap_or("");
    if format != SNAPSHOT_MAGIC {
        warn!(format, "rejecting snapshot with unknown format magic");
        return Ok(ImportReport {
            imported: 0,
            skipped: 0,
            schema_version,
            rejection: Some(ImportRejection::BadFormat),
        });
    }
    if schema_version != SNAPSHOT_SCHEMA_VERSION {
        warn!(schema_version, "rejecting snapshot with unsupported schema");
        return Ok(ImportReport {
            imported: 0,
            skipped: 0,
            schema_version,
            rejection: Some(ImportRejection::UnsupportedSchema),
        });
    }

    let entries = match doc.get("entries").and_then(Value::as_array) {
        Some(entries) => entries,
        None => {
            return Ok(ImportReport {
                imported: 0,
                skipped: 0,
                schema_version,
                rejection: None,
            })
        }
    };

    let mut imported = 0;
    let mut skipped = 0;
    for raw in entries {
        let entry: HubSnapshotEntry = match serde_json::from_value(raw.clone()) {
            Ok(entry) => entry,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        if entry.key.is_empty() {
            skipped += 1;
            continue;
        }
        let mut record = MemoryRecord::new(
            entry.key,
            entry.content,
            entry.kind,
            entry.tier,
            entry.source,
        );
        record.category = entry.category;
        record.confidence = entry.confidence.map(|c| c.clamp(0.0, 1.0));
        record.created_at = entry.created_at;
        backend.store(record)?;
        imported += 1;
    }

    Ok(ImportReport {
        imported,
        skipped,
        schema_version,
        rejection: None,
    })
}
