//! Append-only JSONL timeline: the structured audit trail every other
//! subsystem writes into.
//!
//! One JSON object per line. Appends go through a store-wide mutex and an
//! open-write-close cycle per event: no file descriptor is held across idle
//! time, and a crash can lose at most the line being written. Events that do
//! not fit the fixed serialization buffer are dropped and the caller is told.

pub mod budget;
pub mod replay;

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Serialization ceiling for a single event line, newline included.
pub const EVENT_BUF_LEN: usize = 4096;

/// What part of the runtime an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Agent,
    Llm,
    Tool,
    Channel,
    Task,
    Memory,
    System,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Channel => "channel",
            Self::Task => "task",
            Self::Memory => "memory",
            Self::System => "system",
        }
    }

    /// Parse a kind string from a replayed line. Unknown kinds map to
    /// `System` so a newer writer does not make old logs unreadable.
    pub fn parse(s: &str) -> Self {
        match s {
            "agent" => Self::Agent,
            "llm" => Self::Llm,
            "tool" => Self::Tool,
            "channel" => Self::Channel,
            "task" => Self::Task,
            "memory" => Self::Memory,
            _ => Self::System,
        }
    }

    pub const ALL: [EventKind; 7] = [
        Self::Agent,
        Self::Llm,
        Self::Tool,
        Self::Channel,
        Self::Task,
        Self::Memory,
        Self::System,
    ];
}

/// Event severity, ordered so filters can compare ordinally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "debug" => Self::Debug,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// A single timeline event.
///
/// Field order matters: the writer serializes fields in declaration order and
/// the replay parser extracts them positionally from the line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: String,
    /// Nanoseconds since the epoch.
    pub ts: u64,
    pub kind: EventKind,
    pub severity: Severity,
    /// Dotted event name, e.g. `tool.execute` or `sync.heartbeat`.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ns: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

impl TimelineEvent {
    pub fn new(
        id: impl Into<String>,
        ts: u64,
        kind: EventKind,
        severity: Severity,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ts,
            kind,
            severity,
            name: name.into(),
            session_id: None,
            task_id: None,
            span_id: None,
            parent_span_id: None,
            duration_ns: None,
            message: None,
            component: None,
        }
    }

    /// Render the event as a single JSON line (no trailing newline), or
    /// `None` when the rendered line would not fit `EVENT_BUF_LEN`.
    pub fn format_json_line(&self) -> Option<String> {
        let line = serde_json::to_string(self).ok()?;
        if line.len() + 1 > EVENT_BUF_LEN {
            return None;
        }
        Some(line)
    }
}

/// Outcome of an append: the event was written, or it exceeded the size
/// ceiling and was dropped without a partial write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStatus {
    Written,
    Dropped,
}

/// Errors from the timeline store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("timeline io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mutex-protected JSONL append store.
pub struct TimelineStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    seq: AtomicU64,
}

impl TimelineStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Lock-free monotonic counter for event id generation. Ids built from
    /// this counter are never reused within the store's lifetime.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Convenience: a fresh event id from the sequence counter.
    pub fn next_event_id(&self) -> String {
        format!("ev-{:016x}", self.next_seq())
    }

    /// Append one event as a JSON line. The file is opened (created if
    /// missing), the line plus newline written, and the handle closed before
    /// returning. Oversize events report `Dropped` and write nothing.
    pub fn append(&self, event: &TimelineEvent) -> Result<AppendStatus, StoreError> {
        let line = match event.format_json_line() {
            Some(line) => line,
            None => return Ok(AppendStatus::Dropped),
        };

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(AppendStatus::Written)
    }
}
