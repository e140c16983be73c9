//! JSONL file-backed memory store.
//!
//! Append-only log of put/forget entries, one JSON object per line. Every
//! write opens the file, appends, and closes; the live view is rebuilt by
//! replaying the log, last entry per key winning. `compact` rewrites the
//! file with only the live records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use super::{rank_records, MemoryBackend, MemoryError, MemoryRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Put { record: MemoryRecord },
    Forget { key: String },
}

/// Disk-backed reference backend for local-first deployments.
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
    alpha: f64,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
            alpha: super::decay::DEFAULT_ALPHA,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn append_entry(&self, entry: &LogEntry) -> Result<(), MemoryError> {
        let line = serde_json::to_string(entry)
            .map_err(|e| MemoryError::Backend(e.to_string()))?;
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Replay the log into the live view. Unparseable lines are skipped so
    /// a torn tail write cannot brick the store.
    fn replay(&self) -> Result<HashMap<String, MemoryRecord>, MemoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut live = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(trimmed) {
                Ok(LogEntry::Put { record }) => {
                    live.insert(record.key.clone(), record);
                }
                Ok(LogEntry::Forget { key }) => {
                    live.remove(&key);
                }
                Err(_) => continue,
            }
        }
        Ok(live)
    }

    /// Rewrite the log so it contains exactly one put per live record.
    /// Returns the number of live records kept.
    pub fn compact(&self) -> Result<usize, MemoryError> {
        let live = self.replay()?;
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            let mut records: Vec<&MemoryRecord> = live.values().collect();
            records.sort_by(|a, b| a.key.cmp(&b.key));
            for record in records {
                let entry = LogEntry::Put {
                    record: record.clone(),
                };
                let line = serde_json::to_string(&entry)
                    .map_err(|e| MemoryError::Backend(e.to_string()))?;
                writeln!(file, "{line}")?;
            }
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(live.len())
    }
}

impl MemoryBackend for FileBackend {
    fn store(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        self.append_entry(&LogEntry::Put { record })
    }

    fn list(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        let live = self.replay()?;
        let mut all: Vec<MemoryRecord> = live.into_values().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.replay()?.len())
    }

    fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        let live = self.replay()?;
        Ok(rank_records(
            live.into_values(),
            query,
            limit,
            self.alpha,
            now_ms(),
        ))
    }

    fn forget(&self, key: &str) -> Result<bool, MemoryError> {
        let existed = self.replay()?.contains_key(key);
        if existed {
            self.append_entry(&LogEntry::Forget {
                key: key.to_string(),
            })?;
        }
        Ok(existed)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
