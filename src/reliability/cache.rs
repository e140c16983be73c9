//! TTL result cache for idempotent tool calls.
//!
//! Keyed by tool name plus a 64-bit FNV-1a fingerprint of the canonical
//! argument JSON. One instance per tool (or per worker); no internal
//! locking.

use std::collections::HashMap;

use serde_json::Value;

use crate::tools::ToolResult;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Stable 64-bit fingerprint of a tool's arguments.
pub fn fingerprint_args(args: &Value) -> u64 {
    // serde_json renders object keys in a stable order for a given Value;
    // callers pass the same Value shape for the same logical call.
    let canonical = args.to_string();
    fnv1a(canonical.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tool: String,
    pub args_hash: u64,
}

impl CacheKey {
    pub fn new(tool: impl Into<String>, args: &Value) -> Self {
        Self {
            tool: tool.into(),
            args_hash: fingerprint_args(args),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ToolResult,
    created_ns: u64,
    ttl_ns: u64,
}

impl CacheEntry {
    /// `ttl_ns == 0` means permanent. A clock that went backwards makes the
    /// entry look younger than it is; that is treated as still valid.
    fn is_fresh(&self, now_ns: u64) -> bool {
        if self.ttl_ns == 0 {
            return true;
        }
        match now_ns.checked_sub(self.created_ns) {
            Some(age) => age <= self.ttl_ns,
            None => true,
        }
    }
}

/// Bounded TTL cache. At capacity, the oldest entry (by insertion time)
/// is evicted.
#[derive(Debug)]
pub struct ToolCache {
    entries: HashMap<CacheKey, CacheEntry>,
    capacity: usize,
    default_ttl_ns: u64,
}

impl ToolCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            default_ttl_ns: 0,
        }
    }

    /// TTL applied by the reliability envelope on insert; 0 = permanent.
    pub fn with_default_ttl(mut self, ttl_ns: u64) -> Self {
        self.default_ttl_ns = ttl_ns;
        self
    }

    pub fn default_ttl_ns(&self) -> u64 {
        self.default_ttl_ns
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a fresh entry. Expired entries are removed on the way.
    pub fn get(&mut self, key: &CacheKey, now_ns: u64) -> Option<ToolResult> {
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh(now_ns) => Some(entry.result.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: CacheKey, result: ToolResult, ttl_ns: u64, now_ns: u64) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                result,
                created_ns: now_ns,
                ttl_ns,
            },
        );
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.created_ns)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
