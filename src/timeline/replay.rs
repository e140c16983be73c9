//! Replay reader for timeline JSONL files.
//!
//! The hot path is a streaming scan over a fixed-size buffer with positional
//! substring extraction for the known schema, no generic JSON parse per
//! line. Malformed or foreign lines are skipped, never fatal.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use super::{EventKind, Severity, TimelineEvent};

/// Default scan buffer. Larger than the writer's 4096-byte line ceiling so a
/// well-formed line always fits.
pub const DEFAULT_SCAN_BUF: usize = 8192;

/// Extract the string value for `key` by positional search.
fn extract_str(line: &str, key: &str) -> Option<String> {
    let needle = format!("\"{key}\":\"");
    let start = line.find(&needle)? + needle.len();
    let rest = &line[start..];

    let mut out = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(out),
            '\\' => match chars.next()? {
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                '/' => out.push('/'),
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'u' => {
                    let hex: String = chars.by_ref().take(4).collect();
                    let code = u32::from_str_radix(&hex, 16).ok()?;
                    out.push(char::from_u32(code)?);
                }
                _ => return None,
            },
            _ => out.push(c),
        }
    }
    None
}

/// Extract an unsigned integer value for `key` by positional search.
fn extract_u64(line: &str, key: &str) -> Option<u64> {
    let needle = format!("\"{key}\":");
    let start = line.find(&needle)? + needle.len();
    let digits: String = line[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Parse one JSONL line into an event. Returns `None` for lines that are too
/// short, not objects, or missing a required field (id, ts, name).
pub fn parse_event_line(line: &str) -> Option<TimelineEvent> {
    let line = line.trim_end();
    if line.len() < 2 || !line.starts_with('{') {
        return None;
    }

    let id = extract_str(line, "id")?;
    let ts = extract_u64(line, "ts")?;
    let name = extract_str(line, "name")?;
    let kind = extract_str(line, "kind")
        .map(|s| EventKind::parse(&s))
        .unwrap_or(EventKind::System);
    let severity = extract_str(line, "severity")
        .map(|s| Severity::parse(&s))
        .unwrap_or(Severity::Info);

    let mut event = TimelineEvent::new(id, ts, kind, severity, name);
    event.session_id = extract_str(line, "session_id");
    event.task_id = extract_str(line, "task_id");
    event.span_id = extract_str(line, "span_id");
    event.parent_span_id = extract_str(line, "parent_span_id");
    event.duration_ns = extract_u64(line, "duration_ns");
    event.message = extract_str(line, "message");
    event.component = extract_str(line, "component");
    Some(event)
}

/// Event filter: all present criteria must hold.
#[derive(Debug, Clone, Default)]
pub struct ReplayFilter {
    pub kind: Option<EventKind>,
    /// Keep events at or above this severity (ordinal comparison).
    pub min_severity: Option<Severity>,
    pub session_id: Option<String>,
    /// Inclusive nanosecond range.
    pub ts_min: Option<u64>,
    pub ts_max: Option<u64>,
}

impl ReplayFilter {
    pub fn matches(&self, event: &TimelineEvent) -> bool {
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        if let Some(session) = &self.session_id {
            if event.session_id.as_deref() != Some(session.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.ts_min {
            if event.ts < min {
                return false;
            }
        }
        if let Some(max) = self.ts_max {
            if event.ts > max {
                return false;
            }
        }
        true
    }
}

/// Counters from one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub lines_seen: u64,
    pub parsed: u64,
    pub skipped: u64,
}

/// Aggregate view of a filtered event stream.
#[derive(Debug, Clone, Default)]
pub struct ReplaySessionSummary {
    pub events_total: u64,
    pub by_kind: std::collections::HashMap<EventKind, u64>,
    pub by_severity: std::collections::HashMap<Severity, u64>,
    pub earliest_ts: Option<u64>,
    pub latest_ts: Option<u64>,
}

impl ReplaySessionSummary {
    pub fn add(&mut self, event: &TimelineEvent) {
        self.events_total += 1;
        *self.by_kind.entry(event.kind).or_insert(0) += 1;
        *self.by_severity.entry(event.severity).or_insert(0) += 1;
        self.earliest_ts = Some(match self.earliest_ts {
            Some(t) => t.min(event.ts),
            None => event.ts,
        });
        self.latest_ts = Some(match self.latest_ts {
            Some(t) => t.max(event.ts),
            None => event.ts,
        });
    }

    /// Span between the earliest and latest event, in nanoseconds.
    pub fn duration_ns(&self) -> u64 {
        match (self.earliest_ts, self.latest_ts) {
            (Some(a), Some(b)) => b.saturating_sub(a),
            _ => 0,
        }
    }
}

/// Streaming reader over a timeline file.
pub struct ReplayReader {
    path: PathBuf,
    buf_size: usize,
}

impl ReplayReader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            buf_size: DEFAULT_SCAN_BUF,
        }
    }

    pub fn with_buf_size(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size.max(64);
        self
    }

    /// Scan the file, invoking `f` for every event the filter accepts.
    ///
    /// Lines longer than the scan buffer are discarded up to the next
    /// newline: per-line cost stays bounded by the buffer size.
    pub fn scan<F>(&self, filter: &ReplayFilter, mut f: F) -> std::io::Result<ScanStats>
    where
        F: FnMut(TimelineEvent),
    {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ScanStats::default())
            }
            Err(e) => return Err(e),
        };

        let mut stats = ScanStats::default();
        let mut buf = vec![0u8; self.buf_size];
        let mut carry: Vec<u8> = Vec::with_capacity(self.buf_size);
        let mut discarding = false;

        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            for &byte in &buf[..n] {
                if byte == b'\n' {
                    if discarding {
                        discarding = false;
                        stats.lines_seen += 1;
                        stats.skipped += 1;
                    } else {
                        Self::consume_line(&carry, filter, &mut f, &mut stats);
                    }
                    carry.clear();
                } else if !discarding {
                    if carry.len() >= self.buf_size {
                        // Oversized foreign line; skip to next newline.
                        discarding = true;
                        carry.clear();
                    } else {
                        carry.push(byte);
                    }
                }
            }
        }
        if !carry.is_empty() && !discarding {
            Self::consume_line(&carry, filter, &mut f, &mut stats);
        }
        Ok(stats)
    }

    fn consume_line<F>(raw: &[u8], filter: &ReplayFilter, f: &mut F, stats: &mut ScanStats)
    where
        F: FnMut(TimelineEvent),
    {
        if raw.is_empty() {
            return;
        }
        stats.lines_seen += 1;
        let line = match std::str::from_utf8(raw) {
            Ok(s) => s,
            Err(_) => {
                stats.skipped += 1;
                return;
            }
        };
        match parse_event_line(line) {
            Some(event) if filter.matches(&event) => {
                stats.parsed += 1;
                f(event);
            }
            Some(_) => {
                stats.parsed += 1;
            }
            None => {
                stats.skipped += 1;
            }
        }
    }

    /// Collect every event the filter accepts.
    pub fn read_filtered(&self, filter: &ReplayFilter) -> std::io::Result<Vec<TimelineEvent>> {
        let mut events = Vec::new();
        self.scan(filter, |e| events.push(e))?;
        Ok(events)
    }

    /// Build a session summary over the filtered stream.
    pub fn summarize(&self, filter: &ReplayFilter) -> std::io::Result<ReplaySessionSummary> {
        let mut summary = ReplaySessionSummary::default();
        self.scan(filter, |e| summary.add(&e))?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{AppendStatus, TimelineStore};
    use tempfile::tempdir;

    fn event(id: &str, ts: u64, kind: EventKind, severity: Severity) -> TimelineEvent {
        TimelineEvent::new(id, ts, kind, severity, "test.event")
    }

    #[test]
    fn test_parse_minimal_line() {
        let line = r#"{"id":"ev-1","ts":123,"kind":"tool","severity":"warn","name":"tool.run"}"#;
        let ev = parse_event_line(line).unwrap();
        assert_eq!(ev.id, "ev-1");
        assert_eq!(ev.ts, 123);
        assert_eq!(ev.kind, EventKind::Tool);
        assert_eq!(ev.severity, Severity::Warn);
        assert_eq!(ev.name, "tool.run");
        assert!(ev.session_id.is_none());
    }

    #[test]
    fn test_parse_rejects_short_and_non_object() {
        assert!(parse_event_line("").is_none());
        assert!(parse_event_line("{").is_none());
        assert!(parse_event_line("not json").is_none());
        assert!(parse_event_line("[1,2]").is_none());
    }

    #[test]
    fn test_parse_rejects_missing_required_fields() {
        // No id.
        assert!(parse_event_line(r#"{"ts":1,"kind":"tool","severity":"info","name":"x"}"#).is_none());
        // No ts.
        assert!(parse_event_line(r#"{"id":"a","kind":"tool","severity":"info","name":"x"}"#).is_none());
        // No name.
        assert!(parse_event_line(r#"{"id":"a","ts":1,"kind":"tool","severity":"info"}"#).is_none());
    }

    #[test]
    fn test_parse_escaped_message() {
        let line = r#"{"id":"a","ts":5,"kind":"system","severity":"info","name":"n","message":"line1\nline2 \"quoted\""}"#;
        let ev = parse_event_line(line).unwrap();
        assert_eq!(ev.message.as_deref(), Some("line1\nline2 \"quoted\""));
    }

    #[test]
    fn test_write_then_parse_round_trip() {
        let mut ev = event("ev-rt", 987654321, EventKind::Llm, Severity::Error);
        ev.session_id = Some("sess-1".into());
        ev.task_id = Some("task-9".into());
        ev.duration_ns = Some(42_000);
        ev.message = Some("provider \"x\" failed\nretrying".into());
        ev.component = Some("llm.client".into());

        let line = ev.format_json_line().unwrap();
        let parsed = parse_event_line(&line).unwrap();
        assert_eq!(parsed, ev);
    }

    #[test]
    fn test_filter_kind_and_severity() {
        let filter = ReplayFilter {
            kind: Some(EventKind::Tool),
            min_severity: Some(Severity::Warn),
            ..Default::default()
        };
        assert!(filter.matches(&event("a", 1, EventKind::Tool, Severity::Error)));
        assert!(!filter.matches(&event("b", 1, EventKind::Tool, Severity::Info)));
        assert!(!filter.matches(&event("c", 1, EventKind::Llm, Severity::Error)));
    }

    #[test]
    fn test_filter_time_range_inclusive() {
        let filter = ReplayFilter {
            ts_min: Some(10),
            ts_max: Some(20),
            ..Default::default()
        };
        assert!(filter.matches(&event("a", 10, EventKind::Agent, Severity::Info)));
        assert!(filter.matches(&event("b", 20, EventKind::Agent, Severity::Info)));
        assert!(!filter.matches(&event("c", 9, EventKind::Agent, Severity::Info)));
        assert!(!filter.matches(&event("d", 21, EventKind::Agent, Severity::Info)));
    }

    #[test]
    fn test_scan_store_file_with_junk_lines() {
        let dir = tempdir().unwrap();
        let store = TimelineStore::new(dir.path().join("t.jsonl"));
        for i in 0..5u64 {
            let status = store
                .append(&event(&format!("ev-{i}"), i, EventKind::Task, Severity::Info))
                .unwrap();
            assert_eq!(status, AppendStatus::Written);
        }
        // Foreign junk between valid lines.
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(store.path())
                .unwrap();
            writeln!(f, "garbage line").unwrap();
            writeln!(f, "{{\"id\":\"no-ts\",\"name\":\"x\"}}").unwrap();
        }

        let reader = ReplayReader::new(store.path().to_path_buf());
        let events = reader.read_filtered(&ReplayFilter::default()).unwrap();
        assert_eq!(events.len(), 5);

        let stats = reader.scan(&ReplayFilter::default(), |_| {}).unwrap();
        assert_eq!(stats.lines_seen, 7);
        assert_eq!(stats.parsed, 5);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn test_scan_missing_file_is_empty() {
        let reader = ReplayReader::new(PathBuf::from("/nonexistent/timeline.jsonl"));
        let events = reader.read_filtered(&ReplayFilter::default()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_oversized_line_skipped_with_small_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        {
            use std::io::Write;
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "{}", "x".repeat(500)).unwrap();
            writeln!(
                f,
                "{}",
                r#"{"id":"ok","ts":1,"kind":"agent","severity":"info","name":"n"}"#
            )
            .unwrap();
        }
        let reader = ReplayReader::new(path).with_buf_size(128);
        let events = reader.read_filtered(&ReplayFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "ok");
    }

    #[test]
    fn test_summary_counts_and_duration() {
        let dir = tempdir().unwrap();
        let store = TimelineStore::new(dir.path().join("t.jsonl"));
        store
            .append(&event("a", 100, EventKind::Llm, Severity::Info))
            .unwrap();
        store
            .append(&event("b", 400, EventKind::Llm, Severity::Error))
            .unwrap();
        store
            .append(&event("c", 250, EventKind::Tool, Severity::Warn))
            .unwrap();

        let reader = ReplayReader::new(store.path().to_path_buf());
        let summary = reader.summarize(&ReplayFilter::default()).unwrap();
        assert_eq!(summary.events_total, 3);
        assert_eq!(summary.by_kind[&EventKind::Llm], 2);
        assert_eq!(summary.by_kind[&EventKind::Tool], 1);
        assert_eq!(summary.by_severity[&Severity::Warn], 1);
        assert_eq!(summary.earliest_ts, Some(100));
        assert_eq!(summary.latest_ts, Some(400));
        assert_eq!(summary.duration_ns(), 300);
    }
}
