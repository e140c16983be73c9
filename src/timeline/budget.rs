//! Budget metrics: pure aggregation over filtered timeline events.

use serde::{Deserialize, Serialize};

use super::{EventKind, Severity, TimelineEvent};

/// Token/cost totals supplied by an external cost tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Collaborator seam: the provider-side accounting lives elsewhere.
pub trait CostTracker: Send + Sync {
    fn summary(&self) -> CostSummary;
}

/// Latency aggregate for one event kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
}

impl LatencyStats {
    pub fn record(&mut self, duration_ns: u64) {
        if self.count == 0 {
            self.min_ns = duration_ns;
            self.max_ns = duration_ns;
        } else {
            self.min_ns = self.min_ns.min(duration_ns);
            self.max_ns = self.max_ns.max(duration_ns);
        }
        self.count += 1;
        self.total_ns += duration_ns;
    }

    pub fn mean_ns(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ns / self.count
        }
    }
}

/// One budget report: cost, per-kind latency, error rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub cost: CostSummary,
    pub llm_latency: LatencyStats,
    pub tool_latency: LatencyStats,
    pub events_total: u64,
    pub events_error: u64,
}

impl BudgetReport {
    /// Errors divided by total events; 0.0 on an empty stream.
    pub fn error_rate(&self) -> f64 {
        if self.events_total == 0 {
            0.0
        } else {
            self.events_error as f64 / self.events_total as f64
        }
    }
}

/// Aggregate a slice of (already filtered) events plus a cost tracker.
pub fn build_report(events: &[TimelineEvent], tracker: &dyn CostTracker) -> BudgetReport {
    let mut report = BudgetReport {
        cost: tracker.summary(),
        ..Default::default()
    };

    for event in events {
        report.events_total += 1;
        if event.severity == Severity::Error {
            report.events_error += 1;
        }
        if let Some(duration) = event.duration_ns {
            match event.kind {
                EventKind::Llm => report.llm_latency.record(duration),
                EventKind::Tool => report.tool_latency.record(duration),
                _ => {}
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTracker(CostSummary);

    impl CostTracker for FixedTracker {
        fn summary(&self) -> CostSummary {
            self.0
        }
    }

    fn event(kind: EventKind, severity: Severity, duration_ns: Option<u64>) -> TimelineEvent {
        let mut ev = TimelineEvent::new("ev", 1, kind, severity, "n");
        ev.duration_ns = duration_ns;
        ev
    }

    #[test]
    fn test_latency_stats() {
        let mut stats = LatencyStats::default();
        stats.record(100);
        stats.record(300);
        stats.record(200);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_ns, 100);
        assert_eq!(stats.max_ns, 300);
        assert_eq!(stats.mean_ns(), 200);
    }

    #[test]
    fn test_empty_report() {
        let tracker = FixedTracker(CostSummary::default());
        let report = build_report(&[], &tracker);
        assert_eq!(report.events_total, 0);
        assert_eq!(report.error_rate(), 0.0);
        assert_eq!(report.llm_latency.count, 0);
    }

    #[test]
    fn test_report_splits_latency_by_kind() {
        let tracker = FixedTracker(CostSummary {
            requests: 2,
            input_tokens: 10,
            output_tokens: 20,
            cost_usd: 0.5,
        });
        let events = vec![
            event(EventKind::Llm, Severity::Info, Some(1_000)),
            event(EventKind::Llm, Severity::Error, Some(3_000)),
            event(EventKind::Tool, Severity::Info, Some(500)),
            event(EventKind::Agent, Severity::Info, Some(999)),
            event(EventKind::Task, Severity::Warn, None),
        ];
        let report = build_report(&events, &tracker);
        assert_eq!(report.llm_latency.count, 2);
        assert_eq!(report.llm_latency.mean_ns(), 2_000);
        assert_eq!(report.tool_latency.count, 1);
        assert_eq!(report.events_total, 5);
        assert_eq!(report.events_error, 1);
        assert!((report.error_rate() - 0.2).abs() < f64::EPSILON);
        assert_eq!(report.cost.cost_usd, 0.5);
    }
}
