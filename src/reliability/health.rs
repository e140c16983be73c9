//! Per-tool health counters.

use serde::{Deserialize, Serialize};

/// Consecutive failures needed before a tool counts as degraded.
pub const DEGRADED_AFTER: u32 = 2;

/// Consecutive failures needed before a tool counts as unhealthy.
pub const UNHEALTHY_AFTER: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Rolling health record for one tool. Single writer per tool: the
/// reliability envelope call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHealth {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_ms: Option<u64>,
}

impl ToolHealth {
    pub fn new() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            last_success_ms: None,
            last_failure_ms: None,
        }
    }

    /// Any success restores healthy and resets the failure run.
    pub fn record_success(&mut self, now_ms: u64) {
        self.total_successes += 1;
        self.consecutive_failures = 0;
        self.state = HealthState::Healthy;
        self.last_success_ms = Some(now_ms);
    }

    pub fn record_failure(&mut self, now_ms: u64) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.last_failure_ms = Some(now_ms);
        self.state = if self.consecutive_failures >= UNHEALTHY_AFTER {
            HealthState::Unhealthy
        } else if self.consecutive_failures >= DEGRADED_AFTER {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
    }
}

impl Default for ToolHealth {
    fn default() -> Self {
        Self::new()
    }
}
