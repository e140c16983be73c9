//! Per-tool circuit breaker.
//!
//! Trips open after a run of consecutive failures, lets a bounded number of
//! probes through after the recovery timeout, and closes again on a probe
//! success. Time is passed in explicitly so transitions are deterministic.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ns: u64,
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ns: 30_000_000_000,
            half_open_max_probes: 1,
        }
    }
}

/// One breaker per tool. Callers serialize access; the envelope call site is
/// the single writer.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at_ns: Option<u64>,
    half_open_probes: u32,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at_ns: None,
            half_open_probes: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Gate one call attempt at time `now_ns`.
    ///
    /// Open circuits transition to half-open once the recovery timeout has
    /// elapsed; half-open permits at most `half_open_max_probes` calls until
    /// a probe outcome arrives.
    pub fn is_call_permitted(&mut self, now_ns: u64) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened = self.opened_at_ns.unwrap_or(now_ns);
                if now_ns.saturating_sub(opened) >= self.config.recovery_timeout_ns {
                    debug!("circuit half-open after recovery timeout");
                    self.state = CircuitState::HalfOpen;
                    self.half_open_probes = 0;
                    self.permit_probe()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.permit_probe(),
        }
    }

    fn permit_probe(&mut self) -> bool {
        if self.half_open_probes < self.config.half_open_max_probes {
            self.half_open_probes += 1;
            true
        } else {
            false
        }
    }

    /// Any success resets the failure run; a half-open probe success closes
    /// the circuit.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            debug!("circuit closed after successful probe");
            self.state = CircuitState::Closed;
            self.opened_at_ns = None;
            self.half_open_probes = 0;
        }
    }

    /// A half-open probe failure re-opens immediately; a closed circuit
    /// opens once the failure run reaches the threshold.
    pub fn record_failure(&mut self, now_ns: u64) {
        self.consecutive_failures += 1;
        match self.state {
            CircuitState::HalfOpen => {
                warn!("circuit re-opened after failed probe");
                self.state = CircuitState::Open;
                self.opened_at_ns = Some(now_ns);
                self.half_open_probes = 0;
            }
            CircuitState::Closed
                if self.consecutive_failures >= self.config.failure_threshold =>
            {
                warn!(
                    failures = self.consecutive_failures,
                    "circuit opened"
                );
                self.state = CircuitState::Open;
                self.opened_at_ns = Some(now_ns);
            }
            _ => {}
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
