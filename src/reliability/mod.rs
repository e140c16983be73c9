//! Tool reliability envelope: retry with backoff, health tracking, circuit
//! breaking, and an optional idempotent result cache.
//!
//! The envelope never enforces a per-attempt timeout: `RetryPolicy` carries
//! `timeout_ns` for callers that compose with their own task framework, but
//! an in-flight tool call is not cancelled here.

pub mod breaker;
pub mod cache;
pub mod health;

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use cache::{fingerprint_args, CacheKey, ToolCache};
pub use health::{HealthState, ToolHealth};

use crate::tools::{Tool, ToolError, ToolResult};

/// A failed tool result is retryable only when its error message mentions
/// one of these, case-insensitively.
pub const RETRY_KEYWORDS: &[&str] = &["timeout", "transient", "temporary", "retry", "connection"];

pub fn is_retryable_message(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRY_KEYWORDS.iter().any(|k| message.contains(k))
}

/// Retry budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fixed-point backoff multiplier in thousandths (2000 = 2x per step).
    pub multiplier_fp: u64,
    /// Carried for callers; not enforced by the envelope.
    pub timeout_ns: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
            multiplier_fp: 2000,
            timeout_ns: None,
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry `attempt` (0-indexed first retry):
    /// `min(max, base * (multiplier_fp / 1000)^attempt)` in fixed point.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.base_delay_ms;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.multiplier_fp) / 1000;
            if delay >= self.max_delay_ms {
                break;
            }
        }
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// What the envelope hands back on the tool-result path.
#[derive(Debug, Clone, PartialEq)]
pub struct ReliableOutcome {
    pub result: ToolResult,
    /// Invocations actually made (0 on a cache hit).
    pub attempts: u32,
    pub retried: bool,
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Execute a tool through the full reliability pipeline.
///
/// At most `1 + policy.max_retries` invocations are made. Tool-level
/// failures retry only on retryable messages; infrastructure errors retry
/// only when transient; everything else propagates as-is. The breaker is
/// consulted before every attempt and updated after it. On success the
/// result is inserted into the cache (when one is supplied) with the
/// cache's default TTL.
pub async fn reliable_execute(
    tool: &dyn Tool,
    args: &Value,
    policy: &RetryPolicy,
    health: &mut ToolHealth,
    breaker: &mut CircuitBreaker,
    mut tool_cache: Option<&mut ToolCache>,
) -> Result<ReliableOutcome, ToolError> {
    let key = tool_cache
        .as_ref()
        .map(|_| CacheKey::new(tool.name(), args));
    if let (Some(cached), Some(key)) = (tool_cache.as_deref_mut(), key.as_ref()) {
        if let Some(result) = cached.get(key, now_ns()) {
            debug!(tool = tool.name(), "cache hit");
            return Ok(ReliableOutcome {
                result,
                attempts: 0,
                retried: false,
            });
        }
    }

    let max_attempts = policy.max_retries + 1;
    let mut attempts = 0u32;
    loop {
        if !breaker.is_call_permitted(now_ns()) {
            warn!(tool = tool.name(), "circuit open, call rejected");
            return Err(ToolError::CircuitOpen);
        }
        attempts += 1;

        match tool.execute(args).await {
            Ok(result) if result.success => {
                breaker.record_success();
                health.record_success(now_ms());
                if let (Some(cached), Some(key)) = (tool_cache.as_deref_mut(), key.as_ref()) {
                    let ttl = cached.default_ttl_ns();
                    cached.insert(key.clone(), result.clone(), ttl, now_ns());
                }
                return Ok(ReliableOutcome {
                    result,
                    attempts,
                    retried: attempts > 1,
                });
            }
            Ok(result) => {
                breaker.record_failure(now_ns());
                health.record_failure(now_ms());
                let retryable = result
                    .error
                    .as_deref()
                    .map(is_retryable_message)
                    .unwrap_or(false);
                if retryable && attempts < max_attempts {
                    let delay = policy.delay_for_attempt(attempts - 1);
                    debug!(tool = tool.name(), attempt = attempts, ?delay, "retrying failed result");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(ReliableOutcome {
                    result,
                    attempts,
                    retried: attempts > 1,
                });
            }
            Err(err) => {
                breaker.record_failure(now_ns());
                health.record_failure(now_ms());
                if err.is_transient() && attempts < max_attempts {
                    let delay = policy.delay_for_attempt(attempts - 1);
                    debug!(tool = tool.name(), attempt = attempts, ?delay, "retrying transient error");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(err);
            }
        }
    }
}
