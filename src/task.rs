//! Persistent task and step records with guarded status transitions.
//!
//! Terminal statuses are frozen: a completed, failed, or cancelled task
//! refuses further transitions instead of silently mutating.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("invalid task transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("retry budget exhausted ({max_retries})")]
    RetriesExhausted { max_retries: u32 },
    #[error("step index out of range: {current} of {total}")]
    StepOutOfRange { current: u32, total: u32 },
}

/// A unit of work tracked by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub retries: u32,
    pub max_retries: u32,
    pub total_steps: u32,
    pub current_step: u32,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Where the task came from: a channel name, "cron", "peer", ...
    pub origin: String,
}

impl TaskRecord {
    pub fn new(name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Normal,
            retries: 0,
            max_retries: 3,
            total_steps: 0,
            current_step: 0,
            created_at: now_ms(),
            started_at: None,
            finished_at: None,
            updated_at: None,
            last_error: None,
            origin: origin.into(),
        }
    }

    fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if from.is_terminal() || from == to {
            return false;
        }
        match (from, to) {
            (Pending, Running | Cancelled | Blocked) => true,
            (Running, Completed | Failed | Cancelled | Blocked) => true,
            (Blocked, Pending | Running | Cancelled | Failed) => true,
            _ => false,
        }
    }

    /// Move to `to`, refusing forbidden transitions without mutating.
    pub fn transition_to(&mut self, to: TaskStatus) -> Result<(), TaskError> {
        if !Self::can_transition(self.status, to) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let now = now_ms();
        match to {
            TaskStatus::Running if self.started_at.is_none() => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.finished_at = Some(now)
            }
            _ => {}
        }
        self.status = to;
        self.updated_at = Some(now);
        Ok(())
    }

    /// Consume one retry slot. Errors once the budget is spent; the caller
    /// then fails the task.
    pub fn record_retry(&mut self) -> Result<(), TaskError> {
        if self.retries >= self.max_retries {
            return Err(TaskError::RetriesExhausted {
                max_retries: self.max_retries,
            });
        }
        self.retries += 1;
        self.updated_at = Some(now_ms());
        Ok(())
    }

    /// Advance the step cursor, keeping `current_step <= total_steps`.
    pub fn advance_step(&mut self) -> Result<(), TaskError> {
        if self.current_step >= self.total_steps {
            return Err(TaskError::StepOutOfRange {
                current: self.current_step,
                total: self.total_steps,
            });
        }
        self.current_step += 1;
        self.updated_at = Some(now_ms());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.last_error = Some(error.into());
        self.transition_to(TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One planned step of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: u32,
    pub label: String,
    pub status: StepStatus,
    pub retries: u32,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn new(index: u32, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
            status: StepStatus::Pending,
            retries: 0,
            created_at: now_ms(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Constant,
    Linear,
    Exponential,
}

/// Retry budget and backoff shape for a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for StepRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: BackoffKind::Exponential,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl StepRetryPolicy {
    /// Delay before retry attempt `n` (0-indexed first retry), in ms.
    ///
    /// The exponential exponent is capped at 63 so `2^n` cannot overflow;
    /// everything saturates against `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = match self.backoff {
            BackoffKind::Constant => 1,
            BackoffKind::Linear => u64::from(attempt) + 1,
            BackoffKind::Exponential => 1u64 << attempt.min(63),
        };
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// Result of verifying one step's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum VerifyOutcome {
    Passed,
    Failed(String),
    Skipped,
    VerifierError(String),
}

impl VerifyOutcome {
    /// Passed and Skipped both advance the pipeline.
    pub fn is_acceptable(&self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }
}

/// Hook that judges a step's output. Implementations must not panic; an
/// internal failure is reported as `VerifierError`.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, step: &StepRecord, output: &serde_json::Value) -> VerifyOutcome;
}
