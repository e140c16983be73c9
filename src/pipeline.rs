//! Planner/executor/verifier orchestration pipeline.
//!
//! Disabled by default: without `enabled` and both hooks the daemon routes
//! tasks through the direct path and nothing here runs. When active, a goal
//! is decomposed into steps, each step executes and is verified, and failed
//! verifications consume the step's retry budget before failing the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::task::{StepRecord, StepRetryPolicy, StepStatus, Verifier, VerifyOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    Planning,
    Executing,
    Verifying,
    Completed,
    Failed,
}

impl PipelinePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid pipeline transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: PipelinePhase,
        to: PipelinePhase,
    },
    #[error("planner error: {0}")]
    Planner(String),
}

/// Pipeline configuration. Off unless explicitly enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub step_retry: StepRetryPolicy,
}

fn default_max_steps() -> u32 {
    16
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_steps: default_max_steps(),
            step_retry: StepRetryPolicy::default(),
        }
    }
}

/// Decomposes a goal into ordered step labels.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str) -> Result<Vec<String>, String>;
}

/// Executes one step, producing its output.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(&self, step: &StepRecord) -> Result<Value, String>;
}

/// Live pipeline state with guarded phase transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub phase: PipelinePhase,
    pub steps_total: u32,
    pub steps_completed: u32,
    pub current_step: u32,
    pub total_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            phase: PipelinePhase::Idle,
            steps_total: 0,
            steps_completed: 0,
            current_step: 0,
            total_retries: 0,
            last_error: None,
        }
    }

    fn move_to(&mut self, to: PipelinePhase) -> Result<(), PipelineError> {
        use PipelinePhase::*;
        let ok = match (self.phase, to) {
            (Idle, Planning) => true,
            (Planning, Executing) | (Planning, Completed) => true,
            (Executing, Verifying) => true,
            (Verifying, Executing) | (Verifying, Completed) => true,
            (Planning | Executing | Verifying, Failed) => true,
            _ => false,
        };
        if !ok {
            return Err(PipelineError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    pub fn begin_planning(&mut self) -> Result<(), PipelineError> {
        self.move_to(PipelinePhase::Planning)
    }

    /// Planner produced `n` steps: zero completes immediately.
    pub fn plan_ready(&mut self, n: u32) -> Result<(), PipelineError> {
        self.steps_total = n;
        if n == 0 {
            self.move_to(PipelinePhase::Completed)
        } else {
            self.move_to(PipelinePhase::Executing)
        }
    }

    pub fn begin_verifying(&mut self) -> Result<(), PipelineError> {
        self.move_to(PipelinePhase::Verifying)
    }

    /// A verified step: advances the cursor and completes the run once all
    /// steps have passed.
    pub fn step_passed(&mut self) -> Result<(), PipelineError> {
        let next = if self.steps_completed + 1 >= self.steps_total {
            PipelinePhase::Completed
        } else {
            PipelinePhase::Executing
        };
        self.move_to(next)?;
        self.steps_completed += 1;
        self.current_step += 1;
        Ok(())
    }

    /// A failed verification going around again; no completion credit.
    pub fn step_retried(&mut self) -> Result<(), PipelineError> {
        self.move_to(PipelinePhase::Executing)?;
        self.total_retries += 1;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), PipelineError> {
        self.move_to(PipelinePhase::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Finished run: final state plus per-step records.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub state: PipelineState,
    pub steps: Vec<StepRecord>,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Drive one goal through plan → execute → verify.
///
/// A `None` verifier skips verification (every step outcome counts as
/// `Skipped`). A `VerifierError` is treated as a failed verification with a
/// tagged message.
pub async fn run_pipeline(
    goal: &str,
    planner: &dyn Planner,
    executor: &dyn StepExecutor,
    verifier: Option<&dyn Verifier>,
    config: &PipelineConfig,
) -> PipelineRun {
    let mut state = PipelineState::new();
    let mut steps: Vec<StepRecord> = Vec::new();

    // Transitions below follow from the phase machine by construction; a
    // violated expectation is a bug, so errors fail the run loudly.
    if let Err(e) = state.begin_planning() {
        let _ = state.fail(e.to_string());
        return PipelineRun { state, steps };
    }

    let labels = match planner.plan(goal).await {
        Ok(labels) => labels,
        Err(e) => {
            let _ = state.fail(format!("planner error: {e}"));
            return PipelineRun { state, steps };
        }
    };
    let labels: Vec<String> = labels
        .into_iter()
        .take(config.max_steps as usize)
        .collect();

    if state.plan_ready(labels.len() as u32).is_err() {
        let _ = state.fail("plan_ready out of phase");
        return PipelineRun { state, steps };
    }
    info!(goal, steps = labels.len(), "plan ready");
    if labels.is_empty() {
        return PipelineRun { state, steps };
    }

    steps = labels
        .iter()
        .enumerate()
        .map(|(i, label)| StepRecord::new(i as u32, label.clone()))
        .collect();

    for index in 0..steps.len() {
        loop {
            let step = &mut steps[index];
            step.status = StepStatus::Running;
            if step.started_at.is_none() {
                step.started_at = Some(now_ms());
            }

            let executed = executor.execute_step(step).await;
            if state.begin_verifying().is_err() {
                let _ = state.fail("verify out of phase");
                return PipelineRun { state, steps };
            }

            // An executor error rides the verification-failure path so it
            // consumes the same retry budget.
            let outcome = match executed {
                Ok(output) => match verifier {
                    Some(v) => v.verify(step, &output).await,
                    None => VerifyOutcome::Skipped,
                },
                Err(e) => VerifyOutcome::Failed(format!("step execution failed: {e}")),
            };

            let failure = match outcome {
                VerifyOutcome::Passed | VerifyOutcome::Skipped => {
                    step.status = StepStatus::Completed;
                    step.finished_at = Some(now_ms());
                    if state.step_passed().is_err() {
                        let _ = state.fail("step_passed out of phase");
                        return PipelineRun { state, steps };
                    }
                    debug!(step = step.index, "step verified");
                    break;
                }
                VerifyOutcome::Failed(msg) => msg,
                VerifyOutcome::VerifierError(msg) => format!("verifier error: {msg}"),
            };

            if step.retries >= config.step_retry.max_retries {
                warn!(step = step.index, error = %failure, "step retries exhausted");
                step.status = StepStatus::Failed;
                step.error = Some(failure.clone());
                step.finished_at = Some(now_ms());
                let _ = state.fail(failure);
                return PipelineRun { state, steps };
            }

            let delay_ms = config.step_retry.delay_for_attempt(step.retries);
            step.retries += 1;
            if state.step_retried().is_err() {
                let _ = state.fail("step_retried out of phase");
                return PipelineRun { state, steps };
            }
            debug!(step = step.index, retry = step.retries, delay_ms, "retrying step");
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
    }

    PipelineRun { state, steps }
}
