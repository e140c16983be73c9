//! Security policy engine: command allowlisting, risk gating, and approval.
//!
//! Every check is deterministic and side-effect-free except the optional
//! deny hook (fire-and-forget observer) and the rate tracker. The length
//! ceiling is a security boundary: a command that exceeds it is rejected
//! before any parsing, so padding a command cannot smuggle anything past
//! the analyzer.

pub mod rate;
pub mod risk;
pub mod workspace;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub use rate::RateTracker;
pub use risk::RiskLevel;
pub use workspace::{secret_visible_in_workspace, SecretScope, WorkspacePolicy};

use risk::{basename, classify_command, effective_tokens, is_tee_word, split_segments};

/// Commands longer than this are rejected outright, never truncated or
/// partially analyzed.
pub const MAX_ANALYSIS_LEN: usize = 16384;

/// How much the agent may do on its own.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Observe only; every command is denied.
    ReadOnly,
    /// Act, with approval required at and above the configured risk bar.
    #[default]
    Supervised,
    /// Act freely within policy bounds.
    Full,
}

/// Why a command was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    ReadOnlyMode,
    OversizedCommand,
    SubshellExpansion,
    ProcessSubstitution,
    WindowsEnvExpansion,
    TeeBlocked,
    BackgroundChaining,
    OutputRedirection,
    CommandNotInAllowlist,
    DangerousArguments,
    EmptyCommand,
    HighRiskBlocked,
    ApprovalRequired,
    RateLimited,
}

/// Structured denial surfaced to the caller and to the deny hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDenial {
    pub reason: DenialReason,
    /// The exact offending substring, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
}

impl PolicyDenial {
    fn new(reason: DenialReason) -> Self {
        Self {
            reason,
            matched_rule: None,
            risk: None,
        }
    }

    fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.matched_rule = Some(rule.into());
        self
    }

    fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = Some(risk);
        self
    }
}

/// Outcome of the full execution check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandVerdict {
    Allowed(RiskLevel),
    Denied(PolicyDenial),
}

impl CommandVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// Fire-and-forget denial observer. Implementations must not fail; anything
/// they do internally stays internal.
pub trait DenyHook: Send + Sync {
    fn on_denial(&self, denial: &PolicyDenial);
}

/// Read-only diagnostic set plus the everyday filesystem verbs. Bare
/// invocations of these never classify as high risk.
pub fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "grep", "echo", "pwd", "head", "tail", "wc", "sort", "uniq", "cut", "tr",
        "find", "git", "date", "whoami", "hostname", "uname", "uptime", "df", "du", "free", "ps",
        "which", "stat", "file", "diff", "touch", "mkdir", "cp", "mv", "ln", "cargo", "npm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The policy engine. Read-only at runtime apart from the rate tracker.
pub struct SecurityPolicy {
    pub autonomy: AutonomyLevel,
    pub workspace_dir: PathBuf,
    pub workspace_only: bool,
    pub allowed_commands: Vec<String>,
    pub max_actions_per_hour: Option<u32>,
    pub require_approval_for_medium_risk: bool,
    pub block_high_risk_commands: bool,
    rate: Option<Arc<RateTracker>>,
    deny_hook: Option<Arc<dyn DenyHook>>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            autonomy: AutonomyLevel::Supervised,
            workspace_dir: PathBuf::from("."),
            workspace_only: true,
            allowed_commands: default_allowed_commands(),
            max_actions_per_hour: None,
            require_approval_for_medium_risk: false,
            block_high_risk_commands: true,
            rate: None,
            deny_hook: None,
        }
    }
}

impl SecurityPolicy {
    pub fn new(autonomy: AutonomyLevel) -> Self {
        Self {
            autonomy,
            ..Default::default()
        }
    }

    pub fn with_rate_limit(mut self, max_per_hour: u32) -> Self {
        self.max_actions_per_hour = Some(max_per_hour);
        self.rate = Some(Arc::new(RateTracker::new(max_per_hour)));
        self
    }

    pub fn with_deny_hook(mut self, hook: Arc<dyn DenyHook>) -> Self {
        self.deny_hook = Some(hook);
        self
    }

    /// Apply a workspace override. Narrowing only; the allowlist extends.
    /// A narrower per-hour budget gets its own tracker window.
    pub fn apply_workspace(&self, ws: &WorkspacePolicy) -> SecurityPolicy {
        let eff = ws.clamp(
            self.autonomy,
            self.require_approval_for_medium_risk,
            self.block_high_risk_commands,
            self.max_actions_per_hour,
            &self.allowed_commands,
        );
        let rate = if eff.max_actions_per_hour == self.max_actions_per_hour {
            self.rate.clone()
        } else {
            eff.max_actions_per_hour
                .map(|max| Arc::new(RateTracker::new(max)))
        };
        SecurityPolicy {
            autonomy: eff.autonomy,
            workspace_dir: self.workspace_dir.clone(),
            workspace_only: self.workspace_only,
            allowed_commands: eff.allowed_commands,
            max_actions_per_hour: eff.max_actions_per_hour,
            require_approval_for_medium_risk: eff.require_approval_for_medium_risk,
            block_high_risk_commands: eff.block_high_risk_commands,
            rate,
            deny_hook: self.deny_hook.clone(),
        }
    }

    fn deny(&self, denial: PolicyDenial) -> PolicyDenial {
        if let Some(hook) = &self.deny_hook {
            hook.on_denial(&denial);
        }
        warn!(reason = ?denial.reason, rule = denial.matched_rule.as_deref().unwrap_or(""), "command denied");
        denial
    }

    /// Structural and allowlist validation. No risk gating here.
    pub fn check_command(&self, command: &str) -> Result<(), PolicyDenial> {
        if self.autonomy == AutonomyLevel::ReadOnly {
            return Err(self.deny(PolicyDenial::new(DenialReason::ReadOnlyMode)));
        }

        // Length ceiling before anything else: an oversized command is never
        // parsed, so nothing appended past the ceiling can be analyzed away.
        if command.len() > MAX_ANALYSIS_LEN {
            return Err(self.deny(
                PolicyDenial::new(DenialReason::OversizedCommand).with_risk(RiskLevel::High),
            ));
        }

        for needle in ["`", "$(", "${"] {
            if command.contains(needle) {
                return Err(self.deny(
                    PolicyDenial::new(DenialReason::SubshellExpansion).with_rule(needle),
                ));
            }
        }
        for needle in ["<(", ">("] {
            if command.contains(needle) {
                return Err(self.deny(
                    PolicyDenial::new(DenialReason::ProcessSubstitution).with_rule(needle),
                ));
            }
        }
        if cfg!(target_os = "windows") {
            if let Some(var) = risk::contains_windows_env(command) {
                return Err(self.deny(
                    PolicyDenial::new(DenialReason::WindowsEnvExpansion).with_rule(var),
                ));
            }
        }
        if command.replace("&&", "").contains('&') {
            return Err(self
                .deny(PolicyDenial::new(DenialReason::BackgroundChaining).with_rule("&")));
        }
        if command.contains('>') {
            return Err(self
                .deny(PolicyDenial::new(DenialReason::OutputRedirection).with_rule(">")));
        }

        let segments = split_segments(command);
        let mut executables = 0usize;
        for segment in &segments {
            let tokens = effective_tokens(segment);
            if tokens.is_empty() {
                continue;
            }
            executables += 1;

            // tee smuggles output to disk; every word is checked, path
            // spellings included.
            for word in &tokens {
                if is_tee_word(word) {
                    return Err(
                        self.deny(PolicyDenial::new(DenialReason::TeeBlocked).with_rule(*word))
                    );
                }
            }

            let exe = basename(tokens[0]);
            // Known high-risk commands bypass the allowlist: the risk gate
            // owns their denial and reports it as high_risk_blocked.
            let high_risk_exe = risk::HIGH_RISK_COMMANDS.contains(&exe);
            if !high_risk_exe && !self.allowed_commands.iter().any(|c| c == exe) {
                return Err(self.deny(
                    PolicyDenial::new(DenialReason::CommandNotInAllowlist).with_rule(exe),
                ));
            }

            match exe {
                "find" => {
                    for flag in ["-exec", "-ok"] {
                        if tokens.contains(&flag) {
                            return Err(self.deny(
                                PolicyDenial::new(DenialReason::DangerousArguments)
                                    .with_rule(flag),
                            ));
                        }
                    }
                }
                "git" => {
                    // Conservative token match: also blocks benign spellings
                    // like `git -c color.ui=false`.
                    for word in ["config", "alias", "-c"] {
                        if tokens[1..].contains(&word) {
                            return Err(self.deny(
                                PolicyDenial::new(DenialReason::DangerousArguments)
                                    .with_rule(word),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        if executables == 0 {
            return Err(self.deny(PolicyDenial::new(DenialReason::EmptyCommand)));
        }
        Ok(())
    }

    /// Risk classification with the length ceiling applied first.
    pub fn command_risk_level(&self, command: &str) -> RiskLevel {
        if command.len() > MAX_ANALYSIS_LEN {
            return RiskLevel::High;
        }
        classify_command(command)
    }

    /// The full gate: structure, risk, autonomy, approval, rate.
    pub fn check_command_execution(&self, command: &str, approved: bool) -> CommandVerdict {
        if let Err(denial) = self.check_command(command) {
            return CommandVerdict::Denied(denial);
        }

        let risk = self.command_risk_level(command);
        match risk {
            RiskLevel::High => {
                if self.block_high_risk_commands {
                    return CommandVerdict::Denied(self.deny(
                        PolicyDenial::new(DenialReason::HighRiskBlocked).with_risk(RiskLevel::High),
                    ));
                }
                if self.autonomy == AutonomyLevel::Supervised && !approved {
                    return CommandVerdict::Denied(self.deny(
                        PolicyDenial::new(DenialReason::ApprovalRequired)
                            .with_risk(RiskLevel::High),
                    ));
                }
            }
            RiskLevel::Medium => {
                if self.autonomy == AutonomyLevel::Supervised
                    && self.require_approval_for_medium_risk
                    && !approved
                {
                    return CommandVerdict::Denied(self.deny(
                        PolicyDenial::new(DenialReason::ApprovalRequired)
                            .with_risk(RiskLevel::Medium),
                    ));
                }
            }
            RiskLevel::Low => {}
        }

        if let Some(rate) = &self.rate {
            if !rate.try_acquire() {
                return CommandVerdict::Denied(
                    self.deny(PolicyDenial::new(DenialReason::RateLimited).with_risk(risk)),
                );
            }
        }

        CommandVerdict::Allowed(risk)
    }
}
