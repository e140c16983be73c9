//! TOML configuration surface for the daemon.
//!
//! Everything is optional with a sensible default so a bare `node_id` is a
//! working configuration. Sections map one-to-one onto subsystems.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::pipeline::PipelineConfig;
use crate::security::workspace::WorkspacePolicy;
use crate::security::{AutonomyLevel, SecretScope, SecurityPolicy};
use crate::sync::federation::HeartbeatConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This node's identity ("huginn" or "muninn" in a paired deployment).
    pub node_id: String,
    #[serde(default)]
    pub autonomy: AutonomySection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub doctor: DoctorSection,
    #[serde(default)]
    pub hardware: HardwareSection,
    #[serde(default)]
    pub peripherals: PeripheralsSection,
    #[serde(default)]
    pub security: SecuritySection,
    /// Per-workspace overrides, keyed by workspace name.
    #[serde(default)]
    pub workspace_policies: HashMap<String, WorkspacePolicy>,
    #[serde(default)]
    pub secret_scope: SecretScopeSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub timeline: TimelineSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutonomySection {
    #[serde(default)]
    pub level: AutonomyLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_gateway_host")]
    pub host: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DoctorProfile {
    SoftwareOnly,
    #[default]
    Full,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorSection {
    #[serde(default)]
    pub profile: DoctorProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSection {
    #[serde(default)]
    pub enabled: bool,
    /// "none" disables GPIO/serial probing entirely.
    #[serde(default = "default_hardware_transport")]
    pub transport: String,
}

impl Default for HardwareSection {
    fn default() -> Self {
        Self {
            enabled: false,
            transport: default_hardware_transport(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeripheralsSection {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySection {
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    #[serde(default = "default_true")]
    pub workspace_only: bool,
    #[serde(default = "crate::security::default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub max_actions_per_hour: Option<u32>,
    #[serde(default)]
    pub require_approval_for_medium_risk: bool,
    #[serde(default = "default_true")]
    pub block_high_risk_commands: bool,
    #[serde(default)]
    pub sandbox: SandboxSection,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            workspace_only: true,
            allowed_commands: crate::security::default_allowed_commands(),
            max_actions_per_hour: None,
            require_approval_for_medium_risk: false,
            block_high_risk_commands: true,
            sandbox: SandboxSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    /// "auto" selects the best backend the platform offers.
    #[serde(default = "default_sandbox_backend")]
    pub backend: String,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            backend: default_sandbox_backend(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretScopeSection {
    #[serde(default = "default_secret_scope")]
    pub default_scope: SecretScope,
}

impl Default for SecretScopeSection {
    fn default() -> Self {
        Self {
            default_scope: default_secret_scope(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSection {
    /// Peer node id; sync stays idle when unset.
    #[serde(default)]
    pub peer: Option<String>,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineSection {
    #[serde(default = "default_timeline_path")]
    pub path: String,
}

impl Default for TimelineSection {
    fn default() -> Self {
        Self {
            path: default_timeline_path(),
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_hardware_transport() -> String {
    "none".to_string()
}

fn default_workspace_dir() -> String {
    ".".to_string()
}

fn default_sandbox_backend() -> String {
    "auto".to_string()
}

fn default_secret_scope() -> SecretScope {
    SecretScope::Workspace
}

fn default_timeline_path() -> String {
    "nullclaw-timeline.jsonl".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(node_id = %config.node_id, autonomy = ?config.autonomy.level, "configuration loaded");
        Ok(config)
    }

    pub fn default_for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            autonomy: AutonomySection::default(),
            gateway: GatewaySection::default(),
            doctor: DoctorSection::default(),
            hardware: HardwareSection::default(),
            peripherals: PeripheralsSection::default(),
            security: SecuritySection::default(),
            workspace_policies: HashMap::new(),
            secret_scope: SecretScopeSection::default(),
            sync: SyncSection::default(),
            pipeline: PipelineConfig::default(),
            timeline: TimelineSection::default(),
        }
    }

    /// Build the instance security policy from this configuration.
    pub fn security_policy(&self) -> SecurityPolicy {
        let mut policy = SecurityPolicy::new(self.autonomy.level);
        policy.workspace_dir = self.security.workspace_dir.clone().into();
        policy.workspace_only = self.security.workspace_only;
        policy.allowed_commands = self.security.allowed_commands.clone();
        policy.require_approval_for_medium_risk = self.security.require_approval_for_medium_risk;
        policy.block_high_risk_commands = self.security.block_high_risk_commands;
        if let Some(max) = self.security.max_actions_per_hour {
            policy = policy.with_rate_limit(max);
        }
        policy
    }

    /// Policy effective inside a named workspace: the instance policy
    /// narrowed by that workspace's override, if one exists.
    pub fn policy_for_workspace(&self, workspace: &str) -> SecurityPolicy {
        let instance = self.security_policy();
        match self.workspace_policies.get(workspace) {
            Some(ws) => instance.apply_workspace(ws),
            None => instance,
        }
    }

    /// Readiness report: one line per subsystem worth flagging. Hardware
    /// warnings are suppressed under the software-only doctor profile.
    pub fn readiness_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.doctor.profile != DoctorProfile::SoftwareOnly {
            if !self.hardware.enabled || self.hardware.transport == "none" {
                warnings.push("hardware probing disabled".to_string());
            }
            if !self.peripherals.enabled {
                warnings.push("peripheral enumeration disabled".to_string());
            }
        }
        if self.sync.peer.is_none() {
            warnings.push("no sync peer configured".to_string());
        }
        warnings
    }
}
