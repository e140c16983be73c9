//! Workspace-scoped policy overrides and secret scoping.
//!
//! A workspace override can only narrow the instance policy: autonomy clamps
//! to the lower of the two, approval and blocking flags only tighten, the
//! per-hour budget takes the minimum, and extra allowlist entries extend the
//! instance allowlist rather than replacing it.

use serde::{Deserialize, Serialize};

use super::AutonomyLevel;

/// Per-workspace override. `None` fields inherit the instance value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspacePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autonomy: Option<AutonomyLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_approval_for_medium_risk: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_high_risk_commands: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_actions_per_hour: Option<u32>,
    /// Extends (never replaces) the instance allowlist.
    #[serde(default)]
    pub extra_allowed_commands: Vec<String>,
}

/// Resolved field values after applying an override to instance settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicyFields {
    pub autonomy: AutonomyLevel,
    pub require_approval_for_medium_risk: bool,
    pub block_high_risk_commands: bool,
    pub max_actions_per_hour: Option<u32>,
    pub allowed_commands: Vec<String>,
}

impl WorkspacePolicy {
    /// Clamp instance settings by this override. Narrowing only.
    pub fn clamp(
        &self,
        instance_autonomy: AutonomyLevel,
        instance_require_approval: bool,
        instance_block_high_risk: bool,
        instance_max_per_hour: Option<u32>,
        instance_allowed: &[String],
    ) -> EffectivePolicyFields {
        let autonomy = match self.autonomy {
            Some(ws) => ws.min(instance_autonomy),
            None => instance_autonomy,
        };
        let require_approval =
            instance_require_approval || self.require_approval_for_medium_risk.unwrap_or(false);
        let block_high_risk =
            instance_block_high_risk || self.block_high_risk_commands.unwrap_or(false);
        let max_per_hour = match (instance_max_per_hour, self.max_actions_per_hour) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        let mut allowed: Vec<String> = instance_allowed.to_vec();
        for extra in &self.extra_allowed_commands {
            if !allowed.iter().any(|c| c == extra) {
                allowed.push(extra.clone());
            }
        }

        EffectivePolicyFields {
            autonomy,
            require_approval_for_medium_risk: require_approval,
            block_high_risk_commands: block_high_risk,
            max_actions_per_hour: max_per_hour,
            allowed_commands: allowed,
        }
    }
}

/// Visibility scope of a stored secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretScope {
    Global,
    Session,
    Workspace,
    Group,
}

/// Whether a secret with the given scope and qualifier is visible inside
/// `workspace`. Group membership is resolved by an external collaborator, so
/// group-scoped secrets are invisible at this layer.
pub fn secret_visible_in_workspace(
    scope: SecretScope,
    qualifier: Option<&str>,
    workspace: &str,
) -> bool {
    match scope {
        SecretScope::Global | SecretScope::Session => true,
        SecretScope::Workspace => qualifier == Some(workspace),
        SecretScope::Group => false,
    }
}
