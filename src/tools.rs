//! Tool seam: what the agent calls, and how tool failures are classified.
//!
//! Concrete tools (shell, web, hardware, MCP-bridged) live behind the
//! [`Tool`] trait. The reliability envelope wraps `execute` with retry,
//! health tracking, and a circuit breaker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(msg.into()),
        }
    }
}

/// Tool definition advertised for LLM function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Infrastructure-level tool failure.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Transient network-class failure; the envelope may retry it.
    #[error("transient tool error: {0}")]
    Transient(String),
    /// Surfaced immediately, never retried.
    #[error("tool error: {0}")]
    Permanent(String),
    /// Short-circuited by the circuit breaker before the call.
    #[error("circuit open")]
    CircuitOpen,
}

impl ToolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an io error: the transient network class retries, the rest
    /// is permanent.
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            ConnectionRefused | ConnectionReset | ConnectionAborted | TimedOut | BrokenPipe
            | NetworkUnreachable | HostUnreachable => Self::Transient(err.to_string()),
            _ => Self::Permanent(err.to_string()),
        }
    }
}

/// An executable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn execute(&self, args: &Value) -> Result<ToolResult, ToolError>;
}
