//! Channel transport seam and registry.
//!
//! Concrete chat transports (Telegram, Discord, Matrix, ...) are external
//! collaborators implementing [`Channel`]. The registry maps exact channel
//! names to transports for the outbound dispatcher.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel transport error: {0}")]
    Transport(String),
    #[error("channel not started")]
    NotStarted,
}

/// One chat transport.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self) -> Result<(), ChannelError>;
    async fn stop(&self) -> Result<(), ChannelError>;
    async fn send(&self, chat_id: &str, content: &str) -> Result<(), ChannelError>;
    async fn health_check(&self) -> bool;
}

/// Registry of transports, looked up by exact name.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registering channel");
        self.channels.insert(name, channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start every transport; failures are logged and skipped so one broken
    /// transport cannot keep the rest down.
    pub async fn start_all(&self) {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.start().await {
                error!(channel = %name, error = %e, "failed to start channel");
            }
        }
    }

    pub async fn stop_all(&self) {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "failed to stop channel");
            }
        }
    }
}

/// In-process transport: delivers into a local buffer. Backs the local
/// shell surface and doubles as the test transport.
pub struct LoopbackChannel {
    name: String,
    delivered: Mutex<Vec<(String, String)>>,
    fail_sends: bool,
}

impl LoopbackChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delivered: Mutex::new(Vec::new()),
            fail_sends: false,
        }
    }

    /// A loopback that refuses every send; used to exercise error paths.
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            fail_sends: true,
            ..Self::new(name)
        }
    }

    /// Snapshot of `(chat_id, content)` pairs delivered so far.
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn send(&self, chat_id: &str, content: &str) -> Result<(), ChannelError> {
        if self.fail_sends {
            return Err(ChannelError::Transport("loopback send refused".into()));
        }
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((chat_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn health_check(&self) -> bool {
        !self.fail_sends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_exact_name_lookup() {
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::new(LoopbackChannel::new("shell")));
        registry.register(Arc::new(LoopbackChannel::new("matrix")));

        assert!(registry.get("shell").is_some());
        assert!(registry.get("matrix").is_some());
        assert!(registry.get("Shell").is_none());
        assert!(registry.get("mat").is_none());
        assert_eq!(registry.names(), vec!["matrix", "shell"]);
    }

    #[tokio::test]
    async fn test_loopback_delivery() {
        let channel = LoopbackChannel::new("shell");
        channel.send("chat-1", "hello").await.unwrap();
        channel.send("chat-2", "world").await.unwrap();
        assert_eq!(
            channel.delivered(),
            vec![
                ("chat-1".to_string(), "hello".to_string()),
                ("chat-2".to_string(), "world".to_string()),
            ]
        );
        assert!(channel.health_check().await);
    }

    #[tokio::test]
    async fn test_failing_loopback() {
        let channel = LoopbackChannel::failing("broken");
        assert!(channel.send("c", "x").await.is_err());
        assert!(!channel.health_check().await);
        assert!(channel.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_register_replaces_same_name() {
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::new(LoopbackChannel::new("shell")));
        registry.register(Arc::new(LoopbackChannel::new("shell")));
        assert_eq!(registry.len(), 1);
    }
}
