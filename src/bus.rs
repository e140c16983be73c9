//! Outbound message bus: many producers, one dispatcher.
//!
//! Producers (agent sessions, cron jobs, tools) publish replies without
//! blocking; a single dispatcher loop pops them in arrival order and routes
//! each to its channel transport. On close the bus drains everything already
//! queued, then the dispatcher exits.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::channels::ChannelRegistry;

/// Process-global shutdown flag, checked by every long-running loop.
static GLOBAL_SHUTDOWN: AtomicBool = AtomicBool::new(false);

pub fn request_shutdown() {
    GLOBAL_SHUTDOWN.store(true, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    GLOBAL_SHUTDOWN.load(Ordering::SeqCst)
}

/// Clear the global flag; called once at daemon start.
pub fn reset_shutdown() {
    GLOBAL_SHUTDOWN.store(false, Ordering::SeqCst);
}

/// One outbound reply addressed to a channel transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus closed")]
    Closed,
}

/// Producer handle. Cheap to clone; every producer holds one.
#[derive(Clone)]
pub struct MessageBus {
    tx: UnboundedSender<OutboundMessage>,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

/// Consumer half; exactly one dispatcher owns it.
pub struct BusConsumer {
    rx: UnboundedReceiver<OutboundMessage>,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl MessageBus {
    pub fn new() -> (Self, BusConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        (
            Self {
                tx,
                closed: closed.clone(),
                notify: notify.clone(),
            },
            BusConsumer { rx, closed, notify },
        )
    }

    /// Non-blocking publish. Ownership of the message moves to the bus.
    pub fn publish_outbound(&self, message: OutboundMessage) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.tx.send(message).map_err(|_| BusError::Closed)
    }

    /// Idempotent. Messages already queued are still delivered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl BusConsumer {
    /// Blocking, cancellable pop. Returns `None` iff the bus is closed
    /// **and** drained.
    pub async fn consume_outbound(&mut self) -> Option<OutboundMessage> {
        loop {
            // Drain anything already queued, even after close.
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            tokio::select! {
                message = self.rx.recv() => return message,
                _ = self.notify.notified() => {
                    // Close signal: loop back to drain before reporting None.
                }
            }
        }
    }
}

/// Dispatch counters, shared between the dispatcher and observers.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    pub dispatched: AtomicU64,
    pub errors: AtomicU64,
    pub channel_not_found: AtomicU64,
}

impl DispatchCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.dispatched.load(Ordering::SeqCst),
            self.errors.load(Ordering::SeqCst),
            self.channel_not_found.load(Ordering::SeqCst),
        )
    }
}

/// The dispatcher loop. Pops messages in arrival order and routes each to
/// its transport; send failures are isolated and counted, never fatal.
/// Exits when the bus closes and drains, or when either stop flag is set.
pub async fn run_dispatcher(
    mut consumer: BusConsumer,
    registry: Arc<ChannelRegistry>,
    counters: Arc<DispatchCounters>,
    stop_requested: Arc<AtomicBool>,
) {
    loop {
        if stop_requested.load(Ordering::SeqCst) || shutdown_requested() {
            debug!("dispatcher stop requested");
            break;
        }
        let message = tokio::select! {
            message = consumer.consume_outbound() => message,
            _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => continue,
        };
        let message = match message {
            Some(message) => message,
            None => {
                debug!("bus closed and drained, dispatcher exiting");
                break;
            }
        };

        match registry.get(&message.channel) {
            None => {
                warn!(channel = %message.channel, "no transport for channel");
                counters.channel_not_found.fetch_add(1, Ordering::SeqCst);
            }
            Some(channel) => match channel.send(&message.chat_id, &message.content).await {
                Ok(()) => {
                    counters.dispatched.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    warn!(channel = %message.channel, error = %e, "channel send failed");
                    counters.errors.fetch_add(1, Ordering::SeqCst);
                }
            },
        }
    }
}
