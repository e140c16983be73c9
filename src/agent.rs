//! Daemon assembly: wires configuration, bus, channels, timeline, policy,
//! and peer tracking into one runnable agent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::bus::{
    run_dispatcher, shutdown_requested, BusConsumer, DispatchCounters, MessageBus,
    OutboundMessage,
};
use crate::channels::ChannelRegistry;
use crate::config::Config;
use crate::pipeline::{run_pipeline, PipelineRun, Planner, StepExecutor};
use crate::security::SecurityPolicy;
use crate::sync::federation::{Heartbeat, PeerState, PeerTracker};
use crate::sync::NodeId;
use crate::task::Verifier;
use crate::timeline::{EventKind, Severity, TimelineEvent, TimelineStore};

/// How an inbound task was routed.
pub enum TaskPath {
    /// Orchestration bypassed; the session handles the goal directly.
    Direct,
    /// Ran through the planner/executor/verifier pipeline.
    Orchestrated(PipelineRun),
}

/// The assembled daemon.
pub struct AgentDaemon {
    config: Config,
    bus: MessageBus,
    registry: Arc<ChannelRegistry>,
    counters: Arc<DispatchCounters>,
    timeline: Arc<TimelineStore>,
    policy: SecurityPolicy,
    peer: Mutex<Option<PeerTracker>>,
    stop: Arc<AtomicBool>,
    planner: Option<Arc<dyn Planner>>,
    executor: Option<Arc<dyn StepExecutor>>,
    verifier: Option<Arc<dyn Verifier>>,
}

impl AgentDaemon {
    pub fn new(config: Config, registry: ChannelRegistry) -> (Self, BusConsumer) {
        let (bus, consumer) = MessageBus::new();
        let timeline = Arc::new(TimelineStore::new(config.timeline.path.clone().into()));
        let policy = config.security_policy();
        let peer = config
            .sync
            .peer
            .as_deref()
            .and_then(|p| NodeId::new(p).ok())
            .map(|node| PeerTracker::new(node, config.sync.heartbeat));

        let daemon = Self {
            config,
            bus,
            registry: Arc::new(registry),
            counters: Arc::new(DispatchCounters::default()),
            timeline,
            policy,
            peer: Mutex::new(peer),
            stop: Arc::new(AtomicBool::new(false)),
            planner: None,
            executor: None,
            verifier: None,
        };
        (daemon, consumer)
    }

    pub fn with_orchestration(
        mut self,
        planner: Arc<dyn Planner>,
        executor: Arc<dyn StepExecutor>,
        verifier: Option<Arc<dyn Verifier>>,
    ) -> Self {
        self.planner = Some(planner);
        self.executor = Some(executor);
        self.verifier = verifier;
        self
    }

    pub fn bus(&self) -> MessageBus {
        self.bus.clone()
    }

    pub fn counters(&self) -> Arc<DispatchCounters> {
        self.counters.clone()
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn timeline(&self) -> Arc<TimelineStore> {
        self.timeline.clone()
    }

    fn emit(&self, kind: EventKind, severity: Severity, name: &str, message: Option<String>) {
        let mut event = TimelineEvent::new(
            self.timeline.next_event_id(),
            now_ns(),
            kind,
            severity,
            name,
        );
        event.message = message;
        event.component = Some("agent".to_string());
        if let Err(e) = self.timeline.append(&event) {
            warn!(error = %e, "timeline append failed");
        }
    }

    /// Publish a reply onto the outbound bus.
    pub fn publish_reply(
        &self,
        channel: &str,
        chat_id: &str,
        content: &str,
    ) -> Result<(), crate::bus::BusError> {
        self.bus
            .publish_outbound(OutboundMessage::new(channel, chat_id, content))
    }

    /// Route an inbound goal: through orchestration when the pipeline is
    /// enabled and both hooks are present, otherwise the direct path.
    pub async fn route_task(&self, goal: &str) -> TaskPath {
        match (&self.planner, &self.executor) {
            (Some(planner), Some(executor)) if self.config.pipeline.enabled => {
                self.emit(
                    EventKind::Task,
                    Severity::Info,
                    "task.orchestrate",
                    Some(goal.to_string()),
                );
                let run = run_pipeline(
                    goal,
                    planner.as_ref(),
                    executor.as_ref(),
                    self.verifier.as_deref(),
                    &self.config.pipeline,
                )
                .await;
                TaskPath::Orchestrated(run)
            }
            _ => {
                self.emit(
                    EventKind::Task,
                    Severity::Debug,
                    "task.direct",
                    Some(goal.to_string()),
                );
                TaskPath::Direct
            }
        }
    }

    /// Feed a peer heartbeat received by the sync transport.
    pub fn handle_peer_heartbeat(&self, heartbeat: &Heartbeat) {
        let mut guard = self.peer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tracker) = guard.as_mut() {
            tracker.record_heartbeat(heartbeat, now_ms());
            self.emit(
                EventKind::System,
                Severity::Debug,
                "sync.heartbeat_received",
                None,
            );
        }
    }

    /// Snapshot of the peer state, if a peer is configured.
    pub fn peer_state(&self) -> Option<PeerState> {
        let guard = self.peer.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|t| t.state())
    }

    fn on_heartbeat_tick(&self) {
        let interval = self.config.sync.heartbeat.interval_ms;
        let mut guard = self.peer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tracker) = guard.as_mut() {
            let stale = match (tracker.state(), tracker.info().last_heartbeat_ts) {
                (PeerState::Connected | PeerState::Degraded, Some(ts)) => {
                    now_ms().saturating_sub(ts) > interval
                }
                (PeerState::Connected | PeerState::Degraded, None) => true,
                _ => false,
            };
            if stale {
                tracker.record_miss();
                self.emit(
                    EventKind::System,
                    Severity::Warn,
                    "sync.heartbeat_missed",
                    Some(format!("missed={}", tracker.info().missed_heartbeats)),
                );
            }
        }
    }

    /// Main loop: dispatcher plus heartbeat accounting until shutdown.
    pub async fn run(
        self,
        consumer: BusConsumer,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for warning in self.config.readiness_warnings() {
            info!(warning = %warning, "readiness");
        }
        self.registry.start_all().await;
        self.emit(EventKind::Agent, Severity::Info, "agent.start", None);

        let dispatcher = tokio::spawn(run_dispatcher(
            consumer,
            self.registry.clone(),
            self.counters.clone(),
            self.stop.clone(),
        ));

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.config.sync.heartbeat.interval_ms));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; consume it so miss accounting starts
        // one full interval in.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => self.on_heartbeat_tick(),
                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    if shutdown_requested() || self.stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }

        info!("shutting down");
        self.emit(EventKind::Agent, Severity::Info, "agent.stop", None);
        self.bus.close();
        dispatcher.await?;
        self.registry.stop_all().await;
        Ok(())
    }

    /// Ask the run loop to stop; used by embedders and tests.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::LoopbackChannel;
    use crate::pipeline::PipelinePhase;
    use async_trait::async_trait;
    use serde_json::Value;
    use tempfile::tempdir;

    struct OneStepPlanner;

    #[async_trait]
    impl Planner for OneStepPlanner {
        async fn plan(&self, _goal: &str) -> Result<Vec<String>, String> {
            Ok(vec!["reply".to_string()])
        }
    }

    struct NoopExecutor;

    #[async_trait]
    impl StepExecutor for NoopExecutor {
        async fn execute_step(
            &self,
            _step: &crate::task::StepRecord,
        ) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default_for_node("huginn");
        config.timeline.path = dir
            .join("timeline.jsonl")
            .to_string_lossy()
            .into_owned();
        config.sync.peer = Some("muninn".to_string());
        config
    }

    #[tokio::test]
    async fn test_direct_path_without_hooks() {
        let dir = tempdir().unwrap();
        let (daemon, _consumer) = AgentDaemon::new(test_config(dir.path()), ChannelRegistry::new());
        assert!(matches!(daemon.route_task("do x").await, TaskPath::Direct));
    }

    #[tokio::test]
    async fn test_direct_path_when_disabled_even_with_hooks() {
        let dir = tempdir().unwrap();
        let (daemon, _consumer) = AgentDaemon::new(test_config(dir.path()), ChannelRegistry::new());
        let daemon = daemon.with_orchestration(
            Arc::new(OneStepPlanner),
            Arc::new(NoopExecutor),
            None,
        );
        // pipeline.enabled defaults to false.
        assert!(matches!(daemon.route_task("do x").await, TaskPath::Direct));
    }

    #[tokio::test]
    async fn test_orchestrated_path_when_enabled() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.pipeline.enabled = true;
        config.pipeline.step_retry.base_delay_ms = 1;
        let (daemon, _consumer) = AgentDaemon::new(config, ChannelRegistry::new());
        let daemon = daemon.with_orchestration(
            Arc::new(OneStepPlanner),
            Arc::new(NoopExecutor),
            None,
        );
        match daemon.route_task("do x").await {
            TaskPath::Orchestrated(run) => {
                assert_eq!(run.state.phase, PipelinePhase::Completed);
                assert_eq!(run.state.steps_completed, 1);
            }
            TaskPath::Direct => panic!("expected orchestration"),
        }
    }

    #[tokio::test]
    async fn test_run_dispatches_and_shuts_down() {
        let dir = tempdir().unwrap();
        let shell = Arc::new(LoopbackChannel::new("shell"));
        let mut registry = ChannelRegistry::new();
        registry.register(shell.clone());

        let (daemon, consumer) = AgentDaemon::new(test_config(dir.path()), registry);
        let bus = daemon.bus();
        let counters = daemon.counters();
        let stop = daemon.stop_handle();

        let handle = tokio::spawn(daemon.run(consumer));
        bus.publish_outbound(OutboundMessage::new("shell", "c1", "hello"))
            .unwrap();

        // Give the dispatcher a moment, then stop.
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon must stop")
            .unwrap()
            .unwrap();

        assert_eq!(counters.snapshot().0, 1);
        assert_eq!(shell.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_peer_heartbeat_wiring() {
        let dir = tempdir().unwrap();
        let (daemon, _consumer) = AgentDaemon::new(test_config(dir.path()), ChannelRegistry::new());
        // Connect the peer out-of-band.
        {
            let mut guard = daemon.peer.lock().unwrap();
            let tracker = guard.as_mut().unwrap();
            tracker.begin_handshake().unwrap();
            let resp = crate::sync::federation::respond_handshake(
                &crate::sync::federation::HandshakeRequest::new(
                    NodeId::new("muninn").unwrap(),
                    0,
                ),
                NodeId::new("huginn").unwrap(),
                0,
            );
            tracker.complete_handshake(&resp).unwrap();
        }
        assert_eq!(daemon.peer_state(), Some(PeerState::Connected));

        daemon.handle_peer_heartbeat(&Heartbeat {
            source_node: NodeId::new("muninn").unwrap(),
            timestamp: 1,
            sequence: 1,
            uptime_ms: 10,
        });
        assert_eq!(daemon.peer_state(), Some(PeerState::Connected));
    }
}
