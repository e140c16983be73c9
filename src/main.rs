use std::sync::Arc;

use clap::Parser;
use tracing::info;

use nullclaw::agent::AgentDaemon;
use nullclaw::bus::request_shutdown;
use nullclaw::channels::{ChannelRegistry, LoopbackChannel};
use nullclaw::config::Config;
use nullclaw::security::AutonomyLevel;

/// nullclaw - local-first autonomous agent runtime
#[derive(Parser, Debug)]
#[command(name = "nullclaw", version, about)]
struct Args {
    /// Node identity (e.g. "huginn" or "muninn")
    #[arg(short, long, default_value = "huginn")]
    node: String,

    /// Autonomy level override (read_only, supervised, full)
    #[arg(short, long)]
    autonomy: Option<String>,

    /// Peer node id for sync
    #[arg(short, long)]
    peer: Option<String>,

    /// Configuration file (optional, overrides CLI args)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let mut config = if let Some(path) = args.config {
        Config::from_file(path)?
    } else {
        Config::default_for_node(args.node.clone())
    };
    if let Some(level) = args.autonomy.as_deref() {
        config.autonomy.level = match level {
            "read_only" => AutonomyLevel::ReadOnly,
            "full" => AutonomyLevel::Full,
            _ => AutonomyLevel::Supervised,
        };
    }
    if args.peer.is_some() {
        config.sync.peer = args.peer;
    }

    info!(
        node_id = %config.node_id,
        autonomy = ?config.autonomy.level,
        peer = config.sync.peer.as_deref().unwrap_or("-"),
        "nullclaw starting"
    );

    let mut registry = ChannelRegistry::new();
    registry.register(Arc::new(LoopbackChannel::new("shell")));

    let (daemon, consumer) = AgentDaemon::new(config, registry);

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            request_shutdown();
        }
    });

    daemon.run(consumer).await
}
