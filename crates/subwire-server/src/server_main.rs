//! Demo subscription server.
//!
//! Serves the `ticks` topic, which publishes `{"tick": n}` once a second.
//!
//!   cargo run -p subwire-server -- --listen 127.0.0.1:4000
//!
//! then start an operation with `{"query": "ticks"}`.

use clap::Parser;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use subwire_server::pubsub::{PubSub, TopicExecutor};
use subwire_server::{NoHooks, ServerConfig, ws};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "subwire-server")]
#[command(about = "WebSocket subscription server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "SUBWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long, env = "SUBWIRE_LISTEN")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("subwire_server=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let pubsub = Arc::new(PubSub::default());
    tokio::spawn(publish_ticks(pubsub.clone()));

    ws::run(config, Arc::new(TopicExecutor::new(pubsub)), Arc::new(NoHooks)).await?;
    Ok(())
}

async fn publish_ticks(pubsub: Arc<PubSub>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut tick: u64 = 0;
    loop {
        interval.tick().await;
        tick += 1;
        pubsub.publish("ticks", json!({ "tick": tick })).await;
    }
}
