mod http;
mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use taskio_core::directory::HttpProjectDirectory;
use taskio_core::{logging, Config};
use taskio_realtime::{Notifier, SessionRegistry, StreamBridge};

use server::{GatewayServer, Services};

#[derive(Parser, Debug)]
#[command(name = "taskio")]
#[command(about = "TaskIO real-time notification gateway", long_about = None)]
struct Args {
    /// Path to a TOML configuration file (environment variables override it)
    #[arg(long, env = "TASKIO_CONFIG")]
    config: Option<String>,

    /// Consumer name inside the broker group (generated from hostname if not provided)
    #[arg(long, env = "TASKIO_CONSUMER_NAME")]
    consumer_name: Option<String>,
}

/// Generate a unique consumer name for this gateway instance
fn generate_consumer_name(prefix: &str) -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| String::from("unknown"));

    // Random suffix keeps restarted instances from reclaiming a dead
    // consumer's pending entries.
    format!("{prefix}-{hostname}-{}", nanoid::nanoid!(6))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Configuration, rejected up front if unusable
    let config = Config::load(args.config.as_deref())?;
    config.validate()?;

    // 2. Logging
    logging::init_logging(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "TaskIO gateway starting");

    // 3. Shared components
    let registry = Arc::new(SessionRegistry::new());
    let directory = Arc::new(HttpProjectDirectory::from_config(&config.upstream)?);
    let notifier = Arc::new(Notifier::new(registry.clone(), directory));

    let consumer = args
        .consumer_name
        .unwrap_or_else(|| generate_consumer_name(&config.broker.consumer_prefix));
    info!(%consumer, "Joining broker consumer group");
    let bridge = Arc::new(StreamBridge::from_config(&config, consumer)?);

    // 4. Broker bridge. The gateway must not accept traffic it cannot fan
    //    out across instances, so a broker failure here is fatal.
    bridge.start(notifier.clone()).await?;

    // 5. Serve until shutdown
    let services = Services {
        registry,
        notifier,
        bridge,
    };
    let gateway = GatewayServer::new(config, services);
    gateway.start().await?;

    Ok(())
}
