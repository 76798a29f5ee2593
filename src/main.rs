//! Light-Cycle Duel Server
//!
//! Binds the WebSocket server and runs until Ctrl-C.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lightcycle::{GameServer, ServerConfig, TICK_RATE, VERSION};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env();
    info!("Lightcycle Server v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);
    info!(
        "Arena: {}x{}, join timeout {:?}",
        config.match_config.width, config.match_config.height, config.match_config.join_timeout
    );

    let server = GameServer::new(config);
    let listener = server.bind().await.context("binding server address")?;

    tokio::select! {
        result = server.serve(listener) => result.context("server stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
