//! Tic-Tac-Toe Game Server
//!
//! Binds the configured address and serves matches until Ctrl-C.
//!
//! Usage: `tictactoe-server [BIND_ADDR]`

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tictactoe::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {e}"))?;

    let mut config = ServerConfig::from_env();
    if let Some(addr) = std::env::args().nth(1) {
        config = config.with_bind_addr(&addr);
    }

    info!("Tic-Tac-Toe Server v{}", VERSION);
    info!(
        max_connections = config.max_connections,
        outbound_buffer = config.outbound_buffer,
        "Binding {}",
        config.bind_addr
    );

    let server = GameServer::new(config);

    tokio::select! {
        result = server.run() => {
            result.context("Server stopped")?;
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
