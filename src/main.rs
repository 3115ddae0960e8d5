//! Tag Arena Relay
//!
//! Stateless event relay between Tag Arena game instances. One shared room;
//! every frame is forwarded to the other connections.

use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tag_arena::network::{RelayConfig, RelayServer};
use tag_arena::{DEFAULT_RELAY_PORT, VERSION};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Interface to bind
    #[arg(long, env = "TAG_ARENA_HOST", default_value = "0.0.0.0")]
    host: IpAddr,
    /// Port to listen on
    #[arg(long, env = "TAG_ARENA_PORT", default_value_t = DEFAULT_RELAY_PORT)]
    port: u16,
    /// Maximum concurrent connections
    #[arg(long, env = "TAG_ARENA_MAX_CONNECTIONS", default_value_t = 256)]
    max_connections: usize,
    /// Frames buffered per slow connection
    #[arg(long, default_value_t = 1024)]
    room_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = RelayConfig {
        bind_addr: SocketAddr::new(cli.host, cli.port),
        max_connections: cli.max_connections,
        room_capacity: cli.room_capacity,
    };

    info!("Tag Arena relay v{}", VERSION);
    info!("Max connections: {}", config.max_connections);

    let server = RelayServer::new(config);
    tokio::select! {
        result = server.run() => {
            result.context("relay stopped")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("Interrupted, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
