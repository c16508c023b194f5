//! parleyd - relay server for two-party text messaging
//!
//! Clients register accounts, authenticate into time-limited sessions,
//! exchange direct messages (pushed live when the recipient has a
//! listening connection, queued otherwise), browse the account directory,
//! and manage their unread queue. State lives either in memory or in a
//! SQLite database; both backends behave identically on the wire.

use anyhow::Result;
use clap::Parser;
use parley::config::{BackendKind, CodecKind, ServerConfig, DEFAULT_PORT};
use parley::protocol::{CompactCodec, FrameCodec, JsonCodec};
use parley::server::RelayServer;
use parley::storage::{spawn_session_sweeper, MemoryStore, SqliteStore, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Relay server for two-party text messaging.
#[derive(Parser, Debug)]
#[command(name = "parleyd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Frame codec spoken on the wire
    #[arg(long, value_enum, default_value = "json")]
    codec: CodecKind,

    /// Storage backend
    #[arg(long, value_enum, default_value = "memory")]
    backend: BackendKind,

    /// Database file (sqlite backend only)
    #[arg(long, default_value = "parley.db")]
    db_path: PathBuf,

    /// Seconds a session token stays valid
    #[arg(long, default_value_t = 3000)]
    session_ttl: u64,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 60)]
    sweep_interval: u64,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            codec: self.codec,
            backend: self.backend,
            db_path: self.db_path,
            session_ttl: Duration::from_secs(self.session_ttl),
            sweep_interval: Duration::from_secs(self.sweep_interval),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config();

    let store: Arc<dyn Store> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryStore::new(config.session_ttl)),
        BackendKind::Sqlite => {
            info!("opening database at {}", config.db_path.display());
            Arc::new(SqliteStore::open(&config.db_path, config.session_ttl)?)
        }
    };

    let codec: Arc<dyn FrameCodec> = match config.codec {
        CodecKind::Json => Arc::new(JsonCodec::new()),
        CodecKind::Compact => Arc::new(CompactCodec::new()),
    };

    spawn_session_sweeper(store.clone(), config.sweep_interval);

    let server = RelayServer::new(store, codec);
    let listener = server.bind(&config.listen_addr()).await?;

    tokio::select! {
        _ = server.serve(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
