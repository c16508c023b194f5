// Server configuration

use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port for the relay.
pub const DEFAULT_PORT: u16 = 54400;

/// How long a session token stays valid after login.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3000);

/// How often the reaper sweeps expired sessions.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-read socket buffer size.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Which frame codec the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodecKind {
    /// Self-delimiting JSON objects (default).
    Json,
    /// Length-prefixed positional encoding.
    Compact,
}

/// Which storage backend holds server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-memory maps, cleared on restart.
    Memory,
    /// SQLite-backed accounts and message queues.
    Sqlite,
}

/// Runtime configuration for a relay server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub codec: CodecKind,
    pub backend: BackendKind,
    pub db_path: PathBuf,
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            codec: CodecKind::Json,
            backend: BackendKind::Memory,
            db_path: PathBuf::from("parley.db"),
            session_ttl: DEFAULT_SESSION_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}
