//! parley - relay server for two-party text messaging
//!
//! The core pieces: a frame codec layer turning byte streams into discrete
//! request/response records (two interchangeable codecs), a storage
//! contract over accounts, sessions, and per-user message queues (two
//! interchangeable backends), a dispatcher mapping actions to store calls
//! and live push delivery, and the connection loop with its background
//! session reaper.

pub mod auth;
pub mod config;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod storage;

pub use config::ServerConfig;
pub use handler::RequestHandler;
pub use protocol::{Action, CompactCodec, Frame, FrameCodec, JsonCodec, Status};
pub use server::RelayServer;
pub use storage::{
    spawn_session_sweeper, ConnectionHandle, MemoryStore, QueuedMessage, SqliteStore, Store,
    StoreError,
};
