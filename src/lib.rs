//! swarmcast - stream torrents to your media player or TV
//!
//! Downloads a torrent, serves its files over HTTP while pieces arrive, and
//! hands the stream to a local player or a cast device.
//!
//! # Modules
//!
//! - `resolve` - Torrent identifiers (magnet, URL, path, info hash) and `.torrent` files
//! - `swarm` - The swarm engine seam (librqbit, local disk, in-memory), blocklists
//! - `stream` - Streaming HTTP server, file selection, players and cast sinks
//! - `session` - Per-torrent lifecycle, shutdown, signals, batches
//! - `ui` - Terminal stats display
//! - `hooks` - `--on-done` / `--on-exit` scripts
//! - `cli` / `commands` - Argument parsing and command handlers

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod hooks;
pub mod models;
pub mod resolve;
pub mod session;
pub mod stream;
pub mod swarm;
pub mod ui;

// Re-export commonly used types
pub use config::Config;
pub use error::{InputError, OrchestratorError, SessionError};
pub use models::{
    InfoHash, PeerProgress, StatsSnapshot, StreamEndpoint, TorrentFile, TorrentMetadata,
    TorrentSession, TorrentState,
};
pub use resolve::TorrentSource;
pub use session::{run_batch, run_batch_with, Controller, Mode, Outcome, SessionOptions, SessionReport};
pub use swarm::{
    Engine, LocalClient, MemoryClient, MemorySwarm, RqbitClient, Swarm, SwarmClient, SwarmEvent,
};
