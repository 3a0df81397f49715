//! Swarm session capability
//!
//! The peer-to-peer engine is consumed through two traits: a [`SwarmClient`]
//! that creates torrents, and a [`Swarm`] handle per torrent that reports
//! lifecycle events and exposes live counters plus per-file readers.
//!
//! - `rqbit`: librqbit engine, joins real swarms over the network
//! - `local`: disk-backed engine (verifies and seeds local data, no peers)
//! - `memory`: scripted in-memory engine for tests and demos
//! - `blocklist`: IP filter handed to the client at construction

pub mod blocklist;
pub mod local;
pub mod memory;
pub mod rqbit;

use std::net::{IpAddr, SocketAddr};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::models::{InfoHash, TorrentMetadata};
use crate::resolve::TorrentSource;

pub use blocklist::Blocklist;
pub use local::LocalClient;
pub use memory::{MemoryClient, MemorySwarm};
pub use rqbit::RqbitClient;

/// Byte stream over one file range
pub type FileReader = Pin<Box<dyn AsyncRead + Send>>;

/// Errors reported by a swarm engine
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Torrent metadata is not available yet")]
    MetadataPending,

    #[error("No file with index {0} in this torrent")]
    NoSuchFile(usize),

    #[error("Range {start}-{end} is outside file of length {length}")]
    InvalidRange { start: u64, end: u64, length: u64 },

    #[error("Swarm has been destroyed")]
    Destroyed,

    #[error("{0}")]
    Engine(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle events emitted by a torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmEvent {
    /// Info hash is known
    InfoHash(InfoHash),
    /// Info dictionary received
    Metadata,
    /// Storage verified, files readable
    Ready,
    /// A piece passed its hash check
    PieceVerified(u32),
    /// Every piece verified
    Done,
    /// New peer connection
    Wire(Option<SocketAddr>),
    /// A slow peer was swapped for a better one
    Hotswap,
    /// Connection refused by the blocklist
    BlockedPeer(IpAddr),
    /// Fatal engine error
    Error(String),
}

/// Piece availability advertised by a peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bytes: Vec<u8>,
}

impl Bitfield {
    pub fn new(piece_count: usize) -> Self {
        Self {
            bytes: vec![0; piece_count.div_ceil(8)],
        }
    }

    /// Bitfield with the first `piece_count` bits set
    pub fn full(piece_count: usize) -> Self {
        let mut field = Self::new(piece_count);
        for i in 0..piece_count {
            field.set(i);
        }
        field
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn get(&self, index: usize) -> bool {
        self.bytes
            .get(index / 8)
            .map(|b| b & (0x80 >> (index % 8)) != 0)
            .unwrap_or(false)
    }

    pub fn set(&mut self, index: usize) {
        let byte = index / 8;
        if byte >= self.bytes.len() {
            self.bytes.resize(byte + 1, 0);
        }
        self.bytes[byte] |= 0x80 >> (index % 8);
    }

    /// Number of set bits among the first `piece_count`
    pub fn count(&self, piece_count: usize) -> usize {
        (0..piece_count).filter(|&i| self.get(i)).count()
    }
}

/// Live counters of one peer connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireStats {
    pub remote_address: Option<SocketAddr>,
    pub downloaded: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
    /// Whether the peer is choking us
    pub peer_choking: bool,
    /// Piece indexes of outstanding requests
    pub requests: Vec<u32>,
    pub peer_pieces: Bitfield,
}

/// Already-materialized counters of one torrent. Cheap to read, never blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwarmCounters {
    pub num_peers: usize,
    pub num_queued: usize,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub downloaded: u64,
    pub uploaded: u64,
    /// None until metadata arrives
    pub length: Option<u64>,
    pub piece_length: u64,
    pub time_remaining: Option<Duration>,
    pub done: bool,
    pub wires: Vec<WireStats>,
}

/// Options for creating a swarm client
#[derive(Debug, Clone, Default)]
pub struct SwarmOptions {
    pub blocklist: Option<Blocklist>,
}

/// Which engine backs the session commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Rqbit,
    Local,
}

impl Engine {
    pub fn name(self) -> &'static str {
        match self {
            Engine::Rqbit => RqbitClient::ENGINE,
            Engine::Local => LocalClient::ENGINE,
        }
    }

    pub fn client(self, options: SwarmOptions) -> Arc<dyn SwarmClient> {
        match self {
            Engine::Rqbit => Arc::new(RqbitClient::new(options)),
            Engine::Local => Arc::new(LocalClient::new(options)),
        }
    }
}

/// Options for adding a torrent
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Download directory
    pub path: PathBuf,
    /// Extra trackers to announce to
    pub announce: Vec<String>,
}

/// Options for seeding local content
#[derive(Debug, Clone, Default)]
pub struct SeedOptions {
    pub announce: Vec<String>,
}

/// Creates torrents. One client per CLI invocation.
#[async_trait]
pub trait SwarmClient: Send + Sync {
    /// Short engine name for version and diagnostic output
    fn engine_name(&self) -> &'static str;

    /// Join the swarm of an existing torrent
    async fn add(
        &self,
        source: TorrentSource,
        options: AddOptions,
    ) -> Result<Arc<dyn Swarm>, SwarmError>;

    /// Create a torrent from local content and seed it
    async fn seed(&self, path: &Path, options: SeedOptions)
        -> Result<Arc<dyn Swarm>, SwarmError>;

    /// Release every torrent owned by this client
    async fn destroy(&self) -> Result<(), SwarmError>;
}

/// Handle to one torrent within a client
#[async_trait]
pub trait Swarm: Send + Sync {
    fn info_hash(&self) -> InfoHash;

    /// Resolved metadata, None while it is still being fetched
    fn metadata(&self) -> Option<Arc<TorrentMetadata>>;

    /// Event stream. Only the first caller receives it.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SwarmEvent>>;

    /// Snapshot of live counters
    fn counters(&self) -> SwarmCounters;

    /// Prioritize pieces of the given file
    fn select_file(&self, index: usize) -> Result<(), SwarmError>;

    /// Reader over `range` of the given file. Reads of pieces that are not
    /// downloaded yet are the engine's concern.
    async fn open_file(&self, index: usize, range: Range<u64>) -> Result<FileReader, SwarmError>;

    fn magnet_uri(&self) -> String;

    async fn destroy(&self) -> Result<(), SwarmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names_and_config_spelling() {
        assert_eq!(Engine::default(), Engine::Rqbit);
        assert_eq!(Engine::Rqbit.name(), "librqbit");
        assert_eq!(Engine::Local.name(), "local");

        let client = Engine::Local.client(SwarmOptions::default());
        assert_eq!(client.engine_name(), "local");

        #[derive(Deserialize)]
        struct Holder {
            engine: Engine,
        }
        let holder: Holder = toml::from_str("engine = \"local\"").unwrap();
        assert_eq!(holder.engine, Engine::Local);
    }

    #[test]
    fn test_bitfield_set_and_get() {
        let mut field = Bitfield::new(10);
        assert!(!field.get(3));
        field.set(3);
        field.set(9);
        assert!(field.get(3));
        assert!(field.get(9));
        assert!(!field.get(4));
        assert_eq!(field.count(10), 2);
    }

    #[test]
    fn test_bitfield_full_ignores_spare_bits() {
        let field = Bitfield::full(10);
        assert_eq!(field.count(10), 10);
        assert!(!field.get(10));
    }

    #[test]
    fn test_bitfield_from_wire_bytes() {
        let field = Bitfield::from_bytes(vec![0b1010_0000]);
        assert!(field.get(0));
        assert!(!field.get(1));
        assert!(field.get(2));
        assert!(!field.get(100));
    }
}
