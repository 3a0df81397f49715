//! Data structures shared across swarmcast
//!
//! Organized by domain:
//! - **Torrent**: info hashes, file descriptors, resolved metadata, session state
//! - **Streaming**: the HTTP endpoint handed to playback sinks
//! - **Stats**: immutable snapshots produced by the render tick

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Torrent Models
// =============================================================================

/// SHA-1 info hash identifying a torrent
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parse a 40 character hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 40 {
            return None;
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl Serialize for InfoHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        InfoHash::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid info hash"))
    }
}

/// One file inside a torrent. `index` is stable for the session lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub index: usize,
    pub name: String,
    /// Path relative to the download directory (includes the torrent
    /// directory for multi-file torrents)
    pub path: PathBuf,
    pub length: u64,
    /// Byte offset of this file within the concatenated torrent content
    pub offset: u64,
}

impl fmt::Display for TorrentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.index, self.name, format_bytes(self.length))
    }
}

/// Resolved torrent descriptor. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentMetadata {
    pub name: String,
    pub info_hash: InfoHash,
    pub files: Vec<TorrentFile>,
    pub piece_length: u64,
    pub pieces: Vec<[u8; 20]>,
    pub length: u64,
    pub announce: Vec<String>,
    pub url_list: Vec<String>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub private: bool,
}

impl TorrentMetadata {
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Length of the final (possibly short) piece
    pub fn last_piece_length(&self) -> u64 {
        if self.piece_length == 0 || self.length == 0 {
            return 0;
        }
        match self.length % self.piece_length {
            0 => self.piece_length,
            rest => rest,
        }
    }

    pub fn piece_size(&self, index: usize) -> u64 {
        if index + 1 == self.piece_count() {
            self.last_piece_length()
        } else {
            self.piece_length
        }
    }

    pub fn file(&self, index: usize) -> Option<&TorrentFile> {
        self.files.get(index)
    }
}

/// Lifecycle of one torrent engagement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorrentState {
    /// Turning the user input into a torrent source
    Resolving,
    /// Info hash known, waiting for the info dictionary from peers
    FetchingMetadata,
    /// Metadata known, hashing existing data on disk
    Verifying,
    /// Serving and transferring pieces
    Active,
    /// Every piece verified
    Done,
    /// Swarm handle released
    Destroyed,
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TorrentState::Resolving => "Resolving",
            TorrentState::FetchingMetadata => "Fetching metadata",
            TorrentState::Verifying => "Verifying",
            TorrentState::Active => "Active",
            TorrentState::Done => "Done",
            TorrentState::Destroyed => "Destroyed",
        };
        f.write_str(label)
    }
}

/// Active torrent engagement owned by the session controller
#[derive(Debug, Clone)]
pub struct TorrentSession {
    pub id: Uuid,
    /// Original user input
    pub identifier: String,
    pub metadata: Option<Arc<TorrentMetadata>>,
    pub state: TorrentState,
    selected_index: Option<usize>,
}

impl TorrentSession {
    /// Create a new session in Resolving state
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier: identifier.into(),
            metadata: None,
            state: TorrentState::Resolving,
            selected_index: None,
        }
    }

    /// Files in stored order, empty until metadata arrives
    pub fn files(&self) -> &[TorrentFile] {
        self.metadata
            .as_deref()
            .map(|m| m.files.as_slice())
            .unwrap_or(&[])
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected_index
    }

    /// Record the selected file. The first selection wins; later calls
    /// return false and leave the selection untouched.
    pub fn select(&mut self, index: usize) -> bool {
        if self.selected_index.is_some() {
            return false;
        }
        self.selected_index = Some(index);
        true
    }

    /// Store metadata once; later deliveries are ignored
    pub fn set_metadata(&mut self, metadata: Arc<TorrentMetadata>) {
        if self.metadata.is_none() {
            self.metadata = Some(metadata);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == TorrentState::Destroyed
    }
}

impl fmt::Display for TorrentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.metadata {
            Some(m) => write!(f, "{} [{}] {}", m.name, m.info_hash, self.state),
            None => write!(f, "{} {}", self.identifier, self.state),
        }
    }
}

// =============================================================================
// Streaming Models
// =============================================================================

/// Where the streaming server can be reached. Recomputed on every bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEndpoint {
    pub host: String,
    pub port: u16,
    pub selected_index: Option<usize>,
}

impl StreamEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            selected_index: None,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// URL of the selected file, if one has been selected
    pub fn url(&self) -> Option<String> {
        self.selected_index
            .map(|index| format!("{}/{}", self.base_url(), index))
    }

    /// Same endpoint as seen from another host name
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self.clone()
        }
    }
}

// =============================================================================
// Stats Models
// =============================================================================

/// Piece availability of a single peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerProgress {
    /// Peer holds every piece
    Seed,
    /// Floor of the percentage of pieces held
    Percent(u8),
    /// Torrent length not known yet
    Unknown,
}

impl fmt::Display for PeerProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerProgress::Seed => f.write_str("S"),
            PeerProgress::Percent(p) => write!(f, "{}%", p),
            PeerProgress::Unknown => f.write_str("?"),
        }
    }
}

/// Swarm-wide peer counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerCounts {
    pub connected: usize,
    pub unchoked: usize,
    pub queued: usize,
    pub blocked: u64,
}

/// One row of the per-peer table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    /// `ip:port`, or None when the transport does not expose it
    pub address: Option<String>,
    pub progress: PeerProgress,
    pub downloaded: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub active_requests: usize,
    /// Piece indexes of the outstanding requests
    pub requested_pieces: Vec<u32>,
    pub choked: bool,
}

/// Display snapshot, replaced wholesale every tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub torrent_name: String,
    pub info_hash: String,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub downloaded: u64,
    pub uploaded: u64,
    pub total_length: Option<u64>,
    pub elapsed_seconds: u64,
    pub estimated_remaining: Option<Duration>,
    pub peers: PeerCounts,
    pub hotswaps: u64,
    pub done: bool,
    pub per_peer: Vec<PeerSnapshot>,
}

impl StatsSnapshot {
    /// Wires that transferred at least one byte to us
    pub fn active_wires(&self) -> usize {
        self.per_peer.iter().filter(|p| p.downloaded > 0).count()
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Human readable byte count (decimal units, like most torrent clients)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let exponent = ((bytes as f64).log10() / 3.0).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1000f64.powi(exponent as i32);
    if value >= 10.0 || value.fract() == 0.0 {
        format!("{:.0} {}", value, UNITS[exponent])
    } else {
        format!("{:.1} {}", value, UNITS[exponent])
    }
}

/// Relative duration in words ("a few seconds", "3 minutes", "2 hours")
pub fn humanize_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let minutes = (secs as f64 / 60.0).round() as u64;
    let hours = (secs as f64 / 3600.0).round() as u64;
    let days = (secs as f64 / 86400.0).round() as u64;

    match secs {
        0..=44 => "a few seconds".to_string(),
        45..=89 => "a minute".to_string(),
        90..=2699 => format!("{} minutes", minutes),
        2700..=5399 => "an hour".to_string(),
        5400..=79199 => format!("{} hours", hours),
        79200..=129599 => "a day".to_string(),
        _ => format!("{} days", days),
    }
}

/// Running time: exact seconds for the first five minutes, words after
pub fn format_runtime(elapsed_seconds: u64) -> String {
    if elapsed_seconds > 300 {
        humanize_duration(Duration::from_secs(elapsed_seconds))
    } else {
        format!("{} seconds", elapsed_seconds)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(length: u64, piece_length: u64) -> TorrentMetadata {
        let count = length.div_ceil(piece_length) as usize;
        TorrentMetadata {
            name: "movie.mkv".to_string(),
            info_hash: InfoHash::new([7; 20]),
            files: vec![],
            piece_length,
            pieces: vec![[0; 20]; count],
            length,
            announce: vec![],
            url_list: vec![],
            comment: None,
            created_by: None,
            private: false,
        }
    }

    #[test]
    fn test_info_hash_hex_round_trip() {
        let hex = "c9e15763f722f23e98a29decdfae341b98d53056";
        let hash = InfoHash::from_hex(hex).unwrap();
        assert_eq!(hash.to_hex(), hex);
        assert_eq!(hash.to_string(), hex);
    }

    #[test]
    fn test_info_hash_rejects_bad_input() {
        assert!(InfoHash::from_hex("abc").is_none());
        assert!(InfoHash::from_hex(&"z".repeat(40)).is_none());
    }

    #[test]
    fn test_last_piece_length() {
        assert_eq!(metadata(1000, 256).last_piece_length(), 232);
        assert_eq!(metadata(1024, 256).last_piece_length(), 256);
        assert_eq!(metadata(1000, 256).piece_size(3), 232);
        assert_eq!(metadata(1000, 256).piece_size(0), 256);
    }

    #[test]
    fn test_session_selection_is_set_once() {
        let mut session = TorrentSession::new("magnet:?xt=urn:btih:abc");
        assert_eq!(session.state, TorrentState::Resolving);
        assert!(session.select(2));
        assert!(!session.select(0));
        assert_eq!(session.selected_index(), Some(2));
    }

    #[test]
    fn test_endpoint_url_requires_selection() {
        let mut endpoint = StreamEndpoint::new("localhost", 8000);
        assert_eq!(endpoint.url(), None);
        endpoint.selected_index = Some(3);
        assert_eq!(endpoint.url().as_deref(), Some("http://localhost:8000/3"));
        assert_eq!(
            endpoint.with_host("192.168.1.20").url().as_deref(),
            Some("http://192.168.1.20:8000/3")
        );
    }

    #[test]
    fn test_peer_progress_display() {
        assert_eq!(PeerProgress::Seed.to_string(), "S");
        assert_eq!(PeerProgress::Percent(42).to_string(), "42%");
        assert_eq!(PeerProgress::Unknown.to_string(), "?");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(999), "999 B");
        assert_eq!(format_bytes(1000), "1 kB");
        assert_eq!(format_bytes(1500), "1.5 kB");
        assert_eq!(format_bytes(25_300_000), "25 MB");
        assert_eq!(format_bytes(4_200_000_000), "4.2 GB");
    }

    #[test]
    fn test_humanize_duration() {
        assert_eq!(humanize_duration(Duration::from_secs(10)), "a few seconds");
        assert_eq!(humanize_duration(Duration::from_secs(60)), "a minute");
        assert_eq!(humanize_duration(Duration::from_secs(600)), "10 minutes");
        assert_eq!(humanize_duration(Duration::from_secs(3600)), "an hour");
        assert_eq!(humanize_duration(Duration::from_secs(3 * 3600)), "3 hours");
        assert_eq!(humanize_duration(Duration::from_secs(5 * 86400)), "5 days");
    }

    #[test]
    fn test_format_runtime() {
        assert_eq!(format_runtime(42), "42 seconds");
        assert_eq!(format_runtime(300), "300 seconds");
        assert_eq!(format_runtime(1200), "20 minutes");
    }
}
