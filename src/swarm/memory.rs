//! Scripted in-memory swarm engine
//!
//! Nothing happens on its own: callers push events, counters and file
//! contents, then observe what the session did with them (selected files,
//! destroy calls, served bytes).

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;

use super::{
    AddOptions, FileReader, SeedOptions, Swarm, SwarmClient, SwarmCounters, SwarmError,
    SwarmEvent,
};
use crate::models::{InfoHash, TorrentFile, TorrentMetadata};
use crate::resolve::{magnet_uri, TorrentSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Metadata for made-up content: one entry per `(name, length)`
pub fn synthetic_metadata(name: &str, files: &[(&str, u64)], piece_length: u64) -> TorrentMetadata {
    let multi = files.len() > 1;
    let mut offset = 0;
    let files: Vec<TorrentFile> = files
        .iter()
        .enumerate()
        .map(|(index, (file_name, length))| {
            let path = if multi {
                PathBuf::from(name).join(file_name)
            } else {
                PathBuf::from(file_name)
            };
            let file = TorrentFile {
                index,
                name: file_name.to_string(),
                path,
                length: *length,
                offset,
            };
            offset += length;
            file
        })
        .collect();

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&Sha1::digest(name.as_bytes()));
    let piece_count = offset.div_ceil(piece_length.max(1)) as usize;

    TorrentMetadata {
        name: name.to_string(),
        info_hash: InfoHash::new(hash),
        files,
        piece_length,
        pieces: vec![[0; 20]; piece_count],
        length: offset,
        announce: Vec::new(),
        url_list: Vec::new(),
        comment: None,
        created_by: None,
        private: false,
    }
}

// =============================================================================
// Client
// =============================================================================

#[derive(Default)]
pub struct MemoryClient {
    queued: Mutex<VecDeque<Arc<MemorySwarm>>>,
    created: Mutex<Vec<Arc<MemorySwarm>>>,
    destroy_count: AtomicUsize,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `add` or `seed` hands out this swarm
    pub fn push(&self, swarm: Arc<MemorySwarm>) {
        lock(&self.queued).push_back(swarm);
    }

    /// Swarms handed out so far
    pub fn created(&self) -> Vec<Arc<MemorySwarm>> {
        lock(&self.created).clone()
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy_count.load(Ordering::SeqCst)
    }

    fn hand_out(&self, fallback: impl FnOnce() -> Arc<MemorySwarm>) -> Arc<dyn Swarm> {
        let swarm = lock(&self.queued).pop_front().unwrap_or_else(fallback);
        lock(&self.created).push(swarm.clone());
        swarm
    }
}

#[async_trait]
impl SwarmClient for MemoryClient {
    fn engine_name(&self) -> &'static str {
        "memory"
    }

    async fn add(
        &self,
        source: TorrentSource,
        _options: AddOptions,
    ) -> Result<Arc<dyn Swarm>, SwarmError> {
        Ok(self.hand_out(|| match source {
            TorrentSource::Metadata(metadata) => MemorySwarm::new(metadata),
            TorrentSource::Magnet(link) => MemorySwarm::magnet(link.info_hash),
        }))
    }

    async fn seed(
        &self,
        path: &Path,
        _options: SeedOptions,
    ) -> Result<Arc<dyn Swarm>, SwarmError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.hand_out(|| MemorySwarm::new(synthetic_metadata(&name, &[(&name, 0)], 16384))))
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        self.destroy_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Torrent Handle
// =============================================================================

pub struct MemorySwarm {
    info_hash: InfoHash,
    metadata: Mutex<Option<Arc<TorrentMetadata>>>,
    contents: Mutex<HashMap<usize, Vec<u8>>>,
    counters: Mutex<SwarmCounters>,
    selected: Mutex<Vec<usize>>,
    events_tx: mpsc::UnboundedSender<SwarmEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SwarmEvent>>>,
    destroy_count: AtomicUsize,
    destroy_delay: Mutex<Option<Duration>>,
}

impl MemorySwarm {
    fn build(info_hash: InfoHash, metadata: Option<TorrentMetadata>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let counters = SwarmCounters {
            length: metadata.as_ref().map(|m| m.length),
            piece_length: metadata.as_ref().map(|m| m.piece_length).unwrap_or(0),
            ..Default::default()
        };
        Arc::new(Self {
            info_hash,
            metadata: Mutex::new(metadata.map(Arc::new)),
            contents: Mutex::new(HashMap::new()),
            counters: Mutex::new(counters),
            selected: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            destroy_count: AtomicUsize::new(0),
            destroy_delay: Mutex::new(None),
        })
    }

    pub fn new(metadata: TorrentMetadata) -> Arc<Self> {
        Self::build(metadata.info_hash, Some(metadata))
    }

    /// Swarm whose metadata has not arrived yet
    pub fn magnet(info_hash: InfoHash) -> Arc<Self> {
        Self::build(info_hash, None)
    }

    /// Single or multi-file torrent whose files hold the given bytes
    pub fn with_contents(name: &str, files: Vec<(&str, Vec<u8>)>) -> Arc<Self> {
        let shape: Vec<(&str, u64)> = files.iter().map(|(n, b)| (*n, b.len() as u64)).collect();
        let swarm = Self::new(synthetic_metadata(name, &shape, 16384));
        for (index, (_, bytes)) in files.into_iter().enumerate() {
            swarm.set_contents(index, bytes);
        }
        swarm
    }

    pub fn emit(&self, event: SwarmEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Deliver metadata, as peers would for a magnet link
    pub fn set_metadata(&self, metadata: TorrentMetadata) {
        {
            let mut counters = lock(&self.counters);
            counters.length = Some(metadata.length);
            counters.piece_length = metadata.piece_length;
        }
        *lock(&self.metadata) = Some(Arc::new(metadata));
    }

    pub fn set_contents(&self, index: usize, bytes: Vec<u8>) {
        lock(&self.contents).insert(index, bytes);
    }

    pub fn set_counters(&self, counters: SwarmCounters) {
        *lock(&self.counters) = counters;
    }

    /// Mutate the live counters in place
    pub fn update_counters(&self, f: impl FnOnce(&mut SwarmCounters)) {
        f(&mut lock(&self.counters));
    }

    /// Make `destroy` hang for a while, like a slow transport
    pub fn set_destroy_delay(&self, delay: Duration) {
        *lock(&self.destroy_delay) = Some(delay);
    }

    pub fn selected_files(&self) -> Vec<usize> {
        lock(&self.selected).clone()
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Swarm for MemorySwarm {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn metadata(&self) -> Option<Arc<TorrentMetadata>> {
        lock(&self.metadata).clone()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SwarmEvent>> {
        lock(&self.events_rx).take()
    }

    fn counters(&self) -> SwarmCounters {
        lock(&self.counters).clone()
    }

    fn select_file(&self, index: usize) -> Result<(), SwarmError> {
        let metadata = self.metadata().ok_or(SwarmError::MetadataPending)?;
        metadata.file(index).ok_or(SwarmError::NoSuchFile(index))?;
        lock(&self.selected).push(index);
        Ok(())
    }

    async fn open_file(&self, index: usize, range: Range<u64>) -> Result<FileReader, SwarmError> {
        let metadata = self.metadata().ok_or(SwarmError::MetadataPending)?;
        let file = metadata.file(index).ok_or(SwarmError::NoSuchFile(index))?;
        if range.start > range.end || range.end > file.length {
            return Err(SwarmError::InvalidRange {
                start: range.start,
                end: range.end,
                length: file.length,
            });
        }
        let contents = lock(&self.contents);
        let bytes = contents
            .get(&index)
            .ok_or_else(|| SwarmError::Engine(format!("no content for file {}", index)))?;
        let slice = bytes[range.start as usize..range.end as usize].to_vec();
        Ok(Box::pin(Cursor::new(slice)))
    }

    fn magnet_uri(&self) -> String {
        let name = self.metadata().map(|m| m.name.clone());
        magnet_uri(self.info_hash, name.as_deref(), &[])
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        self.destroy_count.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.destroy_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_synthetic_metadata_offsets() {
        let m = synthetic_metadata("pack", &[("a.mkv", 100), ("b.srt", 20)], 64);
        assert_eq!(m.length, 120);
        assert_eq!(m.piece_count(), 2);
        assert_eq!(m.files[1].offset, 100);
        assert_eq!(m.files[1].path, PathBuf::from("pack/b.srt"));
    }

    #[tokio::test]
    async fn test_client_hands_out_queued_swarm() {
        let client = MemoryClient::new();
        let swarm = MemorySwarm::with_contents("clip", vec![("clip.mp4", vec![1, 2, 3])]);
        client.push(swarm.clone());

        let source = TorrentSource::Metadata(synthetic_metadata("other", &[("x", 1)], 16));
        let handed = client.add(source, AddOptions::default()).await.unwrap();
        assert_eq!(handed.info_hash(), swarm.info_hash());
        assert_eq!(client.created().len(), 1);
    }

    #[tokio::test]
    async fn test_open_file_slices_contents() {
        let swarm = MemorySwarm::with_contents("clip", vec![("clip.mp4", (0..10).collect())]);
        let mut reader = swarm.open_file(0, 2..5).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_events_are_buffered_until_taken() {
        let swarm = MemorySwarm::magnet(InfoHash::new([1; 20]));
        swarm.emit(SwarmEvent::Metadata);
        swarm.emit(SwarmEvent::Done);
        let mut rx = swarm.take_events().unwrap();
        assert_eq!(rx.recv().await, Some(SwarmEvent::Metadata));
        assert_eq!(rx.recv().await, Some(SwarmEvent::Done));
    }
}
