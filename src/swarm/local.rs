//! Disk-backed swarm engine
//!
//! Has no peer wire of its own. Existing data under the download directory is
//! hashed against the piece table, local content can be seeded, and file reads
//! come straight from disk. A magnet-only torrent never receives metadata here:
//! it sits in the fetching state with zero peers, which the stats display
//! renders like any other stalled swarm.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    AddOptions, Bitfield, Blocklist, FileReader, SeedOptions, Swarm, SwarmClient, SwarmCounters,
    SwarmError, SwarmEvent, SwarmOptions,
};
use crate::models::{InfoHash, TorrentMetadata};
use crate::resolve::{create_torrent, magnet_uri, CreateOptions, TorrentSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Client
// =============================================================================

pub struct LocalClient {
    blocklist: Option<Blocklist>,
    swarms: Mutex<Vec<Arc<LocalSwarm>>>,
}

impl LocalClient {
    /// Engine name reported by `version` and the diagnostic banner
    pub const ENGINE: &'static str = "local";

    pub fn new(options: SwarmOptions) -> Self {
        if let Some(list) = &options.blocklist {
            tracing::debug!(rules = list.len(), "blocklist loaded");
        }
        Self {
            blocklist: options.blocklist,
            swarms: Mutex::new(Vec::new()),
        }
    }

    pub fn blocklist(&self) -> Option<&Blocklist> {
        self.blocklist.as_ref()
    }

    fn track(&self, swarm: Arc<LocalSwarm>) -> Arc<dyn Swarm> {
        lock(&self.swarms).push(swarm.clone());
        swarm
    }
}

#[async_trait]
impl SwarmClient for LocalClient {
    fn engine_name(&self) -> &'static str {
        Self::ENGINE
    }

    async fn add(
        &self,
        source: TorrentSource,
        options: AddOptions,
    ) -> Result<Arc<dyn Swarm>, SwarmError> {
        let mut trackers = source.trackers().to_vec();
        for tracker in options.announce {
            if !trackers.contains(&tracker) {
                trackers.push(tracker);
            }
        }
        let magnet = magnet_uri(source.info_hash(), source.display_name(), &trackers);

        let swarm = match source {
            TorrentSource::Metadata(metadata) => {
                let swarm = LocalSwarm::new(metadata.info_hash, magnet, options.path, Some(metadata));
                swarm.start(true);
                swarm
            }
            TorrentSource::Magnet(link) => {
                tracing::info!(info_hash = %link.info_hash, "waiting for metadata from peers");
                let swarm = LocalSwarm::new(link.info_hash, magnet, options.path, None);
                swarm.start(false);
                swarm
            }
        };
        Ok(self.track(swarm))
    }

    async fn seed(
        &self,
        path: &Path,
        options: SeedOptions,
    ) -> Result<Arc<dyn Swarm>, SwarmError> {
        let content = tokio::fs::canonicalize(path).await?;
        let root = content
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        let create = CreateOptions {
            announce: options.announce,
            ..Default::default()
        };
        let created = tokio::task::spawn_blocking(move || create_torrent(&content, &create))
            .await
            .map_err(|e| SwarmError::Engine(e.to_string()))??;

        let metadata = created.metadata;
        let magnet = magnet_uri(metadata.info_hash, Some(&metadata.name), &metadata.announce);
        let swarm = LocalSwarm::new(metadata.info_hash, magnet, root, Some(metadata));
        swarm.mark_complete();
        swarm.start(false);
        Ok(self.track(swarm))
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        let swarms = std::mem::take(&mut *lock(&self.swarms));
        for swarm in swarms {
            swarm.destroy().await?;
        }
        Ok(())
    }
}

// =============================================================================
// Torrent Handle
// =============================================================================

#[derive(Debug, Default)]
struct Progress {
    verified: Bitfield,
    verified_bytes: u64,
    complete: bool,
}

#[derive(Debug)]
struct SpeedMeter {
    last: Instant,
    last_total: u64,
    speed: u64,
}

impl SpeedMeter {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            last_total: 0,
            speed: 0,
        }
    }

    fn sample(&mut self, total: u64) -> u64 {
        let elapsed = self.last.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let delta = total.saturating_sub(self.last_total);
            self.speed = (delta as f64 / elapsed.as_secs_f64()) as u64;
            self.last = Instant::now();
            self.last_total = total;
        }
        self.speed
    }
}

pub struct LocalSwarm {
    info_hash: InfoHash,
    magnet: String,
    root: PathBuf,
    metadata: Option<Arc<TorrentMetadata>>,
    events_tx: mpsc::UnboundedSender<SwarmEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SwarmEvent>>>,
    progress: Arc<Mutex<Progress>>,
    selected: Mutex<Option<usize>>,
    uploaded: Arc<AtomicU64>,
    upload_meter: Mutex<SpeedMeter>,
    destroyed: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalSwarm {
    fn new(
        info_hash: InfoHash,
        magnet: String,
        root: PathBuf,
        metadata: Option<TorrentMetadata>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let progress = Progress {
            verified: Bitfield::new(metadata.as_ref().map(|m| m.piece_count()).unwrap_or(0)),
            ..Default::default()
        };
        Arc::new(Self {
            info_hash,
            magnet,
            root,
            metadata: metadata.map(Arc::new),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            progress: Arc::new(Mutex::new(progress)),
            selected: Mutex::new(None),
            uploaded: Arc::new(AtomicU64::new(0)),
            upload_meter: Mutex::new(SpeedMeter::new()),
            destroyed: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        })
    }

    /// Content just hashed by us, every piece is present
    fn mark_complete(&self) {
        if let Some(metadata) = &self.metadata {
            let mut progress = lock(&self.progress);
            progress.verified = Bitfield::full(metadata.piece_count());
            progress.verified_bytes = metadata.length;
            progress.complete = true;
        }
    }

    /// Emit the lifecycle events, hashing existing data first when `verify`
    fn start(&self, verify: bool) {
        let tx = self.events_tx.clone();
        let info_hash = self.info_hash;
        let metadata = self.metadata.clone();
        let root = self.root.clone();
        let progress = self.progress.clone();
        let destroyed = self.destroyed.clone();

        let handle = tokio::spawn(async move {
            let _ = tx.send(SwarmEvent::InfoHash(info_hash));
            let Some(metadata) = metadata else {
                return;
            };
            let _ = tx.send(SwarmEvent::Metadata);

            if verify {
                let verify_tx = tx.clone();
                let verify_progress = progress.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    verify_pieces(&root, &metadata, &verify_progress, &destroyed, &verify_tx)
                })
                .await;
                if let Err(e) = outcome {
                    let _ = tx.send(SwarmEvent::Error(format!("verification failed: {}", e)));
                    return;
                }
            }

            let complete = lock(&progress).complete;
            let _ = tx.send(SwarmEvent::Ready);
            if complete {
                let _ = tx.send(SwarmEvent::Done);
            }
        });
        *lock(&self.task) = Some(handle);
    }

    fn ensure_alive(&self) -> Result<(), SwarmError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SwarmError::Destroyed);
        }
        Ok(())
    }
}

#[async_trait]
impl Swarm for LocalSwarm {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn metadata(&self) -> Option<Arc<TorrentMetadata>> {
        self.metadata.clone()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SwarmEvent>> {
        lock(&self.events_rx).take()
    }

    fn counters(&self) -> SwarmCounters {
        let progress = lock(&self.progress);
        let uploaded = self.uploaded.load(Ordering::Relaxed);
        let upload_speed = lock(&self.upload_meter).sample(uploaded);
        SwarmCounters {
            num_peers: 0,
            num_queued: 0,
            download_speed: 0,
            upload_speed,
            downloaded: progress.verified_bytes,
            uploaded,
            length: self.metadata.as_ref().map(|m| m.length),
            piece_length: self.metadata.as_ref().map(|m| m.piece_length).unwrap_or(0),
            time_remaining: progress.complete.then_some(Duration::ZERO),
            done: progress.complete,
            wires: Vec::new(),
        }
    }

    fn select_file(&self, index: usize) -> Result<(), SwarmError> {
        self.ensure_alive()?;
        let metadata = self.metadata.as_ref().ok_or(SwarmError::MetadataPending)?;
        let file = metadata.file(index).ok_or(SwarmError::NoSuchFile(index))?;
        tracing::debug!(index, name = %file.name, "file selected");
        *lock(&self.selected) = Some(index);
        Ok(())
    }

    async fn open_file(&self, index: usize, range: Range<u64>) -> Result<FileReader, SwarmError> {
        self.ensure_alive()?;
        let metadata = self.metadata.as_ref().ok_or(SwarmError::MetadataPending)?;
        let file = metadata.file(index).ok_or(SwarmError::NoSuchFile(index))?;
        if range.start > range.end || range.end > file.length {
            return Err(SwarmError::InvalidRange {
                start: range.start,
                end: range.end,
                length: file.length,
            });
        }

        let mut handle = tokio::fs::File::open(self.root.join(&file.path)).await?;
        handle.seek(SeekFrom::Start(range.start)).await?;
        Ok(Box::pin(CountingReader {
            inner: handle.take(range.end - range.start),
            counter: self.uploaded.clone(),
        }))
    }

    fn magnet_uri(&self) -> String {
        self.magnet.clone()
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        tracing::debug!(info_hash = %self.info_hash, "swarm destroyed");
        Ok(())
    }
}

// =============================================================================
// Piece Verification
// =============================================================================

/// Hash every piece present on disk. Returns once all pieces were checked or
/// the swarm was destroyed.
fn verify_pieces(
    root: &Path,
    metadata: &TorrentMetadata,
    progress: &Mutex<Progress>,
    destroyed: &AtomicBool,
    tx: &mpsc::UnboundedSender<SwarmEvent>,
) {
    let mut verified = 0;
    for (index, expected) in metadata.pieces.iter().enumerate() {
        if destroyed.load(Ordering::SeqCst) {
            return;
        }
        let Ok(data) = read_piece(root, metadata, index) else {
            continue;
        };
        if Sha1::digest(&data).as_slice() != expected {
            continue;
        }
        verified += 1;
        {
            let mut progress = lock(progress);
            progress.verified.set(index);
            progress.verified_bytes += data.len() as u64;
        }
        let _ = tx.send(SwarmEvent::PieceVerified(index as u32));
    }

    let mut progress = lock(progress);
    progress.complete = verified == metadata.piece_count();
    tracing::debug!(verified, total = metadata.piece_count(), "verification finished");
}

/// Bytes of one piece, spanning file boundaries
fn read_piece(root: &Path, metadata: &TorrentMetadata, index: usize) -> std::io::Result<Vec<u8>> {
    let start = index as u64 * metadata.piece_length;
    let end = start + metadata.piece_size(index);
    let mut data = Vec::with_capacity((end - start) as usize);

    for file in &metadata.files {
        let file_end = file.offset + file.length;
        if file_end <= start || file.offset >= end {
            continue;
        }
        let from = start.max(file.offset) - file.offset;
        let to = end.min(file_end) - file.offset;
        let mut handle = File::open(root.join(&file.path))?;
        handle.seek(SeekFrom::Start(from))?;
        let mut chunk = vec![0u8; (to - from) as usize];
        handle.read_exact(&mut chunk)?;
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// Counts bytes handed to readers as uploaded
struct CountingReader<R> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = (buf.filled().len() - before) as u64;
            self.counter.fetch_add(read, Ordering::Relaxed);
        }
        result
    }
}

// =============================================================================
// Tests
// =============================================================================
