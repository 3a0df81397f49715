//! Peer-to-peer swarm engine backed by librqbit
//!
//! One librqbit `Session` per client, created on the first add so it can use
//! that torrent's download directory as its default. Lifecycle events are
//! derived by polling torrent stats, the same way a status monitor would.

use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use librqbit::api::TorrentIdOrHash;
use librqbit::{AddTorrent, AddTorrentOptions, ManagedTorrent, Session};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

use super::{
    AddOptions, FileReader, SeedOptions, Swarm, SwarmClient, SwarmCounters, SwarmError,
    SwarmEvent, SwarmOptions,
};
use crate::models::{InfoHash, TorrentFile, TorrentMetadata};
use crate::resolve::{create_torrent, magnet_uri, CreateOptions, TorrentSource};

/// How often torrent stats are turned into events
const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn engine_error(err: impl std::fmt::Display) -> SwarmError {
    SwarmError::Engine(format!("{:#}", err))
}

// =============================================================================
// Client
// =============================================================================

pub struct RqbitClient {
    session: OnceCell<Arc<Session>>,
    swarms: Mutex<Vec<Arc<RqbitSwarm>>>,
}

impl RqbitClient {
    /// Engine name reported by `version` and the diagnostic banner
    pub const ENGINE: &'static str = "librqbit";

    pub fn new(options: SwarmOptions) -> Self {
        if let Some(list) = &options.blocklist {
            tracing::warn!(rules = list.len(), "blocklist is not enforced by the librqbit engine");
        }
        Self {
            session: OnceCell::new(),
            swarms: Mutex::new(Vec::new()),
        }
    }

    async fn session(&self, output_folder: &Path) -> Result<Arc<Session>, SwarmError> {
        self.session
            .get_or_try_init(|| async {
                tracing::debug!(folder = %output_folder.display(), "starting librqbit session");
                Session::new(output_folder.to_path_buf())
                    .await
                    .map_err(engine_error)
            })
            .await
            .cloned()
    }

    fn track(&self, swarm: Arc<RqbitSwarm>) -> Arc<dyn Swarm> {
        lock(&self.swarms).push(swarm.clone());
        swarm
    }
}

#[async_trait]
impl SwarmClient for RqbitClient {
    fn engine_name(&self) -> &'static str {
        Self::ENGINE
    }

    async fn add(
        &self,
        source: TorrentSource,
        options: AddOptions,
    ) -> Result<Arc<dyn Swarm>, SwarmError> {
        let session = self.session(&options.path).await?;

        let mut trackers = source.trackers().to_vec();
        for tracker in options.announce {
            if !trackers.contains(&tracker) {
                trackers.push(tracker);
            }
        }
        let magnet = magnet_uri(source.info_hash(), source.display_name(), &trackers);
        let known = match &source {
            TorrentSource::Metadata(metadata) => Some(metadata.clone()),
            TorrentSource::Magnet(_) => None,
        };

        let add = AddTorrent::from_url(magnet.clone());
        let add_opts = AddTorrentOptions {
            overwrite: true,
            output_folder: Some(options.path.to_string_lossy().into_owned()),
            trackers: Some(trackers.clone()),
            ..Default::default()
        };
        let swarm = RqbitSwarm::new(session, source.info_hash(), magnet, trackers, known);
        swarm.start(add, add_opts);
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
            .map_err(engine_error)??;

        let session = self.session(&root).await?;
        let metadata = created.metadata;
        let magnet = magnet_uri(metadata.info_hash, Some(&metadata.name), &metadata.announce);
        let trackers = metadata.announce.clone();

        // Existing files are hashed by librqbit and announced as complete
        let add = AddTorrent::from_bytes(created.bytes);
        let add_opts = AddTorrentOptions {
            overwrite: true,
            output_folder: Some(root.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let swarm = RqbitSwarm::new(session, metadata.info_hash, magnet, trackers, Some(metadata));
        swarm.start(add, add_opts);
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

pub struct RqbitSwarm {
    session: Arc<Session>,
    info_hash: InfoHash,
    magnet: String,
    trackers: Vec<String>,
    handle: Arc<Mutex<Option<Arc<ManagedTorrent>>>>,
    metadata: Arc<Mutex<Option<Arc<TorrentMetadata>>>>,
    events_tx: mpsc::UnboundedSender<SwarmEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SwarmEvent>>>,
    destroyed: Mutex<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RqbitSwarm {
    fn new(
        session: Arc<Session>,
        info_hash: InfoHash,
        magnet: String,
        trackers: Vec<String>,
        metadata: Option<TorrentMetadata>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            session,
            info_hash,
            magnet,
            trackers,
            handle: Arc::new(Mutex::new(None)),
            metadata: Arc::new(Mutex::new(metadata.map(Arc::new))),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            destroyed: Mutex::new(false),
            task: Mutex::new(None),
        })
    }

    /// Add the torrent in the background, then poll its stats into events
    fn start(&self, add: AddTorrent<'static>, add_opts: AddTorrentOptions) {
        let session = self.session.clone();
        let slot = self.handle.clone();
        let metadata_slot = self.metadata.clone();
        let tx = self.events_tx.clone();
        let info_hash = self.info_hash;
        let trackers = self.trackers.clone();

        let task = tokio::spawn(async move {
            let _ = tx.send(SwarmEvent::InfoHash(info_hash));

            let handle = match session.add_torrent(add, Some(add_opts)).await {
                Ok(response) => match response.into_handle() {
                    Some(handle) => handle,
                    None => {
                        let _ = tx.send(SwarmEvent::Error("torrent was not added".to_string()));
                        return;
                    }
                },
                Err(e) => {
                    let _ = tx.send(SwarmEvent::Error(format!("{:#}", e)));
                    return;
                }
            };
            tracing::info!(%info_hash, id = handle.id(), name = ?handle.name(), "torrent added");
            *lock(&slot) = Some(handle.clone());

            let mut tracker = EventTracker::default();
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;

                if lock(&metadata_slot).is_none() {
                    if let Some(metadata) = metadata_from_handle(&handle, info_hash, &trackers) {
                        *lock(&metadata_slot) = Some(Arc::new(metadata));
                    }
                }

                let stats = handle.stats();
                let observed = Observation {
                    has_metadata: lock(&metadata_slot).is_some(),
                    live: format!("{:?}", stats.state) == "Live",
                    finished: stats.finished,
                    error: stats.error.clone(),
                };
                for event in tracker.observe(&observed) {
                    let fatal = matches!(event, SwarmEvent::Error(_));
                    if tx.send(event).is_err() || fatal {
                        return;
                    }
                }
            }
        });
        *lock(&self.task) = Some(task);
    }

    fn handle(&self) -> Result<Arc<ManagedTorrent>, SwarmError> {
        if *lock(&self.destroyed) {
            return Err(SwarmError::Destroyed);
        }
        lock(&self.handle).clone().ok_or(SwarmError::MetadataPending)
    }
}

#[async_trait]
impl Swarm for RqbitSwarm {
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
        let Some(handle) = lock(&self.handle).clone() else {
            return SwarmCounters::default();
        };
        let metadata = self.metadata();
        let stats = handle.stats();

        let (download_speed, upload_speed, num_peers, num_queued) = match &stats.live {
            Some(live) => (
                bytes_per_sec(live.download_speed.mbps),
                bytes_per_sec(live.upload_speed.mbps),
                live.snapshot.peer_stats.live,
                live.snapshot.peer_stats.queued,
            ),
            None => (0, 0, 0, 0),
        };
        let length = metadata.as_ref().map(|m| m.length);

        SwarmCounters {
            num_peers,
            num_queued,
            download_speed,
            upload_speed,
            downloaded: stats.progress_bytes,
            uploaded: stats.uploaded_bytes,
            length,
            piece_length: metadata.as_ref().map(|m| m.piece_length).unwrap_or(0),
            time_remaining: length
                .and_then(|total| time_remaining(total, stats.progress_bytes, download_speed)),
            done: stats.finished,
            wires: Vec::new(),
        }
    }

    fn select_file(&self, index: usize) -> Result<(), SwarmError> {
        let metadata = self.metadata().ok_or(SwarmError::MetadataPending)?;
        let file = metadata.file(index).ok_or(SwarmError::NoSuchFile(index))?;
        let handle = self.handle()?;
        tracing::debug!(index, name = %file.name, "file selected");

        let session = self.session.clone();
        tokio::spawn(async move {
            let only: HashSet<usize> = HashSet::from([index]);
            if let Err(e) = session.update_only_files(&handle, &only).await {
                tracing::warn!(index, error = %e, "could not narrow download to selected file");
            }
        });
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

        let handle = self.handle()?;
        // Readers block on pieces that have not arrived and prioritize them
        let mut stream = handle.stream(index).map_err(engine_error)?;
        stream.seek(std::io::SeekFrom::Start(range.start)).await?;
        Ok(Box::pin(stream.take(range.end - range.start)))
    }

    fn magnet_uri(&self) -> String {
        self.magnet.clone()
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        {
            let mut destroyed = lock(&self.destroyed);
            if *destroyed {
                return Ok(());
            }
            *destroyed = true;
        }
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            self.session
                .delete(TorrentIdOrHash::Id(handle.id()), false)
                .await
                .map_err(engine_error)?;
        }
        tracing::debug!(info_hash = %self.info_hash, "swarm destroyed");
        Ok(())
    }
}

// =============================================================================
// Stats Translation
// =============================================================================

/// Snapshot of what the poller saw on one tick
#[derive(Debug, Clone, Default)]
struct Observation {
    has_metadata: bool,
    live: bool,
    finished: bool,
    error: Option<String>,
}

/// Turns polled state into one-shot lifecycle events
#[derive(Debug, Default)]
struct EventTracker {
    metadata: bool,
    ready: bool,
    done: bool,
}

impl EventTracker {
    fn observe(&mut self, seen: &Observation) -> Vec<SwarmEvent> {
        if let Some(error) = &seen.error {
            return vec![SwarmEvent::Error(error.clone())];
        }

        let mut events = Vec::new();
        if seen.has_metadata && !self.metadata {
            self.metadata = true;
            events.push(SwarmEvent::Metadata);
        }
        if self.metadata && (seen.live || seen.finished) && !self.ready {
            self.ready = true;
            events.push(SwarmEvent::Ready);
        }
        if self.ready && seen.finished && !self.done {
            self.done = true;
            events.push(SwarmEvent::Done);
        }
        events
    }
}

/// librqbit reports speeds in megabits per second
fn bytes_per_sec(mbps: f64) -> u64 {
    (mbps * 125_000.0).max(0.0) as u64
}

fn time_remaining(total: u64, downloaded: u64, speed: u64) -> Option<Duration> {
    let left = total.saturating_sub(downloaded);
    if left == 0 {
        return Some(Duration::ZERO);
    }
    (speed > 0).then(|| Duration::from_secs(left.div_ceil(speed)))
}

fn metadata_from_handle(
    handle: &ManagedTorrent,
    info_hash: InfoHash,
    trackers: &[String],
) -> Option<TorrentMetadata> {
    let loaded = handle.metadata.load();
    let meta = loaded.as_ref()?;
    let files = meta
        .info
        .iter_file_details()
        .ok()?
        .map(|file| (file.filename.to_string().unwrap_or_default(), file.len))
        .collect::<Vec<_>>();
    let name = handle.name().unwrap_or_else(|| info_hash.to_hex());
    Some(build_metadata(
        info_hash,
        name,
        &files,
        meta.lengths.default_piece_length() as u64,
        meta.lengths.total_pieces() as usize,
        trackers,
    ))
}

/// Metadata table from librqbit's file list. Piece hashes stay with the
/// engine, the table only carries their count.
fn build_metadata(
    info_hash: InfoHash,
    name: String,
    files: &[(String, u64)],
    piece_length: u64,
    piece_count: usize,
    trackers: &[String],
) -> TorrentMetadata {
    let mut offset = 0;
    let files = files
        .iter()
        .enumerate()
        .map(|(index, (path, length))| {
            let path = PathBuf::from(path);
            let file = TorrentFile {
                index,
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path,
                length: *length,
                offset,
            };
            offset += length;
            file
        })
        .collect();

    TorrentMetadata {
        name,
        info_hash,
        files,
        piece_length,
        pieces: vec![[0; 20]; piece_count],
        length: offset,
        announce: trackers.to_vec(),
        url_list: Vec::new(),
        comment: None,
        created_by: None,
        private: false,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn seen(has_metadata: bool, live: bool, finished: bool) -> Observation {
        Observation {
            has_metadata,
            live,
            finished,
            error: None,
        }
    }

    #[test]
    fn test_events_follow_lifecycle_order() {
        let mut tracker = EventTracker::default();
        assert!(tracker.observe(&seen(false, false, false)).is_empty());
        assert_eq!(
            tracker.observe(&seen(true, false, false)),
            vec![SwarmEvent::Metadata]
        );
        assert_eq!(
            tracker.observe(&seen(true, true, false)),
            vec![SwarmEvent::Ready]
        );
        assert_eq!(
            tracker.observe(&seen(true, true, true)),
            vec![SwarmEvent::Done]
        );
        // Each event fires once
        assert!(tracker.observe(&seen(true, true, true)).is_empty());
    }

    #[test]
    fn test_already_complete_torrent_emits_everything_at_once() {
        let mut tracker = EventTracker::default();
        assert_eq!(
            tracker.observe(&seen(true, false, true)),
            vec![SwarmEvent::Metadata, SwarmEvent::Ready, SwarmEvent::Done]
        );
    }

    #[test]
    fn test_engine_error_is_reported() {
        let mut tracker = EventTracker::default();
        let events = tracker.observe(&Observation {
            error: Some("disk full".to_string()),
            ..seen(true, true, false)
        });
        assert_eq!(events, vec![SwarmEvent::Error("disk full".to_string())]);
    }

    #[test]
    fn test_speed_and_eta_conversion() {
        assert_eq!(bytes_per_sec(8.0), 1_000_000);
        assert_eq!(bytes_per_sec(-1.0), 0);
        assert_eq!(time_remaining(100, 100, 0), Some(Duration::ZERO));
        assert_eq!(time_remaining(100, 0, 0), None);
        assert_eq!(time_remaining(1000, 0, 300), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_metadata_from_file_list() {
        let hash = InfoHash::new([7; 20]);
        let metadata = build_metadata(
            hash,
            "pack".to_string(),
            &[
                ("pack/a.mkv".to_string(), 30_000),
                ("pack/subs/a.srt".to_string(), 2_000),
            ],
            16_384,
            2,
            &["udp://tracker.example:80".to_string()],
        );
        assert_eq!(metadata.length, 32_000);
        assert_eq!(metadata.piece_count(), 2);
        assert_eq!(metadata.files[1].name, "a.srt");
        assert_eq!(metadata.files[1].offset, 30_000);
        assert_eq!(metadata.files[1].path, PathBuf::from("pack/subs/a.srt"));
        assert_eq!(metadata.announce.len(), 1);
    }
}
