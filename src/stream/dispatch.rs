//! Playback dispatch
//!
//! One [`PlayerTarget`] is chosen at configuration time and turned into a
//! [`Sink`]. Dispatching hands the sink a [`LaunchRequest`] carrying the stream
//! URL (LAN address for network devices, localhost for local processes) and
//! the subtitle track in the form the sink understands.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::cast::{ChromecastSink, DlnaSink};
use super::player::{LocalPlayer, LocalSink, PlayerError, PlayerType};
use super::subtitles::SubtitleServer;
use crate::models::{StreamEndpoint, TorrentFile};
use crate::swarm::{Swarm, SwarmError};

const TITLE_PREFIX: &str = "swarmcast";

// =============================================================================
// Targets
// =============================================================================

/// Where playback goes. Exactly one per session.
///
/// There are no AirPlay or XBMC targets. Network playback goes through
/// Chromecast and DLNA, and XBMC/Kodi renderers accept DLNA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerTarget {
    Vlc,
    Mpv,
    MPlayer,
    /// OMXPlayer on a Raspberry Pi, with the audio output jack
    Omx { jack: String },
    Iina,
    /// Chromecast, optionally pinned to one device name or address
    Chromecast { device: Option<String> },
    Dlna,
    /// Pipe the selected file to stdout
    Stdout,
}

impl PlayerTarget {
    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerTarget::Vlc => "VLC",
            PlayerTarget::Mpv => "MPV",
            PlayerTarget::MPlayer => "MPlayer",
            PlayerTarget::Omx { .. } => "OMXPlayer",
            PlayerTarget::Iina => "IINA",
            PlayerTarget::Chromecast { .. } => "Chromecast",
            PlayerTarget::Dlna => "DLNA",
            PlayerTarget::Stdout => "stdout",
        }
    }

    /// Command-line flag that selects this target
    pub fn flag(&self) -> &'static str {
        match self {
            PlayerTarget::Vlc => "vlc",
            PlayerTarget::Mpv => "mpv",
            PlayerTarget::MPlayer => "mplayer",
            PlayerTarget::Omx { .. } => "omx",
            PlayerTarget::Iina => "iina",
            PlayerTarget::Chromecast { .. } => "chromecast",
            PlayerTarget::Dlna => "dlna",
            PlayerTarget::Stdout => "stdout",
        }
    }

    /// Devices elsewhere on the network, reached through the LAN address
    pub fn is_network(&self) -> bool {
        matches!(self, PlayerTarget::Chromecast { .. } | PlayerTarget::Dlna)
    }

    /// Local player type, None for network and stdout targets
    pub fn player_type(&self) -> Option<PlayerType> {
        match self {
            PlayerTarget::Vlc => Some(PlayerType::Vlc),
            PlayerTarget::Mpv => Some(PlayerType::Mpv),
            PlayerTarget::MPlayer => Some(PlayerType::MPlayer),
            PlayerTarget::Omx { .. } => Some(PlayerType::Omx),
            PlayerTarget::Iina => Some(PlayerType::Iina),
            _ => None,
        }
    }
}

impl fmt::Display for PlayerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// =============================================================================
// Launch Contract
// =============================================================================

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Player(#[from] PlayerError),

    #[error("{target}: device discovery failed: {reason}")]
    Discovery { target: &'static str, reason: String },

    #[error("Could not serve subtitles: {0}")]
    Subtitles(#[source] std::io::Error),

    #[error("Could not stream to stdout: {0}")]
    Stdout(#[from] SwarmError),
}

/// What a sink is asked to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub url: String,
    pub title: String,
    pub file: TorrentFile,
    pub content_type: String,
    /// Subtitle file on disk, for local players
    pub subtitles_path: Option<PathBuf>,
    /// Subtitle file over HTTP, for network devices
    pub subtitles_url: Option<String>,
}

/// Reported back to the session controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Local player process ended
    Exited { code: Option<i32> },
    /// A discovered device accepted the stream
    DevicePlaying { device: String },
    /// One device refused the stream, discovery keeps going
    DeviceFailed { device: String, reason: String },
    /// Unrecoverable sink failure
    Fatal(String),
}

/// Running sink. Dropping it does not stop an external player.
#[derive(Debug)]
pub struct LaunchHandle {
    target: PlayerTarget,
    task: Option<JoinHandle<()>>,
}

impl LaunchHandle {
    pub fn new(target: PlayerTarget, task: JoinHandle<()>) -> Self {
        Self {
            target,
            task: Some(task),
        }
    }

    pub fn target(&self) -> &PlayerTarget {
        &self.target
    }

    /// Stop watching or discovering
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A playback destination
#[async_trait]
pub trait Sink: Send + Sync {
    fn target(&self) -> &PlayerTarget;

    async fn launch(
        &self,
        request: LaunchRequest,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<LaunchHandle, LaunchError>;
}

/// Per-invocation sink settings
#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub not_on_top: bool,
    /// Extra arguments for local players
    pub player_args: Vec<String>,
    pub discovery_interval: Duration,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            not_on_top: false,
            player_args: Vec::new(),
            discovery_interval: Duration::from_secs(5),
        }
    }
}

/// Build the sink for a target
pub fn sink_for(
    target: &PlayerTarget,
    options: &SinkOptions,
    swarm: Arc<dyn Swarm>,
) -> Box<dyn Sink> {
    match target {
        PlayerTarget::Chromecast { device } => Box::new(ChromecastSink::new(
            device.clone(),
            options.discovery_interval,
        )),
        PlayerTarget::Dlna => Box::new(DlnaSink::new(options.discovery_interval)),
        PlayerTarget::Stdout => Box::new(StdoutSink::new(swarm)),
        PlayerTarget::Omx { jack } => Box::new(LocalSink::new(
            target.clone(),
            LocalPlayer::new(PlayerType::Omx)
                .with_jack(jack.clone())
                .not_on_top(options.not_on_top)
                .with_args(options.player_args.clone()),
        )),
        local => {
            let player_type = local.player_type().unwrap_or_default();
            Box::new(LocalSink::new(
                local.clone(),
                LocalPlayer::new(player_type)
                    .not_on_top(options.not_on_top)
                    .with_args(options.player_args.clone()),
            ))
        }
    }
}

/// Host the sink uses to reach the streaming server
pub fn sink_host(target: &PlayerTarget) -> String {
    if target.is_network() {
        match local_ip_address::local_ip() {
            Ok(ip) => return ip.to_string(),
            Err(e) => tracing::warn!("could not determine LAN address: {}", e),
        }
    }
    "localhost".to_string()
}

/// Compose the request for `file` and launch the sink
pub async fn dispatch(
    sink: &dyn Sink,
    endpoint: &StreamEndpoint,
    file: &TorrentFile,
    subtitles: Option<&SubtitleServer>,
    events: mpsc::UnboundedSender<SinkEvent>,
) -> Result<LaunchHandle, LaunchError> {
    let target = sink.target();
    let host = sink_host(target);
    let mut endpoint = endpoint.with_host(host.clone());
    endpoint.selected_index = Some(file.index);
    let url = format!("{}/{}", endpoint.base_url(), file.index);

    let (subtitles_path, subtitles_url) = match subtitles {
        Some(server) if target.is_network() => {
            let url = match target {
                PlayerTarget::Chromecast { .. } => server.webvtt_url(&host).await,
                _ => server.url(&host).await,
            };
            (None, Some(url.map_err(LaunchError::Subtitles)?))
        }
        Some(server) => (Some(server.path().to_path_buf()), None),
        None => (None, None),
    };

    let request = LaunchRequest {
        url,
        title: format!("{} - {}", TITLE_PREFIX, file.name),
        file: file.clone(),
        content_type: mime_guess::from_path(&file.name)
            .first_or_octet_stream()
            .to_string(),
        subtitles_path,
        subtitles_url,
    };
    tracing::info!(target = %target, url = %request.url, "dispatching playback");
    sink.launch(request, events).await
}

// =============================================================================
// Stdout Sink
// =============================================================================

/// Writes the selected file to stdout
pub struct StdoutSink {
    target: PlayerTarget,
    swarm: Arc<dyn Swarm>,
}

impl StdoutSink {
    pub fn new(swarm: Arc<dyn Swarm>) -> Self {
        Self {
            target: PlayerTarget::Stdout,
            swarm,
        }
    }
}

#[async_trait]
impl Sink for StdoutSink {
    fn target(&self) -> &PlayerTarget {
        &self.target
    }

    async fn launch(
        &self,
        request: LaunchRequest,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<LaunchHandle, LaunchError> {
        let mut reader = self
            .swarm
            .open_file(request.file.index, 0..request.file.length)
            .await?;
        let task = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            let result = match tokio::io::copy(&mut reader, &mut stdout).await {
                Ok(_) => stdout.flush().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!("stdout closed by reader");
                }
                Err(e) => {
                    let _ = events.send(SinkEvent::Fatal(format!("stdout: {}", e)));
                }
            }
        });
        Ok(LaunchHandle::new(self.target.clone(), task))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::MemorySwarm;
    use std::sync::Mutex;

    /// Records launch requests instead of playing them
    struct RecordingSink {
        target: PlayerTarget,
        requests: Mutex<Vec<LaunchRequest>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn target(&self) -> &PlayerTarget {
            &self.target
        }

        async fn launch(
            &self,
            request: LaunchRequest,
            _events: mpsc::UnboundedSender<SinkEvent>,
        ) -> Result<LaunchHandle, LaunchError> {
            self.requests.lock().unwrap().push(request);
            Ok(LaunchHandle::new(self.target.clone(), tokio::spawn(async {})))
        }
    }

    fn file(index: usize, name: &str) -> TorrentFile {
        TorrentFile {
            index,
            name: name.to_string(),
            path: PathBuf::from(name),
            length: 1000,
            offset: 0,
        }
    }

    #[test]
    fn test_target_names_and_flags() {
        assert_eq!(PlayerTarget::Vlc.display_name(), "VLC");
        assert_eq!(PlayerTarget::Omx { jack: "hdmi".into() }.flag(), "omx");
        assert!(PlayerTarget::Dlna.is_network());
        assert!(PlayerTarget::Chromecast { device: None }.is_network());
        assert!(!PlayerTarget::Mpv.is_network());
        assert_eq!(PlayerTarget::Stdout.player_type(), None);
    }

    #[test]
    fn test_local_targets_use_localhost() {
        assert_eq!(sink_host(&PlayerTarget::Vlc), "localhost");
        assert_eq!(sink_host(&PlayerTarget::Stdout), "localhost");
    }

    #[tokio::test]
    async fn test_dispatch_builds_local_request() {
        let sink = RecordingSink {
            target: PlayerTarget::Mpv,
            requests: Mutex::new(Vec::new()),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let endpoint = StreamEndpoint::new("localhost", 8123);
        let handle = dispatch(&sink, &endpoint, &file(2, "movie.mkv"), None, tx)
            .await
            .unwrap();
        assert_eq!(handle.target(), &PlayerTarget::Mpv);

        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests[0].url, "http://localhost:8123/2");
        assert_eq!(requests[0].title, "swarmcast - movie.mkv");
        assert_eq!(requests[0].content_type, "video/x-matroska");
        assert_eq!(requests[0].subtitles_url, None);
    }

    #[tokio::test]
    async fn test_dispatch_passes_subtitle_path_to_local_players() {
        let dir = tempfile::tempdir().unwrap();
        let subs = dir.path().join("movie.srt");
        std::fs::write(&subs, "1\n00:00:01,000 --> 00:00:02,000\nhi\n").unwrap();
        let server = SubtitleServer::new(subs.clone());

        let sink = RecordingSink {
            target: PlayerTarget::Vlc,
            requests: Mutex::new(Vec::new()),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let endpoint = StreamEndpoint::new("localhost", 8000);
        dispatch(&sink, &endpoint, &file(0, "movie.mp4"), Some(&server), tx)
            .await
            .unwrap();

        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests[0].subtitles_path.as_deref(), Some(subs.as_path()));
        assert!(!server.is_bound());
    }

    #[tokio::test]
    async fn test_stdout_sink_rejects_missing_file() {
        let swarm = MemorySwarm::with_contents("clip", vec![("clip.mp4", vec![0; 10])]);
        let sink = StdoutSink::new(swarm);
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = LaunchRequest {
            url: "http://localhost:8000/5".into(),
            title: "x".into(),
            file: file(5, "missing.mp4"),
            content_type: "video/mp4".into(),
            subtitles_path: None,
            subtitles_url: None,
        };
        assert!(matches!(
            sink.launch(request, tx).await,
            Err(LaunchError::Stdout(SwarmError::NoSuchFile(5)))
        ));
    }
}
