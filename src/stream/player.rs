//! Local Player - external media player processes
//!
//! Opens the stream URL in VLC, mpv, MPlayer, OMXPlayer or IINA and reports
//! the process exit back to the session.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::dispatch::{LaunchError, LaunchHandle, LaunchRequest, PlayerTarget, Sink, SinkEvent};

/// Supported local players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerType {
    /// VLC media player (default)
    #[default]
    Vlc,
    /// mpv media player
    Mpv,
    MPlayer,
    /// OMXPlayer, opened in an lxterminal window
    Omx,
    /// IINA, opened through its URL scheme
    Iina,
}

impl PlayerType {
    /// Get the command name for this player
    pub fn command(&self) -> &'static str {
        match self {
            PlayerType::Vlc => {
                // On macOS, VLC is an app bundle - check for it
                #[cfg(target_os = "macos")]
                if std::path::Path::new("/Applications/VLC.app").exists() {
                    return "/Applications/VLC.app/Contents/MacOS/VLC";
                }
                "vlc"
            }
            PlayerType::Mpv => "mpv",
            PlayerType::MPlayer => "mplayer",
            PlayerType::Omx => "lxterminal",
            PlayerType::Iina => {
                if cfg!(target_os = "macos") {
                    "open"
                } else {
                    "xdg-open"
                }
            }
        }
    }

    /// Get a display name for this player
    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerType::Vlc => "VLC",
            PlayerType::Mpv => "mpv",
            PlayerType::MPlayer => "MPlayer",
            PlayerType::Omx => "OMXPlayer",
            PlayerType::Iina => "IINA",
        }
    }

    /// IINA is handed off through `open`, whose exit says nothing about playback
    pub fn reports_exit(&self) -> bool {
        !matches!(self, PlayerType::Iina)
    }
}

impl std::fmt::Display for PlayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Errors from local player operations
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Player '{0}' not found. Install it first.")]
    NotFound(String),
    #[error("Failed to start player: {0}")]
    StartFailed(#[from] std::io::Error),
}

/// Local player for streaming content
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    player_type: PlayerType,
    not_on_top: bool,
    jack: String,
    extra_args: Vec<String>,
}

impl LocalPlayer {
    /// Create a new local player with the specified type
    pub fn new(player_type: PlayerType) -> Self {
        Self {
            player_type,
            not_on_top: false,
            jack: "hdmi".to_string(),
            extra_args: Vec::new(),
        }
    }

    /// Don't keep the player window above others
    pub fn not_on_top(mut self, not_on_top: bool) -> Self {
        self.not_on_top = not_on_top;
        self
    }

    /// OMXPlayer audio output
    pub fn with_jack(mut self, jack: impl Into<String>) -> Self {
        self.jack = jack.into();
        self
    }

    /// Extra arguments placed before the URL
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Get the player type
    pub fn player_type(&self) -> PlayerType {
        self.player_type
    }

    /// Arguments for playing `stream_url`, program name excluded
    pub fn args(&self, stream_url: &str, subtitle_path: Option<&Path>) -> Vec<String> {
        let on_top = !self.not_on_top;
        let mut args: Vec<String> = Vec::new();

        match self.player_type {
            PlayerType::Vlc => {
                args.extend(["--play-and-exit", "--quiet"].map(String::from));
                if let Some(sub) = subtitle_path {
                    args.push(format!("--sub-file={}", sub.display()));
                }
                if on_top {
                    args.push("--video-on-top".into());
                }
            }
            PlayerType::Mpv => {
                args.extend(["--really-quiet", "--loop=no"].map(String::from));
                if let Some(sub) = subtitle_path {
                    args.push(format!("--sub-file={}", sub.display()));
                }
                if on_top {
                    args.push("--ontop".into());
                }
            }
            PlayerType::MPlayer => {
                args.extend(["-really-quiet", "-noidx", "-loop", "0"].map(String::from));
                if let Some(sub) = subtitle_path {
                    args.push("-sub".into());
                    args.push(sub.display().to_string());
                }
                if on_top {
                    args.push("-ontop".into());
                }
            }
            PlayerType::Omx => {
                args.extend(
                    [
                        "-e",
                        "omxplayer",
                        "-r",
                        "--timeout",
                        "60",
                        "--no-ghost-box",
                        "--align",
                        "center",
                        "-o",
                    ]
                    .map(String::from),
                );
                args.push(self.jack.clone());
                if let Some(sub) = subtitle_path {
                    args.push("--subtitles".into());
                    args.push(sub.display().to_string());
                }
            }
            PlayerType::Iina => {
                args.push(format!("iina://weblink?url={}", stream_url));
                return args;
            }
        }

        args.extend(self.extra_args.iter().cloned());
        args.push(stream_url.to_string());
        args
    }

    /// Play a stream URL with optional subtitles
    ///
    /// # Returns
    /// The spawned child process
    pub fn play(&self, stream_url: &str, subtitle_path: Option<&Path>) -> Result<Child, PlayerError> {
        let mut cmd = Command::new(self.player_type.command());
        cmd.args(self.args(stream_url, subtitle_path));

        // Don't capture output, the stats display owns the terminal
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlayerError::NotFound(self.player_type.command().to_string())
            } else {
                PlayerError::StartFailed(e)
            }
        })
    }
}

/// A local player process as a playback sink
pub struct LocalSink {
    target: PlayerTarget,
    player: LocalPlayer,
}

impl LocalSink {
    pub fn new(target: PlayerTarget, player: LocalPlayer) -> Self {
        Self { target, player }
    }
}

#[async_trait]
impl Sink for LocalSink {
    fn target(&self) -> &PlayerTarget {
        &self.target
    }

    async fn launch(
        &self,
        request: LaunchRequest,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<LaunchHandle, LaunchError> {
        let mut child = self
            .player
            .play(&request.url, request.subtitles_path.as_deref())?;
        let reports_exit = self.player.player_type().reports_exit();
        let name = self.player.player_type().display_name();

        let task = tokio::spawn(async move {
            let status = child.wait().await;
            if !reports_exit {
                return;
            }
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!("waiting for {} failed: {}", name, e);
                    None
                }
            };
            tracing::info!(player = name, ?code, "player exited");
            let _ = events.send(SinkEvent::Exited { code });
        });
        Ok(LaunchHandle::new(self.target.clone(), task))
    }
}
