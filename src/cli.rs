//! CLI - Command Line Interface for swarmcast
//!
//! # Examples
//!
//! ```bash
//! # Download into the current directory
//! swarmcast download "magnet:?xt=urn:btih:..."
//!
//! # Stream the largest file to VLC
//! swarmcast download movie.torrent --vlc
//!
//! # List the files, then pick one for mpv
//! swarmcast download movie.torrent --select
//! swarmcast download movie.torrent --select 2 --mpv
//!
//! # Seed a folder, print the magnet link
//! swarmcast seed ./videos --quiet
//! ```

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use crate::stream::PlayerTarget;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success, including a deliberate interrupt
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments or input
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Player or cast device failed
    PlayerFailed = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// swarmcast - stream torrents to your media player or TV
#[derive(Parser, Debug)]
#[command(
    name = "swarmcast",
    version,
    about = "Stream torrents straight into your media player or onto your TV",
    long_about = "Download a torrent, serve its files over HTTP while pieces arrive, \
                  and hand the stream to a local player or a network cast device.\n\n\
                  <torrent-id> may be a magnet URI, an http(s) URL of a .torrent file, \
                  a path to a .torrent file, or a hex info hash.",
    after_help = "EXAMPLES:\n\
                  swarmcast download magnet:?xt=urn:btih:...     Download to the current directory\n\
                  swarmcast download movie.torrent --vlc         Stream to VLC\n\
                  swarmcast download movie.torrent --select      List files\n\
                  swarmcast seed ./videos                        Seed a folder"
)]
pub struct Cli {
    /// Don't show the stats display on stdout
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Show torrent protocol details and debug logs
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a torrent, optionally streaming it to a player
    #[command(visible_alias = "add")]
    Download(StreamCmd),

    /// Seed a file or folder
    Seed(StreamCmd),

    /// Create a .torrent file
    Create(CreateCmd),

    /// Show info for a .torrent file or magnet URI
    Info(InfoCmd),

    /// Print the version
    Version,
}

/// Inputs plus the flags shared by `download` and `seed`
#[derive(Args, Debug)]
pub struct StreamCmd {
    /// Torrent ids (download) or files and folders (seed)
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub player: PlayerArgs,

    #[command(flatten)]
    pub session: SessionArgs,
}

/// Playback target. At most one.
#[derive(Args, Debug, Default, Clone)]
#[group(multiple = false)]
pub struct PlayerArgs {
    /// VLC
    #[arg(long)]
    pub vlc: bool,

    /// MPV
    #[arg(long)]
    pub mpv: bool,

    /// MPlayer
    #[arg(long)]
    pub mplayer: bool,

    /// OMXPlayer, with the audio output jack
    #[arg(long, value_name = "JACK", num_args = 0..=1, default_missing_value = "hdmi")]
    pub omx: Option<String>,

    /// IINA
    #[arg(long)]
    pub iina: bool,

    /// Chromecast, optionally a single device by name or address
    #[arg(long, value_name = "DEVICE")]
    pub chromecast: Option<Option<String>>,

    /// DLNA renderers on the local network
    #[arg(long)]
    pub dlna: bool,

    /// Write the selected file to standard out (implies --quiet)
    #[arg(long)]
    pub stdout: bool,
}

impl PlayerArgs {
    pub fn target(&self) -> Option<PlayerTarget> {
        if self.vlc {
            Some(PlayerTarget::Vlc)
        } else if self.mpv {
            Some(PlayerTarget::Mpv)
        } else if self.mplayer {
            Some(PlayerTarget::MPlayer)
        } else if let Some(jack) = &self.omx {
            Some(PlayerTarget::Omx { jack: jack.clone() })
        } else if self.iina {
            Some(PlayerTarget::Iina)
        } else if let Some(device) = &self.chromecast {
            Some(PlayerTarget::Chromecast {
                device: device.clone(),
            })
        } else if self.dlna {
            Some(PlayerTarget::Dlna)
        } else if self.stdout {
            Some(PlayerTarget::Stdout)
        } else {
            None
        }
    }
}

/// Session flags. Unset values fall back to the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct SessionArgs {
    /// Download destination [default: current directory]
    #[arg(long, short = 'o', value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Select a file by index; without an index, list the files
    #[arg(long, short = 's', value_name = "INDEX")]
    pub select: Option<Option<usize>>,

    /// Subtitles file
    #[arg(long, short = 't', value_name = "PATH")]
    pub subtitles: Option<PathBuf>,

    /// Streaming server port [default: 8000]
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Blocklist file or http(s) URL
    #[arg(long, short = 'b', value_name = "PATH_OR_URL")]
    pub blocklist: Option<String>,

    /// Tracker URL to announce to (repeatable)
    #[arg(long, short = 'a', value_name = "URL")]
    pub announce: Vec<String>,

    /// Don't ask the player to stay on top
    #[arg(long)]
    pub not_on_top: bool,

    /// Don't quit when the download is done
    #[arg(long)]
    pub keep_seeding: bool,

    /// Don't quit when the player exits
    #[arg(long)]
    pub no_quit: bool,

    /// Run a script after the download is done
    #[arg(long, value_name = "SCRIPT")]
    pub on_done: Option<PathBuf>,

    /// Run a script before the program exits
    #[arg(long, value_name = "SCRIPT")]
    pub on_exit: Option<PathBuf>,
}

/// Create a .torrent file from a file or folder
#[derive(Args, Debug)]
pub struct CreateCmd {
    /// File or folder to describe
    pub input: PathBuf,

    /// Write the .torrent here instead of stdout
    #[arg(long, short = 'o', value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Tracker URL (repeatable)
    #[arg(long, short = 'a', value_name = "URL")]
    pub announce: Vec<String>,

    /// Free-form comment
    #[arg(long)]
    pub comment: Option<String>,

    /// Private torrent (no DHT or peer exchange)
    #[arg(long)]
    pub private: bool,

    /// Piece length in bytes [default: chosen from the content size]
    #[arg(long, value_name = "BYTES")]
    pub piece_length: Option<u64>,

    /// Created-by field
    #[arg(long, value_name = "TEXT")]
    pub created_by: Option<String>,
}

/// Show info for a torrent
#[derive(Args, Debug)]
pub struct InfoCmd {
    /// Magnet URI, .torrent URL or path, or info hash
    pub torrent_id: String,

    /// Write the JSON here instead of stdout
    #[arg(long, short = 'o', value_name = "PATH")]
    pub out: Option<PathBuf>,
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self { quiet: cli.quiet }
    }

    /// Print pretty JSON to stdout
    pub fn print_json<T: Serialize>(&self, data: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(data)?);
        Ok(())
    }

    /// Print error and return exit code. Errors are never silenced.
    pub fn error(&self, msg: impl std::fmt::Display, code: ExitCode) -> ExitCode {
        eprintln!("Error: {}", msg);
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }
}

/// Printed after an unexpected failure, for bug reports
pub fn diagnostic_banner(engine: &str, code: ExitCode) -> String {
    format!(
        "\nUNEXPECTED ERROR: If this is a bug in swarmcast, report it!\n\
         DEBUG INFO: swarmcast {}, engine {}, {} {}, exit {}",
        env!("CARGO_PKG_VERSION"),
        engine,
        std::env::consts::OS,
        std::env::consts::ARCH,
        i32::from(code)
    )
}

// =============================================================================
// Tests
// =============================================================================
