//! Per-invocation session settings
//!
//! Built by the command layer from flags layered over [`Config`].

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::InputError;
use crate::hooks::Hook;
use crate::stream::{PlayerTarget, SelectRequest, SinkOptions};

/// What the session does with its torrent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Download,
    Seed,
}

impl Mode {
    /// `seed` pointed at a torrent file or magnet link downloads it instead
    pub fn for_input(self, input: &str) -> Mode {
        let is_torrent_id = input.starts_with("magnet:")
            || Path::new(input)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("torrent"));
        match self {
            Mode::Seed if is_torrent_id => Mode::Download,
            mode => mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub port: u16,
    pub bind_address: IpAddr,
    /// Download directory as given by the user
    pub out: Option<PathBuf>,
    pub announce: Vec<String>,
    pub player: Option<PlayerTarget>,
    pub select: SelectRequest,
    pub subtitles: Option<PathBuf>,
    pub quiet: bool,
    pub verbose: bool,
    pub keep_seeding: bool,
    pub quit_on_player_exit: bool,
    pub on_done: Option<Hook>,
    pub on_exit: Option<Hook>,
    pub sink: SinkOptions,
    /// Listen for SIGINT/SIGTERM
    pub handle_signals: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SessionOptions {
    /// Defaults taken from the config file
    pub fn from_config(config: &Config) -> Self {
        Self {
            port: config.port,
            bind_address: config.bind_address,
            out: config.out.clone(),
            announce: config.announce.clone(),
            player: None,
            select: SelectRequest::Auto,
            subtitles: None,
            quiet: false,
            verbose: false,
            keep_seeding: config.keep_seeding,
            quit_on_player_exit: config.quit_on_player_exit,
            on_done: None,
            on_exit: None,
            sink: SinkOptions {
                not_on_top: config.not_on_top,
                player_args: config.player_args.clone(),
                discovery_interval: std::time::Duration::from_secs(
                    config.discovery_interval_secs,
                ),
            },
            handle_signals: true,
        }
    }

    /// Where downloaded data is written. Plain downloads land in the working
    /// directory, streamed ones in a scratch directory.
    pub fn download_dir(&self) -> PathBuf {
        if let Some(out) = &self.out {
            return out.clone();
        }
        match self.player {
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            Some(_) => std::env::temp_dir().join("swarmcast"),
        }
    }

    /// Per-session flags make no sense for several torrents at once
    pub fn validate_batch(&self, inputs: usize) -> Result<(), InputError> {
        if inputs <= 1 {
            return Ok(());
        }
        if let Some(player) = &self.player {
            return Err(InputError::IncompatibleBatchOption(player.flag()));
        }
        if self.select != SelectRequest::Auto {
            return Err(InputError::IncompatibleBatchOption("select"));
        }
        if self.subtitles.is_some() {
            return Err(InputError::IncompatibleBatchOption("subtitles"));
        }
        Ok(())
    }

    /// Startup checks that need the filesystem
    pub fn validate_files(&self) -> Result<(), InputError> {
        match &self.subtitles {
            Some(path) if !path.is_file() => Err(InputError::SubtitlesMissing(path.clone())),
            _ => Ok(()),
        }
    }
}
