//! Configuration management for swarmcast
//!
//! Defaults for the session flags, read from
//! ~/.config/swarmcast/config.toml. Command line flags win over the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::swarm::Engine;

/// Preferred streaming port
pub const DEFAULT_PORT: u16 = 8000;

/// Seconds between cast device scans
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 5;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preferred port of the streaming server
    pub port: u16,
    /// Address the streaming server listens on
    pub bind_address: IpAddr,
    /// Download directory (defaults to the working directory)
    pub out: Option<PathBuf>,
    /// Extra trackers announced for every torrent
    pub announce: Vec<String>,
    /// Blocklist file path or URL
    pub blocklist: Option<String>,
    /// Do not ask local players to stay on top
    pub not_on_top: bool,
    /// Keep seeding after the download completes
    pub keep_seeding: bool,
    /// End the session when the local player exits
    pub quit_on_player_exit: bool,
    /// Extra arguments appended to local player command lines
    pub player_args: Vec<String>,
    pub discovery_interval_secs: u64,
    /// Swarm engine for download and seed (`rqbit` or `local`)
    pub engine: Engine,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            out: None,
            announce: Vec::new(),
            blocklist: None,
            not_on_top: false,
            keep_seeding: false,
            quit_on_player_exit: true,
            player_args: Vec::new(),
            discovery_interval_secs: DEFAULT_DISCOVERY_INTERVAL_SECS,
            engine: Engine::default(),
        }
    }
}

impl Config {
    /// Get config file path (~/.config/swarmcast/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("swarmcast").join("config.toml"))
    }

    /// Load config from the default location, or defaults if missing or invalid
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load an explicitly named config file. Unlike [`Config::load`], a
    /// missing or malformed file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }
}
