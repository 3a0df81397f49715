//! Streaming infrastructure
//!
//! - Server: HTTP endpoint serving torrent files by index
//! - Select: which file gets streamed
//! - Dispatch: player targets and the sink contract
//! - Player: local player processes (VLC, mpv, MPlayer, OMXPlayer, IINA)
//! - Cast: Chromecast via catt, DLNA via SSDP/UPnP
//! - Subtitles: auxiliary subtitle server for cast devices

pub mod cast;
pub mod dispatch;
pub mod player;
pub mod select;
pub mod server;
pub mod subtitles;

pub use dispatch::{dispatch, sink_for, LaunchError, LaunchHandle, PlayerTarget, Sink, SinkEvent, SinkOptions};
pub use player::{LocalPlayer, PlayerType};
pub use select::{SelectRequest, Selection};
pub use server::StreamServer;
pub use subtitles::SubtitleServer;
