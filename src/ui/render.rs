//! Stats display
//!
//! Lays a [`StatsSnapshot`] out as styled lines and draws them with
//! crossterm. Layout is pure so it can be tested without a terminal.

use std::io::{self, Write};
use std::path::PathBuf;

use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Print, PrintStyledContent},
    terminal::{self, Clear, ClearType},
};

use crate::models::{format_bytes, format_runtime, humanize_duration, StatsSnapshot};
use crate::ui::theme::{Theme, Tone};

/// Rows kept free below the peer table for the rule and the remainder line
const RESERVED_ROWS: usize = 4;

/// Height used when the terminal size cannot be queried
const FALLBACK_HEIGHT: usize = 24;

// =============================================================================
// Lines
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub tone: Tone,
}

/// One display row made of styled spans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub spans: Vec<Span>,
}

impl Line {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, text: impl Into<String>, tone: Tone) -> Self {
        self.spans.push(Span {
            text: text.into(),
            tone,
        });
        self
    }

    pub fn plain(self, text: impl Into<String>) -> Self {
        self.push(text, Tone::Plain)
    }

    pub fn label(self, text: impl Into<String>) -> Self {
        self.push(text, Tone::Label)
    }

    pub fn value(self, text: impl Into<String>) -> Self {
        self.push(text, Tone::Value)
    }

    /// Text without styling
    pub fn to_plain(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    /// Queue the styled spans followed by a newline
    pub fn write_to(&self, out: &mut impl Write, color: bool) -> io::Result<()> {
        for span in &self.spans {
            if color {
                queue!(out, PrintStyledContent(Theme::paint(&span.text, span.tone)))?;
            } else {
                queue!(out, Print(&span.text))?;
            }
        }
        queue!(out, Print("\r\n"))
    }
}

// =============================================================================
// Status Lines
// =============================================================================

pub fn fetching_metadata(num_peers: usize) -> Line {
    Line::new()
        .label("fetching torrent metadata from ")
        .value(num_peers.to_string())
        .label(" peers")
}

pub fn verifying() -> Line {
    Line::new().label("verifying existing torrent data...")
}

/// Shown once when every piece is verified
pub fn download_complete(active_wires: usize, num_peers: usize, elapsed_seconds: u64) -> Line {
    Line::new()
        .plain("torrent downloaded ")
        .label("successfully")
        .plain(" from ")
        .value(format!("{}/{}", active_wires, num_peers))
        .label(" peers")
        .plain(" in ")
        .value(format!("{}s", elapsed_seconds))
        .plain("!")
}

pub fn exiting() -> Line {
    Line::new().label("swarmcast is exiting...")
}

pub fn error(message: &str) -> Line {
    Line::new().push("Error: ", Tone::Warning).plain(message)
}

// =============================================================================
// Layout
// =============================================================================

/// Session facts that are not part of the swarm counters
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    /// Display name of the player being streamed to
    pub player: Option<String>,
    /// URL of the streamed file
    pub server_url: Option<String>,
    pub out_dir: Option<PathBuf>,
    pub verbose: bool,
}

/// Lay out a full frame for a terminal `height` rows tall
pub fn layout(snapshot: &StatsSnapshot, ctx: &RenderContext, height: usize) -> Vec<Line> {
    let mut lines = Vec::new();

    let heading = if snapshot.done { "Seeding: " } else { "Downloading: " };
    lines.push(Line::new().label(heading).value(&snapshot.torrent_name));
    if snapshot.done {
        lines.push(Line::new().label("Info hash: ").plain(&snapshot.info_hash));
    }

    match (&ctx.player, &ctx.server_url) {
        (Some(player), Some(url)) => lines.push(
            Line::new()
                .label("Streaming to: ")
                .value(player)
                .plain("  ")
                .label("Server running at: ")
                .value(url),
        ),
        (None, Some(url)) => lines.push(Line::new().label("Server running at: ").value(url)),
        _ => {}
    }

    if let Some(out) = &ctx.out_dir {
        lines.push(
            Line::new()
                .label("Downloading to: ")
                .value(out.display().to_string()),
        );
    }

    let total = snapshot
        .total_length
        .map(format_bytes)
        .unwrap_or_else(|| "?".to_string());
    lines.push(
        Line::new()
            .label("Speed: ")
            .value(format!("{}/s", format_bytes(snapshot.download_speed)))
            .plain("  ")
            .label("Downloaded: ")
            .value(format_bytes(snapshot.downloaded))
            .plain("/")
            .value(total)
            .plain("  ")
            .label("Uploaded: ")
            .value(format_bytes(snapshot.uploaded)),
    );

    let remaining = snapshot
        .estimated_remaining
        .filter(|d| !d.is_zero())
        .map(humanize_duration)
        .unwrap_or_else(|| "N/A".to_string());
    lines.push(
        Line::new()
            .label("Running time: ")
            .value(format_runtime(snapshot.elapsed_seconds))
            .plain("  ")
            .label("Time remaining: ")
            .value(remaining)
            .plain("  ")
            .label("Peers: ")
            .value(format!(
                "{}/{}",
                snapshot.peers.unchoked, snapshot.peers.connected
            )),
    );

    if ctx.verbose {
        lines.push(
            Line::new()
                .label("Queued peers: ")
                .value(snapshot.peers.queued.to_string())
                .plain("  ")
                .label("Blocked peers: ")
                .value(snapshot.peers.blocked.to_string())
                .plain("  ")
                .label("Hotswaps: ")
                .value(snapshot.hotswaps.to_string()),
        );
    }
    lines.push(Line::new());

    // The table always shows at least one peer, then stops once the
    // remaining rows are down to the reserved footer.
    let mut listed = 0;
    for peer in &snapshot.per_peer {
        let mut row = Line::new()
            .plain(format!("{:<3} ", peer.progress.to_string()))
            .push(
                format!("{:<25} ", peer.address.as_deref().unwrap_or("Unknown")),
                Tone::Address,
            )
            .plain(format!("{:<10} ", format_bytes(peer.downloaded)))
            .push(
                format!("{:<12} ", format!("{}/s", format_bytes(peer.download_speed))),
                Tone::Download,
            )
            .push(
                format!("{:<12}", format!("{}/s", format_bytes(peer.upload_speed))),
                Tone::Upload,
            );
        if ctx.verbose {
            let mut tags = Vec::new();
            if peer.active_requests > 0 {
                tags.push(format!("{} reqs", peer.active_requests));
            }
            if peer.choked {
                tags.push("choked".to_string());
            }
            let pieces: Vec<String> = peer.requested_pieces.iter().map(u32::to_string).collect();
            row = row.push(
                format!(" {:<15} {:<10}", tags.join(", "), pieces.join(" ")),
                Tone::Muted,
            );
        }
        lines.push(row);
        listed += 1;

        if height.saturating_sub(lines.len()) <= RESERVED_ROWS {
            break;
        }
    }

    lines.push(Line::new().push("─".repeat(60), Tone::Muted));
    if snapshot.peers.connected > listed {
        lines.push(Line::new().plain(format!(
            "... and {} more",
            snapshot.peers.connected - listed
        )));
    }

    lines
}

// =============================================================================
// Terminal Output
// =============================================================================

/// Terminal height in rows
pub fn terminal_height() -> usize {
    terminal::size()
        .map(|(_, rows)| rows as usize)
        .unwrap_or(FALLBACK_HEIGHT)
}

/// Redraw the whole screen from the top left corner
pub fn draw(out: &mut impl Write, lines: &[Line], color: bool) -> io::Result<()> {
    queue!(out, MoveTo(0, 0), Clear(ClearType::All))?;
    for line in lines {
        line.write_to(out, color)?;
    }
    out.flush()
}

/// Print lines below whatever is on screen
pub fn print(out: &mut impl Write, lines: &[Line], color: bool) -> io::Result<()> {
    for line in lines {
        line.write_to(out, color)?;
    }
    out.flush()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PeerCounts, PeerProgress, PeerSnapshot};
    use std::time::Duration;

    fn peer(i: usize) -> PeerSnapshot {
        PeerSnapshot {
            address: Some(format!("10.0.0.{}:6881", i)),
            progress: PeerProgress::Percent(50),
            downloaded: 2048,
            download_speed: 1500,
            upload_speed: 0,
            active_requests: 2,
            requested_pieces: vec![7, 9],
            choked: true,
        }
    }

    fn snapshot(peers: usize, done: bool) -> StatsSnapshot {
        StatsSnapshot {
            torrent_name: "Big Buck Bunny".to_string(),
            info_hash: "ab".repeat(20),
            download_speed: 2_500_000,
            upload_speed: 0,
            downloaded: 1_000_000,
            uploaded: 20,
            total_length: Some(276_000_000),
            elapsed_seconds: 12,
            estimated_remaining: None,
            peers: PeerCounts {
                connected: peers,
                unchoked: peers / 2,
                queued: 3,
                blocked: 1,
            },
            hotswaps: 4,
            done,
            per_peer: (0..peers).map(peer).collect(),
        }
    }

    fn plain(lines: &[Line]) -> Vec<String> {
        lines.iter().map(Line::to_plain).collect()
    }

    #[test]
    fn test_header_while_downloading() {
        let ctx = RenderContext {
            player: Some("VLC".to_string()),
            server_url: Some("http://localhost:8000/0".to_string()),
            out_dir: Some(PathBuf::from("/tmp/dl")),
            verbose: false,
        };
        let text = plain(&layout(&snapshot(2, false), &ctx, 40));
        assert_eq!(text[0], "Downloading: Big Buck Bunny");
        assert_eq!(
            text[1],
            "Streaming to: VLC  Server running at: http://localhost:8000/0"
        );
        assert_eq!(text[2], "Downloading to: /tmp/dl");
        assert_eq!(text[3], "Speed: 2.5 MB/s  Downloaded: 1 MB/276 MB  Uploaded: 20 B");
        assert_eq!(text[4], "Running time: 12 seconds  Time remaining: N/A  Peers: 1/2");
        assert_eq!(text[5], "");
        assert!(text[6].starts_with("50% 10.0.0.0:6881"));
    }

    #[test]
    fn test_seeding_shows_info_hash() {
        let ctx = RenderContext {
            server_url: Some("http://localhost:8000/0".to_string()),
            ..Default::default()
        };
        let text = plain(&layout(&snapshot(0, true), &ctx, 40));
        assert_eq!(text[0], "Seeding: Big Buck Bunny");
        assert_eq!(text[1], format!("Info hash: {}", "ab".repeat(20)));
        assert_eq!(text[2], "Server running at: http://localhost:8000/0");
    }

    #[test]
    fn test_time_remaining_is_humanized() {
        let mut s = snapshot(0, false);
        s.estimated_remaining = Some(Duration::from_secs(600));
        let text = plain(&layout(&s, &RenderContext::default(), 40));
        assert!(text[2].contains("Time remaining: 10 minutes"));
    }

    #[test]
    fn test_verbose_adds_counters_and_tags() {
        let ctx = RenderContext {
            verbose: true,
            ..Default::default()
        };
        let text = plain(&layout(&snapshot(1, false), &ctx, 40));
        assert_eq!(text[3], "Queued peers: 3  Blocked peers: 1  Hotswaps: 4");
        assert!(text[5].contains("2 reqs, choked"));
        assert!(text[5].trim_end().ends_with("7 9"));
    }

    #[test]
    fn test_peer_list_truncated_to_height() {
        let text = plain(&layout(&snapshot(50, false), &RenderContext::default(), 12));
        let rows = text.iter().filter(|l| l.contains(":6881")).count();
        assert!(rows < 50);
        assert!(text.len() <= 12);
        assert_eq!(text.last().unwrap(), &format!("... and {} more", 50 - rows));
    }

    #[test]
    fn test_all_peers_fit() {
        let text = plain(&layout(&snapshot(3, false), &RenderContext::default(), 40));
        assert_eq!(text.iter().filter(|l| l.contains(":6881")).count(), 3);
        assert!(!text.last().unwrap().contains("more"));
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(
            fetching_metadata(4).to_plain(),
            "fetching torrent metadata from 4 peers"
        );
        assert_eq!(verifying().to_plain(), "verifying existing torrent data...");
        assert_eq!(
            download_complete(2, 5, 31).to_plain(),
            "torrent downloaded successfully from 2/5 peers in 31s!"
        );
        assert_eq!(error("boom").to_plain(), "Error: boom");
    }

    #[test]
    fn test_draw_without_color_writes_plain_text() {
        let mut out = Vec::new();
        print(&mut out, &[verifying()], false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "verifying existing torrent data...\r\n");
    }
}
