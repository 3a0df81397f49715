//! Stats aggregation
//!
//! Turns the swarm's live counters into a [`StatsSnapshot`] once per tick.
//! Hotswap and blocked-peer totals are fed by swarm events, never polled.

use std::time::Instant;

use crate::models::{InfoHash, PeerCounts, PeerProgress, PeerSnapshot, StatsSnapshot};
use crate::swarm::{SwarmCounters, SwarmEvent, WireStats};

/// Cumulative counters plus the previous snapshot
#[derive(Debug)]
pub struct StatsAggregator {
    started: Instant,
    hotswaps: u64,
    blocked: u64,
    last: Option<StatsSnapshot>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Aggregator whose running time counts from `started`
    pub fn started_at(started: Instant) -> Self {
        Self {
            started,
            hotswaps: 0,
            blocked: 0,
            last: None,
        }
    }

    /// Count the events the display totals up
    pub fn on_event(&mut self, event: &SwarmEvent) {
        match event {
            SwarmEvent::Hotswap => self.hotswaps += 1,
            SwarmEvent::BlockedPeer(_) => self.blocked += 1,
            _ => {}
        }
    }

    pub fn hotswaps(&self) -> u64 {
        self.hotswaps
    }

    pub fn blocked(&self) -> u64 {
        self.blocked
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Most recent snapshot
    pub fn last(&self) -> Option<&StatsSnapshot> {
        self.last.as_ref()
    }

    /// Sample already-materialized counters into a fresh snapshot.
    ///
    /// Transfer totals never go backwards between ticks, even when the
    /// engine discards a piece that failed its hash check.
    pub fn tick(
        &mut self,
        name: &str,
        info_hash: InfoHash,
        counters: &SwarmCounters,
    ) -> StatsSnapshot {
        let (floor_down, floor_up) = self
            .last
            .as_ref()
            .map(|s| (s.downloaded, s.uploaded))
            .unwrap_or((0, 0));

        let piece_count = counters
            .length
            .map(|length| piece_count(length, counters.piece_length));

        let snapshot = StatsSnapshot {
            torrent_name: name.to_string(),
            info_hash: info_hash.to_hex(),
            download_speed: counters.download_speed,
            upload_speed: counters.upload_speed,
            downloaded: counters.downloaded.max(floor_down),
            uploaded: counters.uploaded.max(floor_up),
            total_length: counters.length,
            elapsed_seconds: self.elapsed_seconds(),
            estimated_remaining: counters.time_remaining,
            peers: PeerCounts {
                connected: counters.num_peers,
                unchoked: counters.wires.iter().filter(|w| !w.peer_choking).count(),
                queued: counters.num_queued,
                blocked: self.blocked,
            },
            hotswaps: self.hotswaps,
            done: counters.done,
            per_peer: counters
                .wires
                .iter()
                .map(|wire| peer_snapshot(wire, piece_count))
                .collect(),
        };

        self.last = Some(snapshot.clone());
        snapshot
    }
}

fn piece_count(length: u64, piece_length: u64) -> usize {
    if piece_length == 0 {
        return 0;
    }
    length.div_ceil(piece_length) as usize
}

/// Summarize a peer's bitfield against the torrent's piece count
pub fn peer_progress(wire: &WireStats, piece_count: Option<usize>) -> PeerProgress {
    match piece_count {
        None | Some(0) => PeerProgress::Unknown,
        Some(total) => {
            let held = wire.peer_pieces.count(total);
            if held == total {
                PeerProgress::Seed
            } else {
                PeerProgress::Percent((100 * held / total) as u8)
            }
        }
    }
}

fn peer_snapshot(wire: &WireStats, piece_count: Option<usize>) -> PeerSnapshot {
    PeerSnapshot {
        address: wire.remote_address.map(|a| a.to_string()),
        progress: peer_progress(wire, piece_count),
        downloaded: wire.downloaded,
        download_speed: wire.download_speed,
        upload_speed: wire.upload_speed,
        active_requests: wire.requests.len(),
        requested_pieces: wire.requests.clone(),
        choked: wire.peer_choking,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::Bitfield;
    use std::net::{IpAddr, Ipv4Addr};

    fn wire(pieces: &[usize], choking: bool) -> WireStats {
        let mut peer_pieces = Bitfield::new(10);
        for &i in pieces {
            peer_pieces.set(i);
        }
        WireStats {
            remote_address: Some("10.0.0.2:6881".parse().unwrap()),
            downloaded: 4096,
            download_speed: 100,
            upload_speed: 5,
            peer_choking: choking,
            requests: vec![3, 4],
            peer_pieces,
        }
    }

    fn counters(downloaded: u64, uploaded: u64) -> SwarmCounters {
        SwarmCounters {
            num_peers: 3,
            num_queued: 1,
            downloaded,
            uploaded,
            length: Some(10 * 16384),
            piece_length: 16384,
            wires: vec![wire(&[0, 1, 2], false), wire(&(0..10).collect::<Vec<_>>(), true)],
            ..Default::default()
        }
    }

    #[test]
    fn test_peer_progress() {
        assert_eq!(peer_progress(&wire(&[0, 1, 2], false), Some(10)), PeerProgress::Percent(30));
        assert_eq!(peer_progress(&wire(&[0, 1, 2], false), Some(7)), PeerProgress::Percent(42));
        assert_eq!(
            peer_progress(&wire(&(0..10).collect::<Vec<_>>(), false), Some(10)),
            PeerProgress::Seed
        );
        assert_eq!(peer_progress(&wire(&[], false), Some(10)), PeerProgress::Percent(0));
        assert_eq!(peer_progress(&wire(&[1], false), None), PeerProgress::Unknown);
    }

    #[test]
    fn test_tick_counts_unchoked_peers() {
        let mut stats = StatsAggregator::new();
        let snapshot = stats.tick("movie", InfoHash::new([1; 20]), &counters(10, 0));
        assert_eq!(snapshot.peers.connected, 3);
        assert_eq!(snapshot.peers.unchoked, 1);
        assert_eq!(snapshot.peers.queued, 1);
        assert_eq!(snapshot.per_peer.len(), 2);
        assert_eq!(snapshot.per_peer[0].address.as_deref(), Some("10.0.0.2:6881"));
        assert_eq!(snapshot.per_peer[0].active_requests, 2);
        assert_eq!(snapshot.per_peer[1].progress, PeerProgress::Seed);
        assert_eq!(snapshot.info_hash, "01".repeat(20));
    }

    #[test]
    fn test_unknown_length_reports_indeterminate_progress() {
        let mut stats = StatsAggregator::new();
        let mut c = counters(0, 0);
        c.length = None;
        let snapshot = stats.tick("pending", InfoHash::new([0; 20]), &c);
        assert!(snapshot
            .per_peer
            .iter()
            .all(|p| p.progress == PeerProgress::Unknown));
    }

    #[test]
    fn test_event_counters_are_cumulative() {
        let mut stats = StatsAggregator::new();
        let blocked = SwarmEvent::BlockedPeer(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
        stats.on_event(&SwarmEvent::Hotswap);
        stats.on_event(&blocked);
        stats.on_event(&SwarmEvent::Ready);
        stats.on_event(&SwarmEvent::Hotswap);

        let first = stats.tick("t", InfoHash::new([0; 20]), &counters(0, 0));
        assert_eq!(first.hotswaps, 2);
        assert_eq!(first.peers.blocked, 1);

        stats.on_event(&blocked);
        let second = stats.tick("t", InfoHash::new([0; 20]), &counters(0, 0));
        assert_eq!(second.hotswaps, 2);
        assert_eq!(second.peers.blocked, 2);
    }

    #[test]
    fn test_transfer_totals_never_decrease() {
        let mut stats = StatsAggregator::new();
        let a = stats.tick("t", InfoHash::new([0; 20]), &counters(500, 20));
        let b = stats.tick("t", InfoHash::new([0; 20]), &counters(300, 10));
        let c = stats.tick("t", InfoHash::new([0; 20]), &counters(900, 40));
        assert_eq!((a.downloaded, a.uploaded), (500, 20));
        assert_eq!((b.downloaded, b.uploaded), (500, 20));
        assert_eq!((c.downloaded, c.uploaded), (900, 40));
        assert_eq!(stats.last(), Some(&c));
    }
}
