//! Session lifecycle controller
//!
//! Drives one torrent from identifier to teardown. A single task selects
//! over swarm events, the streaming server's first-connection signal, sink
//! events, interrupts and the stats ticker, so every transition happens in
//! one place and in arrival order.

use std::future;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::options::{Mode, SessionOptions};
use super::shutdown::{should_remain_alive, Outcome, ShutdownState, ShutdownStep, GRACE_PERIOD};
use super::signals::Interrupts;
use crate::error::{InputError, OrchestratorError, SessionError};
use crate::models::{InfoHash, StreamEndpoint, TorrentFile, TorrentSession, TorrentState};
use crate::resolve::resolve;
use crate::stream::dispatch::sink_host;
use crate::stream::select::{select, Selection};
use crate::stream::{
    dispatch, sink_for, LaunchError, LaunchHandle, PlayerTarget, Sink, SinkEvent, StreamServer,
    SubtitleServer,
};
use crate::swarm::{AddOptions, SeedOptions, Swarm, SwarmClient, SwarmError, SwarmEvent};
use crate::ui::render::{self, Line, RenderContext};
use crate::ui::StatsAggregator;

/// Period of the stats display
const TICK: Duration = Duration::from_secs(1);

/// Controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    AwaitingMetadata,
    Streaming,
    Seeding,
    Completing,
    ShuttingDown,
    Terminated,
}

/// What a finished session leaves behind
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: Outcome,
    pub info_hash: Option<InfoHash>,
    pub endpoint: Option<StreamEndpoint>,
    pub selected_index: Option<usize>,
    pub magnet_uri: Option<String>,
    pub steps: Vec<ShutdownStep>,
}

pub struct Controller {
    client: Arc<dyn SwarmClient>,
    mode: Mode,
    options: SessionOptions,
    owns_client: bool,
    interrupts: Interrupts,
    output: Box<dyn Write + Send>,
    color: bool,
    sink_override: Option<Box<dyn Sink>>,

    phase_tx: watch::Sender<Phase>,
    session: TorrentSession,
    shutdown: ShutdownState,
    stats: StatsAggregator,
    swarm: Option<Arc<dyn Swarm>>,
    server: Option<StreamServer>,
    subtitles: Option<SubtitleServer>,
    launch: Option<LaunchHandle>,
    ticker: Option<Interval>,
    href: Option<String>,
    magnet_uri: Option<String>,
    endpoint_tx: watch::Sender<Option<StreamEndpoint>>,
    player_dispatched: bool,
    connection_observed: bool,
    awaiting_metadata: bool,
}

impl Controller {
    pub fn new(client: Arc<dyn SwarmClient>, mode: Mode, options: SessionOptions) -> Self {
        let stdout = std::io::stdout();
        let color = stdout.is_terminal() && std::env::var_os("NO_COLOR").is_none();
        let (endpoint_tx, _) = watch::channel(None);
        let (phase_tx, _) = watch::channel(Phase::Starting);
        Self {
            client,
            mode,
            options,
            owns_client: true,
            interrupts: Interrupts::none(),
            output: Box::new(stdout),
            color,
            sink_override: None,
            phase_tx,
            session: TorrentSession::new(""),
            shutdown: ShutdownState::new(),
            stats: StatsAggregator::new(),
            swarm: None,
            server: None,
            subtitles: None,
            launch: None,
            ticker: None,
            href: None,
            magnet_uri: None,
            endpoint_tx,
            player_dispatched: false,
            connection_observed: false,
            awaiting_metadata: false,
        }
    }

    /// Whether this session fires the on-exit hook and releases the client.
    /// Batches turn it off and finish once every session has ended.
    pub fn owns_client(mut self, owns: bool) -> Self {
        self.owns_client = owns;
        self
    }

    pub fn with_interrupts(mut self, interrupts: Interrupts) -> Self {
        self.interrupts = interrupts;
        self
    }

    /// Write status text somewhere other than stdout
    pub fn with_output(mut self, output: Box<dyn Write + Send>, color: bool) -> Self {
        self.output = output;
        self.color = color;
        self
    }

    /// Play through this sink instead of the one built for the target
    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sink_override = Some(sink);
        self
    }

    pub fn phase(&self) -> Phase {
        *self.phase_tx.borrow()
    }

    /// Phase changes, observable while `run` is in progress
    pub fn phase_updates(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase_tx.send_replace(phase);
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.shutdown
    }

    /// Streaming endpoint, published on bind and again once a file is selected
    pub fn endpoint_updates(&self) -> watch::Receiver<Option<StreamEndpoint>> {
        self.endpoint_tx.subscribe()
    }

    /// Run the session for `input` through to teardown
    pub async fn run(&mut self, input: &str) -> Result<SessionReport, OrchestratorError> {
        self.session = TorrentSession::new(input);
        debug!(session = %self.session.id, %input, mode = ?self.mode, "session started");
        if !self.interrupts.is_registered() && self.options.handle_signals {
            self.interrupts = Interrupts::os();
        }

        let result = self.drive(input).await;
        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(e) => {
                debug!(error = %e, "session failed");
                Outcome::Failed
            }
        };
        let teardown = self.shut_down(outcome).await;
        let outcome = result?;
        teardown?;
        Ok(self.report(outcome))
    }

    fn report(&self, outcome: Outcome) -> SessionReport {
        SessionReport {
            outcome,
            info_hash: self.swarm.as_ref().map(|s| s.info_hash()),
            endpoint: self.server.as_ref().map(|s| s.endpoint().clone()),
            selected_index: self.session.selected_index(),
            magnet_uri: self.magnet_uri.clone(),
            steps: self.shutdown.steps().to_vec(),
        }
    }

    // =========================================================================
    // Startup
    // =========================================================================

    async fn drive(&mut self, input: &str) -> Result<Outcome, OrchestratorError> {
        let client = self.client.clone();
        let swarm = match self.mode {
            Mode::Download => {
                let source = tokio::select! {
                    source = resolve(input) => source?,
                    _ = self.interrupts.recv() => return Ok(Outcome::Interrupted),
                };
                let options = AddOptions {
                    path: self.options.download_dir(),
                    announce: self.options.announce.clone(),
                };
                debug!(path = %options.path.display(), "adding torrent");
                tokio::select! {
                    swarm = client.add(source, options) => swarm?,
                    _ = self.interrupts.recv() => return Ok(Outcome::Interrupted),
                }
            }
            Mode::Seed => {
                let path = PathBuf::from(input);
                if !path.exists() {
                    return Err(InputError::MissingFile(path).into());
                }
                let options = SeedOptions {
                    announce: self.options.announce.clone(),
                };
                tokio::select! {
                    swarm = client.seed(&path, options) => swarm?,
                    _ = self.interrupts.recv() => return Ok(Outcome::Interrupted),
                }
            }
        };
        self.swarm = Some(swarm.clone());
        self.set_phase(Phase::AwaitingMetadata);

        let mut events = swarm
            .take_events()
            .ok_or_else(|| SwarmError::Engine("event stream already taken".to_string()))?;

        let mut connections = match self.mode {
            Mode::Download => {
                let server = tokio::select! {
                    server = StreamServer::bind(swarm.clone(), self.options.bind_address, self.options.port) => server?,
                    _ = self.interrupts.recv() => return Ok(Outcome::Interrupted),
                };
                let connections = server.connections();
                self.endpoint_tx.send_replace(Some(server.endpoint().clone()));
                self.server = Some(server);
                Some(connections)
            }
            Mode::Seed => {
                self.start_seeding(swarm.as_ref());
                None
            }
        };

        self.event_loop(&mut events, &mut connections).await
    }

    fn start_seeding(&mut self, swarm: &dyn Swarm) {
        if let Some(metadata) = swarm.metadata() {
            self.session.set_metadata(metadata);
        }
        let magnet = swarm.magnet_uri();
        info!(info_hash = %swarm.info_hash(), "seeding");
        if self.options.quiet {
            self.write_raw(&magnet);
        } else {
            self.start_ticker();
        }
        self.magnet_uri = Some(magnet);
        self.set_phase(Phase::Seeding);
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    async fn event_loop(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<SwarmEvent>,
        connections: &mut Option<watch::Receiver<bool>>,
    ) -> Result<Outcome, OrchestratorError> {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let mut events_open = true;

        loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Some(outcome) = self.on_swarm_event(event, &sink_tx).await? {
                            return Ok(outcome);
                        }
                    }
                    None => {
                        debug!("swarm event stream closed");
                        events_open = false;
                    }
                },
                () = first_connection(connections) => {
                    info!("client connected to the streaming server");
                    self.connection_observed = true;
                    *connections = None;
                }
                Some(event) = sink_rx.recv() => {
                    if let Some(outcome) = self.on_sink_event(event)? {
                        return Ok(outcome);
                    }
                }
                () = self.interrupts.recv() => {
                    info!("interrupted");
                    return Ok(Outcome::Interrupted);
                }
                _ = next_tick(&mut self.ticker) => self.draw(),
            }
        }
    }

    async fn on_swarm_event(
        &mut self,
        event: SwarmEvent,
        sink_tx: &mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<Option<Outcome>, OrchestratorError> {
        self.stats.on_event(&event);
        match event {
            SwarmEvent::InfoHash(info_hash) => {
                debug!(%info_hash, "info hash known");
                if self.mode == Mode::Download && self.session.metadata.is_none() {
                    self.session.state = TorrentState::FetchingMetadata;
                    self.awaiting_metadata = true;
                    self.show_fetching();
                }
            }
            SwarmEvent::Wire(address) => {
                trace!(?address, "peer connected");
                if self.awaiting_metadata {
                    self.show_fetching();
                }
            }
            SwarmEvent::Metadata => {
                self.awaiting_metadata = false;
                if let Some(metadata) = self.swarm.as_ref().and_then(|s| s.metadata()) {
                    debug!(name = %metadata.name, files = metadata.files.len(), "metadata received");
                    self.session.set_metadata(metadata);
                }
                if self.mode == Mode::Download {
                    self.session.state = TorrentState::Verifying;
                    if !self.options.quiet {
                        self.show(&[render::verifying()]);
                    }
                }
            }
            SwarmEvent::Ready => {
                if self.mode == Mode::Download {
                    return self.on_ready(sink_tx).await;
                }
            }
            SwarmEvent::PieceVerified(index) => trace!(index, "piece verified"),
            SwarmEvent::Done => return Ok(self.on_done()),
            SwarmEvent::Hotswap => debug!("peer hotswapped"),
            SwarmEvent::BlockedPeer(ip) => debug!(%ip, "blocked peer"),
            SwarmEvent::Error(message) => return Err(SwarmError::Engine(message).into()),
        }
        Ok(None)
    }

    async fn on_ready(
        &mut self,
        sink_tx: &mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<Option<Outcome>, OrchestratorError> {
        if self.session.selected_index().is_some() {
            return Ok(None);
        }
        let swarm = self.active_swarm()?;
        let metadata = swarm.metadata().ok_or(SwarmError::MetadataPending)?;
        self.session.set_metadata(metadata.clone());
        self.session.state = TorrentState::Active;

        let index = match select(&metadata.files, self.options.select) {
            Selection::Listing(lines) => {
                for line in lines {
                    self.write_raw(&line);
                }
                return Ok(Some(Outcome::Listed));
            }
            Selection::File(index) => index,
        };

        if let Some(server) = self.server.as_mut() {
            server.select(index)?;
            self.endpoint_tx.send_replace(Some(server.endpoint().clone()));
        }
        self.session.select(index);
        self.set_phase(Phase::Streaming);
        info!(index, "file selected");

        let host = match &self.options.player {
            Some(target) => sink_host(target),
            None => "localhost".to_string(),
        };
        self.href = self
            .server
            .as_ref()
            .map(|s| format!("{}/{}", s.endpoint().with_host(host).base_url(), index));

        if let Some(target) = self.options.player.clone() {
            let file = metadata
                .file(index)
                .cloned()
                .ok_or(SwarmError::NoSuchFile(index))?;
            if let Some(outcome) = self.start_playback(&target, &file, swarm, sink_tx).await? {
                return Ok(Some(outcome));
            }
        }

        if !self.options.quiet {
            self.start_ticker();
        }
        Ok(None)
    }

    async fn start_playback(
        &mut self,
        target: &PlayerTarget,
        file: &TorrentFile,
        swarm: Arc<dyn Swarm>,
        sink_tx: &mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<Option<Outcome>, OrchestratorError> {
        let endpoint = self
            .server
            .as_ref()
            .map(|s| s.endpoint().clone())
            .ok_or_else(|| SwarmError::Engine("streaming server is not running".to_string()))?;
        if let Some(path) = &self.options.subtitles {
            if self.subtitles.is_none() {
                self.subtitles = Some(SubtitleServer::new(path.clone()));
            }
        }

        let sink = match self.sink_override.take() {
            Some(sink) => sink,
            None => sink_for(target, &self.options.sink, swarm),
        };
        // Device discovery and subtitle serving can take a while
        let handle = tokio::select! {
            handle = dispatch(
                sink.as_ref(),
                &endpoint,
                file,
                self.subtitles.as_ref(),
                sink_tx.clone(),
            ) => handle?,
            () = self.interrupts.recv() => {
                info!("interrupted while starting playback");
                return Ok(Some(Outcome::Interrupted));
            }
        };
        self.launch = Some(handle);
        self.player_dispatched = true;
        Ok(None)
    }

    fn on_done(&mut self) -> Option<Outcome> {
        if self.session.state == TorrentState::Done {
            return None;
        }
        self.session.state = TorrentState::Done;
        if self.mode == Mode::Seed {
            return None;
        }

        if !self.options.quiet {
            if let Some(swarm) = &self.swarm {
                let counters = swarm.counters();
                let active = counters.wires.iter().filter(|w| w.downloaded > 0).count();
                let line = render::download_complete(
                    active,
                    counters.num_peers,
                    self.stats.elapsed_seconds(),
                );
                self.print(&[Line::new(), line]);
            }
        }
        if let Some(hook) = &self.options.on_done {
            if self.shutdown.mark_hook(hook.name()) {
                hook.fire();
            }
        }

        self.set_phase(Phase::Completing);
        let connected = self.connection_observed
            || self.server.as_ref().is_some_and(StreamServer::has_connection);
        if should_remain_alive(self.player_dispatched, connected, self.options.keep_seeding) {
            info!("download complete, seeding");
            self.set_phase(Phase::Seeding);
            None
        } else {
            info!("download complete");
            Some(Outcome::Completed)
        }
    }

    fn on_sink_event(&mut self, event: SinkEvent) -> Result<Option<Outcome>, OrchestratorError> {
        match event {
            SinkEvent::Exited { code } => {
                info!(?code, "player exited");
                if self.options.quit_on_player_exit {
                    return Ok(Some(Outcome::PlayerExited));
                }
            }
            SinkEvent::DevicePlaying { device } => info!(%device, "device is playing"),
            SinkEvent::DeviceFailed { device, reason } => {
                warn!(%device, %reason, "device refused the stream")
            }
            SinkEvent::Fatal(reason) => {
                let target = self
                    .options
                    .player
                    .as_ref()
                    .map(PlayerTarget::display_name)
                    .unwrap_or("sink");
                return Err(LaunchError::Discovery { target, reason }.into());
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Run the shutdown sequence. Only the first call does anything.
    pub async fn shut_down(&mut self, outcome: Outcome) -> Result<(), SessionError> {
        if !self.shutdown.trigger(outcome) {
            return Ok(());
        }
        self.set_phase(Phase::ShuttingDown);
        let finishing = self.owns_client;

        self.interrupts.deregister();
        self.shutdown.record(ShutdownStep::DeregisterSignals);

        if let Some(subtitles) = &self.subtitles {
            subtitles.close();
        }
        self.shutdown.record(ShutdownStep::CloseSubtitles);

        self.ticker = None;
        self.shutdown.record(ShutdownStep::StopTicker);

        if finishing {
            if !self.options.quiet {
                self.print(&[Line::new(), render::exiting()]);
            }
            if let Some(hook) = &self.options.on_exit {
                if self.shutdown.mark_hook(hook.name()) {
                    hook.fire();
                }
            }
            self.shutdown.record(ShutdownStep::OnExitHook);
        }

        if let Some(launch) = self.launch.as_mut() {
            launch.stop();
        }
        if let Some(server) = self.server.as_mut() {
            server.close();
        }

        let deadline = self
            .shutdown
            .deadline()
            .unwrap_or_else(|| Instant::now() + GRACE_PERIOD);
        let swarm = self.swarm.clone();
        let client = self.client.clone();
        let teardown = async move {
            if let Some(swarm) = swarm {
                swarm.destroy().await?;
            }
            if finishing {
                client.destroy().await?;
            }
            Ok::<(), SwarmError>(())
        };
        let result = match tokio::time::timeout_at(deadline, teardown).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Teardown(e.to_string())),
            Err(_) => {
                warn!("swarm teardown still running after {:?}, giving up", GRACE_PERIOD);
                Ok(())
            }
        };
        self.shutdown.record(ShutdownStep::Teardown);

        self.session.state = TorrentState::Destroyed;
        self.set_phase(Phase::Terminated);
        result
    }

    // =========================================================================
    // Output
    // =========================================================================

    fn active_swarm(&self) -> Result<Arc<dyn Swarm>, SwarmError> {
        self.swarm.clone().ok_or(SwarmError::Destroyed)
    }

    fn start_ticker(&mut self) {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
    }

    fn show_fetching(&mut self) {
        if self.options.quiet {
            return;
        }
        let peers = self.swarm.as_ref().map(|s| s.counters().num_peers).unwrap_or(0);
        self.show(&[render::fetching_metadata(peers)]);
    }

    fn draw(&mut self) {
        let Some(swarm) = self.swarm.clone() else {
            return;
        };
        let counters = swarm.counters();
        let name = self
            .session
            .metadata
            .as_ref()
            .map(|m| m.name.clone())
            .unwrap_or_else(|| self.session.identifier.clone());
        let snapshot = self.stats.tick(&name, swarm.info_hash(), &counters);

        let out_dir = match self.mode {
            Mode::Download => self
                .options
                .out
                .clone()
                .or_else(|| self.options.player.is_none().then(|| self.options.download_dir())),
            Mode::Seed => None,
        };
        let ctx = RenderContext {
            player: self
                .player_dispatched
                .then(|| self.options.player.as_ref().map(|p| p.display_name().to_string()))
                .flatten(),
            server_url: self.href.clone(),
            out_dir,
            verbose: self.options.verbose,
        };
        let lines = render::layout(&snapshot, &ctx, render::terminal_height());
        self.show(&lines);
    }

    /// Replace the screen
    fn show(&mut self, lines: &[Line]) {
        if let Err(e) = render::draw(&mut self.output, lines, self.color) {
            debug!("could not draw: {}", e);
        }
    }

    /// Append below the screen
    fn print(&mut self, lines: &[Line]) {
        if let Err(e) = render::print(&mut self.output, lines, self.color) {
            debug!("could not print: {}", e);
        }
    }

    fn write_raw(&mut self, text: &str) {
        let result = writeln!(self.output, "{}", text).and_then(|_| self.output.flush());
        if let Err(e) = result {
            debug!("could not write output: {}", e);
        }
    }
}

/// Resolves once a client has connected; pends forever without a server
async fn first_connection(connections: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = connections {
        if rx.wait_for(|seen| *seen).await.is_ok() {
            return;
        }
    }
    future::pending().await
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}
