//! Session lifecycle
//!
//! - `controller`: the per-torrent state machine
//! - `shutdown`: at-most-once shutdown bookkeeping and the completion rule
//! - `options`: flags and config merged into one settings value
//! - `signals`: SIGINT/SIGTERM delivery

pub mod controller;
pub mod options;
pub mod shutdown;
pub mod signals;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

pub use controller::{Controller, Phase, SessionReport};
pub use options::{Mode, SessionOptions};
pub use shutdown::{should_remain_alive, Outcome, ShutdownState, ShutdownStep, GRACE_PERIOD};
pub use signals::Interrupts;

use crate::error::{OrchestratorError, SessionError};
use crate::swarm::SwarmClient;

type SessionResult = (usize, Result<SessionReport, OrchestratorError>);

/// Run one session per input.
///
/// Per-session flags are rejected up front when there is more than one
/// input, and several inputs always render quietly. Sessions start in input
/// order, each once the previous one is streaming or seeding, and then run
/// side by side on the shared client. An interrupt or a failure ends the
/// whole batch.
pub async fn run_batch(
    client: Arc<dyn SwarmClient>,
    mode: Mode,
    inputs: &[String],
    options: SessionOptions,
) -> Result<Vec<SessionReport>, OrchestratorError> {
    let interrupts = if options.handle_signals && inputs.len() > 1 {
        Interrupts::os()
    } else {
        Interrupts::none()
    };
    run_batch_with(client, mode, inputs, options, interrupts).await
}

/// [`run_batch`] with an explicit interrupt source for the whole batch
pub async fn run_batch_with(
    client: Arc<dyn SwarmClient>,
    mode: Mode,
    inputs: &[String],
    mut options: SessionOptions,
    mut interrupts: Interrupts,
) -> Result<Vec<SessionReport>, OrchestratorError> {
    options.validate_batch(inputs.len())?;
    options.validate_files()?;

    if let [input] = inputs {
        let mut controller = Controller::new(client, mode.for_input(input), options);
        if interrupts.is_registered() {
            controller = controller.with_interrupts(interrupts);
        }
        return controller.run(input).await.map(|report| vec![report]);
    }

    options.quiet = true;
    // Each session listens on its own channel, fed from the batch's source
    options.handle_signals = false;

    let mut sessions: JoinSet<SessionResult> = JoinSet::new();
    let mut senders: Vec<mpsc::UnboundedSender<()>> = Vec::new();
    let mut reports: Vec<Option<SessionReport>> = Vec::new();
    let mut failure: Option<OrchestratorError> = None;
    let mut stopping = false;

    for (i, input) in inputs.iter().enumerate() {
        let mode = mode.for_input(input);
        tracing::info!(%input, ?mode, "starting session {}/{}", i + 1, inputs.len());

        let (tx, session_interrupts) = Interrupts::channel();
        let mut controller = Controller::new(client.clone(), mode, options.clone())
            .owns_client(false)
            .with_interrupts(session_interrupts);
        let mut phases = controller.phase_updates();
        let input = input.clone();
        sessions.spawn(async move { (i, controller.run(&input).await) });
        senders.push(tx);
        reports.push(None);

        // Hold the next input back until this one is under way
        loop {
            tokio::select! {
                under_way = wait_under_way(&mut phases) => {
                    if !under_way {
                        tracing::debug!(index = i, "session ended before it got under way");
                    }
                    break;
                }
                Some(joined) = sessions.join_next() => {
                    stopping |= collect(joined, &mut reports, &mut failure);
                    if stopping {
                        break;
                    }
                }
                () = interrupts.recv() => {
                    tracing::info!("batch interrupted");
                    stopping = true;
                    break;
                }
            }
        }
        if stopping {
            break;
        }
    }

    if stopping {
        broadcast(&senders);
    }
    while !sessions.is_empty() {
        tokio::select! {
            joined = sessions.join_next() => {
                let Some(joined) = joined else {
                    break;
                };
                if collect(joined, &mut reports, &mut failure) && !stopping {
                    stopping = true;
                    broadcast(&senders);
                }
            }
            () = interrupts.recv() => {
                tracing::info!("batch interrupted");
                stopping = true;
                broadcast(&senders);
            }
        }
    }
    interrupts.deregister();

    let finished = finish(client.as_ref(), &options).await;
    if let Some(err) = failure {
        return Err(err);
    }
    finished?;
    Ok(reports.into_iter().flatten().collect())
}

/// False when the controller went away without getting there
async fn wait_under_way(phases: &mut watch::Receiver<Phase>) -> bool {
    phases
        .wait_for(|phase| matches!(phase, Phase::Streaming | Phase::Seeding | Phase::Terminated))
        .await
        .is_ok()
}

/// Store a finished session. Returns whether the batch must stop.
fn collect(
    joined: Result<SessionResult, tokio::task::JoinError>,
    reports: &mut [Option<SessionReport>],
    failure: &mut Option<OrchestratorError>,
) -> bool {
    match joined {
        Ok((index, Ok(report))) => {
            tracing::debug!(index, outcome = ?report.outcome, "session finished");
            let stop = report.outcome.stops_batch();
            if let Some(slot) = reports.get_mut(index) {
                *slot = Some(report);
            }
            stop
        }
        Ok((index, Err(err))) => {
            tracing::debug!(index, error = %err, "session failed");
            failure.get_or_insert(err);
            true
        }
        Err(e) => {
            failure.get_or_insert(SessionError::Teardown(e.to_string()).into());
            true
        }
    }
}

fn broadcast(senders: &[mpsc::UnboundedSender<()>]) {
    for tx in senders {
        let _ = tx.send(());
    }
}

/// Batch-level shutdown once every session has ended
async fn finish(client: &dyn SwarmClient, options: &SessionOptions) -> Result<(), SessionError> {
    if let Some(hook) = &options.on_exit {
        hook.fire();
    }
    match tokio::time::timeout(GRACE_PERIOD, client.destroy()).await {
        Ok(result) => result.map_err(|e| SessionError::Teardown(e.to_string())),
        Err(_) => {
            tracing::warn!("client teardown still running after {:?}, giving up", GRACE_PERIOD);
            Ok(())
        }
    }
}
