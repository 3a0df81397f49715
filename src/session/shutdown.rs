//! Shutdown bookkeeping
//!
//! The first trigger wins. Every later trigger (a second Ctrl-C, a late
//! completion event) is a no-op, so teardown runs at most once.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

/// Time allowed for swarm teardown before the process moves on regardless
pub const GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Download finished and nothing kept the session alive
    Completed,
    /// File listing shown, nothing downloaded
    Listed,
    /// SIGINT or SIGTERM
    Interrupted,
    /// Local player closed and quit-on-exit is set
    PlayerExited,
    /// A session error ended the run
    Failed,
}

impl Outcome {
    /// Outcomes that end the whole invocation, not just this session
    pub fn stops_batch(&self) -> bool {
        matches!(self, Outcome::Interrupted | Outcome::Failed)
    }
}

/// Shutdown steps, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownStep {
    DeregisterSignals,
    CloseSubtitles,
    StopTicker,
    OnExitHook,
    Teardown,
}

#[derive(Debug, Clone, Copy)]
struct Trigger {
    outcome: Outcome,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub struct ShutdownState {
    trigger: Option<Trigger>,
    signal_received: bool,
    hooks_run: HashSet<&'static str>,
    steps: Vec<ShutdownStep>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start shutting down. Returns false if shutdown already started.
    pub fn trigger(&mut self, outcome: Outcome) -> bool {
        if outcome == Outcome::Interrupted {
            self.signal_received = true;
        }
        if self.trigger.is_some() {
            tracing::debug!(?outcome, "already shutting down");
            return false;
        }
        self.trigger = Some(Trigger {
            outcome,
            deadline: Instant::now() + GRACE_PERIOD,
        });
        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.trigger.is_some()
    }

    pub fn signal_received(&self) -> bool {
        self.signal_received
    }

    /// Outcome of the first trigger
    pub fn outcome(&self) -> Option<Outcome> {
        self.trigger.map(|t| t.outcome)
    }

    /// Point after which teardown stops being waited for
    pub fn deadline(&self) -> Option<Instant> {
        self.trigger.map(|t| t.deadline)
    }

    /// Mark a hook as fired. False if it already ran.
    pub fn mark_hook(&mut self, name: &'static str) -> bool {
        self.hooks_run.insert(name)
    }

    pub fn hooks_run(&self) -> &HashSet<&'static str> {
        &self.hooks_run
    }

    pub fn record(&mut self, step: ShutdownStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[ShutdownStep] {
        &self.steps
    }
}

/// After completion the session keeps running as a seed while any of these
/// holds. None of them outranks another.
pub fn should_remain_alive(
    player_dispatched: bool,
    connection_observed: bool,
    keep_seeding: bool,
) -> bool {
    player_dispatched || connection_observed || keep_seeding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_trigger_wins() {
        let mut state = ShutdownState::new();
        assert!(!state.is_shutting_down());
        assert!(state.trigger(Outcome::Completed));
        assert!(!state.trigger(Outcome::Interrupted));
        assert!(!state.trigger(Outcome::Failed));
        assert_eq!(state.outcome(), Some(Outcome::Completed));
        assert!(state.signal_received());
    }

    #[test]
    fn test_deadline_is_one_second_after_trigger() {
        let mut state = ShutdownState::new();
        assert_eq!(state.deadline(), None);
        let before = Instant::now();
        state.trigger(Outcome::Interrupted);
        let deadline = state.deadline().unwrap();
        assert!(deadline >= before + GRACE_PERIOD);
        assert!(deadline < before + GRACE_PERIOD * 2);
    }

    #[test]
    fn test_hooks_fire_once() {
        let mut state = ShutdownState::new();
        assert!(state.mark_hook("on-exit"));
        assert!(!state.mark_hook("on-exit"));
        assert!(state.mark_hook("on-done"));
        assert_eq!(state.hooks_run().len(), 2);
    }

    #[test]
    fn test_completion_rule() {
        assert!(!should_remain_alive(false, false, false));
        assert!(should_remain_alive(true, false, false));
        assert!(should_remain_alive(false, true, false));
        assert!(should_remain_alive(false, false, true));
        assert!(should_remain_alive(true, true, true));
    }

    #[test]
    fn test_batch_stops_on_interrupt_or_failure() {
        assert!(Outcome::Interrupted.stops_batch());
        assert!(Outcome::Failed.stops_batch());
        assert!(!Outcome::Completed.stops_batch());
        assert!(!Outcome::Listed.stops_batch());
    }
}
