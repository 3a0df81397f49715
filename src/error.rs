//! Error taxonomy
//!
//! Two families reach the user:
//! - [`InputError`]: expected, self-inflicted failures (bad identifier, missing
//!   file, hook not executable). Reported without the crash banner.
//! - [`SessionError`]: swarm failures, bind failures after the retry, sink launch
//!   failures. Fatal, funnelled through the single shutdown path.

use std::path::PathBuf;
use thiserror::Error;

use crate::cli::ExitCode;
use crate::stream::dispatch::LaunchError;
use crate::swarm::SwarmError;

/// Failures caused by what the user typed
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Invalid torrent identifier \"{identifier}\": {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("File not found: {0}")]
    MissingFile(PathBuf),

    #[error("Script \"{0}\" does not exist")]
    HookMissing(PathBuf),

    #[error("Script \"{0}\" is not executable")]
    HookNotExecutable(PathBuf),

    #[error("The --{0} argument cannot be used with multiple files/folders.")]
    IncompatibleBatchOption(&'static str),

    #[error("Subtitle file not found: {0}")]
    SubtitlesMissing(PathBuf),

    #[error("Invalid blocklist: {0}")]
    Blocklist(#[from] crate::swarm::blocklist::BlocklistError),

    #[error("Could not fetch torrent from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a running session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Swarm(#[from] SwarmError),

    #[error("Could not bind streaming server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Teardown failed: {0}")]
    Teardown(String),
}

/// Anything that ends a command
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl OrchestratorError {
    /// Expected failures skip the diagnostic banner
    pub fn is_expected(&self) -> bool {
        matches!(self, OrchestratorError::Input(_))
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            OrchestratorError::Input(InputError::Fetch { .. }) => ExitCode::NetworkError,
            OrchestratorError::Input(_) => ExitCode::InvalidArgs,
            OrchestratorError::Session(SessionError::Launch(_)) => ExitCode::PlayerFailed,
            OrchestratorError::Session(_) => ExitCode::Error,
        }
    }
}

impl From<SwarmError> for OrchestratorError {
    fn from(err: SwarmError) -> Self {
        OrchestratorError::Session(SessionError::Swarm(err))
    }
}

impl From<LaunchError> for OrchestratorError {
    fn from(err: LaunchError) -> Self {
        OrchestratorError::Session(SessionError::Launch(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_are_expected() {
        let err: OrchestratorError = InputError::HookMissing(PathBuf::from("/nope.sh")).into();
        assert!(err.is_expected());
        assert_eq!(err.exit_code(), ExitCode::InvalidArgs);
    }

    #[test]
    fn test_session_errors_are_unexpected() {
        let err: OrchestratorError = SessionError::Teardown("boom".into()).into();
        assert!(!err.is_expected());
        assert_eq!(err.exit_code(), ExitCode::Error);
    }

    #[test]
    fn test_fetch_failures_map_to_network_exit() {
        let err: OrchestratorError = InputError::Fetch {
            url: "http://example.com/a.torrent".into(),
            reason: "404".into(),
        }
        .into();
        assert!(err.is_expected());
        assert_eq!(err.exit_code(), ExitCode::NetworkError);
    }

    #[test]
    fn test_batch_option_message() {
        let err = InputError::IncompatibleBatchOption("vlc");
        assert_eq!(
            err.to_string(),
            "The --vlc argument cannot be used with multiple files/folders."
        );
    }
}
