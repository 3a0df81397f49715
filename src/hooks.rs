//! Lifecycle hook scripts
//!
//! `--on-done` and `--on-exit` name executables that run when the download
//! completes and when the process exits. They are checked before any session
//! starts and then fired without being awaited.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::InputError;

/// A validated hook script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    name: &'static str,
    path: PathBuf,
}

impl Hook {
    /// Check that `path` exists and is executable, and resolve it to an
    /// absolute path so later changes of directory do not matter.
    pub fn validate(name: &'static str, path: &Path) -> Result<Self, InputError> {
        if !path.exists() {
            return Err(InputError::HookMissing(path.to_path_buf()));
        }
        if !is_executable(path) {
            return Err(InputError::HookNotExecutable(path.to_path_buf()));
        }
        let path = path.canonicalize()?;
        Ok(Self { name, path })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start the script detached. Spawn failures and non-zero exits are
    /// logged and otherwise ignored.
    pub fn fire(&self) -> Option<JoinHandle<()>> {
        let spawned = Command::new(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(hook = self.name, path = %self.path.display(), error = %e, "hook failed to start");
                return None;
            }
        };

        debug!(hook = self.name, path = %self.path.display(), "hook started");
        let name = self.name;
        Some(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    warn!(hook = name, %status, "hook exited unsuccessfully")
                }
                Ok(_) => debug!(hook = name, "hook finished"),
                Err(e) => warn!(hook = name, error = %e, "could not wait for hook"),
            }
        }))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
