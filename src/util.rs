//! Shared utility functions.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tokio::task::spawn_blocking;
use tracing::trace;

use crate::{Error, Result};

pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Run `cmd` with stdout and stderr appended to `log_file`.
///
/// Returns the exit code; a process killed by a signal reports `-1`.
/// Failing to start the process at all is an error.
pub fn run_logged(cmd: &mut Command, log_file: &Path) -> Result<i32> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new().create(true).append(true).open(log_file)?;
    let err_log = log.try_clone()?;
    trace!(command = ?cmd, log = %log_file.display(), "run_logged");
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err_log))
        .status()?;
    Ok(status.code().unwrap_or(-1))
}

/// Quote `s` for a POSIX shell. Plain words pass through unchanged.
pub fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '='))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Resolve an external command on `PATH`.
pub fn ensure_available(command: &str) -> Result<PathBuf> {
    which::which(command)
        .map_err(|_| Error::Validation(format!("command not found on PATH: {}", command)))
}
