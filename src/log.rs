//! Structured logging for fusionflow jobs.
//!
//! Log levels:
//! - ERROR: Failures that abort a job (submission, transfer, protocol)
//! - WARN: Per-granule failures that are recorded and skipped
//! - INFO: Phase and job lifecycle notifications
//! - DEBUG: Detailed traces (worker assignments, batch files, commands)
//! - TRACE: Raw subprocess output
//!
//! Debug mode can be enabled with the `--debug` flag or `FUSIONFLOW_DEBUG=1`.
//! `FUSIONFLOW_LOG` takes an `EnvFilter` directive and overrides both.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::Result;

pub const DEBUG_ENV: &str = "FUSIONFLOW_DEBUG";
pub const FILTER_ENV: &str = "FUSIONFLOW_LOG";

/// Whether debug mode was requested by flag or environment.
pub fn debug_requested(flag: bool) -> bool {
    let env_debug = std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);
    flag || env_debug
}

/// Default filter directive for the given debug mode.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "info,fusionflow=debug"
    } else {
        "info"
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

/// Install the global subscriber.
///
/// With `log_file` set, events are appended to that file (its parent is
/// created if needed); otherwise they go to stderr. Calling this twice is
/// harmless: the second install is ignored.
pub fn init(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let debug_mode = debug_requested(debug);

    let writer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug_mode))
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init();

    tracing::debug!(debug = debug_mode, log_file = ?log_file, "logging initialized");
    Ok(())
}
