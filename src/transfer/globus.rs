use regex::Regex;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::TransferOptions;
use crate::config::TransferConfig;
use crate::{Error, Result};

static TASK_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Task ID:\s*(\S+)").expect("valid task id regex"));

/// Submits batch files to an external transfer service.
pub trait TransferBackend: Send + Sync {
    /// Submit one batch file, returning the service's task id.
    fn submit(&self, batch_file: &Path, label: &str, opts: &TransferOptions) -> Result<String>;

    /// Block until the task finishes and return its exit status.
    fn wait(&self, task_id: &str) -> Result<i32>;
}

/// Drives the `globus` command line client between two endpoints.
#[derive(Debug, Clone)]
pub struct GlobusBackend {
    command: String,
    source_endpoint: String,
    dest_endpoint: String,
}

impl GlobusBackend {
    pub fn new(command: &str, source_endpoint: &str, dest_endpoint: &str) -> Self {
        Self {
            command: command.to_string(),
            source_endpoint: source_endpoint.to_string(),
            dest_endpoint: dest_endpoint.to_string(),
        }
    }

    /// Remote endpoint to this host.
    pub fn pull(config: &TransferConfig) -> Self {
        Self::new(&config.command, &config.remote_endpoint, &config.host_endpoint)
    }

    /// This host to the remote endpoint.
    pub fn push(config: &TransferConfig) -> Self {
        Self::new(&config.command, &config.host_endpoint, &config.remote_endpoint)
    }

    pub fn transfer_args(&self, label: &str, opts: &TransferOptions) -> Vec<String> {
        let mut args = vec!["transfer".to_string()];
        args.push(if opts.verify_checksum {
            "--verify-checksum".to_string()
        } else {
            "--no-verify-checksum".to_string()
        });
        args.extend(["--label".to_string(), label.to_string()]);
        if let Some(level) = opts.sync_level {
            args.extend(["--sync-level".to_string(), level.as_str().to_string()]);
        }
        if let Some(deadline) = opts.deadline {
            args.extend([
                "--deadline".to_string(),
                deadline.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]);
        }
        args.push(format!("{}:/", self.source_endpoint));
        args.push(format!("{}:/", self.dest_endpoint));
        args.push("--batch".to_string());
        args
    }
}

impl TransferBackend for GlobusBackend {
    fn submit(&self, batch_file: &Path, label: &str, opts: &TransferOptions) -> Result<String> {
        let args = self.transfer_args(label, opts);
        debug!(command = %self.command, ?args, batch = %batch_file.display(), "globus transfer");
        let output = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::from(File::open(batch_file)?))
            .output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(label, stderr = %stderr.trim(), "globus transfer submission failed");
            return Err(Error::TransferFailure {
                handle: label.to_string(),
                status: output.status.code().unwrap_or(-1),
            });
        }
        parse_task_id(&stdout).ok_or_else(|| {
            Error::Validation(format!("no task id in globus output: {}", stdout.trim()))
        })
    }

    fn wait(&self, task_id: &str) -> Result<i32> {
        debug!(task = task_id, "globus task wait");
        let status = Command::new(&self.command)
            .args(["task", "wait", task_id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Extract the id from a `Task ID: <id>` line.
pub fn parse_task_id(output: &str) -> Option<String> {
    TASK_ID_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
