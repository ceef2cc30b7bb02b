//! Bulk file transfer.
//!
//! [`TransferClient`] collects a manifest of (source, destination) pairs,
//! splits it into near-equal batches and hands each batch to a
//! [`TransferBackend`]. Every submitted batch yields a [`TransferHandle`];
//! [`TransferClient::wait`] resolves all of them.

mod globus;

pub use globus::{parse_task_id, GlobusBackend, TransferBackend};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::{Error, Result};

/// How the backend decides that a destination file is already up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncLevel {
    Exists,
    Size,
    Mtime,
    Checksum,
}

impl SyncLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncLevel::Exists => "exists",
            SyncLevel::Size => "size",
            SyncLevel::Mtime => "mtime",
            SyncLevel::Checksum => "checksum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub sync_level: Option<SyncLevel>,
    pub verify_checksum: bool,
    pub deadline: Option<NaiveDateTime>,
    /// Prefix of batch file names and of backend task labels. A fresh UUID
    /// when unset.
    pub label: Option<String>,
    /// Directory the batch files are written to.
    pub batch_dir: PathBuf,
}

impl TransferOptions {
    pub fn new(batch_dir: impl Into<PathBuf>) -> Self {
        Self {
            sync_level: None,
            verify_checksum: false,
            deadline: None,
            label: None,
            batch_dir: batch_dir.into(),
        }
    }

    pub fn from_config(config: &TransferConfig, batch_dir: impl Into<PathBuf>) -> Result<Self> {
        let deadline = config.deadline.as_deref().map(parse_deadline).transpose()?;
        Ok(Self {
            sync_level: config.sync_level,
            verify_checksum: config.verify_checksum,
            deadline,
            label: None,
            batch_dir: batch_dir.into(),
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Parse `YYYY-MM-DD hh:mm:ss` or a bare `YYYY-MM-DD` (midnight).
pub fn parse_deadline(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::Validation(format!("invalid transfer deadline: {}", s)))
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub recursive: bool,
}

impl TransferItem {
    /// `[--recursive ]<src> <dest>`
    pub fn manifest_line(&self) -> String {
        let flag = if self.recursive { "--recursive " } else { "" };
        format!("{}{} {}", flag, self.source.display(), self.dest.display())
    }
}

/// A submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHandle {
    pub id: String,
    pub batch_file: PathBuf,
    pub files: usize,
}

/// Split `n` items into `parts` contiguous, disjoint ranges covering `0..n`.
///
/// Sizes differ by at most one; the `n % parts` larger ranges sit at the end.
/// Zero `parts` yields no ranges.
pub fn partition(n: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let base = n / parts;
    let remainder = n % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = if i >= parts - remainder { base + 1 } else { base };
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

pub struct TransferClient {
    backend: Arc<dyn TransferBackend>,
    manifest: Vec<TransferItem>,
    pending: Vec<TransferHandle>,
}

impl TransferClient {
    pub fn new(backend: Arc<dyn TransferBackend>) -> Self {
        Self {
            backend,
            manifest: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn add_file(&mut self, source: impl Into<PathBuf>, dest: impl Into<PathBuf>, recursive: bool) {
        self.manifest.push(TransferItem {
            source: source.into(),
            dest: dest.into(),
            recursive,
        });
    }

    pub fn manifest(&self) -> &[TransferItem] {
        &self.manifest
    }

    pub fn pending(&self) -> &[TransferHandle] {
        &self.pending
    }

    /// Submit the manifest as `parallelism` independent batches.
    ///
    /// Parallelism larger than the manifest is clamped so that no batch is
    /// empty. Each batch is written to `{label}_{i}.txt` under
    /// `opts.batch_dir` before submission. A failed submission stops the
    /// loop; every batch already submitted is waited on before the
    /// submission error is returned.
    pub fn transfer(&mut self, parallelism: usize, opts: &TransferOptions) -> Result<Vec<TransferHandle>> {
        if parallelism < 1 {
            return Err(Error::InvalidParallelism(parallelism));
        }
        if self.manifest.is_empty() {
            return Err(Error::EmptyManifest);
        }
        let parts = parallelism.min(self.manifest.len());
        if parts < parallelism {
            debug!(requested = parallelism, effective = parts, "clamping transfer parallelism");
        }

        fs::create_dir_all(&opts.batch_dir)?;
        let label = opts
            .label
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut submitted = Vec::with_capacity(parts);
        for (i, range) in partition(self.manifest.len(), parts).into_iter().enumerate() {
            let batch = &self.manifest[range];
            let batch_file = opts.batch_dir.join(format!("{}_{}.txt", label, i));
            write_batch(&batch_file, batch)?;

            let task_label = format!("{}_{}", label, i);
            let id = match self.backend.submit(&batch_file, &task_label, opts) {
                Ok(id) => id,
                Err(e) => {
                    error!(batch = %batch_file.display(), error = %e, "transfer submission failed");
                    self.drain();
                    return Err(e);
                }
            };
            info!(task = %id, files = batch.len(), batch = %batch_file.display(), "transfer submitted");
            let handle = TransferHandle {
                id,
                batch_file,
                files: batch.len(),
            };
            self.pending.push(handle.clone());
            submitted.push(handle);
        }
        Ok(submitted)
    }

    /// Wait for every pending batch.
    ///
    /// All handles are waited on even after a failure so that nothing is
    /// left running unobserved; the first failure is then returned.
    pub fn wait(&mut self) -> Result<()> {
        let mut first_failure: Option<Error> = None;
        for handle in self.pending.drain(..) {
            let outcome = match self.backend.wait(&handle.id) {
                Ok(0) => {
                    info!(task = %handle.id, "transfer complete");
                    continue;
                }
                Ok(status) => Error::TransferFailure {
                    handle: handle.id.clone(),
                    status,
                },
                Err(e) => e,
            };
            error!(task = %handle.id, error = %outcome, "transfer failed");
            if first_failure.is_none() {
                first_failure = Some(outcome);
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn drain(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        warn!(pending = self.pending.len(), "waiting on submitted batches after failure");
        if let Err(e) = self.wait() {
            warn!(error = %e, "submitted batch also failed");
        }
    }
}

fn write_batch(path: &Path, items: &[TransferItem]) -> Result<()> {
    let mut contents = String::new();
    for item in items {
        contents.push_str(&item.manifest_line());
        contents.push('\n');
    }
    fs::write(path, contents)?;
    Ok(())
}
