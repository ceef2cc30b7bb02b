//! Append-only per-quantum summary log and failure manifests.
//!
//! Only the coordinating side of a job writes here, so no locking is
//! needed.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::granule::Granule;
use crate::Result;

#[derive(Debug, Clone)]
pub struct SummaryLog {
    path: PathBuf,
}

impl SummaryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub fn append(&self, message: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{} {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"), message)?;
        Ok(())
    }

    /// Record a per-granule failure.
    pub fn record_failure(&self, granule: &Granule, detail: &str) -> Result<()> {
        self.append(&format!(
            "FAIL orbit={} state={} {}",
            granule.orbit, granule.state, detail
        ))
    }
}

/// Write `source dest` lines for `granules`, replacing any previous
/// manifest at `path`.
pub fn write_failure_manifest(path: &Path, granules: &[Granule]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut contents = String::new();
    for g in granules {
        contents.push_str(&format!("{} {}\n", g.source.display(), g.archive.display()));
    }
    fs::write(path, contents)?;
    Ok(())
}
