//! Per-orbit work item carried through transfer, verification, extraction
//! and generation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::orbit::orbit_year;
use crate::Result;

/// Lifecycle of a granule inside a process job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GranuleState {
    #[default]
    Pending,
    Transferred,
    Verified,
    VerifyFailed,
    Extracted,
    ExtractFailed,
    Generated,
    GenerateFailed,
}

impl GranuleState {
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            GranuleState::VerifyFailed | GranuleState::ExtractFailed | GranuleState::GenerateFailed
        )
    }
}

impl std::fmt::Display for GranuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GranuleState::Pending => "pending",
            GranuleState::Transferred => "transferred",
            GranuleState::Verified => "verified",
            GranuleState::VerifyFailed => "verify_failed",
            GranuleState::Extracted => "extracted",
            GranuleState::ExtractFailed => "extract_failed",
            GranuleState::Generated => "generated",
            GranuleState::GenerateFailed => "generate_failed",
        };
        f.write_str(s)
    }
}

/// Paths a granule needs once it has been verified and is headed for
/// product generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkPaths {
    /// Orbit start time, `YYYYMMDDhhmmss`.
    pub start_time: String,
    pub untar_dir: PathBuf,
    /// Generated product.
    pub output: PathBuf,
    /// Input listing written by the input generator.
    pub input_list: PathBuf,
    pub log_file: PathBuf,
}

impl WorkPaths {
    /// List of auxiliary path files shipped inside the archive.
    pub fn path_file_list(&self, orbit: u32) -> PathBuf {
        self.untar_dir.join(format!("MISR_PATH_FILES_{}.txt", orbit))
    }

    /// `YYYY/MM/DD` taken from the start time.
    pub fn date_dir(&self) -> PathBuf {
        date_dir(&self.start_time)
    }
}

/// `YYYY/MM/DD` from a `YYYYMMDD...` stamp. Short stamps yield whatever
/// components are present.
pub fn date_dir(stamp: &str) -> PathBuf {
    let mut dir = PathBuf::new();
    for (from, to) in [(0, 4), (4, 6), (6, 8)] {
        if let Some(part) = stamp.get(from..to) {
            dir.push(part);
        }
    }
    dir
}

/// One orbit's archive and everything derived from it.
///
/// A granule is owned by exactly one in-flight task at a time; workers only
/// ever see the paths copied into a task, never the granule itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Granule {
    pub orbit: u32,
    pub year: u16,
    /// Archive location on the remote endpoint.
    pub source: PathBuf,
    /// Archive location after transfer.
    pub archive: PathBuf,
    pub expected_digest: Option<String>,
    pub actual_digest: Option<String>,
    pub state: GranuleState,
    pub work: Option<WorkPaths>,
}

impl Granule {
    pub fn new(orbit: u32, source: impl Into<PathBuf>, archive: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            orbit,
            year: orbit_year(orbit)?,
            source: source.into(),
            archive: archive.into(),
            expected_digest: None,
            actual_digest: None,
            state: GranuleState::Pending,
            work: None,
        })
    }

    /// Granule for `orbit` using the `{dir}/{year}/{orbit}archive.tar` layout
    /// on both endpoints.
    pub fn for_orbit(orbit: u32, remote_dir: &Path, stage_dir: &Path) -> Result<Self> {
        let year = orbit_year(orbit)?;
        let name = archive_name(orbit);
        Self::new(
            orbit,
            remote_dir.join(year.to_string()).join(&name),
            stage_dir.join(year.to_string()).join(&name),
        )
    }

    /// True when a digest was computed and equals the expected one.
    pub fn digest_matches(&self) -> bool {
        match (&self.expected_digest, &self.actual_digest) {
            (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
            _ => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }
}

pub fn archive_name(orbit: u32) -> String {
    format!("{}archive.tar", orbit)
}
