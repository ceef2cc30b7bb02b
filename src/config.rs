use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::dag::DependencyKind;
use crate::transfer::SyncLevel;
use crate::{Error, Result};

/// Top-level configuration handed to every component.
///
/// Loaded once by whichever job is running and passed down explicitly;
/// the orchestrator writes its resolved copy into the run directory so
/// that every downstream job sees the same settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Scratch area for archives, extracted inputs and outputs.
    pub stage_dir: PathBuf,
    /// Root under which `run{N}` directories are created.
    pub log_dir: PathBuf,
    /// Checksum sidecars, laid out as `{hash_dir}/{year}/{orbit}hash.{ext}`.
    pub hash_dir: PathBuf,
    /// Product generation executable.
    pub generator: PathBuf,
    /// Script that writes the generator's input file list.
    pub input_generator: PathBuf,
    pub orbit_times_txt: PathBuf,
    pub orbit_times_bin: PathBuf,
    /// Directory searched recursively for auxiliary path files.
    pub path_files_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            stage_dir: PathBuf::from("stage"),
            log_dir: PathBuf::from("."),
            hash_dir: PathBuf::from("hashes"),
            generator: PathBuf::from("bin/basicFusion"),
            input_generator: PathBuf::from("metadata-input/genInput/genFusionInput.sh"),
            orbit_times_txt: PathBuf::from("metadata-input/data/Orbit_Path_Time.txt"),
            orbit_times_bin: PathBuf::from("metadata-input/data/Orbit_Path_Time.bin"),
            path_files_dir: PathBuf::from("path_files"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Batch submission executable.
    pub command: String,
    pub walltime: String,
    pub nodes: u32,
    pub ppn: u32,
    /// Kind used for every edge the orchestrator wires.
    pub dependency_kind: DependencyKind,
    /// Additional `#PBS` directive lines copied into every script.
    pub extra_directives: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            command: "qsub".to_string(),
            walltime: "48:00:00".to_string(),
            nodes: 1,
            ppn: 1,
            dependency_kind: DependencyKind::AfterAny,
            extra_directives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    pub command: String,
    pub remote_endpoint: String,
    pub host_endpoint: String,
    pub remote_tar_dir: PathBuf,
    pub remote_output_dir: PathBuf,
    pub parallelism: usize,
    pub sync_level: Option<SyncLevel>,
    pub verify_checksum: bool,
    /// `YYYY-MM-DD` or `YYYY-MM-DD hh:mm:ss`, UTC.
    pub deadline: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            command: "globus".to_string(),
            remote_endpoint: String::new(),
            host_endpoint: String::new(),
            remote_tar_dir: PathBuf::new(),
            remote_output_dir: PathBuf::new(),
            parallelism: 1,
            sync_level: None,
            verify_checksum: false,
            deadline: None,
        }
    }
}

/// Digest algorithm used by the checksum sidecars.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestKind {
    #[default]
    Md5,
    Sha256,
}

impl DigestKind {
    pub fn extension(&self) -> &'static str {
        match self {
            DigestKind::Md5 => "md5",
            DigestKind::Sha256 => "sha256",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of orbits per quantum.
    pub granularity: u32,
    /// Worker count inside a process job.
    pub workers: usize,
    /// `pull[i]` waits on `push[i - throttle_lookback]`; 0 disables.
    pub throttle_lookback: usize,
    pub digest: DigestKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            granularity: 5000,
            workers: 4,
            throttle_lookback: 2,
            digest: DigestKind::Md5,
        }
    }
}

impl Config {
    pub fn fusionflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".fusionflow"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::fusionflow_dir()?.join("fusionflow.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.granularity == 0 {
            return Err(Error::Validation(
                "pipeline.granularity must be at least 1".to_string(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(Error::Validation(
                "pipeline.workers must be at least 1".to_string(),
            ));
        }
        if self.transfer.parallelism == 0 {
            return Err(Error::InvalidParallelism(0));
        }
        Ok(())
    }

    /// Resolve every relative path against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let p = &mut self.paths;
        for path in [
            &mut p.stage_dir,
            &mut p.log_dir,
            &mut p.hash_dir,
            &mut p.generator,
            &mut p.input_generator,
            &mut p.orbit_times_txt,
            &mut p.orbit_times_bin,
            &mut p.path_files_dir,
        ] {
            *path = absolutize(base, path);
        }
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
