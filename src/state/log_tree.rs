//! Run directory layout shared by every job of a run.
//!
//! The orchestrator creates the tree once and writes it to
//! `misc/log_tree.json`; pull, process and push jobs load it from there
//! instead of recomputing paths.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::Result;

const TREE_FILE: &str = "log_tree.json";

/// The three batch jobs of a quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Pull,
    Process,
    Push,
}

impl JobPhase {
    pub const ALL: [JobPhase; 3] = [JobPhase::Pull, JobPhase::Process, JobPhase::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pull => "pull",
            JobPhase::Process => "process",
            JobPhase::Push => "push",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDirs {
    pub pull: PathBuf,
    pub process: PathBuf,
    pub push: PathBuf,
}

/// Phase name to directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTree {
    pub run_dir: PathBuf,
    pub summary: PathBuf,
    pub pull: PathBuf,
    pub process: PathBuf,
    pub push: PathBuf,
    pub misc: PathBuf,
    pub scripts: ScriptDirs,
}

impl LogTree {
    /// Lay out the tree under `run_dir` and create every directory.
    pub fn create(run_dir: &Path) -> Result<Self> {
        let logs = run_dir.join("logs");
        let scripts = run_dir.join("scripts");
        let tree = Self {
            run_dir: run_dir.to_path_buf(),
            summary: logs.join("summary"),
            pull: logs.join("pull"),
            process: logs.join("process"),
            push: logs.join("push"),
            misc: logs.join("misc"),
            scripts: ScriptDirs {
                pull: scripts.join("pull"),
                process: scripts.join("process"),
                push: scripts.join("push"),
            },
        };
        for dir in tree.dirs() {
            fs::create_dir_all(dir)?;
        }
        debug!(run_dir = %run_dir.display(), "log tree created");
        Ok(tree)
    }

    fn dirs(&self) -> [&Path; 8] {
        [
            self.summary.as_path(),
            self.pull.as_path(),
            self.process.as_path(),
            self.push.as_path(),
            self.misc.as_path(),
            self.scripts.pull.as_path(),
            self.scripts.process.as_path(),
            self.scripts.push.as_path(),
        ]
    }

    pub fn log_dir(&self, phase: JobPhase) -> &Path {
        match phase {
            JobPhase::Pull => &self.pull,
            JobPhase::Process => &self.process,
            JobPhase::Push => &self.push,
        }
    }

    pub fn script_dir(&self, phase: JobPhase) -> &Path {
        match phase {
            JobPhase::Pull => &self.scripts.pull,
            JobPhase::Process => &self.scripts.process,
            JobPhase::Push => &self.scripts.push,
        }
    }

    /// Where [`save`](Self::save) writes the tree.
    pub fn file(&self) -> PathBuf {
        self.misc.join(TREE_FILE)
    }

    /// Summary log of one quantum.
    pub fn summary_log(&self, label: &str) -> PathBuf {
        self.summary.join(format!("{}_summary.log", label))
    }

    /// Granule list handed from the process job to the push job.
    pub fn granule_list(&self, label: &str) -> PathBuf {
        self.misc.join(format!("granules_{}.json", label))
    }

    /// Transfer batch files of a job.
    pub fn batch_dir(&self, phase: JobPhase) -> PathBuf {
        self.misc.join("batches").join(phase.as_str())
    }

    /// Resolved configuration shared by every job of the run.
    pub fn config_file(&self) -> PathBuf {
        self.misc.join("fusionflow.toml")
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = self.file();
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}
