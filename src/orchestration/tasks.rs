//! Units of work exchanged between the dispatcher and its workers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Result;

/// Tag of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Hash,
    Extract,
    Generate,
    Copy,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Hash => "hash",
            TaskKind::Extract => "extract",
            TaskKind::Generate => "generate",
            TaskKind::Copy => "copy",
        };
        f.write_str(s)
    }
}

/// A task and everything its handler needs. Tasks carry paths, never
/// granules, so a worker cannot touch state the dispatcher owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Task {
    /// Digest an archive.
    Hash { orbit: u32, path: PathBuf },
    /// Unpack an archive into `untar_dir`, flattening directories.
    Extract {
        orbit: u32,
        archive: PathBuf,
        untar_dir: PathBuf,
        log_file: PathBuf,
    },
    /// Build the input listing, then run the product generator.
    Generate {
        orbit: u32,
        untar_dir: PathBuf,
        input_list: PathBuf,
        output: PathBuf,
        log_file: PathBuf,
    },
    /// Copy each file into `dest_dir`.
    Copy {
        orbit: u32,
        files: Vec<PathBuf>,
        dest_dir: PathBuf,
    },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Hash { .. } => TaskKind::Hash,
            Task::Extract { .. } => TaskKind::Extract,
            Task::Generate { .. } => TaskKind::Generate,
            Task::Copy { .. } => TaskKind::Copy,
        }
    }

    pub fn orbit(&self) -> u32 {
        match self {
            Task::Hash { orbit, .. }
            | Task::Extract { orbit, .. }
            | Task::Generate { orbit, .. }
            | Task::Copy { orbit, .. } => *orbit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// Lowercase hex digest.
    Digest(String),
    Done,
    /// Local failure recorded against the granule; the job carries on.
    Failed(String),
}

/// What a worker sends back after finishing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub orbit: u32,
    pub kind: TaskKind,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn new(task: &Task, outcome: TaskOutcome) -> Self {
        Self {
            orbit: task.orbit(),
            kind: task.kind(),
            outcome,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed(_))
    }
}

/// Executes tasks on a worker. Called from a blocking thread.
///
/// `Err` means the worker cannot continue and aborts the whole job;
/// per-item failures belong in [`TaskOutcome::Failed`].
pub trait TaskHandler: Send + Sync + 'static {
    fn handle(&self, task: &Task) -> Result<TaskReport>;
}
