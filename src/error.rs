use thiserror::Error;

use crate::core::job::JobId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Cycle detected in the job dependency graph at job {job}")]
    CycleDetected { job: String },

    #[error("Job already registered: {0}")]
    DuplicateJob(JobId),

    #[error("Job not found in graph: {0}")]
    JobNotFound(JobId),

    #[error("Scheduler id already assigned to job {0}")]
    SchedulerIdAlreadySet(JobId),

    #[error("Dependency target {target} of job {job} has no scheduler id")]
    MissingSchedulerId { job: String, target: String },

    #[error("Submission of job {job} failed (status {status:?}): {message}")]
    SubmissionFailure {
        job: String,
        status: Option<i32>,
        message: String,
    },

    #[error("Invalid parallelism {0}: must be at least 1")]
    InvalidParallelism(usize),

    #[error("No files added to transfer")]
    EmptyManifest,

    #[error("Transfer {handle} failed with status {status}")]
    TransferFailure { handle: String, status: i32 },

    #[error("Master/worker protocol violation: {0}")]
    Protocol(String),

    #[error("Worker {worker} aborted: {message}")]
    WorkerAborted { worker: usize, message: String },

    #[error("Items lost during verification: expected {expected}, accounted for {accounted}")]
    ItemsLost { expected: usize, accounted: usize },

    #[error("Orbit {0} outside the supported range")]
    OrbitOutOfRange(u32),

    #[error("Invalid orbit range {start}..={end}")]
    InvalidOrbitRange { start: u32, end: u32 },

    #[error("Path file {name} listed for orbit {orbit} not found under {}", .dir.display())]
    PathFileNotFound {
        orbit: u32,
        name: String,
        dir: std::path::PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
