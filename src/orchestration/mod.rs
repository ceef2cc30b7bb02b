//! Orchestration layer: job submission, batch scripts, and the
//! master/worker machinery that runs inside a process job.

mod dispatcher;
mod handler;
mod orchestrator;
mod pipeline;
mod scheduler;
mod script;
mod tasks;
mod verifier;

pub use dispatcher::{Command, DispatcherState, Exchange, TaskDispatcher, WorkerMessage};
pub use handler::{digest_file, PipelineHandler};
pub use orchestrator::{build_quanta, job_name, make_run_dir, Orchestrator, Plan, Quantum};
pub use pipeline::{
    index_path_files, quantum_granules, resolve_path_files, run_process, run_pull, run_push,
    work_paths,
};
pub use scheduler::{
    dependency_clause, AssignedDependency, BatchSubmitter, DryRunSubmitter, PbsSubmitter,
    Scheduler, SubmissionEntry, SubmissionReport,
};
pub use script::BatchScript;
pub use tasks::{Task, TaskHandler, TaskKind, TaskOutcome, TaskReport};
pub use verifier::{ChecksumVerifier, FailureLog, Retransfer, Verification};
