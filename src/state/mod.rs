//! On-disk state shared across the jobs of a run.

mod log_tree;
mod summary;

pub use log_tree::{JobPhase, LogTree, ScriptDirs};
pub use summary::{write_failure_manifest, SummaryLog};
