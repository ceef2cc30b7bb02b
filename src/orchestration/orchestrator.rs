//! Expands an orbit range into quanta and wires their jobs together.
//!
//! Each quantum contributes a pull, a process and a push job, chained in
//! that order. Consecutive quanta are chained phase by phase, and
//! `pull[i]` additionally waits for `push[i - lookback]`, which bounds how
//! many quanta occupy scratch space at once.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::core::dag::{DependencyKind, JobGraph};
use crate::core::job::{Job, JobId, Payload};
use crate::core::orbit::OrbitRange;
use crate::orchestration::scheduler::{BatchSubmitter, Scheduler, SubmissionReport};
use crate::orchestration::script::BatchScript;
use crate::state::{JobPhase, LogTree};
use crate::Result;

/// One contiguous orbit range and its three jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantum {
    pub range: OrbitRange,
    pub pull: JobId,
    pub process: JobId,
    pub push: JobId,
}

impl Quantum {
    pub fn job(&self, phase: JobPhase) -> JobId {
        match phase {
            JobPhase::Pull => self.pull,
            JobPhase::Process => self.process,
            JobPhase::Push => self.push,
        }
    }
}

/// `{phase}_{start}_{end}`
pub fn job_name(phase: JobPhase, range: &OrbitRange) -> String {
    format!("{}_{}", phase, range.label())
}

/// Add the jobs of every quantum to a new graph and wire their
/// dependencies. `payload` supplies what each job runs.
pub fn build_quanta<F>(
    ranges: &[OrbitRange],
    kind: DependencyKind,
    lookback: usize,
    mut payload: F,
) -> Result<(JobGraph, Vec<Quantum>)>
where
    F: FnMut(JobPhase, &OrbitRange) -> Result<Payload>,
{
    let mut graph = JobGraph::new();
    let mut quanta: Vec<Quantum> = Vec::with_capacity(ranges.len());

    for (i, range) in ranges.iter().enumerate() {
        let mut add = |phase: JobPhase| -> Result<JobId> {
            graph.add_job(Job::new(&job_name(phase, range), payload(phase, range)?))
        };
        let quantum = Quantum {
            range: *range,
            pull: add(JobPhase::Pull)?,
            process: add(JobPhase::Process)?,
            push: add(JobPhase::Push)?,
        };

        graph.set_dependency(&quantum.process, &quantum.pull, kind)?;
        graph.set_dependency(&quantum.push, &quantum.process, kind)?;
        if let Some(prev) = quanta.last() {
            graph.set_dependency(&quantum.pull, &prev.pull, kind)?;
            graph.set_dependency(&quantum.process, &prev.process, kind)?;
        }
        if lookback > 0 && i >= lookback {
            graph.set_dependency(&quantum.pull, &quanta[i - lookback].push, kind)?;
        }
        debug!(range = %range, "quantum wired");
        quanta.push(quantum);
    }
    Ok((graph, quanta))
}

/// Create `run{N}` under `root`, N being one past the highest existing run.
pub fn make_run_dir(root: &Path) -> Result<PathBuf> {
    fs::create_dir_all(root)?;
    let mut next = 0u32;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let n = name
            .to_str()
            .and_then(|s| s.strip_prefix("run"))
            .and_then(|s| s.parse::<u32>().ok());
        if let Some(n) = n {
            next = next.max(n + 1);
        }
    }
    let dir = root.join(format!("run{}", next));
    fs::create_dir(&dir)?;
    Ok(dir)
}

/// Everything produced for one submission run.
#[derive(Debug)]
pub struct Plan {
    pub tree: LogTree,
    pub graph: JobGraph,
    pub quanta: Vec<Quantum>,
}

pub struct Orchestrator {
    config: Config,
    /// Binary the batch scripts invoke.
    exe: PathBuf,
}

impl Orchestrator {
    pub fn new(config: Config, exe: impl Into<PathBuf>) -> Self {
        Self {
            config,
            exe: exe.into(),
        }
    }

    /// Lay out a fresh run directory and build the job graph for `range`,
    /// writing one batch script per job.
    pub fn plan(&self, range: OrbitRange) -> Result<Plan> {
        let run_dir = make_run_dir(&self.config.paths.log_dir)?;
        let tree = LogTree::create(&run_dir)?;
        tree.save()?;
        self.config.save(&tree.config_file())?;

        let ranges = range.split(self.config.pipeline.granularity)?;
        info!(
            run_dir = %run_dir.display(),
            range = %range,
            quanta = ranges.len(),
            "planning run"
        );

        let (graph, quanta) = build_quanta(
            &ranges,
            self.config.scheduler.dependency_kind,
            self.config.pipeline.throttle_lookback,
            |phase, range| {
                let path = self.script(&tree, phase, range).write(tree.script_dir(phase))?;
                Ok(Payload::Script(path))
            },
        )?;
        Ok(Plan { tree, graph, quanta })
    }

    /// Plan `range` and submit it.
    pub fn run<S: BatchSubmitter>(&self, range: OrbitRange, submitter: S) -> Result<(Plan, SubmissionReport)> {
        let mut plan = self.plan(range)?;
        let report = Scheduler::new(submitter).submit(&mut plan.graph)?;
        info!(jobs = report.len(), run_dir = %plan.tree.run_dir.display(), "run submitted");
        Ok((plan, report))
    }

    fn script(&self, tree: &LogTree, phase: JobPhase, range: &OrbitRange) -> BatchScript {
        let name = job_name(phase, range);
        let command = vec![
            self.exe.display().to_string(),
            "--config".to_string(),
            tree.config_file().display().to_string(),
            phase.as_str().to_string(),
            "--log-tree".to_string(),
            tree.file().display().to_string(),
            range.start.to_string(),
            range.end.to_string(),
        ];
        BatchScript::new(&name, &self.config.scheduler, command)
            .with_output(tree.log_dir(phase).join(format!("{}.out", name)))
            .with_summary_log(tree.summary_log(&range.label()))
    }
}
