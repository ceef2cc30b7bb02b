//! Ordered submission of a job graph to an external batch scheduler.
//!
//! The scheduler itself runs nothing. It linearizes the [`JobGraph`],
//! submits each job in turn, and threads the identifiers handed back by the
//! batch system into the dependency clause of every job that depends on
//! them. The batch system then enforces the ordering.

use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, error, info};

use crate::core::dag::{DependencyKind, JobGraph};
use crate::core::job::{Job, JobId, Payload};
use crate::{Error, Result};

/// Anything that can queue a job and return its external identifier.
pub trait BatchSubmitter {
    /// Queue `job`. `dependencies` is the scheduler-specific clause, absent
    /// when the job depends on nothing.
    fn submit(&mut self, job: &Job, dependencies: Option<&str>) -> Result<String>;
}

/// Submits through `qsub`.
#[derive(Debug, Clone)]
pub struct PbsSubmitter {
    command: String,
}

impl PbsSubmitter {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }

    pub fn args(&self, job: &Job, dependencies: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(clause) = dependencies {
            args.push("-W".to_string());
            args.push(format!("depend={}", clause));
        }
        if let Payload::Script(path) = &job.payload {
            args.push(path.display().to_string());
        }
        args
    }
}

impl BatchSubmitter for PbsSubmitter {
    fn submit(&mut self, job: &Job, dependencies: Option<&str>) -> Result<String> {
        let args = self.args(job, dependencies);
        debug!(job = %job.name, command = %self.command, ?args, "qsub");

        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = match &job.payload {
            Payload::Script(_) => cmd.stdin(Stdio::null()).output()?,
            Payload::Literal(text) => {
                let mut child = cmd.stdin(Stdio::piped()).spawn()?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(text.as_bytes())?;
                }
                child.wait_with_output()?
            }
        };

        if !output.status.success() {
            return Err(Error::SubmissionFailure {
                job: job.name.clone(),
                status: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().next().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(Error::SubmissionFailure {
                job: job.name.clone(),
                status: output.status.code(),
                message: "scheduler returned no job id".to_string(),
            }),
        }
    }
}

/// Records submissions and hands out `dry.N` identifiers.
#[derive(Debug, Default)]
pub struct DryRunSubmitter {
    pub submitted: Vec<(String, Option<String>)>,
}

impl DryRunSubmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchSubmitter for DryRunSubmitter {
    fn submit(&mut self, job: &Job, dependencies: Option<&str>) -> Result<String> {
        self.submitted
            .push((job.name.clone(), dependencies.map(str::to_string)));
        let id = format!("dry.{}", self.submitted.len());
        info!(job = %job.name, id = %id, depend = ?dependencies, "dry-run submission");
        Ok(id)
    }
}

/// One dependency as recorded in a [`SubmissionReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedDependency {
    pub kind: DependencyKind,
    pub target: String,
    pub scheduler_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionEntry {
    pub job: JobId,
    pub name: String,
    pub scheduler_id: String,
    pub dependencies: Vec<AssignedDependency>,
}

/// Job to assigned dependencies, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    pub entries: Vec<SubmissionEntry>,
}

impl SubmissionReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Job names in submission order.
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&SubmissionEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

impl std::fmt::Display for SubmissionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for entry in &self.entries {
            write!(f, "{} ({})", entry.name, entry.scheduler_id)?;
            if entry.dependencies.is_empty() {
                writeln!(f, ": no dependencies")?;
                continue;
            }
            writeln!(f, ":")?;
            for dep in &entry.dependencies {
                writeln!(f, "    {} {} ({})", dep.kind, dep.target, dep.scheduler_id)?;
            }
        }
        Ok(())
    }
}

/// Build `kind:id[:id...]` groups joined by commas, one group per kind in
/// first-seen order.
pub fn dependency_clause(deps: &[AssignedDependency]) -> Option<String> {
    let mut groups: Vec<(DependencyKind, Vec<&str>)> = Vec::new();
    for dep in deps {
        match groups.iter_mut().find(|(kind, _)| *kind == dep.kind) {
            Some((_, ids)) => ids.push(dep.scheduler_id.as_str()),
            None => groups.push((dep.kind, vec![dep.scheduler_id.as_str()])),
        }
    }
    if groups.is_empty() {
        return None;
    }
    let clause = groups
        .iter()
        .map(|(kind, ids)| format!("{}:{}", kind, ids.join(":")))
        .collect::<Vec<_>>()
        .join(",");
    Some(clause)
}

/// Submits a [`JobGraph`] through a [`BatchSubmitter`].
pub struct Scheduler<S: BatchSubmitter> {
    submitter: S,
}

impl<S: BatchSubmitter> Scheduler<S> {
    pub fn new(submitter: S) -> Self {
        Self { submitter }
    }

    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    pub fn into_submitter(self) -> S {
        self.submitter
    }

    /// Submit every job of `graph` so that each one is queued after the
    /// jobs it depends on, recording the external ids on the jobs.
    ///
    /// The graph is sorted first: a cycle fails the call before anything is
    /// submitted. A failed submission stops the run; jobs already queued
    /// keep their ids and the partial report is logged for manual cleanup.
    pub fn submit(&mut self, graph: &mut JobGraph) -> Result<SubmissionReport> {
        let order = graph.topo_sort()?;
        info!(jobs = order.len(), "submitting job graph");

        let mut report = SubmissionReport::default();
        for id in order {
            if let Err(e) = self.submit_one(graph, &id, &mut report) {
                error!(error = %e, "submission failed; dependency map so far:\n{}", report);
                return Err(e);
            }
        }
        info!("all jobs submitted:\n{}", report);
        Ok(report)
    }

    fn submit_one(&mut self, graph: &mut JobGraph, id: &JobId, report: &mut SubmissionReport) -> Result<()> {
        let job = graph.get(id).ok_or(Error::JobNotFound(*id))?;

        let mut deps = Vec::new();
        for dep in graph.dependencies(id) {
            let target = graph.get(&dep.target).ok_or(Error::JobNotFound(dep.target))?;
            let scheduler_id = target.scheduler_id().ok_or_else(|| Error::MissingSchedulerId {
                job: job.name.clone(),
                target: target.name.clone(),
            })?;
            deps.push(AssignedDependency {
                kind: dep.kind,
                target: target.name.clone(),
                scheduler_id: scheduler_id.to_string(),
            });
        }

        let clause = dependency_clause(&deps);
        let scheduler_id = self.submitter.submit(job, clause.as_deref())?;
        debug!(job = %job.name, id = %scheduler_id, depend = ?clause, "job submitted");

        let name = job.name.clone();
        graph
            .get_mut(id)
            .ok_or(Error::JobNotFound(*id))?
            .set_scheduler_id(&scheduler_id)?;
        report.entries.push(SubmissionEntry {
            job: *id,
            name,
            scheduler_id,
            dependencies: deps,
        });
        Ok(())
    }
}
