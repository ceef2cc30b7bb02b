//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Recording batch submissions without a scheduler
//! - A transfer backend that copies files locally
//! - Handlers with scripted delays
//! - Staged archives, sidecars and tool scripts for process jobs

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use fusionflow::config::{Config, DigestKind};
use fusionflow::core::{Job, JobGraph, JobId, OrbitRange, Payload};
use fusionflow::orchestration::{digest_file, BatchSubmitter, Task, TaskHandler, TaskOutcome, TaskReport};
use fusionflow::state::LogTree;
use fusionflow::transfer::{TransferBackend, TransferOptions};
use fusionflow::{Error, Result};

/// A submission as seen by the batch system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub name: String,
    pub depend: Option<String>,
    pub id: String,
}

/// Hands out `N.sched` ids and records every call. Optionally fails on a
/// named job.
#[derive(Debug, Default)]
pub struct RecordingSubmitter {
    pub submissions: Vec<Submission>,
    pub fail_on: Option<String>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(name: &str) -> Self {
        Self {
            submissions: Vec::new(),
            fail_on: Some(name.to_string()),
        }
    }

    pub fn position(&self, name: &str) -> usize {
        self.submissions
            .iter()
            .position(|s| s.name == name)
            .unwrap_or_else(|| panic!("{} was never submitted", name))
    }

    pub fn id_of(&self, name: &str) -> &str {
        &self.submissions[self.position(name)].id
    }

    pub fn depend_of(&self, name: &str) -> Option<&str> {
        self.submissions[self.position(name)].depend.as_deref()
    }
}

impl BatchSubmitter for RecordingSubmitter {
    fn submit(&mut self, job: &Job, dependencies: Option<&str>) -> Result<String> {
        if self.fail_on.as_deref() == Some(job.name.as_str()) {
            return Err(Error::SubmissionFailure {
                job: job.name.clone(),
                status: Some(1),
                message: "qsub: would exceed queue limit".to_string(),
            });
        }
        let id = format!("{}.sched", self.submissions.len() + 100);
        self.submissions.push(Submission {
            name: job.name.clone(),
            depend: dependencies.map(str::to_string),
            id: id.clone(),
        });
        Ok(id)
    }
}

/// Add a literal job to `graph`.
pub fn literal_job(graph: &mut JobGraph, name: &str) -> JobId {
    graph
        .add_job(Job::new(name, Payload::Literal(format!("echo {}", name))))
        .unwrap()
}

pub fn range(start: u32, end: u32) -> OrbitRange {
    OrbitRange::new(start, end).unwrap()
}

/// Transfer backend that performs each batch as a local copy.
///
/// Every submitted batch file is parsed and its items copied; the
/// contents of each batch are kept for inspection. `fail_status`
/// makes every `wait` report that status; `reject_submit` makes the
/// n-th submission (counting from 1) fail before anything is copied.
#[derive(Debug, Default)]
pub struct LocalCopyBackend {
    pub batches: Mutex<Vec<Vec<(PathBuf, PathBuf)>>>,
    pub labels: Mutex<Vec<String>>,
    pub waited: Mutex<Vec<String>>,
    pub fail_status: Option<i32>,
    pub reject_submit: Option<usize>,
    attempts: AtomicUsize,
    next: AtomicUsize,
}

impl LocalCopyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(status: i32) -> Arc<Self> {
        Arc::new(Self {
            fail_status: Some(status),
            ..Self::default()
        })
    }

    pub fn rejecting_submit(n: usize) -> Arc<Self> {
        Arc::new(Self {
            reject_submit: Some(n),
            ..Self::default()
        })
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        (0..self.next.load(Ordering::SeqCst))
            .map(|i| format!("task-{}", i))
            .collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn all_items(&self) -> Vec<(PathBuf, PathBuf)> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

impl TransferBackend for LocalCopyBackend {
    fn submit(&self, batch_file: &Path, label: &str, _opts: &TransferOptions) -> Result<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject_submit == Some(attempt) {
            return Err(Error::TransferFailure {
                handle: label.to_string(),
                status: 1,
            });
        }
        let text = fs::read_to_string(batch_file)?;
        let mut items = Vec::new();
        for line in text.lines() {
            let mut fields = line.split_whitespace().filter(|f| *f != "--recursive");
            let (Some(src), Some(dest)) = (fields.next(), fields.next()) else {
                continue;
            };
            let (src, dest) = (PathBuf::from(src), PathBuf::from(dest));
            if src.is_file() {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&src, &dest)?;
            }
            items.push((src, dest));
        }
        self.batches.lock().unwrap().push(items);
        self.labels.lock().unwrap().push(label.to_string());
        Ok(format!("task-{}", self.next.fetch_add(1, Ordering::SeqCst)))
    }

    fn wait(&self, task_id: &str) -> Result<i32> {
        self.waited.lock().unwrap().push(task_id.to_string());
        Ok(self.fail_status.unwrap_or(0))
    }
}

/// One task's behaviour: how long it runs and whether it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub delay_ms: u64,
    pub fail: bool,
}

/// Plays a per-orbit script of delays and outcomes. Counts concurrent
/// executions.
pub struct ScriptedHandler {
    steps: Vec<Step>,
    running: AtomicUsize,
    pub peak: AtomicUsize,
    pub handled: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            handled: AtomicUsize::new(0),
        }
    }

    /// `tasks` successful steps of `delay_ms` each.
    pub fn uniform(tasks: usize, delay_ms: u64) -> Self {
        Self::new(vec![Step { delay_ms, fail: false }; tasks])
    }
}

impl TaskHandler for ScriptedHandler {
    fn handle(&self, task: &Task) -> Result<TaskReport> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let step = self
            .steps
            .get(task.orbit() as usize)
            .copied()
            .unwrap_or(Step { delay_ms: 0, fail: false });
        std::thread::sleep(Duration::from_millis(step.delay_ms));
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.handled.fetch_add(1, Ordering::SeqCst);
        let outcome = if step.fail {
            TaskOutcome::Failed(format!("scripted failure for orbit {}", task.orbit()))
        } else {
            TaskOutcome::Done
        };
        Ok(TaskReport::new(task, outcome))
    }
}

pub fn hash_tasks(n: usize) -> Vec<Task> {
    (0..n as u32)
        .map(|orbit| Task::Hash {
            orbit,
            path: PathBuf::from(format!("/stage/{}archive.tar", orbit)),
        })
        .collect()
}

pub fn write_executable(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

/// A scratch site: remote tar dir, staging area, hash sidecars, path
/// files, tools, and a log tree, all under one temporary directory.
pub struct Site {
    pub temp_dir: TempDir,
    pub config: Config,
    pub tree: LogTree,
}

impl Site {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();

        let mut config = Config::default();
        config.paths.stage_dir = root.join("stage");
        config.paths.log_dir = root.join("logs");
        config.paths.hash_dir = root.join("hashes");
        config.paths.path_files_dir = root.join("path_files");
        config.paths.orbit_times_txt = root.join("Orbit_Path_Time.txt");
        config.paths.orbit_times_bin = root.join("Orbit_Path_Time.bin");
        config.paths.input_generator = root.join("bin/genFusionInput.sh");
        config.paths.generator = root.join("bin/basicFusion");
        config.transfer.remote_tar_dir = root.join("remote/tars");
        config.transfer.remote_output_dir = root.join("remote/output");
        config.transfer.parallelism = 2;
        config.pipeline.workers = 3;
        config.pipeline.digest = DigestKind::Md5;

        fs::create_dir_all(&config.paths.stage_dir).unwrap();
        fs::write(&config.paths.orbit_times_bin, b"\0").unwrap();

        let tree = LogTree::create(&root.join("run0")).unwrap();
        tree.save().unwrap();

        Self {
            temp_dir,
            config,
            tree,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Lists the untar dir into the input list and writes a product naming
    /// every input. Orbits in `fail_orbits` make the generator exit 3.
    pub fn install_tools(&self, fail_orbits: &[u32]) {
        write_executable(
            &self.config.paths.input_generator,
            "ls \"$1\" > \"$3\"\n",
        );
        let mut body = String::new();
        for orbit in fail_orbits {
            body.push_str(&format!("case \"$1\" in *_O{}_*) exit 3;; esac\n", orbit));
        }
        body.push_str("cat \"$2\" > \"$1\"\n");
        write_executable(&self.config.paths.generator, &body);
    }

    /// One orbit-times line per orbit, starting on consecutive days of
    /// February 2000.
    pub fn write_orbit_times(&self, orbits: &[u32]) {
        let mut text = String::new();
        for (i, orbit) in orbits.iter().enumerate() {
            text.push_str(&format!(
                "{} 37 2000-02-{:02}T15:40:10Z 2000-02-{:02}T17:18:43Z\n",
                orbit,
                i + 1,
                i + 1
            ));
        }
        fs::write(&self.config.paths.orbit_times_txt, text).unwrap();
    }

    /// Remote archive for `orbit` holding one data file and a path file
    /// list naming `path_file`.
    pub fn make_remote_archive(&self, orbit: u32, path_file: &str) -> PathBuf {
        let src = self.root().join(format!("build/{}", orbit));
        fs::create_dir_all(src.join("MISR")).unwrap();
        fs::write(src.join(format!("MISR/MISR_GRP_O{}.hdf", orbit)), format!("data {}", orbit)).unwrap();
        fs::write(src.join(format!("MISR_PATH_FILES_{}.txt", orbit)), format!("{}\n", path_file)).unwrap();

        let remote = self.config.transfer.remote_tar_dir.join("2000");
        fs::create_dir_all(&remote).unwrap();
        let archive = remote.join(format!("{}archive.tar", orbit));
        let status = Command::new("tar")
            .arg("-cf")
            .arg(&archive)
            .arg("-C")
            .arg(&src)
            .arg(".")
            .status()
            .unwrap();
        assert!(status.success());

        let path_files = self.config.paths.path_files_dir.join("hrll");
        fs::create_dir_all(&path_files).unwrap();
        fs::write(path_files.join(path_file), b"path data").unwrap();
        archive
    }

    /// Write the checksum sidecar for `orbit`.
    pub fn write_sidecar(&self, orbit: u32, digest: &str) {
        let dir = self.config.paths.hash_dir.join("2000");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}hash.md5", orbit)), format!("{}\n", digest)).unwrap();
    }

    /// Sidecar holding the true digest of the remote archive.
    pub fn write_true_sidecar(&self, orbit: u32) {
        let archive = self
            .config
            .transfer
            .remote_tar_dir
            .join("2000")
            .join(format!("{}archive.tar", orbit));
        let digest = digest_file(DigestKind::Md5, &archive).unwrap();
        self.write_sidecar(orbit, &digest);
    }

    /// Put a copy of the remote archive into the staging area, optionally
    /// corrupted.
    pub fn stage_archive(&self, orbit: u32, corrupt: bool) -> PathBuf {
        let remote = self
            .config
            .transfer
            .remote_tar_dir
            .join("2000")
            .join(format!("{}archive.tar", orbit));
        let staged = self.config.paths.stage_dir.join("2000").join(format!("{}archive.tar", orbit));
        fs::create_dir_all(staged.parent().unwrap()).unwrap();
        if corrupt {
            fs::write(&staged, b"truncated").unwrap();
        } else {
            fs::copy(&remote, &staged).unwrap();
        }
        staged
    }
}
