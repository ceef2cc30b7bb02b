//! The task handler used by process jobs.

use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::{Config, DigestKind};
use crate::orchestration::tasks::{Task, TaskHandler, TaskOutcome, TaskReport};
use crate::util::run_logged;
use crate::Result;

const BUF_SIZE: usize = 1024 * 1024;

fn digest_reader<D: Digest>(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Lowercase hex digest of a file, read in fixed-size chunks.
pub fn digest_file(kind: DigestKind, path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    match kind {
        DigestKind::Md5 => digest_reader::<Md5>(file),
        DigestKind::Sha256 => digest_reader::<Sha256>(file),
    }
}

/// Runs hash, extract, copy and generate tasks against the local
/// filesystem and external tools.
#[derive(Debug, Clone)]
pub struct PipelineHandler {
    digest: DigestKind,
    generator: PathBuf,
    input_generator: PathBuf,
    orbit_times_bin: PathBuf,
    tar: String,
}

impl PipelineHandler {
    pub fn new(config: &Config) -> Self {
        Self {
            digest: config.pipeline.digest,
            generator: config.paths.generator.clone(),
            input_generator: config.paths.input_generator.clone(),
            orbit_times_bin: config.paths.orbit_times_bin.clone(),
            tar: "tar".to_string(),
        }
    }

    fn hash(&self, orbit: u32, path: &Path) -> TaskOutcome {
        debug!(orbit, path = %path.display(), "hashing");
        match digest_file(self.digest, path) {
            Ok(hex) => TaskOutcome::Digest(hex),
            Err(e) => {
                warn!(orbit, path = %path.display(), error = %e, "cannot hash archive");
                TaskOutcome::Failed(format!("cannot read {}: {}", path.display(), e))
            }
        }
    }

    fn extract(&self, orbit: u32, archive: &Path, untar_dir: &Path, log_file: &Path) -> Result<TaskOutcome> {
        info!(orbit, archive = %archive.display(), "extracting");
        let staging = untar_dir.join(".extract");
        fs::create_dir_all(&staging)?;

        let status = run_logged(
            Command::new(&self.tar).arg("-xf").arg(archive).arg("-C").arg(&staging),
            log_file,
        )?;
        if status != 0 {
            let _ = fs::remove_dir_all(&staging);
            return Ok(TaskOutcome::Failed(format!("tar exited with status {}", status)));
        }

        flatten_into(&staging, untar_dir)?;
        fs::remove_dir_all(&staging)?;
        fs::remove_file(archive)?;
        Ok(TaskOutcome::Done)
    }

    fn generate(
        &self,
        orbit: u32,
        untar_dir: &Path,
        input_list: &Path,
        output: &Path,
        log_file: &Path,
    ) -> Result<TaskOutcome> {
        debug!(orbit, "generating input list");
        if let Some(parent) = input_list.parent() {
            fs::create_dir_all(parent)?;
        }
        let status = run_logged(
            Command::new(&self.input_generator)
                .arg(untar_dir)
                .arg(orbit.to_string())
                .arg(input_list)
                .arg("--dir"),
            log_file,
        )?;
        if status != 0 {
            return Ok(TaskOutcome::Failed(format!(
                "input file generation exited with status {}",
                status
            )));
        }

        // the generator refuses to overwrite an existing product
        match fs::remove_file(output) {
            Ok(()) => debug!(orbit, output = %output.display(), "removed stale output"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(orbit, output = %output.display(), "generating product");
        let status = run_logged(
            Command::new(&self.generator)
                .arg(output)
                .arg(input_list)
                .arg(&self.orbit_times_bin),
            log_file,
        )?;
        if status != 0 {
            return Ok(TaskOutcome::Failed(format!(
                "generation exited with status {}",
                status
            )));
        }

        if let Err(e) = fs::remove_dir_all(untar_dir) {
            warn!(orbit, dir = %untar_dir.display(), error = %e, "could not remove untarred inputs");
        }
        Ok(TaskOutcome::Done)
    }

    fn copy(&self, orbit: u32, files: &[PathBuf], dest_dir: &Path) -> Result<TaskOutcome> {
        debug!(orbit, files = files.len(), dest = %dest_dir.display(), "copying");
        fs::create_dir_all(dest_dir)?;
        for file in files {
            let name = file.file_name().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", file.display()),
                )
            })?;
            fs::copy(file, dest_dir.join(name))?;
        }
        Ok(TaskOutcome::Done)
    }
}

impl TaskHandler for PipelineHandler {
    fn handle(&self, task: &Task) -> Result<TaskReport> {
        let outcome = match task {
            Task::Hash { orbit, path } => self.hash(*orbit, path),
            Task::Extract {
                orbit,
                archive,
                untar_dir,
                log_file,
            } => self
                .extract(*orbit, archive, untar_dir, log_file)
                .unwrap_or_else(|e| TaskOutcome::Failed(e.to_string())),
            Task::Generate {
                orbit,
                untar_dir,
                input_list,
                output,
                log_file,
            } => self
                .generate(*orbit, untar_dir, input_list, output, log_file)
                .unwrap_or_else(|e| TaskOutcome::Failed(e.to_string())),
            Task::Copy {
                orbit,
                files,
                dest_dir,
            } => self.copy(*orbit, files, dest_dir)?,
        };
        if let TaskOutcome::Failed(reason) = &outcome {
            warn!(orbit = task.orbit(), kind = %task.kind(), reason = %reason, "task failed");
        }
        Ok(TaskReport::new(task, outcome))
    }
}

/// Move every regular file below `from` directly into `to`.
fn flatten_into(from: &Path, to: &Path) -> Result<()> {
    let mut pending = vec![from.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else {
                fs::rename(&path, to.join(entry.file_name()))?;
            }
        }
    }
    Ok(())
}
