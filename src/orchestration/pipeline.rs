//! Bodies of the pull, process and push batch jobs.
//!
//! Each job runs for one quantum. Pull fetches the archives, process
//! verifies them and turns them into products, push ships the products.
//! Process hands its granule list to push through a JSON file in the run's
//! `misc` directory.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::granule::{Granule, GranuleState, WorkPaths};
use crate::core::orbit::{output_file_name, OrbitRange, OrbitTimes};
use crate::orchestration::dispatcher::TaskDispatcher;
use crate::orchestration::tasks::{Task, TaskHandler, TaskOutcome};
use crate::orchestration::verifier::{ChecksumVerifier, FailureLog, Retransfer};
use crate::state::{JobPhase, LogTree, SummaryLog};
use crate::transfer::{TransferBackend, TransferClient, TransferOptions};
use crate::{Error, Result};

/// Granules of every orbit in `range`, laid out per the configured
/// remote and staging directories.
pub fn quantum_granules(config: &Config, range: OrbitRange) -> Result<Vec<Granule>> {
    range
        .orbits()
        .map(|orbit| Granule::for_orbit(orbit, &config.transfer.remote_tar_dir, &config.paths.stage_dir))
        .collect()
}

/// Fetch the quantum's archives and wait for every transfer.
pub fn run_pull(
    config: &Config,
    tree: &LogTree,
    range: OrbitRange,
    backend: Arc<dyn TransferBackend>,
) -> Result<usize> {
    let granules = quantum_granules(config, range)?;
    let mut client = TransferClient::new(backend);
    for granule in &granules {
        client.add_file(&granule.source, &granule.archive, false);
    }

    let options = TransferOptions::from_config(&config.transfer, tree.batch_dir(JobPhase::Pull))?
        .with_label(format!("pull_{}", range.label()));
    let handles = client.transfer(config.transfer.parallelism, &options)?;
    info!(range = %range, archives = granules.len(), transfers = handles.len(), "pull submitted");
    client.wait()?;

    SummaryLog::new(tree.summary_log(&range.label()))
        .append(&format!("pull {}: {} archives transferred", range, granules.len()))?;
    Ok(granules.len())
}

/// Verify, extract and generate every archive of the quantum.
///
/// Returns all granules with their final states, which are also written to
/// the run's granule list. Per-granule failures are recorded in the
/// summary log; anything else aborts the workers and is returned.
pub async fn run_process(
    config: &Config,
    tree: &LogTree,
    range: OrbitRange,
    handler: Arc<dyn TaskHandler>,
    backend: Arc<dyn TransferBackend>,
) -> Result<Vec<Granule>> {
    let label = range.label();
    let summary = SummaryLog::new(tree.summary_log(&label));
    let orbit_times = OrbitTimes::load(&config.paths.orbit_times_txt)?;
    let granules = quantum_granules(config, range)?;

    let mut dispatcher = TaskDispatcher::spawn(config.pipeline.workers, handler)?;
    let job = ProcessJob {
        config,
        tree,
        label: &label,
        summary: &summary,
        orbit_times: &orbit_times,
    };

    let granules = match job.run(&mut dispatcher, granules, backend).await {
        Ok(granules) => granules,
        Err(e) => {
            error!(range = %range, error = %e, "process job failed");
            dispatcher.abort();
            if let Err(log_err) = summary.append(&format!("FAIL: process {} aborted: {}", range, e)) {
                warn!(error = %log_err, "cannot write summary log");
            }
            return Err(e);
        }
    };
    dispatcher.terminate().await?;

    let list = tree.granule_list(&label);
    fs::write(&list, serde_json::to_string_pretty(&granules)?)?;

    let generated = granules
        .iter()
        .filter(|g| g.state == GranuleState::Generated)
        .count();
    summary.append(&format!(
        "process {}: {} generated, {} failed",
        range,
        generated,
        granules.len() - generated
    ))?;
    info!(range = %range, generated, list = %list.display(), "process complete");
    Ok(granules)
}

/// Push every generated product of the quantum to
/// `remote_output_dir/YYYY/MM/DD/`.
pub fn run_push(
    config: &Config,
    tree: &LogTree,
    range: OrbitRange,
    backend: Arc<dyn TransferBackend>,
) -> Result<usize> {
    let label = range.label();
    let granules: Vec<Granule> =
        serde_json::from_str(&fs::read_to_string(tree.granule_list(&label))?)?;

    let mut client = TransferClient::new(backend);
    for granule in granules.iter().filter(|g| g.state == GranuleState::Generated) {
        let Some(work) = &granule.work else {
            continue;
        };
        let Some(name) = work.output.file_name() else {
            continue;
        };
        let dest = config
            .transfer
            .remote_output_dir
            .join(work.date_dir())
            .join(name);
        client.add_file(&work.output, dest, false);
    }

    let count = client.manifest().len();
    if count == 0 {
        warn!(range = %range, "nothing to push");
        return Ok(0);
    }

    let options = TransferOptions::from_config(&config.transfer, tree.batch_dir(JobPhase::Push))?
        .with_label(format!("push_{}", label));
    client.transfer(config.transfer.parallelism, &options)?;
    client.wait()?;

    SummaryLog::new(tree.summary_log(&label))
        .append(&format!("push {}: {} products transferred", range, count))?;
    info!(range = %range, products = count, "push complete");
    Ok(count)
}

/// Work paths of a verified granule.
///
/// Inputs unpack to `{stage}/untarData/{year}/{orbit}`, products land in
/// `{stage}/BFoutput/YYYY/MM/DD/`, logs under the process log directory by
/// the same date.
pub fn work_paths(config: &Config, tree: &LogTree, granule: &Granule, start_time: String) -> WorkPaths {
    let date = crate::core::granule::date_dir(&start_time);
    let stage = &config.paths.stage_dir;
    WorkPaths {
        untar_dir: stage
            .join("untarData")
            .join(granule.year.to_string())
            .join(granule.orbit.to_string()),
        output: stage
            .join("BFoutput")
            .join(&date)
            .join(output_file_name(granule.orbit, &start_time)),
        input_list: tree
            .misc
            .join("BFinputListing")
            .join(format!("{}input.txt", granule.orbit)),
        log_file: tree
            .process
            .join(&date)
            .join(format!("{}process_log.txt", granule.orbit)),
        start_time,
    }
}

/// Every regular file below `dir`, keyed by file name. The first file found
/// for a name wins.
pub fn index_path_files(dir: &Path) -> Result<HashMap<OsString, PathBuf>> {
    let mut index = HashMap::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else {
                index.entry(entry.file_name()).or_insert(path);
            }
        }
    }
    Ok(index)
}

/// Resolve the names listed in a granule's path file list.
pub fn resolve_path_files(
    orbit: u32,
    list: &Path,
    index: &HashMap<OsString, PathBuf>,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(list)?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|name| {
            index
                .get(&OsString::from(name))
                .cloned()
                .ok_or_else(|| Error::PathFileNotFound {
                    orbit,
                    name: name.to_string(),
                    dir: dir.to_path_buf(),
                })
        })
        .collect()
}

struct ProcessJob<'a> {
    config: &'a Config,
    tree: &'a LogTree,
    label: &'a str,
    summary: &'a SummaryLog,
    orbit_times: &'a OrbitTimes,
}

impl ProcessJob<'_> {
    async fn run(
        &self,
        dispatcher: &mut TaskDispatcher,
        granules: Vec<Granule>,
        backend: Arc<dyn TransferBackend>,
    ) -> Result<Vec<Granule>> {
        let verifier = ChecksumVerifier::from_config(self.config).with_failure_log(FailureLog {
            summary: self.summary.clone(),
            manifest: self.tree.misc.join(format!("failed_{}.txt", self.label)),
        });
        let retransfer = Retransfer {
            backend,
            parallelism: self.config.transfer.parallelism,
            options: TransferOptions::from_config(
                &self.config.transfer,
                self.tree.batch_dir(JobPhase::Pull),
            )?
            .with_label(format!("retry_{}", self.label)),
        };
        let verification = verifier
            .verify_with_retry(dispatcher, retransfer, granules)
            .await?;

        let mut granules = verification.verified;
        for granule in &mut granules {
            let start = self.orbit_times.start_stamp(granule.orbit)?;
            granule.work = Some(work_paths(self.config, self.tree, granule, start));
        }

        self.extract(dispatcher, &mut granules).await?;
        self.copy_path_files(dispatcher, &granules).await?;
        self.generate(dispatcher, &mut granules).await?;

        granules.extend(verification.failed);
        granules.sort_by_key(|g| g.orbit);
        Ok(granules)
    }

    async fn extract(&self, dispatcher: &mut TaskDispatcher, granules: &mut [Granule]) -> Result<()> {
        let tasks = granules
            .iter()
            .filter_map(|g| {
                let work = g.work.as_ref()?;
                Some(Task::Extract {
                    orbit: g.orbit,
                    archive: g.archive.clone(),
                    untar_dir: work.untar_dir.clone(),
                    log_file: work.log_file.clone(),
                })
            })
            .collect();
        let mut outcomes = run_checked(dispatcher, "extract", tasks).await?;

        for granule in granules.iter_mut() {
            match outcomes.remove(&granule.orbit) {
                Some(TaskOutcome::Failed(reason)) => {
                    granule.state = GranuleState::ExtractFailed;
                    self.summary.record_failure(granule, &reason)?;
                }
                Some(_) => granule.state = GranuleState::Extracted,
                None => {}
            }
        }
        Ok(())
    }

    async fn copy_path_files(&self, dispatcher: &mut TaskDispatcher, granules: &[Granule]) -> Result<()> {
        let extracted: Vec<(&Granule, &WorkPaths)> = granules
            .iter()
            .filter(|g| g.state == GranuleState::Extracted)
            .filter_map(|g| Some((g, g.work.as_ref()?)))
            .collect();
        if extracted.is_empty() {
            return Ok(());
        }

        let dir = &self.config.paths.path_files_dir;
        let index = index_path_files(dir)?;
        debug!(files = index.len(), dir = %dir.display(), "indexed path files");

        let mut tasks = Vec::with_capacity(extracted.len());
        for (granule, work) in extracted {
            let files = resolve_path_files(granule.orbit, &work.path_file_list(granule.orbit), &index, dir)?;
            tasks.push(Task::Copy {
                orbit: granule.orbit,
                files,
                dest_dir: work.untar_dir.clone(),
            });
        }
        run_checked(dispatcher, "copy", tasks).await?;
        Ok(())
    }

    async fn generate(&self, dispatcher: &mut TaskDispatcher, granules: &mut [Granule]) -> Result<()> {
        let tasks = granules
            .iter()
            .filter(|g| g.state == GranuleState::Extracted)
            .filter_map(|g| {
                let work = g.work.as_ref()?;
                Some(Task::Generate {
                    orbit: g.orbit,
                    untar_dir: work.untar_dir.clone(),
                    input_list: work.input_list.clone(),
                    output: work.output.clone(),
                    log_file: work.log_file.clone(),
                })
            })
            .collect();
        let mut outcomes = run_checked(dispatcher, "generate", tasks).await?;

        for granule in granules.iter_mut() {
            match outcomes.remove(&granule.orbit) {
                Some(TaskOutcome::Failed(reason)) => {
                    granule.state = GranuleState::GenerateFailed;
                    self.summary.record_failure(granule, &reason)?;
                }
                Some(_) => granule.state = GranuleState::Generated,
                None => {}
            }
        }
        Ok(())
    }
}

/// Run one phase and key the outcomes by orbit. Every task must report.
async fn run_checked(
    dispatcher: &mut TaskDispatcher,
    phase: &str,
    tasks: Vec<Task>,
) -> Result<HashMap<u32, TaskOutcome>> {
    let expected = tasks.len();
    let reports = dispatcher.run_phase(phase, tasks).await?;
    if reports.len() != expected {
        return Err(Error::ItemsLost {
            expected,
            accounted: reports.len(),
        });
    }
    Ok(reports.into_iter().map(|r| (r.orbit, r.outcome)).collect())
}
