//! Archive integrity checks with a single re-transfer round.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, DigestKind};
use crate::core::granule::{Granule, GranuleState};
use crate::orchestration::dispatcher::TaskDispatcher;
use crate::orchestration::tasks::{Task, TaskOutcome};
use crate::state::{write_failure_manifest, SummaryLog};
use crate::transfer::{TransferBackend, TransferClient, TransferOptions};
use crate::util;
use crate::{Error, Result};

/// Outcome of a verification pass. Every input granule ends up in exactly
/// one of the two lists.
#[derive(Debug, Default)]
pub struct Verification {
    pub verified: Vec<Granule>,
    pub failed: Vec<Granule>,
}

impl Verification {
    pub fn total(&self) -> usize {
        self.verified.len() + self.failed.len()
    }
}

/// How failed archives are fetched again.
pub struct Retransfer {
    pub backend: Arc<dyn TransferBackend>,
    pub parallelism: usize,
    pub options: TransferOptions,
}

/// Where permanent failures are reported.
#[derive(Debug, Clone)]
pub struct FailureLog {
    pub summary: SummaryLog,
    /// `source dest` lines of the permanently failed archives.
    pub manifest: PathBuf,
}

pub struct ChecksumVerifier {
    hash_dir: PathBuf,
    digest: DigestKind,
    failure_log: Option<FailureLog>,
}

impl ChecksumVerifier {
    pub fn new(hash_dir: impl Into<PathBuf>, digest: DigestKind) -> Self {
        Self {
            hash_dir: hash_dir.into(),
            digest,
            failure_log: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.paths.hash_dir.clone(), config.pipeline.digest)
    }

    pub fn with_failure_log(mut self, log: FailureLog) -> Self {
        self.failure_log = Some(log);
        self
    }

    /// `{hash_dir}/{year}/{orbit}hash.{ext}`
    pub fn sidecar_path(&self, granule: &Granule) -> PathBuf {
        self.hash_dir
            .join(granule.year.to_string())
            .join(format!("{}hash.{}", granule.orbit, self.digest.extension()))
    }

    /// Fill in missing expected digests from the sidecars. A missing or
    /// unreadable sidecar leaves the digest unset, which fails verification.
    pub fn load_expected(&self, granules: &mut [Granule]) {
        for granule in granules.iter_mut().filter(|g| g.expected_digest.is_none()) {
            let path = self.sidecar_path(granule);
            match fs::read_to_string(&path) {
                Ok(text) => granule.expected_digest = Some(text.trim().to_lowercase()),
                Err(e) => warn!(orbit = granule.orbit, sidecar = %path.display(), error = %e, "no expected digest"),
            }
        }
    }

    /// Hash every granule once through `dispatcher` and compare against the
    /// expected digests.
    ///
    /// # Errors
    /// `ItemsLost` if a granule goes unaccounted for, plus anything the
    /// dispatcher raises.
    pub async fn verify_all(
        &self,
        dispatcher: &mut TaskDispatcher,
        mut granules: Vec<Granule>,
    ) -> Result<Verification> {
        let total = granules.len();
        self.load_expected(&mut granules);

        let tasks = granules
            .iter()
            .map(|g| Task::Hash {
                orbit: g.orbit,
                path: g.archive.clone(),
            })
            .collect();
        let reports = dispatcher.run_phase("hash", tasks).await?;
        if reports.len() != total {
            return Err(Error::ItemsLost {
                expected: total,
                accounted: reports.len(),
            });
        }

        let mut outcomes: HashMap<u32, TaskOutcome> =
            reports.into_iter().map(|r| (r.orbit, r.outcome)).collect();

        let mut result = Verification::default();
        for mut granule in granules {
            match outcomes.remove(&granule.orbit) {
                Some(TaskOutcome::Digest(hex)) => granule.actual_digest = Some(hex),
                Some(TaskOutcome::Failed(reason)) => {
                    warn!(orbit = granule.orbit, reason = %reason, "hash failed");
                }
                Some(TaskOutcome::Done) | None => {}
            }
            if granule.digest_matches() {
                granule.state = GranuleState::Verified;
                result.verified.push(granule);
            } else {
                granule.state = GranuleState::VerifyFailed;
                result.failed.push(granule);
            }
        }

        if result.total() != total {
            return Err(Error::ItemsLost {
                expected: total,
                accounted: result.total(),
            });
        }
        info!(
            verified = result.verified.len(),
            failed = result.failed.len(),
            "checksum round complete"
        );
        Ok(result)
    }

    /// Verify, re-fetch whatever failed in one fresh batch, verify those
    /// again. Archives failing twice are reported and returned as failed;
    /// nothing is retried more than once.
    pub async fn verify_with_retry(
        &self,
        dispatcher: &mut TaskDispatcher,
        retransfer: Retransfer,
        granules: Vec<Granule>,
    ) -> Result<Verification> {
        let total = granules.len();
        let mut first = self.verify_all(dispatcher, granules).await?;
        if first.failed.is_empty() {
            return Ok(first);
        }

        info!(count = first.failed.len(), "re-transferring archives that failed verification");
        let mut retry = std::mem::take(&mut first.failed);
        let mut client = TransferClient::new(retransfer.backend);
        for granule in &mut retry {
            client.add_file(&granule.source, &granule.archive, false);
            granule.state = GranuleState::Transferred;
            granule.actual_digest = None;
        }
        let (parallelism, options) = (retransfer.parallelism, retransfer.options);
        let transferred = util::blocking(move || {
            client.transfer(parallelism, &options)?;
            client.wait()
        })
        .await;
        if let Err(e) = transferred {
            // the second round records whatever is still broken
            warn!(error = %e, "re-transfer failed");
        }

        let second = self.verify_all(dispatcher, retry).await?;
        let mut result = Verification {
            verified: first.verified,
            failed: second.failed,
        };
        result.verified.extend(second.verified);

        if result.total() != total {
            return Err(Error::ItemsLost {
                expected: total,
                accounted: result.total(),
            });
        }
        if !result.failed.is_empty() {
            self.report_failures(&result.failed)?;
        }
        Ok(result)
    }

    fn report_failures(&self, failed: &[Granule]) -> Result<()> {
        for granule in failed {
            warn!(orbit = granule.orbit, "archive failed verification twice");
        }
        let Some(log) = &self.failure_log else {
            return Ok(());
        };
        write_failure_manifest(&log.manifest, failed)?;
        for granule in failed {
            log.summary.record_failure(granule, "checksum mismatch after retry")?;
        }
        log.summary.append(&format!(
            "{} archives failed verification, see {}",
            failed.len(),
            log.manifest.display()
        ))?;
        Ok(())
    }
}
