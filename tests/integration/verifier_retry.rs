//! Checksum verification with a single re-transfer round.
//!
//! Archives are hashed with the real handler. The transfer backend copies
//! from the fake remote tree, so a corrupted staged archive is repaired by
//! the re-transfer while a wrong sidecar is not.

use std::fs;
use std::sync::Arc;

use fusionflow::core::{Granule, GranuleState};
use fusionflow::orchestration::{
    ChecksumVerifier, FailureLog, PipelineHandler, Retransfer, TaskDispatcher, Verification,
};
use fusionflow::state::SummaryLog;
use fusionflow::transfer::TransferOptions;

use crate::fixtures::{LocalCopyBackend, Site};

const ORBITS: [u32; 3] = [1000, 1001, 1002];

fn stage(site: &Site, corrupt: &[u32]) -> Vec<Granule> {
    ORBITS
        .iter()
        .map(|&orbit| {
            site.make_remote_archive(orbit, "MISR_HRLL_P037.hdf");
            site.stage_archive(orbit, corrupt.contains(&orbit));
            Granule::for_orbit(orbit, &site.config.transfer.remote_tar_dir, &site.config.paths.stage_dir)
                .unwrap()
        })
        .collect()
}

fn verifier(site: &Site) -> ChecksumVerifier {
    ChecksumVerifier::from_config(&site.config).with_failure_log(FailureLog {
        summary: SummaryLog::new(site.tree.summary_log("1000_1002")),
        manifest: site.tree.misc.join("failed_1000_1002.txt"),
    })
}

async fn verify(site: &Site, backend: Arc<LocalCopyBackend>, granules: Vec<Granule>) -> Verification {
    let mut dispatcher =
        TaskDispatcher::spawn(2, Arc::new(PipelineHandler::new(&site.config))).unwrap();
    let retransfer = Retransfer {
        backend,
        parallelism: 2,
        options: TransferOptions::new(site.tree.misc.join("batches/retry")).with_label("retry"),
    };
    let result = verifier(site)
        .verify_with_retry(&mut dispatcher, retransfer, granules)
        .await
        .unwrap();
    dispatcher.terminate().await.unwrap();
    result
}

fn orbits(granules: &[Granule]) -> Vec<u32> {
    let mut orbits: Vec<u32> = granules.iter().map(|g| g.orbit).collect();
    orbits.sort();
    orbits
}

/// Test: Every archive matches
/// Then nothing fails and nothing is re-transferred
#[tokio::test]
async fn test_all_match_no_retransfer() {
    let site = Site::new();
    let granules = stage(&site, &[]);
    for orbit in ORBITS {
        site.write_true_sidecar(orbit);
    }

    let backend = LocalCopyBackend::new();
    let result = verify(&site, backend.clone(), granules).await;
    assert!(result.failed.is_empty());
    assert_eq!(orbits(&result.verified), ORBITS.to_vec());
    assert!(result.verified.iter().all(|g| g.state == GranuleState::Verified));
    assert!(backend.batches.lock().unwrap().is_empty());
    assert!(!site.tree.misc.join("failed_1000_1002.txt").exists());
}

/// Test: A corrupted copy is repaired by the re-transfer
/// Given orbit 1001 staged truncated but correct on the remote side
/// Then it is fetched again once and verifies on the second round
#[tokio::test]
async fn test_corrupt_copy_recovered_by_retransfer() {
    let site = Site::new();
    let granules = stage(&site, &[1001]);
    for orbit in ORBITS {
        site.write_true_sidecar(orbit);
    }

    let backend = LocalCopyBackend::new();
    let result = verify(&site, backend.clone(), granules).await;
    assert!(result.failed.is_empty());
    assert_eq!(result.total(), 3);
    assert_eq!(backend.batch_sizes(), vec![1]);
    let items = backend.all_items();
    assert!(items[0].0.ends_with("2000/1001archive.tar"));
    assert!(items[0].1.ends_with("2000/1001archive.tar"));
}

/// Test: A mismatch that survives the retry is permanent
/// Given a wrong sidecar for orbit 1001 and no sidecar for orbit 1002
/// Then both fail after exactly one re-transfer, are written to the
/// failure manifest and recorded in the summary log
#[tokio::test]
async fn test_double_mismatch_is_permanent() {
    let site = Site::new();
    let granules = stage(&site, &[]);
    site.write_true_sidecar(1000);
    site.write_sidecar(1001, "0123456789abcdef0123456789abcdef");

    let backend = LocalCopyBackend::new();
    let result = verify(&site, backend.clone(), granules).await;

    assert_eq!(result.verified.len() + result.failed.len(), 3);
    assert_eq!(orbits(&result.verified), vec![1000]);
    assert_eq!(orbits(&result.failed), vec![1001, 1002]);
    assert!(result.failed.iter().all(|g| g.state == GranuleState::VerifyFailed));
    // one round: each failed archive is fetched again exactly once
    let mut refetched: Vec<String> = backend
        .all_items()
        .iter()
        .map(|(src, _)| src.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    refetched.sort();
    assert_eq!(refetched, vec!["1001archive.tar", "1002archive.tar"]);
    assert_eq!(*backend.labels.lock().unwrap(), vec!["retry_0", "retry_1"]);

    let manifest = fs::read_to_string(site.tree.misc.join("failed_1000_1002.txt")).unwrap();
    assert_eq!(manifest.lines().count(), 2);
    assert!(manifest.contains("1001archive.tar"));

    let summary = fs::read_to_string(site.tree.summary_log("1000_1002")).unwrap();
    assert!(summary.contains("FAIL orbit=1001 state=verify_failed"));
    assert!(summary.contains("FAIL orbit=1002 state=verify_failed"));
}

/// Test: A failing re-transfer does not lose granules
#[tokio::test]
async fn test_failed_retransfer_still_accounts_for_all() {
    let site = Site::new();
    let granules = stage(&site, &[1000]);
    for orbit in ORBITS {
        site.write_true_sidecar(orbit);
    }

    // copies happen but the transfer service reports failure
    let result = verify(&site, LocalCopyBackend::failing(1), granules).await;
    assert_eq!(result.total(), 3);
}
