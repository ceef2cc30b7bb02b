//! Pull, process and push jobs over a scratch site.
//!
//! Tool scripts stand in for the input generator and the product
//! generator; transfers are local copies. Four orbits exercise each way a
//! granule can end up.

use std::fs;
use std::sync::Arc;

use fusionflow::core::{Granule, GranuleState};
use fusionflow::orchestration::{run_process, run_pull, run_push, PipelineHandler};
use fusionflow::Error;

use crate::fixtures::{range, LocalCopyBackend, Site};

const PATH_FILE: &str = "MISR_HRLL_P037.hdf";

/// 1000 succeeds, 1001 has a wrong sidecar, 1002 fails generation,
/// 1003 is not a tar archive.
fn prepare(site: &Site) {
    site.install_tools(&[1002]);
    site.write_orbit_times(&[1000, 1001, 1002, 1003]);
    for orbit in [1000, 1001, 1002] {
        site.make_remote_archive(orbit, PATH_FILE);
    }
    let broken = site.config.transfer.remote_tar_dir.join("2000/1003archive.tar");
    fs::write(&broken, b"this is not a tar archive").unwrap();

    for orbit in [1000, 1002, 1003] {
        site.write_true_sidecar(orbit);
    }
    site.write_sidecar(1001, "ffffffffffffffffffffffffffffffff");
}

fn state_of(granules: &[Granule], orbit: u32) -> GranuleState {
    granules.iter().find(|g| g.orbit == orbit).unwrap().state
}

/// Test: Full quantum through pull, process and push
#[tokio::test]
async fn test_pull_process_push() {
    let site = Site::new();
    prepare(&site);
    let quantum = range(1000, 1003);

    let pulled = run_pull(&site.config, &site.tree, quantum, LocalCopyBackend::new()).unwrap();
    assert_eq!(pulled, 4);
    assert!(site.config.paths.stage_dir.join("2000/1000archive.tar").is_file());

    let handler = Arc::new(PipelineHandler::new(&site.config));
    let granules = run_process(&site.config, &site.tree, quantum, handler, LocalCopyBackend::new())
        .await
        .unwrap();

    assert_eq!(granules.len(), 4);
    assert_eq!(
        granules.iter().map(|g| g.orbit).collect::<Vec<_>>(),
        vec![1000, 1001, 1002, 1003]
    );
    assert_eq!(state_of(&granules, 1000), GranuleState::Generated);
    assert_eq!(state_of(&granules, 1001), GranuleState::VerifyFailed);
    assert_eq!(state_of(&granules, 1002), GranuleState::GenerateFailed);
    assert_eq!(state_of(&granules, 1003), GranuleState::ExtractFailed);

    let stage = &site.config.paths.stage_dir;
    let product = stage.join("BFoutput/2000/02/01/TERRA_BF_L1B_O1000_20000201154010_F000_V000.h5");
    let listing = fs::read_to_string(&product).unwrap();
    assert!(listing.contains(PATH_FILE), "path file copied before generation");
    assert!(listing.contains("MISR_GRP_O1000.hdf"), "archive flattened");

    // success removes inputs; failures keep them for inspection
    assert!(!stage.join("untarData/2000/1000").exists());
    assert!(!stage.join("2000/1000archive.tar").exists());
    assert!(stage.join("untarData/2000/1002").is_dir());
    assert!(stage.join("2000/1003archive.tar").is_file());

    let summary = fs::read_to_string(site.tree.summary_log("1000_1003")).unwrap();
    assert!(summary.contains("FAIL orbit=1001"));
    assert!(summary.contains("FAIL orbit=1002 state=generate_failed"));
    assert!(summary.contains("FAIL orbit=1003 state=extract_failed"));
    assert!(summary.contains("1 generated, 3 failed"));

    let list = site.tree.granule_list("1000_1003");
    let saved: Vec<Granule> = serde_json::from_str(&fs::read_to_string(&list).unwrap()).unwrap();
    assert_eq!(saved, granules);

    let backend = LocalCopyBackend::new();
    let pushed = run_push(&site.config, &site.tree, quantum, backend.clone()).unwrap();
    assert_eq!(pushed, 1);
    let remote = site
        .config
        .transfer
        .remote_output_dir
        .join("2000/02/01/TERRA_BF_L1B_O1000_20000201154010_F000_V000.h5");
    assert_eq!(fs::read_to_string(remote).unwrap(), listing);
    assert_eq!(*backend.labels.lock().unwrap(), vec!["push_1000_1003_0"]);
}

/// Test: A missing auxiliary path file aborts the job
#[tokio::test]
async fn test_missing_path_file_is_fatal() {
    let site = Site::new();
    site.install_tools(&[]);
    site.write_orbit_times(&[1000]);
    site.make_remote_archive(1000, PATH_FILE);
    site.write_true_sidecar(1000);
    fs::remove_file(site.config.paths.path_files_dir.join("hrll").join(PATH_FILE)).unwrap();
    site.stage_archive(1000, false);

    let handler = Arc::new(PipelineHandler::new(&site.config));
    let err = run_process(&site.config, &site.tree, range(1000, 1000), handler, LocalCopyBackend::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PathFileNotFound { orbit: 1000, .. }));

    let summary = fs::read_to_string(site.tree.summary_log("1000_1000")).unwrap();
    assert!(summary.contains("FAIL: process 1000-1000 aborted"));
    assert!(!site.tree.granule_list("1000_1000").exists());
}

/// Test: Push with nothing generated transfers nothing
#[test]
fn test_push_without_products() {
    let site = Site::new();
    let list: Vec<Granule> = vec![Granule::new(1000, "/r", "/h").unwrap()];
    fs::write(
        site.tree.granule_list("1000_1000"),
        serde_json::to_string(&list).unwrap(),
    )
    .unwrap();

    let backend = LocalCopyBackend::new();
    let pushed = run_push(&site.config, &site.tree, range(1000, 1000), backend.clone()).unwrap();
    assert_eq!(pushed, 0);
    assert!(backend.batches.lock().unwrap().is_empty());
}

/// Test: A rejected submission still waits on the batches already running
/// Given three pull batches where the second is refused by the service
/// Then the first batch is waited on before the error is returned
#[test]
fn test_pull_submit_failure_waits_on_submitted() {
    let mut site = Site::new();
    site.config.transfer.parallelism = 3;
    let backend = LocalCopyBackend::rejecting_submit(2);

    let err = run_pull(&site.config, &site.tree, range(1000, 1005), backend.clone()).unwrap_err();
    assert!(matches!(err, Error::TransferFailure { ref handle, .. } if handle == "pull_1000_1005_1"));
    assert_eq!(backend.batch_sizes(), vec![2]);
    assert_eq!(*backend.waited.lock().unwrap(), backend.submitted_ids());
    assert_eq!(*backend.waited.lock().unwrap(), vec!["task-0"]);
}
