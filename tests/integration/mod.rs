//! Integration test suite for fusionflow.
//!
//! These tests drive the public API the way the CLI does: a run's job
//! graph is built and submitted, and process jobs run against real files
//! in temporary directories.
//!
//! # Test Categories
//!
//! - `submission_e2e`: Quanta wiring and ordered submission
//! - `cycle_detection`: Cyclic graphs are rejected before submission
//! - `rendezvous`: Master/worker protocol under randomized delays
//! - `verifier_retry`: Checksum verification with one re-transfer round
//! - `transfer_partitions`: Batch splitting and waiting
//! - `process_job`: Process and push jobs over staged archives
//!
//! # CI Compatibility
//!
//! No scheduler or transfer service is contacted. Process job tests need
//! `tar` and `/bin/sh`.

mod fixtures;

mod cycle_detection;
mod verifier_retry;
mod process_job;
