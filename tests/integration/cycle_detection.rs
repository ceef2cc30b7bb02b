//! Cycle detection tests.
//!
//! A cyclic graph can never be satisfied by the batch system, so it must
//! be rejected before a single job is queued.

use fusionflow::core::{DependencyKind, JobGraph};
use fusionflow::orchestration::Scheduler;
use fusionflow::Error;

use crate::fixtures::{literal_job, RecordingSubmitter};

/// Test: Three-job cycle
/// Given a -> b -> c -> a
/// When the graph is submitted
/// Then CycleDetected is returned and nothing is submitted
#[test]
fn test_cycle_rejected_before_submission() {
    let mut graph = JobGraph::new();
    let a = literal_job(&mut graph, "a");
    let b = literal_job(&mut graph, "b");
    let c = literal_job(&mut graph, "c");
    let free = literal_job(&mut graph, "free");
    graph.set_dependency(&a, &b, DependencyKind::AfterOk).unwrap();
    graph.set_dependency(&b, &c, DependencyKind::AfterOk).unwrap();
    graph.set_dependency(&c, &a, DependencyKind::AfterOk).unwrap();

    let mut scheduler = Scheduler::new(RecordingSubmitter::new());
    let err = scheduler.submit(&mut graph).unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }));

    let submitter = scheduler.into_submitter();
    assert!(submitter.submissions.is_empty());
    assert!(graph.jobs().all(|j| !j.is_submitted()));
    assert!(graph.get(&free).is_some());
}

/// Test: Before-kinds participate in cycles
/// Given a before b (b waits on a) and a after b
/// Then the graph is cyclic
#[test]
fn test_cycle_through_before_kind() {
    let mut graph = JobGraph::new();
    let a = literal_job(&mut graph, "a");
    let b = literal_job(&mut graph, "b");
    graph.set_dependency(&a, &b, DependencyKind::BeforeAny).unwrap();
    assert!(graph.is_acyclic());
    graph.set_dependency(&a, &b, DependencyKind::AfterAny).unwrap();
    assert!(!graph.is_acyclic());

    let err = Scheduler::new(RecordingSubmitter::new()).submit(&mut graph).unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }));
}

/// Test: Re-setting an edge replaces it and can break a cycle
#[test]
fn test_replacing_edge_kind_keeps_one_edge() {
    let mut graph = JobGraph::new();
    let a = literal_job(&mut graph, "a");
    let b = literal_job(&mut graph, "b");
    graph.set_dependency(&b, &a, DependencyKind::AfterAny).unwrap();
    graph.set_dependency(&b, &a, DependencyKind::AfterNotOk).unwrap();
    assert_eq!(graph.dependency_count(), 1);
    assert_eq!(graph.dependency_kind(&b, &a), Some(DependencyKind::AfterNotOk));

    let mut scheduler = Scheduler::new(RecordingSubmitter::new());
    scheduler.submit(&mut graph).unwrap();
    let s = scheduler.into_submitter();
    assert_eq!(s.depend_of("b"), Some(format!("afternotok:{}", s.id_of("a")).as_str()));
}
