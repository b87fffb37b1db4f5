//! Concurrency bound, cancellation and timeouts under the worker pool.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::harness::wait_until;
use common::{FakeReader, Gate, TestHarness};
use mdbconv::error::{ConvertError, ErrorKind};
use mdbconv::job::{JobSnapshot, JobState};
use mdbconv::JobPhase;

fn exporting(snapshots: &[JobSnapshot]) -> usize {
    snapshots
        .iter()
        .filter(|s| s.state == JobState::Converting && s.phase == JobPhase::Exporting)
        .count()
}

#[test]
fn test_concurrency_bound_holds() {
    let gate = Arc::new(Gate::default());
    let harness = TestHarness::with_settings(FakeReader::shop().gated(gate.clone()), |s| {
        s.max_concurrent_jobs = 2
    });

    let jobs: Vec<String> = (0..5)
        .map(|_| harness.start(&["Customers"], &["csv"]))
        .collect();

    wait_until("two workers blocked", || gate.waiting() == 2);
    for _ in 0..10 {
        let snapshots = harness.orchestrator.registry().snapshot_all();
        assert_eq!(exporting(&snapshots), 2);
        assert_eq!(
            snapshots
                .iter()
                .filter(|s| s.phase == JobPhase::Queued)
                .count(),
            3
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.active, 2);
    assert_eq!(stats.queued, 3);
    assert_eq!(stats.max_concurrent, 2);

    gate.open();
    for job_id in &jobs {
        assert_eq!(harness.wait_for_terminal(job_id).state, JobState::Done);
    }
}

#[test]
fn test_bound_sampled_while_running() {
    let harness = TestHarness::with_settings(
        FakeReader::shop().with_read_delay(Duration::from_millis(15)),
        |s| s.max_concurrent_jobs = 3,
    );

    let jobs: Vec<String> = (0..8)
        .map(|_| harness.start(&["Customers", "Orders"], &["csv", "json"]))
        .collect();

    let mut peak = 0;
    while !jobs
        .iter()
        .all(|id| harness.status(id).state.is_terminal())
    {
        let snapshots = harness.orchestrator.registry().snapshot_all();
        peak = peak.max(exporting(&snapshots));
        assert!(exporting(&snapshots) <= 3);
        std::thread::sleep(Duration::from_millis(2));
    }

    assert!(peak >= 1);
    for job_id in &jobs {
        assert_eq!(harness.status(job_id).state, JobState::Done);
    }
}

#[test]
fn test_cancel_running_job_stops_between_tables() {
    let gate = Arc::new(Gate::default());
    let harness = TestHarness::new(FakeReader::shop().gated(gate.clone()));
    let job_id = harness.start(&["Customers", "Orders"], &["csv"]);

    wait_until("first table read", || gate.waiting() == 1);
    let snapshot = harness.orchestrator.cancel(&job_id).unwrap();
    assert_eq!(snapshot.state, JobState::Converting);

    gate.open();
    let failed = harness.wait_for_terminal(&job_id);
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.error.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(failed.progress.tables_completed, 1);
    assert!(!harness.orchestrator.exports().archive_path(&job_id).exists());
    assert_eq!(harness.reader.read_calls(), 1);

    assert!(matches!(
        harness.orchestrator.cancel(&job_id),
        Err(ConvertError::InvalidState { .. })
    ));
}

#[test]
fn test_cancel_queued_job_never_reads() {
    let gate = Arc::new(Gate::default());
    let harness = TestHarness::with_settings(FakeReader::shop().gated(gate.clone()), |s| {
        s.max_concurrent_jobs = 1
    });

    let running = harness.start(&["Customers"], &["csv"]);
    wait_until("first job reading", || gate.waiting() == 1);
    let queued = harness.start(&["Orders"], &["csv"]);
    assert_eq!(harness.status(&queued).phase, JobPhase::Queued);

    harness.orchestrator.cancel(&queued).unwrap();
    gate.open();

    assert_eq!(harness.wait_for_terminal(&running).state, JobState::Done);
    let cancelled = harness.wait_for_terminal(&queued);
    assert_eq!(cancelled.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(cancelled.outputs.is_empty());
    assert_eq!(harness.reader.read_calls(), 1);
}

#[test]
fn test_delete_refused_while_converting() {
    let gate = Arc::new(Gate::default());
    let harness = TestHarness::new(FakeReader::shop().gated(gate.clone()));
    let job_id = harness.start(&["Customers"], &["csv"]);
    wait_until("job reading", || gate.waiting() == 1);

    let refused = harness.orchestrator.delete(&job_id);
    gate.open();

    assert!(matches!(
        refused,
        Err(ConvertError::InvalidState { state: JobState::Converting, .. })
    ));
    assert_eq!(harness.wait_for_terminal(&job_id).state, JobState::Done);
}

#[test]
fn test_status_does_not_wait_for_worker_io() {
    let gate = Arc::new(Gate::default());
    let harness = TestHarness::new(FakeReader::shop().gated(gate.clone()));
    let job_id = harness.start(&["Customers"], &["csv"]);
    wait_until("job reading", || gate.waiting() == 1);

    let started = std::time::Instant::now();
    for _ in 0..100 {
        let snapshot = harness.status(&job_id);
        assert_eq!(snapshot.progress.current_table.as_deref(), Some("Customers"));
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    gate.open();
    harness.wait_for_terminal(&job_id);
}

#[test]
fn test_zero_timeout_disables_limit() {
    let harness = TestHarness::with_settings(
        FakeReader::shop().with_read_delay(Duration::from_millis(50)),
        |s| s.job_timeout_minutes = 0,
    );
    let job_id = harness.start(&["Customers", "Orders"], &["csv"]);
    assert_eq!(harness.wait_for_terminal(&job_id).state, JobState::Done);
}
