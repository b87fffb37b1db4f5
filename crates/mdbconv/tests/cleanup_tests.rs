//! Cleanup sweeper behaviour against live jobs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::harness::wait_until;
use common::{FakeReader, Gate, TestHarness};
use mdbconv::job::JobState;
use mdbconv::CleanupSweeper;

const RETENTION: Duration = Duration::from_secs(24 * 3600);

fn backdate(harness: &TestHarness, job_id: &str, hours: i64) {
    harness
        .orchestrator
        .registry()
        .get(job_id)
        .unwrap()
        .update(|job| {
            job.last_touched_at = Utc::now() - chrono::Duration::hours(hours);
            job.created_at = job.last_touched_at;
        });
}

fn sweeper(harness: &TestHarness) -> CleanupSweeper {
    CleanupSweeper::with_timing(
        Arc::clone(&harness.orchestrator),
        Duration::from_secs(3600),
        RETENTION,
    )
}

#[test]
fn test_converting_job_is_never_removed() {
    let gate = Arc::new(Gate::default());
    let harness = TestHarness::new(FakeReader::shop().gated(gate.clone()));
    let job_id = harness.start(&["Customers"], &["csv"]);
    wait_until("job reading", || gate.waiting() == 1);
    backdate(&harness, &job_id, 24 * 30);

    let report = sweeper(&harness).sweep_once();
    let snapshot = harness.status(&job_id);
    gate.open();

    assert!(report.reaped.is_empty());
    assert!(report.expired.is_empty());
    assert_eq!(snapshot.state, JobState::Converting);
    assert!(harness.orchestrator.exports().job_dir(&job_id).exists());

    assert_eq!(harness.wait_for_terminal(&job_id).state, JobState::Done);
}

#[test]
fn test_old_done_job_is_reaped() {
    let harness = TestHarness::new(FakeReader::shop());
    let old = harness.start(&["Customers"], &["csv"]);
    let fresh = harness.start(&["Orders"], &["csv"]);
    harness.wait_for_state(&old, JobState::Done);
    harness.wait_for_state(&fresh, JobState::Done);
    let old_archive = harness.orchestrator.archive(&old).unwrap().path;
    backdate(&harness, &old, 25);

    let report = sweeper(&harness).sweep_once();

    assert_eq!(report.reaped, vec![old.clone()]);
    assert!(harness.orchestrator.status(&old).is_err());
    assert!(!old_archive.exists());
    assert!(!harness.orchestrator.exports().job_dir(&old).exists());

    assert_eq!(harness.status(&fresh).state, JobState::Done);
    assert!(harness.orchestrator.archive(&fresh).unwrap().path.exists());
    assert_eq!(std::fs::read_dir(harness.upload_dir()).unwrap().count(), 1);
}

#[test]
fn test_failed_job_is_reaped_like_done() {
    let harness = TestHarness::new(FakeReader::shop().failing_table("Orders"));
    let job_id = harness.start(&["Orders"], &["csv"]);
    assert_eq!(harness.wait_for_terminal(&job_id).state, JobState::Failed);
    backdate(&harness, &job_id, 48);

    let report = sweeper(&harness).sweep_once();

    assert_eq!(report.reaped, vec![job_id]);
    assert!(harness.orchestrator.registry().is_empty());
}

#[test]
fn test_abandoned_listing_expires_then_goes() {
    let harness = TestHarness::new(FakeReader::shop());
    let job_id = harness.upload("shop.mdb");
    harness.orchestrator.list_tables(&job_id).unwrap();
    backdate(&harness, &job_id, 30);

    let sweeper = sweeper(&harness);
    let first = sweeper.sweep_once();
    assert_eq!(first.expired, vec![job_id.clone()]);
    assert!(first.reaped.is_empty());
    assert_eq!(harness.status(&job_id).state, JobState::Failed);

    // Expiry touches the job; it is reaped once retention passes again.
    assert!(sweeper.sweep_once().is_empty());
    backdate(&harness, &job_id, 30);
    assert_eq!(sweeper.sweep_once().reaped, vec![job_id]);
}

#[test]
fn test_background_sweeper_reaps_on_trigger() {
    let harness = TestHarness::new(FakeReader::shop());
    let job_id = harness.start(&["Customers"], &["csv"]);
    harness.wait_for_state(&job_id, JobState::Done);
    backdate(&harness, &job_id, 25);

    let sweeper = sweeper(&harness);
    sweeper.start().unwrap();
    sweeper.sweep_now();
    wait_until("job reaped", || !harness.orchestrator.registry().contains(&job_id));
    sweeper.stop();
}
