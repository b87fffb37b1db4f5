//! Test harness for isolated orchestrator instances.
//!
//! Each `TestHarness` owns a temporary data directory, an `Orchestrator`
//! wired to a `FakeReader`, and a broadcaster whose events can be collected.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::sync::broadcast;

use mdbconv::config::Settings;
use mdbconv::export::EncoderRegistry;
use mdbconv::job::{ConversionRequest, JobSnapshot, JobState};
use mdbconv::pipeline::BroadcastProgress;
use mdbconv::{JobProgressBroadcaster, JobProgressEvent, Orchestrator};

use super::builders::FakeReader;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestHarness {
    /// Temporary directory holding uploads/ and exports/.
    temp_dir: TempDir,
    pub orchestrator: Arc<Orchestrator>,
    pub reader: Arc<FakeReader>,
    pub broadcaster: JobProgressBroadcaster,
}

impl TestHarness {
    pub fn new(reader: FakeReader) -> Self {
        Self::with_settings(reader, |_| {})
    }

    /// Harness with settings adjusted by `configure` (data dirs are fixed).
    pub fn with_settings(reader: FakeReader, configure: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut settings = Settings::default().with_data_dir(temp_dir.path());
        configure(&mut settings);

        let reader = Arc::new(reader);
        let broadcaster = JobProgressBroadcaster::new(1024);
        let orchestrator = Arc::new(Orchestrator::new(
            settings,
            reader.clone(),
            EncoderRegistry::new(),
            Arc::new(BroadcastProgress::new(broadcaster.clone())),
        ));

        Self {
            temp_dir,
            orchestrator,
            reader,
            broadcaster,
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.orchestrator.uploads().upload_dir().to_path_buf()
    }

    pub fn export_dir(&self) -> PathBuf {
        self.orchestrator.exports().export_dir().to_path_buf()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    /// Uploads a small fake database and returns its job id.
    pub fn upload(&self, filename: &str) -> String {
        self.orchestrator
            .register_upload(filename, Cursor::new(b"Standard Jet DB".to_vec()))
            .expect("upload rejected")
            .job_id
    }

    /// Uploads, lists tables and starts a conversion.
    pub fn start(&self, tables: &[&str], formats: &[&str]) -> String {
        let job_id = self.upload("shop.mdb");
        self.orchestrator
            .list_tables(&job_id)
            .expect("table listing failed");
        self.orchestrator
            .start_conversion(
                &job_id,
                &ConversionRequest::new(tables.iter().copied(), formats.iter().copied()),
            )
            .expect("conversion rejected");
        job_id
    }

    pub fn status(&self, job_id: &str) -> JobSnapshot {
        self.orchestrator.status(job_id).expect("unknown job")
    }

    pub fn wait_for_terminal(&self, job_id: &str) -> JobSnapshot {
        self.wait_for(job_id, |s| s.state.is_terminal())
    }

    pub fn wait_for_state(&self, job_id: &str, state: JobState) -> JobSnapshot {
        self.wait_for(job_id, |s| s.state == state)
    }

    /// Polls the job's status until `condition` holds.
    pub fn wait_for(&self, job_id: &str, condition: impl Fn(&JobSnapshot) -> bool) -> JobSnapshot {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let snapshot = self.status(job_id);
            if condition(&snapshot) {
                return snapshot;
            }
            assert!(
                Instant::now() < deadline,
                "job {} stuck in {} ({:?})",
                job_id,
                snapshot.state,
                snapshot.phase
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Files in the job's export directory, sorted.
    pub fn exported_files(&self, job_id: &str) -> Vec<String> {
        let dir = self.orchestrator.exports().job_dir(job_id);
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.orchestrator.shutdown();
    }
}

/// Polls `condition` until it holds or the wait times out.
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Names of the entries inside a ZIP archive, sorted.
pub fn archive_entries(path: &std::path::Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("archive missing");
    let mut archive = zip::ZipArchive::new(file).expect("invalid archive");
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).expect("entry").name().to_string())
        .collect();
    names.sort();
    names
}
