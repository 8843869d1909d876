//! Job engine integration tests
//!
//! Tests the lifecycle of background jobs:
//! - Cooperative cancellation while a job is running
//! - Progress monotonicity as seen by the status store
//! - Status record expiry
//! - Hook failures and the file-backed status store

mod common;

use common::*;
use siteport_backup::{
    ContentCategory, ErrorKind, ExportOptions, FileStatusStore, JobEngine, JobHook, JobState,
    JobStatus, MemoryStatusStore, PipelineStep, StatusStore, StepContext,
};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Blocks the job at the start of one step until released
struct Gate {
    step: PipelineStep,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl Gate {
    fn new(step: PipelineStep) -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        let gate = Self {
            step,
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (gate, entered_rx, release_tx)
    }
}

impl JobHook for Gate {
    fn before_step(&self, ctx: &StepContext) -> anyhow::Result<()> {
        if ctx.step == self.step {
            self.entered.lock().unwrap().send(()).ok();
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(10))
                .ok();
        }
        Ok(())
    }
}

/// Fails before one step
struct Tripwire(PipelineStep);

impl JobHook for Tripwire {
    fn before_step(&self, ctx: &StepContext) -> anyhow::Result<()> {
        if ctx.step == self.0 {
            anyhow::bail!("tripwire hit at {}", ctx.step);
        }
        Ok(())
    }
}

/// Records every status written by the engine
#[derive(Default)]
struct RecordingStore {
    inner: MemoryStatusStore,
    puts: Mutex<Vec<JobStatus>>,
}

impl StatusStore for RecordingStore {
    fn put(&self, status: &JobStatus, ttl: Duration) -> siteport_backup::Result<()> {
        self.puts.lock().unwrap().push(status.clone());
        self.inner.put(status, ttl)
    }

    fn get(&self, id: &str) -> siteport_backup::Result<Option<JobStatus>> {
        self.inner.get(id)
    }

    fn remove(&self, id: &str) -> siteport_backup::Result<bool> {
        self.inner.remove(id)
    }

    fn purge_expired(&self) -> siteport_backup::Result<usize> {
        self.inner.purge_expired()
    }
}

#[tokio::test]
async fn test_cancel_running_export() {
    let site = TestSite::origin();
    let (gate, entered, release) = Gate::new(PipelineStep::Dump);
    let engine = JobEngine::builder(Arc::clone(&site.context))
        .with_hook(gate)
        .build();

    let id = engine.start_export(ExportOptions::default()).unwrap();
    entered.recv_timeout(Duration::from_secs(10)).unwrap();

    let running = engine.status(&id).unwrap().unwrap();
    assert_eq!(running.status, JobState::Running);
    assert!(running.cancellable);

    assert!(engine.cancel(&id));
    let after_cancel = engine.status(&id).unwrap().unwrap();
    assert_eq!(after_cancel.status, JobState::Running);
    assert!(!engine.cancel(&id));

    release.send(()).unwrap();
    let status = wait_terminal(&engine, &id).await;
    assert_eq!(status.status, JobState::Cancelled);
    assert!(!status.cancellable);
    assert!(status.result.is_none());
    assert!(status.progress < 100);

    assert!(site.context.library().list_archives().unwrap().is_empty());
    let leftovers = std::fs::read_dir(site.archive_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_cancel_finished_job_is_rejected() {
    let site = TestSite::origin();
    let engine = site.engine();

    let id = engine.start_export(ExportOptions::database_only()).unwrap();
    let done = wait_terminal(&engine, &id).await;
    assert_eq!(done.status, JobState::Completed);

    assert!(!engine.cancel(&id));
    assert_eq!(engine.status(&id).unwrap().unwrap(), done);
}

#[tokio::test]
async fn test_cancel_unknown_job() {
    let site = TestSite::destination();
    assert!(!site.engine().cancel("export_doesnotexist"));
    assert!(site.engine().status("export_doesnotexist").unwrap().is_none());
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let site = TestSite::origin();
    site.seed_themes();
    let store = Arc::new(RecordingStore::default());
    let engine = JobEngine::builder(Arc::clone(&site.context))
        .with_status_store(store.clone())
        .build();

    let id = engine.start_export(ExportOptions::default()).unwrap();
    let status = wait_terminal(&engine, &id).await;
    assert_eq!(status.status, JobState::Completed, "{}", status.message);

    let puts = store.puts.lock().unwrap();
    assert!(puts.len() >= 3);
    assert_eq!(puts[0].status, JobState::Starting);
    assert_eq!(puts[0].progress, 0);

    for pair in puts.windows(2) {
        assert!(
            pair[1].progress >= pair[0].progress,
            "progress went from {} to {}",
            pair[0].progress,
            pair[1].progress
        );
    }
    for put in puts.iter().filter(|p| !p.status.is_terminal()) {
        assert!(put.progress <= 99);
        assert!(put.cancellable);
    }

    let last = puts.last().unwrap();
    assert_eq!(last.status, JobState::Completed);
    assert_eq!(last.progress, 100);
    assert_eq!(puts.iter().filter(|p| p.status.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_status_expires_after_ttl() {
    let site = TestSite::origin();
    let engine = JobEngine::builder(Arc::clone(&site.context))
        .with_status_ttl(Duration::from_secs(1))
        .build();

    let id = engine.start_export(ExportOptions::database_only()).unwrap();
    let status = wait_terminal(&engine, &id).await;
    assert_eq!(status.status, JobState::Completed);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(engine.status(&id).unwrap().is_none());
    assert!(!engine.cancel(&id));
}

#[tokio::test]
async fn test_failing_hook_aborts_job() {
    let site = TestSite::origin();
    let engine = JobEngine::builder(Arc::clone(&site.context))
        .with_hook(Tripwire(PipelineStep::Pack(ContentCategory::Uploads)))
        .build();

    let id = engine.start_export(ExportOptions::default()).unwrap();
    let status = wait_terminal(&engine, &id).await;

    assert_eq!(status.status, JobState::Error);
    assert_eq!(status.error_kind, Some(ErrorKind::Fatal));
    assert!(status.message.contains("tripwire hit at pack-uploads"), "{}", status.message);
    assert!(site.context.library().list_archives().unwrap().is_empty());
}

#[tokio::test]
async fn test_file_status_store_backend() {
    let site = TestSite::origin();
    let jobs_dir = site.root().join("jobs");
    let store = Arc::new(FileStatusStore::new(&jobs_dir).unwrap());
    let engine = JobEngine::builder(Arc::clone(&site.context))
        .with_status_store(store)
        .build();

    let id = engine.start_export(ExportOptions::database_only()).unwrap();
    let status = wait_terminal(&engine, &id).await;
    assert_eq!(status.status, JobState::Completed, "{}", status.message);

    // A second store over the same directory sees the record
    let reopened = FileStatusStore::new(&jobs_dir).unwrap();
    let seen = reopened.get(&id).unwrap().unwrap();
    assert_eq!(seen.status, JobState::Completed);
    assert_eq!(seen.progress, 100);
    assert!(jobs_dir.join(format!("{}.json", id)).is_file());
}

#[tokio::test]
async fn test_job_ids_are_unique() {
    let site = TestSite::origin();
    let engine = site.engine();

    let first = engine.start_export(ExportOptions::database_only()).unwrap();
    let second = engine.start_export(ExportOptions::database_only()).unwrap();
    assert_ne!(first, second);

    for id in [first, second] {
        let status = wait_terminal(&engine, &id).await;
        assert_eq!(status.status, JobState::Completed, "{}", status.message);
    }
    assert_eq!(site.context.library().list_archives().unwrap().len(), 2);
}
