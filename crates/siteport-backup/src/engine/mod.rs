//! Asynchronous export and import jobs.
//!
//! [`JobEngine::start`] validates the request, records a `starting` status
//! and hands the pipeline to the tokio blocking pool. The pipeline reports
//! progress through [`Checkpoint`]s; each one also observes cancellation,
//! so a cancel request takes effect at the next checkpoint rather than
//! interrupting a statement or file copy in flight.
//!
//! Cancel flags live in the engine's memory. A status record read back
//! from a [`FileStatusStore`] by another process can be polled but not
//! cancelled from there.

mod export;
mod hooks;
mod import;
mod job;
mod status_store;

pub use hooks::{JobHook, NoOpHook, PipelineStep, StepContext, TracingHook};
pub use job::{
    ExportResult, ImportSummary, JobKind, JobRequest, JobResult, JobState, JobStatus,
};
pub use status_store::{is_valid_job_id, FileStatusStore, MemoryStatusStore, StatusStore};

use crate::context::SiteContext;
use crate::error::{Error, Result};
use crate::options::{ExportOptions, ImportOptions};
use crate::progress::Checkpoint;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Message-only status changes are written at most this often
const PERSIST_INTERVAL: Duration = Duration::from_millis(250);

/// Running jobs never report more than this; 100 means completed
const MAX_RUNNING_PROGRESS: u8 = 99;

/// Runs export and import jobs against one site
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    context: Arc<SiteContext>,
    status_store: Arc<dyn StatusStore>,
    hooks: Vec<Arc<dyn JobHook>>,
    status_ttl: Duration,
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl EngineInner {
    fn flags(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.cancel_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, status: JobStatus, request: JobRequest, cancel: Arc<AtomicBool>) {
        let mut run = JobRun::new(self, status, cancel);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(&mut run, request)))
            .unwrap_or_else(|payload| {
                Err(Error::fatal(format!(
                    "Job panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        run.finish(outcome);
    }
}

/// Builder for [`JobEngine`]
pub struct JobEngineBuilder {
    context: Arc<SiteContext>,
    status_store: Option<Arc<dyn StatusStore>>,
    hooks: Vec<Arc<dyn JobHook>>,
    status_ttl: Option<Duration>,
}

impl JobEngineBuilder {
    pub fn new(context: Arc<SiteContext>) -> Self {
        Self {
            context,
            status_store: None,
            hooks: Vec::new(),
            status_ttl: None,
        }
    }

    /// Appends a hook; hooks run in the order they were added
    pub fn with_hook(mut self, hook: impl JobHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn with_shared_hook(mut self, hook: Arc<dyn JobHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Defaults to a [`MemoryStatusStore`]
    pub fn with_status_store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.status_store = Some(store);
        self
    }

    /// Defaults to `jobs.status_ttl_secs` from the configuration
    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = Some(ttl);
        self
    }

    pub fn build(self) -> JobEngine {
        let status_ttl = self
            .status_ttl
            .unwrap_or_else(|| self.context.config().status_ttl());
        let status_store = self
            .status_store
            .unwrap_or_else(|| Arc::new(MemoryStatusStore::new()));
        JobEngine {
            inner: Arc::new(EngineInner {
                context: self.context,
                status_store,
                hooks: self.hooks,
                status_ttl,
                cancel_flags: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl JobEngine {
    pub fn builder(context: Arc<SiteContext>) -> JobEngineBuilder {
        JobEngineBuilder::new(context)
    }

    /// Engine with an in-memory status store and no hooks
    pub fn new(context: Arc<SiteContext>) -> Self {
        Self::builder(context).build()
    }

    pub fn context(&self) -> &SiteContext {
        &self.inner.context
    }

    pub fn status_ttl(&self) -> Duration {
        self.inner.status_ttl
    }

    /// Validates `request`, records it as `starting` and schedules it.
    ///
    /// Returns the job id without waiting for any work. Invalid options and
    /// unusable archives fail here instead of inside the job. Must be called
    /// from within a tokio runtime.
    pub fn start(&self, request: JobRequest) -> Result<String> {
        self.validate(&request)?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::fatal("Jobs must be started from within a tokio runtime"))?;

        let kind = request.kind();
        let id = format!("{}_{}", kind.as_str(), Uuid::new_v4().simple());
        let status = JobStatus::new(&id, kind);
        self.inner.status_store.put(&status, self.inner.status_ttl)?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.inner.flags().insert(id.clone(), Arc::clone(&cancel));

        info!("Started {} job {}", kind, id);
        let inner = Arc::clone(&self.inner);
        handle.spawn_blocking(move || inner.run(status, request, cancel));
        Ok(id)
    }

    pub fn start_export(&self, options: ExportOptions) -> Result<String> {
        self.start(JobRequest::Export(options))
    }

    pub fn start_import(
        &self,
        archive: impl Into<PathBuf>,
        options: ImportOptions,
    ) -> Result<String> {
        self.start(JobRequest::Import {
            archive: archive.into(),
            options,
        })
    }

    fn validate(&self, request: &JobRequest) -> Result<()> {
        match request {
            JobRequest::Export(options) => options.validate(),
            JobRequest::Import { archive, options } => {
                options.validate()?;
                let reader = self.inner.context.library().validate_archive_file(archive)?;
                debug!(
                    "Archive {} from {} accepted",
                    archive.display(),
                    reader.manifest().origin_base_url
                );
                Ok(())
            }
        }
    }

    /// Latest snapshot of a job, `None` once unknown or expired
    pub fn status(&self, id: &str) -> Result<Option<JobStatus>> {
        self.inner.status_store.get(id)
    }

    /// Requests cooperative cancellation.
    ///
    /// Returns false when the job is unknown, already terminal, not
    /// cancellable or already asked to cancel. The status record is left
    /// untouched; the job moves to `cancelled` at its next checkpoint.
    pub fn cancel(&self, id: &str) -> bool {
        let status = match self.inner.status_store.get(id) {
            Ok(Some(status)) => status,
            Ok(None) => return false,
            Err(e) => {
                warn!("Cannot read status of job {}: {}", id, e);
                return false;
            }
        };
        if status.is_terminal() || !status.cancellable {
            return false;
        }

        let Some(flag) = self.inner.flags().get(id).cloned() else {
            return false;
        };
        if flag.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!("Cancellation requested for job {}", id);
        true
    }

    /// Polls until the job is terminal or its record is gone
    pub async fn wait(&self, id: &str, poll_interval: Duration) -> Result<Option<JobStatus>> {
        loop {
            match self.status(id)? {
                Some(status) if !status.is_terminal() => tokio::time::sleep(poll_interval).await,
                other => return Ok(other),
            }
        }
    }

    /// Drops expired status records
    pub fn purge_expired(&self) -> Result<usize> {
        self.inner.status_store.purge_expired()
    }
}

fn execute(run: &mut JobRun<'_>, request: JobRequest) -> Result<JobResult> {
    match request {
        JobRequest::Export(options) => {
            run.checkpoint(5, "Starting export...")?;
            export::run_export(run, &options).map(JobResult::Export)
        }
        JobRequest::Import { archive, options } => {
            run.checkpoint(5, "Starting import...")?;
            import::run_import(run, &archive, &options).map(JobResult::Import)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// State of one executing job, owned by its worker thread
pub(crate) struct JobRun<'a> {
    engine: &'a EngineInner,
    status: JobStatus,
    cancel: Arc<AtomicBool>,
    last_persist: Instant,
}

impl<'a> JobRun<'a> {
    fn new(engine: &'a EngineInner, status: JobStatus, cancel: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            status,
            cancel,
            last_persist: Instant::now(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.status.id
    }

    pub(crate) fn context(&self) -> Arc<SiteContext> {
        Arc::clone(&self.engine.context)
    }

    /// Observes cancellation, then records progress.
    ///
    /// Progress only moves forward and stays below 100 until completion.
    pub(crate) fn checkpoint(&mut self, percent: u8, message: &str) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let percent = percent.min(MAX_RUNNING_PROGRESS);
        let first = self.status.status == JobState::Starting;
        let advanced = percent > self.status.progress;
        if first {
            self.status.status = JobState::Running;
        }
        if advanced {
            self.status.progress = percent;
        }
        self.status.message = message.to_string();

        if first || advanced || self.last_persist.elapsed() >= PERSIST_INTERVAL {
            self.persist()?;
        }
        Ok(())
    }

    /// Runs `f` as a named step, surrounded by the registered hooks
    pub(crate) fn step<T>(
        &mut self,
        step: PipelineStep,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let engine = self.engine;
        let ctx = StepContext {
            job_id: self.status.id.clone(),
            kind: self.status.kind,
            step,
        };

        for hook in &engine.hooks {
            hook.before_step(&ctx)
                .map_err(|e| Error::fatal(format!("Hook failed before {}: {:#}", step, e)))?;
        }
        debug!("Job {} running step {}", ctx.job_id, step);

        let value = f(self)?;

        for hook in &engine.hooks {
            hook.after_step(&ctx)
                .map_err(|e| Error::fatal(format!("Hook failed after {}: {:#}", step, e)))?;
        }
        Ok(value)
    }

    fn persist(&mut self) -> Result<()> {
        self.status.updated_at = chrono::Utc::now();
        self.engine
            .status_store
            .put(&self.status, self.engine.status_ttl)?;
        self.last_persist = Instant::now();
        Ok(())
    }

    fn finish(mut self, outcome: Result<JobResult>) {
        match outcome {
            Ok(result) => {
                self.status.status = JobState::Completed;
                self.status.progress = 100;
                self.status.message = match self.status.kind {
                    JobKind::Export => "Export completed successfully".to_string(),
                    JobKind::Import => "Import completed successfully".to_string(),
                };
                self.status.result = Some(result);
                info!("Job {} completed", self.status.id);
            }
            Err(Error::Cancelled) => {
                self.status.status = JobState::Cancelled;
                self.status.message = "Cancelled by user".to_string();
                info!("Job {} cancelled", self.status.id);
            }
            Err(e) => {
                self.status.status = JobState::Error;
                self.status.message = e.to_string();
                self.status.error_kind = Some(e.kind());
                error!("Job {} failed: {}", self.status.id, e);
            }
        }
        self.status.cancellable = false;

        self.engine.flags().remove(&self.status.id);
        if let Err(e) = self.persist() {
            warn!("Failed to record final status of job {}: {}", self.status.id, e);
        }
        for hook in &self.engine.hooks {
            hook.on_finish(&self.status);
        }
    }
}

impl Checkpoint for JobRun<'_> {
    fn reached(&mut self, percent: u8, detail: &str) -> Result<()> {
        self.checkpoint(percent, detail)
    }
}
