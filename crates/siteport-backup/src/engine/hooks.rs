//! Pre- and post-step callbacks registered on the job engine.
//!
//! Hooks run on the job's own thread, in registration order, around every
//! [`PipelineStep`]. An error returned from `before_step` or `after_step`
//! aborts the job with a fatal error.

use super::job::{JobKind, JobStatus};
use crate::category::ContentCategory;
use std::fmt;

/// Named stages of the export and import pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    /// Pre-import archive of the destination site
    Rollback,
    Dump,
    Pack(ContentCategory),
    Finalize,
    Extract,
    Verify,
    Replay,
    Restore(ContentCategory),
    Cleanup,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rollback => f.write_str("rollback"),
            Self::Dump => f.write_str("dump"),
            Self::Pack(category) => write!(f, "pack-{}", category),
            Self::Finalize => f.write_str("finalize"),
            Self::Extract => f.write_str("extract"),
            Self::Verify => f.write_str("verify"),
            Self::Replay => f.write_str("replay"),
            Self::Restore(category) => write!(f, "restore-{}", category),
            Self::Cleanup => f.write_str("cleanup"),
        }
    }
}

/// What a hook is told about the step being run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    pub job_id: String,
    pub kind: JobKind,
    pub step: PipelineStep,
}

/// Callbacks invoked around pipeline steps
pub trait JobHook: Send + Sync {
    /// Called before a step starts
    fn before_step(&self, ctx: &StepContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called after a step finished successfully
    fn after_step(&self, ctx: &StepContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called once with the terminal status of the job
    fn on_finish(&self, status: &JobStatus) {
        let _ = status;
    }
}

/// A hook that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHook;

impl JobHook for NoOpHook {}

/// A hook that logs step boundaries using the `tracing` crate
///
/// # Log Levels
///
/// - `before_step`: DEBUG
/// - `after_step`: DEBUG
/// - `on_finish`: INFO, or WARN when the job did not complete
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

impl JobHook for TracingHook {
    fn before_step(&self, ctx: &StepContext) -> anyhow::Result<()> {
        tracing::debug!(job = %ctx.job_id, kind = %ctx.kind, step = %ctx.step, "step starting");
        Ok(())
    }

    fn after_step(&self, ctx: &StepContext) -> anyhow::Result<()> {
        tracing::debug!(job = %ctx.job_id, kind = %ctx.kind, step = %ctx.step, "step finished");
        Ok(())
    }

    fn on_finish(&self, status: &JobStatus) {
        if status.status == super::job::JobState::Completed {
            tracing::info!(job = %status.id, kind = %status.kind, "job completed");
        } else {
            tracing::warn!(
                job = %status.id,
                kind = %status.kind,
                status = %status.status,
                message = %status.message,
                "job did not complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names() {
        assert_eq!(PipelineStep::Dump.to_string(), "dump");
        assert_eq!(
            PipelineStep::Pack(ContentCategory::Uploads).to_string(),
            "pack-uploads"
        );
        assert_eq!(
            PipelineStep::Restore(ContentCategory::Plugins).to_string(),
            "restore-plugins"
        );
    }

    #[test]
    fn test_default_hook_methods_succeed() {
        let ctx = StepContext {
            job_id: "export_1".to_string(),
            kind: JobKind::Export,
            step: PipelineStep::Dump,
        };
        assert!(NoOpHook.before_step(&ctx).is_ok());
        assert!(NoOpHook.after_step(&ctx).is_ok());
        assert!(TracingHook.before_step(&ctx).is_ok());
    }
}
