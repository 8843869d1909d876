//! Checkpoints reported by long-running pipeline steps.
//!
//! Every component that loops over tables, statements or files takes a
//! `&mut dyn Checkpoint` and calls it between units of work. The job
//! engine's implementation records progress and observes cancellation
//! there; returning `Err` aborts the step.

use crate::error::Result;

/// A point where progress is recorded and cancellation is observed
pub trait Checkpoint {
    /// Report that work has reached `percent` (0-100 of the current scope)
    fn reached(&mut self, percent: u8, detail: &str) -> Result<()>;
}

/// Checkpoint that ignores everything, for callers outside a job
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCheckpoint;

impl Checkpoint for NoCheckpoint {
    fn reached(&mut self, _percent: u8, _detail: &str) -> Result<()> {
        Ok(())
    }
}

/// Maps a sub-step's 0-100 range into `[start, end]` of its parent
pub struct Scaled<'a> {
    inner: &'a mut dyn Checkpoint,
    start: u8,
    end: u8,
}

impl<'a> Scaled<'a> {
    pub fn new(inner: &'a mut dyn Checkpoint, start: u8, end: u8) -> Self {
        let start = start.min(100);
        Self {
            inner,
            start,
            end: end.clamp(start, 100),
        }
    }

    fn map(&self, percent: u8) -> u8 {
        let span = (self.end - self.start) as u32;
        self.start + (span * percent.min(100) as u32 / 100) as u8
    }
}

impl Checkpoint for Scaled<'_> {
    fn reached(&mut self, percent: u8, detail: &str) -> Result<()> {
        let mapped = self.map(percent);
        self.inner.reached(mapped, detail)
    }
}

/// Percentage of `done` out of `total`, 100 when there is nothing to do
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}
