//! Background streaming jobs
//!
//! A job moves one resource from its current residency toward a requested
//! one. Jobs run on the manager's tokio runtime via `spawn_blocking` (job
//! bodies do blocking storage I/O) and are cancelled cooperatively: the
//! resource sets a shared flag, the job observes it at chunk boundaries and
//! returns [`JobOutcome::Cancelled`]. Cancellation is not a failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::{Error, Result};

/// How a job finished. Distinct from job failure, which is an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran to completion and staged its result.
    Completed,
    /// The job observed the cancellation flag and aborted early.
    Cancelled,
}

/// Cooperative cancellation flag shared between a resource and its job.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Checked by the job at suspension points.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

enum JobKind {
    /// Work running on the runtime's blocking pool.
    Task {
        handle: tokio::task::JoinHandle<Result<JobOutcome>>,
        runtime: tokio::runtime::Handle,
    },
    /// Work that completed synchronously (zero-residency release).
    Ready(Result<JobOutcome>),
}

/// Handle to one outstanding job. A resource owns at most one at a time.
pub struct JobHandle {
    cancel: CancelFlag,
    kind: JobKind,
}

impl JobHandle {
    /// Wrap a task spawned on `runtime`'s blocking pool.
    pub fn task(
        cancel: CancelFlag,
        runtime: tokio::runtime::Handle,
        handle: tokio::task::JoinHandle<Result<JobOutcome>>,
    ) -> Self {
        Self {
            cancel,
            kind: JobKind::Task { handle, runtime },
        }
    }

    /// Wrap work that already finished on the calling thread.
    pub fn ready(outcome: Result<JobOutcome>) -> Self {
        Self {
            cancel: CancelFlag::new(),
            kind: JobKind::Ready(outcome),
        }
    }

    /// Whether the job has produced its result.
    pub fn is_finished(&self) -> bool {
        match &self.kind {
            JobKind::Task { handle, .. } => handle.is_finished(),
            JobKind::Ready(_) => true,
        }
    }

    /// Request cooperative cancellation. The job keeps running until it
    /// observes the flag; use [`JobHandle::join`] to wait for it.
    pub fn cancel(&self) {
        self.cancel.set();
    }

    /// Block until the job returns and yield its outcome.
    ///
    /// A panicking job surfaces as [`Error::JobPanicked`].
    pub fn join(self) -> Result<JobOutcome> {
        match self.kind {
            JobKind::Task { handle, runtime } => match runtime.block_on(handle) {
                Ok(result) => result,
                Err(join_err) => Err(Error::JobPanicked(join_err.to_string())),
            },
            JobKind::Ready(outcome) => outcome,
        }
    }
}
