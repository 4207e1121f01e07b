//! Streamable resource contract and shared bookkeeping

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::core::Result;

use super::job::{JobHandle, JobOutcome};
use super::options::StreamingOptions;

/// Unique identity of a streamable resource, used as the registry key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Allocate a fresh id. Never returns the same id twice in a process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Shared streaming bookkeeping embedded in every resource kind.
///
/// Residency quantities are atomics: the control loop reads them every tick
/// while job threads update `allocated` when reserving memory. Invariants:
/// `0 <= current <= allocated <= max` and `0 <= target <= max`.
pub struct StreamingState {
    id: ResourceId,
    max_residency: u32,
    current: AtomicU32,
    allocated: AtomicU32,
    target: AtomicU32,
    /// Tick the resource was last used by the host (rendered, sampled, ...).
    last_used_frame: AtomicU64,
    /// Tick the manager last considered this resource.
    last_update_tick: AtomicU64,
    /// Tick the stored target last changed. Diagnostics only, never gating.
    target_changed_tick: AtomicU64,
    options: Mutex<StreamingOptions>,
    job: Mutex<Option<JobHandle>>,
}

impl StreamingState {
    pub fn new(max_residency: u32) -> Self {
        Self {
            id: ResourceId::next(),
            max_residency,
            current: AtomicU32::new(0),
            allocated: AtomicU32::new(0),
            target: AtomicU32::new(0),
            last_used_frame: AtomicU64::new(0),
            last_update_tick: AtomicU64::new(0),
            target_changed_tick: AtomicU64::new(0),
            options: Mutex::new(StreamingOptions::default()),
            job: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Residency representing full quality. Immutable per resource.
    pub fn max_residency(&self) -> u32 {
        self.max_residency
    }

    /// Increments uploaded and usable right now.
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    /// Increments with memory reserved (>= current during a pending grow).
    pub fn allocated(&self) -> u32 {
        self.allocated.load(Ordering::Acquire)
    }

    /// Residency the scheduler wants this resource to reach.
    pub fn target(&self) -> u32 {
        self.target.load(Ordering::Acquire)
    }

    pub(crate) fn set_current(&self, value: u32) {
        debug_assert!(value <= self.max_residency);
        self.current.store(value, Ordering::Release);
    }

    pub(crate) fn set_allocated(&self, value: u32) {
        debug_assert!(value <= self.max_residency);
        self.allocated.store(value, Ordering::Release);
    }

    /// Store a new target, timestamping the change for diagnostics.
    pub fn set_target(&self, value: u32, tick: u64) {
        debug_assert!(value <= self.max_residency);
        if self.target.swap(value, Ordering::AcqRel) != value {
            self.target_changed_tick.store(tick, Ordering::Relaxed);
        }
    }

    /// Mark the resource as used on the given tick. Called by the host
    /// whenever the resource is actually consumed.
    pub fn mark_used(&self, tick: u64) {
        self.last_used_frame.store(tick, Ordering::Relaxed);
    }

    pub fn last_used_frame(&self) -> u64 {
        self.last_used_frame.load(Ordering::Relaxed)
    }

    pub(crate) fn note_update(&self, tick: u64) {
        self.last_update_tick.store(tick, Ordering::Relaxed);
    }

    pub fn last_update_tick(&self) -> u64 {
        self.last_update_tick.load(Ordering::Relaxed)
    }

    pub fn target_changed_tick(&self) -> u64 {
        self.target_changed_tick.load(Ordering::Relaxed)
    }

    /// Current option set for this resource.
    pub fn options(&self) -> StreamingOptions {
        *self.options.lock().unwrap()
    }

    /// Replace or OR-merge the option set.
    pub fn set_options(&self, options: StreamingOptions, combine: bool) -> StreamingOptions {
        let mut slot = self.options.lock().unwrap();
        *slot = if combine {
            slot.combine(options)
        } else {
            options
        };
        *slot
    }

    /// Install a freshly started job. Starting a job while another is
    /// outstanding is a programming error.
    pub(crate) fn install_job(&self, job: JobHandle) {
        let mut slot = self.job.lock().unwrap();
        assert!(
            slot.is_none(),
            "resource {:?} already has a streaming job outstanding",
            self.id
        );
        *slot = Some(job);
    }

    /// Whether the resource is eligible for a new job. False while a job is
    /// running and while a finished job awaits its flush.
    pub(crate) fn job_slot_empty(&self) -> bool {
        self.job.lock().unwrap().is_none()
    }

    /// Whether an outstanding job has produced its result.
    pub(crate) fn has_finished_job(&self) -> bool {
        self.job
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|job| job.is_finished())
    }

    /// Take the job only if it already finished; joining is then instant.
    pub(crate) fn take_finished_job(&self) -> Option<Result<JobOutcome>> {
        let job = {
            let mut slot = self.job.lock().unwrap();
            match slot.as_ref() {
                Some(job) if job.is_finished() => slot.take(),
                _ => None,
            }
        };
        job.map(JobHandle::join)
    }

    /// Signal cancellation and block until the job returns.
    pub(crate) fn cancel_and_join_job(&self) -> Option<Result<JobOutcome>> {
        let job = self.job.lock().unwrap().take()?;
        job.cancel();
        Some(job.join())
    }

    /// Block until the job returns, without cancelling it.
    pub(crate) fn join_job(&self) -> Option<Result<JobOutcome>> {
        let job = self.job.lock().unwrap().take()?;
        Some(job.join())
    }
}

/// One streamable asset instance.
///
/// Concrete resource kinds supply the residency policy and the job body;
/// the manager drives them exclusively through this trait. All methods that
/// merge job results (`flush_sync`, `stop_job`, `join_job`, `release`) must
/// only be called from the manager's single-threaded context.
pub trait StreamableResource: Send + Sync {
    /// Shared residency and job bookkeeping.
    fn streaming(&self) -> &StreamingState;

    /// Map a continuous quality scalar in `[0, 1]` to a residency level.
    /// Monotonic non-decreasing; returns 0 only for quality 0.
    fn calculate_target_residency(&self, quality: f32) -> u32;

    /// Residency to actually stream toward this tick given a desired
    /// target. Growth may ramp in steps; shrinking drops directly.
    fn calculate_requested_residency(&self, target: u32) -> u32;

    /// Launch a background job toward `requested` residency on `runtime`.
    /// Must only be called when no job is outstanding.
    fn start_job(&self, runtime: &tokio::runtime::Handle, requested: u32) -> Result<()>;

    /// Merge a finished job's result into the live resource. No-op if no
    /// job has finished.
    fn flush_sync(&self) -> Result<()>;

    /// Request cancellation of the outstanding job and block until it has
    /// stopped. A cancelled outcome is success; real failures propagate.
    fn stop_job(&self) -> Result<()>;

    /// Block until the outstanding job finishes, then merge its result.
    fn join_job(&self) -> Result<()>;

    /// Force residency to zero and drop all owned objects.
    fn release(&self);

    /// True iff no job is outstanding (running or awaiting flush).
    fn can_be_updated(&self) -> bool {
        self.streaming().job_slot_empty()
    }
}
