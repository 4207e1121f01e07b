//! Streaming manager: registry, budget, and the per-tick control loop
//!
//! The host render loop calls [`StreamingManager::update`] once per frame.
//! Each tick walks a bounded slice of the registry round-robin, computes a
//! target quality per resource from budget and recency, and launches
//! background jobs for resources whose residency should change. Finished
//! jobs are merged on the calling thread at both ends of the tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::Result;

use super::budget::MemoryCounter;
use super::config::StreamingConfig;
use super::options::StreamingOptions;
use super::resource::{ResourceId, StreamableResource};

/// Snapshot of streaming activity, refreshed every tick.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct StreamingStats {
    /// Tick the snapshot belongs to
    pub tick: u64,
    /// Registered resources
    pub resource_count: usize,
    /// Jobs still running at the end of the tick
    pub active_count: usize,
    /// Jobs launched this tick
    pub jobs_started: u32,
    /// Job results merged this tick
    pub flushed: u32,
    /// Job results that surfaced an error this tick
    pub flush_failures: u32,
    /// Total allocated bytes across all resources
    pub allocated_bytes: u64,
}

/// Registry, active set, and scheduler bookkeeping. One logical unit under
/// one mutex.
struct ManagerState {
    /// Append-ordered list of live resources, walked round-robin
    registry: Vec<Arc<dyn StreamableResource>>,
    /// O(1) lookup by resource identity
    lookup: HashMap<ResourceId, Arc<dyn StreamableResource>>,
    /// Resources with a job currently outstanding
    active: Vec<Arc<dyn StreamableResource>>,
    /// Persistent round-robin position
    cursor: usize,
    /// Time accumulated since the last tick ran
    since_tick: Duration,
    /// Monotonic tick counter
    tick: u64,
    stats: StreamingStats,
}

/// The scheduler and owner of all streaming state.
pub struct StreamingManager {
    config: StreamingConfig,
    memory: Arc<MemoryCounter>,
    enabled: AtomicBool,
    state: Mutex<ManagerState>,
    /// Dedicated runtime whose blocking pool runs the streaming jobs
    runtime: tokio::runtime::Runtime,
}

impl StreamingManager {
    pub fn new(config: StreamingConfig) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("mipstream-job")
            .build()
            .expect("failed to create streaming runtime");
        let enabled = config.enabled;
        Self {
            config,
            memory: Arc::new(MemoryCounter::new()),
            enabled: AtomicBool::new(enabled),
            state: Mutex::new(ManagerState {
                registry: Vec::new(),
                lookup: HashMap::new(),
                active: Vec::new(),
                cursor: 0,
                since_tick: Duration::ZERO,
                tick: 0,
                stats: StreamingStats::default(),
            }),
            runtime,
        }
    }

    /// Shared allocated-bytes counter. Hand this to resources at creation
    /// so their size changes feed the budget decisions.
    pub fn memory(&self) -> Arc<MemoryCounter> {
        self.memory.clone()
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Current scheduler tick; pass to `StreamingState::mark_used` when the
    /// host consumes a resource.
    pub fn current_tick(&self) -> u64 {
        self.state.lock().unwrap().tick
    }

    /// Last tick's activity snapshot.
    pub fn stats(&self) -> StreamingStats {
        self.state.lock().unwrap().stats
    }

    pub fn resource_count(&self) -> usize {
        self.state.lock().unwrap().registry.len()
    }

    /// Add a resource to the registry. Registering the same identity twice
    /// is a programming error.
    pub fn register(&self, resource: Arc<dyn StreamableResource>) {
        let id = resource.streaming().id();
        let mut state = self.state.lock().unwrap();
        assert!(
            !state.lookup.contains_key(&id),
            "resource {id:?} registered twice"
        );
        state.registry.push(resource.clone());
        state.lookup.insert(id, resource);
        log::debug!("registered streaming resource {id:?}");
    }

    /// Remove a resource, cancel its job, and drop its residency to zero.
    /// Returns the resource if it was registered.
    pub fn unregister(&self, id: ResourceId) -> Option<Arc<dyn StreamableResource>> {
        let resource = {
            let mut state = self.state.lock().unwrap();
            let resource = state.lookup.remove(&id)?;
            state.registry.retain(|r| r.streaming().id() != id);
            state.active.retain(|r| r.streaming().id() != id);
            resource
        };
        if let Err(err) = resource.stop_job() {
            log::warn!("streaming job for {id:?} failed while unregistering: {err}");
        }
        resource.release();
        log::debug!("unregistered streaming resource {id:?}");
        Some(resource)
    }

    /// Look up a registered resource by identity.
    pub fn get(&self, id: ResourceId) -> Option<Arc<dyn StreamableResource>> {
        self.state.lock().unwrap().lookup.get(&id).cloned()
    }

    /// Replace or OR-merge a resource's streaming options. If the merged
    /// options request an immediate load, the resource is driven to full
    /// residency before this returns.
    pub fn set_streaming_options(
        &self,
        resource: &dyn StreamableResource,
        options: StreamingOptions,
        combine: bool,
    ) -> Result<()> {
        let merged = resource.streaming().set_options(options, combine);
        if merged.load_immediately {
            self.force_full_load(resource)?;
        }
        Ok(())
    }

    /// Synchronously drive one resource to full residency, ignoring the
    /// concurrency cap. Blocks until the result is merged.
    pub fn force_full_load(&self, resource: &dyn StreamableResource) -> Result<()> {
        resource.stop_job()?;
        let state = resource.streaming();
        let max = state.max_residency();
        if state.current() == max {
            return Ok(());
        }
        resource.start_job(self.runtime.handle(), max)?;
        resource.join_job()
    }

    /// Enable or disable streaming. Disabling cancels all running jobs and
    /// then loads every registered resource to full residency, so a
    /// disabled manager means "everything is fully loaded".
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let was = self.enabled.swap(enabled, Ordering::Relaxed);
        if was == enabled {
            return Ok(());
        }
        if enabled {
            log::info!("streaming enabled");
            return Ok(());
        }
        log::info!("streaming disabled, materializing all resources");
        let (active, all) = {
            let mut state = self.state.lock().unwrap();
            let active: Vec<_> = state.active.drain(..).collect();
            (active, state.registry.clone())
        };
        for resource in active {
            resource.stop_job()?;
        }
        for resource in all {
            self.force_full_load(resource.as_ref())?;
        }
        Ok(())
    }

    /// Scheduler tick. No-op until `update_interval` has accumulated since
    /// the previous tick, or while streaming is disabled.
    pub fn update(&self, elapsed: Duration) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.since_tick += elapsed;
        if state.since_tick < self.config.update_interval() {
            return;
        }
        state.since_tick = Duration::ZERO;
        state.tick += 1;
        let tick = state.tick;

        state.stats = StreamingStats {
            tick,
            resource_count: state.registry.len(),
            ..Default::default()
        };

        Self::drain_active(&mut state);

        let count = state.registry.len();
        if count != 0 {
            // Budget is advisory: over budget lowers quality for idle
            // resources, it never blocks recently-used ones.
            let is_under_budget = self.memory.is_under(self.config.target_budget_bytes());
            let timeout_ticks = self.config.live_timeout_ticks();
            let max_active = self.config.max_resources_per_update as usize;

            for _ in 0..count {
                if state.active.len() >= max_active {
                    break;
                }
                let index = state.cursor % count;
                state.cursor = (state.cursor + 1) % count;
                let resource = state.registry[index].clone();
                let streaming = resource.streaming();

                let options = streaming.options();
                if options.ignore_resource || !resource.can_be_updated() {
                    continue;
                }
                streaming.note_update(tick);

                let recently_used =
                    tick.saturating_sub(streaming.last_used_frame()) <= timeout_ticks;
                let quality = if is_under_budget || recently_used || options.keep_loaded {
                    1.0
                } else {
                    0.0
                };

                let target = resource.calculate_target_residency(quality);
                streaming.set_target(target, tick);
                if target == streaming.current() {
                    continue;
                }

                let requested = if options.force_highest_quality {
                    target
                } else {
                    resource.calculate_requested_residency(target)
                };
                match resource.start_job(self.runtime.handle(), requested) {
                    Ok(()) => {
                        log::debug!(
                            "streaming {:?}: {} -> {} (target {target})",
                            streaming.id(),
                            streaming.current(),
                            requested
                        );
                        state.stats.jobs_started += 1;
                        state.active.push(resource);
                    }
                    Err(err) => log::error!(
                        "failed to start streaming job for {:?}: {err}",
                        streaming.id()
                    ),
                }
            }
        }

        // Second drain so synchronously-completing jobs (zero-residency
        // release) land before the frame proceeds
        Self::drain_active(&mut state);

        state.stats.active_count = state.active.len();
        state.stats.allocated_bytes = self.memory.allocated_bytes();
    }

    /// Merge every finished job and drop its resource from the active set.
    fn drain_active(state: &mut ManagerState) {
        let drained: Vec<_> = state.active.drain(..).collect();
        for resource in drained {
            if resource.can_be_updated() {
                // Already flushed through a blocking path
                continue;
            }
            if !resource.streaming().has_finished_job() {
                state.active.push(resource);
                continue;
            }
            match resource.flush_sync() {
                Ok(()) => state.stats.flushed += 1,
                Err(err) => {
                    state.stats.flush_failures += 1;
                    log::error!(
                        "streaming flush failed for {:?}: {err}",
                        resource.streaming().id()
                    );
                }
            }
        }
    }
}

impl Drop for StreamingManager {
    fn drop(&mut self) {
        let resources: Vec<_> = {
            let mut state = self.state.lock().unwrap();
            state.active.clear();
            state.registry.clone()
        };
        for resource in resources {
            if let Err(err) = resource.stop_job() {
                log::warn!(
                    "streaming job for {:?} failed during shutdown: {err}",
                    resource.streaming().id()
                );
            }
        }
    }
}
