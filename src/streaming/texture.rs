//! Streaming texture resource
//!
//! Residency counts mip levels, lowest-resolution first: residency `r`
//! means the `r` smallest mips of the chain are resident. A load job fetches
//! the chunk range for the requested tail of the chain, builds a brand-new
//! texture object off-thread, and stages it; the control thread later swaps
//! the staged contents into the live object in place so every external
//! reference to the live object stays valid.

use std::sync::{Arc, Mutex};

use crate::content::{ContentStorage, FileProvider};
use crate::core::Result;
use crate::gpu::{GpuDevice, GpuTexture, TextureDescription};

use super::budget::MemoryCounter;
use super::job::{CancelFlag, JobHandle, JobOutcome};
use super::resource::{StreamableResource, StreamingState};

/// Completed-but-unmerged result of a streaming job.
struct Staged<T> {
    /// New texture for the requested mip range; `None` for a full release.
    texture: Option<T>,
    residency: u32,
    size_bytes: usize,
}

/// Mip-streamed texture over chunked content.
pub struct StreamingTexture<D: GpuDevice> {
    desc: TextureDescription,
    device: Arc<D>,
    storage: Arc<ContentStorage>,
    provider: Arc<dyn FileProvider>,
    memory: Arc<MemoryCounter>,
    /// Identity-stable live object; external references hold this Arc.
    live: Arc<Mutex<Option<D::Texture>>>,
    staged: Arc<Mutex<Option<Staged<D::Texture>>>>,
    state: Arc<StreamingState>,
}

impl<D: GpuDevice> StreamingTexture<D> {
    /// Create an unloaded streaming texture. `desc` describes the full
    /// chain; `storage` holds one chunk per mip, largest first.
    pub fn new(
        desc: TextureDescription,
        device: Arc<D>,
        storage: Arc<ContentStorage>,
        provider: Arc<dyn FileProvider>,
        memory: Arc<MemoryCounter>,
    ) -> Self {
        debug_assert_eq!(
            storage.chunk_count(),
            desc.mip_count,
            "one content chunk per mip level"
        );
        let state = Arc::new(StreamingState::new(desc.mip_count));
        Self {
            desc,
            device,
            storage,
            provider,
            memory,
            live: Arc::new(Mutex::new(None)),
            staged: Arc::new(Mutex::new(None)),
            state,
        }
    }

    /// Full-chain description of the texture.
    pub fn descriptor(&self) -> &TextureDescription {
        &self.desc
    }

    /// Shared handle to the live texture object. Contents change across
    /// flushes; the handle itself never does.
    pub fn live_texture(&self) -> Arc<Mutex<Option<D::Texture>>> {
        self.live.clone()
    }

    /// Merge or discard a joined job result.
    fn complete(&self, joined: Result<JobOutcome>) -> Result<()> {
        match joined {
            Ok(JobOutcome::Completed) => {
                self.merge_staged();
                Ok(())
            }
            Ok(JobOutcome::Cancelled) => {
                self.discard_staged();
                Ok(())
            }
            Err(err) => {
                self.discard_staged();
                Err(err)
            }
        }
    }

    /// Swap the staged result into the live object. Control thread only.
    fn merge_staged(&self) {
        let Some(staged) = self.staged.lock().unwrap().take() else {
            return;
        };
        let mut live = self.live.lock().unwrap();
        let old_size = live.as_ref().map(|t| t.size_in_bytes()).unwrap_or(0);
        match staged.texture {
            Some(mut fresh) => match live.as_mut() {
                Some(existing) => {
                    existing.swap_contents(&mut fresh);
                    // `fresh` now holds the previous contents
                    drop(fresh);
                }
                None => *live = Some(fresh),
            },
            None => *live = None,
        }
        drop(live);
        if old_size != 0 {
            self.memory.register_delta(-(old_size as i64));
        }
        self.state.set_current(staged.residency);
        self.state.set_allocated(staged.residency);
        log::debug!(
            "texture {:?} now resident at {}/{} mips",
            self.state.id(),
            staged.residency,
            self.state.max_residency()
        );
    }

    /// Throw away a staged result from a cancelled or failed job.
    fn discard_staged(&self) {
        if let Some(staged) = self.staged.lock().unwrap().take() {
            if staged.size_bytes != 0 {
                self.memory.register_delta(-(staged.size_bytes as i64));
            }
        }
        self.state.set_allocated(self.state.current());
    }
}

impl<D: GpuDevice> StreamableResource for StreamingTexture<D> {
    fn streaming(&self) -> &StreamingState {
        &self.state
    }

    fn calculate_target_residency(&self, quality: f32) -> u32 {
        if quality <= 0.0 {
            return 0;
        }
        let max = self.state.max_residency();
        let mut residency = ((max as f32 * quality).round() as u32).max(1);
        // Block formats cannot represent fewer than 3 usable mips without
        // falling below the 4x4 texel alignment floor.
        if self.desc.format.is_block_compressed() && max >= 3 {
            residency = residency.max(3);
        }
        residency.min(max)
    }

    fn calculate_requested_residency(&self, target: u32) -> u32 {
        let current = self.state.current();
        if target > current {
            // Jump up to 5 mips at once, then grow 2 per tick; bounds the
            // per-tick upload bandwidth while small loads finish in one step.
            (current + 2).max(5).min(target)
        } else {
            // Eviction is cheap, drop straight to the target
            target
        }
    }

    fn start_job(&self, runtime: &tokio::runtime::Handle, requested: u32) -> Result<()> {
        assert!(
            self.state.job_slot_empty(),
            "texture {:?} already has a streaming job outstanding",
            self.state.id()
        );
        debug_assert!(requested <= self.state.max_residency());

        if requested == 0 {
            // Nothing to fetch; stage the release and finish on this thread
            *self.staged.lock().unwrap() = Some(Staged {
                texture: None,
                residency: 0,
                size_bytes: 0,
            });
            self.state
                .install_job(JobHandle::ready(Ok(JobOutcome::Completed)));
            return Ok(());
        }

        let cancel = CancelFlag::new();
        let job = LoadJob {
            desc: self.desc.clone(),
            device: self.device.clone(),
            storage: self.storage.clone(),
            provider: self.provider.clone(),
            memory: self.memory.clone(),
            staged: self.staged.clone(),
            state: self.state.clone(),
            cancel: cancel.clone(),
            requested,
        };
        let handle = runtime.spawn_blocking(move || job.run());
        self.state
            .install_job(JobHandle::task(cancel, runtime.clone(), handle));
        Ok(())
    }

    fn flush_sync(&self) -> Result<()> {
        match self.state.take_finished_job() {
            Some(joined) => self.complete(joined),
            None => Ok(()),
        }
    }

    fn stop_job(&self) -> Result<()> {
        match self.state.cancel_and_join_job() {
            Some(joined) => self.complete(joined),
            None => Ok(()),
        }
    }

    fn join_job(&self) -> Result<()> {
        match self.state.join_job() {
            Some(joined) => self.complete(joined),
            None => Ok(()),
        }
    }

    fn release(&self) {
        if let Some(Err(err)) = self.state.cancel_and_join_job() {
            log::warn!(
                "streaming job for texture {:?} failed during release: {err}",
                self.state.id()
            );
        }
        if let Some(staged) = self.staged.lock().unwrap().take() {
            if staged.size_bytes != 0 {
                self.memory.register_delta(-(staged.size_bytes as i64));
            }
        }
        if let Some(existing) = self.live.lock().unwrap().take() {
            self.memory.register_delta(-(existing.size_in_bytes() as i64));
        }
        self.state.set_current(0);
        self.state.set_allocated(0);
        self.state.set_target(0, self.state.last_update_tick());
    }
}

impl<D: GpuDevice> Drop for StreamingTexture<D> {
    fn drop(&mut self) {
        // Destruction must return all counted bytes; release is idempotent
        self.release();
    }
}

/// Owned context for one background load. Runs on the blocking pool.
struct LoadJob<D: GpuDevice> {
    desc: TextureDescription,
    device: Arc<D>,
    storage: Arc<ContentStorage>,
    provider: Arc<dyn FileProvider>,
    memory: Arc<MemoryCounter>,
    staged: Arc<Mutex<Option<Staged<D::Texture>>>>,
    state: Arc<StreamingState>,
    cancel: CancelFlag,
    requested: u32,
}

impl<D: GpuDevice> LoadJob<D> {
    fn run(self) -> Result<JobOutcome> {
        if self.cancel.is_set() {
            return Ok(JobOutcome::Cancelled);
        }

        let max = self.desc.mip_count;
        let first_mip = max - self.requested;
        let mut mip_data = Vec::with_capacity(self.requested as usize);
        {
            // Hold the chunk lock for the whole pass
            let mut chunks = self.storage.lock_chunks();
            for mip in first_mip..max {
                if self.cancel.is_set() {
                    return Ok(JobOutcome::Cancelled);
                }
                let chunk = chunks.chunk_mut(mip)?;
                mip_data.push(chunk.get_data(mip, self.provider.as_ref())?);
            }
        }

        if self.cancel.is_set() {
            return Ok(JobOutcome::Cancelled);
        }

        let mut texture = self.device.create_texture(&self.desc.tail(self.requested))?;
        for (mip, data) in mip_data.iter().enumerate() {
            texture.upload_mip(mip as u32, data)?;
        }

        let size_bytes = texture.size_in_bytes();
        self.memory.register_delta(size_bytes as i64);
        self.state
            .set_allocated(self.state.current().max(self.requested));
        *self.staged.lock().unwrap() = Some(Staged {
            texture: Some(texture),
            residency: self.requested,
            size_bytes,
        });
        Ok(JobOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryProvider;
    use crate::gpu::{PixelFormat, SoftwareDevice};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap()
    }

    /// 16x16 R8 texture with 5 mips: 256 + 64 + 16 + 4 + 1 bytes.
    fn test_texture(format: PixelFormat) -> (StreamingTexture<SoftwareDevice>, Arc<MemoryCounter>) {
        let desc = TextureDescription::new(16, 16, format, 5);
        let sizes: Vec<u32> = (0..5).map(|m| desc.mip_size_bytes(m) as u32).collect();
        let total: usize = sizes.iter().map(|&s| s as usize).sum();
        let content: Vec<u8> = (0..total).map(|i| i as u8).collect();
        let memory = Arc::new(MemoryCounter::new());
        let texture = StreamingTexture::new(
            desc,
            Arc::new(SoftwareDevice::new()),
            Arc::new(ContentStorage::contiguous(&sizes)),
            Arc::new(MemoryProvider::new(content)),
            memory.clone(),
        );
        (texture, memory)
    }

    #[test]
    fn test_target_residency_mapping() {
        let (texture, _) = test_texture(PixelFormat::R8);
        assert_eq!(texture.calculate_target_residency(0.0), 0);
        assert_eq!(texture.calculate_target_residency(0.05), 1);
        assert_eq!(texture.calculate_target_residency(0.5), 3);
        assert_eq!(texture.calculate_target_residency(1.0), 5);
    }

    #[test]
    fn test_target_residency_monotonic() {
        let (texture, _) = test_texture(PixelFormat::Bc1);
        let mut last = 0;
        for step in 0..=100 {
            let quality = step as f32 / 100.0;
            let residency = texture.calculate_target_residency(quality);
            assert!(residency >= last, "not monotonic at quality {quality}");
            last = residency;
        }
    }

    #[test]
    fn test_compressed_floor() {
        // 10-mip BC1 chain: quality 0.1 would map to 1, floor raises it to 3
        let desc = TextureDescription::new(512, 512, PixelFormat::Bc1, 10);
        let sizes: Vec<u32> = (0..10).map(|m| desc.mip_size_bytes(m) as u32).collect();
        let texture = StreamingTexture::new(
            desc,
            Arc::new(SoftwareDevice::new()),
            Arc::new(ContentStorage::contiguous(&sizes)),
            Arc::new(MemoryProvider::new(vec![0u8; 1])),
            Arc::new(MemoryCounter::new()),
        );
        assert_eq!(texture.calculate_target_residency(0.1), 3);
        assert_eq!(texture.calculate_target_residency(0.0), 0);
        assert_eq!(texture.calculate_target_residency(1.0), 10);
    }

    #[test]
    fn test_growth_stepping() {
        let desc = TextureDescription::new(1 << 19, 1, PixelFormat::R8, 20);
        let sizes: Vec<u32> = (0..20).map(|m| desc.mip_size_bytes(m) as u32).collect();
        let texture = StreamingTexture::new(
            desc,
            Arc::new(SoftwareDevice::new()),
            Arc::new(ContentStorage::contiguous(&sizes)),
            Arc::new(MemoryProvider::new(vec![0u8; 1])),
            Arc::new(MemoryCounter::new()),
        );

        // From zero: immediate jump to 5
        assert_eq!(texture.calculate_requested_residency(20), 5);
        texture.state.set_current(5);
        texture.state.set_allocated(5);
        // Then 2 per tick
        assert_eq!(texture.calculate_requested_residency(20), 7);
        // Shrinking drops directly
        assert_eq!(texture.calculate_requested_residency(1), 1);
    }

    #[test]
    fn test_load_job_round_trip() {
        let rt = runtime();
        let (texture, memory) = test_texture(PixelFormat::R8);

        texture.start_job(rt.handle(), 3).unwrap();
        assert!(!texture.can_be_updated());
        texture.join_job().unwrap();
        assert!(texture.can_be_updated());

        assert_eq!(texture.streaming().current(), 3);
        assert_eq!(texture.streaming().allocated(), 3);
        // Tail of 3 mips: 16 + 4 + 1 bytes
        assert_eq!(memory.allocated_bytes(), 21);

        // The smallest mip is the last content byte (341 total, offset 340)
        let live = texture.live_texture();
        let guard = live.lock().unwrap();
        let tex = guard.as_ref().unwrap();
        assert_eq!(tex.description().mip_count, 3);
        assert_eq!(tex.mip_data(2).unwrap(), &[(341 - 1) as u8]);
    }

    #[test]
    fn test_grow_preserves_live_identity() {
        let rt = runtime();
        let (texture, memory) = test_texture(PixelFormat::R8);
        let live = texture.live_texture();

        texture.start_job(rt.handle(), 2).unwrap();
        texture.join_job().unwrap();
        let live_again = texture.live_texture();
        assert!(Arc::ptr_eq(&live, &live_again));

        texture.start_job(rt.handle(), 5).unwrap();
        texture.join_job().unwrap();

        assert_eq!(texture.streaming().current(), 5);
        // Only the full chain remains counted
        assert_eq!(memory.allocated_bytes(), 341);
        assert_eq!(
            live.lock().unwrap().as_ref().unwrap().description().mip_count,
            5
        );
    }

    #[test]
    fn test_release_to_zero_is_synchronous() {
        let rt = runtime();
        let (texture, memory) = test_texture(PixelFormat::R8);

        texture.start_job(rt.handle(), 5).unwrap();
        texture.join_job().unwrap();
        assert_eq!(memory.allocated_bytes(), 341);

        texture.start_job(rt.handle(), 0).unwrap();
        // The zero-residency job completes without leaving this thread
        assert!(texture.streaming().has_finished_job());
        texture.flush_sync().unwrap();

        assert_eq!(texture.streaming().current(), 0);
        assert_eq!(texture.streaming().allocated(), 0);
        assert_eq!(memory.allocated_bytes(), 0);
        assert!(texture.live_texture().lock().unwrap().is_none());
    }

    #[test]
    fn test_stop_job_swallows_cancellation() {
        let rt = runtime();
        let (texture, memory) = test_texture(PixelFormat::R8);

        texture.start_job(rt.handle(), 5).unwrap();
        // Cancel immediately; whichever way the race goes, stop_job succeeds
        texture.stop_job().unwrap();
        assert!(texture.can_be_updated());

        let current = texture.streaming().current();
        assert!(current == 0 || current == 5);
        let expected = if current == 5 { 341 } else { 0 };
        assert_eq!(memory.allocated_bytes(), expected);
    }

    #[test]
    fn test_release_returns_all_memory() {
        let rt = runtime();
        let (texture, memory) = test_texture(PixelFormat::R8);

        texture.start_job(rt.handle(), 5).unwrap();
        texture.join_job().unwrap();
        texture.release();

        assert_eq!(memory.allocated_bytes(), 0);
        assert_eq!(texture.streaming().current(), 0);
        assert_eq!(texture.streaming().allocated(), 0);
        assert_eq!(texture.streaming().target(), 0);
    }

    #[test]
    fn test_failed_job_surfaces_at_flush() {
        let rt = runtime();
        // Storage claims 5 chunks but the provider holds only 1 byte, so
        // any multi-byte chunk read comes up short
        let desc = TextureDescription::new(16, 16, PixelFormat::R8, 5);
        let sizes: Vec<u32> = (0..5).map(|m| desc.mip_size_bytes(m) as u32).collect();
        let memory = Arc::new(MemoryCounter::new());
        let texture = StreamingTexture::new(
            desc,
            Arc::new(SoftwareDevice::new()),
            Arc::new(ContentStorage::contiguous(&sizes)),
            Arc::new(MemoryProvider::new(vec![0u8; 1])),
            memory.clone(),
        );

        texture.start_job(rt.handle(), 5).unwrap();
        assert!(texture.join_job().is_err());
        // Failure leaves the resource idle at its previous residency
        assert!(texture.can_be_updated());
        assert_eq!(texture.streaming().current(), 0);
        assert_eq!(memory.allocated_bytes(), 0);
    }
}
