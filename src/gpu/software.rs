//! CPU-backed texture device
//!
//! Stores mip data in plain memory. Used by headless hosts and the test
//! suite; the streaming engine itself is agnostic to the backing device.

use std::mem;

use crate::core::{Error, Result};

use super::{GpuDevice, GpuTexture, TextureDescription};

/// Device that allocates textures in host memory.
#[derive(Default)]
pub struct SoftwareDevice;

impl SoftwareDevice {
    pub fn new() -> Self {
        Self
    }
}

impl GpuDevice for SoftwareDevice {
    type Texture = SoftwareTexture;

    fn create_texture(&self, desc: &TextureDescription) -> Result<Self::Texture> {
        let mips = (0..desc.mip_count)
            .map(|m| vec![0u8; desc.mip_size_bytes(m)])
            .collect();
        Ok(SoftwareTexture {
            desc: desc.clone(),
            mips,
        })
    }
}

/// Host-memory texture: one buffer per mip, allocated at creation.
pub struct SoftwareTexture {
    desc: TextureDescription,
    mips: Vec<Vec<u8>>,
}

impl SoftwareTexture {
    /// Texel data for one mip.
    pub fn mip_data(&self, mip: u32) -> Option<&[u8]> {
        self.mips.get(mip as usize).map(|v| v.as_slice())
    }
}

impl GpuTexture for SoftwareTexture {
    fn description(&self) -> &TextureDescription {
        &self.desc
    }

    fn upload_mip(&mut self, mip: u32, data: &[u8]) -> Result<()> {
        if mip >= self.desc.mip_count {
            return Err(Error::Gpu(format!(
                "mip {mip} out of range (texture has {})",
                self.desc.mip_count
            )));
        }
        let expected = self.desc.mip_size_bytes(mip);
        if data.len() != expected {
            return Err(Error::Gpu(format!(
                "mip {mip} upload of {} bytes, expected {expected}",
                data.len()
            )));
        }
        self.mips[mip as usize].copy_from_slice(data);
        Ok(())
    }

    fn swap_contents(&mut self, other: &mut Self) {
        mem::swap(&mut self.desc, &mut other.desc);
        mem::swap(&mut self.mips, &mut other.mips);
    }

    fn size_in_bytes(&self) -> usize {
        self.desc.total_size_bytes()
    }
}
