//! GPU resource abstraction
//!
//! The streaming engine never talks to a graphics API directly; it creates,
//! populates, and swaps texture objects through the [`GpuDevice`] and
//! [`GpuTexture`] traits. Dispose is `Drop`.

pub mod software;

pub use software::{SoftwareDevice, SoftwareTexture};

use serde::{Deserialize, Serialize};

use crate::core::Result;

/// Pixel format of a texture's mip chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgba8,
    Rgba16F,
    /// BC1 block compression (8 bytes per 4x4 block)
    Bc1,
    /// BC3 block compression (16 bytes per 4x4 block)
    Bc3,
    /// BC7 block compression (16 bytes per 4x4 block)
    Bc7,
}

impl PixelFormat {
    /// Whether this format stores texels in 4x4 compressed blocks.
    pub fn is_block_compressed(&self) -> bool {
        matches!(self, Self::Bc1 | Self::Bc3 | Self::Bc7)
    }

    /// Bytes needed for one mip of the given dimensions.
    pub fn bytes_for_mip(&self, width: u32, height: u32) -> usize {
        match self {
            Self::R8 => width as usize * height as usize,
            Self::Rg8 => width as usize * height as usize * 2,
            Self::Rgba8 => width as usize * height as usize * 4,
            Self::Rgba16F => width as usize * height as usize * 8,
            Self::Bc1 => Self::block_count(width, height) * 8,
            Self::Bc3 | Self::Bc7 => Self::block_count(width, height) * 16,
        }
    }

    fn block_count(width: u32, height: u32) -> usize {
        let bw = width.div_ceil(4) as usize;
        let bh = height.div_ceil(4) as usize;
        bw * bh
    }
}

/// Shape of a texture object: top-mip dimensions, format, and mip count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureDescription {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mip_count: u32,
}

impl TextureDescription {
    pub fn new(width: u32, height: u32, format: PixelFormat, mip_count: u32) -> Self {
        debug_assert!(mip_count > 0, "texture needs at least one mip");
        Self {
            width,
            height,
            format,
            mip_count,
        }
    }

    /// Dimensions of mip level `mip` (0 = largest).
    pub fn mip_dimensions(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    /// Bytes needed for mip level `mip`.
    pub fn mip_size_bytes(&self, mip: u32) -> usize {
        let (w, h) = self.mip_dimensions(mip);
        self.format.bytes_for_mip(w, h)
    }

    /// Total bytes for the whole mip chain.
    pub fn total_size_bytes(&self) -> usize {
        (0..self.mip_count).map(|m| self.mip_size_bytes(m)).sum()
    }

    /// Description of the sub-chain holding only the lowest `mips` levels.
    ///
    /// The result's mip 0 is this chain's mip `mip_count - mips`.
    pub fn tail(&self, mips: u32) -> TextureDescription {
        debug_assert!(mips > 0 && mips <= self.mip_count);
        let skip = self.mip_count - mips;
        let (w, h) = self.mip_dimensions(skip);
        TextureDescription {
            width: w,
            height: h,
            format: self.format,
            mip_count: mips,
        }
    }
}

/// An owned texture object.
///
/// Objects are populated off the control thread by streaming jobs, then
/// their contents are swapped into the live object in place so external
/// references to the live object stay valid.
pub trait GpuTexture: Send {
    /// The shape this object was created with.
    fn description(&self) -> &TextureDescription;

    /// Upload one mip's texel data. `mip` is relative to this object's own
    /// chain (0 = its largest mip).
    fn upload_mip(&mut self, mip: u32, data: &[u8]) -> Result<()>;

    /// Exchange the entire contents (storage and shape) of two objects
    /// without changing either object's identity.
    fn swap_contents(&mut self, other: &mut Self);

    /// Bytes of memory backing this object.
    fn size_in_bytes(&self) -> usize;
}

/// Factory for texture objects.
pub trait GpuDevice: Send + Sync + 'static {
    type Texture: GpuTexture + 'static;

    /// Allocate a texture sized for `desc`. Memory is reserved up front;
    /// mips are populated afterwards with [`GpuTexture::upload_mip`].
    fn create_texture(&self, desc: &TextureDescription) -> Result<Self::Texture>;
}
