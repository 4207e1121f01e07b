//! Content storage collaborators for streaming
//!
//! A streamable asset's payload lives in an ordered table of chunks (one per
//! mip level for textures). Chunk bytes are fetched lazily through a
//! [`FileProvider`], which is the blocking-I/O seam; streaming jobs run on
//! background threads, so providers may block.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::{Error, Result};

/// Source of raw content bytes.
///
/// Implementations may block; chunk fetches only happen from streaming job
/// threads or explicit blocking calls.
pub trait FileProvider: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    fn read(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

/// File-backed provider reading chunks from a single content file.
pub struct DiskProvider {
    path: PathBuf,
}

impl DiskProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl FileProvider for DiskProvider {
    fn read(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// In-memory provider for content that is already resident.
pub struct MemoryProvider {
    data: Arc<[u8]>,
}

impl MemoryProvider {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl FileProvider for MemoryProvider {
    fn read(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of content")
            })?;
        Ok(self.data[start..end].to_vec())
    }
}

/// One chunk of content: a byte range plus a lazily-populated cache of its
/// data.
#[derive(Debug)]
pub struct Chunk {
    offset: u64,
    size: u32,
    data: Option<Arc<[u8]>>,
}

impl Chunk {
    pub fn new(offset: u64, size: u32) -> Self {
        Self {
            offset,
            size,
            data: None,
        }
    }

    /// Size of the chunk in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether the chunk's bytes are already cached in memory.
    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Get the chunk bytes, fetching them through `provider` on first use.
    ///
    /// A short read from the provider is a hard error for the requesting
    /// job; partial chunks are never cached.
    pub fn get_data(&mut self, index: u32, provider: &dyn FileProvider) -> Result<Arc<[u8]>> {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }
        let bytes = provider.read(self.offset, self.size as usize)?;
        if bytes.len() != self.size as usize {
            return Err(Error::ChunkSizeMismatch {
                index,
                expected: self.size,
                actual: bytes.len(),
            });
        }
        let data: Arc<[u8]> = bytes.into();
        self.data = Some(data.clone());
        Ok(data)
    }

    /// Drop the cached bytes, keeping the range metadata.
    pub fn unload(&mut self) {
        self.data = None;
    }
}

/// Ordered chunk table for one asset, guarded against concurrent mutation.
///
/// Streaming jobs take the chunk lock for the whole duration of a pass so
/// nothing reshapes the table while byte offsets are being resolved.
pub struct ContentStorage {
    chunks: Mutex<Vec<Chunk>>,
}

impl ContentStorage {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: Mutex::new(chunks),
        }
    }

    /// Build a storage table for chunks laid out back to back, given only
    /// their sizes.
    pub fn contiguous(sizes: &[u32]) -> Self {
        let mut offset = 0u64;
        let chunks = sizes
            .iter()
            .map(|&size| {
                let chunk = Chunk::new(offset, size);
                offset += size as u64;
                chunk
            })
            .collect();
        Self::new(chunks)
    }

    /// Number of chunks in the table.
    pub fn chunk_count(&self) -> u32 {
        self.chunks.lock().unwrap().len() as u32
    }

    /// Lock the chunk table for exclusive access during a streaming pass.
    pub fn lock_chunks(&self) -> ChunkLock<'_> {
        ChunkLock {
            guard: self.chunks.lock().unwrap(),
        }
    }
}

/// Exclusive access to a [`ContentStorage`] chunk table.
///
/// Unlocks on drop.
pub struct ChunkLock<'a> {
    guard: MutexGuard<'a, Vec<Chunk>>,
}

impl ChunkLock<'_> {
    pub fn len(&self) -> u32 {
        self.guard.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    /// Get a chunk by index; a missing chunk is a hard error for the job.
    pub fn chunk_mut(&mut self, index: u32) -> Result<&mut Chunk> {
        let count = self.guard.len() as u32;
        self.guard
            .get_mut(index as usize)
            .ok_or(Error::MissingChunk { index, count })
    }
}
