//! Error types for the streaming engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing chunk {index} (storage has {count})")]
    MissingChunk { index: u32, count: u32 },

    #[error("chunk {index} size mismatch: expected {expected} bytes, got {actual}")]
    ChunkSizeMismatch {
        index: u32,
        expected: u32,
        actual: usize,
    },

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("streaming job panicked: {0}")]
    JobPanicked(String),
}

/// Standard Result type for the engine
pub type Result<T> = std::result::Result<T, Error>;
