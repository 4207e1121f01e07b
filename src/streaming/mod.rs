//! Budget-driven adaptive streaming
//!
//! Key pieces:
//! - [`StreamingManager`]: per-frame control loop deciding residency targets
//! - [`StreamableResource`]: per-resource residency state machine and hooks
//! - [`StreamingTexture`]: mip-chain resource with double-buffered swap
//! - [`MemoryCounter`]: lock-free allocated-bytes tracking (soft budget)

pub mod budget;
pub mod config;
pub mod job;
pub mod manager;
pub mod options;
pub mod resource;
pub mod texture;

pub use budget::MemoryCounter;
pub use config::StreamingConfig;
pub use job::{CancelFlag, JobHandle, JobOutcome};
pub use manager::{StreamingManager, StreamingStats};
pub use options::StreamingOptions;
pub use resource::{ResourceId, StreamableResource, StreamingState};
pub use texture::StreamingTexture;
