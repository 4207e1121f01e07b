//! Mipstream - adaptive texture streaming engine
//!
//! Decides, every update tick, how much of each mip-mapped texture should be
//! resident in memory, issues background jobs to load or evict the
//! difference, and merges the results back on the caller's thread without
//! stalling it.

pub mod content;
pub mod core;
pub mod gpu;
pub mod streaming;
