//! Per-resource streaming options

use serde::{Deserialize, Serialize};

/// Immutable-by-value option bundle attached to a resource.
///
/// Option sets for the same resource merge with field-wise OR.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingOptions {
    /// Keep the resource at full quality regardless of recency or budget.
    pub keep_loaded: bool,
    /// Stream straight to the target residency without ramping.
    pub force_highest_quality: bool,
    /// Load the resource to full residency synchronously when applied.
    pub load_immediately: bool,
    /// Exclude the resource from streaming updates entirely.
    pub ignore_resource: bool,
}

impl StreamingOptions {
    /// Load the whole resource at once.
    pub const LOAD_AT_ONCE: Self = Self {
        keep_loaded: false,
        force_highest_quality: false,
        load_immediately: true,
        ignore_resource: false,
    };

    /// Load fully, then never stream again.
    pub const DO_NOT_STREAM: Self = Self {
        keep_loaded: false,
        force_highest_quality: false,
        load_immediately: true,
        ignore_resource: true,
    };

    /// Merge two option sets; every flag is the logical OR of both.
    pub fn combine(self, other: Self) -> Self {
        Self {
            keep_loaded: self.keep_loaded || other.keep_loaded,
            force_highest_quality: self.force_highest_quality || other.force_highest_quality,
            load_immediately: self.load_immediately || other.load_immediately,
            ignore_resource: self.ignore_resource || other.ignore_resource,
        }
    }
}
