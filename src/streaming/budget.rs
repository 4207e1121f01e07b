//! Allocated-memory tracking for streaming
//!
//! One atomic counter of bytes allocated across all streamable resources.
//! Resources report size changes from job threads, so the counter is
//! lock-free; the manager reads the live value for every budget decision,
//! never a cached snapshot. The budget itself is advisory: being over it
//! lowers target quality, it never blocks an allocation.

use std::sync::atomic::{AtomicI64, Ordering};

/// Atomic total of bytes allocated by streamable resources.
#[derive(Debug, Default)]
pub struct MemoryCounter {
    allocated: AtomicI64,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an allocation size change. Positive for growth, negative for
    /// release. Safe to call from job threads.
    pub fn register_delta(&self, bytes: i64) {
        self.allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current total of allocated bytes.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed).max(0) as u64
    }

    /// Whether the total is below `budget_bytes`.
    pub fn is_under(&self, budget_bytes: u64) -> bool {
        self.allocated_bytes() < budget_bytes
    }

    /// Budget pressure: allocated / budget. Above 1.0 means over budget.
    pub fn pressure(&self, budget_bytes: u64) -> f32 {
        if budget_bytes == 0 {
            return 0.0;
        }
        self.allocated_bytes() as f32 / budget_bytes as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_accumulation() {
        let counter = MemoryCounter::new();
        assert_eq!(counter.allocated_bytes(), 0);

        counter.register_delta(100);
        counter.register_delta(50);
        assert_eq!(counter.allocated_bytes(), 150);

        counter.register_delta(-150);
        assert_eq!(counter.allocated_bytes(), 0);
    }

    #[test]
    fn test_negative_clamps_to_zero() {
        let counter = MemoryCounter::new();
        counter.register_delta(-10);
        assert_eq!(counter.allocated_bytes(), 0);
        // The raw deficit is retained, so a matching add restores balance
        counter.register_delta(10);
        assert_eq!(counter.allocated_bytes(), 0);
    }

    #[test]
    fn test_budget_queries() {
        let counter = MemoryCounter::new();
        counter.register_delta(512);

        assert!(counter.is_under(1024));
        assert!(!counter.is_under(512));
        assert!((counter.pressure(1024) - 0.5).abs() < 1e-6);
        assert_eq!(counter.pressure(0), 0.0);
    }

    #[test]
    fn test_concurrent_deltas() {
        use std::sync::Arc;

        let counter = Arc::new(MemoryCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.register_delta(3);
                        counter.register_delta(-2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.allocated_bytes(), 8 * 1000);
    }
}
