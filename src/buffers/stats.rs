//! Buffer pool statistics tracking

use serde::{Deserialize, Serialize};

/// Lifecycle counters of one buffer pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Allocate operations that reached the pool
    pub allocate_calls: u64,
    /// Allocate operations rejected because the pool was not Empty
    pub busy_rejections: u64,
    /// Buffers that received physical memory
    pub buffers_allocated: u64,
    /// Buffers whose allocation failed in-band
    pub buffer_failures: u64,
    /// Descriptor tables that could not be established
    pub table_failures: u64,
    /// Release operations that returned an Allocated pool to Empty
    pub releases: u64,
    /// Release operations on an already Empty pool
    pub empty_releases: u64,
    /// Calls issued to the physical free primitive
    pub frees_issued: u64,
    /// Free calls that reported an error
    pub free_failures: u64,
    /// Bytes currently pinned by the pool, descriptor table included
    pub bytes_in_use: usize,
}

impl PoolStats {
    /// Create new statistics instance
    pub fn new() -> Self {
        Default::default()
    }

    /// Fraction of buffer allocation attempts that succeeded (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let attempts = self.buffers_allocated + self.buffer_failures;
        if attempts == 0 {
            return 1.0;
        }
        self.buffers_allocated as f64 / attempts as f64
    }

    /// Whether every successful allocation has been paired with a clean free
    pub fn is_balanced(&self) -> bool {
        self.bytes_in_use == 0 && self.free_failures == 0
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "PoolStats {{ allocates: {}, busy: {}, buffers: {}, failures: {}, table_failures: {}, \
             releases: {}, frees: {}, free_failures: {}, in_use: {} bytes, success_rate: {:.2}% }}",
            self.allocate_calls,
            self.busy_rejections,
            self.buffers_allocated,
            self.buffer_failures,
            self.table_failures,
            self.releases,
            self.frees_issued,
            self.free_failures,
            self.bytes_in_use,
            self.success_rate() * 100.0
        )
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let mut stats = PoolStats::new();
        assert_eq!(stats.success_rate(), 1.0);

        stats.buffers_allocated = 3;
        stats.buffer_failures = 1;
        assert_eq!(stats.success_rate(), 0.75);
        assert!(stats.summary().contains("75.00%"));

        stats.reset();
        assert_eq!(stats, PoolStats::default());
    }
}
