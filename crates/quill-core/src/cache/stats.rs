use serde::{Deserialize, Serialize};

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries.
    pub size: usize,
    /// Estimated bytes held.
    pub memory_usage: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed by size pressure or expiry.
    pub evictions: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
}

impl CacheStats {
    pub(crate) fn rates(hits: u64, misses: u64) -> (f64, f64) {
        let lookups = hits + misses;
        if lookups == 0 {
            return (0.0, 0.0);
        }
        (hits as f64 / lookups as f64, misses as f64 / lookups as f64)
    }
}
