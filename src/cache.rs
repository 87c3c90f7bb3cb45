//! LRU cache of Gram-matrix rows for the in-process kernel solver
//!
//! The Gauss-Seidel sweeps revisit the same rows every iteration, so caching
//! whole rows bounds the memory spent on kernel values without recomputing
//! them per sweep.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// LRU cache mapping an example index to its full Gram-matrix row
pub struct GramCache {
    rows: LruCache<usize, Arc<Vec<f64>>>,
    hits: u64,
    misses: u64,
}

impl GramCache {
    /// Create a cache holding at most `capacity` rows
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        Self {
            rows: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Size the cache from a memory budget in bytes, given the row width
    pub fn with_memory_limit(memory_bytes: usize, row_len: usize) -> Self {
        let row_bytes = row_len.max(1) * std::mem::size_of::<f64>();
        Self::new((memory_bytes / row_bytes).max(1))
    }

    /// Fetch the row for example `i`, computing and caching it on a miss
    pub fn row<F>(&mut self, i: usize, compute: F) -> Arc<Vec<f64>>
    where
        F: FnOnce(usize) -> Vec<f64>,
    {
        if let Some(row) = self.rows.get(&i) {
            self.hits += 1;
            return Arc::clone(row);
        }
        self.misses += 1;
        let row = Arc::new(compute(i));
        self.rows.put(i, Arc::clone(&row));
        row
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_computed_once() {
        let mut cache = GramCache::new(4);
        let mut calls = 0;
        for _ in 0..3 {
            let row = cache.row(0, |_| {
                calls += 1;
                vec![1.0, 2.0]
            });
            assert_eq!(*row, vec![1.0, 2.0]);
        }
        assert_eq!(calls, 1);
        assert!(cache.hit_rate() > 0.5);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = GramCache::new(2);
        cache.row(0, |_| vec![0.0]);
        cache.row(1, |_| vec![1.0]);
        cache.row(2, |_| vec![2.0]); // evicts row 0

        let mut recomputed = false;
        cache.row(0, |_| {
            recomputed = true;
            vec![0.0]
        });
        assert!(recomputed);
    }

    #[test]
    fn test_memory_limit_sizing() {
        let cache = GramCache::with_memory_limit(1024, 16);
        assert_eq!(cache.rows.cap().get(), 8);
    }
}
