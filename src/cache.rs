//! Lock-free block cache shared by concurrent raster window reads
//!
//! Extraction workers of one layer read overlapping windows from the same
//! source file, so decoded TIFF blocks are cached by block index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;

/// Default number of decoded blocks kept per source
pub const DEFAULT_CACHE_BLOCKS: usize = 256;

/// Approximate-LRU cache of decoded, little-endian blocks
#[derive(Clone)]
pub struct BlockCache {
    blocks: Arc<DashMap<usize, Arc<Vec<u8>>>>,
    recency: Arc<SegQueue<usize>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    max_blocks: usize,
}

impl BlockCache {
    /// Creates a cache holding at most `max_blocks` decoded blocks
    pub fn new(max_blocks: usize) -> Self {
        Self {
            blocks: Arc::new(DashMap::new()),
            recency: Arc::new(SegQueue::new()),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            max_blocks: max_blocks.max(1),
        }
    }

    /// Looks up a decoded block
    pub fn get(&self, block: usize) -> Option<Arc<Vec<u8>>> {
        match self.blocks.get(&block) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.recency.push(block);
                Some(Arc::clone(entry.value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a decoded block, evicting the oldest entries when full
    pub fn insert(&self, block: usize, data: Vec<u8>) -> Arc<Vec<u8>> {
        let data = Arc::new(data);

        while self.blocks.len() >= self.max_blocks {
            match self.recency.pop() {
                Some(old) if old != block => {
                    self.blocks.remove(&old);
                }
                Some(_) => continue,
                None => break,
            }
        }

        self.blocks.insert(block, Arc::clone(&data));
        self.recency.push(block);
        data
    }

    /// Returns the cached block or decodes and caches it
    pub fn get_or_try_insert<E>(
        &self,
        block: usize,
        decode: impl FnOnce() -> std::result::Result<Vec<u8>, E>,
    ) -> std::result::Result<Arc<Vec<u8>>, E> {
        if let Some(data) = self.get(block) {
            return Ok(data);
        }
        Ok(self.insert(block, decode()?))
    }

    pub fn clear(&self) {
        self.blocks.clear();
        while self.recency.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            block_count: self.blocks.len(),
            total_bytes: self.blocks.iter().map(|entry| entry.value().len()).sum(),
            max_blocks: self.max_blocks,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BLOCKS)
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub block_count: usize,
    pub total_bytes: usize,
    pub max_blocks: usize,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = BlockCache::new(2);
        cache.insert(0, vec![1, 2, 3]);

        assert_eq!(cache.len(), 1);
        assert_eq!(*cache.get(0).unwrap(), vec![1, 2, 3]);
        assert!(cache.get(5).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_bytes, 3);
    }

    #[test]
    fn test_eviction_bounds_size() {
        let cache = BlockCache::new(2);
        cache.insert(0, vec![1]);
        cache.insert(1, vec![2]);
        cache.insert(2, vec![3]);

        assert!(cache.len() <= 2);
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn test_get_or_try_insert_decodes_once() {
        let cache = BlockCache::new(4);
        let mut calls = 0;
        for _ in 0..3 {
            let block = cache
                .get_or_try_insert::<()>(7, || {
                    calls += 1;
                    Ok(vec![9; 4])
                })
                .unwrap();
            assert_eq!(block.len(), 4);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_decode_is_not_cached() {
        let cache = BlockCache::new(4);
        let result = cache.get_or_try_insert(1, || Err("corrupt"));
        assert_eq!(result.unwrap_err(), "corrupt");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let cache = BlockCache::new(100);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        cache.insert(i * 100 + j, vec![i as u8, j as u8]);
                        let _ = cache.get(i * 100 + j);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Concurrent inserts may overshoot by at most one block per writer
        assert!(cache.len() <= 100 + 8);
        cache.clear();
        assert!(cache.is_empty());
    }
}
