//! Frame-stamped field cache and size-classed buffer pool.
//!
//! Expensive derived state is cached and invalidated by a cheap stamp
//! comparison, never recomputed speculatively.

use rustc_hash::FxHashMap;

use crate::ident::ExprId;

/// Cache entries beyond this count trigger an eviction pass.
const CACHE_CAPACITY: usize = 200;

/// Fraction of entries evicted, oldest-by-frame-stamp first, once the cache
/// is over [`CACHE_CAPACITY`].
const EVICT_FRACTION: usize = 4;

struct CacheEntry {
    frame_stamp: u64,
    values: Vec<f32>,
}

/// Caches a `materialize` step's resolved buffer against the `ExprId` of the
/// field expression it evaluated, valid only for the frame stamp it was
/// computed at. Structural sharing in the hash-consed IR means two
/// materialize steps over an identical subtree collapse to one cache entry
/// for free.
#[derive(Default)]
pub struct FieldCache {
    entries: FxHashMap<ExprId, CacheEntry>,
}

impl FieldCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached buffer for `expr` if it was computed at exactly
    /// `frame_stamp`; a stale or absent entry is a cache miss.
    #[must_use]
    pub fn get(&self, expr: ExprId, frame_stamp: u64) -> Option<&[f32]> {
        self.entries.get(&expr).filter(|e| e.frame_stamp == frame_stamp).map(|e| e.values.as_slice())
    }

    /// Records `values` as `expr`'s buffer for `frame_stamp`, evicting the
    /// oldest quarter of entries (by frame stamp) if the cache has grown past
    /// its capacity. Evicted buffers are returned to `pool` instead of
    /// dropped. Returns the number of entries evicted, for telemetry.
    pub fn insert(&mut self, expr: ExprId, frame_stamp: u64, values: Vec<f32>, pool: &mut BufferPool) -> usize {
        self.entries.insert(expr, CacheEntry { frame_stamp, values });
        if self.entries.len() <= CACHE_CAPACITY {
            return 0;
        }
        let evict_count = self.entries.len() / EVICT_FRACTION;
        let mut by_age: Vec<(ExprId, u64)> = self.entries.iter().map(|(&id, e)| (id, e.frame_stamp)).collect();
        by_age.sort_unstable_by_key(|&(_, stamp)| stamp);
        let mut evicted = 0;
        for (id, _) in by_age.into_iter().take(evict_count) {
            if let Some(entry) = self.entries.remove(&id) {
                pool.release(entry.values);
                evicted += 1;
            }
        }
        evicted
    }

    /// Number of entries currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Size-classed `Vec<f32>` recycler: the only legal way to avoid per-frame
/// allocation. No render-hot code may allocate from the system allocator.
///
/// Size classes are powers of two; a requested length rounds up to its
/// class so a handful of distinct capacities serve every field size a patch
/// produces.
#[derive(Default)]
pub struct BufferPool {
    classes: FxHashMap<usize, Vec<Vec<f32>>>,
}

impl BufferPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn size_class(len: usize) -> usize {
        len.next_power_of_two().max(1)
    }

    /// Takes a zero-filled buffer of exactly `len` elements, recycling a
    /// pooled buffer of the matching size class when one is available.
    pub fn acquire(&mut self, len: usize) -> Vec<f32> {
        let class = Self::size_class(len);
        let mut buf = self.classes.get_mut(&class).and_then(Vec::pop).unwrap_or_else(|| Vec::with_capacity(class));
        buf.clear();
        buf.resize(len, 0.0);
        buf
    }

    /// Returns a buffer to the pool for reuse by a future [`Self::acquire`]
    /// of the same size class.
    pub fn release(&mut self, buf: Vec<f32>) {
        let class = Self::size_class(buf.capacity());
        self.classes.entry(class).or_default().push(buf);
    }

    /// Total buffers currently held across every size class.
    #[must_use]
    pub fn pooled_len(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ExprId {
        ExprId([byte; 32])
    }

    #[test]
    fn cache_hit_requires_matching_frame_stamp() {
        let mut cache = FieldCache::new();
        let mut pool = BufferPool::new();
        cache.insert(id(1), 10, vec![1.0, 2.0], &mut pool);
        assert_eq!(cache.get(id(1), 10), Some(&[1.0, 2.0][..]));
        assert_eq!(cache.get(id(1), 11), None);
    }

    #[test]
    fn eviction_drops_oldest_quarter_once_over_capacity() {
        let mut cache = FieldCache::new();
        let mut pool = BufferPool::new();
        for i in 0..=CACHE_CAPACITY {
            cache.insert(id(i as u8), i as u64, vec![i as f32], &mut pool);
        }
        assert!(cache.len() < CACHE_CAPACITY + 1);
        assert_eq!(cache.get(id(0), 0), None, "oldest entry should have been evicted");
    }

    #[test]
    fn released_buffer_is_reused_without_new_allocation() {
        let mut pool = BufferPool::new();
        let buf = pool.acquire(4);
        assert_eq!(buf.len(), 4);
        pool.release(buf);
        assert_eq!(pool.pooled_len(), 1);
        let reused = pool.acquire(4);
        assert_eq!(reused.len(), 4);
        assert_eq!(pool.pooled_len(), 0);
    }
}
