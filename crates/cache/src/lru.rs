//! Size-weighted LRU cache for rendered bitmaps
//!
//! Keeps the most recently used bitmaps resident under a hard byte budget.
//! Besides the eviction triggered by `put`, the cache supports proactive
//! fractional trimming (`trim_to_fraction`) for system memory pressure.
//!
//! Evicted values are handed to a release hook exactly once, after the cache
//! lock has been dropped, so hooks may free native memory or call back into
//! the cache.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bitmap::{Bitmap, BitmapKey};
use crate::config::CacheConfig;
use crate::pressure::MemoryPressure;

/// Computes the accounted size of an entry in bytes.
pub type SizeFn<K, V> = Arc<dyn Fn(&K, &V) -> usize + Send + Sync>;

/// Receives every value leaving the cache other than through `remove`.
pub type ReleaseFn<K, V> = Arc<dyn Fn(K, V, EvictionReason) + Send + Sync>;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Evicted to make room for a `put`
    Capacity,
    /// Evicted by `trim_to_fraction`, `trim_to_size` or a lowered budget
    Trimmed,
    /// Overwritten by a `put` with the same key
    Replaced,
    /// Dropped by `evict_all`
    Cleared,
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of resident entries
    pub entry_count: usize,

    /// Sum of the accounted sizes of resident entries (bytes)
    pub size_bytes: usize,

    /// Byte budget
    pub max_size_bytes: usize,

    /// Number of `get` calls that found an entry
    pub hits: u64,

    /// Number of `get` calls that found nothing
    pub misses: u64,

    /// Entries evicted for capacity or trimming
    pub evictions: u64,

    /// Number of `put` calls
    pub puts: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate budget utilization (0.0 to 1.0, above 1.0 only for an oversized lone entry)
    pub fn utilization(&self) -> f64 {
        if self.max_size_bytes == 0 {
            0.0
        } else {
            self.size_bytes as f64 / self.max_size_bytes as f64
        }
    }
}

struct Entry<V> {
    value: V,
    size: usize,
    recency: u64,
}

type Released<K, V> = Vec<(K, V, EvictionReason)>;

struct CacheState<K, V> {
    entries: HashMap<K, Entry<V>>,

    /// Recency order: smallest sequence number is least recently used
    recency: BTreeMap<u64, K>,

    next_recency: u64,
    size_bytes: usize,
    max_size_bytes: usize,

    hits: u64,
    misses: u64,
    evictions: u64,
    puts: u64,
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
    fn new(max_size_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_recency: 0,
            size_bytes: 0,
            max_size_bytes,
            hits: 0,
            misses: 0,
            evictions: 0,
            puts: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_recency;
        self.next_recency += 1;
        seq
    }

    fn insert(&mut self, key: K, value: V, size: usize) {
        let recency = self.bump();
        self.recency.insert(recency, key.clone());
        self.size_bytes += size;
        self.entries.insert(
            key,
            Entry {
                value,
                size,
                recency,
            },
        );
    }

    /// Mark an entry as most recently used
    fn touch(&mut self, key: &K) {
        let seq = self.bump();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.recency);
            entry.recency = seq;
            self.recency.insert(seq, key.clone());
        }
    }

    fn take(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.recency);
        self.size_bytes -= entry.size;
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<(K, V)> {
        let (_, key) = self.recency.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.size_bytes -= entry.size;
        self.evictions += 1;
        Some((key, entry.value))
    }

    /// Evict least recently used entries until at most `target` bytes remain
    fn evict_until(&mut self, target: usize, reason: EvictionReason, out: &mut Released<K, V>) {
        while self.size_bytes > target {
            match self.evict_lru() {
                Some((key, value)) => out.push((key, value, reason)),
                None => break,
            }
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            size_bytes: self.size_bytes,
            max_size_bytes: self.max_size_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            puts: self.puts,
        }
    }
}

/// Bounded LRU bitmap cache with fractional trimming
///
/// Thread-safe: every operation runs under one lock, so the budget invariant
/// holds across concurrent `put`, `get` and trim calls. Share it between
/// collaborators with an `Arc`.
///
/// # Example
///
/// ```
/// use pageflow_cache::{Bitmap, BitmapCache, BitmapKey};
///
/// let cache: BitmapCache = BitmapCache::new(16 * 1024 * 1024);
///
/// cache.put(BitmapKey::page(0, 1080), Bitmap::blank(1080, 1));
/// assert!(cache.get(&BitmapKey::page(0, 1080)).is_some());
///
/// // System memory pressure: keep at most half of the budget
/// cache.trim_to_fraction(0.5);
/// ```
pub struct BitmapCache<K = BitmapKey, V = Bitmap> {
    state: Mutex<CacheState<K, V>>,
    sizer: SizeFn<K, V>,
    release: Option<ReleaseFn<K, V>>,
}

/// Builder for caches with a custom value type or release hook.
pub struct BitmapCacheBuilder<K, V> {
    max_size_bytes: usize,
    sizer: SizeFn<K, V>,
    release: Option<ReleaseFn<K, V>>,
}

impl<K, V> BitmapCacheBuilder<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Install the hook that frees an evicted value's resources.
    pub fn on_release<F>(mut self, release: F) -> Self
    where
        F: Fn(K, V, EvictionReason) + Send + Sync + 'static,
    {
        self.release = Some(Arc::new(release));
        self
    }

    pub fn build(self) -> BitmapCache<K, V> {
        BitmapCache {
            state: Mutex::new(CacheState::new(self.max_size_bytes)),
            sizer: self.sizer,
            release: self.release,
        }
    }
}

impl<K> BitmapCache<K, Bitmap>
where
    K: Eq + Hash + Clone,
{
    /// Create a bitmap cache that accounts each bitmap by its pixel buffer size
    pub fn new(max_size_bytes: usize) -> Self {
        Self::builder(max_size_bytes, |_, bitmap: &Bitmap| bitmap.byte_count()).build()
    }

    /// Create a bitmap cache sized from configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size_bytes)
    }
}

impl<K, V> BitmapCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Start building a cache with an injected size function
    pub fn builder<F>(max_size_bytes: usize, sizer: F) -> BitmapCacheBuilder<K, V>
    where
        F: Fn(&K, &V) -> usize + Send + Sync + 'static,
    {
        BitmapCacheBuilder {
            max_size_bytes,
            sizer: Arc::new(sizer),
            release: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_all(&self, released: Released<K, V>) {
        let Some(release) = &self.release else {
            return;
        };
        for (key, value, reason) in released {
            release(key, value, reason);
        }
    }

    /// Insert an entry, evicting least recently used entries until it fits
    ///
    /// An entry larger than the whole budget is still accepted; every other
    /// entry is evicted and it stays resident alone until the next mutation.
    pub fn put(&self, key: K, value: V) {
        let size = (self.sizer)(&key, &value);
        let mut released = Vec::new();
        {
            let mut state = self.lock();
            state.puts += 1;

            if let Some(old) = state.take(&key) {
                released.push((key.clone(), old.value, EvictionReason::Replaced));
            }

            if size > state.max_size_bytes {
                log::debug!(
                    "bitmap of {} bytes exceeds cache budget of {} bytes, flushing {} entries",
                    size,
                    state.max_size_bytes,
                    state.entries.len()
                );
                state.evict_until(0, EvictionReason::Capacity, &mut released);
            } else {
                let target = state.max_size_bytes - size;
                state.evict_until(target, EvictionReason::Capacity, &mut released);
            }

            state.insert(key, value, size);
        }
        self.release_all(released);
    }

    /// Look up an entry and mark it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        if state.entries.contains_key(key) {
            state.touch(key);
            state.hits += 1;
            state.entries.get(key).map(|entry| entry.value.clone())
        } else {
            state.misses += 1;
            None
        }
    }

    /// Look up an entry without touching recency or statistics
    pub fn peek(&self, key: &K) -> Option<V> {
        self.lock().entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Remove an entry and hand it back to the caller without releasing it
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().take(key).map(|entry| entry.value)
    }

    /// Evict least recently used entries until at most
    /// `fraction * max_size_bytes` bytes remain
    ///
    /// `fraction` is clamped to `0.0..=1.0`; a non-finite fraction is ignored.
    /// Returns the number of evicted entries.
    pub fn trim_to_fraction(&self, fraction: f64) -> usize {
        if !fraction.is_finite() {
            log::warn!("ignoring non-finite trim fraction {}", fraction);
            return 0;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let mut released = Vec::new();
        {
            let mut state = self.lock();
            let target = (state.max_size_bytes as f64 * fraction).floor() as usize;
            state.evict_until(target, EvictionReason::Trimmed, &mut released);
            log::debug!(
                "trimmed bitmap cache to {:.0}% of budget: {} evicted, {} bytes resident",
                fraction * 100.0,
                released.len(),
                state.size_bytes
            );
        }
        let count = released.len();
        self.release_all(released);
        count
    }

    /// Evict least recently used entries until at most `target_bytes` remain
    pub fn trim_to_size(&self, target_bytes: usize) -> usize {
        let mut released = Vec::new();
        self.lock()
            .evict_until(target_bytes, EvictionReason::Trimmed, &mut released);
        let count = released.len();
        self.release_all(released);
        count
    }

    /// Shrink proportionally to the reported memory pressure
    pub fn on_memory_pressure(&self, pressure: MemoryPressure) -> usize {
        self.trim_to_fraction(pressure.retain_fraction())
    }

    /// Remove and release every entry, least recently used first
    pub fn evict_all(&self) {
        let released: Released<K, V> = {
            let mut state = self.lock();
            let mut entries = std::mem::take(&mut state.entries);
            let recency = std::mem::take(&mut state.recency);
            state.size_bytes = 0;
            recency
                .into_values()
                .filter_map(|key| {
                    let entry = entries.remove(&key)?;
                    Some((key, entry.value, EvictionReason::Cleared))
                })
                .collect()
        };
        self.release_all(released);
    }

    /// Change the byte budget, trimming if the cache no longer fits
    pub fn set_max_size(&self, max_size_bytes: usize) {
        let mut released = Vec::new();
        {
            let mut state = self.lock();
            state.max_size_bytes = max_size_bytes;
            state.evict_until(max_size_bytes, EvictionReason::Trimmed, &mut released);
        }
        self.release_all(released);
    }

    pub fn max_size_bytes(&self) -> usize {
        self.lock().max_size_bytes
    }

    /// Sum of the accounted sizes of resident entries
    pub fn size_bytes(&self) -> usize {
        self.lock().size_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Resident keys, least recently used first
    pub fn keys_lru_order(&self) -> Vec<K> {
        self.lock().recency.values().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const PAGE: usize = 4096;

    type ReleaseLog = Arc<Mutex<Vec<(usize, EvictionReason)>>>;

    /// Cache of plain byte counts keyed by page index, recording releases
    fn counting_cache(max: usize) -> (BitmapCache<usize, usize>, ReleaseLog) {
        let released = Arc::new(Mutex::new(Vec::new()));
        let sink = released.clone();
        let cache = BitmapCache::builder(max, |_, size: &usize| *size)
            .on_release(move |key, _, reason| sink.lock().unwrap().push((key, reason)))
            .build();
        (cache, released)
    }

    #[test]
    fn test_basic_put_get() {
        let cache: BitmapCache = BitmapCache::new(1024 * 1024);
        let key = BitmapKey::page(0, 256);
        let bitmap = Bitmap::blank(256, 256);

        cache.put(key, bitmap.clone());

        assert_eq!(cache.get(&key), Some(bitmap));
        assert_eq!(cache.size_bytes(), 256 * 256 * 4);
    }

    #[test]
    fn test_cache_miss() {
        let cache: BitmapCache = BitmapCache::new(1024 * 1024);
        assert!(cache.get(&BitmapKey::page(9, 100)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_fifth_page_evicts_only_the_first() {
        let (cache, released) = counting_cache(16384);
        for page in 0..4 {
            cache.put(page, PAGE);
        }
        assert_eq!(cache.size_bytes(), 16384);

        cache.put(4, PAGE);

        assert!(!cache.contains(&0));
        assert_eq!(cache.keys_lru_order(), vec![1, 2, 3, 4]);
        assert_eq!(*released.lock().unwrap(), vec![(0, EvictionReason::Capacity)]);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let (cache, _) = counting_cache(3 * PAGE);
        cache.put(0, PAGE);
        cache.put(1, PAGE);
        cache.put(2, PAGE);

        assert!(cache.get(&0).is_some());
        cache.put(3, PAGE);

        assert!(cache.contains(&0));
        assert!(!cache.contains(&1));
    }

    #[test]
    fn test_trim_to_half_keeps_two_most_recent() {
        let (cache, released) = counting_cache(16384);
        for page in 0..4 {
            cache.put(page, PAGE);
        }
        // Make 0 recent again: LRU order is now 1, 2, 3, 0
        cache.get(&0);

        let evicted = cache.trim_to_fraction(0.5);

        assert_eq!(evicted, 2);
        assert_eq!(cache.keys_lru_order(), vec![3, 0]);
        assert_eq!(
            *released.lock().unwrap(),
            vec![(1, EvictionReason::Trimmed), (2, EvictionReason::Trimmed)]
        );
        assert_eq!(cache.size_bytes(), 8192);
    }

    #[test]
    fn test_trim_fraction_edges() {
        let (cache, _) = counting_cache(4 * PAGE);
        for page in 0..4 {
            cache.put(page, PAGE);
        }

        assert_eq!(cache.trim_to_fraction(f64::NAN), 0);
        assert_eq!(cache.trim_to_fraction(1.5), 0);
        assert_eq!(cache.len(), 4);

        assert_eq!(cache.trim_to_fraction(-1.0), 4);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_oversized_entry_flushes_others() {
        let (cache, released) = counting_cache(4 * PAGE);
        cache.put(0, PAGE);
        cache.put(1, PAGE);

        cache.put(2, 5 * PAGE);

        assert_eq!(cache.keys_lru_order(), vec![2]);
        assert_eq!(released.lock().unwrap().len(), 2);

        // The oversized entry is the first victim of the next put
        cache.put(3, PAGE);
        assert_eq!(cache.keys_lru_order(), vec![3]);
        assert!(cache.size_bytes() <= cache.max_size_bytes());
    }

    #[test]
    fn test_overwrite_releases_previous_value() {
        let (cache, released) = counting_cache(4 * PAGE);
        cache.put(7, PAGE);
        cache.put(7, 2 * PAGE);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 2 * PAGE);
        assert_eq!(*released.lock().unwrap(), vec![(7, EvictionReason::Replaced)]);
    }

    #[test]
    fn test_remove_does_not_release() {
        let (cache, released) = counting_cache(4 * PAGE);
        cache.put(1, PAGE);

        assert_eq!(cache.remove(&1), Some(PAGE));
        assert!(cache.remove(&1).is_none());
        assert_eq!(cache.size_bytes(), 0);
        assert!(released.lock().unwrap().is_empty());
    }

    #[test]
    fn test_evict_all_releases_everything_once() {
        let (cache, released) = counting_cache(8 * PAGE);
        for page in 0..5 {
            cache.put(page, PAGE);
        }

        cache.evict_all();
        cache.evict_all();

        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
        let mut keys: Vec<usize> = released.lock().unwrap().iter().map(|(k, _)| *k).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_evict_all_releases_in_lru_order() {
        let (cache, released) = counting_cache(8 * PAGE);
        for page in 0..4 {
            cache.put(page, PAGE);
        }
        cache.get(&1);
        cache.get(&0);

        let expected = cache.keys_lru_order();
        cache.evict_all();

        let keys: Vec<usize> = released.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, expected);
        assert_eq!(keys, vec![2, 3, 1, 0]);
    }

    #[test]
    fn test_release_hook_runs_once_per_entry() {
        let counts = Arc::new(Mutex::new(HashMap::<usize, usize>::new()));
        let hook_counts = counts.clone();
        let cache = BitmapCache::builder(3 * PAGE, |_, size: &usize| *size)
            .on_release(move |key, _, _| *hook_counts.lock().unwrap().entry(key).or_default() += 1)
            .build();

        for page in 0..10 {
            cache.put(page, PAGE);
        }
        cache.trim_to_fraction(0.4);
        cache.evict_all();

        let counts = counts.lock().unwrap();
        assert_eq!(counts.len(), 10);
        assert!(counts.values().all(|&count| count == 1));
    }

    #[test]
    fn test_peek_does_not_touch_recency() {
        let (cache, _) = counting_cache(2 * PAGE);
        cache.put(0, PAGE);
        cache.put(1, PAGE);

        assert_eq!(cache.peek(&0), Some(PAGE));
        cache.put(2, PAGE);

        assert!(!cache.contains(&0));
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_set_max_size_trims() {
        let (cache, _) = counting_cache(4 * PAGE);
        for page in 0..4 {
            cache.put(page, PAGE);
        }

        cache.set_max_size(2 * PAGE);

        assert_eq!(cache.keys_lru_order(), vec![2, 3]);
        assert_eq!(cache.max_size_bytes(), 2 * PAGE);
    }

    #[test]
    fn test_memory_pressure_trims_proportionally() {
        let (cache, _) = counting_cache(4 * PAGE);
        for page in 0..4 {
            cache.put(page, PAGE);
        }

        assert_eq!(cache.on_memory_pressure(MemoryPressure::Low), 0);
        assert_eq!(cache.on_memory_pressure(MemoryPressure::High), 2);
        assert_eq!(cache.on_memory_pressure(MemoryPressure::Critical), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats() {
        let (cache, _) = counting_cache(2 * PAGE);
        cache.put(0, PAGE);
        cache.put(1, PAGE);
        cache.put(2, PAGE);
        cache.get(&2);
        cache.get(&0);

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.puts, 3);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
        assert!((stats.utilization() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_random_puts_stay_within_budget() {
        let max = 64 * 1024;
        let (cache, _) = counting_cache(max);
        let mut rng = rand::thread_rng();

        for _ in 0..2_000 {
            let key = rng.gen_range(0..200);
            let size = rng.gen_range(1..=max / 4);
            cache.put(key, size);
            assert!(cache.size_bytes() <= max);
            if rng.gen_bool(0.3) {
                cache.get(&rng.gen_range(0..200));
            }
        }
    }

    #[test]
    fn test_concurrent_put_and_trim_keep_budget() {
        let max = 32 * PAGE;
        let cache: Arc<BitmapCache<usize, usize>> =
            Arc::new(BitmapCache::builder(max, |_, size: &usize| *size).build());
        let released = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for worker in 0..4 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    cache.put(worker * 1000 + i, PAGE * (1 + i % 3));
                    assert!(cache.size_bytes() <= max);
                }
            }));
        }
        {
            let cache = cache.clone();
            let released = released.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let evicted = cache.trim_to_fraction((i % 10) as f64 / 10.0);
                    released.fetch_add(evicted, Ordering::Relaxed);
                    assert!(cache.size_bytes() <= max);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.size_bytes <= max);
        assert_eq!(stats.size_bytes, cache.size_bytes());
    }
}
