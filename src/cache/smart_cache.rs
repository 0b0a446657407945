use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_MAX_SIZE_MB: usize = 50;
const LARGE_ENTRY_BYTES: usize = 100 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    Immediate,
    Lazy,
    Aggressive,
    Smart,
}

/// Kind of backend query, which decides how long an answer stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommandKind {
    DeviceList,
    InstanceList,
    AppList,
    SystemInfo,
    FileOperations,
    Default,
}

impl CommandKind {
    pub fn base_ttl(&self) -> Duration {
        match self {
            CommandKind::DeviceList => Duration::from_secs(5),
            CommandKind::InstanceList => Duration::from_secs(3),
            CommandKind::AppList => Duration::from_secs(30),
            CommandKind::SystemInfo => Duration::from_secs(60),
            CommandKind::FileOperations => Duration::from_secs(1),
            CommandKind::Default => Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    inserted_at: Instant,
    access_count: u64,
    ttl: Duration,
    size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.inserted_at + self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    total_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_size = self.total_size.saturating_sub(entry.size_bytes);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_entries: usize,
    pub total_size_bytes: usize,
    pub ttl_distribution: BTreeMap<u64, usize>,
    pub strategy: CacheStrategy,
}

/// TTL cache for backend query results, bounded by an approximate byte size.
/// Safe to share between threads.
pub struct SmartCache {
    inner: Mutex<CacheInner>,
    max_size_bytes: usize,
    strategy: CacheStrategy,
}

pub fn cache_key(command: &str, params: &BTreeMap<String, String>) -> String {
    serde_json::json!({ "cmd": command, "params": params }).to_string()
}

impl SmartCache {
    pub fn new(max_size_mb: usize, strategy: CacheStrategy) -> Self {
        Self::with_max_bytes(max_size_mb * 1024 * 1024, strategy)
    }

    pub fn with_max_bytes(max_size_bytes: usize, strategy: CacheStrategy) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_size_bytes,
            strategy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, command: &str, params: &BTreeMap<String, String>) -> Option<Value> {
        let key = cache_key(command, params);
        let now = Instant::now();
        let mut inner = self.lock();

        let expired = match inner.entries.get(&key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.remove(&key);
            inner.misses += 1;
            tracing::debug!("🗑️ Cache entry expired: {}", key);
            return None;
        }

        inner.hits += 1;
        let entry = inner.entries.get_mut(&key)?;
        entry.access_count += 1;
        Some(entry.data.clone())
    }

    pub fn set(
        &self,
        command: &str,
        params: &BTreeMap<String, String>,
        data: Value,
        kind: CommandKind,
    ) {
        let key = cache_key(command, params);
        let size_bytes = data.to_string().len();

        if size_bytes > self.max_size_bytes {
            tracing::debug!("Cache entry for {} is larger than the cache, not stored", command);
            return;
        }

        let ttl = self.ttl_for(kind, size_bytes);
        let mut inner = self.lock();
        inner.remove(&key);
        self.evict_if_needed(&mut inner, size_bytes);

        inner.total_size += size_bytes;
        inner.entries.insert(
            key,
            CacheEntry {
                data,
                inserted_at: Instant::now(),
                access_count: 1,
                ttl,
                size_bytes,
            },
        );
    }

    fn ttl_for(&self, kind: CommandKind, size_bytes: usize) -> Duration {
        let mut ttl = kind.base_ttl();
        if self.strategy == CacheStrategy::Smart {
            if size_bytes > LARGE_ENTRY_BYTES {
                ttl *= 2;
            }
            if matches!(kind, CommandKind::SystemInfo | CommandKind::AppList) {
                ttl *= 3;
            }
        }
        ttl
    }

    /// Evicts least accessed entries first, older first among equals.
    fn evict_if_needed(&self, inner: &mut CacheInner, required: usize) {
        if inner.total_size + required <= self.max_size_bytes {
            return;
        }

        let mut candidates: Vec<(String, u64, Instant)> = inner
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.access_count, entry.inserted_at))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        for (key, _, _) in candidates {
            if inner.total_size + required <= self.max_size_bytes {
                break;
            }
            inner.remove(&key);
            inner.evictions += 1;
            tracing::debug!("🗑️ Cache evicted: {}", key);
        }
    }

    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut inner = self.lock();
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| key.contains(pattern))
            .cloned()
            .collect();
        for key in &keys {
            inner.remove(key);
        }
        keys.len()
    }

    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn clear(&self) {
        *self.lock() = CacheInner::default();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total_requests = inner.hits + inner.misses;
        let hit_rate = if total_requests > 0 {
            inner.hits as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };

        let mut ttl_distribution = BTreeMap::new();
        for entry in inner.entries.values() {
            *ttl_distribution.entry(entry.ttl.as_secs()).or_insert(0) += 1;
        }

        CacheStats {
            hit_rate,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            total_entries: inner.entries.len(),
            total_size_bytes: inner.total_size,
            ttl_distribution,
            strategy: self.strategy,
        }
    }
}

impl Default for SmartCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE_MB, CacheStrategy::Smart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn no_params() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_hit_and_miss_counting() {
        let cache = SmartCache::default();
        assert!(cache.get("version", &no_params()).is_none());

        cache.set("version", &no_params(), json!("4.0.1"), CommandKind::SystemInfo);
        assert_eq!(cache.get("version", &no_params()), Some(json!("4.0.1")));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 50.0);
        // Smart strategy triples system info TTL.
        assert_eq!(stats.ttl_distribution.get(&180), Some(&1));
    }

    #[test]
    fn test_params_are_part_of_the_key() {
        let cache = SmartCache::default();
        let mut params = BTreeMap::new();
        params.insert("index".to_string(), "1".to_string());
        cache.set("setting", &params, json!("a"), CommandKind::Default);

        params.insert("index".to_string(), "2".to_string());
        assert!(cache.get("setting", &params).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = SmartCache::new(1, CacheStrategy::Lazy);
        cache.set("list", &no_params(), json!([1, 2]), CommandKind::InstanceList);
        cache.set("apps", &no_params(), json!([]), CommandKind::AppList);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get("list", &no_params()).is_none());
        assert_eq!(cache.cleanup_expired(), 0);
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_prefers_least_accessed() {
        let cache = SmartCache::with_max_bytes(20, CacheStrategy::Lazy);
        cache.set("a", &no_params(), json!("aaaaaa"), CommandKind::Default); // 8 bytes
        cache.set("b", &no_params(), json!("bbbbbb"), CommandKind::Default);
        cache.get("a", &no_params());

        cache.set("c", &no_params(), json!("cccccc"), CommandKind::Default);

        assert!(cache.get("a", &no_params()).is_some());
        assert!(cache.get("b", &no_params()).is_none());
        assert!(cache.get("c", &no_params()).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_pattern_and_clear() {
        let cache = SmartCache::default();
        cache.set("setting_info", &no_params(), json!(1), CommandKind::Default);
        cache.set("setting_writable", &no_params(), json!(2), CommandKind::Default);
        cache.set("version", &no_params(), json!(3), CommandKind::Default);

        assert_eq!(cache.invalidate_pattern("setting"), 2);
        assert_eq!(cache.len(), 1);

        cache.get("version", &no_params());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_thread_safe_operations() {
        let cache = Arc::new(SmartCache::with_max_bytes(1024 * 1024, CacheStrategy::Smart));
        let mut handles = Vec::new();

        for thread_id in 0..5 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("key_{}", i % 10);
                    cache.set(&key, &BTreeMap::new(), json!(thread_id), CommandKind::Default);
                    cache.get(&key, &BTreeMap::new());
                }
            }));
        }
        {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    cache.invalidate_pattern("key");
                }
            }));
        }
        {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    cache.cleanup_expired();
                }
            }));
        }

        for handle in handles {
            handle.join().expect("cache worker panicked");
        }

        let stats = cache.stats();
        assert!(stats.total_entries <= 10);
        assert_eq!(stats.hits + stats.misses, 250);
    }
}
