use errorgraph_core::{CacheSettings, UnifiedError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache entry metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub ttl: Duration,
    /// Monotonic insertion sequence; the smallest is evicted first.
    pub seq: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration, seq: u64) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
            seq,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            max_entries: settings.capacity.max(1),
            default_ttl: settings.ttl(),
        }
    }
}

struct Inner {
    entries: HashMap<String, CacheEntry<Arc<Vec<UnifiedError>>>>,
    /// seq -> key, ordered oldest first.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

/// Per-file cache of normalised errors. A single mutex guards entries and eviction order;
/// reads past TTL are misses and drop the stale entry.
pub struct ErrorCache {
    inner: Mutex<Inner>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

impl ErrorCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self, file_path: &str) -> Option<Arc<Vec<UnifiedError>>> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(file_path) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) if entry.is_expired() => Some(entry.seq),
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        };

        if let Some(seq) = expired {
            inner.entries.remove(file_path);
            inner.order.remove(&seq);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            debug!(file = file_path, "cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, file_path: &str, errors: Vec<UnifiedError>) {
        self.set_with_ttl(file_path, errors, self.config.default_ttl);
    }

    pub fn set_with_ttl(&self, file_path: &str, errors: Vec<UnifiedError>, ttl: Duration) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        if let Some(old) = inner.entries.remove(file_path) {
            inner.order.remove(&old.seq);
        }
        inner
            .entries
            .insert(file_path.to_string(), CacheEntry::new(Arc::new(errors), ttl, seq));
        inner.order.insert(seq, file_path.to_string());

        while inner.entries.len() > self.config.max_entries {
            let Some((&oldest, _)) = inner.order.iter().next() else {
                break;
            };
            if let Some(key) = inner.order.remove(&oldest) {
                inner.entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(file = %key, "evicted least recently set cache entry");
            }
        }
    }

    pub fn invalidate(&self, file_path: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(file_path) {
            Some(entry) => {
                inner.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<(String, u64)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, e)| (k.clone(), e.seq))
            .collect();
        for (key, seq) in &expired {
            inner.entries.remove(key);
            inner.order.remove(seq);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn contains_key(&self, file_path: &str) -> bool {
        self.inner
            .lock()
            .entries
            .get(file_path)
            .is_some_and(|e| !e.is_expired())
    }

    /// Keys of live entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for ErrorCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
