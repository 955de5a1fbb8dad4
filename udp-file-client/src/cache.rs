use crate::codec::WireValue;
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

/// Cached byte range of one file, as last observed at `last_write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub offset: i64,
    pub length: i64,
    pub content: Vec<u8>,
    pub last_validity_check: Instant,
    /// Server version token; changes whenever the file changes.
    pub last_write: WireValue,
}

impl CacheEntry {
    pub fn new(offset: i64, length: i64, content: Vec<u8>, last_write: WireValue) -> Self {
        Self {
            offset,
            length,
            content,
            last_validity_check: Instant::now(),
            last_write,
        }
    }

    /// True if `[offset, offset+length)` lies inside the cached range.
    pub fn covers(&self, offset: i64, length: i64) -> bool {
        self.offset <= offset
            && self.offset.saturating_add(self.length) >= offset.saturating_add(length)
    }

    /// Requested sub-range, clamped to the bytes actually held (short reads at EOF).
    fn slice(&self, offset: i64, length: i64) -> Vec<u8> {
        let start = usize::try_from(offset - self.offset).unwrap_or(0);
        let len = usize::try_from(length).unwrap_or(0);
        let start = start.min(self.content.len());
        let end = start.saturating_add(len).min(self.content.len());
        self.content[start..end].to_vec()
    }
}

/// Result of consulting the cache for a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// No entry for the file.
    Miss,
    /// Entry covers the range and is inside the validity window.
    Fresh(Vec<u8>),
    /// Entry covers the range but must be revalidated against this token.
    Stale { last_write: WireValue },
    /// Entry exists but does not cover the range.
    Bypass,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub revalidations: u64,
    pub bypasses: u64,
}

/// Thread-safe read cache keyed by file name
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<RwLock<CacheInner>>,
    interval: Duration,
}

struct CacheInner {
    map: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

impl CacheStore {
    /// Empty cache whose entries are trusted for `interval` after each check.
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                map: HashMap::new(),
                stats: CacheStats::default(),
            })),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn lookup(&self, file: &str, offset: i64, length: i64) -> Lookup {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let result = match inner.map.get(file) {
            None => Lookup::Miss,
            Some(entry) if !entry.covers(offset, length) => Lookup::Bypass,
            Some(entry) if entry.last_validity_check.elapsed() < self.interval => {
                Lookup::Fresh(entry.slice(offset, length))
            }
            Some(entry) => Lookup::Stale {
                last_write: entry.last_write.clone(),
            },
        };

        match &result {
            Lookup::Miss => inner.stats.misses += 1,
            Lookup::Fresh(_) => inner.stats.hits += 1,
            Lookup::Bypass => inner.stats.bypasses += 1,
            Lookup::Stale { .. } => {}
        }
        result
    }

    /// Store an entry, replacing whatever was cached for the file.
    pub fn put(&self, file: &str, entry: CacheEntry) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.map.insert(file.to_string(), entry);
    }

    /// Server confirmed `token` is current: if the entry still carries that
    /// token and covers the range, restart its validity window and serve it.
    ///
    /// Check and refresh happen under one lock so a concurrent overwrite by a
    /// newer read cannot be mistaken for the confirmed version.
    pub fn revalidate(
        &self,
        file: &str,
        offset: i64,
        length: i64,
        token: &WireValue,
    ) -> Option<Vec<u8>> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let served = match inner.map.get_mut(file) {
            Some(entry) if entry.last_write == *token && entry.covers(offset, length) => {
                entry.last_validity_check = Instant::now();
                Some(entry.slice(offset, length))
            }
            _ => None,
        };

        if served.is_some() {
            inner.stats.revalidations += 1;
        } else {
            inner.stats.misses += 1;
        }
        served
    }

    pub fn get(&self, file: &str) -> Option<CacheEntry> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.map.get(file).cloned()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.stats
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
