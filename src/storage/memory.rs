//! In-process cache store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use super::store::{CacheEntry, CacheStats, CacheStore, TagFilter, retention_window};
use crate::core::cache_key::CacheKey;
use crate::error::Result;

/// `HashMap`-backed store, optionally bounded.
///
/// When a capacity is set, inserting a new key into a full store evicts the
/// entry with the oldest `written_at`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retain(&self, mut keep: impl FnMut(&CacheEntry) -> bool) -> u64 {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| keep(entry));
        (before - entries.len()) as u64
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, entry: CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(capacity) = self.capacity
            && entries.len() >= capacity
            && !entries.contains_key(&entry.key)
        {
            let oldest = entries
                .values()
                .min_by_key(|e| e.written_at)
                .map(|e| e.key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        Ok(self.retain(|entry| !entry.key.as_str().starts_with(prefix)))
    }

    fn remove_matching(&self, filter: &TagFilter) -> Result<u64> {
        Ok(self.retain(|entry| !filter.matches(&entry.context)))
    }

    fn clear(&self) -> Result<u64> {
        Ok(self.retain(|_| false))
    }

    fn stats(&self) -> Result<CacheStats> {
        let now = Utc::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = CacheStats::default();
        for entry in entries.values() {
            stats.record(entry, now);
        }
        Ok(stats)
    }

    fn purge_expired(&self, retention_factor: f64) -> Result<u64> {
        let now = Utc::now();
        Ok(self.retain(|entry| {
            entry.is_within(retention_window(entry.ttl_seconds, retention_factor), now)
        }))
    }
}
