//! Persistent keyed store for cached GET responses.
//!
//! Stores are synchronous and cheap to call; the orchestrator decides
//! freshness. Every entry carries the [`Context`] it was written under so
//! that invalidation can target tenant scopes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::cache_key::CacheKey;
use crate::core::context::{Context, ContextField};
use crate::error::Result;

/// Default retention multiplier used by [`CacheStore::purge_expired`].
pub const DEFAULT_RETENTION_FACTOR: f64 = 2.0;

/// A cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheKey,
    pub endpoint: String,
    pub value: Value,
    pub written_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    #[serde(default)]
    pub context: Context,
}

impl CacheEntry {
    /// Build an entry stamped with the current time.
    #[must_use]
    pub fn new(key: CacheKey, value: Value, ttl_seconds: u64, context: Context) -> Self {
        let endpoint = key.endpoint().to_string();
        Self {
            key,
            endpoint,
            value,
            written_at: Utc::now(),
            ttl_seconds,
            context,
        }
    }

    /// Age of the entry at `now`. Clock skew into the future counts as zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.written_at).max(Duration::zero())
    }

    /// Returns true if the entry is younger than `max_age`.
    #[must_use]
    pub fn is_within(&self, max_age: std::time::Duration, now: DateTime<Utc>) -> bool {
        Duration::from_std(max_age).is_ok_and(|max_age| self.age(now) < max_age)
    }

    /// Fresh under its own TTL.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.is_within(std::time::Duration::from_secs(self.ttl_seconds), now)
    }

    /// Approximate stored size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        let value_len = serde_json::to_string(&self.value).map_or(0, |s| s.len());
        (self.key.as_str().len() + value_len) as u64
    }
}

/// Selects entries by context tag.
///
/// An entry matches iff every tag named by the filter equals the entry's
/// tag. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    pub user_id: Option<String>,
    pub institute_id: Option<String>,
    pub class_id: Option<String>,
    pub subject_id: Option<String>,
}

impl TagFilter {
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn institute(id: impl Into<String>) -> Self {
        Self {
            institute_id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn class(id: impl Into<String>) -> Self {
        Self {
            class_id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn subject(id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Filter for a single context field. `Role` is not an invalidation tag.
    #[must_use]
    pub fn for_field(field: ContextField, id: &str) -> Option<Self> {
        match field {
            ContextField::User => Some(Self::user(id)),
            ContextField::Institute => Some(Self::institute(id)),
            ContextField::Class => Some(Self::class(id)),
            ContextField::Subject => Some(Self::subject(id)),
            ContextField::Role => None,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.institute_id.is_none()
            && self.class_id.is_none()
            && self.subject_id.is_none()
    }

    #[must_use]
    pub fn matches(&self, context: &Context) -> bool {
        fn tag_matches(want: Option<&String>, have: Option<&String>) -> bool {
            want.is_none_or(|want| have == Some(want))
        }
        tag_matches(self.user_id.as_ref(), context.user_id.as_ref())
            && tag_matches(self.institute_id.as_ref(), context.institute_id.as_ref())
            && tag_matches(self.class_id.as_ref(), context.class_id.as_ref())
            && tag_matches(self.subject_id.as_ref(), context.subject_id.as_ref())
    }
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: u64,
    pub fresh_entries: u64,
    pub expired_entries: u64,
    pub total_bytes: u64,
    pub oldest_written_at: Option<DateTime<Utc>>,
    pub newest_written_at: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Fold one entry into the totals.
    pub fn record(&mut self, entry: &CacheEntry, now: DateTime<Utc>) {
        self.total_entries += 1;
        if entry.is_fresh(now) {
            self.fresh_entries += 1;
        } else {
            self.expired_entries += 1;
        }
        self.total_bytes += entry.size_bytes();
        self.oldest_written_at = Some(
            self.oldest_written_at
                .map_or(entry.written_at, |t| t.min(entry.written_at)),
        );
        self.newest_written_at = Some(
            self.newest_written_at
                .map_or(entry.written_at, |t| t.max(entry.written_at)),
        );
    }
}

/// Durable mapping from cache key to tagged entry.
pub trait CacheStore: Send + Sync {
    /// Entry stored under `key`, regardless of age.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Insert or replace the entry under its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn set(&self, entry: CacheEntry) -> Result<()>;

    /// Delete every entry whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn remove_prefix(&self, prefix: &str) -> Result<u64>;

    /// Delete every entry whose context matches `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn remove_matching(&self, filter: &TagFilter) -> Result<u64>;

    /// Delete everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn clear(&self) -> Result<u64>;

    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn stats(&self) -> Result<CacheStats>;

    /// Delete entries older than `ttl × retention_factor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn purge_expired(&self, retention_factor: f64) -> Result<u64>;

    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn clear_user_cache(&self, user_id: &str) -> Result<u64> {
        self.remove_matching(&TagFilter::user(user_id))
    }

    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn clear_institute_cache(&self, institute_id: &str) -> Result<u64> {
        self.remove_matching(&TagFilter::institute(institute_id))
    }

    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn clear_all_cache(&self) -> Result<u64> {
        self.clear()
    }
}

/// Retention window for `entry` under `retention_factor`.
#[must_use]
pub fn retention_window(ttl_seconds: u64, retention_factor: f64) -> std::time::Duration {
    #[allow(clippy::cast_precision_loss)]
    let secs = ttl_seconds as f64 * retention_factor.max(1.0);
    std::time::Duration::try_from_secs_f64(secs).unwrap_or(std::time::Duration::MAX)
}
