//! Deterministic cache keys.
//!
//! A key is `endpoint|params|context`, where `params` is the JSON object of
//! non-null parameters with names in lexicographic order and `context` is the
//! JSON object of present context tags in the fixed order
//! (userId, instituteId, classId, subjectId, role). Both parts go through
//! JSON string escaping, so no parameter value can collide with a separator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{Context, QueryParams};

/// Separator between the endpoint, params and context segments.
pub const KEY_SEPARATOR: char = '|';

/// Opaque cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an existing key string (as read back from a store).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The endpoint segment of the key.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map_or(self.0.as_str(), |(endpoint, _)| endpoint)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Prefix shared by every key built for `endpoint`.
#[must_use]
pub fn endpoint_prefix(endpoint: &str) -> String {
    format!("{endpoint}{KEY_SEPARATOR}")
}

/// Build the cache key for a request.
///
/// Pure: the same inputs always produce the same key, independent of the
/// order parameters were inserted in.
#[must_use]
pub fn build_key(endpoint: &str, params: Option<&QueryParams>, context: &Context) -> CacheKey {
    let params_json = params.map_or_else(
        || "{}".to_string(),
        |params| {
            let sorted: BTreeMap<&str, Value> = params
                .iter()
                .map(|(name, value)| (name, value.to_json()))
                .collect();
            serde_json::to_string(&sorted).unwrap_or_else(|_| "{}".to_string())
        },
    );

    // Rendered by hand: the tag order is fixed, not alphabetical.
    let context_json = context
        .fields()
        .map(|(field, value)| {
            format!(
                "{}:{}",
                Value::String(field.name().to_string()),
                Value::String(value.to_string())
            )
        })
        .collect::<Vec<_>>()
        .join(",");

    CacheKey(format!(
        "{endpoint}{KEY_SEPARATOR}{params_json}{KEY_SEPARATOR}{{{context_json}}}"
    ))
}
