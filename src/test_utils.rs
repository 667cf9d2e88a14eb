//! Test utilities for edugate.
//!
//! In-memory collaborators and factories shared by unit and integration
//! tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use edugate::test_utils::*;
//!
//! let harness = TestHarness::new(&server.uri());
//! harness.session.set_access_token("token-1").unwrap();
//! let value: serde_json::Value = harness.client.get("/students", None, &GetOptions::new()).await?;
//! assert_eq!(harness.refresher.calls(), 0);
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tempfile::TempDir;

use crate::core::auth::{LoginRedirect, TokenRefresher};
use crate::core::cache_key::build_key;
use crate::core::client::{ApiClient, ClientSettings};
use crate::core::context::{Context, QueryParams};
use crate::core::http::RetryPolicy;
use crate::core::invalidation::InvalidationRules;
use crate::error::{ClientError, Result};
use crate::storage::memory::MemoryStore;
use crate::storage::session::{MemorySessionStore, SessionStore};
use crate::storage::store::CacheEntry;

// =============================================================================
// Collaborators
// =============================================================================

/// Token refresher that counts calls and either stores a fixed token or fails.
pub struct CountingRefresher {
    calls: AtomicUsize,
    outcome: Mutex<Option<String>>,
    delay: Duration,
    session: Arc<dyn SessionStore>,
}

impl CountingRefresher {
    /// Refreshes succeed, storing `token` in `session`.
    #[must_use]
    pub fn succeeding(session: Arc<dyn SessionStore>, token: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Mutex::new(Some(token.to_string())),
            delay: Duration::from_millis(20),
            session,
        }
    }

    /// Refreshes always fail with [`ClientError::RefreshFailed`].
    #[must_use]
    pub fn failing(session: Arc<dyn SessionStore>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Mutex::new(None),
            delay: Duration::from_millis(20),
            session,
        }
    }

    /// How long each refresh takes before settling.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Switch between succeeding (`Some(token)`) and failing (`None`).
    pub fn set_outcome(&self, token: Option<&str>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = token.map(ToString::to_string);
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for CountingRefresher {
    fn refresh_access_token(&self) -> BoxFuture<'static, Result<()>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let session = Arc::clone(&self.session);
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            match outcome {
                Some(token) => session.set_access_token(&token),
                None => Err(ClientError::RefreshFailed {
                    reason: "refresh token rejected".to_string(),
                }),
            }
        }
        .boxed()
    }
}

/// Login redirect that only counts how often it was asked.
#[derive(Debug, Default)]
pub struct RecordingRedirect {
    count: AtomicUsize,
}

impl RecordingRedirect {
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl LoginRedirect for RecordingRedirect {
    fn redirect_to_login(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Factories
// =============================================================================

/// Settings tuned for tests: short cooldown, quick backoff, near-immediate
/// revalidation.
#[must_use]
pub fn fast_settings(base_url: &str) -> ClientSettings {
    ClientSettings {
        base_url: base_url.to_string(),
        request_timeout: Duration::from_secs(5),
        cooldown_window: Duration::from_millis(500),
        cooldown_grace: Duration::from_millis(100),
        revalidation_delay: Duration::from_millis(10),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        ..ClientSettings::default()
    }
}

/// A cache entry for `endpoint` written `age` ago.
#[must_use]
pub fn backdated_entry(
    endpoint: &str,
    params: Option<&QueryParams>,
    context: &Context,
    value: Value,
    ttl_seconds: u64,
    age: TimeDelta,
) -> CacheEntry {
    let key = build_key(endpoint, params, context);
    let mut entry = CacheEntry::new(key, value, ttl_seconds, context.clone());
    entry.written_at = Utc::now() - age;
    entry
}

/// A small `config.toml` exercising every section.
#[must_use]
pub fn sample_config_toml(base_url: &str) -> String {
    format!(
        r#"[api]
base_url = "{base_url}"
timeout_seconds = 5

[cache]
default_ttl_minutes = 5
cooldown_ms = 500
revalidation_delay_ms = 10

[retry]
max_attempts = 2
base_delay_ms = 10
max_delay_ms = 20

[output]
color = false
"#
    )
}

/// A temp directory holding `config.toml` from [`sample_config_toml`].
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created.
pub fn temp_config_dir(base_url: &str) -> std::io::Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let path = dir.path().join("config.toml");
    std::fs::write(&path, sample_config_toml(base_url))?;
    Ok((dir, path))
}

// =============================================================================
// Harness
// =============================================================================

/// An [`ApiClient`] wired to in-memory collaborators the test can inspect.
pub struct TestHarness {
    pub client: ApiClient,
    pub store: Arc<MemoryStore>,
    pub session: Arc<MemorySessionStore>,
    pub refresher: Arc<CountingRefresher>,
    pub redirect: Arc<RecordingRedirect>,
}

impl TestHarness {
    /// Harness against `base_url` with [`fast_settings`] and a refresher that
    /// stores `"refreshed-token"`.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built (bad base URL).
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self::with_settings(fast_settings(base_url), InvalidationRules::default())
    }

    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn with_settings(settings: ClientSettings, rules: InvalidationRules) -> Self {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(MemorySessionStore::new());
        let refresher = Arc::new(CountingRefresher::succeeding(
            session.clone(),
            "refreshed-token",
        ));
        let redirect = Arc::new(RecordingRedirect::default());
        let client = ApiClient::builder(settings)
            .store(store.clone())
            .session(session.clone())
            .refresher(refresher.clone())
            .redirect(redirect.clone())
            .invalidation_rules(rules)
            .build()
            .expect("test client should build");
        Self {
            client,
            store,
            session,
            refresher,
            redirect,
        }
    }

    /// Make every refresh fail from now on.
    pub fn fail_refreshes(&self) {
        self.refresher.set_outcome(None);
    }

    /// Store `token` as the current access token.
    ///
    /// # Panics
    ///
    /// Never for the in-memory session.
    pub fn sign_in(&self, token: &str) {
        self.session
            .set_access_token(token)
            .expect("memory session accepts tokens");
    }
}
