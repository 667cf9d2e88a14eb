//! Cached fetch orchestrator.
//!
//! [`ApiClient`] owns every piece of coordination state (pending requests,
//! cooldown records, refresh state) so that each instance is isolated. It is
//! a cheap handle; clones share the same state.
//!
//! Read path for [`ApiClient::get`]:
//!
//! 1. Build the cache key.
//! 2. In cooldown (and not forced): serve a cache entry up to
//!    `ttl × cooldown_stale_factor` old, else join a request already in
//!    flight, else fail with [`ClientError::Cooldown`]. Never fetch.
//! 3. Not forced: serve a fresh entry, scheduling a background revalidation
//!    if stale-while-revalidate was requested.
//! 4. Otherwise mark the attempt and fetch through the deduplicator,
//!    handling a 401 with one refresh and one retry, then write the cache.
//!
//! A successful write bumps the write generation, detaches pending reads and
//! clears cooldowns before invalidating. A fetch that started before the
//! write returns its body to its callers but does not cache it.

use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::auth::{
    AuthFlow, HttpTokenRefresher, LogRedirect, LoginRedirect, TokenRefreshCoordinator,
    TokenRefresher,
};
use super::cache_key::{CacheKey, build_key, endpoint_prefix};
use super::context::{Context, QueryParams};
use super::cooldown::{CooldownThrottle, DEFAULT_COOLDOWN_GRACE, DEFAULT_COOLDOWN_WINDOW};
use super::dedupe::RequestDeduplicator;
use super::http::{ApiRequest, DEFAULT_TIMEOUT, RetryPolicy, Transport, build_client, default_user_agent};
use super::invalidation::InvalidationRules;
use crate::error::{ClientError, Result};
use crate::storage::memory::MemoryStore;
use crate::storage::session::{MemorySessionStore, SessionStore};
use crate::storage::store::{CacheEntry, CacheStats, CacheStore};

/// Default cache TTL for reads.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Default widening of the accepted cache age while in cooldown.
pub const DEFAULT_COOLDOWN_STALE_FACTOR: f64 = 2.0;
/// Default debounce before a background revalidation runs.
pub const DEFAULT_REVALIDATION_DELAY: Duration = Duration::from_millis(100);
/// Default path of the token refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

// =============================================================================
// Settings
// =============================================================================

/// Tunables for an [`ApiClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub default_ttl: Duration,
    pub cooldown_window: Duration,
    pub cooldown_grace: Duration,
    /// Multiplier on the TTL for cache reads made during cooldown.
    pub cooldown_stale_factor: f64,
    pub revalidation_delay: Duration,
    /// Backoff for [`ApiClient::get_uncached`].
    pub retry: RetryPolicy,
    pub refresh_path: String,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            default_ttl: DEFAULT_TTL,
            cooldown_window: DEFAULT_COOLDOWN_WINDOW,
            cooldown_grace: DEFAULT_COOLDOWN_GRACE,
            cooldown_stale_factor: DEFAULT_COOLDOWN_STALE_FACTOR,
            revalidation_delay: DEFAULT_REVALIDATION_DELAY,
            retry: RetryPolicy::default(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Largest cache age accepted while a key is in cooldown.
    #[must_use]
    pub fn relaxed_max_age(&self, ttl: Duration) -> Duration {
        let factor = if self.cooldown_stale_factor.is_finite() {
            self.cooldown_stale_factor.max(1.0)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(ttl.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

/// Per-call read options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Cache TTL; the client default when `None`.
    pub ttl: Option<Duration>,
    /// Skip the cache and the cooldown check.
    pub force_refresh: bool,
    /// Serve a fresh cache hit and refresh it in the background.
    pub stale_while_revalidate: bool,
    pub context: Context,
}

impl GetOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub const fn ttl_minutes(self, minutes: u64) -> Self {
        self.ttl(Duration::from_secs(minutes * 60))
    }

    #[must_use]
    pub const fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    #[must_use]
    pub const fn stale_while_revalidate(mut self) -> Self {
        self.stale_while_revalidate = true;
        self
    }

    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Counters for one client.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    pub cache_hits: AtomicU64,
    pub stale_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub network_requests: AtomicU64,
    pub cooldown_rejections: AtomicU64,
    pub revalidations: AtomicU64,
    pub invalidated_entries: AtomicU64,
    pub cache_write_failures: AtomicU64,
}

/// Point-in-time copy of [`ClientMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub stale_hits: u64,
    pub cache_misses: u64,
    pub network_requests: u64,
    pub dedup_joins: u64,
    pub cooldown_rejections: u64,
    pub revalidations: u64,
    pub token_refreshes: u64,
    pub invalidated_entries: u64,
    pub cache_write_failures: u64,
}

impl ClientMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Client
// =============================================================================

pub(crate) struct ClientInner {
    pub(crate) settings: ClientSettings,
    pub(crate) transport: Transport,
    pub(crate) store: Arc<dyn CacheStore>,
    pub(crate) dedupe: RequestDeduplicator<Value>,
    pub(crate) cooldown: CooldownThrottle,
    pub(crate) auth: TokenRefreshCoordinator,
    pub(crate) rules: InvalidationRules,
    pub(crate) metrics: ClientMetrics,
    /// Bumped by every successful write. Held while invalidating and while a
    /// fetch writes the cache; a fetch that started under an older value
    /// does not write.
    pub(crate) write_generation: Mutex<u64>,
}

/// Caching, request-coordinating API client.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.settings.base_url)
            .field("in_flight", &self.inner.dedupe.in_flight())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    #[must_use]
    pub fn builder(settings: ClientSettings) -> ApiClientBuilder {
        ApiClientBuilder::new(settings)
    }

    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn session(&self) -> &Arc<dyn SessionStore> {
        self.inner.transport.session()
    }

    /// Typed cached read.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, [`ClientError::Cooldown`], or
    /// [`ClientError::ParseResponse`] if the body does not fit `T`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Option<&QueryParams>,
        options: &GetOptions,
    ) -> Result<T> {
        let value = self.get_value(endpoint, params, options).await?;
        serde_json::from_value(value).map_err(|e| ClientError::ParseResponse(e.to_string()))
    }

    /// Cached read returning raw JSON.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, or [`ClientError::Cooldown`] when the key is
    /// cooling down with nothing cached or in flight.
    pub async fn get_value(
        &self,
        endpoint: &str,
        params: Option<&QueryParams>,
        options: &GetOptions,
    ) -> Result<Value> {
        let inner = &self.inner;
        let key = build_key(endpoint, params, &options.context);
        let ttl = options.ttl.unwrap_or(inner.settings.default_ttl);

        if !options.force_refresh && inner.cooldown.is_in_cooldown(&key) {
            if let Some(value) = self.read_cache(&key, inner.settings.relaxed_max_age(ttl)) {
                tracing::debug!(%key, "cooldown: served from cache");
                ClientMetrics::bump(&inner.metrics.stale_hits);
                return Ok(value);
            }
            if let Some(pending) = inner.dedupe.join(&key) {
                tracing::debug!(%key, "cooldown: joined in-flight request");
                return pending.await;
            }
            tracing::debug!(%key, "cooldown: nothing cached, refusing to fetch");
            ClientMetrics::bump(&inner.metrics.cooldown_rejections);
            return Err(ClientError::Cooldown {
                endpoint: endpoint.to_string(),
            });
        }

        if !options.force_refresh {
            if let Some(value) = self.read_cache(&key, ttl) {
                tracing::debug!(%key, "cache hit");
                ClientMetrics::bump(&inner.metrics.cache_hits);
                if options.stale_while_revalidate {
                    self.schedule_revalidation(
                        key,
                        ApiRequest::get(endpoint, params.cloned()),
                        ttl,
                        options.context.clone(),
                    );
                }
                return Ok(value);
            }
            tracing::debug!(%key, "cache miss");
            ClientMetrics::bump(&inner.metrics.cache_misses);
        }

        inner.cooldown.mark_attempt(&key);
        let client = self.clone();
        let request = ApiRequest::get(endpoint, params.cloned());
        let context = options.context.clone();
        let cache_key = key.clone();
        inner
            .dedupe
            .run(&key, move || async move {
                client.fetch_and_store(cache_key, request, ttl, context).await
            })
            .await
    }

    /// Plain read: no cache, bounded backoff on transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or immediately for
    /// non-transient errors.
    pub async fn get_uncached<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Option<&QueryParams>,
    ) -> Result<T> {
        let request = ApiRequest::get(endpoint, params.cloned());
        let value = self
            .inner
            .settings
            .retry
            .run(|| self.execute(&request))
            .await?;
        serde_json::from_value(value).map_err(|e| ClientError::ParseResponse(e.to_string()))
    }

    /// Send `request`, handling a 401 with one refresh and one retry.
    pub(crate) async fn execute(&self, request: &ApiRequest) -> Result<Value> {
        let inner = &self.inner;
        let mut flow = AuthFlow::Initial;
        loop {
            ClientMetrics::bump(&inner.metrics.network_requests);
            let response = inner.transport.send(request).await?;

            match flow.on_response(response.is_unauthorized()) {
                next if next.is_settled() => return response.into_result(),
                AuthFlow::AwaitingRefresh => {
                    tracing::debug!(endpoint = %request.endpoint, "401, waiting for token refresh");
                    let refreshed = inner.auth.ensure_fresh_token().await;
                    flow = AuthFlow::AwaitingRefresh.on_refresh(refreshed);
                    if flow == AuthFlow::Failed {
                        return Err(AuthFlow::failure(AuthFlow::AwaitingRefresh));
                    }
                    tracing::debug!(endpoint = %request.endpoint, "retrying with refreshed token");
                }
                // A 401 on the retry.
                _ => return Err(AuthFlow::failure(flow)),
            }
        }
    }

    async fn fetch_and_store(
        &self,
        key: CacheKey,
        request: ApiRequest,
        ttl: Duration,
        context: Context,
    ) -> Result<Value> {
        let generation = self.write_generation();
        let value = self.execute(&request).await?;

        let current = self
            .inner
            .write_generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != generation {
            tracing::debug!(%key, "write landed during fetch, not caching response");
            return Ok(value);
        }
        let entry = CacheEntry::new(key, value.clone(), ttl.as_secs(), context);
        if let Err(e) = self.inner.store.set(entry) {
            ClientMetrics::bump(&self.inner.metrics.cache_write_failures);
            tracing::warn!(endpoint = %request.endpoint, error = %e, "cache write failed");
        }
        drop(current);
        Ok(value)
    }

    pub(crate) fn write_generation(&self) -> u64 {
        *self
            .inner
            .write_generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_cache(&self, key: &CacheKey, max_age: Duration) -> Option<Value> {
        match self.inner.store.get(key) {
            Ok(Some(entry)) if entry.is_within(max_age, Utc::now()) => Some(entry.value),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(%key, error = %e, "cache read failed");
                None
            }
        }
    }

    /// Refresh `key` in the background after the revalidation delay.
    ///
    /// Runs through the deduplicator; errors are logged and dropped.
    fn schedule_revalidation(&self, key: CacheKey, request: ApiRequest, ttl: Duration, context: Context) {
        let client = self.clone();
        let delay = self.inner.settings.revalidation_delay;
        ClientMetrics::bump(&self.inner.metrics.revalidations);
        tracing::debug!(%key, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "scheduling revalidation");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let endpoint = request.endpoint.clone();
            let worker = client.clone();
            let cache_key = key.clone();
            let result = client
                .inner
                .dedupe
                .run(&key, move || async move {
                    worker.fetch_and_store(cache_key, request, ttl, context).await
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(%endpoint, error = %e, "background revalidation failed");
            }
        });
    }

    // -------------------------------------------------------------------------
    // Cache management
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn clear_user_cache(&self, user_id: &str) -> Result<u64> {
        let removed = self.inner.store.clear_user_cache(user_id)?;
        tracing::info!(user_id, removed, "cleared user cache");
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn clear_institute_cache(&self, institute_id: &str) -> Result<u64> {
        let removed = self.inner.store.clear_institute_cache(institute_id)?;
        tracing::info!(institute_id, removed, "cleared institute cache");
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn clear_all_cache(&self) -> Result<u64> {
        let removed = self.inner.store.clear_all_cache()?;
        tracing::info!(removed, "cleared cache");
        Ok(removed)
    }

    /// Drop every cached read of `endpoint`, whatever its params or context.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> Result<u64> {
        self.inner.store.remove_prefix(&endpoint_prefix(endpoint))
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.inner.store.stats()
    }

    /// Clear the local session and, when known, that user's cached reads.
    ///
    /// The user is `user_id` if given, else the id of the cached user record.
    ///
    /// # Errors
    ///
    /// Returns an error if the session or store cannot be cleared.
    pub fn logout(&self, user_id: Option<&str>) -> Result<()> {
        let session = self.session();
        let user_id = user_id.map(ToString::to_string).or_else(|| {
            session
                .cached_user()
                .ok()
                .flatten()
                .and_then(|user| cached_user_id(&user))
        });
        session.clear()?;
        if let Some(user_id) = user_id {
            self.clear_user_cache(&user_id)?;
        }
        tracing::info!("logged out");
        Ok(())
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        let m = &self.inner.metrics;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            cache_hits: load(&m.cache_hits),
            stale_hits: load(&m.stale_hits),
            cache_misses: load(&m.cache_misses),
            network_requests: load(&m.network_requests),
            dedup_joins: self.inner.dedupe.joins(),
            cooldown_rejections: load(&m.cooldown_rejections),
            revalidations: load(&m.revalidations),
            token_refreshes: self.inner.auth.refresh_count(),
            invalidated_entries: load(&m.invalidated_entries),
            cache_write_failures: load(&m.cache_write_failures),
        }
    }

    /// Requests currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.dedupe.in_flight()
    }
}

fn cached_user_id(user: &Value) -> Option<String> {
    ["id", "_id", "userId"]
        .iter()
        .find_map(|field| match user.get(*field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

// =============================================================================
// Builder
// =============================================================================

/// Wires an [`ApiClient`] to its collaborators. Anything not supplied gets an
/// in-memory or HTTP default.
#[must_use]
pub struct ApiClientBuilder {
    settings: ClientSettings,
    http: Option<reqwest::Client>,
    store: Option<Arc<dyn CacheStore>>,
    session: Option<Arc<dyn SessionStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    redirect: Option<Arc<dyn LoginRedirect>>,
    rules: Option<InvalidationRules>,
}

impl ApiClientBuilder {
    pub const fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            http: None,
            store: None,
            session: None,
            refresher: None,
            redirect: None,
            rules: None,
        }
    }

    /// Use an existing `reqwest` client (its cookie jar is shared).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session(mut self, session: Arc<dyn SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
        self.redirect = Some(redirect);
        self
    }

    pub fn invalidation_rules(mut self, rules: InvalidationRules) -> Self {
        self.rules = Some(rules);
        self
    }

    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn build(self) -> Result<ApiClient> {
        let settings = self.settings;
        let http = match self.http {
            Some(client) => client,
            None => build_client(settings.request_timeout, &settings.user_agent)?,
        };
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));
        let transport = Transport::new(
            http.clone(),
            &settings.base_url,
            Arc::clone(&session),
            settings.request_timeout,
        )?;
        let refresher = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(HttpTokenRefresher::new(
                http,
                transport.url_for(&settings.refresh_path, None)?,
                Arc::clone(&session),
            )),
        };
        let redirect = self.redirect.unwrap_or_else(|| Arc::new(LogRedirect));

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                cooldown: CooldownThrottle::new(settings.cooldown_window, settings.cooldown_grace),
                auth: TokenRefreshCoordinator::new(refresher, Arc::clone(&session), redirect),
                store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                dedupe: RequestDeduplicator::new(),
                rules: self.rules.unwrap_or_default(),
                metrics: ClientMetrics::default(),
                write_generation: Mutex::new(0),
                transport,
                settings,
            }),
        })
    }
}
