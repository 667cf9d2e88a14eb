//! Request pipeline: keys, caching reads, writes, auth and throttling.

pub mod auth;
pub mod cache_key;
pub mod client;
pub mod context;
pub mod cooldown;
pub mod dedupe;
pub mod http;
pub mod invalidation;
pub mod logging;
pub mod mutation;

pub use auth::{
    AuthFlow, HttpTokenRefresher, LogRedirect, LoginRedirect, TokenRefreshCoordinator,
    TokenRefresher,
};
pub use cache_key::{CacheKey, build_key};
pub use client::{ApiClient, ApiClientBuilder, ClientSettings, GetOptions, MetricsSnapshot};
pub use context::{Context, ContextField, QueryParams, Scalar};
pub use cooldown::CooldownThrottle;
pub use dedupe::RequestDeduplicator;
pub use http::{ApiRequest, HttpResponse, RetryPolicy, Transport};
pub use invalidation::{InvalidationRule, InvalidationRules, InvalidationScope, InvalidationTarget};
pub use mutation::{FilePart, FileSource, MultipartBody, RequestBody};
