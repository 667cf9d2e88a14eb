//! Storage for configuration, cached responses and the session.

pub mod config;
pub mod memory;
pub mod paths;
pub mod session;
pub mod sqlite;
pub mod store;

pub use config::{
    Config, ConfigSource, ConfigSources, ENV_BASE_URL, ENV_CACHE_DB, ENV_CONFIG, ENV_FORMAT,
    ENV_NO_COLOR, ENV_NO_COLOR_STD, ENV_PRETTY, ENV_TIMEOUT, ENV_VERBOSE, ResolvedConfig,
};
pub use memory::MemoryStore;
pub use paths::AppPaths;
pub use session::{
    FileSessionStore, KeyringSessionStore, MemorySessionStore, SessionStore, token_expiry,
    token_fingerprint,
};
pub use sqlite::{SqliteStore, run_migrations};
pub use store::{CacheEntry, CacheStats, CacheStore, TagFilter};
