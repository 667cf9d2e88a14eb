//! Wiring the client to on-disk collaborators.

use std::sync::Arc;

use crate::core::client::ApiClient;
use crate::error::Result;
use crate::storage::config::ResolvedConfig;
use crate::storage::session::{FileSessionStore, KeyringSessionStore, SessionStore};
use crate::storage::sqlite::SqliteStore;
use crate::storage::store::CacheStore;

/// A configured client plus the settings it was built from.
#[derive(Debug)]
pub struct App {
    pub config: ResolvedConfig,
    pub client: ApiClient,
}

impl App {
    /// Open the SQLite cache and the session store, then build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache database cannot be opened, the keyring
    /// is unavailable, or the base URL is invalid.
    pub fn open(config: ResolvedConfig) -> Result<Self> {
        let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::open(&config.cache_db)?);
        let session = open_session(&config)?;
        let client = ApiClient::builder(config.client_settings())
            .store(store)
            .session(session)
            .build()?;
        Ok(Self { config, client })
    }

    /// Human description of where the token lives.
    #[must_use]
    pub fn token_storage(&self) -> String {
        if self.config.use_keyring {
            "keyring".to_string()
        } else {
            self.config.session_file.display().to_string()
        }
    }
}

/// # Errors
///
/// Returns an error if the keyring is requested but unavailable.
pub fn open_session(config: &ResolvedConfig) -> Result<Arc<dyn SessionStore>> {
    if config.use_keyring {
        Ok(Arc::new(KeyringSessionStore::new()?))
    } else {
        Ok(Arc::new(FileSessionStore::new(config.session_file.clone())))
    }
}
