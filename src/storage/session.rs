//! Local session storage: the bearer access token and the cached user record.
//!
//! The refresh token never lives here; it travels as an HTTP-only cookie in
//! the transport's cookie jar.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ClientError, Result};

/// Keyring service name.
pub const KEYRING_SERVICE: &str = "edugate";
/// Keyring account holding the access token.
pub const KEYRING_TOKEN_ACCOUNT: &str = "access-token";

/// Where the client reads and writes its credentials.
pub trait SessionStore: Send + Sync {
    /// # Errors
    /// Returns an error if the backing storage cannot be read.
    fn access_token(&self) -> Result<Option<String>>;

    /// # Errors
    /// Returns an error if the backing storage cannot be written.
    fn set_access_token(&self, token: &str) -> Result<()>;

    /// # Errors
    /// Returns an error if the backing storage cannot be read.
    fn cached_user(&self) -> Result<Option<Value>>;

    /// # Errors
    /// Returns an error if the backing storage cannot be written.
    fn set_cached_user(&self, user: Option<Value>) -> Result<()>;

    /// Remove the access token and the cached user record.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be written.
    fn clear(&self) -> Result<()>;
}

/// Serialized session contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Memory
// =============================================================================

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    data: Mutex<SessionData>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            data: Mutex::new(SessionData {
                access_token: Some(token.into()),
                user: None,
                updated_at: Some(Utc::now()),
            }),
        }
    }

    fn update(&self, f: impl FnOnce(&mut SessionData)) {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut data);
        data.updated_at = Some(Utc::now());
    }
}

impl SessionStore for MemorySessionStore {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .clone())
    }

    fn set_access_token(&self, token: &str) -> Result<()> {
        self.update(|data| data.access_token = Some(token.to_string()));
        Ok(())
    }

    fn cached_user(&self) -> Result<Option<Value>> {
        Ok(self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .user
            .clone())
    }

    fn set_cached_user(&self, user: Option<Value>) -> Result<()> {
        self.update(|data| data.user = user);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = SessionData::default();
        Ok(())
    }
}

// =============================================================================
// File
// =============================================================================

/// JSON session file, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<SessionData> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ClientError::Session(format!("corrupt session file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionData::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn modify(&self, f: impl FnOnce(&mut SessionData)) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut data = self.load().unwrap_or_default();
        f(&mut data);
        data.updated_at = Some(Utc::now());
        write_atomic(&self.path, &serde_json::to_vec_pretty(&data)?)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.load()?.access_token)
    }

    fn set_access_token(&self, token: &str) -> Result<()> {
        self.modify(|data| data.access_token = Some(token.to_string()))
    }

    fn cached_user(&self) -> Result<Option<Value>> {
        Ok(self.load()?.user)
    }

    fn set_cached_user(&self, user: Option<Value>) -> Result<()> {
        self.modify(|data| data.user = user)
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write bytes via temp file + rename so readers never see a torn file.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("session"),
        std::process::id()
    ));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)
}

// =============================================================================
// Keyring
// =============================================================================

/// Token in the OS keyring; user record in memory only.
pub struct KeyringSessionStore {
    entry: keyring::Entry,
    user: Mutex<Option<Value>>,
}

impl KeyringSessionStore {
    /// # Errors
    /// Returns an error if the platform keyring is unavailable.
    pub fn new() -> Result<Self> {
        Ok(Self {
            entry: keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_ACCOUNT)?,
            user: Mutex::new(None),
        })
    }
}

impl std::fmt::Debug for KeyringSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringSessionStore")
            .field("service", &KEYRING_SERVICE)
            .finish_non_exhaustive()
    }
}

impl SessionStore for KeyringSessionStore {
    fn access_token(&self) -> Result<Option<String>> {
        match self.entry.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_access_token(&self, token: &str) -> Result<()> {
        Ok(self.entry.set_password(token)?)
    }

    fn cached_user(&self) -> Result<Option<Value>> {
        Ok(self.user.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn set_cached_user(&self, user: Option<Value>) -> Result<()> {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = user;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = None;
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Token helpers
// =============================================================================

/// Expiry (`exp` claim) of a JWT access token, if it has one.
///
/// The signature is not verified; this is only for display.
#[must_use]
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

/// Short stable identifier for a token, safe to log.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn jwt_with(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn memory_store_clear_removes_everything() {
        let store = MemorySessionStore::with_token("abc");
        store.set_cached_user(Some(json!({"id": "U1"}))).unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("abc"));

        store.clear().unwrap();
        assert!(store.access_token().unwrap().is_none());
        assert!(store.cached_user().unwrap().is_none());
    }

    #[test]
    fn file_store_persists_and_clears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("session.json");
        let store = FileSessionStore::new(&path);
        assert!(store.access_token().unwrap().is_none());

        store.set_access_token("tok-1").unwrap();
        store.set_cached_user(Some(json!({"id": "U1"}))).unwrap();

        let reopened = FileSessionStore::new(&path);
        assert_eq!(reopened.access_token().unwrap().as_deref(), Some("tok-1"));
        assert_eq!(reopened.cached_user().unwrap(), Some(json!({"id": "U1"})));

        reopened.clear().unwrap();
        assert!(!path.exists());
        reopened.clear().unwrap();
    }

    #[test]
    fn file_store_reports_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        let err = FileSessionStore::new(&path).access_token().unwrap_err();
        assert!(matches!(err, ClientError::Session(_)));
    }

    #[test]
    fn token_expiry_reads_exp_claim() {
        let token = jwt_with(&json!({"sub": "U1", "exp": 1_900_000_000}));
        let exp = token_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_900_000_000);
    }

    #[test]
    fn token_expiry_handles_opaque_tokens() {
        assert!(token_expiry("opaque-token").is_none());
        assert!(token_expiry("a.!!!.c").is_none());
        assert!(token_expiry(&jwt_with(&json!({"sub": "U1"}))).is_none());
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = token_fingerprint("secret");
        assert_eq!(a.len(), 12);
        assert_eq!(a, token_fingerprint("secret"));
        assert_ne!(a, token_fingerprint("secret2"));
        assert!(!a.contains("secret"));
    }
}
