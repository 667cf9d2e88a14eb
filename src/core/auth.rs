//! Access-token refresh.
//!
//! [`TokenRefreshCoordinator`] keeps at most one refresh call outstanding:
//! every request that sees a 401 while a refresh is running waits on that
//! refresh and gets its outcome. A failed refresh tears the session down and
//! asks the UI to show the login screen.
//!
//! [`AuthFlow`] is the per-request state machine that bounds 401 handling to
//! a single retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::{Client, Url};
use serde_json::Value;

use super::http::{map_transport_error, parse_body, server_message, DEFAULT_TIMEOUT};
use crate::error::{ClientError, Result};
use crate::storage::session::{SessionStore, token_fingerprint};

/// Obtains a new access token.
///
/// Resolves on success (having stored the token), rejects on failure.
pub trait TokenRefresher: Send + Sync {
    fn refresh_access_token(&self) -> BoxFuture<'static, Result<()>>;
}

/// Sends the user to the login entry point.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

/// Default redirect for headless use: logs that sign-in is needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRedirect;

impl LoginRedirect for LogRedirect {
    fn redirect_to_login(&self) {
        tracing::warn!("session ended; sign in again to continue");
    }
}

// =============================================================================
// HTTP refresher
// =============================================================================

/// Refreshes by POSTing to the refresh endpoint; the refresh token rides in
/// the client's cookie jar.
#[derive(Clone)]
pub struct HttpTokenRefresher {
    client: Client,
    url: Url,
    session: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for HttpTokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenRefresher")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpTokenRefresher {
    #[must_use]
    pub fn new(client: Client, url: Url, session: Arc<dyn SessionStore>) -> Self {
        Self {
            client,
            url,
            session,
        }
    }

    async fn refresh(self) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .send()
            .await
            .map_err(|e| map_transport_error(&e, DEFAULT_TIMEOUT))?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_transport_error(&e, DEFAULT_TIMEOUT))?;
        let body = parse_body(&headers, &bytes);

        if !status.is_success() {
            return Err(ClientError::RefreshFailed {
                reason: server_message(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            });
        }

        let (token, user) = extract_token(&body).ok_or_else(|| ClientError::RefreshFailed {
            reason: "refresh response did not contain an access token".to_string(),
        })?;
        self.session.set_access_token(&token)?;
        if let Some(user) = user {
            self.session.set_cached_user(Some(user))?;
        }
        tracing::debug!(token = %token_fingerprint(&token), "stored refreshed access token");
        Ok(())
    }
}

impl TokenRefresher for HttpTokenRefresher {
    fn refresh_access_token(&self) -> BoxFuture<'static, Result<()>> {
        self.clone().refresh().boxed()
    }
}

/// Access token (and user record, if present) from a refresh response.
///
/// Accepts `access_token` or `accessToken`, at the top level or under `data`.
fn extract_token(body: &Value) -> Option<(String, Option<Value>)> {
    let scopes = [Some(body), body.get("data")];
    scopes.into_iter().flatten().find_map(|scope| {
        let token = scope
            .get("access_token")
            .or_else(|| scope.get("accessToken"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())?;
        let user = scope.get("user").filter(|u| u.is_object()).cloned();
        Some((token.to_string(), user))
    })
}

// =============================================================================
// Coordinator
// =============================================================================

/// Outcome of a refresh, shared by every waiter.
pub type RefreshOutcome = Shared<BoxFuture<'static, bool>>;

/// Single-flight token refresh.
pub struct TokenRefreshCoordinator {
    refresher: Arc<dyn TokenRefresher>,
    session: Arc<dyn SessionStore>,
    redirect: Arc<dyn LoginRedirect>,
    in_flight: Arc<Mutex<Option<RefreshOutcome>>>,
    refreshes: AtomicU64,
}

impl std::fmt::Debug for TokenRefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshCoordinator")
            .field("in_flight", &self.is_refreshing())
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

impl TokenRefreshCoordinator {
    #[must_use]
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        session: Arc<dyn SessionStore>,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Self {
        Self {
            refresher,
            session,
            redirect,
            in_flight: Arc::new(Mutex::new(None)),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Resolves `true` once a valid token is in place, `false` if the refresh
    /// failed (the session has then been cleared).
    ///
    /// Joins the refresh already in flight if there is one. Outside a tokio
    /// runtime this resolves `false` without refreshing.
    pub fn ensure_fresh_token(&self) -> RefreshOutcome {
        if tokio::runtime::Handle::try_current().is_err() {
            return futures::future::ready(false).boxed().shared();
        }

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(outcome) = in_flight.as_ref() {
            tracing::debug!("joining in-flight token refresh");
            return outcome.clone();
        }

        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let reset = RefreshReset {
            in_flight: Arc::clone(&self.in_flight),
        };
        let refresh = self.refresher.refresh_access_token();
        let session = Arc::clone(&self.session);
        let redirect = Arc::clone(&self.redirect);

        let handle = tokio::spawn(async move {
            let _reset = reset;
            tracing::info!("refreshing access token");
            match refresh.await {
                Ok(()) => {
                    tracing::info!("access token refreshed");
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, "token refresh failed, clearing session");
                    if let Err(e) = session.clear() {
                        tracing::warn!(error = %e, "failed to clear session");
                    }
                    redirect.redirect_to_login();
                    false
                }
            }
        });
        let outcome = async move { handle.await.unwrap_or(false) }.boxed().shared();
        *in_flight = Some(outcome.clone());
        outcome
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Refresh calls started so far.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

/// Clears the refresh slot when the refresh task ends, on any path.
struct RefreshReset {
    in_flight: Arc<Mutex<Option<RefreshOutcome>>>,
}

impl Drop for RefreshReset {
    fn drop(&mut self) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// =============================================================================
// Per-request 401 handling
// =============================================================================

/// Where a request is in its 401 handling.
///
/// ```text
/// Initial --401--> AwaitingRefresh --ok--> Retried --401--> Failed
///                                  --fail--------------------^
/// ```
///
/// Any non-401 response in `Initial` or `Retried` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    Initial,
    AwaitingRefresh,
    Retried,
    Failed,
}

impl AuthFlow {
    /// Transition on a response.
    #[must_use]
    pub const fn on_response(self, unauthorized: bool) -> Self {
        match (self, unauthorized) {
            (Self::Initial, true) => Self::AwaitingRefresh,
            (Self::Retried, true) => Self::Failed,
            (state, _) => state,
        }
    }

    /// Transition on a refresh outcome.
    #[must_use]
    pub const fn on_refresh(self, refreshed: bool) -> Self {
        match self {
            Self::AwaitingRefresh if refreshed => Self::Retried,
            Self::AwaitingRefresh => Self::Failed,
            state => state,
        }
    }

    /// True when the last response is the request's final answer.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Initial | Self::Retried)
    }

    /// The error for a request that ended in `Failed`.
    #[must_use]
    pub fn failure(previous: Self) -> ClientError {
        let reason = if matches!(previous, Self::Retried) {
            "request was still unauthorized after refreshing the session"
        } else {
            "session expired, please sign in again"
        };
        ClientError::AuthRequired {
            reason: reason.to_string(),
        }
    }
}
