//! In-flight request de-duplication (single-flight per cache key).
//!
//! [`RequestDeduplicator::run`] registers the pending request synchronously,
//! before the caller first awaits, so a second caller arriving at any later
//! point observes it. The work itself runs on a spawned task: it completes
//! even if every caller stops waiting, and the registration is removed when
//! the task finishes, whether it succeeded, failed or panicked.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use super::cache_key::CacheKey;
use crate::error::{ClientError, Result};

/// Future handed to every caller sharing one request.
pub type SharedRequest<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Pending<T: Clone> {
    id: u64,
    future: SharedRequest<T>,
    started_at: Instant,
}

type PendingMap<T> = Arc<Mutex<HashMap<CacheKey, Pending<T>>>>;

/// At most one in-flight request per key.
pub struct RequestDeduplicator<T: Clone> {
    pending: PendingMap<T>,
    next_id: AtomicU64,
    joins: AtomicU64,
}

impl<T: Clone> Default for RequestDeduplicator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            joins: AtomicU64::new(0),
        }
    }
}

impl<T: Clone> std::fmt::Debug for RequestDeduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("in_flight", &self.in_flight())
            .field("joins", &self.joins())
            .finish()
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the request pending for `key`, or start one with `factory`.
    ///
    /// Outside a tokio runtime the returned future fails immediately.
    pub fn run<F, Fut>(&self, key: &CacheKey, factory: F) -> SharedRequest<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if tokio::runtime::Handle::try_current().is_err() {
            return futures::future::ready(Err(ClientError::Internal(
                "no async runtime to run request on".to_string(),
            )))
            .boxed()
            .shared();
        }

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = pending.get(key) {
            self.joins.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                key = %key,
                age_ms = u64::try_from(existing.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                "joining in-flight request"
            );
            return existing.future.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cleanup = PendingCleanup {
            pending: Arc::clone(&self.pending),
            key: key.clone(),
            id,
        };
        let work = factory();
        let handle = tokio::spawn(async move {
            let _cleanup = cleanup;
            work.await
        });
        let future = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(ClientError::Internal(format!("request task failed: {e}"))))
        }
        .boxed()
        .shared();

        pending.insert(
            key.clone(),
            Pending {
                id,
                future: future.clone(),
                started_at: Instant::now(),
            },
        );
        future
    }

    /// The request pending for `key`, if any. Never starts one.
    #[must_use]
    pub fn join(&self, key: &CacheKey) -> Option<SharedRequest<T>> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.get(key).map(|p| {
            self.joins.fetch_add(1, Ordering::Relaxed);
            p.future.clone()
        })
    }

    #[must_use]
    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl<T: Clone> RequestDeduplicator<T> {
    /// Number of keys with a request in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forget every pending request so later callers start a new one.
    ///
    /// Detached requests still run to completion for the callers already
    /// waiting on them. Returns how many were detached.
    pub fn detach_all(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let detached = pending.len();
        pending.clear();
        detached
    }

    /// Callers that shared an existing request instead of starting one.
    #[must_use]
    pub fn joins(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }
}

/// Removes a key's registration when its task ends.
struct PendingCleanup<T: Clone> {
    pending: PendingMap<T>,
    key: CacheKey,
    id: u64,
}

impl<T: Clone> Drop for PendingCleanup<T> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(&self.key).is_some_and(|p| p.id == self.id) {
            pending.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::from_raw(name)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let dedupe = RequestDeduplicator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..5)
            .map(|_| {
                let calls = Arc::clone(&calls);
                dedupe.run(&key("/a"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(42)
                })
            })
            .collect();

        let results = futures::future::join_all(futures).await;
        assert!(results.iter().all(|r| r.as_ref().ok() == Some(&42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedupe.joins(), 4);
    }

    #[tokio::test]
    async fn registration_is_removed_after_success() {
        let dedupe = RequestDeduplicator::<u32>::new();
        let result = dedupe.run(&key("/a"), || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
        tokio::task::yield_now().await;
        assert_eq!(dedupe.in_flight(), 0);
    }

    #[tokio::test]
    async fn registration_is_removed_after_failure() {
        let dedupe = RequestDeduplicator::<u32>::new();
        let err = dedupe
            .run(&key("/a"), || async { Err(ClientError::http(500, None)) })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(500));
        tokio::task::yield_now().await;
        assert!(!dedupe.is_pending(&key("/a")));

        // The key is usable again.
        let ok = dedupe.run(&key("/a"), || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[tokio::test]
    async fn failure_is_shared_by_every_waiter() {
        let dedupe = RequestDeduplicator::<u32>::new();
        let first = dedupe.run(&key("/a"), || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(ClientError::http(503, Some("down".into())))
        });
        let second = dedupe.join(&key("/a")).expect("pending");
        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap_err(), b.unwrap_err());
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let dedupe = RequestDeduplicator::<&'static str>::new();
        let a = dedupe.run(&key("/a"), || async { Ok("a") });
        let b = dedupe.run(&key("/b"), || async { Ok("b") });
        assert_eq!(dedupe.in_flight(), 2);
        let (a, b) = tokio::join!(a, b);
        assert_eq!((a.unwrap(), b.unwrap()), ("a", "b"));
    }

    #[tokio::test]
    async fn detached_request_is_not_joined() {
        let dedupe = RequestDeduplicator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let start = |value: u32| {
            let calls = Arc::clone(&calls);
            dedupe.run(&key("/a"), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(value)
            })
        };

        let old = start(1);
        assert_eq!(dedupe.detach_all(), 1);
        assert!(dedupe.join(&key("/a")).is_none());
        let new = start(2);

        let (old, new) = tokio::join!(old, new);
        assert_eq!((old.unwrap(), new.unwrap()), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dedupe.joins(), 0);
        tokio::task::yield_now().await;
        assert_eq!(dedupe.in_flight(), 0);
    }

    #[tokio::test]
    async fn work_finishes_when_callers_drop() {
        let dedupe = RequestDeduplicator::<u32>::new();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        drop(dedupe.run(&key("/a"), move || async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            flag.store(1, Ordering::SeqCst);
            Ok(1)
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(dedupe.in_flight(), 0);
    }

    #[tokio::test]
    async fn panicking_work_is_reported_and_cleaned_up() {
        let dedupe = RequestDeduplicator::<u32>::new();
        let err = dedupe
            .run(&key("/a"), || async {
                let n: u32 = "not a number".parse().expect("boom");
                Ok(n)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Internal(_)));
        tokio::task::yield_now().await;
        assert_eq!(dedupe.in_flight(), 0);
    }
}
