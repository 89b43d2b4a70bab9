// ── Query cache ──
//
// Key/value store of query results with watch-channel subscriptions.
// Concurrent fetches of one key share a single in-flight future; a fetch
// can be cancelled, which aborts the transport call and puts the entry back
// to the state it had before the fetch started.

mod infinite;
mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub use infinite::{FetchStatus, InfiniteData, InfiniteState};
pub use state::{QueryData, QueryOptions, QueryState};

pub(crate) use infinite::InfiniteEntry;

use crate::controller::MethodFuture;
use crate::error::{CoreError, SharedError};
use crate::query_key::QueryKey;

/// Produces one attempt of a query. The token is cancelled when the cache
/// discards the fetch and must reach the transport.
pub type Fetcher = Arc<dyn Fn(CancellationToken) -> MethodFuture + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, SharedError>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Entries ──────────────────────────────────────────────────────────

struct InFlight {
    id: u64,
    future: SharedFetch,
    cancel: CancellationToken,
    previous: QueryState,
}

struct QueryEntry {
    state: watch::Sender<QueryState>,
    in_flight: Mutex<Option<InFlight>>,
}

impl QueryEntry {
    fn new() -> Self {
        let (state, _) = watch::channel(QueryState::Created);
        Self {
            state,
            in_flight: Mutex::new(None),
        }
    }

    /// Nothing subscribes to the entry and no fetch is running.
    fn is_unused(self: &Arc<Self>) -> bool {
        Arc::strong_count(self) == 1
            && self.state.receiver_count() == 0
            && lock(&self.in_flight).is_none()
    }

    fn fresh_data(&self, stale_time: Duration) -> Option<Value> {
        match &*self.state.borrow() {
            QueryState::Loaded(data) if data.age() < stale_time => Some(data.data.clone()),
            _ => None,
        }
    }

    /// Abort the in-flight fetch, restoring the state it replaced.
    fn cancel(&self) -> bool {
        let Some(in_flight) = lock(&self.in_flight).take() else {
            return false;
        };
        in_flight.cancel.cancel();
        self.state.send_replace(in_flight.previous);
        true
    }

    /// Record the outcome of fetch `id`. Outcomes of fetches that were
    /// cancelled or superseded leave the state alone.
    fn settle(
        &self,
        id: u64,
        key: &QueryKey,
        outcome: Result<Value, CoreError>,
    ) -> Result<Value, SharedError> {
        let previous = {
            let mut slot = lock(&self.in_flight);
            if slot.as_ref().is_some_and(|f| f.id == id) {
                slot.take().map(|f| f.previous)
            } else {
                None
            }
        };
        let current = previous.is_some();

        match outcome {
            Ok(value) => {
                if current {
                    self.state
                        .send_replace(QueryState::Loaded(QueryData::new(value.clone())));
                }
                trace!(key = %key, "query loaded");
                Ok(value)
            }
            Err(e) => {
                let error = Arc::new(e);
                match previous {
                    Some(previous) if error.is_cancelled() => {
                        self.state.send_replace(previous);
                    }
                    Some(_) => {
                        let data = self.state.borrow().query_data().cloned();
                        self.state.send_replace(QueryState::Failed {
                            error: Arc::clone(&error),
                            data,
                        });
                    }
                    None => {}
                }
                debug!(key = %key, error = %error, "query failed");
                Err(error)
            }
        }
    }
}

// ── QueryCache ───────────────────────────────────────────────────────

#[derive(Default)]
struct CacheInner {
    queries: DashMap<QueryKey, Arc<QueryEntry>>,
    infinite: DashMap<QueryKey, Arc<InfiniteEntry>>,
    next_fetch_id: AtomicU64,
}

/// Shared query cache. Cheap to clone; clones share storage.
#[derive(Clone, Default)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &QueryKey) -> Arc<QueryEntry> {
        let entry = self
            .inner
            .queries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(QueryEntry::new()));
        Arc::clone(entry.value())
    }

    fn existing(&self, key: &QueryKey) -> Option<Arc<QueryEntry>> {
        self.inner.queries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Return fresh cached data, or run `fetcher` (joining a fetch already
    /// in flight for `key`).
    pub async fn fetch(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: Fetcher,
    ) -> Result<Value, SharedError> {
        self.fetch_inner(key, options, fetcher, false).await
    }

    /// Like [`fetch`](Self::fetch) but ignores `stale_time`.
    pub async fn refetch(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: Fetcher,
    ) -> Result<Value, SharedError> {
        self.fetch_inner(key, options, fetcher, true).await
    }

    async fn fetch_inner(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: Fetcher,
        force: bool,
    ) -> Result<Value, SharedError> {
        if !options.enabled {
            return Err(Arc::new(CoreError::QueryDisabled {
                key: key.to_string(),
            }));
        }
        let entry = self.entry(key);
        if !force {
            if let Some(data) = entry.fresh_data(options.stale_time) {
                trace!(key = %key, "serving fresh data");
                return Ok(data);
            }
        }
        self.join_or_start(key, &entry, options, fetcher).await
    }

    fn join_or_start(
        &self,
        key: &QueryKey,
        entry: &Arc<QueryEntry>,
        options: &QueryOptions,
        fetcher: Fetcher,
    ) -> SharedFetch {
        let mut slot = lock(&entry.in_flight);
        if let Some(in_flight) = slot.as_ref() {
            trace!(key = %key, "joining in-flight fetch");
            return in_flight.future.clone();
        }

        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let previous = entry.state.borrow().clone();
        entry.state.send_replace(previous.to_pending());
        debug!(key = %key, "fetching query");

        let task_entry = Arc::clone(entry);
        let task_key = key.clone();
        let task_cancel = cancel.clone();
        let retry = options.retry;
        let retry_delay = options.retry_delay;
        let future = async move {
            let outcome = with_retry(
                || fetcher(task_cancel.clone()),
                retry,
                retry_delay,
                &task_cancel,
            )
            .await;
            task_entry.settle(id, &task_key, outcome)
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            future: future.clone(),
            cancel,
            previous,
        });
        future
    }

    pub fn state(&self, key: &QueryKey) -> QueryState {
        self.existing(key)
            .map(|e| e.state.borrow().clone())
            .unwrap_or_default()
    }

    pub fn get_data(&self, key: &QueryKey) -> Option<Value> {
        self.existing(key)
            .and_then(|e| e.state.borrow().data().cloned())
    }

    /// Store `data` as freshly loaded.
    pub fn set_data(&self, key: &QueryKey, data: Value) {
        self.entry(key)
            .state
            .send_replace(QueryState::Loaded(QueryData::new(data)));
    }

    pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<QueryState> {
        self.entry(key).state.subscribe()
    }

    pub fn stream(&self, key: &QueryKey) -> WatchStream<QueryState> {
        WatchStream::new(self.subscribe(key))
    }

    /// Abort the in-flight fetch for `key`. Returns whether one was running.
    pub fn cancel(&self, key: &QueryKey) -> bool {
        let cancelled = self.existing(key).is_some_and(|e| e.cancel());
        if cancelled {
            debug!(key = %key, "query cancelled");
        }
        cancelled
    }

    /// Cancel and forget `key`.
    pub fn remove(&self, key: &QueryKey) {
        if let Some((_, entry)) = self.inner.queries.remove(key) {
            entry.cancel();
        }
    }

    /// Mark every loaded entry whose key starts with `prefix` invalid, so
    /// its next `fetch` reloads. Returns how many entries changed.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut changed = 0;
        for item in &self.inner.queries {
            if !item.key().starts_with(prefix) {
                continue;
            }
            let modified = item.value().state.send_if_modified(|state| {
                match std::mem::take(state) {
                    QueryState::Loaded(data) => {
                        *state = QueryState::Invalid(data);
                        true
                    }
                    other => {
                        *state = other;
                        false
                    }
                }
            });
            changed += usize::from(modified);
        }
        for item in &self.inner.infinite {
            if item.key().starts_with(prefix) && item.value().invalidate() {
                changed += 1;
            }
        }
        debug!(prefix = %prefix, changed, "invalidated queries");
        changed
    }

    /// Cancel everything and drop all entries.
    pub fn clear(&self) {
        for item in &self.inner.queries {
            item.value().cancel();
        }
        for item in &self.inner.infinite {
            item.value().cancel();
        }
        self.inner.queries.clear();
        self.inner.infinite.clear();
    }

    /// Drop every entry that has no subscriber, no fetch in flight and no
    /// live paged-query handle. Returns how many entries were dropped.
    pub fn evict_unused(&self) -> usize {
        let before = self.inner.queries.len() + self.inner.infinite.len();
        self.inner.queries.retain(|_, entry| !entry.is_unused());
        self.inner.infinite.retain(|_, entry| !entry.is_unused());
        let evicted = before - (self.inner.queries.len() + self.inner.infinite.len());
        debug!(evicted, "evicted unused queries");
        evicted
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner
            .queries
            .iter()
            .map(|item| item.key().clone())
            .chain(self.inner.infinite.iter().map(|item| item.key().clone()))
            .collect()
    }

    // ── Paged entries ────────────────────────────────────────────────

    pub(crate) fn infinite_entry(&self, key: &QueryKey) -> Arc<InfiniteEntry> {
        let entry = self
            .inner
            .infinite
            .entry(key.clone())
            .or_insert_with(|| Arc::new(InfiniteEntry::new()));
        Arc::clone(entry.value())
    }

    pub fn infinite_state(&self, key: &QueryKey) -> InfiniteState {
        self.inner
            .infinite
            .get(key)
            .map(|e| e.value().state())
            .unwrap_or_default()
    }

    pub fn subscribe_infinite(&self, key: &QueryKey) -> watch::Receiver<InfiniteState> {
        self.infinite_entry(key).subscribe()
    }

    pub fn cancel_infinite(&self, key: &QueryKey) -> bool {
        self.inner
            .infinite
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .is_some_and(|e| e.cancel())
    }

    pub fn remove_infinite(&self, key: &QueryKey) {
        if let Some((_, entry)) = self.inner.infinite.remove(key) {
            entry.cancel();
        }
    }
}

/// Run `attempt` until it succeeds, fails `retry + 1` times, or `cancel`
/// fires. Cancellation is never retried.
pub(crate) async fn with_retry<F>(
    mut attempt: F,
    retry: u32,
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> Result<Value, CoreError>
where
    F: FnMut() -> MethodFuture,
{
    let mut failures: u32 = 0;
    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            result = attempt() => result,
        };
        match result {
            Err(e) if !e.is_cancelled() && failures < retry => {
                failures += 1;
                warn!(error = %e, failures, "attempt failed, retrying");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(CoreError::Cancelled),
                    () = tokio::time::sleep(retry_delay) => {}
                }
            }
            other => return other,
        }
    }
}
