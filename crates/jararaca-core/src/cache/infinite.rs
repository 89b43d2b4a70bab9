// Storage for paged queries. The page-advance policy lives with the hook;
// the entry only holds pages and cursors, a lock serializing page fetches,
// and the cancellation token of the current fetch generation.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{MutexGuard, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, SharedError};

/// Pages fetched so far and the cursor each was fetched with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfiniteData {
    pub pages: Vec<Value>,
    pub page_params: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchStatus {
    #[default]
    Idle,
    /// Fetching the first page, or refetching every page.
    Fetching,
    FetchingNextPage,
}

#[derive(Debug, Clone, Default)]
pub struct InfiniteState {
    pub data: InfiniteData,
    /// Cursor for the next page; `None` once exhausted.
    pub next_page_param: Option<Value>,
    pub fetch_status: FetchStatus,
    pub error: Option<SharedError>,
    pub updated_at: Option<Instant>,
    /// Set by invalidation; the next `fetch` refetches every page.
    pub invalid: bool,
}

impl InfiniteState {
    pub fn has_next_page(&self) -> bool {
        !self.data.pages.is_empty() && self.next_page_param.is_some()
    }

    pub fn page_count(&self) -> usize {
        self.data.pages.len()
    }

    pub fn error(&self) -> Option<&CoreError> {
        self.error.as_deref()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status != FetchStatus::Idle
    }
}

pub(crate) struct InfiniteEntry {
    state: watch::Sender<InfiniteState>,
    fetch_lock: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
}

impl InfiniteEntry {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(InfiniteState::default());
        Self {
            state,
            fetch_lock: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub(crate) fn state(&self) -> InfiniteState {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<InfiniteState> {
        self.state.subscribe()
    }

    pub(crate) fn update(&self, modify: impl FnOnce(&mut InfiniteState)) {
        self.state.send_modify(modify);
    }

    pub(crate) fn replace(&self, state: InfiniteState) {
        self.state.send_replace(state);
    }

    /// Held for the whole of a page fetch.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.fetch_lock.lock().await
    }

    /// Token of the current fetch generation.
    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Abort the current generation and start a new one.
    pub(crate) fn cancel(&self) -> bool {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        let was_fetching = self.state.borrow().is_fetching();
        token.cancel();
        *token = CancellationToken::new();
        was_fetching
    }

    /// No handle, subscriber or page fetch references the entry.
    pub(crate) fn is_unused(self: &Arc<Self>) -> bool {
        Arc::strong_count(self) == 1
            && self.state.receiver_count() == 0
            && self.fetch_lock.try_lock().is_ok()
    }

    /// Mark loaded pages stale. Returns whether there was anything to mark.
    pub(crate) fn invalidate(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.data.pages.is_empty() || state.invalid {
                false
            } else {
                state.invalid = true;
                true
            }
        })
    }
}
