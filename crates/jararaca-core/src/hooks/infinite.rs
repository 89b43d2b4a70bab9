// Paged queries. Page fetches of one key are serialized by the entry's
// lock: each page's cursor is derived from the page before it, so two
// "fetch next" calls must never overlap.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use jararaca_api::RequestOverrides;

use super::args::resolve_infinite_call;
use crate::cache::{
    FetchStatus, InfiniteData, InfiniteEntry, InfiniteState, QueryOptions, with_retry,
};
use crate::context::QueryContext;
use crate::controller::{Arity, Controller, MethodDef, MethodFuture, resolve_method};
use crate::error::{CoreError, SharedError};
use crate::pagination::Manipulator;
use crate::query_key::QueryKey;

type PageFetcher = Arc<dyn Fn(Vec<Value>, CancellationToken) -> MethodFuture + Send + Sync>;

// ── ClassInfiniteQueryHooks ──────────────────────────────────────────

pub struct ClassInfiniteQueryHooks<C> {
    hooks: BTreeMap<&'static str, InfiniteQueryHook<C>>,
}

impl<C: Controller> ClassInfiniteQueryHooks<C> {
    /// One paged hook per `(method, manipulator)` pair. Fails with
    /// [`CoreError::UnknownMethod`] if a method is not in `C::methods()`.
    pub fn new<'a>(
        methods: impl IntoIterator<Item = (&'a str, Arc<dyn Manipulator>)>,
    ) -> Result<Self, CoreError> {
        let table = C::methods();
        let hooks = methods
            .into_iter()
            .map(|(name, manipulator)| {
                let def = resolve_method(&table, name)?;
                Ok((def.name(), InfiniteQueryHook { def, manipulator }))
            })
            .collect::<Result<_, CoreError>>()?;
        Ok(Self { hooks })
    }

    pub fn get(&self, name: &str) -> Option<&InfiniteQueryHook<C>> {
        self.hooks.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.hooks.keys().copied()
    }
}

pub struct InfiniteQueryHook<C> {
    def: MethodDef<C>,
    manipulator: Arc<dyn Manipulator>,
}

impl<C> Clone for InfiniteQueryHook<C> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            manipulator: Arc::clone(&self.manipulator),
        }
    }
}

impl<C: Controller> InfiniteQueryHook<C> {
    pub fn name(&self) -> &'static str {
        self.def.name()
    }

    pub fn arity(&self) -> Arity {
        self.def.arity()
    }

    /// Bind the paged query for `args`. The key is built from `args` as
    /// given, before any cursor is written into them.
    pub fn use_infinite_query(
        &self,
        ctx: &QueryContext,
        args: Vec<Value>,
        options: QueryOptions,
    ) -> InfiniteQuery {
        let key = ctx.class_infinite_query_key::<C>(self.def.name(), &args);
        let factory = ctx.factory::<C>();
        let def = self.def.clone();
        let fetch_page: PageFetcher = Arc::new(move |args: Vec<Value>, cancel: CancellationToken| {
            let instance = factory.create(&RequestOverrides::default().with_cancel(cancel));
            def.invoke(instance, args)
        });
        InfiniteQuery {
            entry: ctx.cache().infinite_entry(&key),
            key,
            args: args.into(),
            manipulator: Arc::clone(&self.manipulator),
            fetch_page,
            options,
        }
    }

    /// Bind from loosely shaped `values`. When the supplied count equals the
    /// declared arity the values are the arguments; otherwise the first value
    /// is the argument tuple, and if the counts differ by more than one the
    /// last value is the options.
    pub fn call(&self, ctx: &QueryContext, values: Vec<Value>) -> Result<InfiniteQuery, CoreError> {
        let (args, options) = resolve_infinite_call(self.def.arity().declared(), values);
        let options = QueryOptions::from_value(&options)?;
        Ok(self.use_infinite_query(ctx, args, options))
    }
}

// ── InfiniteQuery ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct InfiniteQuery {
    key: QueryKey,
    entry: Arc<InfiniteEntry>,
    args: Arc<[Value]>,
    manipulator: Arc<dyn Manipulator>,
    fetch_page: PageFetcher,
    options: QueryOptions,
}

impl fmt::Debug for InfiniteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteQuery")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl InfiniteQuery {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> InfiniteState {
        self.entry.state()
    }

    pub fn data(&self) -> InfiniteData {
        self.entry.state().data
    }

    pub fn has_next_page(&self) -> bool {
        self.entry.state().has_next_page()
    }

    pub fn subscribe(&self) -> watch::Receiver<InfiniteState> {
        self.entry.subscribe()
    }

    /// Load the first page, or reload the loaded pages when they are stale
    /// or invalidated. Fresh pages are returned as they are.
    pub async fn fetch(&self) -> Result<InfiniteData, SharedError> {
        self.ensure_enabled()?;
        let _guard = self.entry.lock().await;
        let state = self.entry.state();
        if state.data.pages.is_empty() {
            return self.load_first_page().await;
        }
        let fresh = state
            .updated_at
            .is_some_and(|at| at.elapsed() < self.options.stale_time);
        if fresh && !state.invalid {
            trace!(key = %self.key, "serving fresh pages");
            return Ok(state.data);
        }
        self.reload_pages(state.data.pages.len()).await
    }

    /// Reload every loaded page regardless of freshness.
    pub async fn refetch(&self) -> Result<InfiniteData, SharedError> {
        self.ensure_enabled()?;
        let _guard = self.entry.lock().await;
        let loaded = self.entry.state().data.pages.len();
        if loaded == 0 {
            self.load_first_page().await
        } else {
            self.reload_pages(loaded).await
        }
    }

    /// Append the next page. Once the manipulator has reported no next
    /// cursor this returns the current pages without fetching.
    pub async fn fetch_next_page(&self) -> Result<InfiniteData, SharedError> {
        self.ensure_enabled()?;
        let _guard = self.entry.lock().await;
        let state = self.entry.state();
        if state.data.pages.is_empty() {
            return self.load_first_page().await;
        }
        let Some(cursor) = state.next_page_param else {
            trace!(key = %self.key, "no next page");
            return Ok(state.data);
        };

        let token = self.entry.token();
        self.entry.update(|s| {
            s.fetch_status = FetchStatus::FetchingNextPage;
            s.error = None;
        });
        debug!(key = %self.key, cursor = %cursor, "fetching next page");
        match self.load_page(&cursor, &token).await {
            Ok(page) => {
                let mut data = state.data;
                data.pages.push(page);
                data.page_params.push(cursor);
                self.commit(data.clone());
                Ok(data)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Abort the running page fetch. Loaded pages are kept.
    pub fn cancel(&self) -> bool {
        self.entry.cancel()
    }

    /// Abort any fetch and drop every loaded page. Waits for the aborted
    /// fetch to release the entry so its result can't land after the reset.
    pub async fn reset(&self) {
        self.entry.cancel();
        let _guard = self.entry.lock().await;
        debug!(key = %self.key, "resetting pages");
        self.entry.replace(InfiniteState::default());
    }

    // ── Page loading (callers hold the entry lock) ───────────────────

    fn ensure_enabled(&self) -> Result<(), SharedError> {
        if self.options.enabled {
            Ok(())
        } else {
            Err(Arc::new(CoreError::QueryDisabled {
                key: self.key.to_string(),
            }))
        }
    }

    async fn load_first_page(&self) -> Result<InfiniteData, SharedError> {
        let token = self.entry.token();
        self.entry.update(|s| {
            s.fetch_status = FetchStatus::Fetching;
            s.error = None;
        });
        debug!(key = %self.key, "fetching first page");
        let cursor = self.manipulator.initial_page_param();
        match self.load_page(&cursor, &token).await {
            Ok(page) => {
                let data = InfiniteData {
                    pages: vec![page],
                    page_params: vec![cursor],
                };
                self.commit(data.clone());
                Ok(data)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Refetch up to `count` pages from the first cursor, stopping early if
    /// the sequence now ends sooner.
    async fn reload_pages(&self, count: usize) -> Result<InfiniteData, SharedError> {
        let token = self.entry.token();
        self.entry.update(|s| {
            s.fetch_status = FetchStatus::Fetching;
            s.error = None;
        });
        debug!(key = %self.key, count, "refetching pages");

        let mut data = InfiniteData::default();
        let mut cursor = Some(self.manipulator.initial_page_param());
        while let Some(current) = cursor.take() {
            let page = match self.load_page(&current, &token).await {
                Ok(page) => page,
                Err(e) => return Err(self.fail(e)),
            };
            data.pages.push(page);
            data.page_params.push(current);
            if data.pages.len() < count {
                cursor = self.next_cursor(&data);
            }
        }
        self.commit(data.clone());
        Ok(data)
    }

    async fn load_page(&self, cursor: &Value, token: &CancellationToken) -> Result<Value, CoreError> {
        let args = self.manipulator.manipulate_args(&self.args, cursor);
        let fetch_page = Arc::clone(&self.fetch_page);
        let attempt_token = token.clone();
        with_retry(
            move || fetch_page(args.clone(), attempt_token.clone()),
            self.options.retry,
            self.options.retry_delay,
            token,
        )
        .await
    }

    /// Cursor after the last page; `null` counts as exhausted.
    fn next_cursor(&self, data: &InfiniteData) -> Option<Value> {
        let last_page = data.pages.last()?;
        let last_param = data.page_params.last()?;
        self.manipulator
            .next_page_param(&self.args, last_page, &data.pages, last_param, &data.page_params)
            .filter(|cursor| !cursor.is_null())
    }

    fn commit(&self, data: InfiniteData) {
        let next_page_param = self.next_cursor(&data);
        trace!(
            key = %self.key,
            pages = data.pages.len(),
            exhausted = next_page_param.is_none(),
            "pages loaded"
        );
        self.entry.replace(InfiniteState {
            data,
            next_page_param,
            fetch_status: FetchStatus::Idle,
            error: None,
            updated_at: Some(Instant::now()),
            invalid: false,
        });
    }

    fn fail(&self, error: CoreError) -> SharedError {
        let error = Arc::new(error);
        let cancelled = error.is_cancelled();
        debug!(key = %self.key, error = %error, "page fetch failed");
        self.entry.update(|s| {
            s.fetch_status = FetchStatus::Idle;
            if !cancelled {
                s.error = Some(Arc::clone(&error));
            }
        });
        error
    }
}
