use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use jararaca_api::RequestOverrides;

use super::args::resolve_query_call;
use super::decode;
use crate::cache::{Fetcher, QueryCache, QueryOptions, QueryState};
use crate::context::QueryContext;
use crate::controller::{Arity, Controller, MethodDef, resolve_method};
use crate::error::{CoreError, SharedError};
use crate::query_key::QueryKey;

// ── ClassQueryHooks ──────────────────────────────────────────────────

/// Query hooks for a set of methods of `C`, validated at construction.
pub struct ClassQueryHooks<C> {
    hooks: BTreeMap<&'static str, QueryHook<C>>,
}

impl<C: Controller> ClassQueryHooks<C> {
    /// Fails with [`CoreError::UnknownMethod`] if any name is not in
    /// `C::methods()`.
    pub fn new(names: &[&str]) -> Result<Self, CoreError> {
        let table = C::methods();
        let hooks = names
            .iter()
            .map(|name| {
                let def = resolve_method(&table, name)?;
                Ok((def.name(), QueryHook { def }))
            })
            .collect::<Result<_, CoreError>>()?;
        Ok(Self { hooks })
    }

    pub fn get(&self, name: &str) -> Option<&QueryHook<C>> {
        self.hooks.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.hooks.keys().copied()
    }
}

// ── QueryHook ────────────────────────────────────────────────────────

pub struct QueryHook<C> {
    def: MethodDef<C>,
}

impl<C> Clone for QueryHook<C> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
        }
    }
}

impl<C: Controller> QueryHook<C> {
    pub fn name(&self) -> &'static str {
        self.def.name()
    }

    pub fn arity(&self) -> Arity {
        self.def.arity()
    }

    /// Bind the query for `args` under `ctx`. Nothing is fetched until the
    /// handle is asked to.
    pub fn use_query(&self, ctx: &QueryContext, args: Vec<Value>, options: QueryOptions) -> QueryHandle {
        let key = ctx.class_query_key::<C>(self.def.name(), &args);
        let factory = ctx.factory::<C>();
        let def = self.def.clone();
        let fetcher: Fetcher = Arc::new(move |cancel: CancellationToken| {
            let instance = factory.create(&RequestOverrides::default().with_cancel(cancel));
            def.invoke(instance, args.clone())
        });
        QueryHandle {
            key,
            cache: ctx.cache().clone(),
            options,
            fetcher,
        }
    }

    /// Bind the query from loosely shaped `values`: spread arguments, an
    /// argument tuple, and an optional trailing options object are told
    /// apart by the method's declared arity.
    pub fn call(&self, ctx: &QueryContext, values: Vec<Value>) -> Result<QueryHandle, CoreError> {
        let (args, options) = resolve_query_call(self.def.arity().declared(), values);
        let options = QueryOptions::from_value(&options)?;
        Ok(self.use_query(ctx, args, options))
    }
}

// ── QueryHandle ──────────────────────────────────────────────────────

/// One bound query: a key, its options, and how to fetch it.
#[derive(Clone)]
pub struct QueryHandle {
    key: QueryKey,
    cache: QueryCache,
    options: QueryOptions,
    fetcher: Fetcher,
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl QueryHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub async fn fetch(&self) -> Result<Value, SharedError> {
        self.cache
            .fetch(&self.key, &self.options, Arc::clone(&self.fetcher))
            .await
    }

    /// [`fetch`](Self::fetch) decoded into `T`.
    pub async fn fetch_as<T: DeserializeOwned>(&self) -> Result<T, SharedError> {
        let value = self.fetch().await?;
        decode(value).map_err(Arc::new)
    }

    pub async fn refetch(&self) -> Result<Value, SharedError> {
        self.cache
            .refetch(&self.key, &self.options, Arc::clone(&self.fetcher))
            .await
    }

    pub fn state(&self) -> QueryState {
        self.cache.state(&self.key)
    }

    pub fn data(&self) -> Option<Value> {
        self.cache.get_data(&self.key)
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.cache.subscribe(&self.key)
    }

    pub fn stream(&self) -> WatchStream<QueryState> {
        self.cache.stream(&self.key)
    }

    /// Abort the in-flight fetch, if any.
    pub fn cancel(&self) -> bool {
        self.cache.cancel(&self.key)
    }

    /// Mark this query's data stale.
    pub fn invalidate(&self) -> bool {
        self.cache.invalidate(&self.key) > 0
    }
}
