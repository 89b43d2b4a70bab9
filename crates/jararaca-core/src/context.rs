// ── Query context ──
//
// Everything a hook needs, passed explicitly: the backend controllers are
// built over, the shared cache, the ambient query-key prefix, and request
// defaults applied to every controller instance.

use std::sync::Arc;

use serde_json::Value;

use jararaca_api::{HttpBackend, RequestOverrides};

use crate::cache::QueryCache;
use crate::controller::{Controller, ControllerFactory};
use crate::query_key::{self, QueryKey};

#[derive(Clone)]
pub struct QueryContext {
    backend: Arc<dyn HttpBackend>,
    cache: QueryCache,
    query_keys: Arc<[Value]>,
    request_defaults: RequestOverrides,
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("query_keys", &self.query_keys)
            .field("request_defaults", &self.request_defaults)
            .finish_non_exhaustive()
    }
}

impl QueryContext {
    /// A root context: fresh cache, empty prefix, no request defaults.
    pub fn new(backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            backend,
            cache: QueryCache::new(),
            query_keys: Arc::from(Vec::new()),
            request_defaults: RequestOverrides::default(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = cache;
        self
    }

    /// A child context whose key prefix replaces this one's.
    #[must_use]
    pub fn with_query_keys(&self, query_keys: impl IntoIterator<Item = Value>) -> Self {
        Self {
            query_keys: query_keys.into_iter().collect(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_request_defaults(mut self, defaults: RequestOverrides) -> Self {
        self.request_defaults = defaults;
        self
    }

    pub fn backend(&self) -> &Arc<dyn HttpBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn query_keys(&self) -> &[Value] {
        &self.query_keys
    }

    pub fn request_defaults(&self) -> &RequestOverrides {
        &self.request_defaults
    }

    pub fn factory<C: Controller>(&self) -> ControllerFactory<C> {
        ControllerFactory::new(Arc::clone(&self.backend), self.request_defaults.clone())
    }

    // ── Keys under this context's prefix ─────────────────────────────

    pub fn class_base_query_key<C: Controller>(&self, method: &str) -> QueryKey {
        query_key::base_key(&self.query_keys, C::NAME, method)
    }

    pub fn class_query_key<C: Controller>(&self, method: &str, args: &[Value]) -> QueryKey {
        query_key::key(&self.query_keys, C::NAME, method, args)
    }

    pub fn class_base_infinite_query_key<C: Controller>(&self, method: &str) -> QueryKey {
        query_key::infinite_base_key(&self.query_keys, C::NAME, method)
    }

    pub fn class_infinite_query_key<C: Controller>(
        &self,
        method: &str,
        args: &[Value],
    ) -> QueryKey {
        query_key::infinite_key(&self.query_keys, C::NAME, method, args)
    }
}
