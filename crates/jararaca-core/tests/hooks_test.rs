#![allow(clippy::unwrap_used)]
// Hook generators over an in-memory backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::{Value, json};

use jararaca_api::{Error, HttpBackend, HttpRequest, ResponseBody};
use jararaca_core::{
    ClassInfiniteQueryHooks, ClassMutationHooks, ClassQueryHooks, Controller, CoreError,
    InfiniteState, Manipulator, MethodTable, MutationOptions, MutationState, QueryContext,
    QueryOptions, QueryState, Rest, first_arg_pagination_filter,
};

// ── Stub backend ────────────────────────────────────────────────────

const USER_COUNT: u64 = 23;

#[derive(Default)]
struct StubBackend {
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubBackend {
    fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    fn last(&self) -> HttpRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl HttpBackend for StubBackend {
    async fn request(&self, request: HttpRequest) -> Result<ResponseBody, Error> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;

        let id = request.path_params.get("id").cloned().unwrap_or(Value::Null);
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/users") if request.query.contains_key("hold") => std::future::pending().await,
            ("GET", "/users") => {
                let page = request.query.get("page").and_then(Value::as_u64).unwrap_or(0);
                let size = request
                    .query
                    .get("pageSize")
                    .and_then(Value::as_u64)
                    .unwrap_or(10);
                let items: Vec<u64> = (page * size..USER_COUNT.min((page + 1) * size)).collect();
                Ok(ResponseBody::Json(json!({ "items": items, "total": items.len() })))
            }
            ("GET", "/users/:id") => Ok(ResponseBody::Json(json!({ "id": id, "name": "ana" }))),
            ("PUT", "/users/:id") => {
                let jararaca_api::RequestBody::Json(body) = request.body else {
                    return Err(Error::InvalidRequest("missing body".into()));
                };
                Ok(ResponseBody::Json(json!({ "id": id, "name": body["name"] })))
            }
            ("POST", "/users") => match request.body {
                jararaca_api::RequestBody::Json(body) => Ok(ResponseBody::Json(body)),
                _ => Ok(ResponseBody::Empty),
            },
            ("GET", "/broken") => Err(Error::Status {
                status: 500,
                scope: None,
                code: None,
                body: "boom".into(),
            }),
            ("GET", "/slow") => std::future::pending().await,
            _ => Err(Error::Status {
                status: 404,
                scope: None,
                code: None,
                body: String::new(),
            }),
        }
    }
}

// ── Test controller ─────────────────────────────────────────────────

struct Users {
    backend: Arc<dyn HttpBackend>,
}

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: u64,
    name: String,
}

impl Users {
    async fn list(&self, filter: Value) -> Result<Value, Error> {
        let body = self
            .backend
            .request(HttpRequest::get("/users").query_object(filter))
            .await?;
        Ok(body.into_value())
    }

    async fn get(&self, id: u64) -> Result<Value, Error> {
        let body = self
            .backend
            .request(HttpRequest::get("/users/:id").path_param("id", id))
            .await?;
        Ok(body.into_value())
    }

    async fn rename(&self, id: u64, name: String) -> Result<Value, Error> {
        let request = HttpRequest::put("/users/:id")
            .path_param("id", id)
            .json(json!({ "name": name }))?;
        Ok(self.backend.request(request).await?.into_value())
    }

    async fn create(&self, user: Value) -> Result<Value, Error> {
        let request = HttpRequest::post("/users").json(user)?;
        Ok(self.backend.request(request).await?.into_value())
    }
}

impl Controller for Users {
    const NAME: &'static str = "Users";

    fn new(backend: Arc<dyn HttpBackend>) -> Self {
        Self { backend }
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .method("list", |c: Users, (filter,): (Value,)| async move { c.list(filter).await })
            .method("get", |c: Users, (id,): (u64,)| async move { c.get(id).await })
            .method("rename", |c: Users, (id, name): (u64, String)| async move {
                c.rename(id, name).await
            })
            .method("create", |c: Users, (user,): (Value,)| async move { c.create(user).await })
            .method("count", |_c: Users, Rest(values): Rest<u64>| async move {
                Ok::<_, Error>(values.len())
            })
            .method("broken", |c: Users, (): ()| async move {
                c.backend.request(HttpRequest::get("/broken")).await.map(ResponseBody::into_value)
            })
            .method("slow", |c: Users, (): ()| async move {
                c.backend.request(HttpRequest::get("/slow")).await.map(ResponseBody::into_value)
            })
    }
}

fn setup() -> (Arc<StubBackend>, QueryContext) {
    let backend = Arc::new(StubBackend::default());
    let ctx = QueryContext::new(backend.clone());
    (backend, ctx)
}

// ── Setup validation ────────────────────────────────────────────────

#[test]
fn test_unknown_method_fails_at_setup() {
    let err = ClassQueryHooks::<Users>::new(&["get", "nope"]).err().unwrap();
    assert!(matches!(
        err,
        CoreError::UnknownMethod { class: "Users", ref method } if method == "nope"
    ));
    assert!(ClassMutationHooks::<Users>::new(&["missing"]).is_err());

    let hooks = ClassQueryHooks::<Users>::new(&["get", "list"]).unwrap();
    assert_eq!(hooks.names().collect::<Vec<_>>(), vec!["get", "list"]);
}

// ── Queries ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_query_fetches_through_controller() {
    let (backend, ctx) = setup();
    let hooks = ClassQueryHooks::<Users>::new(&["get"]).unwrap();
    let query = hooks
        .get("get")
        .unwrap()
        .use_query(&ctx, vec![json!(7)], QueryOptions::default());

    assert_eq!(query.key().segments(), &[json!("Users"), json!("get"), json!([7])]);
    let user: User = query.fetch_as().await.unwrap();
    assert_eq!(user, User { id: 7, name: "ana".into() });
    assert_eq!(backend.last().path_params.get("id"), Some(&json!(7)));
    assert!(query.state().is_loaded());
}

#[tokio::test]
async fn test_both_call_conventions_share_a_key() {
    let (_, ctx) = setup();
    let hooks = ClassQueryHooks::<Users>::new(&["get", "rename"]).unwrap();
    let get = hooks.get("get").unwrap();
    let rename = hooks.get("rename").unwrap();

    let spread = get.call(&ctx, vec![json!(3)]).unwrap();
    let with_options = get.call(&ctx, vec![json!(3), json!({ "staleTime": 1000 })]).unwrap();
    assert_eq!(spread.key(), with_options.key());
    assert_eq!(with_options.options().stale_time.as_millis(), 1000);

    let positional = rename.call(&ctx, vec![json!(1), json!("x")]).unwrap();
    let tupled = rename.call(&ctx, vec![json!([1, "x"])]).unwrap();
    assert_eq!(positional.key(), tupled.key());
}

#[tokio::test]
async fn test_concurrent_fetches_hit_backend_once() {
    let (backend, ctx) = setup();
    let hooks = ClassQueryHooks::<Users>::new(&["get"]).unwrap();
    let hook = hooks.get("get").unwrap();
    let a = hook.use_query(&ctx, vec![json!(1)], QueryOptions::default());
    let b = hook.use_query(&ctx, vec![json!(1)], QueryOptions::default());

    let (ra, rb) = tokio::join!(a.fetch(), b.fetch());
    assert_eq!(ra.unwrap(), rb.unwrap());
    assert_eq!(backend.count("/users/:id"), 1);
}

#[tokio::test]
async fn test_prefix_scopes_cache_entries() {
    let (_, ctx) = setup();
    let hooks = ClassQueryHooks::<Users>::new(&["get"]).unwrap();
    let hook = hooks.get("get").unwrap();

    let tenant = ctx.with_query_keys([json!("tenant-a")]);
    let scoped = hook.use_query(&tenant, vec![json!(1)], QueryOptions::default());
    let root = hook.use_query(&ctx, vec![json!(1)], QueryOptions::default());
    assert_ne!(scoped.key(), root.key());
    assert_eq!(scoped.key().segments()[0], json!("tenant-a"));

    scoped.fetch().await.unwrap();
    assert!(root.data().is_none());
    assert!(scoped.data().is_some());
}

#[tokio::test]
async fn test_invalidate_by_base_key() {
    let (backend, ctx) = setup();
    let hooks = ClassQueryHooks::<Users>::new(&["get"]).unwrap();
    let options = QueryOptions::default().stale_time(std::time::Duration::from_secs(60));
    let one = hooks.get("get").unwrap().use_query(&ctx, vec![json!(1)], options.clone());
    let two = hooks.get("get").unwrap().use_query(&ctx, vec![json!(2)], options);

    one.fetch().await.unwrap();
    two.fetch().await.unwrap();
    one.fetch().await.unwrap();
    assert_eq!(backend.count("/users/:id"), 2);

    let base = ctx.class_base_query_key::<Users>("get");
    assert_eq!(ctx.cache().invalidate(&base), 2);
    assert!(matches!(one.state(), QueryState::Invalid(_)));

    one.fetch().await.unwrap();
    assert_eq!(backend.count("/users/:id"), 3);
}

#[tokio::test]
async fn test_cancel_aborts_transport_and_restores_state() {
    let (_, ctx) = setup();
    let hooks = ClassQueryHooks::<Users>::new(&["slow"]).unwrap();
    let query = hooks.get("slow").unwrap().use_query(&ctx, vec![], QueryOptions::default());

    let running = tokio::spawn({
        let query = query.clone();
        async move { query.fetch().await }
    });
    let mut states = query.subscribe();
    states.wait_for(QueryState::is_fetching).await.unwrap();

    assert!(query.cancel());
    let err = running.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(query.state(), QueryState::Created));
}

#[tokio::test]
async fn test_failure_is_reported_in_state() {
    let (_, ctx) = setup();
    let hooks = ClassQueryHooks::<Users>::new(&["broken"]).unwrap();
    let query = hooks.get("broken").unwrap().call(&ctx, vec![]).unwrap();

    let err = query.fetch().await.unwrap_err();
    assert_eq!(err.api_error().and_then(Error::status), Some(500));
    assert!(query.state().error().is_some());
}

// ── Mutations ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_mutation_spreads_array_payload_for_wide_methods() {
    let (backend, ctx) = setup();
    let hooks = ClassMutationHooks::<Users>::new(&["rename", "create", "count"]).unwrap();

    let rename = hooks
        .get("rename")
        .unwrap()
        .use_mutation(&ctx, MutationOptions::default());
    let user: User = rename.mutate_as(json!([4, "bea"])).await.unwrap();
    assert_eq!(user, User { id: 4, name: "bea".into() });
    assert_eq!(backend.last().path_params.get("id"), Some(&json!(4)));

    let create = hooks
        .get("create")
        .unwrap()
        .use_mutation(&ctx, MutationOptions::default());
    let created = create.mutate(json!(["kept", "whole"])).await.unwrap();
    assert_eq!(created, json!(["kept", "whole"]));

    let count = hooks
        .get("count")
        .unwrap()
        .use_mutation(&ctx, MutationOptions::default());
    assert_eq!(count.mutate(json!(5)).await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_mutation_rejects_non_array_payload_for_wide_methods() {
    let (backend, ctx) = setup();
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);
    let rename = ClassMutationHooks::<Users>::new(&["rename"])
        .unwrap()
        .get("rename")
        .unwrap()
        .use_mutation(
            &ctx,
            MutationOptions::default().on_error(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

    let err = rename.mutate(json!({ "id": 1 })).await.unwrap_err();
    assert!(matches!(*err, CoreError::InvalidPayload { .. }));
    assert!(matches!(rename.state(), MutationState::Failed(_)));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(backend.count("/users/:id"), 0);

    rename.reset();
    assert!(matches!(rename.state(), MutationState::Idle));
}

#[tokio::test]
async fn test_mutation_callbacks_see_result() {
    let (_, ctx) = setup();
    let settled = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&settled);
    let create = ClassMutationHooks::<Users>::new(&["create"])
        .unwrap()
        .get("create")
        .unwrap()
        .use_mutation(
            &ctx,
            MutationOptions::default().on_settled(move |result, payload| {
                log.lock()
                    .unwrap()
                    .push((result.ok().cloned(), payload.clone()));
            }),
        );

    create.mutate(json!({ "name": "c" })).await.unwrap();
    assert_eq!(
        *settled.lock().unwrap(),
        vec![(Some(json!({ "name": "c" })), json!({ "name": "c" }))]
    );
    assert_eq!(create.state().data(), Some(&json!({ "name": "c" })));
}

// ── Paged queries ───────────────────────────────────────────────────

fn infinite_hooks() -> ClassInfiniteQueryHooks<Users> {
    let manipulator: Arc<dyn Manipulator> = Arc::new(first_arg_pagination_filter());
    ClassInfiniteQueryHooks::new([("list", manipulator)]).unwrap()
}

#[tokio::test]
async fn test_pages_advance_until_short_page() {
    let (backend, ctx) = setup();
    let hooks = infinite_hooks();
    let query = hooks
        .get("list")
        .unwrap()
        .use_infinite_query(&ctx, vec![json!({ "pageSize": 10 })], QueryOptions::default());

    let data = query.fetch().await.unwrap();
    assert_eq!(data.page_params, vec![json!(0)]);
    assert!(query.has_next_page());

    query.fetch_next_page().await.unwrap();
    let data = query.fetch_next_page().await.unwrap();
    assert_eq!(data.page_params, vec![json!(0), json!(1), json!(2)]);
    assert_eq!(data.pages[2]["total"], json!(3));
    assert!(!query.has_next_page());
    assert_eq!(backend.count("/users"), 3);

    // Exhausted: no request, no new page.
    let data = query.fetch_next_page().await.unwrap();
    assert_eq!(data.pages.len(), 3);
    assert_eq!(backend.count("/users"), 3);
    assert_eq!(backend.last().query.get("page"), Some(&json!(2)));
}

#[tokio::test]
async fn test_infinite_key_uses_unpaged_arguments() {
    let (_, ctx) = setup();
    let hooks = infinite_hooks();
    let hook = hooks.get("list").unwrap();
    let query = hook.call(&ctx, vec![json!({ "pageSize": 5 })]).unwrap();

    let plain = ctx.class_query_key::<Users>("list", &[json!({ "pageSize": 5 })]);
    assert_ne!(query.key(), &plain);
    assert_eq!(
        query.key(),
        &ctx.class_infinite_query_key::<Users>("list", &[json!({ "pageSize": 5 })])
    );

    query.fetch_next_page().await.unwrap();
    let data = query.fetch_next_page().await.unwrap();
    assert_eq!(data.pages.len(), 2);
    assert_eq!(data.page_params, vec![json!(0), json!(1)]);
}

#[tokio::test]
async fn test_invalidated_pages_are_refetched() {
    let (backend, ctx) = setup();
    let hooks = infinite_hooks();
    let options = QueryOptions::default().stale_time(std::time::Duration::from_secs(60));
    let query = hooks
        .get("list")
        .unwrap()
        .use_infinite_query(&ctx, vec![json!({})], options);

    query.fetch().await.unwrap();
    query.fetch_next_page().await.unwrap();
    query.fetch().await.unwrap();
    assert_eq!(backend.count("/users"), 2);

    let base = ctx.class_base_infinite_query_key::<Users>("list");
    assert_eq!(ctx.cache().invalidate(&base), 1);
    assert!(query.state().invalid);

    let data = query.fetch().await.unwrap();
    assert_eq!(data.pages.len(), 2);
    assert_eq!(backend.count("/users"), 4);
    assert!(!query.state().invalid);
}

#[tokio::test]
async fn test_concurrent_next_page_calls_do_not_race() {
    let (backend, ctx) = setup();
    let hooks = infinite_hooks();
    let query = hooks
        .get("list")
        .unwrap()
        .use_infinite_query(&ctx, vec![json!({})], QueryOptions::default());
    query.fetch().await.unwrap();

    let (a, b) = tokio::join!(query.fetch_next_page(), query.fetch_next_page());
    a.unwrap();
    b.unwrap();
    assert_eq!(query.data().page_params, vec![json!(0), json!(1), json!(2)]);
    assert_eq!(backend.count("/users"), 3);
}

#[tokio::test]
async fn test_reset_drops_pages() {
    let (_, ctx) = setup();
    let query = infinite_hooks()
        .get("list")
        .unwrap()
        .use_infinite_query(&ctx, vec![json!({})], QueryOptions::default());
    query.fetch().await.unwrap();
    query.reset().await;
    assert_eq!(query.state().page_count(), 0);
    assert!(!query.has_next_page());
}

#[tokio::test]
async fn test_small_pages_run_until_short_page() {
    let (backend, ctx) = setup();
    let query = infinite_hooks()
        .get("list")
        .unwrap()
        .use_infinite_query(&ctx, vec![json!({ "pageSize": 5 })], QueryOptions::default());

    query.fetch().await.unwrap();
    while query.has_next_page() {
        query.fetch_next_page().await.unwrap();
    }

    let data = query.data();
    assert_eq!(data.page_params, (0..5).map(|p| json!(p)).collect::<Vec<_>>());
    assert_eq!(data.pages[3]["total"], json!(5));
    assert_eq!(data.pages[4]["total"], json!(3));
    assert_eq!(backend.count("/users"), 5);
    assert_eq!(backend.last().query.get("pageSize"), Some(&json!(5)));
}

#[tokio::test]
async fn test_cancel_paged_fetch_restores_idle_state() {
    let (_, ctx) = setup();
    let query = infinite_hooks()
        .get("list")
        .unwrap()
        .use_infinite_query(&ctx, vec![json!({})], QueryOptions::default());
    query.fetch().await.unwrap();

    let held = infinite_hooks()
        .get("list")
        .unwrap()
        .use_infinite_query(&ctx, vec![json!({ "hold": true })], QueryOptions::default());
    let running = tokio::spawn({
        let held = held.clone();
        async move { held.fetch().await }
    });
    let mut states = held.subscribe();
    states.wait_for(InfiniteState::is_fetching).await.unwrap();

    assert!(held.cancel());
    let err = running.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    let state = held.state();
    assert!(!state.is_fetching());
    assert!(state.error().is_none());
    assert_eq!(state.page_count(), 0);
    assert!(!held.cancel());

    // Cancelling one paged query leaves the others alone.
    assert_eq!(query.state().page_count(), 1);
    assert!(query.has_next_page());
}

#[tokio::test]
async fn test_reset_waits_for_cancelled_fetch() {
    let (_, ctx) = setup();
    let query = infinite_hooks()
        .get("list")
        .unwrap()
        .use_infinite_query(&ctx, vec![json!({ "hold": true })], QueryOptions::default());
    let running = tokio::spawn({
        let query = query.clone();
        async move { query.fetch().await }
    });
    query
        .subscribe()
        .wait_for(InfiniteState::is_fetching)
        .await
        .unwrap();

    query.reset().await;
    assert!(running.await.unwrap().unwrap_err().is_cancelled());
    let state = query.state();
    assert_eq!(state.page_count(), 0);
    assert!(!state.is_fetching());
}

#[tokio::test]
async fn test_unused_entries_are_evicted() {
    let (_, ctx) = setup();
    let hooks = ClassQueryHooks::<Users>::new(&["get"]).unwrap();
    hooks
        .get("get")
        .unwrap()
        .use_query(&ctx, vec![json!(1)], QueryOptions::default())
        .fetch()
        .await
        .unwrap();
    let pages = infinite_hooks()
        .get("list")
        .unwrap()
        .use_infinite_query(&ctx, vec![json!({})], QueryOptions::default());
    pages.fetch().await.unwrap();

    assert_eq!(ctx.cache().evict_unused(), 1);
    assert_eq!(ctx.cache().keys(), vec![pages.key().clone()]);

    drop(pages);
    assert_eq!(ctx.cache().evict_unused(), 1);
    assert!(ctx.cache().keys().is_empty());
}
