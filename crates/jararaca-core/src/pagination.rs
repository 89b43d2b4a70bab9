// ── Page-advance policies ──
//
// A `Manipulator` decides how a paged query moves from one page to the
// next: the first cursor, how a cursor is written into the method
// arguments, and the cursor following a fetched page (`None` ends the
// sequence). Arguments and pages are the JSON values the hooks see: the
// caller's camelCase arguments and responses the backend has already
// translated to camelCase.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Page size assumed when a filter does not name one.
pub const DEFAULT_PAGE_SIZE: u64 = 10;

// ── Wire models ──────────────────────────────────────────────────────

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    #[serde(default)]
    pub unpaginated_total: u64,
    #[serde(default)]
    pub total_pages: u64,
}

/// The paging part of a listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "page_size")]
    pub page_size: Option<u64>,
}

impl PaginatedFilter {
    /// The requested page size; an absent or zero size means the default.
    pub fn effective_page_size(&self) -> u64 {
        match self.page_size {
            Some(size) if size > 0 => size,
            _ => DEFAULT_PAGE_SIZE,
        }
    }
}

// ── Manipulator ──────────────────────────────────────────────────────

pub trait Manipulator: Send + Sync {
    /// Cursor of the first page.
    fn initial_page_param(&self) -> Value;

    /// The arguments the method is called with for the page at `page_param`.
    fn manipulate_args(&self, args: &[Value], page_param: &Value) -> Vec<Value>;

    /// The cursor after `last_page`, or `None` when no pages remain.
    fn next_page_param(
        &self,
        args: &[Value],
        last_page: &Value,
        all_pages: &[Value],
        last_page_param: &Value,
        all_page_params: &[Value],
    ) -> Option<Value>;
}

type ManipulateArgsFn = Arc<dyn Fn(&[Value], &Value) -> Vec<Value> + Send + Sync>;
type NextPageParamFn =
    Arc<dyn Fn(&[Value], &Value, &[Value], &Value, &[Value]) -> Option<Value> + Send + Sync>;

/// A manipulator assembled from closures.
#[derive(Clone)]
pub struct ManipulatorFn {
    initial_page_param: Value,
    manipulate_args: ManipulateArgsFn,
    next_page_param: NextPageParamFn,
}

impl fmt::Debug for ManipulatorFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManipulatorFn")
            .field("initial_page_param", &self.initial_page_param)
            .finish_non_exhaustive()
    }
}

impl ManipulatorFn {
    pub fn new<M, N>(initial_page_param: Value, manipulate_args: M, next_page_param: N) -> Self
    where
        M: Fn(&[Value], &Value) -> Vec<Value> + Send + Sync + 'static,
        N: Fn(&[Value], &Value, &[Value], &Value, &[Value]) -> Option<Value>
            + Send
            + Sync
            + 'static,
    {
        Self {
            initial_page_param,
            manipulate_args: Arc::new(manipulate_args),
            next_page_param: Arc::new(next_page_param),
        }
    }
}

impl Manipulator for ManipulatorFn {
    fn initial_page_param(&self) -> Value {
        self.initial_page_param.clone()
    }

    fn manipulate_args(&self, args: &[Value], page_param: &Value) -> Vec<Value> {
        (self.manipulate_args)(args, page_param)
    }

    fn next_page_param(
        &self,
        args: &[Value],
        last_page: &Value,
        all_pages: &[Value],
        last_page_param: &Value,
        all_page_params: &[Value],
    ) -> Option<Value> {
        (self.next_page_param)(args, last_page, all_pages, last_page_param, all_page_params)
    }
}

// ── Page numbers ─────────────────────────────────────────────────────

type PageSizeFn = Arc<dyn Fn(&[Value]) -> u64 + Send + Sync>;
type TotalFn = Arc<dyn Fn(&Value) -> u64 + Send + Sync>;
type RewriteFn = Arc<dyn Fn(&[Value], u64) -> Vec<Value> + Send + Sync>;

/// Zero-based page index cursor. Paging stops once a page reports a total
/// smaller than the requested page size.
#[derive(Clone)]
pub struct PageNumberManipulator {
    page_size: PageSizeFn,
    total: TotalFn,
    rewrite: RewriteFn,
}

impl fmt::Debug for PageNumberManipulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageNumberManipulator").finish_non_exhaustive()
    }
}

impl Manipulator for PageNumberManipulator {
    fn initial_page_param(&self) -> Value {
        Value::from(0_u64)
    }

    fn manipulate_args(&self, args: &[Value], page_param: &Value) -> Vec<Value> {
        (self.rewrite)(args, page_param.as_u64().unwrap_or(0))
    }

    fn next_page_param(
        &self,
        args: &[Value],
        last_page: &Value,
        _all_pages: &[Value],
        last_page_param: &Value,
        _all_page_params: &[Value],
    ) -> Option<Value> {
        if (self.total)(last_page) < (self.page_size)(args) {
            None
        } else {
            Some(Value::from(last_page_param.as_u64().unwrap_or(0) + 1))
        }
    }
}

pub fn page_number_manipulator<S, T, R>(page_size: S, total: T, rewrite: R) -> PageNumberManipulator
where
    S: Fn(&[Value]) -> u64 + Send + Sync + 'static,
    T: Fn(&Value) -> u64 + Send + Sync + 'static,
    R: Fn(&[Value], u64) -> Vec<Value> + Send + Sync + 'static,
{
    PageNumberManipulator {
        page_size: Arc::new(page_size),
        total: Arc::new(total),
        rewrite: Arc::new(rewrite),
    }
}

/// `total` of a [`Paginated`] page; a page without one counts as empty.
fn paginated_total(page: &Value) -> u64 {
    page.get("total").and_then(Value::as_u64).unwrap_or(0)
}

/// Page-number paging over [`Paginated`] results, with the page size read
/// from the filter `get_filter` extracts and the cursor written by
/// `rewrite`.
pub fn pagination_model_manipulator<G, R>(get_filter: G, rewrite: R) -> PageNumberManipulator
where
    G: Fn(&[Value]) -> PaginatedFilter + Send + Sync + 'static,
    R: Fn(&[Value], u64) -> Vec<Value> + Send + Sync + 'static,
{
    page_number_manipulator(
        move |args| get_filter(args).effective_page_size(),
        paginated_total,
        rewrite,
    )
}

/// Paging for methods whose first argument is a [`PaginatedFilter`]-shaped
/// object: the cursor is written to its `page` field.
pub fn first_arg_pagination_filter() -> PageNumberManipulator {
    pagination_model_manipulator(
        |args| {
            args.first()
                .cloned()
                .and_then(|filter| serde_json::from_value(filter).ok())
                .unwrap_or_default()
        },
        |args, page| {
            let mut args = args.to_vec();
            if args.is_empty() {
                args.push(Value::Null);
            }
            let mut filter = match args[0].take() {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            filter.insert("page".to_owned(), Value::from(page));
            args[0] = Value::Object(filter);
            args
        },
    )
}
