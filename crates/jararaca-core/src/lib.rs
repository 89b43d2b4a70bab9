// jararaca-core: controller method tables, deterministic query keys, the
// query cache, and the query/mutation/infinite hook generators built on it.

pub mod cache;
pub mod context;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod identifiable;
pub mod pagination;
pub mod query_key;

pub use cache::{
    FetchStatus, Fetcher, InfiniteData, InfiniteState, QueryCache, QueryData, QueryOptions,
    QueryState,
};
pub use context::QueryContext;
pub use controller::{Arity, Controller, ControllerFactory, MethodArgs, MethodTable, Rest};
pub use error::{CoreError, SharedError};
pub use hooks::{
    ClassInfiniteQueryHooks, ClassMutationHooks, ClassQueryHooks, InfiniteQuery,
    InfiniteQueryHook, Mutation, MutationHook, MutationOptions, MutationState, QueryHandle,
    QueryHook,
};
pub use identifiable::{Identifiable, Unified, unify_identifiable};
pub use pagination::{
    Manipulator, ManipulatorFn, PageNumberManipulator, Paginated, PaginatedFilter,
    first_arg_pagination_filter, page_number_manipulator, pagination_model_manipulator,
};
pub use query_key::QueryKey;
