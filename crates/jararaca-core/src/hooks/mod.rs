// ── Hook generators ──
//
// Turn controller methods into cache-aware handles: queries keyed by
// class/method/arguments, untracked mutations, and paged queries driven by
// a `Manipulator`. Each generator validates its method names up front.

mod args;
mod infinite;
mod mutation;
mod query;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub use infinite::{ClassInfiniteQueryHooks, InfiniteQuery, InfiniteQueryHook};
pub use mutation::{ClassMutationHooks, Mutation, MutationHook, MutationOptions, MutationState};
pub use query::{ClassQueryHooks, QueryHandle, QueryHook};

use crate::error::CoreError;

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, CoreError> {
    serde_json::from_value(value).map_err(|e| CoreError::Decode {
        target: std::any::type_name::<T>().to_owned(),
        message: e.to_string(),
    })
}
