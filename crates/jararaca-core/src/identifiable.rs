use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record carried as `{ id, data }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifiable<T> {
    pub id: String,
    pub data: T,
}

/// The same record with `data`'s fields lifted next to `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unified<T> {
    pub id: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T> From<Identifiable<T>> for Unified<T> {
    fn from(value: Identifiable<T>) -> Self {
        Self {
            id: value.id,
            data: value.data,
        }
    }
}

/// Flatten `{ id, data: {...} }` into `{ id, ...data }` on untyped JSON.
/// Fields of `data` win over the outer fields; values that are not objects,
/// or whose `data` is not an object, are returned unchanged.
pub fn unify_identifiable(value: Value) -> Value {
    let Value::Object(mut outer) = value else {
        return value;
    };
    match outer.remove("data") {
        Some(Value::Object(inner)) => {
            outer.extend(inner);
            Value::Object(outer)
        }
        Some(other) => {
            outer.insert("data".to_owned(), other);
            Value::Object(outer)
        }
        None => Value::Object(outer),
    }
}
