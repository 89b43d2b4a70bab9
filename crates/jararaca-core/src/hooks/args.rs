// Call-convention resolution for the dynamic `call` entry points.
//
// Query hooks accept either `(a, b, options?)` spread positionally or
// `([a, b], options?)` with the tuple first; which one a caller meant is
// decided from the method's declared arity. The rules are heuristic and can
// misread a single array parameter as a tuple; `use_query` and friends take
// the tuple explicitly for callers who need certainty.

use serde_json::Value;

use crate::controller::Arity;
use crate::error::CoreError;

/// Split `values` into method arguments and an options value (`Null` when
/// absent).
///
/// - more values than declared parameters: the last one is the options and
///   the rest are the arguments as given;
/// - exactly the declared count and the first is not an array: every value
///   is an argument;
/// - otherwise the first value is the argument tuple.
pub(crate) fn resolve_query_call(declared: usize, mut values: Vec<Value>) -> (Vec<Value>, Value) {
    if values.len() > declared {
        let options = values.pop().unwrap_or(Value::Null);
        return (values, options);
    }
    if values.len() == declared && !values.first().is_some_and(Value::is_array) {
        return (values, Value::Null);
    }
    (first_as_tuple(values), Value::Null)
}

/// Resolution for paged hooks, which take one aggregated arguments value.
/// The distance between declared and supplied counts decides: zero means
/// the values are the arguments; more than one means the last value is the
/// options.
pub(crate) fn resolve_infinite_call(declared: usize, values: Vec<Value>) -> (Vec<Value>, Value) {
    let diff = declared.abs_diff(values.len());
    let options = if diff > 1 {
        values.last().cloned().unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    let args = if diff == 0 {
        values
    } else {
        first_as_tuple(values)
    };
    (args, options)
}

fn first_as_tuple(values: Vec<Value>) -> Vec<Value> {
    match values.into_iter().next() {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![single],
    }
}

/// Positional arguments for a mutation payload: a method with at most one
/// declared parameter (a rest parameter declares none) receives the payload
/// itself, a wider one receives the payload array spread.
pub(crate) fn mutation_args(
    method: &str,
    arity: Arity,
    payload: Value,
) -> Result<Vec<Value>, CoreError> {
    match arity {
        Arity::Fixed(0) => Ok(Vec::new()),
        Arity::Fixed(1) | Arity::Variadic => Ok(vec![payload]),
        Arity::Fixed(_) => match payload {
            Value::Array(items) => Ok(items),
            other => Err(CoreError::InvalidPayload {
                method: method.to_owned(),
                reason: format!("expected an array of arguments, got {}", kind(&other)),
            }),
        },
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn spread_arguments_at_declared_count() {
        let (args, options) = resolve_query_call(2, vec![json!(1), json!("a")]);
        assert_eq!(args, vec![json!(1), json!("a")]);
        assert_eq!(options, Value::Null);
    }

    #[test]
    fn tuple_first_when_first_is_array() {
        let (args, options) = resolve_query_call(2, vec![json!([1, "a"]), json!({ "retry": 1 })]);
        assert_eq!(args, vec![json!(1), json!("a")]);
        assert_eq!(options, Value::Null);
    }

    #[test]
    fn surplus_value_is_options() {
        let (args, options) = resolve_query_call(1, vec![json!(5), json!({ "staleTime": 10 })]);
        assert_eq!(args, vec![json!(5)]);
        assert_eq!(options, json!({ "staleTime": 10 }));

        let (args, options) = resolve_query_call(0, vec![json!({ "enabled": false })]);
        assert!(args.is_empty());
        assert_eq!(options, json!({ "enabled": false }));

        let (args, options) =
            resolve_query_call(2, vec![json!(1), json!(2), json!({ "retry": 0 })]);
        assert_eq!(args, vec![json!(1), json!(2)]);
        assert_eq!(options, json!({ "retry": 0 }));
    }

    #[test]
    fn fewer_values_take_first_as_tuple() {
        let (args, _) = resolve_query_call(2, vec![json!([3, 4])]);
        assert_eq!(args, vec![json!(3), json!(4)]);
        let (args, _) = resolve_query_call(2, vec![]);
        assert!(args.is_empty());
        let (args, _) = resolve_query_call(2, vec![json!(7)]);
        assert_eq!(args, vec![json!(7)]);
    }

    #[test]
    fn single_array_parameter_is_read_as_tuple() {
        // The documented ambiguity: an array argument is unwrapped.
        let (args, _) = resolve_query_call(1, vec![json!([1, 2])]);
        assert_eq!(args, vec![json!(1), json!(2)]);
    }

    #[test]
    fn infinite_resolution_uses_distance() {
        let (args, options) = resolve_infinite_call(1, vec![json!({ "page_size": 5 })]);
        assert_eq!(args, vec![json!({ "page_size": 5 })]);
        assert_eq!(options, Value::Null);

        let (args, options) =
            resolve_infinite_call(1, vec![json!([{ "page_size": 5 }]), json!(null), json!({ "retry": 2 })]);
        assert_eq!(args, vec![json!({ "page_size": 5 })]);
        assert_eq!(options, json!({ "retry": 2 }));

        let (args, options) = resolve_infinite_call(2, vec![json!([1, 2])]);
        assert_eq!(args, vec![json!(1), json!(2)]);
        assert_eq!(options, Value::Null);
    }

    #[test]
    fn mutation_payload_spreading() {
        assert_eq!(mutation_args("m", Arity::Fixed(1), json!([1, 2])).unwrap(), vec![json!([1, 2])]);
        assert_eq!(
            mutation_args("m", Arity::Fixed(2), json!(["a", "b"])).unwrap(),
            vec![json!("a"), json!("b")]
        );
        assert!(mutation_args("m", Arity::Fixed(0), json!(1)).unwrap().is_empty());
        assert_eq!(mutation_args("m", Arity::Variadic, json!([1])).unwrap(), vec![json!([1])]);
        assert!(matches!(
            mutation_args("m", Arity::Fixed(2), json!({})),
            Err(CoreError::InvalidPayload { .. })
        ));
    }
}
