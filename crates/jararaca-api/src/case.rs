//! Recursive key-casing translation for JSON payloads.
//!
//! Outgoing bodies are written in lowerCamelCase by callers and sent as
//! snake_case; responses and socket frames travel the other way. Only
//! objects and arrays are descended into, everything else passes through.

use serde_json::{Map, Value};

/// `fooBarBaz` -> `foo_bar_baz`. Every ASCII uppercase letter becomes `_`
/// followed by its lowercase form.
pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `foo_bar_baz` -> `fooBarBaz`. Only an underscore followed by an ASCII
/// lowercase letter is collapsed, so `MESSAGE_ID` and `a__b` are left alone
/// where the pattern does not match.
pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '_' {
            if let Some(next) = chars.peek().copied().filter(char::is_ascii_lowercase) {
                out.push(next.to_ascii_uppercase());
                chars.next();
                continue;
            }
        }
        out.push(ch);
    }
    out
}

/// Recursively rewrite object keys from camelCase to snake_case.
pub fn recursive_camel_to_snake(value: Value) -> Value {
    rename_keys(value, &camel_to_snake)
}

/// Recursively rewrite object keys from snake_case to camelCase.
pub fn recursive_snake_to_camel(value: Value) -> Value {
    rename_keys(value, &snake_to_camel)
}

fn rename_keys(value: Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| rename_keys(item, rename))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (rename(&key), rename_keys(item, rename)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn single_keys() {
        assert_eq!(camel_to_snake("pageSize"), "page_size");
        assert_eq!(camel_to_snake("unpaginatedTotal"), "unpaginated_total");
        assert_eq!(camel_to_snake("id"), "id");
        assert_eq!(snake_to_camel("total_pages"), "totalPages");
        assert_eq!(snake_to_camel("value"), "value");
    }

    #[test]
    fn uppercase_identifier_field_survives_snake_to_camel() {
        assert_eq!(snake_to_camel("MESSAGE_ID"), "MESSAGE_ID");
        assert_eq!(snake_to_camel("a_1"), "a_1");
    }

    #[test]
    fn nested_payloads_are_translated() {
        let body = json!({
            "pageSize": 10,
            "filters": [{ "createdAt": "2024-01-01", "tagIds": [1, 2] }],
            "ownerName": null
        });

        let snake = recursive_camel_to_snake(body.clone());
        assert_eq!(
            snake,
            json!({
                "page_size": 10,
                "filters": [{ "created_at": "2024-01-01", "tag_ids": [1, 2] }],
                "owner_name": null
            })
        );
        assert_eq!(recursive_snake_to_camel(snake), body);
    }

    #[test]
    fn primitives_pass_through() {
        assert_eq!(recursive_snake_to_camel(json!("some_text")), json!("some_text"));
        assert_eq!(recursive_camel_to_snake(json!(42)), json!(42));
        assert_eq!(
            recursive_camel_to_snake(json!(["fooBar", { "fooBar": 1 }])),
            json!(["fooBar", { "foo_bar": 1 }])
        );
    }

    #[test]
    fn camel_round_trip_for_alphanumeric_keys() {
        for key in ["a", "abc", "aB", "userId2", "x1Y2Z3", "longerCamelCaseKey"] {
            assert_eq!(snake_to_camel(&camel_to_snake(key)), key, "key {key}");
        }
    }
}
