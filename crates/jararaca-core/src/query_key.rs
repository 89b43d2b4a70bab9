// ── Cache-key namespace ──
//
// Keys are `[prefix..., class, method, ("infinite"), [args...]]`. Equality
// and hashing go through a canonical JSON rendering with sorted object keys,
// so structurally equal arguments always produce the same key.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Segment separating paged keys from plain keys of the same method.
pub const INFINITE_MARKER: &str = "infinite";

/// A deterministic, structurally compared cache key.
#[derive(Clone)]
pub struct QueryKey {
    segments: Vec<Value>,
    canonical: String,
}

impl QueryKey {
    pub fn new(segments: Vec<Value>) -> Self {
        let mut canonical = String::new();
        write_canonical_seq(&segments, &mut canonical);
        Self {
            segments,
            canonical,
        }
    }

    pub fn segments(&self) -> &[Value] {
        &self.segments
    }

    /// Canonical rendering used for equality and hashing.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a segment.
    pub fn push(mut self, segment: impl Into<Value>) -> Self {
        self.segments.push(segment.into());
        Self::new(self.segments)
    }

    /// Whether every segment of `prefix` structurally equals the
    /// corresponding leading segment of `self`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix
                .segments
                .iter()
                .zip(&self.segments)
                .all(|(a, b)| canonical(a) == canonical(b))
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.canonical)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl Serialize for QueryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.segments.serialize(serializer)
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(segments: Vec<Value>) -> Self {
        Self::new(segments)
    }
}

// ── Canonical form ───────────────────────────────────────────────────

/// Render `value` as JSON with object keys sorted at every depth.
pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => write_canonical_seq(items, out),
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_seq(items: &[Value], out: &mut String) {
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_canonical(item, out);
    }
    out.push(']');
}

// ── Key builders ─────────────────────────────────────────────────────

/// `[prefix..., class, method]`: invalidates every call of a method.
pub fn base_key(prefix: &[Value], class: &str, method: &str) -> QueryKey {
    let mut segments = Vec::with_capacity(prefix.len() + 3);
    segments.extend_from_slice(prefix);
    segments.push(Value::from(class));
    segments.push(Value::from(method));
    QueryKey::new(segments)
}

/// `[prefix..., class, method, [args...]]`.
pub fn key(prefix: &[Value], class: &str, method: &str, args: &[Value]) -> QueryKey {
    base_key(prefix, class, method).push(Value::Array(args.to_vec()))
}

/// `[prefix..., class, method, "infinite"]`.
pub fn infinite_base_key(prefix: &[Value], class: &str, method: &str) -> QueryKey {
    base_key(prefix, class, method).push(INFINITE_MARKER)
}

/// `[prefix..., class, method, "infinite", [args...]]`.
pub fn infinite_key(prefix: &[Value], class: &str, method: &str, args: &[Value]) -> QueryKey {
    infinite_base_key(prefix, class, method).push(Value::Array(args.to_vec()))
}
