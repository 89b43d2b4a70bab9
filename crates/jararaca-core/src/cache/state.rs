use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{CoreError, SharedError};

// ── QueryData ────────────────────────────────────────────────────────

/// A successfully fetched value and when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryData {
    pub data: Value,
    pub updated_at: Instant,
}

impl QueryData {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            updated_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.updated_at.elapsed()
    }
}

// ── QueryState ───────────────────────────────────────────────────────

/// The lifecycle of a cached query.
#[derive(Debug, Clone, Default)]
pub enum QueryState {
    /// Known to the cache, never fetched.
    #[default]
    Created,

    /// First fetch in progress.
    Loading,

    /// Refetch in progress; holds the previous data.
    Fetching(QueryData),

    /// Fetch succeeded.
    Loaded(QueryData),

    /// Data was invalidated; the next fetch reloads it.
    Invalid(QueryData),

    /// The last fetch failed. Data from an earlier success is kept.
    Failed {
        error: SharedError,
        data: Option<QueryData>,
    },
}

impl QueryState {
    pub fn query_data(&self) -> Option<&QueryData> {
        match self {
            Self::Created | Self::Loading => None,
            Self::Fetching(data) | Self::Loaded(data) | Self::Invalid(data) => Some(data),
            Self::Failed { data, .. } => data.as_ref(),
        }
    }

    pub fn data(&self) -> Option<&Value> {
        self.query_data().map(|d| &d.data)
    }

    pub fn updated_at(&self) -> Option<Instant> {
        self.query_data().map(|d| d.updated_at)
    }

    pub fn error(&self) -> Option<&CoreError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self, Self::Loading | Self::Fetching(_))
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// The state shown while a fetch runs on top of `self`.
    pub(crate) fn to_pending(&self) -> Self {
        match self.query_data() {
            Some(data) => Self::Fetching(data.clone()),
            None => Self::Loading,
        }
    }
}

// ── QueryOptions ─────────────────────────────────────────────────────

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-query cache options.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// How long loaded data is served without refetching. Default: zero,
    /// so every `fetch` goes to the backend (deduplicated while in flight).
    pub stale_time: Duration,
    /// Extra attempts after a failure. Default: 0.
    pub retry: u32,
    pub retry_delay: Duration,
    /// A disabled query refuses to fetch.
    pub enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            retry: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            enabled: true,
        }
    }
}

impl QueryOptions {
    pub fn stale_time(self, stale_time: Duration) -> Self {
        Self { stale_time, ..self }
    }

    pub fn retry(self, retry: u32) -> Self {
        Self { retry, ..self }
    }

    pub fn retry_delay(self, retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            ..self
        }
    }

    pub fn enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    /// Read options from a camelCase JSON object
    /// (`staleTime`/`retryDelay` in milliseconds, `retry` as a count or
    /// boolean, `enabled`). Unknown fields are ignored; `null` gives the
    /// defaults.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let raw = RawOptions::deserialize(value).map_err(|e| CoreError::InvalidOptions {
            message: e.to_string(),
        })?;
        let defaults = Self::default();
        Ok(Self {
            stale_time: raw
                .stale_time
                .map_or(defaults.stale_time, Duration::from_millis),
            retry: match raw.retry {
                Some(RawRetry::Count(n)) => n,
                Some(RawRetry::Flag(true)) => u32::MAX,
                Some(RawRetry::Flag(false)) | None => defaults.retry,
            },
            retry_delay: raw
                .retry_delay
                .map_or(defaults.retry_delay, Duration::from_millis),
            enabled: raw.enabled.unwrap_or(defaults.enabled),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOptions {
    stale_time: Option<u64>,
    retry: Option<RawRetry>,
    retry_delay: Option<u64>,
    enabled: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRetry {
    Flag(bool),
    Count(u32),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[test]
    fn options_from_json() {
        let options = QueryOptions::from_value(&json!({
            "staleTime": 5000,
            "retry": 2,
            "enabled": false,
            "refetchOnWindowFocus": true
        }))
        .unwrap();
        assert_eq!(options.stale_time, Duration::from_secs(5));
        assert_eq!(options.retry, 2);
        assert_eq!(options.retry_delay, DEFAULT_RETRY_DELAY);
        assert!(!options.enabled);

        let options = QueryOptions::from_value(&json!({ "retry": false })).unwrap();
        assert_eq!(options.retry, 0);
        assert!(QueryOptions::from_value(&json!({ "retry": "x" })).is_err());
        assert!(QueryOptions::from_value(&Value::Null).unwrap().enabled);
    }

    #[test]
    fn failed_state_keeps_previous_data() {
        let data = QueryData::new(json!([1]));
        let state = QueryState::Failed {
            error: Arc::new(CoreError::Cancelled),
            data: Some(data),
        };
        assert_eq!(state.data(), Some(&json!([1])));
        assert!(state.error().is_some());
        assert!(matches!(state.to_pending(), QueryState::Fetching(_)));
        assert!(matches!(QueryState::Created.to_pending(), QueryState::Loading));
    }
}
