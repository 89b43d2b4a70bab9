// ── Core error types ──
//
// Errors raised while building hooks and running controller methods.
// Transport failures arrive wrapped in `Api`; the cache hands one failure
// to every waiter of a deduplicated fetch, hence `SharedError`.

use std::sync::Arc;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Setup errors ─────────────────────────────────────────────────
    #[error("Method {method:?} is not declared on {class}")]
    UnknownMethod { class: &'static str, method: String },

    // ── Invocation errors ────────────────────────────────────────────
    #[error("Invalid arguments for {method}: {message}")]
    ArgumentDecode { method: String, message: String },

    #[error("Cannot encode result of {method}: {message}")]
    ResultEncode { method: String, message: String },

    #[error("Cannot decode {target}: {message}")]
    Decode { target: String, message: String },

    #[error("Invalid payload for {method}: {reason}")]
    InvalidPayload { method: String, reason: String },

    #[error("Invalid options: {message}")]
    InvalidOptions { message: String },

    // ── Cache errors ─────────────────────────────────────────────────
    #[error("Query {key} is disabled")]
    QueryDisabled { key: String },

    #[error("Query cancelled")]
    Cancelled,

    // ── Transport errors ─────────────────────────────────────────────
    #[error(transparent)]
    Api(#[from] jararaca_api::Error),
}

/// A [`CoreError`] shared between every caller awaiting the same fetch.
pub type SharedError = Arc<CoreError>;

impl CoreError {
    /// Whether the operation was aborted rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Api(jararaca_api::Error::Cancelled)
        )
    }

    /// The underlying transport error, if any.
    pub fn api_error(&self) -> Option<&jararaca_api::Error> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }
}
