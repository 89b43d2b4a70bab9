use thiserror::Error;

/// Top-level error type for the `jararaca-api` crate.
///
/// Covers every failure mode of the HTTP backend, the session interceptor
/// and the socket multiplexer. `jararaca-core` wraps these in `CoreError`.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The request was aborted through its cancellation token.
    #[error("Request cancelled")]
    Cancelled,

    // ── HTTP status ─────────────────────────────────────────────────
    /// Non-success HTTP response.
    ///
    /// `scope` and `code` carry the `scope` and `error` response headers,
    /// which the session interceptor uses to recognise expired tokens.
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        scope: Option<String>,
        code: Option<String>,
        body: String,
    },

    // ── Session ─────────────────────────────────────────────────────
    /// Credentials were rejected and could not be refreshed.
    #[error("Session expired -- log in again")]
    SessionExpired,

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// The request could not be built (bad header, bad multipart part, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// HTTP status code, if the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` for the auth-scoped 401 that signals an expired
    /// access token (`scope: auth`, `error: invalid_token`).
    pub fn is_invalid_token(&self) -> bool {
        matches!(
            self,
            Self::Status { status: 401, scope: Some(scope), code: Some(code), .. }
                if scope == "auth" && code == "invalid_token"
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether a failed credential refresh ends the session.
    ///
    /// A 401 from the refresh endpoint, or any failure that did not come
    /// from the HTTP exchange at all, is definitive. Other HTTP and network
    /// failures leave the credentials in place.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 401,
            Self::Transport(e) => e.status().is_some_and(|s| s.as_u16() == 401),
            Self::Timeout { .. } | Self::Cancelled | Self::Tls(_) => false,
            _ => true,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
