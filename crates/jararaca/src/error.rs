//! CLI error types with miette diagnostics.
//!
//! Maps API and config failures into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use jararaca_config::ConfigError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(jararaca::connection_failed),
        help("Check that the backend is running and reachable, or pass --base-url.")
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: jararaca_api::Error,
    },

    #[error("TLS error: {reason}")]
    #[diagnostic(
        code(jararaca::tls_error),
        help("Use --insecure (-k) to accept the certificate, or set api.ca_cert in the config.")
    )]
    TlsError { reason: String },

    #[error("Socket connection failed: {reason}")]
    #[diagnostic(
        code(jararaca::socket_failed),
        help("Check websocket.url and websocket.max_retries in the config.")
    )]
    SocketFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Session expired")]
    #[diagnostic(
        code(jararaca::session_expired),
        help("Pass a fresh --token, or a --refresh-token to renew it automatically.")
    )]
    SessionExpired,

    // ── Responses ────────────────────────────────────────────────────
    #[error("{path} not found")]
    #[diagnostic(code(jararaca::not_found))]
    NotFound { path: String },

    #[error("HTTP {status}: {body}")]
    #[diagnostic(code(jararaca::api_error))]
    Api { status: u16, body: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(jararaca::timeout),
        help("Increase the timeout with --timeout or api.timeout_secs.")
    )]
    Timeout { seconds: u64 },

    #[error(transparent)]
    #[diagnostic(code(jararaca::api))]
    Request(jararaca_api::Error),

    // ── Input ────────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(jararaca::validation))]
    Validation { field: String, reason: String },

    #[error("No base URL configured")]
    #[diagnostic(
        code(jararaca::no_base_url),
        help(
            "Pass --base-url, set JARARACA_API__BASE_URL, or run: jararaca config init --base-url <URL>\n\
             Config file: {path}"
        )
    )]
    NoBaseUrl { path: String },

    #[error("Config file already exists at {path}")]
    #[diagnostic(code(jararaca::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(jararaca::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(jararaca::json), help("Check the JSON body and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::TlsError { .. } | Self::SocketFailed { .. } => {
                exit_code::CONNECTION
            }
            Self::SessionExpired => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. }
            | Self::NoBaseUrl { .. }
            | Self::ConfigExists { .. }
            | Self::Json(_)
            | Self::Config(ConfigError::Validation { .. }) => exit_code::USAGE,
            Self::Api { status, .. } if *status == 401 || *status == 403 => exit_code::AUTH,
            _ => exit_code::GENERAL,
        }
    }

    /// Wrap an API failure, naming `target` (a URL or path) where the
    /// variant reports one.
    pub fn from_api(err: jararaca_api::Error, target: &str) -> Self {
        use jararaca_api::Error as E;
        if matches!(&err, E::Transport(e) if e.is_connect()) {
            return Self::ConnectionFailed {
                url: target.to_owned(),
                source: err,
            };
        }
        match err {
            E::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            E::Tls(reason) => Self::TlsError { reason },
            E::SessionExpired => Self::SessionExpired,
            E::WebSocketConnect(reason) => Self::SocketFailed { reason },
            E::Status { status: 404, .. } => Self::NotFound {
                path: target.to_owned(),
            },
            E::Status { status, body, .. } => Self::Api { status, body },
            other => Self::Request(other),
        }
    }
}

impl From<jararaca_api::Error> for CliError {
    fn from(err: jararaca_api::Error) -> Self {
        Self::from_api(err, "(backend)")
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Api(api) => api.into(),
            other => Self::Config(other),
        }
    }
}
