//! Configuration for jararaca clients.
//!
//! One TOML file layered under environment variables, and translation to
//! the API crate's transport, backend and socket settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use jararaca_api::auth::DEFAULT_REFRESH_PATH;
use jararaca_api::{ReconnectConfig, ReqwestBackend, TlsMode, TransportConfig, WebSocketConfig};

/// Prefix of environment overrides; `__` separates nested keys
/// (`JARARACA_API__BASE_URL`).
pub const ENV_PREFIX: &str = "JARARACA_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error(transparent)]
    Api(#[from] jararaca_api::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub websocket: WebSocketSettings,
    pub logging: LoggingConfig,

    /// Root query-key prefix shared by every cache key.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_keys: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Backend base URL (e.g. "https://api.example.com/v1").
    pub base_url: Option<String>,

    pub timeout_secs: u64,

    /// Accept any TLS certificate.
    pub insecure: bool,

    /// PEM file with a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Translate JSON keys between snake_case and camelCase.
    pub case_conversion: bool,

    /// Endpoint exchanging a refresh token for new credentials.
    pub refresh_path: String,

    pub user_agent: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
            insecure: false,
            ca_cert: None,
            case_conversion: true,
            refresh_path: DEFAULT_REFRESH_PATH.into(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketSettings {
    /// Socket URL (`ws://` or `wss://`).
    pub url: Option<String>,

    pub reconnect_delay_ms: u64,

    /// Failed connection attempts tolerated in a row; unset retries forever.
    pub max_retries: Option<u32>,

    /// Extra query parameters sent on connect.
    pub query: BTreeMap<String, String>,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_delay_ms: 2000,
            max_retries: None,
            query: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when no verbosity
    /// flag or `RUST_LOG` is given.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".into(),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "jararaca", "jararaca").map_or_else(
        || PathBuf::from(".jararaca.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Loading and saving ──────────────────────────────────────────────

/// Load defaults, then `path` (or [`config_path`]) if it exists, then
/// `JARARACA_*` environment variables, and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Write `config` as TOML to `path`, creating parent directories.
pub fn save_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.timeout_secs == 0 {
            return Err(invalid("api.timeout_secs", "must be greater than zero"));
        }
        if !self.api.refresh_path.starts_with('/') {
            return Err(invalid("api.refresh_path", "must start with '/'"));
        }
        if let Some(url) = &self.api.base_url {
            parse_url("api.base_url", url)?;
        }
        if let Some(url) = &self.websocket.url {
            let parsed = parse_url("websocket.url", url)?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(invalid(
                    "websocket.url",
                    format!("expected a ws:// or wss:// URL, got {url}"),
                ));
            }
        }
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = self
            .api
            .base_url
            .as_deref()
            .ok_or_else(|| invalid("api.base_url", "not set"))?;
        parse_url("api.base_url", url)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let tls = if self.api.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ca) = &self.api.ca_cert {
            TlsMode::CustomCa(ca.clone())
        } else {
            TlsMode::System
        };
        let mut transport = TransportConfig {
            tls,
            timeout: Duration::from_secs(self.api.timeout_secs),
            ..TransportConfig::default()
        };
        if let Some(agent) = &self.api.user_agent {
            transport.user_agent.clone_from(agent);
        }
        transport
    }

    pub fn backend(&self) -> Result<ReqwestBackend, ConfigError> {
        let backend = ReqwestBackend::new(self.base_url()?, &self.transport_config())?;
        Ok(backend.with_case_conversion(self.api.case_conversion))
    }

    pub fn websocket_config(&self) -> Result<WebSocketConfig, ConfigError> {
        let url = self
            .websocket
            .url
            .as_deref()
            .ok_or_else(|| invalid("websocket.url", "not set"))?;
        let mut config = WebSocketConfig::new(parse_url("websocket.url", url)?).with_reconnect(
            ReconnectConfig {
                delay: Duration::from_millis(self.websocket.reconnect_delay_ms),
                max_retries: self.websocket.max_retries,
            },
        );
        for (name, value) in &self.websocket.query {
            config = config.with_query(name, value);
        }
        Ok(config)
    }

    pub fn root_query_keys(&self) -> Vec<Value> {
        self.query_keys.clone()
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse()
        .map_err(|e| invalid(field, format!("invalid URL {raw}: {e}")))
}
