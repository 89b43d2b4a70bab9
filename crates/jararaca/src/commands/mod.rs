//! Command handlers and the backend wiring they share.

pub mod config_cmd;
pub mod key;
pub mod listen;
pub mod request;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use jararaca_api::{
    CredentialStore, Credentials, HttpBackend, HttpCredentialRefresher, SessionBackend,
};
use jararaca_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file this invocation reads and writes.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(jararaca_config::config_path)
}

/// Apply command-line overrides to the loaded config and re-validate.
pub fn effective_config(mut config: Config, global: &GlobalOpts) -> Result<Config, CliError> {
    if let Some(url) = &global.base_url {
        config.api.base_url = Some(url.clone());
    }
    if global.insecure {
        config.api.insecure = true;
    }
    if let Some(timeout) = global.timeout {
        config.api.timeout_secs = timeout;
    }
    config.validate()?;
    Ok(config)
}

/// The backend for this invocation. With `--token` requests carry bearer
/// credentials and expired tokens are refreshed through `api.refresh_path`.
pub fn build_backend(config: &Config, global: &GlobalOpts) -> Result<Arc<dyn HttpBackend>, CliError> {
    if config.api.base_url.is_none() {
        return Err(CliError::NoBaseUrl {
            path: config_file(global).display().to_string(),
        });
    }
    let raw: Arc<dyn HttpBackend> = Arc::new(config.backend()?);
    let Some(token) = &global.token else {
        return Ok(raw);
    };

    let credentials = Credentials::new(
        token.clone(),
        global.refresh_token.clone().unwrap_or_default(),
    );
    let refresher = HttpCredentialRefresher::new(Arc::clone(&raw), config.api.refresh_path.clone());
    Ok(Arc::new(SessionBackend::new(
        raw,
        CredentialStore::with_credentials(credentials),
        Arc::new(refresher),
    )))
}

/// Split `NAME=VALUE`.
pub fn split_pair<'a>(field: &str, raw: &'a str) -> Result<(&'a str, &'a str), CliError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name, value)),
        _ => Err(CliError::Validation {
            field: field.into(),
            reason: format!("expected NAME=VALUE, got {raw:?}"),
        }),
    }
}

/// Values that parse as JSON keep their type; anything else is a string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(split_pair("query", "q=a=b").unwrap(), ("q", "a=b"));
        assert_eq!(split_pair("query", "empty=").unwrap(), ("empty", ""));
        assert!(split_pair("query", "novalue").is_err());
        assert!(split_pair("query", "=x").is_err());
    }

    #[test]
    fn values_keep_json_types() {
        assert_eq!(parse_value("7"), json!(7));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("[1,2]"), json!([1, 2]));
        assert_eq!(parse_value("alice"), json!("alice"));
        assert_eq!(parse_value("\"7\""), json!("7"));
    }
}
