//! `jararaca request`: one backend call, printed to stdout.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use jararaca_api::{FilePart, HttpRequest, Method, ResponseBody, ResponseType};
use jararaca_config::Config;

use super::{build_backend, parse_value, split_pair};
use crate::cli::{GlobalOpts, RequestArgs, ResponseKind};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: RequestArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let backend = build_backend(config, global)?;
    let request = build_request(args)?;
    let target = format!(
        "{}{}",
        config.api.base_url.as_deref().unwrap_or_default().trim_end_matches('/'),
        request.path
    );

    debug!(method = %request.method, path = %request.path, "sending request");
    let body = backend
        .request(request)
        .await
        .map_err(|e| CliError::from_api(e, &target))?;

    match body {
        ResponseBody::Empty => Ok(()),
        ResponseBody::Bytes(bytes) => Ok(output::print_bytes(&bytes)?),
        other => {
            let rendered = output::render_value(global.output, &other.into_value())?;
            Ok(output::print_output(&rendered)?)
        }
    }
}

pub fn build_request(args: RequestArgs) -> Result<HttpRequest, CliError> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
        CliError::Validation {
            field: "method".into(),
            reason: format!("not an HTTP method: {}", args.method),
        }
    })?;

    let mut request = HttpRequest::new(method, args.path).response_type(match args.response {
        ResponseKind::Json => ResponseType::Json,
        ResponseKind::Text => ResponseType::Text,
        ResponseKind::Bytes => ResponseType::Bytes,
    });

    for raw in &args.params {
        let (name, value) = split_pair("param", raw)?;
        request = request.path_param(name, parse_value(value));
    }

    // Repeated names collect into an array, serialized as repeated pairs.
    let mut query = Map::new();
    for raw in &args.query {
        let (name, value) = split_pair("query", raw)?;
        let value = parse_value(value);
        match query.get_mut(name) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => *existing = Value::Array(vec![existing.take(), value]),
            None => {
                query.insert(name.to_owned(), value);
            }
        }
    }
    request = request.query_object(Value::Object(query));

    for raw in &args.headers {
        let (name, value) = split_pair("header", raw)?;
        request = request.header(name, value);
    }

    if let Some(body) = args.body {
        let text = match body.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path)?,
            None => body,
        };
        let value: Value = serde_json::from_str(&text)?;
        request = request.json(value)?;
    } else if let Some(path) = args.file {
        request = request.file(file_part(&path)?);
    }

    Ok(request)
}

fn file_part(path: &Path) -> Result<FilePart, CliError> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map_or_else(|| "file".to_owned(), |n| n.to_string_lossy().into_owned());
    Ok(FilePart::new(name, bytes))
}
