// HTTP backend abstraction
//
// Controllers never talk to reqwest directly: they describe a request as an
// `HttpRequest` (method, `:param` path, query, headers, body) and hand it to
// whatever `HttpBackend` they were constructed with. `ReqwestBackend` is the
// production implementation; `ScopedBackend` layers per-call overrides such
// as a cancellation token on top of any other backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::case::{recursive_camel_to_snake, recursive_snake_to_camel};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Multipart field name used when the body is a single file.
pub const FILE_FIELD: &str = "file";

// ── Request ──────────────────────────────────────────────────────────

/// How the response body should be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Json,
    Text,
    Bytes,
}

/// A binary file payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl FilePart {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn into_part(self) -> Result<Part, Error> {
        let part = Part::bytes(self.bytes.to_vec()).file_name(self.file_name);
        match self.content_type {
            Some(ct) => Ok(part.mime_str(&ct)?),
            None => Ok(part),
        }
    }
}

/// One field of an explicit multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Text(String),
    File(FilePart),
}

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// JSON document, key-translated to snake_case when the backend does
    /// case conversion.
    Json(Value),
    /// A raw file, sent as a multipart form with a single `file` field.
    File(FilePart),
    /// An explicit multipart form.
    Multipart(Vec<(String, FormField)>),
}

/// A single backend request, described independently of any HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the backend base URL; may contain `:name` placeholders.
    pub path: String,
    pub path_params: Map<String, Value>,
    pub headers: Vec<(String, String)>,
    pub query: Map<String, Value>,
    pub body: RequestBody,
    pub response_type: ResponseType,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            path_params: Map::new(),
            headers: Vec::new(),
            query: Map::new(),
            body: RequestBody::Empty,
            response_type: ResponseType::Json,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Merge every field of a JSON object into the query string.
    /// Non-object values are ignored.
    pub fn query_object(mut self, value: Value) -> Self {
        if let Value::Object(map) = value {
            self.query.extend(map);
        }
        self
    }

    /// Set a header, replacing any previous value (case-insensitive name match).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(mut self, body: impl serde::Serialize) -> Result<Self, Error> {
        let value = serde_json::to_value(body).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn file(mut self, file: FilePart) -> Self {
        self.body = RequestBody::File(file);
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ── Response ─────────────────────────────────────────────────────────

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl ResponseBody {
    /// Deserialize the body into `T`. An empty body deserializes from `null`.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, Error> {
        let result = match &self {
            Self::Empty => serde_json::from_value(Value::Null),
            Self::Json(value) => serde_json::from_value(value.clone()),
            Self::Text(text) => serde_json::from_str(text),
            Self::Bytes(bytes) => serde_json::from_slice(bytes),
        };
        result.map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: self.lossy_text(),
        })
    }

    /// The body as a JSON value. Text becomes a JSON string; bytes become
    /// an array of numbers.
    pub fn into_value(self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Json(value) => value,
            Self::Text(text) => Value::String(text),
            Self::Bytes(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        }
    }

    fn lossy_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text.clone(),
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

// ── Backend trait ────────────────────────────────────────────────────

/// Something that can execute an [`HttpRequest`].
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn request(&self, request: HttpRequest) -> Result<ResponseBody, Error>;
}

#[async_trait]
impl<B: HttpBackend + ?Sized> HttpBackend for Arc<B> {
    async fn request(&self, request: HttpRequest) -> Result<ResponseBody, Error> {
        (**self).request(request).await
    }
}

// ── Per-call overrides ───────────────────────────────────────────────

/// Options applied to every request issued through a [`ScopedBackend`].
#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    /// Aborts in-flight requests when cancelled.
    pub cancel: Option<CancellationToken>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl RequestOverrides {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Layer `other` on top of `self`; values set in `other` win.
    pub fn merge(&self, other: &Self) -> Self {
        let mut headers = self.headers.clone();
        for (name, value) in &other.headers {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        Self {
            cancel: other.cancel.clone().or_else(|| self.cancel.clone()),
            headers,
            timeout: other.timeout.or(self.timeout),
        }
    }
}

/// Wraps a backend with [`RequestOverrides`]. Headers already present on a
/// request are kept; the override timeout only applies when the request
/// has none of its own.
pub struct ScopedBackend {
    inner: Arc<dyn HttpBackend>,
    overrides: RequestOverrides,
}

impl ScopedBackend {
    pub fn new(inner: Arc<dyn HttpBackend>, overrides: RequestOverrides) -> Self {
        Self { inner, overrides }
    }

    pub fn overrides(&self) -> &RequestOverrides {
        &self.overrides
    }
}

#[async_trait]
impl HttpBackend for ScopedBackend {
    async fn request(&self, mut request: HttpRequest) -> Result<ResponseBody, Error> {
        for (name, value) in &self.overrides.headers {
            if request.header_value(name).is_none() {
                request.headers.push((name.clone(), value.clone()));
            }
        }
        if request.timeout.is_none() {
            request.timeout = self.overrides.timeout;
        }

        match &self.overrides.cancel {
            Some(cancel) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        trace!(path = %request.path, "request cancelled");
                        Err(Error::Cancelled)
                    }
                    result = self.inner.request(request.clone()) => result,
                }
            }
            None => self.inner.request(request).await,
        }
    }
}

// ── reqwest implementation ───────────────────────────────────────────

/// Production backend over `reqwest`.
///
/// With case conversion on (the default), JSON request bodies are sent in
/// snake_case and JSON responses are returned in camelCase.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    http: reqwest::Client,
    base_url: Url,
    case_conversion: bool,
}

impl ReqwestBackend {
    /// Create a backend from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, base_url))
    }

    /// Create a backend with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            case_conversion: true,
        }
    }

    pub fn with_case_conversion(mut self, enabled: bool) -> Self {
        self.case_conversion = enabled;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a request path (placeholders already substituted) against
    /// the base URL.
    pub(crate) fn url_for(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    fn build_body(
        &self,
        builder: reqwest::RequestBuilder,
        body: RequestBody,
    ) -> Result<reqwest::RequestBuilder, Error> {
        Ok(match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => {
                let value = if self.case_conversion {
                    recursive_camel_to_snake(value)
                } else {
                    value
                };
                builder.json(&value)
            }
            RequestBody::File(file) => {
                builder.multipart(Form::new().part(FILE_FIELD, file.into_part()?))
            }
            RequestBody::Multipart(fields) => {
                let mut form = Form::new();
                for (name, field) in fields {
                    form = match field {
                        FormField::Text(text) => form.text(name, text),
                        FormField::File(file) => form.part(name, file.into_part()?),
                    };
                }
                builder.multipart(form)
            }
        })
    }

    async fn decode(
        &self,
        resp: reqwest::Response,
        response_type: ResponseType,
    ) -> Result<ResponseBody, Error> {
        match response_type {
            ResponseType::Text => Ok(ResponseBody::Text(resp.text().await?)),
            ResponseType::Bytes => Ok(ResponseBody::Bytes(resp.bytes().await?)),
            ResponseType::Json => {
                let bytes = resp.bytes().await?;
                if bytes.is_empty() {
                    return Ok(ResponseBody::Empty);
                }
                let value: Value =
                    serde_json::from_slice(&bytes).map_err(|e| Error::Deserialization {
                        message: e.to_string(),
                        body: String::from_utf8_lossy(&bytes).into_owned(),
                    })?;
                Ok(ResponseBody::Json(if self.case_conversion {
                    recursive_snake_to_camel(value)
                } else {
                    value
                }))
            }
        }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn request(&self, request: HttpRequest) -> Result<ResponseBody, Error> {
        let path = substitute_path_params(&request.path, &request.path_params);
        let url = self.url_for(&path)?;
        debug!(method = %request.method, url = %url, "sending request");

        let mut builder = self.http.request(request.method.clone(), url);

        let pairs = query_pairs(&request.query);
        if !pairs.is_empty() {
            builder = builder.query(&pairs);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = self.build_body(builder, request.body)?;

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_secs: request.timeout.map_or(0, |t| t.as_secs()),
                }
            } else {
                Error::Transport(e)
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let header = |name: &str| {
                resp.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            };
            let scope = header("scope");
            let code = header("error");
            let body = resp.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), ?scope, ?code, "request failed");
            return Err(Error::Status {
                status: status.as_u16(),
                scope,
                code,
                body,
            });
        }

        self.decode(resp, request.response_type).await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Replace `:name` placeholders with percent-encoded parameter values.
///
/// A placeholder is `:` followed by the longest run of ASCII alphanumerics
/// and underscores, so `:id` never matches inside `:idx`. Placeholders with
/// no matching parameter are left as-is.
pub fn substitute_path_params(path: &str, params: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(idx) = rest.find(':') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        let end = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..end];
        match params.get(name) {
            Some(value) if !name.is_empty() => {
                out.push_str(&urlencoding::encode(&scalar_to_string(value)));
            }
            _ => {
                out.push(':');
                out.push_str(name);
            }
        }
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

/// Flatten a query object into key/value pairs. Nulls are dropped and
/// arrays repeat the key once per element.
pub fn query_pairs(query: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(query.len());
    for (key, value) in query {
        match value {
            Value::Null => {}
            Value::Array(items) => pairs.extend(
                items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| (key.clone(), scalar_to_string(item))),
            ),
            other => pairs.push((key.clone(), scalar_to_string(other))),
        }
    }
    pairs
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
