//! Socket event multiplexer with fixed-delay reconnect.
//!
//! One background task owns the physical connection. Every inbound frame is
//! decoded as UTF-8 JSON, its keys are translated to camelCase, and the
//! `message` payload is dispatched to the handlers registered for the
//! frame's `MESSAGE_ID`. Handlers live in a [`HandlerRegistry`] that
//! outlives individual connections, so reconnecting never duplicates them.
//!
//! # Example
//!
//! ```rust,ignore
//! use jararaca_api::websocket::{HandlerRegistry, WebSocketConfig, WebSocketHandle};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = HandlerRegistry::new();
//! let _ping = registry.subscribe("PING", |payload: serde_json::Value| {
//!     println!("ping: {payload}");
//! });
//!
//! let config = WebSocketConfig::new(url::Url::parse("wss://api.example.com/ws")?);
//! let handle = WebSocketHandle::connect(config, registry, CancellationToken::new())?;
//! // ...
//! handle.shutdown();
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::case::recursive_snake_to_camel;
use crate::error::Error;

// ── Wire format ──────────────────────────────────────────────────────

/// Field holding the event identifier. Never case-translated.
pub const MESSAGE_ID_FIELD: &str = "MESSAGE_ID";

/// Field holding the event payload.
pub const MESSAGE_FIELD: &str = "message";

/// Delay between a close and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

// ── ConnectionStatus ─────────────────────────────────────────────────

/// Lifecycle of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    /// Closed by the peer or by shutdown.
    Closed,
    /// Ended by a transport error or a failed connection attempt.
    ClosedError,
}

// ── EventId ──────────────────────────────────────────────────────────

/// Identifier carried in the `MESSAGE_ID` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventId {
    Name(String),
    Code(i64),
}

impl EventId {
    /// Read an identifier from a JSON string or integer.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(name) => Some(Self::Name(name.clone())),
            Value::Number(n) => n.as_i64().map(Self::Code),
            _ => None,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Code(code) => write!(f, "{code}"),
        }
    }
}

impl From<&str> for EventId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for EventId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i64> for EventId {
    fn from(code: i64) -> Self {
        Self::Code(code)
    }
}

/// A typed event bound to its identifier.
pub trait SocketEvent: DeserializeOwned {
    fn event_id() -> EventId;
}

// ── Handler ──────────────────────────────────────────────────────────

/// A registered callback. Two handlers are equal only when they share the
/// same allocation, so registering a clone twice is a no-op.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(&Value) + Send + Sync>);

impl Handler {
    pub fn new(f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn call(&self, payload: &Value) {
        (self.0)(payload);
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl Eq for Handler {}

impl Hash for Handler {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.addr(), state);
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.addr()).finish()
    }
}

// ── HandlerRegistry ──────────────────────────────────────────────────

type HandlerMap = HashMap<EventId, Arc<HashSet<Handler>>>;

/// Event → handler-set mapping with copy-on-write updates.
///
/// Dispatch iterates a snapshot, so handlers may register or unregister
/// (themselves included) while being invoked.
#[derive(Clone)]
pub struct HandlerRegistry {
    map: Arc<ArcSwap<HandlerMap>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            map: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// Add `handler` to the set for `event`. Returns `false` if it was
    /// already registered.
    pub fn register(&self, event: impl Into<EventId>, handler: &Handler) -> bool {
        let event = event.into();
        let previous = self.map.rcu(|map| {
            let mut next = HandlerMap::clone(map);
            let set = next.entry(event.clone()).or_default();
            let mut handlers = HashSet::clone(set);
            handlers.insert(handler.clone());
            *set = Arc::new(handlers);
            next
        });
        !previous.get(&event).is_some_and(|set| set.contains(handler))
    }

    /// Remove `handler` from the set for `event`. Empty sets are dropped.
    /// Returns whether the handler was registered.
    pub fn unregister(&self, event: &EventId, handler: &Handler) -> bool {
        let previous = self.map.rcu(|map| {
            let mut next = HandlerMap::clone(map);
            if let Some(set) = next.get_mut(event) {
                let mut handlers = HashSet::clone(set);
                handlers.remove(handler);
                if handlers.is_empty() {
                    next.remove(event);
                } else {
                    *set = Arc::new(handlers);
                }
            }
            next
        });
        previous.get(event).is_some_and(|set| set.contains(handler))
    }

    /// Register a typed callback. Payloads that fail to deserialize into
    /// `T` are logged and skipped. The handler is removed when the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<T, F>(&self, event: impl Into<EventId>, callback: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let event = event.into();
        let label = event.to_string();
        let handler = Handler::new(move |payload| match T::deserialize(payload) {
            Ok(value) => callback(value),
            Err(e) => debug!(event = %label, error = %e, "dropping undecodable payload"),
        });
        self.register(event.clone(), &handler);
        Subscription {
            registry: self.clone(),
            event,
            handler,
        }
    }

    /// Register a callback for a [`SocketEvent`] type.
    pub fn on<E, F>(&self, callback: F) -> Subscription
    where
        E: SocketEvent,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.subscribe(E::event_id(), callback)
    }

    /// Invoke every handler registered for `event`. Returns how many ran.
    pub fn dispatch(&self, event: &EventId, payload: &Value) -> usize {
        let Some(handlers) = self.map.load().get(event).cloned() else {
            trace!(event = %event, "no handlers for event");
            return 0;
        };
        for handler in handlers.iter() {
            handler.call(payload);
        }
        handlers.len()
    }

    pub fn handler_count(&self, event: &EventId) -> usize {
        self.map.load().get(event).map_or(0, |set| set.len())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.map.load();
        f.debug_map()
            .entries(map.iter().map(|(event, set)| (event, set.len())))
            .finish()
    }
}

/// Keeps a handler registered until dropped.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    registry: HandlerRegistry,
    event: EventId,
    handler: Handler,
}

impl Subscription {
    pub fn event(&self) -> &EventId {
        &self.event
    }

    /// Unregister now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(&self.event, &self.handler);
    }
}

// ── Frame decoding ───────────────────────────────────────────────────

/// Decode one frame into its identifier and camelCased payload.
///
/// Returns `None` for frames that are not UTF-8 JSON objects carrying a
/// string or integer `MESSAGE_ID`. A missing `message` yields `null`.
pub fn decode_frame(bytes: &[u8]) -> Option<(EventId, Value)> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "socket frame is not UTF-8");
            return None;
        }
    };
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "failed to parse socket frame");
            return None;
        }
    };
    let Value::Object(mut frame) = recursive_snake_to_camel(value) else {
        debug!("socket frame is not an object");
        return None;
    };
    let Some(id) = frame.get(MESSAGE_ID_FIELD).and_then(EventId::from_value) else {
        debug!("socket frame has no usable {MESSAGE_ID_FIELD}");
        return None;
    };
    let payload = frame.remove(MESSAGE_FIELD).unwrap_or(Value::Null);
    Some((id, payload))
}

// ── Config ───────────────────────────────────────────────────────────

/// Reconnection policy: a fixed delay between attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Default: 2s.
    pub delay: Duration,

    /// Consecutive failed connection attempts tolerated before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_retries: None,
        }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub url: Url,
    /// Extra query parameters appended to `url` (e.g. an access token).
    pub query: Vec<(String, String)>,
    /// Headers sent with the upgrade request.
    pub headers: Vec<(String, String)>,
    pub reconnect: ReconnectConfig,
}

impl WebSocketConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            query: Vec::new(),
            headers: Vec::new(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// The connection URL with `query` appended.
    pub fn request_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        url
    }
}

// ── WebSocketHandle ──────────────────────────────────────────────────

/// Handle to the background connection task.
pub struct WebSocketHandle {
    registry: HandlerRegistry,
    status: watch::Receiver<ConnectionStatus>,
    cancel: CancellationToken,
}

impl WebSocketHandle {
    /// Spawn the connection loop.
    ///
    /// Returns immediately; the first attempt happens in the background.
    /// Cancelling `cancel` (or calling [`shutdown`](Self::shutdown)) closes
    /// the connection and stops reconnecting.
    pub fn connect(
        config: WebSocketConfig,
        registry: HandlerRegistry,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        match config.url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::WebSocketConnect(format!(
                    "unsupported URL scheme {other:?}"
                )));
            }
        }

        let (status_tx, status) = watch::channel(ConnectionStatus::Idle);
        let task_registry = registry.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(config, task_registry, status_tx, task_cancel).await;
        });

        Ok(Self {
            registry,
            status,
            cancel,
        })
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// connect → read → close → wait → reconnect.
async fn ws_loop(
    config: WebSocketConfig,
    registry: HandlerRegistry,
    status: watch::Sender<ConnectionStatus>,
    cancel: CancellationToken,
) {
    let url = config.request_url();
    let mut failures: u32 = 0;

    loop {
        status.send_replace(ConnectionStatus::Idle);

        // Each physical connection gets its own token so that everything
        // attached to it is torn down together.
        let connection = cancel.child_token();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&url, &config.headers, &registry, &status, &connection) => result,
        };
        connection.cancel();

        match result {
            Ok(()) => {
                status.send_replace(ConnectionStatus::Closed);
                info!("WebSocket closed, reconnecting");
                failures = 0;
            }
            Err(e @ Error::WebSocketClosed { .. }) => {
                status.send_replace(ConnectionStatus::ClosedError);
                warn!(error = %e, "WebSocket dropped");
                failures = 0;
            }
            Err(e) => {
                status.send_replace(ConnectionStatus::ClosedError);
                failures += 1;
                warn!(error = %e, failures, "WebSocket connection failed");
                if let Some(max) = config.reconnect.max_retries {
                    if failures > max {
                        error!(max_retries = max, "WebSocket reconnection limit reached, giving up");
                        return;
                    }
                }
            }
        }

        debug!(
            delay_ms = u64::try_from(config.reconnect.delay.as_millis()).unwrap_or(u64::MAX),
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(config.reconnect.delay) => {}
        }
    }

    status.send_replace(ConnectionStatus::Closed);
    debug!("WebSocket loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open one connection and dispatch frames until it ends.
///
/// `Ok(())` means a close frame, end of stream, or cancellation.
/// A transport error after the handshake is [`Error::WebSocketClosed`];
/// a failed handshake is [`Error::WebSocketConnect`].
async fn connect_and_read(
    url: &Url,
    headers: &[(String, String)],
    registry: &HandlerRegistry,
    status: &watch::Sender<ConnectionStatus>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    status.send_replace(ConnectionStatus::Connecting);
    info!(url = %url, "Connecting to WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    for (name, value) in headers {
        request = request.with_header(name.as_str(), value.as_str());
    }

    let (ws_stream, _response) = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        connected = tokio_tungstenite::connect_async(request) => {
            connected.map_err(|e| Error::WebSocketConnect(e.to_string()))?
        }
    };

    status.send_replace(ConnectionStatus::Connected);
    info!("WebSocket connected");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        handle_frame(text.as_bytes(), registry);
                    }
                    Some(Ok(tungstenite::Message::Binary(bytes))) => {
                        handle_frame(&bytes, registry);
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");
                        } else {
                            info!("WebSocket close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Ok(_)) => trace!("WebSocket control frame"),
                    Some(Err(e)) => {
                        return Err(Error::WebSocketClosed {
                            code: 1006,
                            reason: e.to_string(),
                        });
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn handle_frame(bytes: &[u8], registry: &HandlerRegistry) {
    if let Some((id, payload)) = decode_frame(bytes) {
        let handled = registry.dispatch(&id, &payload);
        trace!(event = %id, handled, "socket frame dispatched");
    }
}

// ── Tests ────────────────────────────────────────────────────────────
