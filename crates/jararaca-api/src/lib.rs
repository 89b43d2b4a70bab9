// jararaca-api: HTTP backend, case translation, session refresh and socket
// event multiplexing for jararaca clients.

pub mod auth;
pub mod backend;
pub mod case;
pub mod error;
pub mod transport;
pub mod websocket;

pub use auth::{
    CredentialRefresher, CredentialStore, Credentials, HttpCredentialRefresher, LoginState,
    SessionBackend, SessionEvent,
};
pub use backend::{
    FilePart, FormField, HttpBackend, HttpRequest, ReqwestBackend, RequestBody, RequestOverrides,
    ResponseBody, ResponseType, ScopedBackend,
};
pub use error::Error;
pub use reqwest::Method;
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    ConnectionStatus, EventId, Handler, HandlerRegistry, ReconnectConfig, SocketEvent,
    Subscription, WebSocketConfig, WebSocketHandle,
};
