// Session credentials and the token-refresh interceptor.
//
// The application owns a `CredentialStore`; `SessionBackend` reads it to
// authorize requests and replaces it when a refresh succeeds. The store is
// never persisted here.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::backend::{HttpBackend, HttpRequest, ResponseBody};
use crate::error::Error;

const SESSION_EVENT_CAPACITY: usize = 16;

/// Default path of the token refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

// ── Credentials ──────────────────────────────────────────────────────

/// An access/refresh token pair.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }

    fn same_access_token(&self, other: &Self) -> bool {
        self.access_token.expose_secret() == other.access_token.expose_secret()
    }
}

/// Wire shape of a refresh response (already camelCased by the backend).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsBody {
    access_token: String,
    refresh_token: String,
}

impl From<CredentialsBody> for Credentials {
    fn from(body: CredentialsBody) -> Self {
        Self::new(body.access_token, body.refresh_token)
    }
}

/// Authentication state as seen by the application.
#[derive(Debug, Clone)]
pub enum LoginState {
    NotLogged,
    Logged(Arc<Credentials>),
    Loading,
    Error(String),
}

impl LoginState {
    pub fn is_logged(&self) -> bool {
        matches!(self, Self::Logged(_))
    }
}

/// Notifications emitted while the interceptor manages the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh is in progress.
    Reestablishing,
    /// The refresh was rejected and credentials were cleared.
    Expired,
}

// ── CredentialStore ──────────────────────────────────────────────────

/// Application-owned credential cell with change notification.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct CredentialStore {
    state: Arc<watch::Sender<LoginState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LoginState::NotLogged);
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            state: Arc::new(state),
            events,
        }
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        let store = Self::new();
        store.set(credentials);
        store
    }

    /// Current credentials, if logged in.
    pub fn get(&self) -> Option<Arc<Credentials>> {
        match &*self.state.borrow() {
            LoginState::Logged(credentials) => Some(Arc::clone(credentials)),
            _ => None,
        }
    }

    /// Replace the credentials and return the stored copy.
    pub fn set(&self, credentials: Credentials) -> Arc<Credentials> {
        let credentials = Arc::new(credentials);
        self.state
            .send_replace(LoginState::Logged(Arc::clone(&credentials)));
        credentials
    }

    /// Drop the credentials. Returns whether any were stored.
    pub fn clear(&self) -> bool {
        let previous = self.state.send_replace(LoginState::NotLogged);
        previous.is_logged()
    }

    pub fn set_loading(&self) {
        self.state.send_replace(LoginState::Loading);
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.state.send_replace(LoginState::Error(message.into()));
    }

    pub fn login_state(&self) -> LoginState {
        self.state.borrow().clone()
    }

    /// Watch login state changes.
    pub fn subscribe(&self) -> watch::Receiver<LoginState> {
        self.state.subscribe()
    }

    /// Receive session notifications emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ── Refresher ────────────────────────────────────────────────────────

/// Exchanges a refresh token for a new credential pair.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh_credentials(&self, refresh_token: &str) -> Result<Credentials, Error>;
}

/// Refreshes by POSTing `{ "refreshToken": ... }` to an endpoint.
///
/// The backend given here must not be the `SessionBackend` itself, or a
/// rejected refresh would try to refresh again.
pub struct HttpCredentialRefresher {
    backend: Arc<dyn HttpBackend>,
    path: String,
}

impl HttpCredentialRefresher {
    pub fn new(backend: Arc<dyn HttpBackend>, path: impl Into<String>) -> Self {
        Self {
            backend,
            path: path.into(),
        }
    }
}

#[async_trait]
impl CredentialRefresher for HttpCredentialRefresher {
    async fn refresh_credentials(&self, refresh_token: &str) -> Result<Credentials, Error> {
        let request =
            HttpRequest::post(self.path.as_str()).json(json!({ "refreshToken": refresh_token }))?;
        let body: CredentialsBody = self.backend.request(request).await?.json()?;
        Ok(body.into())
    }
}

// ── SessionBackend ───────────────────────────────────────────────────

/// Interceptor that authorizes requests and refreshes expired tokens.
///
/// Every request carries `Authorization: Bearer <access token>` while
/// logged in. An auth-scoped `invalid_token` 401 triggers one refresh and
/// one replay. Concurrent failures share a single refresh.
pub struct SessionBackend {
    inner: Arc<dyn HttpBackend>,
    store: CredentialStore,
    refresher: Arc<dyn CredentialRefresher>,
    refresh_lock: Mutex<()>,
}

impl SessionBackend {
    pub fn new(
        inner: Arc<dyn HttpBackend>,
        store: CredentialStore,
        refresher: Arc<dyn CredentialRefresher>,
    ) -> Self {
        Self {
            inner,
            store,
            refresher,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn authorize(request: &mut HttpRequest, credentials: &Credentials) {
        request.set_header(
            "Authorization",
            format!("Bearer {}", credentials.access_token.expose_secret()),
        );
    }

    /// Obtain fresh credentials, reusing a refresh that completed while
    /// this caller waited for the lock.
    async fn refresh(&self, stale: &Credentials) -> Result<Arc<Credentials>, Error> {
        let _guard = self.refresh_lock.lock().await;

        let Some(current) = self.store.get() else {
            return Err(Error::SessionExpired);
        };
        if !current.same_access_token(stale) {
            debug!("credentials already refreshed by a concurrent request");
            return Ok(current);
        }

        self.store.emit(SessionEvent::Reestablishing);
        info!("access token rejected, refreshing credentials");
        let fresh = self
            .refresher
            .refresh_credentials(stale.refresh_token.expose_secret())
            .await?;
        Ok(self.store.set(fresh))
    }
}

#[async_trait]
impl HttpBackend for SessionBackend {
    async fn request(&self, request: HttpRequest) -> Result<ResponseBody, Error> {
        let credentials = self.store.get();

        let mut first = request.clone();
        if let Some(credentials) = &credentials {
            Self::authorize(&mut first, credentials);
        }

        let original = match self.inner.request(first).await {
            Ok(body) => return Ok(body),
            Err(e) => e,
        };

        if !original.is_invalid_token() {
            return Err(original);
        }
        let Some(credentials) = credentials else {
            return Err(original);
        };
        if credentials.refresh_token.expose_secret().is_empty() {
            return Err(original);
        }

        match self.refresh(&credentials).await {
            Ok(fresh) => {
                let mut replay = request;
                Self::authorize(&mut replay, &fresh);
                self.inner.request(replay).await
            }
            Err(Error::SessionExpired) => Err(original),
            Err(refresh_err) if refresh_err.is_session_fatal() => {
                warn!(error = %refresh_err, "credential refresh rejected, session expired");
                if self.store.clear() {
                    self.store.emit(SessionEvent::Expired);
                }
                Err(original)
            }
            Err(refresh_err) => {
                error!(error = %refresh_err, "credential refresh failed");
                Err(original)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn invalid_token() -> Error {
        Error::Status {
            status: 401,
            scope: Some("auth".into()),
            code: Some("invalid_token".into()),
            body: String::new(),
        }
    }

    /// Rejects any token other than `fresh`.
    struct TokenCheck {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpBackend for TokenCheck {
        async fn request(&self, request: HttpRequest) -> Result<ResponseBody, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request.header_value("Authorization") {
                Some("Bearer fresh") => Ok(ResponseBody::Text("ok".into())),
                _ => Err(invalid_token()),
            }
        }
    }

    struct CountingRefresher {
        calls: AtomicUsize,
        result: fn() -> Result<Credentials, Error>,
    }

    #[async_trait]
    impl CredentialRefresher for CountingRefresher {
        async fn refresh_credentials(&self, refresh_token: &str) -> Result<Credentials, Error> {
            assert_eq!(refresh_token, "refresh");
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            (self.result)()
        }
    }

    fn session(result: fn() -> Result<Credentials, Error>) -> (SessionBackend, Arc<TokenCheck>, Arc<CountingRefresher>) {
        let inner = Arc::new(TokenCheck {
            calls: AtomicUsize::new(0),
        });
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            result,
        });
        let store = CredentialStore::with_credentials(Credentials::new("stale", "refresh"));
        let backend = SessionBackend::new(inner.clone(), store, refresher.clone());
        (backend, inner, refresher)
    }

    #[tokio::test]
    async fn refresh_then_replay_once() {
        let (backend, inner, refresher) = session(|| Ok(Credentials::new("fresh", "refresh2")));
        let body = backend.request(HttpRequest::get("/me")).await.unwrap();
        assert_eq!(body, ResponseBody::Text("ok".into()));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        let stored = backend.store().get().unwrap();
        assert_eq!(stored.access_token.expose_secret(), "fresh");
    }

    #[tokio::test]
    async fn concurrent_failures_share_one_refresh() {
        let (backend, _inner, refresher) = session(|| Ok(Credentials::new("fresh", "refresh2")));
        let (a, b) = tokio::join!(
            backend.request(HttpRequest::get("/a")),
            backend.request(HttpRequest::get("/b")),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_clears_and_notifies() {
        let (backend, inner, _) = session(|| {
            Err(Error::Status {
                status: 401,
                scope: None,
                code: None,
                body: String::new(),
            })
        });
        let mut events = backend.store().events();

        let err = backend.request(HttpRequest::get("/me")).await.unwrap_err();
        assert!(err.is_invalid_token());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(backend.store().get().is_none());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Reestablishing);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn server_error_during_refresh_keeps_credentials() {
        let (backend, _, _) = session(|| {
            Err(Error::Status {
                status: 503,
                scope: None,
                code: None,
                body: String::new(),
            })
        });
        let err = backend.request(HttpRequest::get("/me")).await.unwrap_err();
        assert!(err.is_invalid_token());
        assert!(backend.store().get().is_some());
    }

    #[test]
    fn login_state_follows_store() {
        let store = CredentialStore::new();
        assert!(matches!(store.login_state(), LoginState::NotLogged));
        store.set_loading();
        assert!(matches!(store.login_state(), LoginState::Loading));
        store.set(Credentials::new("a", "b"));
        assert!(store.login_state().is_logged());
        assert!(store.clear());
        assert!(!store.clear());
    }
}
