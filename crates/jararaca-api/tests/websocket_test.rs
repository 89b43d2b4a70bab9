#![allow(clippy::unwrap_used)]
// Socket multiplexer against a local tokio-tungstenite server.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use jararaca_api::{
    ConnectionStatus, EventId, HandlerRegistry, ReconnectConfig, WebSocketConfig, WebSocketHandle,
};

// ── Helpers ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

fn config(addr: SocketAddr, delay: Duration) -> WebSocketConfig {
    WebSocketConfig::new(Url::parse(&format!("ws://{addr}/ws")).unwrap()).with_reconnect(
        ReconnectConfig {
            delay,
            max_retries: None,
        },
    )
}

fn collect(registry: &HandlerRegistry, event: &str) -> (jararaca_api::Subscription, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = registry.subscribe(event, move |payload: Value| {
        let _ = tx.send(payload);
    });
    (subscription, rx)
}

// ── Dispatch ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_registered_event_dispatched_once() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(Message::text(r#"{"MESSAGE_ID":"UNKNOWN","message":{"x":1}}"#))
            .await
            .unwrap();
        ws.send(Message::binary(
            br#"{"MESSAGE_ID":"PING","message":{"value":1}}"#.to_vec(),
        ))
        .await
        .unwrap();
        ws.send(Message::text(r#"{"MESSAGE_ID":"DONE"}"#)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let registry = HandlerRegistry::new();
    let (_ping, mut pings) = collect(&registry, "PING");
    let (_done, mut done) = collect(&registry, "DONE");

    let handle = WebSocketHandle::connect(
        config(addr, Duration::from_secs(60)),
        registry,
        CancellationToken::new(),
    )
    .unwrap();

    timeout(WAIT, done.recv()).await.unwrap().unwrap();
    assert_eq!(pings.try_recv().unwrap(), json!({ "value": 1 }));
    assert!(pings.try_recv().is_err(), "PING handled exactly once");
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert_eq!(handle.registry().handler_count(&EventId::from("UNKNOWN")), 0);

    handle.shutdown();
}

// ── Reconnect ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnects_once_after_delay_without_duplicate_handlers() {
    let (listener, addr) = bind().await;
    let delay = Duration::from_millis(300);
    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<(Instant, Instant)>();
    let (extra_tx, mut extra_rx) = mpsc::unbounded_channel::<bool>();

    tokio::spawn(async move {
        let mut first = accept(&listener).await;
        first
            .send(Message::text(r#"{"MESSAGE_ID":"PING","message":{"n":1}}"#))
            .await
            .unwrap();
        first.close(None).await.unwrap();
        let closed_at = Instant::now();
        while let Some(Ok(_)) = first.next().await {}

        let mut second = accept(&listener).await;
        let reopened_at = Instant::now();
        report_tx.send((closed_at, reopened_at)).unwrap();
        second
            .send(Message::text(r#"{"MESSAGE_ID":"PING","message":{"n":2}}"#))
            .await
            .unwrap();

        // The second connection stays open; no further attempt may arrive.
        let extra = timeout(delay * 3, listener.accept()).await.is_ok();
        extra_tx.send(extra).unwrap();
        while let Some(Ok(_)) = second.next().await {}
    });

    let registry = HandlerRegistry::new();
    let (_ping, mut pings) = collect(&registry, "PING");

    let cancel = CancellationToken::new();
    let handle = WebSocketHandle::connect(config(addr, delay), registry, cancel.clone()).unwrap();

    assert_eq!(timeout(WAIT, pings.recv()).await.unwrap().unwrap(), json!({ "n": 1 }));
    assert_eq!(timeout(WAIT, pings.recv()).await.unwrap().unwrap(), json!({ "n": 2 }));

    let (closed_at, reopened_at) = timeout(WAIT, report_rx.recv()).await.unwrap().unwrap();
    assert!(
        reopened_at.duration_since(closed_at) >= delay - Duration::from_millis(50),
        "reconnected too early: {:?}",
        reopened_at.duration_since(closed_at)
    );

    assert!(!timeout(WAIT, extra_rx.recv()).await.unwrap().unwrap());
    assert!(pings.try_recv().is_err(), "each frame handled once");
    assert_eq!(handle.registry().handler_count(&EventId::from("PING")), 1);

    cancel.cancel();
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_closes_connection() {
    let (listener, addr) = bind().await;
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
        closed_tx.send(()).unwrap();
    });

    let handle = WebSocketHandle::connect(
        config(addr, Duration::from_secs(60)),
        HandlerRegistry::new(),
        CancellationToken::new(),
    )
    .unwrap();

    let mut status = handle.subscribe_status();
    timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Connected))
        .await
        .unwrap()
        .unwrap();

    handle.shutdown();
    timeout(WAIT, closed_rx.recv()).await.unwrap().unwrap();
    timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Closed))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    // Bind then drop so the port refuses connections.
    let (listener, addr) = bind().await;
    drop(listener);

    let mut config = config(addr, Duration::from_millis(20));
    config.reconnect.max_retries = Some(2);

    let handle =
        WebSocketHandle::connect(config, HandlerRegistry::new(), CancellationToken::new()).unwrap();
    let mut status = handle.subscribe_status();

    // The loop exits after three failed attempts; the sender is dropped.
    let result = timeout(WAIT, async {
        while status.changed().await.is_ok() {}
    })
    .await;
    assert!(result.is_ok());
    assert_eq!(*status.borrow(), ConnectionStatus::ClosedError);
}
