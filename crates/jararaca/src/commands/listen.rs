//! `jararaca listen`: print socket events until interrupted.

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use jararaca_api::{EventId, Handler, HandlerRegistry, WebSocketHandle};
use jararaca_config::Config;

use crate::cli::{GlobalOpts, ListenArgs};
use crate::error::CliError;
use crate::output;

/// Numeric identifiers are matched as integer codes.
pub fn event_id(raw: &str) -> EventId {
    raw.parse::<i64>()
        .map_or_else(|_| EventId::from(raw), EventId::from)
}

pub async fn handle(args: ListenArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let mut config = config.clone();
    if let Some(url) = args.url {
        config.websocket.url = Some(url);
        config.validate()?;
    }
    let mut ws_config = config.websocket_config()?;
    if let Some(token) = &global.token {
        ws_config = ws_config.with_header("Authorization", format!("Bearer {token}"));
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<(EventId, Value)>();
    let registry = HandlerRegistry::new();
    // Handlers stay registered for the life of the registry.
    let handlers: Vec<(EventId, Handler)> = args
        .events
        .iter()
        .map(|raw| {
            let id = event_id(raw);
            let tx = tx.clone();
            let label = id.clone();
            let handler = Handler::new(move |payload: &Value| {
                let _ = tx.send((label.clone(), payload.clone()));
            });
            registry.register(id.clone(), &handler);
            (id, handler)
        })
        .collect();
    drop(tx);

    let cancel = CancellationToken::new();
    let socket = WebSocketHandle::connect(ws_config, registry, cancel.clone())?;
    let mut status = socket.subscribe_status();
    info!(events = handlers.len(), "listening");

    let mut seen = 0_usize;
    let result = loop {
        tokio::select! {
            Some((event, payload)) = rx.recv() => {
                let line = json!({ "event": event.to_string(), "payload": payload });
                output::print_output(&output::render_value(global.output, &line)?)?;
                seen += 1;
                if args.count.is_some_and(|count| seen >= count) {
                    break Ok(());
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Err(CliError::SocketFailed {
                        reason: "reconnection limit reached".into(),
                    });
                }
                debug!(status = ?*status.borrow(), "socket status");
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break Ok(());
            }
        }
    };

    socket.shutdown();
    for (id, handler) in &handlers {
        socket.registry().unregister(id, handler);
    }
    debug!(status = ?socket.status(), "socket shut down");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_events_are_codes() {
        assert_eq!(event_id("42"), EventId::Code(42));
        assert_eq!(event_id("-1"), EventId::Code(-1));
        assert_eq!(event_id("PING"), EventId::Name("PING".into()));
        assert_eq!(event_id("4x"), EventId::Name("4x".into()));
    }
}
