//! The `/ws` upgrade (§4.8, §6): subscribes the connection to the Event
//! Bus, replays a snapshot burst so a reconnecting client converges without
//! a separate bootstrap protocol (§8 scenario 5), then streams live events
//! until the client disconnects.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::events::{Event, EventBus};
use crate::core::types::RotationState;

use super::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(manager): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, manager))
}

async fn handle_socket(mut socket: WebSocket, manager: AppState) {
    let mut rx = manager.events().subscribe();

    for event in initial_state_burst(&manager).await {
        if send_event(&mut socket, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                // No client→server messages are defined by the protocol
                // (§6); a close or transport error simply ends the task.
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            },
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "websocket subscriber lagged, sending overflow notice");
                    let overflow = EventBus::subscriber_overflow_event();
                    if send_event(&mut socket, &overflow).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text.into())).await
}

/// Builds the one-shot burst of current state a freshly (re)connected
/// client needs, drawn from the manager's REST-equivalent snapshot calls
/// rather than from any buffered/replayed bus history (§8 scenario 5: "no
/// events emitted while disconnected are replayed").
async fn initial_state_burst(manager: &AppState) -> Vec<Event> {
    let mut events = Vec::new();

    if let Ok(details) = manager.proxy_details().await {
        events.push(Event::ProxyStatus {
            status: details.rotation_state,
        });
        events.push(Event::ProxyDetails { instance: details });
    } else {
        events.push(Event::ProxyStatus {
            status: RotationState::Stopped,
        });
    }

    let http_status = manager.http_test_status().await;
    events.push(Event::log(
        "ServiceManager",
        format!("http test status: {http_status:?}"),
    ));

    let is_scanning = manager.is_scanning().await;
    events.push(Event::log(
        "ServiceManager",
        format!("scanner running: {is_scanning}"),
    ));

    events
}
