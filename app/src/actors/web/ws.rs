//! WebSocket handler: init handshake + unified bus event streaming.
//!
//! Protocol:
//!   1. Client sends:  `{ "type": "start", "name": "Cockpit" }`
//!   2. Server sends:  `{ "type": "init", "source_id": "ws.abc123", "dashboard": { ... } }`
//!   3. Server streams `EvdashMessage` events
//!
//! Client commands: `{ "cmd": "search", "query": "..." }`,
//! `{ "cmd": "mode", "mode": "eco" }`, `{ "cmd": "reset_location" }`.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use super::WebState;
use crate::state::config;
use evdash::{ActorStatus, DashboardCommand, DriveMode};

/// GET /api/ws: upgrade to WebSocket.
pub async fn ws_upgrade(
    State(state): State<Arc<WebState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<WebState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Phase 1: Wait for "start" message from client
    let client_name = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(name) = parse_start_message(&text) {
                    break name;
                }
                // Not a start message, keep waiting
            }
            Some(Ok(Message::Close(_))) | None => return,
            _ => continue,
        }
    };

    // Phase 2: Send "init" response with source_id and the current view
    let source_id = format!("ws.{}", config::generate_id());
    state.ws_count.fetch_add(1, Ordering::Relaxed);
    state.report(ActorStatus::Connected, None);
    tracing::info!(
        "ws: client '{}' connected (source_id={})",
        client_name,
        source_id
    );

    // Subscribe before reading the snapshot so nothing falls in between
    let mut bus_rx = state.bus_tx.subscribe();
    let init_msg = serde_json::json!({
        "type": "init",
        "source_id": source_id,
        "dashboard": state.root.dashboard.snapshot(),
    });
    if ws_tx
        .send(Message::text(init_msg.to_string()))
        .await
        .is_err()
    {
        state.ws_count.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    // Phase 3: Stream bus events + receive commands
    let mut send_task = tokio::spawn(async move {
        loop {
            match bus_rx.recv().await {
                Ok(msg) => {
                    if let Ok(json) = serde_json::to_string(&msg)
                        && ws_tx.send(Message::text(json)).await.is_err()
                    {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("ws: lagged {n}");
                }
            }
        }
    });

    let ws_source = source_id.clone();
    let cmd_state = Arc::clone(&state);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(cmd) = parse_command(&text) {
                        cmd_state.publish(cmd, &ws_source);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.ws_count.fetch_sub(1, Ordering::Relaxed);
    state.report(ActorStatus::Connected, None);
    tracing::info!(
        "ws: client '{}' disconnected (source_id={})",
        client_name,
        source_id
    );
}

/// Parse a "start" handshake message. Returns the client name if valid.
fn parse_start_message(text: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct StartMsg {
        #[serde(rename = "type")]
        msg_type: String,
        #[serde(default)]
        name: String,
    }
    let msg: StartMsg = serde_json::from_str(text).ok()?;
    if msg.msg_type == "start" {
        Some(if msg.name.is_empty() {
            "anonymous".to_string()
        } else {
            msg.name
        })
    } else {
        None
    }
}

/// Parse a client command. Unknown or malformed commands yield `None`.
fn parse_command(text: &str) -> Option<DashboardCommand> {
    #[derive(serde::Deserialize)]
    struct WsCmd {
        cmd: String,
        query: Option<String>,
        mode: Option<String>,
    }

    let msg = serde_json::from_str::<WsCmd>(text).ok()?;
    match msg.cmd.as_str() {
        "search" => Some(DashboardCommand::SubmitSearch {
            query: msg.query.unwrap_or_default(),
        }),
        "mode" => {
            let mode: DriveMode = msg.mode?.parse().ok()?;
            Some(DashboardCommand::SelectMode { mode })
        }
        "reset_location" => Some(DashboardCommand::ResetLocation),
        other => {
            tracing::debug!("ws: unknown command '{other}'");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_handshake() {
        assert_eq!(
            parse_start_message(r#"{"type":"start","name":"Cockpit"}"#),
            Some("Cockpit".into())
        );
        assert_eq!(
            parse_start_message(r#"{"type":"start"}"#),
            Some("anonymous".into())
        );
        assert_eq!(parse_start_message(r#"{"type":"hello"}"#), None);
        assert_eq!(parse_start_message("garbage"), None);
    }

    #[test]
    fn commands() {
        assert_eq!(
            parse_command(r#"{"cmd":"search","query":"Paris"}"#),
            Some(DashboardCommand::SubmitSearch {
                query: "Paris".into()
            })
        );
        assert_eq!(
            parse_command(r#"{"cmd":"mode","mode":"Sport"}"#),
            Some(DashboardCommand::SelectMode {
                mode: DriveMode::Sport
            })
        );
        assert_eq!(
            parse_command(r#"{"cmd":"reset_location"}"#),
            Some(DashboardCommand::ResetLocation)
        );
        assert_eq!(parse_command(r#"{"cmd":"mode","mode":"warp"}"#), None);
        assert_eq!(parse_command(r#"{"cmd":"launch"}"#), None);
    }

    #[test]
    fn search_without_query_is_blank() {
        assert_eq!(
            parse_command(r#"{"cmd":"search"}"#),
            Some(DashboardCommand::SubmitSearch {
                query: String::new()
            })
        );
    }
}
