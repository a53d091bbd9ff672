//! WebSocket connection handler

use crate::api::auth::resolve_user;
use crate::models::{ClientMessage, WsEvent, WsUser};
use crate::observability::{AuditEventType, AuditLogger};
use crate::state::AppState;
use crate::websocket::events::{ConnectionId, Room, RoomRegistry};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token (JWT)
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    // Authentication happens after the upgrade so the client sees a 1008 close
    let auth = match token.as_deref() {
        Some(token) => resolve_user(&state, token).await,
        None => Err(crate::error::ScoringError::Unauthenticated(
            "missing token".to_string(),
        )),
    };
    let user = match auth {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "WebSocket connection rejected");
            AuditLogger::security(
                state.store(),
                AuditEventType::PolicyViolation,
                None,
                &format!("websocket auth: {}", e),
            )
            .await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let (conn_id, mut outbound) = state.rooms.register(user.id, user.role);
    let (mut sender, mut receiver) = socket.split();

    info!(connection_id = %conn_id, user_id = %user.id, role = %user.role, "WebSocket connected");

    let hello = WsEvent::Connected {
        user: WsUser::from(&user),
    };
    if send_event(&mut sender, &hello).await.is_err() {
        state.rooms.unregister(conn_id);
        return;
    }

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(&state.rooms, conn_id, &text);
                        if send_event(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %conn_id, "WebSocket closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(connection_id = %conn_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    state.rooms.unregister(conn_id);
    info!(connection_id = %conn_id, "WebSocket disconnected");
}

async fn send_event<S>(sender: &mut S, event: &WsEvent) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to serialize event");
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await.map_err(|_| ())
}

/// Apply one client frame and produce the reply frame. Errors never close
/// the connection.
pub fn handle_client_message(rooms: &RoomRegistry, conn_id: ConnectionId, text: &str) -> WsEvent {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(connection_id = %conn_id, error = %e, "Invalid client message");
            return WsEvent::Error {
                message: format!("invalid message: {}", e),
            };
        }
    };

    match msg {
        ClientMessage::Ping => WsEvent::Pong,
        ClientMessage::Join { room } => match room.parse::<Room>() {
            Ok(parsed) => {
                rooms.join(conn_id, parsed);
                debug!(connection_id = %conn_id, room = %parsed, "Joined room");
                WsEvent::Joined { room }
            }
            Err(message) => WsEvent::Error { message },
        },
        ClientMessage::Leave { room } => match room.parse::<Room>() {
            Ok(parsed) => {
                rooms.leave(conn_id, parsed);
                WsEvent::Left { room }
            }
            Err(message) => WsEvent::Error { message },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use uuid::Uuid;

    #[test]
    fn test_join_and_leave_messages() {
        let rooms = RoomRegistry::new(4);
        let (conn, _rx) = rooms.register(Uuid::new_v4(), Role::Viewer);
        let sub = Uuid::new_v4();

        let reply = handle_client_message(
            &rooms,
            conn,
            &format!(r#"{{"type":"join","room":"scoring:{}"}}"#, sub),
        );
        assert!(matches!(reply, WsEvent::Joined { .. }));
        assert_eq!(rooms.room_size(Room::Scoring(sub)), 1);

        let reply = handle_client_message(
            &rooms,
            conn,
            &format!(r#"{{"type":"leave","room":"scoring:{}"}}"#, sub),
        );
        assert!(matches!(reply, WsEvent::Left { .. }));
        assert_eq!(rooms.room_size(Room::Scoring(sub)), 0);
    }

    #[test]
    fn test_ping_and_errors() {
        let rooms = RoomRegistry::new(4);
        let (conn, _rx) = rooms.register(Uuid::new_v4(), Role::Judge);

        assert!(matches!(
            handle_client_message(&rooms, conn, r#"{"type":"ping"}"#),
            WsEvent::Pong
        ));
        assert!(matches!(
            handle_client_message(&rooms, conn, "not json"),
            WsEvent::Error { .. }
        ));
        assert!(matches!(
            handle_client_message(&rooms, conn, r#"{"type":"join","room":"lobby"}"#),
            WsEvent::Error { .. }
        ));
        assert!(rooms.rooms_of(conn).is_empty());
    }
}
