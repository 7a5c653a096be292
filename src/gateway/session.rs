use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::auth::AuthUser;
use crate::metrics::Metrics;
use crate::state::AppState;

use super::handlers;
use super::protocol::{ClientEvent, ServerEvent};

const CHANNEL_BUFFER_SIZE: usize = 100;

/// One authenticated realtime connection.
///
/// Lifecycle: the handshake has already authenticated the user; `run`
/// registers presence, pumps events in both directions, and cleans up on
/// disconnect.
pub struct ChatSession {
    user: AuthUser,
    socket: WebSocket,
    state: Arc<AppState>,
}

impl ChatSession {
    pub fn new(user: AuthUser, socket: WebSocket, state: Arc<AppState>) -> Self {
        Self {
            user,
            socket,
            state,
        }
    }

    pub async fn run(self) {
        let (event_sender, mut event_receiver) =
            mpsc::channel::<ServerEvent>(CHANNEL_BUFFER_SIZE);
        let (mut ws_sender, mut ws_receiver) = self.socket.split();
        let user = self.user;
        let state = self.state;

        Metrics::websocket_connected();
        state
            .presence
            .register(user.clone(), event_sender.clone())
            .await;
        state.presence.broadcast_snapshot().await;

        // Session events out to the WebSocket.
        let send_user_id = user.id.clone();
        let mut send_task = tokio::spawn(async move {
            while let Some(event) = event_receiver.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            debug!(
                                "WebSocket send failed for user {send_user_id}, likely disconnected"
                            );
                            break;
                        }
                        Metrics::websocket_event_sent();
                    }
                    Err(e) => {
                        error!("failed to serialize event for {send_user_id}: {e}");
                    }
                }
            }
        });

        // WebSocket frames in, dispatched to the event handlers.
        let recv_state = state.clone();
        let recv_user = user.clone();
        let recv_sender = event_sender.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(frame)) = ws_receiver.next().await {
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };

                Metrics::websocket_event_received();
                recv_state.presence.touch(&recv_user.id).await;

                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        handlers::handle_event(&recv_state, &recv_user, &recv_sender, event)
                            .await;
                    }
                    Err(e) => {
                        error!("failed to parse event from {}: {e}", recv_user.id);
                        let _ = recv_sender.try_send(ServerEvent::error("Malformed event"));
                    }
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => {
                debug!("send task completed for user {}", user.id);
                recv_task.abort();
            }
            _ = &mut recv_task => {
                debug!("receive task completed for user {}", user.id);
                send_task.abort();
            }
        }

        state.rooms.leave_all(&user.id).await;
        state.presence.unregister(&user.id).await;
        state.presence.broadcast_snapshot().await;
        Metrics::websocket_disconnected();

        // Best-effort last-seen stamp; never blocks disconnect completion.
        let store = state.store.clone();
        let user_id = user.id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_seen(&user_id).await {
                warn!("failed to update last seen for {user_id}: {e}");
            }
        });

        debug!("session ended for {}", user.id);
    }
}
