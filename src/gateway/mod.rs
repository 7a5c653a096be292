use std::sync::Arc;

use axum::extract::ws::WebSocket;
use tracing::info;

use crate::auth::AuthUser;
use crate::state::AppState;

pub mod handlers;
pub mod protocol;
pub mod rooms;
pub mod session;

pub use session::ChatSession;

/// Entry point for an upgraded, already-authenticated connection.
pub async fn handle_connection(socket: WebSocket, user: AuthUser, state: Arc<AppState>) {
    info!("realtime connection established for user {}", user.id);
    ChatSession::new(user, socket, state).run().await;
}
