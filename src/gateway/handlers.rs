use std::sync::Arc;

use axum::http::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ChatError;
use crate::metrics::Metrics;
use crate::state::AppState;
use crate::store::models::{Attachment, MessageType};

use super::protocol::{ClientEvent, ServerEvent};

/// Dispatches one inbound client event. Failures surface as `error` events
/// on this connection; the connection itself stays open.
pub async fn handle_event(
    state: &Arc<AppState>,
    user: &AuthUser,
    sender: &mpsc::Sender<ServerEvent>,
    event: ClientEvent,
) {
    let result = match event {
        ClientEvent::JoinConversation { conversation_id } => {
            join_conversation(state, user, sender, conversation_id).await
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            state.rooms.leave(conversation_id, &user.id).await;
            Ok(())
        }
        ClientEvent::SendMessage {
            conversation_id,
            content,
            message_type,
            attachment,
        } => send_message(state, user, conversation_id, &content, message_type, attachment).await,
        ClientEvent::Typing {
            conversation_id,
            is_typing,
        } => {
            typing(state, user, conversation_id, is_typing).await;
            Ok(())
        }
        ClientEvent::UpdateStatus { status } => {
            update_status(state, user, status).await;
            Ok(())
        }
    };

    if let Err(err) = result {
        if err.status() == StatusCode::INTERNAL_SERVER_ERROR {
            error!("realtime event failed for {}: {err}", user.id);
            let _ = sender.try_send(ServerEvent::error("Internal server error"));
        } else {
            let _ = sender.try_send(ServerEvent::error(err.to_string()));
        }
    }
}

/// Membership is checked before subscribing; non-members get an explicit
/// error event. Joining marks everything read as a side effect.
async fn join_conversation(
    state: &Arc<AppState>,
    user: &AuthUser,
    sender: &mpsc::Sender<ServerEvent>,
    conversation_id: Uuid,
) -> Result<(), ChatError> {
    state
        .store
        .get_for_participant(conversation_id, &user.id)
        .await?;

    state
        .rooms
        .join(conversation_id, &user.id, sender.clone())
        .await;
    state.store.mark_read(conversation_id, &user.id, &[]).await?;

    debug!("user {} joined conversation {conversation_id}", user.id);
    Ok(())
}

async fn send_message(
    state: &Arc<AppState>,
    user: &AuthUser,
    conversation_id: Uuid,
    content: &str,
    message_type: MessageType,
    attachment: Option<Attachment>,
) -> Result<(), ChatError> {
    let conversation = state
        .store
        .get_for_participant(conversation_id, &user.id)
        .await?;

    // Persisted before anything is broadcast; the message carries the
    // sender's own read receipt.
    let message = state
        .store
        .append_message(conversation_id, &user.id, content, message_type, attachment)
        .await?;
    Metrics::chat_message_appended(message_type.as_str());

    state
        .rooms
        .broadcast(
            conversation_id,
            ServerEvent::Message {
                conversation_id,
                message,
                sender: user.clone(),
            },
        )
        .await;

    // Offline participants get a push notification on detached tasks;
    // failures are logged and never reach this send path.
    for participant in conversation.participants.iter().filter(|p| **p != user.id) {
        if state.presence.is_online(participant).await {
            continue;
        }
        let notifier = state.notifier.clone();
        let participant = participant.clone();
        let sender_name = user.name.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier
                .notify(&participant, conversation_id, &sender_name)
                .await
            {
                warn!("push notification failed for {participant}: {e}");
            }
        });
    }

    Ok(())
}

/// Ephemeral relay to the other room members; nothing is persisted and no
/// acknowledgement is sent.
async fn typing(state: &Arc<AppState>, user: &AuthUser, conversation_id: Uuid, is_typing: bool) {
    state
        .rooms
        .broadcast_except(
            conversation_id,
            &user.id,
            ServerEvent::UserTyping {
                conversation_id,
                user_id: user.id.clone(),
                user_name: user.name.clone(),
                is_typing,
            },
        )
        .await;
}

async fn update_status(state: &Arc<AppState>, user: &AuthUser, status: String) {
    if state.presence.set_status(&user.id, status).await {
        state.presence.broadcast_snapshot().await;
    }
}
