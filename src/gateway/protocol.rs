use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::store::models::{Attachment, Message, MessageType};

/// Events a client may send over the realtime connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: Uuid,
    },
    LeaveConversation {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        attachment: Option<Attachment>,
    },
    Typing {
        conversation_id: Uuid,
        is_typing: bool,
    },
    UpdateStatus {
        status: String,
    },
}

/// Events the gateway pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Message {
        conversation_id: Uuid,
        message: Message,
        sender: AuthUser,
    },
    UserTyping {
        conversation_id: Uuid,
        user_id: String,
        user_name: String,
        is_typing: bool,
    },
    OnlineUsers {
        users: Vec<OnlineUser>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

/// One entry of the presence snapshot broadcast as `onlineUsers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub status: String,
    pub last_seen: DateTime<Utc>,
}
