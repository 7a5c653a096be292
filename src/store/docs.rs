//! Persistence documents for the `conversations` and `users` collections.
//!
//! Timestamps are stored as native BSON datetimes so the `lastActivity` sort
//! and date range filters compare instants instead of strings. The chat
//! models keep `chrono` types for handler code and response bodies;
//! conversion happens here, at the collection boundary.

use chrono::Utc;
use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{
    Attachment, Conversation, ConversationKind, Message, MessageType, MuteSetting, ReadReceipt,
    UserSummary,
};

pub(crate) fn bson_datetime(dt: chrono::DateTime<Utc>) -> DateTime {
    DateTime::from_millis(dt.timestamp_millis())
}

fn chrono_datetime(dt: DateTime) -> chrono::DateTime<Utc> {
    chrono::DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptDoc {
    pub user_id: String,
    pub read_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteSettingDoc {
    pub user_id: String,
    pub muted_until: Option<DateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDoc {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub content: String,
    pub sender_id: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub read_by: Vec<ReadReceiptDoc>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime>,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDoc {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub participants: Vec<String>,
    pub kind: ConversationKind,
    /// Omitted entirely for non-direct conversations. A stored null would
    /// still be indexed by the unique sparse `pairKey` index and collide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub muted_by: Vec<MuteSettingDoc>,
    #[serde(default)]
    pub messages: Vec<MessageDoc>,
    #[serde(default)]
    pub last_message: Option<MessageDoc>,
    pub last_activity: DateTime,
    pub is_active: bool,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummaryDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub last_login_at: Option<DateTime>,
}

impl From<ReadReceipt> for ReadReceiptDoc {
    fn from(receipt: ReadReceipt) -> Self {
        Self {
            user_id: receipt.user_id,
            read_at: bson_datetime(receipt.read_at),
        }
    }
}

impl From<ReadReceiptDoc> for ReadReceipt {
    fn from(doc: ReadReceiptDoc) -> Self {
        Self {
            user_id: doc.user_id,
            read_at: chrono_datetime(doc.read_at),
        }
    }
}

impl From<MuteSetting> for MuteSettingDoc {
    fn from(mute: MuteSetting) -> Self {
        Self {
            user_id: mute.user_id,
            muted_until: mute.muted_until.map(bson_datetime),
        }
    }
}

impl From<MuteSettingDoc> for MuteSetting {
    fn from(doc: MuteSettingDoc) -> Self {
        Self {
            user_id: doc.user_id,
            muted_until: doc.muted_until.map(chrono_datetime),
        }
    }
}

impl From<Message> for MessageDoc {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            content: message.content,
            sender_id: message.sender_id,
            message_type: message.message_type,
            attachment: message.attachment,
            read_by: message.read_by.into_iter().map(Into::into).collect(),
            is_edited: message.is_edited,
            edited_at: message.edited_at.map(bson_datetime),
            is_deleted: message.is_deleted,
            deleted_at: message.deleted_at.map(bson_datetime),
            created_at: bson_datetime(message.created_at),
        }
    }
}

impl From<MessageDoc> for Message {
    fn from(doc: MessageDoc) -> Self {
        Self {
            id: doc.id,
            content: doc.content,
            sender_id: doc.sender_id,
            message_type: doc.message_type,
            attachment: doc.attachment,
            read_by: doc.read_by.into_iter().map(Into::into).collect(),
            is_edited: doc.is_edited,
            edited_at: doc.edited_at.map(chrono_datetime),
            is_deleted: doc.is_deleted,
            deleted_at: doc.deleted_at.map(chrono_datetime),
            created_at: chrono_datetime(doc.created_at),
        }
    }
}

impl From<Conversation> for ConversationDoc {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            participants: conversation.participants,
            kind: conversation.kind,
            pair_key: conversation.pair_key,
            name: conversation.name,
            description: conversation.description,
            avatar: conversation.avatar,
            admins: conversation.admins,
            muted_by: conversation.muted_by.into_iter().map(Into::into).collect(),
            messages: conversation.messages.into_iter().map(Into::into).collect(),
            last_message: conversation.last_message.map(Into::into),
            last_activity: bson_datetime(conversation.last_activity),
            is_active: conversation.is_active,
            created_at: bson_datetime(conversation.created_at),
        }
    }
}

impl From<ConversationDoc> for Conversation {
    fn from(doc: ConversationDoc) -> Self {
        Self {
            id: doc.id,
            participants: doc.participants,
            kind: doc.kind,
            pair_key: doc.pair_key,
            name: doc.name,
            description: doc.description,
            avatar: doc.avatar,
            admins: doc.admins,
            muted_by: doc.muted_by.into_iter().map(Into::into).collect(),
            messages: doc.messages.into_iter().map(Into::into).collect(),
            last_message: doc.last_message.map(Into::into),
            last_activity: chrono_datetime(doc.last_activity),
            is_active: doc.is_active,
            created_at: chrono_datetime(doc.created_at),
        }
    }
}

impl From<UserSummaryDoc> for UserSummary {
    fn from(doc: UserSummaryDoc) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            avatar: doc.avatar,
            headline: doc.headline,
            is_active: doc.is_active,
            last_login_at: doc.last_login_at.map(chrono_datetime),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{Bson, to_document};

    #[test]
    fn group_documents_omit_the_pair_key_field() {
        let now = Utc::now();
        let group = Conversation::group(
            "launch team",
            "alice",
            vec!["alice".into(), "bob".into(), "carol".into()],
            now,
        );
        let doc = to_document(&ConversationDoc::from(group)).unwrap();
        assert!(!doc.contains_key("pairKey"));

        let direct = Conversation::direct("alice", "bob", now);
        let doc = to_document(&ConversationDoc::from(direct)).unwrap();
        assert_eq!(doc.get_str("pairKey").unwrap(), "alice:bob");
    }

    #[test]
    fn timestamps_persist_as_native_bson_datetimes() {
        let now = Utc::now();
        let mut conv = Conversation::direct("alice", "bob", now);
        conv.append(Message::new(
            "alice",
            "hi".into(),
            MessageType::Text,
            None,
            now,
        ));

        let doc = to_document(&ConversationDoc::from(conv)).unwrap();
        assert!(matches!(doc.get("lastActivity"), Some(Bson::DateTime(_))));
        assert!(matches!(doc.get("createdAt"), Some(Bson::DateTime(_))));

        let message = doc.get_array("messages").unwrap()[0].as_document().unwrap();
        assert!(matches!(message.get("createdAt"), Some(Bson::DateTime(_))));
        let receipt = message.get_array("readBy").unwrap()[0].as_document().unwrap();
        assert!(matches!(receipt.get("readAt"), Some(Bson::DateTime(_))));
    }

    #[test]
    fn conversion_round_trips_at_millisecond_precision() {
        // BSON datetimes carry milliseconds, so align the input first.
        let now = chrono_datetime(bson_datetime(Utc::now()));
        let mut conv = Conversation::direct("alice", "bob", now);
        let mut message = Message::new("alice", "hello".into(), MessageType::Text, None, now);
        message.mark_read_by("bob", now);
        let message_id = message.id;
        conv.append(message);

        let restored = Conversation::from(ConversationDoc::from(conv.clone()));
        assert_eq!(restored.id, conv.id);
        assert_eq!(restored.pair_key, conv.pair_key);
        assert_eq!(restored.last_activity, now);

        let restored_message = restored.message(message_id).unwrap();
        assert_eq!(restored_message.created_at, now);
        assert_eq!(restored_message.read_by.len(), 2);
        assert!(restored_message.is_read_by("bob"));
    }
}
