use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    Collection, Database, IndexModel,
    bson::{Bson, doc, to_bson},
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::ChatError;
use crate::metrics::Metrics;

pub mod docs;
pub mod models;

use docs::{ConversationDoc, MessageDoc, ReadReceiptDoc, UserSummaryDoc, bson_datetime};
use models::{
    Attachment, Conversation, MAX_PAGE_SIZE, Message, MessageType, TOMBSTONE, UserSummary,
};

/// A page of messages together with its pagination metadata.
#[derive(Debug)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

/// Single writer of truth for conversation and message state.
///
/// Conversations embed their message lists; appends are `$push` updates so
/// concurrent writers never lose each other's messages, while receipt, edit
/// and delete mutations target individual array elements.
#[derive(Clone)]
pub struct ConversationStore {
    conversations: Collection<ConversationDoc>,
    users: Collection<UserSummaryDoc>,
}

impl ConversationStore {
    pub fn new(db: &Database) -> Self {
        Self {
            conversations: db.collection("conversations"),
            users: db.collection("users"),
        }
    }

    pub async fn ensure_indexes(&self) -> Result<(), ChatError> {
        let pair_key = IndexModel::builder()
            .keys(doc! { "pairKey": 1 })
            .options(IndexOptions::builder().unique(true).sparse(true).build())
            .build();
        let participants = IndexModel::builder()
            .keys(doc! { "participants": 1 })
            .build();
        let activity = IndexModel::builder()
            .keys(doc! { "lastActivity": -1 })
            .build();

        self.conversations
            .create_indexes(vec![pair_key, participants, activity])
            .await?;
        Ok(())
    }

    /// Looks up the direct conversation for an unordered pair, creating it on
    /// first contact. A concurrent create for the same pair loses the unique
    /// `pairKey` race and resolves with a reconciling re-read, so callers
    /// never observe two conversations for one pair.
    pub async fn find_or_create_direct(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Conversation, ChatError> {
        let key = Conversation::pair_key_for(user_a, user_b);
        let filter = doc! { "kind": "direct", "pairKey": &key };

        if let Some(existing) = self.conversations.find_one(filter.clone()).await? {
            return Ok(existing.into());
        }

        let conversation = Conversation::direct(user_a, user_b, Utc::now());
        let document = ConversationDoc::from(conversation.clone());
        match self.conversations.insert_one(&document).await {
            Ok(_) => {
                debug!("created direct conversation {}", conversation.id);
                Ok(conversation)
            }
            Err(e) if is_duplicate_key(&e) => self
                .conversations
                .find_one(filter)
                .await?
                .map(Conversation::from)
                .ok_or(ChatError::NotFound("Conversation")),
            Err(e) => Err(e.into()),
        }
    }

    /// Active conversations for a user, most recently active first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Conversation>, ChatError> {
        let cursor = self
            .conversations
            .find(doc! { "participants": user_id, "isActive": true })
            .sort(doc! { "lastActivity": -1 })
            .await?;
        let documents: Vec<ConversationDoc> = cursor.try_collect().await?;
        Ok(documents.into_iter().map(Conversation::from).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<Conversation, ChatError> {
        self.conversations
            .find_one(doc! { "_id": id.to_string() })
            .await?
            .map(Conversation::from)
            .ok_or(ChatError::NotFound("Conversation"))
    }

    /// Loads a conversation, distinguishing missing (NotFound) from
    /// non-membership (Forbidden).
    pub async fn get_for_participant(
        &self,
        id: Uuid,
        user_id: &str,
    ) -> Result<Conversation, ChatError> {
        let conversation = self.get(id).await?;
        if !conversation.is_participant(user_id) {
            return Err(ChatError::Forbidden(
                "You are not a participant in this conversation",
            ));
        }
        Ok(conversation)
    }

    pub async fn is_participant(&self, id: Uuid, user_id: &str) -> Result<bool, ChatError> {
        Ok(self.get(id).await?.is_participant(user_id))
    }

    /// Validates, appends and durably persists a message before returning it.
    pub async fn append_message(
        &self,
        id: Uuid,
        sender_id: &str,
        content: &str,
        message_type: MessageType,
        attachment: Option<Attachment>,
    ) -> Result<Message, ChatError> {
        let conversation = self.get(id).await?;
        if !conversation.is_participant(sender_id) {
            return Err(ChatError::Forbidden(
                "You are not a participant in this conversation",
            ));
        }

        let content = Message::validate_content(content)?;
        let message = Message::new(sender_id, content, message_type, attachment, Utc::now());
        let message_bson = to_bson(&MessageDoc::from(message.clone()))?;

        let start = Instant::now();
        let result = self
            .conversations
            .update_one(
                doc! { "_id": id.to_string() },
                doc! {
                    "$push": { "messages": message_bson.clone() },
                    "$set": {
                        "lastMessage": message_bson,
                        "lastActivity": bson_datetime(message.created_at),
                    },
                },
            )
            .await?;
        Metrics::observe_db_query("append_message", start.elapsed());
        require_matched(result.matched_count, "Conversation")?;

        Ok(message)
    }

    /// Records read receipts for `user_id`. An empty `message_ids` slice
    /// marks every message; the array filter skips messages the user already
    /// read, so re-marking is a no-op.
    pub async fn mark_read(
        &self,
        id: Uuid,
        user_id: &str,
        message_ids: &[Uuid],
    ) -> Result<(), ChatError> {
        // Participant check doubles as the NotFound check.
        self.get_for_participant(id, user_id).await?;

        let receipt = to_bson(&ReadReceiptDoc {
            user_id: user_id.to_string(),
            read_at: bson_datetime(Utc::now()),
        })?;

        let mut unread = doc! { "m.readBy.userId": { "$ne": user_id } };
        if !message_ids.is_empty() {
            let ids: Vec<Bson> = message_ids
                .iter()
                .map(|m| Bson::String(m.to_string()))
                .collect();
            unread.insert("m._id", doc! { "$in": ids });
        }

        let result = self
            .conversations
            .update_one(
                doc! { "_id": id.to_string() },
                doc! { "$push": { "messages.$[m].readBy": receipt } },
            )
            .array_filters(vec![unread])
            .await?;
        require_matched(result.matched_count, "Conversation")?;

        Ok(())
    }

    /// Replaces message content, subject to the sender-only rule and the
    /// 15-minute edit window enforced by the model.
    pub async fn edit_message(
        &self,
        id: Uuid,
        message_id: Uuid,
        user_id: &str,
        new_content: &str,
    ) -> Result<Message, ChatError> {
        let conversation = self.get(id).await?;
        let mut message = conversation
            .message(message_id)
            .cloned()
            .ok_or(ChatError::NotFound("Message"))?;

        let content = Message::validate_content(new_content)?;
        let now = Utc::now();
        message.edit(user_id, content, now)?;

        let result = self
            .conversations
            .update_one(
                doc! { "_id": id.to_string(), "messages._id": message_id.to_string() },
                doc! { "$set": {
                    "messages.$.content": &message.content,
                    "messages.$.isEdited": true,
                    "messages.$.editedAt": bson_datetime(now),
                }},
            )
            .await?;
        require_matched(result.matched_count, "Message")?;

        Ok(message)
    }

    /// Flags a message deleted and overwrites its content with the tombstone.
    pub async fn soft_delete_message(
        &self,
        id: Uuid,
        message_id: Uuid,
        user_id: &str,
    ) -> Result<Message, ChatError> {
        let conversation = self.get(id).await?;
        let mut message = conversation
            .message(message_id)
            .cloned()
            .ok_or(ChatError::NotFound("Message"))?;

        let now = Utc::now();
        message.soft_delete(user_id, now)?;

        let result = self
            .conversations
            .update_one(
                doc! { "_id": id.to_string(), "messages._id": message_id.to_string() },
                doc! { "$set": {
                    "messages.$.content": TOMBSTONE,
                    "messages.$.isDeleted": true,
                    "messages.$.deletedAt": bson_datetime(now),
                }},
            )
            .await?;
        require_matched(result.matched_count, "Message")?;

        Ok(message)
    }

    /// The `page`-th most-recent window of a conversation's messages,
    /// chronological within the window. Participants only.
    pub async fn list_messages(
        &self,
        id: Uuid,
        user_id: &str,
        page: usize,
        limit: usize,
    ) -> Result<MessagePage, ChatError> {
        let conversation = self.get_for_participant(id, user_id).await?;

        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let page = page.max(1);
        let total = conversation.messages.len();

        Ok(MessagePage {
            messages: conversation.page(page, limit),
            page,
            limit,
            total,
            pages: total.div_ceil(limit),
        })
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserSummary>, ChatError> {
        Ok(self
            .users
            .find_one(doc! { "_id": user_id })
            .await?
            .map(UserSummary::from))
    }

    /// Resolves participant details for response bodies.
    pub async fn user_summaries(&self, ids: &[String]) -> Result<Vec<UserSummary>, ChatError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self.users.find(doc! { "_id": { "$in": ids } }).await?;
        let documents: Vec<UserSummaryDoc> = cursor.try_collect().await?;
        Ok(documents.into_iter().map(UserSummary::from).collect())
    }

    /// Best-effort last-seen stamp on the user record. Callers treat failure
    /// as non-fatal and only log it.
    pub async fn touch_last_seen(&self, user_id: &str) -> Result<(), ChatError> {
        self.users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": { "lastLoginAt": bson_datetime(Utc::now()) } },
            )
            .await?;
        Ok(())
    }
}

/// Missing-document guard for targeted updates. A zero match means the
/// conversation or message disappeared between the read and the write.
fn require_matched(matched_count: u64, missing: &'static str) -> Result<(), ChatError> {
    if matched_count == 0 {
        return Err(ChatError::NotFound(missing));
    }
    Ok(())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::from_document;
    use mongodb::error::{Error, WriteError};

    fn write_error(code: i32) -> Error {
        let inner: WriteError = from_document(doc! {
            "code": code,
            "errmsg": "write failed",
        })
        .unwrap();
        Error::from(ErrorKind::Write(WriteFailure::WriteError(inner)))
    }

    #[test]
    fn duplicate_key_violations_are_recognized() {
        assert!(is_duplicate_key(&write_error(11000)));
        assert!(!is_duplicate_key(&write_error(121)));
    }

    #[test]
    fn updates_matching_nothing_surface_not_found() {
        assert!(matches!(
            require_matched(0, "Conversation"),
            Err(ChatError::NotFound("Conversation"))
        ));
        assert!(require_matched(1, "Message").is_ok());
    }
}
