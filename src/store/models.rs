use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;

/// Placeholder content substituted when a message is soft-deleted.
pub const TOMBSTONE: &str = "This message was deleted";

/// Maximum message content length, in characters.
pub const MAX_CONTENT_LEN: usize = 1000;

/// Upper bound on messages returned per pagination window.
pub const MAX_PAGE_SIZE: usize = 100;

/// Senders may edit their own messages for this long after creation.
pub fn edit_window() -> Duration {
    Duration::minutes(15)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Voice,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::Voice => "voice",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    #[default]
    Direct,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteSetting {
    pub user_id: String,
    pub muted_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub content: String,
    pub sender_id: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Builds a message already marked read by its sender.
    pub fn new(
        sender_id: impl Into<String>,
        content: String,
        message_type: MessageType,
        attachment: Option<Attachment>,
        now: DateTime<Utc>,
    ) -> Self {
        let sender_id = sender_id.into();
        Self {
            id: Uuid::new_v4(),
            content,
            sender_id: sender_id.clone(),
            message_type,
            attachment,
            read_by: vec![ReadReceipt {
                user_id: sender_id,
                read_at: now,
            }],
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
        }
    }

    /// Trims and bounds-checks message content.
    pub fn validate_content(content: &str) -> Result<String, ChatError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ChatError::InvalidInput(
                "Message content is required".into(),
            ));
        }
        if trimmed.chars().count() > MAX_CONTENT_LEN {
            return Err(ChatError::InvalidInput(format!(
                "Message cannot be more than {MAX_CONTENT_LEN} characters"
            )));
        }
        Ok(trimmed.to_string())
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    /// Adds a read receipt unless one exists. Returns whether anything changed.
    pub fn mark_read_by(&mut self, user_id: &str, now: DateTime<Utc>) -> bool {
        if self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt {
            user_id: user_id.to_string(),
            read_at: now,
        });
        true
    }

    pub fn edit(
        &mut self,
        user_id: &str,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        if self.sender_id != user_id {
            return Err(ChatError::Forbidden("You can only edit your own messages"));
        }
        if self.is_deleted {
            return Err(ChatError::InvalidState("Cannot edit a deleted message"));
        }
        if now - self.created_at > edit_window() {
            return Err(ChatError::InvalidState(
                "Cannot edit messages older than 15 minutes",
            ));
        }
        self.content = content;
        self.is_edited = true;
        self.edited_at = Some(now);
        Ok(())
    }

    pub fn soft_delete(&mut self, user_id: &str, now: DateTime<Utc>) -> Result<(), ChatError> {
        if self.sender_id != user_id {
            return Err(ChatError::Forbidden(
                "You can only delete your own messages",
            ));
        }
        if !self.is_deleted {
            self.is_deleted = true;
            self.deleted_at = Some(now);
            self.content = TOMBSTONE.to_string();
        }
        Ok(())
    }
}

/// Read-only view of a record in the external `users` collection, used to
/// resolve participant details and check active status at auth time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
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
    pub last_login_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub participants: Vec<String>,
    pub kind: ConversationKind,
    /// Sorted participant pair for direct conversations, backed by a unique
    /// sparse index so concurrent find-or-create converges on one document.
    #[serde(default)]
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
    pub muted_by: Vec<MuteSetting>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_message: Option<Message>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn direct(user_a: &str, user_b: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            participants: vec![user_a.to_string(), user_b.to_string()],
            kind: ConversationKind::Direct,
            pair_key: Some(Self::pair_key_for(user_a, user_b)),
            name: None,
            description: None,
            avatar: None,
            admins: Vec::new(),
            muted_by: Vec::new(),
            messages: Vec::new(),
            last_message: None,
            last_activity: now,
            is_active: true,
            created_at: now,
        }
    }

    pub fn group(
        name: impl Into<String>,
        creator: &str,
        participants: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            participants,
            kind: ConversationKind::Group,
            pair_key: None,
            name: Some(name.into()),
            description: None,
            avatar: None,
            admins: vec![creator.to_string()],
            muted_by: Vec::new(),
            messages: Vec::new(),
            last_message: None,
            last_activity: now,
            is_active: true,
            created_at: now,
        }
    }

    /// Order-independent key identifying a direct conversation pair.
    pub fn pair_key_for(user_a: &str, user_b: &str) -> String {
        if user_a <= user_b {
            format!("{user_a}:{user_b}")
        } else {
            format!("{user_b}:{user_a}")
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    pub fn message(&self, message_id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    /// Appends a message, updating the activity markers. Used directly by
    /// in-memory callers; the store mirrors this with a `$push` update.
    pub fn append(&mut self, message: Message) {
        self.last_message = Some(message.clone());
        self.last_activity = message.created_at;
        self.messages.push(message);
    }

    /// Marks messages read by `user_id`. An empty `message_ids` slice means
    /// every message. Idempotent; returns how many receipts were added.
    pub fn mark_read(
        &mut self,
        user_id: &str,
        message_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> usize {
        let mut added = 0;
        for message in &mut self.messages {
            if !message_ids.is_empty() && !message_ids.contains(&message.id) {
                continue;
            }
            if message.mark_read_by(user_id, now) {
                added += 1;
            }
        }
        added
    }

    /// Messages sent by someone else that `user_id` has not read yet.
    pub fn unread_count(&self, user_id: &str) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender_id != user_id && !m.is_read_by(user_id))
            .count()
    }

    /// The `page`-th most-recent window of messages (1-based), restored to
    /// chronological order within the window. Out-of-range page numbers,
    /// however large, resolve to an empty window.
    pub fn page(&self, page: usize, limit: usize) -> Vec<Message> {
        let skip = page.saturating_sub(1).saturating_mul(limit);
        let mut window: Vec<Message> = self
            .messages
            .iter()
            .rev()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect();
        window.reverse();
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(conv: &mut Conversation, sender: &str, content: &str, at: DateTime<Utc>) -> Uuid {
        let message = Message::new(sender, content.to_string(), MessageType::Text, None, at);
        let id = message.id;
        conv.append(message);
        id
    }

    #[test]
    fn pair_key_ignores_argument_order() {
        assert_eq!(
            Conversation::pair_key_for("alice", "bob"),
            Conversation::pair_key_for("bob", "alice"),
        );
    }

    #[test]
    fn new_message_is_read_by_sender_only() {
        let m = Message::new("alice", "hello".into(), MessageType::Text, None, Utc::now());
        assert_eq!(m.read_by.len(), 1);
        assert!(m.is_read_by("alice"));
        assert!(!m.is_read_by("bob"));
    }

    #[test]
    fn marking_read_twice_keeps_a_single_receipt() {
        let now = Utc::now();
        let mut m = Message::new("alice", "hi".into(), MessageType::Text, None, now);
        assert!(m.mark_read_by("bob", now));
        assert!(!m.mark_read_by("bob", now));
        assert_eq!(m.read_by.iter().filter(|r| r.user_id == "bob").count(), 1);
    }

    #[test]
    fn mark_read_with_ids_only_touches_those_messages() {
        let now = Utc::now();
        let mut conv = Conversation::direct("alice", "bob", now);
        let first = msg(&mut conv, "alice", "one", now);
        let _second = msg(&mut conv, "alice", "two", now);

        let added = conv.mark_read("bob", &[first], now);
        assert_eq!(added, 1);
        assert!(conv.message(first).unwrap().is_read_by("bob"));
        assert_eq!(conv.unread_count("bob"), 1);
    }

    #[test]
    fn mark_read_with_empty_ids_covers_everything() {
        let now = Utc::now();
        let mut conv = Conversation::direct("alice", "bob", now);
        for i in 0..3 {
            msg(&mut conv, "alice", &format!("m{i}"), now);
        }

        assert_eq!(conv.unread_count("bob"), 3);
        assert_eq!(conv.mark_read("bob", &[], now), 3);
        assert_eq!(conv.unread_count("bob"), 0);
        // Re-marking is a no-op.
        assert_eq!(conv.mark_read("bob", &[], now), 0);
    }

    #[test]
    fn unread_count_skips_own_messages() {
        let now = Utc::now();
        let mut conv = Conversation::direct("alice", "bob", now);
        msg(&mut conv, "alice", "from alice", now);
        msg(&mut conv, "bob", "from bob", now);

        assert_eq!(conv.unread_count("bob"), 1);
        assert_eq!(conv.unread_count("alice"), 1);
    }

    #[test]
    fn edit_within_window_by_sender_succeeds() {
        let created = Utc::now();
        let mut m = Message::new("alice", "hllo".into(), MessageType::Text, None, created);
        let five_min_later = created + Duration::minutes(5);

        m.edit("alice", "hello".into(), five_min_later).unwrap();
        assert_eq!(m.content, "hello");
        assert!(m.is_edited);
        assert_eq!(m.edited_at, Some(five_min_later));
    }

    #[test]
    fn edit_by_non_sender_is_forbidden() {
        let now = Utc::now();
        let mut m = Message::new("alice", "hi".into(), MessageType::Text, None, now);
        let err = m.edit("bob", "changed".into(), now).unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert_eq!(m.content, "hi");
    }

    #[test]
    fn edit_after_window_is_rejected() {
        let created = Utc::now();
        let mut m = Message::new("alice", "hello".into(), MessageType::Text, None, created);
        let too_late = created + Duration::minutes(16);

        let err = m.edit("alice", "hello!".into(), too_late).unwrap_err();
        assert!(matches!(err, ChatError::InvalidState(_)));
        assert!(!m.is_edited);
    }

    #[test]
    fn soft_delete_writes_tombstone_and_blocks_edits() {
        let now = Utc::now();
        let mut m = Message::new("alice", "secret".into(), MessageType::Text, None, now);

        m.soft_delete("alice", now).unwrap();
        assert!(m.is_deleted);
        assert_eq!(m.content, TOMBSTONE);

        let err = m.edit("alice", "resurrect".into(), now).unwrap_err();
        assert!(matches!(err, ChatError::InvalidState(_)));
    }

    #[test]
    fn soft_delete_by_non_sender_is_forbidden() {
        let now = Utc::now();
        let mut m = Message::new("alice", "hi".into(), MessageType::Text, None, now);
        assert!(matches!(
            m.soft_delete("bob", now),
            Err(ChatError::Forbidden(_))
        ));
        assert!(!m.is_deleted);
    }

    #[test]
    fn pagination_windows_are_chronological_newest_page_first() {
        let start = Utc::now();
        let mut conv = Conversation::direct("alice", "bob", start);
        for i in 0..5 {
            msg(
                &mut conv,
                "alice",
                &format!("m{i}"),
                start + Duration::seconds(i),
            );
        }

        let contents =
            |page: Vec<Message>| page.into_iter().map(|m| m.content).collect::<Vec<_>>();

        // pageSize=2 over 5 messages: [m3, m4], [m1, m2], [m0].
        assert_eq!(contents(conv.page(1, 2)), ["m3", "m4"]);
        assert_eq!(contents(conv.page(2, 2)), ["m1", "m2"]);
        assert_eq!(contents(conv.page(3, 2)), ["m0"]);
        assert!(conv.page(4, 2).is_empty());
    }

    #[test]
    fn pagination_clamps_out_of_range_pages() {
        let now = Utc::now();
        let mut conv = Conversation::direct("alice", "bob", now);
        for i in 0..3 {
            msg(&mut conv, "alice", &format!("m{i}"), now);
        }

        assert!(conv.page(usize::MAX, 50).is_empty());
        assert!(conv.page(usize::MAX, usize::MAX).is_empty());
        // Page zero reads as the first page.
        assert_eq!(conv.page(0, 2).len(), 2);
    }

    #[test]
    fn group_conversations_carry_no_pair_key() {
        let now = Utc::now();
        let group = Conversation::group(
            "launch team",
            "alice",
            vec!["alice".into(), "bob".into(), "carol".into()],
            now,
        );

        assert_eq!(group.kind, ConversationKind::Group);
        assert_eq!(group.pair_key, None);
        assert_eq!(group.admins, ["alice"]);
        assert!(group.is_participant("carol"));
    }

    #[test]
    fn content_validation_trims_and_bounds() {
        assert_eq!(Message::validate_content("  hi  ").unwrap(), "hi");
        assert!(matches!(
            Message::validate_content("   "),
            Err(ChatError::InvalidInput(_))
        ));
        assert!(matches!(
            Message::validate_content(&"x".repeat(MAX_CONTENT_LEN + 1)),
            Err(ChatError::InvalidInput(_))
        ));
    }

    #[test]
    fn append_updates_activity_markers() {
        let start = Utc::now();
        let mut conv = Conversation::direct("alice", "bob", start);
        let later = start + Duration::seconds(30);
        msg(&mut conv, "bob", "ping", later);

        assert_eq!(conv.last_activity, later);
        assert_eq!(conv.last_message.as_ref().unwrap().content, "ping");
    }
}
