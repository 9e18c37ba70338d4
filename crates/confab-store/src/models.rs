//! Domain model structs persisted in the chat database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confab_shared::constants::{MAX_CHAT_NAME_LEN, MAX_CONTENT_LEN};
use confab_shared::types::{ChatId, Cursor, MessageId, MessageKind, ReadReceipt, UserId};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A conversation, one-on-one or group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    /// Distinct, in the order they were added.
    pub participants: Vec<UserId>,
    pub is_group: bool,
    /// Group display name.
    pub name: Option<String>,
    pub image: Option<String>,
    /// Always empty for one-on-one chats.
    pub admins: Vec<UserId>,
    pub created_by: UserId,
    pub last_message_id: Option<MessageId>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_participant(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }
}

/// Input for [`Database::create_chat`](crate::Database::create_chat).
#[derive(Debug, Clone, Default)]
pub struct NewChat {
    pub participants: Vec<UserId>,
    pub is_group: bool,
    pub name: Option<String>,
    pub image: Option<String>,
    pub created_by: UserId,
}

impl NewChat {
    pub fn direct(a: UserId, b: UserId) -> Self {
        Self {
            participants: vec![a, b],
            is_group: false,
            name: None,
            image: None,
            created_by: a,
        }
    }

    pub fn group(name: impl Into<String>, creator: UserId, members: &[UserId]) -> Self {
        let mut participants = vec![creator];
        participants.extend_from_slice(members);
        Self {
            participants,
            is_group: true,
            name: Some(name.into()),
            image: None,
            created_by: creator,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A stored message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned append sequence. Totally orders messages.
    pub seq: i64,
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub reply_to: Option<MessageId>,
    pub read_by: Vec<ReadReceipt>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn cursor(&self) -> Cursor {
        Cursor(self.seq)
    }
}

/// Input for [`Database::append_message`](crate::Database::append_message).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub media_url: Option<String>,
    pub reply_to: Option<MessageId>,
}

impl NewMessage {
    pub fn text(chat_id: ChatId, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id,
            kind: MessageKind::Text,
            content: content.into(),
            media_url: None,
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message: MessageId) -> Self {
        self.reply_to = Some(message);
        self
    }

    /// Trim and check the payload. Needs no database access, so callers can
    /// reject bad input before issuing a store call.
    pub fn normalized(mut self) -> Result<Self> {
        self.content = normalize_content(&self.content, false)?;
        self.media_url = self
            .media_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        match (self.kind.is_media(), &self.media_url) {
            (false, _) if self.content.is_empty() => {
                return Err(StoreError::Validation("message content is empty".into()));
            }
            (true, None) => {
                return Err(StoreError::Validation(format!(
                    "{} messages need a media url",
                    self.kind.as_str()
                )));
            }
            (true, Some(url)) if self.content.is_empty() => {
                self.content = url.clone();
            }
            _ => {}
        }

        Ok(self)
    }
}

/// Trim message content and enforce the length bound.
pub fn normalize_content(raw: &str, require_non_empty: bool) -> Result<String> {
    let content = raw.trim();
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(StoreError::Validation(format!(
            "message content exceeds {MAX_CONTENT_LEN} characters"
        )));
    }
    if require_non_empty && content.is_empty() {
        return Err(StoreError::Validation("message content is empty".into()));
    }
    Ok(content.to_string())
}

pub(crate) fn normalize_chat_name(raw: Option<String>) -> Result<Option<String>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let name = raw.trim();
    if name.chars().count() > MAX_CHAT_NAME_LEN {
        return Err(StoreError::Validation(format!(
            "chat name exceeds {MAX_CHAT_NAME_LEN} characters"
        )));
    }
    Ok(Some(name.to_string()).filter(|n| !n.is_empty()))
}

// ---------------------------------------------------------------------------
// Read receipts & paging
// ---------------------------------------------------------------------------

/// Messages newly acknowledged in one chat by a `mark_read` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReads {
    pub chat_id: ChatId,
    pub message_ids: Vec<MessageId>,
}

/// Result of [`Database::mark_read`](crate::Database::mark_read).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub reader: UserId,
    pub read_at: DateTime<Utc>,
    /// One entry per touched chat, in first-seen order.
    pub chats: Vec<ChatReads>,
}

impl ReadOutcome {
    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    pub fn chat_ids(&self) -> Vec<ChatId> {
        self.chats.iter().map(|c| c.chat_id).collect()
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Message>,
    /// Pass back to fetch the next (older) page. `None` once exhausted.
    pub next_cursor: Option<Cursor>,
}

// ---------------------------------------------------------------------------
// Identity mirror
// ---------------------------------------------------------------------------

/// A row of the local `users` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_is_trimmed_and_required() {
        let msg = NewMessage::text(ChatId::new(), UserId::new(), "  hi  ")
            .normalized()
            .unwrap();
        assert_eq!(msg.content, "hi");

        let err = NewMessage::text(ChatId::new(), UserId::new(), "   ")
            .normalized()
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn content_length_is_bounded() {
        let long = "x".repeat(MAX_CONTENT_LEN + 1);
        assert!(NewMessage::text(ChatId::new(), UserId::new(), long)
            .normalized()
            .is_err());

        let exact = "é".repeat(MAX_CONTENT_LEN);
        assert!(NewMessage::text(ChatId::new(), UserId::new(), exact)
            .normalized()
            .is_ok());
    }

    #[test]
    fn media_needs_url_and_defaults_content() {
        let mut msg = NewMessage::text(ChatId::new(), UserId::new(), "");
        msg.kind = MessageKind::Image;
        assert!(msg.clone().normalized().is_err());

        msg.media_url = Some(" https://cdn.example/cat.png ".into());
        let msg = msg.normalized().unwrap();
        assert_eq!(msg.content, "https://cdn.example/cat.png");
    }

    #[test]
    fn chat_name_rules() {
        assert_eq!(normalize_chat_name(Some("  team ".into())).unwrap(), Some("team".into()));
        assert_eq!(normalize_chat_name(Some("   ".into())).unwrap(), None);
        assert!(normalize_chat_name(Some("n".repeat(MAX_CHAT_NAME_LEN + 1))).is_err());
    }
}
