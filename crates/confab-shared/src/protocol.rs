//! Wire protocol between chat clients and the server.
//!
//! Every frame is a JSON text frame shaped `{"event": <name>, "data": <payload>}`.
//! Inbound frames are decoded in two steps: the envelope first (a failure
//! there is a transport error), then the payload for the named event, which
//! is validated into the closed [`ClientEvent`] union before it reaches the
//! router.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{inbound, outbound};
use crate::error::ProtocolError;
use crate::types::{ChatId, Cursor, MessageId, MessageKind, ReadReceipt, UserId, UserProfile};

/// Raw envelope of one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A validated inbound event.
///
/// `user_id` / `sender_id` fields are whatever the client claimed; the router
/// checks them against the authenticated principal.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Authenticate {
        token: String,
    },
    Join {
        chat_id: ChatId,
        user_id: Option<UserId>,
    },
    Leave {
        chat_id: ChatId,
        user_id: Option<UserId>,
    },
    Send(SendMessage),
    MarkRead {
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
        user_id: Option<UserId>,
    },
    Typing {
        chat_id: ChatId,
        user_id: Option<UserId>,
        is_typing: bool,
    },
    History {
        chat_id: ChatId,
        cursor: Option<Cursor>,
        limit: Option<u32>,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        content: String,
    },
    Delete {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendMessage {
    pub chat_id: ChatId,
    pub sender_id: Option<UserId>,
    pub content: String,
    pub message_type: MessageKind,
    pub media_url: Option<String>,
    pub reply_to: Option<MessageId>,
}

#[derive(Deserialize)]
struct AuthenticatePayload {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomPayload {
    chat_id: String,
    user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendPayload {
    chat_id: String,
    content: String,
    sender_id: Option<String>,
    message_type: Option<String>,
    media_url: Option<String>,
    reply_to: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadPayload {
    chat_id: String,
    message_ids: Vec<String>,
    user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    chat_id: String,
    user_id: Option<String>,
    is_typing: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPayload {
    chat_id: String,
    cursor: Option<Cursor>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditPayload {
    chat_id: String,
    message_id: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletePayload {
    chat_id: String,
    message_id: String,
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

fn parse_id<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidId {
        field,
        value: value.to_string(),
    })
}

fn parse_opt_id<T: std::str::FromStr>(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<T>, ProtocolError> {
    value.map(|v| parse_id(field, v)).transpose()
}

fn matches_event(name: &str, canonical: &str, aliases: &[&str]) -> bool {
    name == canonical || aliases.contains(&name)
}

impl ClientEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: Frame = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
        Self::from_frame(frame)
    }

    /// Validate an already-parsed envelope.
    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        let Frame { event, data } = frame;
        let name = event.as_str();

        if name == inbound::AUTHENTICATE {
            let p: AuthenticatePayload = payload(name, data)?;
            return Ok(Self::Authenticate { token: p.token });
        }

        if matches_event(name, inbound::JOIN, inbound::JOIN_ALIASES)
            || matches_event(name, inbound::LEAVE, inbound::LEAVE_ALIASES)
        {
            let p: RoomPayload = payload(name, data)?;
            let chat_id = parse_id("chatId", &p.chat_id)?;
            let user_id = parse_opt_id("userId", p.user_id.as_deref())?;
            return Ok(if matches_event(name, inbound::JOIN, inbound::JOIN_ALIASES) {
                Self::Join { chat_id, user_id }
            } else {
                Self::Leave { chat_id, user_id }
            });
        }

        if matches_event(name, inbound::SEND, inbound::SEND_ALIASES) {
            let p: SendPayload = payload(name, data)?;
            let message_type = match p.message_type.as_deref() {
                None => MessageKind::Text,
                Some(raw) => raw.parse().map_err(|reason| ProtocolError::InvalidPayload {
                    event: name.to_string(),
                    reason,
                })?,
            };
            return Ok(Self::Send(SendMessage {
                chat_id: parse_id("chatId", &p.chat_id)?,
                sender_id: parse_opt_id("senderId", p.sender_id.as_deref())?,
                content: p.content,
                message_type,
                media_url: p.media_url.filter(|url| !url.trim().is_empty()),
                reply_to: parse_opt_id("replyTo", p.reply_to.as_deref())?,
            }));
        }

        if matches_event(name, inbound::MARK_READ, inbound::MARK_READ_ALIASES) {
            let p: MarkReadPayload = payload(name, data)?;
            let message_ids = p
                .message_ids
                .iter()
                .map(|id| parse_id("messageIds", id))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::MarkRead {
                chat_id: parse_id("chatId", &p.chat_id)?,
                message_ids,
                user_id: parse_opt_id("userId", p.user_id.as_deref())?,
            });
        }

        match name {
            inbound::TYPING => {
                let p: TypingPayload = payload(name, data)?;
                Ok(Self::Typing {
                    chat_id: parse_id("chatId", &p.chat_id)?,
                    user_id: parse_opt_id("userId", p.user_id.as_deref())?,
                    is_typing: p.is_typing,
                })
            }
            inbound::HISTORY => {
                let p: HistoryPayload = payload(name, data)?;
                Ok(Self::History {
                    chat_id: parse_id("chatId", &p.chat_id)?,
                    cursor: p.cursor,
                    limit: p.limit,
                })
            }
            inbound::EDIT => {
                let p: EditPayload = payload(name, data)?;
                Ok(Self::Edit {
                    chat_id: parse_id("chatId", &p.chat_id)?,
                    message_id: parse_id("messageId", &p.message_id)?,
                    content: p.content,
                })
            }
            inbound::DELETE => {
                let p: DeletePayload = payload(name, data)?;
                Ok(Self::Delete {
                    chat_id: parse_id("chatId", &p.chat_id)?,
                    message_id: parse_id("messageId", &p.message_id)?,
                })
            }
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    /// Canonical event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => inbound::AUTHENTICATE,
            Self::Join { .. } => inbound::JOIN,
            Self::Leave { .. } => inbound::LEAVE,
            Self::Send(_) => inbound::SEND,
            Self::MarkRead { .. } => inbound::MARK_READ,
            Self::Typing { .. } => inbound::TYPING,
            Self::History { .. } => inbound::HISTORY,
            Self::Edit { .. } => inbound::EDIT,
            Self::Delete { .. } => inbound::DELETE,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Short form of the message a reply points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: MessageId,
    pub content: String,
    pub sender: UserId,
}

/// A message as delivered to clients, with the sender resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: UserProfile,
    pub content: String,
    pub message_type: MessageKind,
    pub media_url: Option<String>,
    pub reply_to: Option<ReplyPreview>,
    pub read_by: Vec<ReadReceipt>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub chat_id: ChatId,
    /// Newest first.
    pub messages: Vec<MessageView>,
    pub next_cursor: Option<Cursor>,
}

/// Every event the server pushes to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "authenticated", rename_all = "camelCase")]
    Authenticated { user_id: UserId },

    #[serde(rename = "joined", rename_all = "camelCase")]
    Joined { chat_id: ChatId },

    #[serde(rename = "new-message")]
    NewMessage(MessageView),

    #[serde(rename = "user-joined", rename_all = "camelCase")]
    UserJoined {
        chat_id: ChatId,
        user_id: UserId,
        message: String,
    },

    #[serde(rename = "user-left", rename_all = "camelCase")]
    UserLeft {
        chat_id: ChatId,
        user_id: UserId,
        message: String,
    },

    #[serde(rename = "messages-read", rename_all = "camelCase")]
    MessagesRead {
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
        user_id: UserId,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "user-typing", rename_all = "camelCase")]
    UserTyping {
        chat_id: ChatId,
        user_id: UserId,
        is_typing: bool,
    },

    #[serde(rename = "history")]
    History(HistoryPage),

    #[serde(rename = "message-edited")]
    MessageEdited(MessageView),

    #[serde(rename = "message-deleted", rename_all = "camelCase")]
    MessageDeleted {
        chat_id: ChatId,
        message_id: MessageId,
        deleted_at: DateTime<Utc>,
    },

    #[serde(rename = "error")]
    Error(String),
}

impl ServerEvent {
    pub fn user_joined(chat_id: ChatId, user_id: UserId) -> Self {
        Self::UserJoined {
            chat_id,
            user_id,
            message: "User joined the chat".to_string(),
        }
    }

    pub fn user_left(chat_id: ChatId, user_id: UserId) -> Self {
        Self::UserLeft {
            chat_id,
            user_id,
            message: "User left the chat".to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => outbound::AUTHENTICATED,
            Self::Joined { .. } => outbound::JOINED,
            Self::NewMessage(_) => outbound::NEW_MESSAGE,
            Self::UserJoined { .. } => outbound::USER_JOINED,
            Self::UserLeft { .. } => outbound::USER_LEFT,
            Self::MessagesRead { .. } => outbound::MESSAGES_READ,
            Self::UserTyping { .. } => outbound::USER_TYPING,
            Self::History(_) => outbound::HISTORY,
            Self::MessageEdited(_) => outbound::MESSAGE_EDITED,
            Self::MessageDeleted { .. } => outbound::MESSAGE_DELETED,
            Self::Error(_) => outbound::ERROR,
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}
