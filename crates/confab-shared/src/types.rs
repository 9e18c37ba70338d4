use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn short(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Stable user identifier handed out by the identity collaborator.
    UserId
);
uuid_id!(
    /// A conversation (one-on-one or group).
    ChatId
);
uuid_id!(MessageId);
uuid_id!(
    /// One live transport connection. Never persisted.
    ConnectionId
);

/// Payload type of a message. Exactly one per message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "file" => Ok(Self::File),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// Position in a chat's history. Wraps the store sequence number of the
/// last message a client has already seen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Cursor(pub i64);

/// One (reader, timestamp) pair attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Public profile of a user, resolved through the identity collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub image: Option<String>,
}

impl UserProfile {
    /// Profile for a user the identity collaborator knows nothing about.
    pub fn unknown(id: UserId) -> Self {
        Self {
            id,
            username: id.short(),
            display_name: None,
            image: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ChatId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.0));

        let back: ChatId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn id_from_str_rejects_garbage() {
        assert!("not-a-uuid".parse::<UserId>().is_err());
        let id = UserId::new();
        assert_eq!(format!(" {id} ").parse::<UserId>().unwrap(), id);
    }

    #[test]
    fn message_kind_wire_names() {
        assert_eq!(serde_json::to_string(&MessageKind::Video).unwrap(), "\"video\"");
        assert_eq!("file".parse::<MessageKind>().unwrap(), MessageKind::File);
        assert!("gif".parse::<MessageKind>().is_err());
        assert!(!MessageKind::Text.is_media());
    }
}
