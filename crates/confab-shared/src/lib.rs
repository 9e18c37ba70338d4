//! # confab-shared
//!
//! Types shared by the Confab chat store and server: identifiers, the
//! JSON wire protocol spoken over client connections, and protocol-wide
//! constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{ClientEvent, HistoryPage, MessageView, ReplyPreview, SendMessage, ServerEvent};
pub use types::{
    ChatId, ConnectionId, Cursor, MessageId, MessageKind, ReadReceipt, UserId, UserProfile,
};
