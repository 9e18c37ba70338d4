use thiserror::Error;

/// Failures while turning an inbound frame into a [`ClientEvent`].
///
/// [`ClientEvent`]: crate::protocol::ClientEvent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not a JSON `{event, data}` envelope at all.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The envelope is fine but the payload does not match the event.
    #[error("Invalid payload for '{event}': {reason}")]
    InvalidPayload { event: String, reason: String },

    #[error("Invalid identifier in '{field}': {value}")]
    InvalidId { field: &'static str, value: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ProtocolError {
    /// Transport-level failures end the connection; everything else is
    /// reported back to the sender and the connection stays up.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedFrame(_))
    }
}
