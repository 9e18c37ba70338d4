/// Application name
pub const APP_NAME: &str = "Confab";

/// Maximum message content length, in characters
pub const MAX_CONTENT_LEN: usize = 1000;

/// Maximum group chat display name length, in characters
pub const MAX_CHAT_NAME_LEN: usize = 50;

/// A chat needs at least this many distinct participants
pub const MIN_PARTICIPANTS: usize = 2;

/// History page size when the client does not ask for one
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Upper bound on a single history page
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Typing entries without a refresh for this long are dropped
pub const DEFAULT_TYPING_TIMEOUT_SECS: u64 = 6;

/// Every store call fails after this long instead of hanging the connection
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Outbound events queued per connection before deliveries start dropping
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Sustained inbound events per second allowed per connection
pub const DEFAULT_EVENT_RATE: f64 = 20.0;

/// Inbound events a connection may send in one burst
pub const DEFAULT_EVENT_BURST: f64 = 40.0;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Inbound event names
pub mod inbound {
    pub const AUTHENTICATE: &str = "authenticate";
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
    pub const SEND: &str = "send";
    pub const MARK_READ: &str = "markRead";
    pub const TYPING: &str = "typing";
    pub const HISTORY: &str = "history";
    pub const EDIT: &str = "edit";
    pub const DELETE: &str = "delete";

    /// Older client builds use these names.
    pub const JOIN_ALIASES: &[&str] = &["join-chat"];
    pub const LEAVE_ALIASES: &[&str] = &["leave-chat"];
    pub const SEND_ALIASES: &[&str] = &["send-message"];
    pub const MARK_READ_ALIASES: &[&str] = &["mark-read", "markAsRead"];
}

/// Outbound event names
pub mod outbound {
    pub const AUTHENTICATED: &str = "authenticated";
    pub const JOINED: &str = "joined";
    pub const NEW_MESSAGE: &str = "new-message";
    pub const USER_JOINED: &str = "user-joined";
    pub const USER_LEFT: &str = "user-left";
    pub const MESSAGES_READ: &str = "messages-read";
    pub const USER_TYPING: &str = "user-typing";
    pub const HISTORY: &str = "history";
    pub const MESSAGE_EDITED: &str = "message-edited";
    pub const MESSAGE_DELETED: &str = "message-deleted";
    pub const ERROR: &str = "error";
}
