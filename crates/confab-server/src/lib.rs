//! # confab-server
//!
//! Real-time chat server for Confab.
//!
//! - **WebSocket transport** (`GET /ws`) carrying JSON `{event, data}` frames
//! - **Event router** that authorizes, persists and fans out chat events per
//!   room, keeping per-chat append order
//! - **Typing tracker** with self-expiring entries
//! - **REST API** (axum) for health checks and instance info
//! - **Per-connection rate limiting** on inbound events

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod service;
pub mod transport;
pub mod typing;

pub use config::ServerConfig;
pub use error::{ChatError, ServerError};
pub use identity::{IdentityResolver, StoreIdentity};
pub use router::EventRouter;
pub use service::ChatService;
