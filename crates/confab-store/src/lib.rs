//! # confab-store
//!
//! Durable chat state for Confab, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for chats, membership,
//! messages, read receipts and the local identity mirror. [`ChatStore`] is
//! the async facade the server uses: it serializes access to one
//! connection, runs each call on the blocking pool and bounds it with a
//! timeout.

pub mod chats;
pub mod database;
pub mod identity;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod receipts;
pub mod store;

mod error;
mod row;

pub use database::Database;
pub use error::{Result, StoreError};
pub use messages::HistoryPages;
pub use models::*;
pub use store::ChatStore;

#[cfg(test)]
pub(crate) mod test_support {
    use confab_shared::types::{UserId, UserProfile};

    use crate::Database;

    /// Seed `N` users into the identity mirror.
    pub(crate) fn users<const N: usize>(db: &Database) -> [UserId; N] {
        std::array::from_fn(|_| {
            let id = UserId::new();
            db.upsert_user(&UserProfile {
                id,
                username: format!("user-{}", id.0.simple()),
                display_name: None,
                image: None,
            })
            .unwrap();
            id
        })
    }
}
