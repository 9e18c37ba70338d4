//! Read access to the local identity mirror (`users`, `sessions`).
//!
//! The identity service owns these rows. The upsert and session helpers
//! exist for seeding development databases and tests.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use confab_shared::types::{UserId, UserProfile};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;
use crate::row::{id_col, now, ts, ts_col};

impl Database {
    /// Insert or update a user row.
    pub fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, display_name, image, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 display_name = excluded.display_name,
                 image = excluded.image",
            params![
                profile.id.to_string(),
                profile.username,
                profile.display_name,
                profile.image,
                ts(&now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, display_name, image, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(User {
                        id: id_col(row, 0, UserId)?,
                        username: row.get(1)?,
                        display_name: row.get(2)?,
                        image: row.get(3)?,
                        created_at: ts_col(row, 4)?,
                    })
                },
            )
            .map_err(|e| StoreError::or_not_found(e, "user"))
    }

    /// Public profile, or `None` for users the mirror has never seen.
    pub fn get_user_profile(&self, id: UserId) -> Result<Option<UserProfile>> {
        match self.get_user(id) {
            Ok(user) => Ok(Some(UserProfile {
                id: user.id,
                username: user.username,
                display_name: user.display_name,
                image: user.image,
            })),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store a session token for `user` that stays valid until `expires_at`.
    pub fn insert_session(&self, token: &str, user: UserId, expires_at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![token, user.to_string(), ts(&expires_at), ts(&now())],
        )?;
        Ok(())
    }

    /// Mint a random session token valid for `ttl`.
    pub fn create_session(&self, user: UserId, ttl: Duration) -> Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        self.insert_session(&token, user, now() + ttl)?;
        Ok(token)
    }

    /// User behind an unexpired session token.
    pub fn resolve_session(&self, token: &str) -> Result<Option<UserId>> {
        let user = self
            .conn()
            .query_row(
                "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > ?2",
                params![token, ts(&now())],
                |row| id_col(row, 0, UserId),
            )
            .optional()?;
        Ok(user)
    }
}
