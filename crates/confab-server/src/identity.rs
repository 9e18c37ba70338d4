//! Seam to the identity service that owns users and sessions.

use async_trait::async_trait;

use confab_shared::types::{UserId, UserProfile};
use confab_store::ChatStore;

use crate::error::ChatError;

/// Resolves session tokens and user profiles.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// The user behind a session token, or `None` if the token is unknown
    /// or expired.
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, ChatError>;

    /// Public profile of a user, or `None` if the service does not know them.
    async fn profile(&self, user: UserId) -> Result<Option<UserProfile>, ChatError>;
}

/// Reads the identity mirror tables in the chat database.
#[derive(Clone)]
pub struct StoreIdentity {
    store: ChatStore,
}

impl StoreIdentity {
    pub fn new(store: ChatStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IdentityResolver for StoreIdentity {
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, ChatError> {
        let token = token.trim().to_string();
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self.store.call(move |db| db.resolve_session(&token)).await?)
    }

    async fn profile(&self, user: UserId) -> Result<Option<UserProfile>, ChatError> {
        Ok(self.store.call(move |db| db.get_user_profile(user)).await?)
    }
}

/// Profile for display. Users the identity service cannot describe get a
/// placeholder carrying only their id.
pub async fn display_profile(identity: &dyn IdentityResolver, user: UserId) -> UserProfile {
    match identity.profile(user).await {
        Ok(Some(profile)) => profile,
        Ok(None) => UserProfile::unknown(user),
        Err(e) => {
            tracing::warn!(user = %user, error = %e, "Profile lookup failed");
            UserProfile::unknown(user)
        }
    }
}
