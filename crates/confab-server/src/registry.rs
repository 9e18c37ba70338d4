//! Live connections and the rooms they have joined.
//!
//! This is the only place that knows how to reach a connection. Fan-out to a
//! room goes through [`ConnectionRegistry::deliver`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use confab_shared::protocol::ServerEvent;
use confab_shared::types::{ChatId, ConnectionId, UserId};

use crate::error::ChatError;

/// Where a connection is in its lifecycle. Disconnected connections are
/// simply gone from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticated,
    JoinedRooms,
}

struct Session {
    user: Option<UserId>,
    rooms: HashSet<ChatId>,
    tx: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<ConnectionId, Session>,
    rooms: HashMap<ChatId, HashSet<ConnectionId>>,
}

/// What a connection left behind when it was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departed {
    pub user: Option<UserId>,
    pub rooms: Vec<ChatId>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection whose outbound events go to `tx`.
    pub async fn register(&self, tx: mpsc::Sender<ServerEvent>) -> ConnectionId {
        let id = ConnectionId::new();
        let mut inner = self.inner.write().await;
        inner.sessions.insert(
            id,
            Session {
                user: None,
                rooms: HashSet::new(),
                tx,
            },
        );
        info!(conn = %id.short(), live = inner.sessions.len(), "connection registered");
        id
    }

    /// Bind a principal to the connection. A connection authenticates once.
    pub async fn authenticate(&self, conn: ConnectionId, user: UserId) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&conn)
            .ok_or_else(|| ChatError::NotFound("connection".into()))?;
        if session.user.is_some() {
            return Err(ChatError::ValidationFailure(
                "connection is already authenticated".into(),
            ));
        }
        session.user = Some(user);
        Ok(())
    }

    pub async fn principal(&self, conn: ConnectionId) -> Option<UserId> {
        self.inner
            .read()
            .await
            .sessions
            .get(&conn)
            .and_then(|s| s.user)
    }

    pub async fn state(&self, conn: ConnectionId) -> Option<ConnectionState> {
        let inner = self.inner.read().await;
        let session = inner.sessions.get(&conn)?;
        Some(match (session.user, session.rooms.is_empty()) {
            (None, _) => ConnectionState::Connected,
            (Some(_), true) => ConnectionState::Authenticated,
            (Some(_), false) => ConnectionState::JoinedRooms,
        })
    }

    /// Add the connection to a room. Returns `false` if it was already there.
    pub async fn join(&self, conn: ConnectionId, chat: ChatId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&conn) else {
            return false;
        };
        if !session.rooms.insert(chat) {
            return false;
        }
        inner.rooms.entry(chat).or_default().insert(conn);
        true
    }

    /// Remove the connection from a room. Returns `false` if it was not there.
    pub async fn leave(&self, conn: ConnectionId, chat: ChatId) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner
            .sessions
            .get_mut(&conn)
            .map(|s| s.rooms.remove(&chat))
            .unwrap_or(false);
        if removed {
            detach(&mut inner.rooms, chat, conn);
        }
        removed
    }

    /// Forget a connection and every room registration it held. Dropping its
    /// sender lets the egress side drain and finish.
    pub async fn remove(&self, conn: ConnectionId) -> Option<Departed> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.remove(&conn)?;
        for chat in &session.rooms {
            detach(&mut inner.rooms, *chat, conn);
        }
        info!(conn = %conn.short(), live = inner.sessions.len(), "connection removed");
        Some(Departed {
            user: session.user,
            rooms: session.rooms.into_iter().collect(),
        })
    }

    /// Queue `event` for every connection joined to `chat`, optionally
    /// skipping one. Full or closed queues are skipped. Returns how many
    /// connections the event was queued for.
    pub async fn deliver(
        &self,
        chat: ChatId,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(&chat) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in members {
            if Some(*conn) == except {
                continue;
            }
            let Some(session) = inner.sessions.get(conn) else {
                continue;
            };
            match session.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        chat = %chat,
                        conn = %conn.short(),
                        event = event.name(),
                        "Dropping event for slow connection"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(conn = %conn.short(), "Skipping closed connection");
                }
            }
        }
        delivered
    }

    /// Queue an event for one connection.
    pub async fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        let Some(session) = inner.sessions.get(&conn) else {
            return false;
        };
        match session.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(conn = %conn.short(), error = %e, "Could not queue event for connection");
                false
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Connections currently joined to `chat`.
    pub async fn members(&self, chat: ChatId) -> Vec<ConnectionId> {
        self.inner
            .read()
            .await
            .rooms
            .get(&chat)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `conn` has joined `chat`.
    pub async fn is_joined(&self, conn: ConnectionId, chat: ChatId) -> bool {
        self.inner
            .read()
            .await
            .sessions
            .get(&conn)
            .is_some_and(|s| s.rooms.contains(&chat))
    }
}

fn detach(rooms: &mut HashMap<ChatId, HashSet<ConnectionId>>, chat: ChatId, conn: ConnectionId) {
    if let Some(members) = rooms.get_mut(&chat) {
        members.remove(&conn);
        if members.is_empty() {
            rooms.remove(&chat);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(chat: ChatId, user: UserId) -> ServerEvent {
        ServerEvent::UserTyping {
            chat_id: chat,
            user_id: user,
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn lifecycle_states() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx).await;
        let chat = ChatId::new();

        assert_eq!(registry.state(conn).await, Some(ConnectionState::Connected));
        registry.authenticate(conn, UserId::new()).await.unwrap();
        assert_eq!(registry.state(conn).await, Some(ConnectionState::Authenticated));
        assert!(!registry.is_joined(conn, chat).await);
        assert!(registry.join(conn, chat).await);
        assert!(!registry.join(conn, chat).await);
        assert_eq!(registry.state(conn).await, Some(ConnectionState::JoinedRooms));
        assert!(registry.is_joined(conn, chat).await);
        assert!(!registry.is_joined(conn, ChatId::new()).await);

        let departed = registry.remove(conn).await.unwrap();
        assert_eq!(departed.rooms, vec![chat]);
        assert_eq!(registry.state(conn).await, None);
        assert!(!registry.is_joined(conn, chat).await);
        assert!(registry.members(chat).await.is_empty());
    }

    #[tokio::test]
    async fn authenticates_once() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx).await;

        registry.authenticate(conn, UserId::new()).await.unwrap();
        let err = registry.authenticate(conn, UserId::new()).await.unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn deliver_targets_room_members_only() {
        let registry = ConnectionRegistry::new();
        let chat = ChatId::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (tx_c, mut rx_c) = mpsc::channel(8);
        let a = registry.register(tx_a).await;
        let b = registry.register(tx_b).await;
        let _c = registry.register(tx_c).await;
        registry.join(a, chat).await;
        registry.join(b, chat).await;

        let event = typing(chat, UserId::new());
        assert_eq!(registry.deliver(chat, &event, Some(a)).await, 1);
        assert_eq!(rx_b.try_recv().unwrap(), event);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());

        assert!(registry.leave(b, chat).await);
        assert!(!registry.leave(b, chat).await);
        assert_eq!(registry.deliver(chat, &event, None).await, 1);
        assert!(rx_a.try_recv().is_ok());
    }

    #[tokio::test]
    async fn slow_connections_are_skipped() {
        let registry = ConnectionRegistry::new();
        let chat = ChatId::new();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let slow = registry.register(slow_tx).await;
        let fast = registry.register(fast_tx).await;
        registry.join(slow, chat).await;
        registry.join(fast, chat).await;

        let event = typing(chat, UserId::new());
        assert_eq!(registry.deliver(chat, &event, None).await, 2);
        assert_eq!(registry.deliver(chat, &event, None).await, 1);
        assert_eq!(fast_rx.try_recv().unwrap(), event);
        assert_eq!(fast_rx.try_recv().unwrap(), event);
    }

    #[tokio::test]
    async fn closed_connections_are_skipped() {
        let registry = ConnectionRegistry::new();
        let chat = ChatId::new();
        let (tx, rx) = mpsc::channel(8);
        let conn = registry.register(tx).await;
        registry.join(conn, chat).await;
        drop(rx);

        assert_eq!(registry.deliver(chat, &typing(chat, UserId::new()), None).await, 0);
    }
}
