//! Per-connection event handling and room fan-out.
//!
//! A connection moves `Connected -> Authenticated -> JoinedRooms` and is
//! gone once disconnected. Every rejected event is answered with an `error`
//! event to the originating connection only; nothing is applied or broadcast
//! for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use confab_shared::protocol::{ClientEvent, HistoryPage, MessageView, SendMessage, ServerEvent};
use confab_shared::types::{ChatId, ConnectionId, Cursor, MessageId, UserId, UserProfile};
use confab_store::{ChatStore, Message, NewMessage, StoreError};

use crate::error::ChatError;
use crate::identity::{display_profile, IdentityResolver};
use crate::registry::ConnectionRegistry;
use crate::typing::TypingTracker;

#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    store: ChatStore,
    registry: ConnectionRegistry,
    typing: TypingTracker,
    identity: Arc<dyn IdentityResolver>,
    /// Serializes append + fan-out per chat.
    chat_locks: StdMutex<HashMap<ChatId, Arc<Mutex<()>>>>,
}

impl EventRouter {
    pub fn new(
        store: ChatStore,
        registry: ConnectionRegistry,
        typing: TypingTracker,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                store,
                registry,
                typing,
                identity,
                chat_locks: StdMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.inner.typing
    }

    pub fn store(&self) -> &ChatStore {
        &self.inner.store
    }

    pub fn identity(&self) -> &Arc<dyn IdentityResolver> {
        &self.inner.identity
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Register a new connection. Outbound events for it are queued on `tx`.
    pub async fn connect(&self, tx: mpsc::Sender<ServerEvent>) -> ConnectionId {
        self.inner.registry.register(tx).await
    }

    /// Resolve a session token and bind the user to the connection.
    pub async fn authenticate(&self, conn: ConnectionId, token: &str) -> Result<UserId, ChatError> {
        if self.inner.registry.principal(conn).await.is_some() {
            return Err(ChatError::ValidationFailure(
                "connection is already authenticated".into(),
            ));
        }
        let user = self
            .inner
            .identity
            .resolve(token)
            .await?
            .ok_or(ChatError::AuthenticationFailed)?;
        self.bind_principal(conn, user).await?;
        Ok(user)
    }

    /// Bind an already-resolved user to the connection and acknowledge.
    pub async fn bind_principal(&self, conn: ConnectionId, user: UserId) -> Result<(), ChatError> {
        self.inner.registry.authenticate(conn, user).await?;
        self.inner
            .registry
            .send_to(conn, ServerEvent::Authenticated { user_id: user })
            .await;
        info!(conn = %conn.short(), user = %user, "connection authenticated");
        Ok(())
    }

    /// Tear down a connection. Its typing entries are dropped without
    /// notifying anyone.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let Some(departed) = self.inner.registry.remove(conn).await else {
            return;
        };
        if let Some(user) = departed.user {
            let cleared = self.inner.typing.clear_user(user).await;
            debug!(
                conn = %conn.short(),
                user = %user,
                rooms = departed.rooms.len(),
                typing_cleared = cleared.len(),
                "connection closed"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Apply one inbound event. On failure the connection is sent an `error`
    /// event and the error is returned so the transport can decide whether
    /// to keep the connection.
    pub async fn handle(&self, conn: ConnectionId, event: ClientEvent) -> Result<(), ChatError> {
        let name = event.name();
        debug!(conn = %conn.short(), event = name, "handling event");

        let result = match event {
            ClientEvent::Authenticate { token } => self.authenticate(conn, &token).await.map(drop),
            ClientEvent::Join { chat_id, user_id } => self.join(conn, chat_id, user_id).await,
            ClientEvent::Leave { chat_id, user_id } => self.leave(conn, chat_id, user_id).await,
            ClientEvent::Send(payload) => self.send(conn, payload).await,
            ClientEvent::MarkRead {
                chat_id,
                message_ids,
                user_id,
            } => self.mark_read(conn, chat_id, message_ids, user_id).await,
            ClientEvent::Typing {
                chat_id,
                user_id,
                is_typing,
            } => self.typing_changed(conn, chat_id, user_id, is_typing).await,
            ClientEvent::History {
                chat_id,
                cursor,
                limit,
            } => self.history(conn, chat_id, cursor, limit).await,
            ClientEvent::Edit {
                chat_id,
                message_id,
                content,
            } => self.edit(conn, chat_id, message_id, content).await,
            ClientEvent::Delete {
                chat_id,
                message_id,
            } => self.delete(conn, chat_id, message_id).await,
        };

        if let Err(err) = &result {
            warn!(conn = %conn.short(), event = name, error = %err, "event rejected");
            self.report(conn, err).await;
        }
        result
    }

    /// Send an `error` event to one connection.
    pub async fn report(&self, conn: ConnectionId, err: &ChatError) {
        self.inner
            .registry
            .send_to(conn, ServerEvent::Error(err.to_string()))
            .await;
    }

    // -----------------------------------------------------------------------
    // Room events
    // -----------------------------------------------------------------------

    async fn join(
        &self,
        conn: ConnectionId,
        chat: ChatId,
        claimed: Option<UserId>,
    ) -> Result<(), ChatError> {
        let user = self.principal(conn, claimed).await?;
        self.require_member(chat, user).await?;

        let newly_joined = self.inner.registry.join(conn, chat).await;
        self.inner
            .registry
            .send_to(conn, ServerEvent::Joined { chat_id: chat })
            .await;

        if newly_joined {
            info!(chat = %chat, user = %user, conn = %conn.short(), "joined chat");
            self.inner
                .registry
                .deliver(chat, &ServerEvent::user_joined(chat, user), Some(conn))
                .await;
        }
        Ok(())
    }

    async fn leave(
        &self,
        conn: ConnectionId,
        chat: ChatId,
        claimed: Option<UserId>,
    ) -> Result<(), ChatError> {
        let user = self.principal(conn, claimed).await?;
        if self.inner.registry.leave(conn, chat).await {
            info!(chat = %chat, user = %user, conn = %conn.short(), "left chat");
            self.inner
                .registry
                .deliver(chat, &ServerEvent::user_left(chat, user), None)
                .await;
        }
        Ok(())
    }

    async fn send(&self, conn: ConnectionId, payload: SendMessage) -> Result<(), ChatError> {
        let user = self.principal(conn, payload.sender_id).await?;
        let chat = payload.chat_id;

        let new = NewMessage {
            chat_id: chat,
            sender_id: user,
            kind: payload.message_type,
            content: payload.content,
            media_url: payload.media_url,
            reply_to: payload.reply_to,
        }
        .normalized()?;

        let lock = self.chat_lock(chat);
        let _guard = lock.lock().await;

        // Membership and reply target are re-checked inside the append
        // transaction.
        let message = self
            .inner
            .store
            .call(move |db| db.append_message(new))
            .await?;
        let view = self.view(message).await;
        let delivered = self
            .inner
            .registry
            .deliver(chat, &ServerEvent::NewMessage(view), None)
            .await;
        debug!(chat = %chat, sender = %user, delivered, "message broadcast");

        if self.inner.typing.set_typing(chat, user, false).await {
            self.inner
                .registry
                .deliver(
                    chat,
                    &ServerEvent::UserTyping {
                        chat_id: chat,
                        user_id: user,
                        is_typing: false,
                    },
                    Some(conn),
                )
                .await;
        }
        Ok(())
    }

    async fn mark_read(
        &self,
        conn: ConnectionId,
        chat: ChatId,
        message_ids: Vec<MessageId>,
        claimed: Option<UserId>,
    ) -> Result<(), ChatError> {
        let user = self.principal(conn, claimed).await?;
        if message_ids.is_empty() {
            return Ok(());
        }

        let outcome = self
            .inner
            .store
            .call(move |db| db.mark_read(user, &message_ids, Some(chat)))
            .await?;

        for reads in outcome.chats {
            self.inner
                .registry
                .deliver(
                    reads.chat_id,
                    &ServerEvent::MessagesRead {
                        chat_id: reads.chat_id,
                        message_ids: reads.message_ids,
                        user_id: user,
                        read_at: outcome.read_at,
                    },
                    None,
                )
                .await;
        }
        Ok(())
    }

    async fn typing_changed(
        &self,
        conn: ConnectionId,
        chat: ChatId,
        claimed: Option<UserId>,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let user = self.principal(conn, claimed).await?;
        // Membership was checked on join; typing never waits on the store.
        if !self.inner.registry.is_joined(conn, chat).await {
            return Err(ChatError::Unauthorized("join the chat first".into()));
        }

        self.inner.typing.set_typing(chat, user, is_typing).await;
        self.inner
            .registry
            .deliver(
                chat,
                &ServerEvent::UserTyping {
                    chat_id: chat,
                    user_id: user,
                    is_typing,
                },
                Some(conn),
            )
            .await;
        Ok(())
    }

    async fn history(
        &self,
        conn: ConnectionId,
        chat: ChatId,
        cursor: Option<Cursor>,
        limit: Option<u32>,
    ) -> Result<(), ChatError> {
        let user = self.principal(conn, None).await?;
        self.require_member(chat, user).await?;

        let page = self
            .inner
            .store
            .call(move |db| db.list_page(chat, cursor, limit))
            .await?;

        let mut profiles: HashMap<UserId, UserProfile> = HashMap::new();
        let mut messages = Vec::with_capacity(page.items.len());
        for message in page.items {
            let sender = match profiles.get(&message.sender_id) {
                Some(profile) => profile.clone(),
                None => {
                    let profile =
                        display_profile(self.inner.identity.as_ref(), message.sender_id).await;
                    profiles.insert(message.sender_id, profile.clone());
                    profile
                }
            };
            messages.push(self.view_with_sender(message, sender).await);
        }

        self.inner
            .registry
            .send_to(
                conn,
                ServerEvent::History(HistoryPage {
                    chat_id: chat,
                    messages,
                    next_cursor: page.next_cursor,
                }),
            )
            .await;
        Ok(())
    }

    async fn edit(
        &self,
        conn: ConnectionId,
        chat: ChatId,
        message_id: MessageId,
        content: String,
    ) -> Result<(), ChatError> {
        let user = self.principal(conn, None).await?;

        let lock = self.chat_lock(chat);
        let _guard = lock.lock().await;

        let message = self
            .inner
            .store
            .call(move |db| {
                check_message_in_chat(db, chat, message_id, user)?;
                db.edit_message(message_id, user, &content)
            })
            .await?;
        let view = self.view(message).await;
        self.inner
            .registry
            .deliver(chat, &ServerEvent::MessageEdited(view), None)
            .await;
        Ok(())
    }

    async fn delete(
        &self,
        conn: ConnectionId,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), ChatError> {
        let user = self.principal(conn, None).await?;

        let lock = self.chat_lock(chat);
        let _guard = lock.lock().await;

        let message = self
            .inner
            .store
            .call(move |db| {
                check_message_in_chat(db, chat, message_id, user)?;
                db.delete_message(message_id, user)
            })
            .await?;
        self.inner
            .registry
            .deliver(
                chat,
                &ServerEvent::MessageDeleted {
                    chat_id: chat,
                    message_id,
                    deleted_at: message.deleted_at.unwrap_or(message.updated_at),
                },
                None,
            )
            .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// The authenticated user of `conn`. A user id claimed in the payload
    /// must match it.
    async fn principal(
        &self,
        conn: ConnectionId,
        claimed: Option<UserId>,
    ) -> Result<UserId, ChatError> {
        let user = self
            .inner
            .registry
            .principal(conn)
            .await
            .ok_or_else(|| ChatError::Unauthorized("authenticate first".into()))?;
        match claimed {
            Some(claimed) if claimed != user => Err(ChatError::Unauthorized(
                "user id does not match the authenticated user".into(),
            )),
            _ => Ok(user),
        }
    }

    async fn require_member(&self, chat: ChatId, user: UserId) -> Result<(), ChatError> {
        let member = self
            .inner
            .store
            .call(move |db| db.is_participant(chat, user))
            .await?;
        if member {
            Ok(())
        } else {
            Err(ChatError::Unauthorized(
                "not a participant of this chat".into(),
            ))
        }
    }

    fn chat_lock(&self, chat: ChatId) -> Arc<Mutex<()>> {
        let mut locks = self
            .inner
            .chat_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(chat).or_default())
    }

    /// Forget per-chat locks nobody is holding or waiting on.
    pub fn purge_idle_locks(&self) -> usize {
        let mut locks = self
            .inner
            .chat_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    async fn view(&self, message: Message) -> MessageView {
        let sender = display_profile(self.inner.identity.as_ref(), message.sender_id).await;
        self.view_with_sender(message, sender).await
    }

    async fn view_with_sender(&self, message: Message, sender: UserProfile) -> MessageView {
        let reply_to = match message.reply_to {
            Some(target) => match self
                .inner
                .store
                .call(move |db| db.reply_preview(target))
                .await
            {
                Ok(preview) => Some(preview),
                Err(e) => {
                    warn!(message = %message.id, reply_to = %target, error = %e, "Reply preview unavailable");
                    None
                }
            },
            None => None,
        };

        MessageView {
            id: message.id,
            chat_id: message.chat_id,
            sender,
            content: message.content,
            message_type: message.kind,
            media_url: message.media_url,
            reply_to,
            read_by: message.read_by,
            is_edited: message.is_edited,
            edited_at: message.edited_at,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

/// The message must exist in `chat` and `user` must still belong to it.
fn check_message_in_chat(
    db: &confab_store::Database,
    chat: ChatId,
    message: MessageId,
    user: UserId,
) -> Result<(), StoreError> {
    if !db.is_participant(chat, user)? {
        return Err(StoreError::Unauthorized(
            "not a participant of this chat".into(),
        ));
    }
    if db.get_message(message)?.chat_id != chat {
        return Err(StoreError::NotFound("message"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use confab_shared::types::MessageKind;
    use confab_store::{Database, NewChat};
    use tokio::sync::mpsc::Receiver;

    use super::*;
    use crate::identity::StoreIdentity;

    struct Harness {
        router: EventRouter,
        chat: ChatId,
        alice: UserId,
        bob: UserId,
        alice_token: String,
        bob_token: String,
    }

    fn harness() -> Harness {
        let mut db = Database::open_in_memory().unwrap();
        let alice = UserProfile {
            id: UserId::new(),
            username: "alice".into(),
            display_name: Some("Alice".into()),
            image: None,
        };
        let bob = UserProfile {
            id: UserId::new(),
            username: "bob".into(),
            display_name: None,
            image: None,
        };
        db.upsert_user(&alice).unwrap();
        db.upsert_user(&bob).unwrap();
        let alice_token = db.create_session(alice.id, chrono::Duration::hours(1)).unwrap();
        let bob_token = db.create_session(bob.id, chrono::Duration::hours(1)).unwrap();
        let chat = db.create_chat(NewChat::direct(alice.id, bob.id)).unwrap().id;

        let store = ChatStore::new(db, Duration::from_secs(5));
        let router = EventRouter::new(
            store.clone(),
            ConnectionRegistry::new(),
            TypingTracker::new(Duration::from_secs(5)),
            Arc::new(StoreIdentity::new(store)),
        );
        Harness {
            router,
            chat,
            alice: alice.id,
            bob: bob.id,
            alice_token,
            bob_token,
        }
    }

    async fn connect(router: &EventRouter, token: &str) -> (ConnectionId, Receiver<ServerEvent>) {
        let (tx, mut rx) = mpsc::channel(32);
        let conn = router.connect(tx).await;
        router
            .handle(conn, ClientEvent::Authenticate { token: token.into() })
            .await
            .unwrap();
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Authenticated { .. }));
        (conn, rx)
    }

    fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn send(chat: ChatId, content: &str) -> ClientEvent {
        ClientEvent::Send(SendMessage {
            chat_id: chat,
            sender_id: None,
            content: content.into(),
            message_type: MessageKind::Text,
            media_url: None,
            reply_to: None,
        })
    }

    #[tokio::test]
    async fn events_before_authentication_are_unauthorized() {
        let h = harness();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = h.router.connect(tx).await;

        let err = h
            .router
            .handle(conn, ClientEvent::Join { chat_id: h.chat, user_id: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Error(_)));
    }

    #[tokio::test]
    async fn bad_token_fails_closed_and_double_auth_is_rejected() {
        let h = harness();
        let (tx, _rx) = mpsc::channel(8);
        let conn = h.router.connect(tx).await;
        let err = h
            .router
            .handle(conn, ClientEvent::Authenticate { token: "nope".into() })
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::AuthenticationFailed);
        assert!(err.is_fatal());

        let (conn, _rx) = connect(&h.router, &h.alice_token).await;
        let err = h
            .router
            .handle(conn, ClientEvent::Authenticate { token: h.alice_token.clone() })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn join_acknowledges_and_announces_once() {
        let h = harness();
        let (a, mut rx_a) = connect(&h.router, &h.alice_token).await;
        let (b, mut rx_b) = connect(&h.router, &h.bob_token).await;

        h.router
            .handle(a, ClientEvent::Join { chat_id: h.chat, user_id: Some(h.alice) })
            .await
            .unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerEvent::Joined { chat_id: h.chat }]);

        h.router
            .handle(b, ClientEvent::Join { chat_id: h.chat, user_id: None })
            .await
            .unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerEvent::user_joined(h.chat, h.bob)]);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::Joined { chat_id: h.chat }]);

        // Joining again only re-acknowledges.
        h.router
            .handle(b, ClientEvent::Join { chat_id: h.chat, user_id: None })
            .await
            .unwrap();
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn claimed_user_must_match_principal() {
        let h = harness();
        let (a, mut rx_a) = connect(&h.router, &h.alice_token).await;

        let err = h
            .router
            .handle(a, ClientEvent::Join { chat_id: h.chat, user_id: Some(h.bob) })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));
        assert_eq!(h.router.registry().members(h.chat).await, Vec::new());
        assert!(matches!(drain(&mut rx_a).as_slice(), [ServerEvent::Error(_)]));
    }

    #[tokio::test]
    async fn send_reaches_the_room_and_stops_typing() {
        let h = harness();
        let (a, mut rx_a) = connect(&h.router, &h.alice_token).await;
        let (b, mut rx_b) = connect(&h.router, &h.bob_token).await;
        for conn in [a, b] {
            h.router
                .handle(conn, ClientEvent::Join { chat_id: h.chat, user_id: None })
                .await
                .unwrap();
        }
        drain(&mut rx_a);
        drain(&mut rx_b);

        h.router
            .handle(
                a,
                ClientEvent::Typing { chat_id: h.chat, user_id: None, is_typing: true },
            )
            .await
            .unwrap();
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);

        h.router.handle(a, send(h.chat, "hello")).await.unwrap();

        let to_alice = drain(&mut rx_a);
        let to_bob = drain(&mut rx_b);
        assert_eq!(to_alice.len(), 1);
        match &to_bob[..] {
            [ServerEvent::NewMessage(view), ServerEvent::UserTyping { is_typing: false, .. }] => {
                assert_eq!(view.content, "hello");
                assert_eq!(view.sender.username, "alice");
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert!(h.router.typing().currently_typing(h.chat).await.is_empty());
    }

    #[tokio::test]
    async fn invalid_send_reports_to_sender_only() {
        let h = harness();
        let (a, mut rx_a) = connect(&h.router, &h.alice_token).await;
        let (b, mut rx_b) = connect(&h.router, &h.bob_token).await;
        h.router
            .handle(b, ClientEvent::Join { chat_id: h.chat, user_id: None })
            .await
            .unwrap();
        drain(&mut rx_b);

        let err = h.router.handle(a, send(h.chat, "   ")).await.unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailure(_)));
        assert!(matches!(drain(&mut rx_a).as_slice(), [ServerEvent::Error(_)]));
        assert!(drain(&mut rx_b).is_empty());

        let err = h.router.handle(a, send(ChatId::new(), "hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn edit_and_delete_broadcast() {
        let h = harness();
        let (a, mut rx_a) = connect(&h.router, &h.alice_token).await;
        let (b, mut rx_b) = connect(&h.router, &h.bob_token).await;
        for conn in [a, b] {
            h.router
                .handle(conn, ClientEvent::Join { chat_id: h.chat, user_id: None })
                .await
                .unwrap();
        }
        h.router.handle(a, send(h.chat, "draft")).await.unwrap();
        drain(&mut rx_a);
        let message_id = match drain(&mut rx_b).pop() {
            Some(ServerEvent::NewMessage(view)) => view.id,
            other => panic!("expected new-message, got {other:?}"),
        };

        let err = h
            .router
            .handle(
                b,
                ClientEvent::Edit { chat_id: h.chat, message_id, content: "mine now".into() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));
        drain(&mut rx_b);

        h.router
            .handle(
                a,
                ClientEvent::Edit { chat_id: h.chat, message_id, content: "final".into() },
            )
            .await
            .unwrap();
        match drain(&mut rx_b).as_slice() {
            [ServerEvent::MessageEdited(view)] => {
                assert!(view.is_edited);
                assert_eq!(view.content, "final");
            }
            other => panic!("unexpected events: {other:?}"),
        }

        h.router
            .handle(a, ClientEvent::Delete { chat_id: h.chat, message_id })
            .await
            .unwrap();
        assert!(matches!(
            drain(&mut rx_b).as_slice(),
            [ServerEvent::MessageDeleted { .. }]
        ));
    }

    #[tokio::test]
    async fn disconnect_clears_registry_and_typing() {
        let h = harness();
        let (a, _rx_a) = connect(&h.router, &h.alice_token).await;
        h.router
            .handle(a, ClientEvent::Join { chat_id: h.chat, user_id: None })
            .await
            .unwrap();
        h.router
            .handle(a, ClientEvent::Typing { chat_id: h.chat, user_id: None, is_typing: true })
            .await
            .unwrap();

        h.router.disconnect(a).await;
        assert!(h.router.registry().members(h.chat).await.is_empty());
        assert!(h.router.typing().currently_typing(h.chat).await.is_empty());
        assert_eq!(h.router.registry().connection_count().await, 0);
    }

    #[tokio::test]
    async fn idle_locks_are_purged() {
        let h = harness();
        let (a, _rx_a) = connect(&h.router, &h.alice_token).await;
        h.router.handle(a, send(h.chat, "hi")).await.unwrap();
        assert_eq!(h.router.purge_idle_locks(), 1);
        assert_eq!(h.router.purge_idle_locks(), 0);
    }

    #[tokio::test]
    async fn typing_needs_a_joined_room_not_the_store() {
        let h = harness();
        let (a, mut rx_a) = connect(&h.router, &h.alice_token).await;
        let (b, mut rx_b) = connect(&h.router, &h.bob_token).await;
        let typing = ClientEvent::Typing { chat_id: h.chat, user_id: None, is_typing: true };

        let err = h.router.handle(a, typing.clone()).await.unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));
        assert!(matches!(drain(&mut rx_a).as_slice(), [ServerEvent::Error(_)]));

        for conn in [a, b] {
            h.router
                .handle(conn, ClientEvent::Join { chat_id: h.chat, user_id: None })
                .await
                .unwrap();
        }
        drain(&mut rx_b);

        // Keep the database busy while the typing event goes through.
        let store = h.router.store().clone();
        let busy = tokio::spawn(async move {
            store
                .call(|_| {
                    std::thread::sleep(Duration::from_millis(600));
                    Ok(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        h.router.handle(a, typing).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserTyping { chat_id: h.chat, user_id: h.alice, is_typing: true }]
        );
        busy.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn repeated_mark_read_is_announced_once() {
        let h = harness();
        let (a, mut rx_a) = connect(&h.router, &h.alice_token).await;
        let (b, mut rx_b) = connect(&h.router, &h.bob_token).await;
        for conn in [a, b] {
            h.router
                .handle(conn, ClientEvent::Join { chat_id: h.chat, user_id: None })
                .await
                .unwrap();
        }
        h.router.handle(a, send(h.chat, "read me")).await.unwrap();
        drain(&mut rx_a);
        let message_id = match drain(&mut rx_b).pop() {
            Some(ServerEvent::NewMessage(view)) => view.id,
            other => panic!("expected new-message, got {other:?}"),
        };

        let read = ClientEvent::MarkRead { chat_id: h.chat, message_ids: vec![message_id], user_id: None };
        h.router.handle(b, read.clone()).await.unwrap();
        h.router.handle(b, read).await.unwrap();

        let receipts: Vec<_> = drain(&mut rx_a)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::MessagesRead { user_id, read_at, .. } => Some((user_id, read_at)),
                _ => None,
            })
            .collect();
        assert_eq!(receipts.len(), 1);

        let stored = h
            .router
            .store()
            .call(move |db| db.read_receipts(message_id))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(receipts[0], (h.bob, stored[0].read_at));
    }
}
