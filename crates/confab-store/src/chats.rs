use rusqlite::{params, Connection, OptionalExtension};

use confab_shared::constants::MIN_PARTICIPANTS;
use confab_shared::types::{ChatId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{normalize_chat_name, Chat, NewChat};
use crate::row::{id_col, now, opt_id_col, opt_ts_col, ts, ts_col};

impl Database {
    /// Create a chat, or return the existing one-on-one chat for the same
    /// pair of users.
    pub fn create_chat(&mut self, new: NewChat) -> Result<Chat> {
        let mut participants: Vec<UserId> = Vec::with_capacity(new.participants.len());
        for user in new.participants {
            if !participants.contains(&user) {
                participants.push(user);
            }
        }

        if participants.len() < MIN_PARTICIPANTS {
            return Err(StoreError::InvalidMembership(format!(
                "a chat needs at least {MIN_PARTICIPANTS} distinct participants"
            )));
        }
        if !participants.contains(&new.created_by) {
            return Err(StoreError::InvalidMembership(
                "the creator must be a participant".into(),
            ));
        }

        let (name, image) = if new.is_group {
            (normalize_chat_name(new.name)?, new.image)
        } else {
            (None, None)
        };
        let pair_key = (!new.is_group && participants.len() == 2)
            .then(|| pair_key(participants[0], participants[1]));

        let tx = self.conn_mut().transaction()?;
        require_users(&tx, &participants)?;

        if let Some(key) = &pair_key {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM chats WHERE pair_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = existing {
                let id = ChatId(existing.parse()?);
                tracing::debug!(chat = %id, "one-on-one chat already exists");
                return load_chat(&tx, id);
            }
        }

        let id = ChatId::new();
        let now = ts(&now());
        tx.execute(
            "INSERT INTO chats (id, is_group, name, image, pair_key, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id.to_string(),
                new.is_group,
                name,
                image,
                pair_key,
                new.created_by.to_string(),
                now,
            ],
        )?;
        for (position, user) in participants.iter().enumerate() {
            let is_admin = new.is_group && *user == new.created_by;
            tx.execute(
                "INSERT INTO chat_participants (chat_id, user_id, position, is_admin, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), user.to_string(), position as i64, is_admin, now],
            )?;
        }

        let chat = load_chat(&tx, id)?;
        tx.commit()?;

        tracing::info!(chat = %id, group = chat.is_group, members = chat.participants.len(), "chat created");
        Ok(chat)
    }

    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        load_chat(self.conn(), id)
    }

    /// Fails with `NotFound` when the chat does not exist.
    pub fn is_participant(&self, chat: ChatId, user: UserId) -> Result<bool> {
        require_chat(self.conn(), chat)?;
        member_of(self.conn(), chat, user)
    }

    pub fn participants(&self, chat: ChatId) -> Result<Vec<UserId>> {
        require_chat(self.conn(), chat)?;
        Ok(load_members(self.conn(), chat)?
            .into_iter()
            .map(|(user, _)| user)
            .collect())
    }

    /// Every chat the user belongs to, most recently active first.
    pub fn list_chats_for_user(&self, user: UserId) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id FROM chats c
             JOIN chat_participants p ON p.chat_id = c.id
             WHERE p.user_id = ?1
             ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.rowid DESC",
        )?;
        let ids = stmt
            .query_map(params![user.to_string()], |row| id_col(row, 0, ChatId))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        ids.into_iter()
            .map(|id| load_chat(self.conn(), id))
            .collect()
    }

    /// Add a member to a group chat. `actor` must be an admin. Adding an
    /// existing member changes nothing.
    pub fn add_participant(&mut self, chat: ChatId, actor: UserId, user: UserId) -> Result<Chat> {
        let tx = self.conn_mut().transaction()?;
        let current = load_chat(&tx, chat)?;
        check_group_admin(&current, actor)?;

        if current.has_participant(user) {
            return Ok(current);
        }
        require_users(&tx, &[user])?;

        let now = ts(&now());
        tx.execute(
            "INSERT INTO chat_participants (chat_id, user_id, position, is_admin, joined_at)
             VALUES (?1, ?2,
                     (SELECT COALESCE(MAX(position), -1) + 1 FROM chat_participants WHERE chat_id = ?1),
                     0, ?3)",
            params![chat.to_string(), user.to_string(), now],
        )?;
        touch_chat(&tx, chat, &now)?;

        let updated = load_chat(&tx, chat)?;
        tx.commit()?;
        tracing::info!(chat = %chat, user = %user, by = %actor, "participant added");
        Ok(updated)
    }

    /// Remove a member (and their admin flag) from a group chat. Removing a
    /// non-member changes nothing. When the last admin goes, the earliest
    /// remaining member becomes admin.
    pub fn remove_participant(
        &mut self,
        chat: ChatId,
        actor: UserId,
        user: UserId,
    ) -> Result<Chat> {
        let tx = self.conn_mut().transaction()?;
        let current = load_chat(&tx, chat)?;
        check_group_admin(&current, actor)?;

        if !current.has_participant(user) {
            return Ok(current);
        }
        if current.participants.len() <= MIN_PARTICIPANTS {
            return Err(StoreError::InvalidMembership(format!(
                "a chat cannot drop below {MIN_PARTICIPANTS} participants"
            )));
        }

        tx.execute(
            "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
            params![chat.to_string(), user.to_string()],
        )?;
        let promote = current.admins == [user];
        if promote {
            tx.execute(
                "UPDATE chat_participants SET is_admin = 1
                 WHERE chat_id = ?1
                   AND position = (SELECT MIN(position) FROM chat_participants WHERE chat_id = ?1)",
                params![chat.to_string()],
            )?;
        }
        touch_chat(&tx, chat, &ts(&now()))?;

        let updated = load_chat(&tx, chat)?;
        tx.commit()?;
        if promote {
            tracing::info!(chat = %chat, admins = ?updated.admins, "last admin left, promoted next member");
        }
        tracing::info!(chat = %chat, user = %user, by = %actor, "participant removed");
        Ok(updated)
    }
}

fn pair_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

fn check_group_admin(chat: &Chat, actor: UserId) -> Result<()> {
    if !chat.is_group {
        return Err(StoreError::InvalidMembership(
            "one-on-one chats have a fixed participant set".into(),
        ));
    }
    if !chat.is_admin(actor) {
        return Err(StoreError::Unauthorized(
            "only group admins can change membership".into(),
        ));
    }
    Ok(())
}

fn touch_chat(conn: &Connection, chat: ChatId, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
        params![chat.to_string(), now],
    )?;
    Ok(())
}

/// Every user must be known to the identity mirror.
fn require_users(conn: &Connection, users: &[UserId]) -> Result<()> {
    let mut stmt = conn.prepare("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)")?;
    let mut missing = Vec::new();
    for user in users {
        let known: bool = stmt.query_row(params![user.to_string()], |row| row.get(0))?;
        if !known {
            missing.push(user.to_string());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::InvalidMembership(format!(
            "unknown participants: {}",
            missing.join(", ")
        )))
    }
}

pub(crate) fn require_chat(conn: &Connection, chat: ChatId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
        params![chat.to_string()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound("chat"))
    }
}

pub(crate) fn member_of(conn: &Connection, chat: ChatId, user: UserId) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2)",
        params![chat.to_string(), user.to_string()],
        |row| row.get(0),
    )?)
}

fn load_members(conn: &Connection, chat: ChatId) -> Result<Vec<(UserId, bool)>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, is_admin FROM chat_participants
         WHERE chat_id = ?1 ORDER BY position ASC",
    )?;
    let members = stmt
        .query_map(params![chat.to_string()], |row| {
            Ok((id_col(row, 0, UserId)?, row.get::<_, bool>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(members)
}

pub(crate) fn load_chat(conn: &Connection, id: ChatId) -> Result<Chat> {
    let mut chat = conn
        .query_row(
            "SELECT id, is_group, name, image, created_by, last_message_id, last_message_at,
                    created_at, updated_at
             FROM chats WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok(Chat {
                    id: id_col(row, 0, ChatId)?,
                    participants: Vec::new(),
                    is_group: row.get(1)?,
                    name: row.get(2)?,
                    image: row.get(3)?,
                    admins: Vec::new(),
                    created_by: id_col(row, 4, UserId)?,
                    last_message_id: opt_id_col(row, 5, MessageId)?,
                    last_message_at: opt_ts_col(row, 6)?,
                    created_at: ts_col(row, 7)?,
                    updated_at: ts_col(row, 8)?,
                })
            },
        )
        .map_err(|e| StoreError::or_not_found(e, "chat"))?;

    for (user, is_admin) in load_members(conn, id)? {
        chat.participants.push(user);
        if is_admin {
            chat.admins.push(user);
        }
    }
    Ok(chat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use crate::test_support::users;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn direct_chat_is_unique_per_pair() {
        let mut db = db();
        let [a, b] = users::<2>(&db);

        let first = db.create_chat(NewChat::direct(a, b)).unwrap();
        let second = db.create_chat(NewChat::direct(b, a)).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.participants, vec![a, b]);
        assert!(first.admins.is_empty());
        assert!(first.name.is_none());
    }

    #[test]
    fn rejects_too_few_participants_and_outside_creator() {
        let mut db = db();
        let a = UserId::new();

        let err = db.create_chat(NewChat::direct(a, a)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMembership(_)));

        let mut new = NewChat::direct(UserId::new(), UserId::new());
        new.created_by = a;
        let err = db.create_chat(new).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMembership(_)));
    }

    #[test]
    fn groups_are_never_deduplicated() {
        let mut db = db();
        let [a, b] = users::<2>(&db);

        let g1 = db.create_chat(NewChat::group("one", a, &[b])).unwrap();
        let g2 = db.create_chat(NewChat::group("two", a, &[b])).unwrap();
        assert_ne!(g1.id, g2.id);
        assert_eq!(g1.admins, vec![a]);
        assert_eq!(g1.name.as_deref(), Some("one"));
    }

    #[test]
    fn membership_queries() {
        let mut db = db();
        let [a, b, c] = users::<3>(&db);
        let chat = db.create_chat(NewChat::direct(a, b)).unwrap();

        assert!(db.is_participant(chat.id, a).unwrap());
        assert!(!db.is_participant(chat.id, c).unwrap());
        assert_eq!(db.participants(chat.id).unwrap(), vec![a, b]);

        let missing = ChatId::new();
        assert!(matches!(db.is_participant(missing, a), Err(StoreError::NotFound("chat"))));
        assert!(matches!(db.get_chat(missing), Err(StoreError::NotFound("chat"))));
    }

    #[test]
    fn group_membership_changes_need_an_admin() {
        let mut db = db();
        let [a, b, c] = users::<3>(&db);
        let group = db.create_chat(NewChat::group("team", a, &[b])).unwrap();

        let err = db.add_participant(group.id, b, c).unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        let chat = db.add_participant(group.id, a, c).unwrap();
        assert_eq!(chat.participants, vec![a, b, c]);

        let chat = db.remove_participant(group.id, a, c).unwrap();
        assert_eq!(chat.participants, vec![a, b]);

        let err = db.remove_participant(group.id, a, b).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMembership(_)));

        let direct = db.create_chat(NewChat::direct(a, b)).unwrap();
        let err = db.add_participant(direct.id, a, c).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMembership(_)));
    }

    #[test]
    fn removing_the_last_admin_promotes_the_next_member() {
        let mut db = db();
        let [a, b, c] = users::<3>(&db);
        let group = db.create_chat(NewChat::group("team", a, &[b, c])).unwrap();

        let chat = db.remove_participant(group.id, a, a).unwrap();
        assert!(!chat.has_participant(a));
        assert_eq!(chat.admins, vec![b]);
        assert_eq!(db.get_chat(group.id).unwrap().admins, vec![b]);

        // The promoted admin can manage the group.
        let [d] = users::<1>(&db);
        let chat = db.add_participant(group.id, b, d).unwrap();
        assert_eq!(chat.participants, vec![b, c, d]);
    }

    #[test]
    fn unknown_users_cannot_be_participants() {
        let mut db = db();
        let [a, b] = users::<2>(&db);
        let stranger = UserId::new();

        let err = db.create_chat(NewChat::direct(a, stranger)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMembership(_)));
        assert!(db.list_chats_for_user(a).unwrap().is_empty());

        let group = db.create_chat(NewChat::group("team", a, &[b])).unwrap();
        let err = db.add_participant(group.id, a, stranger).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMembership(_)));
        assert_eq!(db.get_chat(group.id).unwrap().participants, vec![a, b]);
    }

    #[test]
    fn chats_are_listed_by_recent_activity() {
        let mut db = db();
        let [a, b, c] = users::<3>(&db);
        let older = db.create_chat(NewChat::direct(a, b)).unwrap();
        let newer = db.create_chat(NewChat::direct(a, c)).unwrap();

        let ids: Vec<_> = db.list_chats_for_user(a).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        db.append_message(NewMessage::text(older.id, b, "ping")).unwrap();
        let ids: Vec<_> = db.list_chats_for_user(a).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);

        assert_eq!(db.list_chats_for_user(b).unwrap().len(), 1);
    }
}
