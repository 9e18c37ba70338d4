use rusqlite::{params, Connection, OptionalExtension};

use confab_shared::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use confab_shared::protocol::ReplyPreview;
use confab_shared::types::{ChatId, Cursor, MessageId, UserId};

use crate::chats::{member_of, require_chat};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{normalize_content, Message, NewMessage, Page};
use crate::receipts::load_receipts;
use crate::row::{id_col, kind_col, now, opt_id_col, opt_ts_col, ts, ts_col};

const MESSAGE_COLUMNS: &str = "seq, id, chat_id, sender_id, content, kind, media_url, reply_to,
     is_edited, edited_at, is_deleted, deleted_at, created_at, updated_at";

/// Clamp a requested page size to `[1, MAX_PAGE_LIMIT]`.
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

impl Database {
    /// Persist a message and move the chat's last-message pointer, in one
    /// transaction.
    pub fn append_message(&mut self, new: NewMessage) -> Result<Message> {
        let new = new.normalized()?;
        let tx = self.conn_mut().transaction()?;

        require_chat(&tx, new.chat_id)?;
        if !member_of(&tx, new.chat_id, new.sender_id)? {
            return Err(StoreError::Unauthorized(
                "sender is not a participant of this chat".into(),
            ));
        }

        if let Some(target) = new.reply_to {
            let target_chat = tx
                .query_row(
                    "SELECT chat_id FROM messages WHERE id = ?1",
                    params![target.to_string()],
                    |row| id_col(row, 0, ChatId),
                )
                .optional()?;
            match target_chat {
                None => {
                    return Err(StoreError::InvalidReference(format!(
                        "reply target {target} does not exist"
                    )))
                }
                Some(chat) if chat != new.chat_id => {
                    return Err(StoreError::InvalidReference(format!(
                        "reply target {target} belongs to another chat"
                    )))
                }
                Some(_) => {}
            }
        }

        let id = MessageId::new();
        let now = now();
        let now_str = ts(&now);

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, kind, media_url, reply_to,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id.to_string(),
                new.chat_id.to_string(),
                new.sender_id.to_string(),
                new.content,
                new.kind.as_str(),
                new.media_url,
                new.reply_to.map(|r| r.to_string()),
                now_str,
            ],
        )?;
        let seq = tx.last_insert_rowid();

        tx.execute(
            "UPDATE chats SET last_message_id = ?2, last_message_at = ?3, updated_at = ?3
             WHERE id = ?1",
            params![new.chat_id.to_string(), id.to_string(), now_str],
        )?;
        tx.commit()?;

        tracing::debug!(chat = %new.chat_id, message = %id, seq, "message appended");

        Ok(Message {
            seq,
            id,
            chat_id: new.chat_id,
            sender_id: new.sender_id,
            content: new.content,
            kind: new.kind,
            media_url: new.media_url,
            reply_to: new.reply_to,
            read_by: Vec::new(),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch one message, deleted or not, with its read receipts.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        load_message(self.conn(), id)
    }

    /// One page of a chat's visible history, newest first. `cursor` is the
    /// `next_cursor` of the previous page.
    pub fn list_page(&self, chat: ChatId, cursor: Option<Cursor>, limit: Option<u32>) -> Result<Page> {
        require_chat(self.conn(), chat)?;
        let limit = clamp_limit(limit);

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = ?1 AND is_deleted = 0 AND (?2 IS NULL OR seq < ?2)
             ORDER BY seq DESC
             LIMIT ?3"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        // One extra row tells us whether an older page exists.
        let mut items = stmt
            .query_map(
                params![chat.to_string(), cursor.map(|c| c.0), limit + 1],
                row_to_message,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let has_more = items.len() > limit as usize;
        items.truncate(limit as usize);
        for message in &mut items {
            message.read_by = load_receipts(self.conn(), message.id)?;
        }

        let next_cursor = if has_more {
            items.last().map(Message::cursor)
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }

    /// Lazy walk over a chat's history starting at `from` (or the newest
    /// message when `None`).
    pub fn history_pages(
        &self,
        chat: ChatId,
        from: Option<Cursor>,
        limit: Option<u32>,
    ) -> HistoryPages<'_> {
        HistoryPages {
            db: self,
            chat,
            cursor: from,
            limit,
            done: false,
        }
    }

    /// Replace a message's content. Only its sender may do this.
    pub fn edit_message(&mut self, id: MessageId, editor: UserId, content: &str) -> Result<Message> {
        let content = normalize_content(content, true)?;
        let tx = self.conn_mut().transaction()?;

        let current = load_message(&tx, id)?;
        if current.is_deleted {
            return Err(StoreError::NotFound("message"));
        }
        if current.sender_id != editor {
            return Err(StoreError::Unauthorized(
                "only the sender can edit a message".into(),
            ));
        }

        let now = ts(&now());
        tx.execute(
            "UPDATE messages SET content = ?2, is_edited = 1, edited_at = ?3, updated_at = ?3
             WHERE id = ?1",
            params![id.to_string(), content, now],
        )?;
        let updated = load_message(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Soft-delete a message. Only its sender may do this; deleting twice
    /// keeps the first deletion time.
    pub fn delete_message(&mut self, id: MessageId, actor: UserId) -> Result<Message> {
        let tx = self.conn_mut().transaction()?;

        let current = load_message(&tx, id)?;
        if current.sender_id != actor {
            return Err(StoreError::Unauthorized(
                "only the sender can delete a message".into(),
            ));
        }
        if current.is_deleted {
            return Ok(current);
        }

        let now = ts(&now());
        tx.execute(
            "UPDATE messages SET is_deleted = 1, deleted_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), now],
        )?;
        let updated = load_message(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Short form of a reply target.
    pub fn reply_preview(&self, id: MessageId) -> Result<ReplyPreview> {
        self.conn()
            .query_row(
                "SELECT id, content, sender_id FROM messages WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(ReplyPreview {
                        id: id_col(row, 0, MessageId)?,
                        content: row.get(1)?,
                        sender: id_col(row, 2, UserId)?,
                    })
                },
            )
            .map_err(|e| StoreError::or_not_found(e, "message"))
    }
}

/// Iterator over consecutive history pages. Stops after the oldest page or
/// the first error; [`HistoryPages::cursor`] tells where to resume.
pub struct HistoryPages<'a> {
    db: &'a Database,
    chat: ChatId,
    cursor: Option<Cursor>,
    limit: Option<u32>,
    done: bool,
}

impl HistoryPages<'_> {
    /// Cursor the next page will be read from.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }
}

impl Iterator for HistoryPages<'_> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.db.list_page(self.chat, self.cursor, self.limit) {
            Ok(page) => {
                match page.next_cursor {
                    Some(next) => self.cursor = Some(next),
                    None => self.done = true,
                }
                if page.items.is_empty() {
                    None
                } else {
                    Some(Ok(page))
                }
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

pub(crate) fn load_message(conn: &Connection, id: MessageId) -> Result<Message> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let mut message = conn
        .query_row(&sql, params![id.to_string()], row_to_message)
        .map_err(|e| StoreError::or_not_found(e, "message"))?;
    message.read_by = load_receipts(conn, id)?;
    Ok(message)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        seq: row.get(0)?,
        id: id_col(row, 1, MessageId)?,
        chat_id: id_col(row, 2, ChatId)?,
        sender_id: id_col(row, 3, UserId)?,
        content: row.get(4)?,
        kind: kind_col(row, 5)?,
        media_url: row.get(6)?,
        reply_to: opt_id_col(row, 7, MessageId)?,
        read_by: Vec::new(),
        is_edited: row.get(8)?,
        edited_at: opt_ts_col(row, 9)?,
        is_deleted: row.get(10)?,
        deleted_at: opt_ts_col(row, 11)?,
        created_at: ts_col(row, 12)?,
        updated_at: ts_col(row, 13)?,
    })
}
