use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use confab_shared::types::{ChatId, MessageId, ReadReceipt, UserId};

use crate::chats::member_of;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ChatReads, ReadOutcome};
use crate::row::{id_col, now, ts, ts_col};

impl Database {
    /// Record that `reader` has seen the given messages.
    ///
    /// Messages that do not exist, are deleted, sit in a chat the reader is
    /// not part of, or fall outside `scope` are skipped. A reader is recorded
    /// at most once per message: repeating the call keeps the first receipt
    /// and the outcome lists only receipts created by this call.
    pub fn mark_read(
        &mut self,
        reader: UserId,
        message_ids: &[MessageId],
        scope: Option<ChatId>,
    ) -> Result<ReadOutcome> {
        let read_at = now();
        let read_at_str = ts(&read_at);

        let tx = self.conn_mut().transaction()?;
        let mut access: HashMap<ChatId, bool> = HashMap::new();
        let mut chats: Vec<ChatReads> = Vec::new();

        for &id in message_ids {
            let Some(chat) = tx
                .query_row(
                    "SELECT chat_id FROM messages WHERE id = ?1 AND is_deleted = 0",
                    params![id.to_string()],
                    |row| id_col(row, 0, ChatId),
                )
                .optional()?
            else {
                continue;
            };

            if scope.is_some_and(|s| s != chat) {
                continue;
            }
            let allowed = match access.get(&chat) {
                Some(allowed) => *allowed,
                None => {
                    let allowed = member_of(&tx, chat, reader)?;
                    access.insert(chat, allowed);
                    allowed
                }
            };
            if !allowed {
                continue;
            }

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                 VALUES (?1, ?2, ?3)",
                params![id.to_string(), reader.to_string(), read_at_str],
            )?;
            if inserted == 0 {
                continue;
            }

            match chats.iter_mut().find(|c| c.chat_id == chat) {
                Some(entry) => entry.message_ids.push(id),
                None => chats.push(ChatReads {
                    chat_id: chat,
                    message_ids: vec![id],
                }),
            }
        }
        tx.commit()?;

        let recorded: usize = chats.iter().map(|c| c.message_ids.len()).sum();
        if recorded < message_ids.len() {
            tracing::debug!(
                reader = %reader,
                requested = message_ids.len(),
                recorded,
                "mark_read ignored inaccessible or already read messages"
            );
        }

        Ok(ReadOutcome {
            reader,
            read_at,
            chats,
        })
    }

    /// Receipts of one message, oldest first.
    pub fn read_receipts(&self, message: MessageId) -> Result<Vec<ReadReceipt>> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
            params![message.to_string()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound("message"));
        }
        load_receipts(self.conn(), message)
    }
}

pub(crate) fn load_receipts(conn: &Connection, message: MessageId) -> Result<Vec<ReadReceipt>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, read_at FROM message_reads
         WHERE message_id = ?1 ORDER BY read_at ASC, user_id ASC",
    )?;
    let receipts = stmt
        .query_map(params![message.to_string()], |row| {
            Ok(ReadReceipt {
                user_id: id_col(row, 0, UserId)?,
                read_at: ts_col(row, 1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(receipts)
}
