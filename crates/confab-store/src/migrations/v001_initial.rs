//! v001 -- Initial schema creation.
//!
//! Chats, their participants, messages and read receipts.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    is_group        INTEGER NOT NULL DEFAULT 0,
    name            TEXT,                       -- groups only
    image           TEXT,                       -- groups only
    pair_key        TEXT UNIQUE,                -- sorted "a:b" for one-on-one chats, NULL for groups
    created_by      TEXT NOT NULL,
    last_message_id TEXT,
    last_message_at TEXT,
    created_at      TEXT NOT NULL,              -- RFC-3339, UTC
    updated_at      TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id   TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    position  INTEGER NOT NULL,                 -- insertion order
    is_admin  INTEGER NOT NULL DEFAULT 0,
    joined_at TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_participants_user ON chat_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,  -- append order, backs history cursors
    id         TEXT NOT NULL UNIQUE,               -- UUID v4
    chat_id    TEXT NOT NULL,
    sender_id  TEXT NOT NULL,
    content    TEXT NOT NULL,
    kind       TEXT NOT NULL DEFAULT 'text',       -- text | image | video | file
    media_url  TEXT,
    reply_to   TEXT,
    is_edited  INTEGER NOT NULL DEFAULT 0,
    edited_at  TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (reply_to) REFERENCES messages(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_seq ON messages(chat_id, seq DESC);

-- ----------------------------------------------------------------
-- Read receipts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
