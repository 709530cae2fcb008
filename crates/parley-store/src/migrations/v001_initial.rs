//! v001 -- Initial schema creation.
//!
//! Creates the auth table (`auth_users`) and the four public tables the
//! client reads: `profiles`, `chats`, `chat_participants`, `messages`.
//! Timestamps are RFC-3339 strings with microsecond precision, which keeps
//! lexical and chronological order identical.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Auth identities (private to the auth service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS auth_users (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4, shared with profiles.id
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,               -- hex BLAKE3 derive_key(salt || password)
    salt          TEXT NOT NULL,               -- hex, 16 random bytes
    metadata      TEXT NOT NULL DEFAULT '{}',  -- JSON
    created_at    TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Profiles
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id             TEXT PRIMARY KEY NOT NULL,
    username       TEXT NOT NULL UNIQUE,
    display_name   TEXT,
    avatar_url     TEXT,
    status_message TEXT NOT NULL DEFAULT '',
    is_online      INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    last_seen      TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id         TEXT PRIMARY KEY NOT NULL,
    type       TEXT NOT NULL CHECK (type IN ('direct', 'group')),
    name       TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES profiles(id)
);

CREATE INDEX IF NOT EXISTS idx_chats_updated_at ON chats(updated_at DESC);

CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id    TEXT NOT NULL,
    profile_id TEXT NOT NULL,
    joined_at  TEXT NOT NULL,

    PRIMARY KEY (chat_id, profile_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (profile_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_participants_profile
    ON chat_participants(profile_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL,
    chat_id      TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    content      TEXT NOT NULL,
    type         TEXT NOT NULL DEFAULT 'text' CHECK (type IN ('text', 'media')),
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    is_encrypted INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES profiles(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
