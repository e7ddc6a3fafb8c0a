use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                bio         TEXT NOT NULL DEFAULT '',
                created_at  TEXT NOT NULL
            );

            CREATE TABLE favorites (
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                book_id     TEXT NOT NULL,
                PRIMARY KEY (user_id, book_id)
            );

            CREATE TABLE books (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                id          TEXT NOT NULL UNIQUE,
                title       TEXT NOT NULL,
                author      TEXT NOT NULL,
                genre       TEXT NOT NULL,
                condition   TEXT NOT NULL,
                location    TEXT NOT NULL,
                image_url   TEXT NOT NULL DEFAULT '',
                owner_id    TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'available',
                created_at  TEXT NOT NULL
            );

            CREATE TABLE exchanges (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT NOT NULL UNIQUE,
                book_id       TEXT NOT NULL,
                requester_id  TEXT NOT NULL,
                owner_id      TEXT NOT NULL,
                message       TEXT NOT NULL DEFAULT '',
                status        TEXT NOT NULL DEFAULT 'requested',
                created_at    TEXT NOT NULL,
                accepted_at   TEXT,
                declined_at   TEXT,
                CHECK (requester_id <> owner_id)
            );

            CREATE INDEX idx_exchanges_book ON exchanges(book_id);

            -- participant_a < participant_b; book_id is '' for unscoped conversations
            CREATE TABLE conversations (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                id               TEXT NOT NULL UNIQUE,
                participant_a    TEXT NOT NULL,
                participant_b    TEXT NOT NULL,
                book_id          TEXT NOT NULL DEFAULT '',
                created_at       TEXT NOT NULL,
                last_message_at  TEXT,
                UNIQUE (participant_a, participant_b, book_id)
            );

            CREATE TABLE conversation_unread (
                conversation_id  TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id          TEXT NOT NULL,
                count            INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE TABLE messages (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                id               TEXT NOT NULL UNIQUE,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id        TEXT NOT NULL,
                sender_name      TEXT NOT NULL,
                text             TEXT NOT NULL,
                created_at       TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at, seq);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
