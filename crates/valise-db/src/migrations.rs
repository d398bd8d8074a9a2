use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Mirror of the external identity provider; synced, never authoritative.
        CREATE TABLE IF NOT EXISTS users (
            id                      TEXT PRIMARY KEY,
            display_name            TEXT NOT NULL,
            email                   TEXT,
            notify_first_message    INTEGER NOT NULL DEFAULT 1,
            notify_offer_activity   INTEGER NOT NULL DEFAULT 1,
            created_at              INTEGER NOT NULL
        );

        -- Two-party threads. Slots are assigned by lexicographic id order so
        -- the (A,B) pair is unique regardless of who opened the conversation.
        CREATE TABLE IF NOT EXISTS conversations (
            id                          TEXT PRIMARY KEY,
            participant_one             TEXT NOT NULL,
            participant_two             TEXT NOT NULL,
            last_read_one               INTEGER,
            last_read_two               INTEGER,
            source_type                 TEXT,
            source_id                   TEXT,
            source_title                TEXT,
            first_message_notified_at   INTEGER,
            created_at                  INTEGER NOT NULL,
            UNIQUE(participant_one, participant_two)
        );

        -- Append-only apart from the notification columns.
        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            conversation_id     TEXT NOT NULL REFERENCES conversations(id),
            sender_id           TEXT NOT NULL,
            body                TEXT NOT NULL,
            message_type        TEXT NOT NULL DEFAULT 'normal',
            email_notified_at   INTEGER,
            notify_state        TEXT NOT NULL DEFAULT 'none',
            notify_attempts     INTEGER NOT NULL DEFAULT 0,
            created_at          INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_notify_candidates
            ON messages(created_at)
            WHERE message_type = 'first' AND notify_state = 'pending';

        -- Generic at-most-once gate for outbound notifications.
        CREATE TABLE IF NOT EXISTS notification_dedupe (
            category    TEXT NOT NULL,
            dedupe_key  TEXT NOT NULL,
            sent_at     INTEGER NOT NULL,
            PRIMARY KEY (category, dedupe_key)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
