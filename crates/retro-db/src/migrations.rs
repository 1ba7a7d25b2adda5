use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            username    TEXT PRIMARY KEY,
            secret      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS retros (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            stage       TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS participants (
            retro_id    TEXT NOT NULL REFERENCES retros(id),
            username    TEXT NOT NULL REFERENCES users(username),
            PRIMARY KEY (retro_id, username)
        );

        CREATE TABLE IF NOT EXISTS columns (
            id          TEXT PRIMARY KEY,
            retro_id    TEXT NOT NULL REFERENCES retros(id),
            name        TEXT NOT NULL,
            position    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_columns_retro
            ON columns(retro_id, position);

        CREATE TABLE IF NOT EXISTS cards (
            id          TEXT PRIMARY KEY,
            column_id   TEXT NOT NULL REFERENCES columns(id),
            revealed    INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_cards_column
            ON cards(column_id);

        CREATE TABLE IF NOT EXISTS contents (
            id          TEXT PRIMARY KEY,
            card_id     TEXT NOT NULL REFERENCES cards(id),
            text        TEXT NOT NULL,
            author      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_contents_card
            ON contents(card_id);

        -- One row per vote; a user may hold several on the same card.
        CREATE TABLE IF NOT EXISTS votes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            card_id     TEXT NOT NULL REFERENCES cards(id),
            username    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_votes_card
            ON votes(card_id, username);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
