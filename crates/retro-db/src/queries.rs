use crate::Database;
use crate::models::{Board, CardRow, ColumnRow, ContentRow, RetroRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    /// Insert the user unless one with this username exists. An existing
    /// user keeps their secret.
    pub fn ensure_user(&self, username: &str, secret: &str) -> Result<()> {
        self.with_conn(|conn| insert_user_if_missing(conn, username, secret))
    }

    pub fn get_user(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT username, secret FROM users WHERE username = ?1",
                    [username],
                    |row| {
                        Ok(UserRow {
                            username: row.get(0)?,
                            secret: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT username, secret FROM users ORDER BY username")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(UserRow {
                        username: row.get(0)?,
                        secret: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Retros --

    pub fn add_retro(&self, retro: &RetroRow) -> Result<()> {
        self.with_conn(|conn| insert_retro(conn, retro))
    }

    /// Insert the retro unless one with the same id exists.
    pub fn ensure_retro(&self, retro: &RetroRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO retros (id, name, stage, created_at) VALUES (?1, ?2, ?3, ?4)",
                (&retro.id, &retro.name, &retro.stage, &retro.created_at),
            )?;
            Ok(())
        })
    }

    /// Create a retro with its columns and participants atomically.
    /// Usernames with no user record are skipped.
    pub fn create_retro(
        &self,
        retro: &RetroRow,
        columns: &[ColumnRow],
        participants: &[String],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            insert_retro(&tx, retro)?;
            for column in columns {
                insert_column(&tx, column)?;
            }
            for username in participants {
                insert_participant(&tx, &retro.id, username)?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_retro(&self, id: &str) -> Result<Option<RetroRow>> {
        self.with_conn(|conn| select_retro(conn, id))
    }

    /// Read a retro's whole board and hand it to `f` before the connection
    /// lock is released, so no write can commit between the read and `f`.
    /// Returns `None` for an unknown retro, without calling `f`.
    ///
    /// Cards are grouped by column in display order, then by insertion.
    /// Contents follow the order of their cards.
    pub fn with_board<T>(
        &self,
        retro_id: &str,
        username: &str,
        f: impl FnOnce(Board) -> T,
    ) -> Result<Option<T>> {
        self.with_conn(|conn| {
            let Some(retro) = select_retro(conn, retro_id)? else {
                return Ok(None);
            };
            let columns = select_columns(conn, retro_id)?;
            let mut cards = Vec::new();
            for column in &columns {
                cards.extend(select_cards(conn, username, &column.id)?);
            }
            let mut contents = Vec::new();
            for card in &cards {
                contents.extend(select_contents(conn, &card.id)?);
            }

            Ok(Some(f(Board {
                retro,
                columns,
                cards,
                contents,
            })))
        })
    }

    /// Retros the user participates in, oldest first.
    pub fn get_retros(&self, username: &str) -> Result<Vec<RetroRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.stage, r.created_at
                 FROM retros r
                 JOIN participants p ON p.retro_id = r.id
                 WHERE p.username = ?1
                 ORDER BY r.created_at, r.rowid",
            )?;
            let rows = stmt
                .query_map([username], map_retro)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_stage(&self, retro_id: &str, stage: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE retros SET stage = ?1 WHERE id = ?2",
                (stage, retro_id),
            )?;
            ensure_changed(changed, "retro", retro_id)
        })
    }

    // -- Participants --

    /// Record a participant. Unknown usernames are ignored.
    pub fn add_participant(&self, retro_id: &str, username: &str) -> Result<()> {
        self.with_conn(|conn| insert_participant(conn, retro_id, username))
    }

    pub fn get_participants(&self, retro_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username FROM participants WHERE retro_id = ?1 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([retro_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    // -- Columns --

    pub fn add_column(&self, column: &ColumnRow) -> Result<()> {
        self.with_conn(|conn| insert_column(conn, column))
    }

    /// Insert the column unless one with the same id exists.
    pub fn ensure_column(&self, column: &ColumnRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO columns (id, retro_id, name, position) VALUES (?1, ?2, ?3, ?4)",
                (&column.id, &column.retro_id, &column.name, column.position),
            )?;
            Ok(())
        })
    }

    pub fn get_column(&self, id: &str) -> Result<Option<ColumnRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, retro_id, name, position FROM columns WHERE id = ?1",
                    [id],
                    map_column,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Columns of a retro in display order.
    pub fn get_columns(&self, retro_id: &str) -> Result<Vec<ColumnRow>> {
        self.with_conn(|conn| select_columns(conn, retro_id))
    }

    // -- Cards --

    /// Insert a new unrevealed card together with its first content item.
    pub fn add_card(&self, id: &str, column_id: &str, content: &ContentRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO cards (id, column_id, revealed) VALUES (?1, ?2, 0)",
                (id, column_id),
            )?;
            insert_content(&tx, content)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Fetch a card, with `votes` counted for `username`.
    pub fn get_card(&self, username: &str, id: &str) -> Result<Option<CardRow>> {
        self.with_conn(|conn| {
            let sql = format!("{CARD_SELECT} WHERE c.id = ?2 GROUP BY c.rowid");
            let row = conn.query_row(&sql, (username, id), map_card).optional()?;
            Ok(row)
        })
    }

    /// Cards of a column in insertion order, with `votes` counted for
    /// `username`.
    pub fn get_cards(&self, username: &str, column_id: &str) -> Result<Vec<CardRow>> {
        self.with_conn(|conn| select_cards(conn, username, column_id))
    }

    pub fn move_card(&self, id: &str, column_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE cards SET column_id = ?1 WHERE id = ?2",
                (column_id, id),
            )?;
            ensure_changed(changed, "card", id)
        })
    }

    /// Set the reveal flag. Revealing twice is harmless; nothing unsets it.
    pub fn reveal_card(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("UPDATE cards SET revealed = 1 WHERE id = ?1", [id])?;
            ensure_changed(changed, "card", id)
        })
    }

    /// Delete a card along with its content and votes.
    pub fn delete_card(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM votes WHERE card_id = ?1", [id])?;
            tx.execute("DELETE FROM contents WHERE card_id = ?1", [id])?;
            let changed = tx.execute("DELETE FROM cards WHERE id = ?1", [id])?;
            ensure_changed(changed, "card", id)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Move every vote and content item from `card_from` onto `card_to`, then
    /// delete `card_from`. All or nothing.
    pub fn group_cards(&self, card_from: &str, card_to: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE votes SET card_id = ?1 WHERE card_id = ?2",
                (card_to, card_from),
            )?;
            tx.execute(
                "UPDATE contents SET card_id = ?1 WHERE card_id = ?2",
                (card_to, card_from),
            )?;
            let changed = tx.execute("DELETE FROM cards WHERE id = ?1", [card_from])?;
            ensure_changed(changed, "card", card_from)?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Contents --

    pub fn add_content(&self, content: &ContentRow) -> Result<()> {
        self.with_conn(|conn| insert_content(conn, content))
    }

    pub fn update_content(&self, id: &str, text: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("UPDATE contents SET text = ?1 WHERE id = ?2", (text, id))?;
            ensure_changed(changed, "content", id)
        })
    }

    pub fn get_content(&self, id: &str) -> Result<Option<ContentRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, card_id, text, author FROM contents WHERE id = ?1",
                    [id],
                    map_content,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Content of a card in insertion order.
    pub fn get_contents(&self, card_id: &str) -> Result<Vec<ContentRow>> {
        self.with_conn(|conn| select_contents(conn, card_id))
    }

    // -- Votes --

    pub fn vote(&self, username: &str, card_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO votes (card_id, username) VALUES (?1, ?2)",
                (card_id, username),
            )?;
            Ok(())
        })
    }

    /// Remove the user's oldest vote on the card. Returns false when they had
    /// none to remove.
    pub fn unvote(&self, username: &str, card_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM votes WHERE id = (
                     SELECT MIN(id) FROM votes WHERE username = ?1 AND card_id = ?2
                 )",
                (username, card_id),
            )?;
            Ok(changed > 0)
        })
    }

    /// `(user's votes, total votes)` on a card.
    pub fn vote_counts(&self, username: &str, card_id: &str) -> Result<(u32, u32)> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT COALESCE(SUM(CASE WHEN username = ?1 THEN 1 ELSE 0 END), 0), COUNT(id)
                 FROM votes WHERE card_id = ?2",
                (username, card_id),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(counts)
        })
    }

    // -- Maintenance --

    /// Wipe every table. Only reachable in test mode.
    pub fn reset(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                DELETE FROM votes;
                DELETE FROM contents;
                DELETE FROM cards;
                DELETE FROM columns;
                DELETE FROM participants;
                DELETE FROM retros;
                DELETE FROM users;
                ",
            )?;
            Ok(())
        })
    }
}

const CARD_SELECT: &str = "SELECT c.id, c.column_id, col.retro_id, c.revealed,
        COALESCE(SUM(CASE WHEN v.username = ?1 THEN 1 ELSE 0 END), 0),
        COUNT(v.id)
    FROM cards c
    JOIN columns col ON col.id = c.column_id
    LEFT JOIN votes v ON v.card_id = c.id";

fn select_retro(conn: &Connection, id: &str) -> Result<Option<RetroRow>> {
    conn.query_row(
        "SELECT id, name, stage, created_at FROM retros WHERE id = ?1",
        [id],
        map_retro,
    )
    .optional()
}

fn select_columns(conn: &Connection, retro_id: &str) -> Result<Vec<ColumnRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, retro_id, name, position FROM columns
         WHERE retro_id = ?1
         ORDER BY position, rowid",
    )?;
    let rows = stmt
        .query_map([retro_id], map_column)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn select_cards(conn: &Connection, username: &str, column_id: &str) -> Result<Vec<CardRow>> {
    let sql = format!("{CARD_SELECT} WHERE c.column_id = ?2 GROUP BY c.rowid ORDER BY c.rowid");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((username, column_id), map_card)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn select_contents(conn: &Connection, card_id: &str) -> Result<Vec<ContentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, card_id, text, author FROM contents WHERE card_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([card_id], map_content)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn insert_user_if_missing(conn: &Connection, username: &str, secret: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO users (username, secret) VALUES (?1, ?2)",
        (username, secret),
    )?;
    Ok(())
}

fn insert_retro(conn: &Connection, retro: &RetroRow) -> Result<()> {
    conn.execute(
        "INSERT INTO retros (id, name, stage, created_at) VALUES (?1, ?2, ?3, ?4)",
        (&retro.id, &retro.name, &retro.stage, &retro.created_at),
    )?;
    Ok(())
}

fn insert_participant(conn: &Connection, retro_id: &str, username: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO participants (retro_id, username)
         SELECT ?1, username FROM users WHERE username = ?2",
        (retro_id, username),
    )?;
    Ok(())
}

fn insert_column(conn: &Connection, column: &ColumnRow) -> Result<()> {
    conn.execute(
        "INSERT INTO columns (id, retro_id, name, position) VALUES (?1, ?2, ?3, ?4)",
        (&column.id, &column.retro_id, &column.name, column.position),
    )?;
    Ok(())
}

fn insert_content(conn: &Connection, content: &ContentRow) -> Result<()> {
    conn.execute(
        "INSERT INTO contents (id, card_id, text, author) VALUES (?1, ?2, ?3, ?4)",
        (&content.id, &content.card_id, &content.text, &content.author),
    )?;
    Ok(())
}

fn ensure_changed(changed: usize, what: &str, id: &str) -> Result<()> {
    if changed == 0 {
        anyhow::bail!("no {} with id {}", what, id);
    }
    Ok(())
}

fn map_retro(row: &rusqlite::Row<'_>) -> rusqlite::Result<RetroRow> {
    Ok(RetroRow {
        id: row.get(0)?,
        name: row.get(1)?,
        stage: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_column(row: &rusqlite::Row<'_>) -> rusqlite::Result<ColumnRow> {
    Ok(ColumnRow {
        id: row.get(0)?,
        retro_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
    })
}

fn map_card(row: &rusqlite::Row<'_>) -> rusqlite::Result<CardRow> {
    Ok(CardRow {
        id: row.get(0)?,
        column_id: row.get(1)?,
        retro_id: row.get(2)?,
        revealed: row.get(3)?,
        votes: row.get(4)?,
        total_votes: row.get(5)?,
    })
}

fn map_content(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentRow> {
    Ok(ContentRow {
        id: row.get(0)?,
        card_id: row.get(1)?,
        text: row.get(2)?,
        author: row.get(3)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
