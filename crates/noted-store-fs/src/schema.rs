//! Schema migration, in the `CREATE TABLE IF NOT EXISTS` + `PRAGMA`
//! style this corpus's own SQLite modules use.

use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;",
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            salt BLOB NOT NULL,
            is_public INTEGER NOT NULL DEFAULT 0,
            create_time INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS summaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL REFERENCES users(id),
            share_link TEXT NOT NULL,
            path TEXT NOT NULL,
            font TEXT NOT NULL DEFAULT 'Arial',
            create_time INTEGER NOT NULL,
            update_time INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permissions (
            summary_id INTEGER NOT NULL REFERENCES summaries(id),
            user_id INTEGER NOT NULL REFERENCES users(id),
            kind TEXT NOT NULL,
            PRIMARY KEY (summary_id, user_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            title TEXT NOT NULL,
            event_date INTEGER NOT NULL,
            create_time INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS links (
            source_summary_id INTEGER NOT NULL REFERENCES summaries(id),
            target_summary_id INTEGER NOT NULL REFERENCES summaries(id),
            link_text TEXT NOT NULL
        )",
        [],
    )?;

    for idx in &[
        "CREATE INDEX IF NOT EXISTS idx_summaries_owner ON summaries(owner_id)",
        "CREATE INDEX IF NOT EXISTS idx_events_user ON events(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_summary_id)",
        "CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_summary_id)",
    ] {
        conn.execute(idx, [])?;
    }

    Ok(())
}
