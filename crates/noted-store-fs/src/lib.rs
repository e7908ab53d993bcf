//! A concrete [`noted_core::store::Store`] on top of SQLite (schema) and
//! plain files (summary content, historic snapshots). Mirrors the
//! `Mutex<Connection>` + blocking-call-per-method shape found in this
//! corpus's own SQLite persistence modules, adapted to run each call
//! through `spawn_blocking` since `Store` methods are async.

mod links;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use noted_core::error::{Result, ServerError};
use noted_core::store::Store;
use noted_proto::{
    Event, EventId, GraphNode, GraphNodeKind, HistoricEntry, PermissionKind, Summary, SummaryId,
    User, UserId,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

fn sqlite_err(context: &str, err: rusqlite::Error) -> ServerError {
    ServerError::StorageFailure(format!("{context}: {err}"))
}

fn io_err(context: &str, err: std::io::Error) -> ServerError {
    ServerError::StorageFailure(format!("{context}: {err}"))
}

/// Users, summaries, permissions, events, and links live in a single
/// SQLite file; a summary's current content and its historic snapshots
/// are plain UTF-8 files under `data_dir`.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    data_dir: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if absent) the SQLite database at
    /// `data_dir/noted.db` and runs its migrations.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| io_err("creating data dir", e))?;
        std::fs::create_dir_all(data_dir.join("content")).map_err(|e| io_err("creating content dir", e))?;
        std::fs::create_dir_all(data_dir.join("history")).map_err(|e| io_err("creating history dir", e))?;

        let conn = Connection::open(data_dir.join("noted.db")).map_err(|e| sqlite_err("opening db", e))?;
        schema::migrate(&conn).map_err(|e| sqlite_err("running migrations", e))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            data_dir,
        })
    }

    /// Opens an in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let data_dir = std::env::temp_dir().join(format!("noted-store-fs-test-{}", uuid_like()));
        Self::open(data_dir)
    }

    fn content_path(&self, summary_id: SummaryId) -> PathBuf {
        self.data_dir.join("content").join(format!("{}.md", summary_id.0))
    }

    fn historic_dir(&self, summary_id: SummaryId) -> PathBuf {
        self.data_dir.join("history").join(summary_id.0.to_string())
    }

    fn historic_path(&self, summary_id: SummaryId, timestamp: &str) -> PathBuf {
        self.historic_dir(summary_id).join(format!("{timestamp}.md"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| ServerError::StorageFailure(format!("blocking task panicked: {e}")))?
        .map_err(|e| sqlite_err("query", e))
    }

    fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<Summary> {
        Ok(Summary {
            id: SummaryId(row.get(0)?),
            owner_id: UserId(row.get(1)?),
            share_link: row.get(2)?,
            path: row.get(3)?,
            font: row.get(4)?,
            create_time: row.get(5)?,
            update_time: row.get(6)?,
        })
    }

    const SUMMARY_COLS: &'static str = "id, owner_id, share_link, path, font, create_time, update_time";

    fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
        Ok(Event {
            id: EventId(row.get(0)?),
            user_id: UserId(row.get(1)?),
            title: row.get(2)?,
            event_date: row.get(3)?,
            create_time: row.get(4)?,
        })
    }
}

fn uuid_like() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_salt(&self, username: &str) -> Result<Option<[u8; 16]>> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT salt FROM users WHERE username = ?1", params![username], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()
        })
        .await
        .map(|opt| opt.and_then(|v| v.try_into().ok()))
    }

    async fn authenticate(&self, username: &str, password_hash: &str) -> Result<Option<User>> {
        let username = username.to_string();
        let password_hash = password_hash.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, username, password_hash, salt, is_public, create_time
                 FROM users WHERE username = ?1 AND password_hash = ?2",
                params![username, password_hash],
                |row| {
                    let salt: Vec<u8> = row.get(3)?;
                    Ok(User {
                        id: UserId(row.get(0)?),
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        salt: salt.try_into().unwrap_or([0u8; 16]),
                        is_public: row.get(4)?,
                        create_time: row.get(5)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn insert_user(&self, username: &str, password_hash: &str, salt: [u8; 16]) -> Result<User> {
        let username = username.to_string();
        let password_hash = password_hash.to_string();
        let now = Utc::now().timestamp();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (username, password_hash, salt, is_public, create_time)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![username, password_hash, salt.to_vec(), now],
            )?;
            let id = conn.last_insert_rowid() as u64;
            Ok(User {
                id: UserId(id),
                username,
                password_hash,
                salt,
                is_public: false,
                create_time: now,
            })
        })
        .await
    }

    async fn insert_summary(&self, title: &str, content: &str, owner_id: UserId, font: &str) -> Result<SummaryId> {
        let title = title.to_string();
        let font = font.to_string();
        let now = Utc::now().timestamp();
        let summary_id = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO summaries (owner_id, share_link, path, font, create_time, update_time)
                     VALUES (?1, ?2, '', ?3, ?4, ?4)",
                    params![owner_id.0, title, font, now],
                )?;
                Ok(SummaryId(conn.last_insert_rowid() as u64))
            })
            .await?;

        let path = self.content_path(summary_id);
        tokio::fs::write(&path, content).await.map_err(|e| io_err("writing summary content", e))?;
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE summaries SET path = ?1 WHERE id = ?2",
                params![path.display().to_string(), summary_id.0],
            )
        })
        .await?;

        links::rewrite_links(&self.conn, summary_id, content).await?;
        Ok(summary_id)
    }

    async fn save_summary(&self, summary_id: SummaryId, content: &str) -> Result<()> {
        let path = self.content_path(summary_id);
        self.archive_current(summary_id).await?;
        tokio::fs::write(&path, content).await.map_err(|e| io_err("writing summary content", e))?;

        let now = Utc::now().timestamp();
        self.with_conn(move |conn| {
            conn.execute("UPDATE summaries SET update_time = ?1 WHERE id = ?2", params![now, summary_id.0])
        })
        .await?;

        links::rewrite_links(&self.conn, summary_id, content).await
    }

    async fn update_summary_meta(&self, summary_id: SummaryId, font: &str) -> Result<()> {
        self.archive_current(summary_id).await?;
        let font = font.to_string();
        let now = Utc::now().timestamp();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE summaries SET font = ?1, update_time = ?2 WHERE id = ?3",
                params![font, now, summary_id.0],
            )
        })
        .await
        .map(|_| ())
    }

    async fn get_summary(&self, summary_id: SummaryId) -> Result<Option<Summary>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM summaries WHERE id = ?1", Self::SUMMARY_COLS),
                params![summary_id.0],
                Self::row_to_summary,
            )
            .optional()
        })
        .await
    }

    async fn get_summary_content(&self, summary_id: SummaryId) -> Result<String> {
        let path = self.content_path(summary_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(io_err("reading summary content", err)),
        }
    }

    async fn get_summary_by_link(&self, title: &str) -> Result<Option<Summary>> {
        let title = title.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM summaries WHERE LOWER(share_link) = LOWER(?1)", Self::SUMMARY_COLS),
                params![title],
                Self::row_to_summary,
            )
            .optional()
        })
        .await
    }

    async fn delete_summary(&self, summary_id: SummaryId) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM summaries WHERE id = ?1", params![summary_id.0])?;
            conn.execute("DELETE FROM permissions WHERE summary_id = ?1", params![summary_id.0])?;
            conn.execute(
                "DELETE FROM links WHERE source_summary_id = ?1 OR target_summary_id = ?1",
                params![summary_id.0],
            )
        })
        .await?;
        let path = self.content_path(summary_id);
        if path.exists() {
            tokio::fs::remove_file(&path).await.map_err(|e| io_err("deleting summary content", e))?;
        }
        Ok(())
    }

    async fn share_summary(&self, summary_id: SummaryId, _owner_id: UserId, target_user: &str, kind: PermissionKind) -> Result<()> {
        let target_user = target_user.to_string();
        let kind_str = permission_to_str(kind).to_string();
        self.with_conn(move |conn| {
            let user_id: u64 = conn.query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![target_user],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO permissions (summary_id, user_id, kind) VALUES (?1, ?2, ?3)
                 ON CONFLICT(summary_id, user_id) DO UPDATE SET kind = excluded.kind",
                params![summary_id.0, user_id, kind_str],
            )
        })
        .await
        .map(|_| ())
    }

    async fn update_permission(&self, summary_id: SummaryId, user_id: UserId, kind: PermissionKind) -> Result<()> {
        let kind_str = permission_to_str(kind).to_string();
        let rows = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE permissions SET kind = ?1 WHERE summary_id = ?2 AND user_id = ?3",
                    params![kind_str, summary_id.0, user_id.0],
                )
            })
            .await?;
        if rows == 0 {
            return Err(ServerError::NotFound(format!("no permission row for summary {summary_id:?}/user {user_id:?}")));
        }
        Ok(())
    }

    async fn can_access(&self, summary_id: SummaryId, user_id: UserId) -> Result<bool> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT 1 FROM summaries WHERE id = ?1 AND owner_id = ?2
                 UNION
                 SELECT 1 FROM permissions WHERE summary_id = ?1 AND user_id = ?2",
                params![summary_id.0, user_id.0],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
        })
        .await
    }

    async fn get_all_by_user(&self, user_id: UserId) -> Result<Vec<Summary>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM summaries WHERE owner_id = ?1", Self::SUMMARY_COLS))?;
            stmt.query_map(params![user_id.0], Self::row_to_summary)?.collect()
        })
        .await
    }

    async fn get_all_user_can_access(&self, user_id: UserId) -> Result<Vec<Summary>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT {} FROM summaries s
                 LEFT JOIN permissions p ON s.id = p.summary_id
                 WHERE s.owner_id = ?1 OR p.user_id = ?1",
                Self::SUMMARY_COLS
                    .split(", ")
                    .map(|c| format!("s.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))?;
            stmt.query_map(params![user_id.0], Self::row_to_summary)?.collect()
        })
        .await
    }

    async fn insert_event(&self, user_id: UserId, title: &str, event_date: i64) -> Result<Event> {
        let title = title.to_string();
        let now = Utc::now().timestamp();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO events (user_id, title, event_date, create_time) VALUES (?1, ?2, ?3, ?4)",
                params![user_id.0, title, event_date, now],
            )?;
            Ok(Event {
                id: EventId(conn.last_insert_rowid() as u64),
                user_id,
                title,
                event_date,
                create_time: now,
            })
        })
        .await
    }

    async fn get_events(&self, user_id: UserId) -> Result<Vec<Event>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT id, user_id, title, event_date, create_time FROM events WHERE user_id = ?1 ORDER BY event_date ASC")?;
            stmt.query_map(params![user_id.0], Self::row_to_event)?.collect()
        })
        .await
    }

    async fn get_upcoming_events(&self, user_id: UserId, within_days: i64) -> Result<Vec<Event>> {
        let now = Utc::now().timestamp();
        let horizon = now + within_days * 86_400;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, event_date, create_time FROM events
                 WHERE user_id = ?1 AND event_date BETWEEN ?2 AND ?3 ORDER BY event_date ASC",
            )?;
            stmt.query_map(params![user_id.0, now, horizon], Self::row_to_event)?.collect()
        })
        .await
    }

    async fn delete_event(&self, event_id: EventId, user_id: UserId) -> Result<()> {
        let rows = self
            .with_conn(move |conn| conn.execute("DELETE FROM events WHERE id = ?1 AND user_id = ?2", params![event_id.0, user_id.0]))
            .await?;
        if rows == 0 {
            return Err(ServerError::NotFound(format!("event {event_id:?} not found for user {user_id:?}")));
        }
        Ok(())
    }

    async fn get_graph(&self, summary_id: SummaryId) -> Result<GraphNode> {
        links::build_graph(&self.conn, summary_id).await
    }

    async fn list_historic(&self, summary_id: SummaryId) -> Result<Vec<HistoricEntry>> {
        let dir = self.historic_dir(summary_id);
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(io_err("listing historic snapshots", err)),
        };
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_err("reading historic dir entry", e))? {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                entries.push(HistoricEntry {
                    summary_id,
                    timestamp: stem.to_string(),
                });
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    async fn load_historic(&self, summary_id: SummaryId, timestamp: &str) -> Result<String> {
        let path = self.historic_path(summary_id, timestamp);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| ServerError::NotFound(format!("no historic snapshot {timestamp} for summary {summary_id:?}")))
    }

    async fn load_historic_graph(&self, summary_id: SummaryId, timestamp: &str) -> Result<GraphNode> {
        let content = self.load_historic(summary_id, timestamp).await?;
        links::historic_graph(&self.conn, summary_id, &content).await
    }
}

impl SqliteStore {
    /// Copies the current on-disk content of `summary_id` into its
    /// historic directory before it gets overwritten, named by the
    /// current timestamp.
    async fn archive_current(&self, summary_id: SummaryId) -> Result<()> {
        let current = self.content_path(summary_id);
        if !current.exists() {
            return Ok(());
        }
        let dir = self.historic_dir(summary_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_err("creating historic dir", e))?;
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3f").to_string();
        let dest = dir.join(format!("{timestamp}.md"));
        match tokio::fs::copy(&current, &dest).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(?summary_id, %err, "failed to archive historic snapshot");
                Ok(())
            }
        }
    }
}

fn permission_to_str(kind: PermissionKind) -> &'static str {
    match kind {
        PermissionKind::View => "view",
        PermissionKind::Edit => "edit",
    }
}

#[allow(dead_code)]
fn str_to_permission(s: &str) -> PermissionKind {
    match s {
        "edit" => PermissionKind::Edit,
        _ => PermissionKind::View,
    }
}

#[allow(dead_code)]
fn node_kind_to_str(kind: GraphNodeKind) -> &'static str {
    match kind {
        GraphNodeKind::Summary => "summary",
        GraphNodeKind::Parent => "parent",
        GraphNodeKind::Child => "child",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn insert_and_authenticate_user() {
        let store = test_store().await;
        let user = store.insert_user("alice", "hashed", [1u8; 16]).await.unwrap();
        assert_eq!(user.username, "alice");

        let found = store.authenticate("alice", "hashed").await.unwrap();
        assert!(found.is_some());
        assert!(store.authenticate("alice", "wrong").await.unwrap().is_none());

        let salt = store.get_salt("alice").await.unwrap().unwrap();
        assert_eq!(salt, [1u8; 16]);
    }

    #[tokio::test]
    async fn save_summary_rewrites_links_idempotently() {
        let store = test_store().await;
        let owner = store.insert_user("bob", "hashed", [2u8; 16]).await.unwrap();
        let summary_id = store.insert_summary("Root", "see ###link Child\n", owner.id, "Arial").await.unwrap();

        let child_id = store.insert_summary("Child", "leaf", owner.id, "Arial").await.unwrap();
        assert_ne!(summary_id, child_id);

        // Saving the same content twice should not duplicate link rows.
        store.save_summary(summary_id, "see ###link Child\n").await.unwrap();
        store.save_summary(summary_id, "see ###link Child\n").await.unwrap();

        let graph = store.get_graph(summary_id).await.unwrap();
        assert_eq!(graph.children.len(), 1);
    }

    #[tokio::test]
    async fn historic_snapshot_round_trips() {
        let store = test_store().await;
        let owner = store.insert_user("carol", "hashed", [3u8; 16]).await.unwrap();
        let summary_id = store.insert_summary("Notes", "v1", owner.id, "Arial").await.unwrap();

        store.save_summary(summary_id, "v2").await.unwrap();
        let history = store.list_historic(summary_id).await.unwrap();
        assert_eq!(history.len(), 1);

        let restored = store.load_historic(summary_id, &history[0].timestamp).await.unwrap();
        assert_eq!(restored, "v1");
        assert_eq!(store.get_summary_content(summary_id).await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn events_filter_by_owning_user() {
        let store = test_store().await;
        let alice = store.insert_user("alice2", "h", [4u8; 16]).await.unwrap();
        let bob = store.insert_user("bob2", "h", [5u8; 16]).await.unwrap();

        store.insert_event(alice.id, "Standup", 1_000).await.unwrap();
        store.insert_event(bob.id, "Retro", 2_000).await.unwrap();

        let alice_events = store.get_events(alice.id).await.unwrap();
        assert_eq!(alice_events.len(), 1);
        assert_eq!(alice_events[0].title, "Standup");

        let err = store.delete_event(EventId(9999), alice.id).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }
}
