//! `###link <title>` extraction and the summary dependency graph built
//! from it, per the format the original note editor wrote out.

use std::sync::{Arc, Mutex};

use noted_core::error::{Result, ServerError};
use noted_proto::{GraphNode, GraphNodeKind, SummaryId};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

fn link_pattern() -> Regex {
    Regex::new(r"(?m)^\s*###link\s+(.+?)\s*$").expect("static regex")
}

/// Titles referenced via `###link` markup, in document order.
pub fn extract_link_titles(content: &str) -> Vec<String> {
    link_pattern().captures_iter(content).map(|c| c[1].to_string()).collect()
}

async fn run<F, T>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock().expect("sqlite connection mutex poisoned");
        f(&guard)
    })
    .await
    .map_err(|e| ServerError::StorageFailure(format!("blocking task panicked: {e}")))?
    .map_err(|e| ServerError::StorageFailure(format!("link query: {e}")))
}

/// Deletes every outgoing link row for `summary_id` and re-inserts one
/// per `###link` reference resolvable to an existing summary.
/// Unresolvable titles are dropped with a warning, matching the
/// original editor's best-effort link rendering.
pub async fn rewrite_links(conn: &Arc<Mutex<Connection>>, summary_id: SummaryId, content: &str) -> Result<()> {
    let titles = extract_link_titles(content);
    run(conn, move |conn| {
        conn.execute("DELETE FROM links WHERE source_summary_id = ?1", params![summary_id.0])?;
        for title in &titles {
            let target: Option<u64> = conn
                .query_row("SELECT id FROM summaries WHERE LOWER(share_link) = LOWER(?1)", params![title], |row| row.get(0))
                .optional()?;
            match target {
                Some(target_id) if target_id != summary_id.0 => {
                    conn.execute(
                        "INSERT INTO links (source_summary_id, target_summary_id, link_text) VALUES (?1, ?2, ?3)",
                        params![summary_id.0, target_id, title],
                    )?;
                }
                Some(_) => {}
                None => warn!(title, ?summary_id, "link target not found, dropping"),
            }
        }
        Ok(())
    })
    .await
}

/// Builds a summary's one-level dependency graph: the summary itself,
/// its parents (summaries linking to it), and its children (summaries
/// it links to).
pub async fn build_graph(conn: &Arc<Mutex<Connection>>, summary_id: SummaryId) -> Result<GraphNode> {
    run(conn, move |conn| {
        let name: String = conn.query_row("SELECT share_link FROM summaries WHERE id = ?1", params![summary_id.0], |row| row.get(0))?;

        let mut children_stmt = conn.prepare(
            "SELECT s.id, s.share_link FROM links l JOIN summaries s ON s.id = l.target_summary_id WHERE l.source_summary_id = ?1",
        )?;
        let children = children_stmt
            .query_map(params![summary_id.0], |row| {
                Ok(GraphNode {
                    id: SummaryId(row.get(0)?),
                    name: row.get(1)?,
                    kind: GraphNodeKind::Child,
                    children: vec![],
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut parents_stmt = conn.prepare(
            "SELECT s.id, s.share_link FROM links l JOIN summaries s ON s.id = l.source_summary_id WHERE l.target_summary_id = ?1",
        )?;
        let parents = parents_stmt
            .query_map(params![summary_id.0], |row| {
                Ok(GraphNode {
                    id: SummaryId(row.get(0)?),
                    name: row.get(1)?,
                    kind: GraphNodeKind::Parent,
                    children: vec![],
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut all_children = parents;
        all_children.extend(children);

        Ok(GraphNode {
            id: summary_id,
            name,
            kind: GraphNodeKind::Summary,
            children: all_children,
        })
    })
    .await
}

/// Like [`build_graph`], but resolves `###link` references out of a
/// historic snapshot's content rather than the live `links` table —
/// used to reconstruct the graph as it stood at a point in time.
pub async fn historic_graph(conn: &Arc<Mutex<Connection>>, summary_id: SummaryId, content: &str) -> Result<GraphNode> {
    let titles = extract_link_titles(content);
    run(conn, move |conn| {
        let name: String = conn
            .query_row("SELECT share_link FROM summaries WHERE id = ?1", params![summary_id.0], |row| row.get(0))
            .unwrap_or_default();

        let mut children = Vec::new();
        for title in &titles {
            let found = conn
                .query_row("SELECT id, share_link FROM summaries WHERE LOWER(share_link) = LOWER(?1)", params![title], |row| {
                    Ok(GraphNode {
                        id: SummaryId(row.get(0)?),
                        name: row.get(1)?,
                        kind: GraphNodeKind::Child,
                        children: vec![],
                    })
                })
                .optional()?;
            if let Some(node) = found {
                children.push(node);
            }
        }

        Ok(GraphNode {
            id: summary_id,
            name,
            kind: GraphNodeKind::Summary,
            children,
        })
    })
    .await
}
