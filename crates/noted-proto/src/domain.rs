//! Domain types owned by the `Store` contract and exchanged with
//! clients.

use serde::{Deserialize, Serialize};

use crate::ids::{EventId, SummaryId, UserId};

/// A registered user. `password_hash`/`salt` are Store-internal and are
/// never included in a response sent to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub salt: [u8; 16],
    pub is_public: bool,
    pub create_time: i64,
}

/// A user-owned, titled document. `path` and any in-memory `content`
/// cache are Store-internal; clients see the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: SummaryId,
    pub owner_id: UserId,
    pub share_link: String,
    pub path: String,
    pub font: String,
    pub create_time: i64,
    pub update_time: i64,
}

/// The level of access a permission grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionKind {
    View,
    Edit,
}

/// A grant of access to a summary for a user other than its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub summary_id: SummaryId,
    pub user_id: UserId,
    pub kind: PermissionKind,
}

/// A directed dependency edge extracted from `###link <title>` markup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub source_summary_id: SummaryId,
    pub target_summary_id: SummaryId,
    pub link_text: String,
}

/// A user-scheduled calendar event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub user_id: UserId,
    pub title: String,
    pub event_date: i64,
    pub create_time: i64,
}

/// The role a node plays relative to the summary the graph was
/// requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphNodeKind {
    Summary,
    Parent,
    Child,
}

/// One node of a summary's link dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: SummaryId,
    pub name: String,
    pub kind: GraphNodeKind,
    pub children: Vec<GraphNode>,
}

/// An immutable historic snapshot entry (content + graph at a point in
/// time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricEntry {
    pub summary_id: SummaryId,
    pub timestamp: String,
}
