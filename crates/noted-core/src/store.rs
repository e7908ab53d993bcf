//! The `Store` contract: persistence for users, summaries, their
//! content files, permissions, links, events, and historic snapshots.
//! External to this crate — `noted-store-fs` provides one concrete
//! implementation; the doc engine and router depend only on this
//! trait object.

use async_trait::async_trait;
use noted_proto::{Event, EventId, GraphNode, HistoricEntry, PermissionKind, Summary, SummaryId, User, UserId};

use crate::error::Result;

/// Everything the router and doc engine need from durable storage.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_salt(&self, username: &str) -> Result<Option<[u8; 16]>>;
    async fn authenticate(&self, username: &str, password_hash: &str) -> Result<Option<User>>;
    async fn insert_user(&self, username: &str, password_hash: &str, salt: [u8; 16]) -> Result<User>;

    async fn insert_summary(
        &self,
        title: &str,
        content: &str,
        owner_id: UserId,
        font: &str,
    ) -> Result<SummaryId>;
    async fn save_summary(&self, summary_id: SummaryId, content: &str) -> Result<()>;
    async fn update_summary_meta(&self, summary_id: SummaryId, font: &str) -> Result<()>;
    async fn get_summary(&self, summary_id: SummaryId) -> Result<Option<Summary>>;
    async fn get_summary_content(&self, summary_id: SummaryId) -> Result<String>;
    async fn get_summary_by_link(&self, title: &str) -> Result<Option<Summary>>;
    async fn delete_summary(&self, summary_id: SummaryId) -> Result<()>;

    async fn share_summary(
        &self,
        summary_id: SummaryId,
        owner_id: UserId,
        target_user: &str,
        kind: PermissionKind,
    ) -> Result<()>;
    async fn update_permission(&self, summary_id: SummaryId, user_id: UserId, kind: PermissionKind) -> Result<()>;
    async fn can_access(&self, summary_id: SummaryId, user_id: UserId) -> Result<bool>;

    async fn get_all_by_user(&self, user_id: UserId) -> Result<Vec<Summary>>;
    async fn get_all_user_can_access(&self, user_id: UserId) -> Result<Vec<Summary>>;

    async fn insert_event(&self, user_id: UserId, title: &str, event_date: i64) -> Result<Event>;
    async fn get_events(&self, user_id: UserId) -> Result<Vec<Event>>;
    async fn get_upcoming_events(&self, user_id: UserId, within_days: i64) -> Result<Vec<Event>>;
    async fn delete_event(&self, event_id: EventId, user_id: UserId) -> Result<()>;

    async fn get_graph(&self, summary_id: SummaryId) -> Result<GraphNode>;

    async fn list_historic(&self, summary_id: SummaryId) -> Result<Vec<HistoricEntry>>;
    async fn load_historic(&self, summary_id: SummaryId, timestamp: &str) -> Result<String>;
    async fn load_historic_graph(&self, summary_id: SummaryId, timestamp: &str) -> Result<GraphNode>;
}
