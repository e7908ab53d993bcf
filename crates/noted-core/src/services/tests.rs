//! Actor-level tests, built around small async helpers that spin up a
//! service and drive it through its public handle — following this
//! codebase's own `services::tests` layout.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use noted_proto::{
    Change, ChangeBatch, ChangeId, ChangeOp, Event, EventId, GraphNode, GraphNodeKind,
    HistoricEntry, PermissionKind, Range, SessionId, Summary, SummaryId, User, UserId,
};

use crate::error::Result;
use crate::services::doc_engine::DocEngineService;
use crate::services::sessions::SessionService;
use crate::store::Store;

struct FixtureStore {
    content: StdMutex<HashMap<u64, String>>,
    saved: StdMutex<Vec<(u64, String)>>,
}

impl FixtureStore {
    fn new(initial: &str) -> Self {
        let mut content = HashMap::new();
        content.insert(1, initial.to_string());
        Self {
            content: StdMutex::new(content),
            saved: StdMutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Store for FixtureStore {
    async fn get_salt(&self, _username: &str) -> Result<Option<[u8; 16]>> {
        Ok(None)
    }
    async fn authenticate(&self, _username: &str, _password_hash: &str) -> Result<Option<User>> {
        Ok(None)
    }
    async fn insert_user(&self, _username: &str, _password_hash: &str, _salt: [u8; 16]) -> Result<User> {
        unimplemented!()
    }
    async fn insert_summary(&self, _title: &str, _content: &str, _owner_id: UserId, _font: &str) -> Result<SummaryId> {
        unimplemented!()
    }
    async fn save_summary(&self, summary_id: SummaryId, content: &str) -> Result<()> {
        self.content.lock().unwrap().insert(summary_id.0, content.to_string());
        self.saved.lock().unwrap().push((summary_id.0, content.to_string()));
        Ok(())
    }
    async fn update_summary_meta(&self, _summary_id: SummaryId, _font: &str) -> Result<()> {
        Ok(())
    }
    async fn get_summary(&self, _summary_id: SummaryId) -> Result<Option<Summary>> {
        Ok(None)
    }
    async fn get_summary_content(&self, summary_id: SummaryId) -> Result<String> {
        Ok(self.content.lock().unwrap().get(&summary_id.0).cloned().unwrap_or_default())
    }
    async fn get_summary_by_link(&self, _title: &str) -> Result<Option<Summary>> {
        Ok(None)
    }
    async fn delete_summary(&self, _summary_id: SummaryId) -> Result<()> {
        Ok(())
    }
    async fn share_summary(&self, _s: SummaryId, _o: UserId, _t: &str, _k: PermissionKind) -> Result<()> {
        Ok(())
    }
    async fn update_permission(&self, _s: SummaryId, _u: UserId, _k: PermissionKind) -> Result<()> {
        Ok(())
    }
    async fn can_access(&self, _summary_id: SummaryId, _user_id: UserId) -> Result<bool> {
        Ok(true)
    }
    async fn get_all_by_user(&self, _user_id: UserId) -> Result<Vec<Summary>> {
        Ok(vec![])
    }
    async fn get_all_user_can_access(&self, _user_id: UserId) -> Result<Vec<Summary>> {
        Ok(vec![])
    }
    async fn insert_event(&self, user_id: UserId, title: &str, event_date: i64) -> Result<Event> {
        Ok(Event { id: EventId(1), user_id, title: title.to_string(), event_date, create_time: 0 })
    }
    async fn get_events(&self, _user_id: UserId) -> Result<Vec<Event>> {
        Ok(vec![])
    }
    async fn get_upcoming_events(&self, _user_id: UserId, _within_days: i64) -> Result<Vec<Event>> {
        Ok(vec![])
    }
    async fn delete_event(&self, _event_id: EventId, _user_id: UserId) -> Result<()> {
        Ok(())
    }
    async fn get_graph(&self, summary_id: SummaryId) -> Result<GraphNode> {
        Ok(GraphNode { id: summary_id, name: String::new(), kind: GraphNodeKind::Summary, children: vec![] })
    }
    async fn list_historic(&self, _summary_id: SummaryId) -> Result<Vec<HistoricEntry>> {
        Ok(vec![])
    }
    async fn load_historic(&self, _summary_id: SummaryId, _timestamp: &str) -> Result<String> {
        Ok(String::new())
    }
    async fn load_historic_graph(&self, summary_id: SummaryId, _timestamp: &str) -> Result<GraphNode> {
        self.get_graph(summary_id).await
    }
}

fn insert_change(client_id: &str, start: usize, end: usize, text: &str, ts: i64) -> Change {
    Change {
        range: Range::new(start, end),
        op: if text.is_empty() { ChangeOp::Delete } else if start == end { ChangeOp::Insert } else { ChangeOp::Update },
        text: text.to_string(),
        client_id: client_id.to_string(),
        user_id: UserId(1),
        timestamp_ms: ts,
        change_id: ChangeId(ts as u128),
    }
}

#[tokio::test]
async fn doc_engine_reaps_and_persists_on_last_close() {
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(FixtureStore::new("hello"));
    let sessions = SessionService::start();
    let docs = DocEngineService::start(store.clone(), sessions);

    let summary_id = SummaryId(1);
    let content = docs.open(summary_id, UserId(1), SessionId(1), "c1".into()).await.unwrap();
    assert_eq!(content, "hello");

    docs.edit(
        summary_id,
        ChangeBatch { client_id: "c1".into(), changes: vec![insert_change("c1", 5, 5, " world", 1)] },
    );
    // Give the actor a moment to drain and merge.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(docs.snapshot(summary_id).await.as_deref(), Some("hello world"));

    docs.close(summary_id, SessionId(1), "c1".into());
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(docs.snapshot(summary_id).await, None);
}

#[tokio::test]
async fn session_lost_unsubscribes_from_every_open_document() {
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(FixtureStore::new("x"));
    let sessions = SessionService::start();
    let docs = DocEngineService::start(store, sessions);

    let summary_id = SummaryId(1);
    docs.open(summary_id, UserId(1), SessionId(7), "only-client".into()).await.unwrap();
    assert!(docs.snapshot(summary_id).await.is_some());

    docs.session_lost(SessionId(7));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(docs.snapshot(summary_id).await, None);
}

#[tokio::test]
async fn concurrent_batches_merge_in_timestamp_order() {
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(FixtureStore::new("hello"));
    let sessions = SessionService::start();
    let docs = DocEngineService::start(store, sessions);

    let summary_id = SummaryId(1);
    docs.open(summary_id, UserId(1), SessionId(1), "a".into()).await.unwrap();
    docs.open(summary_id, UserId(2), SessionId(2), "b".into()).await.unwrap();

    docs.edit(summary_id, ChangeBatch { client_id: "a".into(), changes: vec![insert_change("a", 5, 5, " world", 1)] });
    docs.edit(summary_id, ChangeBatch { client_id: "b".into(), changes: vec![insert_change("b", 0, 0, "X", 2)] });

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(docs.snapshot(summary_id).await.as_deref(), Some("Xhello world"));
}
