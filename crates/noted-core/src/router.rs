//! Command dispatch: one async method per inbound request variant,
//! gated on an authenticated session. Shaped after this codebase's own
//! `call()`-style request dispatcher — `Login`/`Register` are
//! special-cased ahead of the auth gate, exactly like that dispatcher
//! special-cases `Subscribe`/`Ping` ahead of its own.

use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, Mutex as StdMutex};

use noted_proto::{
    ErrorCode, PermissionKind, RequestPayload, ResponsePayload, SessionId, SummaryId, UserId,
};

use crate::crypto;
use crate::error::{Result, ServerError};
use crate::external::{CalendarAdapter, Exporter, OcrEngine, Summarizer};
use crate::services::doc_engine::DocEngineHandle;
use crate::services::sessions::SessionHandle;
use crate::store::Store;

/// How many days ahead `LOGIN`'s bundled upcoming-events list covers.
const UPCOMING_EVENTS_DAYS: i64 = 14;

/// Services shared by every connection's router.
pub struct RouterContext {
    pub store: Arc<dyn Store>,
    pub doc_engine: DocEngineHandle,
    pub sessions: SessionHandle,
    pub pepper: Vec<u8>,
    pub ocr: Arc<dyn OcrEngine>,
    pub summarizer: Arc<dyn Summarizer>,
    pub exporter: Arc<dyn Exporter>,
    pub gcal: Arc<dyn CalendarAdapter>,
    /// One open upload handle per `(userId, filename)`, mirroring the
    /// original's `handlers_per_sock_per_path` map. `FILE` inserts,
    /// `CHUNK` writes through it, `END` removes (and so closes) it.
    file_handles: StdMutex<HashMap<(UserId, String), File>>,
}

impl RouterContext {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        doc_engine: DocEngineHandle,
        sessions: SessionHandle,
        pepper: Vec<u8>,
        ocr: Arc<dyn OcrEngine>,
        summarizer: Arc<dyn Summarizer>,
        exporter: Arc<dyn Exporter>,
        gcal: Arc<dyn CalendarAdapter>,
    ) -> Self {
        Self {
            store,
            doc_engine,
            sessions,
            pepper,
            ocr,
            summarizer,
            exporter,
            gcal,
            file_handles: StdMutex::new(HashMap::new()),
        }
    }
}

/// Per-connection dispatcher. Holds the mutable state a session
/// accumulates: its bound user and currently-open summary.
pub struct Router {
    ctx: Arc<RouterContext>,
    session_id: SessionId,
    client_id: String,
    user_id: Option<UserId>,
    bound_summary: Option<SummaryId>,
}

impl Router {
    #[must_use]
    pub fn new(ctx: Arc<RouterContext>, session_id: SessionId, client_id: String) -> Self {
        Self {
            ctx,
            session_id,
            client_id,
            user_id: None,
            bound_summary: None,
        }
    }

    /// Dispatches one decoded request, returning the wire-level result
    /// the frame layer translates into a success reply or
    /// `ERROR~<kind>`.
    pub async fn dispatch(&mut self, req: RequestPayload) -> std::result::Result<ResponsePayload, ErrorCode> {
        // Login and Register are available before authentication.
        match &req {
            RequestPayload::Login { username, password } => {
                return self.handle_login(username, password).await.map_err(|e| (&e).into());
            }
            RequestPayload::Register { username, password } => {
                return self.handle_register(username, password).await.map_err(|e| (&e).into());
            }
            _ => {}
        }

        let user_id = self.user_id.ok_or(ErrorCode::AuthRequired)?;

        self.handle_authenticated(user_id, req).await.map_err(|e| (&e).into())
    }

    async fn handle_authenticated(
        &mut self,
        user_id: UserId,
        req: RequestPayload,
    ) -> Result<ResponsePayload> {
        match req {
            RequestPayload::Login { .. } | RequestPayload::Register { .. } => unreachable!(),
            RequestPayload::GetSummaries => {
                let summaries = self.ctx.store.get_all_user_can_access(user_id).await?;
                Ok(ResponsePayload::TakeSummaries { summaries })
            }
            RequestPayload::GetSummary { summary_id } => self.handle_get_summary(user_id, summary_id).await,
            RequestPayload::GetSummaryLink { title } => {
                let summary = self
                    .ctx
                    .store
                    .get_summary_by_link(&title)
                    .await?
                    .ok_or_else(|| ServerError::NotFound(title.clone()))?;
                Ok(ResponsePayload::TakeSummaryLink { summary_id: summary.id })
            }
            RequestPayload::Save { title, content, font } => self.handle_save(user_id, &title, &content, &font).await,
            RequestPayload::UpdateDoc { batch } => self.handle_update_doc(batch).await,
            RequestPayload::ShareSummary { username, kind } => self.handle_share(user_id, &username, kind).await,
            RequestPayload::GetGraph => self.handle_get_graph().await,
            RequestPayload::GetHistoricList => self.handle_get_historic_list().await,
            RequestPayload::LoadHistoric { timestamp } => self.handle_load_historic(&timestamp).await,
            RequestPayload::HistoricGraph { timestamp } => self.handle_historic_graph(&timestamp).await,
            RequestPayload::AddEvent { title, event_date } => {
                let event = self.ctx.store.insert_event(user_id, &title, event_date).await?;
                Ok(ResponsePayload::EventSuccess { event })
            }
            RequestPayload::GetEvents => {
                let events = self.ctx.store.get_events(user_id).await?;
                Ok(ResponsePayload::TakeEvents { events })
            }
            RequestPayload::DeleteEvent { event_id } => {
                self.ctx.store.delete_event(event_id, user_id).await?;
                Ok(ResponsePayload::DeleteSuccess { event_id })
            }
            RequestPayload::SaveEvents { events } => {
                for event in events {
                    self.ctx.store.insert_event(event.user_id, &event.title, event.event_date).await?;
                }
                Ok(ResponsePayload::RegisterSuccess)
            }
            RequestPayload::FileStart { name } => self.handle_file_start(user_id, &name).await,
            RequestPayload::FileChunk { name, data_b64 } => self.handle_file_chunk(user_id, &name, &data_b64).await,
            RequestPayload::FileEnd { name } => self.handle_file_end(user_id, &name).await,
            RequestPayload::GetFileContent { name } => self.handle_get_file_content(user_id, &name).await,
            RequestPayload::Summarize { paragraph } => {
                let text = self.ctx.summarizer.summarize(&paragraph).await?;
                Ok(ResponsePayload::SummaryText { text })
            }
            RequestPayload::Export { content, ext } => {
                let bytes = self.ctx.exporter.export(&content, &ext).await?;
                Ok(ResponsePayload::Exported {
                    data_b64: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
                })
            }
            RequestPayload::ImportGcal => {
                let events = self.ctx.gcal.list_upcoming("").await?;
                Ok(ResponsePayload::GcalEvents { events })
            }
            RequestPayload::Exit => {
                self.unbind_current_summary().await;
                Ok(ResponsePayload::Closed)
            }
        }
    }

    async fn handle_login(&mut self, username: &str, password: &str) -> Result<ResponsePayload> {
        let Some(salt) = self.ctx.store.get_salt(username).await? else {
            return Ok(ResponsePayload::LoginFail);
        };
        let hash = crypto::hash_password(password, &salt, &self.ctx.pepper);
        let Some(user) = self.ctx.store.authenticate(username, &hash).await? else {
            return Ok(ResponsePayload::LoginFail);
        };
        self.user_id = Some(user.id);
        let upcoming_events = self.ctx.store.get_upcoming_events(user.id, UPCOMING_EVENTS_DAYS).await?;
        Ok(ResponsePayload::LoginSuccess { upcoming_events })
    }

    async fn handle_register(&mut self, username: &str, password: &str) -> Result<ResponsePayload> {
        if self.ctx.store.get_salt(username).await?.is_some() {
            return Ok(ResponsePayload::RegisterFail);
        }
        let salt: [u8; 16] = crypto::random_bytes(16).try_into().expect("16 bytes");
        let hash = crypto::hash_password(password, &salt, &self.ctx.pepper);
        self.ctx.store.insert_user(username, &hash, salt).await?;
        Ok(ResponsePayload::RegisterSuccess)
    }

    async fn handle_get_summary(&mut self, user_id: UserId, summary_id: SummaryId) -> Result<ResponsePayload> {
        if !self.ctx.store.can_access(summary_id, user_id).await? {
            return Err(ServerError::PermissionDenied(format!("summary {}", summary_id.0)));
        }
        let summary = self
            .ctx
            .store
            .get_summary(summary_id)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("summary {}", summary_id.0)))?;

        self.unbind_current_summary().await;
        let content = self
            .ctx
            .doc_engine
            .open(summary_id, user_id, self.session_id, self.client_id.clone())
            .await?;
        self.bound_summary = Some(summary_id);

        Ok(ResponsePayload::TakeSummary { summary, content })
    }

    async fn handle_save(&mut self, user_id: UserId, title: &str, content: &str, font: &str) -> Result<ResponsePayload> {
        if title.is_empty() {
            let summary_id = self
                .bound_summary
                .ok_or_else(|| ServerError::BadInput("no bound summary to save".into()))?;
            self.ctx.store.save_summary(summary_id, content).await?;
            self.ctx.store.update_summary_meta(summary_id, font).await?;
            Ok(ResponsePayload::SaveSuccess { summary_id })
        } else {
            let summary_id = self.ctx.store.insert_summary(title, content, user_id, font).await?;
            Ok(ResponsePayload::SaveSuccess { summary_id })
        }
    }

    async fn handle_update_doc(&mut self, batch: noted_proto::ChangeBatch) -> Result<ResponsePayload> {
        let summary_id = self
            .bound_summary
            .ok_or_else(|| ServerError::BadInput("no bound summary open".into()))?;
        self.ctx.doc_engine.edit(summary_id, batch);
        Ok(ResponsePayload::Subscribed)
    }

    async fn handle_share(&mut self, user_id: UserId, username: &str, kind: PermissionKind) -> Result<ResponsePayload> {
        let summary_id = self
            .bound_summary
            .ok_or_else(|| ServerError::BadInput("no bound summary to share".into()))?;
        self.ctx.store.share_summary(summary_id, user_id, username, kind).await?;
        Ok(ResponsePayload::ShareSuccess)
    }

    async fn handle_get_graph(&mut self) -> Result<ResponsePayload> {
        let summary_id = self
            .bound_summary
            .ok_or_else(|| ServerError::BadInput("no bound summary".into()))?;
        let root = self.ctx.store.get_graph(summary_id).await?;
        Ok(ResponsePayload::TakeGraph { root })
    }

    async fn handle_get_historic_list(&mut self) -> Result<ResponsePayload> {
        let summary_id = self
            .bound_summary
            .ok_or_else(|| ServerError::BadInput("no bound summary".into()))?;
        let entries = self.ctx.store.list_historic(summary_id).await?;
        Ok(ResponsePayload::HistoricList { entries })
    }

    async fn handle_load_historic(&mut self, timestamp: &str) -> Result<ResponsePayload> {
        let summary_id = self
            .bound_summary
            .ok_or_else(|| ServerError::BadInput("no bound summary".into()))?;
        let content = self.ctx.store.load_historic(summary_id, timestamp).await?;
        self.unbind_current_summary().await;
        Ok(ResponsePayload::TakeHistoric { content })
    }

    async fn handle_historic_graph(&mut self, timestamp: &str) -> Result<ResponsePayload> {
        let summary_id = self
            .bound_summary
            .ok_or_else(|| ServerError::BadInput("no bound summary".into()))?;
        let root = self.ctx.store.load_historic_graph(summary_id, timestamp).await?;
        Ok(ResponsePayload::TakeGraph { root })
    }

    async fn handle_file_start(&mut self, user_id: UserId, name: &str) -> Result<ResponsePayload> {
        let dir = upload_dir(user_id);
        std::fs::create_dir_all(&dir)?;
        let key = (user_id, name.to_string());
        let mut handles = self.ctx.file_handles.lock().unwrap();
        if handles.contains_key(&key) {
            return Err(ServerError::BadInput(format!("file already open: {name}")));
        }
        let file = std::fs::OpenOptions::new().create(true).write(true).truncate(true).open(dir.join(name))?;
        handles.insert(key, file);
        Ok(ResponsePayload::Subscribed)
    }

    async fn handle_file_chunk(&mut self, user_id: UserId, name: &str, data_b64: &str) -> Result<ResponsePayload> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data_b64)
            .map_err(|e| ServerError::BadInput(format!("bad base64 chunk: {e}")))?;
        use std::io::Write;
        let key = (user_id, name.to_string());
        let mut handles = self.ctx.file_handles.lock().unwrap();
        let file = handles.get_mut(&key).ok_or_else(|| ServerError::BadInput(format!("no file opened: {name}")))?;
        file.write_all(&bytes)?;
        Ok(ResponsePayload::Subscribed)
    }

    async fn handle_file_end(&mut self, user_id: UserId, name: &str) -> Result<ResponsePayload> {
        let key = (user_id, name.to_string());
        let mut handles = self.ctx.file_handles.lock().unwrap();
        handles
            .remove(&key)
            .ok_or_else(|| ServerError::BadInput(format!("no file opened: {name}")))?;
        Ok(ResponsePayload::Subscribed)
    }

    async fn handle_get_file_content(&mut self, user_id: UserId, name: &str) -> Result<ResponsePayload> {
        let path = upload_dir(user_id).join(name);
        let bytes = std::fs::read(&path)?;
        let text = self.ctx.ocr.extract_text(&bytes).await?;
        Ok(ResponsePayload::FileContent { text })
    }

    async fn unbind_current_summary(&mut self) {
        if let Some(summary_id) = self.bound_summary.take() {
            self.ctx.doc_engine.close(summary_id, self.session_id, self.client_id.clone());
        }
    }
}

fn upload_dir(user_id: UserId) -> std::path::PathBuf {
    std::path::PathBuf::from("data").join(user_id.0.to_string()).join("tmp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::Unconfigured;
    use crate::services::doc_engine::DocEngineService;
    use crate::services::sessions::SessionService;
    use noted_proto::{Summary, User};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct MemStore {
        users: StdMutex<HashMap<String, User>>,
        summaries: StdMutex<HashMap<u64, (Summary, String)>>,
        next_id: StdMutex<u64>,
    }

    impl MemStore {
        fn new() -> Self {
            Self {
                users: StdMutex::new(HashMap::new()),
                summaries: StdMutex::new(HashMap::new()),
                next_id: StdMutex::new(1),
            }
        }
    }

    #[async_trait::async_trait]
    impl Store for MemStore {
        async fn get_salt(&self, username: &str) -> Result<Option<[u8; 16]>> {
            Ok(self.users.lock().unwrap().get(username).map(|u| u.salt))
        }
        async fn authenticate(&self, username: &str, password_hash: &str) -> Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .get(username)
                .filter(|u| u.password_hash == password_hash)
                .cloned())
        }
        async fn insert_user(&self, username: &str, password_hash: &str, salt: [u8; 16]) -> Result<User> {
            let mut next = self.next_id.lock().unwrap();
            let id = noted_proto::UserId(*next);
            *next += 1;
            let user = User {
                id,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                salt,
                is_public: false,
                create_time: 0,
            };
            self.users.lock().unwrap().insert(username.to_string(), user.clone());
            Ok(user)
        }
        async fn insert_summary(&self, title: &str, content: &str, owner_id: UserId, font: &str) -> Result<SummaryId> {
            let mut next = self.next_id.lock().unwrap();
            let id = SummaryId(*next);
            *next += 1;
            let summary = Summary {
                id,
                owner_id,
                share_link: title.to_string(),
                path: format!("data/{}.md", id.0),
                font: font.to_string(),
                create_time: 0,
                update_time: 0,
            };
            self.summaries.lock().unwrap().insert(id.0, (summary, content.to_string()));
            Ok(id)
        }
        async fn save_summary(&self, summary_id: SummaryId, content: &str) -> Result<()> {
            if let Some((_, c)) = self.summaries.lock().unwrap().get_mut(&summary_id.0) {
                *c = content.to_string();
            }
            Ok(())
        }
        async fn update_summary_meta(&self, summary_id: SummaryId, font: &str) -> Result<()> {
            if let Some((s, _)) = self.summaries.lock().unwrap().get_mut(&summary_id.0) {
                s.font = font.to_string();
            }
            Ok(())
        }
        async fn get_summary(&self, summary_id: SummaryId) -> Result<Option<Summary>> {
            Ok(self.summaries.lock().unwrap().get(&summary_id.0).map(|(s, _)| s.clone()))
        }
        async fn get_summary_content(&self, summary_id: SummaryId) -> Result<String> {
            Ok(self
                .summaries
                .lock()
                .unwrap()
                .get(&summary_id.0)
                .map(|(_, c)| c.clone())
                .unwrap_or_default())
        }
        async fn get_summary_by_link(&self, title: &str) -> Result<Option<Summary>> {
            Ok(self
                .summaries
                .lock()
                .unwrap()
                .values()
                .find(|(s, _)| s.share_link.eq_ignore_ascii_case(title))
                .map(|(s, _)| s.clone()))
        }
        async fn delete_summary(&self, summary_id: SummaryId) -> Result<()> {
            self.summaries.lock().unwrap().remove(&summary_id.0);
            Ok(())
        }
        async fn share_summary(&self, _s: SummaryId, _o: UserId, _t: &str, _k: PermissionKind) -> Result<()> {
            Ok(())
        }
        async fn update_permission(&self, _s: SummaryId, _u: UserId, _k: PermissionKind) -> Result<()> {
            Ok(())
        }
        async fn can_access(&self, summary_id: SummaryId, user_id: UserId) -> Result<bool> {
            Ok(self
                .summaries
                .lock()
                .unwrap()
                .get(&summary_id.0)
                .map(|(s, _)| s.owner_id == user_id)
                .unwrap_or(false))
        }
        async fn get_all_by_user(&self, user_id: UserId) -> Result<Vec<Summary>> {
            Ok(self
                .summaries
                .lock()
                .unwrap()
                .values()
                .filter(|(s, _)| s.owner_id == user_id)
                .map(|(s, _)| s.clone())
                .collect())
        }
        async fn get_all_user_can_access(&self, user_id: UserId) -> Result<Vec<Summary>> {
            self.get_all_by_user(user_id).await
        }
        async fn insert_event(&self, user_id: UserId, title: &str, event_date: i64) -> Result<noted_proto::Event> {
            Ok(noted_proto::Event {
                id: noted_proto::EventId(1),
                user_id,
                title: title.to_string(),
                event_date,
                create_time: 0,
            })
        }
        async fn get_events(&self, _user_id: UserId) -> Result<Vec<noted_proto::Event>> {
            Ok(vec![])
        }
        async fn get_upcoming_events(&self, _user_id: UserId, _within_days: i64) -> Result<Vec<noted_proto::Event>> {
            Ok(vec![])
        }
        async fn delete_event(&self, _event_id: noted_proto::EventId, _user_id: UserId) -> Result<()> {
            Ok(())
        }
        async fn get_graph(&self, summary_id: SummaryId) -> Result<noted_proto::GraphNode> {
            Ok(noted_proto::GraphNode {
                id: summary_id,
                name: String::new(),
                kind: noted_proto::GraphNodeKind::Summary,
                children: vec![],
            })
        }
        async fn list_historic(&self, _summary_id: SummaryId) -> Result<Vec<noted_proto::HistoricEntry>> {
            Ok(vec![])
        }
        async fn load_historic(&self, _summary_id: SummaryId, _timestamp: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn load_historic_graph(&self, summary_id: SummaryId, _timestamp: &str) -> Result<noted_proto::GraphNode> {
            self.get_graph(summary_id).await
        }
    }

    fn ctx() -> Arc<RouterContext> {
        let sessions = SessionService::start();
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let doc_engine = DocEngineService::start(store.clone(), sessions.clone());
        Arc::new(RouterContext::new(
            store,
            doc_engine,
            sessions,
            b"pepper".to_vec(),
            Arc::new(Unconfigured),
            Arc::new(Unconfigured),
            Arc::new(Unconfigured),
            Arc::new(Unconfigured),
        ))
    }

    #[tokio::test]
    async fn unauthenticated_handler_returns_auth_required() {
        let mut router = Router::new(ctx(), SessionId(1), "c1".into());
        let result = router.dispatch(RequestPayload::GetSummaries).await;
        assert_eq!(result.unwrap_err(), ErrorCode::AuthRequired);
    }

    #[tokio::test]
    async fn register_then_login_succeeds() {
        let ctx = ctx();
        let mut router = Router::new(ctx.clone(), SessionId(1), "c1".into());
        let reg = router
            .dispatch(RequestPayload::Register {
                username: "alice".into(),
                password: "hunter2".into(),
            })
            .await
            .unwrap();
        assert!(matches!(reg, ResponsePayload::RegisterSuccess));

        let login = router
            .dispatch(RequestPayload::Login {
                username: "alice".into(),
                password: "hunter2".into(),
            })
            .await
            .unwrap();
        assert!(matches!(login, ResponsePayload::LoginSuccess { .. }));
    }

    #[tokio::test]
    async fn login_with_wrong_password_fails_without_mutating_state() {
        let ctx = ctx();
        let mut router = Router::new(ctx.clone(), SessionId(1), "c1".into());
        router
            .dispatch(RequestPayload::Register {
                username: "bob".into(),
                password: "correct".into(),
            })
            .await
            .unwrap();

        let login = router
            .dispatch(RequestPayload::Login {
                username: "bob".into(),
                password: "wrong".into(),
            })
            .await
            .unwrap();
        assert!(matches!(login, ResponsePayload::LoginFail));
        assert!(router.user_id.is_none());
    }
}
