//! Per-summary collaboration state: one entry per open document inside
//! a single actor, mirroring the shape this codebase already uses for
//! "one service owns every open resource behind a `HashMap`, reached
//! through a cloneable handle." Unlike that resource's single-writer
//! election, every subscriber here may submit changes concurrently;
//! this service merges them with operational transform (see `crate::ot`).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use noted_proto::{Change, ChangeBatch, Response, ResponsePayload, SessionId, SummaryId, UserId};
use ropey::Rope;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration};
use tracing::{info, warn};

use crate::error::{Result, ServerError};
use crate::ot;
use crate::services::sessions::SessionHandle;
use crate::store::Store;

/// Applied changes beyond this are dropped from the front of the ring.
const MAX_HISTORY_LENGTH: usize = 100;
/// How many of the most recent changes a broadcast carries.
const RECENT_CHANGES_LEN: usize = 5;
/// How often dirty open documents are flushed to the store.
const PERSIST_TICK_INTERVAL: Duration = Duration::from_secs(5);

struct Subscriber {
    user_id: UserId,
    session_id: SessionId,
    client_id: String,
}

struct OpenDoc {
    rope: Rope,
    subscribers: Vec<Subscriber>,
    cursors: HashMap<String, usize>,
    selections: HashMap<String, (usize, usize)>,
    history: VecDeque<Change>,
    dirty: bool,
}

impl OpenDoc {
    fn new(content: &str) -> Self {
        Self {
            rope: Rope::from_str(content),
            subscribers: Vec::new(),
            cursors: HashMap::new(),
            selections: HashMap::new(),
            history: VecDeque::new(),
            dirty: false,
        }
    }

    fn recent_changes(&self) -> Vec<Change> {
        self.history
            .iter()
            .rev()
            .take(RECENT_CHANGES_LEN)
            .rev()
            .cloned()
            .collect()
    }
}

enum DocCmd {
    Open {
        summary_id: SummaryId,
        user_id: UserId,
        session_id: SessionId,
        client_id: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Close {
        summary_id: SummaryId,
        session_id: SessionId,
        client_id: String,
    },
    Edit {
        summary_id: SummaryId,
        batch: ChangeBatch,
    },
    SessionLost {
        session_id: SessionId,
    },
    Snapshot {
        summary_id: SummaryId,
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Cloneable handle to the doc engine actor.
#[derive(Clone)]
pub struct DocEngineHandle {
    tx: mpsc::UnboundedSender<DocCmd>,
}

impl DocEngineHandle {
    /// Subscribes `(user_id, session_id, client_id)` to `summary_id`,
    /// loading it from the store on first open. Returns the current
    /// content.
    pub async fn open(
        &self,
        summary_id: SummaryId,
        user_id: UserId,
        session_id: SessionId,
        client_id: String,
    ) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DocCmd::Open {
                summary_id,
                user_id,
                session_id,
                client_id,
                reply,
            })
            .map_err(|_| ServerError::StorageFailure("doc engine gone".into()))?;
        rx.await.map_err(|_| ServerError::StorageFailure("doc engine dropped reply".into()))?
    }

    /// Unsubscribes a single client from a summary. Persists and reaps
    /// the document immediately if it was the last subscriber.
    pub fn close(&self, summary_id: SummaryId, session_id: SessionId, client_id: String) {
        let _ = self.tx.send(DocCmd::Close {
            summary_id,
            session_id,
            client_id,
        });
    }

    /// Enqueues a change batch for merge on the next drain.
    pub fn edit(&self, summary_id: SummaryId, batch: ChangeBatch) {
        let _ = self.tx.send(DocCmd::Edit { summary_id, batch });
    }

    /// Unsubscribes every client belonging to `session_id` from every
    /// open document.
    pub fn session_lost(&self, session_id: SessionId) {
        let _ = self.tx.send(DocCmd::SessionLost { session_id });
    }

    /// Returns the in-memory content of `summary_id` if it is open.
    pub async fn snapshot(&self, summary_id: SummaryId) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(DocCmd::Snapshot { summary_id, reply }).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }
}

/// Owner of every open summary's collaborative state.
pub struct DocEngineService {
    rx: mpsc::UnboundedReceiver<DocCmd>,
    docs: HashMap<SummaryId, OpenDoc>,
    store: Arc<dyn Store>,
    sessions: SessionHandle,
}

impl DocEngineService {
    /// Spawns the doc engine actor and returns a handle to it.
    #[must_use]
    pub fn start(store: Arc<dyn Store>, sessions: SessionHandle) -> DocEngineHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            rx,
            docs: HashMap::new(),
            store,
            sessions,
        };
        tokio::spawn(service.run());
        DocEngineHandle { tx }
    }

    async fn run(mut self) {
        let mut persist_tick = time::interval(PERSIST_TICK_INTERVAL);
        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    match cmd {
                        DocCmd::Edit { summary_id, batch } => {
                            let mut pending: HashMap<SummaryId, Vec<ChangeBatch>> = HashMap::new();
                            pending.entry(summary_id).or_default().push(batch);
                            // Drain any batches already queued so concurrent
                            // edits across clients merge in one pass.
                            while let Ok(next) = self.rx.try_recv() {
                                match next {
                                    DocCmd::Edit { summary_id, batch } => {
                                        pending.entry(summary_id).or_default().push(batch);
                                    }
                                    other => self.handle(other).await,
                                }
                            }
                            for (summary_id, batches) in pending {
                                self.merge_and_broadcast(summary_id, batches).await;
                            }
                        }
                        other => self.handle(other).await,
                    }
                }
                _ = persist_tick.tick() => {
                    self.persist_dirty().await;
                }
            }
        }
    }

    /// Flushes every dirty open document to the store. Runs on
    /// `persist_tick` so a long-lived document with active subscribers
    /// is not left unpersisted until its last subscriber leaves.
    async fn persist_dirty(&mut self) {
        let dirty: Vec<SummaryId> = self.docs.iter().filter(|(_, doc)| doc.dirty).map(|(id, _)| *id).collect();
        for summary_id in dirty {
            let Some(content) = self.docs.get(&summary_id).map(|doc| doc.rope.to_string()) else {
                continue;
            };
            match self.store.save_summary(summary_id, &content).await {
                Ok(()) => {
                    if let Some(doc) = self.docs.get_mut(&summary_id) {
                        doc.dirty = false;
                    }
                }
                Err(err) => warn!(?summary_id, %err, "failed to persist summary on tick"),
            }
        }
    }

    async fn handle(&mut self, cmd: DocCmd) {
        match cmd {
            DocCmd::Open {
                summary_id,
                user_id,
                session_id,
                client_id,
                reply,
            } => {
                let result = self.handle_open(summary_id, user_id, session_id, client_id).await;
                let _ = reply.send(result);
            }
            DocCmd::Close {
                summary_id,
                session_id,
                client_id,
            } => self.handle_close(summary_id, session_id, &client_id).await,
            DocCmd::SessionLost { session_id } => self.handle_session_lost(session_id).await,
            DocCmd::Snapshot { summary_id, reply } => {
                let content = self.docs.get(&summary_id).map(|d| d.rope.to_string());
                let _ = reply.send(content);
            }
            DocCmd::Edit { .. } => unreachable!("drained in run()"),
        }
    }

    async fn handle_open(
        &mut self,
        summary_id: SummaryId,
        user_id: UserId,
        session_id: SessionId,
        client_id: String,
    ) -> Result<String> {
        if !self.docs.contains_key(&summary_id) {
            let content = self.store.get_summary_content(summary_id).await?;
            self.docs.insert(summary_id, OpenDoc::new(&content));
            info!(?summary_id, "doc engine opened");
        }
        let doc = self.docs.get_mut(&summary_id).expect("just inserted");
        doc.subscribers.push(Subscriber {
            user_id,
            session_id,
            client_id,
        });
        Ok(doc.rope.to_string())
    }

    async fn handle_close(&mut self, summary_id: SummaryId, session_id: SessionId, client_id: &str) {
        let Some(doc) = self.docs.get_mut(&summary_id) else {
            return;
        };
        doc.subscribers
            .retain(|s| !(s.session_id == session_id && s.client_id == client_id));
        doc.cursors.remove(client_id);
        doc.selections.remove(client_id);
        if doc.subscribers.is_empty() {
            self.reap(summary_id).await;
        }
    }

    async fn handle_session_lost(&mut self, session_id: SessionId) {
        let affected: Vec<SummaryId> = self
            .docs
            .iter()
            .filter(|(_, doc)| doc.subscribers.iter().any(|s| s.session_id == session_id))
            .map(|(sid, _)| *sid)
            .collect();
        for summary_id in affected {
            if let Some(doc) = self.docs.get_mut(&summary_id) {
                doc.subscribers.retain(|s| s.session_id != session_id);
                if doc.subscribers.is_empty() {
                    self.reap(summary_id).await;
                }
            }
        }
    }

    /// Persists (if dirty) and removes `summary_id` from the open set.
    async fn reap(&mut self, summary_id: SummaryId) {
        if let Some(doc) = self.docs.get(&summary_id)
            && doc.dirty
        {
            let content = doc.rope.to_string();
            if let Err(err) = self.store.save_summary(summary_id, &content).await {
                warn!(?summary_id, %err, "failed to persist summary on reap");
            }
        }
        self.docs.remove(&summary_id);
        info!(?summary_id, "doc engine reaped");
    }

    async fn merge_and_broadcast(&mut self, summary_id: SummaryId, batches: Vec<ChangeBatch>) {
        let Some(doc) = self.docs.get_mut(&summary_id) else {
            return;
        };

        let mut changes: Vec<Change> = batches.into_iter().flat_map(|b| b.changes).collect();
        changes.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms).then_with(|| a.client_id.cmp(&b.client_id)));

        for mut change in changes {
            ot::clamp_to_document(&mut change, doc.rope.len_chars());
            for prior in &doc.history {
                ot::transform_change(&mut change, prior);
            }
            ot::clamp_to_document(&mut change, doc.rope.len_chars());
            ot::apply_change(&mut doc.rope, &change);

            for (client_id, cursor) in &mut doc.cursors {
                if client_id != &change.client_id {
                    *cursor = ot::transform_position(*cursor, &change);
                }
            }
            for (client_id, (start, end)) in &mut doc.selections {
                if client_id != &change.client_id {
                    *start = ot::transform_position(*start, &change);
                    *end = ot::transform_position(*end, &change);
                }
            }
            doc.cursors
                .insert(change.client_id.clone(), change.range.start + change.text.chars().count());

            doc.history.push_back(change);
            if doc.history.len() > MAX_HISTORY_LENGTH {
                doc.history.pop_front();
            }
        }
        doc.dirty = true;

        self.broadcast_update(summary_id).await;
    }

    async fn broadcast_update(&mut self, summary_id: SummaryId) {
        let Some(doc) = self.docs.get(&summary_id) else {
            return;
        };
        let doc_content = doc.rope.to_string();
        let recent_changes = doc.recent_changes();

        for subscriber in &doc.subscribers {
            let cursors: Vec<(String, usize)> = doc
                .cursors
                .iter()
                .filter(|(client_id, _)| *client_id != &subscriber.client_id)
                .map(|(c, p)| (c.clone(), *p))
                .collect();
            let selections: Vec<(String, (usize, usize))> = doc
                .selections
                .iter()
                .filter(|(client_id, _)| *client_id != &subscriber.client_id)
                .map(|(c, r)| (c.clone(), *r))
                .collect();

            let payload = Response {
                payload: Ok(ResponsePayload::TakeUpdate {
                    doc_content: doc_content.clone(),
                    cursors,
                    selections,
                    recent_changes: recent_changes.clone(),
                }),
            };
            self.sessions.send(subscriber.session_id, payload).await;
        }
    }
}
