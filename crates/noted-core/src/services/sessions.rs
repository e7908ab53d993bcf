//! Session registry: one actor owning every connected session's
//! outbound sink, reached by every `DocEngine` and the router so they
//! can deliver a frame to a subscriber by id without holding a direct
//! reference to its socket.

use std::collections::HashMap;

use noted_proto::{Response, SessionId};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// A logical response or broadcast event, still unencrypted. The
/// owning session's writer task serializes, seals, and frames it —
/// the registry and its callers (the router, the doc engine) never
/// see a session's AES key.
pub type OutboundPayload = Response;

/// The sending half a session's writer task polls for outbound
/// messages.
pub type SessionSink = mpsc::UnboundedSender<OutboundPayload>;

enum SessionCmd {
    Register {
        session_id: SessionId,
        sink: SessionSink,
    },
    Unregister {
        session_id: SessionId,
    },
    Send {
        session_id: SessionId,
        payload: OutboundPayload,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        session_ids: Vec<SessionId>,
        payload: OutboundPayload,
    },
}

/// Cloneable handle to the session registry actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCmd>,
}

impl SessionHandle {
    /// Registers `session_id`'s outbound sink, replacing any prior one.
    pub fn register(&self, session_id: SessionId, sink: SessionSink) {
        let _ = self.tx.send(SessionCmd::Register { session_id, sink });
    }

    /// Removes `session_id` from the registry.
    pub fn unregister(&self, session_id: SessionId) {
        let _ = self.tx.send(SessionCmd::Unregister { session_id });
    }

    /// Delivers `payload` to `session_id`. Returns `false` if the
    /// session is unknown or its sink has closed (and was dropped).
    pub async fn send(&self, session_id: SessionId, payload: OutboundPayload) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(SessionCmd::Send {
                session_id,
                payload,
                reply,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Delivers the same payload to every session in `session_ids`,
    /// dropping silently any that have gone away.
    pub fn broadcast(&self, session_ids: Vec<SessionId>, payload: OutboundPayload) {
        let _ = self.tx.send(SessionCmd::Broadcast {
            session_ids,
            payload,
        });
    }
}

/// Owner of the session-id -> sink map.
pub struct SessionService {
    rx: mpsc::UnboundedReceiver<SessionCmd>,
    sinks: HashMap<SessionId, SessionSink>,
}

impl SessionService {
    /// Spawns the registry actor and returns a handle to it.
    #[must_use]
    pub fn start() -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            rx,
            sinks: HashMap::new(),
        };
        tokio::spawn(service.run());
        SessionHandle { tx }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                SessionCmd::Register { session_id, sink } => {
                    self.sinks.insert(session_id, sink);
                }
                SessionCmd::Unregister { session_id } => {
                    self.sinks.remove(&session_id);
                }
                SessionCmd::Send {
                    session_id,
                    payload,
                    reply,
                } => {
                    let ok = self.do_send(session_id, payload);
                    let _ = reply.send(ok);
                }
                SessionCmd::Broadcast {
                    session_ids,
                    payload,
                } => {
                    for session_id in session_ids {
                        self.do_send(session_id, payload.clone());
                    }
                }
            }
        }
    }

    /// Sends `payload` to `session_id`'s sink, dropping the entry if
    /// the sink has closed.
    fn do_send(&mut self, session_id: SessionId, payload: OutboundPayload) -> bool {
        let Some(sink) = self.sinks.get(&session_id) else {
            return false;
        };
        if sink.send(payload).is_err() {
            warn!(?session_id, "dropping dead session sink");
            self.sinks.remove(&session_id);
            return false;
        }
        true
    }
}
