//! Core of the collaborative note server: crypto and framing, the
//! session registry, the request router, the OT-merging doc engine,
//! the `Store` contract, and the supervisor that wires them together.
//!
//! # Purpose
//!
//! This crate implements everything a single server process needs to
//! authenticate clients, terminate an encrypted session, multiplex
//! per-document edit streams, merge concurrent edits, and broadcast
//! the result — independent of any particular persistence backend
//! (`noted-store-fs` provides one) or any particular binary
//! entrypoint (`noted-server` provides one).
//!
//! # Mental model
//!
//! One task per connection (`session`), one actor owning every
//! connected session's outbound sink (`services::sessions`), one
//! actor owning every open document's collaborative state
//! (`services::doc_engine`), and a per-connection dispatcher
//! (`router`) that ties a decoded request to the right service call.
//!
//! # Key types
//!
//! | Type | Role |
//! | --- | --- |
//! | [`supervisor::Supervisor`] | Accepts connections, owns shared service handles. |
//! | [`services::sessions::SessionHandle`] | Delivers a response/broadcast to a session by id. |
//! | [`services::doc_engine::DocEngineHandle`] | Owns OT-merged state for every open summary. |
//! | [`router::Router`] | Per-connection request dispatch and auth gate. |
//! | [`store::Store`] | Persistence contract, implemented externally. |
//!
//! # Concurrency & ordering
//!
//! Services are single-threaded actors reached over unbounded mpsc
//! channels; ordering within a service is FIFO by channel arrival.
//! The doc engine additionally stable-sorts a drained batch of edits
//! by `(timestamp, client_id)` before merging, so cross-client
//! ordering is deterministic even when two edits arrive on the same
//! tick.

pub mod crypto;
pub mod error;
pub mod external;
pub mod frame;
pub mod ot;
pub mod router;
pub mod services;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod wire_convert;
