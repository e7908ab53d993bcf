//! Wire and domain types shared between the server's core and its store.

mod change;
mod domain;
mod error_code;
mod ids;
mod request;
mod response;

pub use change::{Change, ChangeBatch, ChangeOp, Range};
pub use domain::{
    Event, GraphNode, GraphNodeKind, HistoricEntry, Link, Permission, PermissionKind, Summary,
    User,
};
pub use error_code::ErrorCode;
pub use ids::{ChangeId, EventId, SessionId, SummaryId, UserId};
pub use request::{Request, RequestPayload};
pub use response::{Response, ResponsePayload};
