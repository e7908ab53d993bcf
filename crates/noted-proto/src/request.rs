//! Inbound request payloads, one variant per handler in the router's
//! dispatch table.

use serde::{Deserialize, Serialize};

use crate::change::ChangeBatch;
use crate::domain::{Event, PermissionKind};
use crate::ids::{EventId, SummaryId};

/// A decoded inbound request, ready for the router to dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub payload: RequestPayload,
}

/// Request payload variants. Every variant other than `Login` and
/// `Register` requires an authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestPayload {
    Login {
        username: String,
        password: String,
    },
    Register {
        username: String,
        password: String,
    },
    GetSummaries,
    GetSummary {
        summary_id: SummaryId,
    },
    GetSummaryLink {
        title: String,
    },
    Save {
        title: String,
        content: String,
        font: String,
    },
    UpdateDoc {
        batch: ChangeBatch,
    },
    ShareSummary {
        username: String,
        kind: PermissionKind,
    },
    GetGraph,
    GetHistoricList,
    LoadHistoric {
        timestamp: String,
    },
    HistoricGraph {
        timestamp: String,
    },
    AddEvent {
        title: String,
        event_date: i64,
    },
    GetEvents,
    DeleteEvent {
        event_id: EventId,
    },
    SaveEvents {
        events: Vec<Event>,
    },
    FileStart {
        name: String,
    },
    FileChunk {
        name: String,
        data_b64: String,
    },
    FileEnd {
        name: String,
    },
    GetFileContent {
        name: String,
    },
    Summarize {
        paragraph: String,
    },
    Export {
        content: String,
        ext: String,
    },
    ImportGcal,
    Exit,
}
