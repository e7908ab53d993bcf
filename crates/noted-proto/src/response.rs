//! Outbound response payloads, one variant per reply code in the
//! router's dispatch table.

use serde::{Deserialize, Serialize};

use crate::change::Change;
use crate::domain::{Event, GraphNode, HistoricEntry, Summary};
use crate::error_code::ErrorCode;
use crate::ids::{EventId, SummaryId};

/// A response to a single request, matched to it by the frame layer's
/// request/response ordering on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub payload: Result<ResponsePayload, ErrorCode>,
}

/// Response payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    LoginSuccess { upcoming_events: Vec<Event> },
    LoginFail,
    RegisterSuccess,
    RegisterFail,
    TakeSummaries { summaries: Vec<Summary> },
    TakeSummary { summary: Summary, content: String },
    TakeSummaryLink { summary_id: SummaryId },
    SaveSuccess { summary_id: SummaryId },
    ShareSuccess,
    TakeGraph { root: GraphNode },
    HistoricList { entries: Vec<HistoricEntry> },
    TakeHistoric { content: String },
    EventSuccess { event: Event },
    TakeEvents { events: Vec<Event> },
    DeleteSuccess { event_id: EventId },
    TakeUpdate {
        doc_content: String,
        cursors: Vec<(String, usize)>,
        selections: Vec<(String, (usize, usize))>,
        recent_changes: Vec<Change>,
    },
    FileContent { text: String },
    SummaryText { text: String },
    Exported { data_b64: String },
    GcalEvents { events: Vec<Event> },
    Subscribed,
    Closed,
}
