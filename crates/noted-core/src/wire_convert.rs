//! Translates between the bespoke `CODE~p1~p2~…` text envelope and the
//! typed [`RequestPayload`]/[`ResponsePayload`] enums the router and
//! doc engine actually operate on. Structured fields (events, change
//! batches, graphs) are JSON-encoded then base64'd into a single
//! parameter, per the documented decision to treat every
//! previously-pickled payload as structured JSON.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use noted_proto::{
    ChangeBatch, Event, EventId, PermissionKind, RequestPayload, ResponsePayload, SummaryId,
};

use crate::error::{Result, ServerError};

fn json_param<T: serde::Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(BASE64.encode(json))
}

fn json_from_param<T: serde::de::DeserializeOwned>(param: &str) -> Result<T> {
    let bytes = BASE64
        .decode(param)
        .map_err(|e| ServerError::BadInput(format!("bad base64 param: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Decodes an inner `CODE` plus its `~`-split parameters into a typed
/// request. Unknown codes are `BadInput`, translated by the router
/// into `ERROR~UNHANDLED`.
pub fn decode_request(code: &str, params: &[&str]) -> Result<RequestPayload> {
    let bad = |msg: &str| ServerError::BadInput(format!("{code}: {msg}"));
    Ok(match code {
        "LOGIN" => {
            let [username, password] = *params else {
                return Err(bad("expected username, password"));
            };
            RequestPayload::Login {
                username: username.to_string(),
                password: password.to_string(),
            }
        }
        "REGISTER" => {
            let [username, password] = *params else {
                return Err(bad("expected username, password"));
            };
            RequestPayload::Register {
                username: username.to_string(),
                password: password.to_string(),
            }
        }
        "GETSUMMARIES" => RequestPayload::GetSummaries,
        "GETSUMMARY" => {
            let [sid] = *params else {
                return Err(bad("expected summary id"));
            };
            RequestPayload::GetSummary {
                summary_id: parse_summary_id(sid)?,
            }
        }
        "GETSUMMARYLINK" => {
            let [title] = *params else {
                return Err(bad("expected title"));
            };
            RequestPayload::GetSummaryLink {
                title: title.to_string(),
            }
        }
        "SAVE" => {
            let [title, content, font] = *params else {
                return Err(bad("expected title, content, font"));
            };
            RequestPayload::Save {
                title: title.to_string(),
                content: content.to_string(),
                font: font.to_string(),
            }
        }
        "UPDATEDOC" => {
            let [batch] = *params else {
                return Err(bad("expected change batch"));
            };
            RequestPayload::UpdateDoc {
                batch: json_from_param::<ChangeBatch>(batch)?,
            }
        }
        "SHARESUMMARY" => {
            let [username, kind] = *params else {
                return Err(bad("expected username, kind"));
            };
            RequestPayload::ShareSummary {
                username: username.to_string(),
                kind: parse_permission_kind(kind)?,
            }
        }
        "GETGRAPH" => RequestPayload::GetGraph,
        "GETHISTORICLIST" => RequestPayload::GetHistoricList,
        "LOADHISTORIC" => {
            let [ts] = *params else {
                return Err(bad("expected timestamp"));
            };
            RequestPayload::LoadHistoric {
                timestamp: ts.to_string(),
            }
        }
        "HISTORICGRAPH" => {
            let [ts] = *params else {
                return Err(bad("expected timestamp"));
            };
            RequestPayload::HistoricGraph {
                timestamp: ts.to_string(),
            }
        }
        "ADDEVENT" => {
            let [title, date] = *params else {
                return Err(bad("expected title, date"));
            };
            RequestPayload::AddEvent {
                title: title.to_string(),
                event_date: date.parse().map_err(|_| bad("bad date"))?,
            }
        }
        "GETEVENTS" => RequestPayload::GetEvents,
        "DELETEEVENT" => {
            let [id] = *params else {
                return Err(bad("expected event id"));
            };
            RequestPayload::DeleteEvent {
                event_id: EventId(id.parse().map_err(|_| bad("bad event id"))?),
            }
        }
        "SAVE_EVENTS" => {
            let [events] = *params else {
                return Err(bad("expected events"));
            };
            RequestPayload::SaveEvents {
                events: json_from_param::<Vec<Event>>(events)?,
            }
        }
        "FILE" => {
            let [name] = *params else {
                return Err(bad("expected name"));
            };
            reject_unsafe_name(name)?;
            RequestPayload::FileStart {
                name: name.to_string(),
            }
        }
        "CHUNK" => {
            let [name, data] = *params else {
                return Err(bad("expected name, data"));
            };
            reject_unsafe_name(name)?;
            RequestPayload::FileChunk {
                name: name.to_string(),
                data_b64: data.to_string(),
            }
        }
        "END" => {
            let [name] = *params else {
                return Err(bad("expected name"));
            };
            reject_unsafe_name(name)?;
            RequestPayload::FileEnd {
                name: name.to_string(),
            }
        }
        "GETFILECONTENT" => {
            let [name] = *params else {
                return Err(bad("expected name"));
            };
            reject_unsafe_name(name)?;
            RequestPayload::GetFileContent {
                name: name.to_string(),
            }
        }
        "SUMMARIZE" => {
            let [paragraph] = *params else {
                return Err(bad("expected paragraph"));
            };
            RequestPayload::Summarize {
                paragraph: paragraph.to_string(),
            }
        }
        "EXPORT" => {
            let [content, ext] = *params else {
                return Err(bad("expected content, ext"));
            };
            RequestPayload::Export {
                content: content.to_string(),
                ext: ext.to_string(),
            }
        }
        "IMPORT_GCAL" => RequestPayload::ImportGcal,
        "EXIT" => RequestPayload::Exit,
        other => return Err(ServerError::BadInput(format!("unhandled code: {other}"))),
    })
}

fn parse_summary_id(raw: &str) -> Result<SummaryId> {
    Ok(SummaryId(raw.parse().map_err(|_| ServerError::BadInput("bad summary id".into()))?))
}

fn parse_permission_kind(raw: &str) -> Result<PermissionKind> {
    match raw {
        "view" => Ok(PermissionKind::View),
        "edit" => Ok(PermissionKind::Edit),
        other => Err(ServerError::BadInput(format!("bad permission kind: {other}"))),
    }
}

/// Rejects a staged-upload filename containing a path separator or a
/// `.` (blocks `.`/`..` traversal, matching the filesystem-layout
/// contract).
fn reject_unsafe_name(name: &str) -> Result<()> {
    if name.contains('.') || name.contains('/') || name.contains('\\') {
        return Err(ServerError::BadInput(format!("unsafe filename: {name}")));
    }
    Ok(())
}

/// Encodes a typed response as `(code, params)`, ready for
/// [`crate::frame::encode_envelope`].
pub fn encode_response(payload: &ResponsePayload) -> Result<(String, Vec<String>)> {
    Ok(match payload {
        ResponsePayload::LoginSuccess { upcoming_events } => {
            ("LOGIN_SUCCESS".into(), vec![json_param(upcoming_events)?])
        }
        ResponsePayload::LoginFail => ("LOGIN_FAIL".into(), vec![]),
        ResponsePayload::RegisterSuccess => ("REGISTER_SUCCESS".into(), vec![]),
        ResponsePayload::RegisterFail => ("REGISTER_FAIL".into(), vec![]),
        ResponsePayload::TakeSummaries { summaries } => ("TAKESUMMARIES".into(), vec![json_param(summaries)?]),
        ResponsePayload::TakeSummary { summary, content } => {
            ("TAKESUMMARY".into(), vec![json_param(summary)?, json_param(content)?])
        }
        ResponsePayload::TakeSummaryLink { summary_id } => {
            ("TAKESUMMARYLINK".into(), vec![summary_id.0.to_string()])
        }
        ResponsePayload::SaveSuccess { summary_id } => ("SAVE_SUCCESS".into(), vec![summary_id.0.to_string()]),
        ResponsePayload::ShareSuccess => ("SHARE_SUCCESS".into(), vec![]),
        ResponsePayload::TakeGraph { root } => ("TAKEGRAPH".into(), vec![json_param(root)?]),
        ResponsePayload::HistoricList { entries } => ("HISTORICLIST".into(), vec![json_param(entries)?]),
        ResponsePayload::TakeHistoric { content } => ("TAKEHIST".into(), vec![json_param(content)?]),
        ResponsePayload::EventSuccess { event } => ("EVENT_SUCCESS".into(), vec![json_param(event)?]),
        ResponsePayload::TakeEvents { events } => ("TAKEEVENTS".into(), vec![json_param(events)?]),
        ResponsePayload::DeleteSuccess { event_id } => ("DELETE_SUCCESS".into(), vec![event_id.0.to_string()]),
        ResponsePayload::TakeUpdate {
            doc_content,
            cursors,
            selections,
            recent_changes,
        } => (
            "TAKEUPDATE".into(),
            vec![
                json_param(doc_content)?,
                json_param(cursors)?,
                json_param(selections)?,
                json_param(recent_changes)?,
            ],
        ),
        ResponsePayload::FileContent { text } => ("FILECONTENT".into(), vec![json_param(text)?]),
        ResponsePayload::SummaryText { text } => ("SUMMARY".into(), vec![json_param(text)?]),
        ResponsePayload::Exported { data_b64 } => ("EXPORTED".into(), vec![data_b64.clone()]),
        ResponsePayload::GcalEvents { events } => ("GCAL_EVENTS".into(), vec![json_param(events)?]),
        ResponsePayload::Subscribed | ResponsePayload::Closed => ("OK".into(), vec![]),
    })
}
