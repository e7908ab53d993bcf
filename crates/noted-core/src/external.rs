//! Contract-only seams for the black-box collaborators named in
//! scope: OCR, summarization, export rendering, and Google Calendar
//! import. None are implemented here — each ships as a stub that
//! reports `not configured` until a real adapter is wired in.

use async_trait::async_trait;
use noted_proto::Event;

use crate::error::Result;

/// Extracts text from a staged upload (image or document).
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, file_bytes: &[u8]) -> Result<String>;
}

/// Produces a short summary of a paragraph of text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, paragraph: &str) -> Result<String>;
}

/// Renders document content to a target export format.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, content: &str, ext: &str) -> Result<Vec<u8>>;
}

/// Reads a user's upcoming events from an external calendar.
#[async_trait]
pub trait CalendarAdapter: Send + Sync {
    async fn list_upcoming(&self, oauth_token: &str) -> Result<Vec<Event>>;
}

/// A stub collaborator that reports `not configured` for any call,
/// standing in for every external adapter until a real one is wired
/// into the supervisor.
pub struct Unconfigured;

#[async_trait]
impl OcrEngine for Unconfigured {
    async fn extract_text(&self, _file_bytes: &[u8]) -> Result<String> {
        Err(crate::error::ServerError::StorageFailure("ocr engine not configured".into()))
    }
}

#[async_trait]
impl Summarizer for Unconfigured {
    async fn summarize(&self, _paragraph: &str) -> Result<String> {
        Err(crate::error::ServerError::StorageFailure("summarizer not configured".into()))
    }
}

#[async_trait]
impl Exporter for Unconfigured {
    async fn export(&self, _content: &str, _ext: &str) -> Result<Vec<u8>> {
        Err(crate::error::ServerError::StorageFailure("exporter not configured".into()))
    }
}

#[async_trait]
impl CalendarAdapter for Unconfigured {
    async fn list_upcoming(&self, _oauth_token: &str) -> Result<Vec<Event>> {
        Err(crate::error::ServerError::StorageFailure("gcal adapter not configured".into()))
    }
}
