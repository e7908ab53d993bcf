//! The unit of collaborative editing: a single change, transformed and
//! applied by the doc engine's OT merge.

use serde::{Deserialize, Serialize};

use crate::ids::{ChangeId, UserId};

/// A half-open range of character offsets `[start, end)` into the
/// normalized document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The kind of edit a [`Change`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    Insert,
    Delete,
    Update,
}

/// A single range-targeted edit, as sent by a client or recorded in
/// history after being applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub range: Range,
    pub op: ChangeOp,
    pub text: String,
    pub client_id: String,
    pub user_id: UserId,
    pub timestamp_ms: i64,
    pub change_id: ChangeId,
}

impl Change {
    /// The length shift this change applies to the document once merged:
    /// `+len(text)` for insert, `-(end-start)` for delete,
    /// `len(text)-(end-start)` for update.
    #[must_use]
    pub fn shift(&self) -> i64 {
        let removed = self.range.len() as i64;
        let inserted = self.text.chars().count() as i64;
        match self.op {
            ChangeOp::Insert => inserted,
            ChangeOp::Delete => -removed,
            ChangeOp::Update => inserted - removed,
        }
    }
}

/// The set of changes a single client submitted in one `UPDATEDOC` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub client_id: String,
    pub changes: Vec<Change>,
}
