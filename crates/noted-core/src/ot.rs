//! Operational transform: rewriting a pending change's coordinates so
//! its intent survives a prior, concurrent change having already been
//! applied. Pure functions, no actor state — the doc engine's worker
//! is the only caller.

use noted_proto::{Change, ChangeOp};
use ropey::Rope;

/// Transforms a single character offset `p` against an already-applied
/// `prior` change.
#[must_use]
pub fn transform_position(p: usize, prior: &Change) -> usize {
    let s = prior.range.start;
    let e = prior.range.end;
    let removed = e - s;
    let inserted = prior.text.chars().count();

    match prior.op {
        ChangeOp::Insert => {
            if p >= s {
                p + inserted
            } else {
                p
            }
        }
        ChangeOp::Delete => {
            if p >= e {
                p - removed
            } else if p > s {
                s
            } else {
                p
            }
        }
        ChangeOp::Update => {
            if p >= e {
                (p as i64 + inserted as i64 - removed as i64).max(0) as usize
            } else if p > s {
                if removed == 0 {
                    s
                } else {
                    s + (2 * (p - s) * inserted + removed) / (2 * removed)
                }
            } else {
                p
            }
        }
    }
}

/// Transforms both endpoints of `change`'s range against `prior`,
/// collapsing a range to empty if the transform inverts it.
pub fn transform_change(change: &mut Change, prior: &Change) {
    let new_start = transform_position(change.range.start, prior);
    let new_end = transform_position(change.range.end, prior);
    change.range.start = new_start;
    change.range.end = new_end.max(new_start);
}

/// Clamps `change`'s range to `[0, len_chars]`, the valid coordinate
/// space of the current document.
pub fn clamp_to_document(change: &mut Change, len_chars: usize) {
    change.range.start = change.range.start.min(len_chars);
    change.range.end = change.range.end.clamp(change.range.start, len_chars);
}

/// Applies `change` to `rope` in place. Coordinates are assumed
/// already clamped to the document's current length.
pub fn apply_change(rope: &mut Rope, change: &Change) {
    let start = change.range.start;
    let end = change.range.end;
    match change.op {
        ChangeOp::Insert => rope.insert(start, &change.text),
        ChangeOp::Delete => rope.remove(start..end),
        ChangeOp::Update => {
            rope.remove(start..end);
            rope.insert(start, &change.text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noted_proto::{ChangeId, Range, UserId};

    fn change(op: ChangeOp, start: usize, end: usize, text: &str) -> Change {
        Change {
            range: Range::new(start, end),
            op,
            text: text.to_string(),
            client_id: "c".into(),
            user_id: UserId(1),
            timestamp_ms: 0,
            change_id: ChangeId(0),
        }
    }

    #[test]
    fn insert_shifts_positions_at_or_after_start() {
        let prior = change(ChangeOp::Insert, 5, 5, " world");
        assert_eq!(transform_position(6, &prior), 12);
        assert_eq!(transform_position(5, &prior), 11);
        assert_eq!(transform_position(4, &prior), 4);
    }

    #[test]
    fn delete_collapses_interior_positions_to_start() {
        let prior = change(ChangeOp::Delete, 1, 4, "");
        assert_eq!(transform_position(0, &prior), 0);
        assert_eq!(transform_position(2, &prior), 1);
        assert_eq!(transform_position(4, &prior), 1);
        assert_eq!(transform_position(6, &prior), 3);
    }

    #[test]
    fn update_scales_interior_positions() {
        let prior = change(ChangeOp::Update, 2, 6, "XY");
        assert_eq!(transform_position(0, &prior), 0);
        assert_eq!(transform_position(2, &prior), 2);
        assert_eq!(transform_position(4, &prior), 3);
        assert_eq!(transform_position(6, &prior), 4);
        assert_eq!(transform_position(8, &prior), 6);
    }

    #[test]
    fn scenario_concurrent_insert_merge() {
        let mut rope = Rope::from_str("hello");
        let mut a = change(ChangeOp::Insert, 5, 5, " world");
        let mut b = change(ChangeOp::Insert, 0, 0, "X");
        a.timestamp_ms = 1;
        b.timestamp_ms = 2;

        apply_change(&mut rope, &a);
        transform_change(&mut b, &a);
        apply_change(&mut rope, &b);

        assert_eq!(rope.to_string(), "Xhello world");
    }

    #[test]
    fn scenario_delete_then_insert_overlap() {
        let mut rope = Rope::from_str("abcdef");
        let mut a = change(ChangeOp::Delete, 1, 4, "");
        let mut b = change(ChangeOp::Insert, 3, 3, "Z");
        a.timestamp_ms = 1;
        b.timestamp_ms = 2;

        apply_change(&mut rope, &a);
        transform_change(&mut b, &a);
        apply_change(&mut rope, &b);

        assert_eq!(rope.to_string(), "aZef");
    }

    #[test]
    fn identity_when_position_before_prior_start() {
        for op in [ChangeOp::Insert, ChangeOp::Delete, ChangeOp::Update] {
            let prior = change(op, 10, 15, "xyz");
            assert_eq!(transform_position(3, &prior), 3);
        }
    }
}
