//! Insert vs insert: each cluster rejects the peer's row because it collides
//! with a row it inserted itself.

use xdcr_error::Result;

use crate::record::{ActionType, ConflictRecord, ConflictType, RowType};
use crate::taxonomy::ConflictCategory;

use super::{Bytes, Resolution, RowSet, RowShape, check_before, existing_row_action, no_log_guard};

pub(super) fn guard(expected: &ConflictRecord, actuals: &[ConflictRecord]) -> Option<Resolution> {
    if expected.action_type == ActionType::Insert
        && expected.conflict_type == ConflictType::ConstraintViolation
        && existing_row_action(actuals) == Some(ActionType::Insert)
    {
        return Some(Resolution::InsertInsertRejected);
    }
    no_log_guard(ConflictCategory::IiCv, expected)
}

pub(super) fn check_rejected(expected: &ConflictRecord, actuals: &[ConflictRecord]) -> Result<()> {
    check_insert_rejected(expected, actuals, ActionType::Insert)
}

/// Incoming insert rejected on a constraint: `{EXT, NEW}` where NEW is the
/// oracle's row and EXT is the local row holding the same key, last written
/// by `existing_action`.
pub(super) fn check_insert_rejected(
    expected: &ConflictRecord,
    actuals: &[ConflictRecord],
    existing_action: ActionType,
) -> Result<()> {
    let rows = RowSet::partition(actuals, &[RowType::Existing, RowType::New])?;
    RowShape::new(RowType::New, ActionType::Insert, ConflictType::ConstraintViolation)
        .decision(expected.decision)
        .payload(Bytes::Same)
        .check(expected, &rows)?;
    RowShape::new(RowType::Existing, existing_action, ConflictType::None)
        .decision(expected.decision)
        .key(Bytes::Same)
        .check(expected, &rows)?;

    let new = rows.get(RowType::New)?;
    let existing = rows.get(RowType::Existing)?;
    check_before("EXT written before NEW was resolved", &existing.timestamp, new.resolved_at())
}
