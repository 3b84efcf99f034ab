//! Insert vs update: one cluster inserts a row whose key the other cluster
//! concurrently moves an existing row onto. Both incoming changes are
//! rejected on the constraint.

use xdcr_error::Result;

use crate::record::{ActionType, ConflictRecord, ConflictType};
use crate::taxonomy::ConflictCategory;

use super::{Resolution, existing_row_action, iicv, no_log_guard};

pub(super) fn guard(expected: &ConflictRecord, actuals: &[ConflictRecord]) -> Option<Resolution> {
    if expected.conflict_type == ConflictType::ConstraintViolation {
        match (expected.action_type, existing_row_action(actuals)) {
            (ActionType::Insert, Some(ActionType::Update)) => {
                return Some(Resolution::InsertUpdateInsertSide);
            }
            (ActionType::Update, Some(ActionType::Insert)) => {
                return Some(Resolution::InsertUpdateUpdateSide);
            }
            _ => {}
        }
    }
    no_log_guard(ConflictCategory::IuCv, expected)
}

/// The incoming insert collided with a locally updated row.
pub(super) fn check_insert_side(
    expected: &ConflictRecord,
    actuals: &[ConflictRecord],
) -> Result<()> {
    iicv::check_insert_rejected(expected, actuals, ActionType::Update)
}
