//! Update vs update on different rows: both clusters move a row onto the same
//! key, and each rejects the peer's update on the constraint.

use xdcr_error::Result;

use crate::record::{ActionType, ConflictRecord, ConflictType, RowType};
use crate::taxonomy::ConflictCategory;

use super::{Bytes, Resolution, RowSet, RowShape, check_before, existing_row_action, no_log_guard};

pub(super) fn guard(expected: &ConflictRecord, actuals: &[ConflictRecord]) -> Option<Resolution> {
    if expected.action_type == ActionType::Update
        && expected.conflict_type == ConflictType::ConstraintViolation
        && existing_row_action(actuals) == Some(ActionType::Update)
    {
        return Some(Resolution::UpdateUpdateRejected);
    }
    no_log_guard(ConflictCategory::UuCv, expected)
}

/// Incoming update rejected on a constraint: `{EXP, EXT, NEW}`.
///
/// NEW carries the oracle's row, EXP the before-image the update replaced
/// (a different key), and EXT the local row holding the contested key, last
/// written by `existing_action`.
pub(super) fn check_update_rejected(
    expected: &ConflictRecord,
    actuals: &[ConflictRecord],
    existing_action: ActionType,
) -> Result<()> {
    let rows = RowSet::partition(actuals, &[RowType::Expected, RowType::Existing, RowType::New])?;
    RowShape::new(RowType::New, ActionType::Update, ConflictType::ConstraintViolation)
        .decision(expected.decision)
        .payload(Bytes::Same)
        .check(expected, &rows)?;
    RowShape::new(RowType::Expected, ActionType::Update, ConflictType::None)
        .decision(expected.decision)
        .key(Bytes::Differ)
        .check(expected, &rows)?;
    RowShape::new(RowType::Existing, existing_action, ConflictType::None)
        .decision(expected.decision)
        .key(Bytes::Same)
        .check(expected, &rows)?;

    let new = rows.get(RowType::New)?;
    let before = rows.get(RowType::Expected)?;
    let existing = rows.get(RowType::Existing)?;
    check_before("EXP written before NEW", &before.timestamp, &new.timestamp)?;
    check_before("EXT written before NEW was resolved", &existing.timestamp, new.resolved_at())
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{actual, expected};
    use super::super::{ResolveChecker, verify_against_chain};
    use super::*;
    use crate::record::Decision;

    fn log(new_at: u64) -> Vec<ConflictRecord> {
        vec![
            actual(
                RowType::Expected,
                ActionType::Update,
                ConflictType::None,
                Decision::Reject,
                false,
                2,
                9,
            ),
            actual(
                RowType::Existing,
                ActionType::Update,
                ConflictType::None,
                Decision::Reject,
                true,
                4,
                9,
            ),
            actual(
                RowType::New,
                ActionType::Update,
                ConflictType::ConstraintViolation,
                Decision::Reject,
                true,
                new_at,
                9,
            ),
        ]
    }

    fn rejected_update(decision: Decision) -> ConflictRecord {
        expected(ActionType::Update, ConflictType::ConstraintViolation, decision)
    }

    #[test]
    fn rejected_update_verifies() {
        let exp = rejected_update(Decision::Reject);
        assert_eq!(verify_against_chain(&exp, &log(5)).expect("verifies"), ResolveChecker::UuCv);
    }

    #[test]
    fn new_older_than_its_before_image_fails() {
        let exp = rejected_update(Decision::Reject);
        let err = verify_against_chain(&exp, &log(2)).expect_err("EXP.ts == NEW.ts");
        assert!(err.to_string().contains("EXP written before NEW"), "{err}");
    }

    #[test]
    fn wrong_decision_fails() {
        let exp = rejected_update(Decision::Accept);
        let err = verify_against_chain(&exp, &log(5)).expect_err("decision differs");
        assert!(err.to_string().contains("NEW decision"), "{err}");
    }

    #[test]
    fn before_image_or_existing_row_with_another_decision_fails() {
        let exp = rejected_update(Decision::Reject);
        for (index, role) in [(0, "EXP"), (1, "EXT")] {
            let mut rows = log(5);
            rows[index].decision = Decision::Accept;
            let err = verify_against_chain(&exp, &rows).expect_err("decision flipped");
            assert!(err.to_string().contains(&format!("{role} decision")), "{err}");
        }
    }
}
