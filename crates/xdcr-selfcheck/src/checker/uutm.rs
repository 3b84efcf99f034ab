//! Update vs update on the same row: each cluster sees the peer's update
//! arrive against a row whose timestamp no longer matches the before-image.
//! The later write wins on both sides.

use xdcr_error::Result;

use crate::record::{ActionType, ConflictRecord, ConflictType, Decision, RowType};
use crate::taxonomy::ConflictCategory;

use super::{Bytes, Resolution, RowSet, RowShape, check_before, no_log_guard};

pub(super) fn guard(expected: &ConflictRecord, actuals: &[ConflictRecord]) -> Option<Resolution> {
    if expected.action_type == ActionType::Update
        && expected.conflict_type == ConflictType::TimestampMismatch
    {
        let logged = |decision: Decision| {
            actuals
                .iter()
                .any(|row| row.action_type == ActionType::Update && row.decision == decision)
        };
        if logged(Decision::Accept) {
            return Some(Resolution::TimestampAccepted);
        }
        if logged(Decision::Reject) {
            return Some(Resolution::TimestampRejected);
        }
    }
    no_log_guard(ConflictCategory::UuTm, expected)
}

/// The incoming update was newer than the local row and replaced it.
///
/// The oracle describes the local row the update overwrote (EXT); NEW and
/// EXP both differ from it, and both writes it raced predate NEW.
pub(super) fn check_accepted(expected: &ConflictRecord, actuals: &[ConflictRecord]) -> Result<()> {
    let rows = RowSet::partition(actuals, &[RowType::New, RowType::Existing, RowType::Expected])?;
    RowShape::new(RowType::New, ActionType::Update, ConflictType::None)
        .decision(expected.decision)
        .payload(Bytes::Differ)
        .check(expected, &rows)?;
    RowShape::new(RowType::Existing, ActionType::Update, expected.conflict_type)
        .decision(expected.decision)
        .payload(Bytes::Same)
        .check(expected, &rows)?;
    RowShape::new(RowType::Expected, ActionType::Update, expected.conflict_type)
        .decision(expected.decision)
        .payload(Bytes::Differ)
        .check(expected, &rows)?;

    let new = &rows.get(RowType::New)?.timestamp;
    check_before("EXP written before NEW", &rows.get(RowType::Expected)?.timestamp, new)?;
    check_before("EXT written before NEW", &rows.get(RowType::Existing)?.timestamp, new)
}

/// The incoming update was older than the local row and was dropped: every
/// row is a reject, and NEW falls between the before-image and the local row.
pub(super) fn check_rejected(expected: &ConflictRecord, actuals: &[ConflictRecord]) -> Result<()> {
    let rows = RowSet::partition(actuals, &[RowType::New, RowType::Existing, RowType::Expected])?;
    RowShape::new(RowType::New, ActionType::Update, ConflictType::None)
        .decision(Decision::Reject)
        .payload(Bytes::Differ)
        .check(expected, &rows)?;
    RowShape::new(RowType::Existing, ActionType::Update, ConflictType::TimestampMismatch)
        .decision(Decision::Reject)
        .payload(Bytes::Same)
        .check(expected, &rows)?;
    RowShape::new(RowType::Expected, ActionType::Update, ConflictType::TimestampMismatch)
        .decision(Decision::Reject)
        .payload(Bytes::Differ)
        .check(expected, &rows)?;

    let new = &rows.get(RowType::New)?.timestamp;
    check_before("NEW written before EXT", new, &rows.get(RowType::Existing)?.timestamp)?;
    check_before("EXP written before NEW", &rows.get(RowType::Expected)?.timestamp, new)
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{actual, expected};
    use super::super::{ResolveChecker, verify_against_chain};
    use super::*;

    fn log(decision: Decision, new_at: u64, existing_at: u64) -> Vec<ConflictRecord> {
        let mismatch = ConflictType::TimestampMismatch;
        vec![
            actual(RowType::Expected, ActionType::Update, mismatch, decision, false, 1, 9),
            actual(RowType::Existing, ActionType::Update, mismatch, decision, true, existing_at, 9),
            actual(
                RowType::New,
                ActionType::Update,
                ConflictType::None,
                decision,
                false,
                new_at,
                9,
            ),
        ]
    }

    #[test]
    fn accepted_newer_update_verifies() {
        let exp = expected(ActionType::Update, ConflictType::TimestampMismatch, Decision::Accept);
        let rows = log(Decision::Accept, 3, 2);
        assert_eq!(guard(&exp, &rows), Some(Resolution::TimestampAccepted));
        assert_eq!(verify_against_chain(&exp, &rows).expect("verifies"), ResolveChecker::UuTm);
    }

    #[test]
    fn rejected_older_update_verifies() {
        let exp = expected(ActionType::Update, ConflictType::TimestampMismatch, Decision::Reject);
        let rows = log(Decision::Reject, 2, 3);
        assert_eq!(guard(&exp, &rows), Some(Resolution::TimestampRejected));
        assert_eq!(verify_against_chain(&exp, &rows).expect("verifies"), ResolveChecker::UuTm);
    }

    #[test]
    fn accepted_but_older_fails() {
        let exp = expected(ActionType::Update, ConflictType::TimestampMismatch, Decision::Accept);
        let err = verify_against_chain(&exp, &log(Decision::Accept, 2, 3))
            .expect_err("EXT newer than NEW");
        assert!(err.to_string().contains("EXT written before NEW"), "{err}");
    }

    #[test]
    fn no_log_tag_with_rows_fails() {
        let exp = expected(
            ActionType::Update,
            ConflictType::NoLogExpected(ConflictCategory::UuTm),
            Decision::Accept,
        );
        let err =
            verify_against_chain(&exp, &log(Decision::Accept, 3, 2)).expect_err("rows present");
        assert!(err.to_string().contains("expects no conflict log rows"), "{err}");
    }

    #[test]
    fn mismatch_without_update_rows_is_unclaimed() {
        let exp = expected(ActionType::Update, ConflictType::TimestampMismatch, Decision::Accept);
        assert_eq!(guard(&exp, &[]), None);
    }
}
