//! Update vs delete: one cluster deletes a row the other concurrently
//! updates. The updating side logs a timestamp mismatch for the incoming
//! delete and lets it win; the deleting side logs a missing row for the
//! incoming update and rejects it.

use xdcr_error::Result;

use crate::record::{ActionType, ConflictRecord, ConflictType, RowType};
use crate::taxonomy::ConflictCategory;

use super::{Bytes, Resolution, RowSet, RowShape, check_before, no_log_guard};

pub(super) fn guard(expected: &ConflictRecord) -> Option<Resolution> {
    match (expected.action_type, expected.conflict_type) {
        (ActionType::Delete, ConflictType::TimestampMismatch) => Some(Resolution::DeleteOverUpdate),
        (ActionType::Update, ConflictType::MissingRow) => Some(Resolution::UpdateOfDeleted),
        _ => no_log_guard(ConflictCategory::UdTmMr, expected),
    }
}

/// Updating side: `{EXP, EXT}`, EXT being the oracle's locally updated row
/// and EXP the delete's stale before-image.
pub(super) fn check_delete_over_update(
    expected: &ConflictRecord,
    actuals: &[ConflictRecord],
) -> Result<()> {
    let rows = RowSet::partition(actuals, &[RowType::Expected, RowType::Existing])?;
    RowShape::new(RowType::Existing, ActionType::Update, ConflictType::TimestampMismatch)
        .decision(expected.decision)
        .payload(Bytes::Same)
        .check(expected, &rows)?;
    RowShape::new(RowType::Expected, ActionType::Delete, ConflictType::TimestampMismatch)
        .decision(expected.decision)
        .payload(Bytes::Differ)
        .check(expected, &rows)?;
    check_before(
        "EXP written before EXT",
        &rows.get(RowType::Expected)?.timestamp,
        &rows.get(RowType::Existing)?.timestamp,
    )
}

/// Deleting side: `{EXP, NEW}`, NEW being the oracle's incoming update and
/// EXP its before-image that no longer exists locally.
pub(super) fn check_update_of_deleted(
    expected: &ConflictRecord,
    actuals: &[ConflictRecord],
) -> Result<()> {
    let rows = RowSet::partition(actuals, &[RowType::Expected, RowType::New])?;
    RowShape::new(RowType::New, ActionType::Update, ConflictType::None)
        .decision(expected.decision)
        .payload(Bytes::Same)
        .check(expected, &rows)?;
    RowShape::new(RowType::Expected, ActionType::Update, ConflictType::MissingRow)
        .decision(expected.decision)
        .payload(Bytes::Differ)
        .check(expected, &rows)?;
    check_before(
        "EXP written before NEW",
        &rows.get(RowType::Expected)?.timestamp,
        &rows.get(RowType::New)?.timestamp,
    )
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{actual, expected};
    use super::super::{ResolveChecker, verify_against_chain};
    use super::*;
    use crate::record::Decision;

    /// Updating side's log for an accepted delete.
    fn delete_log() -> Vec<ConflictRecord> {
        vec![
            actual(
                RowType::Expected,
                ActionType::Delete,
                ConflictType::TimestampMismatch,
                Decision::Accept,
                false,
                1,
                6,
            ),
            actual(
                RowType::Existing,
                ActionType::Update,
                ConflictType::TimestampMismatch,
                Decision::Accept,
                true,
                3,
                6,
            ),
        ]
    }

    /// Deleting side's log for a rejected update; `exp_same` makes the
    /// before-image match the oracle.
    fn update_log(exp_same: bool) -> Vec<ConflictRecord> {
        vec![
            actual(
                RowType::Expected,
                ActionType::Update,
                ConflictType::MissingRow,
                Decision::Reject,
                exp_same,
                1,
                6,
            ),
            actual(
                RowType::New,
                ActionType::Update,
                ConflictType::None,
                Decision::Reject,
                true,
                3,
                6,
            ),
        ]
    }

    fn delete_over_update() -> ConflictRecord {
        expected(ActionType::Delete, ConflictType::TimestampMismatch, Decision::Accept)
    }

    fn update_of_deleted() -> ConflictRecord {
        expected(ActionType::Update, ConflictType::MissingRow, Decision::Reject)
    }

    #[test]
    fn delete_over_update_verifies() {
        let checker = verify_against_chain(&delete_over_update(), &delete_log()).expect("verifies");
        assert_eq!(checker, ResolveChecker::UdTmMr);
    }

    #[test]
    fn update_of_deleted_verifies() {
        let checker =
            verify_against_chain(&update_of_deleted(), &update_log(false)).expect("verifies");
        assert_eq!(checker, ResolveChecker::UdTmMr);
    }

    #[test]
    fn update_of_deleted_with_same_before_image_fails() {
        assert!(verify_against_chain(&update_of_deleted(), &update_log(true)).is_err());
    }

    #[test]
    fn delete_over_update_with_rejected_before_image_fails() {
        let mut rows = delete_log();
        rows[0].decision = Decision::Reject;
        let err = verify_against_chain(&delete_over_update(), &rows).expect_err("EXP decision");
        assert!(err.to_string().contains("EXP decision"), "{err}");
    }

    #[test]
    fn update_of_deleted_logged_as_accepted_fails() {
        let mut rows = update_log(false);
        for row in &mut rows {
            row.decision = Decision::Accept;
        }
        let err = verify_against_chain(&update_of_deleted(), &rows).expect_err("decision flipped");
        assert!(err.to_string().contains("decision"), "{err}");

        let mut rows = update_log(false);
        rows[0].decision = Decision::Accept;
        let err = verify_against_chain(&update_of_deleted(), &rows).expect_err("EXP flipped");
        assert!(err.to_string().contains("EXP decision"), "{err}");
    }

    #[test]
    fn no_log_tag_ignores_inserts() {
        let exp = expected(
            ActionType::Insert,
            ConflictType::NoLogExpected(ConflictCategory::UdTmMr),
            Decision::Accept,
        );
        assert_eq!(guard(&exp), None);
    }
}
