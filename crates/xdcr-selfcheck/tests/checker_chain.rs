//! Property tests over the checker chain and the category taxonomy.

use proptest::prelude::*;
use xdcr_selfcheck::checker::claimants;
use xdcr_selfcheck::record::{
    ActionType, ConflictRecord, ConflictType, Decision, LogicalTimestamp, RowType,
};
use xdcr_selfcheck::{ConflictCategory, RESOLVE_CHAIN, verify_against_chain};

fn action() -> impl Strategy<Value = ActionType> {
    prop::sample::select(ActionType::ALL.to_vec())
}

fn decision() -> impl Strategy<Value = Decision> {
    prop::sample::select(vec![Decision::Accept, Decision::Reject])
}

fn conflict() -> impl Strategy<Value = ConflictType> {
    let mut all = vec![
        ConflictType::None,
        ConflictType::ConstraintViolation,
        ConflictType::TimestampMismatch,
        ConflictType::MissingRow,
    ];
    all.extend(ConflictCategory::ALL.map(ConflictType::NoLogExpected));
    prop::sample::select(all)
}

fn record(
    action_type: ActionType,
    conflict_type: ConflictType,
    decision: Decision,
    row_type: Option<RowType>,
    ts: u64,
    key: u8,
) -> ConflictRecord {
    ConflictRecord {
        cid: 1,
        rid: 10,
        cluster_id: 2,
        ext_rid: 11,
        action_type,
        conflict_type,
        decision,
        divergence: None,
        timestamp: LogicalTimestamp::new(format!("{ts:020}")),
        key: Some(vec![key]),
        value: Some(vec![key, key]),
        row_type,
        current_cluster_id: row_type.map(|_| 1),
        current_timestamp: row_type.map(|_| LogicalTimestamp::new(format!("{:020}", ts + 1))),
        tuple: None,
    }
}

fn expected_record() -> impl Strategy<Value = ConflictRecord> {
    (action(), conflict(), decision(), 0_u8..3)
        .prop_map(|(a, c, d, key)| record(a, c, d, None, 0, key))
}

fn logged_row() -> impl Strategy<Value = ConflictRecord> {
    (
        action(),
        conflict(),
        decision(),
        prop::sample::select(RowType::ALL.to_vec()),
        1_u64..100,
        0_u8..3,
    )
        .prop_map(|(a, c, d, role, ts, key)| record(a, c, d, Some(role), ts, key))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn at_most_one_checker_claims_any_record(
        expected in expected_record(),
        actuals in prop::collection::vec(logged_row(), 0..4),
    ) {
        let claimed = claimants(&expected, &actuals);
        prop_assert!(claimed.len() <= 1, "claimed by {claimed:?}");
    }

    #[test]
    fn chain_result_agrees_with_the_claimant(
        expected in expected_record(),
        actuals in prop::collection::vec(logged_row(), 0..4),
    ) {
        let claimed = claimants(&expected, &actuals);
        match verify_against_chain(&expected, &actuals) {
            Ok(checker) => {
                prop_assert_eq!(claimed, vec![checker]);
            }
            Err(xdcr_error::SelfCheckError::UnverifiableConflictShape { .. }) => {
                prop_assert!(claimed.is_empty());
            }
            Err(_) => {
                prop_assert_eq!(claimed.len(), 1);
            }
        }
    }

    #[test]
    fn ordinals_round_trip_and_reject_the_rest(ordinal in -10_i64..20) {
        match ConflictCategory::from_ordinal(ordinal) {
            Ok(category) => {
                prop_assert_eq!(i64::from(category.ordinal()), ordinal);
            }
            Err(err) => {
                prop_assert!(!(0..=5).contains(&ordinal), "ordinal {ordinal} rejected: {err}");
            }
        }
    }
}

#[test]
fn every_category_has_a_checker() {
    for category in ConflictCategory::ALL {
        assert!(
            RESOLVE_CHAIN.iter().any(|checker| checker.category() == category),
            "{category} has no checker"
        );
    }
}

#[test]
fn no_log_tags_are_claimed_only_with_a_racing_action() {
    for category in ConflictCategory::ALL {
        for action in ActionType::ALL {
            let expected = record(
                action,
                ConflictType::NoLogExpected(category),
                Decision::Accept,
                None,
                0,
                0,
            );
            let claimed = claimants(&expected, &[]);
            if category.involves(action) {
                assert_eq!(claimed.len(), 1, "{category} with {action:?}");
                assert_eq!(claimed[0].category(), category);
                assert_eq!(verify_against_chain(&expected, &[]).ok(), Some(claimed[0]));
            } else {
                assert!(claimed.is_empty(), "{category} with {action:?}: {claimed:?}");
            }
        }
    }
}
