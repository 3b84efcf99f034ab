//! Delete vs delete: both sides removed the row, each incoming delete finds
//! nothing to remove, and the engine logs nothing.

use crate::record::{ActionType, ConflictRecord, ConflictType};
use crate::taxonomy::ConflictCategory;

use super::{Resolution, no_log_guard};

pub(super) fn guard(expected: &ConflictRecord) -> Option<Resolution> {
    if expected.action_type == ActionType::Delete
        && expected.conflict_type == ConflictType::MissingRow
    {
        return Some(Resolution::NoLog(ConflictCategory::DdMr));
    }
    no_log_guard(ConflictCategory::DdMr, expected)
}
