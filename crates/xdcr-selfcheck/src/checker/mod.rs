//! Resolution checkers.
//!
//! Each expected conflict record is offered to [`RESOLVE_CHAIN`] in order.
//! A checker's guards decide whether the record is its to verify; the first
//! checker whose guard matches claims the record and runs the matching
//! verification over the correlated log rows. A record no checker claims is
//! a failure in its own right.
//!
//! Guards never overlap: for any expected record and log rows, at most one
//! guard in the whole chain matches.

mod ddmr;
mod iicv;
mod iucv;
mod udtmmr;
mod uucv;
mod uutm;

use std::fmt;

use tracing::debug;
use xdcr_error::{Result, SelfCheckError};
use xdcr_types::hex::hex;

use crate::record::{ActionType, ConflictRecord, ConflictType, Decision, RowType};
use crate::taxonomy::ConflictCategory;

/// One checker per conflict category.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveChecker {
    DdMr,
    IiCv,
    IuCv,
    UdTmMr,
    UuCv,
    UuTm,
}

/// Order in which checkers are offered each expected record.
pub const RESOLVE_CHAIN: [ResolveChecker; 6] = [
    ResolveChecker::DdMr,
    ResolveChecker::IiCv,
    ResolveChecker::IuCv,
    ResolveChecker::UdTmMr,
    ResolveChecker::UuCv,
    ResolveChecker::UuTm,
];

impl ResolveChecker {
    pub const fn category(self) -> ConflictCategory {
        match self {
            Self::DdMr => ConflictCategory::DdMr,
            Self::IiCv => ConflictCategory::IiCv,
            Self::IuCv => ConflictCategory::IuCv,
            Self::UdTmMr => ConflictCategory::UdTmMr,
            Self::UuCv => ConflictCategory::UuCv,
            Self::UuTm => ConflictCategory::UuTm,
        }
    }

    pub const fn name(self) -> &'static str {
        self.category().name()
    }

    /// The verification this checker would run for `expected`, if any of its
    /// guards match.
    pub fn guard(
        self,
        expected: &ConflictRecord,
        actuals: &[ConflictRecord],
    ) -> Option<Resolution> {
        match self {
            Self::DdMr => ddmr::guard(expected),
            Self::IiCv => iicv::guard(expected, actuals),
            Self::IuCv => iucv::guard(expected, actuals),
            Self::UdTmMr => udtmmr::guard(expected),
            Self::UuCv => uucv::guard(expected, actuals),
            Self::UuTm => uutm::guard(expected, actuals),
        }
    }

    /// Returns `Ok(false)` when the record is not this checker's, `Ok(true)`
    /// when it claimed and verified it.
    pub fn verify_expectation(
        self,
        expected: &ConflictRecord,
        actuals: &[ConflictRecord],
    ) -> Result<bool> {
        let Some(resolution) = self.guard(expected, actuals) else {
            return Ok(false);
        };
        debug!(
            checker = self.name(),
            resolution = %resolution,
            cid = expected.cid,
            rid = expected.rid,
            actual_rows = actuals.len(),
            "checker claimed expected conflict"
        );
        resolution.verify(expected, actuals).map_err(|err| match err {
            SelfCheckError::ExpectationMismatch { detail } => SelfCheckError::mismatch(format!(
                "{} ({resolution}) for [{expected}]: {detail}",
                self.name()
            )),
            other => other,
        })?;
        Ok(true)
    }
}

impl fmt::Display for ResolveChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Offer `expected` to every checker in chain order. Returns the checker
/// that claimed it.
pub fn verify_against_chain(
    expected: &ConflictRecord,
    actuals: &[ConflictRecord],
) -> Result<ResolveChecker> {
    for checker in RESOLVE_CHAIN {
        if checker.verify_expectation(expected, actuals)? {
            return Ok(checker);
        }
    }
    Err(SelfCheckError::UnverifiableConflictShape {
        detail: format!(
            "Fail to verify conflict [{expected}] against {} actual rows",
            actuals.len()
        ),
    })
}

/// Every checker whose guard matches. At most one for any input.
pub fn claimants(expected: &ConflictRecord, actuals: &[ConflictRecord]) -> Vec<ResolveChecker> {
    RESOLVE_CHAIN
        .into_iter()
        .filter(|checker| checker.guard(expected, actuals).is_some())
        .collect()
}

/// The verification selected by a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// The oracle expects no log rows for this record.
    NoLog(ConflictCategory),
    /// Incoming insert rejected against a row some other insert wrote.
    InsertInsertRejected,
    /// Incoming insert rejected against a row an update wrote.
    InsertUpdateInsertSide,
    /// Incoming update rejected against a row an insert wrote.
    InsertUpdateUpdateSide,
    /// Incoming update rejected against a row another update wrote.
    UpdateUpdateRejected,
    /// Incoming update won a timestamp mismatch.
    TimestampAccepted,
    /// Incoming update lost a timestamp mismatch.
    TimestampRejected,
    /// Incoming delete removed a row updated locally.
    DeleteOverUpdate,
    /// Incoming update found its row deleted locally.
    UpdateOfDeleted,
}

impl Resolution {
    pub fn verify(self, expected: &ConflictRecord, actuals: &[ConflictRecord]) -> Result<()> {
        match self {
            Self::NoLog(category) => expect_no_log(category, actuals),
            Self::InsertInsertRejected => iicv::check_rejected(expected, actuals),
            Self::InsertUpdateInsertSide => iucv::check_insert_side(expected, actuals),
            Self::InsertUpdateUpdateSide | Self::UpdateUpdateRejected => {
                uucv::check_update_rejected(expected, actuals, self.existing_action())
            }
            Self::TimestampAccepted => uutm::check_accepted(expected, actuals),
            Self::TimestampRejected => uutm::check_rejected(expected, actuals),
            Self::DeleteOverUpdate => udtmmr::check_delete_over_update(expected, actuals),
            Self::UpdateOfDeleted => udtmmr::check_update_of_deleted(expected, actuals),
        }
    }

    const fn existing_action(self) -> ActionType {
        match self {
            Self::InsertUpdateUpdateSide => ActionType::Insert,
            _ => ActionType::Update,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::NoLog(_) => "no-log",
            Self::InsertInsertRejected => "insert-insert-rejected",
            Self::InsertUpdateInsertSide => "insert-update-insert-side",
            Self::InsertUpdateUpdateSide => "insert-update-update-side",
            Self::UpdateUpdateRejected => "update-update-rejected",
            Self::TimestampAccepted => "timestamp-accepted",
            Self::TimestampRejected => "timestamp-rejected",
            Self::DeleteOverUpdate => "delete-over-update",
            Self::UpdateOfDeleted => "update-of-deleted",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Guard helpers ──────────────────────────────────────────────────────────

/// Guard for oracle rows tagged with `category`: the operation must be one of
/// the category's racing operations.
fn no_log_guard(category: ConflictCategory, expected: &ConflictRecord) -> Option<Resolution> {
    (expected.conflict_type == ConflictType::NoLogExpected(category)
        && category.involves(expected.action_type))
    .then_some(Resolution::NoLog(category))
}

/// Action of the `EXT` row among the actuals, if exactly one row has a
/// recognizable `EXT` role.
fn existing_row_action(actuals: &[ConflictRecord]) -> Option<ActionType> {
    let mut existing = actuals
        .iter()
        .filter(|row| row.row_type == Some(RowType::Existing));
    let first = existing.next()?;
    existing.next().is_none().then_some(first.action_type)
}

// ── Verification helpers ───────────────────────────────────────────────────

fn expect_no_log(category: ConflictCategory, actuals: &[ConflictRecord]) -> Result<()> {
    if actuals.is_empty() {
        return Ok(());
    }
    let rows: Vec<String> = actuals.iter().map(ToString::to_string).collect();
    Err(SelfCheckError::mismatch(format!(
        "{category} expects no conflict log rows, found {}: {}",
        actuals.len(),
        rows.join("; ")
    )))
}

/// Log rows indexed by role, after checking the exact role set.
#[derive(Debug, Default)]
struct RowSet<'a> {
    existing: Option<&'a ConflictRecord>,
    expected: Option<&'a ConflictRecord>,
    new: Option<&'a ConflictRecord>,
}

impl<'a> RowSet<'a> {
    /// Requires exactly one row per role in `roles` and no other rows. A row
    /// with no role is fatal.
    fn partition(actuals: &'a [ConflictRecord], roles: &[RowType]) -> Result<Self> {
        check_equals("number of conflict rows", &roles.len(), &actuals.len())?;
        let mut set = Self::default();
        for row in actuals {
            let role = row.logged_row_type()?;
            if !roles.contains(&role) {
                return Err(SelfCheckError::mismatch(format!(
                    "unexpected {} row: [{row}]",
                    role.tag()
                )));
            }
            let slot = match role {
                RowType::Existing => &mut set.existing,
                RowType::Expected => &mut set.expected,
                RowType::New => &mut set.new,
            };
            if slot.replace(row).is_some() {
                return Err(SelfCheckError::mismatch(format!(
                    "duplicate {} row: [{row}]",
                    role.tag()
                )));
            }
        }
        Ok(set)
    }

    fn get(&self, role: RowType) -> Result<&'a ConflictRecord> {
        let row = match role {
            RowType::Existing => self.existing,
            RowType::Expected => self.expected,
            RowType::New => self.new,
        };
        row.ok_or_else(|| SelfCheckError::mismatch(format!("missing {} row", role.tag())))
    }
}

/// How a logged byte field relates to the oracle's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bytes {
    Same,
    Differ,
    Any,
}

/// Field-level expectations for one logged row.
#[derive(Debug, Clone, Copy)]
struct RowShape {
    role: RowType,
    action: ActionType,
    conflict: ConflictType,
    decision: Option<Decision>,
    key: Bytes,
    value: Bytes,
}

impl RowShape {
    const fn new(role: RowType, action: ActionType, conflict: ConflictType) -> Self {
        Self {
            role,
            action,
            conflict,
            decision: None,
            key: Bytes::Any,
            value: Bytes::Any,
        }
    }

    const fn decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    const fn key(mut self, key: Bytes) -> Self {
        self.key = key;
        self
    }

    const fn payload(mut self, both: Bytes) -> Self {
        self.key = both;
        self.value = both;
        self
    }

    fn check(&self, expected: &ConflictRecord, rows: &RowSet<'_>) -> Result<()> {
        let row = rows.get(self.role)?;
        let role = self.role.tag();
        check_equals(&format!("{role} action_type"), &self.action.tag(), &row.action_type.tag())?;
        check_equals(&format!("{role} conflict_type"), &self.conflict, &row.conflict_type)?;
        if let Some(decision) = self.decision {
            check_equals(&format!("{role} decision"), &decision.tag(), &row.decision.tag())?;
        }
        check_bytes(&format!("{role} key"), self.key, expected.key(), row.key())?;
        check_bytes(&format!("{role} value"), self.value, expected.value(), row.value())
    }
}

fn check_equals<T: PartialEq + fmt::Debug + ?Sized>(
    what: &str,
    expected: &T,
    actual: &T,
) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(SelfCheckError::mismatch(format!(
            "mismatched {what}: expected {expected:?}, actual {actual:?}"
        )))
    }
}

fn check_bytes(what: &str, rule: Bytes, expected: &[u8], actual: &[u8]) -> Result<()> {
    match rule {
        Bytes::Any => Ok(()),
        Bytes::Same if expected == actual => Ok(()),
        Bytes::Differ if expected != actual => Ok(()),
        Bytes::Same => Err(SelfCheckError::mismatch(format!(
            "mismatched {what}: expected {}, actual {}",
            hex(expected),
            hex(actual)
        ))),
        Bytes::Differ => Err(SelfCheckError::mismatch(format!(
            "{what} should differ from the oracle but both are {}",
            hex(actual)
        ))),
    }
}

/// Strict ordering: `earlier` must sort before `later`.
fn check_before(
    what: &str,
    earlier: &crate::record::LogicalTimestamp,
    later: &crate::record::LogicalTimestamp,
) -> Result<()> {
    if earlier < later {
        Ok(())
    } else {
        Err(SelfCheckError::mismatch(format!(
            "{what}: expected {earlier} < {later}"
        )))
    }
}
