//! Expected conflict records.
//!
//! The oracle says, for every scenario that provoked (or failed to provoke)
//! a conflict, what each cluster should have logged when the peer's racing
//! change reached it. Rows are keyed by the receiving cluster and table and
//! land in `<table>_conflict_expected` before a verification pass.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use xdcr_error::{Result, SelfCheckError};
use xdcr_loopback::LoopbackCluster;
use xdcr_types::hex::{decode_hex, hex};
use xdcr_types::{ReplicatedTable, Value};

use crate::client::ScenarioRun;
use crate::gateway::ClusterRole;
use crate::payload::Payload;
use crate::record::{ActionType, ConflictType, Decision};
use crate::scenario::ScenarioOutcome;
use crate::taxonomy::ConflictCategory;
use crate::verifier::OracleLoader;

/// Timestamp recorded on oracle rows; checkers never compare it.
const ORACLE_TS: &str = "0";

/// One row of `<table>_conflict_expected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRow {
    pub cid: u8,
    pub rid: i64,
    /// Cluster the incoming change originated on.
    pub clusterid: u8,
    pub extrid: i64,
    pub action_type: String,
    pub conflict_type: String,
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<String>,
    pub ts: String,
    pub key_hex: String,
    pub value_hex: String,
}

impl OracleRow {
    /// Values in `schema::EXPECTED_COLUMNS` order.
    pub fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            Value::from(self.cid),
            Value::from(self.rid),
            Value::from(self.clusterid),
            Value::from(self.extrid),
            Value::from(self.action_type.as_str()),
            Value::from(self.conflict_type.as_str()),
            Value::from(self.decision.as_str()),
            Value::from(self.divergence.as_deref()),
            Value::from(self.ts.as_str()),
            Value::from(decode_hex(&self.key_hex)?),
            Value::from(decode_hex(&self.value_hex)?),
        ])
    }
}

/// Builds the rows for one scenario.
struct Expect<'r> {
    run: &'r ScenarioRun,
    ids: [u8; 2],
}

impl Expect<'_> {
    /// Row for the change that reached `at`, sent by its peer.
    fn row(
        &self,
        at: ClusterRole,
        (rid, extrid): (i64, i64),
        action: ActionType,
        conflict: ConflictType,
        decision: Decision,
        payload: &Payload,
    ) -> (ClusterRole, OracleRow) {
        let divergence = match conflict {
            ConflictType::NoLogExpected(_) => None,
            _ => Some(match decision {
                Decision::Accept => "C".to_owned(),
                Decision::Reject => "D".to_owned(),
            }),
        };
        let row = OracleRow {
            cid: self.run.cid,
            rid,
            clusterid: self.peer_id(at),
            extrid,
            action_type: action.tag().to_owned(),
            conflict_type: conflict.tag().to_owned(),
            decision: decision.tag().to_owned(),
            divergence,
            ts: ORACLE_TS.to_owned(),
            key_hex: hex(payload.key()),
            value_hex: hex(&payload.store_value()),
        };
        (at, row)
    }

    const fn peer_id(&self, at: ClusterRole) -> u8 {
        match at {
            ClusterRole::Primary => self.ids[1],
            ClusterRole::Secondary => self.ids[0],
        }
    }

    fn payload(&self, name: &str) -> Result<&Payload> {
        self.run.payload(name).ok_or_else(|| {
            SelfCheckError::internal(format!(
                "{} scenario at rid {} drew no {name} payload",
                self.run.category, self.run.rid
            ))
        })
    }

    fn rows(&self, outcome: &ScenarioOutcome) -> Result<Vec<(ClusterRole, OracleRow)>> {
        use ActionType::{Delete, Insert, Update};
        use ClusterRole::{Primary, Secondary};
        use ConflictType::{ConstraintViolation, MissingRow, TimestampMismatch};
        use Decision::{Accept, Reject};

        let r = self.run.rid;
        let x = self.run.ext_rid();
        let survivor = match outcome {
            ScenarioOutcome::NoConflict { .. } => return self.no_log_rows(),
            ScenarioOutcome::ConflictProvoked { survivor } => *survivor,
        };
        let rows = match self.run.category {
            ConflictCategory::IiCv => {
                let shared = self.payload("shared")?;
                vec![
                    self.row(Primary, (r, x), Insert, ConstraintViolation, Reject, shared),
                    self.row(Secondary, (x, r), Insert, ConstraintViolation, Reject, shared),
                ]
            }
            ConflictCategory::IuCv => {
                let contested = self.payload("contested")?;
                vec![
                    self.row(Primary, (r, x), Update, ConstraintViolation, Reject, contested),
                    self.row(Secondary, (x, r), Insert, ConstraintViolation, Reject, contested),
                ]
            }
            ConflictCategory::UuCv => {
                let target = self.payload("target")?;
                vec![
                    self.row(Primary, (x, r), Update, ConstraintViolation, Reject, target),
                    self.row(Secondary, (r, x), Update, ConstraintViolation, Reject, target),
                ]
            }
            ConflictCategory::UuTm => {
                let survivor = survivor.ok_or_else(|| {
                    SelfCheckError::internal(format!("timestamp race at rid {r} has no survivor"))
                })?;
                // Each side logs against its own update, accepting only if
                // the peer's write survived.
                let verdict = |at: ClusterRole| if survivor == at { Reject } else { Accept };
                let left = self.payload("primary_update")?;
                let right = self.payload("secondary_update")?;
                let tm = TimestampMismatch;
                vec![
                    self.row(Primary, (r, r), Update, tm, verdict(Primary), left),
                    self.row(Secondary, (r, r), Update, tm, verdict(Secondary), right),
                ]
            }
            ConflictCategory::UdTmMr => {
                let update = self.payload("update")?;
                vec![
                    self.row(Primary, (r, r), Update, MissingRow, Reject, update),
                    self.row(Secondary, (r, r), Delete, TimestampMismatch, Accept, update),
                ]
            }
            ConflictCategory::DdMr => self.no_log_rows()?,
        };
        Ok(rows)
    }

    /// Category-tagged rows: the race ran but nothing should be logged.
    fn no_log_rows(&self) -> Result<Vec<(ClusterRole, OracleRow)>> {
        let category = self.run.category;
        let (primary_action, secondary_action) = category.action_pair();
        let payload = self
            .run
            .payloads
            .first()
            .map(|named| &named.payload)
            .ok_or_else(|| {
                SelfCheckError::internal(format!("{category} scenario drew no payload"))
            })?;
        let tag = ConflictType::NoLogExpected(category);
        let span = (self.run.rid, self.run.ext_rid());
        // Each side receives the change its peer raced with.
        Ok(vec![
            self.row(ClusterRole::Primary, span, secondary_action, tag, Decision::Accept, payload),
            self.row(ClusterRole::Secondary, span, primary_action, tag, Decision::Accept, payload),
        ])
    }
}

/// Oracle rows per receiving cluster and table name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleSet {
    pub rows: BTreeMap<ClusterRole, BTreeMap<String, Vec<OracleRow>>>,
}

impl OracleSet {
    /// Derive expectations from completed scenarios. Failed scenarios
    /// contribute nothing.
    pub fn from_runs(runs: &[ScenarioRun], primary_id: u8, secondary_id: u8) -> Result<Self> {
        let mut set = Self::default();
        for run in runs {
            let Ok(outcome) = &run.result else {
                continue;
            };
            let expect = Expect {
                run,
                ids: [primary_id, secondary_id],
            };
            for (role, row) in expect.rows(outcome)? {
                set.push(role, run.table, row);
            }
        }
        Ok(set)
    }

    pub fn push(&mut self, role: ClusterRole, table: ReplicatedTable, row: OracleRow) {
        self.rows
            .entry(role)
            .or_default()
            .entry(table.name().to_owned())
            .or_default()
            .push(row);
    }

    pub fn rows_for(&self, role: ClusterRole, table: ReplicatedTable) -> &[OracleRow] {
        self.rows
            .get(&role)
            .and_then(|tables| tables.get(table.name()))
            .map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.values().flat_map(BTreeMap::values).map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => SelfCheckError::CannotOpen {
                path: path.to_path_buf(),
            },
            _ => SelfCheckError::Io(err),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn write_json_file(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Loads an [`OracleSet`] straight into a loopback pair's expected tables.
#[derive(Debug)]
pub struct LoopbackOracle {
    set: OracleSet,
    primary: Arc<LoopbackCluster>,
    secondary: Arc<LoopbackCluster>,
}

impl LoopbackOracle {
    pub fn new(
        set: OracleSet,
        primary: Arc<LoopbackCluster>,
        secondary: Arc<LoopbackCluster>,
    ) -> Self {
        Self {
            set,
            primary,
            secondary,
        }
    }

    pub fn set(&self) -> &OracleSet {
        &self.set
    }
}

impl OracleLoader for LoopbackOracle {
    fn load(&self, role: ClusterRole, tables: &[ReplicatedTable]) -> Result<()> {
        let cluster = match role {
            ClusterRole::Primary => &self.primary,
            ClusterRole::Secondary => &self.secondary,
        };
        for &table in tables {
            let rows = self
                .set
                .rows_for(role, table)
                .iter()
                .map(OracleRow::to_values)
                .collect::<Result<Vec<_>>>()?;
            debug!(%role, %table, rows = rows.len(), "loading oracle");
            cluster.clear_expected(table);
            cluster.load_expected(table, rows);
        }
        Ok(())
    }
}
