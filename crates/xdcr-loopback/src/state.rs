//! Table contents, conflict logs, and the resolution rules applied to
//! changes arriving from the peer cluster.

use std::collections::BTreeMap;

use xdcr_types::hex::hex;
use xdcr_types::schema::{ACTUAL_COLUMNS, DATA_COLUMNS, EXPECTED_COLUMNS};
use xdcr_types::{CallError, ReplicatedTable, ResultTable, Value};

/// Column name of modified-row tallies.
pub(crate) const MODIFIED_COLUMN: &str = "MODIFIED_TUPLES";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    const fn tag(self) -> &'static str {
        match self {
            Self::Insert => "I",
            Self::Update => "U",
            Self::Delete => "D",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Reject,
}

impl Verdict {
    const fn decision(self) -> &'static str {
        match self {
            Self::Accept => "A",
            Self::Reject => "R",
        }
    }

    const fn divergence(self) -> &'static str {
        match self {
            Self::Accept => "C",
            Self::Reject => "D",
        }
    }
}

/// A full row as stored, or as carried by a replicated change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RowImage {
    pub cid: u8,
    pub rid: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Logical commit time of the write that produced this image.
    pub ts: u64,
    /// Cluster that committed that write.
    pub origin: u8,
    /// Kind of that write; reported as the action of `EXT` rows.
    pub last_action: Action,
}

impl RowImage {
    fn data_row(&self) -> Vec<Value> {
        vec![
            Value::from(self.cid),
            Value::from(self.rid),
            Value::from(self.key.clone()),
            Value::from(self.value.clone()),
        ]
    }

    fn tuple_json(&self) -> Vec<u8> {
        serde_json::json!({
            "CID": self.cid,
            "RID": self.rid,
            "KEY": hex(&self.key),
            "VALUE": hex(&self.value),
            "TS": timestamp(self.ts),
        })
        .to_string()
        .into_bytes()
    }
}

/// A committed change queued for the peer.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    Insert { after: RowImage },
    Update { before: RowImage, after: RowImage },
    Delete { before: RowImage },
}

impl Change {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// What applying a replicated change did on the receiving cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApplyOutcome {
    Applied,
    /// Delete of a row that no longer exists; nothing to do, nothing logged.
    Ignored,
    Conflict {
        conflict: &'static str,
        accepted: bool,
    },
}

#[derive(Debug, Clone)]
struct LoggedConflict {
    image: RowImage,
    extrid: i64,
    action: Action,
    conflict: &'static str,
    verdict: Verdict,
    row_type: &'static str,
    current_cluster: u8,
    current_ts: u64,
}

impl LoggedConflict {
    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.image.cid),
            Value::from(self.image.rid),
            Value::from(self.image.origin),
            Value::from(self.extrid),
            Value::from(self.action.tag()),
            Value::from(self.conflict),
            Value::from(self.verdict.decision()),
            Value::from(self.verdict.divergence()),
            Value::from(timestamp(self.image.ts)),
            Value::from(self.image.key.clone()),
            Value::from(self.image.value.clone()),
            Value::from(self.current_cluster),
            Value::from(timestamp(self.current_ts)),
            Value::from(self.row_type),
            Value::from(self.image.tuple_json()),
        ]
    }
}

/// Everything needed to write one resolution's log rows.
struct Resolution {
    conflict: &'static str,
    verdict: Verdict,
    cluster: u8,
    now: u64,
}

#[derive(Debug, Default)]
struct TableState {
    rows: BTreeMap<(u8, i64), RowImage>,
    expected: Vec<Vec<Value>>,
    conflicts: Vec<LoggedConflict>,
}

impl TableState {
    fn partition(&self, cid: u8) -> impl Iterator<Item = &RowImage> {
        self.rows.range((cid, i64::MIN)..=(cid, i64::MAX)).map(|(_, row)| row)
    }

    fn key_holder(&self, cid: u8, key: &[u8], except_rid: i64) -> Option<&RowImage> {
        self.partition(cid)
            .find(|row| row.rid != except_rid && row.key == key)
    }

    fn data_table(&self, cid: u8) -> ResultTable {
        let mut table = ResultTable::new(DATA_COLUMNS);
        for row in self.partition(cid) {
            table.push_row(row.data_row());
        }
        table
    }

    fn log(
        &mut self,
        resolution: &Resolution,
        row_type: &'static str,
        image: &RowImage,
        action: Action,
        conflict: &'static str,
        extrid: i64,
    ) {
        self.conflicts.push(LoggedConflict {
            image: image.clone(),
            extrid,
            action,
            conflict,
            verdict: resolution.verdict,
            row_type,
            current_cluster: resolution.cluster,
            current_ts: resolution.now,
        });
    }
}

/// One cluster's tables and procedure statistics.
#[derive(Debug)]
pub(crate) struct ClusterState {
    id: u8,
    tables: BTreeMap<ReplicatedTable, TableState>,
    invocations: BTreeMap<String, i64>,
}

impl ClusterState {
    pub fn new(id: u8) -> Self {
        let tables = ReplicatedTable::ALL
            .into_iter()
            .map(|table| (table, TableState::default()))
            .collect();
        Self {
            id,
            tables,
            invocations: BTreeMap::new(),
        }
    }

    fn table(&self, table: ReplicatedTable) -> &TableState {
        // Both tables are created in `new` and never removed.
        &self.tables[&table]
    }

    fn table_mut(&mut self, table: ReplicatedTable) -> &mut TableState {
        self.tables.entry(table).or_default()
    }

    pub fn count_invocation(&mut self, procedure: &str) {
        *self.invocations.entry(procedure.to_owned()).or_insert(0) += 1;
    }

    pub fn statistics(&self) -> ResultTable {
        let mut table = ResultTable::new(xdcr_types::schema::STATISTICS_COLUMNS);
        for (procedure, invocations) in &self.invocations {
            table.push_row(vec![
                Value::from(procedure.as_str()),
                Value::from(*invocations),
            ]);
        }
        table
    }

    pub fn insert(
        &mut self,
        table: ReplicatedTable,
        cid: u8,
        rid: i64,
        key: Vec<u8>,
        value: Vec<u8>,
        ts: u64,
    ) -> Result<(Vec<ResultTable>, Change), CallError> {
        let origin = self.id;
        let state = self.table_mut(table);
        if state.rows.contains_key(&(cid, rid)) {
            return Err(CallError::graceful(format!(
                "CONSTRAINT VIOLATION: duplicate primary key ({cid}, {rid}) in {table}"
            )));
        }
        if let Some(holder) = state.key_holder(cid, &key, rid) {
            return Err(CallError::graceful(format!(
                "CONSTRAINT VIOLATION: key {} already held by rid {} in {table}",
                hex(&key),
                holder.rid
            )));
        }
        let after = RowImage {
            cid,
            rid,
            key,
            value,
            ts,
            origin,
            last_action: Action::Insert,
        };
        state.rows.insert((cid, rid), after.clone());
        // The procedure's prior lookup of (cid, rid) found nothing.
        let results = vec![
            ResultTable::new(DATA_COLUMNS),
            ResultTable::scalar(MODIFIED_COLUMN, 1),
            state.data_table(cid),
        ];
        Ok((results, Change::Insert { after }))
    }

    pub fn update(
        &mut self,
        table: ReplicatedTable,
        cid: u8,
        rid: i64,
        key: Vec<u8>,
        value: Vec<u8>,
        ts: u64,
    ) -> Result<(Vec<ResultTable>, Change), CallError> {
        let origin = self.id;
        let state = self.table_mut(table);
        if let Some(holder) = state.key_holder(cid, &key, rid) {
            return Err(CallError::graceful(format!(
                "CONSTRAINT VIOLATION: key {} already held by rid {} in {table}",
                hex(&key),
                holder.rid
            )));
        }
        let Some(row) = state.rows.get_mut(&(cid, rid)) else {
            return Err(CallError::graceful(format!(
                "row ({cid}, {rid}) not found in {table}"
            )));
        };
        let before = row.clone();
        *row = RowImage {
            cid,
            rid,
            key,
            value,
            ts,
            origin,
            last_action: Action::Update,
        };
        let after = row.clone();
        let results = vec![
            ResultTable::scalar(MODIFIED_COLUMN, 1),
            state.data_table(cid),
        ];
        Ok((results, Change::Update { before, after }))
    }

    pub fn delete(&mut self, table: ReplicatedTable, cid: u8, rid: i64) -> Option<Change> {
        self.table_mut(table)
            .rows
            .remove(&(cid, rid))
            .map(|before| Change::Delete { before })
    }

    pub fn delete_partition(&mut self, table: ReplicatedTable, cid: u8) -> Vec<Change> {
        let state = self.table_mut(table);
        let rids: Vec<i64> = state.partition(cid).map(|row| row.rid).collect();
        rids.into_iter()
            .filter_map(|rid| state.rows.remove(&(cid, rid)))
            .map(|before| Change::Delete { before })
            .collect()
    }

    pub fn count(&self, table: ReplicatedTable, cid: u8) -> i64 {
        let count = self.table(table).partition(cid).count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }

    pub fn data_table(&self, table: ReplicatedTable, cid: u8) -> ResultTable {
        self.table(table).data_table(cid)
    }

    pub fn load_expected(&mut self, table: ReplicatedTable, rows: Vec<Vec<Value>>) {
        self.table_mut(table).expected.extend(rows);
    }

    pub fn clear_expected(&mut self, table: ReplicatedTable) {
        self.table_mut(table).expected.clear();
    }

    pub fn expected_table(&self, table: ReplicatedTable) -> ResultTable {
        let mut result = ResultTable::new(EXPECTED_COLUMNS);
        let mut rows = self.table(table).expected.clone();
        rows.sort_by_key(|row| {
            (
                row.first().and_then(Value::as_i64),
                row.get(1).and_then(Value::as_i64),
            )
        });
        for row in rows {
            result.push_row(row);
        }
        result
    }

    pub fn actual_table(
        &self,
        table: ReplicatedTable,
        cid: u8,
        rid: i64,
        extrid: i64,
    ) -> ResultTable {
        let mut logged: Vec<&LoggedConflict> = self
            .table(table)
            .conflicts
            .iter()
            .filter(|c| c.image.cid == cid && (c.image.rid == rid || c.image.rid == extrid))
            .collect();
        logged.sort_by_key(|c| c.image.ts);
        let mut result = ResultTable::new(ACTUAL_COLUMNS);
        for conflict in logged {
            result.push_row(conflict.values());
        }
        result
    }

    pub fn conflict_count(&self, table: ReplicatedTable) -> usize {
        self.table(table).conflicts.len()
    }

    /// Apply a change committed on the peer, resolving and logging any
    /// conflict with local state. `now` is the local apply time.
    pub fn apply_remote(
        &mut self,
        table: ReplicatedTable,
        change: Change,
        now: u64,
    ) -> ApplyOutcome {
        let cluster = self.id;
        let state = self.table_mut(table);
        match change {
            Change::Insert { after } => {
                let existing = state
                    .rows
                    .get(&(after.cid, after.rid))
                    .or_else(|| state.key_holder(after.cid, &after.key, after.rid))
                    .cloned();
                if let Some(existing) = existing {
                    let resolution = Resolution {
                        conflict: "CNST",
                        verdict: Verdict::Reject,
                        cluster,
                        now,
                    };
                    let action = existing.last_action;
                    state.log(&resolution, "EXT", &existing, action, "NONE", after.rid);
                    state.log(&resolution, "NEW", &after, Action::Insert, "CNST", existing.rid);
                    return outcome(&resolution);
                }
                state.rows.insert((after.cid, after.rid), after);
                ApplyOutcome::Applied
            }
            Change::Update { before, after } => {
                let Some(local) = state.rows.get(&(after.cid, after.rid)).cloned() else {
                    let resolution = Resolution {
                        conflict: "MISS",
                        verdict: Verdict::Reject,
                        cluster,
                        now,
                    };
                    state.log(&resolution, "EXP", &before, Action::Update, "MISS", after.rid);
                    state.log(&resolution, "NEW", &after, Action::Update, "NONE", after.rid);
                    return outcome(&resolution);
                };
                if local.ts != before.ts {
                    let verdict = if after.ts > local.ts {
                        Verdict::Accept
                    } else {
                        Verdict::Reject
                    };
                    let resolution = Resolution {
                        conflict: "MSMT",
                        verdict,
                        cluster,
                        now,
                    };
                    state.log(&resolution, "EXP", &before, Action::Update, "MSMT", local.rid);
                    state.log(&resolution, "EXT", &local, local.last_action, "MSMT", after.rid);
                    state.log(&resolution, "NEW", &after, Action::Update, "NONE", local.rid);
                    if verdict == Verdict::Accept {
                        state.rows.insert((after.cid, after.rid), after);
                    }
                    return outcome(&resolution);
                }
                if let Some(holder) = state.key_holder(after.cid, &after.key, after.rid).cloned() {
                    let resolution = Resolution {
                        conflict: "CNST",
                        verdict: Verdict::Reject,
                        cluster,
                        now,
                    };
                    state.log(&resolution, "EXP", &before, Action::Update, "NONE", holder.rid);
                    state.log(&resolution, "EXT", &holder, holder.last_action, "NONE", after.rid);
                    state.log(&resolution, "NEW", &after, Action::Update, "CNST", holder.rid);
                    return outcome(&resolution);
                }
                state.rows.insert((after.cid, after.rid), after);
                ApplyOutcome::Applied
            }
            Change::Delete { before } => {
                let Some(local) = state.rows.get(&(before.cid, before.rid)).cloned() else {
                    return ApplyOutcome::Ignored;
                };
                if local.ts != before.ts {
                    let resolution = Resolution {
                        conflict: "MSMT",
                        verdict: Verdict::Accept,
                        cluster,
                        now,
                    };
                    state.log(&resolution, "EXP", &before, Action::Delete, "MSMT", local.rid);
                    state.log(&resolution, "EXT", &local, local.last_action, "MSMT", before.rid);
                    state.rows.remove(&(before.cid, before.rid));
                    return outcome(&resolution);
                }
                state.rows.remove(&(before.cid, before.rid));
                ApplyOutcome::Applied
            }
        }
    }
}

fn outcome(resolution: &Resolution) -> ApplyOutcome {
    ApplyOutcome::Conflict {
        conflict: resolution.conflict,
        accepted: resolution.verdict == Verdict::Accept,
    }
}

/// Zero-padded so lexical order equals numeric order.
pub(crate) fn timestamp(ts: u64) -> String {
    format!("{ts:020}")
}
