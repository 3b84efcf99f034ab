use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};
use xdcr_types::sql::{self, Statement};
use xdcr_types::{
    ADHOC_PROC, CallError, CallResult, ClusterClient, QUIESCE_PROC, ReplicatedTable, ResultTable,
    STATISTICS_PROC, Value,
};

use crate::replication::{ChangeQueue, Replicated};
use crate::state::{ApplyOutcome, Change, ClusterState, MODIFIED_COLUMN};

/// Logical clock shared by both clusters so every commit and every apply has
/// a distinct, totally ordered timestamp.
#[derive(Debug, Default)]
pub(crate) struct LogicalClock {
    last: AtomicU64,
}

impl LogicalClock {
    pub fn tick(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, Copy)]
enum CrudOp {
    Insert,
    Update,
    Read,
    Delete,
}

fn route(procedure: &str) -> Option<(ReplicatedTable, CrudOp)> {
    ReplicatedTable::ALL.into_iter().find_map(|table| {
        let op = if procedure == table.insert_procedure() {
            CrudOp::Insert
        } else if procedure == table.update_procedure() {
            CrudOp::Update
        } else if procedure == table.read_procedure() {
            CrudOp::Read
        } else if procedure == table.delete_procedure() {
            CrudOp::Delete
        } else {
            return None;
        };
        Some((table, op))
    })
}

/// One simulated cluster: its tables, conflict logs, procedure statistics
/// and both replication streams it participates in.
#[derive(Debug)]
pub struct LoopbackCluster {
    id: u8,
    clock: Arc<LogicalClock>,
    state: Mutex<ClusterState>,
    outbound: Arc<ChangeQueue>,
    inbound: Arc<ChangeQueue>,
    quiesce_timeout: Duration,
    injected: Mutex<VecDeque<(String, CallError)>>,
}

impl LoopbackCluster {
    pub(crate) fn new(
        id: u8,
        clock: Arc<LogicalClock>,
        outbound: Arc<ChangeQueue>,
        inbound: Arc<ChangeQueue>,
        quiesce_timeout: Duration,
    ) -> Self {
        Self {
            id,
            clock,
            state: Mutex::new(ClusterState::new(id)),
            outbound,
            inbound,
            quiesce_timeout,
            injected: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Make the next call to `procedure` fail with `error` instead of
    /// executing. Failures are consumed in injection order.
    pub fn inject_failure(&self, procedure: &str, error: CallError) {
        self.injected
            .lock()
            .push_back((procedure.to_owned(), error));
    }

    /// Append oracle rows to `<table>_conflict_expected`, in
    /// `schema::EXPECTED_COLUMNS` order.
    pub fn load_expected(&self, table: ReplicatedTable, rows: Vec<Vec<Value>>) {
        self.state.lock().load_expected(table, rows);
    }

    pub fn clear_expected(&self, table: ReplicatedTable) {
        self.state.lock().clear_expected(table);
    }

    /// Number of rows written to `<table>_conflict_actual` so far.
    pub fn conflict_count(&self, table: ReplicatedTable) -> usize {
        self.state.lock().conflict_count(table)
    }

    /// Changes committed here and not yet applied on the peer.
    pub fn replication_backlog(&self) -> usize {
        self.outbound.backlog()
    }

    pub(crate) fn apply_remote(&self, replicated: Replicated) {
        let Replicated { table, change } = replicated;
        let kind = change.kind();
        let mut state = self.state.lock();
        state.count_invocation(table.apply_binary_log_procedure());
        let now = self.clock.tick();
        match state.apply_remote(table, change, now) {
            ApplyOutcome::Applied => {
                trace!(cluster_id = self.id, %table, kind, "applied replicated change");
            }
            ApplyOutcome::Ignored => {
                trace!(cluster_id = self.id, %table, kind, "replicated delete found no row");
            }
            ApplyOutcome::Conflict { conflict, accepted } => {
                debug!(
                    cluster_id = self.id,
                    %table,
                    kind,
                    conflict,
                    accepted,
                    "resolved replication conflict"
                );
            }
        }
    }

    fn take_injected(&self, procedure: &str) -> Option<CallError> {
        let mut injected = self.injected.lock();
        let index = injected.iter().position(|(name, _)| name == procedure)?;
        injected.remove(index).map(|(_, error)| error)
    }

    fn publish(&self, table: ReplicatedTable, changes: impl IntoIterator<Item = Change>) {
        for change in changes {
            self.outbound.push(table, change);
        }
    }

    fn crud(
        &self,
        table: ReplicatedTable,
        op: CrudOp,
        procedure: &str,
        params: &[Value],
    ) -> CallResult {
        let cid = param_cid(procedure, params)?;
        let mut state = self.state.lock();
        state.count_invocation(procedure);
        match op {
            CrudOp::Insert | CrudOp::Update => {
                let rid = param_i64(procedure, params, 1)?;
                let key = param_bytes(procedure, params, 2)?;
                let value = param_bytes(procedure, params, 3)?;
                let ts = self.clock.tick();
                let (results, change) = match op {
                    CrudOp::Insert => state.insert(table, cid, rid, key, value, ts)?,
                    _ => state.update(table, cid, rid, key, value, ts)?,
                };
                // Queued under the state lock so the stream keeps commit order.
                self.publish(table, [change]);
                Ok(results)
            }
            CrudOp::Read => Ok(vec![state.data_table(table, cid)]),
            CrudOp::Delete => {
                let rid = param_i64(procedure, params, 1)?;
                let change = state.delete(table, cid, rid);
                let modified = i64::from(change.is_some());
                self.publish(table, change);
                Ok(vec![ResultTable::scalar(MODIFIED_COLUMN, modified)])
            }
        }
    }

    fn run_adhoc(&self, statement: &str, params: &[Value]) -> CallResult {
        let parsed = sql::recognize(statement)
            .ok_or_else(|| CallError::unexpected(format!("unsupported statement: {statement}")))?;
        let table_name = match parsed {
            Statement::CountRows { table }
            | Statement::DeleteRows { table }
            | Statement::SelectRows { table }
            | Statement::SelectExpected { table }
            | Statement::SelectActual { table } => table,
        };
        let table = ReplicatedTable::from_name(table_name)
            .map_err(|err| CallError::unexpected(err.to_string()))?;
        let mut state = self.state.lock();
        state.count_invocation(ADHOC_PROC);
        let result = match parsed {
            Statement::CountRows { .. } => {
                let cid = param_cid(ADHOC_PROC, params)?;
                ResultTable::scalar("C1", state.count(table, cid))
            }
            Statement::DeleteRows { .. } => {
                let cid = param_cid(ADHOC_PROC, params)?;
                let changes = state.delete_partition(table, cid);
                let modified = i64::try_from(changes.len()).unwrap_or(i64::MAX);
                self.publish(table, changes);
                ResultTable::scalar(MODIFIED_COLUMN, modified)
            }
            Statement::SelectRows { .. } => {
                let cid = param_cid(ADHOC_PROC, params)?;
                state.data_table(table, cid)
            }
            Statement::SelectExpected { .. } => state.expected_table(table),
            Statement::SelectActual { .. } => {
                let cid = param_cid(ADHOC_PROC, params)?;
                let rid = param_i64(ADHOC_PROC, params, 1)?;
                let extrid = param_i64(ADHOC_PROC, params, 2)?;
                state.actual_table(table, cid, rid, extrid)
            }
        };
        Ok(vec![result])
    }

    fn quiesce(&self) -> CallResult {
        let drained = self.outbound.wait_drained(self.quiesce_timeout)
            && self.inbound.wait_drained(self.quiesce_timeout);
        if !drained {
            return Err(CallError::unexpected(format!(
                "replication did not drain within {}ms",
                self.quiesce_timeout.as_millis()
            )));
        }
        self.state.lock().count_invocation(QUIESCE_PROC);
        Ok(vec![ResultTable::scalar("STATUS", 0)])
    }
}

impl ClusterClient for LoopbackCluster {
    fn cluster_id(&self) -> u8 {
        self.id
    }

    fn call_procedure(&self, procedure: &str, params: &[Value]) -> CallResult {
        if let Some(error) = self.take_injected(procedure) {
            debug!(cluster_id = self.id, procedure, status = %error.status, "injected failure");
            return Err(error);
        }
        match procedure {
            ADHOC_PROC => {
                let (statement, rest) = params
                    .split_first()
                    .ok_or_else(|| CallError::unexpected("@AdHoc requires a statement"))?;
                let statement = statement
                    .as_text()
                    .ok_or_else(|| CallError::unexpected("@AdHoc statement must be VARCHAR"))?;
                self.run_adhoc(statement, rest)
            }
            STATISTICS_PROC => Ok(vec![self.state.lock().statistics()]),
            QUIESCE_PROC => self.quiesce(),
            _ => {
                let (table, op) = route(procedure).ok_or_else(|| {
                    CallError::unexpected(format!("procedure {procedure} not found"))
                })?;
                self.crud(table, op, procedure, params)
            }
        }
    }

    fn adhoc(&self, statement: &str, params: &[Value]) -> CallResult {
        if let Some(error) = self.take_injected(ADHOC_PROC) {
            return Err(error);
        }
        self.run_adhoc(statement, params)
    }
}

fn param_i64(procedure: &str, params: &[Value], index: usize) -> Result<i64, CallError> {
    params.get(index).and_then(Value::as_i64).ok_or_else(|| {
        CallError::unexpected(format!("{procedure}: parameter {index} must be BIGINT"))
    })
}

fn param_cid(procedure: &str, params: &[Value]) -> Result<u8, CallError> {
    let cid = param_i64(procedure, params, 0)?;
    u8::try_from(cid)
        .map_err(|_| CallError::unexpected(format!("{procedure}: cid {cid} out of range")))
}

fn param_bytes(procedure: &str, params: &[Value], index: usize) -> Result<Vec<u8>, CallError> {
    params
        .get(index)
        .and_then(Value::as_bytes)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            CallError::unexpected(format!("{procedure}: parameter {index} must be VARBINARY"))
        })
}
