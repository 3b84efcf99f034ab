//! Conflict scenarios.
//!
//! A scenario seeds a `cid` partition, races one write on each cluster so
//! both commit before either sees the other's change, waits for replication
//! to settle, and asserts the terminal table state on both clusters. The
//! partition is reset afterwards whatever happened.
//!
//! Each scenario owns two `rid`s: `rid` and `rid + 1`.

mod ddmr;
mod iicv;
mod iucv;
mod udtmmr;
mod uucv;
mod uutm;

use std::sync::Barrier;
use std::thread::{self, ScopedJoinHandle};

use serde::Serialize;
use tracing::{info, info_span, warn};
use xdcr_error::{Result, SelfCheckError};
use xdcr_types::hex::hex;
use xdcr_types::{ClusterClient, ReplicatedTable, ResultTable, Value};

use crate::convergence::{self, ConvergenceWaiter};
use crate::gateway::{self, ClusterRole, DualCluster};
use crate::payload::{Payload, PayloadGenerator, verify_store_value};
use crate::taxonomy::ConflictCategory;

/// Number of `rid`s a scenario reserves.
pub const RIDS_PER_SCENARIO: i64 = 2;

/// How a scenario that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    /// Both racing writes committed; the terminal state matched.
    ConflictProvoked {
        /// For races settled by timestamp, the cluster whose write both
        /// sides kept.
        #[serde(skip_serializing_if = "Option::is_none")]
        survivor: Option<ClusterRole>,
    },
    /// One racing write was rejected locally, so no conflict reached the
    /// replication layer.
    NoConflict { reason: String },
}

impl ScenarioOutcome {
    pub const fn provoked() -> Self {
        Self::ConflictProvoked { survivor: None }
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConflictProvoked { .. })
    }
}

/// A payload a scenario drew, under the name the scenario gave it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPayload {
    pub name: &'static str,
    pub payload: Payload,
}

/// Payload source that remembers every payload drawn, so a run can be
/// reported and its oracle reconstructed.
#[derive(Debug)]
pub struct DrawnPayloads<'g> {
    generator: &'g mut PayloadGenerator,
    drawn: Vec<NamedPayload>,
}

impl<'g> DrawnPayloads<'g> {
    pub fn new(generator: &'g mut PayloadGenerator) -> Self {
        Self {
            generator,
            drawn: Vec::new(),
        }
    }

    pub fn draw(&mut self, name: &'static str) -> Payload {
        let payload = self.generator.next_payload();
        self.drawn.push(NamedPayload {
            name,
            payload: payload.clone(),
        });
        payload
    }

    pub fn into_drawn(self) -> Vec<NamedPayload> {
        self.drawn
    }
}

/// Everything a scenario needs: where to write, and how to wait.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioContext<'a> {
    pub category: ConflictCategory,
    pub table: ReplicatedTable,
    pub cid: u8,
    pub rid: i64,
    pub clusters: &'a DualCluster,
    pub rows: &'a ConvergenceWaiter,
    pub quiet: &'a ConvergenceWaiter,
}

impl ScenarioContext<'_> {
    /// The scenario's second row.
    pub const fn ext_rid(&self) -> i64 {
        self.rid + 1
    }

    fn client(&self, role: ClusterRole) -> &dyn ClusterClient {
        self.clusters.client(role)
    }

    fn write_params(&self, rid: i64, payload: &Payload) -> [Value; 4] {
        [
            Value::from(self.cid),
            Value::from(rid),
            Value::from(payload.key()),
            Value::from(payload.store_value()),
        ]
    }

    /// Insert; the result's third table holds the partition after the write.
    fn insert(&self, role: ClusterRole, rid: i64, payload: &Payload) -> Result<ResultTable> {
        let procedure = self.table.insert_procedure();
        let tables = gateway::call(self.client(role), procedure, &self.write_params(rid, payload))?;
        gateway::table_at(&tables, 2, procedure).cloned()
    }

    /// Update; the result's second table holds the partition after the write.
    fn update(&self, role: ClusterRole, rid: i64, payload: &Payload) -> Result<ResultTable> {
        let procedure = self.table.update_procedure();
        let tables = gateway::call(self.client(role), procedure, &self.write_params(rid, payload))?;
        gateway::table_at(&tables, 1, procedure).cloned()
    }

    /// Delete through the default CRUD procedure; returns rows removed.
    fn delete(&self, role: ClusterRole, rid: i64) -> Result<i64> {
        let procedure = self.table.delete_procedure();
        let tables = gateway::call(
            self.client(role),
            procedure,
            &[Value::from(self.cid), Value::from(rid)],
        )?;
        gateway::table_at(&tables, 0, procedure)?.as_scalar_i64()
    }

    /// Wait for the row counts, then for replication to stop applying.
    fn converge(&self, primary: i64, secondary: i64) -> Result<()> {
        convergence::wait_for_row_counts(
            self.rows,
            self.clusters,
            self.table,
            self.cid,
            primary,
            secondary,
        )?;
        convergence::wait_for_quiet_replication(self.quiet, self.clusters, self.table)
    }

    /// Assert a partition snapshot holds exactly `expected`, by `rid`, with
    /// intact stored values.
    fn verify_table_data(
        &self,
        role: ClusterRole,
        data: &ResultTable,
        expected: &[(i64, &Payload)],
    ) -> Result<()> {
        let mismatch = |detail: String| SelfCheckError::TableStateMismatch {
            cluster: role.as_str().to_owned(),
            table: self.table.name().to_owned(),
            detail,
        };
        if data.row_count() != expected.len() {
            return Err(mismatch(format!(
                "expected {} rows for cid {}, found {}",
                expected.len(),
                self.cid,
                data.row_count()
            )));
        }
        for &(rid, payload) in expected {
            let row = data
                .rows()
                .find(|row| row.get_i64("rid").is_ok_and(|r| r == rid))
                .ok_or_else(|| mismatch(format!("row rid={rid} missing")))?;
            let key = row.get_varbinary("key")?.unwrap_or_default();
            if key != payload.key() {
                return Err(mismatch(format!(
                    "rid={rid}: key {} != expected {}",
                    hex(key),
                    hex(payload.key())
                )));
            }
            let stored = row.get_varbinary("value")?.unwrap_or_default();
            let value = verify_store_value(stored)?;
            if value != payload.value() {
                return Err(mismatch(format!(
                    "rid={rid}: value differs from {}",
                    payload.describe()
                )));
            }
        }
        Ok(())
    }

    /// Read the partition back from `role` and assert it holds `expected`.
    fn expect_cluster_rows(&self, role: ClusterRole, expected: &[(i64, &Payload)]) -> Result<()> {
        let data = gateway::read_rows(self.client(role), self.table, self.cid)?;
        self.verify_table_data(role, &data, expected)
    }

    /// Delete the partition on both clusters and wait until both are empty
    /// and replication is quiet.
    pub fn reset(&self) -> Result<()> {
        let attempt = || -> Result<()> {
            for role in ClusterRole::ALL {
                gateway::delete_rows(self.client(role), self.table, self.cid)?;
            }
            self.converge(0, 0)
        };
        attempt().map_err(|err| match err {
            SelfCheckError::ResetFailure { .. } => err,
            other => SelfCheckError::ResetFailure {
                table: self.table.name().to_owned(),
                cid: self.cid,
                detail: other.to_string(),
            },
        })
    }
}

/// Result of racing one write per cluster.
#[derive(Debug)]
pub(crate) enum Raced<A, B> {
    Both(A, B),
    /// At least one side failed gracefully; carries the first such reason.
    Graceful(String),
}

/// Run `primary` and `secondary` on two threads released together by a
/// barrier, and wait for both.
pub(crate) fn race<A, B, FA, FB>(primary: FA, secondary: FB) -> (Result<A>, Result<B>)
where
    A: Send,
    B: Send,
    FA: FnOnce() -> Result<A> + Send,
    FB: FnOnce() -> Result<B> + Send,
{
    let barrier = Barrier::new(2);
    thread::scope(|s| {
        let barrier_ref = &barrier;
        let p = s.spawn(move || {
            barrier_ref.wait();
            primary()
        });
        let q = s.spawn(move || {
            barrier_ref.wait();
            secondary()
        });
        (join_worker(p, "primary"), join_worker(q, "secondary"))
    })
}

fn join_worker<T>(handle: ScopedJoinHandle<'_, Result<T>>, side: &str) -> Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(SelfCheckError::internal(format!("{side} worker panicked"))))
}

/// Combine both sides of a race. A hard failure on either side wins over a
/// graceful one; the primary's hard failure wins over the secondary's.
pub(crate) fn settle<A, B>(primary: Result<A>, secondary: Result<B>) -> Result<Raced<A, B>> {
    match (primary, secondary) {
        (Ok(a), Ok(b)) => Ok(Raced::Both(a, b)),
        (Err(err), _) if !err.is_graceful() => Err(err),
        (_, Err(err)) if !err.is_graceful() => Err(err),
        (Err(err), _) | (_, Err(err)) => Ok(Raced::Graceful(err.to_string())),
    }
}

/// A scenario's result together with the partition reset that followed it.
#[derive(Debug)]
pub struct ScenarioResult {
    pub outcome: Result<ScenarioOutcome>,
    /// Set when the reset failed; later scenarios on the same partition may
    /// see leftover rows.
    pub reset_error: Option<SelfCheckError>,
}

/// Run `ctx.category`'s scenario, then reset the partition.
///
/// A failed reset never replaces the scenario's own result; it is logged and
/// carried alongside it.
pub fn run_scenario(
    ctx: &ScenarioContext<'_>,
    payloads: &mut DrawnPayloads<'_>,
) -> ScenarioResult {
    let span = info_span!(
        "scenario",
        category = %ctx.category,
        table = %ctx.table,
        cid = ctx.cid,
        rid = ctx.rid
    );
    let _guard = span.enter();

    let outcome = match ctx.category {
        ConflictCategory::IiCv => iicv::run(ctx, payloads),
        ConflictCategory::IuCv => iucv::run(ctx, payloads),
        ConflictCategory::UuCv => uucv::run(ctx, payloads),
        ConflictCategory::UuTm => uutm::run(ctx, payloads),
        ConflictCategory::UdTmMr => udtmmr::run(ctx, payloads),
        ConflictCategory::DdMr => ddmr::run(ctx, payloads),
    };

    let reset_error = ctx.reset().err();
    match (&outcome, &reset_error) {
        (Ok(outcome), None) => info!(outcome = ?outcome, "scenario finished"),
        (Ok(outcome), Some(reset)) => {
            warn!(outcome = ?outcome, error = %reset, "scenario finished but reset failed");
        }
        (Err(_), Some(reset)) => warn!(error = %reset, "reset after failed scenario also failed"),
        (Err(_), None) => {}
    }
    ScenarioResult {
        outcome,
        reset_error,
    }
}

/// Hands out disjoint `rid` pairs to consecutive scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RidCounter {
    next: i64,
}

impl RidCounter {
    pub const fn starting_at(first: i64) -> Self {
        Self { next: first }
    }

    /// Reserve `count` consecutive `rid`s; returns the first.
    pub fn reserve(&mut self, count: i64) -> i64 {
        let first = self.next;
        self.next = self.next.saturating_add(count);
        first
    }
}

fn no_conflict(reason: String) -> ScenarioOutcome {
    info!(%reason, "racing write rejected locally, no conflict produced");
    ScenarioOutcome::NoConflict { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_counter_hands_out_disjoint_pairs() {
        let mut rids = RidCounter::starting_at(10);
        assert_eq!(rids.reserve(RIDS_PER_SCENARIO), 10);
        assert_eq!(rids.reserve(RIDS_PER_SCENARIO), 12);
    }

    fn graceful() -> SelfCheckError {
        SelfCheckError::GracefulFailure {
            procedure: "InsertPartitionedSP".to_owned(),
            detail: "CONSTRAINT VIOLATION".to_owned(),
        }
    }

    fn hard(which: &str) -> SelfCheckError {
        SelfCheckError::ProcedureFailed {
            procedure: which.to_owned(),
            status: "CONNECTION_LOST".to_owned(),
            detail: "reset".to_owned(),
        }
    }

    #[test]
    fn settle_prefers_hard_failures() {
        let failed_in = |out: Result<Raced<(), ()>>| match out {
            Err(SelfCheckError::ProcedureFailed { procedure, .. }) => procedure,
            other => panic!("expected a hard failure, got {other:?}"),
        };
        let out = settle::<(), ()>(Err(graceful()), Err(hard("secondary")));
        assert_eq!(failed_in(out), "secondary");

        let out = settle::<(), ()>(Err(hard("primary")), Err(hard("secondary")));
        assert_eq!(failed_in(out), "primary");
    }

    #[test]
    fn settle_graceful_means_no_conflict() {
        let out = settle::<(), u8>(Ok(()), Err(graceful())).expect("graceful is not an error");
        assert!(matches!(out, Raced::Graceful(reason) if reason.contains("CONSTRAINT")));
        let out = settle::<u8, u8>(Ok(1), Ok(2)).expect("both ok");
        assert!(matches!(out, Raced::Both(1, 2)));
    }

    #[test]
    fn race_runs_both_sides() {
        let (a, b) = race(|| Ok(1_u8), || Ok("two"));
        assert_eq!(a.expect("primary"), 1);
        assert_eq!(b.expect("secondary"), "two");
    }

    #[test]
    fn race_reports_panics_as_internal() {
        let (a, b) = race(|| -> Result<()> { panic!("boom") }, || Ok(()));
        assert!(matches!(a, Err(SelfCheckError::Internal(_))));
        assert!(b.is_ok());
    }
}
