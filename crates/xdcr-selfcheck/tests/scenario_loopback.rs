//! Each conflict scenario against an in-process loopback pair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use xdcr_error::SelfCheckError;
use xdcr_loopback::{LoopbackCluster, LoopbackConfig, LoopbackPair};
use xdcr_selfcheck::client::ConflictClient;
use xdcr_selfcheck::config::{ConvergenceConfig, SelfCheckConfig};
use xdcr_selfcheck::gateway::{self, ClusterRole, DualCluster};
use xdcr_selfcheck::scenario::ScenarioContext;
use xdcr_selfcheck::{ConflictCategory, ScenarioOutcome};
use xdcr_types::sql::{self, Statement};
use xdcr_types::{
    CallError, CallResult, ClusterClient, ReplicatedTable, ResponseStatus, ResultTable, Value,
    schema,
};

const CID: u8 = 5;

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn config() -> SelfCheckConfig {
    SelfCheckConfig {
        seed: 61_301,
        cid: CID,
        convergence: ConvergenceConfig {
            deadline_ms: 10_000,
            poll_interval_ms: 5,
            replication_poll_interval_ms: 60,
        },
        ..SelfCheckConfig::default()
    }
}

/// A loopback cluster behind a client that misbehaves in ways the engine
/// double never does on its own.
struct Faulty {
    cluster: Arc<LoopbackCluster>,
    failing_deletes: AtomicUsize,
    keeps_own_write: bool,
    own_write: Mutex<Option<Vec<Value>>>,
}

impl Faulty {
    fn new(cluster: Arc<LoopbackCluster>) -> Self {
        Self {
            cluster,
            failing_deletes: AtomicUsize::new(0),
            keeps_own_write: false,
            own_write: Mutex::new(None),
        }
    }

    /// Fail the next `count` partition deletes with a lost connection.
    fn failing_deletes(self, count: usize) -> Self {
        self.failing_deletes.store(count, Ordering::SeqCst);
        self
    }

    /// Report the last update sent through this client as the row's content,
    /// whatever replication did to it.
    fn keeping_own_write(mut self) -> Self {
        self.keeps_own_write = true;
        self
    }
}

impl ClusterClient for Faulty {
    fn cluster_id(&self) -> u8 {
        self.cluster.cluster_id()
    }

    fn call_procedure(&self, procedure: &str, params: &[Value]) -> CallResult {
        if self.keeps_own_write {
            let mut own_write = self.own_write.lock().expect("own write lock");
            if ReplicatedTable::ALL.iter().any(|t| t.update_procedure() == procedure) {
                *own_write = Some(params.to_vec());
            } else if ReplicatedTable::ALL.iter().any(|t| t.read_procedure() == procedure) {
                if let Some(row) = own_write.clone() {
                    let mut data = ResultTable::new(schema::DATA_COLUMNS);
                    data.push_row(row);
                    return Ok(vec![data]);
                }
            }
        }
        self.cluster.call_procedure(procedure, params)
    }

    fn adhoc(&self, statement: &str, params: &[Value]) -> CallResult {
        let is_delete = matches!(sql::recognize(statement), Some(Statement::DeleteRows { .. }));
        let fail = is_delete
            && self
                .failing_deletes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if fail {
            return Err(CallError::new(ResponseStatus::ConnectionLost, "injected"));
        }
        self.cluster.adhoc(statement, params)
    }
}

struct Harness {
    pair: LoopbackPair,
    client: ConflictClient,
}

impl Harness {
    fn start() -> Self {
        Self::start_with(|cluster| cluster as Arc<dyn ClusterClient>)
    }

    /// Start a pair and hand each cluster to `wrap` before the harness
    /// talks to it.
    fn start_with<F>(wrap: F) -> Self
    where
        F: Fn(Arc<LoopbackCluster>) -> Arc<dyn ClusterClient>,
    {
        init_test_logging();
        let pair = LoopbackPair::start(&LoopbackConfig {
            replication_lag: Duration::from_millis(20),
            ..LoopbackConfig::default()
        })
        .expect("start loopback pair");
        let clusters = DualCluster::new(wrap(pair.primary()), wrap(pair.secondary()));
        let client = ConflictClient::new(clusters, &config());
        Self { pair, client }
    }

    fn cluster(&self, role: ClusterRole) -> Arc<LoopbackCluster> {
        match role {
            ClusterRole::Primary => self.pair.primary(),
            ClusterRole::Secondary => self.pair.secondary(),
        }
    }

    fn row_counts(&self, table: ReplicatedTable) -> (i64, i64) {
        let clusters = self.client.clusters();
        let count = |role| gateway::count_rows(clusters.client(role), table, CID).expect("count");
        (count(ClusterRole::Primary), count(ClusterRole::Secondary))
    }

    fn logged(&self, table: ReplicatedTable) -> (usize, usize) {
        (
            self.cluster(ClusterRole::Primary).conflict_count(table),
            self.cluster(ClusterRole::Secondary).conflict_count(table),
        )
    }
}

fn assert_status(err: &SelfCheckError, expected: &str) {
    match err {
        SelfCheckError::ProcedureFailed { status, .. } => assert_eq!(status, expected),
        other => panic!("expected a {expected} procedure failure, got {other:?}"),
    }
}

fn assert_provoked(category: ConflictCategory, table: ReplicatedTable, logged: (usize, usize)) {
    let mut harness = Harness::start();
    let run = harness.client.run(category, table);
    let outcome = run.result.expect("scenario passes");
    assert!(outcome.is_conflict(), "{category}: {outcome:?}");
    assert_eq!(harness.row_counts(table), (0, 0), "{category}: partition reset");
    assert_eq!(harness.logged(table), logged, "{category}: conflict rows per cluster");
}

#[test]
fn insert_insert_logs_a_rejection_on_each_side() {
    assert_provoked(ConflictCategory::IiCv, ReplicatedTable::Partitioned, (2, 2));
}

#[test]
fn insert_update_logs_both_sides() {
    // Update side logs {EXP, EXT, NEW}, insert side {EXT, NEW}.
    assert_provoked(ConflictCategory::IuCv, ReplicatedTable::Replicated, (3, 2));
}

#[test]
fn update_update_constraint_logs_three_rows_each() {
    assert_provoked(ConflictCategory::UuCv, ReplicatedTable::Partitioned, (3, 3));
}

#[test]
fn update_update_timestamp_converges_on_one_write() {
    let mut harness = Harness::start();
    let run = harness.client.run(ConflictCategory::UuTm, ReplicatedTable::Partitioned);
    match run.result.expect("scenario passes") {
        ScenarioOutcome::ConflictProvoked { survivor } => {
            assert!(survivor.is_some(), "both clusters keep the later write");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(harness.logged(ReplicatedTable::Partitioned), (3, 3));
}

#[test]
fn update_delete_leaves_both_clusters_empty() {
    // Deleting side: {EXP, NEW}; updating side: {EXP, EXT}.
    assert_provoked(ConflictCategory::UdTmMr, ReplicatedTable::Replicated, (2, 2));
}

#[test]
fn delete_delete_logs_nothing() {
    assert_provoked(ConflictCategory::DdMr, ReplicatedTable::Partitioned, (0, 0));
}

#[test]
fn consecutive_scenarios_use_fresh_rids() {
    let mut harness = Harness::start();
    let first = harness.client.run(ConflictCategory::DdMr, ReplicatedTable::Partitioned);
    let second = harness.client.run(ConflictCategory::DdMr, ReplicatedTable::Partitioned);
    assert!(first.result.is_ok() && second.result.is_ok());
    assert_eq!(second.rid, first.rid + 2);
}

#[test]
fn graceful_rejection_means_no_conflict() {
    let mut harness = Harness::start();
    let table = ReplicatedTable::Partitioned;
    harness.cluster(ClusterRole::Secondary).inject_failure(
        table.insert_procedure(),
        CallError::graceful("CONSTRAINT VIOLATION: injected"),
    );
    let run = harness.client.run(ConflictCategory::IiCv, table);
    match run.result.expect("graceful failure is not an error") {
        ScenarioOutcome::NoConflict { reason } => assert!(reason.contains("injected"), "{reason}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(harness.row_counts(table), (0, 0));
    assert_eq!(harness.logged(table), (0, 0));
}

#[test]
fn hard_failure_propagates_after_reset() {
    let mut harness = Harness::start();
    let table = ReplicatedTable::Replicated;
    harness.cluster(ClusterRole::Primary).inject_failure(
        table.insert_procedure(),
        CallError::new(ResponseStatus::ConnectionLost, "injected"),
    );
    let run = harness.client.run(ConflictCategory::IiCv, table);
    let err = run.result.expect_err("hard failure fails the scenario");
    assert_status(&err, "CONNECTION_LOST");
    // The secondary's insert went through and was cleaned up anyway.
    assert_eq!(harness.row_counts(table), (0, 0));
}

#[test]
fn failed_seed_convergence_still_resets() {
    let mut harness = Harness::start();
    let table = ReplicatedTable::Partitioned;
    // The first ad-hoc call on the secondary is the seed's row-count poll.
    harness.cluster(ClusterRole::Secondary).inject_failure(
        xdcr_types::ADHOC_PROC,
        CallError::new(ResponseStatus::ConnectionTimeout, "injected"),
    );
    let run = harness.client.run(ConflictCategory::DdMr, table);
    let err = run.result.expect_err("injected failure");
    assert_status(&err, "CONNECTION_TIMEOUT");
    assert_eq!(harness.row_counts(table), (0, 0));
}

#[test]
fn reset_is_idempotent() {
    let harness = Harness::start();
    let config = config();
    let (rows, quiet) = (config.row_waiter(), config.replication_waiter());
    let ctx = ScenarioContext {
        category: ConflictCategory::DdMr,
        table: ReplicatedTable::Replicated,
        cid: CID,
        rid: 1,
        clusters: harness.client.clusters(),
        rows: &rows,
        quiet: &quiet,
    };
    ctx.reset().expect("reset of an empty partition");
    ctx.reset().expect("second reset");
    assert_eq!(harness.row_counts(ReplicatedTable::Replicated), (0, 0));
    assert_eq!(harness.logged(ReplicatedTable::Replicated), (0, 0));
}

#[test]
fn reset_failure_keeps_the_scenario_outcome() {
    let mut harness = Harness::start_with(|cluster| {
        let faulty = Faulty::new(cluster);
        let faulty = if faulty.cluster_id() == 1 { faulty.failing_deletes(1) } else { faulty };
        Arc::new(faulty)
    });
    let table = ReplicatedTable::Partitioned;
    let run = harness.client.run(ConflictCategory::UuTm, table);
    match run.result.expect("the scenario itself passed") {
        ScenarioOutcome::ConflictProvoked { survivor } => assert!(survivor.is_some()),
        other => panic!("unexpected outcome {other:?}"),
    }
    let reset = run.reset_error.expect("reset failed");
    assert!(matches!(reset, SelfCheckError::ResetFailure { cid: CID, .. }), "{reset:?}");
    // The primary's delete failed first, so neither side was cleared.
    assert_eq!(harness.row_counts(table), (1, 1));
}

#[test]
fn reset_failure_after_a_failed_scenario_keeps_the_scenario_error() {
    let mut harness =
        Harness::start_with(|cluster| Arc::new(Faulty::new(cluster).failing_deletes(1)));
    let table = ReplicatedTable::Replicated;
    harness.cluster(ClusterRole::Primary).inject_failure(
        table.update_procedure(),
        CallError::new(ResponseStatus::ConnectionTimeout, "injected"),
    );
    let run = harness.client.run(ConflictCategory::UuTm, table);
    let err = run.result.expect_err("injected failure");
    assert_status(&err, "CONNECTION_TIMEOUT");
    let reset = run.reset_error.expect("reset failed too");
    assert!(matches!(reset, SelfCheckError::ResetFailure { .. }), "{reset:?}");
}

#[test]
fn clusters_keeping_different_writes_fail_the_timestamp_scenario() {
    let mut harness =
        Harness::start_with(|cluster| Arc::new(Faulty::new(cluster).keeping_own_write()));
    let table = ReplicatedTable::Partitioned;
    let run = harness.client.run(ConflictCategory::UuTm, table);
    let err = run.result.expect_err("diverged clusters");
    match &err {
        SelfCheckError::TableStateMismatch { table: name, detail, .. } => {
            assert_eq!(name, table.name());
            assert!(detail.contains("clusters kept different writes"), "{detail}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(run.reset_error.is_none());
    assert_eq!(harness.row_counts(table), (0, 0));
}
