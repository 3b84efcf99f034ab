//! Scenario matrix plus verification pass against a loopback pair.

use std::sync::Arc;
use std::time::Duration;

use xdcr_error::SelfCheckError;
use xdcr_loopback::{LoopbackConfig, LoopbackPair};
use xdcr_selfcheck::client::ConflictClient;
use xdcr_selfcheck::config::{ConvergenceConfig, SelfCheckConfig};
use xdcr_selfcheck::oracle::{LoopbackOracle, OracleSet};
use xdcr_selfcheck::runner::{LoopbackRun, run_loopback};
use xdcr_selfcheck::verifier::{ConflictVerifier, PreloadedOracle};
use xdcr_selfcheck::{ClusterRole, ConflictCategory, DualCluster, RESOLVE_CHAIN, ResolveChecker};
use xdcr_types::{ClusterClient, ReplicatedTable, Value};

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

fn config() -> SelfCheckConfig {
    SelfCheckConfig {
        seed: 61_302,
        cid: 9,
        first_rid: 1_000,
        convergence: ConvergenceConfig {
            deadline_ms: 10_000,
            poll_interval_ms: 5,
            replication_poll_interval_ms: 60,
        },
        ..SelfCheckConfig::default()
    }
}

#[test]
fn every_category_on_both_tables_verifies() {
    init_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let oracle_path = dir.path().join("oracle.json");
    let options = LoopbackRun {
        oracle_out: Some(oracle_path.clone()),
        ..LoopbackRun::with_lag(Duration::from_millis(20))
    };

    let report = run_loopback(&config(), &options).expect("run");
    assert!(report.passed(), "{report:#?}");
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.summary.scenarios, 12);
    assert_eq!(report.summary.conflicts_provoked, 12);
    // One oracle record per scenario per cluster.
    assert_eq!(report.summary.records_verified, 24);

    let verification = report.verification.as_ref().expect("verification ran");
    let claims = verification.total_claims();
    for checker in RESOLVE_CHAIN {
        assert_eq!(claims.get(&checker), Some(&4), "{checker} claims");
    }

    let oracle = OracleSet::from_json_file(&oracle_path).expect("oracle written");
    assert_eq!(oracle.len(), 24);
}

struct Pair {
    pair: LoopbackPair,
    clusters: DualCluster,
}

fn start() -> Pair {
    init_test_logging();
    let pair = LoopbackPair::start(&LoopbackConfig {
        replication_lag: Duration::from_millis(20),
        ..LoopbackConfig::default()
    })
    .expect("start loopback pair");
    let clusters = DualCluster::new(
        pair.primary() as Arc<dyn ClusterClient>,
        pair.secondary() as Arc<dyn ClusterClient>,
    );
    Pair { pair, clusters }
}

fn verifier(clusters: &DualCluster, table: ReplicatedTable) -> ConflictVerifier<'_> {
    ConflictVerifier::new(clusters, vec![table], config().replication_waiter())
}

#[test]
fn oracle_loaded_out_of_band_is_verified() {
    let Pair { pair, clusters } = start();
    let table = ReplicatedTable::Partitioned;
    let mut client = ConflictClient::new(clusters.clone(), &config());
    let run = client.run(ConflictCategory::UuCv, table);
    assert!(run.result.is_ok());

    let set =
        OracleSet::from_runs(&[run], pair.primary().id(), pair.secondary().id()).expect("oracle");
    for row in set.rows_for(ClusterRole::Secondary, table) {
        pair.secondary()
            .load_expected(table, vec![row.to_values().expect("values")]);
    }

    let verified = verifier(&clusters, table)
        .verify_cluster(ClusterRole::Secondary, &PreloadedOracle)
        .expect("secondary verifies");
    assert_eq!(verified.tables[0].records_verified, 1);
    assert_eq!(verified.tables[0].claims.get(&ResolveChecker::UuCv), Some(&1));
}

#[test]
fn wrong_decision_in_the_oracle_is_a_mismatch() {
    let Pair { pair, clusters } = start();
    let table = ReplicatedTable::Replicated;
    let mut client = ConflictClient::new(clusters.clone(), &config());
    let run = client.run(ConflictCategory::UdTmMr, table);
    assert!(run.result.is_ok());

    let mut set =
        OracleSet::from_runs(&[run], pair.primary().id(), pair.secondary().id()).expect("oracle");
    for rows in set.rows.values_mut().flat_map(|tables| tables.values_mut()) {
        for row in rows {
            if row.action_type == "D" {
                row.decision = "R".to_owned();
            }
        }
    }
    let oracle = LoopbackOracle::new(set, pair.primary(), pair.secondary());

    // Primary's expectation is untouched.
    verifier(&clusters, table)
        .verify_cluster(ClusterRole::Primary, &oracle)
        .expect("primary verifies");
    let err = verifier(&clusters, table)
        .verify_cluster(ClusterRole::Secondary, &oracle)
        .expect_err("decision mismatch");
    assert!(matches!(err, SelfCheckError::ExpectationMismatch { .. }), "{err:?}");
    assert!(err.to_string().contains("UD_TM_MR"), "{err}");
}

#[test]
fn unexpected_log_rows_for_a_no_log_record_fail() {
    let Pair { pair, clusters } = start();
    let table = ReplicatedTable::Partitioned;
    let mut client = ConflictClient::new(clusters.clone(), &config());
    let run = client.run(ConflictCategory::IiCv, table);
    assert!(run.result.is_ok());

    // Claim the insert/insert race produced nothing on the primary.
    let oracle_row = vec![
        Value::from(run.cid),
        Value::from(run.rid),
        Value::from(pair.secondary().id()),
        Value::from(run.ext_rid()),
        Value::from("I"),
        Value::from("IICV"),
        Value::from("A"),
        Value::Null,
        Value::from("0"),
        Value::from(b"k".as_slice()),
        Value::from(b"v".as_slice()),
    ];
    pair.primary().load_expected(table, vec![oracle_row]);
    let err = verifier(&clusters, table)
        .verify_cluster(ClusterRole::Primary, &PreloadedOracle)
        .expect_err("log rows exist");
    assert!(matches!(err, SelfCheckError::ExpectationMismatch { .. }), "{err:?}");
}

#[test]
fn unclaimable_record_is_unverifiable() {
    let Pair { pair, clusters } = start();
    let table = ReplicatedTable::Partitioned;
    // An insert logged as a timestamp mismatch matches no checker.
    let oracle_row = vec![
        Value::from(9_u8),
        Value::from(1_i64),
        Value::from(2_u8),
        Value::from(2_i64),
        Value::from("I"),
        Value::from("MSMT"),
        Value::from("A"),
        Value::Null,
        Value::from("0"),
        Value::from(b"k".as_slice()),
        Value::from(b"v".as_slice()),
    ];
    pair.primary().load_expected(table, vec![oracle_row]);
    let err = verifier(&clusters, table)
        .verify_cluster(ClusterRole::Primary, &PreloadedOracle)
        .expect_err("no checker claims it");
    assert!(matches!(err, SelfCheckError::UnverifiableConflictShape { .. }), "{err:?}");
}
