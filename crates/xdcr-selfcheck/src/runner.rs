//! Drives the category × table matrix and the verification pass.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, warn};
use xdcr_error::Result;
use xdcr_loopback::{LoopbackConfig, LoopbackPair};
use xdcr_types::ClusterClient;

use crate::client::{ConflictClient, ScenarioRun};
use crate::config::SelfCheckConfig;
use crate::gateway::DualCluster;
use crate::oracle::{LoopbackOracle, OracleSet};
use crate::report::{ScenarioReport, SelfCheckReport};
use crate::verifier::{ConflictVerifier, OracleLoader, VerificationReport};

/// A scenario and the round it ran in.
#[derive(Debug)]
pub struct RoundRun {
    pub round: u32,
    pub run: ScenarioRun,
}

/// Run every configured category against every configured table, `rounds`
/// times. Scenario failures are recorded, not propagated.
pub fn run_matrix(clusters: &DualCluster, config: &SelfCheckConfig) -> Result<Vec<RoundRun>> {
    config.validate()?;
    let tables = config.resolved_tables()?;
    let categories = config.resolved_categories()?;
    let mut client = ConflictClient::new(clusters.clone(), config);
    let mut runs = Vec::with_capacity(tables.len() * categories.len());
    for round in 0..config.rounds {
        let _span = info_span!("round", round).entered();
        client.start_round(round);
        for &table in &tables {
            for &category in &categories {
                runs.push(RoundRun {
                    round,
                    run: client.run(category, table),
                });
            }
        }
    }
    let failed = runs.iter().filter(|r| r.run.result.is_err()).count();
    let reset_failures = runs.iter().filter(|r| r.run.reset_error.is_some()).count();
    info!(scenarios = runs.len(), failed, reset_failures, "scenario matrix finished");
    Ok(runs)
}

/// Verify both clusters against whatever `loader` installs.
pub fn verify(
    clusters: &DualCluster,
    config: &SelfCheckConfig,
    loader: &dyn OracleLoader,
) -> Result<VerificationReport> {
    ConflictVerifier::new(clusters, config.resolved_tables()?, config.replication_waiter())
        .verify_all(loader)
}

/// Options for a run against an in-process loopback pair.
#[derive(Debug, Clone, Default)]
pub struct LoopbackRun {
    pub loopback: LoopbackConfig,
    /// Skip the verification pass.
    pub skip_verify: bool,
    /// Where to write the derived oracle, if anywhere.
    pub oracle_out: Option<PathBuf>,
}

impl LoopbackRun {
    pub fn with_lag(lag: Duration) -> Self {
        Self {
            loopback: LoopbackConfig {
                replication_lag: lag,
                ..LoopbackConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Start a loopback pair, run the matrix, derive the oracle from the runs
/// and verify both clusters' conflict logs against it.
pub fn run_loopback(config: &SelfCheckConfig, options: &LoopbackRun) -> Result<SelfCheckReport> {
    let pair = LoopbackPair::start(&options.loopback)?;
    let (primary, secondary) = (pair.primary(), pair.secondary());
    let clusters = DualCluster::new(
        Arc::clone(&primary) as Arc<dyn ClusterClient>,
        Arc::clone(&secondary) as Arc<dyn ClusterClient>,
    );

    let runs = run_matrix(&clusters, config)?;
    let mut report = SelfCheckReport::new(
        config.seed,
        config.cid,
        config.rounds,
        runs.iter()
            .map(|r| ScenarioReport::from_run(r.round, &r.run))
            .collect(),
    );
    if options.skip_verify {
        return Ok(report);
    }

    let scenario_runs: Vec<ScenarioRun> = runs.into_iter().map(|r| r.run).collect();
    let set = OracleSet::from_runs(&scenario_runs, primary.id(), secondary.id())?;
    if let Some(path) = &options.oracle_out {
        set.write_json_file(path)?;
        info!(path = %path.display(), rows = set.len(), "oracle written");
    }
    let oracle = LoopbackOracle::new(set, primary, secondary);
    let verification = verify(&clusters, config, &oracle);
    if let Err(err) = &verification {
        warn!(error = %err, "conflict verification failed");
    }
    report.set_verification(verification);
    Ok(report)
}
