//! Full verification pass: every oracle record on every cluster, through the
//! checker chain.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, info_span};
use xdcr_error::Result;
use xdcr_types::{ClusterClient, ReplicatedTable};

use crate::checker::{ResolveChecker, verify_against_chain};
use crate::convergence::{self, ConvergenceWaiter};
use crate::gateway::{self, ClusterRole, DualCluster};
use crate::record::ConflictRecord;

/// Populates a cluster's `<table>_conflict_expected` tables.
pub trait OracleLoader {
    fn load(&self, role: ClusterRole, tables: &[ReplicatedTable]) -> Result<()>;
}

/// For clusters whose expected tables were loaded out of band.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreloadedOracle;

impl OracleLoader for PreloadedOracle {
    fn load(&self, _role: ClusterRole, _tables: &[ReplicatedTable]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableVerification {
    pub table: String,
    pub records_verified: usize,
    pub claims: BTreeMap<ResolveChecker, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterVerification {
    pub role: ClusterRole,
    pub cluster_id: u8,
    pub tables: Vec<TableVerification>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub clusters: Vec<ClusterVerification>,
}

impl VerificationReport {
    pub fn records_verified(&self) -> usize {
        self.clusters
            .iter()
            .flat_map(|c| &c.tables)
            .map(|t| t.records_verified)
            .sum()
    }

    /// Claims per checker across every cluster and table.
    pub fn total_claims(&self) -> BTreeMap<ResolveChecker, usize> {
        let mut totals = BTreeMap::new();
        for table in self.clusters.iter().flat_map(|c| &c.tables) {
            for (checker, count) in &table.claims {
                *totals.entry(*checker).or_default() += count;
            }
        }
        totals
    }
}

#[derive(Debug)]
pub struct ConflictVerifier<'a> {
    clusters: &'a DualCluster,
    tables: Vec<ReplicatedTable>,
    settle: ConvergenceWaiter,
}

impl<'a> ConflictVerifier<'a> {
    /// `settle` paces the apply-counter samples taken before each cluster is
    /// read; its interval must exceed the replication lag.
    pub fn new(
        clusters: &'a DualCluster,
        tables: Vec<ReplicatedTable>,
        settle: ConvergenceWaiter,
    ) -> Self {
        Self {
            clusters,
            tables,
            settle,
        }
    }

    /// Verify primary, then secondary. Stops at the first failure.
    pub fn verify_all(&self, loader: &dyn OracleLoader) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();
        for role in ClusterRole::ALL {
            report.clusters.push(self.verify_cluster(role, loader)?);
        }
        info!(
            records = report.records_verified(),
            "conflict verification passed on both clusters"
        );
        Ok(report)
    }

    pub fn verify_cluster(
        &self,
        role: ClusterRole,
        loader: &dyn OracleLoader,
    ) -> Result<ClusterVerification> {
        let client = self.clusters.client(role);
        let _span = info_span!("verify", %role, cluster_id = client.cluster_id()).entered();
        let start = Instant::now();

        gateway::quiesce(client)?;
        convergence::wait_for_stable_apply_counts(&self.settle, client)?;
        loader.load(role, &self.tables)?;

        let tables = self
            .tables
            .iter()
            .map(|&table| verify_table(client, table))
            .collect::<Result<Vec<_>>>()?;
        info!(
            records = tables.iter().map(|t| t.records_verified).sum::<usize>(),
            elapsed_ms = start.elapsed().as_millis(),
            "cluster verified"
        );
        Ok(ClusterVerification {
            role,
            cluster_id: client.cluster_id(),
            tables,
        })
    }
}

/// Verify every oracle record of `table` against the rows logged for its
/// `(cid, rid, extrid)`.
pub fn verify_table(
    client: &dyn ClusterClient,
    table: ReplicatedTable,
) -> Result<TableVerification> {
    let expected_rows = gateway::select_expected(client, table)?;
    let mut verification = TableVerification {
        table: table.name().to_owned(),
        ..TableVerification::default()
    };
    for row in expected_rows.rows() {
        let expected = ConflictRecord::from_expected_row(&row)?;
        let logged =
            gateway::select_actual(client, table, expected.cid, expected.rid, expected.ext_rid)?;
        let actuals = logged
            .rows()
            .map(|row| ConflictRecord::from_actual_row(&row))
            .collect::<Result<Vec<_>>>()?;
        let checker = verify_against_chain(&expected, &actuals)?;
        *verification.claims.entry(checker).or_default() += 1;
        verification.records_verified += 1;
    }
    Ok(verification)
}
