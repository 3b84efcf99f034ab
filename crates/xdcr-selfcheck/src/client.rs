//! The conflict client: one `cid` partition, a private `rid` counter and a
//! seeded payload generator, driving scenarios one after another.

use std::time::{Duration, Instant};

use tracing::{info, warn};
use xdcr_error::{Result, SelfCheckError};
use xdcr_types::ReplicatedTable;

use crate::config::{PayloadConfig, SelfCheckConfig, derive_round_seed};
use crate::convergence::ConvergenceWaiter;
use crate::gateway::DualCluster;
use crate::payload::{Payload, PayloadGenerator};
use crate::scenario::{
    DrawnPayloads, NamedPayload, RIDS_PER_SCENARIO, RidCounter, ScenarioContext, ScenarioOutcome,
    ScenarioResult, run_scenario,
};
use crate::taxonomy::ConflictCategory;

/// One executed scenario.
#[derive(Debug)]
pub struct ScenarioRun {
    pub category: ConflictCategory,
    pub table: ReplicatedTable,
    pub cid: u8,
    pub rid: i64,
    pub result: Result<ScenarioOutcome>,
    /// The partition reset after the scenario failed.
    pub reset_error: Option<SelfCheckError>,
    pub payloads: Vec<NamedPayload>,
    pub elapsed: Duration,
}

impl ScenarioRun {
    pub const fn ext_rid(&self) -> i64 {
        self.rid + 1
    }

    pub fn payload(&self, name: &str) -> Option<&Payload> {
        self.payloads
            .iter()
            .find(|named| named.name == name)
            .map(|named| &named.payload)
    }
}

#[derive(Debug)]
pub struct ConflictClient {
    clusters: DualCluster,
    cid: u8,
    base_seed: u64,
    rids: RidCounter,
    payloads: PayloadGenerator,
    payload_config: PayloadConfig,
    rows: ConvergenceWaiter,
    quiet: ConvergenceWaiter,
}

impl ConflictClient {
    pub fn new(clusters: DualCluster, config: &SelfCheckConfig) -> Self {
        Self {
            clusters,
            cid: config.cid,
            base_seed: config.seed,
            rids: RidCounter::starting_at(config.first_rid),
            payloads: PayloadGenerator::new(derive_round_seed(config.seed, 0), config.payload),
            payload_config: config.payload,
            rows: config.row_waiter(),
            quiet: config.replication_waiter(),
        }
    }

    pub const fn cid(&self) -> u8 {
        self.cid
    }

    pub fn clusters(&self) -> &DualCluster {
        &self.clusters
    }

    /// Reseed payloads for `round`. The `rid` counter keeps counting so
    /// log rows from different rounds never correlate.
    pub fn start_round(&mut self, round: u32) {
        let seed = derive_round_seed(self.base_seed, round);
        info!(round, seed, "starting round");
        self.payloads = PayloadGenerator::new(seed, self.payload_config);
    }

    /// Run one scenario on fresh `rid`s.
    pub fn run(&mut self, category: ConflictCategory, table: ReplicatedTable) -> ScenarioRun {
        let rid = self.rids.reserve(RIDS_PER_SCENARIO);
        let ctx = ScenarioContext {
            category,
            table,
            cid: self.cid,
            rid,
            clusters: &self.clusters,
            rows: &self.rows,
            quiet: &self.quiet,
        };
        let start = Instant::now();
        let mut drawn = DrawnPayloads::new(&mut self.payloads);
        let ScenarioResult {
            outcome: result,
            reset_error,
        } = run_scenario(&ctx, &mut drawn);
        if let Err(err) = &result {
            warn!(%category, %table, rid, error = %err, "scenario failed");
        }
        ScenarioRun {
            category,
            table,
            cid: self.cid,
            rid,
            result,
            reset_error,
            payloads: drawn.into_drawn(),
            elapsed: start.elapsed(),
        }
    }
}
