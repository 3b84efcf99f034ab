//! Two in-process clusters replicating to each other.
//!
//! [`LoopbackPair`] stands in for a real active-active deployment when
//! exercising the self-check harness: each [`LoopbackCluster`] answers the
//! procedures and statements the harness issues, commits locally, and ships
//! every committed change to its peer after a configurable lag. Changes that
//! collide with the peer's local state are resolved and written to the
//! table's `_conflict_actual` log the way the harness expects to find them.

mod cluster;
mod replication;
mod state;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};
use xdcr_error::Result;

pub use cluster::LoopbackCluster;

use cluster::LogicalClock;
use replication::{ChangeQueue, spawn_replicator};

/// Tuning for a [`LoopbackPair`].
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub primary_id: u8,
    pub secondary_id: u8,
    /// Delay between a local commit and its release to the peer.
    pub replication_lag: Duration,
    /// Upper bound on how long `@Quiesce` waits for the streams to drain.
    pub quiesce_timeout: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            primary_id: 1,
            secondary_id: 2,
            replication_lag: Duration::from_millis(20),
            quiesce_timeout: Duration::from_secs(10),
        }
    }
}

/// A running pair of clusters. Replication threads stop when the pair is
/// dropped.
#[derive(Debug)]
pub struct LoopbackPair {
    primary: Arc<LoopbackCluster>,
    secondary: Arc<LoopbackCluster>,
    streams: [Arc<ChangeQueue>; 2],
    replicators: Vec<JoinHandle<()>>,
}

impl LoopbackPair {
    pub fn start(config: &LoopbackConfig) -> Result<Self> {
        let clock = Arc::new(LogicalClock::default());
        let to_secondary = Arc::new(ChangeQueue::new(config.replication_lag));
        let to_primary = Arc::new(ChangeQueue::new(config.replication_lag));
        let primary = Arc::new(LoopbackCluster::new(
            config.primary_id,
            Arc::clone(&clock),
            Arc::clone(&to_secondary),
            Arc::clone(&to_primary),
            config.quiesce_timeout,
        ));
        let secondary = Arc::new(LoopbackCluster::new(
            config.secondary_id,
            clock,
            Arc::clone(&to_primary),
            Arc::clone(&to_secondary),
            config.quiesce_timeout,
        ));

        let mut pair = Self {
            primary: Arc::clone(&primary),
            secondary: Arc::clone(&secondary),
            streams: [Arc::clone(&to_secondary), Arc::clone(&to_primary)],
            replicators: Vec::with_capacity(2),
        };
        // On a spawn failure `pair` drops here and closes whatever started.
        pair.replicators.push(spawn_replicator(
            format!("xdcr-repl-{}-to-{}", config.primary_id, config.secondary_id),
            to_secondary,
            secondary,
        )?);
        pair.replicators.push(spawn_replicator(
            format!("xdcr-repl-{}-to-{}", config.secondary_id, config.primary_id),
            to_primary,
            primary,
        )?);
        info!(
            primary_id = config.primary_id,
            secondary_id = config.secondary_id,
            lag_ms = u64::try_from(config.replication_lag.as_millis()).unwrap_or(u64::MAX),
            "loopback clusters started"
        );
        Ok(pair)
    }

    pub fn primary(&self) -> Arc<LoopbackCluster> {
        Arc::clone(&self.primary)
    }

    pub fn secondary(&self) -> Arc<LoopbackCluster> {
        Arc::clone(&self.secondary)
    }
}

impl Drop for LoopbackPair {
    fn drop(&mut self) {
        for stream in &self.streams {
            stream.close();
        }
        for handle in self.replicators.drain(..) {
            if handle.join().is_err() {
                warn!("replication thread panicked");
            }
        }
    }
}
