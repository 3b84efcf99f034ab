//! Bounded polling until replicated state settles.
//!
//! Every wait has a deadline. A wait never blocks past its deadline by more
//! than one evaluation of its condition.

use std::fmt::Debug;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use xdcr_error::{Result, SelfCheckError};
use xdcr_types::{ClusterClient, ReplicatedTable};

use crate::gateway::{self, ClusterRole, DualCluster};

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Converged { polls: u32, elapsed: Duration },
    TimedOut { polls: u32, elapsed: Duration },
}

impl WaitOutcome {
    pub const fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    pub const fn elapsed(&self) -> Duration {
        match self {
            Self::Converged { elapsed, .. } | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }

    /// Turn a timeout into [`SelfCheckError::ConvergenceTimeout`].
    pub fn into_result(self, what: &str) -> Result<Duration> {
        match self {
            Self::Converged { elapsed, .. } => Ok(elapsed),
            Self::TimedOut { elapsed, .. } => Err(SelfCheckError::ConvergenceTimeout {
                what: what.to_owned(),
                waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

/// Polls a condition at a fixed interval until it holds or a deadline
/// passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceWaiter {
    deadline: Duration,
    poll_interval: Duration,
}

impl ConvergenceWaiter {
    pub const fn new(deadline: Duration, poll_interval: Duration) -> Self {
        Self {
            deadline,
            poll_interval,
        }
    }

    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Evaluate `condition` immediately and then once per interval. Errors
    /// from the condition abort the wait.
    pub fn poll_until<F>(&self, mut condition: F) -> Result<WaitOutcome>
    where
        F: FnMut() -> Result<bool>,
    {
        let start = Instant::now();
        let mut polls = 0_u32;
        loop {
            polls = polls.saturating_add(1);
            if condition()? {
                return Ok(WaitOutcome::Converged {
                    polls,
                    elapsed: start.elapsed(),
                });
            }
            let elapsed = start.elapsed();
            let Some(remaining) = self.deadline.checked_sub(elapsed).filter(|r| !r.is_zero()) else {
                return Ok(WaitOutcome::TimedOut { polls, elapsed });
            };
            thread::sleep(self.poll_interval.min(remaining));
        }
    }

    /// Sample now and then once per interval until two consecutive samples
    /// are equal. Converging needs at least one full interval.
    pub fn poll_until_stable<T, F>(&self, mut sample: F) -> Result<WaitOutcome>
    where
        T: PartialEq + Debug,
        F: FnMut() -> Result<T>,
    {
        let start = Instant::now();
        let mut previous = sample()?;
        let mut polls = 1_u32;
        loop {
            let elapsed = start.elapsed();
            let Some(remaining) = self.deadline.checked_sub(elapsed).filter(|r| !r.is_zero()) else {
                debug!(last = ?previous, polls, "samples still moving at deadline");
                return Ok(WaitOutcome::TimedOut { polls, elapsed });
            };
            thread::sleep(self.poll_interval.min(remaining));
            let current = sample()?;
            polls = polls.saturating_add(1);
            if current == previous {
                return Ok(WaitOutcome::Converged {
                    polls,
                    elapsed: start.elapsed(),
                });
            }
            previous = current;
        }
    }
}

/// Wait until the `cid` partition of `table` holds the given row counts on
/// each cluster.
pub fn wait_for_row_counts(
    waiter: &ConvergenceWaiter,
    clusters: &DualCluster,
    table: ReplicatedTable,
    cid: u8,
    primary: i64,
    secondary: i64,
) -> Result<()> {
    let mut last = (i64::MIN, i64::MIN);
    let outcome = waiter.poll_until(|| {
        last = (
            gateway::count_rows(clusters.client(ClusterRole::Primary), table, cid)?,
            gateway::count_rows(clusters.client(ClusterRole::Secondary), table, cid)?,
        );
        Ok(last == (primary, secondary))
    })?;
    if !outcome.is_converged() {
        warn!(
            %table,
            cid,
            expected_primary = primary,
            expected_secondary = secondary,
            actual_primary = last.0,
            actual_secondary = last.1,
            "row counts did not converge"
        );
    }
    let elapsed = outcome.into_result(&format!(
        "{table} cid {cid} to reach {primary}/{secondary} rows (last seen {}/{})",
        last.0, last.1
    ))?;
    debug!(
        %table,
        cid,
        primary,
        secondary,
        elapsed_ms = elapsed.as_millis(),
        "row counts converged"
    );
    Ok(())
}

/// Wait until neither cluster applies any more of `table`'s replicated
/// changes between two polls.
pub fn wait_for_quiet_replication(
    waiter: &ConvergenceWaiter,
    clusters: &DualCluster,
    table: ReplicatedTable,
) -> Result<()> {
    let procedure = table.apply_binary_log_procedure();
    let outcome = waiter.poll_until_stable(|| {
        Ok((
            gateway::invocation_count(clusters.client(ClusterRole::Primary), procedure)?,
            gateway::invocation_count(clusters.client(ClusterRole::Secondary), procedure)?,
        ))
    })?;
    outcome.into_result(&format!("{procedure} invocations to settle"))?;
    Ok(())
}

/// Wait until one cluster's apply counters for both partitionings stop
/// moving. Run before reading its conflict log.
pub fn wait_for_stable_apply_counts(
    waiter: &ConvergenceWaiter,
    client: &dyn ClusterClient,
) -> Result<()> {
    let procedures = ReplicatedTable::ALL.map(ReplicatedTable::apply_binary_log_procedure);
    let outcome = waiter.poll_until_stable(|| {
        procedures
            .iter()
            .map(|procedure| gateway::invocation_count(client, procedure))
            .collect::<Result<Vec<i64>>>()
    })?;
    let elapsed = outcome.into_result(&format!(
        "apply counters on cluster {} to settle",
        client.cluster_id()
    ))?;
    debug!(
        cluster_id = client.cluster_id(),
        elapsed_ms = elapsed.as_millis(),
        "apply counters settled"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_condition_takes_one_poll() {
        let waiter = ConvergenceWaiter::new(Duration::from_secs(5), Duration::from_millis(50));
        let outcome = waiter.poll_until(|| Ok(true)).expect("poll");
        assert!(matches!(outcome, WaitOutcome::Converged { polls: 1, .. }));
    }

    #[test]
    fn stable_samples_converge() {
        let waiter = ConvergenceWaiter::new(Duration::from_secs(5), Duration::from_millis(1));
        let mut values = [1, 2, 3, 3].into_iter();
        let outcome = waiter
            .poll_until_stable(|| Ok(values.next().unwrap_or(3)))
            .expect("poll");
        assert!(outcome.is_converged());
    }

    #[test]
    fn condition_errors_abort() {
        let waiter = ConvergenceWaiter::new(Duration::from_secs(5), Duration::from_millis(1));
        let err = waiter
            .poll_until(|| Err(SelfCheckError::internal("count query failed")))
            .expect_err("error propagates");
        assert!(matches!(err, SelfCheckError::Internal(_)));
    }

    #[test]
    fn timeout_maps_to_error() {
        let outcome = WaitOutcome::TimedOut {
            polls: 3,
            elapsed: Duration::from_millis(30),
        };
        let err = outcome.into_result("rows").expect_err("timed out");
        assert!(matches!(
            err,
            SelfCheckError::ConvergenceTimeout { waited_ms: 30, .. }
        ));
    }
}
