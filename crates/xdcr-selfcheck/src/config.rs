//! Harness configuration, loaded from JSON.
//!
//! Every field has a default, so an empty object `{}` is a complete
//! configuration running every category against both tables once.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use xdcr_error::{Result, SelfCheckError};
use xdcr_types::ReplicatedTable;

use crate::convergence::ConvergenceWaiter;
use crate::taxonomy::ConflictCategory;

/// Default base seed ("\0XDCRCHK" big-endian).
pub const DEFAULT_BASE_SEED: u64 = u64::from_be_bytes(*b"\0XDCRCHK");

/// Derive an independent RNG seed per round from the base seed.
///
/// `round_seed = base_seed ^ (round * 0x9E3779B97F4A7C15)`
#[must_use]
pub const fn derive_round_seed(base_seed: u64, round: u32) -> u64 {
    base_seed ^ (round as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Convergence polling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvergenceConfig {
    /// Upper bound on any single wait.
    pub deadline_ms: u64,
    /// Interval between row-count polls.
    pub poll_interval_ms: u64,
    /// Interval between procedure-statistics samples when waiting for
    /// replication to go quiet. Must exceed the replication lag.
    pub replication_poll_interval_ms: u64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 60_000,
            poll_interval_ms: 100,
            replication_poll_interval_ms: 2_000,
        }
    }
}

/// Random payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PayloadConfig {
    pub key_len: usize,
    pub min_value_len: usize,
    pub max_value_len: usize,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            key_len: 16,
            min_value_len: 8,
            max_value_len: 64,
        }
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelfCheckConfig {
    /// Base seed for payload generation.
    pub seed: u64,
    /// Client id: the `cid` partition every scenario writes to.
    pub cid: u8,
    /// First `rid` the client reserves.
    pub first_rid: i64,
    /// Table names; each must be one of the replicated tables.
    pub tables: Vec<String>,
    /// Category ordinals to run, in order.
    pub categories: Vec<i64>,
    /// How many times to run the full category × table matrix.
    pub rounds: u32,
    pub convergence: ConvergenceConfig,
    pub payload: PayloadConfig,
}

impl Default for SelfCheckConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_BASE_SEED,
            cid: 1,
            first_rid: 0,
            tables: ReplicatedTable::ALL
                .iter()
                .map(|t| t.name().to_owned())
                .collect(),
            categories: ConflictCategory::ALL
                .iter()
                .map(|c| i64::from(c.ordinal()))
                .collect(),
            rounds: 1,
            convergence: ConvergenceConfig::default(),
            payload: PayloadConfig::default(),
        }
    }
}

impl SelfCheckConfig {
    /// Read and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => SelfCheckError::CannotOpen {
                path: path.to_path_buf(),
            },
            _ => SelfCheckError::Io(err),
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.resolved_tables()?;
        self.resolved_categories()?;
        if self.rounds == 0 {
            return Err(SelfCheckError::config("rounds must be at least 1"));
        }
        if self.first_rid < 0 {
            return Err(SelfCheckError::config("first_rid must not be negative"));
        }
        let c = &self.convergence;
        if c.poll_interval_ms == 0 || c.replication_poll_interval_ms == 0 {
            return Err(SelfCheckError::config("poll intervals must be positive"));
        }
        if c.poll_interval_ms > c.deadline_ms || c.replication_poll_interval_ms > c.deadline_ms {
            return Err(SelfCheckError::config(format!(
                "poll intervals must not exceed the {}ms deadline",
                c.deadline_ms
            )));
        }
        let p = &self.payload;
        if p.key_len == 0 {
            return Err(SelfCheckError::config("payload.key_len must be positive"));
        }
        if p.min_value_len > p.max_value_len {
            return Err(SelfCheckError::config(format!(
                "payload.min_value_len {} exceeds max_value_len {}",
                p.min_value_len, p.max_value_len
            )));
        }
        Ok(())
    }

    pub fn resolved_tables(&self) -> Result<Vec<ReplicatedTable>> {
        if self.tables.is_empty() {
            return Err(SelfCheckError::config("at least one table is required"));
        }
        self.tables
            .iter()
            .map(|name| ReplicatedTable::from_name(name))
            .collect()
    }

    pub fn resolved_categories(&self) -> Result<Vec<ConflictCategory>> {
        if self.categories.is_empty() {
            return Err(SelfCheckError::config("at least one category is required"));
        }
        self.categories
            .iter()
            .map(|&ordinal| ConflictCategory::from_ordinal(ordinal))
            .collect()
    }

    /// Waiter for row-count convergence.
    pub fn row_waiter(&self) -> ConvergenceWaiter {
        ConvergenceWaiter::new(
            Duration::from_millis(self.convergence.deadline_ms),
            Duration::from_millis(self.convergence.poll_interval_ms),
        )
    }

    /// Waiter for replication to go quiet.
    pub fn replication_waiter(&self) -> ConvergenceWaiter {
        ConvergenceWaiter::new(
            Duration::from_millis(self.convergence.deadline_ms),
            Duration::from_millis(self.convergence.replication_poll_interval_ms),
        )
    }
}
