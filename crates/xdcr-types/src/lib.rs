//! Shared vocabulary between the self-check harness and the clusters it
//! drives: column values, result tables, the synchronous call contract and
//! the exact statement texts the harness issues.

pub mod client;
pub mod hex;
pub mod schema;
pub mod sql;
pub mod table;
pub mod value;

pub use client::{CallError, CallResult, ClusterClient, ResponseStatus};
pub use schema::{Partitioning, ReplicatedTable};
pub use table::{ResultTable, RowView};
pub use value::Value;

/// Name of the system procedure that executes an ad-hoc statement.
pub const ADHOC_PROC: &str = "@AdHoc";

/// System procedure returning per-procedure invocation statistics.
pub const STATISTICS_PROC: &str = "@Statistics";

/// System procedure that blocks until outstanding replication is flushed.
pub const QUIESCE_PROC: &str = "@Quiesce";
