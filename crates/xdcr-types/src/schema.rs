//! Replicated tables under test, their procedures and column layouts.

use std::fmt;

use xdcr_error::{Result, SelfCheckError};

/// Columns of a replicated data table, in result order.
pub const DATA_COLUMNS: [&str; 4] = ["CID", "RID", "KEY", "VALUE"];

/// Columns of `<table>_conflict_expected`.
pub const EXPECTED_COLUMNS: [&str; 11] = [
    "CID",
    "RID",
    "CLUSTERID",
    "EXTRID",
    "ACTION_TYPE",
    "CONFLICT_TYPE",
    "DECISION",
    "DIVERGENCE",
    "TS",
    "KEY",
    "VALUE",
];

/// Columns of `<table>_conflict_actual`: the expected layout plus the
/// resolving cluster, resolution time, row role and full-row tuple.
pub const ACTUAL_COLUMNS: [&str; 15] = [
    "CID",
    "RID",
    "CLUSTERID",
    "EXTRID",
    "ACTION_TYPE",
    "CONFLICT_TYPE",
    "DECISION",
    "DIVERGENCE",
    "TS",
    "KEY",
    "VALUE",
    "CURRENT_CLUSTERID",
    "CURRENT_TS",
    "ROW_TYPE",
    "TUPLE",
];

/// Columns of the `@Statistics PROCEDURE` selector.
pub const STATISTICS_COLUMNS: [&str; 2] = ["PROCEDURE", "INVOCATIONS"];

/// How a table's procedures are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Partitioning {
    /// Single-partition procedures (`SP`).
    SinglePartition,
    /// Multi-partition procedures (`MP`).
    MultiPartition,
}

impl Partitioning {
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::SinglePartition => "SP",
            Self::MultiPartition => "MP",
        }
    }
}

/// The two replicated tables the self-check writes to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReplicatedTable {
    Partitioned,
    Replicated,
}

impl ReplicatedTable {
    pub const ALL: [Self; 2] = [Self::Partitioned, Self::Replicated];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Partitioned => "xdcr_partitioned",
            Self::Replicated => "xdcr_replicated",
        }
    }

    /// Resolve a table name; anything but the two replicated tables is an
    /// error.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|table| table.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| SelfCheckError::UnknownTable {
                name: name.to_owned(),
            })
    }

    pub const fn partitioning(self) -> Partitioning {
        match self {
            Self::Partitioned => Partitioning::SinglePartition,
            Self::Replicated => Partitioning::MultiPartition,
        }
    }

    pub const fn insert_procedure(self) -> &'static str {
        match self {
            Self::Partitioned => "InsertPartitionedSP",
            Self::Replicated => "InsertReplicatedMP",
        }
    }

    pub const fn update_procedure(self) -> &'static str {
        match self {
            Self::Partitioned => "UpdatePartitionedSP",
            Self::Replicated => "UpdateReplicatedMP",
        }
    }

    pub const fn read_procedure(self) -> &'static str {
        match self {
            Self::Partitioned => "ReadPartitionedSP",
            Self::Replicated => "ReadReplicatedMP",
        }
    }

    /// Default CRUD delete taking `(cid, rid)`.
    pub const fn delete_procedure(self) -> &'static str {
        match self {
            Self::Partitioned => "XDCR_PARTITIONED.delete",
            Self::Replicated => "XDCR_REPLICATED.delete",
        }
    }

    /// The system procedure the remote cluster invokes to apply this table's
    /// replicated changes.
    pub const fn apply_binary_log_procedure(self) -> &'static str {
        match self.partitioning() {
            Partitioning::SinglePartition => "ApplyBinaryLogSP",
            Partitioning::MultiPartition => "ApplyBinaryLogMP",
        }
    }
}

impl fmt::Display for ReplicatedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedure_names_follow_partitioning() {
        let t = ReplicatedTable::Partitioned;
        assert_eq!(t.insert_procedure(), "InsertPartitionedSP");
        assert_eq!(t.apply_binary_log_procedure(), "ApplyBinaryLogSP");
        let t = ReplicatedTable::Replicated;
        assert_eq!(t.update_procedure(), "UpdateReplicatedMP");
        assert_eq!(t.read_procedure(), "ReadReplicatedMP");
        assert_eq!(t.apply_binary_log_procedure(), "ApplyBinaryLogMP");
        assert_eq!(t.delete_procedure(), "XDCR_REPLICATED.delete");
    }

    #[test]
    fn unknown_table_is_rejected() {
        assert_eq!(
            ReplicatedTable::from_name("XDCR_PARTITIONED").expect("known"),
            ReplicatedTable::Partitioned
        );
        assert!(matches!(
            ReplicatedTable::from_name("orders"),
            Err(SelfCheckError::UnknownTable { name }) if name == "orders"
        ));
    }
}
