//! Typed wrappers over the two cluster handles.
//!
//! Everything the harness sends to a cluster goes through here, so call
//! failures are lifted into [`SelfCheckError`] in exactly one place and keep
//! their graceful/hard distinction.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;
use xdcr_error::{Result, SelfCheckError};
use xdcr_types::{
    ADHOC_PROC, ClusterClient, QUIESCE_PROC, ReplicatedTable, ResultTable, STATISTICS_PROC, Value,
    sql,
};

/// Which side of the active-active pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    Primary,
    Secondary,
}

impl ClusterRole {
    pub const ALL: [Self; 2] = [Self::Primary, Self::Secondary];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handles to both clusters.
#[derive(Clone)]
pub struct DualCluster {
    primary: Arc<dyn ClusterClient>,
    secondary: Arc<dyn ClusterClient>,
}

impl DualCluster {
    pub fn new(primary: Arc<dyn ClusterClient>, secondary: Arc<dyn ClusterClient>) -> Self {
        Self { primary, secondary }
    }

    pub fn client(&self, role: ClusterRole) -> &dyn ClusterClient {
        match role {
            ClusterRole::Primary => self.primary.as_ref(),
            ClusterRole::Secondary => self.secondary.as_ref(),
        }
    }
}

impl fmt::Debug for DualCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualCluster")
            .field("primary", &self.primary.cluster_id())
            .field("secondary", &self.secondary.cluster_id())
            .finish()
    }
}

/// Invoke a procedure; failures keep their graceful/hard distinction.
pub fn call(
    client: &dyn ClusterClient,
    procedure: &str,
    params: &[Value],
) -> Result<Vec<ResultTable>> {
    trace!(cluster_id = client.cluster_id(), procedure, "call");
    client
        .call_procedure(procedure, params)
        .map_err(|err| err.into_error(procedure))
}

/// Run an ad-hoc statement.
pub fn adhoc(
    client: &dyn ClusterClient,
    statement: &str,
    params: &[Value],
) -> Result<Vec<ResultTable>> {
    trace!(cluster_id = client.cluster_id(), statement, "adhoc");
    client
        .adhoc(statement, params)
        .map_err(|err| err.into_error(ADHOC_PROC))
}

/// Table `index` of a multi-table result.
pub fn table_at<'a>(
    tables: &'a [ResultTable],
    index: usize,
    what: &str,
) -> Result<&'a ResultTable> {
    tables.get(index).ok_or_else(|| SelfCheckError::ResultShape {
        detail: format!(
            "{what}: expected at least {} result tables, got {}",
            index + 1,
            tables.len()
        ),
    })
}

fn single_table(mut tables: Vec<ResultTable>, what: &str) -> Result<ResultTable> {
    if tables.is_empty() {
        return Err(SelfCheckError::ResultShape {
            detail: format!("{what}: no result table"),
        });
    }
    Ok(tables.swap_remove(0))
}

pub fn count_rows(client: &dyn ClusterClient, table: ReplicatedTable, cid: u8) -> Result<i64> {
    let tables = adhoc(client, &sql::count_rows(table.name()), &[Value::from(cid)])?;
    table_at(&tables, 0, "row count")?.as_scalar_i64()
}

pub fn select_rows(
    client: &dyn ClusterClient,
    table: ReplicatedTable,
    cid: u8,
) -> Result<ResultTable> {
    let tables = adhoc(client, &sql::select_rows(table.name()), &[Value::from(cid)])?;
    single_table(tables, "select rows")
}

/// Delete the `cid` partition; returns the number of rows removed.
pub fn delete_rows(client: &dyn ClusterClient, table: ReplicatedTable, cid: u8) -> Result<i64> {
    let tables = adhoc(client, &sql::delete_rows(table.name()), &[Value::from(cid)])?;
    table_at(&tables, 0, "delete rows")?.as_scalar_i64()
}

/// Rows of the `cid` partition through the table's read procedure.
pub fn read_rows(
    client: &dyn ClusterClient,
    table: ReplicatedTable,
    cid: u8,
) -> Result<ResultTable> {
    let tables = call(client, table.read_procedure(), &[Value::from(cid)])?;
    single_table(tables, table.read_procedure())
}

pub fn select_expected(client: &dyn ClusterClient, table: ReplicatedTable) -> Result<ResultTable> {
    let tables = adhoc(client, &sql::select_expected(table.name()), &[])?;
    single_table(tables, "select expected conflicts")
}

pub fn select_actual(
    client: &dyn ClusterClient,
    table: ReplicatedTable,
    cid: u8,
    rid: i64,
    ext_rid: i64,
) -> Result<ResultTable> {
    let params = [Value::from(cid), Value::from(rid), Value::from(ext_rid)];
    let tables = adhoc(client, &sql::select_actual(table.name()), &params)?;
    single_table(tables, "select actual conflicts")
}

/// Total invocations of every procedure whose name contains `procedure`.
/// Statistics name system procedures with a package prefix, hence the
/// substring match.
pub fn invocation_count(client: &dyn ClusterClient, procedure: &str) -> Result<i64> {
    let tables = call(
        client,
        STATISTICS_PROC,
        &[Value::from("PROCEDURE"), Value::from(0_i64)],
    )?;
    let stats = table_at(&tables, 0, "procedure statistics")?;
    let mut total = 0_i64;
    for row in stats.rows() {
        if row.get_string("procedure")?.contains(procedure) {
            total = total.saturating_add(row.get_i64("invocations")?);
        }
    }
    Ok(total)
}

/// Ask the cluster to flush outstanding replication.
pub fn quiesce(client: &dyn ClusterClient) -> Result<()> {
    call(client, QUIESCE_PROC, &[]).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdcr_types::{CallError, CallResult};

    struct Canned {
        stats: ResultTable,
    }

    impl ClusterClient for Canned {
        fn cluster_id(&self) -> u8 {
            9
        }

        fn call_procedure(&self, procedure: &str, _params: &[Value]) -> CallResult {
            match procedure {
                STATISTICS_PROC => Ok(vec![self.stats.clone()]),
                "Refuse" => Err(CallError::graceful("CONSTRAINT VIOLATION")),
                _ => Ok(Vec::new()),
            }
        }

        fn adhoc(&self, _statement: &str, _params: &[Value]) -> CallResult {
            Ok(Vec::new())
        }
    }

    fn canned() -> Canned {
        let mut stats = ResultTable::new(xdcr_types::schema::STATISTICS_COLUMNS);
        stats.push_row(vec![Value::from("org.sysprocs.ApplyBinaryLogSP"), Value::from(4_i64)]);
        stats.push_row(vec![Value::from("ApplyBinaryLogSP"), Value::from(1_i64)]);
        stats.push_row(vec![Value::from("ApplyBinaryLogMP"), Value::from(7_i64)]);
        Canned { stats }
    }

    #[test]
    fn invocation_count_sums_matching_names() {
        let client = canned();
        assert_eq!(invocation_count(&client, "ApplyBinaryLogSP").expect("stats"), 5);
        assert_eq!(invocation_count(&client, "ApplyBinaryLogMP").expect("stats"), 7);
        assert_eq!(invocation_count(&client, "Nothing").expect("stats"), 0);
    }

    #[test]
    fn graceful_call_stays_graceful() {
        let err = call(&canned(), "Refuse", &[]).expect_err("refused");
        assert!(err.is_graceful());
    }

    #[test]
    fn empty_result_is_a_shape_error() {
        let err = count_rows(&canned(), ReplicatedTable::Partitioned, 1).expect_err("no tables");
        assert!(matches!(err, SelfCheckError::ResultShape { .. }));
    }
}
