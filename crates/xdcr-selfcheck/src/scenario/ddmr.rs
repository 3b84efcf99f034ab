//! Delete/delete of the same row. Both deletes win; nothing is logged.

use xdcr_error::{Result, SelfCheckError};

use super::{DrawnPayloads, Raced, ScenarioContext, ScenarioOutcome, no_conflict, race, settle};
use crate::gateway::{self, ClusterRole};

pub(super) fn run(
    ctx: &ScenarioContext<'_>,
    payloads: &mut DrawnPayloads<'_>,
) -> Result<ScenarioOutcome> {
    let seed = payloads.draw("seed");
    let rid = ctx.rid;

    ctx.insert(ClusterRole::Primary, rid, &seed)?;
    ctx.converge(1, 1)?;

    let (primary, secondary) = race(
        || ctx.delete(ClusterRole::Primary, rid),
        || ctx.delete(ClusterRole::Secondary, rid),
    );
    if let Raced::Graceful(reason) = settle(primary, secondary)? {
        return Ok(no_conflict(reason));
    }

    ctx.converge(0, 0)?;
    for role in ClusterRole::ALL {
        ctx.expect_cluster_rows(role, &[])?;
        let logged = gateway::select_actual(ctx.client(role), ctx.table, ctx.cid, rid, rid)?;
        if !logged.is_empty() {
            return Err(SelfCheckError::TableStateMismatch {
                cluster: role.as_str().to_owned(),
                table: ctx.table.name().to_owned(),
                detail: format!(
                    "delete/delete logged {} conflict rows for rid {rid}, expected none",
                    logged.row_count()
                ),
            });
        }
    }
    Ok(ScenarioOutcome::provoked())
}
