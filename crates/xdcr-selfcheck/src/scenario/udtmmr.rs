//! Delete/update of the same row.
//!
//! Primary deletes `rid` while secondary updates it. The delete wins on the
//! updating side and the update finds nothing on the deleting side, so both
//! clusters end empty.

use xdcr_error::Result;

use super::{DrawnPayloads, Raced, ScenarioContext, ScenarioOutcome, no_conflict, race, settle};
use crate::gateway::ClusterRole;

pub(super) fn run(
    ctx: &ScenarioContext<'_>,
    payloads: &mut DrawnPayloads<'_>,
) -> Result<ScenarioOutcome> {
    let seed = payloads.draw("seed");
    let update = payloads.draw("update");
    let rid = ctx.rid;

    ctx.insert(ClusterRole::Primary, rid, &seed)?;
    ctx.converge(1, 1)?;

    let (primary, secondary) = race(
        || ctx.delete(ClusterRole::Primary, rid),
        || ctx.update(ClusterRole::Secondary, rid, &update),
    );
    if let Raced::Graceful(reason) = settle(primary, secondary)? {
        return Ok(no_conflict(reason));
    }

    ctx.converge(0, 0)?;
    ctx.expect_cluster_rows(ClusterRole::Primary, &[])?;
    ctx.expect_cluster_rows(ClusterRole::Secondary, &[])?;
    Ok(ScenarioOutcome::provoked())
}
