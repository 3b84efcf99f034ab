//! Update/update onto a shared key.
//!
//! Primary seeds `rid`, secondary seeds `rid + 1`, each converged in turn.
//! Then primary updates `rid` and secondary updates `rid + 1` to the same
//! target payload.

use xdcr_error::Result;

use super::{DrawnPayloads, Raced, ScenarioContext, ScenarioOutcome, no_conflict, race, settle};
use crate::gateway::ClusterRole;

pub(super) fn run(
    ctx: &ScenarioContext<'_>,
    payloads: &mut DrawnPayloads<'_>,
) -> Result<ScenarioOutcome> {
    let primary_seed = payloads.draw("primary_seed");
    let secondary_seed = payloads.draw("secondary_seed");
    let target = payloads.draw("target");
    let (rid, ext_rid) = (ctx.rid, ctx.ext_rid());

    ctx.insert(ClusterRole::Primary, rid, &primary_seed)?;
    ctx.converge(1, 1)?;
    ctx.insert(ClusterRole::Secondary, ext_rid, &secondary_seed)?;
    ctx.converge(2, 2)?;

    let (primary, secondary) = race(
        || ctx.update(ClusterRole::Primary, rid, &target),
        || ctx.update(ClusterRole::Secondary, ext_rid, &target),
    );
    if let Raced::Graceful(reason) = settle(primary, secondary)? {
        return Ok(no_conflict(reason));
    }

    ctx.converge(2, 2)?;
    ctx.expect_cluster_rows(
        ClusterRole::Primary,
        &[(rid, &target), (ext_rid, &secondary_seed)],
    )?;
    ctx.expect_cluster_rows(
        ClusterRole::Secondary,
        &[(rid, &primary_seed), (ext_rid, &target)],
    )?;
    Ok(ScenarioOutcome::provoked())
}
