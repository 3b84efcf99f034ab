//! Insert/update on a shared key.
//!
//! Secondary seeds `rid` and both clusters converge on it. Primary then
//! inserts `rid + 1` with a fresh payload while secondary updates `rid` to
//! that same payload, so each replicated change hits the other's key.

use xdcr_error::Result;

use super::{DrawnPayloads, Raced, ScenarioContext, ScenarioOutcome, no_conflict, race, settle};
use crate::gateway::ClusterRole;

pub(super) fn run(
    ctx: &ScenarioContext<'_>,
    payloads: &mut DrawnPayloads<'_>,
) -> Result<ScenarioOutcome> {
    let seed = payloads.draw("seed");
    let contested = payloads.draw("contested");
    let (rid, ext_rid) = (ctx.rid, ctx.ext_rid());

    ctx.insert(ClusterRole::Secondary, rid, &seed)?;
    ctx.converge(1, 1)?;

    let (primary, secondary) = race(
        || ctx.insert(ClusterRole::Primary, ext_rid, &contested),
        || ctx.update(ClusterRole::Secondary, rid, &contested),
    );
    let (primary_rows, secondary_rows) = match settle(primary, secondary)? {
        Raced::Both(p, s) => (p, s),
        Raced::Graceful(reason) => return Ok(no_conflict(reason)),
    };
    ctx.verify_table_data(
        ClusterRole::Primary,
        &primary_rows,
        &[(rid, &seed), (ext_rid, &contested)],
    )?;
    ctx.verify_table_data(ClusterRole::Secondary, &secondary_rows, &[(rid, &contested)])?;

    // Both replicated changes are rejected, so each side keeps its own view.
    ctx.converge(2, 1)?;
    ctx.expect_cluster_rows(ClusterRole::Primary, &[(rid, &seed), (ext_rid, &contested)])?;
    ctx.expect_cluster_rows(ClusterRole::Secondary, &[(rid, &contested)])?;
    Ok(ScenarioOutcome::provoked())
}
