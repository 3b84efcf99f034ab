//! Insert/insert on a shared key.
//!
//! Primary inserts `rid` and secondary inserts `rid + 1`, both carrying the
//! same payload. Each cluster accepts its own row, then rejects the peer's
//! because the key is already taken.

use xdcr_error::Result;

use super::{DrawnPayloads, Raced, ScenarioContext, ScenarioOutcome, no_conflict, race, settle};
use crate::gateway::ClusterRole;

pub(super) fn run(
    ctx: &ScenarioContext<'_>,
    payloads: &mut DrawnPayloads<'_>,
) -> Result<ScenarioOutcome> {
    let shared = payloads.draw("shared");
    let (rid, ext_rid) = (ctx.rid, ctx.ext_rid());

    let (primary, secondary) = race(
        || ctx.insert(ClusterRole::Primary, rid, &shared),
        || ctx.insert(ClusterRole::Secondary, ext_rid, &shared),
    );
    let (primary_rows, secondary_rows) = match settle(primary, secondary)? {
        Raced::Both(p, s) => (p, s),
        Raced::Graceful(reason) => return Ok(no_conflict(reason)),
    };
    // What each side saw at commit time, before replication caught up.
    ctx.verify_table_data(ClusterRole::Primary, &primary_rows, &[(rid, &shared)])?;
    ctx.verify_table_data(ClusterRole::Secondary, &secondary_rows, &[(ext_rid, &shared)])?;

    ctx.converge(1, 1)?;
    ctx.expect_cluster_rows(ClusterRole::Primary, &[(rid, &shared)])?;
    ctx.expect_cluster_rows(ClusterRole::Secondary, &[(ext_rid, &shared)])?;
    Ok(ScenarioOutcome::provoked())
}
