//! Update/update of the same row with different payloads.
//!
//! Both clusters resolve the timestamp mismatch by keeping the later write,
//! so after convergence each holds one row carrying the same one of the two
//! payloads. Clusters that settle on different writes fail the scenario.

use xdcr_error::{Result, SelfCheckError};

use super::{DrawnPayloads, Raced, ScenarioContext, ScenarioOutcome, no_conflict, race, settle};
use crate::gateway::{self, ClusterRole};
use crate::payload::verify_store_value;

pub(super) fn run(
    ctx: &ScenarioContext<'_>,
    payloads: &mut DrawnPayloads<'_>,
) -> Result<ScenarioOutcome> {
    let seed = payloads.draw("seed");
    let left = payloads.draw("primary_update");
    let right = payloads.draw("secondary_update");
    let rid = ctx.rid;

    ctx.insert(ClusterRole::Primary, rid, &seed)?;
    ctx.converge(1, 1)?;

    let (primary, secondary) = race(
        || ctx.update(ClusterRole::Primary, rid, &left),
        || ctx.update(ClusterRole::Secondary, rid, &right),
    );
    if let Raced::Graceful(reason) = settle(primary, secondary)? {
        return Ok(no_conflict(reason));
    }

    ctx.converge(1, 1)?;
    let mut survivors = Vec::with_capacity(2);
    for role in ClusterRole::ALL {
        let data = gateway::read_rows(ctx.client(role), ctx.table, ctx.cid)?;
        let row = data.row(0);
        let winner = match row {
            Some(row) if data.row_count() == 1 && row.get_i64("rid")? == rid => {
                let key = row.get_varbinary("key")?.unwrap_or_default();
                let value = verify_store_value(row.get_varbinary("value")?.unwrap_or_default())?;
                [(ClusterRole::Primary, &left), (ClusterRole::Secondary, &right)]
                    .into_iter()
                    .find(|(_, p)| p.key() == key && p.value() == value)
                    .map(|(writer, _)| writer)
            }
            _ => None,
        };
        let Some(writer) = winner else {
            return Err(SelfCheckError::TableStateMismatch {
                cluster: role.as_str().to_owned(),
                table: ctx.table.name().to_owned(),
                detail: format!(
                    "expected rid {rid} to hold {} or {}, found {} rows",
                    left.describe(),
                    right.describe(),
                    data.row_count()
                ),
            });
        };
        survivors.push(writer);
    }
    match survivors.as_slice() {
        [primary, secondary] if primary == secondary => {
            Ok(ScenarioOutcome::ConflictProvoked { survivor: Some(*primary) })
        }
        [primary, secondary] => Err(SelfCheckError::TableStateMismatch {
            cluster: "both".to_owned(),
            table: ctx.table.name().to_owned(),
            detail: format!(
                "clusters kept different writes for rid {rid}: primary holds the {primary} \
                 write, secondary the {secondary} write"
            ),
        }),
        _ => Err(SelfCheckError::internal(format!(
            "expected one survivor per cluster, got {survivors:?}"
        ))),
    }
}
