//! Bind every unit of a tracker plan to one node of its allocation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use quarry_core::error::{Error, Result};
use quarry_core::id::{DeploymentId, UnitId};
use quarry_core::node::DeploymentDesc;
use quarry_planner::tracker::TrackerPlan;

use crate::coordinator::{most_free, Allocation};
use crate::policy::SchedulingPolicy;

/// Walk the plan leaves first and give every unassigned unit a node and a
/// deployment id (`<unit>.<counter>`). A consumer is only visited once all of
/// its sources have been placed. Returns the descriptors created by this
/// call, in assignment order.
pub fn assign_slots(
    plan: &mut TrackerPlan,
    allocation: &Allocation,
    policy: &dyn SchedulingPolicy,
    counter: &mut u64,
) -> Result<Vec<DeploymentDesc>> {
    let need = policy.slots_per_unit();
    let mut free: BTreeMap<String, usize> = allocation.slots.clone();
    let candidates: Vec<String> = free.keys().cloned().collect();

    // Units placed by an earlier pass keep their node and its slots.
    for desc in plan.deployments() {
        if let Some(n) = free.get_mut(&desc.node) {
            *n = n.saturating_sub(need);
        }
    }

    let mut created = Vec::new();
    let mut queued: BTreeSet<UnitId> = BTreeSet::new();
    let mut queue: VecDeque<UnitId> = VecDeque::new();
    for leaf in plan.leaves() {
        queued.insert(leaf.clone());
        queue.push_back(leaf);
    }

    while let Some(id) = queue.pop_front() {
        if !plan.is_assigned(&id) {
            let unit = plan
                .unit(&id)
                .ok_or_else(|| Error::InvalidTrackerPlan(format!("unknown unit {id}")))?;

            let wished = policy
                .preferred_node(unit, &candidates)
                .filter(|url| free.get(url).copied().unwrap_or(0) >= need);
            let node = match wished {
                Some(url) => url,
                None => match most_free(free.iter().map(|(u, n)| (u, *n))) {
                    Some((url, n)) if n >= need => url.clone(),
                    best => {
                        return Err(Error::NoFreeSlot {
                            requested: need,
                            available: best.map_or(0, |(_, n)| n),
                        })
                    }
                },
            };
            if let Some(n) = free.get_mut(&node) {
                *n -= need;
            }

            *counter += 1;
            let deployment = DeploymentId::new(id.identifier().append(*counter));
            let desc = DeploymentDesc::new(deployment, id.clone(), node);
            tracing::debug!(unit = %id, deployment = %desc.deployment, node = %desc.node, "unit assigned");
            plan.assign(desc.clone());
            created.push(desc);
        }

        let consumers: Vec<UnitId> = plan.consumers_of(&id).cloned().collect();
        for c in consumers {
            let ready = plan.sources_of(&c).all(|s| plan.is_assigned(s));
            if ready && queued.insert(c.clone()) {
                queue.push_back(c);
            }
        }
    }

    if let Some(missing) = plan.unit_ids().into_iter().find(|u| !plan.is_assigned(u)) {
        return Err(Error::InvalidTrackerPlan(format!(
            "unit {missing} is unreachable from the plan's leaves"
        )));
    }
    Ok(created)
}
