//! Scheduling policies: how many slots a plan asks for and where each unit
//! would like to run.

use quarry_core::error::{Error, Result};
use quarry_core::node::ComputeNodeDesc;
use quarry_planner::tracker::{InputSource, TrackerOperator, TrackerPlan};

use crate::coordinator::{NodeHint, SlotRequest};

pub trait SchedulingPolicy: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Slots each unit occupies on its node.
    fn slots_per_unit(&self) -> usize;

    fn slot_request(&self, plan: &TrackerPlan, nodes: &[ComputeNodeDesc]) -> SlotRequest;

    /// Node this unit should land on if it still has room. `nodes` are the
    /// candidates of the current allocation.
    fn preferred_node(&self, unit: &TrackerOperator, nodes: &[String]) -> Option<String>;
}

/// Every unit takes `slots_per_unit` slots anywhere.
#[derive(Debug, Clone, Copy)]
pub struct SimplePolicy {
    slots_per_unit: usize,
}

impl SimplePolicy {
    pub fn new(slots_per_unit: usize) -> Self {
        Self {
            slots_per_unit: slots_per_unit.max(1),
        }
    }
}

impl SchedulingPolicy for SimplePolicy {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn slots_per_unit(&self) -> usize {
        self.slots_per_unit
    }

    fn slot_request(&self, plan: &TrackerPlan, _nodes: &[ComputeNodeDesc]) -> SlotRequest {
        SlotRequest::any(plan.len() * self.slots_per_unit).with_unit_slots(self.slots_per_unit)
    }

    fn preferred_node(&self, _unit: &TrackerOperator, _nodes: &[String]) -> Option<String> {
        None
    }
}

/// Units reading a stored table prefer the compute node co-located with
/// that table's connection. The wish is a strict preference: it is honored
/// when the node has room and otherwise falls back to the simple greedy
/// choice.
#[derive(Debug, Clone, Copy)]
pub struct WishListPolicy {
    slots_per_unit: usize,
}

impl WishListPolicy {
    pub fn new(slots_per_unit: usize) -> Self {
        Self {
            slots_per_unit: slots_per_unit.max(1),
        }
    }

    fn wish<'a>(unit: &TrackerOperator, mut known: impl FnMut(&str) -> Option<&'a str>) -> Option<&'a str> {
        unit.inputs.values().find_map(|input| match &input.source {
            InputSource::External { connection, .. } => {
                connection.node.as_deref().and_then(&mut known)
            }
            InputSource::Unit { .. } => None,
        })
    }
}

impl SchedulingPolicy for WishListPolicy {
    fn name(&self) -> &'static str {
        "wishlist"
    }

    fn slots_per_unit(&self) -> usize {
        self.slots_per_unit
    }

    fn slot_request(&self, plan: &TrackerPlan, nodes: &[ComputeNodeDesc]) -> SlotRequest {
        let mut request = SlotRequest::default().with_unit_slots(self.slots_per_unit);
        for unit in plan.units() {
            let wished = Self::wish(unit, |n| {
                nodes.iter().find(|d| d.url == n).map(|d| d.url.as_str())
            });
            let hint = match wished {
                Some(url) => NodeHint::Named(url.to_string()),
                None => NodeHint::Any,
            };
            request.add(hint, self.slots_per_unit);
        }
        request
    }

    fn preferred_node(&self, unit: &TrackerOperator, nodes: &[String]) -> Option<String> {
        Self::wish(unit, |n| nodes.iter().find(|u| *u == n).map(|u| u.as_str()))
            .map(str::to_string)
    }
}

pub fn policy_from_config(name: &str, slots_per_unit: usize) -> Result<Box<dyn SchedulingPolicy>> {
    if slots_per_unit == 0 {
        return Err(Error::Config("slots_per_unit must be at least 1".into()));
    }
    match name.trim().to_ascii_lowercase().as_str() {
        "simple" => Ok(Box::new(SimplePolicy::new(slots_per_unit))),
        "wishlist" | "wish-list" | "wish_list" => Ok(Box::new(WishListPolicy::new(slots_per_unit))),
        other => Err(Error::Config(format!(
            "unknown scheduling policy '{other}' (expected 'simple' or 'wishlist')"
        ))),
    }
}
