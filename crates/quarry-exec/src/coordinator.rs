//! Master coordinator: compute-slot and tracker-slot inventories.
//!
//! All inventory mutation happens under one mutex. Allocation works on a
//! copy of the free counts and commits only when the whole request fits, so
//! a refused request leaves every node untouched.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use quarry_core::error::{Error, Result};
use quarry_core::id::PlanId;
use quarry_core::node::{ComputeNodeDesc, TrackerNodeDesc};

use crate::transport::{remote_call, Command, Response, Transport, TransportError};

/// Node affinity of a slot demand.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHint {
    Any,
    Named(String),
}

/// Slot demand of one plan. Counts are in slots; every unit needs
/// `unit_slots` of them on a single node, so grants come in whole units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRequest {
    pub demands: BTreeMap<NodeHint, usize>,
    #[serde(default = "one_slot")]
    pub unit_slots: usize,
}

fn one_slot() -> usize {
    1
}

impl Default for SlotRequest {
    fn default() -> Self {
        Self {
            demands: BTreeMap::new(),
            unit_slots: 1,
        }
    }
}

impl SlotRequest {
    pub fn any(count: usize) -> Self {
        let mut r = Self::default();
        r.add(NodeHint::Any, count);
        r
    }

    pub fn with_unit_slots(mut self, unit_slots: usize) -> Self {
        self.unit_slots = unit_slots.max(1);
        self
    }

    pub fn add(&mut self, hint: NodeHint, count: usize) {
        if count > 0 {
            *self.demands.entry(hint).or_insert(0) += count;
        }
    }

    pub fn total(&self) -> usize {
        self.demands.values().sum()
    }
}

/// Slots granted per compute node URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub slots: BTreeMap<String, usize>,
}

impl Allocation {
    pub fn total(&self) -> usize {
        self.slots.values().sum()
    }

    pub fn nodes(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(u, _)| u.clone())
            .collect()
    }
}

/// Whatever hands out compute slots to a tracker.
pub trait SlotAllocator: Send + Sync {
    fn allocate(&self, request: &SlotRequest) -> Result<Allocation>;
    fn release(&self, allocation: &Allocation) -> Result<()>;
    fn compute_nodes(&self) -> Result<Vec<ComputeNodeDesc>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slots {
    advertised: usize,
    free: usize,
}

/// New inventory entry for a node advertising `slots`, keeping whatever the
/// previous registration had in use.
fn readvertise(prev: Option<&Slots>, slots: usize) -> Slots {
    let in_use = prev.map_or(0, |p| p.advertised.saturating_sub(p.free));
    Slots {
        advertised: slots,
        free: slots.saturating_sub(in_use),
    }
}

#[derive(Debug, Default)]
struct Inventory {
    compute: BTreeMap<String, Slots>,
    trackers: BTreeMap<String, Slots>,
    next_tracker: usize,
}

#[derive(Debug, Default)]
pub struct MasterCoordinator {
    state: Mutex<Inventory>,
}

impl MasterCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inventory>> {
        self.state
            .lock()
            .map_err(|_| Error::Invariant("coordinator lock poisoned".into()))
    }

    /// Register (or re-advertise) a compute node. Slots already handed out
    /// stay handed out.
    pub fn register_compute_node(&self, desc: ComputeNodeDesc) -> Result<()> {
        let mut inv = self.lock()?;
        let slots = readvertise(inv.compute.get(&desc.url), desc.slots);
        tracing::info!(node = %desc.url, slots = desc.slots, "compute node registered");
        inv.compute.insert(desc.url, slots);
        Ok(())
    }

    pub fn unregister_compute_node(&self, url: &str) -> Result<()> {
        if self.lock()?.compute.remove(url).is_none() {
            tracing::warn!(node = url, "unregistering unknown compute node");
        }
        Ok(())
    }

    /// Register (or re-advertise) a tracker node. Plans already routed to
    /// it keep their slots.
    pub fn register_tracker_node(&self, desc: TrackerNodeDesc) -> Result<()> {
        let mut inv = self.lock()?;
        let slots = readvertise(inv.trackers.get(&desc.url), desc.slots);
        tracing::info!(tracker = %desc.url, slots = desc.slots, "tracker node registered");
        inv.trackers.insert(desc.url, slots);
        Ok(())
    }

    pub fn unregister_tracker_node(&self, url: &str) -> Result<()> {
        self.lock()?.trackers.remove(url);
        Ok(())
    }

    pub fn free_slots(&self, url: &str) -> Result<Option<usize>> {
        Ok(self.lock()?.compute.get(url).map(|s| s.free))
    }

    pub fn advertised_slots(&self, url: &str) -> Result<Option<usize>> {
        Ok(self.lock()?.compute.get(url).map(|s| s.advertised))
    }

    /// Pick the tracker for a new plan, rotating over trackers with a free
    /// slot. The slot is held until [`MasterCoordinator::finish_plan`].
    pub fn route_plan(&self, plan: &PlanId) -> Result<String> {
        let mut inv = self.lock()?;
        let urls: Vec<String> = inv.trackers.keys().cloned().collect();
        if urls.is_empty() {
            return Err(Error::NoFreeSlot {
                requested: 1,
                available: 0,
            });
        }
        let start = inv.next_tracker % urls.len();
        for step in 0..urls.len() {
            let idx = (start + step) % urls.len();
            let url = &urls[idx];
            if let Some(slots) = inv.trackers.get_mut(url) {
                if slots.free > 0 {
                    slots.free -= 1;
                    inv.next_tracker = idx + 1;
                    tracing::debug!(plan = %plan, tracker = %url, "plan routed");
                    return Ok(url.clone());
                }
            }
        }
        Err(Error::NoFreeSlot {
            requested: 1,
            available: 0,
        })
    }

    pub fn finish_plan(&self, tracker: &str) -> Result<()> {
        let mut inv = self.lock()?;
        if let Some(slots) = inv.trackers.get_mut(tracker) {
            slots.free = (slots.free + 1).min(slots.advertised);
        }
        Ok(())
    }

    /// Serve a coordinator command arriving over a transport.
    pub fn handle(&self, cmd: Command) -> std::result::Result<Response, TransportError> {
        let rejected = |e: Error| Response::Rejected {
            message: e.to_string(),
        };
        Ok(match cmd {
            Command::AllocateSlots { request } => match self.allocate(&request) {
                Ok(allocation) => Response::Allocated { allocation },
                Err(Error::NoFreeSlot {
                    requested,
                    available,
                }) => Response::NoFreeSlot {
                    requested,
                    available,
                },
                Err(e) => rejected(e),
            },
            Command::ReleaseSlots { allocation } => match self.release(&allocation) {
                Ok(()) => Response::Ack,
                Err(e) => rejected(e),
            },
            Command::ListComputeNodes => match self.compute_nodes() {
                Ok(nodes) => Response::ComputeNodes { nodes },
                Err(e) => rejected(e),
            },
            other => return Err(TransportError::Unsupported(other.name())),
        })
    }
}

/// Node with the most free slots; ties go to the smallest URL.
pub(crate) fn most_free<'a>(free: impl Iterator<Item = (&'a String, usize)>) -> Option<(&'a String, usize)> {
    let mut best: Option<(&String, usize)> = None;
    for (url, n) in free {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((url, n));
        }
    }
    best
}

impl SlotAllocator for MasterCoordinator {
    fn allocate(&self, request: &SlotRequest) -> Result<Allocation> {
        let mut inv = self.lock()?;
        let unit = request.unit_slots.max(1);
        let mut free: BTreeMap<String, usize> =
            inv.compute.iter().map(|(u, s)| (u.clone(), s.free)).collect();
        // Only whole units count: a node with fewer than `unit` free slots
        // cannot host anything.
        let available: usize = free.values().map(|n| n / unit * unit).sum();
        let refused = || {
            tracing::debug!(requested = request.total(), available, unit_slots = unit, "slot request refused");
            Error::NoFreeSlot {
                requested: request.total(),
                available,
            }
        };
        let mut granted: BTreeMap<String, usize> = BTreeMap::new();
        let mut any_units = 0;

        for (hint, count) in &request.demands {
            let units = count.div_ceil(unit);
            match hint {
                NodeHint::Any => any_units += units,
                NodeHint::Named(url) => {
                    let have = free.get(url).copied().unwrap_or(0) / unit;
                    let take = have.min(units);
                    if take > 0 {
                        if let Some(n) = free.get_mut(url) {
                            *n -= take * unit;
                        }
                        *granted.entry(url.clone()).or_insert(0) += take * unit;
                    }
                    any_units += units - take;
                }
            }
        }

        for _ in 0..any_units {
            let url = match most_free(free.iter().map(|(u, n)| (u, *n))) {
                Some((url, n)) if n >= unit => url.clone(),
                _ => return Err(refused()),
            };
            if let Some(n) = free.get_mut(&url) {
                *n -= unit;
            }
            *granted.entry(url).or_insert(0) += unit;
        }

        for (url, n) in &free {
            if let Some(slots) = inv.compute.get_mut(url) {
                slots.free = *n;
            }
        }
        let allocation = Allocation { slots: granted };
        tracing::debug!(granted = allocation.total(), nodes = ?allocation.nodes(), "slots allocated");
        Ok(allocation)
    }

    fn release(&self, allocation: &Allocation) -> Result<()> {
        let mut inv = self.lock()?;
        for (url, n) in &allocation.slots {
            match inv.compute.get_mut(url) {
                Some(slots) => slots.free = (slots.free + n).min(slots.advertised),
                None => tracing::warn!(node = %url, "releasing slots of unknown compute node"),
            }
        }
        Ok(())
    }

    fn compute_nodes(&self) -> Result<Vec<ComputeNodeDesc>> {
        Ok(self
            .lock()?
            .compute
            .iter()
            .map(|(u, s)| ComputeNodeDesc::new(u.clone(), s.advertised))
            .collect())
    }
}

/// Coordinator reached over a transport.
pub struct RemoteCoordinator {
    transport: Arc<dyn Transport>,
    url: String,
}

impl RemoteCoordinator {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }

    fn unexpected(&self, cmd: &str, resp: Response) -> Error {
        Error::RemoteOperatorFailure {
            node: self.url.clone(),
            command: cmd.to_string(),
            message: format!("unexpected response {resp:?}"),
        }
    }
}

impl SlotAllocator for RemoteCoordinator {
    fn allocate(&self, request: &SlotRequest) -> Result<Allocation> {
        let cmd = Command::AllocateSlots {
            request: request.clone(),
        };
        match remote_call(self.transport.as_ref(), &self.url, cmd)? {
            Response::Allocated { allocation } => Ok(allocation),
            other => Err(self.unexpected("allocate_slots", other)),
        }
    }

    fn release(&self, allocation: &Allocation) -> Result<()> {
        let cmd = Command::ReleaseSlots {
            allocation: allocation.clone(),
        };
        remote_call(self.transport.as_ref(), &self.url, cmd).map(|_| ())
    }

    fn compute_nodes(&self) -> Result<Vec<ComputeNodeDesc>> {
        match remote_call(self.transport.as_ref(), &self.url, Command::ListComputeNodes)? {
            Response::ComputeNodes { nodes } => Ok(nodes),
            other => Err(self.unexpected("list_compute_nodes", other)),
        }
    }
}
