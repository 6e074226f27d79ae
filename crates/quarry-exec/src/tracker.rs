//! Tracker node: takes a tracker plan through allocation, slot assignment,
//! deployment and execution, and keeps it in running state until cleaned.
//!
//! State lives behind one mutex and is never held across a remote call. A
//! plan either enters running state whole or leaves nothing behind: on any
//! failure opened units are closed best-effort, the deployment is cleared and
//! the slots go back to the coordinator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use quarry_core::config::EngineConfig;
use quarry_core::error::{Error, Result};
use quarry_core::id::{DeploymentId, PlanId, UnitId};
use quarry_core::manifest::RunManifest;
use quarry_core::node::DeploymentDesc;
use quarry_planner::tracker::TrackerPlan;

use crate::assign::assign_slots;
use crate::coordinator::{Allocation, SlotAllocator};
use crate::deploy::{build_all, ExecutableOperator};
use crate::monitor::Monitor;
use crate::policy::{policy_from_config, SchedulingPolicy};
use crate::transport::{remote_call, Command, Transport};

struct RunningPlan {
    plan: TrackerPlan,
    allocation: Allocation,
    manifest: RunManifest,
}

#[derive(Default)]
struct TrackerState {
    running: BTreeMap<PlanId, RunningPlan>,
    /// Plans between admission and running state.
    pending: BTreeSet<PlanId>,
    deployment_counter: u64,
}

pub struct TrackerNode {
    url: String,
    transport: Arc<dyn Transport>,
    allocator: Arc<dyn SlotAllocator>,
    policy: Box<dyn SchedulingPolicy>,
    state: Mutex<TrackerState>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl TrackerNode {
    /// Build a tracker from engine configuration; the policy comes from
    /// `cfg.scheduling_policy`.
    pub fn new(
        cfg: &EngineConfig,
        transport: Arc<dyn Transport>,
        allocator: Arc<dyn SlotAllocator>,
    ) -> Result<Self> {
        cfg.validate()?;
        let policy = policy_from_config(&cfg.scheduling_policy, cfg.slots_per_unit)?;
        Ok(Self::with_policy(cfg.tracker_url(), transport, allocator, policy))
    }

    pub fn with_policy(
        url: impl Into<String>,
        transport: Arc<dyn Transport>,
        allocator: Arc<dyn SlotAllocator>,
        policy: Box<dyn SchedulingPolicy>,
    ) -> Self {
        Self {
            url: url.into(),
            transport,
            allocator,
            policy,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn policy(&self) -> &dyn SchedulingPolicy {
        self.policy.as_ref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, TrackerState>> {
        self.state
            .lock()
            .map_err(|_| Error::Invariant("tracker lock poisoned".into()))
    }

    /// Allocate, assign, open, execute and close a tracker plan. Root units
    /// stay open and hold the result until [`TrackerNode::clean_plan`].
    pub fn execute_plan(&self, mut plan: TrackerPlan) -> Result<RunManifest> {
        let plan_id = plan.id().clone();
        if plan.is_empty() {
            return Err(Error::InvalidTrackerPlan(format!("plan {plan_id} has no units")));
        }
        if plan.roots().is_empty() {
            return Err(Error::NoRootsInPlan {
                plan: plan_id.to_string(),
            });
        }
        plan.check_symmetry()?;
        let order = plan.leaf_first_order()?;

        {
            let mut state = self.lock()?;
            if state.running.contains_key(&plan_id) || !state.pending.insert(plan_id.clone()) {
                return Err(Error::InvalidTrackerPlan(format!(
                    "plan {plan_id} is already running on {}",
                    self.url
                )));
            }
        }

        let result = self.admit(&mut plan, &order);
        let mut state = self.lock()?;
        state.pending.remove(&plan_id);
        let (allocation, manifest) = result?;
        tracing::info!(
            plan = %plan_id,
            units = manifest.units,
            nodes = manifest.nodes.len(),
            elapsed_ms = manifest.duration_ms(),
            "plan running"
        );
        state.running.insert(
            plan_id,
            RunningPlan {
                plan,
                allocation,
                manifest: manifest.clone(),
            },
        );
        Ok(manifest)
    }

    fn admit(&self, plan: &mut TrackerPlan, order: &[UnitId]) -> Result<(Allocation, RunManifest)> {
        let started = now_ms();
        let plan_hash = plan.fingerprint()?;
        let nodes = self.allocator.compute_nodes()?;
        let request = self.policy.slot_request(plan, &nodes);
        tracing::debug!(plan = %plan.id(), policy = self.policy.name(), slots = request.total(), "requesting slots");
        let allocation = self.allocator.allocate(&request)?;

        if let Err(e) = self.deploy(plan, &allocation, order) {
            plan.clear_deployment();
            if let Err(release) = self.allocator.release(&allocation) {
                tracing::warn!(plan = %plan.id(), error = %release, "releasing slots after failed deployment");
            }
            return Err(e);
        }

        let used: BTreeSet<String> = plan.deployments().map(|d| d.node.clone()).collect();
        let manifest = RunManifest::new(plan.id().clone(), plan_hash, started).finish(
            now_ms(),
            plan.len(),
            used.into_iter().collect(),
        );
        Ok((allocation, manifest))
    }

    fn deploy(&self, plan: &mut TrackerPlan, allocation: &Allocation, order: &[UnitId]) -> Result<()> {
        {
            let mut state = self.lock()?;
            assign_slots(plan, allocation, self.policy.as_ref(), &mut state.deployment_counter)?;
        }
        let executables = build_all(plan)?;
        let mut opened: Vec<&ExecutableOperator> = Vec::new();

        let outcome = self.run_units(plan, &executables, order, &mut opened);
        if outcome.is_err() {
            for exe in opened.iter().rev() {
                if let Err(e) = self.close(&exe.node, &exe.deployment) {
                    tracing::warn!(deployment = %exe.deployment, node = %exe.node, error = %e, "best-effort close failed");
                }
            }
        }
        outcome
    }

    /// Open every unit leaves first, execute the leaves and close every
    /// non-root unit. `opened` tracks what is still open on the nodes.
    fn run_units<'a>(
        &self,
        plan: &TrackerPlan,
        executables: &'a BTreeMap<UnitId, ExecutableOperator>,
        order: &[UnitId],
        opened: &mut Vec<&'a ExecutableOperator>,
    ) -> Result<()> {
        let exe_of = move |u: &UnitId| {
            executables
                .get(u)
                .ok_or_else(|| Error::Invariant(format!("unit {u} was not deployed")))
        };

        for unit in order {
            let exe = exe_of(unit)?;
            remote_call(
                self.transport.as_ref(),
                &exe.node,
                Command::OpenOperator {
                    operator: exe.clone(),
                },
            )?;
            tracing::debug!(unit = %unit, deployment = %exe.deployment, node = %exe.node, "unit opened");
            opened.push(exe);
        }

        for leaf in plan.leaves() {
            let exe = exe_of(&leaf)?;
            remote_call(
                self.transport.as_ref(),
                &exe.node,
                Command::ExecuteOperator {
                    deployment: exe.deployment.clone(),
                },
            )?;
        }

        for unit in order.iter().filter(|u| !plan.is_root(u)) {
            let exe = exe_of(unit)?;
            self.close(&exe.node, &exe.deployment)?;
            opened.retain(|o| o.deployment != exe.deployment);
        }
        Ok(())
    }

    fn close(&self, node: &str, deployment: &DeploymentId) -> Result<()> {
        remote_call(
            self.transport.as_ref(),
            node,
            Command::CloseOperator {
                deployment: deployment.clone(),
            },
        )
        .map(|_| ())
    }

    /// Close the root units of a running plan and give its slots back.
    /// Slots are released even if a close fails; the first failure is
    /// returned.
    pub fn clean_plan(&self, plan_id: &PlanId) -> Result<()> {
        let running = self.lock()?.running.remove(plan_id).ok_or_else(|| {
            Error::InvalidTrackerPlan(format!("plan {plan_id} is not running on {}", self.url))
        })?;

        let mut first_err = None;
        for root in running.plan.roots() {
            let Some(desc) = running.plan.deployment(&root) else {
                continue;
            };
            if let Err(e) = self.close(&desc.node, &desc.deployment) {
                tracing::warn!(plan = %plan_id, deployment = %desc.deployment, error = %e, "closing root failed");
                first_err.get_or_insert(e);
            }
        }
        self.allocator.release(&running.allocation)?;
        tracing::info!(plan = %plan_id, manifest = ?running.manifest.id, "plan cleaned");
        first_err.map_or(Ok(()), Err)
    }

    pub fn running_plans(&self) -> Result<Vec<PlanId>> {
        Ok(self.lock()?.running.keys().cloned().collect())
    }

    pub fn deployments(&self, plan_id: &PlanId) -> Result<Vec<DeploymentDesc>> {
        let state = self.lock()?;
        let running = state
            .running
            .get(plan_id)
            .ok_or_else(|| Error::InvalidTrackerPlan(format!("plan {plan_id} is not running")))?;
        Ok(running.plan.deployments().cloned().collect())
    }

    pub fn manifest(&self, plan_id: &PlanId) -> Result<Option<RunManifest>> {
        Ok(self.lock()?.running.get(plan_id).map(|r| r.manifest.clone()))
    }

    /// Ping the still-open root deployments of every running plan and flag
    /// the unhealthy ones as aborted. Returns how many were newly flagged.
    pub fn monitor_once(&self, monitor: &Monitor) -> Result<usize> {
        let snapshot: Vec<(PlanId, Vec<DeploymentDesc>)> = self
            .lock()?
            .running
            .iter()
            .map(|(id, r)| {
                let roots = r
                    .plan
                    .roots()
                    .iter()
                    .filter_map(|u| r.plan.deployment(u).cloned())
                    .collect();
                (id.clone(), roots)
            })
            .collect();

        let mut flagged = 0;
        for (plan_id, descs) in snapshot {
            let unhealthy = monitor.check(&descs);
            if unhealthy.is_empty() {
                continue;
            }
            let mut state = self.lock()?;
            let Some(running) = state.running.get_mut(&plan_id) else {
                continue;
            };
            for unit in unhealthy {
                if let Some(desc) = running.plan.deployment_mut(&unit) {
                    if !desc.aborted {
                        desc.aborted = true;
                        flagged += 1;
                    }
                }
            }
        }
        Ok(flagged)
    }
}
