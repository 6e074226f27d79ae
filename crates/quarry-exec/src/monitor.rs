//! Advisory health monitor: pings deployments and flags the dead ones.
//! Nothing is preempted or restarted because of a flag.

use std::sync::Arc;

use quarry_core::id::UnitId;
use quarry_core::node::DeploymentDesc;
use quarry_planner::tracker::TrackerPlan;

use crate::transport::{remote_call, Command, DeploymentStatus, Response, Transport};

pub struct Monitor {
    transport: Arc<dyn Transport>,
}

impl Monitor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// True if the node answers and reports the deployment alive.
    pub fn is_alive(&self, desc: &DeploymentDesc) -> bool {
        let cmd = Command::Ping {
            deployment: desc.deployment.clone(),
        };
        match remote_call(self.transport.as_ref(), &desc.node, cmd) {
            Ok(Response::Status {
                status: DeploymentStatus::Opened | DeploymentStatus::Finished,
            }) => true,
            Ok(resp) => {
                tracing::warn!(deployment = %desc.deployment, node = %desc.node, response = ?resp, "deployment unhealthy");
                false
            }
            Err(e) => {
                tracing::warn!(deployment = %desc.deployment, node = %desc.node, error = %e, "ping failed");
                false
            }
        }
    }

    /// Units whose deployment fails a ping. Already-flagged ones are skipped.
    pub fn check(&self, descs: &[DeploymentDesc]) -> Vec<UnitId> {
        descs
            .iter()
            .filter(|d| !d.aborted && !self.is_alive(d))
            .map(|d| d.unit.clone())
            .collect()
    }

    /// Ping every deployment of `plan` and flag failures in place.
    pub fn sweep(&self, plan: &mut TrackerPlan) -> usize {
        let descs: Vec<DeploymentDesc> = plan.deployments().cloned().collect();
        let unhealthy = self.check(&descs);
        for unit in &unhealthy {
            if let Some(desc) = plan.deployment_mut(unit) {
                desc.aborted = true;
            }
        }
        unhealthy.len()
    }
}

#[cfg(feature = "async-monitor")]
mod periodic {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::watch;

    use super::Monitor;
    use crate::tracker::TrackerNode;

    /// Sweep `tracker` every `interval` until `shutdown` flips to true.
    pub async fn run_monitor(
        tracker: Arc<TrackerNode>,
        monitor: Monitor,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tracker.monitor_once(&monitor) {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(flagged = n, tracker = tracker.url(), "monitor sweep"),
                        Err(e) => tracing::warn!(error = %e, "monitor sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(feature = "async-monitor")]
pub use periodic::run_monitor;
