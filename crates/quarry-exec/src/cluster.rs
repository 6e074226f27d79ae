//! In-process cluster of simulated compute nodes.
//!
//! `LocalCluster` answers the node commands (open/execute/close/ping) by
//! recording statements instead of running them, and can forward coordinator
//! commands to an attached `MasterCoordinator`. Nodes can be taken down and
//! statements made to fail, which is how the failure paths get exercised.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use quarry_core::error::Result;
use quarry_core::id::DeploymentId;
use quarry_core::node::{ComputeNodeDesc, DeploymentDesc};

use crate::coordinator::MasterCoordinator;
use crate::deploy::ExecutableOperator;
use crate::transport::{Command, DeploymentStatus, Response, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    Opened { node: String, deployment: DeploymentId },
    Executed { node: String, deployment: DeploymentId },
    Closed { node: String, deployment: DeploymentId },
}

struct Hosted {
    op: ExecutableOperator,
    status: DeploymentStatus,
}

#[derive(Default)]
struct SimNode {
    up: bool,
    statements: Vec<String>,
    fail_on: Vec<String>,
    hosted: BTreeMap<DeploymentId, Hosted>,
}

impl SimNode {
    fn run(&mut self, url: &str, stmt: &str) -> std::result::Result<(), TransportError> {
        if let Some(pattern) = self.fail_on.iter().find(|p| stmt.contains(p.as_str())) {
            return Err(TransportError::StoreExecution {
                url: url.to_string(),
                message: format!("statement matched failure pattern '{pattern}': {stmt}"),
            });
        }
        self.statements.push(stmt.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct ClusterState {
    nodes: BTreeMap<String, SimNode>,
    events: Vec<ClusterEvent>,
}

impl ClusterState {
    fn status(&self, desc: &DeploymentDesc) -> Option<DeploymentStatus> {
        self.nodes
            .get(&desc.node)
            .and_then(|n| n.hosted.get(&desc.deployment))
            .map(|h| h.status)
    }

    /// A hosted consumer whose sources have all finished.
    fn ready(&self, consumer: &DeploymentDesc) -> bool {
        let Some(hosted) = self
            .nodes
            .get(&consumer.node)
            .and_then(|n| n.hosted.get(&consumer.deployment))
        else {
            return false;
        };
        hosted.status == DeploymentStatus::Opened
            && hosted
                .op
                .sources
                .iter()
                .all(|s| self.status(s) == Some(DeploymentStatus::Finished))
    }

    fn open(&mut self, url: &str, op: ExecutableOperator) -> std::result::Result<Response, TransportError> {
        let node = self.node_up(url)?;
        for stmt in &op.open {
            node.run(url, stmt)?;
        }
        let deployment = op.deployment.clone();
        node.hosted.insert(
            deployment.clone(),
            Hosted {
                op,
                status: DeploymentStatus::Opened,
            },
        );
        self.events.push(ClusterEvent::Opened {
            node: url.to_string(),
            deployment,
        });
        Ok(Response::Ack)
    }

    /// Execute one deployment and cascade to consumers that become ready.
    fn execute(&mut self, url: &str, deployment: DeploymentId) -> std::result::Result<Response, TransportError> {
        let mut work = VecDeque::from([(url.to_string(), deployment)]);
        let mut first = true;
        while let Some((url, deployment)) = work.pop_front() {
            let node = match self.nodes.get_mut(&url) {
                Some(n) if n.up => n,
                _ if first => return Err(TransportError::Unreachable(url)),
                _ => {
                    return Err(TransportError::StoreConnection {
                        message: format!("consumer {deployment} unreachable"),
                        url,
                    })
                }
            };
            first = false;
            let Some(hosted) = node.hosted.get(&deployment) else {
                return Err(TransportError::UnknownDeployment(deployment.to_string()));
            };
            if hosted.status == DeploymentStatus::Finished {
                continue;
            }
            let stmt = hosted.op.execute.clone();
            let consumers = hosted.op.consumers.clone();
            let outcome = node.run(&url, &stmt);
            if let Some(hosted) = node.hosted.get_mut(&deployment) {
                hosted.status = match outcome {
                    Ok(()) => DeploymentStatus::Finished,
                    Err(_) => DeploymentStatus::Aborted,
                };
            }
            outcome?;
            self.events.push(ClusterEvent::Executed {
                node: url,
                deployment,
            });
            for c in consumers {
                if self.ready(&c) {
                    work.push_back((c.node, c.deployment));
                }
            }
        }
        Ok(Response::Ack)
    }

    fn close(&mut self, url: &str, deployment: DeploymentId) -> std::result::Result<Response, TransportError> {
        let node = self.node_up(url)?;
        let hosted = node
            .hosted
            .remove(&deployment)
            .ok_or_else(|| TransportError::UnknownDeployment(deployment.to_string()))?;
        for stmt in &hosted.op.close {
            node.run(url, stmt)?;
        }
        self.events.push(ClusterEvent::Closed {
            node: url.to_string(),
            deployment,
        });
        Ok(Response::Ack)
    }

    fn node_up(&mut self, url: &str) -> std::result::Result<&mut SimNode, TransportError> {
        match self.nodes.get_mut(url) {
            Some(n) if n.up => Ok(n),
            _ => Err(TransportError::Unreachable(url.to_string())),
        }
    }
}

#[derive(Default)]
pub struct LocalCluster {
    state: Mutex<ClusterState>,
    coordinator: Option<(String, Arc<MasterCoordinator>)>,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve coordinator commands sent to `url` from `coordinator`.
    pub fn with_coordinator(url: impl Into<String>, coordinator: Arc<MasterCoordinator>) -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
            coordinator: Some((url.into(), coordinator)),
        }
    }

    pub fn coordinator(&self) -> Option<&Arc<MasterCoordinator>> {
        self.coordinator.as_ref().map(|(_, c)| c)
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a compute node and register it with the attached coordinator.
    pub fn add_node(&self, url: impl Into<String>, slots: usize) -> Result<ComputeNodeDesc> {
        let desc = ComputeNodeDesc::new(url, slots);
        self.lock().nodes.insert(
            desc.url.clone(),
            SimNode {
                up: true,
                ..SimNode::default()
            },
        );
        if let Some((_, coordinator)) = &self.coordinator {
            coordinator.register_compute_node(desc.clone())?;
        }
        Ok(desc)
    }

    pub fn set_down(&self, url: &str, down: bool) {
        if let Some(node) = self.lock().nodes.get_mut(url) {
            node.up = !down;
        }
    }

    /// Make every statement containing `pattern` fail on `url`.
    pub fn fail_statements_containing(&self, url: &str, pattern: impl Into<String>) {
        if let Some(node) = self.lock().nodes.get_mut(url) {
            node.fail_on.push(pattern.into());
        }
    }

    pub fn statements(&self, url: &str) -> Vec<String> {
        self.lock()
            .nodes
            .get(url)
            .map(|n| n.statements.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.lock().events.clone()
    }

    pub fn status(&self, deployment: &DeploymentId) -> Option<DeploymentStatus> {
        self.lock()
            .nodes
            .values()
            .find_map(|n| n.hosted.get(deployment))
            .map(|h| h.status)
    }

    /// Mark a hosted deployment aborted, as if its node lost it.
    pub fn abort(&self, deployment: &DeploymentId) -> bool {
        let mut state = self.lock();
        for node in state.nodes.values_mut() {
            if let Some(h) = node.hosted.get_mut(deployment) {
                h.status = DeploymentStatus::Aborted;
                return true;
            }
        }
        false
    }

    pub fn hosted_count(&self, url: &str) -> usize {
        self.lock().nodes.get(url).map_or(0, |n| n.hosted.len())
    }

    pub fn total_hosted(&self) -> usize {
        self.lock().nodes.values().map(|n| n.hosted.len()).sum()
    }
}

impl Transport for LocalCluster {
    fn send(&self, addr: &str, cmd: Command) -> std::result::Result<Response, TransportError> {
        if let Some((url, coordinator)) = &self.coordinator {
            if url == addr {
                return coordinator.handle(cmd);
            }
        }

        let mut state = self.lock();
        match cmd {
            Command::OpenOperator { operator } => state.open(addr, operator),
            Command::ExecuteOperator { deployment } => state.execute(addr, deployment),
            Command::CloseOperator { deployment } => state.close(addr, deployment),
            Command::Ping { deployment } => {
                let node = state.node_up(addr)?;
                let status = node
                    .hosted
                    .get(&deployment)
                    .map_or(DeploymentStatus::Unknown, |h| h.status);
                Ok(Response::Status { status })
            }
            other => Err(TransportError::Unsupported(other.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::id::UnitId;

    fn op(dep: &[u64], node: &str) -> ExecutableOperator {
        ExecutableOperator {
            deployment: DeploymentId::from_parts(dep),
            unit: UnitId::from_parts(&dep[..dep.len() - 1]),
            node: node.to_string(),
            output_table: "t".into(),
            open: vec!["CREATE TABLE t".into()],
            execute: "INSERT INTO t SELECT 1".into(),
            close: vec!["DROP TABLE IF EXISTS t".into()],
            sources: vec![],
            consumers: vec![],
        }
    }

    #[test]
    fn down_node_is_unreachable() {
        let cluster = LocalCluster::new();
        cluster.add_node("n1:1", 2).unwrap();
        cluster.set_down("n1:1", true);
        let err = cluster
            .send(
                "n1:1",
                Command::OpenOperator {
                    operator: op(&[1, 1, 1], "n1:1"),
                },
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[test]
    fn execute_cascades_to_ready_consumer() {
        let cluster = LocalCluster::new();
        cluster.add_node("n1:1", 2).unwrap();
        cluster.add_node("n2:1", 2).unwrap();

        let mut leaf = op(&[1, 2, 1], "n1:1");
        let mut root = op(&[1, 1, 2], "n2:1");
        let leaf_desc = DeploymentDesc::new(leaf.deployment.clone(), leaf.unit.clone(), "n1:1");
        let root_desc = DeploymentDesc::new(root.deployment.clone(), root.unit.clone(), "n2:1");
        leaf.consumers.push(root_desc);
        root.sources.push(leaf_desc);

        for (addr, o) in [("n2:1", root.clone()), ("n1:1", leaf.clone())] {
            cluster
                .send(addr, Command::OpenOperator { operator: o })
                .unwrap();
        }
        cluster
            .send(
                "n1:1",
                Command::ExecuteOperator {
                    deployment: leaf.deployment.clone(),
                },
            )
            .unwrap();

        assert_eq!(cluster.status(&root.deployment), Some(DeploymentStatus::Finished));
        assert_eq!(cluster.statements("n2:1").last().unwrap(), "INSERT INTO t SELECT 1");
    }
}
