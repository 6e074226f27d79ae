//! Compute/tracker node descriptors and per-unit deployment descriptors.

use serde::{Deserialize, Serialize};

use crate::id::{DeploymentId, UnitId};

/// A compute node and the number of parallel slots it advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeNodeDesc {
    pub url: String,
    pub slots: usize,
}

impl ComputeNodeDesc {
    pub fn new(url: impl Into<String>, slots: usize) -> Self {
        Self {
            url: url.into(),
            slots,
        }
    }

    pub fn host(&self) -> &str {
        host_of(&self.url)
    }
}

/// A tracker node; its slots bound how many plans it coordinates at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerNodeDesc {
    pub url: String,
    pub slots: usize,
}

impl TrackerNodeDesc {
    pub fn new(url: impl Into<String>, slots: usize) -> Self {
        Self {
            url: url.into(),
            slots,
        }
    }
}

/// Where one tracker unit runs.
///
/// `aborted` is advisory state written by the health monitor; nothing is
/// preempted because of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDesc {
    pub deployment: DeploymentId,
    pub unit: UnitId,
    pub node: String,
    #[serde(default)]
    pub aborted: bool,
}

impl DeploymentDesc {
    pub fn new(deployment: DeploymentId, unit: UnitId, node: impl Into<String>) -> Self {
        Self {
            deployment,
            unit,
            node: node.into(),
            aborted: false,
        }
    }

    pub fn host(&self) -> &str {
        host_of(&self.node)
    }
}

/// Host part of a `host:port` (or `scheme://host:port/...`) address.
pub fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority.split(':').next().unwrap_or(authority)
}
