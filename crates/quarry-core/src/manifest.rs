//! Run manifest recorded for every tracker plan that enters running state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;
use crate::id::PlanId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub id: ManifestId,

    pub plan: PlanId,

    /// Fingerprint of the tracker plan (units, SQL, wiring) that was deployed.
    pub plan_hash: Hash256,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Number of units deployed and the distinct compute nodes they landed on.
    pub units: usize,
    pub nodes: Vec<String>,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunManifest {
    pub fn new(plan: PlanId, plan_hash: Hash256, started_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            plan,
            plan_hash,
            engine_version: crate::VERSION.to_string(),
            units: 0,
            nodes: Vec::new(),
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64, units: usize, nodes: Vec<String>) -> Self {
        self.finished_ms = finished_ms;
        self.units = units;
        self.nodes = nodes;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }
}
