//! Tracker plans: the executable units produced by code generation and the
//! source/consumer graph between them.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use quarry_core::catalog::ConnectionMeta;
use quarry_core::error::{Error, Result};
use quarry_core::hash::{hash_serde, Hash256};
use quarry_core::id::{IdSequence, OperatorId, PlanId, UnitId};
use quarry_core::node::DeploymentDesc;
use quarry_core::schema::Schema;

/// Where a logical input table comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InputSource {
    /// Output of another unit of the same plan.
    Unit { unit: UnitId, table: String },
    /// A stored table reachable through a catalog connection.
    External {
        connection: ConnectionMeta,
        table: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTable {
    pub name: String,
    pub source: InputSource,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTable {
    pub name: String,
    pub schema: Schema,
}

/// One executable unit. `sql` reads its inputs through `<<IN:name>>`
/// placeholders and is fixed once generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerOperator {
    pub id: UnitId,
    /// Compile-time operator whose result this unit produces.
    pub root_op: OperatorId,
    /// Every compile-time operator assembled into this unit.
    pub operators: Vec<OperatorId>,
    pub sql: String,
    pub inputs: BTreeMap<String, InputTable>,
    pub output: OutputTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerPlan {
    id: PlanId,
    ids: IdSequence,
    units: BTreeMap<UnitId, TrackerOperator>,
    sources: BTreeMap<UnitId, BTreeSet<UnitId>>,
    consumers: BTreeMap<UnitId, BTreeSet<UnitId>>,
    #[serde(default)]
    current_deployment: BTreeMap<UnitId, DeploymentDesc>,
}

impl TrackerPlan {
    pub fn new(id: PlanId) -> Self {
        let ids = IdSequence::new(id.identifier().clone());
        Self {
            id,
            ids,
            units: BTreeMap::new(),
            sources: BTreeMap::new(),
            consumers: BTreeMap::new(),
            current_deployment: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &PlanId {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn next_unit_id(&mut self) -> UnitId {
        self.ids.next_typed()
    }

    pub fn add_unit(&mut self, unit: TrackerOperator) -> Result<()> {
        if self.units.contains_key(&unit.id) {
            return Err(Error::InvalidTrackerPlan(format!(
                "duplicate unit {}",
                unit.id
            )));
        }
        self.sources.entry(unit.id.clone()).or_default();
        self.consumers.entry(unit.id.clone()).or_default();
        self.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    pub fn unit(&self, id: &UnitId) -> Option<&TrackerOperator> {
        self.units.get(id)
    }

    pub fn unit_mut(&mut self, id: &UnitId) -> Option<&mut TrackerOperator> {
        self.units.get_mut(id)
    }

    pub fn units(&self) -> impl Iterator<Item = &TrackerOperator> {
        self.units.values()
    }

    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.keys().cloned().collect()
    }

    /// Record that `consumer` reads the output of `source`. Both directions
    /// are written together.
    pub fn link(&mut self, source: &UnitId, consumer: &UnitId) -> Result<()> {
        for id in [source, consumer] {
            if !self.units.contains_key(id) {
                return Err(Error::InvalidTrackerPlan(format!("unknown unit {id}")));
            }
        }
        self.consumers
            .entry(source.clone())
            .or_default()
            .insert(consumer.clone());
        self.sources
            .entry(consumer.clone())
            .or_default()
            .insert(source.clone());
        Ok(())
    }

    pub fn sources_of(&self, id: &UnitId) -> impl Iterator<Item = &UnitId> {
        self.sources.get(id).into_iter().flatten()
    }

    pub fn consumers_of(&self, id: &UnitId) -> impl Iterator<Item = &UnitId> {
        self.consumers.get(id).into_iter().flatten()
    }

    pub fn is_root(&self, id: &UnitId) -> bool {
        self.consumers_of(id).next().is_none()
    }

    pub fn is_leaf(&self, id: &UnitId) -> bool {
        self.sources_of(id).next().is_none()
    }

    /// Units nobody consumes.
    pub fn roots(&self) -> Vec<UnitId> {
        self.units
            .keys()
            .filter(|id| self.is_root(id))
            .cloned()
            .collect()
    }

    /// Units without sources.
    pub fn leaves(&self) -> Vec<UnitId> {
        self.units
            .keys()
            .filter(|id| self.is_leaf(id))
            .cloned()
            .collect()
    }

    pub fn check_symmetry(&self) -> Result<()> {
        for (a, consumers) in &self.consumers {
            for b in consumers {
                if !self.sources.get(b).is_some_and(|s| s.contains(a)) {
                    return Err(Error::InvalidTrackerPlan(format!(
                        "{b} consumes {a} but does not list it as a source"
                    )));
                }
            }
        }
        for (b, sources) in &self.sources {
            for a in sources {
                if !self.consumers.get(a).is_some_and(|c| c.contains(b)) {
                    return Err(Error::InvalidTrackerPlan(format!(
                        "{b} reads {a} but is not among its consumers"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Units ordered so every source precedes its consumers (ties by id).
    pub fn leaf_first_order(&self) -> Result<Vec<UnitId>> {
        let mut pending: BTreeMap<&UnitId, usize> = self
            .units
            .keys()
            .map(|id| (id, self.sources_of(id).count()))
            .collect();
        let mut ready: VecDeque<UnitId> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| (*id).clone())
            .collect();
        let mut order = Vec::with_capacity(self.units.len());
        while let Some(id) = ready.pop_front() {
            for c in self.consumers_of(&id) {
                if let Some(n) = pending.get_mut(c) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push_back(c.clone());
                    }
                }
            }
            order.push(id);
        }
        if order.len() != self.units.len() {
            return Err(Error::InvalidTrackerPlan(format!(
                "plan {} has a dependency cycle",
                self.id
            )));
        }
        Ok(order)
    }

    /// Stable fingerprint over units and wiring; deployment state excluded.
    /// Unit ids are not string keys, so maps are hashed as ordered pairs.
    pub fn fingerprint(&self) -> Result<Hash256> {
        let units: Vec<&TrackerOperator> = self.units.values().collect();
        let sources: Vec<(&UnitId, &BTreeSet<UnitId>)> = self.sources.iter().collect();
        hash_serde(&(&self.id, units, sources))
    }

    pub fn assign(&mut self, desc: DeploymentDesc) {
        self.current_deployment.insert(desc.unit.clone(), desc);
    }

    pub fn deployment(&self, unit: &UnitId) -> Option<&DeploymentDesc> {
        self.current_deployment.get(unit)
    }

    pub fn deployment_mut(&mut self, unit: &UnitId) -> Option<&mut DeploymentDesc> {
        self.current_deployment.get_mut(unit)
    }

    pub fn deployments(&self) -> impl Iterator<Item = &DeploymentDesc> {
        self.current_deployment.values()
    }

    pub fn is_assigned(&self, unit: &UnitId) -> bool {
        self.current_deployment.contains_key(unit)
    }

    pub fn clear_deployment(&mut self) {
        self.current_deployment.clear();
    }
}
