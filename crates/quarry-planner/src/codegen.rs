//! Tracker-plan generation.
//!
//! Every root, every materialized operator and every operator with more than
//! one dependent becomes its own unit. Everything else is inlined into the
//! unit that consumes it by substituting `<<OP:id>>` with the child's SQL.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use quarry_core::catalog::Catalog;
use quarry_core::error::{Error, Result};
use quarry_core::id::{OperatorId, UnitId};

use crate::operator::{Operator, OperatorKind};
use crate::plan::CompilePlan;
use crate::sql::{input_placeholder, op_placeholder, render};
use crate::tracker::{InputSource, InputTable, OutputTable, TrackerOperator, TrackerPlan};

pub struct CodeGenerator<'a> {
    catalog: &'a dyn Catalog,
}

/// Output table name of the unit rooted at `op`.
pub fn unit_table_name(op: &OperatorId) -> String {
    format!("tmp_{}", op.to_table_suffix())
}

impl<'a> CodeGenerator<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self { catalog }
    }

    pub fn generate(&self, plan: &CompilePlan) -> Result<TrackerPlan> {
        if plan.roots().is_empty() {
            return Err(Error::NoRootsInPlan {
                plan: plan.id().to_string(),
            });
        }

        let mut dependents: BTreeMap<&OperatorId, BTreeSet<&OperatorId>> = BTreeMap::new();
        for op in plan.operators() {
            for c in &op.children {
                dependents.entry(c).or_default().insert(&op.id);
            }
        }
        let is_stop = |op: &Operator| {
            op.is_materialized() || dependents.get(&op.id).map_or(0, |d| d.len()) > 1
        };

        let mut tracker = TrackerPlan::new(plan.id().clone());
        let mut unit_of: BTreeMap<OperatorId, UnitId> = BTreeMap::new();
        let mut owner: BTreeMap<OperatorId, UnitId> = BTreeMap::new();
        let mut edges: Vec<(UnitId, UnitId)> = Vec::new();
        let mut queue: VecDeque<OperatorId> = VecDeque::new();

        for r in plan.roots() {
            unit_of.insert(r.clone(), tracker.next_unit_id());
            queue.push_back(r.clone());
        }

        while let Some(root_id) = queue.pop_front() {
            let unit_id = unit_of
                .get(&root_id)
                .cloned()
                .ok_or_else(|| Error::Invariant(format!("operator {root_id} has no unit")))?;
            let root = plan.get(&root_id)?;

            let mut sql = render(root);
            let mut operators = vec![root_id.clone()];
            let mut inputs: BTreeMap<String, InputTable> = BTreeMap::new();
            if let OperatorKind::TableScan { table } = &root.kind {
                let input = self.external_input(table)?;
                inputs.insert(input.name.clone(), input);
            }

            let mut nested: VecDeque<OperatorId> = root.distinct_children().into();
            while let Some(child_id) = nested.pop_front() {
                let child = plan.get(&child_id)?;
                let placeholder = op_placeholder(&child_id);

                if is_stop(child) {
                    let table = unit_table_name(&child_id);
                    sql = sql.replace(&placeholder, &input_placeholder(&table));
                    let source_unit = match unit_of.get(&child_id) {
                        Some(u) => u.clone(),
                        None => {
                            let u = tracker.next_unit_id();
                            unit_of.insert(child_id.clone(), u.clone());
                            queue.push_back(child_id.clone());
                            u
                        }
                    };
                    edges.push((source_unit.clone(), unit_id.clone()));
                    inputs.insert(
                        table.clone(),
                        InputTable {
                            name: table.clone(),
                            source: InputSource::Unit {
                                unit: source_unit,
                                table,
                            },
                            schema: child.result.schema.clone(),
                        },
                    );
                    continue;
                }

                sql = sql.replace(&placeholder, &format!("({})", render(child)));
                operators.push(child_id.clone());
                match &child.kind {
                    OperatorKind::TableScan { table } => {
                        let input = self.external_input(table)?;
                        inputs.insert(input.name.clone(), input);
                    }
                    _ => nested.extend(child.distinct_children()),
                }
            }

            if sql.contains("<<OP:") {
                return Err(Error::Invariant(format!(
                    "unit {unit_id} still references unassembled operators"
                )));
            }

            for op in &operators {
                if let Some(prev) = owner.insert(op.clone(), unit_id.clone()) {
                    return Err(Error::Invariant(format!(
                        "operator {op} assembled into both {prev} and {unit_id}"
                    )));
                }
            }

            tracing::trace!(unit = %unit_id, root = %root_id, inlined = operators.len(), "unit assembled");
            tracker.add_unit(TrackerOperator {
                id: unit_id,
                root_op: root_id.clone(),
                operators,
                sql,
                inputs,
                output: OutputTable {
                    name: unit_table_name(&root_id),
                    schema: root.result.schema.clone(),
                },
            })?;
        }

        for (source, consumer) in &edges {
            tracker.link(source, consumer)?;
        }

        if owner.len() != plan.len() {
            let missing: Vec<String> = plan
                .operator_ids()
                .into_iter()
                .filter(|id| !owner.contains_key(id))
                .map(|id| id.to_string())
                .collect();
            return Err(Error::Invariant(format!(
                "operators not assembled into any unit: {}",
                missing.join(", ")
            )));
        }

        for id in tracker.unit_ids() {
            if tracker.is_root(&id) && tracker.is_leaf(&id) {
                tracing::warn!(unit = %id, plan = %plan.id(), "unit has neither sources nor consumers");
            }
        }

        tracing::info!(plan = %plan.id(), operators = plan.len(), units = tracker.len(), "tracker plan generated");
        Ok(tracker)
    }

    fn external_input(&self, table: &str) -> Result<InputTable> {
        let meta = self.catalog.get_table(table)?;
        let connection = self
            .catalog
            .get_connections_for_table(table)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::CatalogObjectNotFound {
                kind: "connection",
                name: table.to_string(),
            })?;
        Ok(InputTable {
            name: table.to_string(),
            source: InputSource::External {
                connection,
                table: table.to_string(),
            },
            schema: meta.attributes,
        })
    }
}
