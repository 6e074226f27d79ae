//! Coarse per-operator runtime estimates feeding the fault-cost model.
//!
//! Row counts start from table hints and flow up through simple selectivity
//! heuristics. Runtime is proportional to rows read, materialization time to
//! rows written. Real deployments should calibrate the per-row constants.

use std::collections::BTreeMap;

use quarry_core::error::{Error, Result};
use quarry_core::id::OperatorId;
use quarry_cost::ChainStep;
use serde::{Deserialize, Serialize};

use crate::operator::OperatorKind;
use crate::plan::CompilePlan;

/// Optional hints for estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkHint {
    /// Row counts of base tables, by table name.
    pub table_rows: BTreeMap<String, u64>,
    /// Rows assumed for tables without a hint.
    pub default_rows: u64,
    /// Seconds to process one input row.
    pub row_cost_secs: f64,
    /// Seconds to persist one output row.
    pub write_cost_secs: f64,
}

impl Default for WorkHint {
    fn default() -> Self {
        Self {
            table_rows: BTreeMap::new(),
            default_rows: 1_000_000,
            row_cost_secs: 1e-6,
            write_cost_secs: 4e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatorEstimate {
    pub out_rows: u64,
    pub runtime_secs: f64,
    pub materialize_secs: f64,
}

/// Estimate filter selectivity from the predicate text.
fn filter_selectivity(predicate: &str) -> f64 {
    let p = predicate.to_ascii_uppercase();
    if p.contains("IS NOT NULL") {
        0.95
    } else if p.contains("IS NULL") {
        0.05
    } else if p.contains("!=") || p.contains("<>") {
        0.9
    } else if p.contains('=') && !p.contains(">=") && !p.contains("<=") {
        0.1
    } else if p.contains('>') || p.contains('<') {
        0.33
    } else {
        0.5
    }
}

/// Inner-join output: geometric mean of the inputs, capped by the smaller side.
fn join_cardinality(inputs: &[u64]) -> u64 {
    inputs
        .iter()
        .copied()
        .reduce(|l, r| {
            let mean = (l as f64 * r as f64).sqrt() as u64;
            mean.max(1).min(l.min(r).max(1))
        })
        .unwrap_or(0)
}

fn aggregate_groups(input_rows: u64, group_keys: usize) -> u64 {
    if group_keys == 0 {
        return 1;
    }
    let factor = match group_keys {
        1 => 0.1,
        2 => 0.25,
        3 => 0.4,
        _ => 0.5,
    };
    ((input_rows as f64 * factor) as u64).max(1).min(input_rows.max(1))
}

pub fn estimate_operators(
    plan: &CompilePlan,
    hint: &WorkHint,
) -> Result<BTreeMap<OperatorId, OperatorEstimate>> {
    let mut out: BTreeMap<OperatorId, OperatorEstimate> = BTreeMap::new();
    for id in plan.bottom_up_order() {
        let op = plan.get(&id)?;
        let inputs: Vec<u64> = op
            .children
            .iter()
            .map(|c| out.get(c).map(|e| e.out_rows).unwrap_or(0))
            .collect();
        let first = inputs.first().copied().unwrap_or(0);
        let read: u64 = inputs.iter().sum();

        let (read, out_rows) = match &op.kind {
            OperatorKind::TableScan { table } => {
                let rows = hint
                    .table_rows
                    .get(table)
                    .copied()
                    .unwrap_or(hint.default_rows);
                (rows, rows)
            }
            OperatorKind::Selection { predicate } => (
                read,
                ((first as f64 * filter_selectivity(predicate)) as u64).max(1),
            ),
            OperatorKind::SqlCombined {
                predicate,
                group_by,
                ..
            } => {
                let filtered = match predicate {
                    Some(p) => ((first as f64 * filter_selectivity(p)) as u64).max(1),
                    None => first,
                };
                if group_by.is_empty() {
                    (read, filtered)
                } else {
                    (read, aggregate_groups(filtered, group_by.len()))
                }
            }
            OperatorKind::Projection { .. }
            | OperatorKind::Rename { .. }
            | OperatorKind::FunctionCall { .. } => (read, first),
            OperatorKind::Aggregation { group_by, .. } => {
                (read, aggregate_groups(first, group_by.len()))
            }
            OperatorKind::EquiJoin { .. } | OperatorKind::SqlJoin { .. } => {
                (read, join_cardinality(&inputs))
            }
        };

        out.insert(
            id,
            OperatorEstimate {
                out_rows,
                runtime_secs: read as f64 * hint.row_cost_secs,
                materialize_secs: out_rows as f64 * hint.write_cost_secs,
            },
        );
    }
    Ok(out)
}

/// The chain from a leaf up to `root`, following each operator's largest
/// input. Returned bottom-up.
pub fn main_chain(
    plan: &CompilePlan,
    root: &OperatorId,
    estimates: &BTreeMap<OperatorId, OperatorEstimate>,
) -> Result<Vec<OperatorId>> {
    let mut chain = vec![root.clone()];
    let mut cur = plan.get(root)?;
    while !cur.is_leaf() {
        let next = cur
            .distinct_children()
            .into_iter()
            .max_by_key(|c| estimates.get(c).map(|e| e.out_rows).unwrap_or(0))
            .ok_or_else(|| Error::Invariant(format!("operator {} lost its inputs", cur.id)))?;
        cur = plan.get(&next)?;
        chain.push(next);
    }
    chain.reverse();
    Ok(chain)
}

pub fn chain_steps(
    chain: &[OperatorId],
    estimates: &BTreeMap<OperatorId, OperatorEstimate>,
) -> Result<Vec<ChainStep>> {
    chain
        .iter()
        .map(|id| {
            let e = estimates
                .get(id)
                .ok_or_else(|| Error::Invariant(format!("no estimate for operator {id}")))?;
            Ok(ChainStep {
                op: id.clone(),
                runtime: e.runtime_secs,
                mat_runtime: e.materialize_secs,
            })
        })
        .collect()
}
