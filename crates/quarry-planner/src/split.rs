//! Split-point selection.
//!
//! A split point is an operator whose result becomes an independently
//! materialized sub-plan: anything without exactly one consumer (roots and
//! shared operators) and anything explicitly marked materialized.

use std::collections::BTreeSet;

use quarry_core::error::{Error, Result};
use quarry_core::id::OperatorId;

use crate::operator::{Operator, OperatorKind};
use crate::plan::CompilePlan;

pub fn is_split_point(op: &Operator) -> bool {
    op.parents.len() != 1 || op.is_materialized()
}

/// Walk every root bottom-up and return the split points in visitation
/// order (children before parents), each listed once. Does not touch the
/// plan.
pub fn split_points(plan: &CompilePlan) -> Result<Vec<OperatorId>> {
    let mut out = Vec::new();
    let mut visited: BTreeSet<OperatorId> = BTreeSet::new();

    for root in plan.roots() {
        let mut stack: Vec<(OperatorId, bool)> = vec![(root.clone(), false)];
        while let Some((id, expanded)) = stack.pop() {
            let op = plan.get(&id)?;
            if expanded {
                if is_split_point(op) {
                    out.push(id);
                }
                continue;
            }
            if !visited.insert(id.clone()) {
                continue;
            }
            if let OperatorKind::FunctionCall { .. } = op.kind {
                return Err(Error::UnsupportedOperatorForSplit {
                    op: id.to_string(),
                    kind: op.kind.name().to_string(),
                });
            }
            stack.push((id, true));
            for c in op.distinct_children().into_iter().rev() {
                if !visited.contains(&c) {
                    stack.push((c, false));
                }
            }
        }
    }

    tracing::debug!(plan = %plan.id(), split_points = out.len(), "split points selected");
    Ok(out)
}

/// Mark `points` materialized. Returns how many flags actually changed.
pub fn apply_split_points(plan: &mut CompilePlan, points: &[OperatorId]) -> Result<usize> {
    let mut changed = 0;
    for id in points {
        if !plan.get(id)?.is_materialized() {
            plan.set_materialized(id, true)?;
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::ResultDesc;
    use quarry_core::error::ErrorKind;
    use quarry_core::id::PlanId;
    use quarry_core::schema::Schema;

    fn add(plan: &mut CompilePlan, kind: OperatorKind, children: Vec<OperatorId>) -> OperatorId {
        plan.add_operator(kind, children, ResultDesc::new("r", Schema::default()))
            .unwrap()
    }

    #[test]
    fn function_call_aborts_the_walk() {
        let mut plan = CompilePlan::new(PlanId::from_parts(&[1]));
        let s = add(
            &mut plan,
            OperatorKind::TableScan { table: "t".into() },
            vec![],
        );
        add(
            &mut plan,
            OperatorKind::FunctionCall {
                function: "kmeans".into(),
                args: vec![],
            },
            vec![s],
        );
        let err = split_points(&plan).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperatorForSplit);
    }

    #[test]
    fn applying_points_is_counted_once() {
        let mut plan = CompilePlan::new(PlanId::from_parts(&[1]));
        let s = add(
            &mut plan,
            OperatorKind::TableScan { table: "t".into() },
            vec![],
        );
        add(
            &mut plan,
            OperatorKind::Selection {
                predicate: "a > 0".into(),
            },
            vec![s.clone()],
        );
        assert_eq!(apply_split_points(&mut plan, &[s.clone()]).unwrap(), 1);
        assert_eq!(apply_split_points(&mut plan, &[s.clone()]).unwrap(), 0);
        assert!(split_points(&plan).unwrap().contains(&s));
    }
}
