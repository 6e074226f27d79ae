//! Fold chains of binary equi-joins into one n-ary SQL join so the chain is
//! assembled as a single statement instead of a ladder of sub-queries.

use std::collections::{BTreeMap, BTreeSet};

use quarry_core::error::{Error, Result};
use quarry_core::id::OperatorId;

use crate::operator::{AttrRef, JoinToken, OperatorKind};
use crate::plan::CompilePlan;

/// Walk the plan top-down and merge every equi-join reachable from an
/// enclosing join only through joins. Returns the number of joins absorbed.
///
/// Joins with several consumers or an explicit materialization marker are
/// never absorbed; they start a new accumulator instead.
pub fn combine_joins(plan: &mut CompilePlan) -> Result<usize> {
    let mut absorbed = 0;
    let mut visited: BTreeSet<OperatorId> = BTreeSet::new();
    // Promoted accumulators get a fresh id; stale entries on the stack are
    // resolved through this map.
    let mut renamed: BTreeMap<OperatorId, OperatorId> = BTreeMap::new();
    let mut stack: Vec<(OperatorId, Option<OperatorId>)> =
        plan.roots().iter().rev().map(|r| (r.clone(), None)).collect();

    while let Some((id, acc)) = stack.pop() {
        let id = resolve(&renamed, id);
        if !plan.contains(&id) || !visited.insert(id.clone()) {
            continue;
        }
        let acc = acc.map(|a| resolve(&renamed, a));
        let op = plan.get(&id)?;
        let children = op.distinct_children();

        let merge_into = match (&op.kind, acc) {
            (OperatorKind::EquiJoin { .. }, Some(acc_id))
                if op.parents.len() == 1 && op.parents[0] == acc_id && !op.is_materialized() =>
            {
                Some(acc_id)
            }
            _ => None,
        };
        let next_acc = match &op.kind {
            OperatorKind::EquiJoin { .. } | OperatorKind::SqlJoin { .. } => Some(id.clone()),
            OperatorKind::TableScan { .. }
            | OperatorKind::Selection { .. }
            | OperatorKind::Projection { .. }
            | OperatorKind::Aggregation { .. }
            | OperatorKind::Rename { .. }
            | OperatorKind::SqlCombined { .. }
            | OperatorKind::FunctionCall { .. } => None,
        };

        let next_acc = match merge_into {
            Some(acc_id) => {
                let target = match plan.get(&acc_id)?.kind {
                    OperatorKind::SqlJoin { .. } => acc_id,
                    _ => {
                        let promoted = promote(plan, &acc_id)?;
                        renamed.insert(acc_id, promoted.clone());
                        promoted
                    }
                };
                merge(plan, &target, &id)?;
                absorbed += 1;
                Some(target)
            }
            None => next_acc,
        };

        for c in children.into_iter().rev() {
            stack.push((c, next_acc.clone()));
        }
    }

    tracing::debug!(plan = %plan.id(), absorbed, "join chains combined");
    Ok(absorbed)
}

fn resolve(renamed: &BTreeMap<OperatorId, OperatorId>, mut id: OperatorId) -> OperatorId {
    while let Some(next) = renamed.get(&id) {
        id = next.clone();
    }
    id
}

/// Replace a binary equi-join with an n-ary SQL join carrying its predicate.
fn promote(plan: &mut CompilePlan, id: &OperatorId) -> Result<OperatorId> {
    let token = binary_token(plan, id)?;
    plan.replace_operator(id, OperatorKind::SqlJoin { tokens: vec![token] })
}

fn binary_token(plan: &CompilePlan, id: &OperatorId) -> Result<JoinToken> {
    let op = plan.get(id)?;
    let (left_key, right_key) = match &op.kind {
        OperatorKind::EquiJoin {
            left_key,
            right_key,
        } => (left_key, right_key),
        other => {
            return Err(Error::Invariant(format!(
                "operator {id} is a {}, expected an equi-join",
                other.name()
            )))
        }
    };
    match op.children.as_slice() {
        [left, right] => Ok(JoinToken {
            left: AttrRef::new(left.clone(), left_key.clone()),
            right: AttrRef::new(right.clone(), right_key.clone()),
        }),
        _ => Err(Error::Invariant(format!(
            "equi-join {id} has {} inputs",
            op.children.len()
        ))),
    }
}

/// Absorb equi-join `join` into the SQL join `target`.
fn merge(plan: &mut CompilePlan, target: &OperatorId, join: &OperatorId) -> Result<()> {
    let own = binary_token(plan, join)?;
    let join_inputs = plan.get(join)?.distinct_children();

    let tokens = match &plan.get(target)?.kind {
        OperatorKind::SqlJoin { tokens } => tokens.clone(),
        other => {
            return Err(Error::Invariant(format!(
                "join accumulator {target} is a {}",
                other.name()
            )))
        }
    };

    let mut rewritten = Vec::with_capacity(tokens.len() + 1);
    for mut token in tokens {
        for side in [&mut token.left, &mut token.right] {
            if &side.source == join {
                side.source = owner_of(plan, &join_inputs, &side.column).ok_or_else(|| {
                    Error::Invariant(format!(
                        "join column {} not produced by any input of {join}",
                        side.column
                    ))
                })?;
            }
        }
        rewritten.push(token);
    }
    rewritten.push(own);

    plan.absorb_child(target, join)?;
    plan.set_kind(target, OperatorKind::SqlJoin { tokens: rewritten })
}

fn owner_of(plan: &CompilePlan, inputs: &[OperatorId], column: &str) -> Option<OperatorId> {
    inputs
        .iter()
        .find(|c| {
            plan.operator(c)
                .map(|op| op.result.schema.contains(column))
                .unwrap_or(false)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::ResultDesc;
    use quarry_core::error::ErrorKind;
    use quarry_core::id::PlanId;
    use quarry_core::schema::{DataType, Field, Schema};

    fn cols(names: &[&str]) -> Schema {
        Schema::new(
            names
                .iter()
                .map(|n| Field::new(*n, DataType::Int64))
                .collect(),
        )
    }

    fn scan(plan: &mut CompilePlan, table: &str, schema: Schema) -> OperatorId {
        plan.add_operator(
            OperatorKind::TableScan {
                table: table.into(),
            },
            vec![],
            ResultDesc::new(table, schema),
        )
        .unwrap()
    }

    fn join(
        plan: &mut CompilePlan,
        l: &OperatorId,
        r: &OperatorId,
        lk: &str,
        rk: &str,
    ) -> OperatorId {
        let schema = plan
            .get(l)
            .unwrap()
            .result
            .schema
            .merge(&plan.get(r).unwrap().result.schema);
        plan.add_operator(
            OperatorKind::EquiJoin {
                left_key: lk.into(),
                right_key: rk.into(),
            },
            vec![l.clone(), r.clone()],
            ResultDesc::new("j", schema),
        )
        .unwrap()
    }

    #[test]
    fn single_join_is_left_alone() {
        let mut plan = CompilePlan::new(PlanId::from_parts(&[1]));
        let a = scan(&mut plan, "a", cols(&["x"]));
        let b = scan(&mut plan, "b", cols(&["y"]));
        let j = join(&mut plan, &a, &b, "x", "y");
        assert_eq!(combine_joins(&mut plan).unwrap(), 0);
        assert!(matches!(
            plan.get(&j).unwrap().kind,
            OperatorKind::EquiJoin { .. }
        ));
    }

    #[test]
    fn tokens_pointing_at_absorbed_join_are_redirected() {
        let mut plan = CompilePlan::new(PlanId::from_parts(&[1]));
        let a = scan(&mut plan, "a", cols(&["ak"]));
        let b = scan(&mut plan, "b", cols(&["bk", "bc"]));
        let c = scan(&mut plan, "c", cols(&["ck"]));
        let inner = join(&mut plan, &a, &b, "ak", "bk");
        join(&mut plan, &inner, &c, "bc", "ck");

        assert_eq!(combine_joins(&mut plan).unwrap(), 1);
        plan.check_edges().unwrap();

        let root = plan.get(&plan.roots()[0]).unwrap();
        let OperatorKind::SqlJoin { tokens } = &root.kind else {
            panic!("expected sql join, got {:?}", root.kind);
        };
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].left, AttrRef::new(b.clone(), "bc"));
        assert_eq!(tokens[0].right, AttrRef::new(c.clone(), "ck"));
        assert_eq!(tokens[1].left, AttrRef::new(a.clone(), "ak"));
        assert_eq!(root.children, vec![a, b, c]);
    }

    #[test]
    fn missing_join_column_is_fatal() {
        let mut plan = CompilePlan::new(PlanId::from_parts(&[1]));
        let a = scan(&mut plan, "a", cols(&["ak"]));
        let b = scan(&mut plan, "b", cols(&["bk"]));
        let c = scan(&mut plan, "c", cols(&["ck"]));
        let inner = join(&mut plan, &a, &b, "ak", "bk");
        join(&mut plan, &inner, &c, "nowhere", "ck");
        let err = combine_joins(&mut plan).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);
    }
}
