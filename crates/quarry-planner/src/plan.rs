//! `CompilePlan`: the operator arena produced by the compiler.
//!
//! All edge rewrites go through `&mut self` methods that update both ends of
//! every edge and the root set before returning, so no caller can observe a
//! half-rewired graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use quarry_core::error::{Error, Result};
use quarry_core::id::{IdSequence, OperatorId, PlanId};

use crate::operator::{Operator, OperatorKind, ResultDesc};

#[derive(Debug, Clone)]
pub struct CompilePlan {
    id: PlanId,
    operators: BTreeMap<OperatorId, Operator>,
    roots: Vec<OperatorId>,
    ids: IdSequence,
}

impl CompilePlan {
    pub fn new(id: PlanId) -> Self {
        let ids = IdSequence::new(id.identifier().clone());
        Self {
            id,
            operators: BTreeMap::new(),
            roots: Vec::new(),
            ids,
        }
    }

    pub fn id(&self) -> &PlanId {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn roots(&self) -> &[OperatorId] {
        &self.roots
    }

    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.operators.values()
    }

    pub fn operator_ids(&self) -> Vec<OperatorId> {
        self.operators.keys().cloned().collect()
    }

    pub fn operator(&self, id: &OperatorId) -> Option<&Operator> {
        self.operators.get(id)
    }

    pub fn contains(&self, id: &OperatorId) -> bool {
        self.operators.contains_key(id)
    }

    /// Like [`CompilePlan::operator`] but a missing id is an invariant failure.
    pub fn get(&self, id: &OperatorId) -> Result<&Operator> {
        self.operators
            .get(id)
            .ok_or_else(|| Error::Invariant(format!("operator {id} not in plan {}", self.id)))
    }

    fn get_mut(&mut self, id: &OperatorId) -> Result<&mut Operator> {
        let plan = self.id.clone();
        self.operators
            .get_mut(id)
            .ok_or_else(|| Error::Invariant(format!("operator {id} not in plan {plan}")))
    }

    /// Mint a fresh id and add an operator on top of `children`.
    pub fn add_operator(
        &mut self,
        kind: OperatorKind,
        children: Vec<OperatorId>,
        result: ResultDesc,
    ) -> Result<OperatorId> {
        let id: OperatorId = self.ids.next_typed();
        self.insert_operator(id.clone(), kind, children, result)?;
        Ok(id)
    }

    /// Add an operator under an externally chosen id (plan files).
    pub fn insert_operator(
        &mut self,
        id: OperatorId,
        kind: OperatorKind,
        children: Vec<OperatorId>,
        result: ResultDesc,
    ) -> Result<()> {
        if self.operators.contains_key(&id) {
            return Err(Error::Plan(format!("duplicate operator id {id}")));
        }
        if let Some(missing) = children.iter().find(|c| !self.operators.contains_key(*c)) {
            return Err(Error::Plan(format!(
                "operator {id} references unknown child {missing}"
            )));
        }
        if let Some(last) = id.identifier().parts().last() {
            if id.identifier().parent().as_ref() == Some(self.ids.prefix()) {
                self.ids.skip_past(*last);
            }
        }
        for c in &children {
            let child = self.get_mut(c)?;
            if !child.parents.contains(&id) {
                child.parents.push(id.clone());
            }
            self.roots.retain(|r| r != c);
        }
        self.operators.insert(
            id.clone(),
            Operator {
                id: id.clone(),
                kind,
                children,
                parents: Vec::new(),
                result,
            },
        );
        self.roots.push(id);
        Ok(())
    }

    pub fn set_materialized(&mut self, id: &OperatorId, materialized: bool) -> Result<()> {
        self.get_mut(id)?.result.materialized = materialized;
        Ok(())
    }

    pub fn set_kind(&mut self, id: &OperatorId, kind: OperatorKind) -> Result<()> {
        self.get_mut(id)?.kind = kind;
        Ok(())
    }

    /// Swap `old` for a new operator of `kind` that inherits its result and
    /// every edge. Returns the new operator's id.
    pub fn replace_operator(&mut self, old: &OperatorId, kind: OperatorKind) -> Result<OperatorId> {
        let prev = self
            .operators
            .remove(old)
            .ok_or_else(|| Error::Invariant(format!("cannot replace unknown operator {old}")))?;
        let new_id: OperatorId = self.ids.next_typed();

        for c in prev.distinct_children() {
            let child = self.get_mut(&c)?;
            for p in child.parents.iter_mut() {
                if p == old {
                    *p = new_id.clone();
                }
            }
        }
        for p in &prev.parents {
            let parent = self.get_mut(p)?;
            for c in parent.children.iter_mut() {
                if c == old {
                    *c = new_id.clone();
                }
            }
        }
        for r in self.roots.iter_mut() {
            if r == old {
                *r = new_id.clone();
            }
        }

        self.operators.insert(
            new_id.clone(),
            Operator {
                id: new_id.clone(),
                kind,
                children: prev.children,
                parents: prev.parents,
                result: prev.result,
            },
        );
        Ok(new_id)
    }

    /// Fold `child` into `parent`: every occurrence of `child` in the
    /// parent's inputs is replaced by the child's own inputs, and `child` is
    /// dropped. The child must have `parent` as its only consumer.
    pub fn absorb_child(&mut self, parent: &OperatorId, child: &OperatorId) -> Result<()> {
        let absorbed = self.get(child)?;
        if absorbed.parents.len() != 1 || &absorbed.parents[0] != parent {
            return Err(Error::Invariant(format!(
                "operator {child} cannot be absorbed into {parent}: it has consumers {:?}",
                absorbed.parents
            )));
        }
        if !self.get(parent)?.children.contains(child) {
            return Err(Error::Invariant(format!(
                "operator {child} is not an input of {parent}"
            )));
        }

        let absorbed = self
            .operators
            .remove(child)
            .ok_or_else(|| Error::Invariant(format!("operator {child} vanished")))?;

        let host = self.get_mut(parent)?;
        let mut spliced = Vec::with_capacity(host.children.len() + absorbed.children.len());
        for c in host.children.drain(..) {
            if &c == child {
                spliced.extend(absorbed.children.iter().cloned());
            } else {
                spliced.push(c);
            }
        }
        host.children = spliced;

        for g in absorbed.distinct_children() {
            let grandchild = self.get_mut(&g)?;
            grandchild.parents.retain(|p| p != child);
            if !grandchild.parents.contains(parent) {
                grandchild.parents.push(parent.clone());
            }
        }
        Ok(())
    }

    /// Operators ordered children-before-parents (deterministic).
    pub fn bottom_up_order(&self) -> Vec<OperatorId> {
        let mut order = Vec::with_capacity(self.operators.len());
        let mut seen: BTreeSet<OperatorId> = BTreeSet::new();
        for root in &self.roots {
            let mut stack: Vec<(OperatorId, bool)> = vec![(root.clone(), false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    order.push(id);
                    continue;
                }
                if !seen.insert(id.clone()) {
                    continue;
                }
                stack.push((id.clone(), true));
                if let Some(op) = self.operators.get(&id) {
                    for c in op.distinct_children().into_iter().rev() {
                        if !seen.contains(&c) {
                            stack.push((c, false));
                        }
                    }
                }
            }
        }
        order
    }

    /// Verify that parent/child lists mirror each other and that the root
    /// set is exactly the parentless operators.
    pub fn check_edges(&self) -> Result<()> {
        for op in self.operators.values() {
            for c in &op.children {
                let child = self.get(c)?;
                if !child.parents.contains(&op.id) {
                    return Err(Error::Invariant(format!(
                        "{} lists child {c} but is missing from its parents",
                        op.id
                    )));
                }
            }
            for p in &op.parents {
                let parent = self.get(p)?;
                if !parent.children.contains(&op.id) {
                    return Err(Error::Invariant(format!(
                        "{} lists parent {p} but is missing from its children",
                        op.id
                    )));
                }
            }
            if op.is_root() != self.roots.contains(&op.id) {
                return Err(Error::Invariant(format!(
                    "root set disagrees with parents of {}",
                    op.id
                )));
            }
        }
        Ok(())
    }

    /// Graphviz rendering for diagnostics.
    pub fn trace(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph plan_{} {{", self.id.to_table_suffix());
        for op in self.operators.values() {
            let shape = if op.is_materialized() { "box" } else { "ellipse" };
            let _ = writeln!(
                out,
                "  \"{}\" [label=\"{} {}\", shape={shape}];",
                op.id,
                op.id,
                op.kind.name()
            );
            for c in &op.children {
                let _ = writeln!(out, "  \"{}\" -> \"{}\";", op.id, c);
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::schema::Schema;

    fn scan(plan: &mut CompilePlan, table: &str) -> OperatorId {
        plan.add_operator(
            OperatorKind::TableScan {
                table: table.into(),
            },
            vec![],
            ResultDesc::new(table, Schema::default()),
        )
        .unwrap()
    }

    #[test]
    fn adding_parent_demotes_child_from_roots() {
        let mut plan = CompilePlan::new(PlanId::from_parts(&[1]));
        let s = scan(&mut plan, "t");
        let p = plan
            .add_operator(
                OperatorKind::Selection {
                    predicate: "a = 1".into(),
                },
                vec![s.clone()],
                ResultDesc::new("sel", Schema::default()),
            )
            .unwrap();
        assert_eq!(plan.roots(), &[p.clone()]);
        assert_eq!(plan.get(&s).unwrap().parents, vec![p]);
        plan.check_edges().unwrap();
    }

    #[test]
    fn replace_redirects_both_edge_directions() {
        let mut plan = CompilePlan::new(PlanId::from_parts(&[1]));
        let a = scan(&mut plan, "a");
        let b = scan(&mut plan, "b");
        let j = plan
            .add_operator(
                OperatorKind::EquiJoin {
                    left_key: "x".into(),
                    right_key: "y".into(),
                },
                vec![a.clone(), b.clone()],
                ResultDesc::new("j", Schema::default()),
            )
            .unwrap();
        let top = plan
            .add_operator(
                OperatorKind::Projection {
                    columns: vec!["x".into()],
                },
                vec![j.clone()],
                ResultDesc::new("p", Schema::default()),
            )
            .unwrap();

        let nj = plan
            .replace_operator(&j, OperatorKind::SqlJoin { tokens: vec![] })
            .unwrap();
        assert!(!plan.contains(&j));
        assert_eq!(plan.get(&top).unwrap().children, vec![nj.clone()]);
        assert_eq!(plan.get(&a).unwrap().parents, vec![nj.clone()]);
        assert_eq!(plan.get(&nj).unwrap().children, vec![a, b]);
        plan.check_edges().unwrap();
    }

    #[test]
    fn bottom_up_visits_children_first() {
        let mut plan = CompilePlan::new(PlanId::from_parts(&[2]));
        let s = scan(&mut plan, "t");
        let p = plan
            .add_operator(
                OperatorKind::Projection {
                    columns: vec!["a".into()],
                },
                vec![s.clone()],
                ResultDesc::new("p", Schema::default()),
            )
            .unwrap();
        assert_eq!(plan.bottom_up_order(), vec![s, p]);
        assert!(plan.trace().starts_with("digraph plan_2"));
    }
}
