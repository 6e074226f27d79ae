//! SQL rendering per operator kind, and the placeholder scheme that glues
//! rendered fragments together.
//!
//! Two placeholder levels exist:
//! - `<<OP:id>>` marks where a child's result goes; the code generator
//!   replaces it with the inlined child SQL or with an input table.
//! - `<<IN:name>>` marks a logical input table; deployment replaces it with
//!   the physical table name on the executing node.

use quarry_core::id::OperatorId;

use crate::operator::{Operator, OperatorKind};

const OP_OPEN: &str = "<<OP:";
const IN_OPEN: &str = "<<IN:";
const CLOSE: &str = ">>";

pub fn op_placeholder(id: &OperatorId) -> String {
    format!("{OP_OPEN}{id}{CLOSE}")
}

pub fn input_placeholder(table: &str) -> String {
    format!("{IN_OPEN}{table}{CLOSE}")
}

/// Logical input table names referenced by `sql`, in order of first use.
pub fn input_tables(sql: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut rest = sql;
    while let Some(start) = rest.find(IN_OPEN) {
        let after = &rest[start + IN_OPEN.len()..];
        match after.find(CLOSE) {
            Some(end) => {
                let name = after[..end].to_string();
                if !out.contains(&name) {
                    out.push(name);
                }
                rest = &after[end + CLOSE.len()..];
            }
            None => break,
        }
    }
    out
}

/// True if any placeholder of either level is left in `sql`.
pub fn has_placeholders(sql: &str) -> bool {
    sql.contains(OP_OPEN) || sql.contains(IN_OPEN)
}

/// Render one operator with `<<OP:child>>` placeholders for its inputs.
/// Table scans render directly against their input table.
pub fn render(op: &Operator) -> String {
    let from = |i: usize| -> String {
        op.children
            .get(i)
            .map(op_placeholder)
            .unwrap_or_else(|| "<missing>".to_string())
    };
    match &op.kind {
        OperatorKind::TableScan { table } => {
            format!("SELECT {} FROM {}", select_list(op), input_placeholder(table))
        }
        OperatorKind::Selection { predicate } => {
            format!("SELECT * FROM {} AS t0 WHERE {predicate}", from(0))
        }
        OperatorKind::Projection { columns } => {
            format!("SELECT {} FROM {} AS t0", columns.join(", "), from(0))
        }
        OperatorKind::Aggregation {
            group_by,
            aggregates,
        } => {
            let mut items: Vec<String> = group_by.clone();
            items.extend(aggregates.iter().map(|a| a.to_sql()));
            let mut sql = format!("SELECT {} FROM {} AS t0", items.join(", "), from(0));
            if !group_by.is_empty() {
                sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
            }
            sql
        }
        OperatorKind::EquiJoin {
            left_key,
            right_key,
        } => format!(
            "SELECT * FROM {} AS t0 JOIN {} AS t1 ON t0.{left_key} = t1.{right_key}",
            from(0),
            from(1)
        ),
        OperatorKind::SqlJoin { tokens } => {
            let relations: Vec<String> = (0..op.children.len())
                .map(|i| format!("{} AS t{i}", from(i)))
                .collect();
            let alias = |source: &OperatorId| -> String {
                op.children
                    .iter()
                    .position(|c| c == source)
                    .map(|i| format!("t{i}"))
                    .unwrap_or_else(|| format!("op_{}", source.to_table_suffix()))
            };
            let predicates: Vec<String> = tokens
                .iter()
                .map(|t| {
                    format!(
                        "{}.{} = {}.{}",
                        alias(&t.left.source),
                        t.left.column,
                        alias(&t.right.source),
                        t.right.column
                    )
                })
                .collect();
            let mut sql = format!("SELECT * FROM {}", relations.join(", "));
            if !predicates.is_empty() {
                sql.push_str(&format!(" WHERE {}", predicates.join(" AND ")));
            }
            sql
        }
        OperatorKind::Rename { renames } => {
            let items: Vec<String> = renames
                .iter()
                .map(|(old, new)| format!("{old} AS {new}"))
                .collect();
            format!("SELECT {} FROM {} AS t0", items.join(", "), from(0))
        }
        OperatorKind::SqlCombined {
            select,
            predicate,
            group_by,
        } => {
            let items = if select.is_empty() {
                "*".to_string()
            } else {
                select.join(", ")
            };
            let mut sql = format!("SELECT {items} FROM {} AS t0", from(0));
            if let Some(p) = predicate {
                sql.push_str(&format!(" WHERE {p}"));
            }
            if !group_by.is_empty() {
                sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
            }
            sql
        }
        OperatorKind::FunctionCall { function, args } => {
            let mut params: Vec<String> = (0..op.children.len())
                .map(|i| format!("TABLE {}", from(i)))
                .collect();
            params.extend(args.iter().cloned());
            format!("SELECT * FROM {function}({})", params.join(", "))
        }
    }
}

fn select_list(op: &Operator) -> String {
    if op.result.schema.is_empty() {
        "*".to_string()
    } else {
        op.result.schema.names().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::ResultDesc;
    use quarry_core::schema::Schema;

    #[test]
    fn input_tables_are_listed_once() {
        let sql = format!(
            "SELECT * FROM {} AS t0, {} AS t1, {} AS t2",
            input_placeholder("a"),
            input_placeholder("b"),
            input_placeholder("a")
        );
        assert_eq!(input_tables(&sql), vec!["a".to_string(), "b".to_string()]);
        assert!(has_placeholders(&sql));
    }

    #[test]
    fn selection_references_child_placeholder() {
        let child = OperatorId::from_parts(&[1, 1]);
        let op = Operator {
            id: OperatorId::from_parts(&[1, 2]),
            kind: OperatorKind::Selection {
                predicate: "x > 3".into(),
            },
            children: vec![child.clone()],
            parents: vec![],
            result: ResultDesc::new("sel", Schema::default()),
        };
        assert_eq!(
            render(&op),
            format!("SELECT * FROM {} AS t0 WHERE x > 3", op_placeholder(&child))
        );
    }
}
