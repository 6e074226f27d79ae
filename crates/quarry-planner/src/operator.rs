//! Compile-time operators.
//!
//! One tagged union (`OperatorKind`) instead of a class per operator; every
//! pass dispatches with an exhaustive `match`, so adding a kind fails to
//! compile until each pass decides what to do with it.

use serde::{Deserialize, Serialize};

use quarry_core::id::OperatorId;
use quarry_core::schema::{DataType, Field, Schema};

/// Column `column` of the result produced by operator `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrRef {
    pub source: OperatorId,
    pub column: String,
}

impl AttrRef {
    pub fn new(source: OperatorId, column: impl Into<String>) -> Self {
        Self {
            source,
            column: column.into(),
        }
    }
}

/// One equality predicate of an n-ary join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinToken {
    pub left: AttrRef,
    pub right: AttrRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggExpr {
    pub func: AggFunc,
    /// `None` means `*` (only meaningful for `count`).
    #[serde(default)]
    pub column: Option<String>,
    pub alias: String,
}

impl AggExpr {
    pub fn to_sql(&self) -> String {
        let func = match self.func {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        };
        let arg = self.column.as_deref().unwrap_or("*");
        format!("{func}({arg}) AS {}", self.alias)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperatorKind {
    /// Base table bound to a catalog connection.
    TableScan { table: String },
    Selection { predicate: String },
    Projection { columns: Vec<String> },
    Aggregation {
        #[serde(default)]
        group_by: Vec<String>,
        aggregates: Vec<AggExpr>,
    },
    /// Binary join on `left.left_key = right.right_key`.
    EquiJoin { left_key: String, right_key: String },
    /// N-ary join produced by the join-combine pass.
    SqlJoin { tokens: Vec<JoinToken> },
    /// `(old, new)` attribute renames.
    Rename { renames: Vec<(String, String)> },
    /// Selection/projection/aggregation folded into a single unary SQL block.
    SqlCombined {
        #[serde(default)]
        select: Vec<String>,
        #[serde(default)]
        predicate: Option<String>,
        #[serde(default)]
        group_by: Vec<String>,
    },
    /// User function applied to its inputs; cannot be split.
    FunctionCall {
        function: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl OperatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::TableScan { .. } => "table_scan",
            OperatorKind::Selection { .. } => "selection",
            OperatorKind::Projection { .. } => "projection",
            OperatorKind::Aggregation { .. } => "aggregation",
            OperatorKind::EquiJoin { .. } => "equi_join",
            OperatorKind::SqlJoin { .. } => "sql_join",
            OperatorKind::Rename { .. } => "rename",
            OperatorKind::SqlCombined { .. } => "sql_combined",
            OperatorKind::FunctionCall { .. } => "function_call",
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(
            self,
            OperatorKind::EquiJoin { .. } | OperatorKind::SqlJoin { .. }
        )
    }

    /// Expected number of children, `None` for n-ary kinds.
    pub fn arity(&self) -> Option<usize> {
        match self {
            OperatorKind::TableScan { .. } => Some(0),
            OperatorKind::Selection { .. }
            | OperatorKind::Projection { .. }
            | OperatorKind::Aggregation { .. }
            | OperatorKind::Rename { .. }
            | OperatorKind::SqlCombined { .. } => Some(1),
            OperatorKind::EquiJoin { .. } => Some(2),
            OperatorKind::SqlJoin { .. } | OperatorKind::FunctionCall { .. } => None,
        }
    }

    /// Can this operator be moved below its input?
    pub fn supports_push_down(&self) -> bool {
        matches!(
            self,
            OperatorKind::Selection { .. } | OperatorKind::Projection { .. }
        )
    }

    /// Does this operator stop other operators from being pushed below it?
    pub fn is_push_down_barrier(&self) -> bool {
        match self {
            OperatorKind::Aggregation { .. } | OperatorKind::FunctionCall { .. } => true,
            OperatorKind::SqlCombined { group_by, .. } => !group_by.is_empty(),
            OperatorKind::TableScan { .. }
            | OperatorKind::Selection { .. }
            | OperatorKind::Projection { .. }
            | OperatorKind::EquiJoin { .. }
            | OperatorKind::SqlJoin { .. }
            | OperatorKind::Rename { .. } => false,
        }
    }

    /// Result schema of this operator given its inputs' schemas. Table scans
    /// have no inputs; their schema comes from the catalog.
    pub fn output_schema(&self, inputs: &[&Schema]) -> Schema {
        let first = || inputs.first().map(|s| (*s).clone()).unwrap_or_default();
        match self {
            OperatorKind::TableScan { .. } => Schema::default(),
            OperatorKind::Selection { .. } | OperatorKind::FunctionCall { .. } => first(),
            OperatorKind::Projection { columns } => pick(&first(), columns),
            OperatorKind::SqlCombined { select, .. } => {
                if select.is_empty() {
                    first()
                } else {
                    pick(&first(), select)
                }
            }
            OperatorKind::Aggregation {
                group_by,
                aggregates,
            } => {
                let mut schema = pick(&first(), group_by);
                for agg in aggregates {
                    let data_type = match agg.func {
                        AggFunc::Count => DataType::Int64,
                        AggFunc::Avg => DataType::Float64,
                        AggFunc::Sum | AggFunc::Min | AggFunc::Max => agg
                            .column
                            .as_deref()
                            .and_then(|c| {
                                let input = first();
                                input.index_of(c).map(|i| input.fields[i].data_type)
                            })
                            .unwrap_or(DataType::Float64),
                    };
                    schema.fields.push(Field::new(agg.alias.clone(), data_type));
                }
                schema
            }
            OperatorKind::Rename { renames } => {
                let mut schema = first();
                for field in &mut schema.fields {
                    if let Some((_, new)) = renames.iter().find(|(old, _)| *old == field.name) {
                        field.name = new.clone();
                    }
                }
                schema
            }
            OperatorKind::EquiJoin { .. } | OperatorKind::SqlJoin { .. } => inputs
                .iter()
                .fold(Schema::default(), |acc, s| acc.merge(s)),
        }
    }
}

fn pick(input: &Schema, columns: &[String]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|c| match input.index_of(c) {
                Some(i) => input.fields[i].clone(),
                None => Field::new(c.clone(), DataType::Utf8),
            })
            .collect(),
    )
}

/// Declared result of an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDesc {
    pub table: String,
    pub schema: Schema,
    #[serde(default)]
    pub materialized: bool,
}

impl ResultDesc {
    pub fn new(table: impl Into<String>, schema: Schema) -> Self {
        Self {
            table: table.into(),
            schema,
            materialized: false,
        }
    }

    pub fn materialized(mut self) -> Self {
        self.materialized = true;
        self
    }
}

/// A node of the compile-time DAG. Edges are identifiers into the owning
/// `CompilePlan`; only the plan rewrites them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    pub kind: OperatorKind,
    /// Ordered inputs. The same child may appear twice (self join).
    pub children: Vec<OperatorId>,
    /// Distinct consumers, unordered.
    pub parents: Vec<OperatorId>,
    pub result: ResultDesc,
}

impl Operator {
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_materialized(&self) -> bool {
        self.result.materialized
    }

    /// Children without repeats, in first-occurrence order.
    pub fn distinct_children(&self) -> Vec<OperatorId> {
        let mut out: Vec<OperatorId> = Vec::with_capacity(self.children.len());
        for c in &self.children {
            if !out.contains(c) {
                out.push(c.clone());
            }
        }
        out
    }
}
