//! YAML → `CompilePlan` + catalog.
//!
//! Example:
//! ```yaml
//! plan: 7
//! config: { policy: wishlist, mttr_secs: 20 }
//! connections:
//!   - { name: c1, url: "mysql://db1:3306/shop", node: "db1:5500" }
//! schemas:
//!   - { name: shop, connection: c1 }
//! tables:
//!   - name: orders
//!     schema: shop
//!     connections: [c1]
//!     attributes: [ {name: o_id, type: bigint}, {name: o_total, type: decimal} ]
//! operators:
//!   - { id: 1, op: table_scan, table: orders }
//!   - { id: 2, op: selection, predicate: "o_total > 100", children: [1] }
//!   - { id: 3, op: projection, columns: [o_id], children: [2], materialized: true }
//! ```
//!
//! Operators must be listed after their children. Ids are local to the plan;
//! operator `n` of plan `p` gets the identifier `p.n`.

use serde::{Deserialize, Serialize};

use quarry_core::catalog::{Catalog, ConnectionMeta, MemoryCatalog, SchemaMeta, TableMeta};
use quarry_core::config::EngineConfig;
use quarry_core::error::{Error, Result};
use quarry_core::id::{OperatorId, PlanId};
use quarry_core::schema::{DataType, Field, Schema};

use crate::cost::WorkHint;
use crate::operator::{OperatorKind, ResultDesc};
use crate::plan::CompilePlan;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDoc {
    #[serde(default = "default_plan_id")]
    pub plan: u64,
    #[serde(default)]
    pub config: Option<PlanConfig>,
    #[serde(default)]
    pub hints: Option<WorkHint>,
    #[serde(default)]
    pub connections: Vec<ConnectionMeta>,
    #[serde(default)]
    pub schemas: Vec<SchemaMeta>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    pub operators: Vec<OperatorDef>,
}

fn default_plan_id() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub schema: String,
    #[serde(default)]
    pub connections: Vec<String>,
    pub attributes: Vec<FieldDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorDef {
    pub id: u64,
    #[serde(flatten)]
    pub kind: OperatorKind,
    #[serde(default)]
    pub children: Vec<u64>,
    #[serde(default)]
    pub materialized: bool,
    /// Result table name; defaults to `op_<id>`.
    #[serde(default)]
    pub table_name: Option<String>,
}

/// Execution settings carried by a plan file. Unset fields leave the
/// engine configuration alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub policy: Option<String>,
    pub slots_per_unit: Option<usize>,
    pub mttr_secs: Option<f64>,
    /// Cluster mean time between failures, for the cost model.
    pub mtbf_secs: Option<f64>,
    /// Retry budget per level, for the cost model.
    pub retries: Option<u32>,
}

impl PlanConfig {
    pub fn apply_to(&self, cfg: &mut EngineConfig) {
        if let Some(p) = &self.policy {
            cfg.scheduling_policy = p.clone();
        }
        if let Some(n) = self.slots_per_unit {
            cfg.slots_per_unit = n;
        }
        if let Some(m) = self.mttr_secs {
            cfg.mttr_secs = m;
        }
    }
}

#[derive(Debug)]
pub struct ParsedPlan {
    pub plan: CompilePlan,
    pub catalog: MemoryCatalog,
    pub config: PlanConfig,
    pub hints: WorkHint,
}

fn to_schema(fields: &[FieldDef]) -> Schema {
    Schema::new(
        fields
            .iter()
            .map(|f| Field::new(f.name.clone(), DataType::parse(&f.data_type)))
            .collect(),
    )
}

pub fn parse_yaml_plan(yaml_src: &str) -> Result<ParsedPlan> {
    let doc: PlanDoc =
        serde_yaml::from_str(yaml_src).map_err(|e| Error::Plan(format!("invalid plan file: {e}")))?;
    build_plan(doc)
}

pub fn build_plan(doc: PlanDoc) -> Result<ParsedPlan> {
    let catalog = MemoryCatalog::new();
    for c in doc.connections {
        catalog.create_connection(c)?;
    }
    for s in doc.schemas {
        catalog.create_schema(s)?;
    }
    for t in doc.tables {
        catalog.create_table(TableMeta {
            attributes: to_schema(&t.attributes),
            name: t.name,
            schema_name: t.schema,
            connections: t.connections,
        })?;
    }

    let plan_id = PlanId::from_parts(&[doc.plan]);
    let mut plan = CompilePlan::new(plan_id.clone());
    if doc.operators.is_empty() {
        return Err(Error::Plan(format!("plan {plan_id} declares no operators")));
    }

    for def in doc.operators {
        let id = OperatorId::new(plan_id.identifier().append(def.id));
        if let Some(n) = def.kind.arity() {
            if def.children.len() != n {
                return Err(Error::Plan(format!(
                    "operator {} ({}) expects {n} inputs, got {}",
                    def.id,
                    def.kind.name(),
                    def.children.len()
                )));
            }
        }

        let children: Vec<OperatorId> = def
            .children
            .iter()
            .map(|c| OperatorId::new(plan_id.identifier().append(*c)))
            .collect();
        let schema = match &def.kind {
            OperatorKind::TableScan { table } => catalog.get_table(table)?.attributes,
            kind => {
                let inputs = children
                    .iter()
                    .map(|c| {
                        plan.operator(c).map(|op| &op.result.schema).ok_or_else(|| {
                            Error::Plan(format!(
                                "operator {} uses {c} before it is declared",
                                def.id
                            ))
                        })
                    })
                    .collect::<Result<Vec<&Schema>>>()?;
                kind.output_schema(&inputs)
            }
        };

        let table = def
            .table_name
            .unwrap_or_else(|| format!("op_{}", id.to_table_suffix()));
        let mut result = ResultDesc::new(table, schema);
        result.materialized = def.materialized;
        plan.insert_operator(id, def.kind, children, result)?;
    }

    tracing::debug!(plan = %plan.id(), operators = plan.len(), roots = plan.roots().len(), "plan file loaded");
    Ok(ParsedPlan {
        plan,
        catalog,
        config: doc.config.unwrap_or_default(),
        hints: doc.hints.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::error::ErrorKind;

    const DOC: &str = r#"
plan: 3
config: { policy: wishlist, mttr_secs: 12.5 }
connections:
  - { name: c1, url: "mysql://db1:3306/shop" }
schemas:
  - { name: shop, connection: c1 }
tables:
  - name: orders
    schema: shop
    connections: [c1]
    attributes: [ {name: o_id, type: bigint}, {name: o_total, type: decimal} ]
operators:
  - { id: 1, op: table_scan, table: orders }
  - { id: 2, op: selection, predicate: "o_total > 100", children: [1] }
  - { id: 3, op: projection, columns: [o_id], children: [2], materialized: true }
"#;

    #[test]
    fn parses_operators_catalog_and_config() {
        let parsed = parse_yaml_plan(DOC).unwrap();
        assert_eq!(parsed.plan.len(), 3);
        let root = OperatorId::from_parts(&[3, 3]);
        assert_eq!(parsed.plan.roots(), &[root.clone()]);
        let op = parsed.plan.get(&root).unwrap();
        assert!(op.is_materialized());
        assert_eq!(op.result.schema.names(), vec!["o_id"]);
        assert_eq!(op.result.schema.fields[0].data_type, DataType::Int64);
        assert_eq!(parsed.catalog.get_schema("shop").unwrap().connection, "c1");

        let mut cfg = EngineConfig::default();
        parsed.config.apply_to(&mut cfg);
        assert_eq!(cfg.scheduling_policy, "wishlist");
        assert_eq!(cfg.mttr_secs, 12.5);
        assert_eq!(cfg.slots_per_unit, 1);
    }

    #[test]
    fn forward_reference_is_a_plan_error() {
        let src = r#"
operators:
  - { id: 2, op: selection, predicate: "a = 1", children: [1] }
  - { id: 1, op: table_scan, table: t }
"#;
        let err = parse_yaml_plan(src).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Plan);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let src = r#"
operators:
  - { id: 1, op: equi_join, left_key: a, right_key: b, children: [] }
"#;
        assert_eq!(parse_yaml_plan(src).unwrap_err().kind(), ErrorKind::Plan);
        assert_eq!(parse_yaml_plan("operators: [").unwrap_err().kind(), ErrorKind::Plan);
    }
}
