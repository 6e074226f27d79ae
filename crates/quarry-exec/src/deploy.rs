//! Turn slot-assigned units into concrete statements for their nodes.
//!
//! Logical tables become physical ones by suffixing the deployment id. An
//! input produced on the same host is read directly; anything else goes
//! through a federated staging table created on open and dropped on close.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use quarry_core::error::{Error, Result};
use quarry_core::id::{DeploymentId, UnitId};
use quarry_core::node::{host_of, DeploymentDesc};
use quarry_core::schema::Schema;
use quarry_planner::sql::{has_placeholders, input_placeholder};
use quarry_planner::tracker::{InputSource, TrackerPlan};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableOperator {
    pub deployment: DeploymentId,
    pub unit: UnitId,
    pub node: String,
    pub output_table: String,
    /// Create staging and output tables.
    pub open: Vec<String>,
    /// Fill the output table.
    pub execute: String,
    /// Drop everything `open` created.
    pub close: Vec<String>,
    pub sources: Vec<DeploymentDesc>,
    pub consumers: Vec<DeploymentDesc>,
}

pub fn physical_table(logical: &str, deployment: &DeploymentId) -> String {
    format!("{logical}_{}", deployment.to_table_suffix())
}

fn create_table(name: &str, schema: &Schema) -> String {
    if schema.is_empty() {
        format!("CREATE TABLE {name}")
    } else {
        format!("CREATE TABLE {name} ({})", schema.column_defs())
    }
}

fn deployment_of<'a>(plan: &'a TrackerPlan, unit: &UnitId) -> Result<&'a DeploymentDesc> {
    plan.deployment(unit)
        .ok_or_else(|| Error::InvalidTrackerPlan(format!("unit {unit} has no deployment")))
}

pub fn build_executable(plan: &TrackerPlan, unit_id: &UnitId) -> Result<ExecutableOperator> {
    let unit = plan
        .unit(unit_id)
        .ok_or_else(|| Error::InvalidTrackerPlan(format!("unknown unit {unit_id}")))?;
    let desc = deployment_of(plan, unit_id)?;
    let suffix = desc.deployment.to_table_suffix();
    let output_table = physical_table(&unit.output.name, &desc.deployment);

    let mut open = Vec::new();
    let mut close = Vec::new();
    let mut sql = unit.sql.clone();

    for (name, input) in &unit.inputs {
        let (remote, local) = match &input.source {
            InputSource::Unit { unit: src, table } => {
                let src_desc = deployment_of(plan, src)?;
                let src_table = physical_table(table, &src_desc.deployment);
                if src_desc.host() == desc.host() {
                    (None, src_table)
                } else {
                    (Some(format!("{}/{src_table}", src_desc.node)), src_table)
                }
            }
            InputSource::External { connection, table } => {
                let co_located = connection
                    .node
                    .as_deref()
                    .is_some_and(|n| host_of(n) == desc.host());
                if co_located {
                    (None, table.clone())
                } else {
                    (Some(format!("{}/{table}", connection.url)), table.clone())
                }
            }
        };

        let resolved = match remote {
            None => local,
            Some(address) => {
                let staging = format!("in_{name}_{suffix}");
                open.push(format!(
                    "{} ENGINE=FEDERATED CONNECTION='{address}'",
                    create_table(&staging, &input.schema)
                ));
                close.push(format!("DROP TABLE IF EXISTS {staging}"));
                staging
            }
        };
        sql = sql.replace(&input_placeholder(name), &resolved);
    }

    if has_placeholders(&sql) {
        return Err(Error::Invariant(format!(
            "unit {unit_id} has unresolved tables after deployment: {sql}"
        )));
    }

    let execute = if unit.output.schema.is_empty() {
        format!("CREATE TABLE {output_table} AS {sql}")
    } else {
        open.push(create_table(&output_table, &unit.output.schema));
        format!("INSERT INTO {output_table} {sql}")
    };
    close.push(format!("DROP TABLE IF EXISTS {output_table}"));

    let sources = plan
        .sources_of(unit_id)
        .map(|s| deployment_of(plan, s).cloned())
        .collect::<Result<Vec<_>>>()?;
    let consumers = plan
        .consumers_of(unit_id)
        .map(|c| deployment_of(plan, c).cloned())
        .collect::<Result<Vec<_>>>()?;

    Ok(ExecutableOperator {
        deployment: desc.deployment.clone(),
        unit: unit_id.clone(),
        node: desc.node.clone(),
        output_table,
        open,
        execute,
        close,
        sources,
        consumers,
    })
}

pub fn build_all(plan: &TrackerPlan) -> Result<BTreeMap<UnitId, ExecutableOperator>> {
    plan.unit_ids()
        .into_iter()
        .map(|u| build_executable(plan, &u).map(|e| (u, e)))
        .collect()
}
