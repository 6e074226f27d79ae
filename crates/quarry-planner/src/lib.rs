#![forbid(unsafe_code)]
//! quarry-planner: compiled operator DAG → split points → tracker plan.
//!
//! Design:
//! - Operators live in an arena (`CompilePlan`) keyed by `OperatorId`; edges
//!   are identifier lists on both ends and only the plan mutates them.
//! - `split` tags the operators that become independently materialized
//!   sub-plans; `join_combine` folds equi-join chains into one n-ary join.
//! - `codegen` assembles per-unit SQL and the source/consumer wiring that
//!   quarry-exec deploys.
//! - `cost` turns operator chains into per-operator runtime estimates that
//!   the fault-cost model (quarry-cost) scores.
//!
//! Parsing SQL is not our job; the YAML DSL in `dsl` stands in for the
//! compiler front end.

pub mod codegen;
pub mod cost;
pub mod dsl;
pub mod join_combine;
pub mod operator;
pub mod plan;
pub mod split;
pub mod sql;
pub mod tracker;

pub use codegen::{unit_table_name, CodeGenerator};
pub use cost::{chain_steps, estimate_operators, main_chain, OperatorEstimate, WorkHint};
pub use dsl::yaml::{build_plan, parse_yaml_plan, ParsedPlan, PlanConfig, PlanDoc};
pub use join_combine::combine_joins;
pub use operator::{AggExpr, AggFunc, AttrRef, JoinToken, Operator, OperatorKind, ResultDesc};
pub use plan::CompilePlan;
pub use split::{apply_split_points, is_split_point, split_points};
pub use tracker::{InputSource, InputTable, OutputTable, TrackerOperator, TrackerPlan};
