#![forbid(unsafe_code)]
//! quarry: split compiled SQL operator DAGs into tracker plans, schedule them
//! onto compute slots, and score materialization choices against failures.
//!
//! This facade re-exports the workspace crates so tools and benchmarks can
//! depend on a single package.

pub use quarry_core as core;
pub use quarry_cost as cost;
pub use quarry_exec as exec;
pub use quarry_planner as planner;
