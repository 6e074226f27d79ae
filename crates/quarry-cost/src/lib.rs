#![forbid(unsafe_code)]
//! quarry-cost: expected-runtime model for materialization configurations.
//!
//! A configuration cuts an operator chain into levels. Every level is rerun
//! on failure up to its retry budget, so materializing more often pays extra
//! write time up front but bounds the work lost per failure. The estimator
//! scores configurations and recommends the cheapest one.
//!
//! **No I/O, no async** here. Inputs are plain numbers; outputs are
//! deterministic.

pub mod enumerate;
pub mod estimator;
pub mod level;
pub mod verify;

pub use enumerate::{enumerate_configurations, MAX_ENUMERATED_CHAIN};
pub use estimator::{CostEstimator, MaterializedPlan, Recommendation};
pub use level::{ChainStep, FailureModel, Level};
