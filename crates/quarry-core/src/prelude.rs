//! Convenient re-exports for downstream crates.

pub use crate::catalog::{Catalog, ConnectionMeta, MemoryCatalog, SchemaMeta, TableMeta};
pub use crate::config::EngineConfig;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::id::{DeploymentId, IdSequence, Identifier, OperatorId, PlanId, UnitId};
pub use crate::manifest::{ManifestId, RunManifest};
pub use crate::node::{ComputeNodeDesc, DeploymentDesc, TrackerNodeDesc};
pub use crate::schema::{DataType, Field, Schema};
