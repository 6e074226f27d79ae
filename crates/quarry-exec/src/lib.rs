#![forbid(unsafe_code)]
//! quarry-exec: slot scheduling, deployment and execution of tracker plans.
//!
//! The master coordinator owns slot inventories; a tracker node asks it for
//! slots, binds units to nodes, builds the per-unit statements and drives
//! open/execute/close through a `Transport`. `LocalCluster` is an in-process
//! transport standing in for real compute nodes.

pub mod assign;
pub mod cluster;
pub mod coordinator;
pub mod deploy;
pub mod monitor;
pub mod policy;
pub mod tracker;
pub mod transport;

pub use assign::assign_slots;
pub use cluster::{ClusterEvent, LocalCluster};
pub use coordinator::{
    Allocation, MasterCoordinator, NodeHint, RemoteCoordinator, SlotAllocator, SlotRequest,
};
pub use deploy::{build_all, build_executable, physical_table, ExecutableOperator};
pub use monitor::Monitor;
pub use policy::{policy_from_config, SchedulingPolicy, SimplePolicy, WishListPolicy};
pub use tracker::TrackerNode;
pub use transport::{remote_call, Command, DeploymentStatus, Response, Transport, TransportError};
