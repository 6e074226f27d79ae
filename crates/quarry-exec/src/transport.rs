//! Command/response transport between trackers, compute nodes and the
//! coordinator.
//!
//! Wire format and sockets are somebody else's problem; everything here goes
//! through [`Transport::send`]. [`remote_call`] is the only place transport
//! failures are turned into `quarry_core::Error`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use quarry_core::error::{Error, Result};
use quarry_core::id::DeploymentId;
use quarry_core::node::ComputeNodeDesc;

use crate::coordinator::{Allocation, SlotRequest};
use crate::deploy::ExecutableOperator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    OpenOperator { operator: ExecutableOperator },
    ExecuteOperator { deployment: DeploymentId },
    CloseOperator { deployment: DeploymentId },
    Ping { deployment: DeploymentId },
    AllocateSlots { request: SlotRequest },
    ReleaseSlots { allocation: Allocation },
    ListComputeNodes,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::OpenOperator { .. } => "open_operator",
            Command::ExecuteOperator { .. } => "execute_operator",
            Command::CloseOperator { .. } => "close_operator",
            Command::Ping { .. } => "ping",
            Command::AllocateSlots { .. } => "allocate_slots",
            Command::ReleaseSlots { .. } => "release_slots",
            Command::ListComputeNodes => "list_compute_nodes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Opened,
    Finished,
    Aborted,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum Response {
    Ack,
    Status { status: DeploymentStatus },
    Allocated { allocation: Allocation },
    ComputeNodes { nodes: Vec<ComputeNodeDesc> },
    NoFreeSlot { requested: usize, available: usize },
    Rejected { message: String },
}

/// Failures local to the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("node {0} is unreachable")]
    Unreachable(String),

    #[error("unknown deployment {0}")]
    UnknownDeployment(String),

    #[error("cannot connect to store on {url}: {message}")]
    StoreConnection { url: String, message: String },

    #[error("statement failed on {url}: {message}")]
    StoreExecution { url: String, message: String },

    #[error("command {0} is not served here")]
    Unsupported(&'static str),
}

pub trait Transport: Send + Sync {
    fn send(&self, addr: &str, cmd: Command) -> std::result::Result<Response, TransportError>;
}

/// Send `cmd` to `node` and map every failure into the engine's error
/// taxonomy. A `NoFreeSlot` answer is an ordinary error value, not a
/// transport fault.
pub fn remote_call(transport: &dyn Transport, node: &str, cmd: Command) -> Result<Response> {
    let command = cmd.name();
    tracing::trace!(node, command, "remote call");
    match transport.send(node, cmd) {
        Ok(Response::NoFreeSlot {
            requested,
            available,
        }) => Err(Error::NoFreeSlot {
            requested,
            available,
        }),
        Ok(Response::Rejected { message }) => Err(Error::RemoteOperatorFailure {
            node: node.to_string(),
            command: command.to_string(),
            message,
        }),
        Ok(resp) => Ok(resp),
        Err(TransportError::StoreConnection { url, message }) => {
            Err(Error::StoreConnectionError { url, message })
        }
        Err(TransportError::StoreExecution { url, message }) => {
            Err(Error::StoreExecutionError { url, message })
        }
        Err(e) => Err(Error::RemoteOperatorFailure {
            node: node.to_string(),
            command: command.to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::error::ErrorKind;

    struct Fixed(fn() -> std::result::Result<Response, TransportError>);

    impl Transport for Fixed {
        fn send(&self, _addr: &str, _cmd: Command) -> std::result::Result<Response, TransportError> {
            (self.0)()
        }
    }

    fn ping() -> Command {
        Command::Ping {
            deployment: DeploymentId::from_parts(&[1, 1, 1]),
        }
    }

    #[test]
    fn unreachable_node_becomes_remote_failure() {
        let t = Fixed(|| Err(TransportError::Unreachable("n1:1".into())));
        let err = remote_call(&t, "n1:1", ping()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteOperatorFailure);
        assert!(err.to_string().contains("'ping' on n1:1"));
    }

    #[test]
    fn store_and_slot_answers_keep_their_kind() {
        let t = Fixed(|| {
            Err(TransportError::StoreExecution {
                url: "n1:1".into(),
                message: "syntax".into(),
            })
        });
        assert_eq!(
            remote_call(&t, "n1:1", ping()).unwrap_err().kind(),
            ErrorKind::StoreExecutionError
        );

        let t = Fixed(|| {
            Ok(Response::NoFreeSlot {
                requested: 3,
                available: 1,
            })
        });
        assert_eq!(
            remote_call(&t, "c:1", Command::ListComputeNodes)
                .unwrap_err()
                .kind(),
            ErrorKind::NoFreeSlot
        );
    }
}
