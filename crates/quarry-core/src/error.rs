use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical result for every quarry crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("plan {plan} has no roots")]
    NoRootsInPlan { plan: String },

    #[error("operator {op} of kind {kind} cannot take part in plan splitting")]
    UnsupportedOperatorForSplit { op: String, kind: String },

    #[error("no free compute slot: requested {requested}, available {available}")]
    NoFreeSlot { requested: usize, available: usize },

    #[error("invalid tracker plan: {0}")]
    InvalidTrackerPlan(String),

    #[error("remote call '{command}' on {node} failed: {message}")]
    RemoteOperatorFailure {
        node: String,
        command: String,
        message: String,
    },

    #[error("catalog {kind} '{name}' not found")]
    CatalogObjectNotFound { kind: &'static str, name: String },

    #[error("catalog {kind} '{name}' already exists")]
    CatalogObjectAlreadyExists { kind: &'static str, name: String },

    #[error("cannot connect to store {url}: {message}")]
    StoreConnectionError { url: String, message: String },

    #[error("store statement failed on {url}: {message}")]
    StoreExecutionError { url: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Planning error: {0}")]
    Plan(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

/// Copyable discriminant of [`Error`], handy for matching in callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NoRootsInPlan,
    UnsupportedOperatorForSplit,
    NoFreeSlot,
    InvalidTrackerPlan,
    RemoteOperatorFailure,
    CatalogObjectNotFound,
    CatalogObjectAlreadyExists,
    StoreConnectionError,
    StoreExecutionError,
    Config,
    Plan,
    Hash,
    Invariant,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoRootsInPlan { .. } => ErrorKind::NoRootsInPlan,
            Error::UnsupportedOperatorForSplit { .. } => ErrorKind::UnsupportedOperatorForSplit,
            Error::NoFreeSlot { .. } => ErrorKind::NoFreeSlot,
            Error::InvalidTrackerPlan(_) => ErrorKind::InvalidTrackerPlan,
            Error::RemoteOperatorFailure { .. } => ErrorKind::RemoteOperatorFailure,
            Error::CatalogObjectNotFound { .. } => ErrorKind::CatalogObjectNotFound,
            Error::CatalogObjectAlreadyExists { .. } => ErrorKind::CatalogObjectAlreadyExists,
            Error::StoreConnectionError { .. } => ErrorKind::StoreConnectionError,
            Error::StoreExecutionError { .. } => ErrorKind::StoreExecutionError,
            Error::Config(_) => ErrorKind::Config,
            Error::Plan(_) => ErrorKind::Plan,
            Error::Hash(_) => ErrorKind::Hash,
            Error::Invariant(_) => ErrorKind::Invariant,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_substitutes_arguments() {
        let e = Error::NoFreeSlot {
            requested: 5,
            available: 2,
        };
        assert_eq!(e.kind(), ErrorKind::NoFreeSlot);
        assert_eq!(
            e.to_string(),
            "no free compute slot: requested 5, available 2"
        );
    }

    #[test]
    fn catalog_errors_name_the_object() {
        let e = Error::CatalogObjectNotFound {
            kind: "table",
            name: "lineitem".into(),
        };
        assert_eq!(e.to_string(), "catalog table 'lineitem' not found");
    }
}
