//! Error types.
//!
//! Most failures in this crate are locally recoverable and only surface as
//! log output. The variants here cover the cases a caller can observe: a
//! rebuild promoted to a hard failure by [`MissingTargetPolicy::Fail`], a
//! cycle found while scheduling, and errors coming back from host operation
//! bodies.
//!
//! [`MissingTargetPolicy::Fail`]: crate::config::MissingTargetPolicy::Fail

use thiserror::Error;

use crate::graph::OperationId;
use crate::store::DatablockId;

/// Errors produced while building, tagging or evaluating a graph.
#[derive(Debug, Error)]
pub enum DepsgraphError {
    /// A relation was requested against a node that does not exist in the
    /// current graph.
    #[error("missing relation target '{target}' for relation '{description}'")]
    MissingTarget {
        /// Human readable rendering of the key that could not be found.
        target: String,
        /// Description of the dropped relation.
        description: String,
    },

    /// A reference inside the store points at a missing or wrongly typed
    /// datablock.
    #[error("datablock {0:?} is referenced but is not a valid {1}")]
    MalformedReference(DatablockId, &'static str),

    /// The datablock is not part of the store.
    #[error("unknown datablock {0:?}")]
    UnknownDatablock(DatablockId),

    /// The ordering relations contain a cycle through the listed operations.
    #[error("dependency cycle through {} operations", .0.len())]
    DependencyCycle(Vec<OperationId>),

    /// The configuration could not be parsed.
    #[error("invalid graph configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A host operation body failed.
    #[error("operation '{name}' failed: {source}")]
    Operation {
        /// Diagnostic name of the operation.
        name: String,
        /// The error returned by the operation body.
        #[source]
        source: anyhow::Error,
    },

    /// The dedicated worker pool could not be created.
    #[error("failed to build evaluation thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, DepsgraphError>;
