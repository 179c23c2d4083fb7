//! Engine and shim errors.

use boardwire_kernel::{ContactId, NodeId};
use boardwire_lattice::LatticeError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The work queue was still non-empty after `cap` tasks. Values already
    /// committed stay; the remaining tasks are abandoned.
    #[error("propagation did not converge within {cap} tasks ({abandoned} abandoned)")]
    NonConvergence { cap: usize, abandoned: usize },

    #[error("contact {0} not found")]
    ContactNotFound(ContactId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("contact {contact}: {source}")]
    Lattice {
        contact: ContactId,
        #[source]
        source: LatticeError,
    },

    #[error("cannot realize graph: {0}")]
    Realize(String),

    #[error("no gadget or shim registered for kind {0}")]
    UnknownGadgetKind(String),

    #[error("kind {0} is already registered")]
    DuplicateKind(String),

    #[error(transparent)]
    Shim(#[from] ShimError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShimError {
    #[error("{node}: rate limited")]
    RateLimited { node: NodeId },

    #[error("{node}: needs {required} credits, {available} available")]
    NoCredits {
        node: NodeId,
        required: u64,
        available: u64,
    },

    #[error("{node}: {operation} is not supported by a {kind} shim")]
    Unsupported {
        node: NodeId,
        kind: String,
        operation: &'static str,
    },

    #[error("invalid shim config: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid engine config: {0}")]
    Invalid(String),
}
