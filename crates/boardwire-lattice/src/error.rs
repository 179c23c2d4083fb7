//! Error types for lattice lookup and join.

/// Errors raised by lattice operations and the catalog.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LatticeError {
    /// No lattice is registered under this name.
    #[error("lattice not found: {0}")]
    NotFound(String),

    /// A lattice with this name is already registered.
    #[error("lattice already registered: {0}")]
    Duplicate(String),

    /// A value's shape does not belong to the lattice it was joined in.
    #[error("lattice {lattice} cannot hold a {actual} value")]
    KindMismatch { lattice: String, actual: String },

    /// A raw value could not be converted into a lattice value.
    #[error("invalid value for lattice {lattice}: {reason}")]
    InvalidValue { lattice: String, reason: String },

    /// A lattice failed the sampled algebraic law check.
    #[error("lattice {lattice} violates {count} law check(s)")]
    LawViolation { lattice: String, count: usize },
}
