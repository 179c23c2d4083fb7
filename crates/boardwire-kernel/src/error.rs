//! Binder errors and their stable failure classes.
//!
//! A `BinderError` never escapes `Binder::apply`; it is rendered into an
//! error receipt under its failure class.

use crate::aspect::AspectError;
use crate::id::{GadgetId, IdError, SlotId};
use crate::lower::LowerError;
use crate::slots::SlotError;

/// Failure classes recorded in error receipts.
pub mod failure_class {
    pub const VALIDATION: &str = "validation_error";
    pub const NOT_FOUND: &str = "not_found_error";
    pub const CAPACITY: &str = "capacity_error";
    pub const PERMISSION: &str = "permission_error";
    pub const PINOUT_MISMATCH: &str = "pinout_mismatch_error";
    pub const DUPLICATE_SLOT: &str = "duplicate_slot";
    pub const ALREADY_MOUNTED: &str = "already_mounted";
    pub const UNSUPPORTED_OPERATION: &str = "unsupported_operation_error";
    pub const LATTICE_NOT_FOUND: &str = "lattice_not_found";
    pub const LOWERING: &str = "lowering_error";
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BinderError {
    #[error("invalid plan: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("pinout mismatch: {0}")]
    PinoutMismatch(String),

    #[error("slot {0} is already declared")]
    DuplicateSlot(SlotId),

    #[error("gadget {gadget} is already mounted in slot {slot}")]
    AlreadyMounted { gadget: GadgetId, slot: SlotId },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("lattice not found: {0}")]
    LatticeNotFound(String),

    #[error("lowering failed: {0}")]
    Lowering(LowerError),
}

impl BinderError {
    pub fn failure_class(&self) -> &'static str {
        match self {
            Self::Validation(_) => failure_class::VALIDATION,
            Self::NotFound(_) => failure_class::NOT_FOUND,
            Self::Capacity(_) => failure_class::CAPACITY,
            Self::Permission(_) => failure_class::PERMISSION,
            Self::PinoutMismatch(_) => failure_class::PINOUT_MISMATCH,
            Self::DuplicateSlot(_) => failure_class::DUPLICATE_SLOT,
            Self::AlreadyMounted { .. } => failure_class::ALREADY_MOUNTED,
            Self::UnsupportedOperation(_) => failure_class::UNSUPPORTED_OPERATION,
            Self::LatticeNotFound(_) => failure_class::LATTICE_NOT_FOUND,
            Self::Lowering(_) => failure_class::LOWERING,
        }
    }
}

impl From<SlotError> for BinderError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::DuplicateSlot(slot) => Self::DuplicateSlot(slot),
            SlotError::AlreadyMounted { gadget, slot } => Self::AlreadyMounted { gadget, slot },
            e @ (SlotError::SlotNotFound(_) | SlotError::GadgetNotFound(_)) => {
                Self::NotFound(e.to_string())
            }
            e @ (SlotError::AtCapacity { .. } | SlotError::CapacityBelowOccupancy { .. }) => {
                Self::Capacity(e.to_string())
            }
            e @ SlotError::PinoutMismatch { .. } => Self::PinoutMismatch(e.to_string()),
        }
    }
}

impl From<AspectError> for BinderError {
    fn from(err: AspectError) -> Self {
        match err {
            e @ AspectError::NotRegistered(_) => Self::NotFound(e.to_string()),
            e => Self::Validation(e.to_string()),
        }
    }
}

impl From<LowerError> for BinderError {
    fn from(err: LowerError) -> Self {
        match err {
            LowerError::Aspect(e) => e.into(),
            e @ LowerError::UnknownLattice { .. } => Self::LatticeNotFound(e.to_string()),
            e => Self::Lowering(e),
        }
    }
}

impl From<IdError> for BinderError {
    fn from(err: IdError) -> Self {
        Self::Validation(err.to_string())
    }
}
