//! # boardwire-kernel
//!
//! Board IR, its single mutator, and the lowering that turns it into an
//! executable graph.
//!
//! ## Flow
//!
//! ```text
//! Plan ──► Binder ──► BoardIr (scratch) ──► lower() ──► RealizedGraph
//!            │   structural → semantic → authorize → provenance
//!            └── Receipt (ok | error), appended to history
//! ```
//!
//! The IR is plain data; the [`SlotManager`] enforces occupancy rules; the
//! [`AspectRegistry`] maps aspect ids to typed configurations and canonical
//! order keys. Lowering is deterministic: the same IR always yields the same
//! node and edge ids in the same order.

pub mod aspect;
pub mod binder;
pub mod error;
pub mod hash;
pub mod id;
pub mod ir;
pub mod lower;
pub mod plan;
pub mod policy;
pub mod realized;
pub mod slots;
pub mod store;

pub use aspect::{
    AspectConfig, AspectError, AspectManifest, AspectRegistry, CreditGateConfig, ExternalAspect,
    LimitMode, QueueOrder, RateLimitConfig, TapConfig, TapSinkKind,
};
pub use binder::{Binder, WallClock};
pub use error::{BinderError, failure_class};
pub use id::{
    AspectId, BoardId, ContactId, EdgeId, GadgetId, IdError, NodeId, PinId, PinoutId, PrincipalId,
    ReceiptId, SlotId, WireId,
};
pub use ir::{
    AspectInstance, AspectScope, BoardIr, Endpoint, GadgetSpec, JoinPoint, MountRecord, PinDecl,
    Provenance, ReplicaPolicy, ScopedAspect, SlotDecl, WireSpec,
};
pub use lower::{LowerError, lower};
pub use plan::{Plan, PlanOp, WireSelector};
pub use policy::{Acl, Policy};
pub use realized::{
    Diff, EdgeProvenance, NodeRole, PinRef, Receipt, ReceiptFailure, ReceiptStatus,
    RealizedEdge, RealizedGraph, RealizedNode, RealizedPin,
};
pub use slots::{MountEvent, MountSubscriber, MountedGadget, SlotError, SlotManager};
pub use store::{BoardSnapshot, BoardStore, ReceiptQuery, StoreError};
