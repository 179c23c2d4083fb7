//! # boardwire-engine
//!
//! Executes a [`RealizedGraph`](boardwire_kernel::RealizedGraph).
//!
//! ```text
//! RealizedGraph ──► Network::realize ──► contacts + connections + nodes
//!                                              │
//! propagate(contact, value) ──► FIFO pulse ────┘──► fixpoint | NonConvergence
//!                                   │
//!                                   ├── gadgets (GadgetLibrary)
//!                                   └── shims: tap, rateLimit, creditGate
//! ```
//!
//! Contacts only ever move up their lattice, so replaying the same input
//! trace reaches the same fixpoint. Shims and gadget firings report through
//! an injected [`EventSink`]; shims read time from an injected [`Clock`].

pub mod clock;
pub mod config;
pub mod contact;
pub mod error;
pub mod gadget;
pub mod network;
pub mod propagate;
pub mod shim;
pub mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use contact::{Contact, ContactStore};
pub use error::{ConfigError, EngineError, ShimError};
pub use gadget::{
    Gadget, GadgetEffect, GadgetError, GadgetFactory, GadgetLibrary, PinValues, Primitive,
    ShimFactory,
};
pub use network::Network;
pub use propagate::{GadgetFailure, PropagationReport};
pub use shim::{
    Admission, Completion, Demand, DemandCallback, Outcome, Shim, ShimContext, ShimItem,
    TapHooks, TapRecord, TicketId,
};
pub use sink::{
    EventSink, FanoutSink, MemorySink, NoopSink, ObserverHandle, ShimEvent, TracingSink,
};
