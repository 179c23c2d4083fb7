//! # boardwire-lattice
//!
//! The algebra every contact value lives in. A lattice here is a
//! join-semilattice with a bottom element: `join` is commutative,
//! associative and idempotent, and `join(bottom, x) == x`. Those laws are
//! what make propagation order-insensitive, so the engine can drain its work
//! queue in any schedule and still land on the same fixpoint.
//!
//! ## Layout
//!
//! ```text
//! JoinSemilattice      ← typed lattices (MaxInt, PauseLevel, RateLimitPolicy, …)
//!     │
//! LatticeValue         ← closed union of value shapes carried by contacts
//!     │
//! Lattice              ← closed union of lattice kinds + External extension slot
//!     │
//! LatticeCatalog       ← name → Lattice, registered once, read-only after
//!     │
//! laws                 ← sampled law checks for any Lattice
//! ```

pub mod catalog;
pub mod error;
pub mod lattice;
pub mod laws;
pub mod semilattice;
pub mod value;

pub use catalog::{LatticeCatalog, names};
pub use error::LatticeError;
pub use lattice::{ExternalLattice, Lattice};
pub use laws::{Law, LawReport, LawViolation, check_laws, sample_values};
pub use semilattice::{BoolAnd, BoolOr, FenceSet, JoinSemilattice, MaxInt, MinInt, SetUnion};
pub use value::{LatticeValue, PauseLevel, RateLimitPolicy};
