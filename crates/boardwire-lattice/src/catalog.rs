//! Name-keyed lattice catalog.
//!
//! Lattices are registered once and never replaced. Contacts and lowering
//! refer to lattices by name only; the catalog is the single place a name
//! turns into behavior.

use std::collections::BTreeMap;

use crate::error::LatticeError;
use crate::lattice::Lattice;
use crate::laws::{LawReport, check_laws};
use crate::value::LatticeValue;

/// Canonical names of the built-in lattices.
pub mod names {
    pub const MAX_INT: &str = "maxInt";
    pub const MIN_INT: &str = "minInt";
    pub const BOOL_OR: &str = "boolOr";
    pub const BOOL_AND: &str = "boolAnd";
    pub const SET_UNION: &str = "setUnion";
    pub const MAP_MERGE: &str = "mapMerge";
    pub const PAUSE: &str = "pause";
    pub const RATE_LIMIT: &str = "rateLimit";
    pub const FENCE: &str = "fence";
}

#[derive(Debug, Clone, Default)]
pub struct LatticeCatalog {
    lattices: BTreeMap<String, Lattice>,
}

impl LatticeCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding every built-in lattice.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for lattice in Lattice::builtins() {
            catalog
                .lattices
                .insert(lattice.name().to_string(), lattice);
        }
        catalog
    }

    /// Register a lattice under its own name. Names are never reused.
    pub fn register(&mut self, lattice: Lattice) -> Result<(), LatticeError> {
        let name = lattice.name().to_string();
        if self.lattices.contains_key(&name) {
            return Err(LatticeError::Duplicate(name));
        }
        self.lattices.insert(name, lattice);
        Ok(())
    }

    /// Register after checking the lattice laws on `samples`.
    ///
    /// Returns the clean report on success; nothing is registered when any
    /// law fails.
    pub fn register_checked(
        &mut self,
        lattice: Lattice,
        samples: &[LatticeValue],
    ) -> Result<LawReport, LatticeError> {
        let report = check_laws(&lattice, samples);
        if !report.is_clean() {
            return Err(LatticeError::LawViolation {
                lattice: report.lattice.clone(),
                count: report.violations.len(),
            });
        }
        self.register(lattice)?;
        Ok(report)
    }

    pub fn get(&self, name: &str) -> Result<&Lattice, LatticeError> {
        self.lattices
            .get(name)
            .ok_or_else(|| LatticeError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lattices.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lattices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lattices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lattices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::ExternalLattice;
    use serde_json::{Value, json};
    use std::sync::Arc;

    struct NotIdempotent;

    impl ExternalLattice for NotIdempotent {
        fn name(&self) -> &str {
            "sum"
        }

        fn bottom(&self) -> Value {
            json!(0)
        }

        fn validate(&self, value: &Value) -> Result<(), String> {
            value.as_i64().map(|_| ()).ok_or_else(|| "int".to_string())
        }

        fn join(&self, a: &Value, b: &Value) -> Value {
            json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0))
        }
    }

    #[test]
    fn builtins_are_registered_by_name() {
        let catalog = LatticeCatalog::with_builtins();
        assert_eq!(catalog.len(), 9);
        for name in [
            names::MAX_INT,
            names::MIN_INT,
            names::BOOL_OR,
            names::BOOL_AND,
            names::SET_UNION,
            names::MAP_MERGE,
            names::PAUSE,
            names::RATE_LIMIT,
            names::FENCE,
        ] {
            assert_eq!(catalog.get(name).unwrap().name(), name);
        }
    }

    #[test]
    fn unknown_name_is_not_found() {
        let catalog = LatticeCatalog::with_builtins();
        assert_eq!(
            catalog.get("lww").unwrap_err(),
            LatticeError::NotFound("lww".into())
        );
    }

    #[test]
    fn registration_is_once_only() {
        let mut catalog = LatticeCatalog::with_builtins();
        assert_eq!(
            catalog.register(Lattice::MaxInt).unwrap_err(),
            LatticeError::Duplicate("maxInt".into())
        );
    }

    #[test]
    fn checked_registration_refuses_lawless_lattices() {
        let mut catalog = LatticeCatalog::new();
        let samples = vec![
            LatticeValue::Opaque(json!(1)),
            LatticeValue::Opaque(json!(2)),
        ];
        let err = catalog
            .register_checked(Lattice::External(Arc::new(NotIdempotent)), &samples)
            .unwrap_err();
        assert!(matches!(err, LatticeError::LawViolation { ref lattice, .. } if lattice == "sum"));
        assert!(!catalog.contains("sum"));
    }
}
