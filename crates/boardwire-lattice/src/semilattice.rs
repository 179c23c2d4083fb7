//! Typed join-semilattices. Join = least upper bound; bottom = identity.

use std::collections::BTreeSet;

use crate::value::{PauseLevel, RateLimitPolicy};

pub trait JoinSemilattice: Sized {
    fn join(&self, other: &Self) -> Self;
    fn bottom() -> Self;

    /// `self ≤ other` in the lattice order.
    fn leq(&self, other: &Self) -> bool
    where
        Self: PartialEq,
    {
        &self.join(other) == other
    }
}

/// Numeric max-lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaxInt(pub i64);

impl JoinSemilattice for MaxInt {
    #[inline]
    fn join(&self, other: &Self) -> Self {
        MaxInt(self.0.max(other.0))
    }

    #[inline]
    fn bottom() -> Self {
        MaxInt(i64::MIN)
    }
}

/// Numeric min-lattice. Order is reversed: smaller is "higher".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinInt(pub i64);

impl JoinSemilattice for MinInt {
    #[inline]
    fn join(&self, other: &Self) -> Self {
        MinInt(self.0.min(other.0))
    }

    #[inline]
    fn bottom() -> Self {
        MinInt(i64::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoolOr(pub bool);

impl JoinSemilattice for BoolOr {
    #[inline]
    fn join(&self, other: &Self) -> Self {
        BoolOr(self.0 || other.0)
    }

    #[inline]
    fn bottom() -> Self {
        BoolOr(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoolAnd(pub bool);

impl JoinSemilattice for BoolAnd {
    #[inline]
    fn join(&self, other: &Self) -> Self {
        BoolAnd(self.0 && other.0)
    }

    #[inline]
    fn bottom() -> Self {
        BoolAnd(true)
    }
}

/// Grow-only set of strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetUnion(pub BTreeSet<String>);

impl JoinSemilattice for SetUnion {
    fn join(&self, other: &Self) -> Self {
        SetUnion(self.0.union(&other.0).cloned().collect())
    }

    fn bottom() -> Self {
        SetUnion(BTreeSet::new())
    }

    fn leq(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }
}

/// Set of fence identifiers encountered along a path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FenceSet(pub BTreeSet<String>);

impl JoinSemilattice for FenceSet {
    fn join(&self, other: &Self) -> Self {
        FenceSet(self.0.union(&other.0).cloned().collect())
    }

    fn bottom() -> Self {
        FenceSet(BTreeSet::new())
    }

    fn leq(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl JoinSemilattice for PauseLevel {
    #[inline]
    fn join(&self, other: &Self) -> Self {
        (*self).max(*other)
    }

    #[inline]
    fn bottom() -> Self {
        PauseLevel::Running
    }
}

impl JoinSemilattice for RateLimitPolicy {
    /// Componentwise minimum: composing two limits never loosens either.
    fn join(&self, other: &Self) -> Self {
        RateLimitPolicy {
            rps: self.rps.min(other.rps),
            burst: self.burst.min(other.burst),
        }
    }

    fn bottom() -> Self {
        RateLimitPolicy::UNLIMITED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_int_join_is_max() {
        assert_eq!(MaxInt(3).join(&MaxInt(7)), MaxInt(7));
        assert_eq!(MaxInt::bottom().join(&MaxInt(-4)), MaxInt(-4));
        assert!(MaxInt(2).leq(&MaxInt(9)));
        assert!(!MaxInt(9).leq(&MaxInt(2)));
    }

    #[test]
    fn min_int_order_is_reversed() {
        assert_eq!(MinInt(3).join(&MinInt(7)), MinInt(3));
        assert!(MinInt(9).leq(&MinInt(2)));
    }

    #[test]
    fn bool_lattices() {
        assert_eq!(BoolOr(false).join(&BoolOr(true)), BoolOr(true));
        assert_eq!(BoolAnd(true).join(&BoolAnd(false)), BoolAnd(false));
        assert_eq!(BoolAnd::bottom().join(&BoolAnd(false)), BoolAnd(false));
    }

    #[test]
    fn rate_limit_join_takes_the_more_restrictive_components() {
        let a = RateLimitPolicy::new(100.0, 20).unwrap();
        let b = RateLimitPolicy::new(50.0, 30).unwrap();
        let joined = a.join(&b);
        assert_eq!(joined, RateLimitPolicy::new(50.0, 20).unwrap());
        assert_eq!(joined, b.join(&a));
        assert_eq!(RateLimitPolicy::bottom().join(&a), a);
    }

    #[test]
    fn pause_join_is_max_level() {
        assert_eq!(PauseLevel::Soft.join(&PauseLevel::Gated), PauseLevel::Gated);
        assert_eq!(
            PauseLevel::bottom().join(&PauseLevel::Isolated),
            PauseLevel::Isolated
        );
    }
}
