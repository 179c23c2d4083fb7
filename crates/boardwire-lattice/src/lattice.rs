//! Lattice kinds dispatched through one uniform join.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::catalog::names;
use crate::error::LatticeError;
use crate::semilattice::{BoolAnd, BoolOr, FenceSet, JoinSemilattice, MaxInt, MinInt, SetUnion};
use crate::value::{LatticeValue, PauseLevel, RateLimitPolicy, merge_maps};

/// A lattice supplied from outside this crate.
///
/// External lattices work over opaque JSON payloads. `validate` guards every
/// payload before it reaches `join`, so `join` may assume well-formed input.
pub trait ExternalLattice: Send + Sync {
    fn name(&self) -> &str;
    fn bottom(&self) -> Value;
    fn validate(&self, value: &Value) -> Result<(), String>;
    fn join(&self, a: &Value, b: &Value) -> Value;
}

/// A named lattice.
#[derive(Clone)]
pub enum Lattice {
    MaxInt,
    MinInt,
    BoolOr,
    BoolAnd,
    SetUnion,
    MapMerge,
    Pause,
    RateLimit,
    Fence,
    External(Arc<dyn ExternalLattice>),
}

impl Lattice {
    /// Every built-in lattice, in catalog order.
    pub fn builtins() -> Vec<Lattice> {
        vec![
            Self::MaxInt,
            Self::MinInt,
            Self::BoolOr,
            Self::BoolAnd,
            Self::SetUnion,
            Self::MapMerge,
            Self::Pause,
            Self::RateLimit,
            Self::Fence,
        ]
    }

    pub fn name(&self) -> &str {
        match self {
            Self::MaxInt => names::MAX_INT,
            Self::MinInt => names::MIN_INT,
            Self::BoolOr => names::BOOL_OR,
            Self::BoolAnd => names::BOOL_AND,
            Self::SetUnion => names::SET_UNION,
            Self::MapMerge => names::MAP_MERGE,
            Self::Pause => names::PAUSE,
            Self::RateLimit => names::RATE_LIMIT,
            Self::Fence => names::FENCE,
            Self::External(ext) => ext.name(),
        }
    }

    pub fn bottom(&self) -> LatticeValue {
        match self {
            Self::MaxInt => LatticeValue::Int(MaxInt::bottom().0),
            Self::MinInt => LatticeValue::Int(MinInt::bottom().0),
            Self::BoolOr => LatticeValue::Bool(BoolOr::bottom().0),
            Self::BoolAnd => LatticeValue::Bool(BoolAnd::bottom().0),
            Self::SetUnion => LatticeValue::Set(BTreeSet::new()),
            Self::MapMerge => LatticeValue::Map(BTreeMap::new()),
            Self::Pause => LatticeValue::Pause(PauseLevel::bottom()),
            Self::RateLimit => LatticeValue::RateLimit(RateLimitPolicy::bottom()),
            Self::Fence => LatticeValue::Fence(BTreeSet::new()),
            Self::External(ext) => LatticeValue::Opaque(ext.bottom()),
        }
    }

    /// Whether `value` has the shape this lattice works over.
    pub fn accepts(&self, value: &LatticeValue) -> bool {
        match (self, value) {
            (Self::MaxInt | Self::MinInt, LatticeValue::Int(_)) => true,
            (Self::BoolOr | Self::BoolAnd, LatticeValue::Bool(_)) => true,
            (Self::SetUnion, LatticeValue::Set(_)) => true,
            (Self::MapMerge, LatticeValue::Map(_)) => true,
            (Self::Pause, LatticeValue::Pause(_)) => true,
            (Self::RateLimit, LatticeValue::RateLimit(_)) => true,
            (Self::Fence, LatticeValue::Fence(_)) => true,
            (Self::External(ext), LatticeValue::Opaque(raw)) => ext.validate(raw).is_ok(),
            _ => false,
        }
    }

    fn mismatch(&self, value: &LatticeValue) -> LatticeError {
        LatticeError::KindMismatch {
            lattice: self.name().to_string(),
            actual: value.shape().to_string(),
        }
    }

    /// Least upper bound of `a` and `b`.
    pub fn join(&self, a: &LatticeValue, b: &LatticeValue) -> Result<LatticeValue, LatticeError> {
        use LatticeValue as V;

        let joined = match (self, a, b) {
            (Self::MaxInt, V::Int(x), V::Int(y)) => V::Int(MaxInt(*x).join(&MaxInt(*y)).0),
            (Self::MinInt, V::Int(x), V::Int(y)) => V::Int(MinInt(*x).join(&MinInt(*y)).0),
            (Self::BoolOr, V::Bool(x), V::Bool(y)) => V::Bool(BoolOr(*x).join(&BoolOr(*y)).0),
            (Self::BoolAnd, V::Bool(x), V::Bool(y)) => V::Bool(BoolAnd(*x).join(&BoolAnd(*y)).0),
            (Self::SetUnion, V::Set(x), V::Set(y)) => {
                V::Set(SetUnion(x.clone()).join(&SetUnion(y.clone())).0)
            }
            (Self::Fence, V::Fence(x), V::Fence(y)) => {
                V::Fence(FenceSet(x.clone()).join(&FenceSet(y.clone())).0)
            }
            (Self::MapMerge, V::Map(x), V::Map(y)) => V::Map(merge_maps(x, y)?),
            (Self::Pause, V::Pause(x), V::Pause(y)) => V::Pause(x.join(y)),
            (Self::RateLimit, V::RateLimit(x), V::RateLimit(y)) => V::RateLimit(x.join(y)),
            (Self::External(ext), V::Opaque(x), V::Opaque(y)) => {
                for raw in [x, y] {
                    ext.validate(raw).map_err(|reason| LatticeError::InvalidValue {
                        lattice: ext.name().to_string(),
                        reason,
                    })?;
                }
                V::Opaque(ext.join(x, y))
            }
            (_, left, right) => {
                let offender = if self.accepts(left) { right } else { left };
                return Err(self.mismatch(offender));
            }
        };
        Ok(joined)
    }

    /// `a ≤ b` in this lattice's order.
    pub fn leq(&self, a: &LatticeValue, b: &LatticeValue) -> Result<bool, LatticeError> {
        Ok(&self.join(a, b)? == b)
    }

    /// Convert a raw JSON value into a value of this lattice.
    ///
    /// Accepts the natural JSON form of each shape (numbers, booleans, string
    /// arrays, `{"rps":…, "burst":…}`, pause level names) as well as the
    /// tagged `{"type":…, "value":…}` form produced by serialization.
    pub fn parse_value(&self, raw: &Value) -> Result<LatticeValue, LatticeError> {
        if let Ok(tagged) = serde_json::from_value::<LatticeValue>(raw.clone())
            && self.accepts(&tagged)
        {
            return Ok(tagged);
        }

        let invalid = |reason: &str| LatticeError::InvalidValue {
            lattice: self.name().to_string(),
            reason: reason.to_string(),
        };

        match self {
            Self::MaxInt | Self::MinInt => raw
                .as_i64()
                .map(LatticeValue::Int)
                .ok_or_else(|| invalid("expected an integer")),
            Self::BoolOr | Self::BoolAnd => raw
                .as_bool()
                .map(LatticeValue::Bool)
                .ok_or_else(|| invalid("expected a boolean")),
            Self::SetUnion | Self::Fence => {
                let items = raw
                    .as_array()
                    .ok_or_else(|| invalid("expected an array of strings"))?;
                let mut set = BTreeSet::new();
                for item in items {
                    let s = item
                        .as_str()
                        .ok_or_else(|| invalid("expected an array of strings"))?;
                    set.insert(s.to_string());
                }
                Ok(if matches!(self, Self::Fence) {
                    LatticeValue::Fence(set)
                } else {
                    LatticeValue::Set(set)
                })
            }
            Self::MapMerge => {
                let obj = raw.as_object().ok_or_else(|| invalid("expected an object"))?;
                let mut map = BTreeMap::new();
                for (key, item) in obj {
                    map.insert(key.clone(), infer_value(item).map_err(|r| invalid(&r))?);
                }
                Ok(LatticeValue::Map(map))
            }
            Self::Pause => {
                let s = raw.as_str().ok_or_else(|| invalid("expected a pause level"))?;
                s.parse::<PauseLevel>()
                    .map(LatticeValue::Pause)
                    .map_err(|e| invalid(&e))
            }
            Self::RateLimit => {
                let rps = raw
                    .get("rps")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| invalid("missing numeric rps"))?;
                let burst = raw
                    .get("burst")
                    .and_then(Value::as_u64)
                    .and_then(|b| u32::try_from(b).ok())
                    .ok_or_else(|| invalid("missing integer burst"))?;
                RateLimitPolicy::new(rps, burst).map(LatticeValue::RateLimit)
            }
            Self::External(ext) => {
                ext.validate(raw).map_err(|reason| invalid(&reason))?;
                Ok(LatticeValue::Opaque(raw.clone()))
            }
        }
    }
}

/// Best-effort shape inference for map entries.
fn infer_value(raw: &Value) -> Result<LatticeValue, String> {
    match raw {
        Value::Bool(b) => Ok(LatticeValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(LatticeValue::Int)
            .ok_or_else(|| format!("non-integer number {n}")),
        Value::Array(items) => {
            let mut set = BTreeSet::new();
            for item in items {
                let s = item.as_str().ok_or("set entries must be strings")?;
                set.insert(s.to_string());
            }
            Ok(LatticeValue::Set(set))
        }
        Value::Object(obj) => {
            let mut map = BTreeMap::new();
            for (key, item) in obj {
                map.insert(key.clone(), infer_value(item)?);
            }
            Ok(LatticeValue::Map(map))
        }
        Value::String(_) | Value::Null => Ok(LatticeValue::Opaque(raw.clone())),
    }
}

impl fmt::Debug for Lattice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External(ext) => write!(f, "External({})", ext.name()),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct LongestString;

    impl ExternalLattice for LongestString {
        fn name(&self) -> &str {
            "longestString"
        }

        fn bottom(&self) -> Value {
            json!("")
        }

        fn validate(&self, value: &Value) -> Result<(), String> {
            value
                .as_str()
                .map(|_| ())
                .ok_or_else(|| "expected a string".to_string())
        }

        fn join(&self, a: &Value, b: &Value) -> Value {
            let (a, b) = (a.as_str().unwrap_or(""), b.as_str().unwrap_or(""));
            let pick = match a.len().cmp(&b.len()) {
                std::cmp::Ordering::Less => b,
                std::cmp::Ordering::Greater => a,
                std::cmp::Ordering::Equal => a.max(b),
            };
            json!(pick)
        }
    }

    #[test]
    fn join_rejects_foreign_shapes() {
        let err = Lattice::MaxInt
            .join(&LatticeValue::Int(1), &LatticeValue::Bool(true))
            .unwrap_err();
        assert_eq!(
            err,
            LatticeError::KindMismatch {
                lattice: "maxInt".into(),
                actual: "bool".into()
            }
        );
    }

    #[test]
    fn bottom_is_identity_for_builtins() {
        let a = LatticeValue::Int(12);
        assert_eq!(
            Lattice::MaxInt.join(&Lattice::MaxInt.bottom(), &a).unwrap(),
            a
        );
        assert_eq!(
            Lattice::MinInt.join(&Lattice::MinInt.bottom(), &a).unwrap(),
            a
        );
    }

    #[test]
    fn parse_natural_json_forms() {
        assert_eq!(
            Lattice::MaxInt.parse_value(&json!(5)).unwrap(),
            LatticeValue::Int(5)
        );
        assert_eq!(
            Lattice::Pause.parse_value(&json!("soft")).unwrap(),
            LatticeValue::Pause(PauseLevel::Soft)
        );
        assert_eq!(
            Lattice::RateLimit
                .parse_value(&json!({"rps": 10, "burst": 4}))
                .unwrap(),
            LatticeValue::RateLimit(RateLimitPolicy::new(10.0, 4).unwrap())
        );
        assert_eq!(
            Lattice::Fence.parse_value(&json!(["f1"])).unwrap(),
            LatticeValue::fence(["f1"])
        );
        assert!(Lattice::BoolOr.parse_value(&json!(3)).is_err());
    }

    #[test]
    fn parse_accepts_tagged_form() {
        let tagged = json!({"type": "int", "value": 4});
        assert_eq!(
            Lattice::MinInt.parse_value(&tagged).unwrap(),
            LatticeValue::Int(4)
        );
    }

    #[test]
    fn invalid_rate_limits_are_rejected_in_every_form() {
        for raw in [
            json!({"rps": -1, "burst": 0}),
            json!({"type": "rateLimit", "value": {"rps": -1, "burst": 0}}),
            json!({"type": "rateLimit", "value": {"rps": 5, "burst": 0}}),
            json!({"type": "rateLimit", "value": {"rps": 0, "burst": 3}}),
        ] {
            assert!(
                Lattice::RateLimit.parse_value(&raw).is_err(),
                "{raw} should be rejected"
            );
        }
        assert!(serde_json::from_value::<RateLimitPolicy>(json!({"rps": -1, "burst": 1})).is_err());
        assert_eq!(
            Lattice::RateLimit
                .parse_value(&json!({"type": "rateLimit", "value": {"rps": 2.5, "burst": 3}}))
                .unwrap(),
            LatticeValue::RateLimit(RateLimitPolicy::new(2.5, 3).unwrap())
        );
    }

    #[test]
    fn external_lattice_validates_payloads() {
        let lattice = Lattice::External(Arc::new(LongestString));
        let joined = lattice
            .join(
                &LatticeValue::Opaque(json!("ab")),
                &LatticeValue::Opaque(json!("abc")),
            )
            .unwrap();
        assert_eq!(joined, LatticeValue::Opaque(json!("abc")));

        let err = lattice
            .join(
                &LatticeValue::Opaque(json!(1)),
                &LatticeValue::Opaque(json!("x")),
            )
            .unwrap_err();
        assert!(matches!(err, LatticeError::InvalidValue { .. }));
    }
}
