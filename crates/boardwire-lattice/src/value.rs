//! Values carried by contacts.
//!
//! `LatticeValue` is a closed union: every built-in lattice works over one of
//! its shapes, and externally registered lattices work over `Opaque` JSON
//! payloads they validate themselves.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::LatticeError;

/// Flow-control pause level, ordered `running < soft < gated < isolated`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum PauseLevel {
    #[default]
    Running,
    Soft,
    Gated,
    Isolated,
}

impl PauseLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Soft => "soft",
            Self::Gated => "gated",
            Self::Isolated => "isolated",
        }
    }
}

impl std::str::FromStr for PauseLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "soft" => Ok(Self::Soft),
            "gated" => Ok(Self::Gated),
            "isolated" => Ok(Self::Isolated),
            _ => Err(format!("unknown pause level: {s}")),
        }
    }
}

/// Token-bucket policy: refill rate in items per second and bucket size.
///
/// Joining two policies keeps the more restrictive value of each component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawRateLimitPolicy")]
pub struct RateLimitPolicy {
    pub rps: f64,
    pub burst: u32,
}

/// Wire form of [`RateLimitPolicy`]; deserialization goes through
/// [`RateLimitPolicy::new`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRateLimitPolicy {
    rps: f64,
    burst: u32,
}

impl TryFrom<RawRateLimitPolicy> for RateLimitPolicy {
    type Error = LatticeError;

    fn try_from(raw: RawRateLimitPolicy) -> Result<Self, Self::Error> {
        Self::new(raw.rps, raw.burst)
    }
}

impl RateLimitPolicy {
    /// The unconstrained policy; identity of the join.
    pub const UNLIMITED: Self = Self {
        rps: f64::MAX,
        burst: u32::MAX,
    };

    /// Build a policy, rejecting non-finite or non-positive rates and an
    /// empty bucket.
    pub fn new(rps: f64, burst: u32) -> Result<Self, LatticeError> {
        if !rps.is_finite() || rps <= 0.0 {
            return Err(LatticeError::InvalidValue {
                lattice: crate::names::RATE_LIMIT.to_string(),
                reason: format!("rps must be finite and positive, got {rps}"),
            });
        }
        if burst == 0 {
            return Err(LatticeError::InvalidValue {
                lattice: crate::names::RATE_LIMIT.to_string(),
                reason: "burst must be at least 1".to_string(),
            });
        }
        Ok(Self { rps, burst })
    }
}

/// A value held by a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum LatticeValue {
    Int(i64),
    Bool(bool),
    Set(BTreeSet<String>),
    Map(BTreeMap<String, LatticeValue>),
    Pause(PauseLevel),
    RateLimit(RateLimitPolicy),
    Fence(BTreeSet<String>),
    Opaque(serde_json::Value),
}

impl LatticeValue {
    /// Short shape name used in error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Pause(_) => "pause",
            Self::RateLimit(_) => "rateLimit",
            Self::Fence(_) => "fence",
            Self::Opaque(_) => "opaque",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn fence<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fence(items.into_iter().map(Into::into).collect())
    }

    /// The join each shape carries on its own, used where no lattice name is
    /// available (values nested inside a `mapMerge` map).
    ///
    /// Integers take the max, booleans the or, sets and fences the union,
    /// pauses the higher level, rate limits the componentwise min. Opaque
    /// payloads only join with an equal payload.
    pub fn natural_join(&self, other: &Self) -> Result<Self, LatticeError> {
        use crate::semilattice::JoinSemilattice;

        let joined = match (self, other) {
            (Self::Int(a), Self::Int(b)) => Self::Int(*a.max(b)),
            (Self::Bool(a), Self::Bool(b)) => Self::Bool(*a || *b),
            (Self::Set(a), Self::Set(b)) => Self::Set(a.union(b).cloned().collect()),
            (Self::Fence(a), Self::Fence(b)) => Self::Fence(a.union(b).cloned().collect()),
            (Self::Pause(a), Self::Pause(b)) => Self::Pause(a.join(b)),
            (Self::RateLimit(a), Self::RateLimit(b)) => Self::RateLimit(a.join(b)),
            (Self::Map(a), Self::Map(b)) => Self::Map(merge_maps(a, b)?),
            (Self::Opaque(a), Self::Opaque(b)) if a == b => Self::Opaque(a.clone()),
            _ => {
                return Err(LatticeError::KindMismatch {
                    lattice: format!("natural({})", self.shape()),
                    actual: other.shape().to_string(),
                });
            }
        };
        Ok(joined)
    }
}

/// Key-wise merge; shared keys are joined with the natural join of their
/// values.
pub(crate) fn merge_maps(
    a: &BTreeMap<String, LatticeValue>,
    b: &BTreeMap<String, LatticeValue>,
) -> Result<BTreeMap<String, LatticeValue>, LatticeError> {
    let mut out = a.clone();
    for (key, right) in b {
        let merged = match out.get(key) {
            Some(left) => left.natural_join(right)?,
            None => right.clone(),
        };
        out.insert(key.clone(), merged);
    }
    Ok(out)
}

impl fmt::Display for LatticeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Pause(level) => f.write_str(level.as_str()),
            Self::RateLimit(p) => write!(f, "{{rps:{}, burst:{}}}", p.rps, p.burst),
            Self::Set(items) | Self::Fence(items) => {
                let joined: Vec<&str> = items.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", joined.join(","))
            }
            Self::Map(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{k}:{v}")).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
            Self::Opaque(raw) => write!(f, "{raw}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_levels_are_ordered() {
        assert!(PauseLevel::Running < PauseLevel::Soft);
        assert!(PauseLevel::Soft < PauseLevel::Gated);
        assert!(PauseLevel::Gated < PauseLevel::Isolated);
        assert_eq!("gated".parse::<PauseLevel>().unwrap(), PauseLevel::Gated);
        assert!("paused".parse::<PauseLevel>().is_err());
    }

    #[test]
    fn rate_limit_policy_rejects_bad_parameters() {
        assert!(RateLimitPolicy::new(0.0, 5).is_err());
        assert!(RateLimitPolicy::new(f64::NAN, 5).is_err());
        assert!(RateLimitPolicy::new(10.0, 0).is_err());
        assert!(RateLimitPolicy::new(10.0, 5).is_ok());
    }

    #[test]
    fn natural_join_merges_nested_maps() {
        let mut left = BTreeMap::new();
        left.insert("hits".to_string(), LatticeValue::Int(3));
        left.insert("tags".to_string(), LatticeValue::set(["a"]));
        let mut right = BTreeMap::new();
        right.insert("hits".to_string(), LatticeValue::Int(7));
        right.insert("tags".to_string(), LatticeValue::set(["b"]));
        right.insert("open".to_string(), LatticeValue::Bool(true));

        let joined = LatticeValue::Map(left)
            .natural_join(&LatticeValue::Map(right))
            .unwrap();
        let LatticeValue::Map(map) = joined else {
            panic!("expected map");
        };
        assert_eq!(map["hits"], LatticeValue::Int(7));
        assert_eq!(map["tags"], LatticeValue::set(["a", "b"]));
        assert_eq!(map["open"], LatticeValue::Bool(true));
    }

    #[test]
    fn natural_join_rejects_mixed_shapes() {
        let err = LatticeValue::Int(1)
            .natural_join(&LatticeValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, LatticeError::KindMismatch { .. }));
    }

    #[test]
    fn values_serialize_with_type_tag() {
        let json = serde_json::to_value(LatticeValue::Int(9)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "int", "value": 9}));
        let back: LatticeValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, LatticeValue::Int(9));
    }
}
