//! Aspect registry and typed aspect configurations.
//!
//! Each built-in aspect parses its params into its own configuration struct.
//! Aspects supplied from outside register an [`ExternalAspect`] validator and
//! keep their params as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use boardwire_lattice::{Lattice, LatticeValue, RateLimitPolicy};

use crate::id::AspectId;
use crate::ir::{AspectInstance, JoinPoint};

pub mod builtin {
    pub const TAP: &str = "tap@1";
    pub const RATE_LIMIT: &str = "rateLimit@1";
    pub const CREDIT_GATE: &str = "creditGate@1";
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AspectError {
    #[error("aspect {0} is not registered")]
    NotRegistered(AspectId),
    #[error("aspect {0} is already registered")]
    Duplicate(AspectId),
    #[error("invalid params for aspect {aspect}: {reason}")]
    InvalidParams { aspect: AspectId, reason: String },
}

/// What to do with an item that arrives when no token or credit is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitMode {
    #[default]
    Queue,
    Drop,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueOrder {
    #[default]
    Fifo,
    Lifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TapSinkKind {
    #[default]
    Log,
    Buffer,
    Callback,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TapConfig {
    #[serde(default)]
    pub sink: TapSinkKind,
    /// Ring buffer size for the `buffer` sink; engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_taps: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Name of a predicate registered with the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
    /// Name of a callback registered with the engine (`callback` sink).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateLimitConfig {
    pub rps: f64,
    pub burst: u32,
    #[serde(default)]
    pub on_limit: LimitMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub queue_order: QueueOrder,
}

impl RateLimitConfig {
    pub fn policy(&self) -> Result<RateLimitPolicy, String> {
        RateLimitPolicy::new(self.rps, self.burst).map_err(|e| e.to_string())
    }

    /// Compose two rate limits on the same wire.
    ///
    /// `rps` and `burst` join in the `rateLimit` lattice. The overflow
    /// handling keeps the stricter mode and the smaller queue.
    pub fn compose(&self, other: &Self) -> Result<Self, String> {
        let joined = Lattice::RateLimit
            .join(
                &LatticeValue::RateLimit(self.policy()?),
                &LatticeValue::RateLimit(other.policy()?),
            )
            .map_err(|e| e.to_string())?;
        let LatticeValue::RateLimit(policy) = joined else {
            return Err("rateLimit join produced a foreign shape".to_string());
        };
        let queue_capacity = match (self.queue_capacity, other.queue_capacity) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let queue_order = if self.queue_order == other.queue_order {
            self.queue_order
        } else {
            QueueOrder::Fifo
        };
        Ok(Self {
            rps: policy.rps,
            burst: policy.burst,
            on_limit: self.on_limit.max(other.on_limit),
            queue_capacity,
            queue_order,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreditGateConfig {
    #[serde(default)]
    pub initial_credits: u64,
    pub max_credits: u64,
    #[serde(default = "default_credits_per_item")]
    pub credits_per_item: u64,
    #[serde(default)]
    pub on_no_credits: LimitMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
}

fn default_credits_per_item() -> u64 {
    1
}

impl CreditGateConfig {
    /// Reject configurations under which the gate could never admit an item.
    pub fn validate(&self) -> Result<(), String> {
        if self.credits_per_item == 0 {
            return Err("creditsPerItem must be at least 1".to_string());
        }
        if self.credits_per_item > self.max_credits {
            return Err(format!(
                "creditsPerItem {} exceeds maxCredits {}",
                self.credits_per_item, self.max_credits
            ));
        }
        if self.initial_credits > self.max_credits {
            return Err("initialCredits exceeds maxCredits".to_string());
        }
        Ok(())
    }
}

/// Validated configuration of one aspect instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AspectConfig {
    Tap(TapConfig),
    RateLimit(RateLimitConfig),
    CreditGate(CreditGateConfig),
    External { name: String, params: Value },
}

impl AspectConfig {
    pub fn shim_kind(&self) -> &str {
        match self {
            Self::Tap(_) => "tap",
            Self::RateLimit(_) => "rateLimit",
            Self::CreditGate(_) => "creditGate",
            Self::External { name, .. } => name,
        }
    }
}

/// Validator contract for aspects registered from outside this crate.
pub trait ExternalAspect: Send + Sync {
    fn validate(&self, params: &Value) -> Result<(), String>;
}

#[derive(Clone)]
enum AspectKind {
    Tap,
    RateLimit,
    CreditGate,
    External(Arc<dyn ExternalAspect>),
}

impl fmt::Debug for AspectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tap => f.write_str("Tap"),
            Self::RateLimit => f.write_str("RateLimit"),
            Self::CreditGate => f.write_str("CreditGate"),
            Self::External(_) => f.write_str("External"),
        }
    }
}

/// Registration record for one aspect id.
#[derive(Debug, Clone)]
pub struct AspectManifest {
    pub id: AspectId,
    /// Gadget kind of the shim this aspect lowers into.
    pub shim: String,
    pub default_at: JoinPoint,
    /// Lower keys sit closer to the wire's source.
    pub order_key: i64,
    kind: AspectKind,
}

impl AspectManifest {
    pub fn external(
        id: AspectId,
        shim: impl Into<String>,
        default_at: JoinPoint,
        order_key: i64,
        validator: Arc<dyn ExternalAspect>,
    ) -> Self {
        Self {
            id,
            shim: shim.into(),
            default_at,
            order_key,
            kind: AspectKind::External(validator),
        }
    }

    fn builtin(
        id: &'static str,
        shim: &str,
        default_at: JoinPoint,
        order_key: i64,
        kind: AspectKind,
    ) -> Self {
        Self {
            id: AspectId::from_static(id),
            shim: shim.to_string(),
            default_at,
            order_key,
            kind,
        }
    }

    /// Validate `params` into a typed configuration.
    pub fn parse(&self, params: &Value) -> Result<AspectConfig, AspectError> {
        let invalid = |reason: String| AspectError::InvalidParams {
            aspect: self.id.clone(),
            reason,
        };
        let params = if params.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            params.clone()
        };

        match &self.kind {
            AspectKind::Tap => serde_json::from_value(params)
                .map(AspectConfig::Tap)
                .map_err(|e| invalid(e.to_string())),
            AspectKind::RateLimit => {
                let config: RateLimitConfig =
                    serde_json::from_value(params).map_err(|e| invalid(e.to_string()))?;
                config.policy().map_err(invalid)?;
                Ok(AspectConfig::RateLimit(config))
            }
            AspectKind::CreditGate => {
                let config: CreditGateConfig =
                    serde_json::from_value(params).map_err(|e| invalid(e.to_string()))?;
                config.validate().map_err(invalid)?;
                Ok(AspectConfig::CreditGate(config))
            }
            AspectKind::External(validator) => {
                validator.validate(&params).map_err(invalid)?;
                Ok(AspectConfig::External {
                    name: self.shim.clone(),
                    params,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AspectRegistry {
    manifests: BTreeMap<AspectId, AspectManifest>,
}

impl AspectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `tap@1`, `rateLimit@1` and `creditGate@1`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for manifest in [
            AspectManifest::builtin(builtin::TAP, "tap", JoinPoint::TapOut, 100, AspectKind::Tap),
            AspectManifest::builtin(
                builtin::RATE_LIMIT,
                "rateLimit",
                JoinPoint::Before,
                50,
                AspectKind::RateLimit,
            ),
            AspectManifest::builtin(
                builtin::CREDIT_GATE,
                "creditGate",
                JoinPoint::Before,
                60,
                AspectKind::CreditGate,
            ),
        ] {
            registry.manifests.insert(manifest.id.clone(), manifest);
        }
        registry
    }

    pub fn register(&mut self, manifest: AspectManifest) -> Result<(), AspectError> {
        if self.manifests.contains_key(&manifest.id) {
            return Err(AspectError::Duplicate(manifest.id));
        }
        self.manifests.insert(manifest.id.clone(), manifest);
        Ok(())
    }

    pub fn get(&self, id: &AspectId) -> Result<&AspectManifest, AspectError> {
        self.manifests
            .get(id)
            .ok_or_else(|| AspectError::NotRegistered(id.clone()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &AspectId> {
        self.manifests.keys()
    }

    /// Parse an instance's params through its manifest.
    pub fn parse(&self, instance: &AspectInstance) -> Result<AspectConfig, AspectError> {
        self.get(&instance.id)?.parse(&instance.params)
    }
}
