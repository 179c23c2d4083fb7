//! Gadgets: the computations the engine fires, and the library that builds
//! them from realized nodes.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use boardwire_kernel::{AspectConfig, PinId, RealizedNode};
use boardwire_lattice::LatticeValue;

use crate::error::EngineError;
use crate::shim::{self, Shim, TapHooks};

pub type PinValues = BTreeMap<PinId, LatticeValue>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct GadgetError(pub String);

/// What one firing amounted to, reported through the event sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GadgetEffect {
    /// The firing raises `pin` to `value`.
    Changed { pin: PinId, value: LatticeValue },
    /// The firing raises no output.
    Noop,
    /// Reported by the gadget itself.
    Custom { name: String, payload: Value },
}

pub trait Gadget: Send {
    /// Compute outputs from the current value of every input pin. Outputs
    /// not returned are left as they are.
    fn compute(&mut self, inputs: &PinValues) -> Result<PinValues, GadgetError>;

    /// Custom effects recorded by the last `compute`. The engine takes them
    /// after every firing, failed ones included.
    fn take_effects(&mut self) -> Vec<GadgetEffect> {
        Vec::new()
    }
}

pub type GadgetFactory =
    Arc<dyn Fn(&RealizedNode) -> Result<Box<dyn Gadget>, GadgetError> + Send + Sync>;

pub type ShimFactory =
    Arc<dyn Fn(&RealizedNode, &AspectConfig) -> Result<Box<dyn Shim>, GadgetError> + Send + Sync>;

pub mod kinds {
    pub const CELL: &str = "cell";
    pub const ADD: &str = "add";
    pub const MULTIPLY: &str = "multiply";
    pub const MAX: &str = "max";
    pub const MIN: &str = "min";
    pub const IDENTITY: &str = "identity";
}

/// Built-in integer gadgets. Every output pin receives the same result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// Holds whatever is pushed into it; never computes.
    Cell,
    Add,
    Multiply,
    Max,
    Min,
    /// Forwards its first input.
    Identity,
}

impl Primitive {
    pub fn from_kind(kind: &str) -> Option<Self> {
        Some(match kind {
            kinds::CELL => Self::Cell,
            kinds::ADD => Self::Add,
            kinds::MULTIPLY => Self::Multiply,
            kinds::MAX => Self::Max,
            kinds::MIN => Self::Min,
            kinds::IDENTITY => Self::Identity,
            _ => return None,
        })
    }

    fn fold(self, values: &[i64]) -> Result<Option<i64>, GadgetError> {
        let overflow = || GadgetError(format!("{self:?} overflowed"));
        let mut iter = values.iter().copied();
        let Some(first) = iter.next() else {
            return Ok(None);
        };
        let mut acc = first;
        for v in iter {
            acc = match self {
                Self::Add => acc.checked_add(v).ok_or_else(overflow)?,
                Self::Multiply => acc.checked_mul(v).ok_or_else(overflow)?,
                Self::Max => acc.max(v),
                Self::Min => acc.min(v),
                Self::Cell | Self::Identity => acc,
            };
        }
        Ok(Some(acc))
    }
}

struct PrimitiveGadget {
    primitive: Primitive,
    outputs: Vec<PinId>,
}

impl Gadget for PrimitiveGadget {
    fn compute(&mut self, inputs: &PinValues) -> Result<PinValues, GadgetError> {
        if self.primitive == Primitive::Cell {
            return Ok(PinValues::new());
        }
        let result = if self.primitive == Primitive::Identity {
            inputs.values().next().cloned()
        } else {
            let ints = inputs
                .iter()
                .map(|(pin, value)| {
                    value
                        .as_int()
                        .ok_or_else(|| GadgetError(format!("pin {pin} holds a non-integer {value}")))
                })
                .collect::<Result<Vec<i64>, _>>()?;
            self.primitive.fold(&ints)?.map(LatticeValue::Int)
        };
        Ok(match result {
            Some(value) => self
                .outputs
                .iter()
                .map(|pin| (pin.clone(), value.clone()))
                .collect(),
            None => PinValues::new(),
        })
    }
}

/// Factories for gadget kinds and for shims of external aspects.
#[derive(Clone, Default)]
pub struct GadgetLibrary {
    gadgets: BTreeMap<String, GadgetFactory>,
    shims: BTreeMap<String, ShimFactory>,
    tap_hooks: TapHooks,
}

impl GadgetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// A library with the integer primitives registered.
    pub fn with_primitives() -> Self {
        let mut library = Self::new();
        for kind in [
            kinds::CELL,
            kinds::ADD,
            kinds::MULTIPLY,
            kinds::MAX,
            kinds::MIN,
            kinds::IDENTITY,
        ] {
            let factory: GadgetFactory = Arc::new(
                |node: &RealizedNode| -> Result<Box<dyn Gadget>, GadgetError> {
                    let primitive = Primitive::from_kind(&node.kind)
                        .ok_or_else(|| GadgetError(format!("unknown primitive {}", node.kind)))?;
                    Ok(Box::new(PrimitiveGadget {
                        primitive,
                        outputs: node.outputs.iter().map(|p| p.pin.clone()).collect(),
                    }))
                },
            );
            library.gadgets.insert(kind.to_string(), factory);
        }
        library
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: GadgetFactory,
    ) -> Result<(), EngineError> {
        let kind = kind.into();
        if self.gadgets.contains_key(&kind) {
            return Err(EngineError::DuplicateKind(kind));
        }
        self.gadgets.insert(kind, factory);
        Ok(())
    }

    /// Register the shim used for an external aspect kind.
    pub fn register_shim(
        &mut self,
        kind: impl Into<String>,
        factory: ShimFactory,
    ) -> Result<(), EngineError> {
        let kind = kind.into();
        if self.shims.contains_key(&kind) {
            return Err(EngineError::DuplicateKind(kind));
        }
        self.shims.insert(kind, factory);
        Ok(())
    }

    pub fn with_tap_hooks(mut self, hooks: TapHooks) -> Self {
        self.tap_hooks = hooks;
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.gadgets.keys().map(String::as_str)
    }

    pub fn build_gadget(&self, node: &RealizedNode) -> Result<Box<dyn Gadget>, EngineError> {
        let factory = self
            .gadgets
            .get(&node.kind)
            .ok_or_else(|| EngineError::UnknownGadgetKind(node.kind.clone()))?;
        factory(node).map_err(|e| EngineError::Realize(format!("gadget {}: {e}", node.id)))
    }

    pub fn build_shim(
        &self,
        node: &RealizedNode,
        config: &AspectConfig,
        tap_buffer_capacity: usize,
        default_queue_capacity: usize,
    ) -> Result<Box<dyn Shim>, EngineError> {
        if let AspectConfig::External { name, .. } = config {
            let factory = self
                .shims
                .get(name)
                .ok_or_else(|| EngineError::UnknownGadgetKind(name.clone()))?;
            return factory(node, config)
                .map_err(|e| EngineError::Realize(format!("shim {}: {e}", node.id)));
        }
        Ok(shim::build(
            config,
            tap_buffer_capacity,
            default_queue_capacity,
            &self.tap_hooks,
        )?)
    }
}

impl std::fmt::Debug for GadgetLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GadgetLibrary")
            .field("gadgets", &self.gadgets.keys().collect::<Vec<_>>())
            .field("shims", &self.shims.keys().collect::<Vec<_>>())
            .field("tap_hooks", &self.tap_hooks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pins(values: &[(&str, LatticeValue)]) -> PinValues {
        values
            .iter()
            .map(|(pin, v)| (PinId::new(*pin).unwrap(), v.clone()))
            .collect()
    }

    fn gadget(primitive: Primitive) -> PrimitiveGadget {
        PrimitiveGadget {
            primitive,
            outputs: vec![PinId::new("out").unwrap()],
        }
    }

    #[test]
    fn arithmetic_primitives() {
        let inputs = pins(&[("x", LatticeValue::Int(3)), ("y", LatticeValue::Int(4))]);
        let out = PinId::new("out").unwrap();
        for (primitive, expected) in [
            (Primitive::Add, 7),
            (Primitive::Multiply, 12),
            (Primitive::Max, 4),
            (Primitive::Min, 3),
            (Primitive::Identity, 3),
        ] {
            let result = gadget(primitive).compute(&inputs).unwrap();
            assert_eq!(result.get(&out), Some(&LatticeValue::Int(expected)), "{primitive:?}");
        }
        assert!(gadget(Primitive::Cell).compute(&inputs).unwrap().is_empty());
    }

    #[test]
    fn non_integer_and_overflow_fail() {
        let bad = pins(&[("x", LatticeValue::Bool(true))]);
        assert!(gadget(Primitive::Add).compute(&bad).is_err());
        let big = pins(&[("x", LatticeValue::Int(i64::MAX)), ("y", LatticeValue::Int(2))]);
        assert!(gadget(Primitive::Multiply).compute(&big).is_err());
    }

    #[test]
    fn duplicate_kinds_are_rejected() {
        let mut library = GadgetLibrary::with_primitives();
        let factory: GadgetFactory =
            Arc::new(|_: &RealizedNode| -> Result<Box<dyn Gadget>, GadgetError> {
                Err(GadgetError("no".into()))
            });
        assert_eq!(
            library.register(kinds::ADD, factory.clone()),
            Err(EngineError::DuplicateKind("add".into()))
        );
        library.register("noop", factory).unwrap();
        assert!(library.kinds().any(|k| k == "noop"));
    }
}
