//! Board IR: the desired state of one board.
//!
//! The IR is data only. It is created empty, changed exclusively by the
//! binder, and never deleted; each accepted plan supersedes the previous
//! revision. Every map is a `BTreeMap` so iteration (and therefore
//! lowering) is deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::id::{AspectId, BoardId, GadgetId, PinId, PinoutId, PrincipalId, SlotId, WireId};
use crate::policy::Policy;

pub const BOARD_IR_KIND: &str = "boardwire.board_ir.v1";
pub const BOARD_IR_SCHEMA: u32 = 1;

/// How a slot endpoint fans out when the slot has several occupants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplicaPolicy {
    /// Only the first occupant (mount order) is wired.
    #[default]
    First,
    /// Every occupant is wired.
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDecl {
    pub pinout: PinoutId,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,
    #[serde(default)]
    pub replica: ReplicaPolicy,
}

fn default_capacity() -> u32 {
    1
}

impl SlotDecl {
    pub fn new(pinout: PinoutId) -> Self {
        Self {
            pinout,
            capacity: default_capacity(),
            traits: Vec::new(),
            replica: ReplicaPolicy::default(),
        }
    }
}

/// One pin of a gadget and the lattice its contact lives in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinDecl {
    pub pin: PinId,
    pub lattice: String,
}

impl PinDecl {
    pub fn new(pin: PinId, lattice: impl Into<String>) -> Self {
        Self {
            pin,
            lattice: lattice.into(),
        }
    }
}

/// What a gadget is: its computation kind, the pinouts it implements, and
/// its boundary pins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GadgetSpec {
    pub kind: String,
    #[serde(default)]
    pub pinouts: BTreeSet<PinoutId>,
    #[serde(default)]
    pub inputs: Vec<PinDecl>,
    #[serde(default)]
    pub outputs: Vec<PinDecl>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl GadgetSpec {
    pub fn pin(&self, pin: &PinId) -> Option<&PinDecl> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|decl| &decl.pin == pin)
    }

    pub fn has_output(&self, pin: &PinId) -> bool {
        self.outputs.iter().any(|decl| &decl.pin == pin)
    }

    pub fn has_input(&self, pin: &PinId) -> bool {
        self.inputs.iter().any(|decl| &decl.pin == pin)
    }
}

/// A gadget occupying a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRecord {
    pub slot: SlotId,
    pub spec: GadgetSpec,
    pub mounted_at: DateTime<Utc>,
}

/// One side of a wire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Slot { slot: SlotId, pin: PinId },
    Gadget { gadget: GadgetId, pin: PinId },
}

impl Endpoint {
    pub fn slot(slot: SlotId, pin: PinId) -> Self {
        Self::Slot { slot, pin }
    }

    pub fn gadget(gadget: GadgetId, pin: PinId) -> Self {
        Self::Gadget { gadget, pin }
    }

    pub fn pin(&self) -> &PinId {
        match self {
            Self::Slot { pin, .. } | Self::Gadget { pin, .. } => pin,
        }
    }

    pub fn slot_id(&self) -> Option<&SlotId> {
        match self {
            Self::Slot { slot, .. } => Some(slot),
            Self::Gadget { .. } => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot { slot, pin } => write!(f, "slot {slot} pin {pin}"),
            Self::Gadget { gadget, pin } => write!(f, "gadget {gadget} pin {pin}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSpec {
    pub from: Endpoint,
    pub to: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Value>,
}

impl WireSpec {
    pub fn new(from: Endpoint, to: Endpoint) -> Self {
        Self {
            from,
            to,
            label: None,
            policy: None,
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Where an aspect attaches relative to the wire it decorates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinPoint {
    Before,
    After,
    Around,
    TapIn,
    TapOut,
}

impl JoinPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Around => "around",
            Self::TapIn => "tapIn",
            Self::TapOut => "tapOut",
        }
    }
}

/// An aspect declared on a wire (or installed on a scope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectInstance {
    pub id: AspectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<JoinPoint>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl AspectInstance {
    pub fn new(id: AspectId, params: Value) -> Self {
        Self {
            id,
            at: None,
            params,
        }
    }

    pub fn at(mut self, at: JoinPoint) -> Self {
        self.at = Some(at);
        self
    }
}

/// The scope an aspect was installed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "camelCase")]
pub enum AspectScope {
    /// Every wire with an endpoint on this pin.
    Pin { target: Endpoint },
    /// Every wire touching this slot.
    Slot { slot: SlotId },
    /// Every wire on the board.
    Board,
    /// The binder itself; never lowered into a shim.
    Binder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedAspect {
    #[serde(flatten)]
    pub scope: AspectScope,
    pub aspect: AspectInstance,
}

impl ScopedAspect {
    /// Whether this scoped install decorates `wire`.
    pub fn applies_to(&self, wire: &WireSpec, ir: &BoardIr) -> bool {
        let touches = |endpoint: &Endpoint, target: &Endpoint| -> bool {
            if endpoint == target {
                return true;
            }
            // A gadget-pin scope also covers slot endpoints currently
            // resolved to that gadget, and vice versa.
            match (endpoint, target) {
                (Endpoint::Slot { slot, pin }, Endpoint::Gadget { gadget, pin: tpin }) => {
                    pin == tpin && ir.slot_of(gadget) == Some(slot)
                }
                (Endpoint::Gadget { gadget, pin }, Endpoint::Slot { slot, pin: tpin }) => {
                    pin == tpin && ir.slot_of(gadget) == Some(slot)
                }
                _ => false,
            }
        };

        match &self.scope {
            AspectScope::Pin { target } => touches(&wire.from, target) || touches(&wire.to, target),
            AspectScope::Slot { slot } => {
                let on_slot = |endpoint: &Endpoint| match endpoint {
                    Endpoint::Slot { slot: s, .. } => s == slot,
                    Endpoint::Gadget { gadget, .. } => ir.slot_of(gadget) == Some(slot),
                };
                on_slot(&wire.from) || on_slot(&wire.to)
            }
            AspectScope::Board => true,
            AspectScope::Binder => false,
        }
    }
}

/// Audit record for one accepted (or rejected) mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub by: PrincipalId,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardIr {
    pub schema: u32,
    pub kind: String,
    pub board: BoardId,
    pub revision: u64,
    #[serde(default)]
    pub slots: BTreeMap<SlotId, SlotDecl>,
    #[serde(default)]
    pub wires: BTreeMap<WireId, WireSpec>,
    #[serde(default)]
    pub aspects: BTreeMap<WireId, Vec<AspectInstance>>,
    #[serde(default)]
    pub occupants: BTreeMap<SlotId, Vec<GadgetId>>,
    #[serde(default)]
    pub gadgets: BTreeMap<GadgetId, MountRecord>,
    #[serde(default)]
    pub scoped_aspects: Vec<ScopedAspect>,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub provenance: Vec<Provenance>,
}

impl BoardIr {
    pub fn empty(board: BoardId) -> Self {
        Self {
            schema: BOARD_IR_SCHEMA,
            kind: BOARD_IR_KIND.to_string(),
            board,
            revision: 0,
            slots: BTreeMap::new(),
            wires: BTreeMap::new(),
            aspects: BTreeMap::new(),
            occupants: BTreeMap::new(),
            gadgets: BTreeMap::new(),
            scoped_aspects: Vec::new(),
            policy: Policy::default(),
            provenance: Vec::new(),
        }
    }

    /// The slot a gadget is mounted in, if any.
    pub fn slot_of(&self, gadget: &GadgetId) -> Option<&SlotId> {
        self.gadgets.get(gadget).map(|record| &record.slot)
    }

    /// Occupants of `slot` in mount order.
    pub fn occupants_of(&self, slot: &SlotId) -> &[GadgetId] {
        self.occupants.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the endpoint names an existing slot or mounted gadget.
    pub fn endpoint_exists(&self, endpoint: &Endpoint) -> bool {
        match endpoint {
            Endpoint::Slot { slot, .. } => self.slots.contains_key(slot),
            Endpoint::Gadget { gadget, .. } => self.gadgets.contains_key(gadget),
        }
    }

    /// Aspects that lower onto `wire`: its own list followed by every
    /// matching scoped install.
    pub fn effective_aspects(&self, wire_id: &WireId) -> Vec<AspectInstance> {
        let Some(wire) = self.wires.get(wire_id) else {
            return Vec::new();
        };
        let mut out: Vec<AspectInstance> = self.aspects.get(wire_id).cloned().unwrap_or_default();
        for scoped in &self.scoped_aspects {
            if scoped.applies_to(wire, self) {
                out.push(scoped.aspect.clone());
            }
        }
        out
    }

    pub fn binder_aspects(&self) -> impl Iterator<Item = &AspectInstance> {
        self.scoped_aspects
            .iter()
            .filter(|scoped| scoped.scope == AspectScope::Binder)
            .map(|scoped| &scoped.aspect)
    }
}
