//! Plans: the closed vocabulary of board mutations.
//!
//! A plan is an ordered list of operations submitted by one principal. The
//! binder applies a plan atomically; structural checks here run before any
//! IR is consulted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::{PLAN_HASH_PREFIX, content_hash};
use crate::id::{AspectId, GadgetId, PinoutId, PrincipalId, SlotId, WireId};
use crate::ir::{AspectInstance, Endpoint, GadgetSpec, ReplicaPolicy, WireSpec};
use crate::policy::Policy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub by: PrincipalId,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_id: Option<String>,
    pub ops: Vec<PlanOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "op",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum PlanOp {
    DeclareSlot {
        slot: SlotId,
        pinout: PinoutId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capacity: Option<u32>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        traits: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replica: Option<ReplicaPolicy>,
    },
    SetSlotMode {
        slot: SlotId,
        capacity: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replica: Option<ReplicaPolicy>,
    },
    Mount {
        slot: SlotId,
        gadget: GadgetId,
        spec: GadgetSpec,
    },
    Unmount {
        slot: SlotId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gadget: Option<GadgetId>,
    },
    AddWire {
        wire: WireId,
        spec: WireSpec,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        aspects: Vec<AspectInstance>,
    },
    UpdateWire {
        wire: WireId,
        spec: WireSpec,
    },
    RemoveWire {
        wire: WireId,
    },
    WeaveWires {
        selector: WireSelector,
        aspect: AspectInstance,
    },
    InstallPinAspect {
        target: Endpoint,
        aspect: AspectInstance,
    },
    InstallSlotAspect {
        slot: SlotId,
        aspect: AspectInstance,
    },
    InstallBoardAspect {
        aspect: AspectInstance,
    },
    InstallBinderAspect {
        aspect: AspectInstance,
    },
    SetPolicy {
        policy: Policy,
    },
    Validate,
    Bake,
}

impl PlanOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeclareSlot { .. } => "declareSlot",
            Self::SetSlotMode { .. } => "setSlotMode",
            Self::Mount { .. } => "mount",
            Self::Unmount { .. } => "unmount",
            Self::AddWire { .. } => "addWire",
            Self::UpdateWire { .. } => "updateWire",
            Self::RemoveWire { .. } => "removeWire",
            Self::WeaveWires { .. } => "weaveWires",
            Self::InstallPinAspect { .. } => "installPinAspect",
            Self::InstallSlotAspect { .. } => "installSlotAspect",
            Self::InstallBoardAspect { .. } => "installBoardAspect",
            Self::InstallBinderAspect { .. } => "installBinderAspect",
            Self::SetPolicy { .. } => "setPolicy",
            Self::Validate => "validate",
            Self::Bake => "bake",
        }
    }

    /// Aspects this operation installs, for aspect-grant checks.
    pub fn installed_aspects(&self) -> Vec<&AspectId> {
        match self {
            Self::AddWire { aspects, .. } => aspects.iter().map(|a| &a.id).collect(),
            Self::WeaveWires { aspect, .. }
            | Self::InstallPinAspect { aspect, .. }
            | Self::InstallSlotAspect { aspect, .. }
            | Self::InstallBoardAspect { aspect }
            | Self::InstallBinderAspect { aspect } => vec![&aspect.id],
            _ => Vec::new(),
        }
    }
}

/// Wire selection for `weaveWires`. Every present criterion must match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WireSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_slot: Option<SlotId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_slot: Option<SlotId>,
}

impl WireSelector {
    pub fn is_empty(&self) -> bool {
        self.label_pattern.is_none() && self.from_slot.is_none() && self.to_slot.is_none()
    }

    pub fn compile(&self) -> Result<CompiledSelector<'_>, String> {
        if self.is_empty() {
            return Err("weaveWires selector must name at least one criterion".to_string());
        }
        let label = self
            .label_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| format!("invalid labelPattern: {e}"))?;
        Ok(CompiledSelector {
            selector: self,
            label,
        })
    }
}

pub struct CompiledSelector<'a> {
    selector: &'a WireSelector,
    label: Option<Regex>,
}

impl CompiledSelector<'_> {
    pub fn matches(&self, wire: &WireSpec) -> bool {
        if let Some(label) = &self.label {
            match &wire.label {
                Some(text) if label.is_match(text) => {}
                _ => return false,
            }
        }
        if let Some(slot) = &self.selector.from_slot
            && wire.from.slot_id() != Some(slot)
        {
            return false;
        }
        if let Some(slot) = &self.selector.to_slot
            && wire.to.slot_id() != Some(slot)
        {
            return false;
        }
        true
    }
}

impl Plan {
    pub fn new(by: PrincipalId, reason: impl Into<String>, ops: Vec<PlanOp>) -> Self {
        Self {
            by,
            reason: reason.into(),
            pass_id: None,
            ops,
        }
    }

    pub fn with_pass_id(mut self, pass_id: impl Into<String>) -> Self {
        self.pass_id = Some(pass_id.into());
        self
    }

    pub fn from_json(value: Value) -> Result<Self, String> {
        let plan: Self = serde_json::from_value(value).map_err(|e| format!("malformed plan: {e}"))?;
        plan.check_structure()?;
        Ok(plan)
    }

    /// Shape checks that need no board state.
    pub fn check_structure(&self) -> Result<(), String> {
        if self.ops.is_empty() {
            return Err("plan has no operations".to_string());
        }
        for (idx, op) in self.ops.iter().enumerate() {
            let fail = |reason: String| format!("op {idx} ({}): {reason}", op.name());
            match op {
                PlanOp::DeclareSlot {
                    capacity: Some(0), ..
                }
                | PlanOp::SetSlotMode { capacity: 0, .. } => {
                    return Err(fail("capacity must be at least 1".to_string()));
                }
                PlanOp::WeaveWires { selector, .. } => {
                    selector.compile().map(|_| ()).map_err(fail)?;
                }
                PlanOp::Mount { spec, .. } if spec.kind.is_empty() => {
                    return Err(fail("gadget spec has an empty kind".to_string()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// A plan containing `validate` anywhere is a dry run.
    pub fn is_dry_run(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, PlanOp::Validate))
    }

    pub fn installed_aspects(&self) -> Vec<&AspectId> {
        self.ops.iter().flat_map(PlanOp::installed_aspects).collect()
    }

    /// Stable hash of the plan's operations.
    ///
    /// Principal, reason and pass id are audit material and do not take
    /// part in the hash.
    pub fn hash(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct HashMaterial<'a> {
            ops: &'a [PlanOp],
        }
        content_hash(PLAN_HASH_PREFIX, &HashMaterial { ops: &self.ops })
    }
}
