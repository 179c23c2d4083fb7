//! The realized graph: what lowering produces and the engine executes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

use crate::aspect::AspectConfig;
use crate::id::{AspectId, BoardId, EdgeId, GadgetId, NodeId, PinId, ReceiptId, SlotId, WireId};
use crate::ir::{JoinPoint, Provenance, ReplicaPolicy};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRef {
    pub node: NodeId,
    pub pin: PinId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedPin {
    pub pin: PinId,
    pub lattice: String,
}

/// Why a node exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NodeRole {
    Occupant {
        slot: SlotId,
        gadget: GadgetId,
    },
    Shim {
        wire: WireId,
        aspect: AspectId,
        at: JoinPoint,
        config: AspectConfig,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedNode {
    pub id: NodeId,
    /// Gadget kind (`add`, `cell`, ...) or shim kind (`tap`, `rateLimit`, ...).
    pub kind: String,
    #[serde(flatten)]
    pub role: NodeRole,
    pub inputs: Vec<RealizedPin>,
    pub outputs: Vec<RealizedPin>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    pub tags: BTreeSet<String>,
}

impl RealizedNode {
    pub fn gadget(&self) -> Option<&GadgetId> {
        match &self.role {
            NodeRole::Occupant { gadget, .. } => Some(gadget),
            NodeRole::Shim { .. } => None,
        }
    }

    pub fn is_shim(&self) -> bool {
        matches!(self.role, NodeRole::Shim { .. })
    }

    pub fn pin(&self, pin: &PinId) -> Option<&RealizedPin> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|p| &p.pin == pin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeProvenance {
    pub wire: WireId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aspects: Vec<AspectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedEdge {
    pub id: EdgeId,
    pub from: PinRef,
    pub to: PinRef,
    pub provenance: EdgeProvenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptFailure {
    pub class: String,
    pub message: String,
}

/// One structural change made by an accepted plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Diff {
    SlotDeclared {
        slot: SlotId,
    },
    SlotModeChanged {
        slot: SlotId,
        capacity: u32,
        replica: ReplicaPolicy,
    },
    Mounted {
        slot: SlotId,
        gadget: GadgetId,
    },
    Unmounted {
        slot: SlotId,
        gadget: GadgetId,
    },
    WireAdded {
        wire: WireId,
    },
    WireUpdated {
        wire: WireId,
    },
    WireRemoved {
        wire: WireId,
    },
    AspectWoven {
        wire: WireId,
        aspect: AspectId,
    },
    AspectInstalled {
        scope: String,
        aspect: AspectId,
    },
    PolicySet,
    /// Node and edge ids added or removed by re-lowering.
    Graph {
        nodes_added: Vec<NodeId>,
        nodes_removed: Vec<NodeId>,
        edges_added: Vec<EdgeId>,
        edges_removed: Vec<EdgeId>,
    },
}

/// Durable outcome of one `apply` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: ReceiptId,
    pub seq: u64,
    pub board: BoardId,
    pub status: ReceiptStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<Diff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReceiptFailure>,
    pub provenance: Provenance,
    #[serde(default)]
    pub dry_run: bool,
}

impl Receipt {
    pub fn is_ok(&self) -> bool {
        self.status == ReceiptStatus::Ok
    }

    pub fn failure_class(&self) -> Option<&str> {
        self.reason.as_ref().map(|r| r.class.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedGraph {
    pub board: BoardId,
    /// IR revision this graph was lowered from.
    pub revision: u64,
    pub nodes: Vec<RealizedNode>,
    pub edges: Vec<RealizedEdge>,
    pub receipts: Vec<Receipt>,
    pub graph_hash: String,
}

impl RealizedGraph {
    pub fn node(&self, id: &NodeId) -> Option<&RealizedNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn node_ids(&self) -> Vec<&NodeId> {
        self.nodes.iter().map(|n| &n.id).collect()
    }

    pub fn edge_ids(&self) -> Vec<&EdgeId> {
        self.edges.iter().map(|e| &e.id).collect()
    }

    /// Edges realized from one wire, in chain order.
    pub fn wire_edges<'a>(&'a self, wire: &'a WireId) -> impl Iterator<Item = &'a RealizedEdge> {
        self.edges.iter().filter(move |e| &e.provenance.wire == wire)
    }

    /// Node/edge delta from `before` to `self`.
    pub fn delta_from(&self, before: &RealizedGraph) -> Diff {
        fn added<'a, T: Eq + std::hash::Hash + Clone + 'a>(
            old: impl Iterator<Item = &'a T>,
            new: impl Iterator<Item = &'a T>,
        ) -> Vec<T> {
            let old: HashSet<&T> = old.collect();
            new.filter(|id| !old.contains(id)).cloned().collect()
        }

        Diff::Graph {
            nodes_added: added(before.nodes.iter().map(|n| &n.id), self.nodes.iter().map(|n| &n.id)),
            nodes_removed: added(self.nodes.iter().map(|n| &n.id), before.nodes.iter().map(|n| &n.id)),
            edges_added: added(before.edges.iter().map(|e| &e.id), self.edges.iter().map(|e| &e.id)),
            edges_removed: added(self.edges.iter().map(|e| &e.id), before.edges.iter().map(|e| &e.id)),
        }
    }
}
