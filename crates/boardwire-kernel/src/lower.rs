//! Lowering: IR to realized graph.
//!
//! Lowering is a pure function of the IR, the aspect registry and the
//! lattice catalog. Every collection it walks is ordered, node and edge ids
//! are derived from IR ids, and aspects are sorted by canonical order key,
//! so the same IR always lowers to the same graph whatever order its
//! aspects were declared in.

use serde::Serialize;
use std::collections::BTreeSet;

use boardwire_lattice::LatticeCatalog;

use crate::aspect::{AspectConfig, AspectError, AspectRegistry, RateLimitConfig};
use crate::hash::{GRAPH_HASH_PREFIX, canonical_string, content_hash};
use crate::id::{AspectId, EdgeId, GadgetId, NodeId, PinId, WireId};
use crate::ir::{BoardIr, Endpoint, JoinPoint, PinDecl, ReplicaPolicy};
use crate::realized::{
    EdgeProvenance, NodeRole, PinRef, Receipt, RealizedEdge, RealizedGraph, RealizedNode,
    RealizedPin,
};

pub const SHIM_IN: &str = "in";
pub const SHIM_OUT: &str = "out";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LowerError {
    #[error(transparent)]
    Aspect(#[from] AspectError),
    #[error("pin {pin} of {node} uses unknown lattice {lattice}")]
    UnknownLattice {
        node: NodeId,
        pin: PinId,
        lattice: String,
    },
    #[error("wire {wire} joins a {from} pin to a {to} pin")]
    LatticeMismatch {
        wire: WireId,
        from: String,
        to: String,
    },
    #[error("rate limits on wire {wire} do not compose: {reason}")]
    Composition { wire: WireId, reason: String },
    #[error("graph hash failed: {0}")]
    Hash(String),
}

/// One aspect after parsing, ready to sort.
#[derive(Debug, Clone)]
struct WovenAspect {
    order_key: i64,
    id: AspectId,
    canonical: String,
    shim: String,
    at: JoinPoint,
    config: AspectConfig,
}

impl WovenAspect {
    fn sort_key(&self) -> (i64, &AspectId, &str) {
        (self.order_key, &self.id, &self.canonical)
    }
}

/// Lower `ir` into a fresh graph carrying `receipts` forward.
pub fn lower(
    ir: &BoardIr,
    registry: &AspectRegistry,
    catalog: &LatticeCatalog,
    receipts: Vec<Receipt>,
) -> Result<RealizedGraph, LowerError> {
    let mut nodes = Vec::new();

    for (slot, gadgets) in &ir.occupants {
        for gadget in gadgets {
            let Some(record) = ir.gadgets.get(gadget) else {
                continue;
            };
            let id = NodeId::for_occupant(slot, gadget);
            let pins = |decls: &[PinDecl]| -> Result<Vec<RealizedPin>, LowerError> {
                decls
                    .iter()
                    .map(|decl| {
                        if !catalog.contains(&decl.lattice) {
                            return Err(LowerError::UnknownLattice {
                                node: id.clone(),
                                pin: decl.pin.clone(),
                                lattice: decl.lattice.clone(),
                            });
                        }
                        Ok(RealizedPin {
                            pin: decl.pin.clone(),
                            lattice: decl.lattice.clone(),
                        })
                    })
                    .collect()
            };
            let inputs = pins(&record.spec.inputs)?;
            let outputs = pins(&record.spec.outputs)?;
            let tags: BTreeSet<String> = [format!("slot:{slot}"), format!("kind:{}", record.spec.kind)]
                .into_iter()
                .collect();
            nodes.push(RealizedNode {
                id,
                kind: record.spec.kind.clone(),
                role: NodeRole::Occupant {
                    slot: slot.clone(),
                    gadget: gadget.clone(),
                },
                inputs,
                outputs,
                params: record.spec.params.clone(),
                tags,
            });
        }
    }

    let mut edges = Vec::new();
    for (wire_id, wire) in &ir.wires {
        let sources = resolve(ir, &wire.from);
        let targets = resolve(ir, &wire.to);
        if sources.is_empty() || targets.is_empty() {
            continue;
        }

        let lattice_of = |pin: &PinRef| -> Option<String> {
            nodes
                .iter()
                .find(|n| n.id == pin.node)
                .and_then(|n| n.pin(&pin.pin))
                .map(|p| p.lattice.clone())
        };
        let Some(lattice) = lattice_of(&sources[0]) else {
            continue;
        };
        for pin in sources.iter().chain(targets.iter()) {
            if let Some(other) = lattice_of(pin)
                && other != lattice
            {
                return Err(LowerError::LatticeMismatch {
                    wire: wire_id.clone(),
                    from: lattice,
                    to: other,
                });
            }
        }

        let woven = weave(ir, registry, wire_id)?;
        let provenance = EdgeProvenance {
            wire: wire_id.clone(),
            aspects: woven.iter().map(|a| a.id.clone()).collect(),
        };

        let mut shim_refs: Vec<(PinRef, PinRef)> = Vec::new();
        for (index, aspect) in woven.into_iter().enumerate() {
            let id = NodeId::for_shim(wire_id, index, &aspect.id);
            let pin = |name: &'static str| RealizedPin {
                pin: PinId::from_static(name),
                lattice: lattice.clone(),
            };
            shim_refs.push((
                PinRef {
                    node: id.clone(),
                    pin: PinId::from_static(SHIM_IN),
                },
                PinRef {
                    node: id.clone(),
                    pin: PinId::from_static(SHIM_OUT),
                },
            ));
            let tags: BTreeSet<String> = [
                format!("shim:{}", aspect.shim),
                format!("at:{}", aspect.at.as_str()),
                format!("wire:{wire_id}"),
            ]
            .into_iter()
            .collect();
            nodes.push(RealizedNode {
                id,
                kind: aspect.shim,
                role: NodeRole::Shim {
                    wire: wire_id.clone(),
                    aspect: aspect.id,
                    at: aspect.at,
                    config: aspect.config,
                },
                inputs: vec![pin(SHIM_IN)],
                outputs: vec![pin(SHIM_OUT)],
                params: serde_json::Value::Null,
                tags,
            });
        }

        let mut next = 0usize;
        let mut edge = |from: &PinRef, to: &PinRef, edges: &mut Vec<RealizedEdge>| {
            edges.push(RealizedEdge {
                id: EdgeId::for_wire(wire_id, next),
                from: from.clone(),
                to: to.clone(),
                provenance: provenance.clone(),
            });
            next += 1;
        };

        match (shim_refs.first(), shim_refs.last()) {
            (Some((head, _)), Some((_, tail))) => {
                for source in &sources {
                    edge(source, head, &mut edges);
                }
                for pair in shim_refs.windows(2) {
                    edge(&pair[0].1, &pair[1].0, &mut edges);
                }
                for target in &targets {
                    edge(tail, target, &mut edges);
                }
            }
            _ => {
                for source in &sources {
                    for target in &targets {
                        edge(source, target, &mut edges);
                    }
                }
            }
        }
    }

    #[derive(Serialize)]
    struct HashMaterial<'a> {
        nodes: &'a [RealizedNode],
        edges: &'a [RealizedEdge],
    }
    let graph_hash = content_hash(
        GRAPH_HASH_PREFIX,
        &HashMaterial {
            nodes: &nodes,
            edges: &edges,
        },
    )
    .map_err(|e| LowerError::Hash(e.to_string()))?;

    tracing::debug!(
        board = %ir.board,
        revision = ir.revision,
        nodes = nodes.len(),
        edges = edges.len(),
        %graph_hash,
        "lowered board"
    );

    Ok(RealizedGraph {
        board: ir.board.clone(),
        revision: ir.revision,
        nodes,
        edges,
        receipts,
        graph_hash,
    })
}

/// Concrete node pins behind an endpoint, after replica policy.
fn resolve(ir: &BoardIr, endpoint: &Endpoint) -> Vec<PinRef> {
    let has_pin = |gadget: &GadgetId, pin: &PinId| -> bool {
        ir.gadgets
            .get(gadget)
            .is_some_and(|record| record.spec.pin(pin).is_some())
    };
    match endpoint {
        Endpoint::Slot { slot, pin } => {
            let take = match ir.slots.get(slot).map(|decl| decl.replica) {
                Some(ReplicaPolicy::Broadcast) => usize::MAX,
                Some(ReplicaPolicy::First) => 1,
                None => 0,
            };
            ir.occupants_of(slot)
                .iter()
                .take(take)
                .filter(|gadget| has_pin(gadget, pin))
                .map(|gadget| PinRef {
                    node: NodeId::for_occupant(slot, gadget),
                    pin: pin.clone(),
                })
                .collect()
        }
        Endpoint::Gadget { gadget, pin } => match ir.slot_of(gadget) {
            Some(slot) if has_pin(gadget, pin) => vec![PinRef {
                node: NodeId::for_occupant(slot, gadget),
                pin: pin.clone(),
            }],
            _ => Vec::new(),
        },
    }
}

/// Parse, compose, dedupe and sort the effective aspects of one wire.
fn weave(
    ir: &BoardIr,
    registry: &AspectRegistry,
    wire: &WireId,
) -> Result<Vec<WovenAspect>, LowerError> {
    let mut woven: Vec<WovenAspect> = Vec::new();
    let mut rate_limit: Option<(WovenAspect, RateLimitConfig)> = None;
    let canonical = |config: &AspectConfig| {
        canonical_string(config).map_err(|e| LowerError::Hash(e.to_string()))
    };

    for instance in ir.effective_aspects(wire) {
        let manifest = registry.get(&instance.id)?;
        let config = manifest.parse(&instance.params)?;
        let mut aspect = WovenAspect {
            order_key: manifest.order_key,
            id: instance.id.clone(),
            canonical: canonical(&config)?,
            shim: manifest.shim.clone(),
            at: instance.at.unwrap_or(manifest.default_at),
            config,
        };

        if let AspectConfig::RateLimit(incoming) = &aspect.config {
            let incoming = incoming.clone();
            rate_limit = Some(match rate_limit.take() {
                None => (aspect, incoming),
                Some((mut current, existing)) => {
                    let composed = existing.compose(&incoming).map_err(|reason| {
                        LowerError::Composition {
                            wire: wire.clone(),
                            reason,
                        }
                    })?;
                    current.config = AspectConfig::RateLimit(composed.clone());
                    current.canonical = canonical(&current.config)?;
                    current.order_key = current.order_key.min(aspect.order_key);
                    current.at = current.at.min(aspect.at);
                    if aspect.id < current.id {
                        std::mem::swap(&mut current.id, &mut aspect.id);
                    }
                    (current, composed)
                }
            });
            continue;
        }

        if !woven
            .iter()
            .any(|w| w.id == aspect.id && w.canonical == aspect.canonical)
        {
            woven.push(aspect);
        }
    }

    woven.extend(rate_limit.map(|(aspect, _)| aspect));
    woven.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    Ok(woven)
}
