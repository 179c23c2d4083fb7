//! A realized graph instantiated as contacts, connections and runnable
//! nodes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use boardwire_kernel::{BoardId, ContactId, NodeId, NodeRole, PinId, RealizedGraph};
use boardwire_lattice::{LatticeCatalog, LatticeValue};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::contact::ContactStore;
use crate::error::EngineError;
use crate::gadget::{Gadget, GadgetLibrary};
use crate::shim::{Completion, DemandCallback, Shim, TapRecord};
use crate::sink::{EventSink, NoopSink, ShimEvent};

pub(crate) enum Behavior {
    Gadget(Box<dyn Gadget>),
    Shim(Box<dyn Shim>),
}

pub(crate) struct NodeRuntime {
    pub(crate) inputs: Vec<(PinId, ContactId)>,
    pub(crate) outputs: Vec<(PinId, ContactId)>,
    /// An input changed since the last firing.
    pub(crate) dirty: bool,
    pub(crate) fires: u64,
    pub(crate) behavior: Behavior,
}

pub struct Network {
    pub(crate) board: BoardId,
    pub(crate) revision: u64,
    pub(crate) graph_hash: String,
    pub(crate) config: EngineConfig,
    pub(crate) contacts: ContactStore,
    /// Source contact to target contacts, targets in id order.
    pub(crate) connections: BTreeMap<ContactId, Vec<ContactId>>,
    pub(crate) nodes: BTreeMap<NodeId, NodeRuntime>,
    /// Input contact to the nodes that read it.
    pub(crate) readers: BTreeMap<ContactId, BTreeSet<NodeId>>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) on_demand: Option<DemandCallback>,
    pub(crate) completions: Vec<Completion>,
    pub(crate) pulse: u64,
    pub(crate) next_ticket: u64,
}

impl Network {
    /// Instantiate `graph`: one contact per node pin, one connection per
    /// edge, one gadget or shim per node.
    pub fn realize(
        graph: &RealizedGraph,
        catalog: &LatticeCatalog,
        library: &GadgetLibrary,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::Realize(e.to_string()))?;

        let mut contacts = ContactStore::new();
        let mut nodes = BTreeMap::new();
        let mut readers: BTreeMap<ContactId, BTreeSet<NodeId>> = BTreeMap::new();

        for node in &graph.nodes {
            let mut pins = |decls: &[boardwire_kernel::RealizedPin]| {
                decls
                    .iter()
                    .map(|decl| {
                        let lattice = catalog.get(&decl.lattice).map_err(|e| {
                            EngineError::Realize(format!("{} pin {}: {e}", node.id, decl.pin))
                        })?;
                        let contact = ContactId::for_pin(&node.id, &decl.pin);
                        contacts.register(contact.clone(), lattice.clone())?;
                        Ok((decl.pin.clone(), contact))
                    })
                    .collect::<Result<Vec<_>, EngineError>>()
            };
            let inputs = pins(&node.inputs)?;
            let outputs = pins(&node.outputs)?;

            let behavior = match &node.role {
                NodeRole::Occupant { .. } => Behavior::Gadget(library.build_gadget(node)?),
                NodeRole::Shim { config: aspect, .. } => Behavior::Shim(library.build_shim(
                    node,
                    aspect,
                    config.tap_buffer_capacity,
                    config.default_queue_capacity,
                )?),
            };
            for (_, contact) in &inputs {
                readers
                    .entry(contact.clone())
                    .or_default()
                    .insert(node.id.clone());
            }
            nodes.insert(
                node.id.clone(),
                NodeRuntime {
                    inputs,
                    outputs,
                    dirty: false,
                    fires: 0,
                    behavior,
                },
            );
        }

        let mut connections: BTreeMap<ContactId, Vec<ContactId>> = BTreeMap::new();
        for edge in &graph.edges {
            let from = ContactId::for_pin(&edge.from.node, &edge.from.pin);
            let to = ContactId::for_pin(&edge.to.node, &edge.to.pin);
            let lattice_of = |id: &ContactId| {
                contacts
                    .get(id)
                    .map(|c| c.lattice.name().to_string())
                    .ok_or_else(|| {
                        EngineError::Realize(format!("edge {} names unknown contact {id}", edge.id))
                    })
            };
            let (a, b) = (lattice_of(&from)?, lattice_of(&to)?);
            if a != b {
                return Err(EngineError::Realize(format!(
                    "edge {} joins a {a} contact to a {b} contact",
                    edge.id
                )));
            }
            connections.entry(from).or_default().push(to);
        }
        for targets in connections.values_mut() {
            targets.sort();
            targets.dedup();
        }

        tracing::debug!(
            board = %graph.board,
            revision = graph.revision,
            contacts = contacts.len(),
            nodes = nodes.len(),
            "realized network"
        );

        Ok(Self {
            board: graph.board.clone(),
            revision: graph.revision,
            graph_hash: graph.graph_hash.clone(),
            config,
            contacts,
            connections,
            nodes,
            readers,
            sink: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
            on_demand: None,
            completions: Vec::new(),
            pulse: 0,
            next_ticket: 0,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Called whenever a credit gate runs short.
    pub fn on_demand(mut self, callback: DemandCallback) -> Self {
        self.on_demand = Some(callback);
        self
    }

    pub fn board(&self) -> &BoardId {
        &self.board
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn graph_hash(&self) -> &str {
        &self.graph_hash
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn contacts(&self) -> &ContactStore {
        &self.contacts
    }

    /// The contact behind `node`'s `pin`, if the network has it.
    pub fn contact(&self, node: &str, pin: &str) -> Result<ContactId, EngineError> {
        let node = NodeId::new(node).map_err(|e| EngineError::Realize(e.to_string()))?;
        let pin = PinId::new(pin).map_err(|e| EngineError::Realize(e.to_string()))?;
        let id = ContactId::for_pin(&node, &pin);
        if !self.contacts.contains(&id) {
            return Err(EngineError::ContactNotFound(id));
        }
        Ok(id)
    }

    pub fn value(&self, contact: &ContactId) -> Option<&LatticeValue> {
        self.contacts.value(contact)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// How many times `node` has fired.
    pub fn fire_count(&self, node: &NodeId) -> Option<u64> {
        self.nodes.get(node).map(|rt| rt.fires)
    }

    pub fn fire_counts(&self) -> BTreeMap<NodeId, u64> {
        self.nodes
            .iter()
            .map(|(id, rt)| (id.clone(), rt.fires))
            .collect()
    }

    /// Items currently queued in a shim.
    pub fn pending(&self, node: &NodeId) -> Result<usize, EngineError> {
        Ok(self.shim(node)?.pending())
    }

    /// Buffered records of a `buffer` tap.
    pub fn tap_records(&self, node: &NodeId) -> Result<Vec<TapRecord>, EngineError> {
        Ok(self.shim(node)?.tap_records())
    }

    /// Completions of queued shim items since the last drain.
    pub fn drain_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    fn shim(&self, node: &NodeId) -> Result<&dyn Shim, EngineError> {
        match self.nodes.get(node).map(|rt| &rt.behavior) {
            Some(Behavior::Shim(shim)) => Ok(shim.as_ref()),
            Some(Behavior::Gadget(_)) => Err(EngineError::Realize(format!("{node} is not a shim"))),
            None => Err(EngineError::NodeNotFound(node.clone())),
        }
    }
}

/// Dropping a network, including replacing it with a fresh realization,
/// fails whatever its shims still hold. Each failure is reported to the
/// sink as a `dropped` event since no caller is left to drain it.
impl Drop for Network {
    fn drop(&mut self) {
        let failed = self.fail_all_pending("dropped");
        if failed.is_empty() {
            return;
        }
        tracing::warn!(
            board = %self.board,
            revision = self.revision,
            failed = failed.len(),
            "network dropped with queued items"
        );
        for completion in failed {
            self.sink.emit(ShimEvent::Dropped {
                node: completion.node,
                ticket: Some(completion.ticket),
                reason: "network dropped".to_string(),
            });
        }
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("board", &self.board)
            .field("revision", &self.revision)
            .field("contacts", &self.contacts.len())
            .field("nodes", &self.nodes.len())
            .field("pulse", &self.pulse)
            .finish()
    }
}
