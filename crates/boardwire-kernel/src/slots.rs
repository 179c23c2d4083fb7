//! Slot occupancy.
//!
//! The slot manager owns which gadget sits in which slot. It enforces
//! capacity and exact pinout membership, and notifies subscribers
//! synchronously on every mount and unmount.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::id::{ContactId, GadgetId, NodeId, PinId, PinoutId, SlotId};
use crate::ir::{BoardIr, Endpoint, GadgetSpec, MountRecord, ReplicaPolicy, SlotDecl};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("slot {0} is already declared")]
    DuplicateSlot(SlotId),
    #[error("slot {0} not found")]
    SlotNotFound(SlotId),
    #[error("gadget {0} is not mounted")]
    GadgetNotFound(GadgetId),
    #[error("slot {slot} is at capacity ({capacity})")]
    AtCapacity { slot: SlotId, capacity: u32 },
    #[error("gadget {gadget} is already mounted in slot {slot}")]
    AlreadyMounted { gadget: GadgetId, slot: SlotId },
    #[error("gadget {gadget} does not implement pinout {required} required by slot {slot}")]
    PinoutMismatch {
        slot: SlotId,
        gadget: GadgetId,
        required: PinoutId,
    },
    #[error("slot {slot} holds {occupied} gadgets; capacity {capacity} is too small")]
    CapacityBelowOccupancy {
        slot: SlotId,
        capacity: u32,
        occupied: usize,
    },
}

/// A gadget occupying a slot, with its pin → contact mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountedGadget {
    pub slot: SlotId,
    pub gadget: GadgetId,
    pub spec: GadgetSpec,
    pub pins: BTreeMap<PinId, ContactId>,
    pub mounted_at: DateTime<Utc>,
}

impl MountedGadget {
    pub fn node(&self) -> NodeId {
        NodeId::for_occupant(&self.slot, &self.gadget)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum MountEvent {
    Mounted { slot: SlotId, gadget: GadgetId },
    Unmounted { slot: SlotId, gadget: GadgetId },
}

pub type MountSubscriber = Arc<dyn Fn(&MountEvent) + Send + Sync>;

#[derive(Default)]
pub struct SlotManager {
    slots: BTreeMap<SlotId, SlotDecl>,
    occupants: BTreeMap<SlotId, Vec<GadgetId>>,
    mounts: BTreeMap<GadgetId, MountedGadget>,
    subscribers: Vec<MountSubscriber>,
    /// Events recorded by a fork, replayed on `adopt`.
    journal: Option<Vec<MountEvent>>,
}

impl fmt::Debug for SlotManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotManager")
            .field("slots", &self.slots)
            .field("occupants", &self.occupants)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

fn pin_map(slot: &SlotId, gadget: &GadgetId, spec: &GadgetSpec) -> BTreeMap<PinId, ContactId> {
    let node = NodeId::for_occupant(slot, gadget);
    spec.inputs
        .iter()
        .chain(spec.outputs.iter())
        .map(|decl| (decl.pin.clone(), ContactId::for_pin(&node, &decl.pin)))
        .collect()
}

impl SlotManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild occupancy from an IR.
    pub fn from_ir(ir: &BoardIr) -> Self {
        let mut manager = Self::new();
        manager.slots = ir.slots.clone();
        manager.occupants = ir.occupants.clone();
        for (gadget, record) in &ir.gadgets {
            manager.mounts.insert(
                gadget.clone(),
                MountedGadget {
                    slot: record.slot.clone(),
                    gadget: gadget.clone(),
                    spec: record.spec.clone(),
                    pins: pin_map(&record.slot, gadget, &record.spec),
                    mounted_at: record.mounted_at,
                },
            );
        }
        manager
    }

    /// Write slots, occupants and mounts back into `ir`.
    pub fn write_into(&self, ir: &mut BoardIr) {
        ir.slots = self.slots.clone();
        ir.occupants = self
            .occupants
            .iter()
            .filter(|(_, gadgets)| !gadgets.is_empty())
            .map(|(slot, gadgets)| (slot.clone(), gadgets.clone()))
            .collect();
        ir.gadgets = self
            .mounts
            .iter()
            .map(|(gadget, mounted)| {
                (
                    gadget.clone(),
                    MountRecord {
                        slot: mounted.slot.clone(),
                        spec: mounted.spec.clone(),
                        mounted_at: mounted.mounted_at,
                    },
                )
            })
            .collect();
    }

    /// A subscriber-free copy that journals its own mount events.
    pub fn fork(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            occupants: self.occupants.clone(),
            mounts: self.mounts.clone(),
            subscribers: Vec::new(),
            journal: Some(Vec::new()),
        }
    }

    /// Take over a fork's state and notify subscribers of everything the
    /// fork journaled.
    pub fn adopt(&mut self, mut fork: SlotManager) {
        self.slots = std::mem::take(&mut fork.slots);
        self.occupants = std::mem::take(&mut fork.occupants);
        self.mounts = std::mem::take(&mut fork.mounts);
        for event in fork.journal.take().unwrap_or_default() {
            self.notify(event);
        }
    }

    pub fn subscribe(&mut self, subscriber: MountSubscriber) {
        self.subscribers.push(subscriber);
    }

    fn notify(&mut self, event: MountEvent) {
        for subscriber in &self.subscribers {
            subscriber(&event);
        }
        if let Some(journal) = &mut self.journal {
            journal.push(event);
        }
    }

    pub fn register_slot(&mut self, slot: SlotId, decl: SlotDecl) -> Result<(), SlotError> {
        if self.slots.contains_key(&slot) {
            return Err(SlotError::DuplicateSlot(slot));
        }
        self.slots.insert(slot, decl);
        Ok(())
    }

    pub fn set_slot_mode(
        &mut self,
        slot: &SlotId,
        capacity: u32,
        replica: Option<ReplicaPolicy>,
    ) -> Result<(), SlotError> {
        let occupied = self.occupants(slot).len();
        let decl = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| SlotError::SlotNotFound(slot.clone()))?;
        if (capacity as usize) < occupied {
            return Err(SlotError::CapacityBelowOccupancy {
                slot: slot.clone(),
                capacity,
                occupied,
            });
        }
        decl.capacity = capacity;
        if let Some(replica) = replica {
            decl.replica = replica;
        }
        Ok(())
    }

    pub fn mount_gadget(
        &mut self,
        slot: &SlotId,
        gadget: GadgetId,
        spec: GadgetSpec,
        at: DateTime<Utc>,
    ) -> Result<&MountedGadget, SlotError> {
        let decl = self
            .slots
            .get(slot)
            .ok_or_else(|| SlotError::SlotNotFound(slot.clone()))?;
        if let Some(existing) = self.mounts.get(&gadget) {
            return Err(SlotError::AlreadyMounted {
                gadget,
                slot: existing.slot.clone(),
            });
        }
        if self.occupants(slot).len() >= decl.capacity as usize {
            return Err(SlotError::AtCapacity {
                slot: slot.clone(),
                capacity: decl.capacity,
            });
        }
        if !spec.pinouts.contains(&decl.pinout) {
            return Err(SlotError::PinoutMismatch {
                slot: slot.clone(),
                gadget,
                required: decl.pinout.clone(),
            });
        }

        let mounted = MountedGadget {
            slot: slot.clone(),
            gadget: gadget.clone(),
            pins: pin_map(slot, &gadget, &spec),
            spec,
            mounted_at: at,
        };
        self.occupants
            .entry(slot.clone())
            .or_default()
            .push(gadget.clone());
        self.mounts.insert(gadget.clone(), mounted);
        self.notify(MountEvent::Mounted {
            slot: slot.clone(),
            gadget: gadget.clone(),
        });
        self.mounts
            .get(&gadget)
            .ok_or(SlotError::GadgetNotFound(gadget))
    }

    /// Remove one mount; returns the slot it occupied.
    pub fn unmount_gadget(&mut self, gadget: &GadgetId) -> Option<SlotId> {
        let mounted = self.mounts.remove(gadget)?;
        if let Some(list) = self.occupants.get_mut(&mounted.slot) {
            list.retain(|g| g != gadget);
        }
        self.notify(MountEvent::Unmounted {
            slot: mounted.slot.clone(),
            gadget: gadget.clone(),
        });
        Some(mounted.slot)
    }

    /// Remove every occupant of `slot`, in mount order.
    pub fn unmount_all(&mut self, slot: &SlotId) -> Result<Vec<GadgetId>, SlotError> {
        if !self.slots.contains_key(slot) {
            return Err(SlotError::SlotNotFound(slot.clone()));
        }
        let gadgets = self.occupants(slot).to_vec();
        for gadget in &gadgets {
            self.unmount_gadget(gadget);
        }
        Ok(gadgets)
    }

    pub fn slot(&self, slot: &SlotId) -> Option<&SlotDecl> {
        self.slots.get(slot)
    }

    pub fn occupants(&self, slot: &SlotId) -> &[GadgetId] {
        self.occupants.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn slot_of(&self, gadget: &GadgetId) -> Option<&SlotId> {
        self.mounts.get(gadget).map(|m| &m.slot)
    }

    pub fn mounted(&self, gadget: &GadgetId) -> Option<&MountedGadget> {
        self.mounts.get(gadget)
    }

    pub fn endpoint_exists(&self, endpoint: &Endpoint) -> bool {
        match endpoint {
            Endpoint::Slot { slot, .. } => self.slots.contains_key(slot),
            Endpoint::Gadget { gadget, .. } => self.mounts.contains_key(gadget),
        }
    }

    /// Contacts behind an endpoint: one per occupant in mount order for a
    /// slot endpoint, the single gadget contact for a direct endpoint.
    /// Occupants lacking the pin contribute nothing.
    pub fn resolve_endpoint(&self, endpoint: &Endpoint) -> Vec<ContactId> {
        let contact = |gadget: &GadgetId, pin: &PinId| {
            self.mounts
                .get(gadget)
                .and_then(|m| m.pins.get(pin))
                .cloned()
        };
        match endpoint {
            Endpoint::Slot { slot, pin } => self
                .occupants(slot)
                .iter()
                .filter_map(|gadget| contact(gadget, pin))
                .collect(),
            Endpoint::Gadget { gadget, pin } => contact(gadget, pin).into_iter().collect(),
        }
    }

    /// Events journaled so far by a fork; empty for a primary manager.
    pub fn take_journal(&mut self) -> Vec<MountEvent> {
        self.journal.as_mut().map(std::mem::take).unwrap_or_default()
    }
}
