//! Where shims and gadgets report what they did.
//!
//! A network emits into one [`EventSink`]. [`FanoutSink`] lets any number
//! of observers share that sink; each stays attached while its
//! [`ObserverHandle`] lives.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use boardwire_kernel::NodeId;
use boardwire_lattice::LatticeValue;

use crate::gadget::GadgetEffect;
use crate::shim::TicketId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ShimEvent {
    Tapped {
        node: NodeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        pulse: u64,
        value: LatticeValue,
        at: DateTime<Utc>,
    },
    Queued {
        node: NodeId,
        ticket: TicketId,
        depth: usize,
    },
    Released {
        node: NodeId,
        ticket: TicketId,
    },
    Dropped {
        node: NodeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        ticket: Option<TicketId>,
        reason: String,
    },
    Rejected {
        node: NodeId,
        reason: String,
    },
    /// Outstanding credit demand: the item just refused plus everything
    /// already queued.
    Demand {
        node: NodeId,
        requested: u64,
        queued: u64,
    },
    Reset {
        node: NodeId,
        failed: usize,
    },
    /// A gadget fired.
    Effect {
        node: NodeId,
        effect: GadgetEffect,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ShimEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: ShimEvent) {}
}

/// Forwards events to `tracing` under the `boardwire::shim` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ShimEvent) {
        match &event {
            ShimEvent::Tapped {
                node,
                label,
                pulse,
                value,
                ..
            } => tracing::info!(
                target: "boardwire::shim",
                node = %node,
                label = label.as_deref().unwrap_or(""),
                pulse,
                value = %value,
                "tap"
            ),
            ShimEvent::Queued {
                node,
                ticket,
                depth,
            } => tracing::debug!(target: "boardwire::shim", node = %node, ticket = %ticket, depth, "queued"),
            ShimEvent::Released { node, ticket } => {
                tracing::debug!(target: "boardwire::shim", node = %node, ticket = %ticket, "released")
            }
            ShimEvent::Dropped { node, reason, .. } => {
                tracing::warn!(target: "boardwire::shim", node = %node, reason = %reason, "dropped")
            }
            ShimEvent::Rejected { node, reason } => {
                tracing::warn!(target: "boardwire::shim", node = %node, reason = %reason, "rejected")
            }
            ShimEvent::Demand {
                node,
                requested,
                queued,
            } => tracing::debug!(target: "boardwire::shim", node = %node, requested, queued, "credit demand"),
            ShimEvent::Reset { node, failed } => {
                tracing::info!(target: "boardwire::shim", node = %node, failed, "reset")
            }
            ShimEvent::Effect { node, effect } => {
                tracing::trace!(target: "boardwire::gadget", node = %node, effect = ?effect, "effect")
            }
        }
    }
}

/// Keeps every event in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ShimEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ShimEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take(&self) -> Vec<ShimEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: ShimEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

type Observers = RwLock<BTreeMap<u64, Arc<dyn EventSink>>>;

/// Forwards every event to each attached observer, in attach order.
#[derive(Default)]
pub struct FanoutSink {
    observers: Arc<Observers>,
    next_id: AtomicU64,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, observer: Arc<dyn EventSink>) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, observer);
        ObserverHandle {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Attach a closure as an observer.
    pub fn attach_fn<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&ShimEvent) + Send + Sync + 'static,
    {
        self.attach(Arc::new(FnSink(observer)))
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: ShimEvent) {
        // Observers may attach or detach from inside `emit`.
        let observers: Vec<Arc<dyn EventSink>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for observer in observers {
            observer.emit(event.clone());
        }
    }
}

struct FnSink<F>(F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(&ShimEvent) + Send + Sync,
{
    fn emit(&self, event: ShimEvent) {
        (self.0)(&event);
    }
}

/// Keeps one observer attached to a [`FanoutSink`]; dropping it detaches.
#[must_use = "dropping the handle detaches the observer"]
#[derive(Debug)]
pub struct ObserverHandle {
    id: u64,
    observers: Weak<Observers>,
}

impl ObserverHandle {
    pub fn detach(self) {}
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}
