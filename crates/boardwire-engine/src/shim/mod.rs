//! Flow-control shims.
//!
//! A shim sits on a realized wire between two contacts. Every value that
//! reaches its `in` contact is offered as a [`ShimItem`]; the shim either
//! passes it on, queues it under a [`TicketId`], drops it, or rejects it.
//! Queued items leave only through an explicit call (`pump`,
//! `receive_credits`) or fail together on `reset`.

pub mod credit_gate;
pub mod rate_limiter;
pub mod tap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use boardwire_kernel::{AspectConfig, NodeId, QueueOrder};
use boardwire_lattice::LatticeValue;

use crate::error::ShimError;
use crate::sink::EventSink;

pub use credit_gate::CreditGate;
pub use rate_limiter::RateLimiter;
pub use tap::{Tap, TapCallback, TapHooks, TapPredicate, TapRecord};

/// Handle for one queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TicketId(u64);

impl TicketId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShimItem {
    pub ticket: TicketId,
    pub pulse: u64,
    pub value: LatticeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Pass(ShimItem),
    Queued(TicketId),
    Dropped(String),
    Rejected(ShimError),
}

/// How a queued item ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "camelCase")]
pub enum Outcome {
    Delivered,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub node: NodeId,
    pub ticket: TicketId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Outstanding credit demand at a gate, in credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demand {
    pub requested: u64,
    pub queued: u64,
}

impl Demand {
    pub fn total(self) -> u64 {
        self.requested.saturating_add(self.queued)
    }
}

pub type DemandCallback = Arc<dyn Fn(&NodeId, Demand) + Send + Sync>;

/// What a shim may see while handling one call.
pub struct ShimContext<'a> {
    pub node: &'a NodeId,
    pub now: DateTime<Utc>,
    pub sink: &'a dyn EventSink,
    pub on_demand: Option<&'a DemandCallback>,
}

pub trait Shim: Send {
    fn kind(&self) -> &str;

    fn admit(&mut self, item: ShimItem, cx: &ShimContext<'_>) -> Admission;

    /// Release queued items whose turn has come.
    fn pump(&mut self, _cx: &ShimContext<'_>) -> Vec<ShimItem> {
        Vec::new()
    }

    fn receive_credits(
        &mut self,
        _credits: u64,
        cx: &ShimContext<'_>,
    ) -> Result<Vec<ShimItem>, ShimError> {
        Err(ShimError::Unsupported {
            node: cx.node.clone(),
            kind: self.kind().to_string(),
            operation: "receive_credits",
        })
    }

    /// Fail every queued item; returns their tickets in queue order.
    fn reset(&mut self, _cx: &ShimContext<'_>) -> Vec<TicketId> {
        Vec::new()
    }

    fn pending(&self) -> usize {
        0
    }

    fn tap_records(&self) -> Vec<TapRecord> {
        Vec::new()
    }
}

/// Build the shim for a lowered aspect config.
pub fn build(
    config: &AspectConfig,
    tap_buffer_capacity: usize,
    default_queue_capacity: usize,
    hooks: &TapHooks,
) -> Result<Box<dyn Shim>, ShimError> {
    Ok(match config {
        AspectConfig::Tap(tap) => Box::new(Tap::new(tap.clone(), tap_buffer_capacity, hooks)?),
        AspectConfig::RateLimit(limit) => {
            Box::new(RateLimiter::new(limit.clone(), default_queue_capacity)?)
        }
        AspectConfig::CreditGate(gate) => {
            Box::new(CreditGate::new(gate.clone(), default_queue_capacity)?)
        }
        AspectConfig::External { name, .. } => {
            return Err(ShimError::Config(format!(
                "external aspect {name} needs a registered shim factory"
            )));
        }
    })
}

/// Bounded queue shared by the rate limiter and the credit gate.
#[derive(Debug)]
pub(crate) struct PendingQueue {
    items: VecDeque<ShimItem>,
    capacity: usize,
    order: QueueOrder,
}

impl PendingQueue {
    pub(crate) fn new(capacity: usize, order: QueueOrder) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            order,
        }
    }

    /// Queue `item`, handing it back when the queue is full.
    pub(crate) fn push(&mut self, item: ShimItem) -> Result<usize, ShimItem> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(self.items.len())
    }

    pub(crate) fn pop(&mut self) -> Option<ShimItem> {
        match self.order {
            QueueOrder::Fifo => self.items.pop_front(),
            QueueOrder::Lifo => self.items.pop_back(),
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<ShimItem> {
        self.items.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
