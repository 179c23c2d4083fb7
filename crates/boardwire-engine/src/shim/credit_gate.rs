//! Credit-based gate for external backpressure.
//!
//! Each item spends `creditsPerItem`. Without enough credits the gate
//! reports outstanding demand and then queues, drops, or rejects according
//! to `onNoCredits`. Queued items leave in arrival order as credits come in.

use boardwire_kernel::{CreditGateConfig, LimitMode, QueueOrder};

use super::{Admission, Demand, PendingQueue, Shim, ShimContext, ShimItem, TicketId};
use crate::error::ShimError;
use crate::sink::ShimEvent;

pub struct CreditGate {
    config: CreditGateConfig,
    credits: u64,
    queue: PendingQueue,
}

impl CreditGate {
    pub fn new(config: CreditGateConfig, default_queue_capacity: usize) -> Result<Self, ShimError> {
        config.validate().map_err(ShimError::Config)?;
        let capacity = config.queue_capacity.unwrap_or(default_queue_capacity);
        Ok(Self {
            credits: config.initial_credits,
            queue: PendingQueue::new(capacity, QueueOrder::Fifo),
            config,
        })
    }

    pub fn credits(&self) -> u64 {
        self.credits
    }

    fn report_demand(&self, cx: &ShimContext<'_>) {
        let demand = Demand {
            requested: self.config.credits_per_item,
            queued: self.queue.len() as u64 * self.config.credits_per_item,
        };
        cx.sink.emit(ShimEvent::Demand {
            node: cx.node.clone(),
            requested: demand.requested,
            queued: demand.queued,
        });
        if let Some(on_demand) = cx.on_demand {
            on_demand(cx.node, demand);
        }
    }
}

impl Shim for CreditGate {
    fn kind(&self) -> &str {
        "creditGate"
    }

    fn admit(&mut self, item: ShimItem, cx: &ShimContext<'_>) -> Admission {
        let cost = self.config.credits_per_item;
        if self.queue.is_empty() && self.credits >= cost {
            self.credits -= cost;
            return Admission::Pass(item);
        }

        self.report_demand(cx);
        let ticket = item.ticket;
        match self.config.on_no_credits {
            LimitMode::Queue => match self.queue.push(item) {
                Ok(depth) => {
                    cx.sink.emit(ShimEvent::Queued {
                        node: cx.node.clone(),
                        ticket,
                        depth,
                    });
                    Admission::Queued(ticket)
                }
                Err(_) => {
                    cx.sink.emit(ShimEvent::Dropped {
                        node: cx.node.clone(),
                        ticket: Some(ticket),
                        reason: "credit queue full".to_string(),
                    });
                    Admission::Dropped("credit queue full".to_string())
                }
            },
            LimitMode::Drop => {
                cx.sink.emit(ShimEvent::Dropped {
                    node: cx.node.clone(),
                    ticket: Some(ticket),
                    reason: "no credits".to_string(),
                });
                Admission::Dropped("no credits".to_string())
            }
            LimitMode::Error => {
                let err = ShimError::NoCredits {
                    node: cx.node.clone(),
                    required: cost,
                    available: self.credits,
                };
                cx.sink.emit(ShimEvent::Rejected {
                    node: cx.node.clone(),
                    reason: err.to_string(),
                });
                Admission::Rejected(err)
            }
        }
    }

    fn receive_credits(
        &mut self,
        credits: u64,
        cx: &ShimContext<'_>,
    ) -> Result<Vec<ShimItem>, ShimError> {
        self.credits = self
            .credits
            .saturating_add(credits)
            .min(self.config.max_credits);
        let cost = self.config.credits_per_item;
        let mut released = Vec::new();
        while !self.queue.is_empty() && self.credits >= cost {
            if let Some(item) = self.queue.pop() {
                self.credits -= cost;
                cx.sink.emit(ShimEvent::Released {
                    node: cx.node.clone(),
                    ticket: item.ticket,
                });
                released.push(item);
            }
        }
        Ok(released)
    }

    fn reset(&mut self, cx: &ShimContext<'_>) -> Vec<TicketId> {
        let failed: Vec<TicketId> = self.queue.drain().into_iter().map(|i| i.ticket).collect();
        cx.sink.emit(ShimEvent::Reset {
            node: cx.node.clone(),
            failed: failed.len(),
        });
        failed
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}
