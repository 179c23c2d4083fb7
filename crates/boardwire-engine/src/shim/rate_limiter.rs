//! Token-bucket rate limiter.
//!
//! Tokens are kept in thousandths: `elapsed_ms * rps` thousandths are added
//! per refill, capped at `burst * 1000`. The fraction of a thousandth left
//! over is carried into the next refill, so frequent refills at a low rate
//! still add up. The bucket starts full.

use chrono::{DateTime, Utc};

use boardwire_kernel::{LimitMode, RateLimitConfig};

use super::{Admission, PendingQueue, Shim, ShimContext, ShimItem, TicketId};
use crate::error::ShimError;
use crate::sink::ShimEvent;

const SCALE: u64 = 1_000;

pub struct RateLimiter {
    config: RateLimitConfig,
    millitokens: u64,
    /// Uncredited fraction of a millitoken, in `[0, 1)`.
    carry: f64,
    last_refill: Option<DateTime<Utc>>,
    queue: PendingQueue,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, default_queue_capacity: usize) -> Result<Self, ShimError> {
        config.policy().map_err(ShimError::Config)?;
        let capacity = config.queue_capacity.unwrap_or(default_queue_capacity);
        Ok(Self {
            millitokens: u64::from(config.burst) * SCALE,
            carry: 0.0,
            last_refill: None,
            queue: PendingQueue::new(capacity, config.queue_order),
            config,
        })
    }

    /// Whole tokens currently available, without refilling.
    pub fn available_tokens(&self) -> u64 {
        self.millitokens / SCALE
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn refill(&mut self, now: DateTime<Utc>) {
        let Some(last) = self.last_refill else {
            self.last_refill = Some(now);
            return;
        };
        let elapsed_ms = (now - last).num_milliseconds();
        if elapsed_ms <= 0 {
            return;
        }
        self.last_refill = Some(now);
        let max = u64::from(self.config.burst) * SCALE;
        if self.millitokens >= max {
            self.carry = 0.0;
            return;
        }
        let exact = elapsed_ms as f64 * self.config.rps + self.carry;
        let added = exact.floor();
        self.carry = exact - added;
        self.millitokens = self.millitokens.saturating_add(added as u64).min(max);
        if self.millitokens >= max {
            self.carry = 0.0;
        }
    }

    fn try_take(&mut self) -> bool {
        if self.millitokens < SCALE {
            return false;
        }
        self.millitokens -= SCALE;
        true
    }

    fn enqueue(&mut self, item: ShimItem, cx: &ShimContext<'_>) -> Admission {
        let ticket = item.ticket;
        match self.queue.push(item) {
            Ok(depth) => {
                cx.sink.emit(ShimEvent::Queued {
                    node: cx.node.clone(),
                    ticket,
                    depth,
                });
                Admission::Queued(ticket)
            }
            Err(_) => drop_item(cx, ticket, "rate limit queue full"),
        }
    }
}

fn drop_item(cx: &ShimContext<'_>, ticket: TicketId, reason: &str) -> Admission {
    cx.sink.emit(ShimEvent::Dropped {
        node: cx.node.clone(),
        ticket: Some(ticket),
        reason: reason.to_string(),
    });
    Admission::Dropped(reason.to_string())
}

impl Shim for RateLimiter {
    fn kind(&self) -> &str {
        "rateLimit"
    }

    fn admit(&mut self, item: ShimItem, cx: &ShimContext<'_>) -> Admission {
        self.refill(cx.now);
        // Earlier queued items keep their place.
        if self.config.on_limit == LimitMode::Queue && !self.queue.is_empty() {
            return self.enqueue(item, cx);
        }
        if self.try_take() {
            return Admission::Pass(item);
        }
        match self.config.on_limit {
            LimitMode::Queue => self.enqueue(item, cx),
            LimitMode::Drop => drop_item(cx, item.ticket, "rate limited"),
            LimitMode::Error => {
                cx.sink.emit(ShimEvent::Rejected {
                    node: cx.node.clone(),
                    reason: "rate limited".to_string(),
                });
                Admission::Rejected(ShimError::RateLimited {
                    node: cx.node.clone(),
                })
            }
        }
    }

    fn pump(&mut self, cx: &ShimContext<'_>) -> Vec<ShimItem> {
        self.refill(cx.now);
        let mut released = Vec::new();
        while !self.queue.is_empty() && self.try_take() {
            if let Some(item) = self.queue.pop() {
                cx.sink.emit(ShimEvent::Released {
                    node: cx.node.clone(),
                    ticket: item.ticket,
                });
                released.push(item);
            }
        }
        released
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shim::testing::{cx, item, node, t0};
    use crate::sink::MemorySink;
    use boardwire_kernel::QueueOrder;
    use chrono::Duration;

    fn limiter(on_limit: LimitMode, queue_order: QueueOrder, cap: usize) -> RateLimiter {
        RateLimiter::new(
            RateLimitConfig {
                rps: 2.0,
                burst: 1,
                on_limit,
                queue_capacity: Some(cap),
                queue_order,
            },
            64,
        )
        .unwrap()
    }

    fn released(items: Vec<ShimItem>) -> Vec<u64> {
        items.into_iter().map(|i| i.ticket.get()).collect()
    }

    #[test]
    fn burst_passes_then_queue_refills_fifo() {
        let mut rl = limiter(LimitMode::Queue, QueueOrder::Fifo, 2);
        let sink = MemorySink::new();
        let node = node();
        let now = t0();
        assert!(matches!(rl.admit(item(1, 1), &cx(&node, now, &sink)), Admission::Pass(_)));
        assert_eq!(rl.admit(item(2, 2), &cx(&node, now, &sink)), Admission::Queued(TicketId::new(2)));
        assert_eq!(rl.admit(item(3, 3), &cx(&node, now, &sink)), Admission::Queued(TicketId::new(3)));
        assert!(matches!(rl.admit(item(4, 4), &cx(&node, now, &sink)), Admission::Dropped(_)));
        assert_eq!(rl.pending(), 2);

        // 2 rps: one token every 500ms.
        assert!(rl.pump(&cx(&node, now + Duration::milliseconds(200), &sink)).is_empty());
        let out = rl.pump(&cx(&node, now + Duration::milliseconds(500), &sink));
        assert_eq!(released(out), [2]);
        let out = rl.pump(&cx(&node, now + Duration::milliseconds(5_000), &sink));
        assert_eq!(released(out), [3]);
        assert_eq!(rl.pending(), 0);
        assert_eq!(rl.available_tokens(), 0);
    }

    #[test]
    fn lifo_releases_newest_first() {
        let mut rl = limiter(LimitMode::Queue, QueueOrder::Lifo, 4);
        let sink = MemorySink::new();
        let node = node();
        let now = t0();
        for t in 1..=3 {
            rl.admit(item(t, 0), &cx(&node, now, &sink));
        }
        let out = rl.pump(&cx(&node, now + Duration::seconds(1), &sink));
        assert_eq!(released(out), [3]);
        let out = rl.pump(&cx(&node, now + Duration::seconds(2), &sink));
        assert_eq!(released(out), [2]);
    }

    #[test]
    fn drop_and_error_modes() {
        let sink = MemorySink::new();
        let node = node();
        let now = t0();

        let mut dropping = limiter(LimitMode::Drop, QueueOrder::Fifo, 4);
        dropping.admit(item(1, 0), &cx(&node, now, &sink));
        assert!(matches!(dropping.admit(item(2, 0), &cx(&node, now, &sink)), Admission::Dropped(_)));
        assert_eq!(dropping.pending(), 0);

        let mut erroring = limiter(LimitMode::Error, QueueOrder::Fifo, 4);
        erroring.admit(item(1, 0), &cx(&node, now, &sink));
        assert_eq!(
            erroring.admit(item(2, 0), &cx(&node, now, &sink)),
            Admission::Rejected(ShimError::RateLimited { node: node.clone() })
        );
    }

    #[test]
    fn slow_rates_accumulate_across_frequent_pumps() {
        let mut rl = RateLimiter::new(
            RateLimitConfig {
                rps: 0.5,
                burst: 1,
                on_limit: LimitMode::Queue,
                queue_capacity: Some(4),
                queue_order: QueueOrder::Fifo,
            },
            64,
        )
        .unwrap();
        let sink = MemorySink::new();
        let node = node();
        let start = t0();
        assert!(matches!(rl.admit(item(1, 0), &cx(&node, start, &sink)), Admission::Pass(_)));
        assert_eq!(rl.admit(item(2, 0), &cx(&node, start, &sink)), Admission::Queued(TicketId::new(2)));

        let mut released_at = None;
        for ms in 1..=10_000 {
            let out = rl.pump(&cx(&node, start + Duration::milliseconds(ms), &sink));
            if !out.is_empty() {
                released_at = Some(ms);
                break;
            }
        }
        assert_eq!(released_at, Some(2_000));
    }

    #[test]
    fn fractional_rates_keep_their_throughput() {
        let mut rl = RateLimiter::new(
            RateLimitConfig {
                rps: 1.5,
                burst: 1,
                on_limit: LimitMode::Queue,
                queue_capacity: Some(64),
                queue_order: QueueOrder::Fifo,
            },
            64,
        )
        .unwrap();
        let sink = MemorySink::new();
        let node = node();
        let start = t0();
        for t in 1..=40 {
            rl.admit(item(t, 0), &cx(&node, start, &sink));
        }
        let mut released = 0;
        for ms in (3..=10_002).step_by(3) {
            released += rl.pump(&cx(&node, start + Duration::milliseconds(ms), &sink)).len();
        }
        // 1.5 rps over ten seconds.
        assert_eq!(released, 15);
    }

    #[test]
    fn reset_fails_every_queued_ticket() {
        let mut rl = limiter(LimitMode::Queue, QueueOrder::Fifo, 4);
        let sink = MemorySink::new();
        let node = node();
        for t in 1..=3 {
            rl.admit(item(t, 0), &cx(&node, t0(), &sink));
        }
        let failed = rl.reset(&cx(&node, t0(), &sink));
        assert_eq!(failed, [TicketId::new(2), TicketId::new(3)]);
        assert!(rl.reset(&cx(&node, t0(), &sink)).is_empty());
    }
}
