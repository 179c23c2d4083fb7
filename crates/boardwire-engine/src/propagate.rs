//! The propagation engine.
//!
//! One pulse drains a FIFO work queue of two task kinds: joining a value
//! into a contact, and firing a node. A join that changes a contact
//! enqueues one write per outgoing connection (targets in contact id order)
//! and a fire for every node reading the contact (node id order, at most
//! one queued fire per node). Nodes fire only when every input holds a
//! value and one of them changed since the last firing. A gadget that fails
//! is skipped for the pulse; everything else keeps converging.
//!
//! A pulse that processes `iterationCap` tasks without emptying the queue
//! ends in `NonConvergence`. Values committed until then stay.

use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};

use boardwire_kernel::{ContactId, NodeId, PinId};
use boardwire_lattice::LatticeValue;

use crate::error::EngineError;
use crate::gadget::{GadgetEffect, PinValues};
use crate::network::{Behavior, Network};
use crate::shim::{Admission, Completion, Outcome, ShimContext, ShimItem, TicketId};
use crate::sink::ShimEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GadgetFailure {
    pub node: NodeId,
    pub message: String,
}

/// What one pulse did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationReport {
    pub pulse: u64,
    /// Tasks processed, seeds included.
    pub tasks: usize,
    /// Tasks enqueued by the pulse itself.
    pub enqueued: usize,
    pub changed: BTreeSet<ContactId>,
    /// Nodes in firing order.
    pub fired: Vec<NodeId>,
    pub failures: Vec<GadgetFailure>,
    pub queued: Vec<TicketId>,
    pub released: Vec<TicketId>,
    pub dropped: usize,
    pub rejected: Vec<String>,
}

impl PropagationReport {
    pub fn is_quiet(&self) -> bool {
        self.changed.is_empty()
    }
}

#[derive(Debug)]
enum Task {
    Write {
        contact: ContactId,
        value: LatticeValue,
    },
    Fire {
        node: NodeId,
    },
}

impl Network {
    /// Push `value` into `contact` and run the pulse to quiescence.
    pub fn propagate(
        &mut self,
        contact: &ContactId,
        value: LatticeValue,
    ) -> Result<PropagationReport, EngineError> {
        if !self.contacts.contains(contact) {
            return Err(EngineError::ContactNotFound(contact.clone()));
        }
        self.run(VecDeque::from([Task::Write {
            contact: contact.clone(),
            value,
        }]))
    }

    /// Push several values as one pulse, in the given order.
    pub fn propagate_all(
        &mut self,
        values: impl IntoIterator<Item = (ContactId, LatticeValue)>,
    ) -> Result<PropagationReport, EngineError> {
        let mut seeds = VecDeque::new();
        for (contact, value) in values {
            if !self.contacts.contains(&contact) {
                return Err(EngineError::ContactNotFound(contact));
            }
            seeds.push_back(Task::Write { contact, value });
        }
        self.run(seeds)
    }

    /// Release whatever rate limiters can now let through.
    pub fn pump(&mut self) -> Result<PropagationReport, EngineError> {
        let now = self.clock.now();
        let mut seeds = VecDeque::new();
        let mut released = Vec::new();
        for (id, rt) in self.nodes.iter_mut() {
            if let Behavior::Shim(shim) = &mut rt.behavior {
                let cx = ShimContext {
                    node: id,
                    now,
                    sink: self.sink.as_ref(),
                    on_demand: self.on_demand.as_ref(),
                };
                let items = shim.pump(&cx);
                release(id, &rt.outputs, items, &mut seeds, &mut self.completions, &mut released);
            }
        }
        let mut report = self.run(seeds)?;
        report.released = released;
        Ok(report)
    }

    /// Top up a credit gate and propagate the items it releases.
    pub fn receive_credits(
        &mut self,
        node: &NodeId,
        credits: u64,
    ) -> Result<PropagationReport, EngineError> {
        let now = self.clock.now();
        let rt = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| EngineError::NodeNotFound(node.clone()))?;
        let Behavior::Shim(shim) = &mut rt.behavior else {
            return Err(EngineError::Realize(format!("{node} is not a shim")));
        };
        let cx = ShimContext {
            node,
            now,
            sink: self.sink.as_ref(),
            on_demand: self.on_demand.as_ref(),
        };
        let items = shim.receive_credits(credits, &cx)?;
        let mut seeds = VecDeque::new();
        let mut released = Vec::new();
        release(node, &rt.outputs, items, &mut seeds, &mut self.completions, &mut released);
        let mut report = self.run(seeds)?;
        report.released = released;
        Ok(report)
    }

    /// Fail every item queued in a shim. Each ticket completes exactly once.
    pub fn reset_shim(&mut self, node: &NodeId) -> Result<Vec<TicketId>, EngineError> {
        let now = self.clock.now();
        let rt = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| EngineError::NodeNotFound(node.clone()))?;
        let Behavior::Shim(shim) = &mut rt.behavior else {
            return Err(EngineError::Realize(format!("{node} is not a shim")));
        };
        let cx = ShimContext {
            node,
            now,
            sink: self.sink.as_ref(),
            on_demand: self.on_demand.as_ref(),
        };
        let failed = shim.reset(&cx);
        self.completions
            .extend(failed.iter().map(|ticket| Completion {
                node: node.clone(),
                ticket: *ticket,
                outcome: Outcome::Failed("reset".to_string()),
            }));
        Ok(failed)
    }

    /// Tear the network down. Every item still queued in a shim fails with
    /// `shutdown`; the result holds those completions after any not yet
    /// drained.
    pub fn shutdown(mut self) -> Vec<Completion> {
        let failed = self.fail_all_pending("shutdown");
        let mut completions = std::mem::take(&mut self.completions);
        completions.extend(failed);
        completions
    }

    /// Reset every shim that still holds items, in node id order.
    pub(crate) fn fail_all_pending(&mut self, reason: &str) -> Vec<Completion> {
        let now = self.clock.now();
        let mut completions = Vec::new();
        for (node, rt) in self.nodes.iter_mut() {
            let Behavior::Shim(shim) = &mut rt.behavior else {
                continue;
            };
            if shim.pending() == 0 {
                continue;
            }
            let cx = ShimContext {
                node,
                now,
                sink: self.sink.as_ref(),
                on_demand: self.on_demand.as_ref(),
            };
            completions.extend(shim.reset(&cx).into_iter().map(|ticket| Completion {
                node: node.clone(),
                ticket,
                outcome: Outcome::Failed(reason.to_string()),
            }));
        }
        completions
    }

    fn run(&mut self, mut queue: VecDeque<Task>) -> Result<PropagationReport, EngineError> {
        self.pulse += 1;
        let mut report = PropagationReport {
            pulse: self.pulse,
            ..PropagationReport::default()
        };
        let cap = self.config.iteration_cap;
        let mut queued_fires: BTreeSet<NodeId> = BTreeSet::new();

        while let Some(task) = queue.pop_front() {
            if report.tasks >= cap {
                let abandoned = queue.len() + 1;
                tracing::warn!(
                    board = %self.board,
                    pulse = self.pulse,
                    cap,
                    abandoned,
                    "propagation did not converge"
                );
                return Err(EngineError::NonConvergence { cap, abandoned });
            }
            report.tasks += 1;
            match task {
                Task::Write { contact, value } => {
                    self.write(&contact, &value, &mut queue, &mut queued_fires, &mut report)?;
                }
                Task::Fire { node } => {
                    queued_fires.remove(&node);
                    self.fire(&node, &mut queue, &mut report)?;
                }
            }
        }

        tracing::debug!(
            board = %self.board,
            pulse = report.pulse,
            tasks = report.tasks,
            changed = report.changed.len(),
            fired = report.fired.len(),
            "pulse settled"
        );
        Ok(report)
    }

    fn write(
        &mut self,
        contact: &ContactId,
        value: &LatticeValue,
        queue: &mut VecDeque<Task>,
        queued_fires: &mut BTreeSet<NodeId>,
        report: &mut PropagationReport,
    ) -> Result<(), EngineError> {
        let Some(new) = self.contacts.join(contact, value)? else {
            return Ok(());
        };
        report.changed.insert(contact.clone());

        for target in self.connections.get(contact).into_iter().flatten() {
            queue.push_back(Task::Write {
                contact: target.clone(),
                value: new.clone(),
            });
            report.enqueued += 1;
        }
        for node in self.readers.get(contact).into_iter().flatten() {
            if let Some(rt) = self.nodes.get_mut(node) {
                rt.dirty = true;
            }
            if queued_fires.insert(node.clone()) {
                queue.push_back(Task::Fire { node: node.clone() });
                report.enqueued += 1;
            }
        }
        Ok(())
    }

    fn fire(
        &mut self,
        node: &NodeId,
        queue: &mut VecDeque<Task>,
        report: &mut PropagationReport,
    ) -> Result<(), EngineError> {
        let rt = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| EngineError::NodeNotFound(node.clone()))?;
        if !rt.dirty {
            return Ok(());
        }
        let mut inputs = PinValues::new();
        for (pin, contact) in &rt.inputs {
            match self.contacts.value(contact) {
                Some(value) => {
                    inputs.insert(pin.clone(), value.clone());
                }
                None => return Ok(()),
            }
        }
        rt.dirty = false;
        rt.fires += 1;
        report.fired.push(node.clone());

        match &mut rt.behavior {
            Behavior::Gadget(gadget) => {
                let writes = gadget.compute(&inputs).map_err(|e| e.0).and_then(|outputs| {
                    outputs
                        .into_iter()
                        .map(|(pin, value)| {
                            let contact = output_contact(&rt.outputs, &pin)
                                .ok_or_else(|| format!("no output pin {pin}"))?;
                            match self.contacts.get(contact) {
                                Some(c) if c.lattice.accepts(&value) => {
                                    Ok((pin, contact.clone(), value))
                                }
                                _ => Err(format!("pin {pin} cannot hold {value}")),
                            }
                        })
                        .collect::<Result<Vec<_>, String>>()
                });
                let custom = gadget.take_effects();
                let mut effects = Vec::new();
                if let Ok(writes) = &writes {
                    effects.extend(
                        writes
                            .iter()
                            .filter(|(_, contact, value)| {
                                self.contacts
                                    .get(contact)
                                    .is_some_and(|c| c.would_change(value))
                            })
                            .map(|(pin, _, value)| GadgetEffect::Changed {
                                pin: pin.clone(),
                                value: value.clone(),
                            }),
                    );
                    if effects.is_empty() {
                        effects.push(GadgetEffect::Noop);
                    }
                }
                for effect in effects.into_iter().chain(custom) {
                    self.sink.emit(ShimEvent::Effect {
                        node: node.clone(),
                        effect,
                    });
                }
                match writes {
                    Ok(writes) => {
                        for (_, contact, value) in writes {
                            queue.push_back(Task::Write { contact, value });
                            report.enqueued += 1;
                        }
                    }
                    Err(message) => {
                        tracing::warn!(board = %self.board, node = %node, error = %message, "gadget failed");
                        report.failures.push(GadgetFailure {
                            node: node.clone(),
                            message,
                        });
                    }
                }
            }
            Behavior::Shim(shim) => {
                let Some(value) = inputs.into_values().next() else {
                    return Ok(());
                };
                self.next_ticket += 1;
                let item = ShimItem {
                    ticket: TicketId::new(self.next_ticket),
                    pulse: self.pulse,
                    value,
                };
                let cx = ShimContext {
                    node,
                    now: self.clock.now(),
                    sink: self.sink.as_ref(),
                    on_demand: self.on_demand.as_ref(),
                };
                match shim.admit(item, &cx) {
                    Admission::Pass(item) => {
                        if let Some((_, out)) = rt.outputs.first() {
                            queue.push_back(Task::Write {
                                contact: out.clone(),
                                value: item.value,
                            });
                            report.enqueued += 1;
                        }
                    }
                    Admission::Queued(ticket) => report.queued.push(ticket),
                    Admission::Dropped(_) => report.dropped += 1,
                    Admission::Rejected(err) => report.rejected.push(err.to_string()),
                }
            }
        }
        Ok(())
    }
}

fn output_contact<'a>(outputs: &'a [(PinId, ContactId)], pin: &PinId) -> Option<&'a ContactId> {
    outputs.iter().find(|(p, _)| p == pin).map(|(_, c)| c)
}

/// Turn released shim items into seed writes on the shim's output and
/// record their completion.
fn release(
    node: &NodeId,
    outputs: &[(PinId, ContactId)],
    items: Vec<ShimItem>,
    seeds: &mut VecDeque<Task>,
    completions: &mut Vec<Completion>,
    released: &mut Vec<TicketId>,
) {
    for item in items {
        completions.push(Completion {
            node: node.clone(),
            ticket: item.ticket,
            outcome: Outcome::Delivered,
        });
        released.push(item.ticket);
        if let Some((_, out)) = outputs.first() {
            seeds.push_back(Task::Write {
                contact: out.clone(),
                value: item.value,
            });
        }
    }
}
