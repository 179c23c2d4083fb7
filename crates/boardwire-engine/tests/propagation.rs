//! Propagation over boards built through the binder.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use boardwire_engine::{
    Completion, Demand, DemandCallback, EngineConfig, EngineError, FanoutSink, Gadget,
    GadgetEffect, GadgetError, GadgetFactory, GadgetLibrary, ManualClock, MemorySink, Network,
    Outcome, PinValues, ShimEvent, TicketId,
};
use boardwire_kernel::{
    AspectRegistry, Binder, BoardId, NodeId, PinId, RealizedGraph, RealizedNode,
};
use boardwire_lattice::{LatticeCatalog, LatticeValue};

async fn realize_board(ops: Value) -> Arc<RealizedGraph> {
    let binder = Binder::new(
        BoardId::new("engine").unwrap(),
        Arc::new(AspectRegistry::with_builtins()),
        Arc::new(LatticeCatalog::with_builtins()),
    )
    .unwrap();
    let receipt = binder.apply_json(json!({"by": "ops", "ops": ops})).await;
    assert!(receipt.is_ok(), "{receipt:?}");
    binder.realized()
}

fn network_with(graph: &RealizedGraph, library: &GadgetLibrary, config: EngineConfig) -> Network {
    Network::realize(graph, &LatticeCatalog::with_builtins(), library, config)
        .unwrap_or_else(|e| panic!("realize failed: {e}"))
}

fn network(graph: &RealizedGraph) -> Network {
    network_with(graph, &GadgetLibrary::with_primitives(), EngineConfig::default())
}

fn int_pins(names: &[&str]) -> Vec<Value> {
    names
        .iter()
        .map(|p| json!({"pin": p, "lattice": "maxInt"}))
        .collect()
}

fn spec(kind: &str, pinout: &str, inputs: &[&str]) -> Value {
    json!({
        "kind": kind,
        "pinouts": [pinout],
        "inputs": int_pins(inputs),
        "outputs": int_pins(&["out"]),
    })
}

fn slot_wire(id: &str, from: &str, to: &str, pin: &str) -> Value {
    json!({"op": "addWire", "wire": id, "spec": {
        "from": {"slot": from, "pin": "out"},
        "to": {"slot": to, "pin": pin}
    }})
}

fn int(v: i64) -> LatticeValue {
    LatticeValue::Int(v)
}

fn node(id: &str) -> NodeId {
    NodeId::new(id).unwrap()
}

/// `(a + b) * c`, plus an `echo` identity that only reads `c`.
async fn arithmetic_board() -> Arc<RealizedGraph> {
    let mut ops = vec![
        json!({"op": "declareSlot", "slot": "sum", "pinout": "binary"}),
        json!({"op": "declareSlot", "slot": "prod", "pinout": "binary"}),
        json!({"op": "declareSlot", "slot": "echo", "pinout": "unary"}),
        json!({"op": "mount", "slot": "sum", "gadget": "add1", "spec": spec("add", "binary", &["x", "y"])}),
        json!({"op": "mount", "slot": "prod", "gadget": "mul1", "spec": spec("multiply", "binary", &["x", "y"])}),
        json!({"op": "mount", "slot": "echo", "gadget": "id1", "spec": spec("identity", "unary", &["x"])}),
    ];
    for cell in ["a", "b", "c"] {
        ops.push(json!({"op": "declareSlot", "slot": cell, "pinout": "unary"}));
        ops.push(json!({"op": "mount", "slot": cell, "gadget": format!("g{cell}"), "spec": spec("cell", "unary", &[])}));
    }
    ops.extend([
        slot_wire("w1", "a", "sum", "x"),
        slot_wire("w2", "b", "sum", "y"),
        slot_wire("w3", "sum", "prod", "x"),
        slot_wire("w4", "c", "prod", "y"),
        slot_wire("w5", "c", "echo", "x"),
    ]);
    realize_board(Value::Array(ops)).await
}

#[tokio::test]
async fn arithmetic_board_reaches_fixpoint_and_refires_only_affected_gadgets() {
    let graph = arithmetic_board().await;
    let mut net = network(&graph);
    let a = net.contact("n:a/ga", "out").unwrap();
    let b = net.contact("n:b/gb", "out").unwrap();
    let c = net.contact("n:c/gc", "out").unwrap();
    let result = net.contact("n:prod/mul1", "out").unwrap();

    net.propagate(&a, int(2)).unwrap();
    net.propagate(&b, int(3)).unwrap();
    net.propagate(&c, int(4)).unwrap();
    assert_eq!(net.value(&result), Some(&int(20)));

    let (add, mul, echo) = (node("n:sum/add1"), node("n:prod/mul1"), node("n:echo/id1"));
    assert_eq!(net.fire_count(&add), Some(1));
    assert_eq!(net.fire_count(&mul), Some(1));
    assert_eq!(net.fire_count(&echo), Some(1));

    let report = net.propagate(&a, int(10)).unwrap();
    assert_eq!(report.fired, [add.clone(), mul.clone()]);
    // maxInt keeps the larger product: (10 + 3) * 4.
    assert_eq!(net.value(&result), Some(&int(52)));
    assert_eq!(net.fire_count(&echo), Some(1));
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn repeating_a_value_changes_nothing() {
    let graph = arithmetic_board().await;
    let mut net = network(&graph);
    let a = net.contact("n:a/ga", "out").unwrap();

    let first = net.propagate(&a, int(5)).unwrap();
    assert!(first.changed.contains(&a));
    assert!(first.enqueued > 0);

    let second = net.propagate(&a, int(5)).unwrap();
    assert!(second.is_quiet());
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.tasks, 1);
    assert_eq!(second.pulse, first.pulse + 1);
}

#[tokio::test]
async fn values_only_move_up() {
    let graph = arithmetic_board().await;
    let mut net = network(&graph);
    let a = net.contact("n:a/ga", "out").unwrap();
    for v in [3, 7, 2, 9] {
        net.propagate(&a, int(v)).unwrap();
    }
    assert_eq!(net.value(&a), Some(&int(9)));
    let sum_x = net.contact("n:sum/add1", "x").unwrap();
    assert_eq!(net.value(&sum_x), Some(&int(9)));
}

#[tokio::test]
async fn iteration_cap_abandons_the_rest_but_keeps_commits() {
    let graph = arithmetic_board().await;
    let config = EngineConfig {
        iteration_cap: 2,
        ..EngineConfig::default()
    };
    let mut net = network_with(&graph, &GadgetLibrary::with_primitives(), config);
    let a = net.contact("n:a/ga", "out").unwrap();
    let err = net.propagate(&a, int(2)).unwrap_err();
    assert!(matches!(err, EngineError::NonConvergence { cap: 2, .. }), "{err}");
    assert_eq!(net.value(&a), Some(&int(2)));
    let sum_x = net.contact("n:sum/add1", "x").unwrap();
    assert_eq!(net.value(&sum_x), Some(&int(2)));
}

struct Explode;

impl Gadget for Explode {
    fn compute(&mut self, _inputs: &PinValues) -> Result<PinValues, GadgetError> {
        Err(GadgetError("boom".to_string()))
    }
}

#[tokio::test]
async fn failing_gadgets_are_isolated() {
    let graph = realize_board(json!([
        {"op": "declareSlot", "slot": "src", "pinout": "unary"},
        {"op": "declareSlot", "slot": "bad", "pinout": "unary"},
        {"op": "declareSlot", "slot": "good", "pinout": "unary"},
        {"op": "mount", "slot": "src", "gadget": "s", "spec": spec("cell", "unary", &[])},
        {"op": "mount", "slot": "bad", "gadget": "x1", "spec": spec("explode", "unary", &["x"])},
        {"op": "mount", "slot": "good", "gadget": "i1", "spec": spec("identity", "unary", &["x"])},
        slot_wire("w1", "src", "bad", "x"),
        slot_wire("w2", "src", "good", "x")
    ]))
    .await;
    let mut library = GadgetLibrary::with_primitives();
    let explode: GadgetFactory =
        Arc::new(|_: &RealizedNode| -> Result<Box<dyn Gadget>, GadgetError> { Ok(Box::new(Explode)) });
    library.register("explode", explode).unwrap();

    let mut net = network_with(&graph, &library, EngineConfig::default());
    let src = net.contact("n:src/s", "out").unwrap();
    let report = net.propagate(&src, int(4)).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].node, node("n:bad/x1"));
    let good = net.contact("n:good/i1", "out").unwrap();
    assert_eq!(net.value(&good), Some(&int(4)));
}

#[tokio::test]
async fn unknown_gadget_kinds_fail_realization() {
    let graph = realize_board(json!([
        {"op": "declareSlot", "slot": "s", "pinout": "unary"},
        {"op": "mount", "slot": "s", "gadget": "g", "spec": spec("mystery", "unary", &[])}
    ]))
    .await;
    let err = Network::realize(
        &graph,
        &LatticeCatalog::with_builtins(),
        &GadgetLibrary::with_primitives(),
        EngineConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err, EngineError::UnknownGadgetKind("mystery".to_string()));
}

/// Emits `x / 10` and reports every input it saw.
#[derive(Default)]
struct Decimate {
    seen: Vec<GadgetEffect>,
}

impl Gadget for Decimate {
    fn compute(&mut self, inputs: &PinValues) -> Result<PinValues, GadgetError> {
        let x = inputs
            .values()
            .next()
            .and_then(LatticeValue::as_int)
            .ok_or_else(|| GadgetError("expected an integer".to_string()))?;
        self.seen.push(GadgetEffect::Custom {
            name: "seen".to_string(),
            payload: json!(x),
        });
        Ok([(PinId::new("out").unwrap(), int(x / 10))].into())
    }

    fn take_effects(&mut self) -> Vec<GadgetEffect> {
        std::mem::take(&mut self.seen)
    }
}

fn effects(sink: &MemorySink) -> Vec<GadgetEffect> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            ShimEvent::Effect { effect, .. } => Some(effect),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn gadget_effects_reach_every_attached_observer() {
    let graph = realize_board(json!([
        {"op": "declareSlot", "slot": "src", "pinout": "unary"},
        {"op": "declareSlot", "slot": "dec", "pinout": "unary"},
        {"op": "mount", "slot": "src", "gadget": "s", "spec": spec("cell", "unary", &[])},
        {"op": "mount", "slot": "dec", "gadget": "d1", "spec": spec("decimate", "unary", &["x"])},
        slot_wire("w", "src", "dec", "x")
    ]))
    .await;
    let mut library = GadgetLibrary::with_primitives();
    let decimate: GadgetFactory = Arc::new(|_: &RealizedNode| -> Result<Box<dyn Gadget>, GadgetError> {
        Ok(Box::new(Decimate::default()))
    });
    library.register("decimate", decimate).unwrap();

    let fanout = Arc::new(FanoutSink::new());
    let everything = Arc::new(MemorySink::new());
    let first_only = Arc::new(MemorySink::new());
    let _kept = fanout.attach(everything.clone());
    let detached = fanout.attach(first_only.clone());
    let mut net = network_with(&graph, &library, EngineConfig::default()).with_sink(fanout.clone());
    let src = net.contact("n:src/s", "out").unwrap();

    net.propagate(&src, int(4)).unwrap();
    drop(detached);
    net.propagate(&src, int(7)).unwrap();

    let seen = |x: i64| GadgetEffect::Custom {
        name: "seen".to_string(),
        payload: json!(x),
    };
    let raised = GadgetEffect::Changed {
        pin: PinId::new("out").unwrap(),
        value: int(0),
    };
    assert_eq!(effects(&first_only), [raised.clone(), seen(4)]);
    assert_eq!(
        effects(&everything),
        [raised, seen(4), GadgetEffect::Noop, seen(7)]
    );
    assert_eq!(fanout.observer_count(), 1);
}

#[tokio::test]
async fn slot_and_gadget_ids_with_slashes_realize_separately() {
    let graph = realize_board(json!([
        {"op": "declareSlot", "slot": "a/b", "pinout": "unary"},
        {"op": "declareSlot", "slot": "a", "pinout": "unary"},
        {"op": "mount", "slot": "a/b", "gadget": "c", "spec": spec("cell", "unary", &[])},
        {"op": "mount", "slot": "a", "gadget": "b/c", "spec": spec("identity", "unary", &["x"])},
        slot_wire("w", "a/b", "a", "x"),
    ]))
    .await;
    let mut net = network(&graph);
    let source = net.contact("n:a*sb/c", "out").unwrap();
    let echoed = net.contact("n:a/b*sc", "out").unwrap();
    assert_ne!(source, echoed);

    net.propagate(&source, int(7)).unwrap();
    assert_eq!(net.value(&echoed), Some(&int(7)));
}

/// `src` cell wired through one aspect into a `dst` identity.
async fn gated_board(aspect: Value) -> Arc<RealizedGraph> {
    realize_board(json!([
        {"op": "declareSlot", "slot": "src", "pinout": "unary"},
        {"op": "declareSlot", "slot": "dst", "pinout": "unary"},
        {"op": "mount", "slot": "src", "gadget": "s", "spec": spec("cell", "unary", &[])},
        {"op": "mount", "slot": "dst", "gadget": "d", "spec": spec("identity", "unary", &["x"])},
        {"op": "addWire", "wire": "w", "spec": {
            "from": {"slot": "src", "pin": "out"},
            "to": {"slot": "dst", "pin": "x"}
        }, "aspects": [aspect]}
    ]))
    .await
}

#[tokio::test]
async fn credit_gate_holds_items_until_credits_arrive() {
    let graph = gated_board(json!({"id": "creditGate@1", "params": {
        "initialCredits": 1, "maxCredits": 4, "onNoCredits": "queue"
    }}))
    .await;
    let sink = Arc::new(MemorySink::new());
    let demands = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&demands);
    let on_demand: DemandCallback = Arc::new(move |_: &NodeId, demand: Demand| {
        seen.lock().unwrap().push(demand.total());
    });
    let mut net = network(&graph).with_sink(sink.clone()).on_demand(on_demand);
    let gate = node("s:w/0:creditGate");
    let src = net.contact("n:src/s", "out").unwrap();
    let dst = net.contact("n:dst/d", "out").unwrap();

    net.propagate(&src, int(1)).unwrap();
    assert_eq!(net.value(&dst), Some(&int(1)));

    let second = net.propagate(&src, int(2)).unwrap();
    assert_eq!(second.queued, [TicketId::new(2)]);
    net.propagate(&src, int(3)).unwrap();
    assert_eq!(net.value(&dst), Some(&int(1)));
    assert_eq!(net.pending(&gate).unwrap(), 2);
    assert_eq!(*demands.lock().unwrap(), [1, 2]);

    let released = net.receive_credits(&gate, 1).unwrap();
    assert_eq!(released.released, [TicketId::new(2)]);
    assert_eq!(net.value(&dst), Some(&int(2)));
    net.receive_credits(&gate, 1).unwrap();
    assert_eq!(net.value(&dst), Some(&int(3)));

    let completions = net.drain_completions();
    assert_eq!(
        completions,
        [
            Completion {
                node: gate.clone(),
                ticket: TicketId::new(2),
                outcome: Outcome::Delivered
            },
            Completion {
                node: gate.clone(),
                ticket: TicketId::new(3),
                outcome: Outcome::Delivered
            },
        ]
    );
    assert!(
        sink.events()
            .iter()
            .any(|e| matches!(e, ShimEvent::Released { .. }))
    );
}

#[tokio::test]
async fn resetting_a_gate_fails_each_waiter_once() {
    let graph = gated_board(json!({"id": "creditGate@1", "params": {
        "initialCredits": 0, "maxCredits": 2
    }}))
    .await;
    let mut net = network(&graph);
    let gate = node("s:w/0:creditGate");
    let src = net.contact("n:src/s", "out").unwrap();
    net.propagate(&src, int(1)).unwrap();
    net.propagate(&src, int(2)).unwrap();

    let failed = net.reset_shim(&gate).unwrap();
    assert_eq!(failed, [TicketId::new(1), TicketId::new(2)]);
    assert!(net.reset_shim(&gate).unwrap().is_empty());

    let completions = net.drain_completions();
    assert_eq!(completions.len(), 2);
    assert!(completions
        .iter()
        .all(|c| c.outcome == Outcome::Failed("reset".to_string())));
    assert!(net.drain_completions().is_empty());

    // Nothing left to release.
    let after = net.receive_credits(&gate, 2).unwrap();
    assert!(after.released.is_empty());
}

async fn starved_gate_network(sink: Arc<MemorySink>) -> Network {
    let graph = gated_board(json!({"id": "creditGate@1", "params": {
        "initialCredits": 0, "maxCredits": 2
    }}))
    .await;
    let mut net = network(&graph).with_sink(sink);
    let src = net.contact("n:src/s", "out").unwrap();
    net.propagate(&src, int(1)).unwrap();
    net.propagate(&src, int(2)).unwrap();
    net
}

#[tokio::test]
async fn shutdown_fails_every_queued_ticket_once() {
    let sink = Arc::new(MemorySink::new());
    let mut net = starved_gate_network(sink.clone()).await;
    let gate = node("s:w/0:creditGate");
    assert_eq!(net.pending(&gate).unwrap(), 2);
    assert!(net.drain_completions().is_empty());

    let completions = net.shutdown();
    assert_eq!(
        completions,
        [
            Completion {
                node: gate.clone(),
                ticket: TicketId::new(1),
                outcome: Outcome::Failed("shutdown".to_string()),
            },
            Completion {
                node: gate.clone(),
                ticket: TicketId::new(2),
                outcome: Outcome::Failed("shutdown".to_string()),
            },
        ]
    );
    // Nothing is left for the drop that follows shutdown.
    assert!(!sink
        .events()
        .iter()
        .any(|e| matches!(e, ShimEvent::Dropped { ticket: Some(_), .. })));
}

#[tokio::test]
async fn dropping_or_replacing_a_network_fails_its_queued_tickets() {
    let sink = Arc::new(MemorySink::new());
    let net = starved_gate_network(sink.clone()).await;
    drop(net);
    let dropped: Vec<TicketId> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ShimEvent::Dropped {
                ticket: Some(ticket),
                reason,
                ..
            } if reason == "network dropped" => Some(ticket),
            _ => None,
        })
        .collect();
    assert_eq!(dropped, [TicketId::new(1), TicketId::new(2)]);

    let replaced = Arc::new(MemorySink::new());
    let mut net = starved_gate_network(replaced.clone()).await;
    assert_eq!(net.pending(&node("s:w/0:creditGate")).unwrap(), 2);
    net = network(&*gated_board(json!({"id": "tap@1"})).await);
    assert!(net.drain_completions().is_empty());
    assert!(replaced
        .events()
        .iter()
        .any(|e| matches!(e, ShimEvent::Reset { failed: 2, .. })));
}

#[tokio::test]
async fn rate_limiter_releases_as_the_clock_moves() {
    let graph = gated_board(json!({"id": "rateLimit@1", "params": {"rps": 1, "burst": 1}})).await;
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()));
    let mut net = network(&graph).with_clock(clock.clone());
    let src = net.contact("n:src/s", "out").unwrap();
    let dst = net.contact("n:dst/d", "out").unwrap();

    net.propagate(&src, int(1)).unwrap();
    let held = net.propagate(&src, int(2)).unwrap();
    assert_eq!(held.queued.len(), 1);
    assert!(net.pump().unwrap().released.is_empty());

    clock.advance(Duration::seconds(1));
    let pumped = net.pump().unwrap();
    assert_eq!(pumped.released.len(), 1);
    assert_eq!(net.value(&dst), Some(&int(2)));
}

#[tokio::test]
async fn sub_one_rps_limiter_releases_under_frequent_pumping() {
    let graph = gated_board(json!({"id": "rateLimit@1", "params": {"rps": 0.5, "burst": 1}})).await;
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()));
    let mut net = network(&graph).with_clock(clock.clone());
    let src = net.contact("n:src/s", "out").unwrap();
    let dst = net.contact("n:dst/d", "out").unwrap();

    net.propagate(&src, int(1)).unwrap();
    assert_eq!(net.propagate(&src, int(2)).unwrap().queued.len(), 1);

    let mut released_at = None;
    for ms in 1..=10_000 {
        clock.advance(Duration::milliseconds(1));
        if !net.pump().unwrap().released.is_empty() {
            released_at = Some(ms);
            break;
        }
    }
    assert_eq!(released_at, Some(2_000));
    assert_eq!(net.value(&dst), Some(&int(2)));
}

#[tokio::test]
async fn buffer_taps_record_without_altering() {
    let graph = gated_board(json!({"id": "tap@1", "params": {"sink": "buffer", "bufferSize": 2}})).await;
    let mut net = network(&graph);
    let src = net.contact("n:src/s", "out").unwrap();
    let dst = net.contact("n:dst/d", "out").unwrap();
    for v in [1, 2, 3] {
        net.propagate(&src, int(v)).unwrap();
    }
    assert_eq!(net.value(&dst), Some(&int(3)));
    let records: Vec<_> = net
        .tap_records(&node("s:w/0:tap"))
        .unwrap()
        .into_iter()
        .map(|r| r.value)
        .collect();
    assert_eq!(records, [int(2), int(3)]);
}

fn single_cell() -> (Network, boardwire_kernel::ContactId) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let graph = runtime.block_on(realize_board(json!([
        {"op": "declareSlot", "slot": "a", "pinout": "unary"},
        {"op": "mount", "slot": "a", "gadget": "g", "spec": spec("cell", "unary", &[])}
    ])));
    let net = network(&graph);
    let contact = net.contact("n:a/g", "out").unwrap();
    (net, contact)
}

proptest! {
    #[test]
    fn max_int_contacts_settle_on_the_maximum(values in prop::collection::vec(-1_000i64..1_000, 1..20)) {
        let (mut net, contact) = single_cell();
        for v in &values {
            net.propagate(&contact, int(*v)).unwrap();
        }
        let max = values.iter().copied().max().unwrap();
        prop_assert_eq!(net.value(&contact), Some(&int(max)));
    }
}
