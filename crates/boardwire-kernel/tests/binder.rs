//! Binder protocol: receipts, atomicity, authorization, dry runs.

use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use boardwire_kernel::{
    AspectRegistry, Binder, BoardId, BoardSnapshot, BoardStore, Diff, MountEvent, Plan,
    ReceiptQuery, ReceiptStatus, StoreError, failure_class,
};
use boardwire_lattice::LatticeCatalog;

fn binder(board: &str) -> Binder {
    Binder::new(
        BoardId::new(board).unwrap(),
        Arc::new(AspectRegistry::with_builtins()),
        Arc::new(LatticeCatalog::with_builtins()),
    )
    .unwrap()
    .with_clock(Arc::new(|| Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()))
}

fn gadget(kind: &str, pinout: &str, inputs: &[&str], outputs: &[&str]) -> Value {
    let pins = |names: &[&str]| -> Vec<Value> {
        names
            .iter()
            .map(|p| json!({"pin": p, "lattice": "maxInt"}))
            .collect()
    };
    json!({
        "kind": kind,
        "pinouts": [pinout],
        "inputs": pins(inputs),
        "outputs": pins(outputs),
    })
}

fn plan(by: &str, ops: Value) -> Value {
    json!({"by": by, "reason": "test", "ops": ops})
}

#[tokio::test]
async fn second_mount_on_full_slot_is_a_capacity_error() {
    let binder = binder("cap");
    let ok = binder
        .apply_json(plan(
            "ops",
            json!([
                {"op": "declareSlot", "slot": "sum", "pinout": "binary"},
                {"op": "mount", "slot": "sum", "gadget": "g1", "spec": gadget("add", "binary", &["x", "y"], &["out"])}
            ]),
        ))
        .await;
    assert!(ok.is_ok(), "{ok:?}");

    let rejected = binder
        .apply_json(plan(
            "ops",
            json!([
                {"op": "mount", "slot": "sum", "gadget": "g2", "spec": gadget("add", "binary", &["x", "y"], &["out"])}
            ]),
        ))
        .await;
    assert_eq!(rejected.status, ReceiptStatus::Error);
    assert_eq!(rejected.failure_class(), Some(failure_class::CAPACITY));

    let ir = binder.ir();
    assert_eq!(ir.occupants_of(&"sum".try_into().unwrap()).len(), 1);
    assert_eq!(ir.revision, 1);
    assert_eq!(binder.receipts().len(), 2);
}

#[tokio::test]
async fn failing_plans_leave_the_ir_untouched() {
    let binder = binder("atomic");
    let before = binder.ir();
    let receipt = binder
        .apply_json(plan(
            "ops",
            json!([
                {"op": "declareSlot", "slot": "a", "pinout": "unary"},
                {"op": "mount", "slot": "missing", "gadget": "g", "spec": gadget("cell", "unary", &[], &["out"])}
            ]),
        ))
        .await;
    assert_eq!(receipt.failure_class(), Some(failure_class::NOT_FOUND));
    assert_eq!(*binder.ir(), *before);
    assert!(binder.ir().slots.is_empty());

    let history = binder.receipts();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0], receipt);
    assert_eq!(binder.realized().receipts.len(), 1);
}

#[tokio::test]
async fn failure_classes_cover_the_taxonomy() {
    let binder = binder("taxonomy");
    binder
        .apply_json(plan(
            "ops",
            json!([{"op": "declareSlot", "slot": "s", "pinout": "unary", "capacity": 2}]),
        ))
        .await;

    let cases = [
        (json!([{"op": "declareSlot", "slot": "s", "pinout": "unary"}]), failure_class::DUPLICATE_SLOT),
        (
            json!([{"op": "mount", "slot": "s", "gadget": "g", "spec": gadget("cell", "binary", &[], &["out"])}]),
            failure_class::PINOUT_MISMATCH,
        ),
        (
            json!([
                {"op": "mount", "slot": "s", "gadget": "g", "spec": gadget("cell", "unary", &[], &["out"])},
                {"op": "mount", "slot": "s", "gadget": "g", "spec": gadget("cell", "unary", &[], &["out"])}
            ]),
            failure_class::ALREADY_MOUNTED,
        ),
        (json!([{"op": "bake"}]), failure_class::UNSUPPORTED_OPERATION),
        (json!([{"op": "removeWire", "wire": "nope"}]), failure_class::NOT_FOUND),
        (
            json!([{"op": "mount", "slot": "s", "gadget": "g", "spec": {
                "kind": "cell", "pinouts": ["unary"], "outputs": [{"pin": "out", "lattice": "fuzzy"}]
            }}]),
            failure_class::LATTICE_NOT_FOUND,
        ),
        (
            json!([{"op": "weaveWires", "selector": {}, "aspect": {"id": "tap@1"}}]),
            failure_class::VALIDATION,
        ),
        (
            json!([{"op": "installBoardAspect", "aspect": {"id": "retry@1"}}]),
            failure_class::NOT_FOUND,
        ),
        (
            json!([{"op": "installBoardAspect", "aspect": {"id": "rateLimit@1", "params": {"rps": 0, "burst": 1}}}]),
            failure_class::VALIDATION,
        ),
        (
            json!([{"op": "installBoardAspect", "aspect": {"id": "creditGate@1", "params": {
                "maxCredits": 2, "creditsPerItem": 3
            }}}]),
            failure_class::VALIDATION,
        ),
    ];
    for (ops, class) in cases {
        let receipt = binder.apply_json(plan("ops", ops.clone())).await;
        assert_eq!(receipt.failure_class(), Some(class), "ops {ops}");
    }
    assert_eq!(binder.ir().revision, 1);
}

#[tokio::test]
async fn malformed_json_becomes_a_validation_receipt() {
    let binder = binder("malformed");
    let receipt = binder
        .apply_json(json!({"by": "ops", "ops": [{"op": "declareSlot"}]}))
        .await;
    assert_eq!(receipt.failure_class(), Some(failure_class::VALIDATION));
    assert_eq!(receipt.provenance.by.as_str(), "ops");

    let anonymous = binder.apply_json(json!({"ops": "nope"})).await;
    assert_eq!(anonymous.provenance.by.as_str(), "unknown");
    assert_eq!(binder.receipts().len(), 2);
}

#[tokio::test]
async fn acl_gates_board_mutation_and_aspect_installs() {
    let binder = binder("acl");
    let setup = binder
        .apply_json(plan(
            "root",
            json!([
                {"op": "declareSlot", "slot": "a", "pinout": "unary"},
                {"op": "declareSlot", "slot": "b", "pinout": "unary"},
                {"op": "setPolicy", "policy": {"acl": {
                    "mutateBoard": ["ops"],
                    "aspectGrants": {"tap@1": ["ops"]}
                }}}
            ]),
        ))
        .await;
    assert!(setup.is_ok());

    let guest = binder
        .apply_json(plan(
            "guest",
            json!([{"op": "declareSlot", "slot": "c", "pinout": "unary"}]),
        ))
        .await;
    assert_eq!(guest.failure_class(), Some(failure_class::PERMISSION));

    let ungranted = binder
        .apply_json(plan(
            "ops",
            json!([{"op": "installBoardAspect", "aspect": {"id": "rateLimit@1", "params": {"rps": 5, "burst": 1}}}]),
        ))
        .await;
    assert_eq!(ungranted.failure_class(), Some(failure_class::PERMISSION));

    let granted = binder
        .apply_json(plan(
            "ops",
            json!([{"op": "installSlotAspect", "slot": "a", "aspect": {"id": "tap@1"}}]),
        ))
        .await;
    assert!(granted.is_ok(), "{granted:?}");

    // A plan cannot grant itself access by replacing the policy it is
    // checked against.
    let self_grant = binder
        .apply_json(plan(
            "guest",
            json!([{"op": "setPolicy", "policy": {}}]),
        ))
        .await;
    assert_eq!(self_grant.failure_class(), Some(failure_class::PERMISSION));
    assert!(binder.ir().policy.acl.is_some());
}

#[tokio::test]
async fn dry_runs_report_diffs_without_mutating() {
    let binder = binder("dry");
    let receipt = binder
        .apply_json(plan(
            "ops",
            json!([
                {"op": "declareSlot", "slot": "a", "pinout": "unary"},
                {"op": "mount", "slot": "a", "gadget": "g", "spec": gadget("cell", "unary", &[], &["out"])},
                {"op": "validate"}
            ]),
        ))
        .await;
    assert!(receipt.is_ok());
    assert!(receipt.dry_run);
    assert!(receipt.diffs.contains(&Diff::SlotDeclared {
        slot: "a".try_into().unwrap()
    }));
    assert!(receipt.diffs.iter().any(|d| matches!(
        d,
        Diff::Graph { nodes_added, .. } if nodes_added.len() == 1
    )));

    assert!(binder.ir().slots.is_empty());
    assert_eq!(binder.ir().revision, 0);
    assert!(binder.realized().nodes.is_empty());
    assert_eq!(binder.receipts().len(), 1);
}

#[tokio::test]
async fn plan_hash_ignores_principal_and_reason() {
    let ops = json!([{"op": "declareSlot", "slot": "a", "pinout": "unary"}]);
    let first = binder("h1").apply_json(plan("alice", ops.clone())).await;
    let second = binder("h2")
        .apply_json(json!({"by": "bob", "reason": "other", "passId": "p9", "ops": ops}))
        .await;
    let hash = first.provenance.input_hash.clone().unwrap();
    assert!(hash.starts_with("plan1_"));
    assert_eq!(second.provenance.input_hash, Some(hash));
    assert_eq!(second.provenance.pass_id.as_deref(), Some("p9"));
}

#[tokio::test]
async fn receipt_ids_are_deterministic() {
    let ops = json!([{"op": "declareSlot", "slot": "a", "pinout": "unary"}]);
    let a = binder("same").apply_json(plan("ops", ops.clone())).await;
    let b = binder("same").apply_json(plan("ops", ops.clone())).await;
    let other_board = binder("other").apply_json(plan("ops", ops)).await;
    assert_eq!(a.id, b.id);
    assert_ne!(a.id, other_board.id);
    assert_eq!(a, b);
}

#[tokio::test]
async fn concurrent_applies_are_serialized() {
    let binder = Arc::new(binder("busy"));
    let mut tasks = Vec::new();
    for i in 0..16 {
        let binder = Arc::clone(&binder);
        tasks.push(tokio::spawn(async move {
            let plan = Plan::from_json(json!({
                "by": "ops",
                "ops": [{"op": "declareSlot", "slot": format!("s{i}"), "pinout": "unary"}]
            }))
            .unwrap();
            binder.apply(plan).await
        }));
    }
    let mut seqs = Vec::new();
    for task in tasks {
        let receipt = task.await.unwrap();
        assert!(receipt.is_ok());
        seqs.push(receipt.seq);
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=16).collect::<Vec<u64>>());
    assert_eq!(binder.ir().revision, 16);
    assert_eq!(binder.ir().slots.len(), 16);
    assert_eq!(binder.ir().provenance.len(), 16);
}

#[tokio::test]
async fn mount_subscribers_hear_commits_only() {
    let binder = binder("events");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    binder
        .subscribe_mounts(Arc::new(move |event: &MountEvent| {
            sink.lock().unwrap().push(event.clone());
        }))
        .await;

    let mount = json!([
        {"op": "declareSlot", "slot": "a", "pinout": "unary"},
        {"op": "mount", "slot": "a", "gadget": "g", "spec": gadget("cell", "unary", &[], &["out"])}
    ]);
    let mut dry = mount.clone();
    dry.as_array_mut().unwrap().push(json!({"op": "validate"}));
    binder.apply_json(plan("ops", dry)).await;
    assert!(seen.lock().unwrap().is_empty());

    binder.apply_json(plan("ops", mount)).await;
    binder
        .apply_json(plan("ops", json!([{"op": "unmount", "slot": "a"}])))
        .await;
    let events = seen.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], MountEvent::Mounted { .. }));
    assert!(matches!(events[1], MountEvent::Unmounted { .. }));
}

#[derive(Default)]
struct OneBoardStore {
    snapshot: Mutex<Option<BoardSnapshot>>,
}

impl BoardStore for OneBoardStore {
    fn save(&self, snapshot: &BoardSnapshot) -> Result<(), StoreError> {
        *self.snapshot.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self, _board: &BoardId) -> Result<Option<BoardSnapshot>, StoreError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn query_receipts(
        &self,
        _board: &BoardId,
        query: &ReceiptQuery,
    ) -> Result<Vec<boardwire_kernel::Receipt>, StoreError> {
        Ok(self
            .snapshot
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| query.select(&s.receipts))
            .unwrap_or_default())
    }
}

#[tokio::test]
async fn snapshots_restore_ir_graph_and_history() {
    let store = Arc::new(OneBoardStore::default());
    let original = binder("persist").with_store(store.clone());
    original
        .apply_json(plan(
            "ops",
            json!([
                {"op": "declareSlot", "slot": "a", "pinout": "unary"},
                {"op": "mount", "slot": "a", "gadget": "g", "spec": gadget("cell", "unary", &[], &["out"])}
            ]),
        ))
        .await;
    original.apply_json(plan("ops", json!([{"op": "bake"}]))).await;

    let board = BoardId::new("persist").unwrap();
    let snapshot = store.load(&board).unwrap().unwrap();
    assert_eq!(snapshot.receipts.len(), 2);
    let errors = store
        .query_receipts(
            &board,
            &ReceiptQuery {
                status: Some(ReceiptStatus::Error),
                ..ReceiptQuery::default()
            },
        )
        .unwrap();
    assert_eq!(errors.len(), 1);

    let restored = Binder::restore(
        snapshot,
        Arc::new(AspectRegistry::with_builtins()),
        Arc::new(LatticeCatalog::with_builtins()),
    )
    .unwrap();
    assert_eq!(*restored.ir(), *original.ir());
    assert_eq!(restored.realized().graph_hash, original.realized().graph_hash);
    assert_eq!(restored.receipts(), original.receipts());

    let next = restored
        .apply_json(plan(
            "ops",
            json!([{"op": "declareSlot", "slot": "b", "pinout": "unary"}]),
        ))
        .await;
    assert_eq!(next.seq, 3);
}

/// Records the thread each save ran on; refuses saves once `refuse` is set.
#[derive(Default)]
struct ThreadRecordingStore {
    threads: Mutex<Vec<std::thread::ThreadId>>,
    refuse: Mutex<bool>,
}

impl BoardStore for ThreadRecordingStore {
    fn save(&self, snapshot: &BoardSnapshot) -> Result<(), StoreError> {
        self.threads.lock().unwrap().push(std::thread::current().id());
        if *self.refuse.lock().unwrap() {
            return Err(StoreError::LockBusy {
                path: format!("{}/.lock", snapshot.board()),
            });
        }
        Ok(())
    }

    fn load(&self, _board: &BoardId) -> Result<Option<BoardSnapshot>, StoreError> {
        Ok(None)
    }

    fn query_receipts(
        &self,
        _board: &BoardId,
        _query: &ReceiptQuery,
    ) -> Result<Vec<boardwire_kernel::Receipt>, StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn saves_run_off_the_async_thread_and_report_failures() {
    let store = Arc::new(ThreadRecordingStore::default());
    let binder = binder("offload").with_store(store.clone());
    let declare = |slot: &str| plan("ops", json!([{"op": "declareSlot", "slot": slot, "pinout": "unary"}]));

    assert!(binder.apply_json(declare("a")).await.is_ok());
    assert_eq!(binder.last_save_error(), None);
    let saved_on = store.threads.lock().unwrap().clone();
    assert_eq!(saved_on.len(), 1);
    assert_ne!(saved_on[0], std::thread::current().id());

    *store.refuse.lock().unwrap() = true;
    let receipt = binder.apply_json(declare("b")).await;
    assert!(receipt.is_ok());
    assert!(matches!(
        binder.last_save_error(),
        Some(StoreError::LockBusy { .. })
    ));

    *store.refuse.lock().unwrap() = false;
    binder.apply_json(declare("c")).await;
    assert_eq!(binder.last_save_error(), None);
    assert_eq!(store.threads.lock().unwrap().len(), 3);
}
