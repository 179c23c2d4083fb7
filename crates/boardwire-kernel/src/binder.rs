//! The binder: sole mutator of a board.
//!
//! `apply` runs a plan through structural validation, semantic validation
//! on a scratch copy of the IR, authorization against the committed policy,
//! provenance, and a full re-lowering. Only then is the scratch state
//! committed and the new graph published. Every call yields exactly one
//! receipt, appended to history whatever the outcome.
//!
//! Calls are serialized per board by an async mutex. Readers never take
//! that mutex: they clone the currently published view, which is swapped
//! as a whole.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use boardwire_lattice::LatticeCatalog;

use crate::aspect::AspectRegistry;
use crate::error::BinderError;
use crate::id::{BoardId, PrincipalId, ReceiptId};
use crate::ir::{AspectInstance, AspectScope, BoardIr, Provenance, ScopedAspect, SlotDecl, WireSpec};
use crate::lower::lower;
use crate::plan::{Plan, PlanOp};
use crate::policy::Denial;
use crate::realized::{Diff, Receipt, ReceiptFailure, ReceiptStatus, RealizedGraph};
use crate::slots::{MountSubscriber, SlotManager};
use crate::store::{
    BOARD_SNAPSHOT_KIND, BOARD_SNAPSHOT_SCHEMA, BoardSnapshot, BoardStore, StoreError,
};

/// Principal recorded on receipts for plans too malformed to name one.
pub const UNKNOWN_PRINCIPAL: &str = "unknown";

/// Wall-clock source for provenance timestamps.
pub type WallClock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct BinderState {
    ir: BoardIr,
    slots: SlotManager,
    receipts: Vec<Receipt>,
}

/// The published, immutable view of a board.
#[derive(Debug, Clone)]
struct BoardView {
    ir: Arc<BoardIr>,
    realized: Arc<RealizedGraph>,
}

/// Scratch state produced by a plan that passed every check.
struct Staged {
    ir: BoardIr,
    slots: SlotManager,
    realized: RealizedGraph,
    diffs: Vec<Diff>,
}

pub struct Binder {
    board: BoardId,
    registry: Arc<AspectRegistry>,
    catalog: Arc<LatticeCatalog>,
    clock: WallClock,
    store: Option<Arc<dyn BoardStore>>,
    /// Outcome of the most recent save; `None` after a success.
    save_error: SyncMutex<Option<StoreError>>,
    state: Mutex<BinderState>,
    view: RwLock<BoardView>,
}

impl Binder {
    /// A binder over a fresh, empty board.
    pub fn new(
        board: BoardId,
        registry: Arc<AspectRegistry>,
        catalog: Arc<LatticeCatalog>,
    ) -> Result<Self, BinderError> {
        Self::from_parts(BoardIr::empty(board), Vec::new(), registry, catalog)
    }

    /// Rebuild a binder from a stored snapshot. The IR is re-lowered; the
    /// receipt history is kept as stored.
    pub fn restore(
        snapshot: BoardSnapshot,
        registry: Arc<AspectRegistry>,
        catalog: Arc<LatticeCatalog>,
    ) -> Result<Self, BinderError> {
        if snapshot.kind != BOARD_SNAPSHOT_KIND || snapshot.schema != BOARD_SNAPSHOT_SCHEMA {
            return Err(BinderError::Validation(format!(
                "unsupported snapshot {} schema {}",
                snapshot.kind, snapshot.schema
            )));
        }
        Self::from_parts(snapshot.ir, snapshot.receipts, registry, catalog)
    }

    fn from_parts(
        ir: BoardIr,
        receipts: Vec<Receipt>,
        registry: Arc<AspectRegistry>,
        catalog: Arc<LatticeCatalog>,
    ) -> Result<Self, BinderError> {
        let realized = lower(&ir, &registry, &catalog, receipts.clone())?;
        let slots = SlotManager::from_ir(&ir);
        let view = BoardView {
            ir: Arc::new(ir.clone()),
            realized: Arc::new(realized),
        };
        Ok(Self {
            board: ir.board.clone(),
            registry,
            catalog,
            clock: Arc::new(Utc::now),
            store: None,
            save_error: SyncMutex::new(None),
            state: Mutex::new(BinderState {
                ir,
                slots,
                receipts,
            }),
            view: RwLock::new(view),
        })
    }

    /// Save a snapshot through `store` after every receipt. Saves run on the
    /// blocking thread pool while the board stays locked, so snapshots reach
    /// the store in receipt order.
    pub fn with_store(mut self, store: Arc<dyn BoardStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn board(&self) -> &BoardId {
        &self.board
    }

    pub fn registry(&self) -> &AspectRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &LatticeCatalog {
        &self.catalog
    }

    fn view(&self) -> BoardView {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The committed IR.
    pub fn ir(&self) -> Arc<BoardIr> {
        self.view().ir
    }

    /// The current realized graph, receipts included.
    pub fn realized(&self) -> Arc<RealizedGraph> {
        self.view().realized
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.view().realized.receipts.clone()
    }

    /// Why the snapshot for the latest receipt did not reach the store.
    pub fn last_save_error(&self) -> Option<StoreError> {
        self.save_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Be told synchronously about every committed mount and unmount.
    pub async fn subscribe_mounts(&self, subscriber: MountSubscriber) {
        self.state.lock().await.slots.subscribe(subscriber);
    }

    /// Apply a raw JSON plan. Malformed input becomes a `validation_error`
    /// receipt.
    pub async fn apply_json(&self, raw: Value) -> Receipt {
        match Plan::from_json(raw.clone()) {
            Ok(plan) => self.apply(plan).await,
            Err(message) => {
                let by = raw
                    .get("by")
                    .and_then(Value::as_str)
                    .and_then(|s| PrincipalId::new(s).ok())
                    .unwrap_or_else(unknown_principal);
                let reason = raw
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut state = self.state.lock().await;
                let provenance = Provenance {
                    by,
                    at: (self.clock)(),
                    reason,
                    pass_id: None,
                    input_hash: None,
                };
                let receipt = self.error_receipt(
                    &state,
                    provenance,
                    BinderError::Validation(message),
                    false,
                );
                self.finish(&mut state, receipt, None).await
            }
        }
    }

    /// Apply one plan atomically and return its receipt.
    pub async fn apply(&self, plan: Plan) -> Receipt {
        let mut state = self.state.lock().await;
        let input_hash = plan.hash().ok();
        let dry_run = plan.is_dry_run();
        let provenance = Provenance {
            by: plan.by.clone(),
            at: (self.clock)(),
            reason: plan.reason.clone(),
            pass_id: plan.pass_id.clone(),
            input_hash: input_hash.clone(),
        };

        match self.stage(&state, &plan, &provenance) {
            Ok(staged) => {
                let receipt = self.receipt(
                    &state,
                    provenance,
                    ReceiptStatus::Ok,
                    staged.diffs,
                    None,
                    dry_run,
                );
                let commit = (!dry_run).then_some((staged.ir, staged.slots, staged.realized));
                self.finish(&mut state, receipt, commit).await
            }
            Err(err) => {
                let receipt = self.error_receipt(&state, provenance, err, dry_run);
                self.finish(&mut state, receipt, None).await
            }
        }
    }

    /// Validate, authorize and lower `plan` against scratch copies of the
    /// committed state.
    fn stage(
        &self,
        state: &BinderState,
        plan: &Plan,
        provenance: &Provenance,
    ) -> Result<Staged, BinderError> {
        plan.check_structure().map_err(BinderError::Validation)?;
        if plan.ops.iter().any(|op| matches!(op, PlanOp::Bake)) {
            return Err(BinderError::UnsupportedOperation(
                "bake has no defined semantics".to_string(),
            ));
        }

        let mut ir = state.ir.clone();
        let mut slots = state.slots.fork();
        let mut diffs = Vec::new();
        for op in &plan.ops {
            self.apply_op(&mut ir, &mut slots, op, provenance.at, &mut diffs)?;
        }
        slots.write_into(&mut ir);

        state
            .ir
            .policy
            .authorize(&plan.by, plan.installed_aspects())
            .map_err(|denial| {
                BinderError::Permission(match denial {
                    Denial::MutateBoard => {
                        format!("{} may not mutate board {}", plan.by, self.board)
                    }
                    Denial::Aspect(aspect) => {
                        format!("{} is not granted aspect {aspect}", plan.by)
                    }
                })
            })?;

        ir.revision += 1;
        ir.provenance.push(provenance.clone());

        let realized = lower(&ir, &self.registry, &self.catalog, Vec::new())?;
        let current = self.realized();
        diffs.push(realized.delta_from(&current));

        Ok(Staged {
            ir,
            slots,
            realized,
            diffs,
        })
    }

    fn apply_op(
        &self,
        ir: &mut BoardIr,
        slots: &mut SlotManager,
        op: &PlanOp,
        at: DateTime<Utc>,
        diffs: &mut Vec<Diff>,
    ) -> Result<(), BinderError> {
        match op {
            PlanOp::DeclareSlot {
                slot,
                pinout,
                capacity,
                traits,
                replica,
            } => {
                let decl = SlotDecl {
                    pinout: pinout.clone(),
                    capacity: capacity.unwrap_or(1),
                    traits: traits.clone(),
                    replica: replica.unwrap_or_default(),
                };
                slots.register_slot(slot.clone(), decl)?;
                diffs.push(Diff::SlotDeclared { slot: slot.clone() });
            }
            PlanOp::SetSlotMode {
                slot,
                capacity,
                replica,
            } => {
                slots.set_slot_mode(slot, *capacity, *replica)?;
                let replica = slots.slot(slot).map(|d| d.replica).unwrap_or_default();
                diffs.push(Diff::SlotModeChanged {
                    slot: slot.clone(),
                    capacity: *capacity,
                    replica,
                });
            }
            PlanOp::Mount { slot, gadget, spec } => {
                for decl in spec.inputs.iter().chain(spec.outputs.iter()) {
                    if !self.catalog.contains(&decl.lattice) {
                        return Err(BinderError::LatticeNotFound(decl.lattice.clone()));
                    }
                }
                slots.mount_gadget(slot, gadget.clone(), spec.clone(), at)?;
                diffs.push(Diff::Mounted {
                    slot: slot.clone(),
                    gadget: gadget.clone(),
                });
            }
            PlanOp::Unmount { slot, gadget } => {
                if slots.slot(slot).is_none() {
                    return Err(BinderError::NotFound(format!("slot {slot}")));
                }
                let removed = match gadget {
                    Some(gadget) => {
                        if slots.slot_of(gadget) != Some(slot) {
                            return Err(BinderError::NotFound(format!(
                                "gadget {gadget} in slot {slot}"
                            )));
                        }
                        slots.unmount_gadget(gadget);
                        vec![gadget.clone()]
                    }
                    None => slots.unmount_all(slot)?,
                };
                diffs.extend(removed.into_iter().map(|gadget| Diff::Unmounted {
                    slot: slot.clone(),
                    gadget,
                }));
            }
            PlanOp::AddWire {
                wire,
                spec,
                aspects,
            } => {
                if ir.wires.contains_key(wire) {
                    return Err(BinderError::Validation(format!("wire {wire} already exists")));
                }
                check_endpoints(slots, spec)?;
                for aspect in aspects {
                    self.registry.parse(aspect)?;
                }
                ir.wires.insert(wire.clone(), spec.clone());
                if !aspects.is_empty() {
                    ir.aspects.insert(wire.clone(), aspects.clone());
                }
                diffs.push(Diff::WireAdded { wire: wire.clone() });
            }
            PlanOp::UpdateWire { wire, spec } => {
                if !ir.wires.contains_key(wire) {
                    return Err(BinderError::NotFound(format!("wire {wire}")));
                }
                check_endpoints(slots, spec)?;
                ir.wires.insert(wire.clone(), spec.clone());
                diffs.push(Diff::WireUpdated { wire: wire.clone() });
            }
            PlanOp::RemoveWire { wire } => {
                if ir.wires.remove(wire).is_none() {
                    return Err(BinderError::NotFound(format!("wire {wire}")));
                }
                ir.aspects.remove(wire);
                diffs.push(Diff::WireRemoved { wire: wire.clone() });
            }
            PlanOp::WeaveWires { selector, aspect } => {
                self.registry.parse(aspect)?;
                let compiled = selector.compile().map_err(BinderError::Validation)?;
                let matched: Vec<_> = ir
                    .wires
                    .iter()
                    .filter(|(_, spec)| compiled.matches(spec))
                    .map(|(id, _)| id.clone())
                    .collect();
                for wire in matched {
                    ir.aspects
                        .entry(wire.clone())
                        .or_default()
                        .push(aspect.clone());
                    diffs.push(Diff::AspectWoven {
                        wire,
                        aspect: aspect.id.clone(),
                    });
                }
            }
            PlanOp::InstallPinAspect { target, aspect } => {
                if !slots.endpoint_exists(target) {
                    return Err(BinderError::NotFound(format!("pin target {target}")));
                }
                self.install(
                    ir,
                    AspectScope::Pin {
                        target: target.clone(),
                    },
                    aspect,
                    diffs,
                )?;
            }
            PlanOp::InstallSlotAspect { slot, aspect } => {
                if slots.slot(slot).is_none() {
                    return Err(BinderError::NotFound(format!("slot {slot}")));
                }
                self.install(ir, AspectScope::Slot { slot: slot.clone() }, aspect, diffs)?;
            }
            PlanOp::InstallBoardAspect { aspect } => {
                self.install(ir, AspectScope::Board, aspect, diffs)?;
            }
            PlanOp::InstallBinderAspect { aspect } => {
                self.install(ir, AspectScope::Binder, aspect, diffs)?;
            }
            PlanOp::SetPolicy { policy } => {
                ir.policy = policy.clone();
                diffs.push(Diff::PolicySet);
            }
            PlanOp::Validate => {}
            PlanOp::Bake => {
                return Err(BinderError::UnsupportedOperation(
                    "bake has no defined semantics".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn install(
        &self,
        ir: &mut BoardIr,
        scope: AspectScope,
        aspect: &AspectInstance,
        diffs: &mut Vec<Diff>,
    ) -> Result<(), BinderError> {
        self.registry.parse(aspect)?;
        let label = match &scope {
            AspectScope::Pin { .. } => "pin",
            AspectScope::Slot { .. } => "slot",
            AspectScope::Board => "board",
            AspectScope::Binder => "binder",
        };
        ir.scoped_aspects.push(ScopedAspect {
            scope,
            aspect: aspect.clone(),
        });
        diffs.push(Diff::AspectInstalled {
            scope: label.to_string(),
            aspect: aspect.id.clone(),
        });
        Ok(())
    }

    fn receipt(
        &self,
        state: &BinderState,
        provenance: Provenance,
        status: ReceiptStatus,
        diffs: Vec<Diff>,
        reason: Option<ReceiptFailure>,
        dry_run: bool,
    ) -> Receipt {
        let seq = state.receipts.len() as u64 + 1;
        let name = format!(
            "{}/{seq}/{}",
            self.board,
            provenance.input_hash.as_deref().unwrap_or("-")
        );
        Receipt {
            id: ReceiptId::from_uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())),
            seq,
            board: self.board.clone(),
            status,
            diffs,
            reason,
            provenance,
            dry_run,
        }
    }

    fn error_receipt(
        &self,
        state: &BinderState,
        provenance: Provenance,
        err: BinderError,
        dry_run: bool,
    ) -> Receipt {
        let failure = ReceiptFailure {
            class: err.failure_class().to_string(),
            message: err.to_string(),
        };
        self.receipt(
            state,
            provenance,
            ReceiptStatus::Error,
            Vec::new(),
            Some(failure),
            dry_run,
        )
    }

    /// Record `receipt`, commit staged state if any, publish, persist.
    async fn finish(
        &self,
        state: &mut BinderState,
        receipt: Receipt,
        commit: Option<(BoardIr, SlotManager, RealizedGraph)>,
    ) -> Receipt {
        state.receipts.push(receipt.clone());

        let mut realized = match commit {
            Some((ir, slots, realized)) => {
                state.ir = ir;
                state.slots.adopt(slots);
                realized
            }
            None => (*self.realized()).clone(),
        };
        realized.receipts = state.receipts.clone();

        {
            let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
            *view = BoardView {
                ir: Arc::new(state.ir.clone()),
                realized: Arc::new(realized),
            };
        }

        match &receipt.reason {
            None => tracing::info!(
                board = %self.board,
                receipt = %receipt.id,
                seq = receipt.seq,
                by = %receipt.provenance.by,
                dry_run = receipt.dry_run,
                diffs = receipt.diffs.len(),
                "plan applied"
            ),
            Some(failure) => tracing::warn!(
                board = %self.board,
                receipt = %receipt.id,
                seq = receipt.seq,
                by = %receipt.provenance.by,
                class = %failure.class,
                message = %failure.message,
                "plan rejected"
            ),
        }
        for aspect in state.ir.binder_aspects() {
            tracing::info!(
                target: "boardwire::binder_aspect",
                aspect = %aspect.id,
                board = %self.board,
                receipt = %receipt.id,
                status = ?receipt.status,
                "binder observed receipt"
            );
        }

        self.persist(state).await;
        receipt
    }

    async fn persist(&self, state: &BinderState) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let snapshot = BoardSnapshot::new(state.ir.clone(), state.receipts.clone());
        let outcome = tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .unwrap_or_else(|join| Err(StoreError::Io {
                path: self.board.to_string(),
                message: format!("save task failed: {join}"),
            }));
        if let Err(err) = &outcome {
            tracing::warn!(board = %self.board, error = %err, "failed to save board snapshot");
        }
        *self.save_error.lock().unwrap_or_else(PoisonError::into_inner) = outcome.err();
    }
}

fn unknown_principal() -> PrincipalId {
    PrincipalId::from_static(UNKNOWN_PRINCIPAL)
}

fn check_endpoints(slots: &SlotManager, spec: &WireSpec) -> Result<(), BinderError> {
    for endpoint in [&spec.from, &spec.to] {
        if !slots.endpoint_exists(endpoint) {
            return Err(BinderError::NotFound(format!("wire endpoint {endpoint}")));
        }
    }
    Ok(())
}
