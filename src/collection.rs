//! The collection coordinator (spec §4.4): item registry, lock table, the
//! implicit batch transaction, and mutation emission.
//!
//! Rust has no magic string field sniffing the way the original's
//! `__tracking_id`-on-every-record convention does, so `update`/`remove`
//! here take the `TrackingId` explicitly rather than deriving it from a
//! reserved attribute on the passed value — callers already hold the id
//! `insert` returned them. `insert` still strips any `__tracking_id` field
//! a caller might have left on a value (e.g. one round-tripped out of
//! `getItems()`) before storing it, and allocates a fresh id regardless;
//! `getItems()`/`onMutation` never embed the attribute in the first place,
//! so invariant 7 ("`__tracking_id` never appears on any item surfaced
//! through `onMutation`") holds by construction. See DESIGN.md.

use crate::error::{CoreError, CoreResult};
use crate::ids::{next_tracking_id, LockOwner, TrackingId};
use crate::path::Path;
use crate::sync::{self, ChangeMessage, SyncMessage, SyncReconciler};
use crate::transaction::{OperationKind, Settlement, SettlementStatus, Transaction};
use crate::tracker::Tracker;
use crate::validate::Validator;
use crate::value::Value;
use crate::delta::Delta;
use futures::future::BoxFuture;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One entry handed to the `onMutation` callback after a commit (spec
/// §4.4.2 step 4 / §6). `item` is `None` for a `delete` operation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEntry {
    pub operation: OperationKind,
    pub tracking_id: TrackingId,
    pub item: Option<Value>,
    pub delta: Delta,
}

/// `onMutation([{operation, item, delta}]) -> async` (spec §6). The future
/// resolves to an error string on failure; failures are logged and
/// swallowed (§7), never propagated to the commit that triggered them.
pub type MutationHandler = Arc<dyn Fn(Vec<MutationEntry>) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Client-side optimistic mirror of a synchronized collection of items.
///
/// Calling any of `insert`/`update`/`remove` without a transaction queues
/// the mutation onto an implicit per-turn batch transaction (§4.4.1),
/// committed either by an explicit `flush()` call or, for callers driving
/// the collection from inside a tokio runtime, automatically — see
/// `AutoFlusher`.
pub struct Collection {
    items: im::HashMap<TrackingId, Value>,
    pending_items: HashMap<TrackingId, Tracker>,
    locks: HashMap<TrackingId, LockOwner>,
    open_transactions: HashSet<crate::ids::TransactionId>,
    batch: Option<Transaction>,
    settlement_tx: UnboundedSender<Settlement>,
    settlement_rx: UnboundedReceiver<Settlement>,
    validator: Arc<dyn Validator>,
    on_mutation: Option<MutationHandler>,
    sync: SyncReconciler,
}

impl Collection {
    /// `validator: None` configures the collection with `NoopValidator`,
    /// which accepts every value unchanged — the spec's "if configured"
    /// schema checks then become unconditional calls to a validator that
    /// never rejects, rather than a branch `insert`/`update` has to carry.
    pub fn new(validator: Option<Arc<dyn Validator>>, on_mutation: Option<MutationHandler>) -> Self {
        let (settlement_tx, settlement_rx) = unbounded();
        Collection {
            items: im::HashMap::new(),
            pending_items: HashMap::new(),
            locks: HashMap::new(),
            open_transactions: HashSet::new(),
            batch: None,
            settlement_tx,
            settlement_rx,
            validator: validator.unwrap_or_else(|| Arc::new(crate::validate::NoopValidator)),
            on_mutation,
            sync: SyncReconciler::new(),
        }
    }

    /// Open an explicit transaction. The caller drives its lifecycle
    /// (`insert`/`update`/`remove` with `Some(&mut txn)`, then
    /// `txn.commit()`/`txn.rollback()`); after either, call `settle()` so
    /// the collection can react to the settlement.
    pub fn begin_transaction(&mut self) -> Transaction {
        let txn = Transaction::new(self.settlement_tx.clone());
        self.open_transactions.insert(txn.id().clone());
        txn
    }

    fn ensure_batch(&mut self) {
        if self.batch.is_none() {
            self.batch = Some(Transaction::new(self.settlement_tx.clone()));
        }
    }

    fn owner_of(&mut self, transaction: &Option<&mut Transaction>) -> LockOwner {
        match transaction {
            Some(t) => LockOwner::Transaction(t.id().clone()),
            None => {
                self.ensure_batch();
                LockOwner::Batch
            }
        }
    }

    fn acquire_lock(&mut self, tracking_id: &TrackingId, owner: LockOwner) -> CoreResult<()> {
        match self.locks.get(tracking_id) {
            Some(existing) if *existing == owner => Ok(()),
            Some(existing) => Err(CoreError::ItemLocked {
                owner: existing.clone(),
            }),
            None => {
                self.locks.insert(tracking_id.clone(), owner);
                Ok(())
            }
        }
    }

    fn run_validator(&self, item: &Value) -> CoreResult<Value> {
        self.validator.validate(item).map_err(|issues| CoreError::Schema { issues })
    }

    /// Validate (if configured), allocate a tracking id, acquire its lock,
    /// register the pending wrapper, and forward `insert` to the
    /// transaction (explicit or implicit batch). Spec §4.4.
    pub fn insert(&mut self, item: Value, transaction: Option<&mut Transaction>) -> CoreResult<TrackingId> {
        let item = strip_tracking_id(item);
        let validated = self.run_validator(&item)?;

        let owner = self.owner_of(&transaction);
        let tracking_id = next_tracking_id();
        self.acquire_lock(&tracking_id, owner)?;
        self.pending_items.insert(tracking_id.clone(), Tracker::new(validated));

        match transaction {
            Some(t) => t.insert(tracking_id.clone())?,
            None => self.batch.as_mut().expect("ensured above").insert(tracking_id.clone())?,
        }
        Ok(tracking_id)
    }

    /// Apply `updater` to the wrapper for `tracking_id` (creating one
    /// around the authoritative record if none is pending) and forward
    /// `update` to the transaction. If schema validation is configured, the
    /// updater first runs against a scratch clone *before anything else
    /// happens*; a validation failure raises from this call with no state
    /// change at all — no lock acquired, no pending wrapper created, no
    /// batch transaction lazily started (§7: "Raised from the originating
    /// call; no state change; locks not acquired" is unqualified between
    /// insert and update).
    pub fn update(
        &mut self,
        tracking_id: &TrackingId,
        updater: impl Fn(&mut Tracker),
        transaction: Option<&mut Transaction>,
    ) -> CoreResult<()> {
        let current = self
            .pending_items
            .get(tracking_id)
            .map(|t| t.value())
            .or_else(|| self.items.get(tracking_id).cloned())
            .ok_or_else(|| CoreError::ItemNotFound(tracking_id.clone()))?;

        let mut scratch = Tracker::new(current);
        updater(&mut scratch);
        if let Err(issues) = self.validator.validate(&scratch.value()) {
            return Err(CoreError::Schema { issues });
        }

        let owner = self.owner_of(&transaction);
        self.acquire_lock(tracking_id, owner)?;

        if !self.pending_items.contains_key(tracking_id) {
            let record = self.items.get(tracking_id).cloned().unwrap_or(Value::Null);
            self.pending_items.insert(tracking_id.clone(), Tracker::new(record));
        }

        updater(self.pending_items.get_mut(tracking_id).unwrap());

        match transaction {
            Some(t) => t.update(tracking_id.clone())?,
            None => self.batch.as_mut().expect("ensured above").update(tracking_id.clone())?,
        }
        Ok(())
    }

    /// Locate `tracking_id` and forward `delete`. The item and its wrapper
    /// are removed at settlement, not here (§4.4.2).
    pub fn remove(&mut self, tracking_id: &TrackingId, transaction: Option<&mut Transaction>) -> CoreResult<()> {
        if !self.items.contains_key(tracking_id) && !self.pending_items.contains_key(tracking_id) {
            return Err(CoreError::ItemNotFound(tracking_id.clone()));
        }

        let owner = self.owner_of(&transaction);
        self.acquire_lock(tracking_id, owner)?;

        match transaction {
            Some(t) => t.delete(tracking_id.clone())?,
            None => self.batch.as_mut().expect("ensured above").delete(tracking_id.clone())?,
        }
        Ok(())
    }

    /// The union of authoritative and pending records, preferring pending
    /// on key collision (spec §4.4).
    pub fn get_items(&self) -> Vec<Value> {
        let mut out: Vec<(TrackingId, Value)> = self.items.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (id, tracker) in &self.pending_items {
            if let Some(entry) = out.iter_mut().find(|(k, _)| k == id) {
                entry.1 = tracker.value();
            } else {
                out.push((id.clone(), tracker.value()));
            }
        }
        out.into_iter().map(|(_, v)| v).collect()
    }

    /// Single-item read alongside `get_items` (SPEC_FULL.md supplemented
    /// feature), preferring the pending wrapper on collision.
    pub fn get(&self, tracking_id: &TrackingId) -> Option<Value> {
        if let Some(tracker) = self.pending_items.get(tracking_id) {
            return Some(tracker.value());
        }
        self.items.get(tracking_id).cloned()
    }

    pub fn len(&self) -> usize {
        let mut ids: HashSet<&TrackingId> = self.items.keys().collect();
        ids.extend(self.pending_items.keys());
        ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit the implicit batch transaction, if one is open, then process
    /// whatever settlements that (and any explicit transaction commits
    /// already sent) produced. The explicit, deterministic substitute for
    /// "run at the next microtask boundary" (spec §9's sanctioned
    /// alternative; see `AutoFlusher` for the automatic-dispatch path).
    pub fn flush(&mut self) -> CoreResult<()> {
        if let Some(batch) = self.batch.as_mut() {
            batch.commit()?;
        }
        self.settle();
        Ok(())
    }

    /// Drain and process settlement events already sent by transactions
    /// (batch or explicit). Must be called after committing/rolling back an
    /// explicit transaction obtained from `begin_transaction`.
    pub fn settle(&mut self) {
        while let Ok(Some(settlement)) = self.settlement_rx.try_next() {
            self.apply_settlement(settlement);
        }
    }

    fn apply_settlement(&mut self, settlement: Settlement) {
        let committed = settlement.status == SettlementStatus::Committed;
        let is_batch = self
            .batch
            .as_ref()
            .map(|b| b.id() == &settlement.id)
            .unwrap_or(false);

        if committed {
            for op in &settlement.operations {
                match op.kind {
                    OperationKind::Delete => {
                        self.items.remove(&op.tracking_id);
                    }
                    OperationKind::Insert | OperationKind::Update => {
                        if let Some(tracker) = self.pending_items.get(&op.tracking_id) {
                            self.items.insert(op.tracking_id.clone(), tracker.value());
                        }
                    }
                }
            }
        }

        self.locks.retain(|_, owner| {
            let owned_by_settling = match owner {
                LockOwner::Transaction(id) => *id == settlement.id,
                LockOwner::Batch => is_batch,
            };
            !owned_by_settling
        });

        self.open_transactions.remove(&settlement.id);
        if is_batch {
            self.batch = None;
        }

        if committed {
            self.dispatch_mutations(&settlement.operations);
        } else {
            // Open Question 3: authoritative state is untouched on
            // rollback, but pending wrappers may still reflect user writes;
            // flush them so a subsequent read doesn't see stale drafts.
            for op in &settlement.operations {
                self.pending_items.remove(&op.tracking_id);
            }
        }

        self.try_drain_sync();
    }

    fn dispatch_mutations(&mut self, operations: &[crate::transaction::Operation]) {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for op in operations {
            if !seen.insert(op.tracking_id.clone()) {
                continue;
            }
            let delta = self
                .pending_items
                .get(&op.tracking_id)
                .map(|t| t.get_delta())
                .unwrap_or_default();
            let item = if op.kind == OperationKind::Delete {
                None
            } else {
                self.items.get(&op.tracking_id).cloned()
            };
            entries.push(MutationEntry {
                operation: op.kind,
                tracking_id: op.tracking_id.clone(),
                item,
                delta,
            });
        }

        // A settled item holds no wrapper, regardless of operation kind
        // (spec §3 Lifecycles: "committed items hold no wrapper"). Leaving
        // an insert/update wrapper in `pending_items` after commit would let
        // a later unrelated mutation reuse its stale, never-reset `Delta`,
        // so every distinct tracking id touched by this settlement loses its
        // wrapper here, not only on delete.
        for id in seen {
            self.pending_items.remove(&id);
        }

        if entries.is_empty() {
            return;
        }
        if let Some(handler) = self.on_mutation.clone() {
            let future = handler(entries);
            tokio::spawn(async move {
                if let Err(e) = future.await {
                    log::error!("onMutation handler failed: {e}");
                }
            });
        }
    }

    /// Feed one sync message in, then attempt a drain (spec §4.5).
    pub fn on_sync_message(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::Change(change) => self.sync.push_change(change),
            SyncMessage::UpToDate => self.sync.mark_up_to_date(),
        }
        self.try_drain_sync();
    }

    fn try_drain_sync(&mut self) {
        let safe = self.sync.is_up_to_date() && self.locks.is_empty() && self.batch.is_none() && self.open_transactions.is_empty();
        if !safe {
            return;
        }
        let changes = self.sync.take_buffer_sorted();
        for change in changes {
            self.apply_sync_change(change);
        }
    }

    fn apply_sync_change(&mut self, change: ChangeMessage) {
        match change.operation {
            sync::Operation::Insert => {
                let tracking_id = self.sync.resolve_tracking_id(&change.key);
                self.items.insert(tracking_id, change.value);
            }
            sync::Operation::Update => {
                if let Some(tracking_id) = self.sync.existing_tracking_id(&change.key) {
                    if let Some(existing) = self.items.get(&tracking_id).cloned() {
                        let mut merged = existing;
                        shallow_merge(&mut merged, &change.value);
                        self.items.insert(tracking_id.clone(), merged);
                    }
                    if let Some(tracker) = self.pending_items.get_mut(&tracking_id) {
                        mirror_fields(tracker, &change.value);
                    }
                } else {
                    log::warn!(
                        "sync update for unmapped key {:?} dropped (see Open Question 1)",
                        change.key
                    );
                }
            }
            sync::Operation::Delete => {
                if let Some(tracking_id) = self.sync.existing_tracking_id(&change.key) {
                    self.items.remove(&tracking_id);
                    self.pending_items.remove(&tracking_id);
                }
                self.sync.forget_key(&change.key);
            }
        }
    }

    pub fn attach_sync(&mut self, engine: &dyn sync::SyncEngine, handler: sync::SyncHandler) {
        self.sync.attach(engine, handler);
    }

    pub fn detach_sync(&mut self) {
        self.sync.detach();
    }
}

fn strip_tracking_id(mut item: Value) -> Value {
    if let Value::Object(fields) = &mut item {
        fields.retain(|(k, _)| k != "__tracking_id");
    }
    item
}

fn shallow_merge(existing: &mut Value, patch: &Value) {
    if let Value::Object(patch_fields) = patch {
        for (k, v) in patch_fields {
            if k == "__tracking_id" {
                continue;
            }
            existing.set_field(k, v.clone());
        }
    }
}

fn mirror_fields(tracker: &mut Tracker, patch: &Value) {
    if let Value::Object(patch_fields) = patch {
        for (k, v) in patch_fields {
            if k == "__tracking_id" {
                continue;
            }
            tracker.at(Path::key(k.clone())).set(v.clone());
        }
    }
}

/// Drives a `Collection`'s implicit batch transaction automatically, on a
/// deferred tokio task, rather than requiring an explicit `flush()` call —
/// the "immediate dispatch... next turn" alternative spec §9 names, for
/// callers already running inside a tokio runtime. Mirrors the teacher's
/// `BackgroundDbConnection`, which likewise wraps the mutable cache state
/// behind an `Arc<Mutex<_>>` shared with its background worker task.
#[derive(Clone)]
pub struct AutoFlusher(pub Arc<tokio::sync::Mutex<Collection>>);

impl AutoFlusher {
    pub fn new(collection: Collection) -> Self {
        AutoFlusher(Arc::new(tokio::sync::Mutex::new(collection)))
    }

    pub async fn insert(&self, item: Value) -> CoreResult<TrackingId> {
        let tracking_id = self.0.lock().await.insert(item, None)?;
        self.schedule_flush();
        Ok(tracking_id)
    }

    pub async fn update(&self, tracking_id: &TrackingId, updater: impl Fn(&mut Tracker)) -> CoreResult<()> {
        self.0.lock().await.update(tracking_id, updater, None)?;
        self.schedule_flush();
        Ok(())
    }

    pub async fn remove(&self, tracking_id: &TrackingId) -> CoreResult<()> {
        self.0.lock().await.remove(tracking_id, None)?;
        self.schedule_flush();
        Ok(())
    }

    fn schedule_flush(&self) {
        let handle = self.0.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let mut guard = handle.lock().await;
            if let Err(e) = guard.flush() {
                log::error!("deferred batch flush failed: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn new_collection() -> Collection {
        Collection::new(None, None)
    }

    #[test]
    fn insert_then_flush_materializes_item() {
        let mut collection = new_collection();
        let id = collection.insert(Value::object([("count", Value::Int(0))]), None).unwrap();
        assert!(collection.get(&id).is_some());
        collection.flush().unwrap();
        assert_eq!(
            collection.get(&id),
            Some(Value::object([("count", Value::Int(0))]))
        );
        assert!(collection.locks.is_empty());
    }

    #[tokio::test]
    async fn s4_batched_updates_collapse_to_one_mutation_entry() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let captured: Arc<std::sync::Mutex<Vec<MutationEntry>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured_clone = captured.clone();
        let handler: MutationHandler = Arc::new(move |entries| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            *captured_clone.lock().unwrap() = entries;
            Box::pin(async { Ok(()) })
        });
        let mut collection = Collection::new(None, Some(handler));
        let id = collection
            .insert(Value::object([("id", Value::str("1")), ("count", Value::Int(0))]), None)
            .unwrap();
        collection.flush().unwrap();

        for _ in 0..3 {
            collection
                .update(
                    &id,
                    |t| {
                        let current = t.peek("count").and_then(|v| match v {
                            Value::Int(n) => Some(n),
                            _ => None,
                        }).unwrap_or(0);
                        t.at("count").set(Value::Int(current + 1));
                    },
                    None,
                )
                .unwrap();
        }
        collection.flush().unwrap();
        tokio::task::yield_now().await;

        assert_eq!(collection.get(&id).unwrap().get("count"), Some(&Value::Int(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entries = captured.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tracking_id, id);
        assert_eq!(
            entries[0].delta.set.get(&Path::key("count")),
            Some(&Value::Int(3))
        );
    }

    #[test]
    fn s5_lock_contention_across_transactions() {
        let mut collection = new_collection();
        let mut tx1 = collection.begin_transaction();
        let id = collection.insert(Value::object([("n", Value::Int(1))]), Some(&mut tx1)).unwrap();

        let mut tx2 = collection.begin_transaction();
        let err = collection
            .update(&id, |t| t.at("n").set(Value::Int(2)), Some(&mut tx2))
            .unwrap_err();
        assert!(matches!(err, CoreError::ItemLocked { .. }));
        assert_eq!(tx1.operations().len(), 1);
    }

    #[test]
    fn item_not_found_on_unknown_tracking_id() {
        let mut collection = new_collection();
        let unknown = crate::ids::TrackingId("trk_unknown".into());
        let err = collection.update(&unknown, |_| {}, None).unwrap_err();
        assert_eq!(err, CoreError::ItemNotFound(unknown));
    }

    #[test]
    fn s6_sync_drain_waits_for_locks_to_clear() {
        let mut collection = new_collection();
        let mut tx = collection.begin_transaction();
        let _id = collection.insert(Value::object([("n", Value::Int(1))]), Some(&mut tx)).unwrap();

        collection.on_sync_message(SyncMessage::Change(ChangeMessage {
            key: "k1".into(),
            value: Value::object([("n", Value::Int(10))]),
            operation: sync::Operation::Insert,
            offset: 1,
        }));
        collection.on_sync_message(SyncMessage::Change(ChangeMessage {
            key: "k2".into(),
            value: Value::object([("n", Value::Int(20))]),
            operation: sync::Operation::Insert,
            offset: 2,
        }));
        collection.on_sync_message(SyncMessage::UpToDate);

        assert_eq!(collection.get_items().len(), 1); // local insert only, sync deferred

        tx.commit().unwrap();
        collection.settle();

        let items = collection.get_items();
        assert_eq!(items.len(), 3);
    }

    /// A `Validator` that rejects every value, for exercising the `schema`
    /// error kind (§7).
    struct RejectingValidator;

    impl Validator for RejectingValidator {
        fn validate(&self, _value: &Value) -> Result<Value, Vec<crate::validate::ValidationIssue>> {
            Err(vec![crate::validate::ValidationIssue::new("always rejects")])
        }
    }

    #[test]
    fn insert_rejected_by_validator_leaves_no_state_change() {
        let mut collection = Collection::new(Some(Arc::new(RejectingValidator)), None);
        let err = collection.insert(Value::object([("n", Value::Int(1))]), None).unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }));
        assert!(collection.locks.is_empty());
        assert!(collection.pending_items.is_empty());
        assert!(collection.batch.is_none());
        assert_eq!(collection.get_items().len(), 0);
    }

    #[test]
    fn update_rejected_by_validator_leaves_no_state_change() {
        let mut collection = new_collection();
        let id = collection.insert(Value::object([("n", Value::Int(1))]), None).unwrap();
        collection.flush().unwrap();

        collection.validator = Arc::new(RejectingValidator);
        let err = collection
            .update(&id, |t| t.at("n").set(Value::Int(2)), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }));
        assert!(collection.locks.is_empty(), "no lock acquired on a rejected update");
        assert!(
            collection.pending_items.is_empty(),
            "no pending wrapper created for a rejected update"
        );
        assert!(collection.batch.is_none(), "no batch transaction lazily started");
        assert_eq!(collection.get(&id).unwrap().get("n"), Some(&Value::Int(1)));
    }

    #[test]
    fn update_rejected_by_validator_does_not_block_a_different_owner() {
        // Regression for the lock-before-validate ordering bug: a failed
        // validation must not leave a lock behind that makes an unrelated
        // transaction's update spuriously see item-locked.
        let mut collection = new_collection();
        let id = collection.insert(Value::object([("n", Value::Int(1))]), None).unwrap();
        collection.flush().unwrap();

        collection.validator = Arc::new(RejectingValidator);
        let mut tx = collection.begin_transaction();
        let err = collection
            .update(&id, |t| t.at("n").set(Value::Int(2)), Some(&mut tx))
            .unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }));

        collection.validator = Arc::new(crate::validate::NoopValidator);
        let mut tx2 = collection.begin_transaction();
        collection
            .update(&id, |t| t.at("n").set(Value::Int(3)), Some(&mut tx2))
            .expect("the rejected update must not have left a lock behind");
        tx2.commit().unwrap();
        collection.settle();
        assert_eq!(collection.get(&id).unwrap().get("n"), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn settled_wrapper_does_not_leak_stale_delta_into_a_later_mutation() {
        // Regression: a committed insert/update wrapper must not survive in
        // `pending_items`, or a later unrelated update on the same item
        // would report previously-committed fields in its `onMutation`
        // delta again.
        let captured: Arc<std::sync::Mutex<Vec<MutationEntry>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured_clone = captured.clone();
        let handler: MutationHandler = Arc::new(move |entries| {
            captured_clone.lock().unwrap().extend(entries);
            Box::pin(async { Ok(()) })
        });
        let mut collection = Collection::new(None, Some(handler));

        let id = collection
            .insert(Value::object([("name", Value::str("a")), ("count", Value::Int(0))]), None)
            .unwrap();
        collection.flush().unwrap();
        tokio::task::yield_now().await;
        assert!(collection.pending_items.is_empty());

        collection
            .update(&id, |t| t.at("name").set(Value::str("b")), None)
            .unwrap();
        collection.flush().unwrap();
        tokio::task::yield_now().await;
        assert!(collection.pending_items.is_empty(), "wrapper must be cleared after this commit too");

        collection
            .update(&id, |t| t.at("count").set(Value::Int(1)), None)
            .unwrap();
        collection.flush().unwrap();
        tokio::task::yield_now().await;

        let entries = captured.lock().unwrap();
        let last = entries.last().unwrap();
        assert_eq!(last.delta.set.len(), 1, "only the field touched in this transaction should appear");
        assert_eq!(last.delta.set.get(&Path::key("count")), Some(&Value::Int(1)));
        assert!(last.delta.set.get(&Path::key("name")).is_none());
    }
}
