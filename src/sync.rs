//! The sync reconciler (spec §4.5): buffers inbound sync changes and
//! drains them atomically once it is safe to do so.
//!
//! This module owns the reconciler's own state (the buffer, the
//! up-to-date flag, and the sync-key-to-tracking-id map) plus the
//! `SyncEngine`/`Unsubscribe` collaborator shapes from spec §6. The actual
//! drain algorithm needs write access to a collection's `items` and
//! `pending_items`, so it lives on `Collection` in `collection.rs`, which
//! calls back into the small helpers here (`take_buffer_sorted`,
//! `resolve_tracking_id`, ...) to manipulate reconciler-private state.

use crate::ids::{next_tracking_id, TrackingId};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// `ChangeMessage<T> = { key, value, headers: { operation }, offset }`
/// (spec §6), flattened: `headers.operation` becomes `operation` directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeMessage {
    pub key: String,
    pub value: Value,
    pub operation: Operation,
    pub offset: u64,
}

/// `ControlMessage = { headers: { control: "up-to-date" } }` (spec §6). This
/// is the only control message defined, so it collapses to a unit variant
/// of `SyncMessage` rather than its own type.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    Change(ChangeMessage),
    UpToDate,
}

pub type SyncHandler = Arc<dyn Fn(SyncMessage) + Send + Sync>;
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// `subscribe(onMessage) -> unsubscribe` (spec §6).
pub trait SyncEngine: Send + Sync {
    fn subscribe(&self, handler: SyncHandler) -> Unsubscribe;
}

/// Buffering/bookkeeping state for the reconciler. The gating and draining
/// logic live on `Collection`; see `collection::Collection::on_sync_message`.
pub struct SyncReconciler {
    buffer: Vec<ChangeMessage>,
    up_to_date: bool,
    key_to_tracking_id: HashMap<String, TrackingId>,
    unsubscribe: Option<Unsubscribe>,
}

impl SyncReconciler {
    pub fn new() -> Self {
        SyncReconciler {
            buffer: Vec::new(),
            up_to_date: false,
            key_to_tracking_id: HashMap::new(),
            unsubscribe: None,
        }
    }

    /// Subscribe to `engine`, retaining the returned `unsubscribe` so a
    /// caller can later tear the reconciler down via `detach` (spec §6's
    /// `subscribe(...) -> unsubscribe`, restored as a first-class handle —
    /// see SPEC_FULL.md's supplemented features).
    pub fn attach(&mut self, engine: &dyn SyncEngine, handler: SyncHandler) {
        self.unsubscribe = Some(engine.subscribe(handler));
    }

    pub fn detach(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    pub fn push_change(&mut self, message: ChangeMessage) {
        self.buffer.push(message);
    }

    pub fn mark_up_to_date(&mut self) {
        self.up_to_date = true;
    }

    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    pub(crate) fn take_buffer_sorted(&mut self) -> Vec<ChangeMessage> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.sort_by_key(|m| m.offset);
        buffer
    }

    pub(crate) fn resolve_tracking_id(&mut self, key: &str) -> TrackingId {
        if let Some(id) = self.key_to_tracking_id.get(key) {
            return id.clone();
        }
        let id = next_tracking_id();
        self.key_to_tracking_id.insert(key.to_string(), id.clone());
        id
    }

    pub(crate) fn existing_tracking_id(&self, key: &str) -> Option<TrackingId> {
        self.key_to_tracking_id.get(key).cloned()
    }

    pub(crate) fn forget_key(&mut self, key: &str) {
        self.key_to_tracking_id.remove(key);
    }
}

impl Default for SyncReconciler {
    fn default() -> Self {
        Self::new()
    }
}
