//! Opaque identifiers threaded through every other module.
//!
//! Both ids are plain newtyped strings, as spec'd ("tracking id (string)").
//! They're allocated by a monotonic counter rather than a random generator —
//! nothing here needs cryptographic unguessability, only uniqueness within
//! one process, and a counter keeps test fixtures deterministic.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TrackingId(pub String);

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static TRACKING_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
static TRANSACTION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_tracking_id() -> TrackingId {
    let n = TRACKING_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    TrackingId(format!("trk_{n}"))
}

pub(crate) fn next_transaction_id() -> TransactionId {
    let n = TRANSACTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    TransactionId(format!("tx_{n}"))
}

/// The literal owner of a lock: an explicit transaction, or the implicit
/// per-turn batch transaction (spec's "the literal transaction id `\"batch\"`").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockOwner {
    Transaction(TransactionId),
    Batch,
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOwner::Transaction(id) => write!(f, "{id}"),
            LockOwner::Batch => write!(f, "batch"),
        }
    }
}
