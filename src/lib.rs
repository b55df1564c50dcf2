//! A client-side optimistic mutation engine for synchronized collections.
//!
//! Application code mutates records through a [`tracker::Tracker`], which
//! converts every write into a path-addressed [`delta::Delta`] entry. A
//! [`collection::Collection`] owns the authoritative item map, coordinates
//! those mutations through [`transaction::Transaction`]s (explicit or the
//! implicit per-turn batch), and reconciles them against an inbound stream of
//! authoritative changes via [`sync::SyncReconciler`].
//!
//! Schema validation and the sync transport are external collaborators,
//! consumed through the [`validate::Validator`] and [`sync::SyncEngine`]
//! traits respectively; this crate does not implement either.

pub mod collection;
pub mod delta;
pub mod error;
pub mod ids;
pub mod path;
pub mod sync;
pub mod tracker;
pub mod transaction;
pub mod validate;
pub mod value;

pub use collection::{AutoFlusher, Collection, MutationEntry, MutationHandler};
pub use delta::{Delta, PopEnd, Splice};
pub use error::{CoreError, CoreResult};
pub use ids::{LockOwner, TrackingId, TransactionId};
pub use path::{Path, Segment};
pub use sync::{ChangeMessage, SyncEngine, SyncHandler, SyncMessage, SyncReconciler, Unsubscribe};
pub use tracker::{Cursor, Tracker};
pub use transaction::{Operation, OperationKind, Settlement, SettlementStatus, Transaction, TransactionState};
pub use validate::{NoopValidator, ValidationIssue, Validator};
pub use value::{Opaque, OpaqueRegex, Value};
