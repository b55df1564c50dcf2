//! The core's closed error taxonomy.
//!
//! Every fallible entry point in this crate returns `CoreError`. There are
//! exactly four variants, matching the four rows of the error table: schema
//! validation failures, transaction-state violations, lock contention, and
//! lookups against an unknown tracking id.

use crate::ids::LockOwner;
use crate::transaction::TransactionState;
use crate::validate::ValidationIssue;
use crate::TrackingId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Raised from `insert`/`update` when a configured `Validator` rejects
    /// the value. No state change occurs; locks are not acquired.
    #[error("schema validation failed: {issues:?}")]
    Schema { issues: Vec<ValidationIssue> },

    /// Raised from a `Transaction` method invoked outside the `began` state.
    #[error("transaction is {state:?}, not began")]
    TransactionState { state: TransactionState },

    /// Raised from `insert`/`update`/`remove` when the lock on an item is
    /// held by a different transaction (or the implicit batch).
    #[error("item is locked by {owner}")]
    ItemLocked { owner: LockOwner },

    /// Raised from `update`/`remove` of an item whose tracking id is not
    /// known to the collection.
    #[error("item {0:?} not found")]
    ItemNotFound(TrackingId),
}

pub type CoreResult<T> = Result<T, CoreError>;
