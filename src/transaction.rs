//! The transaction finite-state-machine (spec §4.3).
//!
//! A `Transaction` is a log plus a lifecycle, nothing more: it does not
//! touch records itself. `insert`/`update`/`delete` append to the log while
//! `began`; `commit`/`rollback` transition to a terminal state and emit a
//! single `Settlement` to the parent channel. Design Notes §9 calls this
//! "actor style... not required" as long as "a single COMMIT produces
//! exactly one outward settlement event carrying the log" — here the
//! "actor" is just a `futures_channel::mpsc` sender the coordinator reads
//! from, matching the channel-based actor shape the teacher uses for its
//! background connection worker.

use crate::error::{CoreError, CoreResult};
use crate::ids::{next_transaction_id, TransactionId, TrackingId};
use futures_channel::mpsc::UnboundedSender;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Began,
    Committing,
    RollingBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

/// One entry in a transaction's log. The settlement path re-reads the
/// wrapper's current record by `tracking_id` at commit time rather than
/// carrying a captured snapshot here, since §4.4.2 writes "the current
/// wrapper's record (post-mutation)" — a value captured at append time
/// could go stale if a later operation in the same transaction touches the
/// same item again before commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub tracking_id: TrackingId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStatus {
    Committed,
    RolledBack,
}

/// The sole outward effect of a transaction: `TRANSACTION_COMPLETED{id,
/// status, operations}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub id: TransactionId,
    pub status: SettlementStatus,
    pub operations: Vec<Operation>,
}

pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    operations: Vec<Operation>,
    parent: UnboundedSender<Settlement>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("operations", &self.operations)
            .finish()
    }
}

impl Transaction {
    pub fn new(parent: UnboundedSender<Settlement>) -> Self {
        Transaction {
            id: next_transaction_id(),
            state: TransactionState::Began,
            operations: Vec::new(),
            parent,
        }
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    fn record(&mut self, kind: OperationKind, tracking_id: TrackingId) -> CoreResult<()> {
        if self.state != TransactionState::Began {
            return Err(CoreError::TransactionState { state: self.state });
        }
        self.operations.push(Operation { kind, tracking_id });
        Ok(())
    }

    pub fn insert(&mut self, tracking_id: TrackingId) -> CoreResult<()> {
        self.record(OperationKind::Insert, tracking_id)
    }

    pub fn update(&mut self, tracking_id: TrackingId) -> CoreResult<()> {
        self.record(OperationKind::Update, tracking_id)
    }

    pub fn delete(&mut self, tracking_id: TrackingId) -> CoreResult<()> {
        self.record(OperationKind::Delete, tracking_id)
    }

    fn settle(&mut self, status: SettlementStatus) -> CoreResult<()> {
        if self.state != TransactionState::Began {
            return Err(CoreError::TransactionState { state: self.state });
        }
        self.state = match status {
            SettlementStatus::Committed => TransactionState::Committing,
            SettlementStatus::RolledBack => TransactionState::RollingBack,
        };
        let settlement = Settlement {
            id: self.id.clone(),
            status,
            operations: self.operations.clone(),
        };
        if self.parent.unbounded_send(settlement).is_err() {
            log::error!("transaction {} parent channel closed, settlement dropped", self.id);
        }
        Ok(())
    }

    pub fn commit(&mut self) -> CoreResult<()> {
        self.settle(SettlementStatus::Committed)
    }

    pub fn rollback(&mut self) -> CoreResult<()> {
        self.settle(SettlementStatus::RolledBack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc::unbounded;

    #[test]
    fn insert_update_delete_append_while_began() {
        let (tx, mut rx) = unbounded();
        let mut txn = Transaction::new(tx);
        txn.insert(TrackingId("trk_0".into())).unwrap();
        txn.update(TrackingId("trk_0".into())).unwrap();
        assert_eq!(txn.operations().len(), 2);
        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committing);
        let settlement = rx.try_next().unwrap().unwrap();
        assert_eq!(settlement.status, SettlementStatus::Committed);
        assert_eq!(settlement.operations.len(), 2);
    }

    #[test]
    fn operations_outside_began_fail_with_transaction_state() {
        let (tx, _rx) = unbounded();
        let mut txn = Transaction::new(tx);
        txn.commit().unwrap();
        let err = txn.insert(TrackingId("trk_1".into())).unwrap_err();
        assert_eq!(
            err,
            CoreError::TransactionState {
                state: TransactionState::Committing
            }
        );
    }

    #[test]
    fn rollback_is_terminal_and_rejects_second_settlement() {
        let (tx, mut rx) = unbounded();
        let mut txn = Transaction::new(tx);
        txn.insert(TrackingId("trk_0".into())).unwrap();
        txn.rollback().unwrap();
        assert_eq!(txn.state(), TransactionState::RollingBack);
        let settlement = rx.try_next().unwrap().unwrap();
        assert_eq!(settlement.status, SettlementStatus::RolledBack);
        assert!(txn.commit().is_err());
    }
}
