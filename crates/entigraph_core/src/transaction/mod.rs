//! Transactions: snapshot reads, staged writes, validated commits.

mod manager;
mod state;
mod txn;

pub use manager::TransactionManager;
pub use state::{TransactionState, TxMode};
pub use txn::Transaction;

pub(crate) use manager::RecoveredState;
pub(crate) use state::{ChangeSet, HeldReference, Snapshot, Staged};
