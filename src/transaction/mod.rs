// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Transactions stage their writes in a change log and become visible
// atomically on commit. Concurrent writers of the same row are resolved
// first-committer-wins at commit time.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::{Change, RowKey};
pub use state::{Transaction, TransactionId, TransactionState};
