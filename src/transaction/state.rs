// ============================================================================
// Transaction State Management
// ============================================================================
//
// A transaction moves Active -> Committed/Aborted. Writes are staged as a
// change log plus a row overlay so reads inside the transaction see its own
// writes; nothing reaches committed storage before commit.
//
// ============================================================================

use super::{Change, RowKey};
use crate::core::{DbError, Result, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,

    /// Changes in the order they were made; replayed on commit.
    changes: Vec<Change>,

    /// Latest staged image of every row this transaction wrote.
    overlay: HashMap<RowKey, Row>,

    /// Commit stamp of each row at the time this transaction first read or
    /// wrote it. `None` for rows that did not exist yet.
    base_stamps: HashMap<RowKey, Option<u64>>,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            changes: Vec::new(),
            overlay: HashMap::new(),
            base_stamps: HashMap::new(),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn staged_row(&self, key: &RowKey) -> Option<&Row> {
        self.overlay.get(key)
    }

    /// Remembers the committed stamp of a row read by this transaction,
    /// unless the row was already touched.
    pub fn observe(&mut self, key: RowKey, stamp: Option<u64>) {
        self.base_stamps.entry(key).or_insert(stamp);
    }

    /// Rows this transaction wrote, with the stamp they were based on.
    pub fn written_rows(&self) -> impl Iterator<Item = (&RowKey, Option<u64>)> {
        self.overlay
            .keys()
            .map(|key| (key, self.base_stamps.get(key).copied().flatten()))
    }

    /// Record a change in this transaction
    ///
    /// `base_stamp` is only remembered the first time a row is touched.
    pub fn record_change(&mut self, change: Change, base_stamp: Option<u64>) -> Result<()> {
        self.ensure_active("record change")?;

        if let Some(key) = change.row_key() {
            self.base_stamps.entry(key.clone()).or_insert(base_stamp);
            match &change {
                Change::InsertRow { row, .. } => {
                    self.overlay.insert(key, row.clone());
                }
                Change::UpdateRow { new_row, .. } => {
                    self.overlay.insert(key, new_row.clone());
                }
                Change::AppendAudit(_) => {}
            }
        }

        self.changes.push(change);
        Ok(())
    }

    /// Mark transaction as committed, handing back the change log
    pub fn commit(&mut self) -> Result<Vec<Change>> {
        self.ensure_active("commit")?;
        self.state = TransactionState::Committed;
        self.overlay.clear();
        Ok(std::mem::take(&mut self.changes))
    }

    /// Mark transaction as aborted and discard changes
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active("rollback")?;
        self.changes.clear();
        self.overlay.clear();
        self.state = TransactionState::Aborted;
        Ok(())
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::ExecutionError(format!(
                "Cannot {}: transaction {} is {}",
                action, self.id, self.state
            )));
        }
        Ok(())
    }
}
