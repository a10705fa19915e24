use super::Store;
use crate::core::{DbError, Result, Row, Value};
use crate::observe::{AuditRecord, AuditSink};
use crate::transaction::{Change, RowKey, Transaction, TransactionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{Level, event};

#[derive(Debug, Clone)]
struct StoredRow {
    row: Row,
    /// Commit that last wrote this row.
    stamp: u64,
}

/// Transactional in-memory store.
///
/// Writes are staged per transaction and published on commit. Two
/// transactions writing the same row resolve first-committer-wins: the later
/// commit fails with [`DbError::Conflict`] and is rolled back. Audit records
/// are staged the same way, so they vanish with a rolled back transaction.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, HashMap<String, StoredRow>>>,
    transactions: RwLock<HashMap<TransactionId, Transaction>>,
    audit_log: RwLock<Vec<AuditRecord>>,
    commit_stamp: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            audit_log: RwLock::new(Vec::new()),
            commit_stamp: AtomicU64::new(0),
        }
    }

    /// Committed image of a row, ignoring open transactions.
    pub async fn committed_row(&self, entity_type: &str, id: &str) -> Option<Row> {
        let tables = self.tables.read().await;
        tables
            .get(entity_type)
            .and_then(|table| table.get(id))
            .map(|stored| stored.row.clone())
    }

    pub async fn row_count(&self, entity_type: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(entity_type).map(HashMap::len).unwrap_or(0)
    }

    /// Committed audit records in commit order.
    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit_log.read().await.clone()
    }

    pub async fn active_transactions(&self) -> usize {
        self.transactions.read().await.len()
    }

    async fn committed(&self, key: &RowKey) -> Option<StoredRow> {
        let tables = self.tables.read().await;
        tables
            .get(&key.table)
            .and_then(|table| table.get(&key.id))
            .cloned()
    }

    /// Current image of a row as seen by `tx`. The first read of a committed
    /// row pins the stamp the transaction's writes are validated against.
    async fn visible_row(&self, tx: TransactionId, key: &RowKey) -> Result<Option<Row>> {
        {
            let transactions = self.transactions.read().await;
            let transaction = transactions.get(&tx).ok_or_else(|| unknown_transaction(tx))?;
            if let Some(row) = transaction.staged_row(key) {
                return Ok(Some(row.clone()));
            }
        }

        let committed = self.committed(key).await;
        let mut transactions = self.transactions.write().await;
        let transaction = transactions
            .get_mut(&tx)
            .ok_or_else(|| unknown_transaction(tx))?;
        transaction.observe(key.clone(), committed.as_ref().map(|stored| stored.stamp));
        Ok(committed.map(|stored| stored.row))
    }

    async fn stage(&self, tx: TransactionId, change: Change, base_stamp: Option<u64>) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        let transaction = transactions
            .get_mut(&tx)
            .ok_or_else(|| unknown_transaction(tx))?;
        transaction.record_change(change, base_stamp)
    }
}

fn unknown_transaction(tx: TransactionId) -> DbError {
    DbError::ExecutionError(format!("Transaction {} not found", tx))
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<TransactionId> {
        let id = TransactionId::new();
        self.transactions
            .write()
            .await
            .insert(id, Transaction::new(id));
        Ok(id)
    }

    async fn commit(&self, tx: TransactionId) -> Result<()> {
        let mut transaction = self
            .transactions
            .write()
            .await
            .remove(&tx)
            .ok_or_else(|| unknown_transaction(tx))?;

        let mut tables = self.tables.write().await;
        let conflict = transaction.written_rows().find_map(|(key, base)| {
            let current = tables
                .get(&key.table)
                .and_then(|table| table.get(&key.id))
                .map(|stored| stored.stamp);
            (current != base).then(|| key.clone())
        });
        if let Some(key) = conflict {
            transaction.rollback()?;
            event!(Level::DEBUG, txn = %tx, row = %key, "commit rejected by concurrent write");
            return Err(DbError::Conflict(format!(
                "{} was modified by another transaction",
                key
            )));
        }

        let stamp = self.commit_stamp.fetch_add(1, Ordering::SeqCst) + 1;
        let mut audits = Vec::new();
        for change in transaction.commit()? {
            match change {
                Change::InsertRow { key, row } | Change::UpdateRow { key, new_row: row } => {
                    tables
                        .entry(key.table)
                        .or_default()
                        .insert(key.id, StoredRow { row, stamp });
                }
                Change::AppendAudit(record) => audits.push(record),
            }
        }
        drop(tables);

        if !audits.is_empty() {
            self.audit_log.write().await.extend(audits);
        }
        Ok(())
    }

    async fn rollback(&self, tx: TransactionId) -> Result<()> {
        let mut transaction = self
            .transactions
            .write()
            .await
            .remove(&tx)
            .ok_or_else(|| unknown_transaction(tx))?;
        transaction.rollback()
    }

    async fn fetch_row(&self, tx: TransactionId, entity_type: &str, id: &str) -> Result<Option<Row>> {
        self.visible_row(tx, &RowKey::new(entity_type, id)).await
    }

    async fn insert_row(&self, tx: TransactionId, entity_type: &str, id: &str, row: Row) -> Result<()> {
        let key = RowKey::new(entity_type, id);
        if self.visible_row(tx, &key).await?.is_some() {
            return Err(DbError::ExecutionError(format!("{} already exists", key)));
        }
        self.stage(tx, Change::InsertRow { key, row }, None).await
    }

    async fn update_row(
        &self,
        tx: TransactionId,
        entity_type: &str,
        id: &str,
        changes: Vec<(usize, Value)>,
    ) -> Result<()> {
        let key = RowKey::new(entity_type, id);
        let mut row = self
            .visible_row(tx, &key)
            .await?
            .ok_or_else(|| DbError::NotFound {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            })?;

        for (index, value) in changes {
            let slot = row.get_mut(index).ok_or_else(|| {
                DbError::ExecutionError(format!("{} has no field #{}", key, index))
            })?;
            *slot = value;
        }

        let base_stamp = self.committed(&key).await.map(|stored| stored.stamp);
        self.stage(tx, Change::UpdateRow { key, new_row: row }, base_stamp)
            .await
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn record(&self, tx: TransactionId, record: AuditRecord) -> Result<()> {
        self.stage(tx, Change::AppendAudit(record), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{AuditAction, ChangeSet};

    fn row(id: &str, total: i64) -> Row {
        vec![Value::from(id), Value::Integer(total)]
    }

    #[tokio::test]
    async fn reads_see_own_writes_before_commit() {
        let store = MemoryStore::new();
        let tx = store.begin().await.unwrap();

        store.insert_row(tx, "invoice", "inv-1", row("inv-1", 10)).await.unwrap();
        assert!(store.fetch_row(tx, "invoice", "inv-1").await.unwrap().is_some());
        assert!(store.committed_row("invoice", "inv-1").await.is_none());

        store.commit(tx).await.unwrap();
        assert_eq!(store.committed_row("invoice", "inv-1").await, Some(row("inv-1", 10)));
        assert_eq!(store.active_transactions().await, 0);
    }

    #[tokio::test]
    async fn rollback_discards_rows_and_audits() {
        let store = MemoryStore::new();
        let tx = store.begin().await.unwrap();
        store.insert_row(tx, "invoice", "inv-1", row("inv-1", 10)).await.unwrap();
        store
            .record(
                tx,
                AuditRecord::new("u1", "u1", AuditAction::Create, "invoice", "inv-1", ChangeSet::default()),
            )
            .await
            .unwrap();

        store.rollback(tx).await.unwrap();
        assert_eq!(store.row_count("invoice").await, 0);
        assert!(store.audit_records().await.is_empty());
    }

    #[tokio::test]
    async fn update_applies_field_changes() {
        let store = MemoryStore::new();
        let tx = store.begin().await.unwrap();
        store.insert_row(tx, "invoice", "inv-1", row("inv-1", 10)).await.unwrap();
        store
            .update_row(tx, "invoice", "inv-1", vec![(1, Value::Integer(0))])
            .await
            .unwrap();
        store.commit(tx).await.unwrap();

        assert_eq!(store.committed_row("invoice", "inv-1").await, Some(row("inv-1", 0)));
    }

    #[tokio::test]
    async fn duplicate_insert_and_missing_update_fail() {
        let store = MemoryStore::new();
        let tx = store.begin().await.unwrap();
        store.insert_row(tx, "invoice", "inv-1", row("inv-1", 10)).await.unwrap();
        assert!(store.insert_row(tx, "invoice", "inv-1", row("inv-1", 10)).await.is_err());

        let err = store
            .update_row(tx, "invoice", "nope", vec![(1, Value::Integer(1))])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn second_committer_of_same_row_conflicts() {
        let store = MemoryStore::new();
        let setup = store.begin().await.unwrap();
        store.insert_row(setup, "invoice", "inv-1", row("inv-1", 10)).await.unwrap();
        store.commit(setup).await.unwrap();

        let first = store.begin().await.unwrap();
        let second = store.begin().await.unwrap();
        store
            .update_row(first, "invoice", "inv-1", vec![(1, Value::Integer(20))])
            .await
            .unwrap();
        store
            .update_row(second, "invoice", "inv-1", vec![(1, Value::Integer(30))])
            .await
            .unwrap();

        store.commit(first).await.unwrap();
        let err = store.commit(second).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.committed_row("invoice", "inv-1").await, Some(row("inv-1", 20)));
    }

    #[tokio::test]
    async fn write_after_stale_read_conflicts() {
        let store = MemoryStore::new();
        let setup = store.begin().await.unwrap();
        store.insert_row(setup, "invoice", "inv-1", row("inv-1", 10)).await.unwrap();
        store.commit(setup).await.unwrap();

        let reader = store.begin().await.unwrap();
        store.fetch_row(reader, "invoice", "inv-1").await.unwrap();

        let writer = store.begin().await.unwrap();
        store
            .update_row(writer, "invoice", "inv-1", vec![(1, Value::Integer(20))])
            .await
            .unwrap();
        store.commit(writer).await.unwrap();

        store
            .update_row(reader, "invoice", "inv-1", vec![(1, Value::Integer(30))])
            .await
            .unwrap();
        assert!(matches!(store.commit(reader).await, Err(DbError::Conflict(_))));
    }

    #[tokio::test]
    async fn reads_alone_never_conflict() {
        let store = MemoryStore::new();
        let setup = store.begin().await.unwrap();
        store.insert_row(setup, "invoice", "inv-1", row("inv-1", 10)).await.unwrap();
        store.commit(setup).await.unwrap();

        let reader = store.begin().await.unwrap();
        store.fetch_row(reader, "invoice", "inv-1").await.unwrap();

        let writer = store.begin().await.unwrap();
        store
            .update_row(writer, "invoice", "inv-1", vec![(1, Value::Integer(20))])
            .await
            .unwrap();
        store.commit(writer).await.unwrap();

        assert!(store.commit(reader).await.is_ok());
    }
}
