use crate::core::{Result, Row, Value};
use crate::transaction::TransactionId;
use async_trait::async_trait;

/// Pluggable persistence backend.
///
/// Every read and write runs inside a transaction obtained from `begin`;
/// rows are addressed by entity type and identifier and laid out in field
/// declaration order.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<TransactionId>;

    async fn commit(&self, tx: TransactionId) -> Result<()>;

    async fn rollback(&self, tx: TransactionId) -> Result<()>;

    async fn fetch_row(&self, tx: TransactionId, entity_type: &str, id: &str) -> Result<Option<Row>>;

    async fn insert_row(&self, tx: TransactionId, entity_type: &str, id: &str, row: Row) -> Result<()>;

    /// Overwrites the given `(field index, value)` pairs of an existing row.
    async fn update_row(
        &self,
        tx: TransactionId,
        entity_type: &str,
        id: &str,
        changes: Vec<(usize, Value)>,
    ) -> Result<()>;
}
