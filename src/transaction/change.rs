// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Each Change is recorded while the transaction runs, applied in order on
// COMMIT and discarded on ROLLBACK.
//
// ============================================================================

use crate::core::Row;
use crate::observe::AuditRecord;

/// Address of one stored record: entity type plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub table: String,
    pub id: String,
}

impl RowKey {
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table, self.id)
    }
}

#[derive(Debug, Clone)]
pub enum Change {
    /// Insert a new record
    InsertRow { key: RowKey, row: Row },

    /// Replace a record with its updated image
    UpdateRow { key: RowKey, new_row: Row },

    /// Append an audit record
    AppendAudit(AuditRecord),
}

impl Change {
    pub fn row_key(&self) -> Option<RowKey> {
        match self {
            Change::InsertRow { key, .. } | Change::UpdateRow { key, .. } => Some(key.clone()),
            Change::AppendAudit(_) => None,
        }
    }
}
