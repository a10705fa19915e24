use crate::core::{Entity, FieldMask, Result, Value};
use crate::transaction::TransactionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: Option<Value>,
    pub new: Value,
}

/// Field-level before/after values, in declaration order.
///
/// Serializes as `{"field": [old, new], ...}` with `null` for an absent old value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeSet {
    changes: Vec<FieldChange>,
}

impl ChangeSet {
    /// Values of the masked fields; `before = None` records creations.
    pub fn from_mask<E: Entity>(mask: &FieldMask, before: Option<&E>, after: &E) -> Self {
        let schema = E::schema();
        let changes = mask
            .iter()
            .filter_map(|index| {
                let field = schema.field_name(index)?;
                Some(FieldChange {
                    field,
                    old: before.map(|record| record.field(index)),
                    new: after.field(index),
                })
            })
            .collect();
        Self { changes }
    }

    pub fn between<E: Entity>(before: &E, after: &E) -> Self {
        Self::from_mask(&FieldMask::diff(before, after), Some(before), after)
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|change| change.field == field)
    }

    pub fn fields(&self) -> Vec<&'static str> {
        self.changes.iter().map(|change| change.field).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl Serialize for ChangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.changes.len()))?;
        for change in &self.changes {
            map.serialize_entry(change.field, &(&change.old, &change.new))?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub effective_actor_id: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub field_changes: ChangeSet,
}

impl AuditRecord {
    pub fn new(
        actor_id: impl Into<String>,
        effective_actor_id: impl Into<String>,
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        field_changes: ChangeSet,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor_id: actor_id.into(),
            effective_actor_id: effective_actor_id.into(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            field_changes,
        }
    }
}

/// Destination for audit records, written inside the operation's transaction.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, tx: TransactionId, record: AuditRecord) -> Result<()>;
}
