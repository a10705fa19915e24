use super::{EntitySchema, FieldRole, Result, Row, Value};
use std::fmt;

/// A record type the engine can diff, validate and persist.
///
/// Implementations are normally generated with `#[derive(Entity)]`. Fields
/// are addressed by their declaration index in [`Entity::schema`]; the
/// `Default` value is the zero record used as the Create baseline.
pub trait Entity: Clone + Default + fmt::Debug + Send + Sync + 'static {
    fn schema() -> &'static EntitySchema;

    fn field(&self, index: usize) -> Value;

    fn set_field(&mut self, index: usize, value: Value) -> Result<()>;

    fn entity_type() -> &'static str {
        Self::schema().name()
    }

    fn record_id(&self) -> String {
        let Ok(index) = Self::schema().identifier_index() else {
            return String::new();
        };
        match self.field(index) {
            Value::Null => String::new(),
            Value::Text(id) => id,
            other => other.to_string(),
        }
    }

    fn version(&self) -> Option<i64> {
        Self::schema()
            .role_index(FieldRole::Version)
            .and_then(|index| self.field(index).as_i64())
    }

    fn to_row(&self) -> Row {
        (0..Self::schema().field_count())
            .map(|index| self.field(index))
            .collect()
    }

    fn from_row(row: Row) -> Result<Self> {
        let mut record = Self::default();
        for (index, value) in row.into_iter().enumerate() {
            record.set_field(index, value)?;
        }
        Ok(record)
    }
}
