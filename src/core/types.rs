use super::{DbError, Result, Value};
use std::collections::HashSet;

pub type Row = Vec<Value>;

/// Engine-managed meaning of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    Identifier,
    Version,
    CreatedAt,
    UpdatedAt,
    CreatedBy,
    UpdatedBy,
}

impl FieldRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identifier => "id",
            Self::Version => "version",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::CreatedBy => "created_by",
            Self::UpdatedBy => "updated_by",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub role: Option<FieldRole>,
    pub allowed: Option<&'static [&'static str]>,
    pub settable: bool,
}

impl FieldDef {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            role: None,
            allowed: None,
            settable: true,
        }
    }

    pub fn role(mut self, role: FieldRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Restricts the field to a declared set of text values.
    pub fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// Marks the field as not settable by Save.
    pub fn no_save(mut self) -> Self {
        self.settable = false;
        self
    }

    fn check_value(&self, value: &Value) -> Result<()> {
        let Some(allowed) = self.allowed else {
            return Ok(());
        };
        match value {
            Value::Null => Ok(()),
            Value::Text(text) if allowed.contains(&text.as_str()) => Ok(()),
            other => Err(DbError::Validation(format!(
                "Field '{}' must be one of [{}], got '{}'",
                self.name,
                allowed.join(", "),
                other
            ))),
        }
    }
}

/// Ordered field list of one entity type plus the indices of its special fields.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: &'static str,
    fields: Vec<FieldDef>,
}

impl EntitySchema {
    pub fn new(name: &'static str, fields: Vec<FieldDef>) -> Self {
        Self { name, fields }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn field_name(&self, index: usize) -> Option<&'static str> {
        self.fields.get(index).map(|field| field.name)
    }

    pub fn role_index(&self, role: FieldRole) -> Option<usize> {
        self.fields.iter().position(|field| field.role == Some(role))
    }

    pub fn identifier_index(&self) -> Result<usize> {
        self.role_index(FieldRole::Identifier).ok_or_else(|| {
            DbError::Validation(format!("Entity '{}' declares no identifier field", self.name))
        })
    }

    pub fn is_versioned(&self) -> bool {
        self.role_index(FieldRole::Version).is_some()
    }

    /// Whether a change to this field, made by the caller or a handler,
    /// counts toward the Save persistence diff.
    pub fn is_settable(&self, index: usize) -> bool {
        self.fields
            .get(index)
            .map(|field| field.settable && field.role.is_none())
            .unwrap_or(false)
    }

    /// Whether Save may write this field (settable fields plus engine stamps).
    pub fn is_writable(&self, index: usize) -> bool {
        let Some(field) = self.fields.get(index) else {
            return false;
        };
        match field.role {
            Some(FieldRole::Version | FieldRole::UpdatedAt | FieldRole::UpdatedBy) => true,
            Some(_) => false,
            None => field.settable,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DbError::Validation("Entity name must not be empty".into()));
        }

        let mut names = HashSet::new();
        let mut roles = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name) {
                return Err(DbError::Validation(format!(
                    "Entity '{}' declares field '{}' twice",
                    self.name, field.name
                )));
            }
            if let Some(role) = field.role {
                if !roles.insert(role) {
                    return Err(DbError::Validation(format!(
                        "Entity '{}' declares more than one {} field",
                        self.name,
                        role.as_str()
                    )));
                }
            }
        }

        self.identifier_index()?;
        Ok(())
    }

    /// Checks enumerated fields of a row against their declared value sets.
    pub fn check_row(&self, row: &[Value]) -> Result<()> {
        for (field, value) in self.fields.iter().zip(row) {
            field.check_value(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice_schema() -> EntitySchema {
        EntitySchema::new(
            "invoice",
            vec![
                FieldDef::new("id").role(FieldRole::Identifier),
                FieldDef::new("status").one_of(&["open", "voided"]),
                FieldDef::new("total"),
                FieldDef::new("notes").no_save(),
                FieldDef::new("version").role(FieldRole::Version),
            ],
        )
    }

    #[test]
    fn test_schema_lookup() {
        let schema = invoice_schema();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.field_index("total"), Some(2));
        assert_eq!(schema.identifier_index().unwrap(), 0);
        assert!(schema.is_versioned());
    }

    #[test]
    fn test_settable_and_writable_fields() {
        let schema = invoice_schema();
        assert!(schema.is_settable(1));
        assert!(!schema.is_settable(3));
        assert!(!schema.is_settable(4));
        assert!(schema.is_writable(4));
        assert!(!schema.is_writable(0));
        assert!(!schema.is_writable(3));
    }

    #[test]
    fn test_validate_rejects_missing_identifier_and_duplicate_roles() {
        let no_id = EntitySchema::new("thing", vec![FieldDef::new("name")]);
        assert!(matches!(no_id.validate(), Err(DbError::Validation(_))));

        let two_versions = EntitySchema::new(
            "thing",
            vec![
                FieldDef::new("id").role(FieldRole::Identifier),
                FieldDef::new("v1").role(FieldRole::Version),
                FieldDef::new("v2").role(FieldRole::Version),
            ],
        );
        assert!(two_versions.validate().is_err());
    }

    #[test]
    fn test_check_row_enforces_enumerations() {
        let schema = invoice_schema();
        let good = vec![
            Value::from("inv-1"),
            Value::from("open"),
            Value::Integer(10),
            Value::Null,
            Value::Integer(1),
        ];
        assert!(schema.check_row(&good).is_ok());

        let mut bad = good.clone();
        bad[1] = Value::from("archived");
        let err = schema.check_row(&bad).unwrap_err();
        assert!(err.to_string().contains("status"));
    }
}
