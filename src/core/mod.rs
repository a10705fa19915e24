pub mod entity;
pub mod error;
pub mod mask;
pub mod types;
pub mod value;

pub use entity::Entity;
pub use error::{DbError, Result, field_type_error, serde_to_db_error};
pub use mask::FieldMask;
pub use types::{EntitySchema, FieldDef, FieldRole, Row};
pub use value::{FieldType, Value};
