use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Version mismatch for {entity_type} '{id}': expected {expected}, actual {actual}")]
    VersionMismatch {
        entity_type: String,
        id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Convergence of {entity_type} '{id}' did not settle within {limit} passes")]
    IterationLimitExceeded {
        entity_type: String,
        id: String,
        limit: u32,
    },

    #[error("Handler '{handler}' failed for '{id}': {source}")]
    Handler {
        handler: String,
        id: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Persistence error during {stage}: {source}")]
    Persistence {
        stage: &'static str,
        #[source]
        source: Box<DbError>,
    },

    #[error("{entity_type} '{id}' not found")]
    NotFound { entity_type: String, id: String },

    #[error("Write-write conflict: {0}")]
    Conflict(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub fn handler(handler: impl Into<String>, id: impl Into<String>, source: DbError) -> Self {
        Self::Handler {
            handler: handler.into(),
            id: id.into(),
            source: Box::new(source),
        }
    }

    pub fn persistence(stage: &'static str, source: DbError) -> Self {
        Self::Persistence {
            stage,
            source: Box::new(source),
        }
    }

    /// Innermost error behind `Handler` and `Persistence` wrappers.
    pub fn root_cause(&self) -> &DbError {
        match self {
            Self::Handler { source, .. } | Self::Persistence { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Optimistic-concurrency failures that a caller may retry with a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::VersionMismatch { .. } | Self::Conflict(_)
        )
    }
}

/// Attaches the field name to a value conversion failure.
pub fn field_type_error(field: &str, err: DbError) -> DbError {
    DbError::TypeMismatch(format!("field '{}': {}", field, err))
}

pub fn serde_to_db_error(context: &str, err: serde_json::Error) -> DbError {
    DbError::ExecutionError(format!("{}: {}", context, err))
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_looks_through_wrappers() {
        let mismatch = DbError::VersionMismatch {
            entity_type: "invoice".into(),
            id: "inv-1".into(),
            expected: 3,
            actual: 4,
        };
        let wrapped = DbError::persistence("deferred", DbError::handler("invoice.total", "inv-1", mismatch));
        assert!(wrapped.is_retryable());
        assert!(matches!(wrapped.root_cause(), DbError::VersionMismatch { .. }));

        let fatal = DbError::IterationLimitExceeded {
            entity_type: "invoice".into(),
            id: "inv-1".into(),
            limit: 100,
        };
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn handler_error_names_handler_and_id() {
        let err = DbError::handler("invoice.void_total", "inv-7", DbError::Validation("boom".into()));
        let message = err.to_string();
        assert!(message.contains("invoice.void_total"));
        assert!(message.contains("inv-7"));
        assert!(message.contains("boom"));
    }
}
