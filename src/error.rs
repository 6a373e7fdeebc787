use tokio_postgres::error::SqlState;

/// PostgreSQL error type alias.
pub type PgErr = tokio_postgres::Error;

/// Result type for bulk operations.
pub type BulkResult<T> = Result<T, BulkError>;

/// Everything a bulk operation can fail with.
///
/// `Validation` and `Configuration` are raised before any statement
/// reaches the database. `Conflict` and `Database` carry the driver error
/// unchanged; nothing here retries, since recovery needs the caller's
/// transaction.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    /// A record cannot be serialized for the target table.
    #[error("record {index}, field `{field}`: {reason}")]
    Validation {
        index: usize,
        field: String,
        reason: String,
    },

    /// Contradictory or incomplete field policy.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unique constraint violated by the merge statement.
    #[error("conflict: {0}")]
    Conflict(#[source] PgErr),

    /// Any other failure reported by the database or driver.
    #[error("database error: {0}")]
    Database(#[source] PgErr),

    /// A selected column has no [`Value`](crate::Value) representation.
    #[error("column `{column}` has unsupported type {ty}")]
    Decode { column: String, ty: String },
}

impl BulkError {
    pub fn validation(index: usize, field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            index,
            field: field.to_string(),
            reason: reason.into(),
        }
    }
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<PgErr> for BulkError {
    fn from(err: PgErr) -> Self {
        match err.code() {
            Some(code) if *code == SqlState::UNIQUE_VIOLATION => Self::Conflict(err),
            _ => Self::Database(err),
        }
    }
}
