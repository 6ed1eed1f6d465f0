//! Storage driver error types
//!
//! Drivers report failures as a [`StorageError`] carrying the operation that
//! failed, a coarse [`StorageErrorKind`] and the table involved. The CRUD
//! layer wraps these into [`DataError`](crate::error::DataError) variants, so
//! driver-specific error types (such as `sqlx::Error`) never cross the
//! storage boundary.
//!
//! # Example
//!
//! ```rust
//! use cms_kernel::storage::{StorageError, StorageErrorKind, StorageOperation};
//!
//! let error = StorageError::unique_violation("categories", "name = Tech");
//! assert_eq!(error.kind, StorageErrorKind::UniqueViolation);
//! assert_eq!(error.operation, StorageOperation::Insert);
//! ```

use std::fmt;

/// Driver operation being performed when the error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOperation {
    /// Opening a transaction
    Begin,
    /// Committing a transaction
    Commit,
    /// Rolling back a transaction
    Rollback,
    /// Reading rows
    Find,
    /// Counting rows
    Count,
    /// Grouping rows
    GroupBy,
    /// Inserting a row
    Insert,
    /// Updating rows
    Update,
    /// Deleting rows
    Delete,
    /// Establishing a connection
    Connect,
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
            Self::Find => write!(f, "find"),
            Self::Count => write!(f, "count"),
            Self::GroupBy => write!(f, "group_by"),
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Connect => write!(f, "connect"),
        }
    }
}

/// Category of storage error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    /// A unique constraint rejected the write
    UniqueViolation,
    /// Another constraint (foreign key, check, not-null) rejected the write
    ConstraintViolation,
    /// The query could not be built (bad identifier, unsupported value)
    InvalidQuery,
    /// Failed to reach the database
    ConnectionFailed,
    /// Pool acquisition or statement timed out
    Timeout,
    /// Row could not be encoded or decoded
    Serialization,
    /// The targeted row does not exist
    NotFound,
    /// Any other database-reported failure
    Database,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UniqueViolation => write!(f, "unique_violation"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::InvalidQuery => write!(f, "invalid_query"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Serialization => write!(f, "serialization"),
            Self::NotFound => write!(f, "not_found"),
            Self::Database => write!(f, "database"),
        }
    }
}

/// Structured storage error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageError {
    /// The operation being performed when the error occurred
    pub operation: StorageOperation,
    /// The category of error
    pub kind: StorageErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The table involved, when known
    pub table: Option<String>,
}

impl StorageError {
    /// Create a new storage error
    pub fn new(
        operation: StorageOperation,
        kind: StorageErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            table: None,
        }
    }

    /// Create a unique violation error for an insert into `table`
    pub fn unique_violation(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            StorageOperation::Insert,
            StorageErrorKind::UniqueViolation,
            message,
        )
        .with_table(table)
    }

    /// Create an invalid query error
    pub fn invalid_query(operation: StorageOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StorageErrorKind::InvalidQuery, message)
    }

    /// No row of `table` has the given id
    pub fn not_found(operation: StorageOperation, table: impl Into<String>, id: &str) -> Self {
        Self::new(
            operation,
            StorageErrorKind::NotFound,
            format!("no row with id '{}'", id),
        )
        .with_table(table)
    }

    /// Create a serialization error
    pub fn serialization(operation: StorageOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StorageErrorKind::Serialization, message)
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            StorageOperation::Connect,
            StorageErrorKind::ConnectionFailed,
            message,
        )
    }

    /// Attach the table name
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Replace the operation
    #[must_use]
    pub fn with_operation(mut self, operation: StorageOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Check if this error is transient
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            StorageErrorKind::ConnectionFailed | StorageErrorKind::Timeout
        )
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Storage {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let Some(ref table) = self.table {
            write!(f, " [table: {}]", table)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {}

/// Result type for driver operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match err {
            E::Database(db) => {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                let kind = if code == "23505" {
                    StorageErrorKind::UniqueViolation
                } else if code.starts_with("23") {
                    StorageErrorKind::ConstraintViolation
                } else {
                    StorageErrorKind::Database
                };
                let mut error = Self::new(StorageOperation::Find, kind, db.message().to_string());
                if let Some(table) = db.table() {
                    error = error.with_table(table);
                }
                error
            }
            E::PoolTimedOut => Self::new(
                StorageOperation::Connect,
                StorageErrorKind::Timeout,
                "Connection pool timed out",
            ),
            E::PoolClosed => Self::connection_failed("Connection pool is closed"),
            E::Io(e) => Self::connection_failed(e.to_string()),
            E::Tls(e) => Self::connection_failed(format!("TLS error: {}", e)),
            E::ColumnDecode { index, source } => Self::serialization(
                StorageOperation::Find,
                format!("Failed to decode column {}: {}", index, source),
            ),
            E::Decode(e) => Self::serialization(StorageOperation::Find, e.to_string()),
            other => Self::new(
                StorageOperation::Find,
                StorageErrorKind::Database,
                other.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_table() {
        let error = StorageError::unique_violation("categories", "duplicate name");
        let display = error.to_string();
        assert!(display.contains("unique_violation"));
        assert!(display.contains("insert"));
        assert!(display.contains("[table: categories]"));
    }

    #[test]
    fn test_display_without_table() {
        let error = StorageError::invalid_query(StorageOperation::Find, "bad column");
        assert!(!error.to_string().contains("[table"));
    }

    #[test]
    fn test_with_operation() {
        let error = StorageError::connection_failed("refused")
            .with_operation(StorageOperation::Begin);
        assert_eq!(error.operation, StorageOperation::Begin);
        assert!(error.is_retriable());
    }

    #[test]
    fn test_permanent_errors_not_retriable() {
        assert!(!StorageError::unique_violation("t", "dup").is_retriable());
        assert!(!StorageError::serialization(StorageOperation::Find, "json").is_retriable());
    }
}
