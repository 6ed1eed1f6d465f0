//! Error types and HTTP response conversion
//!
//! Two layers sit above the driver's [`StorageError`]:
//!
//! - [`DataError`]: what the data-access layer reports. CRUD failures wrap
//!   the storage error that caused them; transaction lifecycle failures are
//!   their own variants and are never folded into CRUD failures.
//! - [`Error`]: the framework error returned from handlers and middleware,
//!   rendered as a JSON [`ErrorResponse`].

use std::fmt;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ContextUnavailable;
use crate::storage::StorageError;

/// Which transaction limit was exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting to acquire a transaction handle (`max_wait`)
    Acquire,
    /// Total lifetime of the transaction body (`timeout`)
    Lifetime,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquire => write!(f, "max wait"),
            Self::Lifetime => write!(f, "timeout"),
        }
    }
}

/// Errors reported by the data-access layer
#[derive(Debug, Error)]
pub enum DataError {
    /// No request context is active on this call chain
    #[error(transparent)]
    ContextUnavailable(#[from] ContextUnavailable),

    /// Storage rejected a create
    #[error("Failed to create {table} record: {source}")]
    CreateFailed {
        /// Target table
        table: String,
        /// Driver error
        #[source]
        source: StorageError,
    },

    /// Storage rejected an update, soft delete or restore
    #[error("Failed to update {table} record: {source}")]
    UpdateFailed {
        /// Target table
        table: String,
        /// Driver error
        #[source]
        source: StorageError,
    },

    /// Storage rejected a hard delete
    #[error("Failed to delete {table} record: {source}")]
    DeleteFailed {
        /// Target table
        table: String,
        /// Driver error
        #[source]
        source: StorageError,
    },

    /// Storage rejected a read
    #[error("Failed to fetch {table} records: {source}")]
    FetchFailed {
        /// Target table
        table: String,
        /// Driver error
        #[source]
        source: StorageError,
    },

    /// A transaction limit was exceeded; the transaction was rolled back
    #[error("Transaction {id} exceeded its {phase} of {limit:?}")]
    TransactionTimeout {
        /// Transaction id
        id: String,
        /// Limit that was hit
        phase: TimeoutPhase,
        /// Configured limit
        limit: Duration,
    },

    /// The transaction already committed or rolled back
    #[error("Transaction {id} is already closed")]
    TransactionClosed {
        /// Transaction id
        id: String,
    },

    /// The driver could not open a transaction
    #[error("Transaction {id} failed to begin: {source}")]
    BeginFailed {
        /// Transaction id
        id: String,
        /// Driver error
        #[source]
        source: StorageError,
    },

    /// The driver failed to commit; writes were not applied
    #[error("Transaction {id} failed to commit: {source}")]
    CommitFailed {
        /// Transaction id
        id: String,
        /// Driver error
        #[source]
        source: StorageError,
    },

    /// A record could not be converted to or from its typed form
    #[error("Invalid {table} payload: {message}")]
    InvalidPayload {
        /// Target table
        table: String,
        /// What went wrong
        message: String,
    },

    /// The caller's role does not allow the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl DataError {
    /// Whether this error belongs to the transaction lifecycle
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            Self::TransactionTimeout { .. }
                | Self::TransactionClosed { .. }
                | Self::BeginFailed { .. }
                | Self::CommitFailed { .. }
        )
    }

    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CreateFailed { .. }
            | Self::UpdateFailed { .. }
            | Self::DeleteFailed { .. }
            | Self::FetchFailed { .. }
            | Self::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TransactionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::ContextUnavailable(_)
            | Self::TransactionClosed { .. }
            | Self::BeginFailed { .. }
            | Self::CommitFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContextUnavailable(_) => "CONTEXT_UNAVAILABLE",
            Self::CreateFailed { .. } => "CREATE_FAILED",
            Self::UpdateFailed { .. } => "UPDATE_FAILED",
            Self::DeleteFailed { .. } => "DELETE_FAILED",
            Self::FetchFailed { .. } => "FETCH_FAILED",
            Self::TransactionTimeout { .. } => "TRANSACTION_TIMEOUT",
            Self::TransactionClosed { .. } => "TRANSACTION_CLOSED",
            Self::BeginFailed { .. } => "TRANSACTION_BEGIN_FAILED",
            Self::CommitFailed { .. } => "COMMIT_FAILED",
            Self::InvalidPayload { .. } => "INVALID_PAYLOAD",
            Self::Forbidden(_) => "FORBIDDEN",
        }
    }

    /// Message safe to show to API clients
    fn public_message(&self) -> String {
        match self {
            Self::CreateFailed { table, .. } => format!("Could not create {} record", table),
            Self::UpdateFailed { table, .. } => format!("Could not update {} record", table),
            Self::DeleteFailed { table, .. } => format!("Could not delete {} record", table),
            Self::FetchFailed { table, .. } => format!("Could not read {} records", table),
            Self::InvalidPayload { .. } | Self::Forbidden(_) => self.to_string(),
            Self::TransactionTimeout { .. } => "Transaction timed out".to_string(),
            Self::ContextUnavailable(_)
            | Self::TransactionClosed { .. }
            | Self::BeginFailed { .. }
            | Self::CommitFailed { .. } => "Internal server error".to_string(),
        }
    }
}

/// Result type for data-access operations
pub type DataResult<T> = std::result::Result<T, DataError>;

/// Result type alias using the framework error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the framework
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Data-access error
    #[error(transparent)]
    Data(#[from] DataError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<ContextUnavailable> for Error {
    fn from(err: ContextUnavailable) -> Self {
        Error::Data(DataError::from(err))
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            status: status.as_u16(),
        }
    }

    /// Create error response with a code
    pub fn with_code(
        status: StatusCode,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Error::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    e.to_string(),
                ),
            ),

            Error::Data(ref e) => {
                let status = e.status_code();
                if status.is_server_error() {
                    tracing::error!(code = e.code(), "Data access error: {}", e);
                } else {
                    tracing::warn!(code = e.code(), "Data access error: {}", e);
                }
                (
                    status,
                    ErrorResponse::with_code(status, e.code(), e.public_message()),
                )
            }

            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "IO_ERROR",
                        "I/O operation failed",
                    ),
                )
            }

            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ),

            Error::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ),

            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal server error",
                    ),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    fn unique() -> StorageError {
        StorageError::unique_violation("categories", "duplicate name")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_response_with_code() {
        let err = ErrorResponse::with_code(
            StatusCode::BAD_REQUEST,
            "CREATE_FAILED",
            "Could not create categories record",
        );
        assert_eq!(err.status, 400);
        assert_eq!(err.code, Some("CREATE_FAILED".to_string()));
    }

    #[test]
    fn test_crud_failures_are_bad_requests() {
        let errors = [
            DataError::CreateFailed {
                table: "categories".into(),
                source: unique(),
            },
            DataError::UpdateFailed {
                table: "categories".into(),
                source: unique(),
            },
            DataError::DeleteFailed {
                table: "categories".into(),
                source: StorageError::connection_failed("refused"),
            },
        ];
        for err in errors {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
            assert!(!err.is_transaction_error());
        }
    }

    #[test]
    fn test_lifecycle_statuses() {
        let timeout = DataError::TransactionTimeout {
            id: "tx_1".into(),
            phase: TimeoutPhase::Lifetime,
            limit: Duration::from_secs(30),
        };
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert!(timeout.is_transaction_error());
        assert!(timeout.to_string().contains("timeout"));

        let closed = DataError::TransactionClosed { id: "tx_1".into() };
        assert_eq!(closed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(closed.code(), "TRANSACTION_CLOSED");

        let context = DataError::from(ContextUnavailable);
        assert_eq!(context.code(), "CONTEXT_UNAVAILABLE");
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error as _;
        let err = DataError::CreateFailed {
            table: "categories".into(),
            source: unique(),
        };
        let source = err.source().unwrap().to_string();
        assert!(source.contains("unique_violation"));
    }

    #[tokio::test]
    async fn test_data_error_response_hides_driver_details() {
        let response = Error::from(DataError::CreateFailed {
            table: "categories".into(),
            source: unique(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["code"], "CREATE_FAILED");
        assert_eq!(body["status"], 400);
        assert!(!body["error"].as_str().unwrap().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_forbidden_response() {
        let response =
            Error::from(DataError::Forbidden("hard delete requires SuperAdmin".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["code"], "FORBIDDEN");
    }
}
