//! # Engine Error Types
//!
//! The error surface callers of till-engine see.
//!
//! ## Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EngineError::kind()                              │
//! │                                                                         │
//! │  Validation       bad input shape; rejected before BEGIN                │
//! │  BusinessRule     InsufficientStock, UnbalancedEntry, NotPending, ...   │
//! │                   transaction rolled back                               │
//! │  Authorization    Forbidden, InvalidPin, InvalidApproval                │
//! │                   rolled back and written to the audit trail            │
//! │  Infrastructure   storage / config failures; retry the whole request    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `code()` gives a stable SCREAMING_SNAKE_CASE machine code, used in sync
//! reports and anywhere an error crosses a process boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use till_core::CoreError;
use till_db::DbError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Business-rule, validation or authorization failure from till-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage failure.
    #[error("Database error: {0}")]
    Db(DbError),

    /// Optimistic write lost a race; rerunning the operation may succeed.
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Password hashing failed.
    #[error("Credential error: {0}")]
    Credential(String),
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => EngineError::Core(CoreError::NotFound { entity, id }),
            other => EngineError::Db(other),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::from(DbError::from(err))
    }
}

impl From<till_core::ValidationError> for EngineError {
    fn from(err: till_core::ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    Authorization,
    Infrastructure,
}

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    InsufficientStock,
    UnbalancedEntry,
    AccountNotFound,
    InvalidReference,
    TillAlreadyOpen,
    VarianceReasonRequired,
    InvalidApproval,
    InvalidPin,
    AlreadyClosed,
    NotPending,
    InvalidStatus,
    Forbidden,
    NotFound,
    Conflict,
    DatabaseError,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorCode::UnbalancedEntry => "UNBALANCED_ENTRY",
            ErrorCode::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ErrorCode::InvalidReference => "INVALID_REFERENCE",
            ErrorCode::TillAlreadyOpen => "TILL_ALREADY_OPEN",
            ErrorCode::VarianceReasonRequired => "VARIANCE_REASON_REQUIRED",
            ErrorCode::InvalidApproval => "INVALID_APPROVAL",
            ErrorCode::InvalidPin => "INVALID_PIN",
            ErrorCode::AlreadyClosed => "ALREADY_CLOSED",
            ErrorCode::NotPending => "NOT_PENDING",
            ErrorCode::InvalidStatus => "INVALID_STATUS",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Core(core) => match core {
                CoreError::Validation(_)
                | CoreError::InvalidReference { .. }
                | CoreError::InvalidPaymentAmount { .. }
                | CoreError::NotFound { .. } => ErrorKind::Validation,
                CoreError::Forbidden { .. } | CoreError::InvalidPin | CoreError::InvalidApproval(_) => {
                    ErrorKind::Authorization
                }
                _ => ErrorKind::BusinessRule,
            },
            EngineError::Conflict(_) | EngineError::Db(_) => ErrorKind::Infrastructure,
            EngineError::Config(_) | EngineError::Credential(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Core(core) => match core {
                CoreError::Validation(_) | CoreError::InvalidPaymentAmount { .. } => {
                    ErrorCode::ValidationError
                }
                CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
                CoreError::UnbalancedEntry { .. } => ErrorCode::UnbalancedEntry,
                CoreError::AccountNotFound { .. } => ErrorCode::AccountNotFound,
                CoreError::InvalidReference { .. } => ErrorCode::InvalidReference,
                CoreError::TillAlreadyOpen { .. } => ErrorCode::TillAlreadyOpen,
                CoreError::VarianceReasonRequired { .. } => ErrorCode::VarianceReasonRequired,
                CoreError::InvalidApproval(_) => ErrorCode::InvalidApproval,
                CoreError::InvalidPin => ErrorCode::InvalidPin,
                CoreError::AlreadyClosed { .. } => ErrorCode::AlreadyClosed,
                CoreError::NotPending { .. } => ErrorCode::NotPending,
                CoreError::InvalidInvoiceStatus { .. } => ErrorCode::InvalidStatus,
                CoreError::Forbidden { .. } => ErrorCode::Forbidden,
                CoreError::NotFound { .. } => ErrorCode::NotFound,
            },
            EngineError::Conflict(_) => ErrorCode::Conflict,
            EngineError::Db(_) => ErrorCode::DatabaseError,
            EngineError::Config(_) | EngineError::Credential(_) => ErrorCode::Internal,
        }
    }

    /// True when rerunning the whole operation unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Conflict(_) => true,
            EngineError::Db(db) => db.is_retryable(),
            _ => false,
        }
    }

    /// The wrapped core error, if any.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            EngineError::Core(core) => Some(core),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_kinds() {
        let err = EngineError::from(CoreError::InsufficientStock {
            product_id: "p".into(),
            available: 1,
            requested: 3,
        });
        assert_eq!(err.code(), ErrorCode::InsufficientStock);
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert!(!err.is_retryable());

        let err = EngineError::from(CoreError::InvalidPin);
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(err.code().as_str(), "INVALID_PIN");
    }

    #[test]
    fn test_busy_database_is_retryable() {
        let err = EngineError::from(DbError::Busy("database is locked".into()));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(EngineError::Conflict("balance moved".into()).is_retryable());
    }

    #[test]
    fn test_db_not_found_becomes_core() {
        let err = EngineError::from(DbError::not_found("Invoice", "inv-1"));
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::VarianceReasonRequired).unwrap();
        assert_eq!(json, "\"VARIANCE_REASON_REQUIRED\"");
    }
}
