//! # Error Types
//!
//! Domain-specific error types for till-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  till-core errors (this file)                                          │
//! │  ├── CoreError        - Business-rule violations                       │
//! │  └── ValidationError  - Input shape failures                           │
//! │                                                                         │
//! │  till-db errors                                                        │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  till-engine errors                                                    │
//! │  └── EngineError      - What callers see (kind + machine code)         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError ← DbError             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant here aborts the surrounding transaction. None of them is
//! retryable: the caller has to change something first.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business-rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stock-out would drive the balance below zero.
    ///
    /// ## When This Occurs
    /// - Selling more than the store holds
    /// - Approving a transfer whose source store ran dry after the request
    ///
    /// Only stock adjustments may authorize a negative balance.
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// Journal lines do not balance.
    #[error("Unbalanced journal entry: debits {debits} != credits {credits}")]
    UnbalancedEntry { debits: i64, credits: i64 },

    /// Account code does not exist in the business's chart.
    #[error("Account not found: {code}")]
    AccountNotFound { code: String },

    /// A referenced store, till, customer, product, unit or shift is missing,
    /// inactive, or belongs to another business.
    #[error("Invalid {entity} reference: {id}")]
    InvalidReference { entity: String, id: String },

    /// The till already has an OPEN shift.
    #[error("Till {till_id} already has an open shift")]
    TillAlreadyOpen { till_id: String },

    /// Non-zero variance closed without a reason under a business that requires one.
    #[error("Cash variance of {variance_pence} requires a reason code")]
    VarianceReasonRequired { variance_pence: i64 },

    /// Manager PIN or owner password did not verify.
    #[error("Shift closure approval rejected: {0}")]
    InvalidApproval(String),

    /// Manager PIN did not resolve to a manager of the business.
    #[error("Invalid manager PIN")]
    InvalidPin,

    /// Shift is already CLOSED.
    #[error("Shift {shift_id} is already closed")]
    AlreadyClosed { shift_id: String },

    /// Transfer is no longer PENDING.
    #[error("Stock transfer {transfer_id} is {status}, not PENDING")]
    NotPending { transfer_id: String, status: String },

    /// Invoice status does not allow the operation.
    ///
    /// ## When This Occurs
    /// - Voiding an invoice twice
    /// - Recording a payment against a PAID or VOID invoice
    #[error("Invoice {invoice_id} is {status}, cannot perform operation")]
    InvalidInvoiceStatus { invoice_id: String, status: String },

    /// Payment amounts do not fit the invoice.
    #[error("Invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// The operator's role lacks the capability.
    #[error("Role {role} is not allowed to {capability}")]
    Forbidden { role: String, capability: String },

    /// Entity lookup by id failed.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidReference error.
    pub fn invalid_reference(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::InvalidReference {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a NotFound error.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True for authorization failures (bad PIN, bad password, missing capability).
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidApproval(_) | CoreError::InvalidPin | CoreError::Forbidden { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any transaction begins.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Value is not acceptable for a reason specific to the field.
    #[error("{field} is invalid: {reason}")]
    Invalid { field: String, reason: String },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
