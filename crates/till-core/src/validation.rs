//! # Validation Module
//!
//! Input shape checks run before any transaction begins.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: THIS MODULE                                                   │
//! │  ├── Required ids, quantity bounds, amount signs                       │
//! │  └── Idempotency key and reason code shape                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Engine services (inside the transaction)                     │
//! │  └── Tenant ownership, stock, status transitions                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints on amounts                                      │
//! │  └── UNIQUE constraints (invoice number, external ref, open shift)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::{MAX_EXTERNAL_REF_LEN, MAX_LINE_QUANTITY, MAX_SALE_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted reason code (variance, void, adjustment).
pub const MAX_REASON_LEN: usize = 64;

// =============================================================================
// String Validators
// =============================================================================

/// Requires a non-blank string.
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    Ok(())
}

/// Validates an idempotency key.
///
/// ## Example
/// ```rust
/// use till_core::validation::validate_external_ref;
///
/// assert!(validate_external_ref("OFFLINE_SYNC:abc").is_ok());
/// assert!(validate_external_ref("  ").is_err());
/// ```
pub fn validate_external_ref(external_ref: &str) -> ValidationResult<()> {
    validate_required("external_ref", external_ref)?;
    if external_ref.len() > MAX_EXTERNAL_REF_LEN {
        return Err(ValidationError::TooLong {
            field: "external_ref".to_string(),
            max: MAX_EXTERNAL_REF_LEN,
        });
    }
    Ok(())
}

/// Validates a reason code: non-blank, short, uppercase letters, digits or `_`.
pub fn validate_reason_code(field: &str, code: &str) -> ValidationResult<()> {
    validate_required(field, code)?;
    if code.len() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_REASON_LEN,
        });
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError::invalid(
            field,
            "must contain only A-Z, 0-9 and underscores",
        ));
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates an order-entry quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY
pub fn validate_quantity(field: &str, qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

pub fn validate_positive_amount(field: &str, pence: i64) -> ValidationResult<()> {
    if pence <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

pub fn validate_non_negative_amount(field: &str, pence: i64) -> ValidationResult<()> {
    if pence < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a line count against MAX_SALE_LINES.
pub fn validate_line_count(count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::required("lines"));
    }
    if count > MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity("qty", 1).is_ok());
        assert!(validate_quantity("qty", MAX_LINE_QUANTITY).is_ok());

        assert!(validate_quantity("qty", 0).is_err());
        assert!(validate_quantity("qty", -1).is_err());
        assert!(validate_quantity("qty", MAX_LINE_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_external_ref() {
        assert!(validate_external_ref("OFFLINE_SYNC:1").is_ok());
        assert!(validate_external_ref("").is_err());
        assert!(validate_external_ref(&"x".repeat(MAX_EXTERNAL_REF_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_reason_code() {
        assert!(validate_reason_code("reason", "COUNT_ERROR").is_ok());
        assert!(validate_reason_code("reason", "damaged").is_err());
        assert!(validate_reason_code("reason", "").is_err());
    }

    #[test]
    fn test_validate_amounts_and_lines() {
        assert!(validate_positive_amount("amount", 1).is_ok());
        assert!(validate_positive_amount("amount", 0).is_err());
        assert!(validate_non_negative_amount("amount", 0).is_ok());
        assert!(validate_non_negative_amount("amount", -1).is_err());
        assert!(validate_line_count(0).is_err());
        assert!(validate_line_count(MAX_SALE_LINES + 1).is_err());
        assert!(validate_line_count(3).is_ok());
    }
}
