//! # Shift Rules
//!
//! Cashier shifts, the cash drawer journal and the rules that decide whether
//! a shift may close.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   open_shift(opening_cash)                                              │
//! │        │   OPEN_FLOAT entry, expected = opening                         │
//! │        ▼                                                                │
//! │   ┌────────┐   CASH_SALE / CASH_PAYMENT     expected += amount          │
//! │   │  OPEN  │   CASH_REFUND / CASH_EXPENSE   expected -= amount          │
//! │   └───┬────┘                                                            │
//! │       │  close_shift(counted, approval)                                 │
//! │       │    variance = counted − expected                                │
//! │       │    variance ≠ 0 and reason required and none given → reject     │
//! │       ▼                                                                 │
//! │   ┌────────┐   CLOSE_RECONCILIATION entry, ShiftClosure snapshot        │
//! │   │ CLOSED │   terminal: never reopened                                 │
//! │   └────────┘                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::PaymentMethod;
use crate::validation::validate_reason_code;

/// Version written to every closure snapshot.
///
/// Bump when the set of snapshot columns changes.
pub const CLOSURE_SNAPSHOT_VERSION: i64 = 1;

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashDrawerEntryType {
    OpenFloat,
    CashSale,
    /// Cash received against an outstanding invoice balance.
    CashPayment,
    CashRefund,
    CashExpense,
    CloseReconciliation,
}

impl CashDrawerEntryType {
    /// Signed effect of an entry of this type on expected cash.
    ///
    /// `CLOSE_RECONCILIATION` records the counted amount and never moves
    /// expected cash.
    pub fn expected_delta(&self, amount_pence: i64) -> i64 {
        match self {
            CashDrawerEntryType::OpenFloat
            | CashDrawerEntryType::CashSale
            | CashDrawerEntryType::CashPayment => amount_pence,
            CashDrawerEntryType::CashRefund | CashDrawerEntryType::CashExpense => -amount_pence,
            CashDrawerEntryType::CloseReconciliation => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalKind {
    ManagerPin,
    OwnerOverride,
}

// =============================================================================
// Entities
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Shift {
    pub id: String,
    pub business_id: String,
    pub store_id: String,
    pub till_id: String,
    pub cashier_id: String,
    pub status: ShiftStatus,
    pub opening_cash_pence: i64,
    pub expected_cash_pence: i64,
    pub actual_cash_pence: Option<i64>,
    pub variance_pence: Option<i64>,
    pub variance_reason: Option<String>,
    pub approval_kind: Option<ApprovalKind>,
    pub approved_by: Option<String>,
    pub closed_by: Option<String>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Shift {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == ShiftStatus::Open
    }
}

/// Append-only drawer journal line. `amount_pence` is the absolute amount;
/// direction comes from `entry_type`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashDrawerEntry {
    pub id: String,
    pub shift_id: String,
    pub entry_type: CashDrawerEntryType,
    pub amount_pence: i64,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub actor_id: String,
    pub reason_code: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Immutable closure snapshot with one column per fact.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ShiftClosure {
    pub id: String,
    pub shift_id: String,
    pub business_id: String,
    pub snapshot_version: i64,
    pub opening_cash_pence: i64,
    pub expected_cash_pence: i64,
    pub counted_cash_pence: i64,
    pub variance_pence: i64,
    pub cash_sales_pence: i64,
    pub card_sales_pence: i64,
    pub transfer_sales_pence: i64,
    pub mobile_money_sales_pence: i64,
    pub invoice_count: i64,
    pub approval_kind: ApprovalKind,
    pub approved_by: String,
    pub closed_by: String,
    pub reason_code: Option<String>,
    pub justification: Option<String>,
    #[ts(as = "String")]
    pub closed_at: DateTime<Utc>,
}

// =============================================================================
// Totals
// =============================================================================

/// Applied payment totals for the invoices of one shift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShiftTotals {
    pub cash_pence: i64,
    pub card_pence: i64,
    pub transfer_pence: i64,
    pub mobile_money_pence: i64,
    pub invoice_count: i64,
}

impl ShiftTotals {
    pub fn add(&mut self, method: PaymentMethod, amount_pence: i64) {
        match method {
            PaymentMethod::Cash => self.cash_pence += amount_pence,
            PaymentMethod::Card => self.card_pence += amount_pence,
            PaymentMethod::Transfer => self.transfer_pence += amount_pence,
            PaymentMethod::MobileMoney => self.mobile_money_pence += amount_pence,
        }
    }

    pub fn non_cash_pence(&self) -> i64 {
        self.card_pence + self.transfer_pence + self.mobile_money_pence
    }
}

/// Live X-report of a shift.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShiftSummary {
    pub shift: Shift,
    pub totals: ShiftTotals,
    pub entries: Vec<CashDrawerEntry>,
}

// =============================================================================
// Approval
// =============================================================================

/// How a closure is authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftApproval {
    ManagerPin {
        pin: String,
    },
    OwnerOverride {
        owner_id: String,
        password: String,
        reason_code: String,
        justification: String,
    },
}

impl ShiftApproval {
    pub fn kind(&self) -> ApprovalKind {
        match self {
            ShiftApproval::ManagerPin { .. } => ApprovalKind::ManagerPin,
            ShiftApproval::OwnerOverride { .. } => ApprovalKind::OwnerOverride,
        }
    }

    /// Reason code carried by an owner override.
    pub fn reason_code(&self) -> Option<&str> {
        match self {
            ShiftApproval::ManagerPin { .. } => None,
            ShiftApproval::OwnerOverride { reason_code, .. } => Some(reason_code.as_str()),
        }
    }

    pub fn justification(&self) -> Option<&str> {
        match self {
            ShiftApproval::ManagerPin { .. } => None,
            ShiftApproval::OwnerOverride { justification, .. } => Some(justification.as_str()),
        }
    }

    /// Shape checks done before credentials are verified.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            ShiftApproval::ManagerPin { pin } => {
                if pin.trim().is_empty() {
                    return Err(CoreError::InvalidApproval("manager PIN is empty".into()));
                }
            }
            ShiftApproval::OwnerOverride {
                owner_id,
                password,
                reason_code,
                justification,
            } => {
                if owner_id.trim().is_empty() || password.is_empty() {
                    return Err(CoreError::InvalidApproval(
                        "owner credentials are incomplete".into(),
                    ));
                }
                validate_reason_code("reason_code", reason_code)?;
                if justification.trim().is_empty() {
                    return Err(ValidationError::required("justification").into());
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Rules
// =============================================================================

/// `counted − expected`. Negative means the drawer is short.
#[inline]
pub fn compute_variance(actual_cash_pence: i64, expected_cash_pence: i64) -> i64 {
    actual_cash_pence - expected_cash_pence
}

/// Rejects a non-zero variance without a reason when the business requires one.
pub fn check_variance_reason(
    variance_pence: i64,
    require_reason: bool,
    reason_code: Option<&str>,
) -> CoreResult<()> {
    let has_reason = reason_code.map(|r| !r.trim().is_empty()).unwrap_or(false);
    if variance_pence != 0 && require_reason && !has_reason {
        return Err(CoreError::VarianceReasonRequired { variance_pence });
    }
    Ok(())
}

/// True when |variance| is strictly above a non-negative threshold.
pub fn exceeds_alert_threshold(variance_pence: i64, threshold_pence: i64) -> bool {
    threshold_pence >= 0 && variance_pence.abs() > threshold_pence
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_plus_cash_sales_short_by_500() {
        let mut expected = CashDrawerEntryType::OpenFloat.expected_delta(5000);
        expected += CashDrawerEntryType::CashSale.expected_delta(12000);
        assert_eq!(expected, 17000);

        let variance = compute_variance(16500, expected);
        assert_eq!(variance, -500);

        let err = check_variance_reason(variance, true, None).unwrap_err();
        assert!(matches!(
            err,
            CoreError::VarianceReasonRequired {
                variance_pence: -500
            }
        ));
        assert!(check_variance_reason(variance, true, Some("COUNT_ERROR")).is_ok());
        assert!(check_variance_reason(variance, false, None).is_ok());
    }

    #[test]
    fn test_zero_variance_needs_no_reason() {
        assert!(check_variance_reason(0, true, None).is_ok());
        assert!(check_variance_reason(10, true, Some("  ")).is_err());
    }

    #[test]
    fn test_refunds_and_expenses_reduce_expected() {
        assert_eq!(CashDrawerEntryType::CashRefund.expected_delta(300), -300);
        assert_eq!(CashDrawerEntryType::CashExpense.expected_delta(300), -300);
        assert_eq!(CashDrawerEntryType::CloseReconciliation.expected_delta(300), 0);
    }

    #[test]
    fn test_owner_override_needs_reason_and_justification() {
        let ok = ShiftApproval::OwnerOverride {
            owner_id: "o".into(),
            password: "pw".into(),
            reason_code: "TILL_MISCOUNT".into(),
            justification: "recounted with owner present".into(),
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.kind(), ApprovalKind::OwnerOverride);
        assert_eq!(ok.reason_code(), Some("TILL_MISCOUNT"));

        let blank = ShiftApproval::OwnerOverride {
            owner_id: "o".into(),
            password: "pw".into(),
            reason_code: "TILL_MISCOUNT".into(),
            justification: "   ".into(),
        };
        assert!(matches!(blank.validate(), Err(CoreError::Validation(_))));

        let empty_pin = ShiftApproval::ManagerPin { pin: "".into() };
        assert!(matches!(empty_pin.validate(), Err(CoreError::InvalidApproval(_))));
    }

    #[test]
    fn test_approval_serde_is_tagged() {
        let json = r#"{"kind":"MANAGER_PIN","pin":"4321"}"#;
        let approval: ShiftApproval = serde_json::from_str(json).unwrap();
        assert_eq!(
            approval,
            ShiftApproval::ManagerPin {
                pin: "4321".into()
            }
        );
    }

    #[test]
    fn test_alert_threshold() {
        assert!(exceeds_alert_threshold(-1500, 1000));
        assert!(!exceeds_alert_threshold(1000, 1000));
        assert!(!exceeds_alert_threshold(-500, 1000));
    }

    #[test]
    fn test_totals_by_method() {
        let mut totals = ShiftTotals::default();
        totals.add(PaymentMethod::Cash, 100);
        totals.add(PaymentMethod::Card, 200);
        totals.add(PaymentMethod::MobileMoney, 50);
        assert_eq!(totals.cash_pence, 100);
        assert_eq!(totals.non_cash_pence(), 250);
    }
}
