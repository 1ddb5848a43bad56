//! # Domain Types
//!
//! Entities and status enums shared by every layer.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Tenancy         Catalog & Stock        Sales               Transfers   │
//! │  ─────────       ───────────────        ─────               ─────────   │
//! │  Business        Product                SalesInvoice        StockTransfer│
//! │  Store           ProductUnit            SalesInvoiceLine    ...Line     │
//! │  Till            InventoryBalance       SalesPayment                    │
//! │  User            InventoryMovement                                      │
//! │  Customer                                                               │
//! │                                                                         │
//! │  Ledger entities live in [`crate::ledger`], shift entities in           │
//! │  [`crate::shift`].                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every entity carries its `business_id` (directly or through its parent):
//! nothing in the core resolves a "current" business implicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::costing::PromoRule;
use crate::ledger::accounts;
use crate::policy::Role;

// =============================================================================
// VAT Rate
// =============================================================================

/// VAT rate in basis points (2000 = 20%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VatRate(u32);

impl VatRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        VatRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        VatRate(0)
    }
}

// =============================================================================
// Payment Status
// =============================================================================

/// Settlement state of an invoice.
///
/// ```text
///   UNPAID ──► PART_PAID ──► PAID ──► VOID / RETURNED (terminal)
///      └──────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    PartPaid,
    Paid,
    Returned,
    Void,
}

impl PaymentStatus {
    /// Derives the status from amounts: PAID if paid ≥ total, PART_PAID if
    /// 0 < paid < total, UNPAID otherwise.
    pub fn from_amounts(paid_pence: i64, total_pence: i64) -> Self {
        if paid_pence >= total_pence {
            PaymentStatus::Paid
        } else if paid_pence > 0 {
            PaymentStatus::PartPaid
        } else {
            PaymentStatus::Unpaid
        }
    }

    /// True once the invoice can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Void | PaymentStatus::Returned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::PartPaid => "PART_PAID",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Returned => "RETURNED",
            PaymentStatus::Void => "VOID",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Physical cash. The only method that can produce change.
    Cash,
    /// Card on an external terminal.
    Card,
    /// Bank transfer.
    Transfer,
    /// Mobile money wallet.
    MobileMoney,
}

impl PaymentMethod {
    /// Asset account debited when this method receives money.
    pub fn ledger_account(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => accounts::CASH,
            PaymentMethod::Card => accounts::CARD_CLEARING,
            PaymentMethod::Transfer => accounts::BANK,
            PaymentMethod::MobileMoney => accounts::MOBILE_MONEY,
        }
    }

    #[inline]
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }
}

// =============================================================================
// Discount Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// Whole percent, clamped to [0, 100].
    Percent,
    /// Pence, clamped to [0, amount being discounted].
    Amount,
}

// =============================================================================
// Stock Movement Reason
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockMovementReason {
    Sale,
    SaleVoid,
    Purchase,
    Adjustment,
    TransferOut,
    TransferIn,
}

impl StockMovementReason {
    /// Only stock-count corrections may push a balance below zero.
    pub fn allows_negative(&self) -> bool {
        matches!(self, StockMovementReason::Adjustment)
    }
}

// =============================================================================
// Transfer Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tenancy
// =============================================================================

/// A tenant. Owns its chart of accounts, stores, users and catalog.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Business {
    pub id: String,
    pub name: String,
    /// ISO 4217 code, display only.
    pub currency: String,
    /// Reject non-zero shift variance without a reason code.
    pub require_variance_reason: bool,
    /// |variance| above this raises a risk alert at shift close.
    pub variance_alert_threshold_pence: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Store {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Till {
    pub id: String,
    pub business_id: String,
    pub store_id: String,
    pub name: String,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// An operator. Credentials are argon2 PHC strings and never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct User {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub role: Role,
    #[serde(skip)]
    #[ts(skip)]
    pub pin_hash: Option<String>,
    #[serde(skip)]
    #[ts(skip)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub phone: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Catalog
// =============================================================================

/// A sellable product. Price and VAT are per base unit.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub business_id: String,
    pub sku: String,
    pub name: String,
    pub unit_price_base_pence: i64,
    pub vat_rate_bps: u32,
    /// Buy this many base units...
    pub promo_buy_qty: Option<i64>,
    /// ...get this many free.
    pub promo_get_qty: Option<i64>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn vat_rate(&self) -> VatRate {
        VatRate::from_bps(self.vat_rate_bps)
    }

    /// The product's buy-N-get-M rule, if both halves are set and positive.
    pub fn promo(&self) -> Option<PromoRule> {
        match (self.promo_buy_qty, self.promo_get_qty) {
            (Some(buy), Some(get)) if buy > 0 && get > 0 => Some(PromoRule {
                buy_qty: buy,
                get_qty: get,
            }),
            _ => None,
        }
    }
}

/// A unit a product can be sold or ordered in.
///
/// Exactly one row per product has `is_base_unit = true` and
/// `conversion_to_base = 1`; packaging units have `conversion_to_base > 1`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductUnit {
    pub id: String,
    pub product_id: String,
    pub unit_id: String,
    pub unit_name: String,
    pub conversion_to_base: i64,
    pub is_base_unit: bool,
}

// =============================================================================
// Inventory
// =============================================================================

/// Stock of one product at one store. Never deleted, only zeroed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryBalance {
    pub store_id: String,
    pub product_id: String,
    pub qty_on_hand_base: i64,
    pub avg_cost_base_pence: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of an applied stock movement.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryMovement {
    pub id: String,
    pub business_id: String,
    pub store_id: String,
    pub product_id: String,
    pub delta_base: i64,
    pub unit_cost_base_pence: Option<i64>,
    pub qty_after_base: i64,
    pub avg_cost_after_pence: i64,
    pub reason: StockMovementReason,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sales
// =============================================================================

/// A persisted invoice with its computed totals.
///
/// Immutable after creation except for payment additions and the terminal
/// transition to VOID.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SalesInvoice {
    pub id: String,
    pub business_id: String,
    pub store_id: String,
    pub till_id: Option<String>,
    pub cashier_id: String,
    pub customer_id: Option<String>,
    pub shift_id: Option<String>,
    pub invoice_number: String,
    /// Idempotency key, unique per business.
    pub external_ref: Option<String>,
    pub payment_status: PaymentStatus,
    /// Sum of line gross (qty × unit price) before any discount.
    pub gross_pence: i64,
    /// Promo + line + order discounts.
    pub discount_pence: i64,
    pub net_pence: i64,
    pub vat_pence: i64,
    /// net + VAT.
    pub total_pence: i64,
    pub paid_pence: i64,
    pub change_pence: i64,
    /// Cost of goods at average cost read when stock was decremented.
    pub cost_pence: i64,
    pub journal_entry_id: Option<String>,
    pub void_reason: Option<String>,
    #[ts(as = "Option<String>")]
    pub voided_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub lines: Vec<SalesInvoiceLine>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub payments: Vec<SalesPayment>,
}

impl SalesInvoice {
    /// Outstanding amount still owed.
    pub fn balance_due_pence(&self) -> i64 {
        (self.total_pence - self.paid_pence).max(0)
    }
}

/// One priced line, frozen at sale time.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SalesInvoiceLine {
    pub id: String,
    pub invoice_id: String,
    pub line_no: i64,
    pub product_id: String,
    pub unit_id: String,
    pub qty_in_unit: i64,
    pub conversion_to_base: i64,
    pub qty_base: i64,
    pub unit_price_base_pence: i64,
    pub gross_pence: i64,
    pub promo_free_qty_base: i64,
    pub promo_discount_pence: i64,
    pub line_discount_type: Option<DiscountType>,
    pub line_discount_value: i64,
    pub line_discount_pence: i64,
    pub order_discount_pence: i64,
    pub net_pence: i64,
    pub vat_rate_bps: u32,
    pub vat_pence: i64,
    pub unit_cost_base_pence: i64,
    pub cost_pence: i64,
}

/// A payment applied to an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SalesPayment {
    pub id: String,
    pub invoice_id: String,
    pub method: PaymentMethod,
    /// Amount applied to the invoice.
    pub amount_pence: i64,
    /// Amount handed over (cash only differs from `amount_pence`).
    pub tendered_pence: i64,
    pub change_pence: i64,
    pub shift_id: Option<String>,
    pub recorded_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Stock Transfers
// =============================================================================

/// Two-phase move of stock between stores of one business.
///
/// ```text
///   PENDING ──approve──► COMPLETED
///      └─────cancel────► CANCELLED
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockTransfer {
    pub id: String,
    pub business_id: String,
    pub from_store_id: String,
    pub to_store_id: String,
    pub status: TransferStatus,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub note: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub lines: Vec<StockTransferLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockTransferLine {
    pub id: String,
    pub transfer_id: String,
    pub line_no: i64,
    pub product_id: String,
    pub unit_id: String,
    pub qty_in_unit: i64,
    pub qty_base: i64,
    /// Source average cost, filled in at approval.
    pub unit_cost_base_pence: Option<i64>,
}

// =============================================================================
// Risk Alerts
// =============================================================================

/// Out-of-band signal raised after a committed operation. Never blocks it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct RiskAlert {
    pub id: String,
    pub business_id: String,
    pub kind: String,
    pub subject_type: String,
    pub subject_id: String,
    pub amount_pence: i64,
    pub threshold_pence: i64,
    pub message: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_from_amounts() {
        assert_eq!(PaymentStatus::from_amounts(3000, 3000), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_amounts(3500, 3000), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_amounts(1, 3000), PaymentStatus::PartPaid);
        assert_eq!(PaymentStatus::from_amounts(0, 3000), PaymentStatus::Unpaid);
        // A fully discounted invoice is settled with nothing paid
        assert_eq!(PaymentStatus::from_amounts(0, 0), PaymentStatus::Paid);
    }

    #[test]
    fn test_payment_method_accounts() {
        assert_eq!(PaymentMethod::Cash.ledger_account(), accounts::CASH);
        assert_eq!(PaymentMethod::Card.ledger_account(), accounts::CARD_CLEARING);
        assert_eq!(PaymentMethod::MobileMoney.ledger_account(), accounts::MOBILE_MONEY);
        assert!(PaymentMethod::Cash.is_cash());
        assert!(!PaymentMethod::Transfer.is_cash());
    }

    #[test]
    fn test_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&PaymentStatus::PartPaid).unwrap();
        assert_eq!(json, "\"PART_PAID\"");
        let json = serde_json::to_string(&PaymentMethod::MobileMoney).unwrap();
        assert_eq!(json, "\"MOBILE_MONEY\"");
    }

    #[test]
    fn test_product_promo_requires_both_halves() {
        let mut product = Product {
            id: "p".into(),
            business_id: "b".into(),
            sku: "SKU".into(),
            name: "Soap".into(),
            unit_price_base_pence: 100,
            vat_rate_bps: 0,
            promo_buy_qty: Some(2),
            promo_get_qty: None,
            is_active: true,
            created_at: Utc::now(),
        };
        assert!(product.promo().is_none());
        assert_eq!(product.vat_rate(), VatRate::zero());
        product.vat_rate_bps = 2000;
        assert_eq!(product.vat_rate().bps(), 2000);
        product.promo_get_qty = Some(1);
        assert_eq!(
            product.promo(),
            Some(PromoRule {
                buy_qty: 2,
                get_qty: 1
            })
        );
    }
}
