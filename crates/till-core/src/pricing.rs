//! # Sale Pricing
//!
//! Turns a cart into priced lines and splits tendered money into applied
//! payments and change.
//!
//! ## Order of Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  per line:                                                              │
//! │    qty_base   = qty_in_unit × conversion_to_base                        │
//! │    gross      = qty_base × unit_price_base                              │
//! │    promo      = free_qty × unit_price_base        (buy N get M)         │
//! │    line disc  = PERCENT/AMOUNT of (gross − promo)                       │
//! │    subtotal   = gross − promo − line disc                               │
//! │                                                                         │
//! │  per order:                                                             │
//! │    order disc = PERCENT/AMOUNT of Σ subtotal                            │
//! │                 allocated to lines by largest remainder                 │
//! │                                                                         │
//! │  per line:                                                              │
//! │    net        = subtotal − allocated order disc                         │
//! │    vat        = net × vat_bps / 10000  (half-up, exclusive)             │
//! │                                                                         │
//! │  invoice total = Σ net + Σ vat                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Promo units are priced off but still leave stock: `qty_base` is what the
//! inventory service decrements.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::costing::{to_base_units, PromoRule};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{allocate_proportionally, Money};
use crate::types::{DiscountType, PaymentMethod, PaymentStatus, VatRate};

// =============================================================================
// Discount
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Discount {
    pub discount_type: DiscountType,
    pub value: i64,
}

impl Discount {
    pub fn percent(value: i64) -> Self {
        Discount {
            discount_type: DiscountType::Percent,
            value,
        }
    }

    pub fn amount(value: i64) -> Self {
        Discount {
            discount_type: DiscountType::Amount,
            value,
        }
    }

    /// Discount in pence on `base`, clamped so it never exceeds `base`.
    pub fn amount_on(&self, base: i64) -> i64 {
        if base <= 0 {
            return 0;
        }
        match self.discount_type {
            DiscountType::Percent => Money::from_pence(base).percent_of(self.value).pence(),
            DiscountType::Amount => self.value.clamp(0, base),
        }
    }
}

// =============================================================================
// Lines
// =============================================================================

/// A cart line with catalog data already resolved.
#[derive(Debug, Clone)]
pub struct PricingLine {
    pub product_id: String,
    pub unit_id: String,
    pub qty_in_unit: i64,
    pub conversion_to_base: i64,
    pub unit_price_base_pence: i64,
    pub vat_rate: VatRate,
    pub promo: Option<PromoRule>,
    pub discount: Option<Discount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedLine {
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
}

impl PricedLine {
    /// Every discount that landed on this line.
    pub fn discount_pence(&self) -> i64 {
        self.promo_discount_pence + self.line_discount_pence + self.order_discount_pence
    }

    fn subtotal_before_order_discount(&self) -> i64 {
        self.gross_pence - self.promo_discount_pence - self.line_discount_pence
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedSale {
    pub lines: Vec<PricedLine>,
    pub gross_pence: i64,
    pub discount_pence: i64,
    pub net_pence: i64,
    pub vat_pence: i64,
    pub total_pence: i64,
}

/// Prices a cart.
///
/// ## Example
/// ```rust
/// use till_core::pricing::{price_sale, PricingLine};
/// use till_core::types::VatRate;
///
/// let line = PricingLine {
///     product_id: "p".into(),
///     unit_id: "ea".into(),
///     qty_in_unit: 3,
///     conversion_to_base: 1,
///     unit_price_base_pence: 1000,
///     vat_rate: VatRate::zero(),
///     promo: None,
///     discount: None,
/// };
/// let sale = price_sale(&[line], None).unwrap();
/// assert_eq!(sale.total_pence, 3000);
/// ```
pub fn price_sale(lines: &[PricingLine], order_discount: Option<&Discount>) -> CoreResult<PricedSale> {
    if lines.is_empty() {
        return Err(ValidationError::required("lines").into());
    }

    let mut priced: Vec<PricedLine> = Vec::with_capacity(lines.len());
    for line in lines {
        priced.push(price_line(line)?);
    }

    // Order discount is spread over post-line-discount subtotals
    let subtotals: Vec<i64> = priced
        .iter()
        .map(PricedLine::subtotal_before_order_discount)
        .collect();
    let subtotal: i64 = subtotals.iter().sum();
    let order_amount = order_discount.map(|d| d.amount_on(subtotal)).unwrap_or(0);
    let shares = allocate_proportionally(order_amount, &subtotals);

    for (line, share) in priced.iter_mut().zip(shares) {
        line.order_discount_pence = share;
        line.net_pence = line.subtotal_before_order_discount() - share;
        line.vat_pence = Money::from_pence(line.net_pence)
            .calculate_vat(VatRate::from_bps(line.vat_rate_bps))
            .pence();
    }

    let gross_pence = priced.iter().map(|l| l.gross_pence).sum();
    let discount_pence = priced.iter().map(PricedLine::discount_pence).sum();
    let net_pence: i64 = priced.iter().map(|l| l.net_pence).sum();
    let vat_pence: i64 = priced.iter().map(|l| l.vat_pence).sum();

    Ok(PricedSale {
        lines: priced,
        gross_pence,
        discount_pence,
        net_pence,
        vat_pence,
        total_pence: net_pence + vat_pence,
    })
}

fn price_line(line: &PricingLine) -> CoreResult<PricedLine> {
    if line.qty_in_unit <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "qty_in_unit".to_string(),
        }
        .into());
    }
    if line.unit_price_base_pence < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price_base_pence".to_string(),
        }
        .into());
    }

    let qty_base = to_base_units(line.qty_in_unit, line.conversion_to_base)?;
    let gross_pence = qty_base
        .checked_mul(line.unit_price_base_pence)
        .ok_or_else(|| ValidationError::invalid("quantity", "line amount overflows"))?;

    let promo_free_qty_base = line.promo.map(|p| p.free_quantity(qty_base)).unwrap_or(0);
    let promo_discount_pence = promo_free_qty_base * line.unit_price_base_pence;

    let after_promo = gross_pence - promo_discount_pence;
    let line_discount_pence = line.discount.map(|d| d.amount_on(after_promo)).unwrap_or(0);

    Ok(PricedLine {
        product_id: line.product_id.clone(),
        unit_id: line.unit_id.clone(),
        qty_in_unit: line.qty_in_unit,
        conversion_to_base: line.conversion_to_base,
        qty_base,
        unit_price_base_pence: line.unit_price_base_pence,
        gross_pence,
        promo_free_qty_base,
        promo_discount_pence,
        line_discount_type: line.discount.map(|d| d.discount_type),
        line_discount_value: line.discount.map(|d| d.value).unwrap_or(0),
        line_discount_pence,
        order_discount_pence: 0,
        net_pence: after_promo - line_discount_pence,
        vat_rate_bps: line.vat_rate.bps(),
        vat_pence: 0,
    })
}

// =============================================================================
// Payment Allocation
// =============================================================================

/// Money handed over by the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Tender {
    pub method: PaymentMethod,
    pub amount_pence: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AppliedTender {
    pub method: PaymentMethod,
    pub tendered_pence: i64,
    pub applied_pence: i64,
    pub change_pence: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentAllocation {
    pub tenders: Vec<AppliedTender>,
    pub paid_pence: i64,
    pub change_pence: i64,
    pub balance_due_pence: i64,
    pub status: PaymentStatus,
}

impl PaymentAllocation {
    /// Cash that stays in the drawer (tendered cash minus change).
    pub fn cash_applied_pence(&self) -> i64 {
        self.tenders
            .iter()
            .filter(|t| t.method.is_cash())
            .map(|t| t.applied_pence)
            .sum()
    }

    /// Applied amount per method, in first-seen order.
    pub fn applied_by_method(&self) -> Vec<(PaymentMethod, i64)> {
        let mut totals: Vec<(PaymentMethod, i64)> = Vec::new();
        for tender in &self.tenders {
            match totals.iter_mut().find(|(m, _)| *m == tender.method) {
                Some((_, sum)) => *sum += tender.applied_pence,
                None => totals.push((tender.method, tender.applied_pence)),
            }
        }
        totals
    }
}

/// Applies tenders against `total_pence`.
///
/// ## Rules
/// - Every tender must be positive
/// - Non-cash tenders are applied in full; if they alone exceed the total
///   the sale is rejected (card terminals do not give change)
/// - Cash covers what remains, in order; any excess becomes change
pub fn allocate_payments(total_pence: i64, tenders: &[Tender]) -> CoreResult<PaymentAllocation> {
    for (idx, tender) in tenders.iter().enumerate() {
        if tender.amount_pence <= 0 {
            return Err(ValidationError::MustBePositive {
                field: format!("payments[{}].amount_pence", idx),
            }
            .into());
        }
    }

    let non_cash: i64 = tenders
        .iter()
        .filter(|t| !t.method.is_cash())
        .map(|t| t.amount_pence)
        .sum();
    if non_cash > total_pence {
        return Err(CoreError::InvalidPaymentAmount {
            reason: format!(
                "non-cash payments {} exceed amount due {}",
                non_cash, total_pence
            ),
        });
    }

    let mut cash_remaining = total_pence - non_cash;
    let mut applied: Vec<AppliedTender> = Vec::with_capacity(tenders.len());
    for tender in tenders {
        let applied_pence = if tender.method.is_cash() {
            let take = tender.amount_pence.min(cash_remaining.max(0));
            cash_remaining -= take;
            take
        } else {
            tender.amount_pence
        };
        applied.push(AppliedTender {
            method: tender.method,
            tendered_pence: tender.amount_pence,
            applied_pence,
            change_pence: tender.amount_pence - applied_pence,
        });
    }

    let paid_pence: i64 = applied.iter().map(|t| t.applied_pence).sum();
    let change_pence: i64 = applied.iter().map(|t| t.change_pence).sum();

    Ok(PaymentAllocation {
        tenders: applied,
        paid_pence,
        change_pence,
        balance_due_pence: (total_pence - paid_pence).max(0),
        status: PaymentStatus::from_amounts(paid_pence, total_pence),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
