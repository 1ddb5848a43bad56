//! # Inventory Costing
//!
//! Weighted-average cost and base-unit conversion.
//!
//! ## Movement Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  delta > 0, cost known     qty += delta                                 │
//! │                            avg  = (old_qty·old_avg + in·cost)           │
//! │                                   ─────────────────────────  (half-up)  │
//! │                                       old_qty + in                      │
//! │                                                                         │
//! │  delta > 0, cost unknown   qty += delta, avg unchanged                  │
//! │  delta < 0                 qty += delta, avg unchanged                  │
//! │                            qty < 0 → InsufficientStock                  │
//! │                            (unless allow_negative)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A negative starting quantity only exists after an authorized correction.
//! Blending against it would invert the average, so the blend treats it as
//! zero and the incoming cost becomes the new average.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::div_round_half_up;

/// Buy `buy_qty` base units, get `get_qty` of them free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PromoRule {
    pub buy_qty: i64,
    pub get_qty: i64,
}

impl PromoRule {
    /// Free base units earned on `qty_base`: `floor(qty / buy) × get`,
    /// capped at `qty_base`.
    pub fn free_quantity(&self, qty_base: i64) -> i64 {
        if self.buy_qty <= 0 || self.get_qty <= 0 || qty_base <= 0 {
            return 0;
        }
        ((qty_base / self.buy_qty) * self.get_qty).min(qty_base)
    }
}

/// Quantity and average cost of one (store, product).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockPosition {
    pub qty_on_hand_base: i64,
    pub avg_cost_base_pence: i64,
}

/// Applies a signed base-unit movement to a position.
///
/// ## Example
/// ```rust
/// use till_core::costing::{apply_movement, StockPosition};
///
/// let start = StockPosition { qty_on_hand_base: 10, avg_cost_base_pence: 100 };
/// let after = apply_movement("p-1", start, 10, Some(200), false).unwrap();
/// assert_eq!(after.qty_on_hand_base, 20);
/// assert_eq!(after.avg_cost_base_pence, 150);
/// ```
pub fn apply_movement(
    product_id: &str,
    current: StockPosition,
    delta_base: i64,
    unit_cost_base_pence: Option<i64>,
    allow_negative: bool,
) -> CoreResult<StockPosition> {
    if delta_base == 0 {
        return Err(ValidationError::invalid("delta_base", "must not be zero").into());
    }
    if let Some(cost) = unit_cost_base_pence {
        if cost < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "unit_cost_base_pence".to_string(),
            }
            .into());
        }
    }

    let new_qty = current
        .qty_on_hand_base
        .checked_add(delta_base)
        .ok_or_else(|| ValidationError::invalid("delta_base", "quantity overflow"))?;

    if delta_base < 0 {
        if new_qty < 0 && !allow_negative {
            return Err(CoreError::InsufficientStock {
                product_id: product_id.to_string(),
                available: current.qty_on_hand_base.max(0),
                requested: -delta_base,
            });
        }
        return Ok(StockPosition {
            qty_on_hand_base: new_qty,
            avg_cost_base_pence: current.avg_cost_base_pence,
        });
    }

    let avg = match unit_cost_base_pence {
        Some(cost) => weighted_average(
            current.qty_on_hand_base,
            current.avg_cost_base_pence,
            delta_base,
            cost,
        ),
        None => current.avg_cost_base_pence,
    };

    Ok(StockPosition {
        qty_on_hand_base: new_qty,
        avg_cost_base_pence: avg,
    })
}

/// Blends an incoming lot into an existing average, rounding half-up.
///
/// Returns `old_avg` unchanged when the combined quantity is zero.
pub fn weighted_average(old_qty: i64, old_avg: i64, in_qty: i64, in_cost: i64) -> i64 {
    let old_qty = old_qty.max(0);
    let total_qty = old_qty as i128 + in_qty as i128;
    if total_qty <= 0 {
        return old_avg;
    }
    let value = old_qty as i128 * old_avg as i128 + in_qty as i128 * in_cost as i128;
    div_round_half_up(value, total_qty)
}

/// Converts an order-entry quantity to base units.
pub fn to_base_units(qty_in_unit: i64, conversion_to_base: i64) -> CoreResult<i64> {
    if conversion_to_base < 1 {
        return Err(ValidationError::invalid("conversion_to_base", "must be at least 1").into());
    }
    qty_in_unit
        .checked_mul(conversion_to_base)
        .ok_or_else(|| ValidationError::invalid("quantity", "overflows base units").into())
}

/// Per-base-unit cost from a per-packaging-unit cost, rounded half-up.
pub fn cost_per_base_unit(unit_cost_pence: i64, conversion_to_base: i64) -> i64 {
    if conversion_to_base <= 1 {
        return unit_cost_pence;
    }
    div_round_half_up(unit_cost_pence as i128, conversion_to_base as i128)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(qty: i64, avg: i64) -> StockPosition {
        StockPosition {
            qty_on_hand_base: qty,
            avg_cost_base_pence: avg,
        }
    }

    #[test]
    fn test_stock_in_blends_average() {
        let after = apply_movement("p", pos(10, 100), 30, Some(140), false).unwrap();
        assert_eq!(after.qty_on_hand_base, 40);
        // (10·100 + 30·140) / 40 = 130
        assert_eq!(after.avg_cost_base_pence, 130);
    }

    #[test]
    fn test_average_rounds_half_up() {
        // (1·100 + 2·101) / 3 = 100.67 → 101
        assert_eq!(weighted_average(1, 100, 2, 101), 101);
        // (1·100 + 1·101) / 2 = 100.5 → 101
        assert_eq!(weighted_average(1, 100, 1, 101), 101);
    }

    #[test]
    fn test_stock_in_without_cost_keeps_average() {
        let after = apply_movement("p", pos(5, 250), 5, None, false).unwrap();
        assert_eq!(after, pos(10, 250));
    }

    #[test]
    fn test_stock_out_keeps_average() {
        let after = apply_movement("p", pos(5, 250), -3, None, false).unwrap();
        assert_eq!(after, pos(2, 250));
    }

    #[test]
    fn test_stock_out_below_zero_rejected() {
        let err = apply_movement("p-1", pos(2, 250), -3, None, false).unwrap_err();
        match err {
            CoreError::InsufficientStock {
                product_id,
                available,
                requested,
            } => {
                assert_eq!(product_id, "p-1");
                assert_eq!(available, 2);
                assert_eq!(requested, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_authorized_negative_then_restock() {
        let short = apply_movement("p", pos(2, 250), -5, None, true).unwrap();
        assert_eq!(short, pos(-3, 250));

        // Negative quantity is ignored by the blend
        let restocked = apply_movement("p", short, 10, Some(300), false).unwrap();
        assert_eq!(restocked, pos(7, 300));
    }

    #[test]
    fn test_degenerate_blend_keeps_average() {
        assert_eq!(weighted_average(0, 120, 0, 500), 120);
    }

    #[test]
    fn test_zero_delta_rejected() {
        assert!(apply_movement("p", pos(1, 1), 0, None, false).is_err());
    }

    #[test]
    fn test_promo_free_quantity() {
        let promo = PromoRule {
            buy_qty: 2,
            get_qty: 1,
        };
        assert_eq!(promo.free_quantity(1), 0);
        assert_eq!(promo.free_quantity(2), 1);
        assert_eq!(promo.free_quantity(5), 2);

        let generous = PromoRule {
            buy_qty: 1,
            get_qty: 3,
        };
        assert_eq!(generous.free_quantity(2), 2);
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(to_base_units(3, 12).unwrap(), 36);
        assert!(to_base_units(3, 0).is_err());
        assert!(to_base_units(i64::MAX, 12).is_err());
        assert_eq!(cost_per_base_unit(1200, 12), 100);
        assert_eq!(cost_per_base_unit(1000, 12), 83);
    }
}
