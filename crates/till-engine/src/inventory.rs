//! # Inventory Costing
//!
//! Stock movements at weighted-average cost, applied inside the caller's
//! transaction.
//!
//! ## One Movement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apply_stock_movement(conn, business, StockMove)                        │
//! │                                                                         │
//! │  ensure_balance()  zero row on first touch                              │
//! │  find_balance()    (qty, avg) as read                                   │
//! │  apply_movement()  till_core::costing, InsufficientStock unless the    │
//! │                    reason allows negative stock                         │
//! │  swap_balance()    UPDATE ... WHERE qty = read AND avg = read           │
//! │                    0 rows → Conflict → whole operation retried          │
//! │  insert_movement() append-only history                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Receipts and count adjustments are the two operations here that stand on
//! their own; sales and transfers call [`apply_stock_movement`] from inside
//! their own transactions.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::audit::AuditEvent;
use crate::context::{self, OperatorContext};
use crate::error::{EngineError, EngineResult};
use crate::ledger;
use crate::retry::with_retry;
use crate::Engine;
use till_core::costing::{apply_movement, cost_per_base_unit, to_base_units, StockPosition};
use till_core::ledger::{accounts, JournalDraft};
use till_core::validation::{
    validate_line_count, validate_quantity, validate_reason_code, validate_required,
};
use till_core::{
    new_id, Capability, CoreError, InventoryMovement, PaymentMethod, Product, ProductUnit, Store,
    StockMovementReason, ValidationError, MAX_LINE_QUANTITY,
};
use till_db::{CatalogRepository, InventoryRepository, TenancyRepository};

pub const RECEIPT_REFERENCE: &str = "STOCK_RECEIPT";
pub const ADJUSTMENT_REFERENCE: &str = "STOCK_ADJUSTMENT";

// =============================================================================
// Movement
// =============================================================================

/// One signed change to a (store, product) balance.
#[derive(Debug, Clone)]
pub struct StockMove<'a> {
    pub store_id: &'a str,
    pub product_id: &'a str,
    pub delta_base: i64,
    /// Cost per base unit of incoming stock. `None` keeps the average.
    pub unit_cost_base_pence: Option<i64>,
    pub reason: StockMovementReason,
    pub reference_type: &'a str,
    pub reference_id: &'a str,
}

/// Applies a movement and returns the position before and after it.
pub async fn apply_stock_movement(
    conn: &mut SqliteConnection,
    business_id: &str,
    movement: &StockMove<'_>,
) -> EngineResult<(StockPosition, StockPosition)> {
    let now = Utc::now();
    InventoryRepository::ensure_balance(&mut *conn, movement.store_id, movement.product_id, now)
        .await?;

    let before = InventoryRepository::find_balance(&mut *conn, movement.store_id, movement.product_id)
        .await?
        .map(|b| StockPosition {
            qty_on_hand_base: b.qty_on_hand_base,
            avg_cost_base_pence: b.avg_cost_base_pence,
        })
        .unwrap_or_default();

    let after = apply_movement(
        movement.product_id,
        before,
        movement.delta_base,
        movement.unit_cost_base_pence,
        movement.reason.allows_negative(),
    )?;

    let swapped = InventoryRepository::swap_balance(
        &mut *conn,
        movement.store_id,
        movement.product_id,
        before.qty_on_hand_base,
        before.avg_cost_base_pence,
        after.qty_on_hand_base,
        after.avg_cost_base_pence,
        now,
    )
    .await?;
    if !swapped {
        return Err(EngineError::Conflict(format!(
            "inventory balance for product {} at store {} changed concurrently",
            movement.product_id, movement.store_id
        )));
    }

    // Outgoing stock is recorded at the average it left at
    let recorded_cost = movement
        .unit_cost_base_pence
        .or_else(|| (movement.delta_base < 0).then_some(before.avg_cost_base_pence));

    InventoryRepository::insert_movement(
        &mut *conn,
        &InventoryMovement {
            id: new_id(),
            business_id: business_id.to_string(),
            store_id: movement.store_id.to_string(),
            product_id: movement.product_id.to_string(),
            delta_base: movement.delta_base,
            unit_cost_base_pence: recorded_cost,
            qty_after_base: after.qty_on_hand_base,
            avg_cost_after_pence: after.avg_cost_base_pence,
            reason: movement.reason,
            reference_type: Some(movement.reference_type.to_string()),
            reference_id: Some(movement.reference_id.to_string()),
            created_at: now,
        },
    )
    .await?;

    debug!(
        store_id = %movement.store_id,
        product_id = %movement.product_id,
        delta = movement.delta_base,
        qty_after = after.qty_on_hand_base,
        avg_after = after.avg_cost_base_pence,
        "Stock movement applied"
    );
    Ok((before, after))
}

// =============================================================================
// Reference Resolution
// =============================================================================

/// An active store of the business.
pub(crate) async fn resolve_store(
    conn: &mut SqliteConnection,
    business_id: &str,
    store_id: &str,
) -> EngineResult<Store> {
    TenancyRepository::find_store(conn, business_id, store_id)
        .await?
        .filter(|s| s.is_active)
        .ok_or_else(|| CoreError::invalid_reference("store", store_id).into())
}

/// An active product of the business and the unit it is handled in.
pub(crate) async fn resolve_product_unit(
    conn: &mut SqliteConnection,
    business_id: &str,
    product_id: &str,
    unit_id: &str,
) -> EngineResult<(Product, ProductUnit)> {
    let product = CatalogRepository::find_product(&mut *conn, business_id, product_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| CoreError::invalid_reference("product", product_id))?;
    let unit = CatalogRepository::find_product_unit(&mut *conn, product_id, unit_id)
        .await?
        .ok_or_else(|| CoreError::invalid_reference("unit", unit_id))?;
    Ok((product, unit))
}

// =============================================================================
// Inputs & Results
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveLine {
    pub product_id: String,
    pub unit_id: String,
    pub qty_in_unit: i64,
    /// Cost of one `unit_id`, not one base unit.
    pub unit_cost_pence: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveStockInput {
    pub store_id: String,
    pub supplier_ref: Option<String>,
    pub lines: Vec<ReceiveLine>,
    /// Paid on receipt. `None` leaves the cost owed to the supplier.
    pub paid_from: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReceipt {
    pub receipt_id: String,
    pub total_cost_pence: i64,
    pub journal_entry_id: Option<String>,
    pub positions: Vec<ProductPosition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPosition {
    pub product_id: String,
    pub position: StockPosition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStockInput {
    pub store_id: String,
    pub product_id: String,
    /// Counted minus recorded, in base units.
    pub delta_base: i64,
    pub reason_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub adjustment_id: String,
    pub position: StockPosition,
    /// |delta| at the average cost before the adjustment.
    pub value_pence: i64,
    pub journal_entry_id: Option<String>,
}

// =============================================================================
// Service
// =============================================================================

pub struct InventoryService<'a> {
    engine: &'a Engine,
}

impl<'a> InventoryService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        InventoryService { engine }
    }

    /// Books a supplier delivery into stock at cost.
    pub async fn receive_stock(
        &self,
        ctx: &OperatorContext,
        input: ReceiveStockInput,
    ) -> EngineResult<StockReceipt> {
        validate_required("store_id", &input.store_id)?;
        validate_line_count(input.lines.len())?;
        for (idx, line) in input.lines.iter().enumerate() {
            validate_quantity(&format!("lines[{}].qty_in_unit", idx), line.qty_in_unit)?;
            if line.unit_cost_pence < 0 {
                return Err(ValidationError::MustNotBeNegative {
                    field: format!("lines[{}].unit_cost_pence", idx),
                }
                .into());
            }
        }

        let receipt_id = new_id();
        let result = with_retry(&self.engine.retry_policy(), || {
            self.receive_once(ctx, &input, &receipt_id)
        })
        .await;

        match &result {
            Ok(receipt) => {
                info!(
                    receipt_id = %receipt.receipt_id,
                    store_id = %input.store_id,
                    total_cost = receipt.total_cost_pence,
                    "Stock received"
                );
                self.engine.audit().emit(
                    AuditEvent::success(
                        &ctx.business_id,
                        &ctx.user_id,
                        "stock.receive",
                        "stock_receipt",
                        &receipt.receipt_id,
                    )
                    .with_details(serde_json::json!({
                        "store_id": input.store_id,
                        "supplier_ref": input.supplier_ref,
                        "total_cost_pence": receipt.total_cost_pence,
                    })),
                );
            }
            Err(err) => self
                .engine
                .audit_refusal(ctx, "stock.receive", "stock_receipt", None, err),
        }
        result
    }

    async fn receive_once(
        &self,
        ctx: &OperatorContext,
        input: &ReceiveStockInput,
        receipt_id: &str,
    ) -> EngineResult<StockReceipt> {
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::ReceiveStock).await?;
        resolve_store(&mut tx, &ctx.business_id, &input.store_id).await?;

        let mut total_cost_pence: i64 = 0;
        let mut positions = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            let (product, unit) =
                resolve_product_unit(&mut tx, &ctx.business_id, &line.product_id, &line.unit_id)
                    .await?;
            let qty_base = to_base_units(line.qty_in_unit, unit.conversion_to_base)?;
            let base_cost = cost_per_base_unit(line.unit_cost_pence, unit.conversion_to_base);
            // Debit the carried value (qty_base × base cost), not the pack price
            total_cost_pence = qty_base
                .checked_mul(base_cost)
                .and_then(|line_cost| total_cost_pence.checked_add(line_cost))
                .ok_or_else(|| ValidationError::invalid("unit_cost_pence", "receipt cost overflows"))?;

            let (_, after) = apply_stock_movement(
                &mut tx,
                &ctx.business_id,
                &StockMove {
                    store_id: &input.store_id,
                    product_id: &product.id,
                    delta_base: qty_base,
                    unit_cost_base_pence: Some(base_cost),
                    reason: StockMovementReason::Purchase,
                    reference_type: RECEIPT_REFERENCE,
                    reference_id: receipt_id,
                },
            )
            .await?;
            positions.push(ProductPosition {
                product_id: product.id,
                position: after,
            });
        }

        let credit_account = input
            .paid_from
            .map(|m| m.ledger_account())
            .unwrap_or(accounts::ACCOUNTS_PAYABLE);
        let description = match &input.supplier_ref {
            Some(supplier_ref) => format!("Stock received ({})", supplier_ref),
            None => "Stock received".to_string(),
        };
        let draft = JournalDraft::new(
            description,
            RECEIPT_REFERENCE,
            receipt_id,
            Utc::now().date_naive(),
        )
        .debit(accounts::INVENTORY, total_cost_pence)
        .credit(credit_account, total_cost_pence);
        let journal_entry_id =
            ledger::post_if_any(&mut tx, &ctx.business_id, Some(&ctx.user_id), &draft).await?;

        tx.commit().await?;
        Ok(StockReceipt {
            receipt_id: receipt_id.to_string(),
            total_cost_pence,
            journal_entry_id,
            positions,
        })
    }

    /// Corrects a balance to a stock count. May leave the balance negative.
    pub async fn adjust_stock(
        &self,
        ctx: &OperatorContext,
        input: AdjustStockInput,
    ) -> EngineResult<StockAdjustment> {
        validate_required("store_id", &input.store_id)?;
        validate_required("product_id", &input.product_id)?;
        if input.delta_base == 0 {
            return Err(ValidationError::invalid("delta_base", "must not be zero").into());
        }
        let magnitude = input.delta_base.checked_abs().ok_or_else(|| ValidationError::OutOfRange {
            field: "delta_base".to_string(),
            min: -MAX_LINE_QUANTITY,
            max: MAX_LINE_QUANTITY,
        })?;
        validate_quantity("delta_base", magnitude)?;
        validate_reason_code("reason_code", &input.reason_code)?;

        let adjustment_id = new_id();
        let result = with_retry(&self.engine.retry_policy(), || {
            self.adjust_once(ctx, &input, &adjustment_id)
        })
        .await;

        match &result {
            Ok(adjustment) => {
                info!(
                    adjustment_id = %adjustment.adjustment_id,
                    product_id = %input.product_id,
                    delta = input.delta_base,
                    qty_after = adjustment.position.qty_on_hand_base,
                    "Stock adjusted"
                );
                self.engine.audit().emit(
                    AuditEvent::success(
                        &ctx.business_id,
                        &ctx.user_id,
                        "stock.adjust",
                        "stock_adjustment",
                        &adjustment.adjustment_id,
                    )
                    .with_details(serde_json::json!({
                        "store_id": input.store_id,
                        "product_id": input.product_id,
                        "delta_base": input.delta_base,
                        "reason_code": input.reason_code,
                        "value_pence": adjustment.value_pence,
                    })),
                );
            }
            Err(err) => self
                .engine
                .audit_refusal(ctx, "stock.adjust", "stock_adjustment", None, err),
        }
        result
    }

    async fn adjust_once(
        &self,
        ctx: &OperatorContext,
        input: &AdjustStockInput,
        adjustment_id: &str,
    ) -> EngineResult<StockAdjustment> {
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::AdjustStock).await?;
        resolve_store(&mut tx, &ctx.business_id, &input.store_id).await?;
        CatalogRepository::find_product(&mut tx, &ctx.business_id, &input.product_id)
            .await?
            .ok_or_else(|| CoreError::invalid_reference("product", &input.product_id))?;

        let (before, after) = apply_stock_movement(
            &mut tx,
            &ctx.business_id,
            &StockMove {
                store_id: &input.store_id,
                product_id: &input.product_id,
                delta_base: input.delta_base,
                unit_cost_base_pence: None,
                reason: StockMovementReason::Adjustment,
                reference_type: ADJUSTMENT_REFERENCE,
                reference_id: adjustment_id,
            },
        )
        .await?;

        let value_pence = input
            .delta_base
            .unsigned_abs()
            .checked_mul(before.avg_cost_base_pence.max(0) as u64)
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| ValidationError::invalid("delta_base", "adjustment value overflows"))?;
        let (debit, credit) = if input.delta_base < 0 {
            (accounts::INVENTORY_SHRINKAGE, accounts::INVENTORY)
        } else {
            (accounts::INVENTORY, accounts::INVENTORY_SHRINKAGE)
        };
        let draft = JournalDraft::new(
            format!("Stock adjustment ({})", input.reason_code),
            ADJUSTMENT_REFERENCE,
            adjustment_id,
            Utc::now().date_naive(),
        )
        .debit(debit, value_pence)
        .credit(credit, value_pence);
        let journal_entry_id =
            ledger::post_if_any(&mut tx, &ctx.business_id, Some(&ctx.user_id), &draft).await?;

        tx.commit().await?;
        Ok(StockAdjustment {
            adjustment_id: adjustment_id.to_string(),
            position: after,
            value_pence,
            journal_entry_id,
        })
    }

    /// Current position. A pair never stocked reads as zero.
    pub async fn balance(&self, store_id: &str, product_id: &str) -> EngineResult<StockPosition> {
        let balance = self
            .engine
            .db()
            .inventory()
            .get_balance(store_id, product_id)
            .await?;
        Ok(balance
            .map(|b| StockPosition {
                qty_on_hand_base: b.qty_on_hand_base,
                avg_cost_base_pence: b.avg_cost_base_pence,
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testkit::{Fixture, OPENING_AVG_COST, OPENING_STOCK};
    use till_core::ledger::accounts;

    #[tokio::test]
    async fn test_receipt_blends_average_and_posts_payable() {
        let fx = Fixture::new().await;
        let before = fx.balance(&fx.store_a, &fx.widget).await;
        assert_eq!(before.qty_on_hand_base, OPENING_STOCK);
        assert_eq!(before.avg_cost_base_pence, OPENING_AVG_COST);

        // One carton of 12 at 1440 → 120 per base unit
        let receipt = fx
            .engine
            .inventory()
            .receive_stock(
                &fx.manager_ctx(),
                ReceiveStockInput {
                    store_id: fx.store_a.clone(),
                    supplier_ref: Some("PO-7".into()),
                    lines: vec![ReceiveLine {
                        product_id: fx.widget.clone(),
                        unit_id: fx.carton_unit.clone(),
                        qty_in_unit: 1,
                        unit_cost_pence: 1440,
                    }],
                    paid_from: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.total_cost_pence, 1440);

        let after = fx.balance(&fx.store_a, &fx.widget).await;
        assert_eq!(after.qty_on_hand_base, OPENING_STOCK + 12);
        let expected_avg = till_core::costing::weighted_average(
            OPENING_STOCK,
            OPENING_AVG_COST,
            12,
            120,
        );
        assert_eq!(after.avg_cost_base_pence, expected_avg);

        let entry = fx
            .engine
            .ledger()
            .get_entry(&fx.business_id, receipt.journal_entry_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(entry.total_debits(), 1440);
        assert!(entry
            .lines
            .iter()
            .any(|l| l.account_code == accounts::ACCOUNTS_PAYABLE && l.credit_pence == 1440));
    }

    #[tokio::test]
    async fn test_uneven_pack_cost_keeps_ledger_on_stock_value() {
        let fx = Fixture::new().await;

        // 1000 over 12 units carries at 83 each, 996 in total
        let receipt = fx
            .engine
            .inventory()
            .receive_stock(
                &fx.owner_ctx(),
                ReceiveStockInput {
                    store_id: fx.store_b.clone(),
                    supplier_ref: Some("PO-9".into()),
                    lines: vec![ReceiveLine {
                        product_id: fx.widget.clone(),
                        unit_id: fx.carton_unit.clone(),
                        qty_in_unit: 1,
                        unit_cost_pence: 1000,
                    }],
                    paid_from: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.total_cost_pence, 996);
        assert_eq!(fx.balance(&fx.store_b, &fx.widget).await.avg_cost_base_pence, 83);

        let mut sale = fx.cash_sale_input(&fx.widget, 12, 12_000);
        sale.store_id = fx.store_b.clone();
        sale.till_id = None;
        fx.engine
            .sales()
            .create_sale(&fx.manager_ctx(), sale)
            .await
            .unwrap();
        assert_eq!(fx.balance(&fx.store_b, &fx.widget).await.qty_on_hand_base, 0);

        let mut stock_value = 0;
        for store in [&fx.store_a, &fx.store_b] {
            for product in [&fx.widget, &fx.vat_item, &fx.promo_item] {
                let position = fx.balance(store, product).await;
                stock_value += position.qty_on_hand_base * position.avg_cost_base_pence;
            }
        }
        let inventory = fx
            .engine
            .ledger()
            .account_balance(&fx.business_id, accounts::INVENTORY)
            .await
            .unwrap();
        assert_eq!(inventory.balance_pence(), stock_value);
    }

    #[tokio::test]
    async fn test_paid_receipt_credits_payment_account() {
        let fx = Fixture::new().await;
        let receipt = fx
            .engine
            .inventory()
            .receive_stock(
                &fx.owner_ctx(),
                ReceiveStockInput {
                    store_id: fx.store_b.clone(),
                    supplier_ref: None,
                    lines: vec![ReceiveLine {
                        product_id: fx.widget.clone(),
                        unit_id: fx.each_unit.clone(),
                        qty_in_unit: 5,
                        unit_cost_pence: 90,
                    }],
                    paid_from: Some(PaymentMethod::Transfer),
                },
            )
            .await
            .unwrap();

        let entry = fx
            .engine
            .ledger()
            .get_entry(&fx.business_id, receipt.journal_entry_id.as_deref().unwrap())
            .await
            .unwrap();
        assert!(entry
            .lines
            .iter()
            .any(|l| l.account_code == accounts::BANK && l.credit_pence == 450));
    }

    #[tokio::test]
    async fn test_cashier_cannot_receive_stock() {
        let fx = Fixture::new().await;
        let err = fx
            .engine
            .inventory()
            .receive_stock(
                &fx.cashier_ctx(),
                ReceiveStockInput {
                    store_id: fx.store_a.clone(),
                    supplier_ref: None,
                    lines: vec![ReceiveLine {
                        product_id: fx.widget.clone(),
                        unit_id: fx.each_unit.clone(),
                        qty_in_unit: 1,
                        unit_cost_pence: 100,
                    }],
                    paid_from: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK);
    }

    #[tokio::test]
    async fn test_adjustment_may_go_negative_and_posts_shrinkage() {
        let fx = Fixture::new().await;
        let shortfall = OPENING_STOCK + 3;

        let adjustment = fx
            .engine
            .inventory()
            .adjust_stock(
                &fx.manager_ctx(),
                AdjustStockInput {
                    store_id: fx.store_a.clone(),
                    product_id: fx.widget.clone(),
                    delta_base: -shortfall,
                    reason_code: "COUNT_CORRECTION".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(adjustment.position.qty_on_hand_base, -3);
        assert_eq!(adjustment.value_pence, shortfall * OPENING_AVG_COST);

        let shrinkage = fx
            .engine
            .ledger()
            .account_balance(&fx.business_id, accounts::INVENTORY_SHRINKAGE)
            .await
            .unwrap();
        assert_eq!(shrinkage.balance_pence(), shortfall * OPENING_AVG_COST);
    }

    #[tokio::test]
    async fn test_adjustment_beyond_quantity_bound_rejected() {
        let fx = Fixture::new().await;
        for delta_base in [-(i64::MAX / 100), i64::MIN, MAX_LINE_QUANTITY + 1] {
            let err = fx
                .engine
                .inventory()
                .adjust_stock(
                    &fx.manager_ctx(),
                    AdjustStockInput {
                        store_id: fx.store_a.clone(),
                        product_id: fx.widget.clone(),
                        delta_base,
                        reason_code: "COUNT_CORRECTION".into(),
                    },
                )
                .await
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::ValidationError, "delta {}", delta_base);
        }
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK);
    }

    #[tokio::test]
    async fn test_receipt_cost_overflow_rejected() {
        let fx = Fixture::new().await;
        let line = |product_id: &String| ReceiveLine {
            product_id: product_id.clone(),
            unit_id: fx.each_unit.clone(),
            qty_in_unit: 10,
            unit_cost_pence: i64::MAX / 15,
        };
        let err = fx
            .engine
            .inventory()
            .receive_stock(
                &fx.owner_ctx(),
                ReceiveStockInput {
                    store_id: fx.store_a.clone(),
                    supplier_ref: None,
                    lines: vec![line(&fx.widget), line(&fx.vat_item)],
                    paid_from: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK);
    }

    #[tokio::test]
    async fn test_adjustment_requires_reason_code() {
        let fx = Fixture::new().await;
        let err = fx
            .engine
            .inventory()
            .adjust_stock(
                &fx.manager_ctx(),
                AdjustStockInput {
                    store_id: fx.store_a.clone(),
                    product_id: fx.widget.clone(),
                    delta_base: 2,
                    reason_code: "found behind shelf".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_movement_rejects_overdraw_and_writes_nothing() {
        let fx = Fixture::new().await;
        let movements_before = fx
            .engine
            .db()
            .inventory()
            .count_movements(&fx.store_a, &fx.widget)
            .await
            .unwrap();

        let mut tx = fx.engine.db().begin().await.unwrap();
        let err = apply_stock_movement(
            &mut tx,
            &fx.business_id,
            &StockMove {
                store_id: &fx.store_a,
                product_id: &fx.widget,
                delta_base: -(OPENING_STOCK + 1),
                unit_cost_base_pence: None,
                reason: StockMovementReason::Sale,
                reference_type: "TEST",
                reference_id: "t-1",
            },
        )
        .await
        .unwrap_err();
        tx.rollback().await.unwrap();

        assert_eq!(err.code(), ErrorCode::InsufficientStock);
        let movements_after = fx
            .engine
            .db()
            .inventory()
            .count_movements(&fx.store_a, &fx.widget)
            .await
            .unwrap();
        assert_eq!(movements_after, movements_before);
    }

    #[tokio::test]
    async fn test_unknown_pair_reads_as_zero() {
        let fx = Fixture::new().await;
        let position = fx
            .engine
            .inventory()
            .balance(&fx.store_b, &fx.vat_item)
            .await
            .unwrap();
        assert_eq!(position, StockPosition::default());
    }
}
