//! # Stock Transfers
//!
//! Two-phase movement of stock between stores of one business.
//!
//! ```text
//!   request ──► PENDING ──approve(PIN)──► COMPLETED
//!                  │
//!                  └────cancel─────────► CANCELLED
//! ```
//!
//! Requesting moves nothing. Approval moves every line in one transaction:
//! out of the source at its average, into the destination at that same cost
//! so the destination average is re-blended. One short line fails the whole
//! approval.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::AuditEvent;
use crate::context::{self, OperatorContext};
use crate::credentials::resolve_supervisor_pin;
use crate::error::{EngineError, EngineResult};
use crate::inventory::{apply_stock_movement, resolve_product_unit, resolve_store, StockMove};
use crate::retry::with_retry;
use crate::Engine;
use till_core::costing::to_base_units;
use till_core::validation::{validate_line_count, validate_quantity, validate_required};
use till_core::{
    new_id, Capability, CoreError, StockMovementReason, StockTransfer, StockTransferLine,
    TransferStatus, ValidationError,
};
use till_db::TransferRepository;

pub const TRANSFER_REFERENCE: &str = "STOCK_TRANSFER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLineInput {
    pub product_id: String,
    pub unit_id: String,
    pub qty_in_unit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTransferInput {
    pub from_store_id: String,
    pub to_store_id: String,
    pub lines: Vec<TransferLineInput>,
    #[serde(default)]
    pub note: Option<String>,
}

pub struct TransferService<'a> {
    engine: &'a Engine,
}

impl<'a> TransferService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        TransferService { engine }
    }

    // =========================================================================
    // Request
    // =========================================================================

    pub async fn request_stock_transfer(
        &self,
        ctx: &OperatorContext,
        input: RequestTransferInput,
    ) -> EngineResult<StockTransfer> {
        validate_required("from_store_id", &input.from_store_id)?;
        validate_required("to_store_id", &input.to_store_id)?;
        if input.from_store_id == input.to_store_id {
            return Err(
                ValidationError::invalid("to_store_id", "must differ from from_store_id").into(),
            );
        }
        validate_line_count(input.lines.len())?;
        for (idx, line) in input.lines.iter().enumerate() {
            validate_quantity(&format!("lines[{}].qty_in_unit", idx), line.qty_in_unit)?;
        }

        let result = with_retry(&self.engine.retry_policy(), || self.request_once(ctx, &input)).await;

        match &result {
            Ok(transfer) => {
                info!(
                    transfer_id = %transfer.id,
                    from = %transfer.from_store_id,
                    to = %transfer.to_store_id,
                    lines = transfer.lines.len(),
                    "Stock transfer requested"
                );
                self.engine.audit().emit(
                    AuditEvent::success(
                        &ctx.business_id,
                        &ctx.user_id,
                        "transfer.request",
                        "stock_transfer",
                        &transfer.id,
                    )
                    .with_details(serde_json::json!({
                        "from_store_id": transfer.from_store_id,
                        "to_store_id": transfer.to_store_id,
                    })),
                );
            }
            Err(err) => self
                .engine
                .audit_refusal(ctx, "transfer.request", "stock_transfer", None, err),
        }
        result
    }

    async fn request_once(
        &self,
        ctx: &OperatorContext,
        input: &RequestTransferInput,
    ) -> EngineResult<StockTransfer> {
        let business_id = ctx.business_id.as_str();
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::RequestTransfer).await?;
        resolve_store(&mut tx, business_id, &input.from_store_id).await?;
        resolve_store(&mut tx, business_id, &input.to_store_id).await?;

        let transfer_id = new_id();
        let mut lines = Vec::with_capacity(input.lines.len());
        for (idx, line) in input.lines.iter().enumerate() {
            let (product, unit) =
                resolve_product_unit(&mut tx, business_id, &line.product_id, &line.unit_id).await?;
            lines.push(StockTransferLine {
                id: new_id(),
                transfer_id: transfer_id.clone(),
                line_no: idx as i64 + 1,
                product_id: product.id,
                unit_id: unit.unit_id,
                qty_in_unit: line.qty_in_unit,
                qty_base: to_base_units(line.qty_in_unit, unit.conversion_to_base)?,
                unit_cost_base_pence: None,
            });
        }

        let transfer = StockTransfer {
            id: transfer_id,
            business_id: business_id.to_string(),
            from_store_id: input.from_store_id.clone(),
            to_store_id: input.to_store_id.clone(),
            status: TransferStatus::Pending,
            requested_by: ctx.user_id.clone(),
            approved_by: None,
            note: input.note.clone(),
            created_at: Utc::now(),
            completed_at: None,
            cancelled_at: None,
            lines,
        };
        TransferRepository::insert_transfer(&mut tx, &transfer).await?;
        for line in &transfer.lines {
            TransferRepository::insert_line(&mut tx, line).await?;
        }

        tx.commit().await?;
        Ok(transfer)
    }

    // =========================================================================
    // Approve
    // =========================================================================

    /// Completes a PENDING transfer. The PIN must belong to an active
    /// manager or owner; the operator only needs to be able to request.
    pub async fn approve_stock_transfer(
        &self,
        ctx: &OperatorContext,
        transfer_id: &str,
        manager_pin: &str,
    ) -> EngineResult<StockTransfer> {
        validate_required("transfer_id", transfer_id)?;

        let result = with_retry(&self.engine.retry_policy(), || {
            self.approve_once(ctx, transfer_id, manager_pin)
        })
        .await;

        match &result {
            Ok(transfer) => {
                info!(
                    transfer_id = %transfer.id,
                    approved_by = ?transfer.approved_by,
                    "Stock transfer completed"
                );
                self.engine.audit().emit(
                    AuditEvent::success(
                        &ctx.business_id,
                        &ctx.user_id,
                        "transfer.approve",
                        "stock_transfer",
                        &transfer.id,
                    )
                    .with_details(serde_json::json!({
                        "approved_by": transfer.approved_by,
                        "lines": transfer.lines.len(),
                    })),
                );
            }
            Err(err) => self.engine.audit_refusal(
                ctx,
                "transfer.approve",
                "stock_transfer",
                Some(transfer_id),
                err,
            ),
        }
        result
    }

    async fn approve_once(
        &self,
        ctx: &OperatorContext,
        transfer_id: &str,
        manager_pin: &str,
    ) -> EngineResult<StockTransfer> {
        let business_id = ctx.business_id.as_str();
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::RequestTransfer).await?;

        let approver = resolve_supervisor_pin(&mut tx, business_id, manager_pin)
            .await?
            .filter(|u| u.role.allows(Capability::ApproveTransfer));
        let Some(approver) = approver else {
            warn!(transfer_id = %transfer_id, user_id = %ctx.user_id, "Transfer PIN rejected");
            return Err(CoreError::InvalidPin.into());
        };

        let mut transfer = TransferRepository::find_transfer(&mut tx, business_id, transfer_id)
            .await?
            .ok_or_else(|| CoreError::not_found("StockTransfer", transfer_id))?;
        if transfer.status != TransferStatus::Pending {
            return Err(CoreError::NotPending {
                transfer_id: transfer.id,
                status: transfer.status.to_string(),
            }
            .into());
        }

        for line in transfer.lines.iter_mut() {
            let (before, _) = apply_stock_movement(
                &mut tx,
                business_id,
                &StockMove {
                    store_id: &transfer.from_store_id,
                    product_id: &line.product_id,
                    delta_base: -line.qty_base,
                    unit_cost_base_pence: None,
                    reason: StockMovementReason::TransferOut,
                    reference_type: TRANSFER_REFERENCE,
                    reference_id: &transfer.id,
                },
            )
            .await?;

            let unit_cost = before.avg_cost_base_pence;
            TransferRepository::set_line_cost(&mut tx, &line.id, unit_cost).await?;
            line.unit_cost_base_pence = Some(unit_cost);

            apply_stock_movement(
                &mut tx,
                business_id,
                &StockMove {
                    store_id: &transfer.to_store_id,
                    product_id: &line.product_id,
                    delta_base: line.qty_base,
                    unit_cost_base_pence: Some(unit_cost),
                    reason: StockMovementReason::TransferIn,
                    reference_type: TRANSFER_REFERENCE,
                    reference_id: &transfer.id,
                },
            )
            .await?;
        }

        let now = Utc::now();
        if !TransferRepository::mark_completed(&mut tx, &transfer.id, &approver.id, now).await? {
            return Err(EngineError::Conflict(format!(
                "transfer {} left PENDING concurrently",
                transfer.id
            )));
        }

        tx.commit().await?;
        transfer.status = TransferStatus::Completed;
        transfer.approved_by = Some(approver.id);
        transfer.completed_at = Some(now);
        Ok(transfer)
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    pub async fn cancel_stock_transfer(
        &self,
        ctx: &OperatorContext,
        transfer_id: &str,
    ) -> EngineResult<StockTransfer> {
        validate_required("transfer_id", transfer_id)?;

        let result = with_retry(&self.engine.retry_policy(), || self.cancel_once(ctx, transfer_id)).await;

        match &result {
            Ok(transfer) => {
                info!(transfer_id = %transfer.id, "Stock transfer cancelled");
                self.engine.audit().emit(AuditEvent::success(
                    &ctx.business_id,
                    &ctx.user_id,
                    "transfer.cancel",
                    "stock_transfer",
                    &transfer.id,
                ));
            }
            Err(err) => self.engine.audit_refusal(
                ctx,
                "transfer.cancel",
                "stock_transfer",
                Some(transfer_id),
                err,
            ),
        }
        result
    }

    async fn cancel_once(&self, ctx: &OperatorContext, transfer_id: &str) -> EngineResult<StockTransfer> {
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::CancelTransfer).await?;

        let mut transfer = TransferRepository::find_transfer(&mut tx, &ctx.business_id, transfer_id)
            .await?
            .ok_or_else(|| CoreError::not_found("StockTransfer", transfer_id))?;
        let now = Utc::now();
        if transfer.status != TransferStatus::Pending
            || !TransferRepository::mark_cancelled(&mut tx, &transfer.id, now).await?
        {
            return Err(CoreError::NotPending {
                transfer_id: transfer.id,
                status: transfer.status.to_string(),
            }
            .into());
        }

        tx.commit().await?;
        transfer.status = TransferStatus::Cancelled;
        transfer.cancelled_at = Some(now);
        Ok(transfer)
    }

    pub async fn get_transfer(&self, business_id: &str, transfer_id: &str) -> EngineResult<StockTransfer> {
        self.engine
            .db()
            .transfers()
            .get_transfer(business_id, transfer_id)
            .await?
            .ok_or_else(|| CoreError::not_found("StockTransfer", transfer_id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::inventory::ReceiveLine;
    use crate::testkit::{Fixture, CASHIER_PIN, MANAGER_PIN, OPENING_AVG_COST, OPENING_STOCK};
    use till_db::AuditOutcome;

    fn request(fx: &Fixture, qty: i64) -> RequestTransferInput {
        RequestTransferInput {
            from_store_id: fx.store_a.clone(),
            to_store_id: fx.store_b.clone(),
            lines: vec![TransferLineInput {
                product_id: fx.widget.clone(),
                unit_id: fx.each_unit.clone(),
                qty_in_unit: qty,
            }],
            note: None,
        }
    }

    #[tokio::test]
    async fn test_request_moves_nothing() {
        let fx = Fixture::new().await;
        let transfer = fx
            .engine
            .transfers()
            .request_stock_transfer(&fx.cashier_ctx(), request(&fx, 10))
            .await
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::Pending);
        assert_eq!(transfer.lines[0].qty_base, 10);
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK);
        assert_eq!(fx.balance(&fx.store_b, &fx.widget).await.qty_on_hand_base, 0);
    }

    #[tokio::test]
    async fn test_request_same_store_rejected() {
        let fx = Fixture::new().await;
        let mut input = request(&fx, 1);
        input.to_store_id = fx.store_a.clone();
        let err = fx
            .engine
            .transfers()
            .request_stock_transfer(&fx.cashier_ctx(), input)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_request_unknown_store_rejected() {
        let fx = Fixture::new().await;
        let mut input = request(&fx, 1);
        input.to_store_id = "elsewhere".into();
        let err = fx
            .engine
            .transfers()
            .request_stock_transfer(&fx.cashier_ctx(), input)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidReference);
    }

    #[tokio::test]
    async fn test_scenario_ten_units_a_to_b() {
        let fx = Fixture::new().await;
        let transfer = fx
            .engine
            .transfers()
            .request_stock_transfer(&fx.cashier_ctx(), request(&fx, 10))
            .await
            .unwrap();

        let done = fx
            .engine
            .transfers()
            .approve_stock_transfer(&fx.cashier_ctx(), &transfer.id, MANAGER_PIN)
            .await
            .unwrap();
        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(done.approved_by.as_deref(), Some(fx.manager_id.as_str()));
        assert_eq!(done.lines[0].unit_cost_base_pence, Some(OPENING_AVG_COST));

        let a = fx.balance(&fx.store_a, &fx.widget).await;
        let b = fx.balance(&fx.store_b, &fx.widget).await;
        assert_eq!(a.qty_on_hand_base, OPENING_STOCK - 10);
        assert_eq!(b.qty_on_hand_base, 10);
        assert_eq!(b.avg_cost_base_pence, OPENING_AVG_COST);

        let stored = fx
            .engine
            .transfers()
            .get_transfer(&fx.business_id, &transfer.id)
            .await
            .unwrap();
        assert_eq!(stored.status, TransferStatus::Completed);

        let err = fx
            .engine
            .transfers()
            .approve_stock_transfer(&fx.cashier_ctx(), &transfer.id, MANAGER_PIN)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotPending);
        assert_eq!(fx.balance(&fx.store_b, &fx.widget).await.qty_on_hand_base, 10);
    }

    #[tokio::test]
    async fn test_destination_average_is_reblended() {
        let fx = Fixture::new().await;
        // Store B already holds 10 at 1000
        fx.engine
            .inventory()
            .receive_stock(
                &fx.manager_ctx(),
                crate::inventory::ReceiveStockInput {
                    store_id: fx.store_b.clone(),
                    supplier_ref: None,
                    lines: vec![ReceiveLine {
                        product_id: fx.widget.clone(),
                        unit_id: fx.each_unit.clone(),
                        qty_in_unit: 10,
                        unit_cost_pence: 1000,
                    }],
                    paid_from: None,
                },
            )
            .await
            .unwrap();

        let transfer = fx
            .engine
            .transfers()
            .request_stock_transfer(&fx.cashier_ctx(), request(&fx, 10))
            .await
            .unwrap();
        fx.engine
            .transfers()
            .approve_stock_transfer(&fx.manager_ctx(), &transfer.id, MANAGER_PIN)
            .await
            .unwrap();

        let b = fx.balance(&fx.store_b, &fx.widget).await;
        assert_eq!(b.qty_on_hand_base, 20);
        assert_eq!(b.avg_cost_base_pence, (1000 + OPENING_AVG_COST) / 2);
    }

    #[tokio::test]
    async fn test_short_source_fails_whole_approval() {
        let fx = Fixture::new().await;
        let transfer = fx
            .engine
            .transfers()
            .request_stock_transfer(&fx.cashier_ctx(), request(&fx, OPENING_STOCK + 5))
            .await
            .unwrap();

        let err = fx
            .engine
            .transfers()
            .approve_stock_transfer(&fx.cashier_ctx(), &transfer.id, MANAGER_PIN)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientStock);

        let stored = fx
            .engine
            .transfers()
            .get_transfer(&fx.business_id, &transfer.id)
            .await
            .unwrap();
        assert_eq!(stored.status, TransferStatus::Pending);
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK);
    }

    #[tokio::test]
    async fn test_wrong_pin_rejected_and_audited() {
        let mut fx = Fixture::new().await;
        let transfer = fx
            .engine
            .transfers()
            .request_stock_transfer(&fx.cashier_ctx(), request(&fx, 1))
            .await
            .unwrap();

        for pin in ["0000", CASHIER_PIN] {
            let err = fx
                .engine
                .transfers()
                .approve_stock_transfer(&fx.cashier_ctx(), &transfer.id, pin)
                .await
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidPin);

            let event = fx.next_audit_event("transfer.approve").await;
            assert_eq!(event.outcome, AuditOutcome::Denied);
            assert_eq!(event.resource_id.as_deref(), Some(transfer.id.as_str()));
        }
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK);
    }

    #[tokio::test]
    async fn test_cancel_pending_only() {
        let fx = Fixture::new().await;
        let transfer = fx
            .engine
            .transfers()
            .request_stock_transfer(&fx.cashier_ctx(), request(&fx, 3))
            .await
            .unwrap();

        let err = fx
            .engine
            .transfers()
            .cancel_stock_transfer(&fx.cashier_ctx(), &transfer.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let cancelled = fx
            .engine
            .transfers()
            .cancel_stock_transfer(&fx.manager_ctx(), &transfer.id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, TransferStatus::Cancelled);

        let err = fx
            .engine
            .transfers()
            .approve_stock_transfer(&fx.cashier_ctx(), &transfer.id, MANAGER_PIN)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotPending);
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK);
    }
}
