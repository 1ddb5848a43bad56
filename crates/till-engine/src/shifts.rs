//! # Shift Reconciliation
//!
//! Cash drawer sessions: open with a float, accumulate expected cash while
//! OPEN, close against a counted amount under supervisor approval.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   open_shift(till, float)                                               │
//! │        │  OPEN_FLOAT entry, expected = float                            │
//! │        ▼                                                                │
//! │   ┌─────────┐   cash sale      expected += cash applied   (CASH_SALE)   │
//! │   │  OPEN   │   cash payment   expected += amount         (CASH_PAYMENT)│
//! │   │         │   void refund    expected −= cash refunded  (CASH_REFUND) │
//! │   └────┬────┘   cash expense   expected −= amount         (CASH_EXPENSE)│
//! │        │                                                                │
//! │        │ close_shift(counted, approval)                                 │
//! │        │   approval  ManagerPin | OwnerOverride        → InvalidApproval│
//! │        │   variance  counted − expected                                 │
//! │        │   reason    required when variance ≠ 0 and the business says   │
//! │        │             so                          → VarianceReasonRequired│
//! │        ▼                                                                │
//! │   ┌─────────┐   CLOSE_RECONCILIATION entry, variance journal,           │
//! │   │ CLOSED  │   ShiftClosure snapshot. Closing again → AlreadyClosed    │
//! │   └─────────┘                                                           │
//! │        │ after COMMIT                                                   │
//! │        └──► risk::check_cash_variance()  (never blocks the closure)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, error, info, warn};

use crate::audit::AuditEvent;
use crate::context::{self, OperatorContext};
use crate::credentials::{resolve_supervisor_pin, verify_owner_password};
use crate::error::{EngineError, EngineResult};
use crate::ledger;
use crate::retry::with_retry;
use crate::risk;
use crate::Engine;
use till_core::ledger::{accounts, JournalDraft};
use till_core::shift::{
    check_variance_reason, compute_variance, CashDrawerEntry, CashDrawerEntryType, Shift,
    ShiftApproval, ShiftClosure, ShiftStatus, ShiftSummary, CLOSURE_SNAPSHOT_VERSION,
};
use till_core::validation::{validate_non_negative_amount, validate_reason_code, validate_required};
use till_core::{new_id, Capability, CoreError, User};
use till_db::repository::shift::ShiftCloseUpdate;
use till_db::{SalesRepository, ShiftRepository, TenancyRepository};

pub const SHIFT_CLOSE_REFERENCE: &str = "SHIFT_CLOSE";

// =============================================================================
// Drawer Helpers
// =============================================================================

/// The OPEN shift a till operation lands in.
///
/// An explicit shift wins while it is OPEN and belongs to the same till;
/// otherwise the till's current OPEN shift, if any.
pub(crate) async fn resolve_open_shift(
    conn: &mut SqliteConnection,
    business_id: &str,
    till_id: Option<&str>,
    shift_id: Option<&str>,
) -> EngineResult<Option<Shift>> {
    if let Some(shift_id) = shift_id {
        let explicit = ShiftRepository::find_shift(&mut *conn, business_id, shift_id).await?;
        if let Some(shift) = explicit {
            let same_till = till_id.map(|t| t == shift.till_id).unwrap_or(true);
            if shift.is_open() && same_till {
                return Ok(Some(shift));
            }
            debug!(shift_id = %shift_id, "Requested shift not usable, falling back to till");
        }
    }

    match till_id {
        Some(till_id) => Ok(ShiftRepository::find_open_for_till(conn, business_id, till_id).await?),
        None => Ok(None),
    }
}

/// Appends a drawer entry and moves expected cash by its signed effect.
pub(crate) async fn record_drawer_cash(
    conn: &mut SqliteConnection,
    shift_id: &str,
    entry_type: CashDrawerEntryType,
    amount_pence: i64,
    reference: (&str, &str),
    actor_id: &str,
) -> EngineResult<()> {
    let delta = entry_type.expected_delta(amount_pence);
    if delta != 0 && !ShiftRepository::add_expected_cash(&mut *conn, shift_id, delta).await? {
        return Err(EngineError::Conflict(format!(
            "shift {} closed while cash was being recorded",
            shift_id
        )));
    }

    ShiftRepository::insert_drawer_entry(
        conn,
        &CashDrawerEntry {
            id: new_id(),
            shift_id: shift_id.to_string(),
            entry_type,
            amount_pence,
            reference_type: Some(reference.0.to_string()),
            reference_id: Some(reference.1.to_string()),
            actor_id: actor_id.to_string(),
            reason_code: None,
            created_at: Utc::now(),
        },
    )
    .await?;
    Ok(())
}

// =============================================================================
// Inputs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenShiftInput {
    pub till_id: String,
    pub opening_cash_pence: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseShiftInput {
    pub shift_id: String,
    pub actual_cash_pence: i64,
    pub approval: ShiftApproval,
    /// Reason for a non-zero variance. An owner override's reason code is
    /// used when this is absent.
    pub variance_reason: Option<String>,
}

struct Closed {
    shift: Shift,
    threshold_pence: i64,
}

// =============================================================================
// Service
// =============================================================================

pub struct ShiftService<'a> {
    engine: &'a Engine,
}

impl<'a> ShiftService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        ShiftService { engine }
    }

    pub async fn open_shift(&self, ctx: &OperatorContext, input: OpenShiftInput) -> EngineResult<Shift> {
        validate_required("till_id", &input.till_id)?;
        validate_non_negative_amount("opening_cash_pence", input.opening_cash_pence)?;

        let result = with_retry(&self.engine.retry_policy(), || self.open_once(ctx, &input)).await;

        match &result {
            Ok(shift) => {
                info!(
                    shift_id = %shift.id,
                    till_id = %shift.till_id,
                    opening_cash = shift.opening_cash_pence,
                    "Shift opened"
                );
                self.engine.audit().emit(
                    AuditEvent::success(&ctx.business_id, &ctx.user_id, "shift.open", "shift", &shift.id)
                        .with_details(serde_json::json!({
                            "till_id": shift.till_id,
                            "opening_cash_pence": shift.opening_cash_pence,
                        })),
                );
            }
            Err(err) => self.engine.audit_refusal(ctx, "shift.open", "shift", None, err),
        }
        result
    }

    async fn open_once(&self, ctx: &OperatorContext, input: &OpenShiftInput) -> EngineResult<Shift> {
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::OpenShift).await?;

        let till = TenancyRepository::find_till(&mut tx, &ctx.business_id, &input.till_id)
            .await?
            .filter(|t| t.is_active)
            .ok_or_else(|| CoreError::invalid_reference("till", &input.till_id))?;

        if ShiftRepository::find_open_for_till(&mut tx, &ctx.business_id, &till.id)
            .await?
            .is_some()
        {
            return Err(CoreError::TillAlreadyOpen { till_id: till.id }.into());
        }

        let shift = Shift {
            id: new_id(),
            business_id: ctx.business_id.clone(),
            store_id: till.store_id.clone(),
            till_id: till.id.clone(),
            cashier_id: ctx.user_id.clone(),
            status: ShiftStatus::Open,
            opening_cash_pence: input.opening_cash_pence,
            expected_cash_pence: input.opening_cash_pence,
            actual_cash_pence: None,
            variance_pence: None,
            variance_reason: None,
            approval_kind: None,
            approved_by: None,
            closed_by: None,
            opened_at: Utc::now(),
            closed_at: None,
        };
        match ShiftRepository::insert_shift(&mut tx, &shift).await {
            Ok(()) => {}
            // Lost the race to the one-open-shift-per-till index
            Err(err) if err.is_unique_on("till_id") => {
                return Err(CoreError::TillAlreadyOpen { till_id: till.id }.into());
            }
            Err(err) => return Err(err.into()),
        }

        // The float is already in expected cash, so no delta here
        ShiftRepository::insert_drawer_entry(
            &mut tx,
            &CashDrawerEntry {
                id: new_id(),
                shift_id: shift.id.clone(),
                entry_type: CashDrawerEntryType::OpenFloat,
                amount_pence: input.opening_cash_pence,
                reference_type: None,
                reference_id: None,
                actor_id: ctx.user_id.clone(),
                reason_code: None,
                created_at: shift.opened_at,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(shift)
    }

    /// Closes an OPEN shift against the counted drawer.
    pub async fn close_shift(&self, ctx: &OperatorContext, input: CloseShiftInput) -> EngineResult<Shift> {
        let result = self.close_checked(ctx, &input).await;

        match result {
            Ok(closed) => {
                let shift = closed.shift;
                let variance = shift.variance_pence.unwrap_or(0);
                info!(
                    shift_id = %shift.id,
                    expected = shift.expected_cash_pence,
                    variance,
                    "Shift closed"
                );
                self.engine.audit().emit(
                    AuditEvent::success(&ctx.business_id, &ctx.user_id, "shift.close", "shift", &shift.id)
                        .with_details(serde_json::json!({
                            "expected_cash_pence": shift.expected_cash_pence,
                            "actual_cash_pence": shift.actual_cash_pence,
                            "variance_pence": variance,
                            "approval_kind": shift.approval_kind,
                            "approved_by": shift.approved_by,
                        })),
                );

                if let Err(err) =
                    risk::check_cash_variance(self.engine, &shift, closed.threshold_pence).await
                {
                    error!(shift_id = %shift.id, error = %err, "Cash variance check failed");
                }
                Ok(shift)
            }
            Err(err) => {
                self.engine
                    .audit_refusal(ctx, "shift.close", "shift", Some(&input.shift_id), &err);
                Err(err)
            }
        }
    }

    async fn close_checked(&self, ctx: &OperatorContext, input: &CloseShiftInput) -> EngineResult<Closed> {
        validate_required("shift_id", &input.shift_id)?;
        validate_non_negative_amount("actual_cash_pence", input.actual_cash_pence)?;
        if let Some(reason) = &input.variance_reason {
            validate_reason_code("variance_reason", reason)?;
        }
        input.approval.validate()?;

        with_retry(&self.engine.retry_policy(), || self.close_once(ctx, input)).await
    }

    async fn close_once(&self, ctx: &OperatorContext, input: &CloseShiftInput) -> EngineResult<Closed> {
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::CloseShift).await?;

        let business = TenancyRepository::find_business(&mut tx, &ctx.business_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Business", &ctx.business_id))?;
        let shift = ShiftRepository::find_shift(&mut tx, &ctx.business_id, &input.shift_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Shift", &input.shift_id))?;
        if !shift.is_open() {
            return Err(CoreError::AlreadyClosed { shift_id: shift.id }.into());
        }

        let approver = self.verify_approval(&mut tx, ctx, &input.approval).await?;

        let variance = compute_variance(input.actual_cash_pence, shift.expected_cash_pence);
        let reason = input
            .variance_reason
            .as_deref()
            .or_else(|| input.approval.reason_code());
        check_variance_reason(variance, business.require_variance_reason, reason)?;

        let totals = SalesRepository::shift_totals(&mut tx, &shift.id).await?;
        let closed_at = Utc::now();
        let approval_kind = input.approval.kind();

        let updated = ShiftRepository::close_shift(
            &mut tx,
            &shift.id,
            &ShiftCloseUpdate {
                actual_cash_pence: input.actual_cash_pence,
                variance_pence: variance,
                variance_reason: reason,
                approval_kind,
                approved_by: &approver.id,
                closed_by: &ctx.user_id,
                closed_at,
            },
        )
        .await?;
        if !updated {
            return Err(CoreError::AlreadyClosed { shift_id: shift.id }.into());
        }

        ShiftRepository::insert_drawer_entry(
            &mut tx,
            &CashDrawerEntry {
                id: new_id(),
                shift_id: shift.id.clone(),
                entry_type: CashDrawerEntryType::CloseReconciliation,
                amount_pence: input.actual_cash_pence,
                reference_type: Some(SHIFT_CLOSE_REFERENCE.to_string()),
                reference_id: Some(shift.id.clone()),
                actor_id: ctx.user_id.clone(),
                reason_code: reason.map(str::to_string),
                created_at: closed_at,
            },
        )
        .await?;

        let (debit, credit) = if variance < 0 {
            (accounts::CASH_OVER_SHORT, accounts::CASH)
        } else {
            (accounts::CASH, accounts::CASH_OVER_SHORT)
        };
        let draft = JournalDraft::new(
            format!("Cash variance, shift {}", shift.id),
            SHIFT_CLOSE_REFERENCE,
            &shift.id,
            closed_at.date_naive(),
        )
        .debit(debit, variance.abs())
        .credit(credit, variance.abs());
        ledger::post_if_any(&mut tx, &ctx.business_id, Some(&ctx.user_id), &draft).await?;

        ShiftRepository::insert_closure(
            &mut tx,
            &ShiftClosure {
                id: new_id(),
                shift_id: shift.id.clone(),
                business_id: ctx.business_id.clone(),
                snapshot_version: CLOSURE_SNAPSHOT_VERSION,
                opening_cash_pence: shift.opening_cash_pence,
                expected_cash_pence: shift.expected_cash_pence,
                counted_cash_pence: input.actual_cash_pence,
                variance_pence: variance,
                cash_sales_pence: totals.cash_pence,
                card_sales_pence: totals.card_pence,
                transfer_sales_pence: totals.transfer_pence,
                mobile_money_sales_pence: totals.mobile_money_pence,
                invoice_count: totals.invoice_count,
                approval_kind,
                approved_by: approver.id.clone(),
                closed_by: ctx.user_id.clone(),
                reason_code: reason.map(str::to_string),
                justification: input.approval.justification().map(str::to_string),
                closed_at,
            },
        )
        .await?;

        tx.commit().await?;

        Ok(Closed {
            shift: Shift {
                status: ShiftStatus::Closed,
                actual_cash_pence: Some(input.actual_cash_pence),
                variance_pence: Some(variance),
                variance_reason: reason.map(str::to_string),
                approval_kind: Some(approval_kind),
                approved_by: Some(approver.id),
                closed_by: Some(ctx.user_id.clone()),
                closed_at: Some(closed_at),
                ..shift
            },
            threshold_pence: business.variance_alert_threshold_pence,
        })
    }

    async fn verify_approval(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperatorContext,
        approval: &ShiftApproval,
    ) -> EngineResult<User> {
        let approver = match approval {
            ShiftApproval::ManagerPin { pin } => {
                resolve_supervisor_pin(conn, &ctx.business_id, pin).await?
            }
            ShiftApproval::OwnerOverride {
                owner_id, password, ..
            } => verify_owner_password(conn, &ctx.business_id, owner_id, password).await?,
        };

        approver.ok_or_else(|| {
            warn!(kind = ?approval.kind(), user_id = %ctx.user_id, "Shift closure approval rejected");
            let message = match approval {
                ShiftApproval::ManagerPin { .. } => "manager PIN did not verify",
                ShiftApproval::OwnerOverride { .. } => "owner credentials did not verify",
            };
            CoreError::InvalidApproval(message.to_string()).into()
        })
    }

    /// Live X-report: the shift, per-method takings and the drawer journal.
    pub async fn shift_summary(&self, business_id: &str, shift_id: &str) -> EngineResult<ShiftSummary> {
        let mut conn = self.engine.db().pool().acquire().await?;
        let shift = ShiftRepository::find_shift(&mut conn, business_id, shift_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Shift", shift_id))?;
        let totals = SalesRepository::shift_totals(&mut conn, shift_id).await?;
        let entries = ShiftRepository::entries_for_shift(&mut conn, shift_id).await?;
        Ok(ShiftSummary {
            shift,
            totals,
            entries,
        })
    }

    pub async fn current_shift(&self, business_id: &str, till_id: &str) -> EngineResult<Option<Shift>> {
        Ok(self
            .engine
            .db()
            .shifts()
            .get_open_for_till(business_id, till_id)
            .await?)
    }

    pub async fn closure(&self, shift_id: &str) -> EngineResult<Option<ShiftClosure>> {
        Ok(self.engine.db().shifts().find_closure(shift_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testkit::{Fixture, MANAGER_PIN, OWNER_PASSWORD};
    use till_core::shift::ApprovalKind;
    use till_db::AuditOutcome;

    fn pin(value: &str) -> ShiftApproval {
        ShiftApproval::ManagerPin { pin: value.into() }
    }

    #[tokio::test]
    async fn test_open_writes_float_entry() {
        let fx = Fixture::new().await;
        let shift = fx.open_shift(5000).await;
        assert_eq!(shift.expected_cash_pence, 5000);

        let summary = fx
            .engine
            .shifts()
            .shift_summary(&fx.business_id, &shift.id)
            .await
            .unwrap();
        assert_eq!(summary.entries.len(), 1);
        assert_eq!(summary.entries[0].entry_type, CashDrawerEntryType::OpenFloat);
        assert_eq!(summary.entries[0].amount_pence, 5000);
    }

    #[tokio::test]
    async fn test_second_open_on_same_till_rejected() {
        let fx = Fixture::new().await;
        fx.open_shift(1000).await;

        let err = fx
            .engine
            .shifts()
            .open_shift(
                &fx.cashier_ctx(),
                OpenShiftInput {
                    till_id: fx.till_id.clone(),
                    opening_cash_pence: 0,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TillAlreadyOpen);
    }

    #[tokio::test]
    async fn test_foreign_till_is_invalid_reference() {
        let fx = Fixture::new().await;
        let err = fx
            .engine
            .shifts()
            .open_shift(
                &fx.cashier_ctx(),
                OpenShiftInput {
                    till_id: "no-such-till".into(),
                    opening_cash_pence: 0,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidReference);
    }

    #[tokio::test]
    async fn test_scenario_float_5000_sales_12000_counted_16500() {
        let fx = Fixture::new().await;
        let shift = fx.open_shift(5000).await;
        // 12 widgets at 1000, paid in cash
        fx.cash_sale(&fx.widget, 12, 12_000).await;

        let summary = fx
            .engine
            .shifts()
            .shift_summary(&fx.business_id, &shift.id)
            .await
            .unwrap();
        assert_eq!(summary.shift.expected_cash_pence, 17_000);
        assert_eq!(summary.totals.cash_pence, 12_000);

        let err = fx
            .engine
            .shifts()
            .close_shift(
                &fx.cashier_ctx(),
                CloseShiftInput {
                    shift_id: shift.id.clone(),
                    actual_cash_pence: 16_500,
                    approval: pin(MANAGER_PIN),
                    variance_reason: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::VarianceReasonRequired);
        match err.as_core() {
            Some(CoreError::VarianceReasonRequired { variance_pence }) => {
                assert_eq!(*variance_pence, -500)
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let closed = fx
            .engine
            .shifts()
            .close_shift(
                &fx.cashier_ctx(),
                CloseShiftInput {
                    shift_id: shift.id.clone(),
                    actual_cash_pence: 16_500,
                    approval: pin(MANAGER_PIN),
                    variance_reason: Some("MISCOUNT".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(closed.status, ShiftStatus::Closed);
        assert_eq!(closed.expected_cash_pence, 17_000);
        assert_eq!(closed.variance_pence, Some(-500));
        assert_eq!(closed.approved_by.as_deref(), Some(fx.manager_id.as_str()));

        let closure = fx.engine.shifts().closure(&shift.id).await.unwrap().unwrap();
        assert_eq!(closure.snapshot_version, CLOSURE_SNAPSHOT_VERSION);
        assert_eq!(closure.counted_cash_pence, 16_500);
        assert_eq!(closure.variance_pence, -500);
        assert_eq!(closure.cash_sales_pence, 12_000);
        assert_eq!(closure.invoice_count, 1);

        let over_short = fx
            .engine
            .ledger()
            .account_balance(&fx.business_id, accounts::CASH_OVER_SHORT)
            .await
            .unwrap();
        assert_eq!(over_short.balance_pence(), 500);
    }

    #[tokio::test]
    async fn test_exact_count_needs_no_reason_and_posts_nothing() {
        let fx = Fixture::new().await;
        let shift = fx.open_shift(2000).await;
        let entries_before = fx.engine.db().ledger().count_entries(&fx.business_id).await.unwrap();

        let closed = fx
            .engine
            .shifts()
            .close_shift(
                &fx.cashier_ctx(),
                CloseShiftInput {
                    shift_id: shift.id.clone(),
                    actual_cash_pence: 2000,
                    approval: pin(MANAGER_PIN),
                    variance_reason: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(closed.variance_pence, Some(0));

        let entries_after = fx.engine.db().ledger().count_entries(&fx.business_id).await.unwrap();
        assert_eq!(entries_after, entries_before);
    }

    #[tokio::test]
    async fn test_wrong_pin_is_rejected_and_audited() {
        let mut fx = Fixture::new().await;
        let shift = fx.open_shift(1000).await;

        let err = fx
            .engine
            .shifts()
            .close_shift(
                &fx.cashier_ctx(),
                CloseShiftInput {
                    shift_id: shift.id.clone(),
                    actual_cash_pence: 1000,
                    approval: pin("0000"),
                    variance_reason: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApproval);

        let event = fx.next_audit_event("shift.close").await;
        assert_eq!(event.outcome, AuditOutcome::Denied);
        assert_eq!(event.resource_id.as_deref(), Some(shift.id.as_str()));

        let still_open = fx
            .engine
            .shifts()
            .current_shift(&fx.business_id, &fx.till_id)
            .await
            .unwrap();
        assert!(still_open.is_some());
    }

    #[tokio::test]
    async fn test_cashier_pin_does_not_approve() {
        let fx = Fixture::new().await;
        let shift = fx.open_shift(1000).await;

        let err = fx
            .engine
            .shifts()
            .close_shift(
                &fx.cashier_ctx(),
                CloseShiftInput {
                    shift_id: shift.id,
                    actual_cash_pence: 1000,
                    approval: pin(crate::testkit::CASHIER_PIN),
                    variance_reason: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApproval);
    }

    #[tokio::test]
    async fn test_owner_override_supplies_reason_and_raises_alert() {
        let fx = Fixture::new().await;
        let shift = fx.open_shift(1500).await;

        // Threshold is 1000; 1500 short crosses it
        let closed = fx
            .engine
            .shifts()
            .close_shift(
                &fx.cashier_ctx(),
                CloseShiftInput {
                    shift_id: shift.id.clone(),
                    actual_cash_pence: 0,
                    approval: ShiftApproval::OwnerOverride {
                        owner_id: fx.owner_id.clone(),
                        password: OWNER_PASSWORD.into(),
                        reason_code: "THEFT_SUSPECTED".into(),
                        justification: "Drawer found open after break".into(),
                    },
                    variance_reason: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(closed.approval_kind, Some(ApprovalKind::OwnerOverride));
        assert_eq!(closed.variance_reason.as_deref(), Some("THEFT_SUSPECTED"));

        let alerts = fx
            .engine
            .db()
            .risk()
            .alerts_for_subject("shift", &shift.id)
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].amount_pence, -1500);
    }

    #[tokio::test]
    async fn test_owner_override_with_wrong_password() {
        let fx = Fixture::new().await;
        let shift = fx.open_shift(1000).await;

        let err = fx
            .engine
            .shifts()
            .close_shift(
                &fx.manager_ctx(),
                CloseShiftInput {
                    shift_id: shift.id,
                    actual_cash_pence: 1000,
                    approval: ShiftApproval::OwnerOverride {
                        owner_id: fx.owner_id.clone(),
                        password: "guess".into(),
                        reason_code: "LATE_CLOSE".into(),
                        justification: "Closing for absent cashier".into(),
                    },
                    variance_reason: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApproval);
    }

    #[tokio::test]
    async fn test_closing_twice_is_already_closed() {
        let fx = Fixture::new().await;
        let shift = fx.open_shift(0).await;
        let input = CloseShiftInput {
            shift_id: shift.id.clone(),
            actual_cash_pence: 0,
            approval: pin(MANAGER_PIN),
            variance_reason: None,
        };

        fx.engine
            .shifts()
            .close_shift(&fx.cashier_ctx(), input.clone())
            .await
            .unwrap();
        let err = fx
            .engine
            .shifts()
            .close_shift(&fx.cashier_ctx(), input)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyClosed);

        // The till is free again
        fx.open_shift(0).await;
    }
}
