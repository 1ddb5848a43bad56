//! # Sale Orchestrator
//!
//! Turns a basket into a committed invoice: priced lines, stock out at
//! average cost, one balanced journal entry, payments, and the shift's cash.
//!
//! ## create_sale
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate_sale()             shape checks, before any transaction       │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │   ├─ require(CreateSale | SyncOffline)                                  │
//! │   ├─ external_ref seen?  ──yes──► ROLLBACK, return it (replayed)        │
//! │   ├─ resolve store / till / customer / products / units                 │
//! │   ├─ price_sale()        promo → line discount → order discount → VAT   │
//! │   ├─ allocate_payments() change from cash only                          │
//! │   ├─ stock out per line  InsufficientStock aborts everything            │
//! │   ├─ ledger::post()      one entry, Dr = Cr                             │
//! │   ├─ INSERT invoice      unique (business, external_ref)                │
//! │   │     └─ lost the race ──► ROLLBACK, return the winner (replayed)     │
//! │   ├─ INSERT lines, payments                                             │
//! │   └─ shift cash          expected += cash applied, CASH_SALE entry      │
//! │  COMMIT ──► audit event                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sale Journal
//! ```text
//!   Dr  1000/1010/1020/1030  applied payments, per method
//!   Dr  1100                 balance left on account
//!   Dr  4900                 promo + line + order discounts
//!   Dr  5000                 cost of goods at average cost
//!       Cr  4000             gross
//!       Cr  2100             VAT
//!       Cr  1200             cost of goods
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::AuditEvent;
use crate::context::{self, OperatorContext};
use crate::error::{EngineError, EngineResult};
use crate::inventory::{apply_stock_movement, resolve_product_unit, resolve_store, StockMove};
use crate::ledger::{self, reversal_draft};
use crate::retry::with_retry;
use crate::shifts::{record_drawer_cash, resolve_open_shift};
use crate::Engine;
use till_core::ledger::{accounts, JournalDraft};
use till_core::pricing::{allocate_payments, price_sale, Discount, PricedSale, PricingLine, Tender};
use till_core::shift::CashDrawerEntryType;
use till_core::validation::{
    validate_external_ref, validate_line_count, validate_quantity, validate_required,
};
use till_core::{
    new_id, Capability, CoreError, PaymentMethod, PaymentStatus, SalesInvoice, SalesInvoiceLine,
    SalesPayment, StockMovementReason, ValidationError,
};
use till_db::{LedgerRepository, SalesRepository, TenancyRepository};

pub const SALE_REFERENCE: &str = "SALES_INVOICE";
pub const PAYMENT_REFERENCE: &str = "SALES_PAYMENT";
pub const VOID_REFERENCE: &str = "SALES_VOID";

// =============================================================================
// Inputs & Results
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLineInput {
    pub product_id: String,
    pub unit_id: String,
    /// Quantity in `unit_id`, converted to base units before costing.
    pub qty_in_unit: i64,
    #[serde(default)]
    pub discount: Option<Discount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleInput {
    pub store_id: String,
    #[serde(default)]
    pub till_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    /// What the till believes the outcome is. `PAID` must be covered by the
    /// payments; VOID and RETURNED are never valid here.
    pub intent: PaymentStatus,
    pub lines: Vec<SaleLineInput>,
    #[serde(default)]
    pub order_discount: Option<Discount>,
    #[serde(default)]
    pub payments: Vec<Tender>,
    /// Idempotency key, unique per business.
    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub shift_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub invoice: SalesInvoice,
    /// True when `external_ref` had already been applied and nothing new
    /// was written.
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentInput {
    pub invoice_id: String,
    pub method: PaymentMethod,
    pub amount_pence: i64,
    #[serde(default)]
    pub shift_id: Option<String>,
}

/// Shape checks that need no database.
pub fn validate_sale(input: &SaleInput) -> EngineResult<()> {
    validate_required("store_id", &input.store_id)?;
    validate_line_count(input.lines.len())?;
    for (idx, line) in input.lines.iter().enumerate() {
        validate_required(&format!("lines[{}].product_id", idx), &line.product_id)?;
        validate_required(&format!("lines[{}].unit_id", idx), &line.unit_id)?;
        validate_quantity(&format!("lines[{}].qty_in_unit", idx), line.qty_in_unit)?;
        validate_discount(&format!("lines[{}].discount", idx), line.discount.as_ref())?;
    }
    validate_discount("order_discount", input.order_discount.as_ref())?;
    for (idx, tender) in input.payments.iter().enumerate() {
        if tender.amount_pence <= 0 {
            return Err(ValidationError::MustBePositive {
                field: format!("payments[{}].amount_pence", idx),
            }
            .into());
        }
    }
    if let Some(external_ref) = &input.external_ref {
        validate_external_ref(external_ref)?;
    }
    if input.intent.is_terminal() {
        return Err(ValidationError::invalid("intent", "a sale cannot be created as VOID or RETURNED").into());
    }
    Ok(())
}

fn validate_discount(field: &str, discount: Option<&Discount>) -> EngineResult<()> {
    if let Some(discount) = discount {
        if discount.value < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: field.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// The sale's journal. Zero-valued lines are dropped by the draft.
fn sale_draft(
    invoice: &SalesInvoice,
    priced: &PricedSale,
    applied_by_method: &[(PaymentMethod, i64)],
) -> JournalDraft {
    let mut draft = JournalDraft::new(
        format!("Sale {}", invoice.invoice_number),
        SALE_REFERENCE,
        &invoice.id,
        invoice.created_at.date_naive(),
    );
    for (method, applied) in applied_by_method {
        draft = draft.debit(method.ledger_account(), *applied);
    }
    draft
        .debit(accounts::ACCOUNTS_RECEIVABLE, invoice.balance_due_pence())
        .debit(accounts::SALES_DISCOUNTS, priced.discount_pence)
        .debit(accounts::COST_OF_GOODS_SOLD, invoice.cost_pence)
        .credit(accounts::SALES_REVENUE, priced.gross_pence)
        .credit(accounts::VAT_PAYABLE, priced.vat_pence)
        .credit(accounts::INVENTORY, invoice.cost_pence)
}

enum Outcome {
    Created(SalesInvoice),
    Replayed(SalesInvoice),
}

// =============================================================================
// Service
// =============================================================================

pub struct SalesService<'a> {
    engine: &'a Engine,
}

impl<'a> SalesService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        SalesService { engine }
    }

    /// Creates a sale at the till.
    pub async fn create_sale(&self, ctx: &OperatorContext, input: SaleInput) -> EngineResult<SaleReceipt> {
        self.create_with(ctx, input, Capability::CreateSale).await
    }

    /// Creates a sale captured offline. Same path, different capability.
    pub async fn create_offline_sale(
        &self,
        ctx: &OperatorContext,
        input: SaleInput,
    ) -> EngineResult<SaleReceipt> {
        self.create_with(ctx, input, Capability::SyncOffline).await
    }

    async fn create_with(
        &self,
        ctx: &OperatorContext,
        input: SaleInput,
        capability: Capability,
    ) -> EngineResult<SaleReceipt> {
        validate_sale(&input)?;

        let result = with_retry(&self.engine.retry_policy(), || {
            self.create_once(ctx, &input, capability)
        })
        .await;

        match result {
            Ok(Outcome::Created(invoice)) => {
                info!(
                    invoice_id = %invoice.id,
                    invoice_number = %invoice.invoice_number,
                    total = invoice.total_pence,
                    status = %invoice.payment_status,
                    "Sale created"
                );
                self.engine.audit().emit(
                    AuditEvent::success(
                        &ctx.business_id,
                        &ctx.user_id,
                        "sale.create",
                        "sales_invoice",
                        &invoice.id,
                    )
                    .with_details(serde_json::json!({
                        "invoice_number": invoice.invoice_number,
                        "external_ref": invoice.external_ref,
                        "total_pence": invoice.total_pence,
                        "paid_pence": invoice.paid_pence,
                        "payment_status": invoice.payment_status,
                    })),
                );
                Ok(SaleReceipt {
                    invoice,
                    replayed: false,
                })
            }
            Ok(Outcome::Replayed(invoice)) => {
                debug!(
                    invoice_id = %invoice.id,
                    external_ref = ?invoice.external_ref,
                    "Sale replayed from external_ref"
                );
                Ok(SaleReceipt {
                    invoice,
                    replayed: true,
                })
            }
            Err(err) => {
                self.engine
                    .audit_refusal(ctx, "sale.create", "sales_invoice", None, &err);
                Err(err)
            }
        }
    }

    async fn create_once(
        &self,
        ctx: &OperatorContext,
        input: &SaleInput,
        capability: Capability,
    ) -> EngineResult<Outcome> {
        let business_id = ctx.business_id.as_str();
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, capability).await?;

        if let Some(external_ref) = &input.external_ref {
            if let Some(existing) =
                SalesRepository::find_by_external_ref(&mut tx, business_id, external_ref).await?
            {
                let full = SalesRepository::find_invoice_full(&mut tx, business_id, &existing.id)
                    .await?
                    .unwrap_or(existing);
                tx.rollback().await?;
                return Ok(Outcome::Replayed(full));
            }
        }

        // References
        let store = resolve_store(&mut tx, business_id, &input.store_id).await?;
        if let Some(till_id) = &input.till_id {
            TenancyRepository::find_till(&mut tx, business_id, till_id)
                .await?
                .filter(|t| t.is_active && t.store_id == store.id)
                .ok_or_else(|| CoreError::invalid_reference("till", till_id))?;
        }
        if let Some(customer_id) = &input.customer_id {
            TenancyRepository::find_customer(&mut tx, business_id, customer_id)
                .await?
                .ok_or_else(|| CoreError::invalid_reference("customer", customer_id))?;
        }

        // Pricing
        let mut pricing_lines = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            let (product, unit) =
                resolve_product_unit(&mut tx, business_id, &line.product_id, &line.unit_id).await?;
            pricing_lines.push(PricingLine {
                product_id: product.id.clone(),
                unit_id: unit.unit_id.clone(),
                qty_in_unit: line.qty_in_unit,
                conversion_to_base: unit.conversion_to_base,
                unit_price_base_pence: product.unit_price_base_pence,
                vat_rate: product.vat_rate(),
                promo: product.promo(),
                discount: line.discount,
            });
        }
        let priced = price_sale(&pricing_lines, input.order_discount.as_ref())?;

        // Payments
        let allocation = allocate_payments(priced.total_pence, &input.payments)?;
        if input.intent == PaymentStatus::Paid && allocation.paid_pence < priced.total_pence {
            return Err(ValidationError::invalid(
                "payments",
                format!(
                    "sale marked PAID but payments cover {} of {}",
                    allocation.paid_pence, priced.total_pence
                ),
            )
            .into());
        }
        if allocation.balance_due_pence > 0 && input.customer_id.is_none() {
            return Err(ValidationError::required("customer_id").into());
        }

        let shift = resolve_open_shift(
            &mut tx,
            business_id,
            input.till_id.as_deref(),
            input.shift_id.as_deref(),
        )
        .await?;

        let invoice_id = new_id();
        let now = Utc::now();

        // Stock out, promo units included, at the average read here
        let mut lines = Vec::with_capacity(priced.lines.len());
        for (idx, priced_line) in priced.lines.iter().enumerate() {
            let (before, _) = apply_stock_movement(
                &mut tx,
                business_id,
                &StockMove {
                    store_id: &store.id,
                    product_id: &priced_line.product_id,
                    delta_base: -priced_line.qty_base,
                    unit_cost_base_pence: None,
                    reason: StockMovementReason::Sale,
                    reference_type: SALE_REFERENCE,
                    reference_id: &invoice_id,
                },
            )
            .await?;

            let unit_cost = before.avg_cost_base_pence;
            lines.push(SalesInvoiceLine {
                id: new_id(),
                invoice_id: invoice_id.clone(),
                line_no: idx as i64 + 1,
                product_id: priced_line.product_id.clone(),
                unit_id: priced_line.unit_id.clone(),
                qty_in_unit: priced_line.qty_in_unit,
                conversion_to_base: priced_line.conversion_to_base,
                qty_base: priced_line.qty_base,
                unit_price_base_pence: priced_line.unit_price_base_pence,
                gross_pence: priced_line.gross_pence,
                promo_free_qty_base: priced_line.promo_free_qty_base,
                promo_discount_pence: priced_line.promo_discount_pence,
                line_discount_type: priced_line.line_discount_type,
                line_discount_value: priced_line.line_discount_value,
                line_discount_pence: priced_line.line_discount_pence,
                order_discount_pence: priced_line.order_discount_pence,
                net_pence: priced_line.net_pence,
                vat_rate_bps: priced_line.vat_rate_bps,
                vat_pence: priced_line.vat_pence,
                unit_cost_base_pence: unit_cost,
                cost_pence: unit_cost * priced_line.qty_base,
            });
        }

        let invoice_number =
            SalesRepository::next_invoice_number(&mut tx, business_id, now.date_naive()).await?;
        let shift_id = shift.as_ref().map(|s| s.id.clone());

        let mut invoice = SalesInvoice {
            id: invoice_id.clone(),
            business_id: business_id.to_string(),
            store_id: store.id.clone(),
            till_id: input.till_id.clone(),
            cashier_id: ctx.user_id.clone(),
            customer_id: input.customer_id.clone(),
            shift_id: shift_id.clone(),
            invoice_number,
            external_ref: input.external_ref.clone(),
            payment_status: allocation.status,
            gross_pence: priced.gross_pence,
            discount_pence: priced.discount_pence,
            net_pence: priced.net_pence,
            vat_pence: priced.vat_pence,
            total_pence: priced.total_pence,
            paid_pence: allocation.paid_pence,
            change_pence: allocation.change_pence,
            cost_pence: lines.iter().map(|l| l.cost_pence).sum(),
            journal_entry_id: None,
            void_reason: None,
            voided_at: None,
            created_at: now,
            lines: Vec::new(),
            payments: Vec::new(),
        };

        let draft = sale_draft(&invoice, &priced, &allocation.applied_by_method());
        invoice.journal_entry_id =
            ledger::post_if_any(&mut tx, business_id, Some(&ctx.user_id), &draft).await?;

        match SalesRepository::insert_invoice(&mut tx, &invoice).await {
            Ok(()) => {}
            Err(err) if err.is_unique_on("external_ref") => {
                tx.rollback().await?;
                return self.load_winner(business_id, input).await;
            }
            Err(err) => return Err(err.into()),
        }

        for line in &lines {
            SalesRepository::insert_line(&mut tx, line).await?;
        }

        let mut payments = Vec::with_capacity(allocation.tenders.len());
        for tender in allocation.tenders.iter().filter(|t| t.applied_pence > 0) {
            let payment = SalesPayment {
                id: new_id(),
                invoice_id: invoice_id.clone(),
                method: tender.method,
                amount_pence: tender.applied_pence,
                tendered_pence: tender.tendered_pence,
                change_pence: tender.change_pence,
                shift_id: shift_id.clone(),
                recorded_by: ctx.user_id.clone(),
                created_at: now,
            };
            SalesRepository::insert_payment(&mut tx, &payment).await?;
            payments.push(payment);
        }

        let cash_applied = allocation.cash_applied_pence();
        if let (Some(shift), true) = (&shift, cash_applied > 0) {
            record_drawer_cash(
                &mut tx,
                &shift.id,
                CashDrawerEntryType::CashSale,
                cash_applied,
                (SALE_REFERENCE, &invoice_id),
                &ctx.user_id,
            )
            .await?;
        }

        tx.commit().await?;

        invoice.lines = lines;
        invoice.payments = payments;
        Ok(Outcome::Created(invoice))
    }

    async fn load_winner(&self, business_id: &str, input: &SaleInput) -> EngineResult<Outcome> {
        let external_ref = input.external_ref.as_deref().unwrap_or_default();
        let mut conn = self.engine.db().pool().acquire().await?;
        let winner = SalesRepository::find_by_external_ref(&mut conn, business_id, external_ref)
            .await?
            .ok_or_else(|| {
                EngineError::Conflict(format!("external_ref {} raced but is missing", external_ref))
            })?;
        let full = SalesRepository::find_invoice_full(&mut conn, business_id, &winner.id)
            .await?
            .unwrap_or(winner);
        Ok(Outcome::Replayed(full))
    }

    /// Adds a payment to an UNPAID or PART_PAID invoice.
    pub async fn record_payment(
        &self,
        ctx: &OperatorContext,
        input: RecordPaymentInput,
    ) -> EngineResult<SalesInvoice> {
        validate_required("invoice_id", &input.invoice_id)?;
        if input.amount_pence <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "amount_pence".to_string(),
            }
            .into());
        }

        let result = with_retry(&self.engine.retry_policy(), || self.pay_once(ctx, &input)).await;

        match &result {
            Ok(invoice) => {
                info!(
                    invoice_id = %invoice.id,
                    paid = invoice.paid_pence,
                    status = %invoice.payment_status,
                    "Payment recorded"
                );
                self.engine.audit().emit(
                    AuditEvent::success(
                        &ctx.business_id,
                        &ctx.user_id,
                        "sale.payment",
                        "sales_invoice",
                        &invoice.id,
                    )
                    .with_details(serde_json::json!({
                        "method": input.method,
                        "amount_pence": input.amount_pence,
                        "payment_status": invoice.payment_status,
                    })),
                );
            }
            Err(err) => self.engine.audit_refusal(
                ctx,
                "sale.payment",
                "sales_invoice",
                Some(&input.invoice_id),
                err,
            ),
        }
        result
    }

    async fn pay_once(&self, ctx: &OperatorContext, input: &RecordPaymentInput) -> EngineResult<SalesInvoice> {
        let business_id = ctx.business_id.as_str();
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::RecordPayment).await?;

        let invoice = SalesRepository::find_invoice(&mut tx, business_id, &input.invoice_id)
            .await?
            .ok_or_else(|| CoreError::not_found("SalesInvoice", &input.invoice_id))?;
        if !matches!(
            invoice.payment_status,
            PaymentStatus::Unpaid | PaymentStatus::PartPaid
        ) {
            return Err(CoreError::InvalidInvoiceStatus {
                invoice_id: invoice.id,
                status: invoice.payment_status.to_string(),
            }
            .into());
        }

        let allocation = allocate_payments(
            invoice.balance_due_pence(),
            &[Tender {
                method: input.method,
                amount_pence: input.amount_pence,
            }],
        )?;
        let applied = allocation.paid_pence;
        if applied <= 0 {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "nothing is owed on this invoice".to_string(),
            }
            .into());
        }

        let paid_pence = invoice.paid_pence + applied;
        let status = PaymentStatus::from_amounts(paid_pence, invoice.total_pence);
        if !SalesRepository::update_settlement(
            &mut tx,
            &invoice.id,
            invoice.payment_status,
            paid_pence,
            status,
        )
        .await?
        {
            return Err(EngineError::Conflict(format!(
                "invoice {} settled concurrently",
                invoice.id
            )));
        }

        let shift = resolve_open_shift(
            &mut tx,
            business_id,
            invoice.till_id.as_deref(),
            input.shift_id.as_deref(),
        )
        .await?;
        let now = Utc::now();
        let payment = SalesPayment {
            id: new_id(),
            invoice_id: invoice.id.clone(),
            method: input.method,
            amount_pence: applied,
            tendered_pence: input.amount_pence,
            change_pence: allocation.change_pence,
            shift_id: shift.as_ref().map(|s| s.id.clone()),
            recorded_by: ctx.user_id.clone(),
            created_at: now,
        };
        SalesRepository::insert_payment(&mut tx, &payment).await?;

        if let (Some(shift), true) = (&shift, input.method.is_cash()) {
            record_drawer_cash(
                &mut tx,
                &shift.id,
                CashDrawerEntryType::CashPayment,
                applied,
                (PAYMENT_REFERENCE, &invoice.id),
                &ctx.user_id,
            )
            .await?;
        }

        let draft = JournalDraft::new(
            format!("Payment on {}", invoice.invoice_number),
            PAYMENT_REFERENCE,
            &invoice.id,
            now.date_naive(),
        )
        .debit(input.method.ledger_account(), applied)
        .credit(accounts::ACCOUNTS_RECEIVABLE, applied);
        ledger::post(&mut tx, business_id, Some(&ctx.user_id), &draft).await?;

        let updated = SalesRepository::find_invoice_full(&mut tx, business_id, &invoice.id)
            .await?
            .ok_or_else(|| CoreError::not_found("SalesInvoice", &invoice.id))?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Voids an invoice: stock back at line cost, every posting reversed,
    /// cash refunded through the open shift.
    pub async fn void_sale(
        &self,
        ctx: &OperatorContext,
        invoice_id: &str,
        reason: &str,
    ) -> EngineResult<SalesInvoice> {
        validate_required("invoice_id", invoice_id)?;
        validate_required("reason", reason)?;

        let result = with_retry(&self.engine.retry_policy(), || {
            self.void_once(ctx, invoice_id, reason)
        })
        .await;

        match &result {
            Ok(invoice) => {
                info!(invoice_id = %invoice.id, reason = %reason, "Sale voided");
                self.engine.audit().emit(
                    AuditEvent::success(
                        &ctx.business_id,
                        &ctx.user_id,
                        "sale.void",
                        "sales_invoice",
                        &invoice.id,
                    )
                    .with_details(serde_json::json!({
                        "reason": reason,
                        "total_pence": invoice.total_pence,
                        "paid_pence": invoice.paid_pence,
                    })),
                );
            }
            Err(err) => {
                self.engine
                    .audit_refusal(ctx, "sale.void", "sales_invoice", Some(invoice_id), err)
            }
        }
        result
    }

    async fn void_once(
        &self,
        ctx: &OperatorContext,
        invoice_id: &str,
        reason: &str,
    ) -> EngineResult<SalesInvoice> {
        let business_id = ctx.business_id.as_str();
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::VoidSale).await?;

        let invoice = SalesRepository::find_invoice_full(&mut tx, business_id, invoice_id)
            .await?
            .ok_or_else(|| CoreError::not_found("SalesInvoice", invoice_id))?;
        let now = Utc::now();
        if invoice.payment_status.is_terminal()
            || !SalesRepository::mark_void(&mut tx, &invoice.id, reason, now).await?
        {
            return Err(CoreError::InvalidInvoiceStatus {
                invoice_id: invoice.id,
                status: invoice.payment_status.to_string(),
            }
            .into());
        }

        for line in &invoice.lines {
            apply_stock_movement(
                &mut tx,
                business_id,
                &StockMove {
                    store_id: &invoice.store_id,
                    product_id: &line.product_id,
                    delta_base: line.qty_base,
                    unit_cost_base_pence: Some(line.unit_cost_base_pence),
                    reason: StockMovementReason::SaleVoid,
                    reference_type: VOID_REFERENCE,
                    reference_id: &invoice.id,
                },
            )
            .await?;
        }

        // The sale entry and every later payment entry, reversed as one
        let mut draft = JournalDraft::new(
            format!("Void {}", invoice.invoice_number),
            VOID_REFERENCE,
            &invoice.id,
            now.date_naive(),
        );
        for reference_type in [SALE_REFERENCE, PAYMENT_REFERENCE] {
            let entries =
                LedgerRepository::find_for_reference(&mut tx, business_id, reference_type, &invoice.id)
                    .await?;
            for entry in &entries {
                let reversal = reversal_draft(entry, "", VOID_REFERENCE, &invoice.id, now.date_naive());
                draft.lines.extend(reversal.lines);
            }
        }
        ledger::post_if_any(&mut tx, business_id, Some(&ctx.user_id), &draft).await?;

        let cash_paid: i64 = invoice
            .payments
            .iter()
            .filter(|p| p.method.is_cash())
            .map(|p| p.amount_pence)
            .sum();
        if cash_paid > 0 {
            let shift = resolve_open_shift(
                &mut tx,
                business_id,
                invoice.till_id.as_deref(),
                invoice.shift_id.as_deref(),
            )
            .await?;
            if let Some(shift) = shift {
                record_drawer_cash(
                    &mut tx,
                    &shift.id,
                    CashDrawerEntryType::CashRefund,
                    cash_paid,
                    (VOID_REFERENCE, &invoice.id),
                    &ctx.user_id,
                )
                .await?;
            }
        }

        tx.commit().await?;
        Ok(SalesInvoice {
            payment_status: PaymentStatus::Void,
            void_reason: Some(reason.to_string()),
            voided_at: Some(now),
            ..invoice
        })
    }

    /// Invoice with its lines and payments.
    pub async fn get_invoice(&self, business_id: &str, invoice_id: &str) -> EngineResult<SalesInvoice> {
        self.engine
            .db()
            .sales()
            .get_invoice(business_id, invoice_id)
            .await?
            .ok_or_else(|| CoreError::not_found("SalesInvoice", invoice_id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testkit::{Fixture, OPENING_AVG_COST, OPENING_STOCK};

    fn line(product_id: &str, unit_id: &str, qty: i64) -> SaleLineInput {
        SaleLineInput {
            product_id: product_id.into(),
            unit_id: unit_id.into(),
            qty_in_unit: qty,
            discount: None,
        }
    }

    fn cash(amount: i64) -> Tender {
        Tender {
            method: PaymentMethod::Cash,
            amount_pence: amount,
        }
    }

    fn sale(fx: &Fixture, lines: Vec<SaleLineInput>, payments: Vec<Tender>) -> SaleInput {
        SaleInput {
            store_id: fx.store_a.clone(),
            till_id: Some(fx.till_id.clone()),
            customer_id: None,
            intent: PaymentStatus::Paid,
            lines,
            order_discount: None,
            payments,
            external_ref: None,
            shift_id: None,
        }
    }

    #[tokio::test]
    async fn test_scenario_three_units_cash() {
        let fx = Fixture::new().await;
        let receipt = fx
            .engine
            .sales()
            .create_sale(
                &fx.cashier_ctx(),
                sale(&fx, vec![line(&fx.widget, &fx.each_unit, 3)], vec![cash(3000)]),
            )
            .await
            .unwrap();
        let invoice = receipt.invoice;

        assert!(!receipt.replayed);
        assert_eq!(invoice.total_pence, 3000);
        assert_eq!(invoice.payment_status, PaymentStatus::Paid);
        assert!(invoice.invoice_number.starts_with("INV-"));
        assert_eq!(invoice.cost_pence, 3 * OPENING_AVG_COST);

        let position = fx.balance(&fx.store_a, &fx.widget).await;
        assert_eq!(position.qty_on_hand_base, OPENING_STOCK - 3);

        let entry = fx
            .engine
            .ledger()
            .get_entry(&fx.business_id, invoice.journal_entry_id.as_deref().unwrap())
            .await
            .unwrap();
        let side = |code: &str| -> (i64, i64) {
            entry
                .lines
                .iter()
                .filter(|l| l.account_code == code)
                .fold((0, 0), |(d, c), l| (d + l.debit_pence, c + l.credit_pence))
        };
        assert_eq!(side(accounts::CASH), (3000, 0));
        assert_eq!(side(accounts::SALES_REVENUE), (0, 3000));
        assert_eq!(side(accounts::COST_OF_GOODS_SOLD), (3 * OPENING_AVG_COST, 0));
        assert_eq!(side(accounts::INVENTORY), (0, 3 * OPENING_AVG_COST));
        assert_eq!(entry.lines.len(), 4);
        assert_eq!(entry.total_debits(), entry.total_credits());
    }

    #[tokio::test]
    async fn test_cash_overtender_returns_change() {
        let fx = Fixture::new().await;
        let invoice = fx
            .engine
            .sales()
            .create_sale(
                &fx.cashier_ctx(),
                sale(&fx, vec![line(&fx.widget, &fx.each_unit, 1)], vec![cash(5000)]),
            )
            .await
            .unwrap()
            .invoice;

        assert_eq!(invoice.paid_pence, 1000);
        assert_eq!(invoice.change_pence, 4000);
        assert_eq!(invoice.payments.len(), 1);
        assert_eq!(invoice.payments[0].tendered_pence, 5000);
    }

    #[tokio::test]
    async fn test_card_overpayment_rejected() {
        let fx = Fixture::new().await;
        let err = fx
            .engine
            .sales()
            .create_sale(
                &fx.cashier_ctx(),
                sale(
                    &fx,
                    vec![line(&fx.widget, &fx.each_unit, 1)],
                    vec![Tender {
                        method: PaymentMethod::Card,
                        amount_pence: 1500,
                    }],
                ),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK);
    }

    #[tokio::test]
    async fn test_carton_promo_discount_and_vat() {
        let fx = Fixture::new().await;
        // 1 carton (12) of the promo item at 500, buy 2 get 1 → 6 free
        // then 10% order discount, VAT item 1 each at 1000 + 20%
        let mut input = sale(
            &fx,
            vec![
                line(&fx.promo_item, &fx.carton_unit, 1),
                line(&fx.vat_item, &fx.each_unit, 1),
            ],
            vec![],
        );
        input.order_discount = Some(Discount::percent(10));
        input.intent = PaymentStatus::Unpaid;
        input.customer_id = Some(fx.customer_id.clone());

        let invoice = fx
            .engine
            .sales()
            .create_sale(&fx.cashier_ctx(), input)
            .await
            .unwrap()
            .invoice;

        assert_eq!(invoice.lines[0].qty_base, 12);
        assert_eq!(invoice.lines[0].promo_free_qty_base, 6);
        assert_eq!(invoice.gross_pence, 6000 + 1000);
        // 3000 + 1000 after promo, 400 order discount split 300 / 100
        assert_eq!(invoice.lines[0].order_discount_pence, 300);
        assert_eq!(invoice.lines[1].order_discount_pence, 100);
        assert_eq!(invoice.lines[1].vat_pence, 180);
        assert_eq!(invoice.total_pence, 2700 + 900 + 180);
        assert_eq!(invoice.payment_status, PaymentStatus::Unpaid);

        // Promo units still leave the shelf
        let position = fx.balance(&fx.store_a, &fx.promo_item).await;
        assert_eq!(position.qty_on_hand_base, OPENING_STOCK - 12);

        let receivable = fx
            .engine
            .ledger()
            .account_balance(&fx.business_id, accounts::ACCOUNTS_RECEIVABLE)
            .await
            .unwrap();
        assert_eq!(receivable.balance_pence(), invoice.total_pence);
    }

    #[tokio::test]
    async fn test_balance_due_needs_customer() {
        let fx = Fixture::new().await;
        let mut input = sale(&fx, vec![line(&fx.widget, &fx.each_unit, 2)], vec![cash(500)]);
        input.intent = PaymentStatus::PartPaid;

        let err = fx
            .engine
            .sales()
            .create_sale(&fx.cashier_ctx(), input)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_paid_intent_must_be_covered() {
        let fx = Fixture::new().await;
        let mut input = sale(&fx, vec![line(&fx.widget, &fx.each_unit, 2)], vec![cash(500)]);
        input.customer_id = Some(fx.customer_id.clone());

        let err = fx
            .engine
            .sales()
            .create_sale(&fx.cashier_ctx(), input)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_every_line() {
        let fx = Fixture::new().await;
        let entries_before = fx.engine.db().ledger().count_entries(&fx.business_id).await.unwrap();

        let err = fx
            .engine
            .sales()
            .create_sale(
                &fx.cashier_ctx(),
                sale(
                    &fx,
                    vec![
                        line(&fx.widget, &fx.each_unit, 2),
                        line(&fx.vat_item, &fx.each_unit, OPENING_STOCK + 1),
                    ],
                    vec![cash(1_000_000)],
                ),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientStock);

        // The first line's decrement went with the rollback
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK);
        let entries_after = fx.engine.db().ledger().count_entries(&fx.business_id).await.unwrap();
        assert_eq!(entries_after, entries_before);
    }

    #[tokio::test]
    async fn test_same_external_ref_is_one_sale() {
        let fx = Fixture::new().await;
        let mut input = sale(&fx, vec![line(&fx.widget, &fx.each_unit, 2)], vec![cash(2000)]);
        input.external_ref = Some("POS-7:42".into());

        let first = fx
            .engine
            .sales()
            .create_sale(&fx.cashier_ctx(), input.clone())
            .await
            .unwrap();
        let entries_after_first = fx.engine.db().ledger().count_entries(&fx.business_id).await.unwrap();

        let second = fx
            .engine
            .sales()
            .create_sale(&fx.cashier_ctx(), input)
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.invoice.id, second.invoice.id);
        assert_eq!(second.invoice.lines.len(), 1);
        assert_eq!(
            fx.engine
                .db()
                .sales()
                .count_by_external_ref(&fx.business_id, "POS-7:42")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            fx.engine.db().ledger().count_entries(&fx.business_id).await.unwrap(),
            entries_after_first
        );
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK - 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_of_one_external_ref_make_one_sale() {
        let fx = Fixture::file_backed(4).await;
        let mut input = sale(&fx, vec![line(&fx.widget, &fx.each_unit, 3)], vec![cash(3000)]);
        input.external_ref = Some("POS-9:7".into());

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let engine = fx.engine.clone();
            let ctx = fx.cashier_ctx();
            let input = input.clone();
            tasks.spawn(async move { engine.sales().create_sale(&ctx, input).await });
        }

        let mut receipts = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            receipts.push(joined.unwrap().unwrap());
        }

        let invoice_id = receipts[0].invoice.id.clone();
        assert!(receipts.iter().all(|r| r.invoice.id == invoice_id));
        assert_eq!(receipts.iter().filter(|r| !r.replayed).count(), 1);
        assert_eq!(
            fx.engine
                .db()
                .sales()
                .count_by_external_ref(&fx.business_id, "POS-9:7")
                .await
                .unwrap(),
            1
        );
        assert_eq!(fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base, OPENING_STOCK - 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_sales_never_oversell() {
        let fx = Fixture::file_backed(4).await;
        // 100 on hand, four sales of 40: at most two can succeed
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let engine = fx.engine.clone();
            let ctx = fx.cashier_ctx();
            let input = fx.cash_sale_input(&fx.widget, 40, 40_000);
            tasks.spawn(async move { engine.sales().create_sale(&ctx, input).await });
        }

        let mut sold = 0;
        let mut refused = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(_) => sold += 1,
                Err(err) => {
                    assert_eq!(err.code(), ErrorCode::InsufficientStock);
                    refused += 1;
                }
            }
        }

        assert_eq!((sold, refused), (2, 2));
        let position = fx.balance(&fx.store_a, &fx.widget).await;
        assert_eq!(position.qty_on_hand_base, OPENING_STOCK - 80);
        assert_eq!(position.avg_cost_base_pence, OPENING_AVG_COST);
    }

    #[tokio::test]
    async fn test_cash_sale_feeds_open_shift() {
        let fx = Fixture::new().await;
        let shift = fx.open_shift(1000).await;
        fx.cash_sale(&fx.widget, 2, 5000).await;

        let summary = fx
            .engine
            .shifts()
            .shift_summary(&fx.business_id, &shift.id)
            .await
            .unwrap();
        assert_eq!(summary.shift.expected_cash_pence, 3000);
        let sale_entry = summary
            .entries
            .iter()
            .find(|e| e.entry_type == CashDrawerEntryType::CashSale)
            .unwrap();
        assert_eq!(sale_entry.amount_pence, 2000);
    }

    #[tokio::test]
    async fn test_payment_settles_invoice() {
        let fx = Fixture::new().await;
        let mut input = sale(&fx, vec![line(&fx.widget, &fx.each_unit, 3)], vec![cash(1000)]);
        input.intent = PaymentStatus::PartPaid;
        input.customer_id = Some(fx.customer_id.clone());
        let invoice = fx
            .engine
            .sales()
            .create_sale(&fx.cashier_ctx(), input)
            .await
            .unwrap()
            .invoice;
        assert_eq!(invoice.payment_status, PaymentStatus::PartPaid);

        let updated = fx
            .engine
            .sales()
            .record_payment(
                &fx.cashier_ctx(),
                RecordPaymentInput {
                    invoice_id: invoice.id.clone(),
                    method: PaymentMethod::MobileMoney,
                    amount_pence: 2000,
                    shift_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.payment_status, PaymentStatus::Paid);
        assert_eq!(updated.paid_pence, 3000);
        assert_eq!(updated.payments.len(), 2);

        let receivable = fx
            .engine
            .ledger()
            .account_balance(&fx.business_id, accounts::ACCOUNTS_RECEIVABLE)
            .await
            .unwrap();
        assert_eq!(receivable.balance_pence(), 0);

        let err = fx
            .engine
            .sales()
            .record_payment(
                &fx.cashier_ctx(),
                RecordPaymentInput {
                    invoice_id: invoice.id,
                    method: PaymentMethod::Cash,
                    amount_pence: 100,
                    shift_id: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStatus);
    }

    #[tokio::test]
    async fn test_void_restores_stock_ledger_and_drawer() {
        let fx = Fixture::new().await;
        let shift = fx.open_shift(1000).await;
        let receipt = fx.cash_sale(&fx.widget, 4, 4000).await;

        let voided = fx
            .engine
            .sales()
            .void_sale(&fx.manager_ctx(), &receipt.invoice.id, "Customer changed mind")
            .await
            .unwrap();
        assert_eq!(voided.payment_status, PaymentStatus::Void);

        let position = fx.balance(&fx.store_a, &fx.widget).await;
        assert_eq!(position.qty_on_hand_base, OPENING_STOCK);
        assert_eq!(position.avg_cost_base_pence, OPENING_AVG_COST);

        let revenue = fx
            .engine
            .ledger()
            .account_balance(&fx.business_id, accounts::SALES_REVENUE)
            .await
            .unwrap();
        assert_eq!(revenue.balance_pence(), 0);

        let summary = fx
            .engine
            .shifts()
            .shift_summary(&fx.business_id, &shift.id)
            .await
            .unwrap();
        assert_eq!(summary.shift.expected_cash_pence, 1000);
        assert_eq!(summary.totals.invoice_count, 0);

        let err = fx
            .engine
            .sales()
            .void_sale(&fx.manager_ctx(), &receipt.invoice.id, "again")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStatus);
    }

    #[tokio::test]
    async fn test_cashier_cannot_void() {
        let mut fx = Fixture::new().await;
        let receipt = fx.cash_sale(&fx.widget, 1, 1000).await;

        let err = fx
            .engine
            .sales()
            .void_sale(&fx.cashier_ctx(), &receipt.invoice.id, "oops")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let event = fx.next_audit_event("sale.void").await;
        assert_eq!(event.outcome, till_db::AuditOutcome::Denied);
    }

    #[tokio::test]
    async fn test_committed_sales_never_leave_negative_stock() {
        let fx = Fixture::new().await;
        for qty in [40, 40, 40] {
            let _ = fx
                .engine
                .sales()
                .create_sale(
                    &fx.cashier_ctx(),
                    sale(&fx, vec![line(&fx.widget, &fx.each_unit, qty)], vec![cash(qty * 1000)]),
                )
                .await;
        }

        // The third sale finds 20 left and fails whole
        let qty = fx.balance(&fx.store_a, &fx.widget).await.qty_on_hand_base;
        assert_eq!(qty, OPENING_STOCK - 80);
    }
}
