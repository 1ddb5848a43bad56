//! # Expenses
//!
//! Petty cash and bank-paid running costs. Dr General Expense / Cr the
//! account the money left from. Cash paid out of a till with an open shift
//! also lowers that shift's expected cash.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::AuditEvent;
use crate::context::{self, OperatorContext};
use crate::error::EngineResult;
use crate::ledger;
use crate::retry::with_retry;
use crate::shifts::{record_drawer_cash, resolve_open_shift};
use crate::Engine;
use till_core::ledger::{accounts, JournalDraft};
use till_core::shift::CashDrawerEntryType;
use till_core::validation::{validate_positive_amount, validate_required};
use till_core::{new_id, Capability, CoreError, PaymentMethod};
use till_db::TenancyRepository;

pub const EXPENSE_REFERENCE: &str = "EXPENSE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseInput {
    pub description: String,
    pub amount_pence: i64,
    pub paid_from: PaymentMethod,
    #[serde(default)]
    pub till_id: Option<String>,
    #[serde(default)]
    pub shift_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub expense_id: String,
    pub journal_entry_id: String,
    /// The shift whose drawer paid, for cash expenses.
    pub shift_id: Option<String>,
}

pub struct ExpenseService<'a> {
    engine: &'a Engine,
}

impl<'a> ExpenseService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        ExpenseService { engine }
    }

    pub async fn record_expense(&self, ctx: &OperatorContext, input: ExpenseInput) -> EngineResult<Expense> {
        validate_required("description", &input.description)?;
        validate_positive_amount("amount_pence", input.amount_pence)?;

        let expense_id = new_id();
        let result = with_retry(&self.engine.retry_policy(), || {
            self.record_once(ctx, &input, &expense_id)
        })
        .await;

        match &result {
            Ok(expense) => {
                info!(
                    expense_id = %expense.expense_id,
                    amount = input.amount_pence,
                    paid_from = ?input.paid_from,
                    "Expense recorded"
                );
                self.engine.audit().emit(
                    AuditEvent::success(
                        &ctx.business_id,
                        &ctx.user_id,
                        "expense.record",
                        "expense",
                        &expense.expense_id,
                    )
                    .with_details(serde_json::json!({
                        "description": input.description,
                        "amount_pence": input.amount_pence,
                        "paid_from": input.paid_from,
                        "shift_id": expense.shift_id,
                    })),
                );
            }
            Err(err) => self
                .engine
                .audit_refusal(ctx, "expense.record", "expense", None, err),
        }
        result
    }

    async fn record_once(
        &self,
        ctx: &OperatorContext,
        input: &ExpenseInput,
        expense_id: &str,
    ) -> EngineResult<Expense> {
        let business_id = ctx.business_id.as_str();
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::RecordExpense).await?;

        if let Some(till_id) = &input.till_id {
            TenancyRepository::find_till(&mut tx, business_id, till_id)
                .await?
                .filter(|t| t.is_active)
                .ok_or_else(|| CoreError::invalid_reference("till", till_id))?;
        }

        let draft = JournalDraft::new(
            input.description.clone(),
            EXPENSE_REFERENCE,
            expense_id,
            Utc::now().date_naive(),
        )
        .debit(accounts::GENERAL_EXPENSE, input.amount_pence)
        .credit(input.paid_from.ledger_account(), input.amount_pence);
        let entry = ledger::post(&mut tx, business_id, Some(&ctx.user_id), &draft).await?;

        let mut shift_id = None;
        if input.paid_from.is_cash() {
            let shift = resolve_open_shift(
                &mut tx,
                business_id,
                input.till_id.as_deref(),
                input.shift_id.as_deref(),
            )
            .await?;
            if let Some(shift) = shift {
                record_drawer_cash(
                    &mut tx,
                    &shift.id,
                    CashDrawerEntryType::CashExpense,
                    input.amount_pence,
                    (EXPENSE_REFERENCE, expense_id),
                    &ctx.user_id,
                )
                .await?;
                shift_id = Some(shift.id);
            }
        }

        tx.commit().await?;
        Ok(Expense {
            expense_id: expense_id.to_string(),
            journal_entry_id: entry.id,
            shift_id,
        })
    }
}
