//! # Ledger Poster
//!
//! The single path through which money enters the ledger.
//!
//! ## Posting
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  post(conn, business, actor, draft)                                     │
//! │                                                                         │
//! │  1. validate_lines()      shape + Σ debit == Σ credit                  │
//! │                           → Validation / UnbalancedEntry               │
//! │  2. resolve codes         code → account id within the business        │
//! │                           → AccountNotFound                            │
//! │  3. insert entry + lines  in the caller's transaction                  │
//! │                                                                         │
//! │  Nothing is written until 1 and 2 pass, and the caller's rollback      │
//! │  takes the entry with it.                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sales, voids, payments, stock receipts, adjustments, expenses and shift
//! variances all post through [`post`].

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::audit::AuditEvent;
use crate::context::{self, OperatorContext};
use crate::error::EngineResult;
use crate::retry::with_retry;
use crate::Engine;
use till_core::ledger::{
    validate_lines, Account, AccountBalance, JournalDraft, JournalEntry, JournalLine, PostingLine,
    STANDARD_CHART,
};
use till_core::{new_id, Capability, CoreError};
use till_db::LedgerRepository;

/// Posts a balanced draft inside the caller's transaction.
pub async fn post(
    conn: &mut SqliteConnection,
    business_id: &str,
    created_by: Option<&str>,
    draft: &JournalDraft,
) -> EngineResult<JournalEntry> {
    let total = validate_lines(&draft.lines)?;

    let mut account_ids: HashMap<&str, String> = HashMap::new();
    for line in &draft.lines {
        let code = line.account_code.as_str();
        if account_ids.contains_key(code) {
            continue;
        }
        let account = LedgerRepository::find_account_by_code(&mut *conn, business_id, code)
            .await?
            .ok_or_else(|| CoreError::AccountNotFound {
                code: code.to_string(),
            })?;
        account_ids.insert(code, account.id);
    }

    let mut entry = JournalEntry {
        id: new_id(),
        business_id: business_id.to_string(),
        description: draft.description.clone(),
        reference_type: draft.reference_type.clone(),
        reference_id: draft.reference_id.clone(),
        entry_date: draft.entry_date,
        created_by: created_by.map(str::to_string),
        created_at: Utc::now(),
        lines: Vec::with_capacity(draft.lines.len()),
    };
    LedgerRepository::insert_entry(&mut *conn, &entry).await?;

    for (idx, line) in draft.lines.iter().enumerate() {
        let account_id = account_ids
            .get(line.account_code.as_str())
            .cloned()
            .ok_or_else(|| CoreError::AccountNotFound {
                code: line.account_code.clone(),
            })?;
        let persisted = JournalLine {
            id: new_id(),
            journal_entry_id: entry.id.clone(),
            line_no: idx as i64 + 1,
            account_id,
            account_code: line.account_code.clone(),
            debit_pence: line.debit_pence,
            credit_pence: line.credit_pence,
            memo: line.memo.clone(),
        };
        LedgerRepository::insert_line(&mut *conn, &persisted).await?;
        entry.lines.push(persisted);
    }

    debug!(
        entry_id = %entry.id,
        reference_type = %entry.reference_type,
        reference_id = %entry.reference_id,
        total,
        "Journal entry posted"
    );
    Ok(entry)
}

/// Posts the draft unless it has no lines. Returns the entry id.
pub async fn post_if_any(
    conn: &mut SqliteConnection,
    business_id: &str,
    created_by: Option<&str>,
    draft: &JournalDraft,
) -> EngineResult<Option<String>> {
    if draft.is_empty() {
        return Ok(None);
    }
    let entry = post(conn, business_id, created_by, draft).await?;
    Ok(Some(entry.id))
}

/// The exact reverse of a posted entry: every line with its sides swapped.
pub fn reversal_draft(
    original: &JournalEntry,
    description: impl Into<String>,
    reference_type: impl Into<String>,
    reference_id: impl Into<String>,
    entry_date: NaiveDate,
) -> JournalDraft {
    let mut draft = JournalDraft::new(description, reference_type, reference_id, entry_date);
    draft.lines = original
        .lines
        .iter()
        .map(|line| {
            PostingLine {
                account_code: line.account_code.clone(),
                debit_pence: line.debit_pence,
                credit_pence: line.credit_pence,
                memo: line.memo.clone(),
            }
            .reversed()
        })
        .collect();
    draft
}

/// Creates the standard chart for a new business.
pub async fn install_standard_chart(
    conn: &mut SqliteConnection,
    business_id: &str,
) -> EngineResult<()> {
    let now = Utc::now();
    for (code, name, account_type) in STANDARD_CHART {
        LedgerRepository::insert_account(
            &mut *conn,
            &Account {
                id: new_id(),
                business_id: business_id.to_string(),
                code: code.to_string(),
                name: name.to_string(),
                account_type: *account_type,
                created_at: now,
            },
        )
        .await?;
    }
    info!(business_id = %business_id, accounts = STANDARD_CHART.len(), "Standard chart installed");
    Ok(())
}

// =============================================================================
// Service
// =============================================================================

/// Manual journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostJournalInput {
    pub description: String,
    pub reference_type: String,
    pub reference_id: String,
    pub entry_date: NaiveDate,
    pub lines: Vec<PostingLine>,
}

pub struct LedgerService<'a> {
    engine: &'a Engine,
}

impl<'a> LedgerService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        LedgerService { engine }
    }

    /// Posts a manual entry in its own transaction. OWNER only.
    pub async fn post_journal_entry(
        &self,
        ctx: &OperatorContext,
        input: PostJournalInput,
    ) -> EngineResult<JournalEntry> {
        let result = with_retry(&self.engine.retry_policy(), || self.post_once(ctx, &input)).await;

        match &result {
            Ok(entry) => {
                info!(entry_id = %entry.id, "Manual journal entry posted");
                self.engine.audit().emit(
                    AuditEvent::success(
                        &ctx.business_id,
                        &ctx.user_id,
                        "journal.post",
                        "journal_entry",
                        &entry.id,
                    )
                    .with_details(serde_json::json!({
                        "reference_type": entry.reference_type,
                        "reference_id": entry.reference_id,
                        "total_pence": entry.total_debits(),
                    })),
                );
            }
            Err(err) => {
                self.engine
                    .audit_refusal(ctx, "journal.post", "journal_entry", None, err)
            }
        }
        result
    }

    async fn post_once(
        &self,
        ctx: &OperatorContext,
        input: &PostJournalInput,
    ) -> EngineResult<JournalEntry> {
        let mut tx = self.engine.db().begin().await?;
        context::require(&mut tx, ctx, Capability::PostJournal).await?;

        let draft = JournalDraft {
            description: input.description.clone(),
            reference_type: input.reference_type.clone(),
            reference_id: input.reference_id.clone(),
            entry_date: input.entry_date,
            lines: input.lines.clone(),
        };
        let entry = post(&mut tx, &ctx.business_id, Some(&ctx.user_id), &draft).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn get_entry(&self, business_id: &str, id: &str) -> EngineResult<JournalEntry> {
        self.engine
            .db()
            .ledger()
            .get_entry(business_id, id)
            .await?
            .ok_or_else(|| CoreError::not_found("JournalEntry", id).into())
    }

    pub async fn entries_for_reference(
        &self,
        business_id: &str,
        reference_type: &str,
        reference_id: &str,
    ) -> EngineResult<Vec<JournalEntry>> {
        Ok(self
            .engine
            .db()
            .ledger()
            .entries_for_reference(business_id, reference_type, reference_id)
            .await?)
    }

    pub async fn account_balance(&self, business_id: &str, code: &str) -> EngineResult<AccountBalance> {
        self.engine
            .db()
            .ledger()
            .account_balance(business_id, code)
            .await?
            .ok_or_else(|| {
                CoreError::AccountNotFound {
                    code: code.to_string(),
                }
                .into()
            })
    }

    pub async fn trial_balance(&self, business_id: &str) -> EngineResult<Vec<AccountBalance>> {
        Ok(self.engine.db().ledger().trial_balance(business_id).await?)
    }
}
