//! # Ledger Rules
//!
//! The chart of accounts and the one invariant every financial mutation must
//! satisfy: a journal entry's debits equal its credits.
//!
//! ## Posting Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  JournalDraft (account CODES)                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate_lines()   ← THIS MODULE: shape + balance                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  till-engine resolves codes → account ids inside the caller's tx        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  JournalEntry + JournalLine rows (all-or-nothing)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};

// =============================================================================
// Chart of Accounts
// =============================================================================

/// Standard account codes seeded for every business.
pub mod accounts {
    pub const CASH: &str = "1000";
    pub const CARD_CLEARING: &str = "1010";
    pub const BANK: &str = "1020";
    pub const MOBILE_MONEY: &str = "1030";
    pub const ACCOUNTS_RECEIVABLE: &str = "1100";
    pub const INVENTORY: &str = "1200";
    pub const ACCOUNTS_PAYABLE: &str = "2000";
    pub const VAT_PAYABLE: &str = "2100";
    pub const OWNER_EQUITY: &str = "3000";
    pub const SALES_REVENUE: &str = "4000";
    /// Contra-income: debited with every discount granted.
    pub const SALES_DISCOUNTS: &str = "4900";
    pub const COST_OF_GOODS_SOLD: &str = "5000";
    pub const INVENTORY_SHRINKAGE: &str = "5100";
    pub const GENERAL_EXPENSE: &str = "6000";
    pub const CASH_OVER_SHORT: &str = "6100";
}

/// `(code, name, type)` for the standard chart.
pub const STANDARD_CHART: &[(&str, &str, AccountType)] = &[
    (accounts::CASH, "Cash", AccountType::Asset),
    (accounts::CARD_CLEARING, "Card Clearing", AccountType::Asset),
    (accounts::BANK, "Bank", AccountType::Asset),
    (accounts::MOBILE_MONEY, "Mobile Money", AccountType::Asset),
    (accounts::ACCOUNTS_RECEIVABLE, "Accounts Receivable", AccountType::Asset),
    (accounts::INVENTORY, "Inventory", AccountType::Asset),
    (accounts::ACCOUNTS_PAYABLE, "Accounts Payable", AccountType::Liability),
    (accounts::VAT_PAYABLE, "VAT Payable", AccountType::Liability),
    (accounts::OWNER_EQUITY, "Owner Equity", AccountType::Equity),
    (accounts::SALES_REVENUE, "Sales Revenue", AccountType::Income),
    (accounts::SALES_DISCOUNTS, "Sales Discounts", AccountType::Income),
    (accounts::COST_OF_GOODS_SOLD, "Cost of Goods Sold", AccountType::Expense),
    (accounts::INVENTORY_SHRINKAGE, "Inventory Shrinkage", AccountType::Expense),
    (accounts::GENERAL_EXPENSE, "General Expense", AccountType::Expense),
    (accounts::CASH_OVER_SHORT, "Cash Over/Short", AccountType::Expense),
];

// =============================================================================
// Account
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    /// Assets and expenses grow with debits; the rest grow with credits.
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

/// Chart-of-accounts entry. Immutable once referenced by a posted line.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Account {
    pub id: String,
    pub business_id: String,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Journal Entry
// =============================================================================

/// One business event's financial effect.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct JournalEntry {
    pub id: String,
    pub business_id: String,
    pub description: String,
    pub reference_type: String,
    pub reference_id: String,
    #[ts(as = "String")]
    pub entry_date: NaiveDate,
    pub created_by: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    pub fn total_debits(&self) -> i64 {
        self.lines.iter().map(|l| l.debit_pence).sum()
    }

    pub fn total_credits(&self) -> i64 {
        self.lines.iter().map(|l| l.credit_pence).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct JournalLine {
    pub id: String,
    pub journal_entry_id: String,
    pub line_no: i64,
    pub account_id: String,
    pub account_code: String,
    pub debit_pence: i64,
    pub credit_pence: i64,
    pub memo: Option<String>,
}

/// Per-account totals for balance queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AccountBalance {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub debit_pence: i64,
    pub credit_pence: i64,
}

impl AccountBalance {
    /// Balance on the account's normal side.
    pub fn balance_pence(&self) -> i64 {
        if self.account_type.is_debit_normal() {
            self.debit_pence - self.credit_pence
        } else {
            self.credit_pence - self.debit_pence
        }
    }
}

// =============================================================================
// Drafts
// =============================================================================

/// A line addressed by account code, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PostingLine {
    pub account_code: String,
    #[serde(default)]
    pub debit_pence: i64,
    #[serde(default)]
    pub credit_pence: i64,
    #[serde(default)]
    pub memo: Option<String>,
}

impl PostingLine {
    pub fn debit(code: impl Into<String>, pence: i64) -> Self {
        PostingLine {
            account_code: code.into(),
            debit_pence: pence,
            credit_pence: 0,
            memo: None,
        }
    }

    pub fn credit(code: impl Into<String>, pence: i64) -> Self {
        PostingLine {
            account_code: code.into(),
            debit_pence: 0,
            credit_pence: pence,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// The same line on the opposite side.
    pub fn reversed(&self) -> Self {
        PostingLine {
            account_code: self.account_code.clone(),
            debit_pence: self.credit_pence,
            credit_pence: self.debit_pence,
            memo: self.memo.clone(),
        }
    }
}

/// Everything the poster needs except the business and actor.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct JournalDraft {
    pub description: String,
    pub reference_type: String,
    pub reference_id: String,
    #[ts(as = "String")]
    pub entry_date: NaiveDate,
    pub lines: Vec<PostingLine>,
}

impl JournalDraft {
    pub fn new(
        description: impl Into<String>,
        reference_type: impl Into<String>,
        reference_id: impl Into<String>,
        entry_date: NaiveDate,
    ) -> Self {
        JournalDraft {
            description: description.into(),
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
            entry_date,
            lines: Vec::new(),
        }
    }

    /// Adds a debit line, skipping zero amounts.
    pub fn debit(mut self, code: &str, pence: i64) -> Self {
        if pence != 0 {
            self.lines.push(PostingLine::debit(code, pence));
        }
        self
    }

    /// Adds a credit line, skipping zero amounts.
    pub fn credit(mut self, code: &str, pence: i64) -> Self {
        if pence != 0 {
            self.lines.push(PostingLine::credit(code, pence));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// =============================================================================
// Balance Rule
// =============================================================================

/// Checks line shape and the balance invariant. Returns the entry total.
///
/// ## Rules
/// - At least one line
/// - Each line has an account code
/// - No negative amounts
/// - Exactly one side of each line is non-zero
/// - Σ debits == Σ credits, else [`CoreError::UnbalancedEntry`]
pub fn validate_lines(lines: &[PostingLine]) -> CoreResult<i64> {
    if lines.is_empty() {
        return Err(ValidationError::required("journal lines").into());
    }

    let mut debits: i64 = 0;
    let mut credits: i64 = 0;

    for (idx, line) in lines.iter().enumerate() {
        let field = format!("lines[{}]", idx);
        if line.account_code.trim().is_empty() {
            return Err(ValidationError::required(format!("{}.account_code", field)).into());
        }
        if line.debit_pence < 0 || line.credit_pence < 0 {
            return Err(ValidationError::MustNotBeNegative { field }.into());
        }
        if (line.debit_pence == 0) == (line.credit_pence == 0) {
            return Err(ValidationError::invalid(
                field,
                "exactly one of debit or credit must be non-zero",
            )
            .into());
        }
        debits += line.debit_pence;
        credits += line.credit_pence;
    }

    if debits != credits {
        return Err(CoreError::UnbalancedEntry { debits, credits });
    }

    Ok(debits)
}

// =============================================================================
// Unit Tests
// =============================================================================
