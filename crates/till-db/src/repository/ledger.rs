//! # Ledger Repository
//!
//! Chart of accounts and journal storage. There is deliberately no update
//! or delete path for accounts or lines; triggers in `002_ledger.sql` block
//! them at the database too.
//!
//! ## Balance Queries
//! ```text
//! account_balance(code)   Σ debit, Σ credit over every line of one account
//! trial_balance()         the same for every account of the business,
//!                         ordered by code; Σ debit == Σ credit when the
//!                         ledger is healthy
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::ledger::{Account, AccountBalance, JournalEntry, JournalLine};

#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    pub async fn insert_account(conn: &mut SqliteConnection, account: &Account) -> DbResult<()> {
        debug!(code = %account.code, business_id = %account.business_id, "Inserting account");

        sqlx::query(
            r#"
            INSERT INTO accounts (id, business_id, code, name, account_type, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&account.id)
        .bind(&account.business_id)
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.account_type)
        .bind(account.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_account_by_code(
        conn: &mut SqliteConnection,
        business_id: &str,
        code: &str,
    ) -> DbResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, business_id, code, name, account_type, created_at
            FROM accounts
            WHERE business_id = ?1 AND code = ?2
            "#,
        )
        .bind(business_id)
        .bind(code)
        .fetch_optional(conn)
        .await?;

        Ok(account)
    }

    // =========================================================================
    // Journal
    // =========================================================================

    /// Inserts the entry header. Lines are inserted separately, in the
    /// same transaction.
    pub async fn insert_entry(conn: &mut SqliteConnection, entry: &JournalEntry) -> DbResult<()> {
        debug!(
            id = %entry.id,
            reference_type = %entry.reference_type,
            reference_id = %entry.reference_id,
            "Inserting journal entry"
        );

        sqlx::query(
            r#"
            INSERT INTO journal_entries (
                id, business_id, description, reference_type, reference_id,
                entry_date, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.business_id)
        .bind(&entry.description)
        .bind(&entry.reference_type)
        .bind(&entry.reference_id)
        .bind(entry.entry_date)
        .bind(&entry.created_by)
        .bind(entry.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_line(conn: &mut SqliteConnection, line: &JournalLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO journal_lines (
                id, journal_entry_id, line_no, account_id, debit_pence, credit_pence, memo
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&line.id)
        .bind(&line.journal_entry_id)
        .bind(line.line_no)
        .bind(&line.account_id)
        .bind(line.debit_pence)
        .bind(line.credit_pence)
        .bind(&line.memo)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Loads an entry with its lines.
    pub async fn find_entry(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<JournalEntry>> {
        let entry = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT id, business_id, description, reference_type, reference_id,
                   entry_date, created_by, created_at
            FROM journal_entries
            WHERE id = ?1 AND business_id = ?2
            "#,
        )
        .bind(id)
        .bind(business_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(mut entry) = entry else {
            return Ok(None);
        };
        entry.lines = Self::lines_for_entry(conn, &entry.id).await?;
        Ok(Some(entry))
    }

    pub async fn get_entry(&self, business_id: &str, id: &str) -> DbResult<Option<JournalEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_entry(&mut conn, business_id, id).await
    }

    pub async fn lines_for_entry(
        conn: &mut SqliteConnection,
        journal_entry_id: &str,
    ) -> DbResult<Vec<JournalLine>> {
        let lines = sqlx::query_as::<_, JournalLine>(
            r#"
            SELECT l.id, l.journal_entry_id, l.line_no, l.account_id,
                   a.code AS account_code, l.debit_pence, l.credit_pence, l.memo
            FROM journal_lines l
            JOIN accounts a ON a.id = l.account_id
            WHERE l.journal_entry_id = ?1
            ORDER BY l.line_no
            "#,
        )
        .bind(journal_entry_id)
        .fetch_all(conn)
        .await?;

        Ok(lines)
    }

    /// Entries posted for a business reference, oldest first.
    pub async fn find_for_reference(
        conn: &mut SqliteConnection,
        business_id: &str,
        reference_type: &str,
        reference_id: &str,
    ) -> DbResult<Vec<JournalEntry>> {
        let mut entries = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT id, business_id, description, reference_type, reference_id,
                   entry_date, created_by, created_at
            FROM journal_entries
            WHERE business_id = ?1 AND reference_type = ?2 AND reference_id = ?3
            ORDER BY created_at, id
            "#,
        )
        .bind(business_id)
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&mut *conn)
        .await?;

        for entry in entries.iter_mut() {
            entry.lines = Self::lines_for_entry(&mut *conn, &entry.id).await?;
        }
        Ok(entries)
    }

    pub async fn entries_for_reference(
        &self,
        business_id: &str,
        reference_type: &str,
        reference_id: &str,
    ) -> DbResult<Vec<JournalEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_for_reference(&mut conn, business_id, reference_type, reference_id).await
    }

    pub async fn count_entries(&self, business_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM journal_entries WHERE business_id = ?1")
                .bind(business_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // =========================================================================
    // Balances
    // =========================================================================

    pub async fn account_balance(
        &self,
        business_id: &str,
        code: &str,
    ) -> DbResult<Option<AccountBalance>> {
        let balance = sqlx::query_as::<_, AccountBalance>(
            r#"
            SELECT a.code, a.name, a.account_type,
                   COALESCE(SUM(l.debit_pence), 0) AS debit_pence,
                   COALESCE(SUM(l.credit_pence), 0) AS credit_pence
            FROM accounts a
            LEFT JOIN journal_lines l ON l.account_id = a.id
            WHERE a.business_id = ?1 AND a.code = ?2
            GROUP BY a.id
            "#,
        )
        .bind(business_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    pub async fn trial_balance(&self, business_id: &str) -> DbResult<Vec<AccountBalance>> {
        let balances = sqlx::query_as::<_, AccountBalance>(
            r#"
            SELECT a.code, a.name, a.account_type,
                   COALESCE(SUM(l.debit_pence), 0) AS debit_pence,
                   COALESCE(SUM(l.credit_pence), 0) AS credit_pence
            FROM accounts a
            LEFT JOIN journal_lines l ON l.account_id = a.id
            WHERE a.business_id = ?1
            GROUP BY a.id
            ORDER BY a.code
            "#,
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{seeded_db, BUSINESS};
    use chrono::Utc;
    use till_core::ledger::{accounts, AccountType};

    async fn seed_account(conn: &mut SqliteConnection, id: &str, code: &str, kind: AccountType) {
        LedgerRepository::insert_account(
            conn,
            &Account {
                id: id.into(),
                business_id: BUSINESS.into(),
                code: code.into(),
                name: code.into(),
                account_type: kind,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_entry_round_trip_and_balances() {
        let db = seeded_db().await;
        {
            let mut tx = db.begin().await.unwrap();
            seed_account(&mut tx, "acc-cash", accounts::CASH, AccountType::Asset).await;
            seed_account(&mut tx, "acc-sales", accounts::SALES_REVENUE, AccountType::Income).await;

            let entry = JournalEntry {
                id: "je-1".into(),
                business_id: BUSINESS.into(),
                description: "Cash sale".into(),
                reference_type: "TEST".into(),
                reference_id: "t-1".into(),
                entry_date: Utc::now().date_naive(),
                created_by: None,
                created_at: Utc::now(),
                lines: vec![],
            };
            LedgerRepository::insert_entry(&mut tx, &entry).await.unwrap();
            for (no, (account, debit, credit)) in [("acc-cash", 500, 0), ("acc-sales", 0, 500)]
                .into_iter()
                .enumerate()
            {
                LedgerRepository::insert_line(
                    &mut tx,
                    &JournalLine {
                        id: format!("jl-{}", no),
                        journal_entry_id: "je-1".into(),
                        line_no: no as i64 + 1,
                        account_id: account.into(),
                        account_code: String::new(),
                        debit_pence: debit,
                        credit_pence: credit,
                        memo: None,
                    },
                )
                .await
                .unwrap();
            }
            tx.commit().await.unwrap();
        }

        let repo = db.ledger();
        let entry = repo.get_entry(BUSINESS, "je-1").await.unwrap().unwrap();
        assert_eq!(entry.lines.len(), 2);
        assert_eq!(entry.lines[0].account_code, accounts::CASH);
        assert_eq!(entry.total_debits(), entry.total_credits());

        let cash = repo.account_balance(BUSINESS, accounts::CASH).await.unwrap().unwrap();
        assert_eq!(cash.balance_pence(), 500);
        let sales = repo
            .account_balance(BUSINESS, accounts::SALES_REVENUE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sales.balance_pence(), 500);

        let trial = repo.trial_balance(BUSINESS).await.unwrap();
        let debits: i64 = trial.iter().map(|b| b.debit_pence).sum();
        let credits: i64 = trial.iter().map(|b| b.credit_pence).sum();
        assert_eq!(debits, credits);
    }

    #[tokio::test]
    async fn test_referenced_account_cannot_be_deleted() {
        let db = seeded_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        seed_account(&mut conn, "acc-cash", accounts::CASH, AccountType::Asset).await;
        seed_account(&mut conn, "acc-bank", accounts::BANK, AccountType::Asset).await;

        let entry = JournalEntry {
            id: "je-1".into(),
            business_id: BUSINESS.into(),
            description: "Float".into(),
            reference_type: "TEST".into(),
            reference_id: "t-1".into(),
            entry_date: Utc::now().date_naive(),
            created_by: None,
            created_at: Utc::now(),
            lines: vec![],
        };
        LedgerRepository::insert_entry(&mut conn, &entry).await.unwrap();
        LedgerRepository::insert_line(
            &mut conn,
            &JournalLine {
                id: "jl-1".into(),
                journal_entry_id: "je-1".into(),
                line_no: 1,
                account_id: "acc-cash".into(),
                account_code: String::new(),
                debit_pence: 100,
                credit_pence: 0,
                memo: None,
            },
        )
        .await
        .unwrap();

        let err = sqlx::query("DELETE FROM accounts WHERE id = 'acc-cash'")
            .execute(&mut *conn)
            .await
            .map_err(crate::DbError::from)
            .unwrap_err();
        assert!(matches!(err, crate::DbError::ConstraintViolation(_)));

        // An unused account is not frozen
        sqlx::query("DELETE FROM accounts WHERE id = 'acc-bank'")
            .execute(&mut *conn)
            .await
            .unwrap();
    }
}
