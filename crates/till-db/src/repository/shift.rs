//! # Shift Repository
//!
//! Shifts, the cash drawer ledger and immutable closure snapshots.
//!
//! A till has at most one OPEN shift; the partial unique index on
//! `shifts(till_id) WHERE status = 'OPEN'` turns a second open into a
//! [`DbError::UniqueViolation`](crate::DbError::UniqueViolation).
//! `close_shift` only moves a row that is still OPEN, so two concurrent
//! closes resolve to one winner.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::shift::{ApprovalKind, CashDrawerEntry, Shift, ShiftClosure};

const SHIFT_COLUMNS: &str = r#"
    id, business_id, store_id, till_id, cashier_id, status,
    opening_cash_pence, expected_cash_pence, actual_cash_pence, variance_pence,
    variance_reason, approval_kind, approved_by, closed_by, opened_at, closed_at
"#;

/// Final figures written onto a shift row when it closes.
#[derive(Debug, Clone)]
pub struct ShiftCloseUpdate<'a> {
    pub actual_cash_pence: i64,
    pub variance_pence: i64,
    pub variance_reason: Option<&'a str>,
    pub approval_kind: ApprovalKind,
    pub approved_by: &'a str,
    pub closed_by: &'a str,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ShiftRepository {
    pool: SqlitePool,
}

impl ShiftRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ShiftRepository { pool }
    }

    // =========================================================================
    // Shifts
    // =========================================================================

    pub async fn insert_shift(conn: &mut SqliteConnection, shift: &Shift) -> DbResult<()> {
        debug!(id = %shift.id, till_id = %shift.till_id, float = shift.opening_cash_pence, "Opening shift");

        sqlx::query(
            r#"
            INSERT INTO shifts (
                id, business_id, store_id, till_id, cashier_id, status,
                opening_cash_pence, expected_cash_pence, opened_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&shift.id)
        .bind(&shift.business_id)
        .bind(&shift.store_id)
        .bind(&shift.till_id)
        .bind(&shift.cashier_id)
        .bind(shift.status)
        .bind(shift.opening_cash_pence)
        .bind(shift.expected_cash_pence)
        .bind(shift.opened_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_shift(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<Shift>> {
        let sql = format!(
            "SELECT {} FROM shifts WHERE id = ?1 AND business_id = ?2",
            SHIFT_COLUMNS
        );
        let shift = sqlx::query_as::<_, Shift>(&sql)
            .bind(id)
            .bind(business_id)
            .fetch_optional(conn)
            .await?;

        Ok(shift)
    }

    pub async fn find_open_for_till(
        conn: &mut SqliteConnection,
        business_id: &str,
        till_id: &str,
    ) -> DbResult<Option<Shift>> {
        let sql = format!(
            "SELECT {} FROM shifts WHERE till_id = ?1 AND business_id = ?2 AND status = 'OPEN'",
            SHIFT_COLUMNS
        );
        let shift = sqlx::query_as::<_, Shift>(&sql)
            .bind(till_id)
            .bind(business_id)
            .fetch_optional(conn)
            .await?;

        Ok(shift)
    }

    pub async fn get_open_for_till(&self, business_id: &str, till_id: &str) -> DbResult<Option<Shift>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_open_for_till(&mut conn, business_id, till_id).await
    }

    /// Moves the running expected cash of an OPEN shift.
    ///
    /// Returns `false` if the shift is no longer open.
    pub async fn add_expected_cash(
        conn: &mut SqliteConnection,
        shift_id: &str,
        delta_pence: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE shifts SET expected_cash_pence = expected_cash_pence + ?2
            WHERE id = ?1 AND status = 'OPEN'
            "#,
        )
        .bind(shift_id)
        .bind(delta_pence)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// OPEN → CLOSED. Returns `false` if another close got there first.
    pub async fn close_shift(
        conn: &mut SqliteConnection,
        shift_id: &str,
        update: &ShiftCloseUpdate<'_>,
    ) -> DbResult<bool> {
        debug!(
            shift_id = %shift_id,
            variance = update.variance_pence,
            approval = ?update.approval_kind,
            "Closing shift"
        );

        let result = sqlx::query(
            r#"
            UPDATE shifts SET
                status = 'CLOSED',
                actual_cash_pence = ?2,
                variance_pence = ?3,
                variance_reason = ?4,
                approval_kind = ?5,
                approved_by = ?6,
                closed_by = ?7,
                closed_at = ?8
            WHERE id = ?1 AND status = 'OPEN'
            "#,
        )
        .bind(shift_id)
        .bind(update.actual_cash_pence)
        .bind(update.variance_pence)
        .bind(update.variance_reason)
        .bind(update.approval_kind)
        .bind(update.approved_by)
        .bind(update.closed_by)
        .bind(update.closed_at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Cash Drawer
    // =========================================================================

    pub async fn insert_drawer_entry(
        conn: &mut SqliteConnection,
        entry: &CashDrawerEntry,
    ) -> DbResult<()> {
        debug!(
            shift_id = %entry.shift_id,
            entry_type = ?entry.entry_type,
            amount = entry.amount_pence,
            "Cash drawer entry"
        );

        sqlx::query(
            r#"
            INSERT INTO cash_drawer_entries (
                id, shift_id, entry_type, amount_pence, reference_type, reference_id,
                actor_id, reason_code, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.shift_id)
        .bind(entry.entry_type)
        .bind(entry.amount_pence)
        .bind(&entry.reference_type)
        .bind(&entry.reference_id)
        .bind(&entry.actor_id)
        .bind(&entry.reason_code)
        .bind(entry.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn entries_for_shift(
        conn: &mut SqliteConnection,
        shift_id: &str,
    ) -> DbResult<Vec<CashDrawerEntry>> {
        let entries = sqlx::query_as::<_, CashDrawerEntry>(
            r#"
            SELECT id, shift_id, entry_type, amount_pence, reference_type, reference_id,
                   actor_id, reason_code, created_at
            FROM cash_drawer_entries
            WHERE shift_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(shift_id)
        .fetch_all(conn)
        .await?;

        Ok(entries)
    }

    // =========================================================================
    // Closures
    // =========================================================================

    pub async fn insert_closure(conn: &mut SqliteConnection, closure: &ShiftClosure) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO shift_closures (
                id, shift_id, business_id, snapshot_version,
                opening_cash_pence, expected_cash_pence, counted_cash_pence, variance_pence,
                cash_sales_pence, card_sales_pence, transfer_sales_pence, mobile_money_sales_pence,
                invoice_count, approval_kind, approved_by, closed_by,
                reason_code, justification, closed_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7, ?8,
                ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16,
                ?17, ?18, ?19
            )
            "#,
        )
        .bind(&closure.id)
        .bind(&closure.shift_id)
        .bind(&closure.business_id)
        .bind(closure.snapshot_version)
        .bind(closure.opening_cash_pence)
        .bind(closure.expected_cash_pence)
        .bind(closure.counted_cash_pence)
        .bind(closure.variance_pence)
        .bind(closure.cash_sales_pence)
        .bind(closure.card_sales_pence)
        .bind(closure.transfer_sales_pence)
        .bind(closure.mobile_money_sales_pence)
        .bind(closure.invoice_count)
        .bind(closure.approval_kind)
        .bind(&closure.approved_by)
        .bind(&closure.closed_by)
        .bind(&closure.reason_code)
        .bind(&closure.justification)
        .bind(closure.closed_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_closure(&self, shift_id: &str) -> DbResult<Option<ShiftClosure>> {
        let closure = sqlx::query_as::<_, ShiftClosure>(
            r#"
            SELECT id, shift_id, business_id, snapshot_version,
                   opening_cash_pence, expected_cash_pence, counted_cash_pence, variance_pence,
                   cash_sales_pence, card_sales_pence, transfer_sales_pence, mobile_money_sales_pence,
                   invoice_count, approval_kind, approved_by, closed_by,
                   reason_code, justification, closed_at
            FROM shift_closures
            WHERE shift_id = ?1
            "#,
        )
        .bind(shift_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(closure)
    }
}
