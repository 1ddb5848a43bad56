//! # Sales Repository
//!
//! Invoices, their frozen lines, payments and the per-business invoice
//! counter.
//!
//! ## Invoice Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. CREATE (one transaction, engine side)                               │
//! │     next_invoice_number() → INV-20260131-000042                         │
//! │     insert_invoice()  ← unique (business, external_ref) decides races   │
//! │     insert_line() × N, insert_payment() × M                             │
//! │                                                                         │
//! │  2. SETTLE (optional)                                                   │
//! │     insert_payment() + update_settlement()                              │
//! │                                                                         │
//! │  3. VOID (terminal)                                                     │
//! │     mark_void()  ← only from a non-terminal status                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::shift::ShiftTotals;
use till_core::{PaymentMethod, PaymentStatus, SalesInvoice, SalesInvoiceLine, SalesPayment};

const INVOICE_COLUMNS: &str = r#"
    id, business_id, store_id, till_id, cashier_id, customer_id, shift_id,
    invoice_number, external_ref, payment_status,
    gross_pence, discount_pence, net_pence, vat_pence, total_pence,
    paid_pence, change_pence, cost_pence, journal_entry_id,
    void_reason, voided_at, created_at
"#;

#[derive(Debug, Clone)]
pub struct SalesRepository {
    pool: SqlitePool,
}

impl SalesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SalesRepository { pool }
    }

    // =========================================================================
    // Numbering
    // =========================================================================

    /// Allocates the next invoice number for a business.
    ///
    /// ## Format
    /// `INV-YYYYMMDD-NNNNNN`, where NNNNNN is a per-business counter that
    /// never resets. Allocated inside the sale transaction, so a rolled-back
    /// sale gives its number back.
    pub async fn next_invoice_number(
        conn: &mut SqliteConnection,
        business_id: &str,
        date: NaiveDate,
    ) -> DbResult<String> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (business_id, last_value) VALUES (?1, 1)
            ON CONFLICT (business_id) DO UPDATE SET last_value = last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(business_id)
        .fetch_one(conn)
        .await?;

        Ok(format!("INV-{}-{:06}", date.format("%Y%m%d"), value))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn insert_invoice(conn: &mut SqliteConnection, invoice: &SalesInvoice) -> DbResult<()> {
        debug!(
            id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            external_ref = ?invoice.external_ref,
            "Inserting invoice"
        );

        sqlx::query(
            r#"
            INSERT INTO sales_invoices (
                id, business_id, store_id, till_id, cashier_id, customer_id, shift_id,
                invoice_number, external_ref, payment_status,
                gross_pence, discount_pence, net_pence, vat_pence, total_pence,
                paid_pence, change_pence, cost_pence, journal_entry_id,
                void_reason, voided_at, created_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19,
                ?20, ?21, ?22
            )
            "#,
        )
        .bind(&invoice.id)
        .bind(&invoice.business_id)
        .bind(&invoice.store_id)
        .bind(&invoice.till_id)
        .bind(&invoice.cashier_id)
        .bind(&invoice.customer_id)
        .bind(&invoice.shift_id)
        .bind(&invoice.invoice_number)
        .bind(&invoice.external_ref)
        .bind(invoice.payment_status)
        .bind(invoice.gross_pence)
        .bind(invoice.discount_pence)
        .bind(invoice.net_pence)
        .bind(invoice.vat_pence)
        .bind(invoice.total_pence)
        .bind(invoice.paid_pence)
        .bind(invoice.change_pence)
        .bind(invoice.cost_pence)
        .bind(&invoice.journal_entry_id)
        .bind(&invoice.void_reason)
        .bind(invoice.voided_at)
        .bind(invoice.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_line(conn: &mut SqliteConnection, line: &SalesInvoiceLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sales_invoice_lines (
                id, invoice_id, line_no, product_id, unit_id,
                qty_in_unit, conversion_to_base, qty_base, unit_price_base_pence, gross_pence,
                promo_free_qty_base, promo_discount_pence,
                line_discount_type, line_discount_value, line_discount_pence,
                order_discount_pence, net_pence, vat_rate_bps, vat_pence,
                unit_cost_base_pence, cost_pence
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, ?12,
                ?13, ?14, ?15,
                ?16, ?17, ?18, ?19,
                ?20, ?21
            )
            "#,
        )
        .bind(&line.id)
        .bind(&line.invoice_id)
        .bind(line.line_no)
        .bind(&line.product_id)
        .bind(&line.unit_id)
        .bind(line.qty_in_unit)
        .bind(line.conversion_to_base)
        .bind(line.qty_base)
        .bind(line.unit_price_base_pence)
        .bind(line.gross_pence)
        .bind(line.promo_free_qty_base)
        .bind(line.promo_discount_pence)
        .bind(line.line_discount_type)
        .bind(line.line_discount_value)
        .bind(line.line_discount_pence)
        .bind(line.order_discount_pence)
        .bind(line.net_pence)
        .bind(line.vat_rate_bps)
        .bind(line.vat_pence)
        .bind(line.unit_cost_base_pence)
        .bind(line.cost_pence)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_payment(conn: &mut SqliteConnection, payment: &SalesPayment) -> DbResult<()> {
        debug!(
            invoice_id = %payment.invoice_id,
            method = ?payment.method,
            amount = payment.amount_pence,
            "Recording payment"
        );

        sqlx::query(
            r#"
            INSERT INTO sales_payments (
                id, invoice_id, method, amount_pence, tendered_pence, change_pence,
                shift_id, recorded_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.invoice_id)
        .bind(payment.method)
        .bind(payment.amount_pence)
        .bind(payment.tendered_pence)
        .bind(payment.change_pence)
        .bind(&payment.shift_id)
        .bind(&payment.recorded_by)
        .bind(payment.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Updates paid amount and status, guarded on the status read earlier.
    ///
    /// Returns `false` if the invoice moved on in between.
    pub async fn update_settlement(
        conn: &mut SqliteConnection,
        invoice_id: &str,
        expected_status: PaymentStatus,
        paid_pence: i64,
        status: PaymentStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sales_invoices SET paid_pence = ?2, payment_status = ?3
            WHERE id = ?1 AND payment_status = ?4
            "#,
        )
        .bind(invoice_id)
        .bind(paid_pence)
        .bind(status)
        .bind(expected_status)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Terminal transition to VOID. Returns `false` if already terminal.
    pub async fn mark_void(
        conn: &mut SqliteConnection,
        invoice_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sales_invoices SET payment_status = 'VOID', void_reason = ?2, voided_at = ?3
            WHERE id = ?1 AND payment_status NOT IN ('VOID', 'RETURNED')
            "#,
        )
        .bind(invoice_id)
        .bind(reason)
        .bind(at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Invoice header only.
    pub async fn find_invoice(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<SalesInvoice>> {
        let sql = format!(
            "SELECT {} FROM sales_invoices WHERE id = ?1 AND business_id = ?2",
            INVOICE_COLUMNS
        );
        let invoice = sqlx::query_as::<_, SalesInvoice>(&sql)
            .bind(id)
            .bind(business_id)
            .fetch_optional(conn)
            .await?;

        Ok(invoice)
    }

    pub async fn find_by_external_ref(
        conn: &mut SqliteConnection,
        business_id: &str,
        external_ref: &str,
    ) -> DbResult<Option<SalesInvoice>> {
        let sql = format!(
            "SELECT {} FROM sales_invoices WHERE business_id = ?1 AND external_ref = ?2",
            INVOICE_COLUMNS
        );
        let invoice = sqlx::query_as::<_, SalesInvoice>(&sql)
            .bind(business_id)
            .bind(external_ref)
            .fetch_optional(conn)
            .await?;

        Ok(invoice)
    }

    /// Invoice with lines and payments.
    pub async fn find_invoice_full(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<SalesInvoice>> {
        let Some(mut invoice) = Self::find_invoice(&mut *conn, business_id, id).await? else {
            return Ok(None);
        };
        invoice.lines = Self::lines_for_invoice(&mut *conn, &invoice.id).await?;
        invoice.payments = Self::payments_for_invoice(conn, &invoice.id).await?;
        Ok(Some(invoice))
    }

    pub async fn get_invoice(&self, business_id: &str, id: &str) -> DbResult<Option<SalesInvoice>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_invoice_full(&mut conn, business_id, id).await
    }

    pub async fn lines_for_invoice(
        conn: &mut SqliteConnection,
        invoice_id: &str,
    ) -> DbResult<Vec<SalesInvoiceLine>> {
        let lines = sqlx::query_as::<_, SalesInvoiceLine>(
            r#"
            SELECT id, invoice_id, line_no, product_id, unit_id,
                   qty_in_unit, conversion_to_base, qty_base, unit_price_base_pence, gross_pence,
                   promo_free_qty_base, promo_discount_pence,
                   line_discount_type, line_discount_value, line_discount_pence,
                   order_discount_pence, net_pence, vat_rate_bps, vat_pence,
                   unit_cost_base_pence, cost_pence
            FROM sales_invoice_lines
            WHERE invoice_id = ?1
            ORDER BY line_no
            "#,
        )
        .bind(invoice_id)
        .fetch_all(conn)
        .await?;

        Ok(lines)
    }

    pub async fn payments_for_invoice(
        conn: &mut SqliteConnection,
        invoice_id: &str,
    ) -> DbResult<Vec<SalesPayment>> {
        let payments = sqlx::query_as::<_, SalesPayment>(
            r#"
            SELECT id, invoice_id, method, amount_pence, tendered_pence, change_pence,
                   shift_id, recorded_by, created_at
            FROM sales_payments
            WHERE invoice_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(conn)
        .await?;

        Ok(payments)
    }

    pub async fn count_by_external_ref(&self, business_id: &str, external_ref: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sales_invoices WHERE business_id = ?1 AND external_ref = ?2",
        )
        .bind(business_id)
        .bind(external_ref)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Applied payment totals taken during a shift, excluding voided invoices.
    pub async fn shift_totals(conn: &mut SqliteConnection, shift_id: &str) -> DbResult<ShiftTotals> {
        let rows: Vec<(PaymentMethod, i64)> = sqlx::query_as(
            r#"
            SELECT p.method, COALESCE(SUM(p.amount_pence), 0)
            FROM sales_payments p
            JOIN sales_invoices i ON i.id = p.invoice_id
            WHERE p.shift_id = ?1 AND i.payment_status <> 'VOID'
            GROUP BY p.method
            "#,
        )
        .bind(shift_id)
        .fetch_all(&mut *conn)
        .await?;

        let invoice_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sales_invoices WHERE shift_id = ?1 AND payment_status <> 'VOID'",
        )
        .bind(shift_id)
        .fetch_one(conn)
        .await?;

        let mut totals = ShiftTotals {
            invoice_count,
            ..ShiftTotals::default()
        };
        for (method, amount) in rows {
            totals.add(method, amount);
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{seeded_db, BUSINESS, STORE, USER};

    fn invoice(id: &str, number: &str, external_ref: Option<&str>) -> SalesInvoice {
        SalesInvoice {
            id: id.into(),
            business_id: BUSINESS.into(),
            store_id: STORE.into(),
            till_id: None,
            cashier_id: USER.into(),
            customer_id: None,
            shift_id: None,
            invoice_number: number.into(),
            external_ref: external_ref.map(str::to_string),
            payment_status: PaymentStatus::Paid,
            gross_pence: 1000,
            discount_pence: 0,
            net_pence: 1000,
            vat_pence: 0,
            total_pence: 1000,
            paid_pence: 1000,
            change_pence: 0,
            cost_pence: 600,
            journal_entry_id: None,
            void_reason: None,
            voided_at: None,
            created_at: Utc::now(),
            lines: vec![],
            payments: vec![],
        }
    }

    #[tokio::test]
    async fn test_invoice_numbers_increase_per_business() {
        let db = seeded_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();

        let first = SalesRepository::next_invoice_number(&mut conn, BUSINESS, date)
            .await
            .unwrap();
        let second = SalesRepository::next_invoice_number(&mut conn, BUSINESS, date)
            .await
            .unwrap();
        assert_eq!(first, "INV-20260131-000001");
        assert_eq!(second, "INV-20260131-000002");
    }

    #[tokio::test]
    async fn test_external_ref_is_unique_per_business() {
        let db = seeded_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        SalesRepository::insert_invoice(&mut conn, &invoice("inv-1", "N-1", Some("OFFLINE_SYNC:a")))
            .await
            .unwrap();
        let err =
            SalesRepository::insert_invoice(&mut conn, &invoice("inv-2", "N-2", Some("OFFLINE_SYNC:a")))
                .await
                .unwrap_err();
        assert!(err.is_unique_on("external_ref"));

        // Invoices without a key never collide
        SalesRepository::insert_invoice(&mut conn, &invoice("inv-3", "N-3", None))
            .await
            .unwrap();
        SalesRepository::insert_invoice(&mut conn, &invoice("inv-4", "N-4", None))
            .await
            .unwrap();

        let found = SalesRepository::find_by_external_ref(&mut conn, BUSINESS, "OFFLINE_SYNC:a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "inv-1");
    }

    #[tokio::test]
    async fn test_void_is_terminal() {
        let db = seeded_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        SalesRepository::insert_invoice(&mut conn, &invoice("inv-1", "N-1", None))
            .await
            .unwrap();

        assert!(SalesRepository::mark_void(&mut conn, "inv-1", "WRONG_ITEM", Utc::now())
            .await
            .unwrap());
        assert!(!SalesRepository::mark_void(&mut conn, "inv-1", "WRONG_ITEM", Utc::now())
            .await
            .unwrap());

        let voided = SalesRepository::find_invoice(&mut conn, BUSINESS, "inv-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(voided.payment_status, PaymentStatus::Void);
        assert_eq!(voided.void_reason.as_deref(), Some("WRONG_ITEM"));
    }
}
