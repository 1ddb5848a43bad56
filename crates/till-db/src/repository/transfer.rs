//! # Transfer Repository
//!
//! Stock transfers between stores of one business. Status transitions are
//! guarded on `status = 'PENDING'` so an approve racing a cancel has exactly
//! one winner.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::{StockTransfer, StockTransferLine};

#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

impl TransferRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransferRepository { pool }
    }

    pub async fn insert_transfer(
        conn: &mut SqliteConnection,
        transfer: &StockTransfer,
    ) -> DbResult<()> {
        debug!(
            id = %transfer.id,
            from = %transfer.from_store_id,
            to = %transfer.to_store_id,
            lines = transfer.lines.len(),
            "Inserting stock transfer"
        );

        sqlx::query(
            r#"
            INSERT INTO stock_transfers (
                id, business_id, from_store_id, to_store_id, status,
                requested_by, approved_by, note, created_at, completed_at, cancelled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&transfer.id)
        .bind(&transfer.business_id)
        .bind(&transfer.from_store_id)
        .bind(&transfer.to_store_id)
        .bind(transfer.status)
        .bind(&transfer.requested_by)
        .bind(&transfer.approved_by)
        .bind(&transfer.note)
        .bind(transfer.created_at)
        .bind(transfer.completed_at)
        .bind(transfer.cancelled_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_line(conn: &mut SqliteConnection, line: &StockTransferLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_transfer_lines (
                id, transfer_id, line_no, product_id, unit_id, qty_in_unit, qty_base,
                unit_cost_base_pence
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&line.id)
        .bind(&line.transfer_id)
        .bind(line.line_no)
        .bind(&line.product_id)
        .bind(&line.unit_id)
        .bind(line.qty_in_unit)
        .bind(line.qty_base)
        .bind(line.unit_cost_base_pence)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Transfer with its lines, scoped to the business.
    pub async fn find_transfer(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<StockTransfer>> {
        let transfer = sqlx::query_as::<_, StockTransfer>(
            r#"
            SELECT id, business_id, from_store_id, to_store_id, status,
                   requested_by, approved_by, note, created_at, completed_at, cancelled_at
            FROM stock_transfers
            WHERE id = ?1 AND business_id = ?2
            "#,
        )
        .bind(id)
        .bind(business_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(mut transfer) = transfer else {
            return Ok(None);
        };

        transfer.lines = sqlx::query_as::<_, StockTransferLine>(
            r#"
            SELECT id, transfer_id, line_no, product_id, unit_id, qty_in_unit, qty_base,
                   unit_cost_base_pence
            FROM stock_transfer_lines
            WHERE transfer_id = ?1
            ORDER BY line_no
            "#,
        )
        .bind(&transfer.id)
        .fetch_all(conn)
        .await?;

        Ok(Some(transfer))
    }

    pub async fn get_transfer(&self, business_id: &str, id: &str) -> DbResult<Option<StockTransfer>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_transfer(&mut conn, business_id, id).await
    }

    /// Records the source cost a line moved at.
    pub async fn set_line_cost(
        conn: &mut SqliteConnection,
        line_id: &str,
        unit_cost_base_pence: i64,
    ) -> DbResult<()> {
        sqlx::query("UPDATE stock_transfer_lines SET unit_cost_base_pence = ?2 WHERE id = ?1")
            .bind(line_id)
            .bind(unit_cost_base_pence)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// PENDING → COMPLETED. Returns `false` if the transfer already left PENDING.
    pub async fn mark_completed(
        conn: &mut SqliteConnection,
        id: &str,
        approved_by: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stock_transfers SET status = 'COMPLETED', approved_by = ?2, completed_at = ?3
            WHERE id = ?1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(approved_by)
        .bind(at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// PENDING → CANCELLED. Returns `false` if the transfer already left PENDING.
    pub async fn mark_cancelled(
        conn: &mut SqliteConnection,
        id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stock_transfers SET status = 'CANCELLED', cancelled_at = ?2
            WHERE id = ?1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::catalog::CatalogRepository;
    use crate::repository::tenancy::TenancyRepository;
    use crate::repository::test_support::{seeded_db, BUSINESS, STORE, USER};
    use till_core::{Product, ProductUnit, Store, TransferStatus};

    async fn seed(conn: &mut SqliteConnection) {
        let now = Utc::now();
        TenancyRepository::insert_store(
            conn,
            &Store {
                id: "store-2".into(),
                business_id: BUSINESS.into(),
                name: "Market".into(),
                is_active: true,
                created_at: now,
            },
        )
        .await
        .unwrap();
        CatalogRepository::insert_unit(conn, "ea", BUSINESS, "each").await.unwrap();
        CatalogRepository::insert_product(
            conn,
            &Product {
                id: "prod-1".into(),
                business_id: BUSINESS.into(),
                sku: "RICE".into(),
                name: "Rice".into(),
                unit_price_base_pence: 250,
                vat_rate_bps: 0,
                promo_buy_qty: None,
                promo_get_qty: None,
                is_active: true,
                created_at: now,
            },
        )
        .await
        .unwrap();
        CatalogRepository::insert_product_unit(
            conn,
            &ProductUnit {
                id: "pu-1".into(),
                product_id: "prod-1".into(),
                unit_id: "ea".into(),
                unit_name: String::new(),
                conversion_to_base: 1,
                is_base_unit: true,
            },
        )
        .await
        .unwrap();
    }

    fn transfer(to: &str) -> StockTransfer {
        StockTransfer {
            id: "tr-1".into(),
            business_id: BUSINESS.into(),
            from_store_id: STORE.into(),
            to_store_id: to.into(),
            status: TransferStatus::Pending,
            requested_by: USER.into(),
            approved_by: None,
            note: None,
            created_at: Utc::now(),
            completed_at: None,
            cancelled_at: None,
            lines: vec![],
        }
    }

    #[tokio::test]
    async fn test_transfer_lifecycle_guards() {
        let db = seeded_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        seed(&mut conn).await;

        TransferRepository::insert_transfer(&mut conn, &transfer("store-2"))
            .await
            .unwrap();
        TransferRepository::insert_line(
            &mut conn,
            &StockTransferLine {
                id: "trl-1".into(),
                transfer_id: "tr-1".into(),
                line_no: 1,
                product_id: "prod-1".into(),
                unit_id: "ea".into(),
                qty_in_unit: 4,
                qty_base: 4,
                unit_cost_base_pence: None,
            },
        )
        .await
        .unwrap();

        TransferRepository::set_line_cost(&mut conn, "trl-1", 120).await.unwrap();
        assert!(TransferRepository::mark_completed(&mut conn, "tr-1", USER, Utc::now())
            .await
            .unwrap());
        assert!(!TransferRepository::mark_cancelled(&mut conn, "tr-1", Utc::now())
            .await
            .unwrap());

        let loaded = TransferRepository::find_transfer(&mut conn, BUSINESS, "tr-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, TransferStatus::Completed);
        assert_eq!(loaded.lines.len(), 1);
        assert_eq!(loaded.lines[0].unit_cost_base_pence, Some(120));
    }

    #[tokio::test]
    async fn test_same_store_transfer_rejected_by_schema() {
        let db = seeded_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        seed(&mut conn).await;

        let err = TransferRepository::insert_transfer(&mut conn, &transfer(STORE))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::DbError::ConstraintViolation(_)));
    }
}
