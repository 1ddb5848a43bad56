//! # Inventory Repository
//!
//! Per-(store, product) balances and the append-only movement log.
//!
//! ## Compare-and-Swap Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ensure_balance()   INSERT OR IGNORE a zero row                         │
//! │  get_balance()      read qty / avg inside the transaction               │
//! │        │                                                                │
//! │        ▼  till-core computes the new position                           │
//! │  swap_balance()     UPDATE ... WHERE qty = <read qty> AND avg = <read>  │
//! │        │                                                                │
//! │        ├── 1 row  → applied                                             │
//! │        └── 0 rows → someone else moved the row; caller aborts and       │
//! │                     retries the whole transaction                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::{InventoryBalance, InventoryMovement};

#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Creates a zero balance row if the pair has never been stocked.
    pub async fn ensure_balance(
        conn: &mut SqliteConnection,
        store_id: &str,
        product_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO inventory_balances (
                store_id, product_id, qty_on_hand_base, avg_cost_base_pence, updated_at
            ) VALUES (?1, ?2, 0, 0, ?3)
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_balance(
        conn: &mut SqliteConnection,
        store_id: &str,
        product_id: &str,
    ) -> DbResult<Option<InventoryBalance>> {
        let balance = sqlx::query_as::<_, InventoryBalance>(
            r#"
            SELECT store_id, product_id, qty_on_hand_base, avg_cost_base_pence, updated_at
            FROM inventory_balances
            WHERE store_id = ?1 AND product_id = ?2
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .fetch_optional(conn)
        .await?;

        Ok(balance)
    }

    pub async fn get_balance(
        &self,
        store_id: &str,
        product_id: &str,
    ) -> DbResult<Option<InventoryBalance>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_balance(&mut conn, store_id, product_id).await
    }

    /// Writes a new position only if the row still holds `expected`.
    ///
    /// Returns `false` when the row changed since it was read.
    #[allow(clippy::too_many_arguments)]
    pub async fn swap_balance(
        conn: &mut SqliteConnection,
        store_id: &str,
        product_id: &str,
        expected_qty: i64,
        expected_avg: i64,
        new_qty: i64,
        new_avg: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug!(
            store_id = %store_id,
            product_id = %product_id,
            from = expected_qty,
            to = new_qty,
            "Swapping inventory balance"
        );

        let result = sqlx::query(
            r#"
            UPDATE inventory_balances SET
                qty_on_hand_base = ?3,
                avg_cost_base_pence = ?4,
                updated_at = ?5
            WHERE store_id = ?1 AND product_id = ?2
              AND qty_on_hand_base = ?6 AND avg_cost_base_pence = ?7
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .bind(new_qty)
        .bind(new_avg)
        .bind(now)
        .bind(expected_qty)
        .bind(expected_avg)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_movement(
        conn: &mut SqliteConnection,
        movement: &InventoryMovement,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_movements (
                id, business_id, store_id, product_id, delta_base, unit_cost_base_pence,
                qty_after_base, avg_cost_after_pence, reason, reference_type, reference_id,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.business_id)
        .bind(&movement.store_id)
        .bind(&movement.product_id)
        .bind(movement.delta_base)
        .bind(movement.unit_cost_base_pence)
        .bind(movement.qty_after_base)
        .bind(movement.avg_cost_after_pence)
        .bind(movement.reason)
        .bind(&movement.reference_type)
        .bind(&movement.reference_id)
        .bind(movement.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Movements recorded against a business reference (sale, transfer, ...).
    pub async fn movements_for_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> DbResult<Vec<InventoryMovement>> {
        let movements = sqlx::query_as::<_, InventoryMovement>(
            r#"
            SELECT id, business_id, store_id, product_id, delta_base, unit_cost_base_pence,
                   qty_after_base, avg_cost_after_pence, reason, reference_type, reference_id,
                   created_at
            FROM inventory_movements
            WHERE reference_type = ?1 AND reference_id = ?2
            ORDER BY created_at, id
            "#,
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    pub async fn count_movements(&self, store_id: &str, product_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM inventory_movements WHERE store_id = ?1 AND product_id = ?2",
        )
        .bind(store_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::catalog::CatalogRepository;
    use crate::repository::test_support::{seeded_db, BUSINESS, STORE};
    use till_core::Product;

    async fn seed_product(conn: &mut SqliteConnection) {
        CatalogRepository::insert_product(
            conn,
            &Product {
                id: "prod-1".into(),
                business_id: BUSINESS.into(),
                sku: "TEA".into(),
                name: "Tea".into(),
                unit_price_base_pence: 300,
                vat_rate_bps: 0,
                promo_buy_qty: None,
                promo_get_qty: None,
                is_active: true,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_swap_requires_expected_position() {
        let db = seeded_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        seed_product(&mut conn).await;

        let now = Utc::now();
        InventoryRepository::ensure_balance(&mut conn, STORE, "prod-1", now)
            .await
            .unwrap();
        // Idempotent
        InventoryRepository::ensure_balance(&mut conn, STORE, "prod-1", now)
            .await
            .unwrap();

        let swapped =
            InventoryRepository::swap_balance(&mut conn, STORE, "prod-1", 0, 0, 10, 120, now)
                .await
                .unwrap();
        assert!(swapped);

        // Stale read: row now holds 10, not 0
        let stale =
            InventoryRepository::swap_balance(&mut conn, STORE, "prod-1", 0, 0, 5, 120, now)
                .await
                .unwrap();
        assert!(!stale);

        let balance = InventoryRepository::find_balance(&mut conn, STORE, "prod-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(balance.qty_on_hand_base, 10);
        assert_eq!(balance.avg_cost_base_pence, 120);
    }
}
