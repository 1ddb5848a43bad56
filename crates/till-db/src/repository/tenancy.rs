//! # Tenancy Repository
//!
//! Businesses and the references that hang off them. Every lookup below the
//! business itself is scoped by `business_id`, so a row from another tenant
//! reads as missing.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use till_core::{Business, Customer, Store, Till, User};

/// Stateless: callers pass the transaction (or a pooled connection).
#[derive(Debug, Clone, Copy)]
pub struct TenancyRepository;

impl TenancyRepository {
    // =========================================================================
    // Businesses
    // =========================================================================

    pub async fn insert_business(conn: &mut SqliteConnection, business: &Business) -> DbResult<()> {
        debug!(id = %business.id, name = %business.name, "Inserting business");

        sqlx::query(
            r#"
            INSERT INTO businesses (
                id, name, currency, require_variance_reason,
                variance_alert_threshold_pence, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&business.id)
        .bind(&business.name)
        .bind(&business.currency)
        .bind(business.require_variance_reason)
        .bind(business.variance_alert_threshold_pence)
        .bind(business.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_business(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Business>> {
        let business = sqlx::query_as::<_, Business>(
            r#"
            SELECT id, name, currency, require_variance_reason,
                   variance_alert_threshold_pence, created_at
            FROM businesses
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(business)
    }

    // =========================================================================
    // Stores & Tills
    // =========================================================================

    pub async fn insert_store(conn: &mut SqliteConnection, store: &Store) -> DbResult<()> {
        debug!(id = %store.id, business_id = %store.business_id, "Inserting store");

        sqlx::query(
            r#"
            INSERT INTO stores (id, business_id, name, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&store.id)
        .bind(&store.business_id)
        .bind(&store.name)
        .bind(store.is_active)
        .bind(store.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_store(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<Store>> {
        let store = sqlx::query_as::<_, Store>(
            r#"
            SELECT id, business_id, name, is_active, created_at
            FROM stores
            WHERE id = ?1 AND business_id = ?2
            "#,
        )
        .bind(id)
        .bind(business_id)
        .fetch_optional(conn)
        .await?;

        Ok(store)
    }

    pub async fn insert_till(conn: &mut SqliteConnection, till: &Till) -> DbResult<()> {
        debug!(id = %till.id, store_id = %till.store_id, "Inserting till");

        sqlx::query(
            r#"
            INSERT INTO tills (id, business_id, store_id, name, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&till.id)
        .bind(&till.business_id)
        .bind(&till.store_id)
        .bind(&till.name)
        .bind(till.is_active)
        .bind(till.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_till(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<Till>> {
        let till = sqlx::query_as::<_, Till>(
            r#"
            SELECT id, business_id, store_id, name, is_active, created_at
            FROM tills
            WHERE id = ?1 AND business_id = ?2
            "#,
        )
        .bind(id)
        .bind(business_id)
        .fetch_optional(conn)
        .await?;

        Ok(till)
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn insert_user(conn: &mut SqliteConnection, user: &User) -> DbResult<()> {
        debug!(id = %user.id, role = %user.role, "Inserting user");

        sqlx::query(
            r#"
            INSERT INTO users (
                id, business_id, name, role, pin_hash, password_hash, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&user.id)
        .bind(&user.business_id)
        .bind(&user.name)
        .bind(user.role)
        .bind(&user.pin_hash)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_user(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, business_id, name, role, pin_hash, password_hash, is_active, created_at
            FROM users
            WHERE id = ?1 AND business_id = ?2
            "#,
        )
        .bind(id)
        .bind(business_id)
        .fetch_optional(conn)
        .await?;

        Ok(user)
    }

    /// Active MANAGER and OWNER users that have a PIN set.
    pub async fn list_pin_holders(
        conn: &mut SqliteConnection,
        business_id: &str,
    ) -> DbResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, business_id, name, role, pin_hash, password_hash, is_active, created_at
            FROM users
            WHERE business_id = ?1
              AND role IN ('MANAGER', 'OWNER')
              AND is_active = 1
              AND pin_hash IS NOT NULL
            ORDER BY created_at, id
            "#,
        )
        .bind(business_id)
        .fetch_all(conn)
        .await?;

        Ok(users)
    }

    // =========================================================================
    // Customers
    // =========================================================================

    pub async fn insert_customer(conn: &mut SqliteConnection, customer: &Customer) -> DbResult<()> {
        debug!(id = %customer.id, "Inserting customer");

        sqlx::query(
            r#"
            INSERT INTO customers (id, business_id, name, phone, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.business_id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(customer.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_customer(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT id, business_id, name, phone, created_at
            FROM customers
            WHERE id = ?1 AND business_id = ?2
            "#,
        )
        .bind(id)
        .bind(business_id)
        .fetch_optional(conn)
        .await?;

        Ok(customer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{seeded_db, BUSINESS, STORE, USER};

    #[tokio::test]
    async fn test_lookups_are_tenant_scoped() {
        let db = seeded_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        assert!(TenancyRepository::find_store(&mut conn, BUSINESS, STORE)
            .await
            .unwrap()
            .is_some());
        assert!(TenancyRepository::find_store(&mut conn, "other-biz", STORE)
            .await
            .unwrap()
            .is_none());

        let user = TenancyRepository::find_user(&mut conn, BUSINESS, USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role, till_core::Role::Cashier);
    }

    #[tokio::test]
    async fn test_pin_holders_exclude_cashiers() {
        let db = seeded_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let holders = TenancyRepository::list_pin_holders(&mut conn, BUSINESS)
            .await
            .unwrap();
        assert!(holders.is_empty());
    }
}
