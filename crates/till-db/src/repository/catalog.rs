//! # Catalog Repository
//!
//! Units, products and the packaging units a product is sold in. Catalog
//! management screens are out of scope; these writes exist for seeding and
//! tests, the reads feed sale and transfer resolution.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use till_core::{Product, ProductUnit};

/// Stateless: every query runs on the caller's connection.
#[derive(Debug, Clone, Copy)]
pub struct CatalogRepository;

impl CatalogRepository {
    pub async fn insert_unit(
        conn: &mut SqliteConnection,
        id: &str,
        business_id: &str,
        name: &str,
    ) -> DbResult<()> {
        debug!(id = %id, name = %name, "Inserting unit");

        sqlx::query("INSERT INTO units (id, business_id, name) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(business_id)
            .bind(name)
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn insert_product(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, business_id, sku, name, unit_price_base_pence, vat_rate_bps,
                promo_buy_qty, promo_get_qty, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&product.id)
        .bind(&product.business_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.unit_price_base_pence)
        .bind(product.vat_rate_bps)
        .bind(product.promo_buy_qty)
        .bind(product.promo_get_qty)
        .bind(product.is_active)
        .bind(product.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_product(
        conn: &mut SqliteConnection,
        business_id: &str,
        id: &str,
    ) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, business_id, sku, name, unit_price_base_pence, vat_rate_bps,
                   promo_buy_qty, promo_get_qty, is_active, created_at
            FROM products
            WHERE id = ?1 AND business_id = ?2
            "#,
        )
        .bind(id)
        .bind(business_id)
        .fetch_optional(conn)
        .await?;

        Ok(product)
    }

    pub async fn insert_product_unit(
        conn: &mut SqliteConnection,
        unit: &ProductUnit,
    ) -> DbResult<()> {
        debug!(
            product_id = %unit.product_id,
            unit_id = %unit.unit_id,
            conversion = unit.conversion_to_base,
            "Inserting product unit"
        );

        sqlx::query(
            r#"
            INSERT INTO product_units (id, product_id, unit_id, conversion_to_base, is_base_unit)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&unit.id)
        .bind(&unit.product_id)
        .bind(&unit.unit_id)
        .bind(unit.conversion_to_base)
        .bind(unit.is_base_unit)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// The (product, unit) pairing, if the product is sold in that unit.
    pub async fn find_product_unit(
        conn: &mut SqliteConnection,
        product_id: &str,
        unit_id: &str,
    ) -> DbResult<Option<ProductUnit>> {
        let unit = sqlx::query_as::<_, ProductUnit>(
            r#"
            SELECT pu.id, pu.product_id, pu.unit_id, u.name AS unit_name,
                   pu.conversion_to_base, pu.is_base_unit
            FROM product_units pu
            JOIN units u ON u.id = pu.unit_id
            WHERE pu.product_id = ?1 AND pu.unit_id = ?2
            "#,
        )
        .bind(product_id)
        .bind(unit_id)
        .fetch_optional(conn)
        .await?;

        Ok(unit)
    }
}
