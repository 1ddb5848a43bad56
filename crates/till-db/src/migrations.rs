//! # Database Migrations
//!
//! Embedded SQL migrations for Till POS.
//!
//! ## Migration Set
//! ```text
//! migrations/sqlite/
//! ├── 001_tenancy.sql              businesses, stores, tills, users, customers
//! ├── 002_ledger.sql               accounts, journal entries/lines, freeze triggers
//! ├── 003_catalog_inventory.sql    units, products, product units, balances, movements
//! ├── 004_sales.sql                invoices, lines, payments, invoice sequences
//! ├── 005_shifts.sql               shifts, drawer entries, closures, risk alerts
//! ├── 006_transfers.sql            stock transfers and lines
//! └── 007_audit.sql                audit log
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. **NEVER** modify existing migrations - always add new ones

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations.
///
/// Idempotent; each migration runs in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(total_migrations, applied_migrations)`.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;

    Ok((total, applied as usize))
}
