//! # Repository Module
//!
//! Database repository implementations for Till POS.
//!
//! ## Two Ways In
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Inside a transaction (writes and the reads they depend on)            │
//! │                                                                         │
//! │    let mut tx = db.begin().await?;                                     │
//! │    InventoryRepository::find_balance(&mut tx, store, product).await?;  │
//! │    LedgerRepository::insert_entry(&mut tx, &entry).await?;             │
//! │    tx.commit().await?;                                                 │
//! │                                                                         │
//! │  Outside a transaction (plain reads)                                   │
//! │                                                                         │
//! │    db.sales().get_invoice(business, id).await?;                        │
//! │                                                                         │
//! │  Associated functions take `&mut SqliteConnection`, so a               │
//! │  `Transaction` or a pooled connection can be passed. The pooled        │
//! │  methods acquire a connection and delegate to them.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`TenancyRepository`] - Businesses, stores, tills, users, customers
//! - [`CatalogRepository`] - Units, products, product units
//! - [`LedgerRepository`] - Accounts, journal entries, balances
//! - [`InventoryRepository`] - Balances (compare-and-swap) and movements
//! - [`SalesRepository`] - Invoices, lines, payments, invoice numbers
//! - [`ShiftRepository`] - Shifts, drawer entries, closures
//! - [`TransferRepository`] - Stock transfers
//! - [`AuditRepository`] - Audit log
//! - [`RiskRepository`] - Risk alerts

pub mod audit;
pub mod catalog;
pub mod inventory;
pub mod ledger;
pub mod risk;
pub mod sales;
pub mod shift;
pub mod tenancy;
pub mod transfer;

pub use audit::{AuditLogEntry, AuditOutcome, AuditRepository};
pub use catalog::CatalogRepository;
pub use inventory::InventoryRepository;
pub use ledger::LedgerRepository;
pub use risk::RiskRepository;
pub use sales::SalesRepository;
pub use shift::ShiftRepository;
pub use tenancy::TenancyRepository;
pub use transfer::TransferRepository;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use sqlx::SqliteConnection;

    use crate::pool::{Database, DbConfig};
    use crate::repository::TenancyRepository;
    use till_core::{Business, Role, Store, User};

    pub const BUSINESS: &str = "biz-1";
    pub const STORE: &str = "store-1";
    pub const USER: &str = "user-1";

    /// In-memory database with one business, one store and one cashier.
    pub async fn seeded_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        seed_tenant(&mut conn).await;
        db
    }

    pub async fn seed_tenant(conn: &mut SqliteConnection) {
        let now = Utc::now();
        TenancyRepository::insert_business(
            conn,
            &Business {
                id: BUSINESS.into(),
                name: "Corner Shop".into(),
                currency: "GBP".into(),
                require_variance_reason: true,
                variance_alert_threshold_pence: 1000,
                created_at: now,
            },
        )
        .await
        .unwrap();
        TenancyRepository::insert_store(
            conn,
            &Store {
                id: STORE.into(),
                business_id: BUSINESS.into(),
                name: "High Street".into(),
                is_active: true,
                created_at: now,
            },
        )
        .await
        .unwrap();
        TenancyRepository::insert_user(
            conn,
            &User {
                id: USER.into(),
                business_id: BUSINESS.into(),
                name: "Casey".into(),
                role: Role::Cashier,
                pin_hash: None,
                password_hash: None,
                is_active: true,
                created_at: now,
            },
        )
        .await
        .unwrap();
    }
}
