//! # till-db: Database Layer for Till POS
//!
//! SQLite persistence for the transactional core: pool, embedded migrations
//! and repositories. No business rules live here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Till POS Data Flow                               │
//! │                                                                         │
//! │  till-engine service (create_sale, close_shift, ...)                   │
//! │       │  let mut tx = db.begin().await?;                               │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     till-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ LedgerRepo    │    │ 001_tenancy  │  │   │
//! │  │   │ SqlitePool    │◄───│ InventoryRepo │    │ 002_ledger   │  │   │
//! │  │   │ Transactions  │    │ SalesRepo ... │    │ ...          │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database (WAL)                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use till_db::{Database, DbConfig, SalesRepository};
//!
//! let db = Database::new(DbConfig::new("till.db")).await?;
//!
//! let mut tx = db.begin().await?;
//! let invoice = SalesRepository::find_by_external_ref(&mut tx, "biz-1", "OFFLINE_SYNC:abc").await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::{
    AuditLogEntry, AuditOutcome, AuditRepository, CatalogRepository, InventoryRepository,
    LedgerRepository, RiskRepository, SalesRepository, ShiftRepository, TenancyRepository,
    TransferRepository,
};
