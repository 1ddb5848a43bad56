//! # till-engine: Transactional Services for Till POS
//!
//! Every operation that moves money or stock, each one SQLite transaction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Till POS Data Flow                               │
//! │                                                                         │
//! │  UI / API / till-sync                                                   │
//! │       │  engine.sales().create_sale(&ctx, input)                        │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   till-engine (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │  context::require()  ← one capability check per operation      │   │
//! │  │  retry::with_retry() ← busy / lost balance swap → rerun        │   │
//! │  │                                                                 │   │
//! │  │  ┌─────────┐ ┌───────────┐ ┌────────┐ ┌────────┐ ┌───────────┐ │   │
//! │  │  │ ledger  │ │ inventory │ │ sales  │ │ shifts │ │ transfers │ │   │
//! │  │  └────┬────┘ └─────┬─────┘ └───┬────┘ └───┬────┘ └─────┬─────┘ │   │
//! │  │       └────────────┴───────────┴──────────┴────────────┘       │   │
//! │  │                          one transaction                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │ COMMIT                                                          │
//! │       ├──► AuditSink::emit()   (channel, never fails the caller)        │
//! │       └──► risk checks         (errors logged, never surfaced)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`ledger`] - Ledger Poster, chart of accounts, balances
//! - [`inventory`] - Stock movements at weighted-average cost
//! - [`sales`] - Sale orchestration, payments, voids
//! - [`shifts`] - Shift open/close reconciliation
//! - [`transfers`] - Two-phase stock transfers
//! - [`expenses`] - Cash and bank expenses
//! - [`config`] - `TillConfig` (TOML + env)
//! - [`audit`] - Audit event channel and worker

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod expenses;
pub mod inventory;
pub mod ledger;
pub mod retry;
pub mod risk;
pub mod sales;
pub mod shifts;
pub mod transfers;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testkit;

// =============================================================================
// Re-exports
// =============================================================================

pub use audit::{AuditEvent, AuditSink, AuditWorker};
pub use config::TillConfig;
pub use context::OperatorContext;
pub use error::{EngineError, EngineResult, ErrorCode, ErrorKind};
pub use retry::RetryPolicy;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use till_db::Database;

// =============================================================================
// Engine
// =============================================================================

/// Entry point to every service. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Database,
    audit: AuditSink,
    config: TillConfig,
}

impl Engine {
    /// Opens the database from config and starts the audit worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn open(config: TillConfig) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.database.to_db_config()).await?;

        let audit = if config.audit.enabled {
            let (sink, rx) = AuditSink::channel(config.audit.channel_capacity);
            tokio::spawn(AuditWorker::new(db.audit()).run(rx));
            sink
        } else {
            AuditSink::disabled()
        };

        info!(path = %config.database.path.display(), "Engine ready");
        Ok(Engine::new(db, audit, config))
    }

    /// Builds an engine around an existing database and sink.
    pub fn new(db: Database, audit: AuditSink, config: TillConfig) -> Self {
        Engine { db, audit, config }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &TillConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditSink {
        &self.audit
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry.policy()
    }

    pub fn ledger(&self) -> ledger::LedgerService<'_> {
        ledger::LedgerService::new(self)
    }

    pub fn inventory(&self) -> inventory::InventoryService<'_> {
        inventory::InventoryService::new(self)
    }

    pub fn sales(&self) -> sales::SalesService<'_> {
        sales::SalesService::new(self)
    }

    pub fn shifts(&self) -> shifts::ShiftService<'_> {
        shifts::ShiftService::new(self)
    }

    pub fn transfers(&self) -> transfers::TransferService<'_> {
        transfers::TransferService::new(self)
    }

    pub fn expenses(&self) -> expenses::ExpenseService<'_> {
        expenses::ExpenseService::new(self)
    }

    /// Audits an authorization failure. Other errors are not audited.
    pub(crate) fn audit_refusal(
        &self,
        ctx: &OperatorContext,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        err: &EngineError,
    ) {
        if err.kind() != ErrorKind::Authorization {
            return;
        }
        warn!(
            action = %action,
            user_id = %ctx.user_id,
            code = %err.code(),
            "Operation refused"
        );
        self.audit.emit(
            AuditEvent::denied(&ctx.business_id, &ctx.user_id, action, resource_type, resource_id)
                .with_details(serde_json::json!({
                    "code": err.code(),
                    "message": err.to_string(),
                })),
        );
    }
}

/// Initialises `tracing` for binaries.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=till_engine=trace` - Trace one crate
/// - Default: `info,till=debug,sqlx=warn`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,till=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
