//! # till-core: Pure Business Logic for Till POS
//!
//! Every rule that decides *what* a sale, a stock movement, a journal entry or
//! a shift closure looks like lives here, as pure functions with zero I/O.
//! The database layer and the transactional services only persist what this
//! crate computes.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Till POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │        UI / API collaborators (out of scope, operations only)    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   till-sync (offline batches) ──► till-engine (transactions)    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                ★ till-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐   │   │
//! │  │  │ pricing │ │ costing │ │ ledger  │ │  shift  │ │ policy  │   │   │
//! │  │  │ promo   │ │ WAC     │ │ balance │ │variance │ │ roles   │   │   │
//! │  │  │ VAT     │ │ units   │ │ chart   │ │approval │ │ caps    │   │   │
//! │  │  └─────────┘ └─────────┘ └─────────┘ └─────────┘ └─────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    till-db (SQLite repositories)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money type, half-up rounding, largest-remainder allocation
//! - [`types`] - Domain entities and status enums
//! - [`ledger`] - Chart of accounts and the balanced-entry rule
//! - [`costing`] - Weighted-average cost and unit conversion
//! - [`pricing`] - Sale calculator (promo → line discount → order discount → VAT)
//! - [`shift`] - Shift variance, approval and closure snapshot rules
//! - [`policy`] - Role → capability gate
//! - [`validation`] - Input shape checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use till_core::money::Money;
//! use till_core::types::VatRate;
//!
//! let net = Money::from_pence(1000);
//! let vat = net.calculate_vat(VatRate::from_bps(2000)); // 20%
//! assert_eq!(vat.pence(), 200);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod costing;
pub mod error;
pub mod ledger;
pub mod money;
pub mod policy;
pub mod pricing;
pub mod shift;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use policy::{Capability, Role};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed on a single invoice.
pub const MAX_SALE_LINES: usize = 200;

/// Maximum quantity on a single line, in the entered unit.
///
/// Catches a scanned barcode landing in the quantity field.
pub const MAX_LINE_QUANTITY: i64 = 100_000;

/// Maximum length of an idempotency key.
pub const MAX_EXTERNAL_REF_LEN: usize = 128;

/// Generates a new entity identifier (UUID v4).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
