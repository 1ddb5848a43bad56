//! # till-sync: Offline Sync Reconciler for Till POS
//!
//! Terminals keep selling when the network is down and queue each sale
//! under a client-generated id. When they reconnect they submit the queue
//! here, as often as they like: every id is applied at most once.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Sync Path                                │
//! │                                                                         │
//! │  ┌──────────────┐   batch    ┌─────────────────────────────────────┐   │
//! │  │  terminal    │ ─────────► │        till-sync (THIS CRATE)       │   │
//! │  │  queue       │ ◄───────── │  Reconciler                         │   │
//! │  └──────────────┘   report   │   bounded workers, input order kept │   │
//! │                              └──────────────────┬──────────────────┘   │
//! │                                                 │                      │
//! │                              ┌──────────────────▼──────────────────┐   │
//! │                              │ till-engine  create_offline_sale    │   │
//! │                              │ external_ref = "OFFLINE_SYNC:" + id │   │
//! │                              │ unique per business → replay-safe   │   │
//! │                              └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use till_sync::{OfflineSalePayload, Reconciler};
//!
//! let reconciler = Reconciler::new(engine.clone());
//! let report = reconciler.sync_offline_batch(&ctx, payloads).await?;
//! for failed in &report.failed {
//!     println!("{} failed: {} (retry: {})", failed.id, failed.code, failed.retryable);
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod reconciler;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{SyncError, SyncResult};
pub use reconciler::{
    external_ref_for, FailedPayload, OfflineSalePayload, Reconciler, SyncReport, SyncedPayload,
    OFFLINE_SYNC_PREFIX,
};
