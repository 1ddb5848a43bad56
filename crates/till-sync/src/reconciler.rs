//! # Offline Sync Reconciler
//!
//! Applies a batch of queued sales, each exactly once.
//!
//! ## Batch Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sync_offline_batch(ctx, payloads)                                      │
//! │                                                                         │
//! │  len > max_batch_size ──► Err(BatchTooLarge), nothing applied           │
//! │                                                                         │
//! │  for each payload (index i):                                            │
//! │     empty id ──► failed[i] VALIDATION_ERROR                             │
//! │     else spawn on JoinSet ──► acquire Semaphore permit                  │
//! │                           ──► create_offline_sale(                      │
//! │                                 external_ref = "OFFLINE_SYNC:" + id)    │
//! │                                                                         │
//! │  join all ──► slot i = Synced | Failed                                  │
//! │  report built in input order                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A replay (same id synced before, or twice in one batch) is a success
//! that points at the original invoice. One payload's failure never touches
//! its siblings: every sale runs in its own transaction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use till_core::ValidationError;
use till_engine::config::SyncSettings;
use till_engine::sales::SaleInput;
use till_engine::{Engine, EngineError, ErrorCode, ErrorKind, OperatorContext};

/// Namespace for idempotency keys of offline sales.
pub const OFFLINE_SYNC_PREFIX: &str = "OFFLINE_SYNC:";

/// Idempotency key for an offline payload id.
pub fn external_ref_for(payload_id: &str) -> String {
    format!("{}{}", OFFLINE_SYNC_PREFIX, payload_id)
}

// =============================================================================
// Payloads & Report
// =============================================================================

/// A sale queued by a terminal while it was offline.
///
/// `sale.external_ref` is ignored; the key is always derived from `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSalePayload {
    /// Client-generated, stable across retries.
    pub id: String,
    pub sale: SaleInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedPayload {
    pub id: String,
    pub invoice_id: String,
    /// True when this id had already been applied.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayload {
    pub id: String,
    pub code: ErrorCode,
    pub message: String,
    /// Resubmitting unchanged may succeed.
    pub retryable: bool,
}

impl FailedPayload {
    fn from_engine(id: String, err: &EngineError) -> Self {
        FailedPayload {
            id,
            code: err.code(),
            message: err.to_string(),
            retryable: err.is_retryable() || err.kind() == ErrorKind::Infrastructure,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: Vec<SyncedPayload>,
    pub failed: Vec<FailedPayload>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Slot {
    Synced(SyncedPayload),
    Failed(FailedPayload),
}

// =============================================================================
// Reconciler
// =============================================================================

#[derive(Debug, Clone)]
pub struct Reconciler {
    engine: Engine,
    settings: SyncSettings,
}

impl Reconciler {
    /// Uses the engine's `[sync]` settings.
    pub fn new(engine: Engine) -> Self {
        let settings = engine.config().sync.clone();
        Reconciler { engine, settings }
    }

    pub fn with_settings(engine: Engine, settings: SyncSettings) -> Self {
        Reconciler { engine, settings }
    }

    pub async fn sync_offline_batch(
        &self,
        ctx: &OperatorContext,
        payloads: Vec<OfflineSalePayload>,
    ) -> SyncResult<SyncReport> {
        if payloads.len() > self.settings.max_batch_size {
            warn!(
                size = payloads.len(),
                max = self.settings.max_batch_size,
                "Rejecting oversized sync batch"
            );
            return Err(SyncError::BatchTooLarge {
                size: payloads.len(),
                max: self.settings.max_batch_size,
            });
        }
        if ctx.business_id.trim().is_empty() || ctx.user_id.trim().is_empty() {
            return Err(SyncError::InvalidRequest(
                "business_id and user_id are required".into(),
            ));
        }

        let total = payloads.len();
        let mut ids: Vec<String> = Vec::with_capacity(total);
        let mut slots: Vec<Option<Slot>> = Vec::with_capacity(total);
        let permits = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();

        for (index, payload) in payloads.into_iter().enumerate() {
            ids.push(payload.id.clone());
            if payload.id.trim().is_empty() {
                let err = EngineError::from(ValidationError::required("id"));
                slots.push(Some(Slot::Failed(FailedPayload::from_engine(payload.id, &err))));
                continue;
            }
            slots.push(None);

            let engine = self.engine.clone();
            let ctx = ctx.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, apply_payload(&engine, &ctx, payload).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, slot)) => slots[index] = Some(slot),
                Err(err) => error!(error = %err, "Sync worker stopped before reporting"),
            }
        }

        let mut report = SyncReport::default();
        for (slot, id) in slots.into_iter().zip(ids) {
            match slot {
                Some(Slot::Synced(synced)) => report.synced.push(synced),
                Some(Slot::Failed(failed)) => report.failed.push(failed),
                None => report.failed.push(FailedPayload {
                    id,
                    code: ErrorCode::Internal,
                    message: "worker stopped before reporting".into(),
                    retryable: true,
                }),
            }
        }

        info!(
            business_id = %ctx.business_id,
            total,
            synced = report.synced.len(),
            failed = report.failed.len(),
            "Offline batch reconciled"
        );
        Ok(report)
    }
}

async fn apply_payload(engine: &Engine, ctx: &OperatorContext, payload: OfflineSalePayload) -> Slot {
    let OfflineSalePayload { id, mut sale } = payload;
    sale.external_ref = Some(external_ref_for(&id));

    match engine.sales().create_offline_sale(ctx, sale).await {
        Ok(receipt) => {
            debug!(
                payload_id = %id,
                invoice_id = %receipt.invoice.id,
                replayed = receipt.replayed,
                "Offline payload applied"
            );
            Slot::Synced(SyncedPayload {
                id,
                invoice_id: receipt.invoice.id,
                replayed: receipt.replayed,
            })
        }
        Err(err) => {
            warn!(payload_id = %id, code = %err.code(), error = %err, "Offline payload failed");
            Slot::Failed(FailedPayload::from_engine(id, &err))
        }
    }
}
