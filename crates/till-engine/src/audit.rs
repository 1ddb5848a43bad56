//! # Audit Events
//!
//! Fire-and-forget audit trail, kept outside the business transaction.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  service (after COMMIT or on a refused operation)                      │
//! │       │ sink.emit(event)      try_send, never awaits, never fails       │
//! │       ▼                                                                 │
//! │  ┌───────────────────────┐                                              │
//! │  │ bounded mpsc channel  │  full / closed → warn! and drop              │
//! │  └──────────┬────────────┘                                              │
//! │             ▼                                                           │
//! │  AuditWorker::run()      INSERT INTO audit_log, errors logged           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use till_db::{AuditLogEntry, AuditOutcome, AuditRepository};

/// Something worth a line in the audit trail.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub business_id: String,
    pub actor_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub details: Value,
}

impl AuditEvent {
    pub fn success(
        business_id: &str,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Self {
        AuditEvent {
            business_id: business_id.to_string(),
            actor_id: Some(actor_id.to_string()),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: Some(resource_id.to_string()),
            outcome: AuditOutcome::Success,
            details: Value::Object(Default::default()),
        }
    }

    pub fn denied(
        business_id: &str,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> Self {
        AuditEvent {
            business_id: business_id.to_string(),
            actor_id: Some(actor_id.to_string()),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            outcome: AuditOutcome::Denied,
            details: Value::Object(Default::default()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Sending half handed to every service. Cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditSink {
    /// Creates a sink and the receiver its worker drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (AuditSink { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        AuditSink { tx: None }
    }

    pub fn emit(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.try_send(event) {
            let event = match &err {
                mpsc::error::TrySendError::Full(e) | mpsc::error::TrySendError::Closed(e) => e,
            };
            warn!(action = %event.action, error = %err, "Dropping audit event");
        }
    }
}

/// Drains the audit channel into `audit_log`.
pub struct AuditWorker {
    repo: AuditRepository,
}

impl AuditWorker {
    pub fn new(repo: AuditRepository) -> Self {
        AuditWorker { repo }
    }

    /// Runs until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<AuditEvent>) {
        debug!("Audit worker started");
        while let Some(event) = rx.recv().await {
            self.write(event).await;
        }
        debug!("Audit worker stopped");
    }

    async fn write(&self, event: AuditEvent) {
        let entry = AuditLogEntry {
            id: till_core::new_id(),
            business_id: event.business_id,
            actor_id: event.actor_id,
            action: event.action,
            resource_type: event.resource_type,
            resource_id: event.resource_id,
            outcome: event.outcome,
            details: event.details.to_string(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.repo.insert(&entry).await {
            error!(action = %entry.action, error = %err, "Failed to write audit entry");
        }
    }
}
