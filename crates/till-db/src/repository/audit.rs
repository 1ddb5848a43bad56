//! # Audit Repository
//!
//! Append-only audit trail. Rows are written by the engine's background
//! audit worker after the business transaction has committed (or been
//! refused), never inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// How the audited operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    /// Refused by the role policy or a credential check.
    Denied,
    Failed,
}

/// A row of the audit log. `details` is a JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: String,
    pub business_id: String,
    pub actor_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    pub async fn insert(&self, entry: &AuditLogEntry) -> DbResult<()> {
        debug!(
            action = %entry.action,
            resource_id = ?entry.resource_id,
            outcome = ?entry.outcome,
            "Writing audit entry"
        );

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, business_id, actor_id, action, resource_type, resource_id,
                outcome, details, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.business_id)
        .bind(&entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(entry.outcome)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent first.
    pub async fn list_for_business(
        &self,
        business_id: &str,
        limit: i64,
    ) -> DbResult<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT id, business_id, actor_id, action, resource_type, resource_id,
                   outcome, details, created_at
            FROM audit_log
            WHERE business_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(business_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    pub async fn count_by_action(&self, business_id: &str, action: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_log WHERE business_id = ?1 AND action = ?2",
        )
        .bind(business_id)
        .bind(action)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{seeded_db, BUSINESS, USER};

    #[tokio::test]
    async fn test_audit_entries_listed_newest_first() {
        let db = seeded_db().await;
        let repo = db.audit();

        for (id, action, outcome) in [
            ("a-1", "sale.create", AuditOutcome::Success),
            ("a-2", "journal.post", AuditOutcome::Denied),
        ] {
            repo.insert(&AuditLogEntry {
                id: id.into(),
                business_id: BUSINESS.into(),
                actor_id: Some(USER.into()),
                action: action.into(),
                resource_type: "test".into(),
                resource_id: None,
                outcome,
                details: "{}".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let entries = repo.list_for_business(BUSINESS, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "a-2");
        assert_eq!(entries[0].outcome, AuditOutcome::Denied);
        assert_eq!(repo.count_by_action(BUSINESS, "sale.create").await.unwrap(), 1);
    }
}
