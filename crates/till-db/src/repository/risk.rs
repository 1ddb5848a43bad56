//! # Risk Repository
//!
//! Alerts raised after a committed operation crossed a business threshold.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::RiskAlert;

#[derive(Debug, Clone)]
pub struct RiskRepository {
    pool: SqlitePool,
}

impl RiskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RiskRepository { pool }
    }

    pub async fn insert_alert(conn: &mut SqliteConnection, alert: &RiskAlert) -> DbResult<()> {
        debug!(kind = %alert.kind, subject_id = %alert.subject_id, "Raising risk alert");

        sqlx::query(
            r#"
            INSERT INTO risk_alerts (
                id, business_id, kind, subject_type, subject_id,
                amount_pence, threshold_pence, message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.business_id)
        .bind(&alert.kind)
        .bind(&alert.subject_type)
        .bind(&alert.subject_id)
        .bind(alert.amount_pence)
        .bind(alert.threshold_pence)
        .bind(&alert.message)
        .bind(alert.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn alerts_for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> DbResult<Vec<RiskAlert>> {
        let alerts = sqlx::query_as::<_, RiskAlert>(
            r#"
            SELECT id, business_id, kind, subject_type, subject_id,
                   amount_pence, threshold_pence, message, created_at
            FROM risk_alerts
            WHERE subject_type = ?1 AND subject_id = ?2
            ORDER BY created_at
            "#,
        )
        .bind(subject_type)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(alerts)
    }
}
