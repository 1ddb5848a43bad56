//! # Risk Checks
//!
//! Run after an operation has committed. They write alerts; they never block
//! or undo the operation that triggered them, and callers only log their
//! errors.

use chrono::Utc;
use tracing::warn;

use crate::error::EngineResult;
use crate::Engine;
use till_core::shift::{exceeds_alert_threshold, Shift};
use till_core::{new_id, RiskAlert};
use till_db::RiskRepository;

pub const CASH_VARIANCE: &str = "CASH_VARIANCE";

/// Raises a `CASH_VARIANCE` alert when a closed shift's |variance| is above
/// the business threshold.
pub async fn check_cash_variance(
    engine: &Engine,
    shift: &Shift,
    threshold_pence: i64,
) -> EngineResult<Option<RiskAlert>> {
    let variance = shift.variance_pence.unwrap_or(0);
    if !exceeds_alert_threshold(variance, threshold_pence) {
        return Ok(None);
    }

    let alert = RiskAlert {
        id: new_id(),
        business_id: shift.business_id.clone(),
        kind: CASH_VARIANCE.to_string(),
        subject_type: "shift".to_string(),
        subject_id: shift.id.clone(),
        amount_pence: variance,
        threshold_pence,
        message: format!(
            "Till {} closed {} pence {} against a threshold of {}",
            shift.till_id,
            variance.abs(),
            if variance < 0 { "short" } else { "over" },
            threshold_pence
        ),
        created_at: Utc::now(),
    };

    let mut conn = engine.db().pool().acquire().await?;
    RiskRepository::insert_alert(&mut conn, &alert).await?;

    warn!(
        shift_id = %shift.id,
        variance,
        threshold = threshold_pence,
        "Cash variance alert raised"
    );
    Ok(Some(alert))
}
