//! # Operator Context
//!
//! Who is acting, for which business. Every service call takes one; nothing
//! in the engine falls back to a default tenant.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::error::EngineResult;
use till_core::policy::authorize;
use till_core::{Capability, CoreError, User};
use till_db::TenancyRepository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorContext {
    pub business_id: String,
    pub user_id: String,
}

impl OperatorContext {
    pub fn new(business_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        OperatorContext {
            business_id: business_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Loads the operator and checks the capability.
///
/// A missing, foreign or inactive user is `Forbidden`, the same as a role
/// that lacks the capability.
pub async fn require(
    conn: &mut SqliteConnection,
    ctx: &OperatorContext,
    capability: Capability,
) -> EngineResult<User> {
    let user = TenancyRepository::find_user(conn, &ctx.business_id, &ctx.user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| CoreError::Forbidden {
            role: "UNKNOWN".to_string(),
            capability: capability.to_string(),
        })?;

    authorize(user.role, capability)?;
    Ok(user)
}
