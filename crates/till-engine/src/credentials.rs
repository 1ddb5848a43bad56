//! # Credentials
//!
//! Argon2 hashing for manager PINs and owner passwords, and the lookups that
//! turn a PIN into the supervisor it belongs to.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use till_core::{Role, User};
use till_db::TenancyRepository;

/// Hashes a PIN or password into a PHC string.
pub fn hash_secret(secret: &str) -> EngineResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| EngineError::Credential(e.to_string()))
}

/// True when `secret` matches the stored hash. A malformed hash never matches.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// The active MANAGER or OWNER of the business whose PIN matches.
pub async fn resolve_supervisor_pin(
    conn: &mut SqliteConnection,
    business_id: &str,
    pin: &str,
) -> EngineResult<Option<User>> {
    if pin.is_empty() {
        return Ok(None);
    }
    let holders = TenancyRepository::list_pin_holders(conn, business_id).await?;
    let matched = holders.into_iter().find(|user| {
        user.pin_hash
            .as_deref()
            .map(|hash| verify_secret(pin, hash))
            .unwrap_or(false)
    });
    debug!(business_id = %business_id, matched = matched.is_some(), "Resolved supervisor PIN");
    Ok(matched)
}

/// The owner, if `owner_id` is an active OWNER of the business and the
/// password verifies.
pub async fn verify_owner_password(
    conn: &mut SqliteConnection,
    business_id: &str,
    owner_id: &str,
    password: &str,
) -> EngineResult<Option<User>> {
    let Some(user) = TenancyRepository::find_user(conn, business_id, owner_id).await? else {
        return Ok(None);
    };
    if !user.is_active || user.role != Role::Owner {
        return Ok(None);
    }
    let verified = user
        .password_hash
        .as_deref()
        .map(|hash| verify_secret(password, hash))
        .unwrap_or(false);
    Ok(verified.then_some(user))
}
