//! # Seed
//!
//! Creates a demo business (chart of accounts, one store, one till, an owner,
//! a manager) in the configured database and prints the ids.
//!
//! ```text
//! seed [CONFIG_PATH]
//!
//!   TILL_SEED_OWNER_PASSWORD   owner password   (default "change-me")
//!   TILL_SEED_MANAGER_PIN      manager PIN      (default "0000")
//! ```

use std::path::PathBuf;

use chrono::Utc;
use tracing::info;

use till_core::{new_id, Business, Role, Store, Till, User};
use till_db::TenancyRepository;
use till_engine::credentials::hash_secret;
use till_engine::ledger::install_standard_chart;
use till_engine::{init_tracing, Engine, TillConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = TillConfig::load(config_path)?;
    let engine = Engine::open(config).await?;

    let owner_password =
        std::env::var("TILL_SEED_OWNER_PASSWORD").unwrap_or_else(|_| "change-me".to_string());
    let manager_pin = std::env::var("TILL_SEED_MANAGER_PIN").unwrap_or_else(|_| "0000".to_string());

    let now = Utc::now();
    let business_id = new_id();
    let store_id = new_id();
    let till_id = new_id();
    let owner_id = new_id();
    let manager_id = new_id();

    let mut tx = engine.db().begin().await?;
    TenancyRepository::insert_business(
        &mut tx,
        &Business {
            id: business_id.clone(),
            name: "Demo Shop".into(),
            currency: "GBP".into(),
            require_variance_reason: true,
            variance_alert_threshold_pence: 1000,
            created_at: now,
        },
    )
    .await?;
    install_standard_chart(&mut tx, &business_id).await?;
    TenancyRepository::insert_store(
        &mut tx,
        &Store {
            id: store_id.clone(),
            business_id: business_id.clone(),
            name: "Main Store".into(),
            is_active: true,
            created_at: now,
        },
    )
    .await?;
    TenancyRepository::insert_till(
        &mut tx,
        &Till {
            id: till_id.clone(),
            business_id: business_id.clone(),
            store_id: store_id.clone(),
            name: "Till 1".into(),
            is_active: true,
            created_at: now,
        },
    )
    .await?;
    TenancyRepository::insert_user(
        &mut tx,
        &User {
            id: owner_id.clone(),
            business_id: business_id.clone(),
            name: "Owner".into(),
            role: Role::Owner,
            pin_hash: None,
            password_hash: Some(hash_secret(&owner_password)?),
            is_active: true,
            created_at: now,
        },
    )
    .await?;
    TenancyRepository::insert_user(
        &mut tx,
        &User {
            id: manager_id.clone(),
            business_id: business_id.clone(),
            name: "Manager".into(),
            role: Role::Manager,
            pin_hash: Some(hash_secret(&manager_pin)?),
            password_hash: None,
            is_active: true,
            created_at: now,
        },
    )
    .await?;
    tx.commit().await?;

    info!(
        business_id = %business_id,
        store_id = %store_id,
        till_id = %till_id,
        owner_id = %owner_id,
        manager_id = %manager_id,
        "Demo business seeded"
    );
    println!("business_id={}", business_id);
    println!("store_id={}", store_id);
    println!("till_id={}", till_id);
    println!("owner_id={}", owner_id);
    println!("manager_id={}", manager_id);

    engine.db().close().await;
    Ok(())
}
