//! # Test Fixtures
//!
//! A fully seeded business on an in-memory database, shared by the engine's
//! own tests and by till-sync (feature `test-helpers`).
//!
//! ```text
//!   business  "Corner Shop"   variance reason required, alert above 1000
//!   ├── store_a  ── till      opening stock: OPENING_STOCK of each product
//!   ├── store_b               empty
//!   ├── owner    password OWNER_PASSWORD
//!   ├── manager  PIN MANAGER_PIN
//!   ├── cashier  PIN CASHIER_PIN
//!   ├── customer
//!   └── products
//!       widget      1000, VAT 0,   each + carton(12)
//!       vat_item    1000, VAT 20%, each
//!       promo_item   500, VAT 0,   each + carton(12), buy 2 get 1
//! ```
//!
//! [`Fixture::new`] runs on a single in-memory connection, so every
//! operation is serial. [`Fixture::file_backed`] puts the same data in a
//! scratch file with a multi-connection pool for tests that race
//! transactions against each other.
//!
//! Panics on any setup failure.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::audit::{AuditEvent, AuditSink};
use crate::context::OperatorContext;
use crate::credentials::hash_secret;
use crate::inventory::{ReceiveLine, ReceiveStockInput};
use crate::ledger::install_standard_chart;
use crate::sales::{SaleInput, SaleLineInput, SaleReceipt};
use crate::shifts::OpenShiftInput;
use crate::{Engine, TillConfig};
use till_core::costing::StockPosition;
use till_core::pricing::Tender;
use till_core::shift::Shift;
use till_core::{
    new_id, Business, Customer, PaymentMethod, PaymentStatus, Product, ProductUnit, Role, Store,
    Till, User,
};
use till_db::{CatalogRepository, Database, DbConfig, TenancyRepository};

pub const OWNER_PASSWORD: &str = "correct horse battery staple";
pub const MANAGER_PIN: &str = "4321";
pub const CASHIER_PIN: &str = "1111";

/// Base units of every product received into store A.
pub const OPENING_STOCK: i64 = 100;
/// Cost per base unit of the opening stock.
pub const OPENING_AVG_COST: i64 = 400;

pub const VARIANCE_ALERT_THRESHOLD: i64 = 1000;

struct Hashes {
    owner_password: String,
    manager_pin: String,
    cashier_pin: String,
}

fn hashes() -> &'static Hashes {
    static HASHES: OnceLock<Hashes> = OnceLock::new();
    HASHES.get_or_init(|| Hashes {
        owner_password: hash_secret(OWNER_PASSWORD).unwrap(),
        manager_pin: hash_secret(MANAGER_PIN).unwrap(),
        cashier_pin: hash_secret(CASHIER_PIN).unwrap(),
    })
}

pub struct Fixture {
    pub engine: Engine,
    /// Keeps a file-backed database alive until the fixture drops.
    _scratch: Option<TempDir>,
    pub audit_rx: mpsc::Receiver<AuditEvent>,
    pub business_id: String,
    pub store_a: String,
    pub store_b: String,
    pub till_id: String,
    pub owner_id: String,
    pub manager_id: String,
    pub cashier_id: String,
    pub customer_id: String,
    pub widget: String,
    pub vat_item: String,
    pub promo_item: String,
    pub each_unit: String,
    pub carton_unit: String,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_db(DbConfig::in_memory(), TillConfig::default(), None).await
    }

    /// Same seed data in a scratch SQLite file with `connections` pooled
    /// connections.
    pub async fn file_backed(connections: u32) -> Self {
        let scratch = TempDir::new().unwrap();
        let config = DbConfig::new(scratch.path().join("till.db"))
            .max_connections(connections)
            .busy_timeout(Duration::from_secs(10));
        // Racing writers lose snapshots often; give them room to rerun
        let mut till_config = TillConfig::default();
        till_config.retry.max_attempts = 40;
        till_config.retry.initial_backoff_ms = 5;
        till_config.retry.max_backoff_ms = 100;
        Self::with_db(config, till_config, Some(scratch)).await
    }

    async fn with_db(config: DbConfig, till_config: TillConfig, scratch: Option<TempDir>) -> Self {
        let db = Database::new(config).await.unwrap();
        let (sink, audit_rx) = AuditSink::channel(1024);
        let engine = Engine::new(db, sink, till_config);

        let mut fx = Fixture {
            engine,
            _scratch: scratch,
            audit_rx,
            business_id: new_id(),
            store_a: new_id(),
            store_b: new_id(),
            till_id: new_id(),
            owner_id: new_id(),
            manager_id: new_id(),
            cashier_id: new_id(),
            customer_id: new_id(),
            widget: new_id(),
            vat_item: new_id(),
            promo_item: new_id(),
            each_unit: new_id(),
            carton_unit: new_id(),
        };
        fx.seed().await;
        fx.receive_opening_stock().await;

        // Setup events are not what tests look for
        while fx.audit_rx.try_recv().is_ok() {}
        fx
    }

    async fn seed(&self) {
        let now = Utc::now();
        let hashes = hashes();
        let mut tx = self.engine.db().begin().await.unwrap();

        TenancyRepository::insert_business(
            &mut tx,
            &Business {
                id: self.business_id.clone(),
                name: "Corner Shop".into(),
                currency: "GBP".into(),
                require_variance_reason: true,
                variance_alert_threshold_pence: VARIANCE_ALERT_THRESHOLD,
                created_at: now,
            },
        )
        .await
        .unwrap();
        install_standard_chart(&mut tx, &self.business_id).await.unwrap();

        for (id, name) in [(&self.store_a, "High Street"), (&self.store_b, "Market Square")] {
            TenancyRepository::insert_store(
                &mut tx,
                &Store {
                    id: id.clone(),
                    business_id: self.business_id.clone(),
                    name: name.into(),
                    is_active: true,
                    created_at: now,
                },
            )
            .await
            .unwrap();
        }
        TenancyRepository::insert_till(
            &mut tx,
            &Till {
                id: self.till_id.clone(),
                business_id: self.business_id.clone(),
                store_id: self.store_a.clone(),
                name: "Till 1".into(),
                is_active: true,
                created_at: now,
            },
        )
        .await
        .unwrap();

        let users = [
            (&self.owner_id, "Olive", Role::Owner, None, Some(&hashes.owner_password)),
            (&self.manager_id, "Morgan", Role::Manager, Some(&hashes.manager_pin), None),
            (&self.cashier_id, "Casey", Role::Cashier, Some(&hashes.cashier_pin), None),
        ];
        for (id, name, role, pin_hash, password_hash) in users {
            TenancyRepository::insert_user(
                &mut tx,
                &User {
                    id: id.clone(),
                    business_id: self.business_id.clone(),
                    name: name.into(),
                    role,
                    pin_hash: pin_hash.cloned(),
                    password_hash: password_hash.cloned(),
                    is_active: true,
                    created_at: now,
                },
            )
            .await
            .unwrap();
        }
        TenancyRepository::insert_customer(
            &mut tx,
            &Customer {
                id: self.customer_id.clone(),
                business_id: self.business_id.clone(),
                name: "Regular".into(),
                phone: None,
                created_at: now,
            },
        )
        .await
        .unwrap();

        CatalogRepository::insert_unit(&mut tx, &self.each_unit, &self.business_id, "each")
            .await
            .unwrap();
        CatalogRepository::insert_unit(&mut tx, &self.carton_unit, &self.business_id, "carton")
            .await
            .unwrap();

        let products = [
            (&self.widget, "WID-1", "Widget", 1000, 0, None, true),
            (&self.vat_item, "VAT-1", "Taxed Gadget", 1000, 2000, None, false),
            (&self.promo_item, "PRO-1", "Fizzy Drink", 500, 0, Some((2, 1)), true),
        ];
        for (id, sku, name, price, vat_bps, promo, in_cartons) in products {
            CatalogRepository::insert_product(
                &mut tx,
                &Product {
                    id: id.clone(),
                    business_id: self.business_id.clone(),
                    sku: sku.into(),
                    name: name.into(),
                    unit_price_base_pence: price,
                    vat_rate_bps: vat_bps,
                    promo_buy_qty: promo.map(|(buy, _)| buy),
                    promo_get_qty: promo.map(|(_, get)| get),
                    is_active: true,
                    created_at: now,
                },
            )
            .await
            .unwrap();
            self.insert_product_unit(&mut tx, id, &self.each_unit, "each", 1).await;
            if in_cartons {
                self.insert_product_unit(&mut tx, id, &self.carton_unit, "carton", 12).await;
            }
        }

        tx.commit().await.unwrap();
    }

    async fn insert_product_unit(
        &self,
        conn: &mut sqlx::SqliteConnection,
        product_id: &str,
        unit_id: &str,
        unit_name: &str,
        conversion_to_base: i64,
    ) {
        CatalogRepository::insert_product_unit(
            conn,
            &ProductUnit {
                id: new_id(),
                product_id: product_id.to_string(),
                unit_id: unit_id.to_string(),
                unit_name: unit_name.to_string(),
                conversion_to_base,
                is_base_unit: conversion_to_base == 1,
            },
        )
        .await
        .unwrap();
    }

    async fn receive_opening_stock(&self) {
        let lines = [&self.widget, &self.vat_item, &self.promo_item]
            .into_iter()
            .map(|product_id| ReceiveLine {
                product_id: product_id.clone(),
                unit_id: self.each_unit.clone(),
                qty_in_unit: OPENING_STOCK,
                unit_cost_pence: OPENING_AVG_COST,
            })
            .collect();
        self.engine
            .inventory()
            .receive_stock(
                &self.owner_ctx(),
                ReceiveStockInput {
                    store_id: self.store_a.clone(),
                    supplier_ref: Some("OPENING".into()),
                    lines,
                    paid_from: None,
                },
            )
            .await
            .unwrap();
    }

    pub fn owner_ctx(&self) -> OperatorContext {
        OperatorContext::new(&self.business_id, &self.owner_id)
    }

    pub fn manager_ctx(&self) -> OperatorContext {
        OperatorContext::new(&self.business_id, &self.manager_id)
    }

    pub fn cashier_ctx(&self) -> OperatorContext {
        OperatorContext::new(&self.business_id, &self.cashier_id)
    }

    pub async fn balance(&self, store_id: &str, product_id: &str) -> StockPosition {
        self.engine
            .inventory()
            .balance(store_id, product_id)
            .await
            .unwrap()
    }

    /// Opens a shift on the fixture till as the cashier.
    pub async fn open_shift(&self, opening_cash_pence: i64) -> Shift {
        self.engine
            .shifts()
            .open_shift(
                &self.cashier_ctx(),
                OpenShiftInput {
                    till_id: self.till_id.clone(),
                    opening_cash_pence,
                },
            )
            .await
            .unwrap()
    }

    /// Sells `qty` of a product by the each, at the fixture till, for cash.
    pub async fn cash_sale(&self, product_id: &str, qty: i64, tendered_pence: i64) -> SaleReceipt {
        self.engine
            .sales()
            .create_sale(&self.cashier_ctx(), self.cash_sale_input(product_id, qty, tendered_pence))
            .await
            .unwrap()
    }

    pub fn cash_sale_input(&self, product_id: &str, qty: i64, tendered_pence: i64) -> SaleInput {
        SaleInput {
            store_id: self.store_a.clone(),
            till_id: Some(self.till_id.clone()),
            customer_id: None,
            intent: PaymentStatus::Paid,
            lines: vec![SaleLineInput {
                product_id: product_id.to_string(),
                unit_id: self.each_unit.clone(),
                qty_in_unit: qty,
                discount: None,
            }],
            order_discount: None,
            payments: vec![Tender {
                method: PaymentMethod::Cash,
                amount_pence: tendered_pence,
            }],
            external_ref: None,
            shift_id: None,
        }
    }

    /// The next audit event for `action`, skipping any others.
    pub async fn next_audit_event(&mut self, action: &str) -> AuditEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), self.audit_rx.recv())
                .await
                .unwrap_or_else(|_| panic!("no audit event for {}", action))
                .unwrap_or_else(|| panic!("audit channel closed waiting for {}", action));
            if event.action == action {
                return event;
            }
        }
    }
}
