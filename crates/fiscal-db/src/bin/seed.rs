//! # Seed Data Generator
//!
//! Populates a fiscal database with a register, NCF sequences and a small
//! bar/restaurant catalog for development.
//!
//! ## Usage
//! ```bash
//! # Seed the database from fiscal.toml / FISCAL_DB_PATH
//! cargo run -p fiscal-db --bin seed
//!
//! # Specify database path
//! cargo run -p fiscal-db --bin seed -- --db ./data/fiscal.db
//!
//! # Also ring up and finalize one sale, printing the receipt as JSON
//! cargo run -p fiscal-db --bin seed -- --demo
//! ```
//!
//! ## Generated Data
//! - Register `caja-1` bound to user `cajero`, with an open session
//! - Active sequences: B01 (consumo), B02 (crédito fiscal),
//!   B15 (gubernamental), B04 (nota de crédito), B03 (nota de débito)
//! - Categories with and without their own tax class
//! - Stock-tracked drinks and consumable dishes

use chrono::Utc;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fiscal_core::{Actor, CashRegister, Category, NcfType, Product, ProductKind, Role};
use fiscal_db::{FinalizeRequest, FiscalConfig, FiscalEngine, NewSequence};

/// (ncf type, serie, end number)
const SEQUENCES: &[(NcfType, &str, i64)] = &[
    (NcfType::FinalConsumer, "B01", 5000),
    (NcfType::TaxCredit, "B02", 2000),
    (NcfType::Government, "B15", 500),
    (NcfType::CreditNote, "B04", 1000),
    (NcfType::DebitNote, "B03", 500),
];

/// (id, name, tax rate bps, tax included)
const CATEGORIES: &[(&str, &str, Option<u32>, Option<bool>)] = &[
    ("cat-bebidas", "Bebidas", Some(1800), Some(true)),
    ("cat-comida", "Comida", None, None),
    ("cat-exentos", "Exentos", Some(0), Some(false)),
];

/// (id, name, category, price cents, kind, stock)
const PRODUCTS: &[(&str, &str, &str, i64, ProductKind, i64)] = &[
    ("p-presidente", "Presidente 650ml", "cat-bebidas", 25000, ProductKind::Inventory, 120),
    ("p-brahma", "Brahma Light 355ml", "cat-bebidas", 15000, ProductKind::Inventory, 96),
    ("p-agua", "Agua Planeta Azul", "cat-bebidas", 5000, ProductKind::Inventory, 48),
    ("p-morir", "Morir Soñando", "cat-bebidas", 17500, ProductKind::Consumable, 0),
    ("p-mofongo", "Mofongo de Chicharrón", "cat-comida", 45000, ProductKind::Consumable, 0),
    ("p-sancocho", "Sancocho", "cat-comida", 39500, ProductKind::Consumable, 0),
    ("p-tostones", "Tostones", "cat-comida", 15000, ProductKind::Consumable, 0),
    ("p-pan", "Pan de Agua", "cat-exentos", 1000, ProductKind::Inventory, 200),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut demo = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--demo" => demo = true,
            "--help" | "-h" => {
                println!("Fiscal POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (overrides config)");
                println!("  -c, --config <PATH>   Config file (default: platform config dir)");
                println!("      --demo            Finalize one demo sale and print the receipt");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = FiscalConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    println!("🌱 Fiscal POS Seed Data Generator");
    println!("=================================");
    println!("Database: {}", config.database.path.display());
    println!();

    let engine = FiscalEngine::open(&config).await?;
    let db = engine.db();
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    // Check existing data
    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let admin = Actor::new("admin", Role::Administrator);
    let cashier = Actor::new("cajero", Role::Cashier);
    let now = Utc::now();

    // Register + session
    db.cash()
        .insert_register(&CashRegister {
            id: "caja-1".to_string(),
            name: "Caja 1".to_string(),
            user_id: Some(cashier.user_id.clone()),
            is_active: true,
        })
        .await?;
    db.cash().open_session("caja-1", &cashier.user_id, 500_000).await?;
    println!("✓ Register caja-1 with an open session");

    // Sequences
    for (ncf_type, serie, end) in SEQUENCES {
        let seq = engine
            .create_sequence(
                &admin,
                NewSequence {
                    ncf_type: *ncf_type,
                    serie: serie.to_string(),
                    start_number: 1,
                    end_number: *end,
                    description: Some("Rango de desarrollo".to_string()),
                    active: true,
                },
            )
            .await?;
        println!("✓ Sequence {} ({}) 1-{}", seq.serie, seq.ncf_type, seq.end_number);
    }

    // Catalog
    for (id, name, rate, included) in CATEGORIES {
        db.products()
            .insert_category(&Category {
                id: id.to_string(),
                name: name.to_string(),
                tax_rate_bps: *rate,
                tax_included: *included,
            })
            .await?;
    }

    for (id, name, category, price, kind, stock) in PRODUCTS {
        db.products()
            .insert(&Product {
                id: id.to_string(),
                name: name.to_string(),
                category_id: Some(category.to_string()),
                price_cents: *price,
                stock: *stock,
                kind: *kind,
                tax_rate_bps: None,
                tax_included: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
    }
    println!(
        "✓ {} categories, {} products",
        CATEGORIES.len(),
        PRODUCTS.len()
    );

    if demo {
        let sale = engine.create_sale(&cashier, Some("mesa-1")).await?;
        engine.add_item(&cashier, &sale.id, "p-presidente", 2).await?;
        engine.add_item(&cashier, &sale.id, "p-mofongo", 1).await?;
        let details = engine.set_service_charge(&cashier, &sale.id, true).await?;

        let receipt = engine
            .finalize(
                &cashier,
                FinalizeRequest::cash(&sale.id, details.sale.total_cents + 10_000),
            )
            .await?;
        info!(ncf = %receipt.ncf, total = receipt.total_cents, "Demo sale finalized");

        println!();
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    }

    println!();
    println!("Done.");
    Ok(())
}
