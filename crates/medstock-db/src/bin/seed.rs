//! # Seed Data Generator
//!
//! Populates a database with a small demo pharmacy catalog and opening stock.
//!
//! ## Usage
//! ```bash
//! # Seed ./medstock.db (or $MEDSTOCK_DB_PATH)
//! cargo run -p medstock-db --bin seed
//!
//! # Specify database path
//! cargo run -p medstock-db --bin seed -- --db ./data/medstock.db
//! ```
//!
//! ## Generated Data
//! Each catalog record goes through the same packaging parser as a real
//! catalog import, so absent tier sizes default to 1. Opening stock is
//! booked as an adjustment entry per medicine.

use std::env;

use chrono::Utc;
use medstock_core::{Medicine, PackagingConfig, TierCosts, TierPricing};
use medstock_db::migrations::migration_status;
use medstock_db::{Database, DbConfig};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Demo catalog: (record, opening stock in tablets).
fn catalog() -> Vec<(Value, i64)> {
    vec![
        (
            json!({
                "id": "panadol-500", "name": "Panadol 500mg",
                "tablets_per_blister": 10, "blisters_per_pack": 5, "packs_per_carton": 2,
                "pricing": { "carton_price_cents": 8500, "retail_price_cents": 450, "tablet_price_cents": 10 },
                "costs": { "pack_cost_cents": 300 }
            }),
            237,
        ),
        (
            json!({
                "id": "amoxil-250", "name": "Amoxil 250mg Capsules",
                "tablets_per_blister": 8, "blisters_per_pack": 2, "packs_per_carton": 12,
                "pricing": { "retail_price_cents": 1200, "blister_price_cents": 650 },
                "costs": { "pack_cost_cents": 840, "carton_cost_cents": 9600 }
            }),
            960,
        ),
        (
            json!({
                "id": "brufen-400", "name": "Brufen 400mg",
                "tablets_per_blister": 10, "blisters_per_pack": 3,
                "pricing": { "price_cents": 600, "tablet_price_cents": 25 }
            }),
            150,
        ),
        (
            json!({
                "id": "ors-sachet", "name": "ORS Sachet",
                "packs_per_carton": 50,
                "pricing": { "retail_price_cents": 40, "wholesale_price_cents": 1800 }
            }),
            400,
        ),
    ]
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,medstock=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn medicine_from_record(record: &Value) -> Result<Medicine, Box<dyn std::error::Error>> {
    let now = Utc::now();
    let field = |name: &str| -> Result<String, Box<dyn std::error::Error>> {
        record[name]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("catalog record is missing '{}'", name).into())
    };

    Ok(Medicine {
        id: field("id")?,
        name: field("name")?,
        packaging: PackagingConfig::from_catalog_json(record)?,
        pricing: serde_json::from_value::<TierPricing>(record["pricing"].clone())?,
        costs: match record.get("costs") {
            Some(costs) => serde_json::from_value::<TierCosts>(costs.clone())?,
            None => TierCosts::default(),
        },
        is_active: true,
        created_at: now,
        updated_at: now,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut config = DbConfig::from_env()?;

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    config.database_path = args[i + 1].clone().into();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("MedStock Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: $MEDSTOCK_DB_PATH or ./medstock.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let db = Database::new(config).await?;
    let (total, applied) = migration_status(db.pool()).await?;
    info!(total, applied, "Connected to database");

    let existing = db.medicines().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has medicines, skipping seed");
        return Ok(());
    }

    for (record, opening) in catalog() {
        let medicine = medicine_from_record(&record)?;
        db.medicines().insert(&medicine).await?;
        db.reconciliation()
            .adjust(&medicine.id, opening, Some("opening stock".to_string()))
            .await?;

        let snapshot = db.ledger().snapshot(&medicine.id).await?;
        println!(
            "{:<24} {:>5} tablets = {:>3} blisters = {:>3} packs = {:>3} cartons",
            medicine.name,
            snapshot.tiers.tablet,
            snapshot.tiers.blister,
            snapshot.tiers.pack,
            snapshot.tiers.carton
        );
    }

    info!(medicines = db.medicines().count().await?, "Seed complete");
    db.close().await;
    Ok(())
}
