//! # medstock-db: Persistence Layer for the Pharmacy Stock Ledger
//!
//! SQLite storage for the catalog, the movement journal, stock balances,
//! sales and returns. Business rules live in `medstock-core`; this crate
//! runs them inside transactions.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MedStock Data Flow                               │
//! │                                                                         │
//! │  Counter / back-office caller                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   medstock-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │    Repositories    │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded) │  │   │
//! │  │   │               │    │ StockLedger        │  │            │  │   │
//! │  │   │ SqlitePool    │◄───│ SaleRepository     │  │ 001_init   │  │   │
//! │  │   │ MedicineLocks │    │ Reconciliation     │  │            │  │   │
//! │  │   │ StockPolicy   │    │ MedicineRepository │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`locks`] - Per-medicine write serialization
//! - [`repository`] - Ledger, sales, reconciliation, catalog reads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use medstock_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::from_env()?).await?;
//!
//! let draft = db.sales().create_draft(cart).await?;
//! let posted = db.sales().post(&draft.id).await?;
//! let tiers = db.ledger().tier_quantities("panadol-500").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod locks;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use locks::{lock_set, MedicineGuard, MedicineLocks};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::ledger::StockLedger;
pub use repository::medicine::MedicineRepository;
pub use repository::reconciliation::ReconciliationService;
pub use repository::sale::{BookedReturn, PostedSale, SaleRepository};

// =============================================================================
// Test Fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};

    use chrono::Utc;
    use medstock_core::{Medicine, PackagingConfig, TierCosts, TierPricing};

    use crate::pool::{Database, DbConfig};

    pub async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    /// File-backed database for tests that need several connections.
    pub async fn open(name: &str) -> (Database, PathBuf) {
        let path = std::env::temp_dir().join(format!("medstock-{}-{}.db", name, uuid::Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(5)).await.unwrap();
        (db, path)
    }

    pub fn remove_db(path: &Path) {
        let _ = std::fs::remove_file(path);
        for suffix in ["-wal", "-shm"] {
            let mut side = path.as_os_str().to_owned();
            side.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(side));
        }
    }

    /// 10 tablets/blister, 5 blisters/pack, 2 packs/carton.
    pub fn medicine(id: &str, name: &str) -> Medicine {
        let now = Utc::now();
        Medicine {
            id: id.to_string(),
            name: name.to_string(),
            packaging: PackagingConfig::new(10, 5, 2),
            pricing: TierPricing {
                carton_price_cents: Some(8500),
                retail_price_cents: Some(450),
                blister_price_cents: Some(95),
                tablet_price_cents: Some(10),
                ..TierPricing::default()
            },
            costs: TierCosts {
                pack_cost_cents: Some(300),
                ..TierCosts::default()
            },
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn panadol() -> Medicine {
        medicine("panadol-500", "Panadol 500mg")
    }

    /// Books opening stock as an adjustment.
    pub async fn seed_stock(db: &Database, medicine_id: &str, base_quantity: i64) {
        db.reconciliation()
            .adjust(medicine_id, base_quantity, Some("opening stock".to_string()))
            .await
            .unwrap();
    }
}
