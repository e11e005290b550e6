//! # Medicine Repository
//!
//! Read access to catalog entries (packaging + tier prices + tier costs).
//! Catalog maintenance owns these rows; the ledger engine only reads them.
//! `insert` exists for fixtures and the seed binary.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use medstock_core::{Medicine, PackagingConfig, TierCosts, TierPricing};

/// Flat row shape of `medicines`.
#[derive(Debug, sqlx::FromRow)]
struct MedicineRow {
    id: String,
    name: String,
    tablets_per_blister: i64,
    blisters_per_pack: i64,
    packs_per_carton: i64,
    carton_price_cents: Option<i64>,
    wholesale_price_cents: Option<i64>,
    retail_price_cents: Option<i64>,
    price_cents: Option<i64>,
    blister_price_cents: Option<i64>,
    tablet_price_cents: Option<i64>,
    tablet_cost_cents: Option<i64>,
    blister_cost_cents: Option<i64>,
    pack_cost_cents: Option<i64>,
    carton_cost_cents: Option<i64>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MedicineRow {
    /// Rejects rows whose packaging sizes do not form valid factors.
    fn into_medicine(self) -> DbResult<Medicine> {
        let medicine = Medicine {
            id: self.id,
            name: self.name,
            packaging: PackagingConfig {
                tablets_per_blister: self.tablets_per_blister,
                blisters_per_pack: self.blisters_per_pack,
                packs_per_carton: self.packs_per_carton,
            },
            pricing: TierPricing {
                carton_price_cents: self.carton_price_cents,
                wholesale_price_cents: self.wholesale_price_cents,
                retail_price_cents: self.retail_price_cents,
                price_cents: self.price_cents,
                blister_price_cents: self.blister_price_cents,
                tablet_price_cents: self.tablet_price_cents,
            },
            costs: TierCosts {
                tablet_cost_cents: self.tablet_cost_cents,
                blister_cost_cents: self.blister_cost_cents,
                pack_cost_cents: self.pack_cost_cents,
                carton_cost_cents: self.carton_cost_cents,
            },
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        if let Err(err) = medicine.factors() {
            warn!(medicine_id = %medicine.id, error = %err, "Catalog row has invalid packaging");
            return Err(err.into());
        }
        Ok(medicine)
    }
}

const SELECT_MEDICINE: &str = r#"
    SELECT
        id, name,
        tablets_per_blister, blisters_per_pack, packs_per_carton,
        carton_price_cents, wholesale_price_cents, retail_price_cents,
        price_cents, blister_price_cents, tablet_price_cents,
        tablet_cost_cents, blister_cost_cents, pack_cost_cents, carton_cost_cents,
        is_active, created_at, updated_at
    FROM medicines
"#;

/// Loads a medicine on an open connection (inside a transaction).
pub(crate) async fn fetch_medicine(conn: &mut SqliteConnection, id: &str) -> DbResult<Medicine> {
    let row: Option<MedicineRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_MEDICINE))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.ok_or_else(|| DbError::not_found("Medicine", id))?
        .into_medicine()
}

/// Repository for catalog reads.
#[derive(Debug, Clone)]
pub struct MedicineRepository {
    pool: SqlitePool,
}

impl MedicineRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MedicineRepository { pool }
    }

    /// Gets a medicine by ID.
    ///
    /// A stored row with invalid packaging fails with `InvalidPackagingConfig`.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Medicine>> {
        let row: Option<MedicineRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_MEDICINE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(MedicineRow::into_medicine).transpose()
    }

    /// Gets a medicine by ID, `NotFound` if absent.
    pub async fn require(&self, id: &str) -> DbResult<Medicine> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Medicine", id))
    }

    /// Active medicines ordered by name. One bad row fails the whole list.
    pub async fn list_active(&self, limit: u32) -> DbResult<Vec<Medicine>> {
        let rows: Vec<MedicineRow> =
            sqlx::query_as(&format!("{} WHERE is_active = 1 ORDER BY name LIMIT ?1", SELECT_MEDICINE))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(MedicineRow::into_medicine).collect()
    }

    /// Inserts a catalog entry.
    pub async fn insert(&self, medicine: &Medicine) -> DbResult<()> {
        debug!(id = %medicine.id, name = %medicine.name, "Inserting medicine");

        sqlx::query(
            r#"
            INSERT INTO medicines (
                id, name,
                tablets_per_blister, blisters_per_pack, packs_per_carton,
                carton_price_cents, wholesale_price_cents, retail_price_cents,
                price_cents, blister_price_cents, tablet_price_cents,
                tablet_cost_cents, blister_cost_cents, pack_cost_cents, carton_cost_cents,
                is_active, created_at, updated_at
            ) VALUES (
                ?1, ?2,
                ?3, ?4, ?5,
                ?6, ?7, ?8,
                ?9, ?10, ?11,
                ?12, ?13, ?14, ?15,
                ?16, ?17, ?18
            )
            "#,
        )
        .bind(&medicine.id)
        .bind(&medicine.name)
        .bind(medicine.packaging.tablets_per_blister)
        .bind(medicine.packaging.blisters_per_pack)
        .bind(medicine.packaging.packs_per_carton)
        .bind(medicine.pricing.carton_price_cents)
        .bind(medicine.pricing.wholesale_price_cents)
        .bind(medicine.pricing.retail_price_cents)
        .bind(medicine.pricing.price_cents)
        .bind(medicine.pricing.blister_price_cents)
        .bind(medicine.pricing.tablet_price_cents)
        .bind(medicine.costs.tablet_cost_cents)
        .bind(medicine.costs.blister_cost_cents)
        .bind(medicine.costs.pack_cost_cents)
        .bind(medicine.costs.carton_cost_cents)
        .bind(medicine.is_active)
        .bind(medicine.created_at)
        .bind(medicine.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts catalog entries.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM medicines")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
