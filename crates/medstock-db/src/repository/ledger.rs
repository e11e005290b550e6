//! # Stock Ledger
//!
//! The append-only movement journal and the authoritative per-medicine
//! balance. Every stock change in the system goes through [`write_batch`].
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apply_many([posting, ...])                                             │
//! │       │                                                                 │
//! │       ├── 1. lock medicine ids (sorted)               MedicineLocks     │
//! │       ├── 2. BEGIN                                                      │
//! │       ├── 3. INSERT stock_balance ... DO NOTHING      (takes the SQLite │
//! │       │                                                writer lock)     │
//! │       ├── 4. read balance + version + last entry per medicine           │
//! │       │       └── stored ≠ last balance_after → LedgerInconsistency     │
//! │       ├── 5. plan_batch (medstock-core)                                 │
//! │       │       └── any balance < 0 (no backorders) → InsufficientStock   │
//! │       ├── 6. INSERT movements                                           │
//! │       ├── 7. UPDATE stock_balance ... WHERE version = ?  (CAS)          │
//! │       └── 8. COMMIT                                                     │
//! │                                                                         │
//! │  Any error before 8 drops the transaction: nothing is written.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers that need the ledger write inside a larger business transaction
//! (sale post, return) call [`write_batch`] on their own transaction after
//! taking the medicine locks themselves.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::locks::{lock_set, MedicineLocks};
use crate::repository::medicine::fetch_medicine;
use medstock_core::ledger::{check_tail, closing_balances, plan_batch, verify_entries};
use medstock_core::validation::validate_medicine_id;
use medstock_core::{
    CoreError, LedgerRef, MovementEntry, RefType, StockPolicy, StockPosting, StockSnapshot,
    TierQuantities,
};

const SELECT_MOVEMENT: &str = r#"
    SELECT
        seq, id, medicine_id, qty_change_base, unit_type, unit_qty,
        balance_after_base, reason, ref_type, ref_id, note, created_at
    FROM movements
"#;

// =============================================================================
// Transaction-Scoped Helpers
// =============================================================================

/// Stored balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub(crate) struct BalanceRow {
    pub base_quantity: i64,
    pub version: i64,
}

/// Creates missing balance rows for `ids`.
///
/// Also the first write of every ledger transaction, so SQLite hands out the
/// writer lock before any balance is read.
pub(crate) async fn ensure_balance_rows(conn: &mut SqliteConnection, ids: &BTreeSet<String>) -> DbResult<()> {
    let now = Utc::now();
    for id in ids {
        sqlx::query(
            r#"
            INSERT INTO stock_balance (medicine_id, base_quantity, version, updated_at)
            VALUES (?1, 0, 0, ?2)
            ON CONFLICT(medicine_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::ForeignKeyViolation { .. } => DbError::not_found("Medicine", id.as_str()),
            other => other,
        })?;
    }
    Ok(())
}

pub(crate) async fn load_balance(conn: &mut SqliteConnection, medicine_id: &str) -> DbResult<BalanceRow> {
    let row: Option<BalanceRow> =
        sqlx::query_as("SELECT base_quantity, version FROM stock_balance WHERE medicine_id = ?1")
            .bind(medicine_id)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(row.unwrap_or(BalanceRow {
        base_quantity: 0,
        version: 0,
    }))
}

async fn last_balance_after(conn: &mut SqliteConnection, medicine_id: &str) -> DbResult<Option<i64>> {
    let last: Option<i64> = sqlx::query_scalar(
        "SELECT balance_after_base FROM movements WHERE medicine_id = ?1 ORDER BY seq DESC LIMIT 1",
    )
    .bind(medicine_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(last)
}

/// Loads the stored balance and refuses it if the journal tail disagrees.
pub(crate) async fn checked_balance(conn: &mut SqliteConnection, medicine_id: &str) -> DbResult<BalanceRow> {
    let balance = load_balance(conn, medicine_id).await?;
    let last = last_balance_after(conn, medicine_id).await?;

    if let Err(err) = check_tail(medicine_id, balance.base_quantity, last) {
        error!(
            medicine_id = %medicine_id,
            stored_balance = balance.base_quantity,
            ledger_balance = ?last,
            "Ledger inconsistency detected, refusing write"
        );
        return Err(err.into());
    }

    Ok(balance)
}

/// All entries for a medicine in journal order.
pub(crate) async fn fetch_entries(conn: &mut SqliteConnection, medicine_id: &str) -> DbResult<Vec<MovementEntry>> {
    let entries: Vec<MovementEntry> =
        sqlx::query_as(&format!("{} WHERE medicine_id = ?1 ORDER BY seq", SELECT_MOVEMENT))
            .bind(medicine_id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(entries)
}

pub(crate) async fn fetch_entries_for_ref(
    conn: &mut SqliteConnection,
    reference: &LedgerRef,
) -> DbResult<Vec<MovementEntry>> {
    let entries: Vec<MovementEntry> =
        sqlx::query_as(&format!("{} WHERE ref_type = ?1 AND ref_id = ?2 ORDER BY seq", SELECT_MOVEMENT))
            .bind(reference.ref_type)
            .bind(&reference.ref_id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(entries)
}

/// Writes a batch of postings on an open transaction.
///
/// The caller must hold the medicine locks for every posting and commit
/// the transaction afterwards. On error the caller drops the transaction.
pub(crate) async fn write_batch(
    conn: &mut SqliteConnection,
    postings: &[StockPosting],
    policy: StockPolicy,
) -> DbResult<Vec<MovementEntry>> {
    let ids = lock_set(postings.iter().map(|p| p.medicine_id.as_str()));

    ensure_balance_rows(conn, &ids).await?;

    let mut opening = BTreeMap::new();
    let mut versions: BTreeMap<String, i64> = BTreeMap::new();
    for id in &ids {
        let balance = checked_balance(conn, id).await?;
        opening.insert(id.clone(), balance.base_quantity);
        versions.insert(id.clone(), balance.version);
    }

    let planned = plan_batch(&opening, postings, policy)?;
    let closing = closing_balances(&planned);

    let now = Utc::now();
    let mut entries = Vec::with_capacity(planned.len());
    for movement in planned {
        let posting = movement.posting;
        let id = Uuid::new_v4().to_string();

        let result = sqlx::query(
            r#"
            INSERT INTO movements (
                id, medicine_id, qty_change_base, unit_type, unit_qty,
                balance_after_base, reason, ref_type, ref_id, note, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&id)
        .bind(&posting.medicine_id)
        .bind(posting.qty_change_base)
        .bind(posting.unit_type)
        .bind(posting.unit_qty)
        .bind(movement.balance_after_base)
        .bind(posting.reason)
        .bind(posting.reference.ref_type)
        .bind(&posting.reference.ref_id)
        .bind(&posting.note)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(
            medicine_id = %posting.medicine_id,
            qty_change_base = posting.qty_change_base,
            balance_after_base = movement.balance_after_base,
            reference = %posting.reference,
            "Movement written"
        );

        entries.push(MovementEntry {
            seq: result.last_insert_rowid(),
            id,
            medicine_id: posting.medicine_id,
            qty_change_base: posting.qty_change_base,
            unit_type: posting.unit_type,
            unit_qty: posting.unit_qty,
            balance_after_base: movement.balance_after_base,
            reason: posting.reason,
            ref_type: posting.reference.ref_type,
            ref_id: posting.reference.ref_id,
            note: posting.note,
            created_at: now,
        });
    }

    for (id, base_quantity) in closing {
        let expected_version = versions.get(id.as_str()).copied().unwrap_or(0);
        let updated = sqlx::query(
            r#"
            UPDATE stock_balance
            SET base_quantity = ?2, version = version + 1, updated_at = ?3
            WHERE medicine_id = ?1 AND version = ?4
            "#,
        )
        .bind(&id)
        .bind(base_quantity)
        .bind(now)
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DbError::concurrent("stock_balance", id));
        }
    }

    Ok(entries)
}

/// Reference that already reversed `original`, if any.
async fn existing_reversal(conn: &mut SqliteConnection, original: &LedgerRef) -> DbResult<Option<LedgerRef>> {
    let row: Option<(RefType, String)> = sqlx::query_as(
        r#"
        SELECT reversal_ref_type, reversal_ref_id
        FROM ledger_reversals
        WHERE original_ref_type = ?1 AND original_ref_id = ?2
        "#,
    )
    .bind(original.ref_type)
    .bind(&original.ref_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(ref_type, ref_id)| LedgerRef::new(ref_type, ref_id)))
}

/// Reverses every entry written under `original`, linking the new entries to `reversal`.
///
/// An original is reversed at most once, and a reversal reference is never
/// reused.
pub(crate) async fn reverse_in(
    conn: &mut SqliteConnection,
    original: &LedgerRef,
    reversal: &LedgerRef,
    policy: StockPolicy,
) -> DbResult<Vec<MovementEntry>> {
    let originals = fetch_entries_for_ref(conn, original).await?;
    if originals.is_empty() {
        return Err(DbError::not_found("Movements", original.to_string()));
    }

    if let Some(earlier) = existing_reversal(conn, original).await? {
        warn!(original = %original, reversed_by = %earlier, "Reference already reversed");
        return Err(DbError::duplicate("reversal", original.to_string()));
    }

    if !fetch_entries_for_ref(conn, reversal).await?.is_empty() {
        return Err(DbError::duplicate("reversal", reversal.to_string()));
    }

    let postings: Vec<StockPosting> = originals
        .iter()
        .map(|entry| StockPosting::reversal_of(entry, reversal.clone()))
        .collect();

    let entries = write_batch(conn, &postings, policy).await?;

    sqlx::query(
        r#"
        INSERT INTO ledger_reversals (
            original_ref_type, original_ref_id, reversal_ref_type, reversal_ref_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(original.ref_type)
    .bind(&original.ref_id)
    .bind(reversal.ref_type)
    .bind(&reversal.ref_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(entries)
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// Persistent stock ledger.
///
/// ## Usage
/// ```rust,ignore
/// let ledger = db.ledger();
/// let entry = ledger.apply(StockPosting::adjustment("panadol-500", 237, reference, None)).await?;
/// let tiers = ledger.tier_quantities("panadol-500").await?;
/// ```
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
    locks: Arc<MedicineLocks>,
    policy: StockPolicy,
}

impl StockLedger {
    pub fn new(pool: SqlitePool, locks: Arc<MedicineLocks>, policy: StockPolicy) -> Self {
        StockLedger { pool, locks, policy }
    }

    pub fn policy(&self) -> StockPolicy {
        self.policy
    }

    /// Appends one entry and updates the balance.
    ///
    /// ## Errors
    /// - `ZeroMovement` for a zero delta
    /// - `InsufficientStock` if the balance would go negative (no backorders)
    /// - `LedgerInconsistency` if the stored balance disagrees with the journal
    pub async fn apply(&self, posting: StockPosting) -> DbResult<MovementEntry> {
        let mut entries = self.apply_many(vec![posting]).await?;
        entries
            .pop()
            .ok_or_else(|| DbError::Internal("apply wrote no entry".to_string()))
    }

    /// Appends a batch atomically: all entries are written or none.
    ///
    /// An empty batch is a no-op: it takes no locks, writes nothing and
    /// returns an empty list. `apply` never hits this path.
    pub async fn apply_many(&self, postings: Vec<StockPosting>) -> DbResult<Vec<MovementEntry>> {
        if postings.is_empty() {
            return Ok(Vec::new());
        }
        for posting in &postings {
            validate_medicine_id(&posting.medicine_id)?;
        }

        let ids = lock_set(postings.iter().map(|p| p.medicine_id.as_str()));
        let _guard = self.locks.acquire(ids).await;

        let mut tx = self.pool.begin().await?;
        let entries = write_batch(&mut tx, &postings, self.policy).await?;
        tx.commit().await?;

        info!(entries = entries.len(), "Ledger batch applied");
        Ok(entries)
    }

    /// Writes the negation of every entry under `original`, linked to `reversal`.
    ///
    /// For adjustments only. Sale and return movements carry per-line return
    /// bookkeeping and are undone through `SaleRepository::return_all`.
    ///
    /// ## Errors
    /// - `NotAllowed` for a sale or return reference
    /// - `NotFound` if `original` has no entries
    /// - `UniqueViolation` if `original` was already reversed or `reversal`
    ///   is already in use
    pub async fn reverse(&self, original: &LedgerRef, reversal: &LedgerRef) -> DbResult<Vec<MovementEntry>> {
        if original.ref_type != RefType::Adjustment {
            return Err(DbError::NotAllowed(format!(
                "{} must be reversed through its sale, not the raw ledger",
                original
            )));
        }

        let peek = self.entries_for_ref(original).await?;
        if peek.is_empty() {
            return Err(DbError::not_found("Movements", original.to_string()));
        }

        let ids = lock_set(peek.iter().map(|e| e.medicine_id.as_str()));
        let _guard = self.locks.acquire(ids.clone()).await;

        let mut tx = self.pool.begin().await?;
        ensure_balance_rows(&mut tx, &ids).await?;
        let entries = reverse_in(&mut tx, original, reversal, self.policy).await?;
        if entries.len() != peek.len() {
            return Err(DbError::concurrent("Movements", original.to_string()));
        }
        tx.commit().await?;

        info!(original = %original, reversal = %reversal, entries = entries.len(), "Ledger reference reversed");
        Ok(entries)
    }

    /// Stored base balance, zero for a medicine with no movements.
    pub async fn balance(&self, medicine_id: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        Ok(load_balance(&mut conn, medicine_id).await?.base_quantity)
    }

    /// Per-tier display quantities derived from the stored balance.
    pub async fn tier_quantities(&self, medicine_id: &str) -> DbResult<TierQuantities> {
        Ok(self.snapshot(medicine_id).await?.tiers)
    }

    /// Versioned read-only view for displays and client caches.
    pub async fn snapshot(&self, medicine_id: &str) -> DbResult<StockSnapshot> {
        let mut conn = self.pool.acquire().await?;
        let medicine = fetch_medicine(&mut conn, medicine_id).await?;
        let factors = medicine.factors()?;
        let balance = load_balance(&mut conn, medicine_id).await?;

        Ok(StockSnapshot::new(
            medicine_id,
            balance.base_quantity,
            &factors,
            balance.version,
        ))
    }

    /// Most recent entries first.
    pub async fn history(&self, medicine_id: &str, limit: u32) -> DbResult<Vec<MovementEntry>> {
        let entries: Vec<MovementEntry> =
            sqlx::query_as(&format!("{} WHERE medicine_id = ?1 ORDER BY seq DESC LIMIT ?2", SELECT_MOVEMENT))
                .bind(medicine_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
        Ok(entries)
    }

    /// Entries linked to a sale, return or adjustment, in journal order.
    pub async fn entries_for_ref(&self, reference: &LedgerRef) -> DbResult<Vec<MovementEntry>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entries_for_ref(&mut conn, reference).await
    }

    /// Recomputes the whole journal of a medicine against its stored balance.
    ///
    /// Returns the verified balance, or `LedgerInconsistency` for a broken
    /// running balance or a stored balance that disagrees with the journal.
    pub async fn verify(&self, medicine_id: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        let entries = fetch_entries(&mut conn, medicine_id).await?;
        let stored = load_balance(&mut conn, medicine_id).await?.base_quantity;

        match verify_entries(medicine_id, &entries, stored) {
            Ok(balance) => Ok(balance),
            Err(err @ CoreError::LedgerInconsistency { .. }) => {
                error!(medicine_id = %medicine_id, error = %err, "Ledger verification failed");
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::test_support::{open, panadol, seed_stock, test_db};
    use medstock_core::{LedgerUnit, MovementReason, RefType, UnitType};

    fn pack_sale(sale_id: &str, packs: i64) -> StockPosting {
        StockPosting {
            medicine_id: "panadol-500".to_string(),
            qty_change_base: -50 * packs,
            unit_type: LedgerUnit::from(UnitType::Pack),
            unit_qty: packs,
            reason: MovementReason::Sale,
            reference: LedgerRef::sale(sale_id),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_tier_quantities_scenario() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 237).await;

        let tiers = db.ledger().tier_quantities("panadol-500").await.unwrap();
        assert_eq!(
            tiers,
            TierQuantities {
                tablet: 237,
                blister: 23,
                pack: 4,
                carton: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_sell_one_pack_scenario() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 237).await;

        let entry = db.ledger().apply(pack_sale("s-1", 1)).await.unwrap();

        assert_eq!(entry.qty_change_base, -50);
        assert_eq!(entry.unit_type, LedgerUnit::Pack);
        assert_eq!(entry.unit_qty, 1);
        assert_eq!(entry.balance_after_base, 187);
        assert_eq!(entry.reason, MovementReason::Sale);
        assert_eq!(db.ledger().balance("panadol-500").await.unwrap(), 187);

        let history = db.ledger().history("panadol-500", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], entry);
    }

    #[tokio::test]
    async fn test_insufficient_stock_writes_nothing() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 100).await;

        let err = db.ledger().apply(pack_sale("s-1", 6)).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { available: 100, requested: 300, .. })
        ));
        assert_eq!(db.ledger().balance("panadol-500").await.unwrap(), 100);
        assert_eq!(db.ledger().history("panadol-500", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backorders_when_allowed() {
        let db = Database::new(DbConfig::in_memory().stock_policy(StockPolicy::allow_backorders()))
            .await
            .unwrap();
        db.medicines().insert(&panadol()).await.unwrap();

        let entry = db.ledger().apply(pack_sale("s-1", 1)).await.unwrap();
        assert_eq!(entry.balance_after_base, -50);

        // Floor, not truncation toward zero.
        let tiers = db.ledger().tier_quantities("panadol-500").await.unwrap();
        assert_eq!(tiers.pack, -1);
        assert_eq!(tiers.carton, -1);
    }

    #[tokio::test]
    async fn test_zero_movement_rejected() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        let err = db.ledger().apply(pack_sale("s-1", 0)).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ZeroMovement { .. })));
    }

    #[tokio::test]
    async fn test_unknown_medicine() {
        let db = test_db().await;
        let err = db.ledger().apply(pack_sale("s-1", 1)).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_plus_then_minus_round_trip() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 40).await;

        let reference = LedgerRef::adjustment("count-1");
        let up = db
            .ledger()
            .apply(StockPosting::adjustment("panadol-500", 25, reference.clone(), None))
            .await
            .unwrap();
        let down = db
            .ledger()
            .apply(StockPosting::adjustment("panadol-500", -25, reference, None))
            .await
            .unwrap();

        assert_eq!(up.qty_change_base + down.qty_change_base, 0);
        assert_eq!(db.ledger().balance("panadol-500").await.unwrap(), 40);
        assert_eq!(db.ledger().verify("panadol-500").await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_reverse_links_to_new_ref() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 237).await;

        let delivery = LedgerRef::adjustment("delivery-1");
        db.ledger()
            .apply_many(vec![
                StockPosting::adjustment("panadol-500", 25, delivery.clone(), None),
                StockPosting::adjustment("panadol-500", 15, delivery.clone(), None),
            ])
            .await
            .unwrap();
        assert_eq!(db.ledger().balance("panadol-500").await.unwrap(), 277);

        let undo = LedgerRef::adjustment("undo-1");
        let reversed = db.ledger().reverse(&delivery, &undo).await.unwrap();

        assert_eq!(reversed.len(), 2);
        assert!(reversed
            .iter()
            .all(|e| e.reason == MovementReason::Return && e.ref_type == RefType::Adjustment && e.ref_id == "undo-1"));
        assert_eq!(db.ledger().balance("panadol-500").await.unwrap(), 237);
        // Originals untouched.
        assert_eq!(db.ledger().entries_for_ref(&delivery).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reference_is_reversed_at_most_once() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 100).await;

        let delivery = LedgerRef::adjustment("delivery-1");
        db.ledger()
            .apply(StockPosting::adjustment("panadol-500", 50, delivery.clone(), None))
            .await
            .unwrap();
        db.ledger()
            .reverse(&delivery, &LedgerRef::adjustment("undo-1"))
            .await
            .unwrap();

        // Same reversal ref again, then a fresh one: both refused.
        for undo in ["undo-1", "undo-2"] {
            assert!(matches!(
                db.ledger().reverse(&delivery, &LedgerRef::adjustment(undo)).await,
                Err(DbError::UniqueViolation { .. })
            ));
        }
        assert_eq!(db.ledger().balance("panadol-500").await.unwrap(), 100);
        assert_eq!(db.ledger().history("panadol-500", 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sale_refs_cannot_be_reversed_on_raw_ledger() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 237).await;
        db.ledger().apply(pack_sale("s-1", 1)).await.unwrap();

        for reference in [LedgerRef::sale("s-1"), LedgerRef::sale_return("r-0")] {
            assert!(matches!(
                db.ledger().reverse(&reference, &LedgerRef::sale_return("r-1")).await,
                Err(DbError::NotAllowed(_))
            ));
        }
        assert_eq!(db.ledger().balance("panadol-500").await.unwrap(), 187);
    }

    #[tokio::test]
    async fn test_apply_many_empty_batch_writes_nothing() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 10).await;

        assert!(db.ledger().apply_many(Vec::new()).await.unwrap().is_empty());
        let snapshot = db.ledger().snapshot("panadol-500").await.unwrap();
        assert_eq!(snapshot.base_quantity, 10);
        assert_eq!(snapshot.version, 1);
    }

    #[tokio::test]
    async fn test_inconsistent_balance_blocks_writes() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 237).await;

        sqlx::query("UPDATE stock_balance SET base_quantity = 300 WHERE medicine_id = 'panadol-500'")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.ledger().apply(pack_sale("s-1", 1)).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            DbError::Domain(CoreError::LedgerInconsistency { ledger_balance: 237, stored_balance: 300, .. })
        ));
        assert!(db.ledger().verify("panadol-500").await.unwrap_err().is_fatal());
        assert_eq!(db.ledger().history("panadol-500", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_movements_reject_update() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 10).await;

        let result = sqlx::query("UPDATE movements SET qty_change_base = 99")
            .execute(db.pool())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_version_increases() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 237).await;

        let before = db.ledger().snapshot("panadol-500").await.unwrap();
        db.ledger().apply(pack_sale("s-1", 1)).await.unwrap();
        let after = db.ledger().snapshot("panadol-500").await.unwrap();

        assert!(before.is_stale(after.version));
        assert_eq!(after.base_quantity, 187);
        assert_eq!(after.tiers.pack, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_keep_running_balance() {
        let (db, path) = open("ledger-concurrency").await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 1_000).await;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let ledger = db.ledger();
            tasks.push(tokio::spawn(async move {
                ledger.apply(pack_sale(&format!("s-{}", i), 1)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(db.ledger().balance("panadol-500").await.unwrap(), 0);
        assert_eq!(db.ledger().verify("panadol-500").await.unwrap(), 0);
        assert_eq!(db.ledger().history("panadol-500", 100).await.unwrap().len(), 21);

        // Nothing left: one more sale must fail without writing.
        assert!(db.ledger().apply(pack_sale("s-x", 1)).await.is_err());

        db.close().await;
        crate::test_support::remove_db(&path);
    }
}
