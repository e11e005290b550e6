//! # Reconciliation Service
//!
//! Manual stock corrections: signed adjustments, physical counts and the
//! balance rebuild used to recover from a `LedgerInconsistency`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  adjust(id, +24, "delivery")      → adjustment entry, ref adjustment:…  │
//! │  record_count(id, 180, "audit")   → adjustment entry for the difference │
//! │                                     (none if the count matches)         │
//! │  rebuild_balance(id)              → stored balance := journal replay    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::locks::{lock_set, MedicineLocks};
use crate::repository::ledger::{checked_balance, ensure_balance_rows, fetch_entries, write_batch};
use medstock_core::ledger::replay;
use medstock_core::validation::{validate_medicine_id, validate_note};
use medstock_core::{CoreError, LedgerRef, MovementEntry, StockPolicy, StockPosting, ValidationError};

/// Service for adjustments, stock counts and balance recovery.
#[derive(Debug, Clone)]
pub struct ReconciliationService {
    pool: SqlitePool,
    locks: Arc<MedicineLocks>,
    policy: StockPolicy,
}

impl ReconciliationService {
    pub fn new(pool: SqlitePool, locks: Arc<MedicineLocks>, policy: StockPolicy) -> Self {
        ReconciliationService { pool, locks, policy }
    }

    /// Writes a signed adjustment under a fresh `adjustment:<uuid>` reference.
    ///
    /// Opening stock is booked this way: the ledger starts at zero.
    pub async fn adjust(&self, medicine_id: &str, delta: i64, note: Option<String>) -> DbResult<MovementEntry> {
        validate_medicine_id(medicine_id)?;
        validate_note(note.as_deref())?;

        let reference = LedgerRef::adjustment(Uuid::new_v4().to_string());
        let posting = StockPosting::adjustment(medicine_id, delta, reference, note);

        let _guard = self.locks.acquire(lock_set([medicine_id])).await;
        let mut tx = self.pool.begin().await?;
        let mut entries = write_batch(&mut tx, &[posting], self.policy).await?;
        tx.commit().await?;

        let entry = entries
            .pop()
            .ok_or_else(|| DbError::Internal("adjustment wrote no entry".to_string()))?;
        info!(
            medicine_id = %medicine_id,
            delta = delta,
            balance_after_base = entry.balance_after_base,
            "Stock adjusted"
        );
        Ok(entry)
    }

    /// Books the difference between a physical count and the stored balance.
    ///
    /// Returns `None` when the count matches and nothing was written.
    pub async fn record_count(
        &self,
        medicine_id: &str,
        counted_base: i64,
        note: Option<String>,
    ) -> DbResult<Option<MovementEntry>> {
        validate_medicine_id(medicine_id)?;
        validate_note(note.as_deref())?;
        if counted_base < 0 {
            return Err(ValidationError::OutOfRange {
                field: "counted quantity".to_string(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }

        let ids = lock_set([medicine_id]);
        let _guard = self.locks.acquire(ids.clone()).await;
        let mut tx = self.pool.begin().await?;
        ensure_balance_rows(&mut tx, &ids).await?;

        let stored = checked_balance(&mut tx, medicine_id).await?.base_quantity;
        let delta = counted_base
            .checked_sub(stored)
            .ok_or_else(|| CoreError::QuantityOverflow(format!("count of {}", medicine_id)))?;
        if delta == 0 {
            info!(medicine_id = %medicine_id, counted_base = counted_base, "Count matches stored balance");
            return Ok(None);
        }

        let reference = LedgerRef::adjustment(Uuid::new_v4().to_string());
        let note = note.or_else(|| Some(format!("count {} (was {})", counted_base, stored)));
        let posting = StockPosting::adjustment(medicine_id, delta, reference, note);
        let mut entries = write_batch(&mut tx, &[posting], self.policy).await?;
        tx.commit().await?;

        warn!(
            medicine_id = %medicine_id,
            stored_base = stored,
            counted_base = counted_base,
            delta = delta,
            "Stock count discrepancy booked"
        );
        Ok(entries.pop())
    }

    /// Resets the stored balance to the journal's replayed balance.
    ///
    /// Fails with `LedgerInconsistency` if the journal itself does not
    /// replay; that needs an operator, not a rebuild.
    pub async fn rebuild_balance(&self, medicine_id: &str) -> DbResult<i64> {
        validate_medicine_id(medicine_id)?;

        let ids = lock_set([medicine_id]);
        let _guard = self.locks.acquire(ids.clone()).await;
        let mut tx = self.pool.begin().await?;
        ensure_balance_rows(&mut tx, &ids).await?;

        let entries = fetch_entries(&mut tx, medicine_id).await?;
        let rebuilt = replay(medicine_id, 0, &entries).map_err(|err| {
            error!(medicine_id = %medicine_id, error = %err, "Journal does not replay, balance not rebuilt");
            err
        })?;

        sqlx::query(
            r#"
            UPDATE stock_balance
            SET base_quantity = ?2, version = version + 1, updated_at = ?3
            WHERE medicine_id = ?1
            "#,
        )
        .bind(medicine_id)
        .bind(rebuilt)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        warn!(medicine_id = %medicine_id, base_quantity = rebuilt, entries = entries.len(), "Stock balance rebuilt");
        Ok(rebuilt)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{panadol, seed_stock, test_db};
    use medstock_core::{LedgerUnit, MovementReason, RefType};

    #[tokio::test]
    async fn test_adjust_writes_adjustment_entry() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();

        let entry = db
            .reconciliation()
            .adjust("panadol-500", 237, Some("opening stock".to_string()))
            .await
            .unwrap();

        assert_eq!(entry.reason, MovementReason::Adjustment);
        assert_eq!(entry.unit_type, LedgerUnit::Adjustment);
        assert_eq!(entry.ref_type, RefType::Adjustment);
        assert_eq!(entry.balance_after_base, 237);

        let down = db.reconciliation().adjust("panadol-500", -37, None).await.unwrap();
        assert_eq!(down.balance_after_base, 200);
        assert_ne!(down.ref_id, entry.ref_id);
    }

    #[tokio::test]
    async fn test_adjust_rejects_zero_and_overdraw() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 10).await;

        assert!(matches!(
            db.reconciliation().adjust("panadol-500", 0, None).await,
            Err(DbError::Domain(CoreError::ZeroMovement { .. }))
        ));
        assert!(matches!(
            db.reconciliation().adjust("panadol-500", -11, None).await,
            Err(DbError::Domain(CoreError::InsufficientStock { .. }))
        ));
        assert_eq!(db.ledger().balance("panadol-500").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_record_count() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 237).await;

        let entry = db
            .reconciliation()
            .record_count("panadol-500", 230, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.qty_change_base, -7);
        assert_eq!(entry.balance_after_base, 230);
        assert_eq!(entry.note.as_deref(), Some("count 230 (was 237)"));

        assert!(db
            .reconciliation()
            .record_count("panadol-500", 230, None)
            .await
            .unwrap()
            .is_none());
        assert!(db.reconciliation().record_count("panadol-500", -1, None).await.is_err());
    }

    #[tokio::test]
    async fn test_rebuild_balance_recovers_blocked_writes() {
        let db = test_db().await;
        db.medicines().insert(&panadol()).await.unwrap();
        seed_stock(&db, "panadol-500", 100).await;

        sqlx::query("UPDATE stock_balance SET base_quantity = 999 WHERE medicine_id = 'panadol-500'")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.reconciliation().adjust("panadol-500", 5, None).await.unwrap_err();
        assert!(err.is_fatal());

        assert_eq!(db.reconciliation().rebuild_balance("panadol-500").await.unwrap(), 100);
        assert_eq!(db.ledger().verify("panadol-500").await.unwrap(), 100);

        let entry = db.reconciliation().adjust("panadol-500", 5, None).await.unwrap();
        assert_eq!(entry.balance_after_base, 105);
    }
}
