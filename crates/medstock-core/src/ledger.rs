//! # Stock Ledger Arithmetic
//!
//! The pure half of the stock ledger: movement types, batch planning with
//! running balances, and journal verification. The persistent half (locks,
//! transactions, SQL) lives in `medstock-db` and calls into this module.
//!
//! ## Running Balance
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  seq  qty_change_base  balance_after_base  reason      ref              │
//! │  ───  ───────────────  ──────────────────  ──────────  ──────────────   │
//! │  1        +237               237           adjustment  adjustment:a1    │
//! │  2         -50               187           sale        sale:s1          │
//! │  3         +50               237           return      return:r1        │
//! │                                                                         │
//! │  balance_after[i] = balance_after[i-1] + qty_change[i]                  │
//! │  stock_balance.base_quantity = balance_after[last] = Σ qty_change       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A batch is planned as a whole: if any posting would leave its medicine
//! below zero under a no-backorder policy, the whole batch is rejected and
//! nothing is planned.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::packaging::{PackagingFactors, TierQuantities};
use crate::types::{LedgerRef, LedgerUnit, MovementReason, RefType, StockPolicy};

// =============================================================================
// Movement Entry
// =============================================================================

/// An immutable journal row. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MovementEntry {
    /// Journal order. Assigned by storage, strictly increasing.
    pub seq: i64,
    pub id: String,
    pub medicine_id: String,
    /// Signed change in base units.
    pub qty_change_base: i64,
    /// Unit the caller used, for audit display.
    pub unit_type: LedgerUnit,
    /// Quantity in `unit_type`, unsigned.
    pub unit_qty: i64,
    pub balance_after_base: i64,
    pub reason: MovementReason,
    pub ref_type: RefType,
    pub ref_id: String,
    pub note: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl MovementEntry {
    pub fn reference(&self) -> LedgerRef {
        LedgerRef::new(self.ref_type, self.ref_id.clone())
    }
}

// =============================================================================
// Stock Posting
// =============================================================================

/// A requested ledger change, before it has a balance or an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPosting {
    pub medicine_id: String,
    pub qty_change_base: i64,
    pub unit_type: LedgerUnit,
    pub unit_qty: i64,
    pub reason: MovementReason,
    pub reference: LedgerRef,
    pub note: Option<String>,
}

impl StockPosting {
    /// A manual correction in base units.
    pub fn adjustment(
        medicine_id: impl Into<String>,
        qty_change_base: i64,
        reference: LedgerRef,
        note: Option<String>,
    ) -> Self {
        StockPosting {
            medicine_id: medicine_id.into(),
            qty_change_base,
            unit_type: LedgerUnit::Adjustment,
            unit_qty: qty_change_base.abs(),
            reason: MovementReason::Adjustment,
            reference,
            note,
        }
    }

    /// The negation of a written entry, linked to `reversal`.
    pub fn reversal_of(entry: &MovementEntry, reversal: LedgerRef) -> Self {
        StockPosting {
            medicine_id: entry.medicine_id.clone(),
            qty_change_base: -entry.qty_change_base,
            unit_type: entry.unit_type,
            unit_qty: entry.unit_qty,
            reason: MovementReason::Return,
            reference: reversal,
            note: Some(format!("reverses {}", entry.id)),
        }
    }
}

/// A posting with the running balance it will produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMovement {
    pub posting: StockPosting,
    pub balance_after_base: i64,
}

// =============================================================================
// Planning
// =============================================================================

/// Plans a batch against the current balances.
///
/// `opening` holds the balance of every medicine the batch touches; a
/// missing entry counts as zero. Postings for the same medicine chain their
/// running balance in input order.
///
/// ## Errors
/// - `ZeroMovement` for a posting with `qty_change_base == 0`
/// - `InsufficientStock` if an outgoing posting leaves a balance `policy`
///   does not permit
/// - `QuantityOverflow` if a balance leaves the `i64` range
pub fn plan_batch(
    opening: &BTreeMap<String, i64>,
    postings: &[StockPosting],
    policy: StockPolicy,
) -> CoreResult<Vec<PlannedMovement>> {
    let mut running = opening.clone();
    let mut planned = Vec::with_capacity(postings.len());

    for posting in postings {
        if posting.qty_change_base == 0 {
            return Err(CoreError::ZeroMovement {
                medicine_id: posting.medicine_id.clone(),
            });
        }

        let balance = running.entry(posting.medicine_id.clone()).or_insert(0);
        let after = balance
            .checked_add(posting.qty_change_base)
            .ok_or_else(|| CoreError::QuantityOverflow(format!("balance of {}", posting.medicine_id)))?;

        // Receipts never break the policy, even below zero.
        if posting.qty_change_base < 0 && !policy.permits(after) {
            return Err(CoreError::InsufficientStock {
                medicine_id: posting.medicine_id.clone(),
                available: *balance,
                requested: -posting.qty_change_base,
            });
        }

        *balance = after;
        planned.push(PlannedMovement {
            posting: posting.clone(),
            balance_after_base: after,
        });
    }

    Ok(planned)
}

/// Final balance per medicine after a planned batch.
pub fn closing_balances(planned: &[PlannedMovement]) -> BTreeMap<String, i64> {
    planned
        .iter()
        .map(|p| (p.posting.medicine_id.clone(), p.balance_after_base))
        .collect()
}

// =============================================================================
// Verification
// =============================================================================

/// Checks that the stored balance matches the last journal entry.
///
/// Run before every write. `last_balance_after` is `None` for an empty
/// journal, which must pair with a zero balance.
pub fn check_tail(
    medicine_id: &str,
    stored_balance: i64,
    last_balance_after: Option<i64>,
) -> CoreResult<()> {
    let ledger_balance = last_balance_after.unwrap_or(0);
    if ledger_balance != stored_balance {
        return Err(CoreError::LedgerInconsistency {
            medicine_id: medicine_id.to_string(),
            ledger_balance,
            stored_balance,
        });
    }
    Ok(())
}

/// Recomputes a medicine's journal from `opening` and returns the final balance.
///
/// Fails with `LedgerInconsistency` at the first entry whose recorded
/// `balance_after_base` disagrees with the running sum.
pub fn replay(medicine_id: &str, opening: i64, entries: &[MovementEntry]) -> CoreResult<i64> {
    let mut balance = opening;
    for entry in entries {
        balance = balance
            .checked_add(entry.qty_change_base)
            .ok_or_else(|| CoreError::QuantityOverflow(format!("replay of {}", medicine_id)))?;
        if entry.balance_after_base != balance {
            return Err(CoreError::LedgerInconsistency {
                medicine_id: medicine_id.to_string(),
                ledger_balance: balance,
                stored_balance: entry.balance_after_base,
            });
        }
    }
    Ok(balance)
}

/// Full verification: journal continuity plus agreement with the stored balance.
pub fn verify_entries(
    medicine_id: &str,
    entries: &[MovementEntry],
    stored_balance: i64,
) -> CoreResult<i64> {
    let ledger_balance = replay(medicine_id, 0, entries)?;
    check_tail(medicine_id, stored_balance, Some(ledger_balance))?;
    Ok(ledger_balance)
}

// =============================================================================
// Stock Snapshot
// =============================================================================

/// Read-only projection of a medicine's stock for display and client caches.
///
/// `version` increases with every write; a cache holding an older version
/// is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockSnapshot {
    pub medicine_id: String,
    pub base_quantity: i64,
    pub tiers: TierQuantities,
    pub version: i64,
    #[ts(as = "String")]
    pub taken_at: DateTime<Utc>,
}

impl StockSnapshot {
    pub fn new(
        medicine_id: impl Into<String>,
        base_quantity: i64,
        factors: &PackagingFactors,
        version: i64,
    ) -> Self {
        StockSnapshot {
            medicine_id: medicine_id.into(),
            base_quantity,
            tiers: TierQuantities::from_base(base_quantity, factors),
            version,
            taken_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, current_version: i64) -> bool {
        self.version < current_version
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaging::PackagingConfig;
    use crate::types::UnitType;
    use proptest::prelude::*;

    fn sale(medicine_id: &str, base: i64) -> StockPosting {
        StockPosting {
            medicine_id: medicine_id.to_string(),
            qty_change_base: -base,
            unit_type: LedgerUnit::from(UnitType::Tablet),
            unit_qty: base,
            reason: MovementReason::Sale,
            reference: LedgerRef::sale("s-1"),
            note: None,
        }
    }

    fn opening(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn entries_from(planned: &[PlannedMovement]) -> Vec<MovementEntry> {
        planned
            .iter()
            .enumerate()
            .map(|(i, p)| MovementEntry {
                seq: i as i64 + 1,
                id: format!("e{}", i),
                medicine_id: p.posting.medicine_id.clone(),
                qty_change_base: p.posting.qty_change_base,
                unit_type: p.posting.unit_type,
                unit_qty: p.posting.unit_qty,
                balance_after_base: p.balance_after_base,
                reason: p.posting.reason,
                ref_type: p.posting.reference.ref_type,
                ref_id: p.posting.reference.ref_id.clone(),
                note: None,
                created_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_plan_single_sale() {
        let planned = plan_batch(&opening(&[("m1", 237)]), &[sale("m1", 50)], StockPolicy::default()).unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].balance_after_base, 187);
    }

    #[test]
    fn test_plan_rejects_whole_batch_on_shortfall() {
        let err = plan_batch(
            &opening(&[("m1", 500), ("m2", 100)]),
            &[sale("m1", 10), sale("m2", 300)],
            StockPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CoreError::InsufficientStock {
                medicine_id: "m2".to_string(),
                available: 100,
                requested: 300,
            }
        );
    }

    #[test]
    fn test_plan_chains_same_medicine() {
        let planned = plan_batch(
            &opening(&[("m1", 100)]),
            &[sale("m1", 60), sale("m1", 40)],
            StockPolicy::default(),
        )
        .unwrap();
        assert_eq!(planned[1].balance_after_base, 0);

        let err = plan_batch(
            &opening(&[("m1", 100)]),
            &[sale("m1", 60), sale("m1", 41)],
            StockPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { available: 40, requested: 41, .. }));
    }

    #[test]
    fn test_plan_allows_backorder_when_configured() {
        let planned = plan_batch(&opening(&[]), &[sale("m1", 5)], StockPolicy::allow_backorders()).unwrap();
        assert_eq!(planned[0].balance_after_base, -5);
    }

    #[test]
    fn test_plan_accepts_receipt_into_negative_balance() {
        // Left at -50 by an earlier backorder period, now forbidden.
        let receipt = StockPosting::adjustment("m1", 20, LedgerRef::adjustment("a-1"), None);
        let planned = plan_batch(&opening(&[("m1", -50)]), &[receipt], StockPolicy::forbid_backorders()).unwrap();
        assert_eq!(planned[0].balance_after_base, -30);

        // Further outgoing stock is still refused.
        let err = plan_batch(&opening(&[("m1", -30)]), &[sale("m1", 1)], StockPolicy::forbid_backorders())
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { available: -30, requested: 1, .. }));
    }

    #[test]
    fn test_plan_rejects_zero_movement() {
        let err = plan_batch(&opening(&[]), &[sale("m1", 0)], StockPolicy::default()).unwrap_err();
        assert!(matches!(err, CoreError::ZeroMovement { .. }));
    }

    #[test]
    fn test_closing_balances() {
        let planned = plan_batch(
            &opening(&[("a", 10), ("b", 10)]),
            &[sale("a", 1), sale("b", 2), sale("a", 3)],
            StockPolicy::default(),
        )
        .unwrap();
        assert_eq!(closing_balances(&planned), opening(&[("a", 6), ("b", 8)]));
    }

    #[test]
    fn test_check_tail() {
        assert!(check_tail("m1", 0, None).is_ok());
        assert!(check_tail("m1", 187, Some(187)).is_ok());
        assert!(matches!(
            check_tail("m1", 190, Some(187)),
            Err(CoreError::LedgerInconsistency { ledger_balance: 187, stored_balance: 190, .. })
        ));
    }

    #[test]
    fn test_replay_detects_broken_chain() {
        let adjustment = StockPosting::adjustment("m1", 237, LedgerRef::adjustment("a1"), None);
        let planned = plan_batch(&opening(&[]), &[adjustment, sale("m1", 50)], StockPolicy::default()).unwrap();
        let mut entries = entries_from(&planned);
        assert_eq!(verify_entries("m1", &entries, 187).unwrap(), 187);

        entries[1].balance_after_base = 190;
        assert!(matches!(
            replay("m1", 0, &entries),
            Err(CoreError::LedgerInconsistency { ledger_balance: 187, stored_balance: 190, .. })
        ));
    }

    #[test]
    fn test_reversal_of_negates() {
        let planned = plan_batch(&opening(&[("m1", 237)]), &[sale("m1", 50)], StockPolicy::default()).unwrap();
        let entry = &entries_from(&planned)[0];
        let reversal = StockPosting::reversal_of(entry, LedgerRef::sale_return("r1"));
        assert_eq!(reversal.qty_change_base, 50);
        assert_eq!(reversal.reason, MovementReason::Return);
        assert_eq!(reversal.reference, LedgerRef::sale_return("r1"));
    }

    #[test]
    fn test_snapshot_tiers_and_staleness() {
        let factors = PackagingConfig::new(10, 5, 2).factors().unwrap();
        let snap = StockSnapshot::new("m1", 237, &factors, 4);
        assert_eq!(snap.tiers.carton, 2);
        assert!(!snap.is_stale(4));
        assert!(snap.is_stale(5));
    }

    proptest! {
        #[test]
        fn prop_sum_law(start in 0i64..10_000, deltas in proptest::collection::vec(-500i64..500, 1..40)) {
            let mut postings = vec![StockPosting::adjustment("m", start.max(1), LedgerRef::adjustment("open"), None)];
            postings.extend(deltas.iter().filter(|d| **d != 0).map(|d| {
                StockPosting::adjustment("m", *d, LedgerRef::adjustment("adj"), None)
            }));

            let planned = plan_batch(&BTreeMap::new(), &postings, StockPolicy::allow_backorders()).unwrap();
            let entries = entries_from(&planned);
            let sum: i64 = postings.iter().map(|p| p.qty_change_base).sum();
            prop_assert_eq!(replay("m", 0, &entries).unwrap(), sum);
            prop_assert_eq!(entries.last().unwrap().balance_after_base, sum);
        }

        #[test]
        fn prop_plus_then_minus_restores(start in 0i64..10_000, n in 1i64..10_000) {
            let up = StockPosting::adjustment("m", n, LedgerRef::adjustment("a"), None);
            let down = StockPosting::adjustment("m", -n, LedgerRef::adjustment("a"), None);
            let planned = plan_batch(&opening(&[("m", start)]), &[up, down], StockPolicy::default()).unwrap();
            prop_assert_eq!(planned.len(), 2);
            prop_assert_eq!(planned[1].balance_after_base, start);
            prop_assert_eq!(planned[0].posting.qty_change_base + planned[1].posting.qty_change_base, 0);
        }
    }
}
