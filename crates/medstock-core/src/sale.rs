//! # Sale Lifecycle
//!
//! The state machine deciding when a sale's lines reach the stock ledger.
//! This module only plans: it turns transitions into [`StockPosting`]s and
//! tracks returned quantities. `medstock-db` applies the postings and the
//! status change in one transaction.
//!
//! ## Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Transition        From               Ledger effect                     │
//! │  ───────────────   ────────────────   ────────────────────────────────  │
//! │  replace_lines     Draft              none                              │
//! │  post              Draft              -base_quantity per line (sale)    │
//! │  return            Posted, Returned   +returned base per line (return)  │
//! │  void              Draft              none                              │
//! │                                                                         │
//! │  Posted → Void is refused: return the sale in full first.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::cart::{Cart, CartLine};
use crate::error::{CoreError, CoreResult};
use crate::ledger::StockPosting;
use crate::money::Money;
use crate::pricing::{CostBasis, MarginEstimate, MarginPolicy};
use crate::types::{LedgerRef, LedgerUnit, MovementReason, SaleStatus, UnitType};
use crate::validation::{validate_note, validate_unit_quantity};

// =============================================================================
// Sale Line
// =============================================================================

/// A cart line frozen onto a sale, plus how much of it came back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    pub medicine_id: String,
    pub name: String,
    pub unit_type: UnitType,
    pub unit_qty: i64,
    pub unit_factor: i64,
    pub base_quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
    pub unit_cost: Option<Money>,
    /// Units of `unit_type` returned so far, across all returns.
    pub returned_unit_qty: i64,
}

impl From<CartLine> for SaleLine {
    fn from(line: CartLine) -> Self {
        SaleLine {
            medicine_id: line.medicine_id,
            name: line.name,
            unit_type: line.unit_type,
            unit_qty: line.unit_qty,
            unit_factor: line.unit_factor,
            base_quantity: line.base_quantity,
            unit_price: line.unit_price,
            line_total: line.line_total,
            unit_cost: line.unit_cost,
            returned_unit_qty: 0,
        }
    }
}

impl SaleLine {
    pub fn returnable_unit_qty(&self) -> i64 {
        self.unit_qty - self.returned_unit_qty
    }

    pub fn is_fully_returned(&self) -> bool {
        self.returnable_unit_qty() == 0
    }

    pub fn margin(&self, policy: &MarginPolicy) -> MarginEstimate {
        MarginEstimate::compute(self.line_total, self.unit_qty, self.unit_cost, policy)
    }

    fn posting(&self, sale_id: &str) -> StockPosting {
        StockPosting {
            medicine_id: self.medicine_id.clone(),
            qty_change_base: -self.base_quantity,
            unit_type: LedgerUnit::from(self.unit_type),
            unit_qty: self.unit_qty,
            reason: MovementReason::Sale,
            reference: LedgerRef::sale(sale_id),
            note: None,
        }
    }
}

// =============================================================================
// Sale
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub status: SaleStatus,
    pub lines: Vec<SaleLine>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub posted_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub voided_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Opens a draft from the current cart.
    pub fn draft(cart: Cart) -> Self {
        Sale {
            id: Uuid::new_v4().to_string(),
            status: SaleStatus::Draft,
            lines: cart.into_lines().into_iter().map(SaleLine::from).collect(),
            created_at: Utc::now(),
            posted_at: None,
            voided_at: None,
        }
    }

    /// Swaps in a new set of lines. Draft only.
    pub fn replace_lines(&mut self, cart: Cart) -> CoreResult<()> {
        self.require(&[SaleStatus::Draft], "edit lines")?;
        self.lines = cart.into_lines().into_iter().map(SaleLine::from).collect();
        Ok(())
    }

    /// One negative posting per line, all referencing this sale.
    ///
    /// ## Errors
    /// - `InvalidSaleStatus` unless the sale is a draft
    /// - `EmptySale` if there is nothing to post
    pub fn postings(&self) -> CoreResult<Vec<StockPosting>> {
        self.require(&[SaleStatus::Draft], "post")?;
        if self.lines.is_empty() {
            return Err(CoreError::EmptySale(format!("sale {}", self.id)));
        }
        Ok(self.lines.iter().map(|l| l.posting(&self.id)).collect())
    }

    /// Records a successful post. Call only after the postings were written.
    pub fn mark_posted(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.require(&[SaleStatus::Draft], "post")?;
        self.status = SaleStatus::Posted;
        self.posted_at = Some(at);
        Ok(())
    }

    /// Plans a (partial) return.
    ///
    /// Requests for the same medicine are summed before the over-return
    /// check. The sale itself is not modified; see [`Sale::apply_return`].
    ///
    /// ## Errors
    /// - `InvalidSaleStatus` unless posted or already partly returned
    /// - `EmptySale` for an empty request list
    /// - `LineNotFound` for a medicine not on the sale
    /// - `OverReturn` when the total exceeds what is still returnable
    pub fn plan_return(&self, requests: &[ReturnRequest], note: Option<String>) -> CoreResult<SaleReturn> {
        self.require(&[SaleStatus::Posted, SaleStatus::Returned], "return")?;
        validate_note(note.as_deref())?;
        if requests.is_empty() {
            return Err(CoreError::EmptySale(format!("return for sale {}", self.id)));
        }

        let mut wanted: BTreeMap<&str, i64> = BTreeMap::new();
        for request in requests {
            validate_unit_quantity(request.unit_qty)?;
            let total = wanted.entry(request.medicine_id.as_str()).or_insert(0);
            *total = total
                .checked_add(request.unit_qty)
                .ok_or_else(|| CoreError::QuantityOverflow(format!("return of {}", request.medicine_id)))?;
        }

        let return_id = Uuid::new_v4().to_string();
        let mut lines = Vec::with_capacity(wanted.len());
        for (medicine_id, unit_qty) in wanted {
            let line = self.line(medicine_id)?;
            if unit_qty > line.returnable_unit_qty() {
                return Err(CoreError::OverReturn {
                    medicine_id: medicine_id.to_string(),
                    returnable: line.returnable_unit_qty(),
                    requested: unit_qty,
                });
            }
            lines.push(ReturnLine::for_line(line, unit_qty)?);
        }

        Ok(SaleReturn {
            id: return_id,
            sale_id: self.id.clone(),
            lines,
            note,
            created_at: Utc::now(),
        })
    }

    /// Requests returning everything not yet returned.
    pub fn remaining_return_requests(&self) -> Vec<ReturnRequest> {
        self.lines
            .iter()
            .filter(|l| l.returnable_unit_qty() > 0)
            .map(|l| ReturnRequest::new(l.medicine_id.clone(), l.returnable_unit_qty()))
            .collect()
    }

    /// Books a planned return onto the lines. Call only after its postings were written.
    pub fn apply_return(&mut self, sale_return: &SaleReturn) -> CoreResult<()> {
        self.require(&[SaleStatus::Posted, SaleStatus::Returned], "return")?;
        for returned in &sale_return.lines {
            let line = self
                .lines
                .iter_mut()
                .find(|l| l.medicine_id == returned.medicine_id)
                .ok_or_else(|| CoreError::LineNotFound {
                    medicine_id: returned.medicine_id.clone(),
                })?;
            if returned.unit_qty > line.returnable_unit_qty() {
                return Err(CoreError::OverReturn {
                    medicine_id: returned.medicine_id.clone(),
                    returnable: line.returnable_unit_qty(),
                    requested: returned.unit_qty,
                });
            }
            line.returned_unit_qty += returned.unit_qty;
        }
        self.status = SaleStatus::Returned;
        Ok(())
    }

    /// True once every line has been returned in full.
    pub fn is_fully_returned(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(SaleLine::is_fully_returned)
    }

    pub fn has_returns(&self) -> bool {
        self.lines.iter().any(|l| l.returned_unit_qty > 0)
    }

    /// Abandons a draft. Posted sales must be returned instead.
    pub fn void(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.require(&[SaleStatus::Draft], "void")?;
        self.status = SaleStatus::Void;
        self.voided_at = Some(at);
        Ok(())
    }

    pub fn total(&self) -> Money {
        self.lines.iter().map(|l| l.line_total).sum()
    }

    pub fn margin(&self, policy: &MarginPolicy) -> MarginEstimate {
        let revenue = self.total();
        let lines: Vec<MarginEstimate> = self.lines.iter().map(|l| l.margin(policy)).collect();
        let cost: Money = lines.iter().map(|m| m.cost).sum();
        let basis = if lines.iter().any(MarginEstimate::is_estimate) {
            CostBasis::Heuristic
        } else {
            CostBasis::Recorded
        };
        MarginEstimate {
            revenue,
            cost,
            profit: revenue - cost,
            basis,
        }
    }

    pub fn line(&self, medicine_id: &str) -> CoreResult<&SaleLine> {
        self.lines
            .iter()
            .find(|l| l.medicine_id == medicine_id)
            .ok_or_else(|| CoreError::LineNotFound {
                medicine_id: medicine_id.to_string(),
            })
    }

    fn require(&self, allowed: &[SaleStatus], operation: &str) -> CoreResult<()> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(CoreError::InvalidSaleStatus {
            sale_id: self.id.clone(),
            current_status: self.status,
            operation: operation.to_string(),
        })
    }
}

// =============================================================================
// Returns
// =============================================================================

/// Caller's request to return `unit_qty` units of a sold line, in the unit it was sold by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReturnRequest {
    pub medicine_id: String,
    pub unit_qty: i64,
}

impl ReturnRequest {
    pub fn new(medicine_id: impl Into<String>, unit_qty: i64) -> Self {
        ReturnRequest {
            medicine_id: medicine_id.into(),
            unit_qty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReturnLine {
    pub medicine_id: String,
    pub unit_type: UnitType,
    pub unit_qty: i64,
    pub base_quantity: i64,
    pub refund: Money,
}

impl ReturnLine {
    fn for_line(line: &SaleLine, unit_qty: i64) -> CoreResult<Self> {
        let base_quantity = unit_qty
            .checked_mul(line.unit_factor)
            .ok_or_else(|| CoreError::QuantityOverflow(format!("return of {}", line.medicine_id)))?;
        let refund = line
            .unit_price
            .checked_mul_qty(unit_qty)
            .ok_or_else(|| CoreError::QuantityOverflow(format!("refund for {}", line.medicine_id)))?;
        Ok(ReturnLine {
            medicine_id: line.medicine_id.clone(),
            unit_type: line.unit_type,
            unit_qty,
            base_quantity,
            refund,
        })
    }
}

/// A return document. Its postings reference the return; `sale_id` links back for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleReturn {
    pub id: String,
    pub sale_id: String,
    pub lines: Vec<ReturnLine>,
    pub note: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SaleReturn {
    pub fn reference(&self) -> LedgerRef {
        LedgerRef::sale_return(self.id.clone())
    }

    /// One positive posting per returned line.
    pub fn postings(&self) -> Vec<StockPosting> {
        self.lines
            .iter()
            .map(|l| StockPosting {
                medicine_id: l.medicine_id.clone(),
                qty_change_base: l.base_quantity,
                unit_type: LedgerUnit::from(l.unit_type),
                unit_qty: l.unit_qty,
                reason: MovementReason::Return,
                reference: self.reference(),
                note: Some(format!("sale {}", self.sale_id)),
            })
            .collect()
    }

    pub fn refund_total(&self) -> Money {
        self.lines.iter().map(|l| l.refund).sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaging::PackagingConfig;
    use crate::pricing::{TierCosts, TierPricing};
    use crate::types::{Medicine, RefType};

    fn medicine(id: &str) -> Medicine {
        Medicine {
            id: id.to_string(),
            name: id.to_uppercase(),
            packaging: PackagingConfig::new(10, 5, 2),
            pricing: TierPricing {
                retail_price_cents: Some(450),
                tablet_price_cents: Some(10),
                ..Default::default()
            },
            costs: TierCosts::default(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn two_line_draft() -> Sale {
        let mut cart = Cart::new();
        cart.add_line(&medicine("amox"), UnitType::Pack, 1).unwrap();
        cart.add_line(&medicine("ibu"), UnitType::Tablet, 12).unwrap();
        Sale::draft(cart)
    }

    fn posted() -> Sale {
        let mut sale = two_line_draft();
        sale.mark_posted(Utc::now()).unwrap();
        sale
    }

    #[test]
    fn test_draft_postings_one_per_line() {
        let sale = two_line_draft();
        let postings = sale.postings().unwrap();

        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].qty_change_base, -50);
        assert_eq!(postings[0].unit_type, LedgerUnit::Pack);
        assert_eq!(postings[0].unit_qty, 1);
        assert_eq!(postings[1].qty_change_base, -12);
        assert!(postings
            .iter()
            .all(|p| p.reason == MovementReason::Sale && p.reference == LedgerRef::sale(sale.id.clone())));
    }

    #[test]
    fn test_empty_sale_cannot_post() {
        let sale = Sale::draft(Cart::new());
        assert!(matches!(sale.postings(), Err(CoreError::EmptySale(_))));
    }

    #[test]
    fn test_posted_sale_is_frozen() {
        let mut sale = posted();
        assert!(matches!(sale.postings(), Err(CoreError::InvalidSaleStatus { .. })));
        assert!(sale.replace_lines(Cart::new()).is_err());
        assert_eq!(
            sale.void(Utc::now()),
            Err(CoreError::InvalidSaleStatus {
                sale_id: sale.id.clone(),
                current_status: SaleStatus::Posted,
                operation: "void".to_string(),
            })
        );
    }

    #[test]
    fn test_void_draft() {
        let mut sale = two_line_draft();
        sale.void(Utc::now()).unwrap();
        assert_eq!(sale.status, SaleStatus::Void);
        assert!(sale.voided_at.is_some());
        assert!(sale.postings().is_err());
    }

    #[test]
    fn test_draft_cannot_be_returned() {
        let sale = two_line_draft();
        let err = sale.plan_return(&[ReturnRequest::new("amox", 1)], None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSaleStatus { current_status: SaleStatus::Draft, .. }));
    }

    #[test]
    fn test_partial_returns_accumulate() {
        let mut sale = posted();

        let first = sale.plan_return(&[ReturnRequest::new("ibu", 5)], None).unwrap();
        assert_eq!(first.lines[0].base_quantity, 5);
        assert_eq!(first.refund_total().cents(), 50);
        sale.apply_return(&first).unwrap();
        assert_eq!(sale.status, SaleStatus::Returned);
        assert!(!sale.is_fully_returned());

        let err = sale.plan_return(&[ReturnRequest::new("ibu", 8)], None).unwrap_err();
        assert_eq!(
            err,
            CoreError::OverReturn {
                medicine_id: "ibu".to_string(),
                returnable: 7,
                requested: 8,
            }
        );

        let rest = sale.plan_return(&sale.remaining_return_requests(), None).unwrap();
        sale.apply_return(&rest).unwrap();
        assert!(sale.is_fully_returned());
        assert!(sale.remaining_return_requests().is_empty());
    }

    #[test]
    fn test_duplicate_requests_are_summed() {
        let sale = posted();
        let err = sale
            .plan_return(&[ReturnRequest::new("amox", 1), ReturnRequest::new("amox", 1)], None)
            .unwrap_err();
        assert!(matches!(err, CoreError::OverReturn { returnable: 1, requested: 2, .. }));
    }

    #[test]
    fn test_unknown_line_rejected() {
        let sale = posted();
        assert!(matches!(
            sale.plan_return(&[ReturnRequest::new("zinc", 1)], None),
            Err(CoreError::LineNotFound { .. })
        ));
    }

    #[test]
    fn test_return_postings_mirror_sale_postings() {
        let mut draft = two_line_draft();
        let sale_postings = draft.postings().unwrap();
        draft.mark_posted(Utc::now()).unwrap();

        let sale_return = draft
            .plan_return(&draft.remaining_return_requests(), Some("customer".to_string()))
            .unwrap();
        let return_postings = sale_return.postings();

        let sold: i64 = sale_postings.iter().map(|p| p.qty_change_base).sum();
        let returned: i64 = return_postings.iter().map(|p| p.qty_change_base).sum();
        assert_eq!(sold + returned, 0);
        assert!(return_postings.iter().all(|p| p.reference.ref_type == RefType::Return
            && p.reason == MovementReason::Return));
    }

    #[test]
    fn test_sale_margin_is_estimate_without_costs() {
        let sale = posted();
        let margin = sale.margin(&MarginPolicy::default());
        assert_eq!(margin.revenue.cents(), 450 + 120);
        assert!(margin.is_estimate());
    }
}
