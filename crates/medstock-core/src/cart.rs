//! # Sale Line Computer
//!
//! The single cart contract shared by every sale entry point: builds and
//! merges lines from `(medicine, unit, qty)` selections.
//!
//! ## Line Math
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  add_line(panadol, Pack, 2)                                             │
//! │       │                                                                 │
//! │       ├── resolve(panadol, Pack)  → $4.50   (PriceUnavailable if none)  │
//! │       ├── factor(Pack)            → 50 tablets                          │
//! │       ▼                                                                 │
//! │  CartLine { unit_qty: 2, base_quantity: 100, line_total: $9.00 }        │
//! │                                                                         │
//! │  add_line(panadol, Pack, 1)     → unit_qty 3, base 150, total $13.50    │
//! │  add_line(panadol, Tablet, 1)   → MixedUnit (one unit per medicine)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation computes the new line first and only then touches the
//! cart, so a failed call leaves the cart unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::pricing::{resolve, MarginEstimate, MarginPolicy};
use crate::types::{Medicine, UnitType};
use crate::validation::{validate_cart_size, validate_unit_quantity};
use crate::MAX_UNIT_QUANTITY;

// =============================================================================
// Cart Line
// =============================================================================

/// One medicine in the cart, in exactly one unit.
///
/// `unit_price`, `unit_factor` and `unit_cost` are frozen when the line is
/// first added; later merges reuse them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub medicine_id: String,
    /// Medicine name at time of adding (frozen).
    pub name: String,
    pub unit_type: UnitType,
    /// Quantity in the selected tier.
    pub unit_qty: i64,
    /// Base units in one `unit_type`.
    pub unit_factor: i64,
    /// `unit_qty × unit_factor`.
    pub base_quantity: i64,
    /// Tier price, not derived from the tablet price.
    pub unit_price: Money,
    /// `unit_qty × unit_price`.
    pub line_total: Money,
    /// Recorded tier cost, if the catalog has one.
    pub unit_cost: Option<Money>,
}

impl CartLine {
    /// Builds a priced line, failing with `PriceUnavailable` for unsellable tiers.
    pub fn price(medicine: &Medicine, unit: UnitType, unit_qty: i64) -> CoreResult<Self> {
        let unit_price = resolve(medicine, unit)?;
        let factors = medicine.factors()?;

        let mut line = CartLine {
            medicine_id: medicine.id.clone(),
            name: medicine.name.clone(),
            unit_type: unit,
            unit_qty: 0,
            unit_factor: factors.factor(unit),
            base_quantity: 0,
            unit_price,
            line_total: Money::zero(),
            unit_cost: medicine.costs.cost_for(unit),
        };
        line.recompute(unit_qty)?;
        Ok(line)
    }

    /// Returns a copy of this line with `unit_qty` replaced.
    fn with_qty(&self, unit_qty: i64) -> CoreResult<Self> {
        let mut line = self.clone();
        line.recompute(unit_qty)?;
        Ok(line)
    }

    fn recompute(&mut self, unit_qty: i64) -> CoreResult<()> {
        let base_quantity = self.unit_qty_to_base(unit_qty)?;
        let line_total = self.unit_price.checked_mul_qty(unit_qty).ok_or_else(|| {
            CoreError::QuantityOverflow(format!("line total for {}", self.medicine_id))
        })?;

        self.unit_qty = unit_qty;
        self.base_quantity = base_quantity;
        self.line_total = line_total;
        Ok(())
    }

    fn unit_qty_to_base(&self, unit_qty: i64) -> CoreResult<i64> {
        unit_qty
            .checked_mul(self.unit_factor)
            .ok_or_else(|| CoreError::QuantityOverflow(format!("{} {}", unit_qty, self.unit_type)))
    }

    /// Profit for this line, flagged as an estimate when no cost is recorded.
    pub fn margin(&self, policy: &MarginPolicy) -> MarginEstimate {
        MarginEstimate::compute(self.line_total, self.unit_qty, self.unit_cost, policy)
    }
}

// =============================================================================
// Cart
// =============================================================================

/// The in-progress cart.
///
/// ## Invariants
/// - At most one line per `medicine_id`
/// - Every line has `unit_qty > 0`
/// - At most `MAX_CART_LINES` lines
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Cart {
    lines: Vec<CartLine>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Default for Cart {
    fn default() -> Self {
        Cart::new()
    }
}

impl Cart {
    pub fn new() -> Self {
        Cart {
            lines: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, medicine_id: &str) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.medicine_id == medicine_id)
    }

    /// Adds `qty` of `unit` or merges into the existing line for the medicine.
    ///
    /// ## Behavior
    /// - Inactive medicine → `MedicineInactive`
    /// - Unsellable tier → `PriceUnavailable`
    /// - Existing line in another unit → `MixedUnit`
    /// - Existing line in the same unit → `unit_qty` increases
    pub fn add_line(&mut self, medicine: &Medicine, unit: UnitType, qty: i64) -> CoreResult<&CartLine> {
        if !medicine.is_active {
            return Err(CoreError::MedicineInactive {
                medicine_id: medicine.id.clone(),
            });
        }
        validate_unit_quantity(qty)?;
        let priced = CartLine::price(medicine, unit, qty)?;

        match self.position(&medicine.id) {
            Some(idx) => {
                let existing = &self.lines[idx];
                if existing.unit_type != unit {
                    return Err(CoreError::MixedUnit {
                        medicine_id: medicine.id.clone(),
                        existing: existing.unit_type,
                        requested: unit,
                    });
                }

                let merged_qty = existing.unit_qty + qty;
                if merged_qty > MAX_UNIT_QUANTITY {
                    return Err(CoreError::QuantityTooLarge {
                        requested: merged_qty,
                        max: MAX_UNIT_QUANTITY,
                    });
                }

                let merged = existing.with_qty(merged_qty)?;
                self.lines[idx] = merged;
                Ok(&self.lines[idx])
            }
            None => {
                validate_cart_size(self.lines.len()).map_err(|_| CoreError::CartTooLarge {
                    max: crate::MAX_CART_LINES,
                })?;
                self.lines.push(priced);
                let last = self.lines.len() - 1;
                Ok(&self.lines[last])
            }
        }
    }

    /// Sets the unit quantity of an existing line. `new_unit_qty <= 0` removes it.
    pub fn set_qty(&mut self, medicine_id: &str, new_unit_qty: i64) -> CoreResult<Option<&CartLine>> {
        let idx = self
            .position(medicine_id)
            .ok_or_else(|| CoreError::LineNotFound {
                medicine_id: medicine_id.to_string(),
            })?;

        if new_unit_qty <= 0 {
            self.lines.remove(idx);
            return Ok(None);
        }

        validate_unit_quantity(new_unit_qty)?;
        let updated = self.lines[idx].with_qty(new_unit_qty)?;
        self.lines[idx] = updated;
        Ok(Some(&self.lines[idx]))
    }

    /// Removes the line for a medicine.
    pub fn remove_line(&mut self, medicine_id: &str) -> CoreResult<CartLine> {
        let idx = self
            .position(medicine_id)
            .ok_or_else(|| CoreError::LineNotFound {
                medicine_id: medicine_id.to_string(),
            })?;
        Ok(self.lines.remove(idx))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.created_at = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Sum of all line totals.
    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(|l| l.line_total).sum()
    }

    /// Tablets that posting this cart would take out of stock.
    pub fn total_base_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.base_quantity).sum()
    }

    /// Takes the lines, leaving the cart empty.
    pub fn into_lines(self) -> Vec<CartLine> {
        self.lines
    }

    fn position(&self, medicine_id: &str) -> Option<usize> {
        self.lines.iter().position(|l| l.medicine_id == medicine_id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
