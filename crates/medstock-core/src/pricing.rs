//! # Price Resolution
//!
//! Resolves the unit price for a tier from the catalog's price fields and
//! reports which tiers are sellable.
//!
//! ## Fallback Chain
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Tier      Tried in order (first value > 0 wins)                        │
//! │  ───────   ──────────────────────────────────────────────────────────   │
//! │  carton    carton_price → wholesale_price → retail_price → price        │
//! │  pack      retail_price → price                                         │
//! │  blister   blister_price                                                │
//! │  tablet    tablet_price                                                 │
//! │                                                                         │
//! │  Nothing > 0  →  tier is unsellable (PriceUnavailable)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tiers are priced independently. A blister is never priced as
//! `tablets × tablet_price`. Price resolution knows nothing about stock.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Medicine, UnitType};

// =============================================================================
// Tier Pricing
// =============================================================================

/// Price fields as stored on the catalog entry. Any may be absent or zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TierPricing {
    #[serde(default)]
    pub carton_price_cents: Option<i64>,
    #[serde(default)]
    pub wholesale_price_cents: Option<i64>,
    /// Pack-level retail price.
    #[serde(default)]
    pub retail_price_cents: Option<i64>,
    /// Legacy pack-level price, used when `retail_price_cents` is unset.
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub blister_price_cents: Option<i64>,
    #[serde(default)]
    pub tablet_price_cents: Option<i64>,
}

impl TierPricing {
    /// Resolved price for `unit`, `None` if the tier is unsellable.
    pub fn price_for(&self, unit: UnitType) -> Option<Money> {
        let chain = match unit {
            UnitType::Carton => [
                self.carton_price_cents,
                self.wholesale_price_cents,
                self.retail_price_cents,
                self.price_cents,
            ],
            UnitType::Pack => [self.retail_price_cents, self.price_cents, None, None],
            UnitType::Blister => [self.blister_price_cents, None, None, None],
            UnitType::Tablet => [self.tablet_price_cents, None, None, None],
        };

        chain
            .into_iter()
            .flatten()
            .find(|cents| *cents > 0)
            .map(Money::from_cents)
    }

    /// Tiers whose resolved price is > 0.
    pub fn sellable_units(&self) -> BTreeSet<UnitType> {
        UnitType::ALL
            .into_iter()
            .filter(|unit| self.price_for(*unit).is_some())
            .collect()
    }
}

/// Resolves the unit price of `medicine` sold by `unit`.
///
/// ## Example
/// ```rust,ignore
/// let price = resolve(&medicine, UnitType::Pack)?;
/// ```
pub fn resolve(medicine: &Medicine, unit: UnitType) -> CoreResult<Money> {
    medicine
        .pricing
        .price_for(unit)
        .ok_or_else(|| CoreError::PriceUnavailable {
            medicine_id: medicine.id.clone(),
            unit,
        })
}

/// Tiers the UI should offer for `medicine`.
pub fn sellable_units(medicine: &Medicine) -> BTreeSet<UnitType> {
    medicine.pricing.sellable_units()
}

// =============================================================================
// Cost Basis & Margin
// =============================================================================

/// Optional purchase cost per tier, in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TierCosts {
    #[serde(default)]
    pub tablet_cost_cents: Option<i64>,
    #[serde(default)]
    pub blister_cost_cents: Option<i64>,
    #[serde(default)]
    pub pack_cost_cents: Option<i64>,
    #[serde(default)]
    pub carton_cost_cents: Option<i64>,
}

impl TierCosts {
    /// Recorded cost for one unit of `unit`. Non-positive values count as unset.
    pub fn cost_for(&self, unit: UnitType) -> Option<Money> {
        let cents = match unit {
            UnitType::Tablet => self.tablet_cost_cents,
            UnitType::Blister => self.blister_cost_cents,
            UnitType::Pack => self.pack_cost_cents,
            UnitType::Carton => self.carton_cost_cents,
        };
        cents.filter(|c| *c > 0).map(Money::from_cents)
    }
}

/// How missing costs are estimated for margin display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MarginPolicy {
    /// Assumed cost as a share of revenue, in basis points (7000 = 70%).
    pub heuristic_cost_bps: u32,
}

impl Default for MarginPolicy {
    fn default() -> Self {
        MarginPolicy {
            heuristic_cost_bps: 7000,
        }
    }
}

/// Where the cost figure of a margin came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CostBasis {
    /// Tier cost recorded on the catalog entry.
    Recorded,
    /// Heuristic share of revenue; display as an estimate.
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MarginEstimate {
    pub revenue: Money,
    pub cost: Money,
    pub profit: Money,
    pub basis: CostBasis,
}

impl MarginEstimate {
    /// Margin for `unit_qty` units sold for `revenue` in total.
    pub fn compute(
        revenue: Money,
        unit_qty: i64,
        unit_cost: Option<Money>,
        policy: &MarginPolicy,
    ) -> Self {
        let recorded = unit_cost.and_then(|c| c.checked_mul_qty(unit_qty));
        let (cost, basis) = match recorded {
            Some(cost) => (cost, CostBasis::Recorded),
            None => (revenue.portion_bps(policy.heuristic_cost_bps), CostBasis::Heuristic),
        };

        MarginEstimate {
            revenue,
            cost,
            profit: revenue - cost,
            basis,
        }
    }

    pub fn is_estimate(&self) -> bool {
        self.basis == CostBasis::Heuristic
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaging::PackagingConfig;
    use chrono::Utc;

    fn medicine(pricing: TierPricing) -> Medicine {
        Medicine {
            id: "panadol-500".to_string(),
            name: "Panadol 500mg".to_string(),
            packaging: PackagingConfig::new(10, 5, 2),
            pricing,
            costs: TierCosts::default(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_carton_fallback_chain() {
        let mut p = TierPricing {
            price_cents: Some(900),
            ..Default::default()
        };
        assert_eq!(p.price_for(UnitType::Carton), Some(Money::from_cents(900)));

        p.retail_price_cents = Some(1000);
        assert_eq!(p.price_for(UnitType::Carton), Some(Money::from_cents(1000)));

        p.wholesale_price_cents = Some(1800);
        assert_eq!(p.price_for(UnitType::Carton), Some(Money::from_cents(1800)));

        p.carton_price_cents = Some(1900);
        assert_eq!(p.price_for(UnitType::Carton), Some(Money::from_cents(1900)));
    }

    #[test]
    fn test_zero_price_falls_through() {
        let p = TierPricing {
            carton_price_cents: Some(0),
            wholesale_price_cents: None,
            retail_price_cents: Some(0),
            price_cents: Some(750),
            ..Default::default()
        };
        assert_eq!(p.price_for(UnitType::Carton), Some(Money::from_cents(750)));
        assert_eq!(p.price_for(UnitType::Pack), Some(Money::from_cents(750)));
    }

    #[test]
    fn test_blister_and_tablet_have_no_fallback() {
        let p = TierPricing {
            retail_price_cents: Some(1000),
            ..Default::default()
        };
        assert_eq!(p.price_for(UnitType::Blister), None);
        assert_eq!(p.price_for(UnitType::Tablet), None);
    }

    #[test]
    fn test_sellable_units() {
        let m = medicine(TierPricing {
            retail_price_cents: Some(1000),
            tablet_price_cents: Some(25),
            ..Default::default()
        });
        let units: Vec<UnitType> = sellable_units(&m).into_iter().collect();
        assert_eq!(units, vec![UnitType::Tablet, UnitType::Pack, UnitType::Carton]);
    }

    #[test]
    fn test_resolve_unsellable_tier() {
        let m = medicine(TierPricing::default());
        assert_eq!(
            resolve(&m, UnitType::Blister),
            Err(CoreError::PriceUnavailable {
                medicine_id: "panadol-500".to_string(),
                unit: UnitType::Blister,
            })
        );
    }

    #[test]
    fn test_margin_uses_recorded_cost() {
        let m = MarginEstimate::compute(
            Money::from_cents(3000),
            3,
            Some(Money::from_cents(600)),
            &MarginPolicy::default(),
        );
        assert_eq!(m.cost.cents(), 1800);
        assert_eq!(m.profit.cents(), 1200);
        assert!(!m.is_estimate());
    }

    #[test]
    fn test_margin_heuristic_without_cost() {
        let m = MarginEstimate::compute(Money::from_cents(3000), 3, None, &MarginPolicy::default());
        assert_eq!(m.cost.cents(), 2100);
        assert_eq!(m.profit.cents(), 900);
        assert!(m.is_estimate());
    }

    #[test]
    fn test_non_positive_cost_counts_as_unset() {
        let costs = TierCosts {
            pack_cost_cents: Some(0),
            ..Default::default()
        };
        assert_eq!(costs.cost_for(UnitType::Pack), None);
    }
}
