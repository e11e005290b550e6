//! # Packaging Hierarchy & Unit Conversion
//!
//! Medicines are sold in a packaging hierarchy. Every quantity that reaches
//! the ledger is converted to the base unit (tablet) first.
//!
//! ## Conversion Factors
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  tablets_per_blister = 10   blisters_per_pack = 5   packs_per_carton = 2│
//! │                                                                         │
//! │  per_blister = 10                                                       │
//! │  per_pack    = 5 × 10  = 50                                             │
//! │  per_carton  = 2 × 50  = 100                                            │
//! │                                                                         │
//! │  to_base(1, Pack)      = 50          (multiply)                         │
//! │  from_base(237, Pack)  = 4           (floor divide, remainder dropped)  │
//! │  from_base(237, Carton)= 2                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tier quantities are independent floors of the same base balance, not a
//! decomposition into exclusive remainders: 237 tablets shows as
//! `{tablet: 237, blister: 23, pack: 4, carton: 2}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::UnitType;

// =============================================================================
// Packaging Config
// =============================================================================

/// Raw tier sizes as stored on the catalog entry.
///
/// Values are not trusted until [`PackagingConfig::factors`] validates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PackagingConfig {
    #[serde(default = "one")]
    pub tablets_per_blister: i64,
    #[serde(default = "one")]
    pub blisters_per_pack: i64,
    #[serde(default = "one")]
    pub packs_per_carton: i64,
}

fn one() -> i64 {
    1
}

impl Default for PackagingConfig {
    fn default() -> Self {
        PackagingConfig {
            tablets_per_blister: 1,
            blisters_per_pack: 1,
            packs_per_carton: 1,
        }
    }
}

impl PackagingConfig {
    pub const fn new(tablets_per_blister: i64, blisters_per_pack: i64, packs_per_carton: i64) -> Self {
        PackagingConfig {
            tablets_per_blister,
            blisters_per_pack,
            packs_per_carton,
        }
    }

    /// Parses tier sizes out of a raw catalog record.
    ///
    /// An absent or `null` field takes the default of 1. Anything present must
    /// be a positive integer: `0`, `-3`, `2.5` and `"ten"` are all rejected.
    ///
    /// ## Example
    /// ```rust
    /// use medstock_core::packaging::PackagingConfig;
    /// use serde_json::json;
    ///
    /// let config = PackagingConfig::from_catalog_json(&json!({
    ///     "tablets_per_blister": 10,
    ///     "blisters_per_pack": 5,
    /// }))
    /// .unwrap();
    /// assert_eq!(config.packs_per_carton, 1);
    ///
    /// assert!(PackagingConfig::from_catalog_json(&json!({ "blisters_per_pack": 2.5 })).is_err());
    /// ```
    pub fn from_catalog_json(record: &Value) -> CoreResult<Self> {
        let config = PackagingConfig {
            tablets_per_blister: catalog_factor(record, "tablets_per_blister")?,
            blisters_per_pack: catalog_factor(record, "blisters_per_pack")?,
            packs_per_carton: catalog_factor(record, "packs_per_carton")?,
        };
        config.factors()?;
        Ok(config)
    }

    /// Validates the raw sizes and derives cumulative conversion factors.
    pub fn factors(&self) -> CoreResult<PackagingFactors> {
        factors_for(self)
    }
}

fn catalog_factor(record: &Value, field: &str) -> CoreResult<i64> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(1),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) => Ok(v),
            None => Err(invalid(field, format!("must be an integer, got {}", n))),
        },
        Some(other) => Err(invalid(field, format!("must be an integer, got {}", other))),
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidPackagingConfig {
        field: field.to_string(),
        reason: reason.into(),
    }
}

// =============================================================================
// Packaging Factors
// =============================================================================

/// Number of base units in one unit of each tier.
///
/// Only constructible through [`factors_for`], so every value satisfies
/// `1 ≤ per_blister ≤ per_pack ≤ per_carton`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct PackagingFactors {
    per_blister: i64,
    per_pack: i64,
    per_carton: i64,
}

/// Derives conversion factors, rejecting any size that is not a positive integer.
pub fn factors_for(config: &PackagingConfig) -> CoreResult<PackagingFactors> {
    let checks = [
        ("tablets_per_blister", config.tablets_per_blister),
        ("blisters_per_pack", config.blisters_per_pack),
        ("packs_per_carton", config.packs_per_carton),
    ];
    for (field, value) in checks {
        if value < 1 {
            return Err(invalid(field, format!("must be a positive integer, got {}", value)));
        }
    }

    let per_blister = config.tablets_per_blister;
    let per_pack = config
        .blisters_per_pack
        .checked_mul(per_blister)
        .ok_or_else(|| invalid("blisters_per_pack", "overflows tablets per pack"))?;
    let per_carton = config
        .packs_per_carton
        .checked_mul(per_pack)
        .ok_or_else(|| invalid("packs_per_carton", "overflows tablets per carton"))?;

    Ok(PackagingFactors {
        per_blister,
        per_pack,
        per_carton,
    })
}

impl PackagingFactors {
    #[inline]
    pub const fn per_blister(&self) -> i64 {
        self.per_blister
    }

    #[inline]
    pub const fn per_pack(&self) -> i64 {
        self.per_pack
    }

    #[inline]
    pub const fn per_carton(&self) -> i64 {
        self.per_carton
    }

    /// Base units in one unit of `unit`.
    #[inline]
    pub const fn factor(&self, unit: UnitType) -> i64 {
        match unit {
            UnitType::Tablet => 1,
            UnitType::Blister => self.per_blister,
            UnitType::Pack => self.per_pack,
            UnitType::Carton => self.per_carton,
        }
    }
}

// =============================================================================
// Unit Converter
// =============================================================================

/// Converts `qty` units of `unit` to base units.
pub fn to_base(qty: i64, unit: UnitType, factors: &PackagingFactors) -> CoreResult<i64> {
    qty.checked_mul(factors.factor(unit))
        .ok_or_else(|| CoreError::QuantityOverflow(format!("{} {} in tablets", qty, unit)))
}

/// Converts a base quantity to whole units of `unit`, flooring.
///
/// Floors toward negative infinity, so a backordered `-1` tablet reads as
/// `-1` blister rather than `0`.
#[inline]
pub fn from_base(base_qty: i64, unit: UnitType, factors: &PackagingFactors) -> i64 {
    base_qty.div_euclid(factors.factor(unit))
}

// =============================================================================
// Tier Quantities
// =============================================================================

/// Display view of a base balance in every tier. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TierQuantities {
    pub tablet: i64,
    pub blister: i64,
    pub pack: i64,
    pub carton: i64,
}

impl TierQuantities {
    pub fn from_base(base_qty: i64, factors: &PackagingFactors) -> Self {
        TierQuantities {
            tablet: from_base(base_qty, UnitType::Tablet, factors),
            blister: from_base(base_qty, UnitType::Blister, factors),
            pack: from_base(base_qty, UnitType::Pack, factors),
            carton: from_base(base_qty, UnitType::Carton, factors),
        }
    }

    pub fn get(&self, unit: UnitType) -> i64 {
        match unit {
            UnitType::Tablet => self.tablet,
            UnitType::Blister => self.blister,
            UnitType::Pack => self.pack,
            UnitType::Carton => self.carton,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
