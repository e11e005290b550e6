//! # Domain Types
//!
//! Core domain types shared by every module of the ledger engine.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Medicine     │   │    UnitType     │   │   LedgerUnit    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id, name       │   │  Tablet         │   │  (UnitType)     │       │
//! │  │  packaging      │   │  Blister        │   │  Adjustment     │       │
//! │  │  pricing, costs │   │  Pack, Carton   │   │                 │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ MovementReason  │   │  RefType/Ref    │   │   SaleStatus    │       │
//! │  │  Sale, Return   │   │  Sale, Return   │   │  Draft, Posted  │       │
//! │  │  Adjustment     │   │  Adjustment     │   │  Returned, Void │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::packaging::{PackagingConfig, PackagingFactors};
use crate::pricing::{TierCosts, TierPricing};

// =============================================================================
// Unit Type
// =============================================================================

/// One packaging tier a medicine can be sold in.
///
/// Ordered from the base unit upwards, so a `BTreeSet<UnitType>` iterates
/// tablet → carton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// The base unit. All ledger quantities are tablets.
    Tablet,
    Blister,
    Pack,
    Carton,
}

impl UnitType {
    /// All tiers, base unit first.
    pub const ALL: [UnitType; 4] = [
        UnitType::Tablet,
        UnitType::Blister,
        UnitType::Pack,
        UnitType::Carton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Tablet => "tablet",
            UnitType::Blister => "blister",
            UnitType::Pack => "pack",
            UnitType::Carton => "carton",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tablet" | "tab" | "unit" => Ok(UnitType::Tablet),
            "blister" | "strip" => Ok(UnitType::Blister),
            "pack" | "box" => Ok(UnitType::Pack),
            "carton" => Ok(UnitType::Carton),
            other => Err(ValidationError::InvalidFormat {
                field: "unit".to_string(),
                reason: format!("unknown unit '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Ledger Unit
// =============================================================================

/// The unit recorded on a movement entry for audit display.
///
/// Sales and returns carry the tier the caller used; manual corrections are
/// always expressed in base units and tagged `Adjustment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LedgerUnit {
    Tablet,
    Blister,
    Pack,
    Carton,
    Adjustment,
}

impl From<UnitType> for LedgerUnit {
    fn from(unit: UnitType) -> Self {
        match unit {
            UnitType::Tablet => LedgerUnit::Tablet,
            UnitType::Blister => LedgerUnit::Blister,
            UnitType::Pack => LedgerUnit::Pack,
            UnitType::Carton => LedgerUnit::Carton,
        }
    }
}

impl fmt::Display for LedgerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerUnit::Tablet => f.write_str("tablet"),
            LedgerUnit::Blister => f.write_str("blister"),
            LedgerUnit::Pack => f.write_str("pack"),
            LedgerUnit::Carton => f.write_str("carton"),
            LedgerUnit::Adjustment => f.write_str("adjustment"),
        }
    }
}

// =============================================================================
// Movement Reason & References
// =============================================================================

/// Why a ledger entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    Sale,
    Return,
    Adjustment,
}

impl fmt::Display for MovementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MovementReason::Sale => f.write_str("sale"),
            MovementReason::Return => f.write_str("return"),
            MovementReason::Adjustment => f.write_str("adjustment"),
        }
    }
}

/// The kind of business document a ledger entry links back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Sale,
    Return,
    Adjustment,
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefType::Sale => f.write_str("sale"),
            RefType::Return => f.write_str("return"),
            RefType::Adjustment => f.write_str("adjustment"),
        }
    }
}

/// Link from a ledger entry to the document that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerRef {
    pub ref_type: RefType,
    pub ref_id: String,
}

impl LedgerRef {
    pub fn new(ref_type: RefType, ref_id: impl Into<String>) -> Self {
        LedgerRef {
            ref_type,
            ref_id: ref_id.into(),
        }
    }

    pub fn sale(id: impl Into<String>) -> Self {
        LedgerRef::new(RefType::Sale, id)
    }

    pub fn sale_return(id: impl Into<String>) -> Self {
        LedgerRef::new(RefType::Return, id)
    }

    pub fn adjustment(id: impl Into<String>) -> Self {
        LedgerRef::new(RefType::Adjustment, id)
    }
}

impl fmt::Display for LedgerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ref_type, self.ref_id)
    }
}

// =============================================================================
// Sale Status
// =============================================================================

/// The lifecycle state of a sale.
///
/// ```text
///   Draft ──post──► Posted ──return──► Returned ──return (partial)──┐
///     │                                    ▲                        │
///     └──void──► Void                      └────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Lines may be edited; nothing has touched the ledger.
    #[default]
    Draft,
    /// Lines have been applied to the ledger.
    Posted,
    /// At least one return has been recorded against the sale.
    Returned,
    /// Abandoned draft. Terminal.
    Void,
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaleStatus::Draft => f.write_str("draft"),
            SaleStatus::Posted => f.write_str("posted"),
            SaleStatus::Returned => f.write_str("returned"),
            SaleStatus::Void => f.write_str("void"),
        }
    }
}

// =============================================================================
// Stock Policy
// =============================================================================

/// Whether balances may go below zero.
///
/// Applies to every ledger write: sales, returns, reversals and
/// adjustments alike. Default forbids backorders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockPolicy {
    #[serde(default)]
    pub allow_backorders: bool,
}

impl StockPolicy {
    pub const fn forbid_backorders() -> Self {
        StockPolicy {
            allow_backorders: false,
        }
    }

    pub const fn allow_backorders() -> Self {
        StockPolicy {
            allow_backorders: true,
        }
    }

    /// True if `balance` is an acceptable resulting balance.
    #[inline]
    pub const fn permits(&self, balance: i64) -> bool {
        self.allow_backorders || balance >= 0
    }
}

// =============================================================================
// Medicine
// =============================================================================

/// A catalog entry as consumed (read-only) by the ledger engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Medicine {
    pub id: String,

    /// Display name shown on receipts and stock screens.
    pub name: String,

    /// Raw tier sizes as stored by catalog maintenance.
    pub packaging: PackagingConfig,

    /// Per-tier sale price fields.
    pub pricing: TierPricing,

    /// Optional per-tier purchase cost.
    #[serde(default)]
    pub costs: TierCosts,

    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Medicine {
    /// Validated conversion factors for this medicine.
    pub fn factors(&self) -> CoreResult<PackagingFactors> {
        self.packaging.factors()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_type_parsing() {
        assert_eq!("pack".parse::<UnitType>().unwrap(), UnitType::Pack);
        assert_eq!(" Carton ".parse::<UnitType>().unwrap(), UnitType::Carton);
        assert_eq!("strip".parse::<UnitType>().unwrap(), UnitType::Blister);
        assert!("bottle".parse::<UnitType>().is_err());
    }

    #[test]
    fn test_unit_type_order_is_base_first() {
        let mut units = UnitType::ALL.to_vec();
        units.reverse();
        units.sort();
        assert_eq!(units, UnitType::ALL.to_vec());
    }

    #[test]
    fn test_ledger_unit_from_unit_type() {
        assert_eq!(LedgerUnit::from(UnitType::Blister), LedgerUnit::Blister);
        assert_eq!(LedgerUnit::Adjustment.to_string(), "adjustment");
    }

    #[test]
    fn test_sale_status_default() {
        assert_eq!(SaleStatus::default(), SaleStatus::Draft);
    }

    #[test]
    fn test_stock_policy() {
        let strict = StockPolicy::default();
        assert!(strict.permits(0));
        assert!(!strict.permits(-1));
        assert!(StockPolicy::allow_backorders().permits(-50));
    }

    #[test]
    fn test_ledger_ref_display() {
        assert_eq!(LedgerRef::sale("s-1").to_string(), "sale:s-1");
    }
}
