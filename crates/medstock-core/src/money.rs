//! # Money Module
//!
//! Integer-cent money for tier prices, line totals and margin estimates.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Tier prices are entered independently per tier (a pack is NOT         │
//! │  tablet_price × 50). Line totals are unit_qty × tier price, always in  │
//! │  whole cents, so no rounding ever happens on the sale path.            │
//! │                                                                         │
//! │  The only division is the margin heuristic (basis points), which       │
//! │  rounds half up and is flagged as an estimate.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use medstock_core::money::Money;
//!
//! let pack_price = Money::from_cents(1250); // $12.50
//! let line_total = pack_price.checked_mul_qty(3).unwrap();
//! assert_eq!(line_total.cents(), 3750);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// Signed so that refunds and negative margins are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Multiplies by a quantity, `None` on overflow.
    ///
    /// ```rust
    /// use medstock_core::money::Money;
    ///
    /// assert!(Money::from_cents(i64::MAX).checked_mul_qty(2).is_none());
    /// ```
    #[inline]
    pub const fn checked_mul_qty(&self, qty: i64) -> Option<Money> {
        match self.0.checked_mul(qty) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Returns `bps / 10000` of this amount, rounded half up.
    ///
    /// ```rust
    /// use medstock_core::money::Money;
    ///
    /// // 70% of $10.05 = $7.035 → $7.04
    /// assert_eq!(Money::from_cents(1005).portion_bps(7000).cents(), 704);
    /// ```
    pub fn portion_bps(&self, bps: u32) -> Money {
        let cents = (self.0 as i128 * bps as i128 + 5000).div_euclid(10000);
        Money(cents as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-oriented display; UI formatting is the frontend's job.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
