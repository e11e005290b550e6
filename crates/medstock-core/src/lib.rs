//! # medstock-core: Pure Inventory & Sales Logic for MedStock
//!
//! Packaging tiers, unit conversion, price resolution, cart lines, the sale
//! state machine and ledger arithmetic. Everything here is deterministic
//! and free of I/O; `medstock-db` supplies storage, locking and transactions.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       MedStock Ledger Engine                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │        Catalog / Cart UI / Sales workflow (external callers)    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ medstock-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   packaging ──► pricing ──► cart ──► sale ──► ledger            │   │
//! │  │   (factors,     (tier       (lines,  (draft/   (postings,       │   │
//! │  │    to/from       fallback,   merge)   posted/   running         │   │
//! │  │    base)         sellable)            returned) balances)       │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO LOCKS • INTEGER ARITHMETIC          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  medstock-db (Database Layer)                   │   │
//! │  │     stock_balance + movements, per-medicine locks, sales        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`packaging`] - Tier sizes, conversion factors, tier quantities
//! - [`pricing`] - Fallback price chain, sellable tiers, margins
//! - [`cart`] - The shared cart line computer
//! - [`sale`] - Sale lifecycle and return planning
//! - [`ledger`] - Movement entries, batch planning, verification
//! - [`money`] - Integer-cent money
//! - [`types`] - Medicine, unit and status enums
//! - [`error`] - Domain error types
//! - [`validation`] - Input checks
//!
//! ## Example Usage
//!
//! ```rust
//! use medstock_core::packaging::{PackagingConfig, TierQuantities};
//!
//! let factors = PackagingConfig::new(10, 5, 2).factors().unwrap();
//! let tiers = TierQuantities::from_base(237, &factors);
//!
//! assert_eq!((tiers.tablet, tiers.blister, tiers.pack, tiers.carton), (237, 23, 4, 2));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod error;
pub mod ledger;
pub mod money;
pub mod packaging;
pub mod pricing;
pub mod sale;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::{Cart, CartLine};
pub use error::{CoreError, CoreResult, ValidationError};
pub use ledger::{MovementEntry, PlannedMovement, StockPosting, StockSnapshot};
pub use money::Money;
pub use packaging::{PackagingConfig, PackagingFactors, TierQuantities};
pub use pricing::{CostBasis, MarginEstimate, MarginPolicy, TierCosts, TierPricing};
pub use sale::{ReturnLine, ReturnRequest, Sale, SaleLine, SaleReturn};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single cart.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity of a single line, in its selected unit.
///
/// Catches keying errors such as 10000 instead of 10 cartons.
pub const MAX_UNIT_QUANTITY: i64 = 9_999;
