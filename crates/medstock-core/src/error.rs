//! # Error Types
//!
//! Domain-specific error types for medstock-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  medstock-core errors (this file)                                      │
//! │  ├── CoreError        - Packaging, pricing, cart, sale, ledger rules   │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  medstock-db errors (separate crate)                                   │
//! │  └── DbError          - Database failures, wraps CoreError             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant except [`CoreError::LedgerInconsistency`] is a recoverable,
//! request-scoped failure: the cart or sale stays in its prior valid state.

use thiserror::Error;

use crate::types::{SaleStatus, UnitType};

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A packaging factor is not a positive integer.
    ///
    /// ## When This Occurs
    /// - Catalog record has `tablets_per_blister = 0`
    /// - Factor is negative, fractional, or not a number
    /// - Derived factor overflows `i64`
    ///
    /// Never clamped to 1.
    #[error("Invalid packaging config: {field} {reason}")]
    InvalidPackagingConfig { field: String, reason: String },

    /// The selected tier has no resolvable positive price.
    #[error("No price available for {medicine_id} sold by {unit}")]
    PriceUnavailable { medicine_id: String, unit: UnitType },

    /// The catalog entry is deactivated and cannot be sold.
    #[error("{medicine_id} is inactive")]
    MedicineInactive { medicine_id: String },

    /// Applying a batch would drive a balance below zero under the
    /// no-backorder policy.
    ///
    /// ## User Workflow
    /// ```text
    /// Post sale (1 carton = 100 tablets)
    ///      │
    ///      ▼
    /// Balance: 60 tablets
    ///      │
    ///      ▼
    /// InsufficientStock { medicine_id, available: 60, requested: 100 }
    ///      │
    ///      ▼
    /// Nothing written, sale stays draft
    /// ```
    #[error("Insufficient stock for {medicine_id}: available {available}, requested {requested}")]
    InsufficientStock {
        medicine_id: String,
        available: i64,
        requested: i64,
    },

    /// A second unit type was selected for a medicine already in the cart.
    #[error("{medicine_id} is already in the cart by {existing}, cannot add by {requested}")]
    MixedUnit {
        medicine_id: String,
        existing: UnitType,
        requested: UnitType,
    },

    /// Stored balance and journal disagree. Fatal for the medicine until
    /// manually reconciled.
    #[error("Ledger inconsistency for {medicine_id}: ledger says {ledger_balance}, balance says {stored_balance}")]
    LedgerInconsistency {
        medicine_id: String,
        ledger_balance: i64,
        stored_balance: i64,
    },

    /// No cart or sale line for the medicine.
    #[error("{medicine_id} is not in the cart")]
    LineNotFound { medicine_id: String },

    /// Sale is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Editing or posting a sale that is no longer a draft
    /// - Returning a draft or void sale
    /// - Voiding a posted sale (return it first)
    #[error("Sale {sale_id} is {current_status}, cannot {operation}")]
    InvalidSaleStatus {
        sale_id: String,
        current_status: SaleStatus,
        operation: String,
    },

    /// Return quantity exceeds what remains unreturned on the line.
    #[error("Cannot return {requested} of {medicine_id}: only {returnable} returnable")]
    OverReturn {
        medicine_id: String,
        returnable: i64,
        requested: i64,
    },

    /// A sale or return with no lines.
    #[error("{0} has no lines")]
    EmptySale(String),

    /// Ledger entries must change the balance.
    #[error("Movement for {medicine_id} has zero quantity")]
    ZeroMovement { medicine_id: String },

    /// Quantity arithmetic left the `i64` range.
    #[error("Quantity overflow while computing {0}")]
    QuantityOverflow(String),

    /// Cart has exceeded maximum allowed lines.
    #[error("Cart cannot have more than {max} lines")]
    CartTooLarge { max: usize },

    /// Line quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// True for failures that must block further writes to a medicine.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::LedgerInconsistency { .. })
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, unknown unit name).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            medicine_id: "amoxil-500".to_string(),
            available: 100,
            requested: 300,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for amoxil-500: available 100, requested 300"
        );

        let err = CoreError::MixedUnit {
            medicine_id: "amoxil-500".to_string(),
            existing: UnitType::Pack,
            requested: UnitType::Tablet,
        };
        assert_eq!(
            err.to_string(),
            "amoxil-500 is already in the cart by pack, cannot add by tablet"
        );
    }

    #[test]
    fn test_only_inconsistency_is_fatal() {
        let fatal = CoreError::LedgerInconsistency {
            medicine_id: "m".to_string(),
            ledger_balance: 10,
            stored_balance: 12,
        };
        assert!(fatal.is_fatal());
        assert!(!CoreError::EmptySale("sale".to_string()).is_fatal());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "medicine_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
