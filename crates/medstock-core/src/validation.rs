//! # Validation Module
//!
//! Input checks run before any cart mutation or ledger write.
//!
//! ## Usage
//! ```rust
//! use medstock_core::validation::{validate_medicine_id, validate_unit_quantity};
//!
//! validate_medicine_id("panadol-500").unwrap();
//! validate_unit_quantity(5).unwrap();
//! assert!(validate_unit_quantity(0).is_err());
//! ```

use crate::error::ValidationError;
use crate::{MAX_CART_LINES, MAX_UNIT_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest free-text note accepted on an adjustment or return.
pub const MAX_NOTE_LEN: usize = 500;

// =============================================================================
// Identifiers & Text
// =============================================================================

/// Validates a catalog medicine identifier.
///
/// ## Rules
/// - Must not be blank
/// - At most 64 characters
/// - No whitespace (ids are keys, not names)
pub fn validate_medicine_id(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "medicine_id".to_string(),
        });
    }

    if id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "medicine_id".to_string(),
            max: 64,
        });
    }

    if id.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "medicine_id".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates an optional free-text note.
pub fn validate_note(note: Option<&str>) -> ValidationResult<()> {
    match note {
        Some(n) if n.len() > MAX_NOTE_LEN => Err(ValidationError::TooLong {
            field: "note".to_string(),
            max: MAX_NOTE_LEN,
        }),
        _ => Ok(()),
    }
}

/// Validates a UUID string (sale, return and movement ids).
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Quantities
// =============================================================================

/// Validates a quantity in the caller's selected tier.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_UNIT_QUANTITY
pub fn validate_unit_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_UNIT_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_UNIT_QUANTITY,
        });
    }

    Ok(())
}

/// Validates that one more line fits in the cart.
pub fn validate_cart_size(current_lines: usize) -> ValidationResult<()> {
    if current_lines >= MAX_CART_LINES {
        return Err(ValidationError::OutOfRange {
            field: "cart lines".to_string(),
            min: 0,
            max: MAX_CART_LINES as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
