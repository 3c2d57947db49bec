//! # Validation Module
//!
//! Input validation for the checkout core.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Checkout UI                                                  │
//! │  └── Immediate feedback (empty fields)                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Phone normalization (shared by loyalty and mobile money)          │
//! │  └── Quantity / cart size / barcode rules                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Record stores (UNIQUE constraints, NOT NULL)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use soko_core::validation::{normalize_phone, validate_quantity};
//!
//! assert_eq!(normalize_phone("0712 345 678", "254").unwrap(), "254712345678");
//! assert!(validate_quantity(5).is_ok());
//! ```

use crate::error::ValidationError;
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Shortest accepted phone number after normalization.
const MIN_PHONE_DIGITS: usize = 10;

/// E.164 maximum.
const MAX_PHONE_DIGITS: usize = 15;

// =============================================================================
// String Validators
// =============================================================================

/// Normalizes a customer phone number for lookups and push payments.
///
/// ## Rules
/// - Spaces, dashes, dots and parentheses are stripped
/// - A leading `+` is dropped
/// - A leading `0` (local format) is replaced with `country_code`
/// - Result must be all digits, 10 to 15 long
///
/// ## Example
/// ```rust
/// use soko_core::validation::normalize_phone;
///
/// assert_eq!(normalize_phone("+254 712-345-678", "254").unwrap(), "254712345678");
/// assert_eq!(normalize_phone("0712345678", "254").unwrap(), "254712345678");
/// assert!(normalize_phone("12ab", "254").is_err());
/// ```
pub fn normalize_phone(raw: &str, country_code: &str) -> ValidationResult<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if compact.is_empty() {
        return Err(ValidationError::Required {
            field: "phone".to_string(),
        });
    }

    let digits = compact.strip_prefix('+').unwrap_or(&compact);

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: "must contain only digits".to_string(),
        });
    }

    let normalized = match digits.strip_prefix('0') {
        Some(local) => format!("{}{}", country_code, local),
        None => digits.to_string(),
    };

    if normalized.len() < MIN_PHONE_DIGITS || normalized.len() > MAX_PHONE_DIGITS {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: format!(
                "must have between {} and {} digits",
                MIN_PHONE_DIGITS, MAX_PHONE_DIGITS
            ),
        });
    }

    Ok(normalized)
}

/// Validates an optional customer display name.
///
/// Blank names become `None`.
pub fn validate_display_name(name: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if name.chars().count() > 100 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 100,
        });
    }

    Ok(Some(name.to_string()))
}

/// Validates a decoded barcode string and returns it trimmed.
pub fn validate_barcode(code: &str) -> ValidationResult<String> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "barcode".to_string(),
        });
    }

    if code.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "barcode".to_string(),
            max: 64,
        });
    }

    Ok(code.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates cash handed over at the till.
///
/// Zero is allowed (a fully discounted cart); negative is not.
pub fn validate_tendered_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "cash received".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a requested redemption amount (points).
pub fn validate_points(points: i64) -> ValidationResult<()> {
    if points < 0 {
        return Err(ValidationError::OutOfRange {
            field: "points".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a tax rate in basis points (0% to 100%).
pub fn validate_tax_rate_bps(bps: u32) -> ValidationResult<()> {
    if bps > 10000 {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: 0,
            max: 10000,
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates that one more distinct line fits in the cart.
pub fn validate_cart_size(current_items: usize) -> ValidationResult<()> {
    if current_items >= MAX_CART_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "cart items".to_string(),
            min: 0,
            max: MAX_CART_ITEMS as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_formats() {
        assert_eq!(normalize_phone("254712345678", "254").unwrap(), "254712345678");
        assert_eq!(normalize_phone("+254712345678", "254").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0712345678", "254").unwrap(), "254712345678");
        assert_eq!(normalize_phone(" (0712) 345.678 ", "254").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0712345678", "255").unwrap(), "255712345678");
    }

    #[test]
    fn test_normalize_phone_rejects_garbage() {
        assert!(matches!(
            normalize_phone("   ", "254"),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            normalize_phone("07123abc78", "254"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(normalize_phone("12345", "254").is_err());
        assert!(normalize_phone("1234567890123456", "254").is_err());
        assert!(normalize_phone("++254712345678", "254").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert_eq!(validate_display_name(None).unwrap(), None);
        assert_eq!(validate_display_name(Some("  ")).unwrap(), None);
        assert_eq!(
            validate_display_name(Some(" Wanjiku ")).unwrap(),
            Some("Wanjiku".to_string())
        );
        assert!(validate_display_name(Some(&"A".repeat(101))).is_err());
    }

    #[test]
    fn test_validate_barcode() {
        assert_eq!(validate_barcode(" 5901234123457\n").unwrap(), "5901234123457");
        assert!(validate_barcode("").is_err());
        assert!(validate_barcode(&"9".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_tendered_and_points() {
        assert!(validate_tendered_cents(0).is_ok());
        assert!(validate_tendered_cents(-1).is_err());
        assert!(validate_points(0).is_ok());
        assert!(validate_points(-5).is_err());
    }

    #[test]
    fn test_validate_tax_rate_bps() {
        assert!(validate_tax_rate_bps(0).is_ok());
        assert!(validate_tax_rate_bps(1600).is_ok());
        assert!(validate_tax_rate_bps(10001).is_err());
    }

    #[test]
    fn test_validate_cart_size() {
        assert!(validate_cart_size(0).is_ok());
        assert!(validate_cart_size(MAX_CART_ITEMS - 1).is_ok());
        assert!(validate_cart_size(MAX_CART_ITEMS).is_err());
    }
}
