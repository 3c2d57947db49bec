//! # Error Types
//!
//! Domain-specific error types for soko-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  soko-core errors (this file)                                          │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  soko-db errors                                                        │
//! │  └── DbError          - Record store failures                          │
//! │                                                                         │
//! │  soko-checkout errors                                                  │
//! │  ├── GatewayError     - Mobile-money gateway failures                  │
//! │  └── CheckoutError    - What the operator-facing layer sees            │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → CheckoutError → Operator          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (SKU, ID, amounts)
//! 3. A rejected operation leaves cart and payment state unchanged

use thiserror::Error;

use crate::money::Money;
use crate::payment::PaymentState;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// Every variant except `InvalidPaymentTransition` is a precondition error:
/// the operation was refused and nothing changed.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Scanned or selected product is unknown to the catalog.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Product has no stock at all.
    ///
    /// ## User Workflow
    /// ```text
    /// Scan "SODA-500" (available: 0)
    ///      │
    ///      ▼
    /// OutOfStock { sku: "SODA-500" }
    ///      │
    ///      ▼
    /// UI shows: "SODA-500 is out of stock"
    /// ```
    #[error("{sku} is out of stock")]
    OutOfStock { sku: String },

    /// Requested quantity exceeds stock on hand.
    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// Product is not in the cart.
    #[error("Product {0} is not in the cart")]
    LineNotFound(String),

    /// Cart has exceeded maximum allowed lines.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Item quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Checkout attempted with nothing in the cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// Cash handed over does not cover the total.
    #[error("Insufficient cash: due {due}, received {tendered}")]
    InsufficientCash { due: Money, tendered: Money },

    /// Redemption request above what the account and cart allow.
    #[error("Cannot redeem {requested} points, maximum is {max}")]
    RedemptionExceedsAvailable { requested: i64, max: i64 },

    /// Payment attempt is not in a state that allows the operation.
    #[error("Payment attempt {attempt_id} is {state}, cannot {action}")]
    InvalidPaymentTransition {
        attempt_id: String,
        state: PaymentState,
        action: &'static str,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true when the operator can fix the input and try again.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, CoreError::InvalidPaymentTransition { .. })
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
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

    /// Invalid format (e.g., invalid phone number).
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
            sku: "SODA-500".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for SODA-500: available 3, requested 5"
        );

        let err = CoreError::InsufficientCash {
            due: Money::from_major(1160),
            tendered: Money::from_major(1000),
        };
        assert_eq!(err.to_string(), "Insufficient cash: due 1,160.00, received 1,000.00");
    }

    #[test]
    fn test_transition_error_is_not_precondition() {
        let err = CoreError::InvalidPaymentTransition {
            attempt_id: "a-1".into(),
            state: PaymentState::Success,
            action: "poll",
        };
        assert!(!err.is_precondition());
        assert_eq!(err.to_string(), "Payment attempt a-1 is success, cannot poll");
        assert!(CoreError::EmptyCart.is_precondition());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "phone".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
