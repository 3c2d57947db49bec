//! # Checkout Error Types
//!
//! Error types for the checkout orchestration layer.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Checkout Error Categories                          │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Precondition   │  │    Gateway      │  │       Store             │ │
//! │  │  (state kept)   │  │                 │  │                         │ │
//! │  │  Core(..)       │  │  Rejected       │  │  NotFound               │ │
//! │  │  CheckoutIn-    │  │  Transport      │  │  Unavailable            │ │
//! │  │   Progress      │  │  Timeout        │  │  Rejected               │ │
//! │  │  PhoneRequired  │  │  InvalidResponse│  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │  Configuration  │  │    Internal     │                              │
//! │  │  InvalidConfig  │  │  PollerStopped  │                              │
//! │  │  InvalidUrl     │  │  WorkerStopped  │                              │
//! │  │                 │  │  SessionClosed  │                              │
//! │  │  ConfigLoad/Save│  │  Serialization  │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Precondition errors are returned synchronously and leave the session
//! untouched. Gateway and store errors classify themselves with
//! `is_retryable` so the poller and the reconciliation worker can decide
//! what to do without matching on variants.

use thiserror::Error;

use soko_core::CoreError;
use soko_db::DbError;

/// Result type alias for checkout operations.
pub type CheckoutResult<T> = Result<T, CheckoutError>;

/// Result type alias for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type alias for record store calls.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Gateway Errors
// =============================================================================

/// Failure talking to the mobile-money gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The gateway answered with a non-success status.
    #[error("Gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Network failure before a response arrived.
    #[error("Gateway unreachable: {0}")]
    Transport(String),

    /// The request exceeded the configured timeout.
    #[error("Gateway request timed out")]
    Timeout,

    /// The response body could not be understood.
    #[error("Unexpected gateway response: {0}")]
    InvalidResponse(String),

    /// The gateway client is misconfigured (bad base URL).
    #[error("Gateway misconfigured: {0}")]
    InvalidConfig(String),
}

impl GatewayError {
    /// Network trouble, timeouts, throttling and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) | GatewayError::Timeout => true,
            GatewayError::Rejected { status, .. } => *status == 429 || *status >= 500,
            GatewayError::InvalidResponse(_) | GatewayError::InvalidConfig(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidConfig(err.to_string())
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Failure in one of the external record stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The store could not be reached or was busy.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write.
    #[error("Store rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => StoreError::NotFound { entity, id },
            other if other.is_retryable() => StoreError::Unavailable(other.to_string()),
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

// =============================================================================
// Checkout Errors
// =============================================================================

/// Error type for checkout session and service operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    // =========================================================================
    // Preconditions
    // =========================================================================
    /// Business rule rejection from the core (stock, cash, redemption, ...).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A mobile-money payment is pending; the cart is frozen.
    #[error("A payment is already in progress")]
    CheckoutInProgress,

    /// The operation needs a pending payment and there is none.
    #[error("No payment is in progress")]
    NoPaymentInProgress,

    /// Mobile money needs a phone to push the prompt to.
    #[error("Mobile money requires the customer's phone number")]
    PhoneRequired,

    /// No loyalty account is attached to the session.
    #[error("No loyalty account attached")]
    NoLoyaltyAccount,

    /// No gateway is configured on this till.
    #[error("Mobile money is not configured on this till")]
    GatewayNotConfigured,

    // =========================================================================
    // Collaborators
    // =========================================================================
    /// Mobile-money gateway failure.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Record store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // =========================================================================
    // Configuration
    // =========================================================================
    /// Invalid checkout configuration.
    #[error("Invalid checkout configuration: {0}")]
    InvalidConfig(String),

    /// Invalid gateway URL.
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal
    // =========================================================================
    /// The payment poller task is gone.
    #[error("Payment poller has stopped")]
    PollerStopped,

    /// The reconciliation worker task is gone.
    #[error("Reconciliation worker has stopped")]
    WorkerStopped,

    /// The session was closed.
    #[error("Checkout session is closed")]
    SessionClosed,

    /// Journal payload could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<soko_core::ValidationError> for CheckoutError {
    fn from(err: soko_core::ValidationError) -> Self {
        CheckoutError::Core(CoreError::Validation(err))
    }
}

impl From<DbError> for CheckoutError {
    fn from(err: DbError) -> Self {
        CheckoutError::Store(err.into())
    }
}

impl From<serde_json::Error> for CheckoutError {
    fn from(err: serde_json::Error) -> Self {
        CheckoutError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for CheckoutError {
    fn from(err: url::ParseError) -> Self {
        CheckoutError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for CheckoutError {
    fn from(err: std::io::Error) -> Self {
        CheckoutError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for CheckoutError {
    fn from(err: toml::de::Error) -> Self {
        CheckoutError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for CheckoutError {
    fn from(err: toml::ser::Error) -> Self {
        CheckoutError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl CheckoutError {
    /// The request was refused and nothing changed.
    pub fn is_precondition(&self) -> bool {
        match self {
            CheckoutError::Core(e) => e.is_precondition(),
            CheckoutError::CheckoutInProgress
            | CheckoutError::NoPaymentInProgress
            | CheckoutError::PhoneRequired
            | CheckoutError::NoLoyaltyAccount
            | CheckoutError::GatewayNotConfigured => true,
            _ => false,
        }
    }

    /// Returns true if the operation can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            CheckoutError::Gateway(e) => e.is_retryable(),
            CheckoutError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CheckoutError::InvalidConfig(_)
                | CheckoutError::InvalidUrl(_)
                | CheckoutError::ConfigLoadFailed(_)
                | CheckoutError::ConfigSaveFailed(_)
                | CheckoutError::GatewayNotConfigured
        )
    }
}
