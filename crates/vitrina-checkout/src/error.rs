//! # Checkout Error Types
//!
//! Error types for checkout operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Checkout Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Validation    │  │     Network     │  │      Gateway Flow       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidAmount  │  │  Network        │  │  MissingDevice          │ │
//! │  │  ExceedsBalance │  │  Server         │  │  GatewayInitiationFailed│ │
//! │  │  Immutable      │  │  Decode         │  │  GatewayRejected        │ │
//! │  │  NothingToSubmit│  │                 │  │  PollingTimeout         │ │
//! │  └─────────────────┘  └─────────────────┘  │  FlowAlreadyActive      │ │
//! │                                             └─────────────────────────┘ │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Session     │  │      Authorization      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  SessionClosed  │  │  Denied                 │ │
//! │  │  ConfigLoad…    │  │  SubmitInFlight │  │  InvalidPin             │ │
//! │  │  ConfigSave…    │  │  SaleNotFound   │  │  NoSupervisors          │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//! - Validation errors are surfaced immediately, never retried
//! - `Network` on submit keeps the local entries for a manual retry
//! - `GatewayRejected` / `PollingTimeout` end the flow; the engine never
//!   restarts a gateway flow on its own

use thiserror::Error;

use vitrina_core::{LedgerError, Money, ValidationError};

/// Result type alias for checkout operations.
pub type CheckoutResult<T> = Result<T, CheckoutError>;

// =============================================================================
// Authorization Error
// =============================================================================

/// Failures of the supervisor PIN challenge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// PIN did not match, or the token is for another action.
    #[error("Authorization denied")]
    Denied,

    /// PIN is empty, non-numeric or too long.
    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    /// The user service lists no administrators.
    #[error("No supervisors are configured")]
    NoSupervisors,
}

// =============================================================================
// Checkout Error
// =============================================================================

/// Checkout error type covering all engine failures.
#[derive(Debug, Error)]
pub enum CheckoutError {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Amount missing, non-numeric or not positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount exceeds the remaining balance.
    #[error("Amount {amount} exceeds remaining balance {remaining}")]
    ExceedsBalance { amount: Money, remaining: Money },

    /// Attempt to remove a REMOTE or already-submitted contribution.
    #[error("Payment #{index} is already recorded and cannot be removed")]
    Immutable { index: usize },

    /// No contribution at the requested position.
    #[error("No payment at position {index}")]
    EntryNotFound { index: usize },

    /// Nothing to submit while a balance is still due.
    #[error("No payments to submit; {remaining} is still due")]
    NothingToSubmit { remaining: Money },

    /// Terminal flow requested without a device.
    #[error("Select a terminal device first")]
    MissingDevice,

    /// Input rejected before reaching any rule (DNI, sale id).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // Gateway Flow Errors
    // =========================================================================
    /// The gateway refused to start the flow.
    #[error("Could not start gateway payment: {0}")]
    GatewayInitiationFailed(String),

    /// The gateway reported the attempt as rejected.
    #[error("Gateway payment of {amount} was rejected")]
    GatewayRejected { amount: Money },

    /// No terminal response within the polling ceiling.
    #[error("No gateway response after {after_secs} seconds; the outcome is unknown")]
    PollingTimeout { after_secs: u64 },

    /// A gateway flow is already in progress for this sale.
    #[error("A gateway payment is already in progress")]
    FlowAlreadyActive,

    /// No gateway flow to wait on.
    #[error("No gateway payment in progress")]
    NoActiveFlow,

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// A manual batch is already being submitted.
    #[error("Payments are already being submitted")]
    SubmitInFlight,

    /// The sales service has no matching sale.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// The session was closed; late results are discarded.
    #[error("Checkout session is closed")]
    SessionClosed,

    // =========================================================================
    // Network Errors
    // =========================================================================
    /// Transport failure or request timeout (transient).
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with an error status or `success: false`.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid checkout configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Authorization
    // =========================================================================
    #[error(transparent)]
    Auth(#[from] AuthError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<LedgerError> for CheckoutError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount { reason } => CheckoutError::InvalidAmount(reason),
            LedgerError::ExceedsBalance { amount, remaining } => {
                CheckoutError::ExceedsBalance { amount, remaining }
            }
            LedgerError::Immutable { index } => CheckoutError::Immutable { index },
            LedgerError::EntryNotFound { index } => CheckoutError::EntryNotFound { index },
        }
    }
}

impl From<ValidationError> for CheckoutError {
    fn from(err: ValidationError) -> Self {
        CheckoutError::InvalidInput(err.to_string())
    }
}

impl From<reqwest::Error> for CheckoutError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return CheckoutError::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => CheckoutError::Server {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => CheckoutError::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CheckoutError {
    fn from(err: serde_json::Error) -> Self {
        CheckoutError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for CheckoutError {
    fn from(err: url::ParseError) -> Self {
        CheckoutError::InvalidConfig(err.to_string())
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
    /// Returns true if the same call may succeed when repeated.
    ///
    /// Only transport-level failures qualify. A rejected or timed-out gateway
    /// flow is never retryable: the user must start a new one explicitly.
    pub fn is_retryable(&self) -> bool {
        match self {
            CheckoutError::Network(_) => true,
            CheckoutError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true for input/rule violations resolved locally.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CheckoutError::InvalidAmount(_)
                | CheckoutError::ExceedsBalance { .. }
                | CheckoutError::Immutable { .. }
                | CheckoutError::EntryNotFound { .. }
                | CheckoutError::NothingToSubmit { .. }
                | CheckoutError::MissingDevice
                | CheckoutError::InvalidInput(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CheckoutError::InvalidConfig(_)
                | CheckoutError::ConfigLoadFailed(_)
                | CheckoutError::ConfigSaveFailed(_)
        )
    }
}
