//! # Error Types
//!
//! Domain-specific error types for vitrina-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  vitrina-core errors (this file)                                       │
//! │  ├── LedgerError      - Ledger rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  vitrina-checkout errors (separate crate)                              │
//! │  └── CheckoutError    - Network, gateway, flow and auth failures       │
//! │                                                                         │
//! │  Flow: ValidationError → LedgerError → CheckoutError → Frontend        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (amounts, indices)
//! 3. Every variant is resolved locally and shown to the user without retry

use thiserror::Error;

use crate::money::Money;

// =============================================================================
// Ledger Error
// =============================================================================

/// Violations of the payment ledger rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Amount is missing, non-numeric, zero or negative.
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Amount is larger than the remaining balance plus the tolerance.
    ///
    /// ## User Workflow
    /// ```text
    /// Sale total $1000.00, CASH $300.00 recorded
    ///      │
    ///      ▼
    /// add(CASH, $800.00)
    ///      │
    ///      ▼
    /// ExceedsBalance { amount: $800.00, remaining: $700.00 }
    ///      │
    ///      ▼
    /// UI shows: "exceeds remaining balance $700.00"
    /// ```
    #[error("Amount {amount} exceeds remaining balance {remaining}")]
    ExceedsBalance { amount: Money, remaining: Money },

    /// Entry is REMOTE or already submitted and cannot be removed here.
    #[error("Payment #{index} is already recorded and cannot be removed")]
    Immutable { index: usize },

    /// No entry at the given position.
    #[error("No payment at position {index}")]
    EntryNotFound { index: usize },
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any ledger rule or network call runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Field value length is outside the accepted range.
    #[error("{field} must have between {min} and {max} digits")]
    LengthOutOfRange { field: String, min: usize, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (non-numeric amount, letters in a DNI, etc.).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::InvalidAmount {
            reason: err.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

// =============================================================================
// Unit Tests
// =============================================================================
