//! # Validation Module
//!
//! Input validation for the checkout screen.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Frontend                                                      │
//! │  └── numeric keypad, maxLength on PIN input                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  ├── amount text → Money (positive, two decimals)                       │
//! │  ├── DNI normalization                                                  │
//! │  └── PIN shape (checked before any network call)                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: PaymentLedger                                                 │
//! │  └── balance rules (ExceedsBalance, Immutable)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use vitrina_core::validation::{parse_payment_amount, normalize_dni};
//!
//! let amount = parse_payment_amount("400.00").unwrap();
//! assert_eq!(amount.cents(), 40_000);
//!
//! assert_eq!(normalize_dni("30.123.456").unwrap(), "30123456");
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::{DNI_MAX_DIGITS, DNI_MIN_DIGITS, MAX_PIN_LENGTH};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Amounts
// =============================================================================

/// Parses the amount typed into the payment input.
///
/// ## Rules
/// - Must not be empty
/// - Must be a plain decimal number
/// - Must be strictly positive
pub fn parse_payment_amount(input: &str) -> ValidationResult<Money> {
    if input.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "amount".to_string(),
        });
    }

    let amount = Money::parse_amount(input).ok_or_else(|| ValidationError::InvalidFormat {
        field: "amount".to_string(),
        reason: "must be a number".to_string(),
    })?;

    validate_payment_amount(amount)?;
    Ok(amount)
}

/// Validates an already-parsed payment amount is positive.
pub fn validate_payment_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Identifiers
// =============================================================================

/// Validates a sale identifier before it is placed in a URL path.
pub fn validate_sale_id(sale_id: &str) -> ValidationResult<()> {
    let sale_id = sale_id.trim();
    if sale_id.is_empty() {
        return Err(ValidationError::Required {
            field: "sale_id".to_string(),
        });
    }
    if sale_id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "sale_id".to_string(),
            max: 64,
        });
    }
    if !sale_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sale_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }
    Ok(())
}

/// Normalizes a customer DNI.
///
/// Dots and spaces are stripped (`30.123.456` → `30123456`); the rest must
/// be 6-9 ASCII digits.
pub fn normalize_dni(dni: &str) -> ValidationResult<String> {
    let digits: String = dni.chars().filter(|c| *c != '.' && !c.is_whitespace()).collect();

    if digits.is_empty() {
        return Err(ValidationError::Required {
            field: "dni".to_string(),
        });
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "dni".to_string(),
            reason: "must contain only digits".to_string(),
        });
    }
    if !(DNI_MIN_DIGITS..=DNI_MAX_DIGITS).contains(&digits.len()) {
        return Err(ValidationError::LengthOutOfRange {
            field: "dni".to_string(),
            min: DNI_MIN_DIGITS,
            max: DNI_MAX_DIGITS,
        });
    }
    Ok(digits)
}

/// Validates the shape of a supervisor PIN: 1-8 ASCII digits.
pub fn validate_pin(pin: &str) -> ValidationResult<()> {
    if pin.is_empty() {
        return Err(ValidationError::Required {
            field: "pin".to_string(),
        });
    }
    if pin.len() > MAX_PIN_LENGTH {
        return Err(ValidationError::TooLong {
            field: "pin".to_string(),
            max: MAX_PIN_LENGTH,
        });
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "pin".to_string(),
            reason: "must contain only digits".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
