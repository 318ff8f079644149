//! # vitrina-core: Pure Checkout Logic for Vitrina POS
//!
//! This crate holds the payment reconciliation rules of the checkout screen
//! as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Vitrina POS Checkout                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Frontend (checkout screen)                   │   │
//! │  │    Amount input ──► Method picker ──► QR / Terminal modal      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ session API + events                   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    vitrina-checkout (async)                     │   │
//! │  │    session, submitter, gateway initiator, poller, auth gate    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ vitrina-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  ledger   │  │ reconcile │  │   │
//! │  │   │   Sale    │  │   Money   │  │  add/rm   │  │ evaluate  │  │   │
//! │  │   │   Flow    │  │  parsing  │  │  merge    │  │ decision  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO TIMERS • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, Contribution, GatewayFlow, etc.)
//! - [`money`] - Money type with integer arithmetic and defensive parsing
//! - [`ledger`] - The per-sale payment ledger and derived totals
//! - [`reconcile`] - Per-tick decision of the reconciliation poller
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation (amounts, DNI, PIN)
//!
//! ## Example Usage
//!
//! ```rust
//! use vitrina_core::{Money, PaymentLedger, PaymentMethod};
//!
//! let mut ledger = PaymentLedger::new(Money::from_cents(100_000));
//! ledger.add(PaymentMethod::Cash, Money::from_cents(40_000)).unwrap();
//!
//! assert_eq!(ledger.remaining(), Money::from_cents(60_000));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod money;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{LedgerError, ValidationError};
pub use ledger::{AddOutcome, PaymentLedger};
pub use money::Money;
pub use reconcile::PollDecision;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Rounding tolerance applied to every balance comparison.
///
/// One cent: an amount may exceed the remaining balance by at most this much,
/// and a sale whose remaining balance is within it counts as covered.
pub const AMOUNT_TOLERANCE: Money = Money::from_cents(1);

/// Longest supervisor PIN the user service accepts.
pub const MAX_PIN_LENGTH: usize = 8;

/// Accepted DNI length range (digits, after stripping dots and spaces).
pub const DNI_MIN_DIGITS: usize = 6;
pub const DNI_MAX_DIGITS: usize = 9;
