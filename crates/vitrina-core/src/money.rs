//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  The payments service sends amounts as JSON numbers or strings:         │
//! │    {"monto": 400}  {"monto": "600.00"}  {"monto": 0.1}                  │
//! │                                                                         │
//! │  Summing those as floats drifts:                                        │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ balance never reaches zero       │
//! │                                                                         │
//! │  OUR SOLUTION: parse once at the boundary into integer cents            │
//! │    every ledger sum, comparison and tolerance check is exact            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use vitrina_core::money::Money;
//!
//! let price = Money::from_cents(123_450); // $1234.50
//! assert_eq!(Money::parse_amount("1234.50"), Some(price));
//! assert_eq!(Money::parse_amount("abc"), None);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

/// Largest absolute amount accepted from the wire, in cents.
///
/// Keeps `major * 100` well inside `i64` for any parsed input.
const MAX_WIRE_CENTS: i64 = 1_000_000_000_000_000;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in cents.
///
/// ## Design Decisions
/// - **i64 (signed)**: differences such as `total - paid` may go negative
///   before being clamped
/// - **Single field tuple struct**: zero-cost abstraction over i64
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ## Example
    /// ```rust
    /// use vitrina_core::money::Money;
    ///
    /// let price = Money::from_cents(1099); // $10.99
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from whole units and cents.
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -$5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Whole-unit portion, truncated toward zero.
    #[inline]
    pub const fn units(&self) -> i64 {
        self.0 / 100
    }

    /// Cents portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Subtraction clamped at zero.
    ///
    /// ## Example
    /// ```rust
    /// use vitrina_core::money::Money;
    ///
    /// let total = Money::from_cents(1000);
    /// assert_eq!(total.clamped_sub(Money::from_cents(400)).cents(), 600);
    /// assert_eq!(total.clamped_sub(Money::from_cents(1500)), Money::zero());
    /// ```
    #[inline]
    pub fn clamped_sub(self, other: Money) -> Money {
        Money((self.0 - other.0).max(0))
    }

    /// True when the two values differ by at most `tolerance`.
    #[inline]
    pub fn approx_eq(self, other: Money, tolerance: Money) -> bool {
        (self.0 - other.0).abs() <= tolerance.0
    }

    // =========================================================================
    // Defensive Parsing
    // =========================================================================

    /// Parses a decimal amount typed by a user or sent by the server.
    ///
    /// Accepts an optional sign, digits, and an optional fractional part
    /// separated by `.`. Fractions beyond two digits round half away from
    /// zero. Anything else (empty, letters, `NaN`, exponents) is `None`.
    ///
    /// ## Example
    /// ```rust
    /// use vitrina_core::money::Money;
    ///
    /// assert_eq!(Money::parse_amount(" 600 "), Some(Money::from_cents(60_000)));
    /// assert_eq!(Money::parse_amount("0.125"), Some(Money::from_cents(13)));
    /// assert_eq!(Money::parse_amount(".5"), Some(Money::from_cents(50)));
    /// assert_eq!(Money::parse_amount(""), None);
    /// assert_eq!(Money::parse_amount("12,50"), None);
    /// ```
    pub fn parse_amount(input: &str) -> Option<Money> {
        let s = input.trim();
        let (negative, s) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let mut cents: i64 = 0;
        for b in int_part.bytes() {
            cents = cents.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
            if cents > MAX_WIRE_CENTS / 100 {
                return None;
            }
        }
        cents *= 100;

        let mut digits = frac_part.bytes().map(|b| i64::from(b - b'0'));
        let tenths = digits.next().unwrap_or(0);
        let hundredths = digits.next().unwrap_or(0);
        let round_up = digits.next().map(|d| d >= 5).unwrap_or(false);
        cents += tenths * 10 + hundredths + i64::from(round_up);

        Some(Money(if negative { -cents } else { cents }))
    }

    /// Parses an amount from a JSON value (number or numeric string).
    ///
    /// `null`, booleans, objects and non-finite numbers are `None`.
    pub fn from_wire(value: &Value) -> Option<Money> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    let cents = i.checked_mul(100)?;
                    return (cents.abs() <= MAX_WIRE_CENTS).then_some(Money(cents));
                }
                let f = n.as_f64()?;
                let cents = (f * 100.0).round();
                if !cents.is_finite() || cents.abs() > MAX_WIRE_CENTS as f64 {
                    return None;
                }
                Some(Money(cents as i64))
            }
            Value::String(s) => Money::parse_amount(s),
            _ => None,
        }
    }

    /// Renders the amount as a JSON number in currency units.
    ///
    /// The payments service expects `monto`/`total` as plain numbers.
    pub fn to_wire(&self) -> Value {
        if self.0 % 100 == 0 {
            Value::from(self.0 / 100)
        } else {
            Value::from(self.0 as f64 / 100.0)
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Shows `$1234.50`; locale grouping is left to the frontend.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, self.units().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
