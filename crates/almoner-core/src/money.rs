//! # Money Module
//!
//! Provides the `Money` type for pledge amounts, payments and balances.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PLEDGE BALANCES MUST ADD UP                                            │
//! │                                                                         │
//! │  Pledge: $1,000.00 paid in 3 installments                              │
//! │    floats:  333.33 + 333.33 + 333.34 ≠ 1000.0 after rounding noise     │
//! │    cents:   33333 + 33333 + 33334 = 100000  (exact)                    │
//! │                                                                         │
//! │  The outstanding balance shown in the pledge list is pledged - paid.   │
//! │  It is recomputed after every recorded payment, so it must be exact.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use almoner_core::money::Money;
//!
//! let pledged = Money::from_cents(100_000); // $1,000.00
//! let paid = Money::from_cents(25_000);
//! assert_eq!((pledged - paid).cents(), 75_000);
//! assert_eq!(pledged.to_string(), "$1000.00");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// Signed so that refunds and overpayments (negative balances) are
/// representable without a separate flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from whole currency units.
    #[inline]
    pub const fn from_major(major: i64) -> Self {
        Money(major * 100)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero money.
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

    /// Splits the amount into `parts` installments whose sum is exact.
    ///
    /// The remainder cents go to the last installment, matching how the
    /// payment-plan schedule is printed.
    ///
    /// ```rust
    /// use almoner_core::money::Money;
    ///
    /// let parts = Money::from_cents(100_000).split(3);
    /// assert_eq!(parts, vec![
    ///     Money::from_cents(33_333),
    ///     Money::from_cents(33_333),
    ///     Money::from_cents(33_334),
    /// ]);
    /// ```
    pub fn split(&self, parts: u32) -> Vec<Money> {
        if parts == 0 {
            return Vec::new();
        }

        let n = i64::from(parts);
        let base = self.0 / n;
        let remainder = self.0 - base * n;

        let mut out = vec![Money(base); parts as usize];
        if let Some(last) = out.last_mut() {
            last.0 += remainder;
        }
        out
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "$10.99");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-550).to_string(), "-$5.50");
        assert_eq!(Money::from_major(12).to_string(), "$12.00");
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let mut balance = Money::from_cents(10_000);
        balance -= Money::from_cents(2_500);
        balance += Money::from_cents(500);
        assert_eq!(balance.cents(), 8_000);

        let paid: Money = [Money::from_cents(100), Money::from_cents(250)].iter().sum();
        assert_eq!(paid.cents(), 350);
    }

    #[test]
    fn test_split_is_exact() {
        let total = Money::from_cents(1_000);
        let parts = total.split(7);
        assert_eq!(parts.len(), 7);
        assert_eq!(parts.iter().sum::<Money>(), total);
        assert!(Money::from_cents(10).split(0).is_empty());
    }

    #[test]
    fn test_sign_checks() {
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(1).is_positive());
        assert!(Money::from_cents(-1).is_negative());
    }
}
