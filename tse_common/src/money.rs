use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const DEFAULT_CURRENCY_CODE: &str = "USD";

//--------------------------------------       Money         ---------------------------------------------------------
/// A monetary amount, stored as an integer number of cents so that 2-decimal-place arithmetic is exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Money(i64);

op!(binary Money, Add, add);
op!(binary Money, Sub, sub);
op!(inplace Money, AddAssign, add_assign);
op!(inplace Money, SubAssign, sub_assign);
op!(unary Money, Neg, neg);

impl Mul<i64> for Money {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as a monetary amount: {0}")]
pub struct MoneyConversionError(String);

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Money {
    type Error = MoneyConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(MoneyConversionError(format!("Value {} is too large to convert to Money", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let cents = self.0.abs();
        write!(f, "{sign}${}.{:02}", cents / 100, cents % 100)
    }
}

impl Money {
    /// The amount in cents.
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Constructs an amount from whole currency units, e.g. `Money::from_whole(45)` is $45.00.
    pub fn from_whole(units: i64) -> Self {
        Self(units * 100)
    }

    /// Computes a basis-point share of this amount, rounded half-up to the nearest cent.
    /// `bps` is hundredths of a percent: 12% tax is 1200 bps, a 2.9% fee is 290 bps.
    pub fn percent_bps(&self, bps: i64) -> Self {
        let cents = (self.0 as i128 * bps as i128 + 5_000) / 10_000;
        #[allow(clippy::cast_possible_truncation)]
        Self(cents as i64)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

#[cfg(test)]
mod test {
    use super::Money;

    #[test]
    fn arithmetic() {
        let a = Money::from_whole(45) * 2 + Money::from_whole(120);
        assert_eq!(a, Money::from_cents(21_000));
        let mut b = a - Money::from_cents(999);
        b -= Money::from_cents(1);
        assert_eq!(b.value(), 20_000);
        assert_eq!(-b, Money::from_cents(-20_000));
    }

    #[test]
    fn percentage_shares_round_to_cents() {
        // 12% of $210.00 is exactly $25.20
        assert_eq!(Money::from_cents(21_000).percent_bps(1200), Money::from_cents(2_520));
        // 2.9% of $235.20 is $6.8208, which rounds to $6.82
        assert_eq!(Money::from_cents(23_520).percent_bps(290), Money::from_cents(682));
        // half-a-cent rounds up: 2.9% of $0.50 = 1.45c -> 1c; 2.9% of $11.25 = 32.625c -> 33c
        assert_eq!(Money::from_cents(50).percent_bps(290), Money::from_cents(1));
        assert_eq!(Money::from_cents(1_125).percent_bps(290), Money::from_cents(33));
    }

    #[test]
    fn display() {
        assert_eq!(Money::from_cents(23_520).to_string(), "$235.20");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-150).to_string(), "-$1.50");
    }

    #[test]
    fn sum() {
        let total: Money = [9_000, 12_000, 20].iter().map(|c| Money::from_cents(*c)).sum();
        assert_eq!(total, Money::from_cents(21_020));
    }
}
