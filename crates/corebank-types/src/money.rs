use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// ISO 4217 currency code, three uppercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("currency '{0}' is not a three-letter ISO 4217 code")]
    Invalid(String),
}

impl Currency {
    pub fn new(code: impl Into<String>) -> Result<Self, CurrencyError> {
        let code = code.into();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(CurrencyError::Invalid(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed-point monetary amount with scale 2, stored in minor units.
///
/// Base postings are exact; only derived computations (fees) round, and they
/// round half-to-even. Floating point never enters a money path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub minor_units: i64,
    pub currency: Currency,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("amount overflow")]
    Overflow,

    #[error("malformed decimal amount '{0}'")]
    MalformedAmount(String),
}

impl Money {
    pub fn from_minor(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::from_minor(0, currency)
    }

    /// Parse a decimal string such as `300`, `300.5` or `300.50`.
    ///
    /// More than two fraction digits is malformed: scale 2 is a storage
    /// contract, not a rounding opportunity.
    pub fn parse(text: &str, currency: Currency) -> Result<Self, MoneyError> {
        let malformed = || MoneyError::MalformedAmount(text.to_string());
        let (sign, body) = match text.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, text),
        };
        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return Err(malformed());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(malformed());
        }
        let whole: i64 = whole.parse().map_err(|_| malformed())?;
        let mut cents: i64 = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| malformed())?
        };
        if frac.len() == 1 {
            cents *= 10;
        }
        let minor = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(cents))
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::from_minor(sign * minor, currency))
    }

    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    pub fn is_negative(&self) -> bool {
        self.minor_units < 0
    }

    pub fn same_currency(&self, other: &Money) -> bool {
        self.currency == other.currency
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_currency(other)?;
        let minor = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::from_minor(minor, self.currency.clone()))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_currency(other)?;
        let minor = self
            .minor_units
            .checked_sub(other.minor_units)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::from_minor(minor, self.currency.clone()))
    }

    /// Multiply by a rate in basis points, rounding half-to-even.
    pub fn mul_bps(&self, bps: i64) -> Result<Money, MoneyError> {
        let numerator = (self.minor_units as i128)
            .checked_mul(bps as i128)
            .ok_or(MoneyError::Overflow)?;
        let minor = div_round_half_even(numerator, 10_000);
        let minor = i64::try_from(minor).map_err(|_| MoneyError::Overflow)?;
        Ok(Money::from_minor(minor, self.currency.clone()))
    }

    /// Render as a plain decimal with exactly two fraction digits.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let abs = self.minor_units.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }

    fn require_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(MoneyError::CurrencyMismatch {
                left: self.currency.to_string(),
                right: other.currency.to_string(),
            })
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}

/// Integer division with round-half-to-even on the discarded remainder.
fn div_round_half_even(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder == 0 {
        return quotient;
    }
    let twice = remainder.abs() * 2;
    let bump = match twice.cmp(&denominator.abs()) {
        std::cmp::Ordering::Less => 0,
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Equal => {
            if quotient % 2 == 0 {
                0
            } else {
                1
            }
        }
    };
    if numerator.signum() * denominator.signum() >= 0 {
        quotient + bump
    } else {
        quotient - bump
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_currency() -> Currency {
        Currency::new("TRY").unwrap()
    }

    #[test]
    fn rejects_malformed_currency_codes() {
        assert!(Currency::new("usd").is_err());
        assert!(Currency::new("EURO").is_err());
        assert!(Currency::new("E1R").is_err());
        assert!(Currency::new("EUR").is_ok());
    }

    #[test]
    fn parses_decimal_amounts() {
        let c = try_currency();
        assert_eq!(
            Money::parse("300", c.clone()).unwrap().minor_units,
            30_000
        );
        assert_eq!(Money::parse("0.05", c.clone()).unwrap().minor_units, 5);
        assert_eq!(Money::parse("12.5", c.clone()).unwrap().minor_units, 1_250);
        assert!(Money::parse("1.999", c.clone()).is_err());
        assert!(Money::parse("1,50", c).is_err());
    }

    #[test]
    fn checked_arithmetic_guards_currency() {
        let a = Money::from_minor(100, try_currency());
        let b = Money::from_minor(50, Currency::new("USD").unwrap());
        assert!(matches!(
            a.checked_add(&b),
            Err(MoneyError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn bps_multiplication_rounds_half_even() {
        let c = try_currency();
        // 125 minor units at 50% = 62.5 -> rounds to even 62
        assert_eq!(
            Money::from_minor(125, c.clone()).mul_bps(5_000).unwrap().minor_units,
            62
        );
        // 135 minor units at 50% = 67.5 -> rounds to even 68
        assert_eq!(
            Money::from_minor(135, c.clone()).mul_bps(5_000).unwrap().minor_units,
            68
        );
        // plain cases are unaffected
        assert_eq!(
            Money::from_minor(10_000, c).mul_bps(250).unwrap().minor_units,
            250
        );
    }

    #[test]
    fn renders_two_fraction_digits() {
        let c = try_currency();
        assert_eq!(Money::from_minor(30_000, c.clone()).to_decimal_string(), "300.00");
        assert_eq!(Money::from_minor(5, c.clone()).to_decimal_string(), "0.05");
        assert_eq!(Money::from_minor(-1_250, c).to_decimal_string(), "-12.50");
    }
}
