//! Human-readable currency amount parsing.
//!
//! [`MoneyAmount`] turns strings like `"0.001"`, `"$1"` or `"1,000"` into an exact
//! decimal, keeping the input precision so it can later be scaled into token base units
//! (see [`TokenDeployment::parse`](crate::chain::TokenDeployment::parse)).

use regex::Regex;
use rust_decimal::Decimal;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

/// A parsed non-negative monetary amount with decimal precision.
///
/// `"10.50"` has scale 2 and mantissa 1050.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

impl MoneyAmount {
    /// Number of decimal places in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// The value as an integer without the decimal point.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }
}

/// Errors that can occur when parsing a monetary amount.
#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        constants::MIN_STR,
        constants::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
    /// The input has more decimal places than the token supports.
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

mod constants {
    use rust_decimal::Decimal;
    use std::sync::LazyLock;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: LazyLock<Decimal> = LazyLock::new(|| Decimal::new(1, 9));
    pub static MAX: LazyLock<Decimal> = LazyLock::new(|| Decimal::new(999_999_999, 0));
}

static NON_NUMERIC: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^\d\.\-]+").ok());

impl MoneyAmount {
    /// Parses a human-readable currency string.
    ///
    /// Currency symbols, thousand separators and whitespace are stripped before parsing.
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = match NON_NUMERIC.as_ref() {
            Some(re) => re.replace_all(input, "").into_owned(),
            None => input.trim().to_owned(),
        };

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }

        if parsed < *constants::MIN || parsed > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }

        Ok(MoneyAmount(parsed))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl TryFrom<&String> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &String) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}
