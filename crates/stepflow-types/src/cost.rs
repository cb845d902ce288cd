//! Exact monetary amounts.
//!
//! Costs are tracked in whole micro-dollars (six decimal places) and
//! persisted as decimal text, so summing many step costs never drifts the
//! way binary floating point does.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

const MICROS_PER_USD: u64 = 1_000_000;
const FRACTION_DIGITS: usize = 6;

/// A non-negative USD amount with micro-dollar resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsdMicros(u64);

impl UsdMicros {
    pub const ZERO: UsdMicros = UsdMicros(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, other: UsdMicros) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl Add for UsdMicros {
    type Output = UsdMicros;

    fn add(self, rhs: UsdMicros) -> UsdMicros {
        self.saturating_add(rhs)
    }
}

impl Sum for UsdMicros {
    fn sum<I: Iterator<Item = UsdMicros>>(iter: I) -> Self {
        iter.fold(UsdMicros::ZERO, |acc, x| acc + x)
    }
}

/// Renders the shortest exact decimal: `0.0`, `0.00045`, `12.5`.
impl fmt::Display for UsdMicros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / MICROS_PER_USD;
        let frac = self.0 % MICROS_PER_USD;
        if frac == 0 {
            return write!(f, "{whole}.0");
        }
        let digits = format!("{frac:06}");
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

/// Errors from parsing decimal cost text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CostParseError {
    #[error("empty cost value")]
    Empty,

    #[error("invalid cost value: '{0}'")]
    Invalid(String),

    #[error("cost value out of range: '{0}'")]
    Overflow(String),
}

impl FromStr for UsdMicros {
    type Err = CostParseError;

    /// Parse plain decimal text. Digits beyond the sixth fractional place
    /// are rounded half-up.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(CostParseError::Empty);
        }

        let (int_part, frac_part) = match text.split_once('.') {
            Some((i, f)) => (i, f),
            None => (text, ""),
        };
        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !all_digits(int_part)
            || !all_digits(frac_part)
        {
            return Err(CostParseError::Invalid(text.to_string()));
        }

        let overflow = || CostParseError::Overflow(text.to_string());

        let whole: u64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| overflow())?
        };

        let mut frac: u64 = 0;
        for (i, b) in frac_part.bytes().take(FRACTION_DIGITS).enumerate() {
            frac += u64::from(b - b'0') * 10u64.pow((FRACTION_DIGITS - 1 - i) as u32);
        }
        let round_up = frac_part
            .as_bytes()
            .get(FRACTION_DIGITS)
            .is_some_and(|b| *b >= b'5');

        whole
            .checked_mul(MICROS_PER_USD)
            .and_then(|m| m.checked_add(frac))
            .and_then(|m| m.checked_add(u64::from(round_up)))
            .map(UsdMicros)
            .ok_or_else(overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_trims_trailing_zeros() {
        assert_eq!(UsdMicros::ZERO.to_string(), "0.0");
        assert_eq!(UsdMicros::from_micros(450).to_string(), "0.00045");
        assert_eq!(UsdMicros::from_micros(1).to_string(), "0.000001");
        assert_eq!(UsdMicros::from_micros(12_500_000).to_string(), "12.5");
        assert_eq!(UsdMicros::from_micros(3_000_000).to_string(), "3.0");
    }

    #[test]
    fn parse_plain_decimals() {
        assert_eq!("0.0".parse::<UsdMicros>().unwrap(), UsdMicros::ZERO);
        assert_eq!("0.00045".parse::<UsdMicros>().unwrap().micros(), 450);
        assert_eq!("2".parse::<UsdMicros>().unwrap().micros(), 2_000_000);
        assert_eq!(".5".parse::<UsdMicros>().unwrap().micros(), 500_000);
        assert_eq!(" 1.25 ".parse::<UsdMicros>().unwrap().micros(), 1_250_000);
    }

    #[test]
    fn parse_rounds_seventh_digit_half_up() {
        assert_eq!("0.0000015".parse::<UsdMicros>().unwrap().micros(), 2);
        assert_eq!("0.0000014".parse::<UsdMicros>().unwrap().micros(), 1);
        assert_eq!("0.9999995".parse::<UsdMicros>().unwrap().micros(), 1_000_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!("".parse::<UsdMicros>(), Err(CostParseError::Empty));
        assert!(matches!("abc".parse::<UsdMicros>(), Err(CostParseError::Invalid(_))));
        assert!(matches!("-1.0".parse::<UsdMicros>(), Err(CostParseError::Invalid(_))));
        assert!(matches!("1e-06".parse::<UsdMicros>(), Err(CostParseError::Invalid(_))));
        assert!(matches!(".".parse::<UsdMicros>(), Err(CostParseError::Invalid(_))));
        assert!(matches!(
            "99999999999999999999".parse::<UsdMicros>(),
            Err(CostParseError::Overflow(_))
        ));
    }

    #[test]
    fn display_parse_agree() {
        for micros in [0, 1, 450, 999_999, 1_000_000, 123_456_789] {
            let amount = UsdMicros::from_micros(micros);
            assert_eq!(amount.to_string().parse::<UsdMicros>().unwrap(), amount);
        }
    }

    #[test]
    fn sum_is_exact() {
        let total: UsdMicros = std::iter::repeat_n(UsdMicros::from_micros(100_000), 3).sum();
        assert_eq!(total.to_string(), "0.3");
    }
}
