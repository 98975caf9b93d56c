use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::{anyhow, bail, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::*;

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            e => bail!("Couldn't deserialize to Direction: {}", e),
        }
    }
}
impl Display for PredictionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Pending => "Pending",
            Self::Settled => "Settled",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for PredictionState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Settled" => Ok(Self::Settled),
            e => bail!("Couldn't deserialize to PredictionState: {}", e),
        }
    }
}
impl Display for Price {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.to_decimal() {
            Ok(decimal) => write!(f, "{}", decimal),
            Err(_) => write!(f, "{}e{}", self.mantissa, self.exponent),
        }
    }
}
impl Price {
    pub fn new(mantissa: i64, exponent: i32) -> Self {
        Self { mantissa, exponent }
    }
    /// Display only. Outcomes are decided on the raw integers.
    pub fn to_decimal(&self) -> Result<Decimal> {
        if self.exponent <= 0 {
            Ok(Decimal::try_from_i128_with_scale(
                self.mantissa as i128,
                self.exponent.unsigned_abs(),
            )?)
        } else {
            let factor = 10i64
                .checked_pow(self.exponent as u32)
                .ok_or_else(|| anyhow!("exponent {} out of range", self.exponent))?;
            Decimal::from(self.mantissa)
                .checked_mul(Decimal::from(factor))
                .ok_or_else(|| anyhow!("price {}e{} out of range", self.mantissa, self.exponent))
        }
    }
}

/// Converts a whole-token amount as typed by a user into smallest units.
pub fn tokens_from_whole(amount: Decimal) -> Result<Tokens> {
    let units = amount
        .checked_mul(Decimal::from(10u64.pow(TOKEN_DECIMALS)))
        .ok_or_else(|| anyhow!("amount {} is too large", amount))?;
    if units.fract() != Decimal::ZERO || units.is_sign_negative() {
        bail!("amount {} is not a whole number of units", amount);
    }
    units
        .to_u64()
        .ok_or_else(|| anyhow!("amount {} is out of range", amount))
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn direction_round_trips_through_strings() {
        assert_eq!(Direction::from_str("up").unwrap(), Direction::Up);
        assert_eq!(Direction::from_str("DOWN").unwrap(), Direction::Down);
        assert_eq!(Direction::Up.to_string(), "UP");
        assert!(Direction::from_str("SIDEWAYS").is_err());
    }
    #[test]
    fn price_renders_as_decimal() {
        assert_eq!(Price::new(150000, -2).to_decimal().unwrap(), dec!(1500.00));
        assert_eq!(Price::new(15005, -1).to_decimal().unwrap(), dec!(1500.5));
        assert_eq!(Price::new(15, 2).to_decimal().unwrap(), dec!(1500));
        assert_eq!(Price::new(-42, -1).to_string(), "-4.2");
    }
    #[test]
    fn whole_tokens_convert_to_units() {
        assert_eq!(tokens_from_whole(dec!(7)).unwrap(), 7_000_000_000);
        assert_eq!(tokens_from_whole(dec!(0.5)).unwrap(), 500_000_000);
        assert!(tokens_from_whole(dec!(0.0000000001)).is_err());
        assert!(tokens_from_whole(dec!(-1)).is_err());
    }
}
