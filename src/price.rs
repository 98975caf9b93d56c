use crate::api::Price;
use crate::error::TruesightError;
use std::cmp::Ordering;

/// Exact comparison of two oracle prices that may carry different exponents.
///
/// Both mantissas are brought to the smaller (more negative) exponent with
/// checked `i128` arithmetic and compared as integers. A scale factor that
/// doesn't fit is reported as `PriceOverflow`.
pub fn compare_prices(a: &Price, b: &Price) -> Result<Ordering, TruesightError> {
    let exponent = a.exponent.min(b.exponent);
    let a_scaled = rescale(a, exponent)?;
    let b_scaled = rescale(b, exponent)?;
    Ok(a_scaled.cmp(&b_scaled))
}

fn rescale(price: &Price, exponent: i32) -> Result<i128, TruesightError> {
    let mantissa = price.mantissa as i128;
    if mantissa == 0 {
        return Ok(0);
    }
    let shift = (price.exponent as i64 - exponent as i64) as u32;
    10i128
        .checked_pow(shift)
        .and_then(|factor| mantissa.checked_mul(factor))
        .ok_or_else(|| {
            TruesightError::PriceOverflow(format!(
                "{}e{} rescaled to exponent {}",
                price.mantissa, price.exponent, exponent
            ))
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compares_across_scales() {
        let entry = Price::new(150000, -2);
        let exit = Price::new(15005, -1);
        assert_eq!(compare_prices(&exit, &entry).unwrap(), Ordering::Greater);
        assert_eq!(compare_prices(&entry, &exit).unwrap(), Ordering::Less);
    }
    #[test]
    fn equal_values_with_different_exponents() {
        let a = Price::new(150000, -2);
        let b = Price::new(1500, 0);
        let c = Price::new(15, 2);
        assert_eq!(compare_prices(&a, &b).unwrap(), Ordering::Equal);
        assert_eq!(compare_prices(&b, &c).unwrap(), Ordering::Equal);
        assert_eq!(compare_prices(&c, &a).unwrap(), Ordering::Equal);
    }
    #[test]
    fn differences_below_float_precision_are_seen() {
        // 2^53 + 1 can't be represented as an f64
        let a = Price::new(9_007_199_254_740_993, -8);
        let b = Price::new(90_071_992_547_409_920, -9);
        assert_eq!(compare_prices(&a, &b).unwrap(), Ordering::Greater);
    }
    #[test]
    fn negative_mantissas() {
        let a = Price::new(-15, -1);
        let b = Price::new(-149, -2);
        assert_eq!(compare_prices(&a, &b).unwrap(), Ordering::Less);
    }
    #[test]
    fn extreme_exponents() {
        let a = Price::new(i64::MAX, 0);
        let b = Price::new(i64::MAX, -19);
        assert_eq!(compare_prices(&a, &b).unwrap(), Ordering::Greater);

        let a = Price::new(1, 30);
        let b = Price::new(1, -30);
        assert!(matches!(
            compare_prices(&a, &b),
            Err(TruesightError::PriceOverflow(_))
        ));

        let zero = Price::new(0, i32::MAX);
        let tiny = Price::new(1, i32::MIN);
        assert_eq!(compare_prices(&zero, &tiny).unwrap(), Ordering::Less);
    }
    #[test]
    fn is_deterministic() {
        let a = Price::new(123_456_789, -5);
        let b = Price::new(1_234_567_891, -6);
        let first = compare_prices(&a, &b).unwrap();
        for _ in 0..10 {
            assert_eq!(compare_prices(&a, &b).unwrap(), first);
        }
    }
}
