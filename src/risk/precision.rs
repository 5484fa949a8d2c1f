//! Significant-figure rounding and liquidation-target pricing
//! Pure functions over f64, no state

use crate::GuardError;

/// Number of significant digits implied by a market's tick/step size.
///
/// Fractional precisions map to their decimal place count (0.0001 -> 4);
/// whole-number precisions (1, 10, 100) all count as 1. Non-positive
/// precision has no defined log and is rejected; callers must guard.
pub fn count_sig_digits(precision: f64) -> Result<u32, GuardError> {
    if precision <= 0.0 {
        return Err(GuardError::InvalidPrecision(precision));
    }
    if precision < 1.0 {
        Ok(precision.log10().round().abs() as u32)
    } else {
        Ok(1)
    }
}

/// Round `num` to `sig_figs` significant figures. Zero passes through.
pub fn round_to_sig_figs(num: f64, sig_figs: u32) -> f64 {
    if num == 0.0 {
        return 0.0;
    }
    let shift = sig_figs as i32 - num.abs().log10().floor() as i32 - 1;
    let factor = 10f64.powi(shift);
    (num * factor).round() / factor
}

/// Price a configurable fraction of the way from entry toward liquidation,
/// rounded to the market's significant digits.
pub fn liquidation_target_price(
    liquidation_price: f64,
    entry_price: f64,
    fraction: f64,
    sig_figs: u32,
) -> f64 {
    round_to_sig_figs(
        entry_price + (liquidation_price - entry_price) * fraction,
        sig_figs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_number_precisions_count_as_one() {
        assert_eq!(count_sig_digits(1.0).unwrap(), 1);
        assert_eq!(count_sig_digits(10.0).unwrap(), 1);
        assert_eq!(count_sig_digits(100.0).unwrap(), 1);
    }

    #[test]
    fn test_fractional_precision_counts_decimal_places() {
        assert_eq!(count_sig_digits(0.1).unwrap(), 1);
        assert_eq!(count_sig_digits(0.01).unwrap(), 2);
        assert_eq!(count_sig_digits(0.001).unwrap(), 3);
        assert_eq!(count_sig_digits(0.0001).unwrap(), 4);
        assert_eq!(count_sig_digits(0.00001).unwrap(), 5);
    }

    #[test]
    fn test_non_positive_precision_is_rejected() {
        assert!(count_sig_digits(0.0).is_err());
        assert!(count_sig_digits(-0.01).is_err());
    }

    #[test]
    fn test_round_zero_passes_through() {
        assert_eq!(round_to_sig_figs(0.0, 1), 0.0);
        assert_eq!(round_to_sig_figs(0.0, 7), 0.0);
    }

    #[test]
    fn test_round_to_sig_figs() {
        assert_eq!(round_to_sig_figs(1234.5, 2), 1200.0);
        assert_eq!(round_to_sig_figs(0.0123456, 3), 0.0123);
        assert_eq!(round_to_sig_figs(98765.0, 1), 100000.0);
        assert_eq!(round_to_sig_figs(-1234.5, 2), -1200.0);
    }

    #[test]
    fn test_round_is_idempotent() {
        for &(value, digits) in &[
            (1234.5678, 3),
            (0.00098765, 2),
            (42.0, 4),
            (-555.55, 2),
        ] {
            let once = round_to_sig_figs(value, digits);
            let twice = round_to_sig_figs(once, digits);
            assert_eq!(once, twice, "value={value} digits={digits}");
        }
    }

    #[test]
    fn test_liquidation_target_lies_between_entry_and_liquidation() {
        let entry = 100.0;
        let liq = 80.0;
        for fraction in [0.1, 0.2, 0.5, 0.9] {
            let target = liquidation_target_price(liq, entry, fraction, 6);
            assert!(target < entry && target > liq, "fraction={fraction} target={target}");
        }

        // Short side: liquidation above entry.
        let target = liquidation_target_price(120.0, 100.0, 0.2, 6);
        assert!(target > 100.0 && target < 120.0);
        assert!((target - 104.0).abs() < 1e-9);
    }
}
