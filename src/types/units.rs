//! Token unit conversions.
//!
//! ## Overview
//!
//! On-chain amounts are integers in the token's smallest unit (`U256`).
//! A token with 18 decimals stores `1.5` as `1_500_000_000_000_000_000`.
//! Human-readable input is parsed with `rust_decimal`, never with floats.
//!
//! ## Examples
//!
//! ```
//! use chainbook::types::units::{to_units, from_units};
//! use primitive_types::U256;
//!
//! let amount = to_units("1.5", 18).unwrap();
//! assert_eq!(amount, U256::from(1_500_000_000_000_000_000u128));
//! assert_eq!(from_units(amount, 18), "1.5");
//! ```

use std::str::FromStr;

use primitive_types::U256;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimals of the common 18-decimal token
pub const DEFAULT_DECIMALS: u32 = 18;

/// Largest supported decimals (10^77 is the last power of ten in U256)
pub const MAX_DECIMALS: u32 = 77;

/// `10^decimals`, the token's unit scale
///
/// # Returns
///
/// * `None` - If `decimals` exceeds [`MAX_DECIMALS`]
pub fn decimal_scale(decimals: u32) -> Option<U256> {
    if decimals > MAX_DECIMALS {
        return None;
    }
    Some(U256::exp10(decimals as usize))
}

/// Parse a decimal string into token units.
///
/// Digits beyond `decimals` are truncated.
///
/// # Returns
///
/// * `None` - If parsing fails, the value is negative, or it overflows
pub fn to_units(s: &str, decimals: u32) -> Option<U256> {
    let decimal = Decimal::from_str(s.trim()).ok()?;
    decimal_to_units(decimal, decimals)
}

pub fn decimal_to_units(d: Decimal, decimals: u32) -> Option<U256> {
    if d.is_sign_negative() && !d.is_zero() {
        return None;
    }
    let d = if d.scale() > decimals {
        d.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
    } else {
        d
    };
    let mantissa = u128::try_from(d.mantissa()).ok()?;
    let shift = decimal_scale(decimals - d.scale())?;
    U256::from(mantissa).checked_mul(shift)
}

/// Render token units as a trimmed decimal string.
///
/// # Example
///
/// ```
/// use chainbook::types::units::from_units;
/// use primitive_types::U256;
///
/// assert_eq!(from_units(U256::from(1_000_000u64), 6), "1");
/// assert_eq!(from_units(U256::from(1_234_500u64), 6), "1.2345");
/// assert_eq!(from_units(U256::from(5u64), 3), "0.005");
/// ```
pub fn from_units(value: U256, decimals: u32) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }
    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_scale() {
        assert_eq!(decimal_scale(0), Some(U256::one()));
        assert_eq!(decimal_scale(6), Some(U256::from(1_000_000u64)));
        assert!(decimal_scale(MAX_DECIMALS).is_some());
        assert_eq!(decimal_scale(78), None);
    }

    #[test]
    fn test_to_units_basic() {
        assert_eq!(to_units("1", 18), Some(U256::exp10(18)));
        assert_eq!(to_units("0.5", 6), Some(U256::from(500_000u64)));
        assert_eq!(to_units("100", 0), Some(U256::from(100u64)));
        assert_eq!(to_units("0", 18), Some(U256::zero()));
    }

    #[test]
    fn test_to_units_truncates_extra_digits() {
        assert_eq!(to_units("1.23456789", 4), Some(U256::from(12_345u64)));
    }

    #[test]
    fn test_to_units_rejects_bad_input() {
        assert_eq!(to_units("-1", 18), None);
        assert_eq!(to_units("abc", 18), None);
        assert_eq!(to_units("", 18), None);
    }

    #[test]
    fn test_large_amounts() {
        // 10 billion tokens at 18 decimals exceeds u64
        let amount = to_units("10000000000", 18).unwrap();
        assert_eq!(amount, U256::exp10(28));
        assert_eq!(from_units(amount, 18), "10000000000");
    }

    #[test]
    fn test_from_units() {
        assert_eq!(from_units(U256::zero(), 18), "0");
        assert_eq!(from_units(U256::from(15u64) * U256::exp10(17), 18), "1.5");
        assert_eq!(from_units(U256::one(), 18), "0.000000000000000001");
        assert_eq!(from_units(U256::from(42u64), 0), "42");
    }
}
