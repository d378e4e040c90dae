//! Fixed-point price scaling.
//!
//! Feed prices are integers with four implied decimal places.

/// Divisor applied to every raw feed price.
pub const PRICE_SCALE: f64 = 10_000.0;

/// Convert a raw feed price to its decimal value (`333500` -> `33.35`).
#[inline]
pub fn scale_price(raw: u64) -> f64 {
    raw as f64 / PRICE_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_prices() {
        assert!((scale_price(333_500) - 33.35).abs() < 1e-6);
        assert!((scale_price(193_000) - 19.30).abs() < 1e-6);
        assert_eq!(scale_price(0), 0.0);
    }

    #[test]
    fn raw_value_is_recoverable() {
        for raw in [1_u64, 9_999, 492_000, 12_345_678, 99_999_999] {
            let back = (scale_price(raw) * PRICE_SCALE).round() as u64;
            assert_eq!(back, raw);
        }
    }
}
