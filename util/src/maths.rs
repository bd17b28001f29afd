//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where 
    T: Float 
{
    target_range.0 
        + ((value - source_range.0) 
        * (target_range.1 - target_range.0) 
        / (source_range.1 - source_range.0))
}

/// Limit a value to the range `[min, max]`.
pub fn clamp<T>(value: T, min: T, max: T) -> T 
where
    T: Float
{
    if value > max {
        max
    }
    else if value < min {
        min
    }
    else {
        value
    }
}

/// Linearly interpolate between `a` and `b` by the fraction `t`.
pub fn lerp<T>(a: T, b: T, t: T) -> T
where
    T: Float
{
    a + (b - a) * t
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0f64, 180f64), (500f64, 2500f64), 0f64), 500f64);
        assert_eq!(lin_map((0f64, 180f64), (500f64, 2500f64), 90f64), 1500f64);
        assert_eq!(lin_map((0f64, 180f64), (500f64, 2500f64), 180f64), 2500f64);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(-5f64, 0f64, 180f64), 0f64);
        assert_eq!(clamp(200f64, 0f64, 180f64), 180f64);
        assert_eq!(clamp(45f64, 0f64, 180f64), 45f64);
    }

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(0f64, 180f64, 0.5), 90f64);
        assert_eq!(lerp(180f64, 0f64, 1.0), 0f64);
    }
}
