/// Floating point type used throughout system
pub type Real = f64;

/// Sign with zero mapped to +1, as used for magnitude-limited updates.
#[inline]
pub fn sign(v: Real) -> Real {
    if v < 0.0 { -1.0 } else { 1.0 }
}

/// Move `old` against `delta` by at most `limit` in magnitude.
#[inline]
pub fn chopped(old: Real, delta: Real, limit: Real) -> Real {
    old - sign(delta) * delta.abs().min(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chopped_limits_magnitude() {
        assert_eq!(chopped(1.0, 0.5, 0.2), 0.8);
        assert_eq!(chopped(1.0, -0.5, 0.2), 1.2);
        assert_eq!(chopped(1.0, 0.1, 0.2), 0.9);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn chopped_step_never_exceeds_limit(
            old in -1.0e3_f64..1.0e3,
            delta in -1.0e3_f64..1.0e3,
            limit in 0.0_f64..10.0,
        ) {
            let new = chopped(old, delta, limit);
            prop_assert!((new - old).abs() <= limit + 1e-9);
            prop_assert!((new - old) * delta <= 0.0);
        }
    }
}
