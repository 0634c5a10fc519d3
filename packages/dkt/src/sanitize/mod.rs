use crate::types::PROB_EPSILON;

/// Replace NaN/Inf with zero in place.
pub fn sanitize_in_place(arr: &mut [f64]) {
    for val in arr.iter_mut() {
        if val.is_nan() || val.is_infinite() {
            *val = 0.0;
        }
    }
}

/// Keep a probability strictly inside (0, 1) so log terms stay finite.
#[inline]
pub fn clamp_probability(p: f64, eps: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(eps, 1.0 - eps)
}

/// Binary cross-entropy for one element, with the probability clamped.
#[inline]
pub fn binary_cross_entropy(p: f64, y: f64) -> f64 {
    let p = clamp_probability(p, PROB_EPSILON);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_zeroes_non_finite_values() {
        let mut values = [1.0, f64::NAN, f64::INFINITY, -2.0];
        sanitize_in_place(&mut values);
        assert_eq!(values, [1.0, 0.0, 0.0, -2.0]);
    }

    #[test]
    fn bce_is_finite_at_extremes() {
        assert!(binary_cross_entropy(0.0, 1.0).is_finite());
        assert!(binary_cross_entropy(1.0, 0.0).is_finite());
        assert!(binary_cross_entropy(0.5, 1.0) > 0.0);
    }
}
