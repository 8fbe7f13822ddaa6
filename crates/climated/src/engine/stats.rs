//! NaN-aware aggregate statistics over sensor readings.
//!
//! A disconnected probe reports NaN. NaN readings are excluded before any
//! aggregate is computed; if every reading is NaN the aggregate itself is
//! NaN, and every comparison a rule makes against it evaluates to false.
//! A broken sensor therefore never forces equipment into a new state.

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Arithmetic mean of the non-NaN readings, NaN if there are none.
pub fn mean(values: &[f64]) -> f64 {
    let values = finite(values);
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation of the non-NaN readings, NaN if there are
/// none.
pub fn std_dev(values: &[f64]) -> f64 {
    let values = finite(values);
    if values.is_empty() {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Smallest non-NaN reading, NaN if there are none.
pub fn min(values: &[f64]) -> f64 {
    finite(values)
        .into_iter()
        .fold(f64::NAN, |acc, v| if acc.is_nan() { v } else { acc.min(v) })
}

/// Largest non-NaN reading, NaN if there are none.
pub fn max(values: &[f64]) -> f64 {
    finite(values)
        .into_iter()
        .fold(f64::NAN, |acc, v| if acc.is_nan() { v } else { acc.max(v) })
}

/// Spread between the hottest and coldest non-NaN readings.
pub fn max_delta(values: &[f64]) -> f64 {
    max(values) - min(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_ignores_nan() {
        assert_eq!(mean(&[70.0, f64::NAN, 74.0]), 72.0);
    }

    #[test]
    fn all_nan_yields_nan() {
        let readings = [f64::NAN, f64::NAN];
        assert!(mean(&readings).is_nan());
        assert!(std_dev(&readings).is_nan());
        assert!(min(&readings).is_nan());
        assert!(max(&readings).is_nan());
        assert!(max_delta(&readings).is_nan());
    }

    #[test]
    fn empty_yields_nan() {
        assert!(mean(&[]).is_nan());
        assert!(std_dev(&[]).is_nan());
    }

    #[test]
    fn std_dev_is_population() {
        // numpy.std semantics: divide by n, not n - 1.
        let d = std_dev(&[68.0, 72.0]);
        assert!((d - 2.0).abs() < 1e-9);
    }

    #[test]
    fn min_max_delta() {
        let readings = [71.5, 68.0, f64::NAN, 73.0];
        assert_eq!(min(&readings), 68.0);
        assert_eq!(max(&readings), 73.0);
        assert_eq!(max_delta(&readings), 5.0);
    }

    #[test]
    fn nan_comparisons_fail_closed() {
        // The property the rule chain relies on.
        let agg = mean(&[f64::NAN]);
        assert!(!(agg <= 73.0));
        assert!(!(agg >= 73.0));
    }
}
