//! Incremental running mean
//!
//! Every averaging structure in the crate folds new values through
//! [`running_mean`], so no value history is ever stored.

/// Fold `value` into a mean that currently summarises `count` values.
///
/// Equivalent to `(mean * count + value) / (count + 1)` without forming the
/// intermediate product.
///
/// # Example
/// ```
/// use stimdetector_core::stats::running::running_mean;
///
/// let mean = running_mean(0.0, 0, 4.0);
/// assert_eq!(mean, 4.0);
/// assert_eq!(running_mean(mean, 1, 8.0), 6.0);
/// ```
#[inline]
pub fn running_mean(mean: f64, count: u64, value: f64) -> f64 {
    mean + (value - mean) / (count + 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_value_is_mean() {
        assert_eq!(running_mean(123.0, 0, -7.5), -7.5);
    }

    #[test]
    fn test_matches_batch_mean() {
        let values: Vec<f64> = (0..10_000)
            .map(|i| ((i as f64) * 0.37).sin() * 250.0 + (i % 17) as f64)
            .collect();

        let mut mean = 0.0;
        for (count, &v) in values.iter().enumerate() {
            mean = running_mean(mean, count as u64, v);
        }

        let batch = values.iter().sum::<f64>() / values.len() as f64;
        assert_relative_eq!(mean, batch, epsilon = 1e-9);
    }
}
