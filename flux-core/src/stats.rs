//! Small statistics kit shared by the QC, gap-fill and uncertainty stages.
//!
//! All functions speak the sentinel convention: they either reject missing
//! values outright (plain variants) or skip them (`_allowing_invalid`).

use crate::{is_invalid, INVALID_VALUE};

/// Mean of fully-valid values; any sentinel poisons the result.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return INVALID_VALUE;
    }
    if values.len() == 1 {
        return values[0];
    }
    let mut sum = 0.0;
    for &v in values {
        if is_invalid(v) {
            return INVALID_VALUE;
        }
        sum += v;
    }
    crate::fold_nan(sum / values.len() as f64)
}

/// Sample standard deviation (n − 1); needs at least two valid values.
pub fn standard_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return INVALID_VALUE;
    }
    let m = mean(values);
    if is_invalid(m) {
        return INVALID_VALUE;
    }
    let sum2: f64 = values.iter().map(|&v| (v - m) * (v - m)).sum();
    crate::fold_nan((sum2 / (values.len() - 1) as f64).sqrt())
}

/// Median of the valid subset; missing values are skipped.
pub fn median(values: &[f64]) -> f64 {
    let mut v: Vec<f64> = values.iter().copied().filter(|&x| !is_invalid(x)).collect();
    if v.is_empty() {
        return INVALID_VALUE;
    }
    if v.len() == 1 {
        return v[0];
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    let result = if n % 2 == 1 {
        v[(n + 1) / 2 - 1]
    } else {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    };
    crate::fold_nan(result)
}

/// Mean of the valid subset; all-missing input yields the sentinel.
pub fn mean_allowing_invalid(values: &[f64]) -> f64 {
    if values.len() == 1 {
        return values[0];
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
        if !is_invalid(v) {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        return INVALID_VALUE;
    }
    crate::fold_nan(sum / count as f64)
}

/// Sample standard deviation of the valid subset.
pub fn standard_deviation_allowing_invalid(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return INVALID_VALUE;
    }
    let valid: Vec<f64> = values.iter().copied().filter(|&v| !is_invalid(v)).collect();
    if valid.len() < 2 {
        return INVALID_VALUE;
    }
    let m = mean(&valid);
    if is_invalid(m) {
        return INVALID_VALUE;
    }
    let sum2: f64 = valid.iter().map(|&v| (v - m) * (v - m)).sum();
    crate::fold_nan((sum2 / (valid.len() - 1) as f64).sqrt())
}

/// Half-up rounding to the nearest integer.
#[inline]
fn round_half_up(x: f64) -> i64 {
    if x >= 0.0 {
        (x + 0.5) as i64
    } else {
        (x - 0.5) as i64
    }
}

/// Percentile of the valid subset.
///
/// Sorted-index semantics: `index = round(p/100 · n) − 1`, clamped to the
/// valid range. `p` must be in [0, 100].
pub fn percentile_allowing_invalid(values: &[f64], p: f64) -> Option<f64> {
    if !(0.0..=100.0).contains(&p) {
        return None;
    }
    if values.is_empty() {
        return Some(INVALID_VALUE);
    }
    if values.len() == 1 {
        return Some(values[0]);
    }
    let mut v: Vec<f64> = values.iter().copied().filter(|&x| !is_invalid(x)).collect();
    if v.is_empty() {
        return Some(INVALID_VALUE);
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let mut index = round_half_up(p / 100.0 * v.len() as f64) - 1;
    if index < 0 {
        index = 0;
    }
    let index = (index as usize).min(v.len() - 1);
    Some(v[index])
}

/// Ordinary least squares fit y = slope·x + intercept over paired samples.
///
/// Returns `None` when the x spread is degenerate.
pub fn linear_regression(pairs: &[(f64, f64)]) -> Option<(f64, f64)> {
    if pairs.is_empty() {
        return None;
    }
    let n = pairs.len() as f64;
    let mut sumx = 0.0;
    let mut sumy = 0.0;
    let mut sumx2 = 0.0;
    let mut sumxy = 0.0;
    for &(x, y) in pairs {
        sumx += x;
        sumy += y;
        sumx2 += x * x;
        sumxy += x * y;
    }
    let divisor = sumx2 - sumx * sumx / n;
    if divisor == 0.0 {
        return None;
    }
    let slope = (sumxy - sumx * sumy / n) / divisor;
    let intercept = (sumy - slope * sumx) / n;
    Some((slope, intercept))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_poisoned_by_invalid() {
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert!(is_invalid(mean(&[1.0, INVALID_VALUE, 3.0])));
        assert!(is_invalid(mean(&[])));
    }

    #[test]
    fn test_mean_allowing_invalid() {
        assert_eq!(mean_allowing_invalid(&[1.0, INVALID_VALUE, 3.0]), 2.0);
        assert!(is_invalid(mean_allowing_invalid(&[
            INVALID_VALUE,
            INVALID_VALUE
        ])));
    }

    #[test]
    fn test_standard_deviation() {
        assert!(is_invalid(standard_deviation(&[1.0])));
        let sd = standard_deviation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.138089935299395).abs() < 1e-12);
        assert_eq!(standard_deviation(&[3.0, 3.0, 3.0]), 0.0);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[5.0, INVALID_VALUE, 1.0]), 3.0);
        assert!(is_invalid(median(&[INVALID_VALUE])));
    }

    #[test]
    fn test_percentile() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        // round(0.5 * 5) - 1 = 2 (middle element)
        assert_eq!(percentile_allowing_invalid(&v, 50.0), Some(3.0));
        assert_eq!(percentile_allowing_invalid(&v, 0.0), Some(1.0));
        assert_eq!(percentile_allowing_invalid(&v, 100.0), Some(5.0));
        assert_eq!(percentile_allowing_invalid(&v, 101.0), None);
        assert_eq!(
            percentile_allowing_invalid(&[INVALID_VALUE, INVALID_VALUE], 50.0),
            Some(INVALID_VALUE)
        );
    }

    #[test]
    fn test_linear_regression() {
        let pairs: Vec<(f64, f64)> = (0..100).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        let (slope, intercept) = linear_regression(&pairs).unwrap();
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 1.0).abs() < 1e-9);
        assert!(linear_regression(&[(1.0, 2.0), (1.0, 3.0)]).is_none());
    }
}
