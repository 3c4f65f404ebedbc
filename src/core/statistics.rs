//! Reductions over the valid values of a region.
//!
//! All functions take the already-filtered sample and return `None` for an
//! empty sample rather than NaN.

use serde::{Deserialize, Serialize};

/// z-score of the two-sided 90% interval
pub const Z_90: f64 = 1.645;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divisor n)
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// `1.645 * sd / sqrt(n)`
pub fn ci90(sd: f64, n: usize) -> Option<f64> {
    if n == 0 {
        return None;
    }
    Some(Z_90 * sd / (n as f64).sqrt())
}

/// Quantile with linear interpolation between closest ranks
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let sorted = sorted_copy(values)?;
    Some(quantile_sorted(&sorted, q))
}

fn sorted_copy(values: &[f64]) -> Option<Vec<f64>> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(sorted)
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// The summary reported for every statistic block of a record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub sd: f64,
    pub ci90: f64,
    pub p10: f64,
    pub p75: f64,
    pub p90: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Option<Self> {
        let sorted = sorted_copy(values)?;
        let mean = mean(&sorted)?;
        let sd = std_dev(&sorted)?;
        Some(Self {
            count: sorted.len(),
            mean,
            sd,
            ci90: ci90(sd, sorted.len())?,
            p10: quantile_sorted(&sorted, 0.1),
            p75: quantile_sorted(&sorted, 0.75),
            p90: quantile_sorted(&sorted, 0.9),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_sample_is_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[]), None);
        assert_eq!(quantile(&[], 0.5), None);
        assert!(Summary::of(&[]).is_none());
        assert_eq!(ci90(1.0, 0), None);
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let v = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_relative_eq!(quantile(&v, 0.1).unwrap(), 1.4, epsilon = 1e-12);
        assert_relative_eq!(quantile(&v, 0.75).unwrap(), 4.0);
        assert_relative_eq!(quantile(&v, 0.9).unwrap(), 4.6, epsilon = 1e-12);
        assert_relative_eq!(quantile(&v, 0.0).unwrap(), 1.0);
        assert_relative_eq!(quantile(&v, 1.0).unwrap(), 5.0);
    }

    #[test]
    fn test_population_sd_and_ci() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let s = Summary::of(&v).unwrap();
        assert_relative_eq!(s.mean, 5.0);
        assert_relative_eq!(s.sd, 2.0);
        assert_relative_eq!(s.ci90, 1.645 * 2.0 / 8f64.sqrt(), epsilon = 1e-12);
        assert!(s.p10 <= s.p75 && s.p75 <= s.p90);
    }

    #[test]
    fn test_single_value() {
        let s = Summary::of(&[3.5]).unwrap();
        assert_eq!(s.count, 1);
        assert_eq!(s.sd, 0.0);
        assert_eq!(s.p10, 3.5);
        assert_eq!(s.p90, 3.5);
    }
}
