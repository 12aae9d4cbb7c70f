//! Summary Statistics
//!
//! Robust summaries of a set of scalar observations: the usual moments,
//! interpolated percentiles, and a bootstrap confidence interval for the
//! median.
//!
//! Everything here is a pure function of its inputs. The bootstrap uses
//! a seeded ChaCha stream, so the same seed always gives bit-identical
//! bounds. No domain filtering happens here; callers drop sentinel
//! values before summarising.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

/// One requested percentile and its value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: f64,
}

/// Descriptive statistics of an observation set.
///
/// An empty set yields `count == 0` and NaN everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Sample standard deviation (0 for a single observation)
    pub sample_std_dev: f64,
    pub percentiles: Vec<PercentileValue>,
}

impl Summary {
    fn empty(percentiles: &[f64]) -> Self {
        Self {
            count: 0,
            mean: f64::NAN,
            median: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            std_dev: f64::NAN,
            sample_std_dev: f64::NAN,
            percentiles: percentiles
                .iter()
                .map(|&percentile| PercentileValue {
                    percentile,
                    value: f64::NAN,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Value of a percentile that was requested when summarising.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|pv| pv.percentile == p)
            .map(|pv| pv.value)
    }
}

/// Median and bootstrap 95% confidence bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub median: f64,
    pub low: f64,
    pub high: f64,
}

impl ConfidenceInterval {
    fn undefined() -> Self {
        Self {
            median: f64::NAN,
            low: f64::NAN,
            high: f64::NAN,
        }
    }

    /// Half the width of the interval.
    pub fn half_width(&self) -> f64 {
        (self.high - self.low) / 2.0
    }
}

fn sorted(observations: &[f64]) -> Vec<f64> {
    let mut values = observations.to_vec();
    values.sort_by(f64::total_cmp);
    values
}

/// Percentile of already sorted values, interpolating between order statistics.
///
/// For `n` values the rank is `k = (n - 1) * p / 100` and the result is
/// `v[floor(k)] + (v[ceil(k)] - v[floor(k)]) * frac(k)`. `p` is clamped to
/// `[0, 100]`; an empty slice yields NaN.
pub fn percentile_of_sorted(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let p = p.clamp(0.0, 100.0);
    let rank = (values.len() - 1) as f64 * p / 100.0;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return values[lower];
    }
    values[lower] + (values[upper] - values[lower]) * (rank - lower as f64)
}

/// Percentile of unsorted observations.
pub fn percentile(observations: &[f64], p: f64) -> f64 {
    percentile_of_sorted(&sorted(observations), p)
}

/// Median of unsorted observations (mean of the middle pair for even counts).
pub fn median(observations: &[f64]) -> f64 {
    percentile(observations, 50.0)
}

/// Computes count, mean, median, extremes, deviations and `percentiles`.
pub fn summarize(observations: &[f64], percentiles: &[f64]) -> Summary {
    if observations.is_empty() {
        return Summary::empty(percentiles);
    }

    let values = sorted(observations);
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();

    let std_dev = (squares / n).sqrt();
    let sample_std_dev = if values.len() > 1 {
        (squares / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    Summary {
        count: values.len(),
        mean,
        median: percentile_of_sorted(&values, 50.0),
        min: values[0],
        max: values[values.len() - 1],
        std_dev,
        sample_std_dev,
        percentiles: percentiles
            .iter()
            .map(|&p| PercentileValue {
                percentile: p,
                value: percentile_of_sorted(&values, p),
            })
            .collect(),
    }
}

/// Bootstrap 95% confidence interval of the median.
///
/// Draws `resamples` samples of size `n` with replacement, takes the
/// median of each, and reports the 2.5th and 97.5th percentile of those
/// medians next to the median of the input.
///
/// * `n == 0` - all fields NaN
/// * `n == 1` - the single value for median and both bounds
/// * `resamples == 0` - median only, bounds NaN
pub fn bootstrap_ci95_median(observations: &[f64], resamples: usize, seed: u64) -> ConfidenceInterval {
    match observations.len() {
        0 => return ConfidenceInterval::undefined(),
        1 => {
            let v = observations[0];
            return ConfidenceInterval {
                median: v,
                low: v,
                high: v,
            };
        }
        _ => {}
    }

    let point = median(observations);
    if resamples == 0 {
        return ConfidenceInterval {
            median: point,
            ..ConfidenceInterval::undefined()
        };
    }

    let n = observations.len();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut resample = vec![0.0; n];
    let mut medians = Vec::with_capacity(resamples);

    for _ in 0..resamples {
        for slot in resample.iter_mut() {
            *slot = observations[rng.gen_range(0..n)];
        }
        resample.sort_by(f64::total_cmp);
        medians.push(percentile_of_sorted(&resample, 50.0));
    }
    medians.sort_by(f64::total_cmp);

    ConfidenceInterval {
        median: point,
        low: percentile_of_sorted(&medians, 2.5),
        high: percentile_of_sorted(&medians, 97.5),
    }
}
