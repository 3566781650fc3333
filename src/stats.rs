//! Rolling (sliding-window) statistical moments.
//!
//! All series are computed in one forward pass from running power sums
//! (`Σx`, `Σx²`, `Σx³`, `Σx⁴`), so each step costs O(1) regardless of the
//! window size. The price is precision: central moments are recovered from
//! raw sums, which cancels catastrophically when the window mean is large
//! compared to its spread, and the sums drift slightly as samples enter and
//! leave. [`reference_moments`] recomputes every window directly and is the
//! golden value the fast path is checked against.

use crate::error::CoreError;
use crate::utils::{fill_missing, first_valid};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const MIN_WINDOW: usize = 3;

/// Variance below this fraction of the mean square is cancellation residue.
const VAR_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stat {
    Mean,
    StdDev,
    Skew,
    Kurt,
}

impl Stat {
    pub const ALL: [Stat; 4] = [Stat::Mean, Stat::StdDev, Stat::Skew, Stat::Kurt];

    /// Highest power sum needed to compute this statistic.
    fn order(self) -> usize {
        match self {
            Stat::Mean => 1,
            Stat::StdDev => 2,
            Stat::Skew => 3,
            Stat::Kurt => 4,
        }
    }

    /// Name of the derived column holding this statistic of `col`.
    pub fn column_name(self, col: &str) -> String {
        let prefix = match self {
            Stat::Mean => "Avg",
            Stat::StdDev => "StdDev",
            Stat::Skew => "Skew",
            Stat::Kurt => "Kurt",
        };
        format!("{prefix}_{col}")
    }
}

/// Moments of one window. Statistics above the requested order are NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub mean: f64,
    pub std_dev: f64,
    pub skew: f64,
    pub kurt: f64,
}

impl Moments {
    pub fn get(&self, stat: Stat) -> f64 {
        match stat {
            Stat::Mean => self.mean,
            Stat::StdDev => self.std_dev,
            Stat::Skew => self.skew,
            Stat::Kurt => self.kurt,
        }
    }

    /// Build moments from the window mean and its central moments.
    ///
    /// A zero standard deviation leaves skewness and kurtosis undefined (NaN).
    fn from_central(mean: f64, mean_sq: f64, central: [f64; 3], order: usize) -> Self {
        let mut moments = Self {
            mean,
            std_dev: f64::NAN,
            skew: f64::NAN,
            kurt: f64::NAN,
        };
        if order < 2 {
            return moments;
        }

        let [mut var, mu_3, mu_4] = central;
        if var <= VAR_FLOOR * mean_sq {
            var = 0.0;
        }
        moments.std_dev = var.sqrt();

        if var > 0.0 {
            if order >= 3 {
                moments.skew = mu_3 / var.powf(1.5);
            }
            if order >= 4 {
                moments.kurt = mu_4 / var.powi(2);
            }
        }
        moments
    }
}

/// Incremental sliding-window moments over a sample stream.
///
/// Keeps the last `win` samples and their power sums up to the order of the
/// requested statistic. NaN samples are replaced by the previous sample.
pub struct RollingAccumulator {
    win: usize,
    order: usize,
    buf: VecDeque<f64>,
    sums: [f64; 4],
    last: Option<f64>,
    n_vals: usize,
}

impl RollingAccumulator {
    pub fn new(win: usize, stat: Stat) -> Result<Self, CoreError> {
        if win < MIN_WINDOW {
            return Err(CoreError::InvalidWindow {
                window: win,
                len: None,
            });
        }
        Ok(Self {
            win,
            order: stat.order(),
            buf: VecDeque::with_capacity(win + 1),
            sums: [0.0; 4],
            last: None,
            n_vals: 0,
        })
    }

    fn with_fill(win: usize, stat: Stat, fill: f64) -> Result<Self, CoreError> {
        let mut acc = Self::new(win, stat)?;
        acc.last = Some(fill);
        Ok(acc)
    }

    /// Push the next sample, returning the moments of the window it completes.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyOrAllMissing`] if the sample is NaN and no
    /// valid sample has been seen yet.
    pub fn push(&mut self, val: f64) -> Result<Option<Moments>, CoreError> {
        self.n_vals += 1;
        let val = match (val.is_nan(), self.last) {
            (false, _) => val,
            (true, Some(last)) => last,
            (true, None) => {
                return Err(CoreError::EmptyOrAllMissing {
                    window: self.win,
                    len: self.n_vals,
                });
            }
        };
        self.last = Some(val);

        self.update(val, 1.0);
        self.buf.push_back(val);
        if self.buf.len() > self.win {
            if let Some(old) = self.buf.pop_front() {
                self.update(old, -1.0);
            }
        }

        if self.buf.len() < self.win {
            return Ok(None);
        }
        Ok(Some(self.moments()))
    }

    fn update(&mut self, val: f64, sign: f64) {
        let mut pow = val;
        for sum in self.sums.iter_mut().take(self.order) {
            *sum += sign * pow;
            pow *= val;
        }
    }

    fn moments(&self) -> Moments {
        let n = self.win as f64;
        let [s_1, s_2, s_3, s_4] = self.sums;
        let mean = s_1 / n;
        let mean_sq = s_2 / n;

        let var = mean_sq - mean.powi(2);
        let mu_3 = (s_3 - 3.0 * mean * s_2 + 3.0 * mean.powi(2) * s_1) / n - mean.powi(3);
        let mu_4 = (s_4 - 4.0 * mean * s_3 + 6.0 * mean.powi(2) * s_2 - 4.0 * mean.powi(3) * s_1)
            / n
            + mean.powi(4);

        Moments::from_central(mean, mean_sq, [var, mu_3, mu_4], self.order)
    }
}

/// One statistic per window position, with its offset into the input.
///
/// Value `i` of [`compact`](Self::compact) covers input samples
/// `i..i + window`; it lines up with input sample `i + offset()`.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingSeries {
    win: usize,
    vals: Vec<f64>,
}

impl RollingSeries {
    pub fn window(&self) -> usize {
        self.win
    }

    pub fn offset(&self) -> usize {
        self.win - 1
    }

    /// The `n - window + 1` defined values.
    pub fn compact(&self) -> &[f64] {
        &self.vals
    }

    /// Values aligned 1:1 with the input, the first `offset()` slots NaN.
    pub fn aligned(&self) -> Vec<f64> {
        let mut aligned = vec![f64::NAN; self.offset()];
        aligned.extend_from_slice(&self.vals);
        aligned
    }
}

/// Moments of every window position for one `(input, window)` pair.
///
/// All statistics share the same window index, so mean, standard deviation,
/// skewness and kurtosis at position `i` describe the same samples.
#[derive(Debug, Clone)]
pub struct RollingMoments {
    win: usize,
    vals: Vec<Moments>,
}

impl RollingMoments {
    pub fn window(&self) -> usize {
        self.win
    }

    pub fn len(&self) -> usize {
        self.vals.len()
    }

    pub fn get(&self, idx: usize) -> Option<&Moments> {
        self.vals.get(idx)
    }

    pub fn series(&self, stat: Stat) -> RollingSeries {
        RollingSeries {
            win: self.win,
            vals: self.vals.iter().map(|moments| moments.get(stat)).collect(),
        }
    }
}

fn check_window(win: usize, len: usize) -> Result<(), CoreError> {
    if win < MIN_WINDOW || win > len {
        return Err(CoreError::InvalidWindow {
            window: win,
            len: Some(len),
        });
    }
    Ok(())
}

/// Rolling moments up to the order of `stat` in a single O(n) pass.
pub fn rolling_moments(vals: &[f64], win: usize, stat: Stat) -> Result<RollingMoments, CoreError> {
    check_window(win, vals.len())?;
    let fill = first_valid(vals, win)?;

    let mut acc = RollingAccumulator::with_fill(win, stat, fill)?;
    let mut moments = Vec::with_capacity(vals.len() - win + 1);
    for &val in vals {
        if let Some(window_moments) = acc.push(val)? {
            moments.push(window_moments);
        }
    }

    Ok(RollingMoments { win, vals: moments })
}

pub fn rolling(vals: &[f64], win: usize, stat: Stat) -> Result<RollingSeries, CoreError> {
    Ok(rolling_moments(vals, win, stat)?.series(stat))
}

pub fn rolling_mean(vals: &[f64], win: usize) -> Result<RollingSeries, CoreError> {
    rolling(vals, win, Stat::Mean)
}

/// Population standard deviation (divides by the window size).
pub fn rolling_std_dev(vals: &[f64], win: usize) -> Result<RollingSeries, CoreError> {
    rolling(vals, win, Stat::StdDev)
}

pub fn rolling_skew(vals: &[f64], win: usize) -> Result<RollingSeries, CoreError> {
    rolling(vals, win, Stat::Skew)
}

/// Raw fourth standardized moment, not excess kurtosis.
pub fn rolling_kurt(vals: &[f64], win: usize) -> Result<RollingSeries, CoreError> {
    rolling(vals, win, Stat::Kurt)
}

/// Moments of a single window computed directly from its samples.
pub fn window_moments(window: &[f64]) -> Moments {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let mean_sq = window.iter().map(|val| val.powi(2)).sum::<f64>() / n;
    let central = |pow: i32| window.iter().map(|val| (val - mean).powi(pow)).sum::<f64>() / n;
    Moments::from_central(mean, mean_sq, [central(2), central(3), central(4)], 4)
}

/// Reference implementation: O(n·W), recomputes every window from scratch.
pub fn reference_moments(vals: &[f64], win: usize) -> Result<RollingMoments, CoreError> {
    check_window(win, vals.len())?;
    let filled = fill_missing(vals, win)?;
    Ok(RollingMoments {
        win,
        vals: filled.windows(win).map(window_moments).collect(),
    })
}

/// Largest deviation of `moments` from the reference on `n_checks` windows.
///
/// Windows are spread evenly over the series, always including the last one,
/// where accumulated drift is largest. Deviations are relative to the
/// reference value, or absolute when it is smaller than one.
pub fn max_deviation(
    vals: &[f64],
    moments: &RollingMoments,
    stat: Stat,
    n_checks: usize,
) -> Result<f64, CoreError> {
    let n_windows = moments.len();
    if n_checks == 0 || n_windows == 0 {
        return Ok(0.0);
    }
    let win = moments.window();
    let filled = fill_missing(vals, win)?;

    let mut max_dev: f64 = 0.0;
    for i_check in 0..n_checks.min(n_windows) {
        let idx = (n_windows - 1) - i_check * (n_windows - 1) / n_checks.min(n_windows);
        let Some(fast) = moments.get(idx) else {
            continue;
        };
        let exact = window_moments(&filled[idx..idx + win]);
        for &s in Stat::ALL.iter().filter(|s| s.order() <= stat.order()) {
            let (a, b) = (fast.get(s), exact.get(s));
            if a.is_nan() && b.is_nan() {
                continue;
            }
            max_dev = max_dev.max((a - b).abs() / b.abs().max(1.0));
        }
    }
    Ok(if max_dev.is_nan() { f64::INFINITY } else { max_dev })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;
    use rand_distr::{Distribution, Normal};

    fn noisy(n_vals: usize, seed: u64) -> Vec<f64> {
        let mut rng = ChaCha12Rng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 3.0).unwrap();
        (0..n_vals)
            .map(|i| 100.0 + (i as f64 * 0.01).sin() * 20.0 + noise.sample(&mut rng))
            .collect()
    }

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() <= tol * b.abs().max(1.0),
            "{a} differs from {b} by more than {tol}"
        );
    }

    #[test]
    fn mean_compact_scenario() {
        let series = rolling_mean(&[1.0, 2.0, 3.0, 4.0, 5.0], 3).unwrap();
        assert_eq!(series.compact(), &[2.0, 3.0, 4.0]);
        assert_eq!(series.offset(), 2);
    }

    #[test]
    fn aligned_is_compact_shifted() {
        let vals = noisy(500, 1);
        let win = 25;
        let series = rolling_mean(&vals, win).unwrap();
        let aligned = series.aligned();

        assert_eq!(aligned.len(), vals.len());
        assert!(aligned[..win - 1].iter().all(|val| val.is_nan()));
        assert_eq!(&aligned[win - 1..], series.compact());
    }

    #[test]
    fn std_dev_single_window_scenario() {
        let vals = [500.0, 2.0, 100.0, 450.0, 600.0];
        let series = rolling_std_dev(&vals, 5).unwrap();
        assert_eq!(series.compact().len(), 1);

        let mean = 330.4;
        let expected = (vals.iter().map(|val| (val - mean).powi(2)).sum::<f64>() / 5.0).sqrt();
        assert_close(series.compact()[0], expected, 1e-12);
        assert_close(series.compact()[0], 235.2374, 1e-6);
    }

    #[test]
    fn skew_and_kurt_match_direct_computation() {
        let vals = [500.0, 2.0, 100.0, 450.0, 600.0];
        let exact = window_moments(&vals);
        assert_close(rolling_skew(&vals, 5).unwrap().compact()[0], exact.skew, 1e-9);
        assert_close(rolling_kurt(&vals, 5).unwrap().compact()[0], exact.kurt, 1e-9);
        assert!(exact.skew < 0.0);
        assert!(exact.kurt > 1.0);
    }

    #[test]
    fn constant_window_has_zero_spread() {
        let vals = vec![0.1; 40];
        let moments = rolling_moments(&vals, 7, Stat::Kurt).unwrap();
        for stat_moments in &moments.vals {
            assert_eq!(stat_moments.std_dev, 0.0);
            assert!(stat_moments.skew.is_nan());
            assert!(stat_moments.kurt.is_nan());
        }
    }

    #[test]
    fn full_length_window_yields_one_value() {
        let vals = noisy(64, 2);
        for stat in Stat::ALL {
            assert_eq!(rolling(&vals, 64, stat).unwrap().compact().len(), 1);
        }
    }

    #[test]
    fn invalid_windows_are_rejected() {
        let vals = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            rolling_mean(&vals, 2).unwrap_err(),
            CoreError::InvalidWindow {
                window: 2,
                len: Some(4)
            }
        );
        assert_eq!(
            rolling_mean(&vals, 5).unwrap_err(),
            CoreError::InvalidWindow {
                window: 5,
                len: Some(4)
            }
        );
        assert!(RollingAccumulator::new(2, Stat::Mean).is_err());
    }

    #[test]
    fn missing_values_are_forward_filled() {
        let series = rolling_mean(&[1.0, f64::NAN, 4.0, f64::NAN], 3).unwrap();
        assert_eq!(series.compact(), &[2.0, 3.0]);

        let series = rolling_mean(&[f64::NAN, 3.0, 6.0], 3).unwrap();
        assert_eq!(series.compact(), &[4.0]);
    }

    #[test]
    fn all_missing_first_window_is_fatal() {
        let vals = [f64::NAN; 6];
        assert_eq!(
            rolling_std_dev(&vals, 3).unwrap_err(),
            CoreError::EmptyOrAllMissing { window: 3, len: 6 }
        );

        let mut acc = RollingAccumulator::new(3, Stat::Mean).unwrap();
        assert!(acc.push(f64::NAN).is_err());
    }

    #[test]
    fn statistics_share_window_index() {
        let vals = noisy(1_000, 3);
        let win = 50;
        let moments = rolling_moments(&vals, win, Stat::Kurt).unwrap();
        assert_eq!(moments.len(), vals.len() - win + 1);
        assert_eq!(moments.series(Stat::Mean), rolling_mean(&vals, win).unwrap());
        assert_eq!(moments.series(Stat::StdDev), rolling_std_dev(&vals, win).unwrap());
        assert_eq!(moments.series(Stat::Skew), rolling_skew(&vals, win).unwrap());
        assert_eq!(moments.series(Stat::Kurt), rolling_kurt(&vals, win).unwrap());
    }

    #[test]
    fn fast_path_matches_reference() {
        let mut vals = noisy(5_000, 4);
        vals[1_234] = f64::NAN;
        vals[3_000] = f64::NAN;
        let win = 200;

        let fast = rolling_moments(&vals, win, Stat::Kurt).unwrap();
        let exact = reference_moments(&vals, win).unwrap();
        assert_eq!(fast.len(), exact.len());
        for idx in 0..fast.len() {
            let (a, b) = (fast.vals[idx], exact.vals[idx]);
            assert_close(a.mean, b.mean, 1e-10);
            assert_close(a.std_dev, b.std_dev, 1e-6);
            assert_close(a.skew, b.skew, 1e-4);
            assert_close(a.kurt, b.kurt, 1e-4);
        }

        let dev = max_deviation(&vals, &fast, Stat::Kurt, 16).unwrap();
        assert!(dev < 1e-4, "deviation {dev}");
    }

    #[test]
    fn streaming_matches_batch() {
        let vals = noisy(300, 5);
        let mut acc = RollingAccumulator::new(30, Stat::StdDev).unwrap();
        let streamed: Vec<f64> = vals
            .iter()
            .filter_map(|&val| acc.push(val).unwrap())
            .map(|moments| moments.std_dev)
            .collect();
        assert_eq!(streamed, rolling_std_dev(&vals, 30).unwrap().compact());
    }

    #[test]
    fn derived_column_names() {
        assert_eq!(Stat::Mean.column_name("Current(A)"), "Avg_Current(A)");
        assert_eq!(Stat::Kurt.column_name("Voltage(V)"), "Kurt_Voltage(V)");
    }
}
