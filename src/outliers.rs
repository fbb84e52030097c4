//! Rolling z-score outlier filter.
//!
//! For each knot a window of fixed duration is centred on it (closed on both
//! sides). The value is kept when its z-score against the window's mean and
//! sample standard deviation is within `threshold`; otherwise, including when
//! the z-score is undefined, it is replaced by the window mean.

use chrono::TimeDelta;

use crate::axis::{TimeAxis, MILLIS_PER_DAY};
use crate::error::{Error, Result};
use crate::estimator::{ensure_native, Estimator, FitOptions, Params, SeriesFit};
use crate::grid::Cadence;

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalOutliers {
    window: TimeDelta,
    threshold: f64,
}

/// Parses `P20D`-style durations, or the shorthand `20D` / `12H`.
fn parse_window(s: &str) -> Result<TimeDelta> {
    let t = s.trim();
    let iso = if t.starts_with(['P', 'p']) {
        t.to_string()
    } else if t.ends_with(['H', 'h', 'S', 's']) {
        format!("PT{}", t)
    } else {
        format!("P{}", t)
    };
    match Cadence::parse(&iso) {
        Ok(Cadence::Fixed(d)) => Ok(d),
        _ => Err(Error::parameter("window", format!("expected a fixed duration, got `{}`", s))),
    }
}

fn format_window(d: TimeDelta) -> String {
    Cadence::Fixed(d).to_string()
}

impl TemporalOutliers {
    pub fn new(window: &str, threshold: f64) -> Result<Self> {
        Self::with_window(parse_window(window)?, threshold)
    }

    pub fn with_window(window: TimeDelta, threshold: f64) -> Result<Self> {
        if window <= TimeDelta::zero() {
            return Err(Error::parameter("window", "must be positive"));
        }
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(Error::parameter("threshold", format!("must be positive, got {}", threshold)));
        }
        Ok(Self { window, threshold })
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Filters one series; non-finite values count as missing.
    pub fn filter(&self, axis: &TimeAxis, values: &[f64]) -> Vec<f64> {
        let t = axis.offsets();
        let n = t.len();
        let half = self.window.num_milliseconds() as f64 / MILLIS_PER_DAY / 2.0;
        let mut out = Vec::with_capacity(n);

        // Running sums over finite values in [lo, hi).
        let (mut lo, mut hi) = (0usize, 0usize);
        let (mut sum, mut sum2, mut cnt) = (0.0f64, 0.0f64, 0usize);
        for i in 0..n {
            while hi < n && t[hi] <= t[i] + half {
                if values[hi].is_finite() {
                    sum += values[hi];
                    sum2 += values[hi] * values[hi];
                    cnt += 1;
                }
                hi += 1;
            }
            while t[lo] < t[i] - half {
                if values[lo].is_finite() {
                    sum -= values[lo];
                    sum2 -= values[lo] * values[lo];
                    cnt -= 1;
                }
                lo += 1;
            }

            let mean = if cnt > 0 { sum / cnt as f64 } else { f64::NAN };
            let std = if cnt > 1 {
                ((sum2 - sum * mean) / (cnt - 1) as f64).max(0.0).sqrt()
            } else {
                f64::NAN
            };
            let z = (values[i] - mean) / std;
            out.push(if z.is_finite() && z.abs() <= self.threshold { values[i] } else { mean });
        }
        out
    }
}

impl Estimator for TemporalOutliers {
    fn name(&self) -> &'static str {
        "temporal_outliers"
    }

    fn fit_transform(
        &self,
        axis: &TimeAxis,
        values: &[f64],
        _weights: Option<&[f64]>,
        options: &FitOptions<'_>,
    ) -> Result<SeriesFit> {
        ensure_native(self.name(), axis, options)?;
        if values.len() != axis.len() {
            return Err(Error::invalid(format!(
                "series length {} does not match time axis length {}",
                values.len(),
                axis.len()
            )));
        }
        Ok(SeriesFit { values: self.filter(axis, values), weights: None })
    }

    fn params(&self, _deep: bool) -> Params {
        let mut p = Params::new();
        p.insert("window".into(), format_window(self.window).into());
        p.insert("threshold".into(), self.threshold.into());
        p
    }

    fn with_params(&self, updates: &Params) -> Result<Self> {
        let (mut window, mut threshold) = (self.window, self.threshold);
        for (key, value) in updates {
            match key.as_str() {
                "window" => window = parse_window(value.as_str(key)?)?,
                "threshold" => threshold = value.as_f64(key)?,
                _ => return Err(Error::UnknownParameter(key.clone())),
            }
        }
        Self::with_window(window, threshold)
    }

    fn supports_resampling(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::days;
    use crate::estimator::params;
    use crate::grid::EvalPlan;
    use approx::assert_abs_diff_eq;

    #[test]
    fn parses_windows() {
        assert_eq!(parse_window("P20D").unwrap(), TimeDelta::days(20));
        assert_eq!(parse_window("20D").unwrap(), TimeDelta::days(20));
        assert_eq!(parse_window("12H").unwrap(), TimeDelta::hours(12));
        assert!(parse_window("P1M").is_err());
        assert!(TemporalOutliers::new("P0D", 3.0).is_err());
        assert!(TemporalOutliers::new("P5D", 0.0).is_err());
    }

    #[test]
    fn spike_is_replaced_by_window_mean() {
        let axis = TimeAxis::new(days(&(0..21).collect::<Vec<_>>())).unwrap();
        let mut y = vec![1.0; 21];
        y[10] = 100.0;
        for (i, v) in y.iter_mut().enumerate() {
            *v += 0.01 * (i % 3) as f64;
        }
        let f = TemporalOutliers::new("P20D", 3.0).unwrap();
        let out = f.filter(&axis, &y);
        let window_mean = y.iter().sum::<f64>() / 21.0;
        assert_abs_diff_eq!(out[10], window_mean, epsilon = 1e-9);
        assert_eq!(out[0], y[0]);
        assert_eq!(out[20], y[20]);
    }

    #[test]
    fn missing_values_take_the_window_mean() {
        let axis = TimeAxis::new(days(&[0, 1, 2, 3, 4])).unwrap();
        let y = [1.0, 2.0, f64::NAN, 4.0, 5.0];
        let out = TemporalOutliers::new("P2D", 3.0).unwrap().filter(&axis, &y);
        assert_abs_diff_eq!(out[2], 3.0, epsilon = 1e-12);
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn constant_window_keeps_its_mean() {
        let axis = TimeAxis::new(days(&[0, 1, 2])).unwrap();
        let out = TemporalOutliers::new("P4D", 1.0).unwrap().filter(&axis, &[2.0, 2.0, 2.0]);
        assert_eq!(out, vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn refuses_to_resample() {
        let axis = TimeAxis::new(days(&[0, 3, 10])).unwrap();
        let grid = TimeAxis::new(days(&[0, 5, 10])).unwrap();
        let plan = EvalPlan::new(&axis, &grid).unwrap();
        let f = TemporalOutliers::new("P5D", 2.0).unwrap();
        let err = f.fit_transform(&axis, &[1.0, 2.0, 3.0], None, &FitOptions::default().with_plan(&plan));
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn params_round_trip() {
        let f = TemporalOutliers::new("20D", 3.0).unwrap();
        let p = f.params(false);
        assert_eq!(p["window"].as_str("window").unwrap(), "P20D");
        assert_eq!(f.with_params(&p).unwrap(), f);
        let g = f.with_params(&params([("threshold", 2.5)])).unwrap();
        assert_eq!(g.threshold(), 2.5);
        assert!(matches!(f.with_params(&params([("span", 1.0)])), Err(Error::UnknownParameter(_))));
    }
}
