//! Time axis canonicalization and weight derivation.
//!
//! Timestamps are `chrono::DateTime<Utc>`. Internally every axis is also
//! carried as fractional days elapsed since its first knot, which is the
//! unit the difference penalty is expressed in.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::robust::median_inplace;

pub type Timestamp = DateTime<Utc>;

pub(crate) const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Elapsed days between two timestamps (millisecond resolution).
pub fn days_between(from: Timestamp, to: Timestamp) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// A strictly increasing, de-duplicated sequence of knots.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis {
    times: Vec<Timestamp>,
    offsets: Vec<f64>,
}

impl TimeAxis {
    /// Builds an axis from timestamps that must already be strictly increasing.
    pub fn new(times: Vec<Timestamp>) -> Result<Self> {
        if times.is_empty() {
            return Err(Error::invalid("time axis is empty"));
        }
        for (i, w) in times.windows(2).enumerate() {
            if w[1] <= w[0] {
                return Err(Error::invalid(format!(
                    "timestamps must be strictly increasing (position {}: {} after {})",
                    i + 1,
                    w[1],
                    w[0]
                )));
            }
        }
        let t0 = times[0];
        let offsets = times.iter().map(|&t| days_between(t0, t)).collect();
        Ok(Self { times, offsets })
    }

    /// Drops exact duplicate timestamps, keeping the first occurrence.
    ///
    /// Returns the canonical axis and, for each knot, the position in `raw`
    /// it was taken from. Any remaining decrease is `InvalidInput`.
    pub fn canonicalize(raw: &[Timestamp]) -> Result<(Self, Vec<usize>)> {
        let mut times = Vec::with_capacity(raw.len());
        let mut keep = Vec::with_capacity(raw.len());
        for (i, &t) in raw.iter().enumerate() {
            match times.last() {
                Some(&last) if t == last => continue,
                Some(&last) if t < last => {
                    return Err(Error::invalid(format!(
                        "timestamps are not monotonic at position {}: {} after {}",
                        i, t, last
                    )));
                }
                _ => {}
            }
            times.push(t);
            keep.push(i);
        }
        if keep.len() < raw.len() {
            log::debug!("dropped {} duplicate timestamps", raw.len() - keep.len());
        }
        Ok((Self::new(times)?, keep))
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[Timestamp] {
        &self.times
    }

    /// Fractional days since the first knot.
    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub fn start(&self) -> Timestamp {
        self.times[0]
    }

    pub fn end(&self) -> Timestamp {
        self.times[self.times.len() - 1]
    }
}

// -------------------- step normalization --------------------

/// How elapsed time is scaled before the penalty is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StepNormalization {
    /// Penalize per elapsed day.
    #[default]
    None,
    /// Rescale so the mean step is one unit.
    Mean,
    /// Rescale so the median positive step is one unit.
    Median,
}

impl StepNormalization {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "days" => Ok(StepNormalization::None),
            "mean" => Ok(StepNormalization::Mean),
            "median" => Ok(StepNormalization::Median),
            _ => Err(Error::parameter("normalize", format!("unknown normalization `{}`", s))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepNormalization::None => "none",
            StepNormalization::Mean => "mean",
            StepNormalization::Median => "median",
        }
    }

    /// Applies the normalization to day offsets starting at zero.
    pub fn apply(self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        if n <= 1 {
            return x.to_vec();
        }
        let x0 = x[0];
        let scale = match self {
            StepNormalization::None => 1.0,
            StepNormalization::Mean => (x[n - 1] - x0) / (n - 1) as f64,
            StepNormalization::Median => {
                let mut dx: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).filter(|v| *v > 0.0).collect();
                if dx.is_empty() { 1.0 } else { median_inplace(&mut dx) }
            }
        };
        let s = if scale > 0.0 { scale } else { 1.0 };
        x.iter().map(|v| (v - x0) / s).collect()
    }
}

// -------------------- weights --------------------

/// Derives per-observation weights.
///
/// Explicit weights are used when given, otherwise 1.0. Any non-finite value
/// is a missing observation and gets weight 0 whatever was supplied, as does a
/// non-finite weight. Negative weights are rejected.
pub fn derive_weights(values: &[f64], weights: Option<&[f64]>) -> Result<Vec<f64>> {
    match weights {
        None => Ok(values.iter().map(|v| if v.is_finite() { 1.0 } else { 0.0 }).collect()),
        Some(w) => {
            if w.len() != values.len() {
                return Err(Error::invalid(format!(
                    "weights length {} does not match values length {}",
                    w.len(),
                    values.len()
                )));
            }
            values
                .iter()
                .zip(w)
                .map(|(&v, &wt)| {
                    if wt < 0.0 {
                        Err(Error::invalid(format!("negative weight {}", wt)))
                    } else if !v.is_finite() || !wt.is_finite() {
                        Ok(0.0)
                    } else {
                        Ok(wt)
                    }
                })
                .collect()
        }
    }
}

/// Observations on a canonical axis, ready for a penalized fit.
#[derive(Debug, Clone)]
pub struct Observations {
    /// Values with missing entries replaced by 0 (their weight is 0).
    pub values: Vec<f64>,
    pub weights: Vec<f64>,
}

impl Observations {
    /// Validates lengths, derives weights and checks there are at least
    /// `order + 1` weighted observations.
    pub fn prepare(axis: &TimeAxis, values: &[f64], weights: Option<&[f64]>, order: usize) -> Result<Self> {
        if values.len() != axis.len() {
            return Err(Error::invalid(format!(
                "series length {} does not match time axis length {}",
                values.len(),
                axis.len()
            )));
        }
        let weights = derive_weights(values, weights)?;
        let actual = weights.iter().filter(|w| **w > 0.0).count();
        if actual < order + 1 {
            return Err(Error::InsufficientData { required: order + 1, actual });
        }
        let values = values
            .iter()
            .zip(&weights)
            .map(|(&v, &w)| if w > 0.0 { v } else { 0.0 })
            .collect();
        Ok(Self { values, weights })
    }
}

#[cfg(test)]
pub(crate) fn days(offsets: &[i64]) -> Vec<Timestamp> {
    use chrono::TimeZone;
    let t0 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
    offsets.iter().map(|&d| t0 + chrono::TimeDelta::days(d)).collect()
}
