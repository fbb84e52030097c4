// -------------------- robust re-weighting --------------------
//
// Iteratively re-weighted fits: after each solve, residuals at weighted knots
// are standardized by a robust scale and mapped through a weighting function.
// The effective weight of a knot is base weight * robust weight.

use crate::error::{Error, Result};

const MAD_CONST: f64 = 1.4826;
const SCALE_EPS: f64 = 1e-10;

pub(crate) fn median_inplace(v: &mut [f64]) -> f64 {
    let n = v.len();
    if n == 0 {
        return 0.0;
    }
    let mid = n / 2;
    v.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let m2 = v[mid];
    if n % 2 == 1 {
        m2
    } else {
        let max_lower = v[..mid].iter().copied().fold(v[0], f64::max);
        0.5 * (max_lower + m2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Weighting {
    #[default]
    Tukey,
    Huber,
    Cauchy,
    Welsch,
    Fair,
    Hampel,
}

impl Weighting {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tukey" | "bisquare" => Ok(Weighting::Tukey),
            "huber" => Ok(Weighting::Huber),
            "cauchy" => Ok(Weighting::Cauchy),
            "welsch" => Ok(Weighting::Welsch),
            "fair" => Ok(Weighting::Fair),
            "hampel" => Ok(Weighting::Hampel),
            _ => Err(Error::parameter("weighting", format!("unknown weighting `{}`", s))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Weighting::Tukey => "tukey",
            Weighting::Huber => "huber",
            Weighting::Cauchy => "cauchy",
            Weighting::Welsch => "welsch",
            Weighting::Fair => "fair",
            Weighting::Hampel => "hampel",
        }
    }

    /// Conventional 95%-efficiency constants; only Hampel uses `a` and `b`.
    pub fn default_tuning(self) -> (f64, f64, f64) {
        match self {
            Weighting::Tukey => (0.0, 0.0, 4.685),
            Weighting::Huber => (0.0, 0.0, 1.345),
            Weighting::Cauchy => (0.0, 0.0, 2.385),
            Weighting::Welsch => (0.0, 0.0, 2.985),
            Weighting::Fair => (0.0, 0.0, 1.3998),
            Weighting::Hampel => (1.5, 3.5, 8.0),
        }
    }

    /// Weight for a standardized residual `u`.
    pub fn weight(self, u: f64, (a, b, c): (f64, f64, f64)) -> f64 {
        let t = u.abs();
        match self {
            Weighting::Tukey => {
                let r = t / c;
                if r < 1.0 {
                    let v = 1.0 - r * r;
                    v * v
                } else {
                    0.0
                }
            }
            Weighting::Huber => {
                if t <= c {
                    1.0
                } else {
                    c / t.max(1e-12)
                }
            }
            Weighting::Cauchy => {
                let r = u / c;
                1.0 / (1.0 + r * r)
            }
            Weighting::Welsch => {
                let r = u / c;
                (-r * r).exp()
            }
            Weighting::Fair => 1.0 / (1.0 + t / c),
            Weighting::Hampel => {
                if t <= a {
                    1.0
                } else if t <= b {
                    a / t.max(1e-12)
                } else if t <= c {
                    (a * (c - t)) / (t.max(1e-12) * (c - b).max(1e-12))
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleEstimator {
    #[default]
    Mad,
    Huber,
}

impl ScaleEstimator {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mad" => Ok(ScaleEstimator::Mad),
            "huber" => Ok(ScaleEstimator::Huber),
            _ => Err(Error::parameter("scale", format!("unknown scale estimator `{}`", s))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScaleEstimator::Mad => "mad",
            ScaleEstimator::Huber => "huber",
        }
    }

    fn estimate(self, res: &[f64], mask: &[bool]) -> f64 {
        match self {
            ScaleEstimator::Mad => mad_scale(res, mask),
            ScaleEstimator::Huber => huber_mscale(res, mask, 1.345, 30),
        }
    }
}

fn mad_scale(res: &[f64], mask: &[bool]) -> f64 {
    let mut vals: Vec<f64> = res
        .iter()
        .zip(mask)
        .filter(|(r, m)| **m && r.is_finite())
        .map(|(r, _)| r.abs())
        .collect();
    if vals.is_empty() {
        return SCALE_EPS;
    }
    let med = median_inplace(&mut vals);
    (MAD_CONST * med).max(SCALE_EPS)
}

fn huber_mscale(res: &[f64], mask: &[bool], c_h: f64, iters: usize) -> f64 {
    let mut s = mad_scale(res, mask);
    for _ in 0..iters {
        let cap2 = (c_h * s) * (c_h * s);
        let mut sum = 0.0;
        let mut cnt = 0.0;
        for (r, _) in res.iter().zip(mask).filter(|(r, m)| **m && r.is_finite()) {
            sum += (r * r).min(cap2);
            cnt += 1.0;
        }
        if cnt == 0.0 {
            return SCALE_EPS;
        }
        let s_new = (sum / cnt).sqrt().max(SCALE_EPS);
        let rel = (s_new - s).abs() / s.max(SCALE_EPS);
        s = s_new;
        if rel < 1e-4 {
            break;
        }
    }
    s
}

/// Robust re-weighting settings of the Whittaker kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustConfig {
    /// Re-weighted solves after the initial one; 0 disables re-weighting.
    pub iterations: usize,
    pub weighting: Weighting,
    pub scale: ScaleEstimator,
    /// `(a, b, c)`; `None` selects [`Weighting::default_tuning`].
    pub tuning: Option<(f64, f64, f64)>,
}

impl Default for RobustConfig {
    fn default() -> Self {
        Self { iterations: 0, weighting: Weighting::Tukey, scale: ScaleEstimator::Mad, tuning: None }
    }
}

impl RobustConfig {
    pub fn tuning(&self) -> (f64, f64, f64) {
        self.tuning.unwrap_or_else(|| self.weighting.default_tuning())
    }
}

/// Runs the initial solve and `cfg.iterations` re-weighted solves.
///
/// `solve` receives the effective weights and returns the reconstruction on
/// the same knots. Returns the last reconstruction and the weights it used.
pub(crate) fn irls<F>(values: &[f64], base: &[f64], cfg: &RobustConfig, mut solve: F) -> Result<(Vec<f64>, Vec<f64>)>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>>,
{
    let n = values.len();
    let tuning = cfg.tuning();
    let mask: Vec<bool> = base.iter().map(|w| *w > 0.0).collect();
    let mut w = base.to_vec();
    let mut z = solve(&w)?;
    let mut res = vec![f64::NAN; n];

    for _ in 0..cfg.iterations {
        for i in 0..n {
            res[i] = if mask[i] { values[i] - z[i] } else { f64::NAN };
        }
        let s = cfg.scale.estimate(&res, &mask);
        for i in 0..n {
            w[i] = if mask[i] { base[i] * cfg.weighting.weight(res[i] / s, tuning) } else { 0.0 };
        }
        z = solve(&w)?;
    }
    Ok((z, w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median_inplace(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median_inplace(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median_inplace(&mut []), 0.0);
    }

    #[test]
    fn weights_are_one_at_zero_residual() {
        let all = [
            Weighting::Tukey,
            Weighting::Huber,
            Weighting::Cauchy,
            Weighting::Welsch,
            Weighting::Fair,
            Weighting::Hampel,
        ];
        for w in all {
            assert_abs_diff_eq!(w.weight(0.0, w.default_tuning()), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn tukey_rejects_beyond_cutoff() {
        let t = Weighting::Tukey.default_tuning();
        assert_eq!(Weighting::Tukey.weight(5.0, t), 0.0);
        assert!(Weighting::Tukey.weight(2.0, t) > 0.0);
    }

    #[test]
    fn parse_round_trips_names() {
        assert_eq!(Weighting::parse("Bisquare").unwrap(), Weighting::Tukey);
        assert_eq!(ScaleEstimator::parse("HUBER").unwrap(), ScaleEstimator::Huber);
        assert!(Weighting::parse("gauss").is_err());
    }

    #[test]
    fn irls_downweights_outlier() {
        let values = [1.0, 1.0, 1.0, 50.0, 1.0, 1.0, 1.0];
        let base = [1.0; 7];
        // Stand-in solver: weighted mean broadcast to every knot.
        let solve = |w: &[f64]| -> Result<Vec<f64>> {
            let sw: f64 = w.iter().sum();
            let m = values.iter().zip(w).map(|(v, w)| v * w).sum::<f64>() / sw;
            Ok(vec![m; values.len()])
        };
        let cfg = RobustConfig { iterations: 3, ..RobustConfig::default() };
        let (z, w) = irls(&values, &base, &cfg, solve).unwrap();
        assert_eq!(w[3], 0.0);
        assert_abs_diff_eq!(z[0], 1.0, epsilon = 1e-9);
    }
}
