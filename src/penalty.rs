//! Difference penalty `P = λ·DᵀD` on an irregular axis, and the
//! per-invocation cache that shares it between series.
//!
//! Rows of `D` are divided differences: each level divides by the elapsed
//! time spanned by its knots, so roughness is measured per unit time rather
//! than per sample. Order-`d` rows are scaled by `d!` so that on a unit-spaced
//! axis they coincide with ordinary `d`-th differences.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::axis::StepNormalization;

const GAP_EPS: f64 = 1e-10;

// -------------------- build divided-difference stencils --------------------

fn build_divdiff_stencils(x: &[f64], d: usize) -> Vec<Vec<f64>> {
    let n = x.len();
    if d == 0 {
        return (0..n).map(|_| vec![1.0]).collect();
    }
    if n <= d {
        return Vec::new();
    }

    let mut coeffs: Vec<Vec<f64>> = Vec::with_capacity(n - 1);
    for i in 0..(n - 1) {
        let dx = (x[i + 1] - x[i]).max(GAP_EPS);
        coeffs.push(vec![-1.0 / dx, 1.0 / dx]);
    }

    for k in 2..=d {
        let prev = coeffs;
        let m_new = prev.len() - 1;
        let width_prev = prev[0].len();
        let width_new = width_prev + 1;

        let mut next: Vec<Vec<f64>> = vec![vec![0.0; width_new]; m_new];
        for i in 0..m_new {
            for j in 0..width_prev {
                next[i][j + 1] += prev[i + 1][j];
                next[i][j] -= prev[i][j];
            }
        }
        // k multiplies the running factorial in along with 1/span.
        for (i, row) in next.iter_mut().enumerate() {
            let v = k as f64 / (x[i + k] - x[i]).max(GAP_EPS);
            for c in row.iter_mut() {
                *c *= v;
            }
        }
        coeffs = next;
    }
    coeffs
}

// -------------------- banded P --------------------

/// Lower band of a symmetric penalty matrix: `band[j*n + i] = P[i, i-j]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyBand {
    n: usize,
    k: usize,
    band: Vec<f64>,
}

impl PenaltyBand {
    /// Builds `λ·DᵀD` for knots at `x` with difference order `d`.
    pub fn build(x: &[f64], d: usize, lambda: f64) -> Self {
        let n = x.len();
        let k = d;
        let st = build_divdiff_stencils(x, d); // (n-d, d+1)
        let mut band = vec![0.0; (k + 1) * n];

        for (i, a) in st.iter().enumerate() {
            for p in 0..=d {
                let cp = i + p;
                for q in 0..=p {
                    let j = p - q;
                    band[j * n + cp] += lambda * a[p] * a[q];
                }
            }
        }
        Self { n, k, band }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Half-bandwidth, equal to the difference order.
    pub fn half_bandwidth(&self) -> usize {
        self.k
    }

    /// `P[i, i-j]` for `0 <= j <= k`, `j <= i`.
    #[inline]
    pub fn lower(&self, j: usize, i: usize) -> f64 {
        self.band[j * self.n + i]
    }

    /// Symmetric element access; zero outside the band.
    pub fn get(&self, r: usize, c: usize) -> f64 {
        let (i, j) = if r >= c { (r, r - c) } else { (c, c - r) };
        if j > self.k { 0.0 } else { self.lower(j, i) }
    }

    /// `zᵀ P z`.
    pub fn quadratic_form(&self, z: &[f64]) -> f64 {
        let n = self.n;
        let mut acc = 0.0;
        for i in 0..n {
            acc += self.lower(0, i) * z[i] * z[i];
            for j in 1..=self.k.min(i) {
                acc += 2.0 * self.lower(j, i) * z[i] * z[i - j];
            }
        }
        acc
    }
}

// -------------------- cache --------------------

/// Content address of a penalty: everything `PenaltyBand::build` depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PenaltyKey {
    order: usize,
    lambda_bits: u64,
    normalization: StepNormalization,
    gaps: Vec<u64>,
}

impl PenaltyKey {
    /// Keys on the ordered gap sequence of `offsets` (days).
    pub fn new(offsets: &[f64], order: usize, lambda: f64, normalization: StepNormalization) -> Self {
        let gaps = offsets.windows(2).map(|w| (w[1] - w[0]).to_bits()).collect();
        Self { order, lambda_bits: lambda.to_bits(), normalization, gaps }
    }
}

/// Build-once, read-many store of penalty bands for one invocation.
///
/// Concurrent misses on the same key may build twice; the first insert wins
/// and later builds are dropped.
#[derive(Debug, Default)]
pub struct PenaltyCache {
    map: DashMap<PenaltyKey, Arc<PenaltyBand>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl PenaltyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the band for the day offsets `offsets`, building it on a miss.
    pub fn get_or_build(
        &self,
        offsets: &[f64],
        order: usize,
        lambda: f64,
        normalization: StepNormalization,
    ) -> Arc<PenaltyBand> {
        let key = PenaltyKey::new(offsets, order, lambda, normalization);
        if let Some(band) = self.map.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(band.value());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        log::debug!("penalty cache miss: n={} order={} lambda={}", offsets.len(), order, lambda);
        let x = normalization.apply(offsets);
        let built = Arc::new(PenaltyBand::build(&x, order, lambda));
        Arc::clone(self.map.entry(key).or_insert(built).value())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// `(hits, misses)` so far.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn unit_spacing_matches_classic_second_difference() {
        let x: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let p = PenaltyBand::build(&x, 2, 1.0);
        // D2 = [1 -2 1] rows; DᵀD first row is [1, -2, 1, 0, 0].
        assert_abs_diff_eq!(p.get(0, 0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.get(0, 1), -2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.get(0, 2), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.get(2, 2), 6.0, epsilon = 1e-12);
        assert_eq!(p.get(0, 3), 0.0);
        assert_eq!(p.half_bandwidth(), 2);
    }

    #[test]
    fn band_is_symmetric_and_scaled_by_lambda() {
        let x = [0.0, 1.0, 3.0, 4.0, 9.0, 10.0];
        let p1 = PenaltyBand::build(&x, 2, 1.0);
        let p7 = PenaltyBand::build(&x, 2, 7.0);
        for r in 0..6 {
            for c in 0..6 {
                assert_eq!(p1.get(r, c), p1.get(c, r));
                assert_abs_diff_eq!(p7.get(r, c), 7.0 * p1.get(r, c), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn linear_trend_has_zero_roughness_on_irregular_axis() {
        let x = [0.0, 1.0, 3.0, 4.0, 9.0, 30.0];
        let p = PenaltyBand::build(&x, 2, 5.0);
        let z: Vec<f64> = x.iter().map(|v| 2.0 * v - 1.0).collect();
        assert_abs_diff_eq!(p.quadratic_form(&z), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn longer_gaps_are_penalized_less_per_sample() {
        let dense = PenaltyBand::build(&[0.0, 1.0, 2.0], 2, 1.0);
        let sparse = PenaltyBand::build(&[0.0, 30.0, 60.0], 2, 1.0);
        let z = [0.0, 1.0, 0.0];
        assert!(sparse.quadratic_form(&z) < dense.quadratic_form(&z));
    }

    #[test]
    fn cache_reuses_identical_axes() {
        let cache = PenaltyCache::new();
        let a = cache.get_or_build(&[0.0, 1.0, 2.0, 5.0], 2, 10.0, StepNormalization::None);
        let b = cache.get_or_build(&[0.0, 1.0, 2.0, 5.0], 2, 10.0, StepNormalization::None);
        assert!(Arc::ptr_eq(&a, &b));
        let _ = cache.get_or_build(&[0.0, 3.0, 4.0, 5.0], 2, 10.0, StepNormalization::None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats(), (1, 2));
    }

    #[test]
    fn cache_key_is_order_sensitive() {
        let a = PenaltyKey::new(&[0.0, 1.0, 3.0], 2, 1.0, StepNormalization::None);
        let b = PenaltyKey::new(&[0.0, 2.0, 3.0], 2, 1.0, StepNormalization::None);
        assert_ne!(a, b);
    }
}
