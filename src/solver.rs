// -------------------- SPD banded Cholesky --------------------
//
// Solves (diag(w) + P + ridge·I) z = w ⊙ y in O(n·k²) time and O(n·k) memory,
// with P held as a lower band (see `PenaltyBand`).

use crate::error::{Error, Result};
use crate::penalty::PenaltyBand;

/// Pivots at or below this fraction of their unreduced diagonal are singular.
const PIVOT_RTOL: f64 = 1e-13;
/// Relative ridge applied on the single retry after a breakdown.
const RETRY_RIDGE: f64 = 1e-8;

/// Lower Cholesky factor in the same band layout as `PenaltyBand`.
struct BandCholesky {
    n: usize,
    k: usize,
    lb: Vec<f64>,
}

impl BandCholesky {
    fn factor(p: &PenaltyBand, w: &[f64], ridge: f64) -> std::result::Result<Self, usize> {
        let n = p.n();
        let k = p.half_bandwidth();
        let mut lb = vec![0.0f64; (k + 1) * n];

        for i in 0..n {
            let a_ii = w[i] + p.lower(0, i) + ridge;
            let mut diag = a_ii;
            let tmax = i.min(k);
            for t in 1..=tmax {
                let v = lb[t * n + i];
                diag -= v * v;
            }
            if !(diag > PIVOT_RTOL * a_ii.abs().max(1.0)) {
                return Err(i);
            }
            let lii = diag.sqrt();
            lb[i] = lii;

            let rmax = (n - 1 - i).min(k);
            for r in 1..=rmax {
                let mut num = p.lower(r, i + r);
                let tmax2 = tmax.min(k - r);
                for t in 1..=tmax2 {
                    num -= lb[(r + t) * n + (i + r)] * lb[t * n + i];
                }
                lb[r * n + (i + r)] = num / lii;
            }
        }
        Ok(Self { n, k, lb })
    }

    fn solve_in_place(&self, rhs: &mut [f64]) {
        let (n, k, lb) = (self.n, self.k, &self.lb);
        for i in 0..n {
            rhs[i] /= lb[i];
            let rmax = (n - 1 - i).min(k);
            for r in 1..=rmax {
                rhs[i + r] -= lb[r * n + (i + r)] * rhs[i];
            }
        }
        for i in (0..n).rev() {
            rhs[i] /= lb[i];
            let rmax = i.min(k);
            for r in 1..=rmax {
                rhs[i - r] -= lb[r * n + i] * rhs[i];
            }
        }
    }
}

fn attempt(p: &PenaltyBand, w: &[f64], y: &[f64], ridge: f64) -> std::result::Result<Vec<f64>, usize> {
    let chol = BandCholesky::factor(p, w, ridge)?;
    let mut rhs: Vec<f64> = w.iter().zip(y).map(|(w, y)| w * y).collect();
    chol.solve_in_place(&mut rhs);
    match rhs.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(i),
        None => Ok(rhs),
    }
}

/// Solves the weighted penalized system for one series.
///
/// `y` entries with zero weight are ignored. On breakdown the solve is retried
/// once with a ridge scaled to the largest diagonal entry; if that also fails
/// the series is `SingularSystem`.
pub fn solve(p: &PenaltyBand, w: &[f64], y: &[f64], ridge: f64) -> Result<Vec<f64>> {
    debug_assert_eq!(w.len(), p.n());
    debug_assert_eq!(y.len(), p.n());
    match attempt(p, w, y, ridge) {
        Ok(z) => Ok(z),
        Err(row) => {
            let max_diag = (0..p.n()).map(|i| w[i] + p.lower(0, i)).fold(0.0f64, f64::max);
            let retry = ridge.max(RETRY_RIDGE * (1.0 + max_diag));
            log::debug!("breakdown at row {}, retrying with ridge {:.1e}", row, retry);
            attempt(p, w, y, retry).map_err(|pivot| Error::SingularSystem { pivot })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn dense_solve(p: &PenaltyBand, w: &[f64], y: &[f64]) -> Vec<f64> {
        let n = w.len();
        let mut a: Vec<Vec<f64>> = (0..n).map(|r| (0..n).map(|c| p.get(r, c)).collect()).collect();
        let mut b: Vec<f64> = w.iter().zip(y).map(|(w, y)| w * y).collect();
        for i in 0..n {
            a[i][i] += w[i];
        }
        for c in 0..n {
            for r in (c + 1)..n {
                let f = a[r][c] / a[c][c];
                for cc in c..n {
                    a[r][cc] -= f * a[c][cc];
                }
                b[r] -= f * b[c];
            }
        }
        let mut z = vec![0.0; n];
        for i in (0..n).rev() {
            let s: f64 = ((i + 1)..n).map(|j| a[i][j] * z[j]).sum();
            z[i] = (b[i] - s) / a[i][i];
        }
        z
    }

    #[test]
    fn matches_dense_elimination() {
        let x = [0.0, 1.0, 2.5, 4.0, 7.0, 8.0, 12.0];
        let p = PenaltyBand::build(&x, 2, 3.0);
        let w = [1.0, 0.5, 0.0, 1.0, 2.0, 1.0, 1.0];
        let y = [1.0, 2.0, 0.0, 3.5, 4.0, 6.0, 5.0];
        let z = solve(&p, &w, &y, 0.0).unwrap();
        let zd = dense_solve(&p, &w, &y);
        for (a, b) in z.iter().zip(&zd) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn order_one_solves() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let p = PenaltyBand::build(&x, 1, 1.0);
        let z = solve(&p, &[1.0; 4], &[0.0, 1.0, 0.0, 1.0], 0.0).unwrap();
        let zd = dense_solve(&p, &[1.0; 4], &[0.0, 1.0, 0.0, 1.0]);
        for (a, b) in z.iter().zip(&zd) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn all_zero_weights_fall_back_to_ridge() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let p = PenaltyBand::build(&x, 2, 1.0);
        let z = solve(&p, &[0.0; 5], &[0.0; 5], 0.0).unwrap();
        assert!(z.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn non_finite_system_is_singular() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let p = PenaltyBand::build(&x, 2, 1.0);
        let w = [f64::INFINITY, 1.0, 1.0, 1.0, 1.0];
        let err = solve(&p, &w, &[1.0; 5], 0.0).unwrap_err();
        assert_eq!(err, Error::SingularSystem { pivot: 0 });
    }

    #[test]
    fn retry_ridge_rescues_rank_deficiency() {
        // One weighted point leaves the linear null space of P unpinned.
        let x = [0.0, 1.0, 2.0, 3.0];
        let p = PenaltyBand::build(&x, 2, 1.0);
        let z = solve(&p, &[0.0, 1.0, 0.0, 0.0], &[0.0, 2.0, 0.0, 0.0], 0.0).unwrap();
        assert!(z.iter().all(|v| v.is_finite()));
    }
}
