// ==================== PyO3 wrappers ====================
//
// Time positions cross the boundary as float days since an arbitrary origin;
// they are turned into UTC timestamps with millisecond resolution.

use chrono::{TimeZone, Utc};
use ndarray::Array2;
use numpy::{PyArray1, PyArray2, PyArrayMethods, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::apply::{ApplyConfig, CubeApplier, FailureMode};
use crate::axis::{days_between, StepNormalization, Timestamp, MILLIS_PER_DAY};
use crate::cube::{Cube, Dimension};
use crate::error::{Error, ErrorKind};
use crate::grid::Cadence;
use crate::penalty::PenaltyBand;
use crate::robust::{RobustConfig, ScaleEstimator, Weighting};
use crate::whittaker::{Whittaker, WhittakerConfig};

fn to_py(e: Error) -> PyErr {
    match e.kind() {
        ErrorKind::Cancelled => PyRuntimeError::new_err(e.to_string()),
        _ => PyValueError::new_err(e.to_string()),
    }
}

fn days_to_times(x: &[f64]) -> PyResult<Vec<Timestamp>> {
    x.iter()
        .map(|&d| {
            if !d.is_finite() {
                return Err(PyValueError::new_err("x must be finite"));
            }
            Utc.timestamp_millis_opt((d * MILLIS_PER_DAY).round() as i64)
                .single()
                .ok_or_else(|| PyValueError::new_err(format!("x value {} is out of range", d)))
        })
        .collect()
}

/// Build the lower-banded penalty matrix `Pb = lam * D.T @ D` for divided differences.
///
/// Parameters
/// ----------
/// x : ndarray[float64], shape (T,)
///     Strictly increasing sampling positions, in days.
/// d : int, default=2
///     Difference order; the half-bandwidth equals `d`.
/// lam : float, default=1.0
/// normalize : {"none","mean","median"}, default="none"
///
/// Returns
/// -------
/// pb : ndarray[float64], shape (d+1, T)
///     Lower band stored as `pb[j, i] = P[i, i-j]`.
#[pyfunction]
#[pyo3(signature = (x, d=2, lam=1.0, normalize="none"))]
fn build_penalty<'py>(
    py: Python<'py>,
    x: PyReadonlyArray1<'py, f64>,
    d: usize,
    lam: f64,
    normalize: &str,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let x = x.as_slice()?;
    if d == 0 {
        return Err(PyValueError::new_err("d must be at least 1"));
    }
    if x.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(PyValueError::new_err("x must be strictly increasing"));
    }
    let x_use = StepNormalization::parse(normalize).map_err(to_py)?.apply(x);
    let band = PenaltyBand::build(&x_use, d, lam);
    let n = band.n();

    let pb = PyArray2::<f64>::zeros(py, [d + 1, n], false);
    let mut pbm = unsafe { pb.as_array_mut() };
    for j in 0..=d {
        for i in j..n {
            pbm[(j, i)] = band.lower(j, i);
        }
    }
    Ok(pb)
}

/// Smooth, gap-fill and resample a stack of series sharing one time axis.
///
/// NaNs in `y_st` are treated as missing (weight forced to 0). Duplicate
/// positions in `x` keep their first occurrence.
///
/// Parameters
/// ----------
/// x : ndarray[float64], shape (T,)
///     Sampling positions in days.
/// y_st : ndarray[float64], shape (S, T)
/// w_st : ndarray[float64], shape (S, T) or None, optional
/// lam : float, default=10000.0
/// d : int, default=2
/// cadence : str, default="native"
///     ISO-8601 duration such as "P5D", or "native".
/// normalize : {"none","mean","median"}, default="none"
/// robust_iterations : int, default=0
/// weighting : str, default="tukey"
/// strict : bool, default=False
///     Raise on the first failing series instead of filling it with NaN.
/// num_threads : int or None, optional
///
/// Returns
/// -------
/// x_out : ndarray[float64], shape (T_out,)
///     Output positions in days, on the same origin as `x`.
/// z_st : ndarray[float64], shape (S, T_out)
/// failed : list[int]
///     Rows that failed and were filled with NaN.
#[pyfunction]
#[pyo3(signature = (x, y_st, w_st=None, lam=10000.0, d=2, cadence="native", normalize="none",
                    robust_iterations=0, weighting="tukey", strict=false, num_threads=None))]
#[allow(clippy::too_many_arguments)]
fn whittaker<'py>(
    py: Python<'py>,
    x: PyReadonlyArray1<'py, f64>,
    y_st: PyReadonlyArray2<'py, f64>,
    w_st: Option<PyReadonlyArray2<'py, f64>>,
    lam: f64,
    d: usize,
    cadence: &str,
    normalize: &str,
    robust_iterations: usize,
    weighting: &str,
    strict: bool,
    num_threads: Option<usize>,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray2<f64>>, Vec<usize>)> {
    let x = x.as_slice()?;
    let y = y_st.as_array();
    let (s, t) = y.dim();
    if t != x.len() {
        return Err(PyValueError::new_err("y_st shape must be (S,T) with T=len(x)"));
    }
    let times = days_to_times(x)?;
    let origin = match times.first() {
        Some(&t0) => t0,
        None => return Err(PyValueError::new_err("x must not be empty")),
    };

    let cube_of = |data: Array2<f64>| -> PyResult<Cube> {
        let dims = vec![
            Dimension::values("series", (0..s).map(|v| v as f64).collect()),
            Dimension::time("t", times.clone()),
        ];
        Cube::new(dims, data.into_dyn()).map_err(to_py)
    };
    let cube = cube_of(y.to_owned())?;
    let weights = match w_st {
        Some(w) => {
            let w = w.as_array();
            if w.dim() != (s, t) {
                return Err(PyValueError::new_err("w_st must match y_st shape"));
            }
            Some(cube_of(w.to_owned())?)
        }
        None => None,
    };

    let robust = RobustConfig {
        iterations: robust_iterations,
        weighting: Weighting::parse(weighting).map_err(to_py)?,
        scale: ScaleEstimator::Mad,
        tuning: None,
    };
    let kernel = WhittakerConfig::builder()
        .smoothing_lambda(lam)
        .order(d)
        .normalize(StepNormalization::parse(normalize).map_err(to_py)?)
        .robust(robust)
        .build()
        .map_err(to_py)?;
    let mut config = ApplyConfig::default()
        .with_cadence(Cadence::parse(cadence).map_err(to_py)?)
        .with_failure_mode(if strict { FailureMode::Strict } else { FailureMode::Lenient });
    if let Some(n) = num_threads {
        config = config.with_num_threads(n);
    }
    let applier = CubeApplier::new(Whittaker::new(kernel).map_err(to_py)?, config).map_err(to_py)?;

    let out = py.allow_threads(|| applier.apply(&cube, weights.as_ref())).map_err(to_py)?;

    let grid = out.cube.times(1).map_err(to_py)?;
    let x_out: Vec<f64> = grid.iter().map(|&g| x[0] + days_between(origin, g)).collect();
    let z = out.cube.data();
    let z_out = PyArray2::<f64>::zeros(py, [s, grid.len()], false);
    {
        let mut zm = unsafe { z_out.as_array_mut() };
        for (dst, src) in zm.iter_mut().zip(z.iter()) {
            *dst = *src;
        }
    }
    let failed = out.diagnostics.keys().filter_map(|ix| ix.first().copied()).collect();
    Ok((PyArray1::from_vec(py, x_out), z_out, failed))
}

#[pymodule]
fn whitcube(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(build_penalty, m)?)?;
    m.add_function(wrap_pyfunction!(whittaker, m)?)?;
    Ok(())
}
