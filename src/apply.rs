//! Runs one estimator over every series of a cube.
//!
//! The cube is viewed as an `(S, T)` matrix with time last. Series are
//! processed in chunks of `chunk_size` rows on a rayon pool; each chunk writes
//! straight into its own rows of the output buffer, so the result never
//! depends on completion order. All series share one penalty cache, which is
//! dropped when the call returns.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array2, ArrayViewD, CowArray, Ix2};
use rayon::prelude::*;

use crate::axis::TimeAxis;
use crate::cube::{Cube, Dimension};
use crate::error::{Error, ErrorKind, Result};
use crate::estimator::{Estimator, FitOptions};
use crate::grid::{Cadence, EvalPlan};
use crate::penalty::PenaltyCache;

/// What happens when a single series fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Fill the series with NaN, record a diagnostic and carry on.
    #[default]
    Lenient,
    /// Abort the call with the failing series' index.
    Strict,
}

impl FailureMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lenient" => Ok(FailureMode::Lenient),
            "strict" => Ok(FailureMode::Strict),
            _ => Err(Error::parameter("failure_mode", format!("expected `strict` or `lenient`, got `{}`", s))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureMode::Lenient => "lenient",
            FailureMode::Strict => "strict",
        }
    }
}

/// Applier configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyConfig {
    /// Name of the time dimension; when absent the only timestamp dimension is used.
    pub time_dimension: String,
    pub cadence: Cadence,
    pub failure_mode: FailureMode,
    /// Series per unit of parallel work.
    pub chunk_size: usize,
    /// Size of a dedicated pool; `None` runs on the global rayon pool.
    pub num_threads: Option<usize>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            time_dimension: "t".to_string(),
            cadence: Cadence::Native,
            failure_mode: FailureMode::Lenient,
            chunk_size: 256,
            num_threads: None,
        }
    }
}

impl ApplyConfig {
    pub fn with_time_dimension(mut self, name: impl Into<String>) -> Self {
        self.time_dimension = name.into();
        self
    }

    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::parameter("chunk_size", "must be at least 1"));
        }
        if self.num_threads == Some(0) {
            return Err(Error::parameter("num_threads", "must be at least 1"));
        }
        Ok(())
    }
}

/// Cooperative cancellation, checked before each chunk starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Failed series by non-time index, in index order.
pub type Diagnostics = BTreeMap<Vec<usize>, ErrorKind>;

#[derive(Debug, Clone)]
pub struct ApplyOutput {
    pub cube: Cube,
    /// Empty unless some series failed in lenient mode.
    pub diagnostics: Diagnostics,
}

/// Maps an [`Estimator`] over all non-time indices of a cube.
#[derive(Debug, Clone)]
pub struct CubeApplier<E> {
    estimator: E,
    config: ApplyConfig,
    cancel: Option<CancellationToken>,
}

impl<E: Estimator> CubeApplier<E> {
    pub fn new(estimator: E, config: ApplyConfig) -> Result<Self> {
        config.validate()?;
        if config.cadence != Cadence::Native && !estimator.supports_resampling() {
            return Err(Error::invalid(format!(
                "{} cannot resample to cadence {}",
                estimator.name(),
                config.cadence
            )));
        }
        Ok(Self { estimator, config, cancel: None })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn config(&self) -> &ApplyConfig {
        &self.config
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn fit_one(
        &self,
        axis: &TimeAxis,
        values: &[f64],
        weights: Option<&[f64]>,
        options: &FitOptions<'_>,
        expected: usize,
    ) -> Result<Vec<f64>> {
        let fit = self.estimator.fit_transform(axis, values, weights, options)?;
        if fit.values.len() != expected {
            return Err(Error::invalid(format!(
                "{} returned {} points, expected {}",
                self.estimator.name(),
                fit.values.len(),
                expected
            )));
        }
        Ok(fit.values)
    }

    /// Applies the estimator to every series of `cube`.
    ///
    /// `weights`, when given, must have the cube's shape and no negative
    /// entries. Inputs are never modified. Non-time dimensions of the result
    /// keep their names, order and coordinates; the time coordinate becomes
    /// the output grid.
    pub fn apply(&self, cube: &Cube, weights: Option<&Cube>) -> Result<ApplyOutput> {
        let cfg = &self.config;
        let time_axis = cube.time_dimension(&cfg.time_dimension)?;
        let (axis, keep) = TimeAxis::canonicalize(cube.times(time_axis)?)?;
        if let Some(w) = weights {
            if w.shape() != cube.shape() {
                return Err(Error::invalid(format!(
                    "weights shape {:?} does not match cube shape {:?}",
                    w.shape(),
                    cube.shape()
                )));
            }
            if let Some(bad) = w.data().iter().find(|v| **v < 0.0) {
                return Err(Error::invalid(format!("negative weight {}", bad)));
            }
        }

        let grid = cfg.cadence.grid(&axis)?;
        let plan = EvalPlan::new(&axis, &grid)?;

        let perm = time_last(cube.shape().len(), time_axis);
        let outer: Vec<usize> = perm[..perm.len() - 1].iter().map(|&a| cube.shape()[a]).collect();
        let n_series: usize = outer.iter().product();
        let y = series_matrix(cube.data().view(), &perm, n_series)?;
        let w = weights.map(|w| series_matrix(w.data().view(), &perm, n_series)).transpose()?;
        let (y, w) = (y.view(), w.as_ref().map(|w| w.view()));

        let t_out = plan.outputs.len();
        let chunk = cfg.chunk_size;
        log::info!(
            "{}: {} series x {} knots -> {} points, {} chunks of {}",
            self.estimator.name(),
            n_series,
            axis.len(),
            t_out,
            n_series.div_ceil(chunk),
            chunk
        );

        let cache = PenaltyCache::new();
        let options = FitOptions::default().with_plan(&plan).with_cache(&cache);
        let strict = cfg.failure_mode == FailureMode::Strict;
        let abort = AtomicBool::new(false);
        let skipped = AtomicBool::new(false);

        let run = |out: &mut [f64]| -> Vec<(usize, Error)> {
            out.par_chunks_mut(chunk * t_out)
                .enumerate()
                .flat_map_iter(|(c, block)| {
                    let mut failures = Vec::new();
                    if abort.load(Ordering::Relaxed) || self.is_cancelled() {
                        skipped.store(true, Ordering::Relaxed);
                        return failures;
                    }
                    for (r, row) in block.chunks_mut(t_out).enumerate() {
                        let si = c * chunk + r;
                        let values: Vec<f64> = keep.iter().map(|&j| y[(si, j)]).collect();
                        let wts: Option<Vec<f64>> = w.map(|w| keep.iter().map(|&j| w[(si, j)]).collect());
                        match self.fit_one(&axis, &values, wts.as_deref(), &options, t_out) {
                            Ok(z) => row.copy_from_slice(&z),
                            Err(e) => {
                                let fatal = strict || !e.kind().is_per_series();
                                failures.push((si, e));
                                if fatal {
                                    abort.store(true, Ordering::Relaxed);
                                    break;
                                }
                            }
                        }
                    }
                    failures
                })
                .collect()
        };

        let mut out = Array2::<f64>::from_elem((n_series, t_out), f64::NAN);
        let buf = out.as_slice_mut().ok_or_else(|| Error::invalid("output buffer is not contiguous"))?;
        let mut failures = match cfg.num_threads {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| Error::invalid(format!("cannot build thread pool: {}", e)))?
                .install(|| run(buf)),
            None => run(buf),
        };
        failures.sort_by_key(|(si, _)| *si);

        if let Some((si, e)) = failures.iter().find(|(_, e)| strict || !e.kind().is_per_series()) {
            return Err(Error::Series { index: unravel_index(*si, &outer), source: Box::new(e.clone()) });
        }
        if skipped.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let diagnostics: Diagnostics =
            failures.iter().map(|(si, e)| (unravel_index(*si, &outer), e.kind())).collect();
        if !diagnostics.is_empty() {
            log::warn!("{} of {} series failed and were filled with NaN", diagnostics.len(), n_series);
        }
        let (hits, misses) = cache.stats();
        log::debug!("penalty cache: {} hits, {} misses", hits, misses);

        let mut shape = outer;
        shape.push(t_out);
        let moved = out.into_shape_with_order(shape).map_err(|e| Error::invalid(e.to_string()))?;
        let mut inverse = vec![0; perm.len()];
        for (i, &a) in perm.iter().enumerate() {
            inverse[a] = i;
        }
        let data = moved.permuted_axes(inverse).as_standard_layout().into_owned();

        let dims: Vec<Dimension> = cube
            .dims()
            .iter()
            .enumerate()
            .map(|(i, d)| {
                if i == time_axis {
                    Dimension::time(d.name.clone(), grid.times().to_vec())
                } else {
                    d.clone()
                }
            })
            .collect();
        Ok(ApplyOutput { cube: Cube::new(dims, data)?, diagnostics })
    }
}

/// Axis order that moves `time_axis` to the end.
fn time_last(ndim: usize, time_axis: usize) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..ndim).filter(|&a| a != time_axis).collect();
    perm.push(time_axis);
    perm
}

/// Views `data` as `(series, time)`, copying only when the layout requires it.
fn series_matrix<'a>(data: ArrayViewD<'a, f64>, perm: &[usize], n_series: usize) -> Result<CowArray<'a, f64, Ix2>> {
    let moved = data.permuted_axes(perm.to_vec());
    let t = moved.shape().last().copied().unwrap_or(0);
    let shape_err = |e: ndarray::ShapeError| Error::invalid(e.to_string());
    if moved.is_standard_layout() {
        Ok(CowArray::from(moved.into_shape_with_order((n_series, t)).map_err(shape_err)?))
    } else {
        let owned = Array2::from_shape_vec((n_series, t), moved.iter().copied().collect()).map_err(shape_err)?;
        Ok(CowArray::from(owned))
    }
}

/// Row-major multi-index of `linear` in `shape`.
fn unravel_index(mut linear: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (slot, &len) in index.iter_mut().zip(shape).rev() {
        *slot = linear % len;
        linear /= len;
    }
    index
}
