//! Whittaker smoothing, gap-filling and resampling of irregular time series
//! stored along one axis of a labelled data cube.
//!
//! The numeric kernel ([`Whittaker`]) fits one series at a time with a
//! banded penalized least-squares solve whose difference penalty is measured
//! per elapsed day. [`CubeApplier`] maps any [`Estimator`] over every
//! non-time index of a [`Cube`] in parallel, isolating per-series failures.
//!
//! ```no_run
//! use whitcube::{whittaker, ApplyConfig, Cadence, Cube, WhittakerConfig};
//!
//! # fn run(cube: Cube) -> whitcube::Result<()> {
//! let kernel = WhittakerConfig::builder().smoothing_lambda(100.0).build()?;
//! let out = whittaker(&cube, None, kernel, ApplyConfig::default().with_cadence(Cadence::days(5)))?;
//! println!("{} series failed", out.diagnostics.len());
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod axis;
pub mod cube;
pub mod error;
pub mod estimator;
pub mod grid;
pub mod outliers;
pub mod penalty;
pub mod robust;
pub mod solver;
pub mod whittaker;

#[cfg(feature = "python")]
mod python;

pub use apply::{ApplyConfig, ApplyOutput, CancellationToken, CubeApplier, Diagnostics, FailureMode};
pub use axis::{StepNormalization, TimeAxis, Timestamp};
pub use cube::{Coord, Cube, Dimension};
pub use error::{Error, ErrorKind, Result};
pub use estimator::{params, Estimator, FitOptions, ParamValue, Params, Pipeline, SeriesFit, Step, NESTED_DELIMITER};
pub use grid::{Cadence, EvalPlan, Sample};
pub use outliers::TemporalOutliers;
pub use penalty::{PenaltyBand, PenaltyCache};
pub use robust::{RobustConfig, ScaleEstimator, Weighting};
pub use whittaker::{Whittaker, WhittakerConfig, WhittakerConfigBuilder};

/// Smooths, gap-fills and optionally resamples every series of `cube`.
///
/// Shorthand for a [`CubeApplier`] driving a [`Whittaker`] estimator.
pub fn whittaker(
    cube: &Cube,
    weights: Option<&Cube>,
    kernel: WhittakerConfig,
    config: ApplyConfig,
) -> Result<ApplyOutput> {
    CubeApplier::new(Whittaker::new(kernel)?, config)?.apply(cube, weights)
}
