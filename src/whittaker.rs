//! Whittaker smoother for irregular series.
//!
//! Solves `(diag(w) + λ·DᵀD) z = w ⊙ y` on the evaluation axis of a plan
//! (the knots plus a daily lattice, which carries zero weight) and returns
//! `z` at the output points. The solve never depends on the output cadence.
//!
//! References: P. H. C. Eilers, "A perfect smoother", Anal. Chem. 75 (2003);
//! Eilers, Pesendorfer and Bonifacio, "Automatic smoothing of remote sensing
//! data", MultiTemp 2017.

use std::sync::Arc;

use crate::axis::{Observations, StepNormalization, TimeAxis};
use crate::error::{Error, Result};
use crate::estimator::{Estimator, FitOptions, ParamValue, Params, SeriesFit};
use crate::grid::EvalPlan;
use crate::penalty::PenaltyBand;
use crate::robust::{self, RobustConfig, ScaleEstimator, Weighting};
use crate::solver;

/// Kernel configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WhittakerConfig {
    /// λ > 0; larger is smoother.
    pub smoothing_lambda: f64,
    /// Difference order, >= 1.
    pub order: usize,
    /// Added to the diagonal on the first attempt.
    pub ridge: f64,
    pub normalize: StepNormalization,
    /// Re-weighting; `iterations == 0` disables it.
    pub robust: RobustConfig,
}

impl Default for WhittakerConfig {
    fn default() -> Self {
        Self {
            smoothing_lambda: 10_000.0,
            order: 2,
            ridge: 1e-10,
            normalize: StepNormalization::None,
            robust: RobustConfig::default(),
        }
    }
}

impl WhittakerConfig {
    pub fn builder() -> WhittakerConfigBuilder {
        WhittakerConfigBuilder { config: Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_lambda.is_finite() && self.smoothing_lambda > 0.0) {
            return Err(Error::invalid(format!(
                "smoothing_lambda must be positive and finite, got {}",
                self.smoothing_lambda
            )));
        }
        if self.order == 0 {
            return Err(Error::invalid("order must be at least 1"));
        }
        if !(self.ridge.is_finite() && self.ridge >= 0.0) {
            return Err(Error::invalid(format!("ridge must be non-negative, got {}", self.ridge)));
        }
        if let Some((a, b, c)) = self.robust.tuning {
            if !(c > 0.0 && a >= 0.0 && b >= a && c >= b) {
                return Err(Error::invalid(format!("invalid robust tuning ({}, {}, {})", a, b, c)));
            }
        }
        Ok(())
    }
}

/// Consuming builder for [`WhittakerConfig`].
#[derive(Debug, Clone)]
pub struct WhittakerConfigBuilder {
    config: WhittakerConfig,
}

impl WhittakerConfigBuilder {
    pub fn smoothing_lambda(mut self, lambda: f64) -> Self {
        self.config.smoothing_lambda = lambda;
        self
    }

    pub fn order(mut self, order: usize) -> Self {
        self.config.order = order;
        self
    }

    pub fn ridge(mut self, ridge: f64) -> Self {
        self.config.ridge = ridge;
        self
    }

    pub fn normalize(mut self, normalize: StepNormalization) -> Self {
        self.config.normalize = normalize;
        self
    }

    pub fn robust(mut self, robust: RobustConfig) -> Self {
        self.config.robust = robust;
        self
    }

    pub fn build(self) -> Result<WhittakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The Whittaker estimator.
#[derive(Debug, Clone, Default)]
pub struct Whittaker {
    config: WhittakerConfig,
}

impl Whittaker {
    pub fn new(config: WhittakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &WhittakerConfig {
        &self.config
    }

    fn penalty(&self, plan: &EvalPlan, options: &FitOptions<'_>) -> Arc<PenaltyBand> {
        let c = &self.config;
        let offsets = plan.axis.offsets();
        match options.cache {
            Some(cache) => cache.get_or_build(offsets, c.order, c.smoothing_lambda, c.normalize),
            None => Arc::new(PenaltyBand::build(&c.normalize.apply(offsets), c.order, c.smoothing_lambda)),
        }
    }
}

impl Estimator for Whittaker {
    fn name(&self) -> &'static str {
        "whittaker"
    }

    fn fit_transform(
        &self,
        axis: &TimeAxis,
        values: &[f64],
        weights: Option<&[f64]>,
        options: &FitOptions<'_>,
    ) -> Result<SeriesFit> {
        let c = &self.config;
        let native;
        let plan = match options.plan {
            Some(plan) => plan,
            None => {
                native = EvalPlan::native(axis)?;
                &native
            }
        };
        if plan.knots.len() != axis.len() {
            return Err(Error::invalid(format!(
                "plan was built for {} knots, series has {}",
                plan.knots.len(),
                axis.len()
            )));
        }

        let obs = Observations::prepare(axis, values, weights, c.order)?;
        let y = plan.scatter(&obs.values, 0.0);
        let w = plan.scatter(&obs.weights, 0.0);

        let band = self.penalty(plan, options);
        let solve = |wt: &[f64]| solver::solve(&band, wt, &y, c.ridge);
        let (z, w_used) = if c.robust.iterations > 0 {
            let (z, w_used) = robust::irls(&y, &w, &c.robust, solve)?;
            (z, Some(w_used))
        } else {
            (solve(&w)?, None)
        };

        Ok(SeriesFit {
            values: plan.gather(&z),
            weights: w_used.map(|wu| plan.knots.iter().map(|&p| wu[p]).collect()),
        })
    }

    fn params(&self, _deep: bool) -> Params {
        let c = &self.config;
        let mut p = Params::new();
        p.insert("smoothing_lambda".into(), c.smoothing_lambda.into());
        p.insert("order".into(), c.order.into());
        p.insert("ridge".into(), c.ridge.into());
        p.insert("normalize".into(), c.normalize.as_str().into());
        p.insert("robust_iterations".into(), c.robust.iterations.into());
        p.insert("robust_weighting".into(), c.robust.weighting.as_str().into());
        p.insert("robust_scale".into(), c.robust.scale.as_str().into());
        p.insert(
            "robust_tuning".into(),
            c.robust.tuning.map_or(ParamValue::Null, |(a, b, t)| ParamValue::List(vec![a, b, t])),
        );
        p
    }

    fn with_params(&self, updates: &Params) -> Result<Self> {
        let mut c = self.config;
        for (key, value) in updates {
            match key.as_str() {
                "smoothing_lambda" => c.smoothing_lambda = value.as_f64(key)?,
                "order" => c.order = value.as_usize(key)?,
                "ridge" => c.ridge = value.as_f64(key)?,
                "normalize" => c.normalize = StepNormalization::parse(value.as_str(key)?)?,
                "robust_iterations" => c.robust.iterations = value.as_usize(key)?,
                "robust_weighting" => c.robust.weighting = Weighting::parse(value.as_str(key)?)?,
                "robust_scale" => c.robust.scale = ScaleEstimator::parse(value.as_str(key)?)?,
                "robust_tuning" => {
                    c.robust.tuning = match value {
                        ParamValue::Null => None,
                        ParamValue::List(v) if v.len() == 3 => Some((v[0], v[1], v[2])),
                        other => {
                            return Err(Error::parameter(key, format!("expected three numbers, got {}", other)))
                        }
                    }
                }
                _ => return Err(Error::UnknownParameter(key.clone())),
            }
        }
        Whittaker::new(c)
    }
}
