//! Uniform per-series estimator interface.
//!
//! The cube applier only ever calls [`Estimator::fit_transform`]. The
//! parameter methods let composites such as [`Pipeline`] reconfigure nested
//! estimators through flat `step__param` keys. Keys are only flattened at this
//! boundary; every estimator keeps a typed configuration internally.

use std::fmt;

use indexmap::IndexMap;

use crate::axis::TimeAxis;
use crate::error::{Error, Result};
use crate::grid::EvalPlan;
use crate::outliers::TemporalOutliers;
use crate::penalty::PenaltyCache;
use crate::whittaker::Whittaker;

/// Separator between a step name and its parameter in flattened keys.
pub const NESTED_DELIMITER: &str = "__";

/// A configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
    List(Vec<f64>),
    Null,
}

impl ParamValue {
    pub fn as_f64(&self, name: &str) -> Result<f64> {
        match *self {
            ParamValue::Float(v) => Ok(v),
            ParamValue::Int(v) => Ok(v as f64),
            _ => Err(Error::parameter(name, format!("expected a number, got {}", self))),
        }
    }

    pub fn as_usize(&self, name: &str) -> Result<usize> {
        match *self {
            ParamValue::Int(v) if v >= 0 => Ok(v as usize),
            ParamValue::Float(v) if v >= 0.0 && v.fract() == 0.0 => Ok(v as usize),
            _ => Err(Error::parameter(name, format!("expected a non-negative integer, got {}", self))),
        }
    }

    pub fn as_str(&self, name: &str) -> Result<&str> {
        match self {
            ParamValue::Str(s) => Ok(s),
            _ => Err(Error::parameter(name, format!("expected a string, got {}", self))),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Str(s) => write!(f, "{:?}", s),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::List(v) => write!(f, "{:?}", v),
            ParamValue::Null => f.write_str("null"),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// Ordered parameter mapping, in declaration order.
pub type Params = IndexMap<String, ParamValue>;

/// Builds [`Params`] from `(key, value)` pairs.
pub fn params<K, V, I>(pairs: I) -> Params
where
    K: Into<String>,
    V: Into<ParamValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Per-call options supplied by the caller of `fit_transform`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitOptions<'a> {
    /// Evaluation plan for resampling; `None` returns values on the input knots.
    pub plan: Option<&'a EvalPlan>,
    /// Shared penalty store; `None` builds penalties per call.
    pub cache: Option<&'a PenaltyCache>,
}

impl<'a> FitOptions<'a> {
    pub fn with_plan(mut self, plan: &'a EvalPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_cache(mut self, cache: &'a PenaltyCache) -> Self {
        self.cache = Some(cache);
        self
    }
}

/// Result of fitting one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesFit {
    /// Reconstruction on the output points.
    pub values: Vec<f64>,
    /// Effective weights at the input knots, for algorithms that re-weight.
    pub weights: Option<Vec<f64>>,
}

/// A per-series algorithm.
pub trait Estimator: Send + Sync {
    /// Short identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Fits `values` observed on `axis` and returns the reconstruction on the
    /// plan's output points (or on `axis` when no plan is given).
    fn fit_transform(
        &self,
        axis: &TimeAxis,
        values: &[f64],
        weights: Option<&[f64]>,
        options: &FitOptions<'_>,
    ) -> Result<SeriesFit>;

    /// Current configuration. With `deep`, nested estimators contribute
    /// their parameters under `name__param` keys.
    fn params(&self, deep: bool) -> Params;

    /// Returns a reconfigured copy. Keys outside the schema are
    /// `UnknownParameter`; nothing is applied unless every key is valid.
    fn with_params(&self, updates: &Params) -> Result<Self>
    where
        Self: Sized;

    /// Whether a plan with extra output points is honoured.
    fn supports_resampling(&self) -> bool {
        true
    }
}

pub(crate) fn ensure_native(name: &str, axis: &TimeAxis, options: &FitOptions<'_>) -> Result<()> {
    match options.plan {
        Some(plan) if !(plan.is_native() && plan.knots.len() == axis.len()) => {
            Err(Error::invalid(format!("{} cannot resample onto a different time grid", name)))
        }
        _ => Ok(()),
    }
}

// -------------------- closed set of steps --------------------

/// The estimators a [`Pipeline`] can hold.
#[derive(Debug, Clone)]
pub enum Step {
    Whittaker(Whittaker),
    TemporalOutliers(TemporalOutliers),
}

impl From<Whittaker> for Step {
    fn from(w: Whittaker) -> Self {
        Step::Whittaker(w)
    }
}

impl From<TemporalOutliers> for Step {
    fn from(t: TemporalOutliers) -> Self {
        Step::TemporalOutliers(t)
    }
}

impl Estimator for Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Whittaker(e) => e.name(),
            Step::TemporalOutliers(e) => e.name(),
        }
    }

    fn fit_transform(
        &self,
        axis: &TimeAxis,
        values: &[f64],
        weights: Option<&[f64]>,
        options: &FitOptions<'_>,
    ) -> Result<SeriesFit> {
        match self {
            Step::Whittaker(e) => e.fit_transform(axis, values, weights, options),
            Step::TemporalOutliers(e) => e.fit_transform(axis, values, weights, options),
        }
    }

    fn params(&self, deep: bool) -> Params {
        match self {
            Step::Whittaker(e) => e.params(deep),
            Step::TemporalOutliers(e) => e.params(deep),
        }
    }

    fn with_params(&self, updates: &Params) -> Result<Self> {
        Ok(match self {
            Step::Whittaker(e) => Step::Whittaker(e.with_params(updates)?),
            Step::TemporalOutliers(e) => Step::TemporalOutliers(e.with_params(updates)?),
        })
    }

    fn supports_resampling(&self) -> bool {
        match self {
            Step::Whittaker(e) => e.supports_resampling(),
            Step::TemporalOutliers(e) => e.supports_resampling(),
        }
    }
}

// -------------------- pipeline --------------------

/// Named steps applied in order; each step sees the previous reconstruction.
///
/// Only the last step receives the caller's plan, so only it may resample.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<(String, Step)>,
}

impl Pipeline {
    pub fn new<S: Into<String>>(steps: Vec<(S, Step)>) -> Result<Self> {
        let steps: Vec<(String, Step)> = steps.into_iter().map(|(n, s)| (n.into(), s)).collect();
        if steps.is_empty() {
            return Err(Error::invalid("pipeline needs at least one step"));
        }
        for (i, (name, _)) in steps.iter().enumerate() {
            if name.is_empty() || name.contains(NESTED_DELIMITER) {
                return Err(Error::invalid(format!("invalid step name `{}`", name)));
            }
            if steps[..i].iter().any(|(n, _)| n == name) {
                return Err(Error::invalid(format!("duplicate step name `{}`", name)));
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[(String, Step)] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }
}

impl Estimator for Pipeline {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn fit_transform(
        &self,
        axis: &TimeAxis,
        values: &[f64],
        weights: Option<&[f64]>,
        options: &FitOptions<'_>,
    ) -> Result<SeriesFit> {
        let last = self.steps.len() - 1;
        let inner = FitOptions { plan: None, cache: options.cache };
        let mut current: Option<SeriesFit> = None;
        for (i, (_, step)) in self.steps.iter().enumerate() {
            let opts = if i == last { options } else { &inner };
            let input = current.as_ref().map_or(values, |fit| fit.values.as_slice());
            current = Some(step.fit_transform(axis, input, weights, opts)?);
        }
        current.ok_or_else(|| Error::invalid("pipeline needs at least one step"))
    }

    fn params(&self, deep: bool) -> Params {
        let names: Vec<&str> = self.steps.iter().map(|(n, _)| n.as_str()).collect();
        let mut out = Params::new();
        out.insert("steps".to_string(), ParamValue::Str(names.join(",")));
        if deep {
            for (name, step) in &self.steps {
                for (k, v) in step.params(true) {
                    out.insert(format!("{}{}{}", name, NESTED_DELIMITER, k), v);
                }
            }
        }
        out
    }

    fn with_params(&self, updates: &Params) -> Result<Self> {
        let mut routed: IndexMap<&str, Params> = IndexMap::new();
        for (key, value) in updates {
            let (step, param) = key
                .split_once(NESTED_DELIMITER)
                .filter(|(s, _)| self.step(s).is_some())
                .ok_or_else(|| Error::UnknownParameter(key.clone()))?;
            routed.entry(step).or_default().insert(param.to_string(), value.clone());
        }
        let mut steps = Vec::with_capacity(self.steps.len());
        for (name, step) in &self.steps {
            let next = match routed.get(name.as_str()) {
                Some(sub) => step.with_params(sub).map_err(|e| match e {
                    Error::UnknownParameter(k) => {
                        Error::UnknownParameter(format!("{}{}{}", name, NESTED_DELIMITER, k))
                    }
                    other => other,
                })?,
                None => step.clone(),
            };
            steps.push((name.clone(), next));
        }
        Ok(Self { steps })
    }

    fn supports_resampling(&self) -> bool {
        self.steps.last().is_some_and(|(_, s)| s.supports_resampling())
    }
}
