//! Output cadence and the evaluation axis a fit is solved on.

use std::fmt;
use std::str::FromStr;

use chrono::{Months, TimeDelta};

use crate::axis::{days_between, TimeAxis};
use crate::error::{Error, Result};

/// Requested output spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cadence {
    /// Output on the input knots.
    #[default]
    Native,
    /// Fixed elapsed time between grid points.
    Fixed(TimeDelta),
    /// Calendar months, counted from the series start.
    Months(u32),
}

impl Cadence {
    pub fn days(n: i64) -> Self {
        Cadence::Fixed(TimeDelta::days(n))
    }

    /// Parses `"native"` or an ISO-8601 duration such as `P5D`, `P1W`,
    /// `PT6H`, `P1DT12H` or `P1M`. Calendar parts (years, months) cannot be
    /// mixed with fixed parts.
    pub fn parse(s: &str) -> Result<Self> {
        let t = s.trim();
        if t.eq_ignore_ascii_case("native") {
            return Ok(Cadence::Native);
        }
        let bad = || Error::invalid(format!("unsupported cadence `{}`", s));
        let body = t.strip_prefix('P').or_else(|| t.strip_prefix('p')).ok_or_else(bad)?;
        if body.is_empty() {
            return Err(bad());
        }

        let mut months: i64 = 0;
        let mut fixed = TimeDelta::zero();
        let mut in_time = false;
        let mut num = String::new();
        for c in body.chars() {
            match c.to_ascii_uppercase() {
                '0'..='9' => num.push(c),
                'T' if !in_time && num.is_empty() => in_time = true,
                unit => {
                    let n: i64 = num.parse().map_err(|_| bad())?;
                    num.clear();
                    match (in_time, unit) {
                        (false, 'Y') => months += 12 * n,
                        (false, 'M') => months += n,
                        (false, 'W') => fixed = fixed + TimeDelta::try_weeks(n).ok_or_else(bad)?,
                        (false, 'D') => fixed = fixed + TimeDelta::try_days(n).ok_or_else(bad)?,
                        (true, 'H') => fixed = fixed + TimeDelta::try_hours(n).ok_or_else(bad)?,
                        (true, 'M') => fixed = fixed + TimeDelta::try_minutes(n).ok_or_else(bad)?,
                        (true, 'S') => fixed = fixed + TimeDelta::try_seconds(n).ok_or_else(bad)?,
                        _ => return Err(bad()),
                    }
                }
            }
        }
        if !num.is_empty() {
            return Err(bad());
        }
        match (months, fixed > TimeDelta::zero()) {
            (0, true) => Ok(Cadence::Fixed(fixed)),
            (m, false) if m > 0 => Ok(Cadence::Months(u32::try_from(m).map_err(|_| bad())?)),
            (0, false) => Err(Error::invalid(format!("cadence `{}` is zero", s))),
            _ => Err(Error::invalid(format!("cadence `{}` mixes calendar and fixed units", s))),
        }
    }

    /// Regular grid from `axis.start()` up to and including `axis.end()`.
    pub fn grid(&self, axis: &TimeAxis) -> Result<TimeAxis> {
        let (start, end) = (axis.start(), axis.end());
        let mut times = Vec::new();
        match *self {
            Cadence::Native => return Ok(axis.clone()),
            Cadence::Fixed(step) => {
                let mut t = start;
                while t <= end {
                    times.push(t);
                    t = t.checked_add_signed(step).ok_or_else(|| Error::invalid("grid overflows"))?;
                }
            }
            Cadence::Months(m) => {
                for k in 0u32.. {
                    let span = k.checked_mul(m).ok_or_else(|| Error::invalid("grid overflows"))?;
                    // Offsets are taken from the start so month-end clamping never accumulates.
                    let t = start
                        .checked_add_months(Months::new(span))
                        .ok_or_else(|| Error::invalid("grid overflows"))?;
                    if t > end {
                        break;
                    }
                    times.push(t);
                }
            }
        }
        TimeAxis::new(times)
    }
}

impl FromStr for Cadence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Cadence::parse(s)
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Native => f.write_str("native"),
            Cadence::Months(m) => write!(f, "P{}M", m),
            Cadence::Fixed(d) => {
                let secs = d.num_seconds();
                let (days, rem) = (secs / 86_400, secs % 86_400);
                f.write_str("P")?;
                if days > 0 {
                    write!(f, "{}D", days)?;
                }
                if rem > 0 {
                    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);
                    f.write_str("T")?;
                    if h > 0 {
                        write!(f, "{}H", h)?;
                    }
                    if m > 0 {
                        write!(f, "{}M", m)?;
                    }
                    if s > 0 {
                        write!(f, "{}S", s)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// One output point: the value at `lo`, blended linearly towards `hi` by
/// `frac`. Points that lie on the evaluation axis have `lo == hi`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub lo: usize,
    pub hi: usize,
    pub frac: f64,
}

impl Sample {
    fn exact(p: usize) -> Self {
        Self { lo: p, hi: p, frac: 0.0 }
    }

    fn at(&self, v: &[f64]) -> f64 {
        if self.lo == self.hi {
            v[self.lo]
        } else {
            v[self.lo] + self.frac * (v[self.hi] - v[self.lo])
        }
    }
}

/// Axis a fit is solved on and where its outputs are read from.
///
/// The evaluation axis is the input knots merged with the daily lattice
/// `start + k days` up to `end`. It depends on the input alone, so every
/// cadence reads the same fitted curve. Lattice points that are not knots
/// enter the solve with zero weight. Output times on the axis are read
/// directly; sub-daily output times between two axis points are
/// interpolated linearly.
#[derive(Debug, Clone)]
pub struct EvalPlan {
    pub axis: TimeAxis,
    /// Position of each input knot on `axis`.
    pub knots: Vec<usize>,
    pub outputs: Vec<Sample>,
}

impl EvalPlan {
    pub fn new(input: &TimeAxis, output: &TimeAxis) -> Result<Self> {
        let (axis, knots) = daily_lattice(input)?;
        let offsets = axis.offsets();
        let outputs = output
            .times()
            .iter()
            .map(|&t| match axis.times().binary_search(&t) {
                Ok(p) => Ok(Sample::exact(p)),
                Err(p) if p > 0 && p < axis.len() => {
                    let x = days_between(axis.start(), t);
                    let frac = (x - offsets[p - 1]) / (offsets[p] - offsets[p - 1]);
                    Ok(Sample { lo: p - 1, hi: p, frac })
                }
                Err(_) => Err(Error::invalid(format!(
                    "output time {} lies outside [{}, {}]",
                    t,
                    input.start(),
                    input.end()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { axis, knots, outputs })
    }

    /// Plan whose outputs are the input knots.
    pub fn native(input: &TimeAxis) -> Result<Self> {
        let (axis, knots) = daily_lattice(input)?;
        let outputs = knots.iter().map(|&p| Sample::exact(p)).collect();
        Ok(Self { axis, knots, outputs })
    }

    /// Whether the outputs are exactly the input knots.
    pub fn is_native(&self) -> bool {
        self.outputs.len() == self.knots.len()
            && self.outputs.iter().zip(&self.knots).all(|(s, &k)| s.lo == k && s.hi == k)
    }

    /// Spreads knot values onto the evaluation axis (`fill` elsewhere).
    pub fn scatter(&self, knot_values: &[f64], fill: f64) -> Vec<f64> {
        let mut out = vec![fill; self.axis.len()];
        for (&p, &v) in self.knots.iter().zip(knot_values) {
            out[p] = v;
        }
        out
    }

    /// Reads the output points from values on the evaluation axis.
    pub fn gather(&self, eval_values: &[f64]) -> Vec<f64> {
        self.outputs.iter().map(|s| s.at(eval_values)).collect()
    }
}

/// Knots merged with whole days from the first knot through the last.
fn daily_lattice(input: &TimeAxis) -> Result<(TimeAxis, Vec<usize>)> {
    let (start, end) = (input.start(), input.end());
    let span = (end - start).num_days();
    let mut times = Vec::with_capacity(input.len() + span as usize + 1);
    let mut knots = Vec::with_capacity(input.len());
    let mut a = input.times().iter().copied().peekable();
    for k in 0..=span {
        let day = start + TimeDelta::days(k);
        while let Some(t) = a.next_if(|&t| t < day) {
            knots.push(times.len());
            times.push(t);
        }
        if a.next_if_eq(&day).is_some() {
            knots.push(times.len());
        }
        times.push(day);
    }
    for t in a {
        knots.push(times.len());
        times.push(t);
    }
    Ok((TimeAxis::new(times)?, knots))
}
