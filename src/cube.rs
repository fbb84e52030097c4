//! Labelled n-dimensional arrays with one time dimension.

use ndarray::{ArrayD, ArrayView1, Axis, Ix1};

use crate::axis::Timestamp;
use crate::error::{Error, Result};

/// Coordinate labels along one dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Coord {
    Time(Vec<Timestamp>),
    Labels(Vec<String>),
    Values(Vec<f64>),
}

impl Coord {
    pub fn len(&self) -> usize {
        match self {
            Coord::Time(v) => v.len(),
            Coord::Labels(v) => v.len(),
            Coord::Values(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_time(&self) -> Option<&[Timestamp]> {
        match self {
            Coord::Time(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub coord: Coord,
}

impl Dimension {
    pub fn time(name: impl Into<String>, times: Vec<Timestamp>) -> Self {
        Self { name: name.into(), coord: Coord::Time(times) }
    }

    pub fn labels<S: Into<String>>(name: impl Into<String>, labels: impl IntoIterator<Item = S>) -> Self {
        Self { name: name.into(), coord: Coord::Labels(labels.into_iter().map(Into::into).collect()) }
    }

    pub fn values(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self { name: name.into(), coord: Coord::Values(values) }
    }

    pub fn len(&self) -> usize {
        self.coord.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coord.is_empty()
    }
}

/// A dense `f64` array whose axes are the named dimensions, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    dims: Vec<Dimension>,
    data: ArrayD<f64>,
}

impl Cube {
    /// Checks that names are unique and every coordinate matches its axis length.
    pub fn new(dims: Vec<Dimension>, data: ArrayD<f64>) -> Result<Self> {
        if dims.len() != data.ndim() {
            return Err(Error::invalid(format!(
                "{} dimensions given for a {}-d array",
                dims.len(),
                data.ndim()
            )));
        }
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].iter().any(|d| d.name == dim.name) {
                return Err(Error::invalid(format!("duplicate dimension `{}`", dim.name)));
            }
            if dim.len() != data.shape()[i] {
                return Err(Error::invalid(format!(
                    "dimension `{}` has {} coordinates but axis {} has length {}",
                    dim.name,
                    dim.len(),
                    i,
                    data.shape()[i]
                )));
            }
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn into_parts(self) -> (Vec<Dimension>, ArrayD<f64>) {
        (self.dims, self.data)
    }

    pub fn dim_index(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d.name == name)
    }

    /// Resolves the time axis: the dimension called `name`, or else the only
    /// dimension with timestamp coordinates.
    pub fn time_dimension(&self, name: &str) -> Result<usize> {
        if let Some(i) = self.dim_index(name) {
            return match self.dims[i].coord {
                Coord::Time(_) => Ok(i),
                _ => Err(Error::invalid(format!("dimension `{}` does not hold timestamps", name))),
            };
        }
        let mut found = self.dims.iter().enumerate().filter(|(_, d)| d.coord.as_time().is_some());
        match (found.next(), found.next()) {
            (Some((i, _)), None) => Ok(i),
            (None, _) => Err(Error::invalid(format!("no time dimension `{}` in cube", name))),
            _ => Err(Error::invalid(format!(
                "no dimension `{}` and more than one timestamp dimension to choose from",
                name
            ))),
        }
    }

    /// Timestamps of the time dimension at axis `time_axis`.
    pub fn times(&self, time_axis: usize) -> Result<&[Timestamp]> {
        self.dims
            .get(time_axis)
            .and_then(|d| d.coord.as_time())
            .ok_or_else(|| Error::invalid(format!("axis {} is not a time dimension", time_axis)))
    }

    /// The series along `time_axis` at `index`, one entry per other axis.
    pub fn select(&self, time_axis: usize, index: &[usize]) -> Result<ArrayView1<'_, f64>> {
        if time_axis >= self.data.ndim() || index.len() + 1 != self.data.ndim() {
            return Err(Error::invalid(format!(
                "index {:?} does not address a series of a {}-d cube",
                index,
                self.data.ndim()
            )));
        }
        let mut view = self.data.view();
        // Remove axes from the last one so earlier axis numbers stay valid.
        for ax in (0..self.data.ndim()).rev().filter(|&a| a != time_axis) {
            let i = if ax < time_axis { index[ax] } else { index[ax - 1] };
            if i >= view.shape()[ax] {
                return Err(Error::invalid(format!("index {:?} out of bounds", index)));
            }
            view = view.index_axis_move(Axis(ax), i);
        }
        view.into_dimensionality::<Ix1>().map_err(|e| Error::invalid(e.to_string()))
    }
}
