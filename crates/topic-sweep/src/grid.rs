//! Hyperparameter grid and Cartesian-product enumeration.
//!
//! A [`HyperparameterGrid`] is an ordered list of named [`Dimension`]s. Its
//! points are visited in odometer order: the first dimension varies slowest
//! and the last one fastest, so a grid of `topics x iterations x intervals`
//! is walked exactly like three nested loops in that order. The order only
//! depends on the configured values, which makes two runs of the same grid
//! visit points identically.

use crate::error::{Result, SweepError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the topic-count dimension.
pub const TOPICS: &str = "topics";
/// Name of the iteration-count dimension.
pub const ITERATIONS: &str = "iterations";
/// Name of the optimize-interval dimension.
pub const OPTIMIZE_INTERVAL: &str = "optimize_interval";

/// A single hyperparameter value.
///
/// Deserializes from a bare JSON number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(u64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Returns the value as an unsigned integer, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// One named axis of the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Logical name, e.g. `"topics"`.
    pub name: String,
    /// Engine flag receiving the value, e.g. `"--num-topics"`.
    pub flag: String,
    /// Suffix appended to the value in run identities, e.g. `"tp"`.
    pub suffix: String,
    /// Values in visiting order.
    pub values: Vec<ParamValue>,
}

impl Dimension {
    pub fn new(
        name: impl Into<String>,
        flag: impl Into<String>,
        suffix: impl Into<String>,
        values: Vec<ParamValue>,
    ) -> Self {
        Self {
            name: name.into(),
            flag: flag.into(),
            suffix: suffix.into(),
            values,
        }
    }

    /// Topic counts, rendered as `{n}tp`.
    pub fn topics(values: &[u64]) -> Self {
        Self::new(TOPICS, "--num-topics", "tp", ints(values))
    }

    /// Sampling iterations, rendered as `{n}it`.
    pub fn iterations(values: &[u64]) -> Self {
        Self::new(ITERATIONS, "--num-iterations", "it", ints(values))
    }

    /// Hyperparameter optimization intervals, rendered as `{n}in`.
    pub fn optimize_interval(values: &[u64]) -> Self {
        Self::new(OPTIMIZE_INTERVAL, "--optimize-interval", "in", ints(values))
    }
}

fn ints(values: &[u64]) -> Vec<ParamValue> {
    values.iter().copied().map(ParamValue::Int).collect()
}

/// An ordered, non-empty set of non-empty dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterGrid {
    dimensions: Vec<Dimension>,
}

impl HyperparameterGrid {
    /// Create a grid, rejecting an empty dimension list, empty dimensions,
    /// and duplicated dimension names.
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(SweepError::InvalidConfig(
                "hyperparameter grid has no dimensions".to_string(),
            ));
        }
        for (i, dim) in dimensions.iter().enumerate() {
            if dim.values.is_empty() {
                return Err(SweepError::InvalidConfig(format!(
                    "dimension '{}' has no values",
                    dim.name
                )));
            }
            if dimensions[..i].iter().any(|d| d.name == dim.name) {
                return Err(SweepError::InvalidConfig(format!(
                    "dimension '{}' is declared twice",
                    dim.name
                )));
            }
        }
        Ok(Self { dimensions })
    }

    /// The classic three-axis MALLET sweep: topics, iterations, intervals.
    pub fn standard(topics: &[u64], iterations: &[u64], intervals: &[u64]) -> Result<Self> {
        Self::new(vec![
            Dimension::topics(topics),
            Dimension::iterations(iterations),
            Dimension::optimize_interval(intervals),
        ])
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Number of grid points: the product of the dimension lengths.
    pub fn size(&self) -> usize {
        self.dimensions.iter().map(|d| d.values.len()).product()
    }

    /// Iterate over every grid point in odometer order.
    pub fn points(&self) -> GridPoints<'_> {
        GridPoints {
            grid: self,
            indices: vec![0; self.dimensions.len()],
            remaining: self.size(),
        }
    }
}

/// A value bound to the dimension it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub dimension: String,
    pub value: ParamValue,
}

/// One selection of exactly one value per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridPoint {
    coordinates: Vec<Coordinate>,
}

impl GridPoint {
    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    /// Look up the value of a dimension by name.
    pub fn get(&self, dimension: &str) -> Option<&ParamValue> {
        self.coordinates
            .iter()
            .find(|c| c.dimension == dimension)
            .map(|c| &c.value)
    }

    /// Topic count of this point, when the grid has an integer `topics` axis.
    pub fn topics(&self) -> Option<u64> {
        self.get(TOPICS).and_then(ParamValue::as_u64)
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, c) in self.coordinates.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", c.dimension, c.value)?;
        }
        f.write_str("}")
    }
}

/// Iterator over the points of a [`HyperparameterGrid`].
pub struct GridPoints<'a> {
    grid: &'a HyperparameterGrid,
    indices: Vec<usize>,
    remaining: usize,
}

impl Iterator for GridPoints<'_> {
    type Item = GridPoint;

    fn next(&mut self) -> Option<GridPoint> {
        if self.remaining == 0 {
            return None;
        }

        let coordinates = self
            .grid
            .dimensions
            .iter()
            .zip(&self.indices)
            .map(|(dim, &i)| Coordinate {
                dimension: dim.name.clone(),
                value: dim.values[i].clone(),
            })
            .collect();

        // advance the odometer, last dimension fastest
        for (pos, dim) in self.grid.dimensions.iter().enumerate().rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < dim.values.len() {
                break;
            }
            self.indices[pos] = 0;
        }
        self.remaining -= 1;

        Some(GridPoint { coordinates })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for GridPoints<'_> {}
