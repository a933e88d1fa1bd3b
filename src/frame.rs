//! Labelled result tables.
//!
//! A [`Frame`] is a dense `f64` matrix with named columns and a typed row [`Index`].
//! Simulation results are indexed by time, parameter scans by the scanned values and
//! batched time courses by a nested (run, time) index.

use indexmap::IndexMap;
use ndarray::{concatenate, s, Array2, ArrayView1, Axis};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Shape mismatch: index has {index} rows, data has {data}")]
    IndexLength { index: usize, data: usize },
    #[error("Shape mismatch: {columns} column names for {data} data columns")]
    ColumnCount { columns: usize, data: usize },
    #[error("Cannot combine frames with different columns")]
    ColumnMismatch,
    #[error("Cannot combine a {0} index with a {1} index")]
    IndexMismatch(&'static str, &'static str),
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),
    #[error("Operation requires a {expected} index, found {found}")]
    UnsupportedIndex {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Cannot build a frame from zero parts")]
    Empty,
}

/// Row labels of a [`Frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Index {
    Time(Vec<f64>),
    /// Positional keys, e.g. the row of a Monte Carlo parameter table
    Runs(Vec<usize>),
    Labels(Vec<String>),
    /// Values of a single scanned parameter
    Values { name: String, values: Vec<f64> },
    /// Value tuples of several scanned parameters
    Tuples {
        names: Vec<String>,
        values: Vec<Vec<f64>>,
    },
    /// Two-level index of an outer run key and the rows of that run
    Nested { outer: Vec<usize>, inner: Box<Index> },
}

impl Index {
    pub fn len(&self) -> usize {
        match self {
            Index::Time(t) => t.len(),
            Index::Runs(r) => r.len(),
            Index::Labels(l) => l.len(),
            Index::Values { values, .. } => values.len(),
            Index::Tuples { values, .. } => values.len(),
            Index::Nested { outer, .. } => outer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            Index::Time(_) => "time",
            Index::Runs(_) => "runs",
            Index::Labels(_) => "labels",
            Index::Values { .. } => "values",
            Index::Tuples { .. } => "tuples",
            Index::Nested { .. } => "nested",
        }
    }

    /// Appends the labels of `other`, which must be of the same kind.
    pub fn append(&mut self, other: &Index) -> Result<(), FrameError> {
        match (self, other) {
            (Index::Time(a), Index::Time(b)) => a.extend_from_slice(b),
            (Index::Runs(a), Index::Runs(b)) => a.extend_from_slice(b),
            (Index::Labels(a), Index::Labels(b)) => a.extend_from_slice(b),
            (Index::Values { values: a, .. }, Index::Values { values: b, .. }) => {
                a.extend_from_slice(b)
            }
            (Index::Tuples { values: a, .. }, Index::Tuples { values: b, .. }) => {
                a.extend_from_slice(b)
            }
            (
                Index::Nested { outer: a, inner: ia },
                Index::Nested { outer: b, inner: ib },
            ) => {
                ia.append(ib)?;
                a.extend_from_slice(b);
            }
            (a, b) => return Err(FrameError::IndexMismatch(a.kind(), b.kind())),
        }
        Ok(())
    }

    /// Labels `start..end`. Bounds must be valid.
    pub fn slice(&self, start: usize, end: usize) -> Index {
        match self {
            Index::Time(t) => Index::Time(t[start..end].to_vec()),
            Index::Runs(r) => Index::Runs(r[start..end].to_vec()),
            Index::Labels(l) => Index::Labels(l[start..end].to_vec()),
            Index::Values { name, values } => Index::Values {
                name: name.clone(),
                values: values[start..end].to_vec(),
            },
            Index::Tuples { names, values } => Index::Tuples {
                names: names.clone(),
                values: values[start..end].to_vec(),
            },
            Index::Nested { outer, inner } => Index::Nested {
                outer: outer[start..end].to_vec(),
                inner: Box::new(inner.slice(start, end)),
            },
        }
    }

    /// Labels at the given positions. Positions must be valid.
    pub fn take(&self, positions: &[usize]) -> Index {
        fn pick<T: Clone>(labels: &[T], positions: &[usize]) -> Vec<T> {
            positions.iter().map(|i| labels[*i].clone()).collect()
        }

        match self {
            Index::Time(t) => Index::Time(pick(t, positions)),
            Index::Runs(r) => Index::Runs(pick(r, positions)),
            Index::Labels(l) => Index::Labels(pick(l, positions)),
            Index::Values { name, values } => Index::Values {
                name: name.clone(),
                values: pick(values, positions),
            },
            Index::Tuples { names, values } => Index::Tuples {
                names: names.clone(),
                values: pick(values, positions),
            },
            Index::Nested { outer, inner } => Index::Nested {
                outer: pick(outer, positions),
                inner: Box::new(inner.take(positions)),
            },
        }
    }

    /// Time labels, if this is a time index.
    pub fn as_time(&self) -> Option<&[f64]> {
        match self {
            Index::Time(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    index: Index,
    columns: Vec<String>,
    data: Array2<f64>,
}

impl Frame {
    pub fn new(index: Index, columns: Vec<String>, data: Array2<f64>) -> Result<Self, FrameError> {
        if index.len() != data.nrows() {
            return Err(FrameError::IndexLength {
                index: index.len(),
                data: data.nrows(),
            });
        }
        if columns.len() != data.ncols() {
            return Err(FrameError::ColumnCount {
                columns: columns.len(),
                data: data.ncols(),
            });
        }
        Ok(Self {
            index,
            columns,
            data,
        })
    }

    /// A frame of the given shape filled with NaN, used in place of failed runs.
    pub fn nan(index: Index, columns: Vec<String>) -> Self {
        let data = Array2::from_elem((index.len(), columns.len()), f64::NAN);
        Self {
            index,
            columns,
            data,
        }
    }

    pub fn from_rows(
        index: Index,
        columns: Vec<String>,
        rows: &[Vec<f64>],
    ) -> Result<Self, FrameError> {
        let ncols = columns.len();
        let mut data = Array2::zeros((rows.len(), ncols));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != ncols {
                return Err(FrameError::ColumnCount {
                    columns: ncols,
                    data: row.len(),
                });
            }
            for (j, value) in row.iter().enumerate() {
                data[[i, j]] = *value;
            }
        }
        Self::new(index, columns, data)
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|j| self.data.column(j))
    }

    pub fn row(&self, i: usize) -> Option<ArrayView1<'_, f64>> {
        (i < self.nrows()).then(|| self.data.row(i))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<f64> {
        let j = self.column_index(column)?;
        self.data.get([row, j]).copied()
    }

    /// Row `i` as a name to value mapping.
    pub fn row_map(&self, i: usize) -> Option<IndexMap<String, f64>> {
        let row = self.row(i)?;
        Some(self.columns.iter().cloned().zip(row.iter().copied()).collect())
    }

    pub fn last_row(&self) -> Option<IndexMap<String, f64>> {
        self.nrows().checked_sub(1).and_then(|i| self.row_map(i))
    }

    /// Keeps the given columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> Result<Frame, FrameError> {
        let positions = columns
            .iter()
            .map(|c| {
                self.column_index(c.as_ref())
                    .ok_or_else(|| FrameError::UnknownColumn(c.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Frame {
            index: self.index.clone(),
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            data: self.data.select(Axis(1), &positions),
        })
    }

    /// Rows `start..end` of the frame.
    pub fn slice_rows(&self, start: usize, end: usize) -> Frame {
        let end = end.min(self.nrows());
        let start = start.min(end);
        let index = self.index.slice(start, end);

        Frame {
            index,
            columns: self.columns.clone(),
            data: self.data.slice(s![start..end, ..]).to_owned(),
        }
    }

    /// Stacks frames with identical columns on top of each other.
    pub fn concat_rows(frames: &[Frame]) -> Result<Frame, FrameError> {
        let first = frames.first().ok_or(FrameError::Empty)?;
        let mut index = first.index.clone();

        for frame in frames.iter().skip(1) {
            if frame.columns != first.columns {
                return Err(FrameError::ColumnMismatch);
            }
            index.append(&frame.index)?;
        }

        let views: Vec<_> = frames.iter().map(|f| f.data.view()).collect();
        let data = concatenate(Axis(0), &views).map_err(|_| FrameError::ColumnMismatch)?;

        Frame::new(index, first.columns.clone(), data)
    }

    /// Places the columns of `other` to the right of this frame's columns. The index
    /// of `self` is kept.
    pub fn concat_columns(&self, other: &Frame) -> Result<Frame, FrameError> {
        if self.nrows() != other.nrows() {
            return Err(FrameError::IndexLength {
                index: self.nrows(),
                data: other.nrows(),
            });
        }
        let data = concatenate(Axis(1), &[self.data.view(), other.data.view()])
            .map_err(|_| FrameError::ColumnMismatch)?;
        let columns = self
            .columns
            .iter()
            .chain(other.columns.iter())
            .cloned()
            .collect();
        Frame::new(self.index.clone(), columns, data)
    }

    /// Stacks per-run frames under a two-level (run, inner) index.
    pub fn nested(parts: Vec<(usize, Frame)>) -> Result<Frame, FrameError> {
        let mut outer = Vec::new();
        let mut frames = Vec::with_capacity(parts.len());
        for (key, frame) in parts {
            outer.extend(std::iter::repeat(key).take(frame.nrows()));
            frames.push(frame);
        }

        let stacked = Frame::concat_rows(&frames)?;
        Frame::new(
            Index::Nested {
                outer,
                inner: Box::new(stacked.index),
            },
            stacked.columns,
            stacked.data,
        )
    }

    /// Builds a frame from one row per key, each row given as a mapping aligned with
    /// `columns`.
    pub fn from_row_maps(
        index: Index,
        columns: Vec<String>,
        rows: &[IndexMap<String, f64>],
    ) -> Result<Frame, FrameError> {
        let rows: Vec<Vec<f64>> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).copied().unwrap_or(f64::NAN))
                    .collect()
            })
            .collect();
        Frame::from_rows(index, columns, &rows)
    }

    /// Applies `f` to every value.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Frame {
        Frame {
            index: self.index.clone(),
            columns: self.columns.clone(),
            data: self.data.mapv(f),
        }
    }

    /// Divides every row by the matching entry of `divisors`.
    pub fn divide_rows(&self, divisors: &[f64]) -> Result<Frame, FrameError> {
        if divisors.len() != self.nrows() {
            return Err(FrameError::IndexLength {
                index: self.nrows(),
                data: divisors.len(),
            });
        }
        let mut data = self.data.clone();
        for (mut row, divisor) in data.rows_mut().into_iter().zip(divisors) {
            row.mapv_inplace(|v| v / divisor);
        }
        Frame::new(self.index.clone(), self.columns.clone(), data)
    }

    fn nested_parts(&self) -> Result<(&[usize], &Index), FrameError> {
        match &self.index {
            Index::Nested { outer, inner } => Ok((outer, inner)),
            other => Err(FrameError::UnsupportedIndex {
                expected: "nested",
                found: other.kind(),
            }),
        }
    }

    /// Run keys of a nested frame in order of first appearance, with their rows.
    fn groups(&self) -> Result<IndexMap<usize, Vec<usize>>, FrameError> {
        let (outer, _) = self.nested_parts()?;
        let mut groups: IndexMap<usize, Vec<usize>> = IndexMap::new();
        for (row, key) in outer.iter().enumerate() {
            groups.entry(*key).or_default().push(row);
        }
        Ok(groups)
    }

    /// Time points of a nested (run, time) frame, in order of first appearance, with
    /// the rows that carry each of them.
    fn time_groups(&self) -> Result<IndexMap<OrderedFloat<f64>, Vec<usize>>, FrameError> {
        let (_, inner) = self.nested_parts()?;
        let time = inner.as_time().ok_or(FrameError::UnsupportedIndex {
            expected: "time",
            found: inner.kind(),
        })?;

        let mut groups: IndexMap<OrderedFloat<f64>, Vec<usize>> = IndexMap::new();
        for (row, t) in time.iter().enumerate() {
            groups.entry(OrderedFloat(*t)).or_default().push(row);
        }
        Ok(groups)
    }

    /// One column of a nested (run, time) frame, pivoted to time x run.
    pub fn unstack_column(&self, name: &str) -> Result<Frame, FrameError> {
        let j = self
            .column_index(name)
            .ok_or_else(|| FrameError::UnknownColumn(name.to_string()))?;
        let (outer, _) = self.nested_parts()?;
        let runs: Vec<usize> = self.groups()?.keys().copied().collect();
        let times = self.time_groups()?;

        let mut data = Array2::from_elem((times.len(), runs.len()), f64::NAN);
        for (i, rows) in times.values().enumerate() {
            for row in rows {
                if let Some(k) = runs.iter().position(|r| *r == outer[*row]) {
                    data[[i, k]] = self.data[[*row, j]];
                }
            }
        }

        Frame::new(
            Index::Time(times.keys().map(|t| t.0).collect()),
            runs.iter().map(|r| r.to_string()).collect(),
            data,
        )
    }

    /// Aggregates every column across runs, separately for each time point.
    pub fn aggregate_per_time<F>(&self, agg: F) -> Result<Frame, FrameError>
    where
        F: Fn(&[f64]) -> f64,
    {
        let times = self.time_groups()?;
        let rows: Vec<Vec<usize>> = times.values().cloned().collect();
        let data = self.aggregate_groups(&rows, &agg);
        Frame::new(
            Index::Time(times.keys().map(|t| t.0).collect()),
            self.columns.clone(),
            data,
        )
    }

    /// Aggregates every column over time, separately for each run.
    pub fn aggregate_per_run<F>(&self, agg: F) -> Result<Frame, FrameError>
    where
        F: Fn(&[f64]) -> f64,
    {
        let groups = self.groups()?;
        let rows: Vec<Vec<usize>> = groups.values().cloned().collect();
        let data = self.aggregate_groups(&rows, &agg);
        Frame::new(
            Index::Runs(groups.keys().copied().collect()),
            self.columns.clone(),
            data,
        )
    }

    fn aggregate_groups<F>(&self, groups: &[Vec<usize>], agg: &F) -> Array2<f64>
    where
        F: Fn(&[f64]) -> f64,
    {
        let mut data = Array2::zeros((groups.len(), self.ncols()));
        let mut buffer = Vec::new();
        for (i, rows) in groups.iter().enumerate() {
            for j in 0..self.ncols() {
                buffer.clear();
                buffer.extend(rows.iter().map(|row| self.data[[*row, j]]));
                data[[i, j]] = agg(&buffer);
            }
        }
        data
    }
}

/// NaN-skipping aggregation functions for [`Frame::aggregate_per_time`] and
/// [`Frame::aggregate_per_run`].
pub mod agg {
    fn finite(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
        values.iter().copied().filter(|v| !v.is_nan())
    }

    pub fn mean(values: &[f64]) -> f64 {
        let (sum, n) = finite(values).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 {
            f64::NAN
        } else {
            sum / n as f64
        }
    }

    /// Sample standard deviation.
    pub fn std(values: &[f64]) -> f64 {
        let n = finite(values).count();
        if n < 2 {
            return f64::NAN;
        }
        let m = mean(values);
        let ss: f64 = finite(values).map(|v| (v - m).powi(2)).sum();
        (ss / (n - 1) as f64).sqrt()
    }

    pub fn min(values: &[f64]) -> f64 {
        finite(values).fold(f64::NAN, f64::min)
    }

    pub fn max(values: &[f64]) -> f64 {
        finite(values).fold(f64::NAN, f64::max)
    }

    pub fn median(values: &[f64]) -> f64 {
        let mut sorted: Vec<f64> = finite(values).collect();
        if sorted.is_empty() {
            return f64::NAN;
        }
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }
}
