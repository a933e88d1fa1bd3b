//! Tables of parameter sets for scans and Monte Carlo runs.
//!
//! A [`ParameterTable`] holds one row per scenario and one column per parameter name.
//! Scans update a copy of the model with each row and index their results with
//! [`ParameterTable::index`]: the plain column values for a single-column table, the
//! row tuples otherwise.

use indexmap::IndexMap;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::frame::{FrameError, Index};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl ParameterTable {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self, FrameError> {
        if columns.len() != values.ncols() {
            return Err(FrameError::ColumnCount {
                columns: columns.len(),
                data: values.ncols(),
            });
        }
        Ok(Self { columns, values })
    }

    /// Builds a table from equally long columns.
    ///
    /// # Examples
    ///
    /// ```
    /// use indexmap::IndexMap;
    /// use modelbase::parameters::ParameterTable;
    ///
    /// let table = ParameterTable::from_columns(IndexMap::from([
    ///     ("k1".to_string(), vec![1.0, 2.0]),
    ///     ("k2".to_string(), vec![3.0, 4.0]),
    /// ]))
    /// .unwrap();
    ///
    /// assert_eq!(table.nrows(), 2);
    /// ```
    pub fn from_columns(columns: IndexMap<String, Vec<f64>>) -> Result<Self, FrameError> {
        let nrows = columns.values().next().map_or(0, Vec::len);
        if let Some(column) = columns.values().find(|c| c.len() != nrows) {
            return Err(FrameError::IndexLength {
                index: nrows,
                data: column.len(),
            });
        }

        let mut values = Array2::zeros((nrows, columns.len()));
        for (j, column) in columns.values().enumerate() {
            for (i, value) in column.iter().enumerate() {
                values[[i, j]] = *value;
            }
        }

        Self::new(columns.into_keys().collect(), values)
    }

    /// Creates a table of all combinations of the given parameter values.
    ///
    /// The last parameter varies fastest, so `{a: [1, 2], b: [3, 4]}` yields the rows
    /// `(1, 3), (1, 4), (2, 3), (2, 4)`.
    pub fn cartesian_product(grids: IndexMap<String, Vec<f64>>) -> Self {
        let grids: Vec<(String, Vec<f64>)> = grids.into_iter().collect();
        let rows = if grids.is_empty() {
            Vec::new()
        } else {
            generate_combinations(&grids, 0, Vec::new())
        };

        let mut values = Array2::zeros((rows.len(), grids.len()));
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                values[[i, j]] = *value;
            }
        }

        Self {
            columns: grids.into_iter().map(|(name, _)| name).collect(),
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.nrows() == 0
    }

    pub fn row(&self, i: usize) -> Option<ArrayView1<'_, f64>> {
        (i < self.nrows()).then(|| self.values.row(i))
    }

    /// Row `i` as a parameter name to value mapping.
    pub fn row_map(&self, i: usize) -> Option<IndexMap<String, f64>> {
        let row = self.row(i)?;
        Some(self.columns.iter().cloned().zip(row.iter().copied()).collect())
    }

    /// All rows as (row number, parameter mapping) pairs.
    pub fn rows(&self) -> Vec<(usize, IndexMap<String, f64>)> {
        (0..self.nrows())
            .filter_map(|i| self.row_map(i).map(|row| (i, row)))
            .collect()
    }

    /// Result index for scans over this table.
    pub fn index(&self) -> Index {
        if let [name] = self.columns.as_slice() {
            Index::Values {
                name: name.clone(),
                values: self.values.column(0).to_vec(),
            }
        } else {
            Index::Tuples {
                names: self.columns.clone(),
                values: self.values.rows().into_iter().map(|r| r.to_vec()).collect(),
            }
        }
    }
}

fn generate_combinations(
    grids: &[(String, Vec<f64>)],
    current_index: usize,
    current_values: Vec<f64>,
) -> Vec<Vec<f64>> {
    if current_index == grids.len() {
        return vec![current_values];
    }

    let (_, values) = &grids[current_index];
    let mut result = Vec::new();

    for &value in values {
        let mut values_copy = current_values.clone();
        values_copy.push(value);
        result.extend(generate_combinations(grids, current_index + 1, values_copy));
    }

    result
}
