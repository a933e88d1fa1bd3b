//! Parameter distributions for Monte Carlo sampling.
//!
//! [`sample`] draws `n` values per parameter and returns them as a
//! [`ParameterTable`] that the functions in [`crate::mc`] consume directly.

use indexmap::IndexMap;
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution as dist;
use thiserror::Error;

use crate::parameters::ParameterTable;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistributionError {
    #[error("Invalid distribution for '{name}': {message}")]
    Invalid { name: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    Uniform { lower: f64, upper: f64 },
    Normal { loc: f64, scale: f64 },
    /// Log-normal with location and scale of the underlying normal
    LogNormal { loc: f64, scale: f64 },
    Beta { a: f64, b: f64 },
}

impl Distribution {
    /// Draws `n` values.
    pub fn sample_n<R: rand::Rng>(
        &self,
        name: &str,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<f64>, DistributionError> {
        use rand::distributions::Distribution as _;

        let invalid = |message: String| DistributionError::Invalid {
            name: name.to_string(),
            message,
        };

        let values = match *self {
            Distribution::Uniform { lower, upper } => {
                let d = dist::Uniform::new(lower, upper).map_err(|e| invalid(e.to_string()))?;
                (0..n).map(|_| d.sample(rng)).collect()
            }
            Distribution::Normal { loc, scale } => {
                let d = dist::Normal::new(loc, scale).map_err(|e| invalid(e.to_string()))?;
                (0..n).map(|_| d.sample(rng)).collect()
            }
            Distribution::LogNormal { loc, scale } => {
                let d = dist::LogNormal::new(loc, scale).map_err(|e| invalid(e.to_string()))?;
                (0..n).map(|_| d.sample(rng)).collect()
            }
            Distribution::Beta { a, b } => {
                let d = dist::Beta::new(a, b).map_err(|e| invalid(e.to_string()))?;
                (0..n).map(|_| d.sample(rng)).collect()
            }
        };

        Ok(values)
    }
}

/// Samples `n` parameter sets.
///
/// # Arguments
///
/// * `parameters` - Distribution per parameter name
/// * `n` - Number of rows to draw
/// * `seed` - Fixed seed for reproducible draws, entropy otherwise
///
/// # Examples
///
/// ```
/// use indexmap::IndexMap;
/// use modelbase::distributions::{sample, Distribution};
///
/// let table = sample(
///     &IndexMap::from([("k1".to_string(), Distribution::Uniform { lower: 0.0, upper: 1.0 })]),
///     10,
///     Some(42),
/// )
/// .unwrap();
///
/// assert_eq!(table.nrows(), 10);
/// ```
pub fn sample(
    parameters: &IndexMap<String, Distribution>,
    n: usize,
    seed: Option<u64>,
) -> Result<ParameterTable, DistributionError> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut values = Array2::zeros((n, parameters.len()));
    for (j, (name, distribution)) in parameters.iter().enumerate() {
        for (i, value) in distribution
            .sample_n(name, n, &mut rng)?
            .into_iter()
            .enumerate()
        {
            values[[i, j]] = value;
        }
    }

    ParameterTable::new(parameters.keys().cloned().collect(), values).map_err(|e| {
        DistributionError::Invalid {
            name: "table".to_string(),
            message: e.to_string(),
        }
    })
}
