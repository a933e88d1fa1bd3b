//! Black-box replacements for reactions.
//!
//! A surrogate reads a list of argument names, predicts one flux per output and
//! contributes to the derivatives of variables through the stoichiometry declared for
//! each output. Wherever reaction fluxes are reported, surrogate outputs appear after
//! the reactions under their output names.

use std::fmt::Debug;

use indexmap::IndexMap;

use super::error::ModelError;

/// Output name to (variable name to coefficient).
pub type SurrogateStoichiometries = IndexMap<String, IndexMap<String, f64>>;

pub trait Surrogate: Debug + Send + Sync {
    /// Names of the model quantities fed into [`Surrogate::predict`], in order.
    fn args(&self) -> &[String];

    /// Stoichiometry of each output flux.
    fn stoichiometries(&self) -> &SurrogateStoichiometries;

    /// Predicts one flux per output, in the order of [`Surrogate::stoichiometries`].
    fn predict(&self, inputs: &[f64]) -> Result<Vec<f64>, ModelError>;
}

/// Surrogate evaluating one power series per output in the first argument.
///
/// Coefficients are stored in increasing degree, so `[1.0, 0.0, 2.0]` is `1 + 2x²`.
#[derive(Debug, Clone)]
pub struct PolySurrogate {
    args: Vec<String>,
    stoichiometries: SurrogateStoichiometries,
    coefficients: Vec<Vec<f64>>,
}

impl PolySurrogate {
    pub fn new(
        args: Vec<String>,
        stoichiometries: SurrogateStoichiometries,
        coefficients: Vec<Vec<f64>>,
    ) -> Result<Self, ModelError> {
        if args.is_empty() {
            return Err(ModelError::ArityMismatch {
                name: "PolySurrogate arguments".to_string(),
                expected: 1,
                actual: 0,
            });
        }

        if coefficients.len() != stoichiometries.len() {
            return Err(ModelError::ArityMismatch {
                name: "PolySurrogate outputs".to_string(),
                expected: stoichiometries.len(),
                actual: coefficients.len(),
            });
        }

        Ok(Self {
            args,
            stoichiometries,
            coefficients,
        })
    }
}

impl Surrogate for PolySurrogate {
    fn args(&self) -> &[String] {
        &self.args
    }

    fn stoichiometries(&self) -> &SurrogateStoichiometries {
        &self.stoichiometries
    }

    fn predict(&self, inputs: &[f64]) -> Result<Vec<f64>, ModelError> {
        let x = *inputs.first().ok_or_else(|| ModelError::ArityMismatch {
            name: "PolySurrogate inputs".to_string(),
            expected: self.args.len(),
            actual: 0,
        })?;

        // Horner scheme
        Ok(self
            .coefficients
            .iter()
            .map(|coefs| coefs.iter().rev().fold(0.0, |acc, c| acc * x + c))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_poly_surrogate_prediction() {
        let stoich = IndexMap::from([(
            "v1".to_string(),
            IndexMap::from([("x".to_string(), -1.0), ("y".to_string(), 1.0)]),
        )]);
        let surrogate =
            PolySurrogate::new(vec!["x".to_string()], stoich, vec![vec![1.0, 0.0, 2.0]]).unwrap();

        let prediction = surrogate.predict(&[3.0]).unwrap();

        assert_eq!(prediction.len(), 1);
        assert_relative_eq!(prediction[0], 19.0);
    }

    #[test]
    fn test_poly_surrogate_output_mismatch() {
        let stoich = IndexMap::from([("v1".to_string(), IndexMap::new())]);
        let result = PolySurrogate::new(vec!["x".to_string()], stoich, vec![]);
        assert!(matches!(result, Err(ModelError::ArityMismatch { .. })));
    }
}
