//! Initial Conditions Module
//!
//! Initial conditions are a name to value mapping over the variables of a model.
//! [`resolve_initial_conditions`] turns a possibly partial mapping into the full state
//! vector in variable order, filling gaps from the values stored in the model.

use indexmap::IndexMap;

use crate::model::registry::Model;

use super::error::SimulationError;

pub type InitialConditions = IndexMap<String, f64>;

/// Builds the full initial state vector of `model`.
///
/// # Arguments
///
/// * `model` - The model whose variables define the state order
/// * `y0` - Optional overrides; variables not mentioned keep their model value
///
/// # Returns
///
/// The state vector in variable order, or
/// [`SimulationError::InvalidInitialConditions`] if `y0` names something that is not a
/// variable or holds a non-finite value.
pub fn resolve_initial_conditions(
    model: &Model,
    y0: Option<&InitialConditions>,
) -> Result<Vec<f64>, SimulationError> {
    let variables = model.get_variables();

    if let Some(y0) = y0 {
        if let Some(unknown) = y0.keys().find(|name| !variables.contains_key(*name)) {
            return Err(SimulationError::InvalidInitialConditions(format!(
                "'{unknown}' is not a variable of the model"
            )));
        }

        if let Some((name, value)) = y0.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SimulationError::InvalidInitialConditions(format!(
                "'{name}' has non-finite value {value}"
            )));
        }
    }

    Ok(variables
        .iter()
        .map(|(name, value)| y0.and_then(|y0| y0.get(name)).copied().unwrap_or(*value))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        let mut model = Model::new();
        model.add_variables([("a", 1.0), ("b", 2.0)]).unwrap();
        model
    }

    #[test]
    fn test_partial_overrides_are_filled() {
        let y0 = InitialConditions::from([("b".to_string(), 5.0)]);
        let state = resolve_initial_conditions(&model(), Some(&y0)).unwrap();
        assert_eq!(state, vec![1.0, 5.0]);
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let y0 = InitialConditions::from([("c".to_string(), 5.0)]);
        let result = resolve_initial_conditions(&model(), Some(&y0));
        assert!(matches!(
            result,
            Err(SimulationError::InvalidInitialConditions(_))
        ));
    }
}
