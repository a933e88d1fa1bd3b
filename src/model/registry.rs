//! Model registry.
//!
//! The [`Model`] owns every named entity of a kinetic model and keeps the evaluation
//! plan consistent with them. Names are unique across all entity kinds. References
//! between entities are resolved when the plan is (re)built, so entities can be added
//! in any order; an unknown reference surfaces on the first evaluation.
//!
//! The plan is an explicit cache: an empty [`OnceLock`] means dirty. Every structural
//! change replaces it with an empty one, and the next read rebuilds it. Updating the
//! value of a parameter or variable keeps the plan, because values are read from the
//! registry on every evaluation.
//!
//! Removing a name that other entities still reference fails with
//! [`ModelError::HasDependents`]. Nothing is removed implicitly.

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;

use super::{
    cache::ModelCache,
    entities::{Derived, Reaction, Readout, Stoichiometry},
    error::{EntityKind, ModelError},
    surrogate::Surrogate,
};

/// Reserved argument name bound to the integration time.
pub const TIME: &str = "time";

#[derive(Debug, Clone, Default)]
pub struct Model {
    pub(crate) ids: IndexMap<String, EntityKind>,
    pub(crate) parameters: IndexMap<String, f64>,
    pub(crate) variables: IndexMap<String, f64>,
    pub(crate) derived: IndexMap<String, Derived>,
    pub(crate) reactions: IndexMap<String, Reaction>,
    pub(crate) readouts: IndexMap<String, Readout>,
    pub(crate) surrogates: IndexMap<String, Arc<dyn Surrogate>>,
    cache: OnceLock<ModelCache>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the evaluation plan, rebuilding it if the model changed.
    pub(crate) fn cache(&self) -> Result<&ModelCache, ModelError> {
        if let Some(cache) = self.cache.get() {
            return Ok(cache);
        }
        let cache = ModelCache::build(self)?;
        Ok(self.cache.get_or_init(|| cache))
    }

    fn invalidate(&mut self) {
        self.cache = OnceLock::new();
    }

    fn insert_id(&mut self, name: &str, kind: EntityKind) -> Result<(), ModelError> {
        if name == TIME || self.ids.contains_key(name) {
            return Err(ModelError::DuplicateName(name.to_string()));
        }
        self.ids.insert(name.to_string(), kind);
        Ok(())
    }

    fn check_kind(&self, name: &str, kind: EntityKind) -> Result<(), ModelError> {
        match self.ids.get(name) {
            Some(k) if *k == kind => Ok(()),
            _ => Err(ModelError::not_found(name, kind)),
        }
    }

    /// Names of all entities that read `name`, excluding `name` itself.
    pub fn get_dependents(&self, name: &str) -> Vec<String> {
        let mut dependents = Vec::new();
        for (other, d) in self.derived.iter() {
            if other != name && reads(d.args.iter(), name) {
                dependents.push(other.clone());
            }
        }
        for (other, r) in self.reactions.iter() {
            if other != name && reads(r.dependencies(), name) {
                dependents.push(other.clone());
            }
        }
        for (other, r) in self.readouts.iter() {
            if other != name && reads(r.args.iter(), name) {
                dependents.push(other.clone());
            }
        }
        for (other, s) in self.surrogates.iter() {
            if other != name && reads(s.args().iter(), name) {
                dependents.push(other.clone());
            }
        }
        dependents
    }

    fn check_no_dependents(&self, name: &str) -> Result<(), ModelError> {
        let dependents = self.get_dependents(name);
        if dependents.is_empty() {
            Ok(())
        } else {
            Err(ModelError::HasDependents {
                name: name.to_string(),
                dependents,
            })
        }
    }

    // Parameters

    pub fn add_parameter(&mut self, name: &str, value: f64) -> Result<&mut Self, ModelError> {
        self.insert_id(name, EntityKind::Parameter)?;
        self.parameters.insert(name.to_string(), value);
        self.invalidate();
        Ok(self)
    }

    pub fn add_parameters<'a, I>(&mut self, parameters: I) -> Result<&mut Self, ModelError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        for (name, value) in parameters {
            self.add_parameter(name, value)?;
        }
        Ok(self)
    }

    pub fn update_parameter(&mut self, name: &str, value: f64) -> Result<&mut Self, ModelError> {
        let slot = self
            .parameters
            .get_mut(name)
            .ok_or_else(|| ModelError::not_found(name, EntityKind::Parameter))?;
        *slot = value;
        Ok(self)
    }

    /// Updates several parameters. All names are checked before anything changes.
    pub fn update_parameters<'a, I>(&mut self, parameters: I) -> Result<&mut Self, ModelError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let updates: Vec<(&str, f64)> = parameters.into_iter().collect();
        if let Some((missing, _)) = updates
            .iter()
            .find(|(name, _)| !self.parameters.contains_key(*name))
        {
            return Err(ModelError::not_found(*missing, EntityKind::Parameter));
        }
        for (name, value) in updates {
            self.update_parameter(name, value)?;
        }
        Ok(self)
    }

    pub fn scale_parameter(&mut self, name: &str, factor: f64) -> Result<&mut Self, ModelError> {
        let value = self
            .parameters
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::not_found(name, EntityKind::Parameter))?;
        self.update_parameter(name, value * factor)
    }

    pub fn scale_parameters<'a, I>(&mut self, factors: I) -> Result<&mut Self, ModelError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        for (name, factor) in factors {
            self.scale_parameter(name, factor)?;
        }
        Ok(self)
    }

    pub fn remove_parameter(&mut self, name: &str) -> Result<&mut Self, ModelError> {
        self.check_kind(name, EntityKind::Parameter)?;
        self.check_no_dependents(name)?;
        self.parameters.shift_remove(name);
        self.ids.shift_remove(name);
        self.invalidate();
        Ok(self)
    }

    pub fn remove_parameters(&mut self, names: &[&str]) -> Result<&mut Self, ModelError> {
        for name in names {
            self.remove_parameter(name)?;
        }
        Ok(self)
    }

    pub fn get_parameters(&self) -> &IndexMap<String, f64> {
        &self.parameters
    }

    pub fn get_parameter_names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    // Variables

    /// Adds a variable with its initial value.
    pub fn add_variable(&mut self, name: &str, initial: f64) -> Result<&mut Self, ModelError> {
        self.insert_id(name, EntityKind::Variable)?;
        self.variables.insert(name.to_string(), initial);
        self.invalidate();
        Ok(self)
    }

    pub fn add_variables<'a, I>(&mut self, variables: I) -> Result<&mut Self, ModelError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        for (name, initial) in variables {
            self.add_variable(name, initial)?;
        }
        Ok(self)
    }

    /// Updates the initial value of a variable.
    pub fn update_variable(&mut self, name: &str, initial: f64) -> Result<&mut Self, ModelError> {
        let slot = self
            .variables
            .get_mut(name)
            .ok_or_else(|| ModelError::not_found(name, EntityKind::Variable))?;
        *slot = initial;
        Ok(self)
    }

    pub fn update_variables<'a, I>(&mut self, variables: I) -> Result<&mut Self, ModelError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        for (name, initial) in variables {
            self.update_variable(name, initial)?;
        }
        Ok(self)
    }

    /// Removes a variable. It must not be read by any entity nor appear in any
    /// stoichiometry.
    pub fn remove_variable(&mut self, name: &str) -> Result<&mut Self, ModelError> {
        self.check_kind(name, EntityKind::Variable)?;

        let mut dependents = self.get_dependents(name);
        for (rxn_name, rxn) in self.reactions.iter() {
            if rxn.stoichiometry.contains_key(name) && !dependents.contains(rxn_name) {
                dependents.push(rxn_name.clone());
            }
        }
        for (sur_name, sur) in self.surrogates.iter() {
            let touches = sur
                .stoichiometries()
                .values()
                .any(|stoich| stoich.contains_key(name));
            if touches && !dependents.contains(sur_name) {
                dependents.push(sur_name.clone());
            }
        }
        if !dependents.is_empty() {
            return Err(ModelError::HasDependents {
                name: name.to_string(),
                dependents,
            });
        }

        self.variables.shift_remove(name);
        self.ids.shift_remove(name);
        self.invalidate();
        Ok(self)
    }

    pub fn remove_variables(&mut self, names: &[&str]) -> Result<&mut Self, ModelError> {
        for name in names {
            self.remove_variable(name)?;
        }
        Ok(self)
    }

    /// Variables with their initial values, in insertion order. This order defines the
    /// layout of state vectors.
    pub fn get_variables(&self) -> &IndexMap<String, f64> {
        &self.variables
    }

    pub fn get_variable_names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    pub fn get_initial_conditions(&self) -> Vec<f64> {
        self.variables.values().copied().collect()
    }

    // Derived

    pub fn add_derived(&mut self, name: &str, derived: Derived) -> Result<&mut Self, ModelError> {
        derived.func.check_arity(name, derived.args.len())?;
        self.insert_id(name, EntityKind::Derived)?;
        self.derived.insert(name.to_string(), derived);
        self.invalidate();
        Ok(self)
    }

    /// Replaces function and arguments of a derived value.
    pub fn update_derived(&mut self, name: &str, derived: Derived) -> Result<&mut Self, ModelError> {
        derived.func.check_arity(name, derived.args.len())?;
        let slot = self
            .derived
            .get_mut(name)
            .ok_or_else(|| ModelError::not_found(name, EntityKind::Derived))?;
        *slot = derived;
        self.invalidate();
        Ok(self)
    }

    pub fn remove_derived(&mut self, name: &str) -> Result<&mut Self, ModelError> {
        self.check_kind(name, EntityKind::Derived)?;
        self.check_no_dependents(name)?;
        self.derived.shift_remove(name);
        self.ids.shift_remove(name);
        self.invalidate();
        Ok(self)
    }

    pub fn get_derived(&self, name: &str) -> Option<&Derived> {
        self.derived.get(name)
    }

    pub fn get_derived_names(&self) -> Vec<String> {
        self.derived.keys().cloned().collect()
    }

    /// Derived values that only depend on parameters, in evaluation order.
    pub fn get_derived_parameter_names(&self) -> Result<Vec<String>, ModelError> {
        Ok(self.cache()?.derived_parameters.clone())
    }

    /// Derived values that depend on variables or time, in evaluation order.
    pub fn get_derived_variable_names(&self) -> Result<Vec<String>, ModelError> {
        Ok(self.cache()?.derived_variables.clone())
    }

    /// All derived values in evaluation order.
    pub fn get_sorted_derived_names(&self) -> Result<Vec<String>, ModelError> {
        let cache = self.cache()?;
        Ok(cache
            .derived
            .iter()
            .filter_map(|d| self.derived.get_index(d.model_index).map(|(n, _)| n.clone()))
            .collect())
    }

    // Reactions

    pub fn add_reaction(&mut self, name: &str, reaction: Reaction) -> Result<&mut Self, ModelError> {
        validate_reaction(name, &reaction)?;
        self.insert_id(name, EntityKind::Reaction)?;
        self.reactions.insert(name.to_string(), reaction);
        self.invalidate();
        Ok(self)
    }

    pub fn update_reaction(
        &mut self,
        name: &str,
        reaction: Reaction,
    ) -> Result<&mut Self, ModelError> {
        validate_reaction(name, &reaction)?;
        let slot = self
            .reactions
            .get_mut(name)
            .ok_or_else(|| ModelError::not_found(name, EntityKind::Reaction))?;
        *slot = reaction;
        self.invalidate();
        Ok(self)
    }

    pub fn remove_reaction(&mut self, name: &str) -> Result<&mut Self, ModelError> {
        self.check_kind(name, EntityKind::Reaction)?;
        self.reactions.shift_remove(name);
        self.ids.shift_remove(name);
        self.invalidate();
        Ok(self)
    }

    pub fn get_reaction(&self, name: &str) -> Option<&Reaction> {
        self.reactions.get(name)
    }

    pub fn get_reaction_names(&self) -> Vec<String> {
        self.reactions.keys().cloned().collect()
    }

    /// Names of all fluxes: reactions followed by surrogate outputs.
    pub fn get_flux_names(&self) -> Vec<String> {
        self.reactions
            .keys()
            .cloned()
            .chain(
                self.surrogates
                    .values()
                    .flat_map(|s| s.stoichiometries().keys().cloned().collect::<Vec<_>>()),
            )
            .collect()
    }

    // Readouts

    pub fn add_readout(&mut self, name: &str, readout: Readout) -> Result<&mut Self, ModelError> {
        readout.func.check_arity(name, readout.args.len())?;
        self.insert_id(name, EntityKind::Readout)?;
        self.readouts.insert(name.to_string(), readout);
        self.invalidate();
        Ok(self)
    }

    pub fn remove_readout(&mut self, name: &str) -> Result<&mut Self, ModelError> {
        self.check_kind(name, EntityKind::Readout)?;
        self.readouts.shift_remove(name);
        self.ids.shift_remove(name);
        self.invalidate();
        Ok(self)
    }

    pub fn get_readout_names(&self) -> Vec<String> {
        self.readouts.keys().cloned().collect()
    }

    // Surrogates

    /// Adds a surrogate. Its output names share the namespace of all other entities.
    pub fn add_surrogate<S>(&mut self, name: &str, surrogate: S) -> Result<&mut Self, ModelError>
    where
        S: Surrogate + 'static,
    {
        let outputs: Vec<String> = surrogate.stoichiometries().keys().cloned().collect();
        if let Some(taken) = std::iter::once(name)
            .chain(outputs.iter().map(String::as_str))
            .find(|n| *n == TIME || self.ids.contains_key(*n))
        {
            return Err(ModelError::DuplicateName(taken.to_string()));
        }

        self.insert_id(name, EntityKind::Surrogate)?;
        for output in outputs.iter() {
            self.insert_id(output, EntityKind::Surrogate)?;
        }
        self.surrogates.insert(name.to_string(), Arc::new(surrogate));
        self.invalidate();
        Ok(self)
    }

    pub fn remove_surrogate(&mut self, name: &str) -> Result<&mut Self, ModelError> {
        let surrogate = self
            .surrogates
            .shift_remove(name)
            .ok_or_else(|| ModelError::not_found(name, EntityKind::Surrogate))?;
        self.ids.shift_remove(name);
        for output in surrogate.stoichiometries().keys() {
            self.ids.shift_remove(output);
        }
        self.invalidate();
        Ok(self)
    }

    pub fn get_surrogate_names(&self) -> Vec<String> {
        self.surrogates.keys().cloned().collect()
    }

    /// Columns reported as "full concentrations": variables, derived variables and
    /// readouts.
    pub fn get_full_conc_names(&self) -> Result<Vec<String>, ModelError> {
        let cache = self.cache()?;
        Ok(self
            .variables
            .keys()
            .chain(cache.derived_variables.iter())
            .chain(self.readouts.keys())
            .cloned()
            .collect())
    }

    /// Kind of the entity registered under `name`, if any.
    pub fn kind_of(&self, name: &str) -> Option<EntityKind> {
        self.ids.get(name).copied()
    }
}

fn reads<'a>(mut args: impl Iterator<Item = &'a String>, name: &str) -> bool {
    args.any(|a| a == name)
}

fn validate_reaction(name: &str, reaction: &Reaction) -> Result<(), ModelError> {
    reaction.func.check_arity(name, reaction.args.len())?;

    for (variable, coef) in reaction.stoichiometry.iter() {
        match coef {
            Stoichiometry::Constant(value) if !value.is_finite() => {
                return Err(ModelError::InvalidStoichiometry {
                    reaction: name.to_string(),
                    message: format!("coefficient of '{variable}' is {value}"),
                });
            }
            Stoichiometry::Derived(derived) => derived
                .func
                .check_arity(&format!("{name} ({variable})"), derived.args.len())?,
            Stoichiometry::Constant(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::surrogate::PolySurrogate;
    use pretty_assertions::assert_eq;

    fn constant(args: &[f64]) -> f64 {
        args[0]
    }

    fn base_model() -> Model {
        let mut model = Model::new();
        model
            .add_parameters([("k1", 1.0), ("k2", 2.0)])
            .unwrap()
            .add_variables([("x", 1.0), ("y", 0.0)])
            .unwrap();
        model
    }

    #[test]
    fn test_duplicate_names_across_kinds() {
        let mut model = base_model();
        assert_eq!(
            model.add_variable("k1", 1.0).unwrap_err(),
            ModelError::DuplicateName("k1".to_string())
        );
        assert!(model
            .add_derived("x", Derived::new(constant, &["k1"]))
            .is_err());
        assert!(model.add_parameter("time", 1.0).is_err());
    }

    #[test]
    fn test_update_unknown_parameter() {
        let mut model = base_model();
        let err = model.update_parameter("missing", 1.0).unwrap_err();
        assert_eq!(err, ModelError::not_found("missing", EntityKind::Parameter));
    }

    #[test]
    fn test_update_parameters_is_all_or_nothing() {
        let mut model = base_model();
        assert!(model
            .update_parameters([("k1", 5.0), ("missing", 1.0)])
            .is_err());
        assert_eq!(model.get_parameters()["k1"], 1.0);
    }

    #[test]
    fn test_scale_parameter() {
        let mut model = base_model();
        model.scale_parameter("k2", 1.5).unwrap();
        assert_eq!(model.get_parameters()["k2"], 3.0);
    }

    #[test]
    fn test_remove_with_dependents_fails() {
        let mut model = base_model();
        model
            .add_derived("d1", Derived::new(constant, &["k1"]))
            .unwrap()
            .add_reaction("v1", Reaction::new(constant, &["d1"], [("x", -1.0)]))
            .unwrap();

        let err = model.remove_parameter("k1").unwrap_err();
        assert_eq!(
            err,
            ModelError::HasDependents {
                name: "k1".to_string(),
                dependents: vec!["d1".to_string()],
            }
        );

        assert!(model.remove_derived("d1").is_err());
        assert!(model.remove_variable("x").is_err());

        model.remove_reaction("v1").unwrap();
        model.remove_derived("d1").unwrap();
        model.remove_parameter("k1").unwrap();
        assert_eq!(model.get_parameter_names(), vec!["k2"]);
    }

    #[test]
    fn test_removed_name_can_be_reused() {
        let mut model = base_model();
        model.remove_parameter("k2").unwrap();
        model.add_variable("k2", 3.0).unwrap();
        assert_eq!(model.kind_of("k2"), Some(EntityKind::Variable));
    }

    #[test]
    fn test_derived_classification() {
        let mut model = base_model();
        model
            .add_derived("dv", Derived::new(|a: &[f64]| a[0] * a[1], &["dp", "x"]))
            .unwrap()
            .add_derived("dp", Derived::new(|a: &[f64]| a[0] + a[1], &["k1", "k2"]))
            .unwrap();

        assert_eq!(model.get_derived_parameter_names().unwrap(), vec!["dp"]);
        assert_eq!(model.get_derived_variable_names().unwrap(), vec!["dv"]);
        assert_eq!(model.get_sorted_derived_names().unwrap(), vec!["dp", "dv"]);
    }

    #[test]
    fn test_cycle_introduced_by_update() {
        let mut model = base_model();
        model
            .add_derived("a", Derived::new(constant, &["k1"]))
            .unwrap()
            .add_derived("b", Derived::new(constant, &["a"]))
            .unwrap();
        assert!(model.get_sorted_derived_names().is_ok());

        model
            .update_derived("a", Derived::new(constant, &["b"]))
            .unwrap();

        assert!(matches!(
            model.get_sorted_derived_names(),
            Err(ModelError::Cycle(_))
        ));
    }

    #[test]
    fn test_reaction_modifiers() {
        let mut model = base_model();
        model.add_variable("enzyme", 1.0).unwrap();
        let reaction = Reaction::new(
            |a: &[f64]| a[0] * a[1] * a[2],
            &["k1", "x", "enzyme"],
            [("x", -1.0), ("y", 1.0)],
        );
        assert_eq!(reaction.get_modifiers(&model), vec!["enzyme"]);
    }

    #[test]
    fn test_surrogate_outputs_are_registered() {
        let mut model = base_model();
        let stoich = IndexMap::from([(
            "v_sur".to_string(),
            IndexMap::from([("x".to_string(), -1.0)]),
        )]);
        let surrogate =
            PolySurrogate::new(vec!["x".to_string()], stoich, vec![vec![0.0, 1.0]]).unwrap();

        model.add_surrogate("sur", surrogate.clone()).unwrap();
        assert_eq!(model.get_flux_names(), vec!["v_sur"]);
        assert!(model.add_parameter("v_sur", 1.0).is_err());

        model.remove_surrogate("sur").unwrap();
        assert!(model.get_flux_names().is_empty());
        model.add_parameter("v_sur", 1.0).unwrap();
    }

    #[test]
    fn test_unknown_stoichiometry_variable() {
        let mut model = base_model();
        model
            .add_reaction("v1", Reaction::new(constant, &["k1"], [("z", 1.0)]))
            .unwrap();
        assert!(matches!(
            model.get_full_conc_names(),
            Err(ModelError::InvalidStoichiometry { .. })
        ));
    }

    #[test]
    fn test_native_arity_is_checked_on_insert() {
        let mut model = base_model();

        let result = model.add_reaction(
            "v1",
            Reaction::new(
                crate::ratefunctions::michaelis_menten,
                &["x", "k1"],
                [("x", -1.0)],
            ),
        );
        assert!(matches!(
            result,
            Err(ModelError::ArityMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
        assert!(model.get_reaction_names().is_empty());

        assert!(matches!(
            model.add_derived("d1", Derived::new(crate::ratefunctions::proportional, &["k1"])),
            Err(ModelError::ArityMismatch { .. })
        ));
        assert!(matches!(
            model.add_readout(
                "r1",
                Readout::new(crate::ratefunctions::constant, &["x", "y"])
            ),
            Err(ModelError::ArityMismatch { .. })
        ));
        assert!(matches!(
            model.add_reaction(
                "v2",
                Reaction::new(
                    constant,
                    &["k1"],
                    [("x", Derived::new(crate::ratefunctions::constant, &[]))]
                ),
            ),
            Err(ModelError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_native_arity_mismatch_does_not_panic_on_evaluation() {
        let mut model = base_model();
        model
            .add_reaction(
                "v1",
                Reaction::new(crate::ratefunctions::mass_action_1, &["x", "k1"], [("x", -1.0)]),
            )
            .unwrap();

        let mut broken = model.get_reaction("v1").cloned().unwrap();
        broken.args.pop();
        assert!(model.update_reaction("v1", broken).is_err());
        assert!(model.get_fluxes(model.get_variables(), 0.0).is_ok());
    }
}
