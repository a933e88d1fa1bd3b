//! Evaluation plan of a model.
//!
//! The plan is rebuilt lazily after any structural change of the model and holds
//! everything that depends on the model's structure but not on its values: the sorted
//! order of derived quantities, slot positions of every name in the evaluation buffer,
//! the resolved argument slots of every callable and the flattened stoichiometry.
//!
//! Buffer layout: parameters, variables, `time`, derived values in sorted order.

use indexmap::IndexMap;

use crate::graph::sort_dependencies;

use super::{
    entities::Stoichiometry,
    error::{EntityKind, ModelError},
    registry::{Model, TIME},
};

#[derive(Debug, Clone)]
pub(crate) struct ModelCache {
    pub(crate) slots: IndexMap<String, usize>,
    /// Derived values in evaluation order
    pub(crate) derived: Vec<CompiledDerived>,
    /// Argument slots of each reaction, in insertion order
    pub(crate) reactions: Vec<Vec<usize>>,
    pub(crate) readouts: Vec<Vec<usize>>,
    pub(crate) surrogates: Vec<Vec<usize>>,
    pub(crate) stoichiometry: Vec<StoichEntry>,
    pub(crate) derived_parameters: Vec<String>,
    pub(crate) derived_variables: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledDerived {
    pub(crate) model_index: usize,
    pub(crate) slot: usize,
    pub(crate) arg_slots: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct StoichEntry {
    pub(crate) variable: usize,
    pub(crate) flux: usize,
    pub(crate) coefficient: Coefficient,
}

#[derive(Debug, Clone)]
pub(crate) enum Coefficient {
    Constant(f64),
    Derived {
        reaction: usize,
        entry: usize,
        arg_slots: Vec<usize>,
    },
}

impl ModelCache {
    pub(crate) fn build(model: &Model) -> Result<Self, ModelError> {
        check_arities(model)?;

        let items: IndexMap<String, Vec<String>> = model
            .derived
            .iter()
            .map(|(name, d)| (name.clone(), d.args.clone()))
            .collect();
        let order = sort_dependencies(&items)?;

        let time = TIME.to_string();
        let mut slots: IndexMap<String, usize> = IndexMap::new();
        for name in model
            .parameters
            .keys()
            .chain(model.variables.keys())
            .chain(std::iter::once(&time))
            .chain(order.iter())
        {
            let next = slots.len();
            slots.insert(name.clone(), next);
        }

        let resolve = |args: &[String]| -> Result<Vec<usize>, ModelError> {
            args.iter()
                .map(|arg| {
                    slots
                        .get(arg)
                        .copied()
                        .ok_or_else(|| ModelError::not_found(arg.clone(), EntityKind::Name))
                })
                .collect()
        };

        let mut derived = Vec::with_capacity(order.len());
        let mut derived_parameters = Vec::new();
        let mut derived_variables = Vec::new();

        for name in order.iter() {
            let (model_index, _, entry) = model
                .derived
                .get_full(name)
                .ok_or_else(|| ModelError::not_found(name.clone(), EntityKind::Derived))?;

            // Dependencies are classified before their dependents
            let is_parameter = entry.args.iter().all(|arg| {
                model.parameters.contains_key(arg) || derived_parameters.contains(arg)
            });
            if is_parameter {
                derived_parameters.push(name.clone());
            } else {
                derived_variables.push(name.clone());
            }

            derived.push(CompiledDerived {
                model_index,
                slot: slots[name],
                arg_slots: resolve(&entry.args)?,
            });
        }

        let reactions = model
            .reactions
            .values()
            .map(|r| resolve(&r.args))
            .collect::<Result<Vec<_>, _>>()?;
        let readouts = model
            .readouts
            .values()
            .map(|r| resolve(&r.args))
            .collect::<Result<Vec<_>, _>>()?;
        let surrogates = model
            .surrogates
            .values()
            .map(|s| resolve(s.args()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut stoichiometry = Vec::new();

        for (reaction, (rxn_name, rxn)) in model.reactions.iter().enumerate() {
            for (entry, (variable, coef)) in rxn.stoichiometry.iter().enumerate() {
                let coefficient = match coef {
                    Stoichiometry::Constant(value) => Coefficient::Constant(*value),
                    Stoichiometry::Derived(d) => Coefficient::Derived {
                        reaction,
                        entry,
                        arg_slots: resolve(&d.args).map_err(|e| match e {
                            ModelError::NotFound { name, .. } => {
                                ModelError::InvalidStoichiometry {
                                    reaction: rxn_name.clone(),
                                    message: format!(
                                        "coefficient of '{variable}' depends on '{name}', \
                                         which is not part of the argument snapshot"
                                    ),
                                }
                            }
                            other => other,
                        })?,
                    },
                };

                stoichiometry.push(StoichEntry {
                    variable: variable_index(model, rxn_name, variable)?,
                    flux: reaction,
                    coefficient,
                });
            }
        }

        let mut flux = model.reactions.len();
        for (sur_name, surrogate) in model.surrogates.iter() {
            for output in surrogate.stoichiometries().values() {
                for (variable, coef) in output.iter() {
                    stoichiometry.push(StoichEntry {
                        variable: variable_index(model, sur_name, variable)?,
                        flux,
                        coefficient: Coefficient::Constant(*coef),
                    });
                }
                flux += 1;
            }
        }

        Ok(Self {
            slots,
            derived,
            reactions,
            readouts,
            surrogates,
            stoichiometry,
            derived_parameters,
            derived_variables,
        })
    }
}

/// Checks every native function against the length of its argument list.
fn check_arities(model: &Model) -> Result<(), ModelError> {
    for (name, d) in model.derived.iter() {
        d.func.check_arity(name, d.args.len())?;
    }
    for (name, r) in model.readouts.iter() {
        r.func.check_arity(name, r.args.len())?;
    }
    for (name, r) in model.reactions.iter() {
        r.func.check_arity(name, r.args.len())?;
        for coef in r.stoichiometry.values() {
            if let Stoichiometry::Derived(d) = coef {
                d.func.check_arity(name, d.args.len())?;
            }
        }
    }
    Ok(())
}

fn variable_index(model: &Model, owner: &str, variable: &str) -> Result<usize, ModelError> {
    model
        .variables
        .get_index_of(variable)
        .ok_or_else(|| ModelError::InvalidStoichiometry {
            reaction: owner.to_string(),
            message: format!("'{variable}' is not a variable"),
        })
}
