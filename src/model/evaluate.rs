//! Evaluation of a model for one state or a whole time series.
//!
//! All evaluations go through the same slot buffer described by the model's
//! evaluation plan. Parameters, variables and time are written first; derived values
//! are then computed in sorted order, each one written back into the buffer before the
//! next one reads it. Fluxes, derived stoichiometric coefficients and readouts all read
//! from this final snapshot.

use indexmap::IndexMap;
use ndarray::Array2;

use crate::{
    frame::{Frame, Index},
    graph::sort_subset,
};

use super::{
    cache::{Coefficient, ModelCache},
    entities::Stoichiometry,
    error::{EntityKind, ModelError},
    registry::{Model, TIME},
};

impl Model {
    /// Computes parameters, variables, time and all derived values for one state.
    ///
    /// # Arguments
    ///
    /// * `concs` - Value of every variable
    /// * `time` - Time bound to the reserved `time` argument
    /// * `include_readouts` - Whether readouts are appended to the result
    ///
    /// # Returns
    ///
    /// Name to value mapping in evaluation order.
    pub fn get_args(
        &self,
        concs: &IndexMap<String, f64>,
        time: f64,
        include_readouts: bool,
    ) -> Result<IndexMap<String, f64>, ModelError> {
        let cache = self.cache()?;
        let state = self.state_from_map(concs)?;
        let buffer = self.fill_slots(cache, &state, time)?;

        let mut args: IndexMap<String, f64> = cache
            .slots
            .keys()
            .cloned()
            .zip(buffer.iter().copied())
            .collect();

        if include_readouts {
            for (name, value) in self.readouts.keys().zip(self.eval_readouts(cache, &buffer)?) {
                args.insert(name.clone(), value);
            }
        }

        Ok(args)
    }

    /// Computes only the requested names and what they transitively need.
    ///
    /// Useful to inspect the arguments of a single reaction without evaluating the
    /// whole model.
    pub fn get_args_for<S: AsRef<str>>(
        &self,
        names: &[S],
        concs: &IndexMap<String, f64>,
        time: f64,
    ) -> Result<IndexMap<String, f64>, ModelError> {
        let items: IndexMap<String, Vec<String>> = self
            .derived
            .iter()
            .map(|(name, d)| (name.clone(), d.args.clone()))
            .collect();
        let order = sort_subset(&items, names)?;

        let mut values: IndexMap<String, f64> = self.parameters.clone();
        values.insert(TIME.to_string(), time);
        for name in self.variables.keys() {
            let value = concs
                .get(name)
                .copied()
                .ok_or_else(|| ModelError::not_found(name.clone(), EntityKind::Variable))?;
            values.insert(name.clone(), value);
        }

        let mut inputs = Vec::new();
        for name in order {
            let derived = &self.derived[&name];
            inputs.clear();
            for arg in derived.args.iter() {
                let value = values
                    .get(arg)
                    .copied()
                    .ok_or_else(|| ModelError::not_found(arg.clone(), EntityKind::Name))?;
                inputs.push(value);
            }
            let value = derived.func.call(&derived.args, &inputs)?;
            values.insert(name, value);
        }

        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                values
                    .get(name)
                    .map(|v| (name.to_string(), *v))
                    .ok_or_else(|| ModelError::not_found(name, EntityKind::Name))
            })
            .collect()
    }

    /// Computes all fluxes (reactions, then surrogate outputs) for one state.
    pub fn get_fluxes(
        &self,
        concs: &IndexMap<String, f64>,
        time: f64,
    ) -> Result<IndexMap<String, f64>, ModelError> {
        let cache = self.cache()?;
        let state = self.state_from_map(concs)?;
        let buffer = self.fill_slots(cache, &state, time)?;
        let fluxes = self.eval_fluxes(cache, &buffer)?;
        Ok(self.get_flux_names().into_iter().zip(fluxes).collect())
    }

    /// Computes the time derivative of every variable for one state.
    pub fn get_right_hand_side(
        &self,
        concs: &IndexMap<String, f64>,
        time: f64,
    ) -> Result<IndexMap<String, f64>, ModelError> {
        let state = self.state_from_map(concs)?;
        let mut dy = vec![0.0; state.len()];
        self.right_hand_side(time, &state, &mut dy)?;
        Ok(self.variables.keys().cloned().zip(dy).collect())
    }

    /// Slice based right hand side. `y` and `dy` follow the variable order.
    ///
    /// Each reaction contributes `coefficient * flux` to the variables of its
    /// stoichiometry. A non-finite derivative is reported as [`ModelError::NonFinite`].
    pub fn right_hand_side(&self, time: f64, y: &[f64], dy: &mut [f64]) -> Result<(), ModelError> {
        let cache = self.cache()?;
        let buffer = self.fill_slots(cache, y, time)?;
        let fluxes = self.eval_fluxes(cache, &buffer)?;

        dy.iter_mut().for_each(|d| *d = 0.0);

        let mut inputs = Vec::new();
        for entry in cache.stoichiometry.iter() {
            let coefficient = match &entry.coefficient {
                Coefficient::Constant(value) => *value,
                Coefficient::Derived {
                    reaction,
                    entry: position,
                    arg_slots,
                } => {
                    let derived = self
                        .reactions
                        .get_index(*reaction)
                        .and_then(|(_, r)| r.stoichiometry.get_index(*position))
                        .and_then(|(_, s)| match s {
                            Stoichiometry::Derived(d) => Some(d),
                            Stoichiometry::Constant(_) => None,
                        })
                        .ok_or_else(|| ModelError::not_found("coefficient", EntityKind::Derived))?;
                    gather(&buffer, arg_slots, &mut inputs);
                    derived.func.call(&derived.args, &inputs)?
                }
            };
            dy[entry.variable] += coefficient * fluxes[entry.flux];
        }

        for (name, value) in self.variables.keys().zip(dy.iter()) {
            if !value.is_finite() {
                return Err(ModelError::NonFinite {
                    name: name.clone(),
                    value: *value,
                });
            }
        }

        Ok(())
    }

    /// Evaluates arguments for every row of a variable time series.
    ///
    /// The evaluation plan is looked up once and reused for all rows. The result keeps
    /// the index of `concs` and has one column per parameter, variable, `time`, derived
    /// value and, if requested, readout. Non-finite values are kept as they are.
    pub fn get_args_time_course(
        &self,
        concs: &Frame,
        include_readouts: bool,
    ) -> Result<Frame, ModelError> {
        let cache = self.cache()?;
        let positions = self
            .variables
            .keys()
            .map(|name| {
                concs
                    .column_index(name)
                    .ok_or_else(|| ModelError::not_found(name.clone(), EntityKind::Variable))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let times = concs.index().as_time().map(<[f64]>::to_vec);
        let mut columns: Vec<String> = cache.slots.keys().cloned().collect();
        if include_readouts {
            columns.extend(self.readouts.keys().cloned());
        }

        let mut data = Array2::zeros((concs.nrows(), columns.len()));
        let mut state = vec![0.0; positions.len()];

        for (i, row) in concs.data().rows().into_iter().enumerate() {
            for (s, p) in state.iter_mut().zip(positions.iter()) {
                *s = row[*p];
            }
            let time = times.as_ref().map_or(0.0, |t| t[i]);
            let mut values = self.fill_slots(cache, &state, time)?;
            if include_readouts {
                values.extend(self.eval_readouts(cache, &values)?);
            }
            for (j, value) in values.into_iter().enumerate() {
                data[[i, j]] = value;
            }
        }

        Ok(Frame::new(concs.index().clone(), columns, data)?)
    }

    /// Evaluates fluxes for every row of an argument table produced by
    /// [`Model::get_args_time_course`].
    pub fn get_fluxes_time_course(&self, args: &Frame) -> Result<Frame, ModelError> {
        let cache = self.cache()?;
        let positions = cache
            .slots
            .keys()
            .map(|name| {
                args.column_index(name)
                    .ok_or_else(|| ModelError::not_found(name.clone(), EntityKind::Name))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let columns = self.get_flux_names();
        let mut data = Array2::zeros((args.nrows(), columns.len()));
        let mut buffer = vec![0.0; positions.len()];

        for (i, row) in args.data().rows().into_iter().enumerate() {
            for (b, p) in buffer.iter_mut().zip(positions.iter()) {
                *b = row[*p];
            }
            for (j, value) in self.eval_fluxes(cache, &buffer)?.into_iter().enumerate() {
                data[[i, j]] = value;
            }
        }

        Ok(Frame::new(args.index().clone(), columns, data)?)
    }

    fn state_from_map(&self, concs: &IndexMap<String, f64>) -> Result<Vec<f64>, ModelError> {
        self.variables
            .keys()
            .map(|name| {
                concs
                    .get(name)
                    .copied()
                    .ok_or_else(|| ModelError::not_found(name.clone(), EntityKind::Variable))
            })
            .collect()
    }

    /// Writes parameters, state and time into a fresh buffer and evaluates all
    /// derived values in order.
    pub(crate) fn fill_slots(
        &self,
        cache: &ModelCache,
        state: &[f64],
        time: f64,
    ) -> Result<Vec<f64>, ModelError> {
        if state.len() != self.variables.len() {
            return Err(ModelError::ArityMismatch {
                name: "state vector".to_string(),
                expected: self.variables.len(),
                actual: state.len(),
            });
        }

        let mut buffer = Vec::with_capacity(cache.slots.len());
        buffer.extend(self.parameters.values().copied());
        buffer.extend_from_slice(state);
        buffer.push(time);
        buffer.resize(cache.slots.len(), f64::NAN);

        let mut inputs = Vec::new();
        for compiled in cache.derived.iter() {
            let (_, derived) = self
                .derived
                .get_index(compiled.model_index)
                .ok_or_else(|| ModelError::not_found("derived", EntityKind::Derived))?;
            gather(&buffer, &compiled.arg_slots, &mut inputs);
            buffer[compiled.slot] = derived.func.call(&derived.args, &inputs)?;
        }

        Ok(buffer)
    }

    pub(crate) fn eval_fluxes(
        &self,
        cache: &ModelCache,
        buffer: &[f64],
    ) -> Result<Vec<f64>, ModelError> {
        let mut fluxes = Vec::with_capacity(cache.reactions.len());
        let mut inputs = Vec::new();

        for (reaction, arg_slots) in self.reactions.values().zip(cache.reactions.iter()) {
            gather(buffer, arg_slots, &mut inputs);
            fluxes.push(reaction.func.call(&reaction.args, &inputs)?);
        }

        for (surrogate, arg_slots) in self.surrogates.values().zip(cache.surrogates.iter()) {
            gather(buffer, arg_slots, &mut inputs);
            fluxes.extend(surrogate.predict(&inputs)?);
        }

        Ok(fluxes)
    }

    fn eval_readouts(&self, cache: &ModelCache, buffer: &[f64]) -> Result<Vec<f64>, ModelError> {
        let mut inputs = Vec::new();
        self.readouts
            .values()
            .zip(cache.readouts.iter())
            .map(|(readout, arg_slots)| {
                gather(buffer, arg_slots, &mut inputs);
                readout.func.call(&readout.args, &inputs)
            })
            .collect()
    }

    /// Full concentrations (variables, derived variables, readouts) for one state.
    pub fn get_full_concs(
        &self,
        concs: &IndexMap<String, f64>,
        time: f64,
    ) -> Result<IndexMap<String, f64>, ModelError> {
        let args = self.get_args(concs, time, true)?;
        self.get_full_conc_names()?
            .into_iter()
            .map(|name| {
                let value = args
                    .get(&name)
                    .copied()
                    .ok_or_else(|| ModelError::not_found(name.clone(), EntityKind::Name))?;
                Ok((name, value))
            })
            .collect()
    }
}

fn gather(buffer: &[f64], slots: &[usize], inputs: &mut Vec<f64>) {
    inputs.clear();
    inputs.extend(slots.iter().map(|s| buffer[*s]));
}
