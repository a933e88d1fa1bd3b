//! Metabolic control analysis.
//!
//! Elasticities measure how the fluxes respond to small changes of one variable or
//! parameter at a fixed state. Response coefficients measure how the steady state
//! responds to a parameter change. All coefficients are central finite differences
//! with a relative displacement, normalised by `value / result` unless disabled.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    frame::{Frame, Index},
    model::{
        error::{EntityKind, ModelError},
        registry::Model,
    },
    parallel::{try_parallelise, ParallelSettings},
    scan::{
        error::ScanError,
        results::{result_names, ResponseCoefficients, TimePoint},
        scans::{default_steady_state_worker, nan_on_numerical},
        workers::SteadyStateWorker,
    },
    simulation::{error::SimulationError, init_cond::InitialConditions},
};

/// Default relative displacement of finite differences.
pub const DISPLACEMENT: f64 = 1e-4;

fn flux_vector(
    model: &Model,
    concs: &IndexMap<String, f64>,
    time: f64,
) -> Result<Vec<f64>, ModelError> {
    Ok(model.get_fluxes(concs, time)?.into_values().collect())
}

/// Central difference of two flux vectors, optionally normalised by `old / reference`.
fn coefficient(
    upper: &[f64],
    lower: &[f64],
    reference: &[f64],
    old: f64,
    displacement: f64,
    normalized: bool,
) -> Vec<f64> {
    upper
        .iter()
        .zip(lower)
        .zip(reference)
        .map(|((u, l), r)| {
            let value = (u - l) / (2.0 * displacement * old);
            if normalized {
                value * old / r
            } else {
                value
            }
        })
        .collect()
}

/// Assembles per-name coefficient columns into a frame with one row per flux.
fn flux_by_name_frame(
    model: &Model,
    columns: Vec<(String, Vec<f64>)>,
) -> Result<Frame, ScanError> {
    let flux_names = model.get_flux_names();
    let names: Vec<String> = columns.iter().map(|(n, _)| n.clone()).collect();
    let rows: Vec<Vec<f64>> = (0..flux_names.len())
        .map(|i| columns.iter().map(|(_, c)| c[i]).collect())
        .collect();
    Ok(Frame::from_rows(Index::Labels(flux_names), names, &rows)?)
}

/// Elasticities of all fluxes towards the given variables.
///
/// Rows are fluxes, columns the variables. Not a steady-state quantity: `concs` is
/// used as is.
///
/// # Examples
///
/// ```ignore
/// let elasticities = mca::variable_elasticities()
///     .model(&model)
///     .concs(&IndexMap::from([("x".to_string(), 1.0)]))
///     .variables(&["x"])
///     .call()?;
/// ```
#[bon::builder]
pub fn variable_elasticities(
    model: &Model,
    concs: &IndexMap<String, f64>,
    variables: &[&str],
    #[builder(default)] time: f64,
    #[builder(default = true)] normalized: bool,
    #[builder(default = DISPLACEMENT)] displacement: f64,
) -> Result<Frame, ScanError> {
    let reference = flux_vector(model, concs, time)?;

    let mut columns = Vec::with_capacity(variables.len());
    for variable in variables {
        let old = *concs
            .get(*variable)
            .ok_or_else(|| ModelError::not_found(*variable, EntityKind::Variable))?;

        let mut displaced = concs.clone();
        displaced.insert(variable.to_string(), old * (1.0 + displacement));
        let upper = flux_vector(model, &displaced, time)?;
        displaced.insert(variable.to_string(), old * (1.0 - displacement));
        let lower = flux_vector(model, &displaced, time)?;

        columns.push((
            variable.to_string(),
            coefficient(&upper, &lower, &reference, old, displacement, normalized),
        ));
    }

    flux_by_name_frame(model, columns)
}

/// Elasticities of all fluxes towards the given parameters.
///
/// Rows are fluxes, columns the parameters. The model is left unchanged.
#[bon::builder]
pub fn parameter_elasticities(
    model: &Model,
    concs: &IndexMap<String, f64>,
    parameters: &[&str],
    #[builder(default)] time: f64,
    #[builder(default = true)] normalized: bool,
    #[builder(default = DISPLACEMENT)] displacement: f64,
) -> Result<Frame, ScanError> {
    let reference = flux_vector(model, concs, time)?;
    let mut model = model.clone();

    let mut columns = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        let old = *model
            .get_parameters()
            .get(*parameter)
            .ok_or_else(|| ModelError::not_found(*parameter, EntityKind::Parameter))?;

        model.update_parameter(parameter, old * (1.0 + displacement))?;
        let upper = flux_vector(&model, concs, time)?;
        model.update_parameter(parameter, old * (1.0 - displacement))?;
        let lower = flux_vector(&model, concs, time)?;
        model.update_parameter(parameter, old)?;

        columns.push((
            parameter.to_string(),
            coefficient(&upper, &lower, &reference, old, displacement, normalized),
        ));
    }

    flux_by_name_frame(&model, columns)
}

/// Inputs of one response coefficient task.
#[derive(Debug, Clone)]
struct ResponseTask {
    model: Model,
    y0: Option<InitialConditions>,
    normalized: bool,
    rel_norm: bool,
    displacement: f64,
}

impl ResponseTask {
    fn run(
        &self,
        parameter: &str,
        worker: &dyn SteadyStateWorker,
    ) -> Result<TimePoint, SimulationError> {
        let mut model = self.model.clone();
        let old = *model
            .get_parameters()
            .get(parameter)
            .ok_or_else(|| ModelError::not_found(parameter, EntityKind::Parameter))?;
        let y0 = self.y0.as_ref();

        model.update_parameter(parameter, old * (1.0 + self.displacement))?;
        let upper = worker.steady_state(model.clone(), y0, self.rel_norm)?;
        model.update_parameter(parameter, old * (1.0 - self.displacement))?;
        let lower = worker.steady_state(model.clone(), y0, self.rel_norm)?;
        model.update_parameter(parameter, old)?;

        let norm = if self.normalized {
            Some(worker.steady_state(model, y0, self.rel_norm)?)
        } else {
            None
        };

        let respond = |upper: &IndexMap<String, f64>,
                       lower: &IndexMap<String, f64>,
                       norm: Option<&IndexMap<String, f64>>|
         -> IndexMap<String, f64> {
            upper
                .iter()
                .map(|(name, u)| {
                    let l = lower.get(name).copied().unwrap_or(f64::NAN);
                    let mut value = (u - l) / (2.0 * self.displacement * old);
                    if let Some(norm) = norm {
                        value *= old / norm.get(name).copied().unwrap_or(f64::NAN);
                    }
                    (name.clone(), value)
                })
                .collect()
        };

        Ok(TimePoint {
            concs: respond(&upper.concs, &lower.concs, norm.as_ref().map(|n| &n.concs)),
            fluxes: respond(&upper.fluxes, &lower.fluxes, norm.as_ref().map(|n| &n.fluxes)),
        })
    }
}

/// Steady-state response coefficients of variables and fluxes towards the given
/// parameters.
///
/// Every parameter is one task of [`try_parallelise`]. Rows are the parameters, columns
/// the full concentrations or fluxes. Parameters whose steady states fail numerically
/// yield NaN rows.
#[bon::builder]
pub fn response_coefficients(
    model: &Model,
    parameters: &[&str],
    y0: Option<&InitialConditions>,
    #[builder(default = true)] normalized: bool,
    #[builder(default = DISPLACEMENT)] displacement: f64,
    #[builder(default)] rel_norm: bool,
    #[builder(default)] settings: ParallelSettings,
    #[builder(default = default_steady_state_worker())] worker: Arc<dyn SteadyStateWorker>,
) -> Result<ResponseCoefficients, ScanError> {
    if let Some(name) = parameters
        .iter()
        .find(|p| !model.get_parameters().contains_key(**p))
    {
        return Err(ModelError::not_found(*name, EntityKind::Parameter).into());
    }
    let (conc_names, flux_names) = result_names(model)?;

    let task = {
        let task = ResponseTask {
            model: model.clone(),
            y0: y0.cloned(),
            normalized,
            rel_norm,
            displacement,
        };
        let (conc_names, flux_names) = (conc_names.clone(), flux_names.clone());
        move |parameter: String| -> Result<TimePoint, ScanError> {
            nan_on_numerical(task.run(&parameter, worker.as_ref()), &parameter, || {
                TimePoint::nan(&conc_names, &flux_names)
            })
        }
    };

    let inputs = parameters
        .iter()
        .map(|p| (p.to_string(), p.to_string()))
        .collect();
    let results = try_parallelise(task, inputs, &settings)?;

    let index = Index::Labels(results.keys().cloned().collect());
    let (concs, fluxes): (Vec<_>, Vec<_>) = results
        .into_values()
        .map(|point| (point.concs, point.fluxes))
        .unzip();

    Ok(ResponseCoefficients {
        concs: Frame::from_row_maps(index.clone(), conc_names, &concs)?,
        fluxes: Frame::from_row_maps(index, flux_names, &fluxes)?,
    })
}
