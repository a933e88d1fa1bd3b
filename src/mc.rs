//! Monte Carlo analyses.
//!
//! Every function here repeats an analysis for each row of a table of sampled
//! parameter sets, usually drawn with [`crate::distributions::sample`]. The rows are
//! distributed with [`try_parallelise`]; analyses nested inside a row run sequentially.
//! Results are stacked under a nested index whose outer level is the Monte Carlo row.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    frame::{Frame, Index},
    mca::{self, DISPLACEMENT},
    model::{
        error::{EntityKind, ModelError},
        registry::Model,
    },
    parallel::{try_parallelise, ParallelSettings},
    parameters::ParameterTable,
    scan::{
        self,
        error::ScanError,
        results::{
            result_names, McSteadyStates, ProtocolByPars, ResponseCoefficients,
            ResponseCoefficientsByPars, SteadyStates, TimeCourseByPars,
        },
        scans::{
            default_protocol_worker, default_steady_state_worker, default_time_course_worker,
            nan_on_numerical, stack, steady_state_rows, time_points_to_frames, validate,
            with_parameters,
        },
        workers::{ProtocolWorker, SteadyStateWorker, TimeCourseWorker},
    },
    simulation::{init_cond::InitialConditions, protocol::Protocol},
};

/// Steady state for every Monte Carlo row, indexed by row number.
#[bon::builder]
pub fn steady_state(
    model: &Model,
    mc_parameters: &ParameterTable,
    y0: Option<&InitialConditions>,
    #[builder(default)] rel_norm: bool,
    #[builder(default)] settings: ParallelSettings,
    #[builder(default = default_steady_state_worker())] worker: Arc<dyn SteadyStateWorker>,
) -> Result<SteadyStates, ScanError> {
    let results = steady_state_rows(model, mc_parameters, y0, rel_norm, &settings, worker)?;
    let index = Index::Runs(results.keys().copied().collect());
    let (concs, fluxes) = time_points_to_frames(model, index, results)?;

    Ok(SteadyStates {
        concs,
        fluxes,
        parameters: mc_parameters.clone(),
    })
}

/// Time course for every Monte Carlo row, under a (row, time) index.
#[bon::builder]
pub fn time_course(
    model: &Model,
    mc_parameters: &ParameterTable,
    time_points: &[f64],
    y0: Option<&InitialConditions>,
    #[builder(default)] settings: ParallelSettings,
    #[builder(default = default_time_course_worker())] worker: Arc<dyn TimeCourseWorker>,
) -> Result<TimeCourseByPars, ScanError> {
    scan::time_course()
        .model(model)
        .parameters(mc_parameters)
        .time_points(time_points)
        .maybe_y0(y0)
        .settings(settings)
        .worker(worker)
        .call()
}

/// Protocol time course for every Monte Carlo row, under a (row, time) index.
#[bon::builder]
pub fn time_course_over_protocol(
    model: &Model,
    mc_parameters: &ParameterTable,
    protocol: &Protocol,
    #[builder(default = 10)] time_points_per_step: usize,
    y0: Option<&InitialConditions>,
    #[builder(default)] settings: ParallelSettings,
    #[builder(default = default_protocol_worker())] worker: Arc<dyn ProtocolWorker>,
) -> Result<ProtocolByPars, ScanError> {
    scan::time_course_over_protocol()
        .model(model)
        .parameters(mc_parameters)
        .protocol(protocol)
        .time_points_per_step(time_points_per_step)
        .maybe_y0(y0)
        .settings(settings)
        .worker(worker)
        .call()
}

/// Steady-state scan over `parameters`, repeated for every Monte Carlo row.
///
/// The result is indexed by (Monte Carlo row, scanned values). Scanned values are
/// applied after the Monte Carlo values, so they win where both name a parameter.
#[bon::builder]
pub fn scan_steady_state(
    model: &Model,
    parameters: &ParameterTable,
    mc_parameters: &ParameterTable,
    y0: Option<&InitialConditions>,
    #[builder(default)] rel_norm: bool,
    #[builder(default)] settings: ParallelSettings,
    #[builder(default = default_steady_state_worker())] worker: Arc<dyn SteadyStateWorker>,
) -> Result<McSteadyStates, ScanError> {
    validate(model, mc_parameters, y0)?;
    validate(model, parameters, y0)?;
    let (conc_names, flux_names) = result_names(model)?;

    let task = {
        let model = model.clone();
        let parameters = parameters.clone();
        let y0 = y0.cloned();
        let (conc_names, flux_names) = (conc_names.clone(), flux_names.clone());
        move |row: IndexMap<String, f64>| -> Result<(Frame, Frame), ScanError> {
            let scanned = with_parameters(&model, &row)
                .map_err(ScanError::from)
                .and_then(|model| {
                    let results = steady_state_rows(
                        &model,
                        &parameters,
                        y0.as_ref(),
                        rel_norm,
                        &ParallelSettings::sequential(),
                        worker.clone(),
                    )?;
                    let positions: Vec<usize> = results.keys().copied().collect();
                    time_points_to_frames(&model, parameters.index().take(&positions), results)
                });
            nan_on_numerical(scanned, &row, || {
                (
                    Frame::nan(parameters.index(), conc_names.clone()),
                    Frame::nan(parameters.index(), flux_names.clone()),
                )
            })
        }
    };

    let results = try_parallelise(task, mc_parameters.rows(), &settings)?;
    let (concs, fluxes): (Vec<_>, Vec<_>) = results
        .into_iter()
        .map(|(key, (concs, fluxes))| ((key, concs), (key, fluxes)))
        .unzip();

    Ok(McSteadyStates {
        concs: stack(concs, &conc_names)?,
        fluxes: stack(fluxes, &flux_names)?,
        parameters: parameters.clone(),
        mc_parameters: mc_parameters.clone(),
    })
}

/// Which elasticities [`elasticities_by_row`] computes.
#[derive(Debug, Clone, Copy)]
enum Elasticity {
    Variable,
    Parameter,
}

#[derive(Debug, Clone)]
struct ElasticityTask {
    kind: Elasticity,
    names: Vec<String>,
    concs: IndexMap<String, f64>,
    time: f64,
    normalized: bool,
    displacement: f64,
}

impl ElasticityTask {
    fn run(&self, model: &Model) -> Result<Frame, ScanError> {
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        match self.kind {
            Elasticity::Variable => mca::variable_elasticities()
                .model(model)
                .concs(&self.concs)
                .variables(&names)
                .time(self.time)
                .normalized(self.normalized)
                .displacement(self.displacement)
                .call(),
            Elasticity::Parameter => mca::parameter_elasticities()
                .model(model)
                .concs(&self.concs)
                .parameters(&names)
                .time(self.time)
                .normalized(self.normalized)
                .displacement(self.displacement)
                .call(),
        }
    }
}

fn elasticities_by_row(
    model: &Model,
    mc_parameters: &ParameterTable,
    task: ElasticityTask,
    settings: &ParallelSettings,
) -> Result<Frame, ScanError> {
    validate(model, mc_parameters, None)?;
    // Surfaces unknown names once, and fixes the shape of failed rows
    let template = task.run(model)?.map(|_| f64::NAN);

    let columns = template.columns().to_vec();
    let job = {
        let model = model.clone();
        move |row: IndexMap<String, f64>| -> Result<Frame, ScanError> {
            let result = with_parameters(&model, &row)
                .map_err(ScanError::from)
                .and_then(|model| task.run(&model));
            nan_on_numerical(result, &row, || template.clone())
        }
    };

    let results = try_parallelise(job, mc_parameters.rows(), settings)?;
    Ok(stack(results.into_iter().collect(), &columns)?)
}

/// Variable elasticities for every Monte Carlo row, under a (row, flux) index.
#[bon::builder]
pub fn variable_elasticities(
    model: &Model,
    concs: &IndexMap<String, f64>,
    variables: &[&str],
    mc_parameters: &ParameterTable,
    #[builder(default)] time: f64,
    #[builder(default = true)] normalized: bool,
    #[builder(default = DISPLACEMENT)] displacement: f64,
    #[builder(default)] settings: ParallelSettings,
) -> Result<Frame, ScanError> {
    let task = ElasticityTask {
        kind: Elasticity::Variable,
        names: variables.iter().map(|v| v.to_string()).collect(),
        concs: concs.clone(),
        time,
        normalized,
        displacement,
    };
    elasticities_by_row(model, mc_parameters, task, &settings)
}

/// Parameter elasticities for every Monte Carlo row, under a (row, flux) index.
#[bon::builder]
pub fn parameter_elasticities(
    model: &Model,
    concs: &IndexMap<String, f64>,
    parameters: &[&str],
    mc_parameters: &ParameterTable,
    #[builder(default)] time: f64,
    #[builder(default = true)] normalized: bool,
    #[builder(default = DISPLACEMENT)] displacement: f64,
    #[builder(default)] settings: ParallelSettings,
) -> Result<Frame, ScanError> {
    let task = ElasticityTask {
        kind: Elasticity::Parameter,
        names: parameters.iter().map(|p| p.to_string()).collect(),
        concs: concs.clone(),
        time,
        normalized,
        displacement,
    };
    elasticities_by_row(model, mc_parameters, task, &settings)
}

/// Response coefficients for every Monte Carlo row, under a (row, parameter) index.
#[bon::builder]
pub fn response_coefficients(
    model: &Model,
    parameters: &[&str],
    mc_parameters: &ParameterTable,
    y0: Option<&InitialConditions>,
    #[builder(default = true)] normalized: bool,
    #[builder(default = DISPLACEMENT)] displacement: f64,
    #[builder(default)] rel_norm: bool,
    #[builder(default)] settings: ParallelSettings,
    #[builder(default = default_steady_state_worker())] worker: Arc<dyn SteadyStateWorker>,
) -> Result<ResponseCoefficientsByPars, ScanError> {
    validate(model, mc_parameters, y0)?;
    if let Some(name) = parameters
        .iter()
        .find(|p| !model.get_parameters().contains_key(**p))
    {
        return Err(ModelError::not_found(*name, EntityKind::Parameter).into());
    }
    let (conc_names, flux_names) = result_names(model)?;

    let task = {
        let model = model.clone();
        let parameters: Vec<String> = parameters.iter().map(|p| p.to_string()).collect();
        let y0 = y0.cloned();
        let (conc_names, flux_names) = (conc_names.clone(), flux_names.clone());
        move |row: IndexMap<String, f64>| -> Result<ResponseCoefficients, ScanError> {
            let names: Vec<&str> = parameters.iter().map(String::as_str).collect();
            let result = with_parameters(&model, &row)
                .map_err(ScanError::from)
                .and_then(|model| {
                    mca::response_coefficients()
                        .model(&model)
                        .parameters(&names)
                        .maybe_y0(y0.as_ref())
                        .normalized(normalized)
                        .displacement(displacement)
                        .rel_norm(rel_norm)
                        .settings(ParallelSettings::sequential())
                        .worker(worker.clone())
                        .call()
                });
            nan_on_numerical(result, &row, || {
                let index = Index::Labels(parameters.clone());
                ResponseCoefficients {
                    concs: Frame::nan(index.clone(), conc_names.clone()),
                    fluxes: Frame::nan(index, flux_names.clone()),
                }
            })
        }
    };

    let results = try_parallelise(task, mc_parameters.rows(), &settings)?;
    let (concs, fluxes): (Vec<_>, Vec<_>) = results
        .into_iter()
        .map(|(key, rc)| ((key, rc.concs), (key, rc.fluxes)))
        .unzip();

    Ok(ResponseCoefficientsByPars {
        concs: stack(concs, &conc_names)?,
        fluxes: stack(fluxes, &flux_names)?,
        parameters: mc_parameters.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::entities::Reaction, ratefunctions};
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        let mut model = Model::new();
        model
            .add_parameters([("k_in", 1.0), ("k_out", 1.0)])
            .unwrap()
            .add_variable("x", 0.0)
            .unwrap()
            .add_reaction(
                "v_in",
                Reaction::new(ratefunctions::constant, &["k_in"], [("x", 1.0)]),
            )
            .unwrap()
            .add_reaction(
                "v_out",
                Reaction::new(ratefunctions::mass_action_1, &["x", "k_out"], [("x", -1.0)]),
            )
            .unwrap();
        model
    }

    fn mc_parameters() -> ParameterTable {
        ParameterTable::from_columns(IndexMap::from([(
            "k_out".to_string(),
            vec![1.0, 2.0, 4.0],
        )]))
        .unwrap()
    }

    #[test]
    fn test_steady_state_indexed_by_run() {
        let res = steady_state()
            .model(&model())
            .mc_parameters(&mc_parameters())
            .settings(ParallelSettings::sequential())
            .call()
            .unwrap();

        assert_eq!(res.concs.index(), &Index::Runs(vec![0, 1, 2]));
        assert_relative_eq!(res.concs.get(2, "x").unwrap(), 0.25, epsilon = 1e-4);
    }

    #[test]
    fn test_scan_steady_state_nested_index() {
        let parameters = ParameterTable::from_columns(IndexMap::from([(
            "k_in".to_string(),
            vec![1.0, 2.0],
        )]))
        .unwrap();

        let res = scan_steady_state()
            .model(&model())
            .parameters(&parameters)
            .mc_parameters(&mc_parameters())
            .settings(ParallelSettings::sequential())
            .call()
            .unwrap();

        match res.concs.index() {
            Index::Nested { outer, inner } => {
                assert_eq!(outer, &vec![0, 0, 1, 1, 2, 2]);
                assert!(matches!(**inner, Index::Values { .. }));
            }
            other => panic!("unexpected index {other:?}"),
        }
        // k_in = 2, k_out = 2
        assert_relative_eq!(res.concs.get(3, "x").unwrap(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_parameter_elasticities_per_run() {
        let concs = IndexMap::from([("x".to_string(), 2.0)]);
        let res = parameter_elasticities()
            .model(&model())
            .concs(&concs)
            .parameters(&["k_out"])
            .mc_parameters(&mc_parameters())
            .normalized(false)
            .settings(ParallelSettings::sequential())
            .call()
            .unwrap();

        assert_eq!(res.nrows(), 3 * 2);
        // d(k_out * x) / d(k_out) = x for every run
        for run in 0..3 {
            assert_relative_eq!(res.get(run * 2 + 1, "k_out").unwrap(), 2.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_unknown_variable_fails_before_dispatch() {
        let concs = IndexMap::from([("x".to_string(), 2.0)]);
        let res = variable_elasticities()
            .model(&model())
            .concs(&concs)
            .variables(&["missing"])
            .mc_parameters(&mc_parameters())
            .settings(ParallelSettings::sequential())
            .call();

        assert!(res.is_err());
    }
}
