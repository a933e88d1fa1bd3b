//! Parameter scans.
//!
//! Every scan runs one worker per row of a [`ParameterTable`] on a copy of the model
//! updated with that row, through [`try_parallelise`]. Results are keyed by row number, so
//! a cache directory should not be shared between different parameter tables.
//!
//! Configuration is checked once before any task is dispatched. A row that fails
//! numerically inside its task is logged and reported as NaN, keeping the shape of
//! the result tables intact. Any other failure of a row aborts the scan.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    frame::{Frame, FrameError, Index},
    model::{
        error::{EntityKind, ModelError},
        registry::Model,
    },
    parallel::{try_parallelise, ParallelSettings},
    parameters::ParameterTable,
    simulation::{
        error::SimulationError,
        init_cond::{resolve_initial_conditions, InitialConditions},
        integrator::{output_grid, PeroxideIntegrator},
        protocol::Protocol,
    },
};

use super::{
    error::ScanError,
    results::{
        result_names, ProtocolByPars, SteadyStates, TimeCourse, TimeCourseByPars, TimePoint,
    },
    workers::{
        protocol_time_points, IntegratorWorker, ProtocolWorker, SteadyStateWorker,
        TimeCourseWorker,
    },
};

/// A copy of `model` with `parameters` applied.
pub(crate) fn with_parameters(
    model: &Model,
    parameters: &IndexMap<String, f64>,
) -> Result<Model, ModelError> {
    let mut model = model.clone();
    model.update_parameters(parameters.iter().map(|(k, v)| (k.as_str(), *v)))?;
    Ok(model)
}

/// Checks everything a task could only fail on for configuration reasons.
pub(crate) fn validate(
    model: &Model,
    parameters: &ParameterTable,
    y0: Option<&InitialConditions>,
) -> Result<(), ScanError> {
    if parameters.is_empty() {
        return Err(ScanError::EmptyParameters);
    }
    if let Some(name) = parameters
        .columns()
        .iter()
        .find(|c| !model.get_parameters().contains_key(c.as_str()))
    {
        return Err(ModelError::not_found(name.as_str(), EntityKind::Parameter).into());
    }

    resolve_initial_conditions(model, y0)?;
    model.get_full_conc_names()?;
    model.get_args(model.get_variables(), 0.0, true)?;
    Ok(())
}

/// Substitutes `fallback` for a row that failed numerically.
///
/// Every other failure is passed on and aborts the scan.
pub(crate) fn nan_on_numerical<T, E>(
    result: Result<T, E>,
    row: impl std::fmt::Debug,
    fallback: impl FnOnce() -> T,
) -> Result<T, ScanError>
where
    E: Into<ScanError>,
{
    match result.map_err(Into::into) {
        Err(e) if e.is_numerical() => {
            log::error!("Row {row:?} failed: {e}");
            Ok(fallback())
        }
        other => other,
    }
}

/// Stacks per-row frames under a (row, time) index.
pub(crate) fn stack(parts: Vec<(usize, Frame)>, columns: &[String]) -> Result<Frame, FrameError> {
    if parts.is_empty() {
        return Ok(Frame::nan(
            Index::Nested {
                outer: Vec::new(),
                inner: Box::new(Index::Time(Vec::new())),
            },
            columns.to_vec(),
        ));
    }
    Frame::nested(parts)
}

pub(crate) fn default_steady_state_worker() -> Arc<dyn SteadyStateWorker> {
    Arc::new(IntegratorWorker::<PeroxideIntegrator>::default())
}

pub(crate) fn default_time_course_worker() -> Arc<dyn TimeCourseWorker> {
    Arc::new(IntegratorWorker::<PeroxideIntegrator>::default())
}

pub(crate) fn default_protocol_worker() -> Arc<dyn ProtocolWorker> {
    Arc::new(IntegratorWorker::<PeroxideIntegrator>::default())
}

/// Steady states for every row of `parameters`.
///
/// The result is indexed by the parameter values: plain values for a single-column
/// table, value tuples otherwise. Rows that did not converge are NaN.
///
/// # Examples
///
/// ```ignore
/// let res = scan::steady_state()
///     .model(&model)
///     .parameters(&ParameterTable::from_columns(IndexMap::from([(
///         "k1".to_string(),
///         vec![1.0, 1.5, 2.0],
///     )]))?)
///     .call()?;
/// println!("{:?}", res.concs);
/// ```
#[bon::builder]
pub fn steady_state(
    model: &Model,
    parameters: &ParameterTable,
    y0: Option<&InitialConditions>,
    #[builder(default)] rel_norm: bool,
    #[builder(default)] settings: ParallelSettings,
    #[builder(default = default_steady_state_worker())] worker: Arc<dyn SteadyStateWorker>,
) -> Result<SteadyStates, ScanError> {
    let results = steady_state_rows(model, parameters, y0, rel_norm, &settings, worker)?;

    let positions: Vec<usize> = results.keys().copied().collect();
    let index = parameters.index().take(&positions);
    let (concs, fluxes) = time_points_to_frames(model, index, results)?;

    Ok(SteadyStates {
        concs,
        fluxes,
        parameters: parameters.clone(),
    })
}

/// Steady states keyed by row number. Rows whose task timed out are missing.
pub(crate) fn steady_state_rows(
    model: &Model,
    parameters: &ParameterTable,
    y0: Option<&InitialConditions>,
    rel_norm: bool,
    settings: &ParallelSettings,
    worker: Arc<dyn SteadyStateWorker>,
) -> Result<IndexMap<usize, TimePoint>, ScanError> {
    validate(model, parameters, y0)?;
    let (conc_names, flux_names) = result_names(model)?;

    let task = {
        let model = model.clone();
        let y0 = y0.cloned();
        move |row: IndexMap<String, f64>| -> Result<TimePoint, ScanError> {
            let result = with_parameters(&model, &row)
                .map_err(Into::into)
                .and_then(|model| worker.steady_state(model, y0.as_ref(), rel_norm));
            nan_on_numerical(result, &row, || TimePoint::nan(&conc_names, &flux_names))
        }
    };

    try_parallelise(task, parameters.rows(), settings)
}

/// One row per time point, under the given index.
pub(crate) fn time_points_to_frames(
    model: &Model,
    index: Index,
    results: IndexMap<usize, TimePoint>,
) -> Result<(Frame, Frame), ScanError> {
    let (conc_names, flux_names) = result_names(model)?;
    let (concs, fluxes): (Vec<_>, Vec<_>) = results
        .into_values()
        .map(|point| (point.concs, point.fluxes))
        .unzip();

    Ok((
        Frame::from_row_maps(index.clone(), conc_names, &concs)?,
        Frame::from_row_maps(index, flux_names, &fluxes)?,
    ))
}

/// Time courses for every row of `parameters`, stacked under a (row, time) index.
///
/// `time_points` must be finite and non-decreasing. Every run also reports `t = 0`
/// when the first point is later, so all rows share one time grid.
#[bon::builder]
pub fn time_course(
    model: &Model,
    parameters: &ParameterTable,
    time_points: &[f64],
    y0: Option<&InitialConditions>,
    #[builder(default)] settings: ParallelSettings,
    #[builder(default = default_time_course_worker())] worker: Arc<dyn TimeCourseWorker>,
) -> Result<TimeCourseByPars, ScanError> {
    validate(model, parameters, y0)?;
    let grid = output_grid(time_points, 0.0)?;
    let (conc_names, flux_names) = result_names(model)?;

    let task = {
        let model = model.clone();
        let y0 = y0.cloned();
        let time_points = time_points.to_vec();
        let (conc_names, flux_names) = (conc_names.clone(), flux_names.clone());
        move |row: IndexMap<String, f64>| -> Result<TimeCourse, ScanError> {
            let result = with_parameters(&model, &row)
                .map_err(Into::into)
                .and_then(|model| worker.time_course(model, y0.as_ref(), &time_points));
            nan_on_numerical(result, &row, || {
                TimeCourse::nan(&grid, &conc_names, &flux_names)
            })
        }
    };

    let results = try_parallelise(task, parameters.rows(), &settings)?;
    let (concs, fluxes) = split_courses(results);

    Ok(TimeCourseByPars {
        concs: stack(concs, &conc_names)?,
        fluxes: stack(fluxes, &flux_names)?,
        parameters: parameters.clone(),
    })
}

/// Protocol time courses for every row of `parameters`, stacked under a (row, time)
/// index.
///
/// The protocol's parameter changes are applied on top of the row's values.
#[bon::builder]
pub fn time_course_over_protocol(
    model: &Model,
    parameters: &ParameterTable,
    protocol: &Protocol,
    #[builder(default = 10)] time_points_per_step: usize,
    y0: Option<&InitialConditions>,
    #[builder(default)] settings: ParallelSettings,
    #[builder(default = default_protocol_worker())] worker: Arc<dyn ProtocolWorker>,
) -> Result<ProtocolByPars, ScanError> {
    validate(model, parameters, y0)?;
    if time_points_per_step == 0 {
        return Err(SimulationError::InvalidTimeSpec(
            "time points per step must be positive".to_string(),
        )
        .into());
    }
    let (conc_names, flux_names) = result_names(model)?;

    let task = {
        let model = model.clone();
        let y0 = y0.cloned();
        let protocol = protocol.clone();
        let time = protocol_time_points(&protocol, time_points_per_step);
        let (conc_names, flux_names) = (conc_names.clone(), flux_names.clone());
        move |row: IndexMap<String, f64>| -> Result<TimeCourse, ScanError> {
            let result = with_parameters(&model, &row)
                .map_err(Into::into)
                .and_then(|model| {
                    worker.protocol_time_course(model, y0.as_ref(), &protocol, time_points_per_step)
                });
            nan_on_numerical(result, &row, || {
                TimeCourse::nan(&time, &conc_names, &flux_names)
            })
        }
    };

    let results = try_parallelise(task, parameters.rows(), &settings)?;
    let (concs, fluxes) = split_courses(results);

    Ok(ProtocolByPars {
        concs: stack(concs, &conc_names)?,
        fluxes: stack(fluxes, &flux_names)?,
        parameters: parameters.clone(),
        protocol: protocol.clone(),
    })
}

type Parts = Vec<(usize, Frame)>;

fn split_courses(results: IndexMap<usize, TimeCourse>) -> (Parts, Parts) {
    results
        .into_iter()
        .map(|(key, course)| ((key, course.concs), (key, course.fluxes)))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::entities::Reaction, ratefunctions, simulation::protocol::make_protocol,
        simulation::protocol::ProtocolStep,
    };
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

    fn table(columns: &[(&str, Vec<f64>)]) -> ParameterTable {
        ParameterTable::from_columns(
            columns
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_parameter_is_rejected() {
        let result = steady_state()
            .model(&model())
            .parameters(&table(&[("k_missing", vec![1.0])]))
            .settings(ParallelSettings::sequential())
            .call();

        assert!(matches!(
            result,
            Err(ScanError::Model(ModelError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_steady_state_values() {
        let res = steady_state()
            .model(&model())
            .parameters(&table(&[("k_in", vec![1.0, 2.0, 3.0])]))
            .settings(ParallelSettings::sequential())
            .call()
            .unwrap();

        for (i, expected) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            assert_relative_eq!(res.concs.get(i, "x").unwrap(), expected, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_time_course_nested_index() {
        let res = time_course()
            .model(&model())
            .parameters(&table(&[("k_in", vec![1.0, 2.0])]))
            .time_points(&[0.0, 0.5, 1.0])
            .settings(ParallelSettings::sequential())
            .call()
            .unwrap();

        match res.concs.index() {
            Index::Nested { outer, inner } => {
                assert_eq!(outer, &vec![0, 0, 0, 1, 1, 1]);
                assert_eq!(
                    inner.as_time().unwrap(),
                    &[0.0, 0.5, 1.0, 0.0, 0.5, 1.0][..]
                );
            }
            other => panic!("unexpected index {other:?}"),
        }
        assert_eq!(res.fluxes.columns(), &["v_in", "v_out"]);
    }

    #[test]
    fn test_protocol_scan() {
        let protocol = make_protocol([
            ProtocolStep::new(1.0, [("k_in", 0.0)]),
            ProtocolStep::new(1.0, [("k_in", 5.0)]),
        ])
        .unwrap();

        let res = time_course_over_protocol()
            .model(&model())
            .parameters(&table(&[("k_out", vec![1.0, 2.0])]))
            .protocol(&protocol)
            .time_points_per_step(5)
            .settings(ParallelSettings::sequential())
            .call()
            .unwrap();

        assert_eq!(res.concs.nrows(), 2 * 11);
        let v_in = res.get_by_name("v_in").unwrap();
        assert_relative_eq!(v_in.get(10, "1").unwrap(), 5.0);
    }

    #[test]
    fn test_malformed_time_points_abort_the_scan() {
        for time_points in [&[][..], &[2.0, 1.0][..], &[0.0, f64::NAN][..]] {
            let result = time_course()
                .model(&model())
                .parameters(&table(&[("k_in", vec![1.0, 2.0])]))
                .time_points(time_points)
                .settings(ParallelSettings::sequential())
                .call();

            assert!(
                matches!(
                    result,
                    Err(ScanError::Simulation(SimulationError::InvalidTimeSpec(_)))
                ),
                "{time_points:?} was accepted"
            );
        }
    }

    #[test]
    fn test_time_course_late_start_includes_zero() {
        let res = time_course()
            .model(&model())
            .parameters(&table(&[("k_in", vec![1.0, 2.0])]))
            .time_points(&[1.0, 2.0])
            .settings(ParallelSettings::sequential())
            .call()
            .unwrap();

        assert_eq!(res.concs.nrows(), 6);
        assert_relative_eq!(res.concs.get(3, "x").unwrap(), 0.0);
    }

    #[test]
    fn test_zero_points_per_step_is_rejected() {
        let protocol = make_protocol([ProtocolStep::new(1.0, [("k_in", 0.0)])]).unwrap();

        let result = time_course_over_protocol()
            .model(&model())
            .parameters(&table(&[("k_out", vec![1.0])]))
            .protocol(&protocol)
            .time_points_per_step(0)
            .settings(ParallelSettings::sequential())
            .call();

        assert!(matches!(
            result,
            Err(ScanError::Simulation(SimulationError::InvalidTimeSpec(_)))
        ));
    }
}
