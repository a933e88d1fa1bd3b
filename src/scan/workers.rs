//! Workers that turn one model into one scan result.
//!
//! Scans call a worker once per parameter row, on a copy of the model that already
//! carries the row's parameter values. Each worker kind is a trait with a single
//! method, so custom simulation strategies can be plugged into the scan functions.
//! [`IntegratorWorker`] implements all three with a [`Simulator`].
//!
//! Workers return `Ok` with a NaN-filled result when the simulation fails
//! numerically or does not converge. Errors are reserved for configuration problems.

use std::fmt::Debug;

use crate::{
    model::registry::Model,
    simulation::{
        error::SimulationError,
        init_cond::InitialConditions,
        integrator::{output_grid, Integrator, PeroxideIntegrator},
        protocol::Protocol,
        simulator::Simulator,
    },
    utils::unwrap,
};

use super::results::{result_names, TimeCourse, TimePoint};

pub trait SteadyStateWorker: Debug + Send + Sync {
    fn steady_state(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
        rel_norm: bool,
    ) -> Result<TimePoint, SimulationError>;
}

pub trait TimeCourseWorker: Debug + Send + Sync {
    fn time_course(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
        time_points: &[f64],
    ) -> Result<TimeCourse, SimulationError>;
}

pub trait ProtocolWorker: Debug + Send + Sync {
    fn protocol_time_course(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
        protocol: &Protocol,
        time_points_per_step: usize,
    ) -> Result<TimeCourse, SimulationError>;
}

/// Time points produced by a protocol run with `time_points_per_step` steps per
/// protocol step, starting at zero.
pub fn protocol_time_points(protocol: &Protocol, time_points_per_step: usize) -> Vec<f64> {
    let mut time = vec![0.0];
    let mut t_start = 0.0;
    for t_end in protocol.t_ends() {
        let dt = (t_end - t_start) / time_points_per_step as f64;
        time.extend((1..=time_points_per_step).map(|i| t_start + i as f64 * dt));
        t_start = t_end;
    }
    time
}

/// Simulates each task with a fresh [`Simulator`] driving a copy of `integrator`.
#[derive(Debug, Clone, Default)]
pub struct IntegratorWorker<I = PeroxideIntegrator> {
    integrator: I,
}

impl<I> IntegratorWorker<I>
where
    I: Integrator + Clone + Debug + Sync,
{
    pub fn new(integrator: I) -> Self {
        Self { integrator }
    }

    fn simulator(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
    ) -> Result<Simulator<I>, SimulationError> {
        Simulator::with_integrator(model, y0, self.integrator.clone())
    }

    fn run_steady_state(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
        rel_norm: bool,
    ) -> Result<Option<TimePoint>, SimulationError> {
        let mut simulator = self.simulator(model, y0)?;
        simulator
            .simulate_to_steady_state()
            .rel_norm(rel_norm)
            .call()?;
        match simulator.get_full_concs_and_fluxes(true)? {
            Some((concs, fluxes)) => {
                let point = TimePoint::from_last_rows(&concs, &fluxes);
                Ok(Some(unwrap(point, "steady-state row")?))
            }
            None => Ok(None),
        }
    }

    fn run_time_course(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
        time_points: &[f64],
    ) -> Result<Option<TimeCourse>, SimulationError> {
        let mut simulator = self.simulator(model, y0)?;
        simulator.simulate_time_course(time_points.to_vec())?;
        Ok(simulator
            .get_full_concs_and_fluxes(true)?
            .map(|(concs, fluxes)| TimeCourse { concs, fluxes }))
    }

    fn run_protocol(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
        protocol: &Protocol,
        time_points_per_step: usize,
        expected_rows: usize,
    ) -> Result<Option<TimeCourse>, SimulationError> {
        let mut simulator = self.simulator(model, y0)?;
        simulator.simulate_over_protocol(protocol, time_points_per_step)?;
        Ok(simulator
            .get_full_concs_and_fluxes(true)?
            // A protocol that stopped early would misalign the stacked runs
            .filter(|(concs, _)| concs.nrows() == expected_rows)
            .map(|(concs, fluxes)| TimeCourse { concs, fluxes }))
    }
}

/// Turns numerical failures into `None` so callers can substitute a NaN result.
fn recover<T>(result: Result<Option<T>, SimulationError>) -> Result<Option<T>, SimulationError> {
    match result {
        Err(e) if e.is_numerical() => {
            log::warn!("Worker failed numerically: {e}");
            Ok(None)
        }
        other => other,
    }
}

impl<I> SteadyStateWorker for IntegratorWorker<I>
where
    I: Integrator + Clone + Debug + Sync,
{
    fn steady_state(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
        rel_norm: bool,
    ) -> Result<TimePoint, SimulationError> {
        let (conc_names, flux_names) = result_names(&model)?;
        let result = recover(self.run_steady_state(model, y0, rel_norm))?;
        Ok(result.unwrap_or_else(|| TimePoint::nan(&conc_names, &flux_names)))
    }
}

impl<I> TimeCourseWorker for IntegratorWorker<I>
where
    I: Integrator + Clone + Debug + Sync,
{
    fn time_course(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
        time_points: &[f64],
    ) -> Result<TimeCourse, SimulationError> {
        let (conc_names, flux_names) = result_names(&model)?;
        let grid = output_grid(time_points, 0.0)?;
        let result = recover(self.run_time_course(model, y0, time_points))?;
        Ok(result.unwrap_or_else(|| TimeCourse::nan(&grid, &conc_names, &flux_names)))
    }
}

impl<I> ProtocolWorker for IntegratorWorker<I>
where
    I: Integrator + Clone + Debug + Sync,
{
    fn protocol_time_course(
        &self,
        model: Model,
        y0: Option<&InitialConditions>,
        protocol: &Protocol,
        time_points_per_step: usize,
    ) -> Result<TimeCourse, SimulationError> {
        let (conc_names, flux_names) = result_names(&model)?;
        let time = protocol_time_points(protocol, time_points_per_step);
        let result = recover(self.run_protocol(
            model,
            y0,
            protocol,
            time_points_per_step,
            time.len(),
        ))?;
        Ok(result.unwrap_or_else(|| TimeCourse::nan(&time, &conc_names, &flux_names)))
    }
}
