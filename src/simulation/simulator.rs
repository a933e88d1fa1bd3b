//! Simulator Module
//!
//! A [`Simulator`] owns one model and one integrator and accumulates the results of
//! successive integration segments.
//!
//! # State
//!
//! A fresh simulator has no results and every accessor returns `None`. Each successful
//! call to [`Simulator::simulate`], [`Simulator::simulate_to_steady_state`] or
//! [`Simulator::simulate_over_protocol`] appends one or more segments. Results are only
//! dropped by [`Simulator::clear_results`].
//!
//! # Failures
//!
//! Numerical failures during integration (non-finite derivatives, failed steps) and
//! non-convergence to a steady state record no new segment and return `Ok`. Callers
//! detect them through the accessors. Configuration errors are returned as errors.

use std::sync::OnceLock;

use indexmap::IndexMap;

use crate::{
    frame::{Frame, Index},
    model::registry::Model,
};

use super::{
    error::SimulationError,
    init_cond::{resolve_initial_conditions, InitialConditions},
    integrator::{Integrator, PeroxideIntegrator, TimeSpec},
    protocol::Protocol,
    result::Normalise,
};

/// Parameter values in effect while a segment was simulated.
pub type SimulationParameters = IndexMap<String, f64>;

#[derive(Debug)]
pub struct Simulator<I: Integrator = PeroxideIntegrator> {
    model: Model,
    y0: Vec<f64>,
    integrator: I,
    concs: Option<Vec<Frame>>,
    simulation_parameters: Option<Vec<SimulationParameters>>,
    /// Argument tables per segment, including readouts
    args: OnceLock<Vec<Frame>>,
}

impl Simulator<PeroxideIntegrator> {
    /// Creates a simulator with the default Runge-Kutta integrator.
    ///
    /// # Arguments
    ///
    /// * `model` - The model to simulate
    /// * `y0` - Optional initial conditions; missing variables use the model values
    pub fn new(model: Model, y0: Option<&InitialConditions>) -> Result<Self, SimulationError> {
        Self::with_integrator(model, y0, PeroxideIntegrator::default())
    }
}

#[bon::bon]
impl<I: Integrator> Simulator<I> {
    /// Creates a simulator with a custom integrator.
    ///
    /// The model is evaluated once at the initial conditions so that configuration
    /// errors such as unknown names or cycles surface here and not mid-integration.
    pub fn with_integrator(
        model: Model,
        y0: Option<&InitialConditions>,
        mut integrator: I,
    ) -> Result<Self, SimulationError> {
        let y0 = resolve_initial_conditions(&model, y0)?;

        let state: IndexMap<String, f64> = model
            .get_variable_names()
            .into_iter()
            .zip(y0.iter().copied())
            .collect();
        model.get_full_concs(&state, 0.0)?;
        model.get_fluxes(&state, 0.0)?;
        if let Err(e) = model.get_right_hand_side(&state, 0.0) {
            if !e.is_numerical() {
                return Err(e.into());
            }
            log::warn!("Right hand side is not finite at the initial conditions: {e}");
        }

        integrator.set_initial_conditions(y0.clone());

        Ok(Self {
            model,
            y0,
            integrator,
            concs: None,
            simulation_parameters: None,
            args: OnceLock::new(),
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Initial state vector in variable order.
    pub fn y0(&self) -> &[f64] {
        &self.y0
    }

    /// Simulates from the current cursor.
    ///
    /// Exactly one timing specification is used. Explicit time points win over a step
    /// count, a step count needs an end time, and an end time alone yields the
    /// integrator's default number of points. The first row of a continued simulation
    /// repeats the last stored row and is skipped.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// sim.simulate().t_end(10.0).steps(100).call()?;
    /// sim.simulate().time_points(vec![0.0, 1.0, 5.0]).call()?;
    /// ```
    #[builder]
    pub fn simulate(
        &mut self,
        t_end: Option<f64>,
        steps: Option<usize>,
        time_points: Option<Vec<f64>>,
    ) -> Result<(), SimulationError> {
        let spec = match (t_end, steps, time_points) {
            (_, Some(_), Some(points)) => {
                log::warn!("Both steps and time points were given, using the time points");
                TimeSpec::Points(points)
            }
            (_, None, Some(points)) => TimeSpec::Points(points),
            (Some(t_end), Some(steps), None) => TimeSpec::Steps { t_end, steps },
            (Some(t_end), None, None) => TimeSpec::End(t_end),
            (None, _, None) => return Err(SimulationError::MissingTimeSpec),
        };

        self.run(&spec)?;
        Ok(())
    }

    /// Simulates exactly the given time points.
    pub fn simulate_time_course(&mut self, time_points: Vec<f64>) -> Result<(), SimulationError> {
        self.run(&TimeSpec::Points(time_points))?;
        Ok(())
    }

    /// Integrates from the initial conditions until the state stops changing.
    ///
    /// Without a `tolerance`, the integrator's configured steady-state tolerance is
    /// used. On success a single row at the steady-state time is appended.
    /// Non-convergence and numerical failures append nothing.
    #[builder]
    pub fn simulate_to_steady_state(
        &mut self,
        tolerance: Option<f64>,
        #[builder(default)] rel_norm: bool,
    ) -> Result<(), SimulationError> {
        let result = match self
            .integrator
            .integrate_to_steady_state(&self.model, tolerance, rel_norm)
        {
            Ok(result) => result,
            Err(e) if e.is_numerical() => {
                log::warn!("Steady state simulation failed: {e}");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some((time, values)) = result {
            let values = values.insert_axis(ndarray::Axis(0));
            let frame = Frame::new(Index::Time(vec![time]), self.model.get_variable_names(), values)?;
            self.save(frame, false);
        }

        Ok(())
    }

    /// Runs a protocol from the current cursor.
    ///
    /// Before each step its parameter values are written into the model, then the step
    /// is simulated with `time_points_per_step` steps. Parameter changes persist after
    /// the protocol. A numerical failure stops the protocol after the last successful
    /// step.
    pub fn simulate_over_protocol(
        &mut self,
        protocol: &Protocol,
        time_points_per_step: usize,
    ) -> Result<(), SimulationError> {
        let t_start = self.integrator.time();

        for (step, t_end) in protocol.steps().iter().zip(protocol.t_ends()) {
            self.model
                .update_parameters(step.parameters.iter().map(|(k, v)| (k.as_str(), *v)))?;

            let spec = TimeSpec::Steps {
                t_end: t_start + t_end,
                steps: time_points_per_step,
            };
            if !self.run(&spec)? {
                break;
            }
        }

        Ok(())
    }

    /// Integrates and stores the segment. Returns false if a numerical failure left no
    /// result.
    fn run(&mut self, spec: &TimeSpec) -> Result<bool, SimulationError> {
        let (time, values) = match self.integrator.integrate(&self.model, spec) {
            Ok(result) => result,
            Err(e) if e.is_numerical() => {
                log::warn!("Simulation failed: {e}");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let frame = Frame::new(Index::Time(time), self.model.get_variable_names(), values)?;
        self.save(frame, true);
        Ok(true)
    }

    fn save(&mut self, frame: Frame, skip_first: bool) {
        let parameters = self.model.get_parameters().clone();

        match self.concs.as_mut() {
            None => self.concs = Some(vec![frame]),
            Some(concs) if skip_first => concs.push(frame.slice_rows(1, frame.nrows())),
            Some(concs) => concs.push(frame),
        }

        self.simulation_parameters
            .get_or_insert_with(Vec::new)
            .push(parameters);
        self.args = OnceLock::new();
    }

    /// Drops all results and moves the integrator back to the initial conditions.
    pub fn clear_results(&mut self) {
        self.concs = None;
        self.simulation_parameters = None;
        self.args = OnceLock::new();
        self.integrator.reset();
    }

    fn args(&self) -> Result<Option<&[Frame]>, SimulationError> {
        let (Some(concs), Some(parameters)) = (&self.concs, &self.simulation_parameters) else {
            return Ok(None);
        };

        if self.args.get().is_none() {
            let mut args = Vec::with_capacity(concs.len());
            for (segment, pars) in concs.iter().zip(parameters.iter()) {
                let table = if pars == self.model.get_parameters() {
                    self.model.get_args_time_course(segment, true)?
                } else {
                    let mut model = self.model.clone();
                    model.update_parameters(pars.iter().map(|(k, v)| (k.as_str(), *v)))?;
                    model.get_args_time_course(segment, true)?
                };
                args.push(table);
            }
            // Another caller may have filled the cell in the meantime
            let _ = self.args.set(args);
        }

        Ok(self.args.get().map(Vec::as_slice))
    }

    /// Variable values of every segment.
    pub fn get_concs_split(&self) -> Option<Vec<Frame>> {
        self.concs.clone()
    }

    /// Variable values of all segments, stacked.
    pub fn get_concs(&self) -> Option<Frame> {
        self.concs
            .as_deref()
            .and_then(|concs| Frame::concat_rows(concs).ok())
    }

    /// Variables, derived variables and optionally readouts of every segment.
    pub fn get_full_concs_split(
        &self,
        include_readouts: bool,
    ) -> Result<Option<Vec<Frame>>, SimulationError> {
        let Some(args) = self.args()? else {
            return Ok(None);
        };

        let mut names = self.model.get_variable_names();
        names.extend(self.model.get_derived_variable_names()?);
        if include_readouts {
            names.extend(self.model.get_readout_names());
        }

        let frames = args
            .iter()
            .map(|a| a.select(&names))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(frames))
    }

    pub fn get_full_concs(&self, include_readouts: bool) -> Result<Option<Frame>, SimulationError> {
        concat(self.get_full_concs_split(include_readouts)?)
    }

    /// Variable values of all segments, divided according to `normalise`.
    pub fn get_concs_normalised(
        &self,
        normalise: &Normalise,
    ) -> Result<Option<Frame>, SimulationError> {
        let Some(concs) = self.concs.as_deref() else {
            return Ok(None);
        };
        concat(Some(normalise.apply(concs)?))
    }

    pub fn get_full_concs_normalised(
        &self,
        include_readouts: bool,
        normalise: &Normalise,
    ) -> Result<Option<Frame>, SimulationError> {
        match self.get_full_concs_split(include_readouts)? {
            Some(frames) => concat(Some(normalise.apply(&frames)?)),
            None => Ok(None),
        }
    }

    /// Fluxes of every segment, evaluated with the parameters of that segment.
    pub fn get_fluxes_split(&self) -> Result<Option<Vec<Frame>>, SimulationError> {
        let Some(args) = self.args()? else {
            return Ok(None);
        };

        // Argument tables already carry the parameter values of their segment
        let fluxes = args
            .iter()
            .map(|table| self.model.get_fluxes_time_course(table))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(fluxes))
    }

    pub fn get_fluxes(&self) -> Result<Option<Frame>, SimulationError> {
        concat(self.get_fluxes_split()?)
    }

    /// Fluxes divided segment-wise, e.g. by an enzyme amount that changes between
    /// protocol steps.
    pub fn get_fluxes_normalised(
        &self,
        normalise: &Normalise,
    ) -> Result<Option<Frame>, SimulationError> {
        match self.get_fluxes_split()? {
            Some(frames) => concat(Some(normalise.apply(&frames)?)),
            None => Ok(None),
        }
    }

    pub fn get_concs_and_fluxes(&self) -> Result<Option<(Frame, Frame)>, SimulationError> {
        let (Some(concs), Some(fluxes)) = (self.get_concs(), self.get_fluxes()?) else {
            return Ok(None);
        };
        Ok(Some((concs, fluxes)))
    }

    pub fn get_full_concs_and_fluxes(
        &self,
        include_readouts: bool,
    ) -> Result<Option<(Frame, Frame)>, SimulationError> {
        let (Some(concs), Some(fluxes)) =
            (self.get_full_concs(include_readouts)?, self.get_fluxes()?)
        else {
            return Ok(None);
        };
        Ok(Some((concs, fluxes)))
    }

    /// Variables and fluxes side by side.
    pub fn get_results(&self) -> Result<Option<Frame>, SimulationError> {
        match self.get_concs_and_fluxes()? {
            Some((concs, fluxes)) => Ok(Some(concs.concat_columns(&fluxes)?)),
            None => Ok(None),
        }
    }

    /// Full concentrations (with readouts) and fluxes side by side.
    pub fn get_full_results(&self) -> Result<Option<Frame>, SimulationError> {
        match self.get_full_concs_and_fluxes(true)? {
            Some((concs, fluxes)) => Ok(Some(concs.concat_columns(&fluxes)?)),
            None => Ok(None),
        }
    }

    /// Last stored state, usable as initial conditions of a follow-up simulation.
    pub fn get_new_y0(&self) -> Option<InitialConditions> {
        self.concs.as_ref()?.last()?.last_row()
    }

    /// Time points of all stored rows.
    pub fn get_time(&self) -> Option<Vec<f64>> {
        let concs = self.concs.as_ref()?;
        let mut time = Vec::new();
        for frame in concs {
            time.extend_from_slice(frame.index().as_time()?);
        }
        Some(time)
    }

    /// Parameter values in effect for each stored segment.
    pub fn get_simulation_parameters(&self) -> Option<&[SimulationParameters]> {
        self.simulation_parameters.as_deref()
    }

    pub fn update_parameter(&mut self, name: &str, value: f64) -> Result<&mut Self, SimulationError> {
        self.model.update_parameter(name, value)?;
        Ok(self)
    }

    pub fn update_parameters<'a, P>(&mut self, parameters: P) -> Result<&mut Self, SimulationError>
    where
        P: IntoIterator<Item = (&'a str, f64)>,
    {
        self.model.update_parameters(parameters)?;
        Ok(self)
    }

    pub fn scale_parameter(&mut self, name: &str, factor: f64) -> Result<&mut Self, SimulationError> {
        self.model.scale_parameter(name, factor)?;
        Ok(self)
    }

    pub fn scale_parameters<'a, P>(&mut self, factors: P) -> Result<&mut Self, SimulationError>
    where
        P: IntoIterator<Item = (&'a str, f64)>,
    {
        self.model.scale_parameters(factors)?;
        Ok(self)
    }
}

fn concat(frames: Option<Vec<Frame>>) -> Result<Option<Frame>, SimulationError> {
    frames
        .map(|frames| Frame::concat_rows(&frames))
        .transpose()
        .map_err(SimulationError::from)
}
