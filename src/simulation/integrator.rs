//! Integrator Module
//!
//! This module defines the contract between a simulator and a numerical ODE backend
//! and provides a backend built on peroxide's Runge-Kutta steppers.
//!
//! # Key Components
//!
//! - [`OdeRhs`]: anything that can compute a derivative vector, implemented by [`Model`]
//! - [`TimeSpec`]: the three ways of asking for output points
//! - [`Integrator`]: a resumable cursor over (time, state) with fixed-output integration
//!   and a steady-state convergence loop
//! - [`PeroxideIntegrator`]: fixed sub-step integration with any peroxide [`ODEIntegrator`]
//!
//! The cursor starts at `t = 0` and the initial conditions. Every successful
//! [`Integrator::integrate`] call moves it to the last returned point, so consecutive
//! calls continue where the previous one stopped. [`Integrator::reset`] moves it back.

use ndarray::{Array1, Array2};
use peroxide::fuga::{ODEIntegrator, ODEProblem, RK4};

use crate::model::{error::ModelError, registry::Model};

use super::{error::SimulationError, setup::IntegratorSettings};

/// Right hand side of an ODE system `dy/dt = f(t, y)`.
pub trait OdeRhs {
    fn rhs(&self, t: f64, y: &[f64], dy: &mut [f64]) -> Result<(), ModelError>;
}

impl OdeRhs for Model {
    fn rhs(&self, t: f64, y: &[f64], dy: &mut [f64]) -> Result<(), ModelError> {
        self.right_hand_side(t, y, dy)
    }
}

/// Requested output points of one integration call.
///
/// Every variant returns the current cursor as its first row.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeSpec {
    /// Evenly spaced points up to the end time, as many as the integrator's default
    End(f64),
    /// `steps + 1` evenly spaced points up to the end time
    Steps { t_end: f64, steps: usize },
    /// Explicit, non-decreasing output times
    Points(Vec<f64>),
}

pub trait Integrator: Send {
    /// Sets the state `reset` returns to and moves the cursor there.
    fn set_initial_conditions(&mut self, y0: Vec<f64>);

    /// Restores the initial conditions and zeroes the time cursor.
    fn reset(&mut self);

    /// Current cursor time.
    fn time(&self) -> f64;

    /// Integrates from the cursor and returns the output times and one state row per time.
    fn integrate<R: OdeRhs + ?Sized>(
        &mut self,
        rhs: &R,
        spec: &TimeSpec,
    ) -> Result<(Vec<f64>, Array2<f64>), SimulationError>;

    /// Integrates from the initial conditions until two consecutive states are closer
    /// than `tolerance`, or the integrator's own default when `None`.
    ///
    /// Returns `Ok(None)` if the step budget is exhausted first.
    fn integrate_to_steady_state<R: OdeRhs + ?Sized>(
        &mut self,
        rhs: &R,
        tolerance: Option<f64>,
        rel_norm: bool,
    ) -> Result<Option<(f64, Array1<f64>)>, SimulationError>;
}

/// Adapter from [`OdeRhs`] to peroxide's problem trait.
struct Problem<'a, R: ?Sized>(&'a R);

impl<R: OdeRhs + ?Sized> ODEProblem for Problem<'_, R> {
    fn rhs(&self, t: f64, y: &[f64], dy: &mut [f64]) -> anyhow::Result<()> {
        Ok(self.0.rhs(t, y, dy)?)
    }
}

/// Fixed sub-step integrator driving a peroxide stepper.
///
/// Between two output points the interval is split into equal sub-steps no larger than
/// [`IntegratorSettings::max_step`]. The stepper is expected to be a fixed-step method
/// such as [`RK4`].
#[derive(Debug, Clone)]
pub struct PeroxideIntegrator<S: ODEIntegrator = RK4> {
    solver: S,
    settings: IntegratorSettings,
    y0: Vec<f64>,
    t: f64,
    y: Vec<f64>,
}

impl Default for PeroxideIntegrator<RK4> {
    fn default() -> Self {
        Self::new(RK4, IntegratorSettings::default())
    }
}

impl<S: ODEIntegrator> PeroxideIntegrator<S> {
    pub fn new(solver: S, settings: IntegratorSettings) -> Self {
        Self {
            solver,
            settings,
            y0: Vec::new(),
            t: 0.0,
            y: Vec::new(),
        }
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    /// Current cursor state.
    pub fn state(&self) -> &[f64] {
        &self.y
    }

    fn output_times(&self, spec: &TimeSpec) -> Result<Vec<f64>, SimulationError> {
        let t0 = self.t;

        let times = match spec {
            TimeSpec::End(t_end) => {
                linspace(t0, *t_end, self.settings.default_points.max(2) - 1)?
            }
            TimeSpec::Steps { t_end, steps } => {
                if *steps == 0 {
                    return Err(SimulationError::InvalidTimeSpec(
                        "step count must be positive".to_string(),
                    ));
                }
                linspace(t0, *t_end, *steps)?
            }
            TimeSpec::Points(points) => output_grid(points, t0)?,
        };

        Ok(times)
    }

    /// Advances `y` from `t` to `t_end` in equal sub-steps.
    fn advance<R: OdeRhs + ?Sized>(
        &self,
        rhs: &R,
        t: f64,
        t_end: f64,
        y: &mut [f64],
    ) -> Result<(), SimulationError> {
        let span = t_end - t;
        if span <= 0.0 {
            return Ok(());
        }

        let n_steps = (span / self.settings.max_step).ceil().max(1.0) as usize;
        let h = span / n_steps as f64;
        let problem = Problem(rhs);

        let mut tc = t;
        for _ in 0..n_steps {
            self.solver
                .step(&problem, tc, y, h)
                .map_err(|e| match e.downcast::<ModelError>() {
                    Ok(model_error) => SimulationError::Model(model_error),
                    Err(other) => SimulationError::Integration(other.to_string()),
                })?;
            tc += h;
        }

        if let Some(value) = y.iter().find(|v| !v.is_finite()) {
            return Err(SimulationError::Integration(format!(
                "state became non-finite ({value}) at t = {t_end}"
            )));
        }

        Ok(())
    }
}

impl<S: ODEIntegrator + Send> Integrator for PeroxideIntegrator<S> {
    fn set_initial_conditions(&mut self, y0: Vec<f64>) {
        self.y = y0.clone();
        self.y0 = y0;
        self.t = 0.0;
    }

    fn reset(&mut self) {
        self.y = self.y0.clone();
        self.t = 0.0;
    }

    fn time(&self) -> f64 {
        self.t
    }

    fn integrate<R: OdeRhs + ?Sized>(
        &mut self,
        rhs: &R,
        spec: &TimeSpec,
    ) -> Result<(Vec<f64>, Array2<f64>), SimulationError> {
        let times = self.output_times(spec)?;
        let n_vars = self.y.len();

        let mut y = self.y.clone();
        let mut t = self.t;
        let mut flat = Vec::with_capacity(times.len() * n_vars);

        for &t_out in times.iter() {
            self.advance(rhs, t, t_out, &mut y)?;
            t = t_out;
            flat.extend_from_slice(&y);
        }

        let values = Array2::from_shape_vec((times.len(), n_vars), flat)
            .map_err(|e| SimulationError::Integration(e.to_string()))?;

        self.t = t;
        self.y = y;

        Ok((times, values))
    }

    fn integrate_to_steady_state<R: OdeRhs + ?Sized>(
        &mut self,
        rhs: &R,
        tolerance: Option<f64>,
        rel_norm: bool,
    ) -> Result<Option<(f64, Array1<f64>)>, SimulationError> {
        self.reset();

        let tolerance = tolerance.unwrap_or(self.settings.steady_state_tolerance);
        let step_size = self.settings.steady_state_step_size;
        let mut t = self.t;
        let mut y1 = self.y.clone();

        for _ in 0..self.settings.steady_state_max_steps {
            let mut y2 = y1.clone();
            self.advance(rhs, t, t + step_size, &mut y2)?;
            t += step_size;

            let norm = y1
                .iter()
                .zip(y2.iter())
                .map(|(a, b)| if rel_norm { (b - a) / a } else { b - a })
                .map(|d| d * d)
                .sum::<f64>()
                .sqrt();

            if norm < tolerance {
                self.t = t;
                self.y = y2.clone();
                return Ok(Some((t, Array1::from_vec(y2))));
            }

            y1 = y2;
        }

        log::warn!(
            "No steady state reached within {} steps of size {}",
            self.settings.steady_state_max_steps,
            step_size
        );

        Ok(None)
    }
}

/// The rows an integration over explicit `points` returns when started at `t0`.
///
/// The points must be finite, non-decreasing and not before `t0`. The grid is
/// `points` with `t0` prepended unless the first point is `t0` itself.
pub fn output_grid(points: &[f64], t0: f64) -> Result<Vec<f64>, SimulationError> {
    let Some(first) = points.first() else {
        return Err(SimulationError::InvalidTimeSpec(
            "time points are empty".to_string(),
        ));
    };

    if points.iter().any(|t| !t.is_finite())
        || points.windows(2).any(|w| w[1] < w[0])
        || *first < t0
    {
        return Err(SimulationError::InvalidTimeSpec(format!(
            "time points must be finite, non-decreasing and start at or after {t0}"
        )));
    }

    let mut times = Vec::with_capacity(points.len() + 1);
    if *first != t0 {
        times.push(t0);
    }
    times.extend_from_slice(points);
    Ok(times)
}

fn linspace(start: f64, end: f64, intervals: usize) -> Result<Vec<f64>, SimulationError> {
    if !end.is_finite() || end <= start {
        return Err(SimulationError::InvalidTimeSpec(format!(
            "end time {end} must be finite and after the current time {start}"
        )));
    }

    let dt = (end - start) / intervals as f64;
    Ok((0..=intervals)
        .map(|i| if i == intervals { end } else { start + dt * i as f64 })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// dy/dt = -k y
    struct Decay(f64);

    impl OdeRhs for Decay {
        fn rhs(&self, _t: f64, y: &[f64], dy: &mut [f64]) -> Result<(), ModelError> {
            dy[0] = -self.0 * y[0];
            Ok(())
        }
    }

    fn integrator(y0: f64) -> PeroxideIntegrator {
        let mut integrator = PeroxideIntegrator::default();
        integrator.set_initial_conditions(vec![y0]);
        integrator
    }

    #[test]
    fn test_exponential_decay() {
        let mut integrator = integrator(1.0);
        let (time, values) = integrator
            .integrate(&Decay(0.5), &TimeSpec::Steps { t_end: 2.0, steps: 4 })
            .unwrap();

        assert_eq!(time, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_relative_eq!(values[[4, 0]], (-1.0f64).exp(), epsilon = 1e-8);
        assert_relative_eq!(integrator.time(), 2.0);
    }

    #[test]
    fn test_end_uses_default_points() {
        let mut integrator = integrator(1.0);
        let (time, values) = integrator.integrate(&Decay(1.0), &TimeSpec::End(1.0)).unwrap();
        assert_eq!(time.len(), 100);
        assert_eq!(values.nrows(), 100);
    }

    #[test]
    fn test_points_prepend_cursor() {
        let mut integrator = integrator(1.0);
        let (time, _) = integrator
            .integrate(&Decay(1.0), &TimeSpec::Points(vec![1.0, 2.0]))
            .unwrap();
        assert_eq!(time, vec![0.0, 1.0, 2.0]);

        let (time, _) = integrator
            .integrate(&Decay(1.0), &TimeSpec::Points(vec![2.0, 3.0]))
            .unwrap();
        assert_eq!(time, vec![2.0, 3.0]);
    }

    #[test]
    fn test_points_before_cursor_are_rejected() {
        let mut integrator = integrator(1.0);
        integrator.integrate(&Decay(1.0), &TimeSpec::End(2.0)).unwrap();
        let result = integrator.integrate(&Decay(1.0), &TimeSpec::Points(vec![1.0]));
        assert!(matches!(result, Err(SimulationError::InvalidTimeSpec(_))));
    }

    #[test]
    fn test_steady_state_converges() {
        let mut integrator = integrator(3.0);
        let (t, y) = integrator
            .integrate_to_steady_state(&Decay(1.0), Some(1e-6), false)
            .unwrap()
            .unwrap();
        assert!(t > 0.0);
        assert_relative_eq!(y[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_steady_state_budget_exhausted() {
        struct Growth;
        impl OdeRhs for Growth {
            fn rhs(&self, _t: f64, _y: &[f64], dy: &mut [f64]) -> Result<(), ModelError> {
                dy[0] = 1.0;
                Ok(())
            }
        }

        let settings = IntegratorSettings {
            steady_state_max_steps: 3,
            steady_state_step_size: 1.0,
            ..Default::default()
        };
        let mut integrator = PeroxideIntegrator::new(RK4, settings);
        integrator.set_initial_conditions(vec![0.0]);

        let result = integrator.integrate_to_steady_state(&Growth, None, false).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_model_errors_survive_the_stepper() {
        struct Failing;
        impl OdeRhs for Failing {
            fn rhs(&self, _t: f64, _y: &[f64], _dy: &mut [f64]) -> Result<(), ModelError> {
                Err(ModelError::NonFinite {
                    name: "x".to_string(),
                    value: f64::NAN,
                })
            }
        }

        let err = integrator(1.0)
            .integrate(&Failing, &TimeSpec::End(1.0))
            .unwrap_err();
        assert!(err.is_numerical());
        assert!(matches!(err, SimulationError::Model(_)));
    }

    #[test]
    fn test_steady_state_tolerance_defaults_to_settings() {
        // Consecutive states one step apart differ by about 0.01
        let loose = IntegratorSettings {
            steady_state_step_size: 1.0,
            steady_state_max_steps: 5,
            steady_state_tolerance: 0.1,
            ..Default::default()
        };
        let strict = IntegratorSettings {
            steady_state_tolerance: 1e-6,
            ..loose.clone()
        };

        let run = |settings: IntegratorSettings| {
            let mut integrator = PeroxideIntegrator::new(RK4, settings);
            integrator.set_initial_conditions(vec![1.0]);
            integrator
                .integrate_to_steady_state(&Decay(0.01), None, false)
                .unwrap()
        };

        assert!(run(loose).is_some());
        assert!(run(strict).is_none());
    }
}
