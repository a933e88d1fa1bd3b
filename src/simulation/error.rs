//! Simulation Error Module
//!
//! This module provides the error type for everything that drives a model through an
//! integrator: simulators, protocol runs and scan workers.
//!
//! # Error classes
//!
//! The [`SimulationError`] enum mixes two classes of failures:
//! - Configuration errors such as malformed time specifications, unknown initial
//!   conditions or a broken model description. These abort the call.
//! - Numerical failures such as a non-finite derivative or a failed integration step.
//!   These are reported by [`SimulationError::is_numerical`] and are turned into absent
//!   or NaN results by the layers that batch many simulations.

use thiserror::Error;

use crate::{frame::FrameError, model::error::ModelError, utils::UnexpectedNone};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("No time specification given: expected an end time, a step count or time points")]
    MissingTimeSpec,
    #[error("Invalid time specification: {0}")]
    InvalidTimeSpec(String),
    #[error("Integration failed: {0}")]
    Integration(String),
    #[error("Invalid initial conditions: {0}")]
    InvalidInitialConditions(String),
    #[error("Result table error: {0}")]
    Frame(#[from] FrameError),
    #[error("Expected {expected} values, got {actual}")]
    ParameterMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    UnexpectedNone(#[from] UnexpectedNone),
}

impl SimulationError {
    /// Returns true for failures caused by arithmetic during integration.
    pub fn is_numerical(&self) -> bool {
        match self {
            SimulationError::Model(e) => e.is_numerical(),
            SimulationError::Integration(_) => true,
            _ => false,
        }
    }

    /// Returns true for failures caused by the model or the call itself.
    pub fn is_configuration(&self) -> bool {
        !self.is_numerical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let numerical = SimulationError::from(ModelError::NonFinite {
            name: "x".to_string(),
            value: f64::INFINITY,
        });
        assert!(numerical.is_numerical());
        assert!(SimulationError::Integration("step".to_string()).is_numerical());

        let config = SimulationError::from(ModelError::Cycle("a".to_string()));
        assert!(config.is_configuration());
        assert!(SimulationError::MissingTimeSpec.is_configuration());
    }
}
