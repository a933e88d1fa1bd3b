//! Scan Error Module
//!
//! Errors that abort a whole scan. Numerical failures of single rows are not errors:
//! they show up as NaN rows in the result tables. Any other failure of a row aborts
//! the scan it belongs to.

use thiserror::Error;

use crate::{
    frame::FrameError, model::error::ModelError, parallel::error::ParallelError,
    simulation::error::SimulationError,
};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Parallel(#[from] ParallelError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("Parameter table is empty")]
    EmptyParameters,
}

impl ScanError {
    /// Returns true for failures caused by arithmetic during integration.
    pub fn is_numerical(&self) -> bool {
        match self {
            ScanError::Model(e) => e.is_numerical(),
            ScanError::Simulation(e) => e.is_numerical(),
            _ => false,
        }
    }
}
