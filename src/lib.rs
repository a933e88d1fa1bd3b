//! Modelbase Rust Library
//!
//! This library provides functionality for building and analysing kinetic models of
//! metabolic networks, including:
//! - Assembling models from parameters, variables, derived values, reactions and readouts
//! - Simulating models over time, to steady state and over protocols
//! - Scanning parameters in parallel with on-disk caching
//! - Metabolic control analysis and Monte Carlo analyses

#![warn(unused_imports)]

/// Commonly used types and functionality re-exported for convenience
pub mod prelude {
    pub use crate::frame::{Frame, FrameError, Index};
    pub use crate::model::entities::*;
    pub use crate::model::error::*;
    pub use crate::model::functions::{IntoRateFn, RateFn};
    pub use crate::model::registry::Model;
    pub use crate::model::surrogate::*;
    pub use crate::parallel::{Cache, ParallelSettings, ParallelSettingsBuilder};
    pub use crate::parameters::ParameterTable;
    pub use crate::scan::error::ScanError;
    pub use crate::scan::results::*;
    pub use crate::simulation::error::*;
    pub use crate::simulation::init_cond::*;
    pub use crate::simulation::integrator::{Integrator, PeroxideIntegrator};
    pub use crate::simulation::protocol::*;
    pub use crate::simulation::setup::*;
    pub use crate::simulation::simulator::*;
}

/// Dependency ordering of derived quantities
pub mod graph;

/// Labelled numeric tables used for all results
pub mod frame;

/// Model assembly and evaluation
pub mod model {
    /// Error types of model assembly and evaluation
    pub mod error;
    /// Native and parsed rate functions
    pub mod functions;
    /// Entity types stored in a model
    pub mod entities;
    /// Black-box flux predictors
    pub mod surrogate;
    /// Lazily rebuilt evaluation plan
    pub(crate) mod cache;
    /// The model registry
    pub mod registry;
    /// Evaluation for single states and time series
    pub mod evaluate;
}

/// Simulation functionality for kinetic models
pub mod simulation {
    pub use crate::simulation::setup::IntegratorSettings;

    /// Error types for simulation failures
    pub mod error;
    /// Integrator settings and builder
    pub mod setup;
    /// Initial condition handling for simulations
    pub mod init_cond;
    /// Protocols of timed parameter changes
    pub mod protocol;
    /// Numerical integrator contract and peroxide backend
    pub mod integrator;
    /// Per-segment results and normalisation
    pub mod result;
    /// Stateful simulator
    pub mod simulator;
}

/// Cached, optionally parallel execution of independent tasks
pub mod parallel {
    pub use crate::parallel::cache::Cache;
    pub use crate::parallel::runner::{
        parallelise, try_parallelise, ParallelSettings, ParallelSettingsBuilder,
    };

    pub mod cache;
    pub mod error;
    pub mod executor;
    pub mod runner;
}

/// Parameter scans
pub mod scan {
    pub use crate::scan::scans::{steady_state, time_course, time_course_over_protocol};

    pub mod error;
    pub mod results;
    pub mod scans;
    pub mod workers;
}

/// Metabolic control analysis
pub mod mca;

/// Monte Carlo analyses over sampled parameter sets
pub mod mc;

/// Parameter distributions and sampling
pub mod distributions;

/// Tables of parameter sets
pub mod parameters;

/// Common rate laws
pub mod ratefunctions;

/// Conversions of missing values into errors
pub mod utils;
