//! Setup module for configuring the numerical integration.
//!
//! This module provides the [`IntegratorSettings`] struct and its builder. It controls:
//!
//! - The largest internal step of the fixed-step integrator
//! - The number of output points when only an end time is given
//! - The chunking and tolerance of the steady-state convergence loop

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration of a [`PeroxideIntegrator`](super::integrator::PeroxideIntegrator).
///
/// # Fields
///
/// * `max_step` - Largest internal step size (default: 0.01)
/// * `default_points` - Output points for end-time-only integration (default: 100)
/// * `steady_state_step_size` - Time integrated per convergence check (default: 100.0)
/// * `steady_state_max_steps` - Convergence checks before giving up (default: 1000)
/// * `steady_state_tolerance` - Default norm threshold for convergence (default: 1e-6)
///
/// # Examples
///
/// ```
/// use modelbase::prelude::IntegratorSettingsBuilder;
///
/// let settings = IntegratorSettingsBuilder::default()
///     .max_step(0.001)
///     .steady_state_max_steps(50)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct IntegratorSettings {
    #[builder(default = "0.01")]
    pub max_step: f64,
    #[builder(default = "100")]
    pub default_points: usize,
    #[builder(default = "100.0")]
    pub steady_state_step_size: f64,
    #[builder(default = "1000")]
    pub steady_state_max_steps: usize,
    #[builder(default = "1e-6")]
    pub steady_state_tolerance: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            max_step: 0.01,
            default_points: 100,
            steady_state_step_size: 100.0,
            steady_state_max_steps: 1000,
            steady_state_tolerance: 1e-6,
        }
    }
}
