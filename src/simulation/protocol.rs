//! Protocols of timed parameter changes.
//!
//! A protocol is an ordered list of steps. Each step sets some parameters and then
//! lets the model evolve for the step's duration. Parameter changes are cumulative:
//! a value set in one step stays in effect until a later step overrides it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::SimulationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    pub duration: f64,
    pub parameters: IndexMap<String, f64>,
}

impl ProtocolStep {
    pub fn new<'a, I>(duration: f64, parameters: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        Self {
            duration,
            parameters: parameters
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    steps: Vec<ProtocolStep>,
}

impl Protocol {
    pub fn steps(&self) -> &[ProtocolStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Cumulative end time of every step, relative to the protocol start.
    pub fn t_ends(&self) -> Vec<f64> {
        self.steps
            .iter()
            .scan(0.0, |t, step| {
                *t += step.duration;
                Some(*t)
            })
            .collect()
    }

    /// Total duration of the protocol.
    pub fn duration(&self) -> f64 {
        self.steps.iter().map(|s| s.duration).sum()
    }
}

/// Builds a protocol from `(duration, parameters)` steps.
///
/// Durations must be positive and finite, otherwise
/// [`SimulationError::InvalidTimeSpec`] is returned.
pub fn make_protocol<I>(steps: I) -> Result<Protocol, SimulationError>
where
    I: IntoIterator<Item = ProtocolStep>,
{
    let steps: Vec<ProtocolStep> = steps.into_iter().collect();

    if let Some(step) = steps
        .iter()
        .find(|s| !(s.duration.is_finite() && s.duration > 0.0))
    {
        return Err(SimulationError::InvalidTimeSpec(format!(
            "protocol step duration must be positive, got {}",
            step.duration
        )));
    }

    Ok(Protocol { steps })
}
