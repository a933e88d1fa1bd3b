//! Result containers of single runs and of scans.
//!
//! Single runs produce a [`TimePoint`] (steady state) or a [`TimeCourse`]. Scans stitch
//! these into tables indexed by the scanned parameter values ([`SteadyStates`]) or by
//! (run, time) pairs ([`TimeCourseByPars`], [`ProtocolByPars`]).
//!
//! Every container splits its values into variables and fluxes. `results()` returns
//! both side by side.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    frame::{Frame, FrameError, Index},
    model::{error::ModelError, registry::Model},
    parameters::ParameterTable,
    simulation::protocol::Protocol,
};

fn side_by_side(concs: &Frame, fluxes: &Frame) -> Result<Frame, FrameError> {
    concs.concat_columns(fluxes)
}

/// Column names of full concentrations and fluxes of a model.
pub(crate) fn result_names(model: &Model) -> Result<(Vec<String>, Vec<String>), ModelError> {
    Ok((model.get_full_conc_names()?, model.get_flux_names()))
}

/// Variables and fluxes at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub concs: IndexMap<String, f64>,
    pub fluxes: IndexMap<String, f64>,
}

impl TimePoint {
    /// A time point with every value NaN, used for failed runs.
    pub fn nan(conc_names: &[String], flux_names: &[String]) -> Self {
        let nan = |names: &[String]| names.iter().map(|n| (n.clone(), f64::NAN)).collect();
        Self {
            concs: nan(conc_names),
            fluxes: nan(flux_names),
        }
    }

    /// The last rows of a concentration and a flux table.
    pub fn from_last_rows(concs: &Frame, fluxes: &Frame) -> Option<Self> {
        Some(Self {
            concs: concs.last_row()?,
            fluxes: fluxes.last_row()?,
        })
    }

    pub fn results(&self) -> IndexMap<String, f64> {
        self.concs
            .iter()
            .chain(self.fluxes.iter())
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

/// Variables and fluxes over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeCourse {
    pub concs: Frame,
    pub fluxes: Frame,
}

impl TimeCourse {
    /// A time course with every value NaN, used for failed runs.
    pub fn nan(time: &[f64], conc_names: &[String], flux_names: &[String]) -> Self {
        Self {
            concs: Frame::nan(Index::Time(time.to_vec()), conc_names.to_vec()),
            fluxes: Frame::nan(Index::Time(time.to_vec()), flux_names.to_vec()),
        }
    }

    pub fn results(&self) -> Result<Frame, FrameError> {
        side_by_side(&self.concs, &self.fluxes)
    }
}

/// Steady states, one row per scanned parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct SteadyStates {
    pub concs: Frame,
    pub fluxes: Frame,
    pub parameters: ParameterTable,
}

impl SteadyStates {
    pub fn results(&self) -> Result<Frame, FrameError> {
        side_by_side(&self.concs, &self.fluxes)
    }
}

/// Steady states of a parameter scan, repeated for every Monte Carlo draw.
///
/// Rows carry a nested index of the Monte Carlo row and the scanned values.
#[derive(Debug, Clone, PartialEq)]
pub struct McSteadyStates {
    pub concs: Frame,
    pub fluxes: Frame,
    pub parameters: ParameterTable,
    pub mc_parameters: ParameterTable,
}

impl McSteadyStates {
    pub fn results(&self) -> Result<Frame, FrameError> {
        side_by_side(&self.concs, &self.fluxes)
    }
}

/// Time courses stacked under a (run, time) index.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeCourseByPars {
    pub concs: Frame,
    pub fluxes: Frame,
    pub parameters: ParameterTable,
}

impl TimeCourseByPars {
    pub fn results(&self) -> Result<Frame, FrameError> {
        side_by_side(&self.concs, &self.fluxes)
    }

    /// One variable or flux as a time x run table.
    pub fn get_by_name(&self, name: &str) -> Result<Frame, FrameError> {
        self.results()?.unstack_column(name)
    }

    /// Aggregates across runs for every time point, e.g. with [`crate::frame::agg::mean`].
    pub fn get_agg_per_time<F>(&self, agg: F) -> Result<Frame, FrameError>
    where
        F: Fn(&[f64]) -> f64,
    {
        self.results()?.aggregate_per_time(agg)
    }

    /// Aggregates over time for every run.
    pub fn get_agg_per_run<F>(&self, agg: F) -> Result<Frame, FrameError>
    where
        F: Fn(&[f64]) -> f64,
    {
        self.results()?.aggregate_per_run(agg)
    }
}

/// Protocol time courses stacked under a (run, time) index.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolByPars {
    pub concs: Frame,
    pub fluxes: Frame,
    pub parameters: ParameterTable,
    pub protocol: Protocol,
}

impl ProtocolByPars {
    pub fn results(&self) -> Result<Frame, FrameError> {
        side_by_side(&self.concs, &self.fluxes)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Frame, FrameError> {
        self.results()?.unstack_column(name)
    }

    pub fn get_agg_per_time<F>(&self, agg: F) -> Result<Frame, FrameError>
    where
        F: Fn(&[f64]) -> f64,
    {
        self.results()?.aggregate_per_time(agg)
    }

    pub fn get_agg_per_run<F>(&self, agg: F) -> Result<Frame, FrameError>
    where
        F: Fn(&[f64]) -> f64,
    {
        self.results()?.aggregate_per_run(agg)
    }
}

/// Response coefficients of variables and fluxes, one row per perturbed parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCoefficients {
    pub concs: Frame,
    pub fluxes: Frame,
}

impl ResponseCoefficients {
    pub fn results(&self) -> Result<Frame, FrameError> {
        side_by_side(&self.concs, &self.fluxes)
    }
}

/// Response coefficients for every row of a parameter table, under a nested
/// (row, perturbed parameter) index.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCoefficientsByPars {
    pub concs: Frame,
    pub fluxes: Frame,
    pub parameters: ParameterTable,
}

impl ResponseCoefficientsByPars {
    pub fn results(&self) -> Result<Frame, FrameError> {
        side_by_side(&self.concs, &self.fluxes)
    }
}
