//! Simulation Result Module
//!
//! Simulators keep their results as one [`Frame`] per integration segment. This module
//! provides the normalisation applied to such segment lists before they are returned.
//!
//! # Normalisation modes
//!
//! - [`Normalise::Scalar`]: every value is divided by the same number
//! - [`Normalise::PerSegment`]: every segment is divided by its own number
//! - [`Normalise::PerRow`]: one divisor per row, sliced along segment boundaries

use crate::frame::{Frame, FrameError};

#[derive(Debug, Clone, PartialEq)]
pub enum Normalise {
    Scalar(f64),
    PerSegment(Vec<f64>),
    PerRow(Vec<f64>),
}

impl Normalise {
    /// Picks the mode for an array of divisors.
    ///
    /// An array with one entry per segment is applied per segment, anything else is
    /// treated as one divisor per row.
    pub fn select(values: Vec<f64>, n_segments: usize) -> Self {
        if values.len() == n_segments {
            Normalise::PerSegment(values)
        } else {
            Normalise::PerRow(values)
        }
    }

    /// Divides each segment according to the mode.
    pub fn apply(&self, segments: &[Frame]) -> Result<Vec<Frame>, FrameError> {
        match self {
            Normalise::Scalar(value) => Ok(segments.iter().map(|f| f.map(|v| v / value)).collect()),
            Normalise::PerSegment(values) => {
                if values.len() != segments.len() {
                    return Err(FrameError::IndexLength {
                        index: segments.len(),
                        data: values.len(),
                    });
                }
                Ok(segments
                    .iter()
                    .zip(values.iter())
                    .map(|(f, d)| f.map(|v| v / d))
                    .collect())
            }
            Normalise::PerRow(values) => {
                let total: usize = segments.iter().map(Frame::nrows).sum();
                if values.len() != total {
                    return Err(FrameError::IndexLength {
                        index: total,
                        data: values.len(),
                    });
                }

                let mut start = 0;
                segments
                    .iter()
                    .map(|f| {
                        let end = start + f.nrows();
                        let divided = f.divide_rows(&values[start..end]);
                        start = end;
                        divided
                    })
                    .collect()
            }
        }
    }
}

impl From<f64> for Normalise {
    fn from(value: f64) -> Self {
        Normalise::Scalar(value)
    }
}
