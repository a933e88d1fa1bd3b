//! Model Error Module
//!
//! Errors raised while assembling or evaluating a [`Model`](crate::model::registry::Model).
//!
//! Almost every variant is a configuration error: the model description itself is
//! malformed (duplicate names, unknown references, cycles) and the call that
//! discovered it is aborted. [`ModelError::NonFinite`] is the exception. It signals a
//! numerical failure during evaluation (for example a division by zero) and callers
//! further up treat it as "no result" instead of aborting.

use thiserror::Error;

use crate::frame::FrameError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Name '{0}' is already in use by another model entity")]
    DuplicateName(String),
    #[error("Unknown {kind} '{name}'")]
    NotFound { name: String, kind: EntityKind },
    #[error("Cyclic dependency detected at '{0}'")]
    Cycle(String),
    #[error("Cannot remove '{name}': still referenced by {dependents:?}")]
    HasDependents {
        name: String,
        dependents: Vec<String>,
    },
    #[error("Invalid stoichiometry in '{reaction}': {message}")]
    InvalidStoichiometry { reaction: String, message: String },
    #[error("Expression error in '{expression}': {message}")]
    Expression { expression: String, message: String },
    #[error("Expected {expected} values for {name}, got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("'{name}' evaluated to a non-finite value ({value})")]
    NonFinite { name: String, value: f64 },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ModelError {
    /// Returns true for errors caused by arithmetic during evaluation rather than
    /// by the model description.
    pub fn is_numerical(&self) -> bool {
        matches!(self, ModelError::NonFinite { .. })
    }

    pub(crate) fn not_found(name: impl Into<String>, kind: EntityKind) -> Self {
        ModelError::NotFound {
            name: name.into(),
            kind,
        }
    }
}

/// The kind of a named model entity, used for lookups and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Parameter,
    Variable,
    Derived,
    Reaction,
    Readout,
    Surrogate,
    /// Any argument name, used when a reference could not be resolved at all
    Name,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Parameter => "parameter",
            EntityKind::Variable => "variable",
            EntityKind::Derived => "derived value",
            EntityKind::Reaction => "reaction",
            EntityKind::Readout => "readout",
            EntityKind::Surrogate => "surrogate",
            EntityKind::Name => "name",
        };
        write!(f, "{s}")
    }
}
