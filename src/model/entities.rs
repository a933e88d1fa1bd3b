//! Entity types stored in a [`Model`](crate::model::registry::Model).
//!
//! Parameters and variables are plain name-to-value entries and have no type of their
//! own. Everything computed from other names carries a [`RateFn`] and the ordered list
//! of argument names it is called with.

use indexmap::IndexMap;

use super::{
    error::ModelError,
    functions::{IntoRateFn, RateFn},
    registry::Model,
};

/// A value computed from parameters, variables or other derived values.
#[derive(Debug, Clone)]
pub struct Derived {
    pub func: RateFn,
    pub args: Vec<String>,
}

impl Derived {
    pub fn new<M>(func: impl IntoRateFn<M>, args: &[&str]) -> Self {
        Self {
            func: func.into_rate_fn(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Builds a derived value from an expression, using the names it mentions as
    /// arguments.
    pub fn from_expression(source: &str) -> Result<Self, ModelError> {
        let func = RateFn::expression(source)?;
        let args = func.symbols();
        Ok(Self { func, args })
    }
}

/// A reporting-only quantity. It is computed like a [`Derived`] value but never feeds
/// back into the right hand side.
#[derive(Debug, Clone)]
pub struct Readout {
    pub func: RateFn,
    pub args: Vec<String>,
}

impl Readout {
    pub fn new<M>(func: impl IntoRateFn<M>, args: &[&str]) -> Self {
        Self {
            func: func.into_rate_fn(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn from_expression(source: &str) -> Result<Self, ModelError> {
        let func = RateFn::expression(source)?;
        let args = func.symbols();
        Ok(Self { func, args })
    }
}

/// Coefficient of a variable in a reaction's stoichiometry.
#[derive(Debug, Clone)]
pub enum Stoichiometry {
    Constant(f64),
    /// Recomputed on every evaluation from the same argument snapshot the rate sees
    Derived(Derived),
}

impl From<f64> for Stoichiometry {
    fn from(value: f64) -> Self {
        Stoichiometry::Constant(value)
    }
}

impl From<Derived> for Stoichiometry {
    fn from(derived: Derived) -> Self {
        Stoichiometry::Derived(derived)
    }
}

/// A flux with a rate law and signed contributions to the derivatives of variables.
#[derive(Debug, Clone)]
pub struct Reaction {
    pub func: RateFn,
    pub args: Vec<String>,
    pub stoichiometry: IndexMap<String, Stoichiometry>,
}

impl Reaction {
    pub fn new<M, K, S, I>(func: impl IntoRateFn<M>, args: &[&str], stoichiometry: I) -> Self
    where
        K: Into<String>,
        S: Into<Stoichiometry>,
        I: IntoIterator<Item = (K, S)>,
    {
        Self {
            func: func.into_rate_fn(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stoichiometry: stoichiometry
                .into_iter()
                .map(|(name, coef)| (name.into(), coef.into()))
                .collect(),
        }
    }

    pub fn from_expression<K, S, I>(source: &str, stoichiometry: I) -> Result<Self, ModelError>
    where
        K: Into<String>,
        S: Into<Stoichiometry>,
        I: IntoIterator<Item = (K, S)>,
    {
        let func = RateFn::expression(source)?;
        let args = func.symbols();
        Ok(Self {
            func,
            args,
            stoichiometry: stoichiometry
                .into_iter()
                .map(|(name, coef)| (name.into(), coef.into()))
                .collect(),
        })
    }

    /// Arguments that are model variables but do not appear in the stoichiometry,
    /// e.g. enzymes or allosteric effectors.
    pub fn get_modifiers(&self, model: &Model) -> Vec<String> {
        let variables = model.get_variables();
        self.args
            .iter()
            .filter(|arg| variables.contains_key(*arg) && !self.stoichiometry.contains_key(*arg))
            .cloned()
            .collect()
    }

    /// All names this reaction reads, including those of derived coefficients.
    pub(crate) fn dependencies(&self) -> impl Iterator<Item = &String> {
        self.args.iter().chain(
            self.stoichiometry
                .values()
                .filter_map(|coef| match coef {
                    Stoichiometry::Derived(d) => Some(d.args.iter()),
                    Stoichiometry::Constant(_) => None,
                })
                .flatten(),
        )
    }
}
