//! Callable representations for derived values, rate laws and readouts.
//!
//! A [`RateFn`] is either a native Rust function over positional arguments or a parsed
//! arithmetic expression. Expressions are kept as a `meval` expression tree and
//! interpreted against the named argument values on every call, so importing a model
//! from a textual description never generates code at runtime.
//!
//! Native functions over a fixed-size array, such as the bundled
//! [`ratefunctions`](crate::ratefunctions), declare their argument count. Entities
//! built from them are checked against it when the model is assembled.

use std::{fmt, str::FromStr, sync::Arc};

use lazy_static::lazy_static;
use meval::{Context, ContextProvider, Expr};
use regex::Regex;

use super::error::ModelError;

/// Signature of a native function. Arguments arrive in the order of the entity's
/// argument list.
pub type NativeFn = dyn Fn(&[f64]) -> f64 + Send + Sync;

lazy_static! {
    static ref SYMBOL_PATTERN: Regex =
        Regex::new(r"(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?|([A-Za-z_][A-Za-z0-9_]*)(\s*\()?")
            .expect("Invalid symbol pattern");
}

/// Names meval resolves on its own and which are therefore never model arguments.
const BUILTIN_CONSTANTS: [&str; 2] = ["pi", "e"];

#[derive(Clone)]
pub enum RateFn {
    Native {
        func: Arc<NativeFn>,
        arity: Option<usize>,
    },
    Expression { source: String, expr: Expr },
}

impl RateFn {
    /// Wraps a native function or closure taking any number of arguments.
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        RateFn::Native {
            func: Arc::new(f),
            arity: None,
        }
    }

    /// Wraps a native function that must be called with exactly `arity` arguments.
    pub fn native_with_arity<F>(f: F, arity: usize) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        RateFn::Native {
            func: Arc::new(f),
            arity: Some(arity),
        }
    }

    /// Declared argument count of a native function.
    pub fn arity(&self) -> Option<usize> {
        match self {
            RateFn::Native { arity, .. } => *arity,
            RateFn::Expression { .. } => None,
        }
    }

    /// Fails if the function declares an argument count other than `given`.
    pub fn check_arity(&self, name: &str, given: usize) -> Result<(), ModelError> {
        match self.arity() {
            Some(expected) if expected != given => Err(ModelError::ArityMismatch {
                name: name.to_string(),
                expected,
                actual: given,
            }),
            _ => Ok(()),
        }
    }

    /// Parses an arithmetic expression such as `"vmax * s / (km + s)"`.
    pub fn expression(source: &str) -> Result<Self, ModelError> {
        let expr = Expr::from_str(source).map_err(|e| ModelError::Expression {
            expression: source.to_string(),
            message: e.to_string(),
        })?;

        Ok(RateFn::Expression {
            source: source.to_string(),
            expr,
        })
    }

    /// Names referenced by an expression, in order of first appearance.
    ///
    /// Native functions carry no names, so an empty list is returned for them.
    pub fn symbols(&self) -> Vec<String> {
        match self {
            RateFn::Native { .. } => Vec::new(),
            RateFn::Expression { source, .. } => extract_symbols(source),
        }
    }

    /// Evaluates the function.
    ///
    /// `names` and `values` are parallel slices holding the entity's argument names
    /// and their current values. Native functions only look at the values.
    pub fn call(&self, names: &[String], values: &[f64]) -> Result<f64, ModelError> {
        match self {
            RateFn::Native { func, arity } => match arity {
                Some(expected) if *expected != values.len() => Err(ModelError::ArityMismatch {
                    name: "native function".to_string(),
                    expected: *expected,
                    actual: values.len(),
                }),
                _ => Ok(func(values)),
            },
            RateFn::Expression { source, expr } => {
                let context = ArgsContext { names, values };
                expr.eval_with_context((context, Context::new()))
                    .map_err(|e| ModelError::Expression {
                        expression: source.clone(),
                        message: e.to_string(),
                    })
            }
        }
    }
}

impl fmt::Debug for RateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateFn::Native { arity: None, .. } => write!(f, "RateFn::Native"),
            RateFn::Native {
                arity: Some(arity), ..
            } => write!(f, "RateFn::Native({arity} args)"),
            RateFn::Expression { source, .. } => write!(f, "RateFn::Expression({source})"),
        }
    }
}

/// Conversion into a [`RateFn`].
///
/// `Marker` only tells the implementations apart and is inferred at the call site:
/// closures over `&[f64]` become variadic native functions, functions over `[f64; N]`
/// native functions of arity `N`.
pub trait IntoRateFn<Marker> {
    fn into_rate_fn(self) -> RateFn;
}

/// Marker for functions over a slice of any length.
pub struct Variadic;

/// Marker for functions over exactly `N` arguments.
pub struct Fixed<const N: usize>;

impl IntoRateFn<RateFn> for RateFn {
    fn into_rate_fn(self) -> RateFn {
        self
    }
}

impl<F> IntoRateFn<Variadic> for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
{
    fn into_rate_fn(self) -> RateFn {
        RateFn::native(self)
    }
}

impl<F, const N: usize> IntoRateFn<Fixed<N>> for F
where
    F: Fn([f64; N]) -> f64 + Send + Sync + 'static,
{
    fn into_rate_fn(self) -> RateFn {
        let call = move |args: &[f64]| match <[f64; N]>::try_from(args) {
            Ok(args) => self(args),
            Err(_) => f64::NAN,
        };
        RateFn::native_with_arity(call, N)
    }
}

/// Resolves expression variables against the argument slices of one evaluation.
struct ArgsContext<'a> {
    names: &'a [String],
    values: &'a [f64],
}

impl ContextProvider for ArgsContext<'_> {
    fn get_var(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

fn extract_symbols(source: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();

    for capture in SYMBOL_PATTERN.captures_iter(source) {
        // Numeric literals match without the identifier group, a trailing
        // parenthesis marks a function call
        let Some(symbol) = capture.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if capture.get(2).is_some() {
            continue;
        }

        if BUILTIN_CONSTANTS.contains(&symbol) || symbols.iter().any(|s| s == symbol) {
            continue;
        }

        symbols.push(symbol.to_string());
    }

    symbols
}
