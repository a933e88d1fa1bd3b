//! Helpers for values that are expected but structurally optional.
//!
//! Accessors such as [`Simulator::get_concs`](crate::simulation::simulator::Simulator::get_concs)
//! return `Option` so callers can check for missing results. Code paths that already
//! guarantee presence use [`unwrap`] and [`unwrap2`] to turn a missing value into a
//! descriptive error.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unexpected None: {0}")]
pub struct UnexpectedNone(pub String);

/// Returns the contained value or an [`UnexpectedNone`] naming `what`.
///
/// # Examples
///
/// ```
/// use modelbase::utils::unwrap;
///
/// assert_eq!(unwrap(Some(1), "value"), Ok(1));
/// assert!(unwrap::<i32>(None, "value").is_err());
/// ```
pub fn unwrap<T>(value: Option<T>, what: &str) -> Result<T, UnexpectedNone> {
    value.ok_or_else(|| UnexpectedNone(what.to_string()))
}

/// Like [`unwrap`] for a pair in which both values must be present.
pub fn unwrap2<A, B>(values: (Option<A>, Option<B>), what: &str) -> Result<(A, B), UnexpectedNone> {
    match values {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(UnexpectedNone(what.to_string())),
    }
}
