//! Dependency ordering of derived model quantities.
//!
//! Items are named quantities whose values are computed from other names. Only edges
//! that land on another item are followed; everything else (parameters, variables,
//! time) is treated as an external leaf that is always available.
//!
//! The order is produced by a depth-first post-order traversal. A node that is reached
//! again while it is still being visited closes a cycle, which is reported with the
//! name of the node that closed it. Unrelated items keep their insertion order.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::model::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Temporary,
    Permanent,
}

/// Sorts all items so that each appears after every item it depends on.
///
/// # Arguments
///
/// * `items` - Map of item name to the names it depends on, in insertion order
///
/// # Returns
///
/// The names of all items in evaluation order, or [`ModelError::Cycle`] naming the
/// first item found on a cycle.
pub fn sort_dependencies(items: &IndexMap<String, Vec<String>>) -> Result<Vec<String>, ModelError> {
    let targets: Vec<&str> = items.keys().map(String::as_str).collect();
    sort_subset(items, &targets)
}

/// Sorts only the requested targets plus the transitive closure of items they need.
///
/// Targets that are not items themselves are ignored, so callers can pass argument
/// lists that mix parameters, variables and derived names.
pub fn sort_subset<S: AsRef<str>>(
    items: &IndexMap<String, Vec<String>>,
    targets: &[S],
) -> Result<Vec<String>, ModelError> {
    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(items.len());
    let mut order = Vec::with_capacity(items.len());

    for target in targets {
        if let Some((name, _)) = items.get_key_value(target.as_ref()) {
            visit(name.as_str(), items, &mut marks, &mut order)?;
        }
    }

    Ok(order)
}

fn visit<'a>(
    name: &'a str,
    items: &'a IndexMap<String, Vec<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<String>,
) -> Result<(), ModelError> {
    match marks.get(name) {
        Some(Mark::Permanent) => return Ok(()),
        Some(Mark::Temporary) => return Err(ModelError::Cycle(name.to_string())),
        None => {}
    }

    marks.insert(name, Mark::Temporary);

    if let Some(dependencies) = items.get(name) {
        for dependency in dependencies {
            if let Some((dep_name, _)) = items.get_key_value(dependency.as_str()) {
                visit(dep_name.as_str(), items, marks, order)?;
            }
        }
    }

    marks.insert(name, Mark::Permanent);
    order.push(name.to_string());

    Ok(())
}
