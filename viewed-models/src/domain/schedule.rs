//! Topological flattening of a [`DependencyGraph`].
//!
//! Nodes are emitted level by level. A level holds every node whose
//! dependencies have all been emitted; within a level nodes are sorted, so the
//! same graph always yields the same order.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::error::ViewError;
use super::graph::DependencyGraph;
use super::identifier::CanonicalIdentifier;

/// Order every node and dependency so each precedes its dependents.
///
/// Dependencies that are not nodes of the graph (base tables, out-of-scope
/// views) are emitted too; callers filter them against the definitions they
/// manage.
///
/// # Errors
///
/// Returns [`ViewError::Cycle`] naming the members of one cycle when the
/// graph is not acyclic. No partial order is returned.
pub fn flatten(graph: &DependencyGraph) -> Result<Vec<CanonicalIdentifier>, ViewError> {
    let mut pending: BTreeMap<&CanonicalIdentifier, BTreeSet<&CanonicalIdentifier>> =
        BTreeMap::new();
    for (node, dependencies) in graph.iter() {
        pending.entry(node).or_default().extend(dependencies.iter());
        for dependency in dependencies {
            pending.entry(dependency).or_default();
        }
    }

    let mut order = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let level: BTreeSet<&CanonicalIdentifier> = pending
            .iter()
            .filter(|(_, dependencies)| dependencies.is_empty())
            .map(|(node, _)| *node)
            .collect();
        if level.is_empty() {
            let members = find_cycle(&pending);
            debug!(cycle = ?members, "dependency graph is cyclic");
            return Err(ViewError::Cycle { members });
        }
        for node in &level {
            pending.remove(*node);
        }
        for dependencies in pending.values_mut() {
            dependencies.retain(|dependency| !level.contains(dependency));
        }
        order.extend(level.into_iter().cloned());
    }
    Ok(order)
}

/// Walk unresolved edges from the smallest remaining node until a node
/// repeats; the repeated suffix is a cycle.
///
/// Every remaining node has at least one remaining dependency, so the walk
/// always revisits a node.
fn find_cycle(
    pending: &BTreeMap<&CanonicalIdentifier, BTreeSet<&CanonicalIdentifier>>,
) -> Vec<CanonicalIdentifier> {
    let mut path: Vec<&CanonicalIdentifier> = Vec::new();
    let mut current = pending.keys().next().copied();
    while let Some(node) = current {
        if let Some(start) = path.iter().position(|seen| *seen == node) {
            let mut members: Vec<CanonicalIdentifier> =
                path.iter().skip(start).map(|member| (*member).clone()).collect();
            members.push(node.clone());
            return members;
        }
        path.push(node);
        current = pending
            .get(node)
            .and_then(|dependencies| dependencies.iter().next().copied());
    }
    path.into_iter().cloned().collect()
}
