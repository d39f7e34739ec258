//! Dependency graph keyed by canonical identifier.

use std::collections::{BTreeMap, BTreeSet};

use super::definition::ViewDefinition;
use super::error::ViewError;
use super::identifier::CanonicalIdentifier;
use super::registry::ViewRegistry;

/// Map from each definition to the identifiers it depends on.
///
/// Dependencies on base tables or out-of-scope views appear as edges only;
/// they are not nodes of their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<CanonicalIdentifier, BTreeSet<CanonicalIdentifier>>,
}

impl DependencyGraph {
    /// Build the graph for `definitions`, resolving every declared
    /// dependency through `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::DependencyResolution`] for the first reference
    /// that cannot be resolved. No partial graph is produced.
    pub fn build(
        registry: &ViewRegistry,
        definitions: &[&ViewDefinition],
    ) -> Result<Self, ViewError> {
        let mut edges = BTreeMap::new();
        for definition in definitions {
            let mut dependencies = BTreeSet::new();
            for dependency in definition.dependencies() {
                registry.lookup(dependency).map_err(|source| ViewError::DependencyResolution {
                    definition: definition.entity().clone(),
                    dependency: dependency.clone(),
                    source: Box::new(source),
                })?;
                dependencies.insert(registry.identifier_of(dependency));
            }
            edges.insert(registry.identifier_of(definition.entity()), dependencies);
        }
        Ok(Self { edges })
    }

    /// Graph from explicit edges.
    #[must_use]
    pub fn from_edges<I, D>(edges: I) -> Self
    where
        I: IntoIterator<Item = (CanonicalIdentifier, D)>,
        D: IntoIterator<Item = CanonicalIdentifier>,
    {
        Self {
            edges: edges
                .into_iter()
                .map(|(node, dependencies)| (node, dependencies.into_iter().collect()))
                .collect(),
        }
    }

    /// Identifiers `node` depends on.
    #[must_use]
    pub fn dependencies(
        &self,
        node: &CanonicalIdentifier,
    ) -> Option<&BTreeSet<CanonicalIdentifier>> {
        self.edges.get(node)
    }

    /// Every node and its dependencies, in identifier order.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&CanonicalIdentifier, &BTreeSet<CanonicalIdentifier>)> {
        self.edges.iter()
    }

    /// Number of definitions in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has no definitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
