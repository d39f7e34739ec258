//! Error taxonomy for view scheduling, rendering and maintenance.
//!
//! Every variant is fatal to the operation that raised it. Nothing in this
//! crate retries; engine failures are logged by the caller with the statement
//! text and surfaced unchanged.

use thiserror::Error;

use super::identifier::{CanonicalIdentifier, EntityRef};
use super::ports::ViewStoreError;

/// Errors raised while resolving, scheduling or rendering view definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    /// No entity has been registered under the namespace.
    #[error("namespace '{namespace}' not found")]
    NamespaceNotFound {
        /// Requested namespace.
        namespace: String,
    },

    /// The namespace exists but does not contain the entity.
    #[error("entity '{entity}' not found in namespace '{namespace}'")]
    EntityNotFound {
        /// Requested namespace.
        namespace: String,
        /// Requested entity name.
        entity: String,
    },

    /// A declared dependency could not be resolved.
    #[error("dependency {dependency} of view {definition} could not be resolved")]
    DependencyResolution {
        /// Definition declaring the dependency.
        definition: EntityRef,
        /// Unresolved dependency reference.
        dependency: EntityRef,
        /// Underlying lookup failure.
        #[source]
        source: Box<Self>,
    },

    /// The dependency graph is not acyclic.
    #[error("dependency cycle detected between views: {}", join_identifiers(.members))]
    Cycle {
        /// Members of one cycle, in dependency order.
        members: Vec<CanonicalIdentifier>,
    },

    /// The view definition has no body renderer.
    #[error("view {view} does not define a SQL body")]
    UnimplementedBody {
        /// Canonical identifier of the definition.
        view: CanonicalIdentifier,
    },

    /// Two registrations resolve to the same canonical identifier.
    #[error("{incoming} resolves to identifier '{identifier}' already used by {existing}")]
    DuplicateIdentifier {
        /// Identifier shared by both registrations.
        identifier: CanonicalIdentifier,
        /// Entity registered first.
        existing: EntityRef,
        /// Entity whose registration was rejected.
        incoming: EntityRef,
    },

    /// A scope string named no namespaces.
    #[error("scope '{raw}' names no namespaces; use 'all' or a comma separated list")]
    InvalidScope {
        /// Raw scope text.
        raw: String,
    },

    /// View metadata could not be serialised into a comment.
    #[error("metadata for view {view} could not be serialised: {message}")]
    Metadata {
        /// Canonical identifier of the view.
        view: CanonicalIdentifier,
        /// Serialiser description.
        message: String,
    },

    /// The storage engine rejected an operation.
    #[error(transparent)]
    Store(#[from] ViewStoreError),
}

fn join_identifiers(members: &[CanonicalIdentifier]) -> String {
    members
        .iter()
        .map(CanonicalIdentifier::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
