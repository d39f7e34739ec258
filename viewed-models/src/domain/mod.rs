//! Domain primitives and services for dependency-ordered view maintenance.
//!
//! Purpose: resolve view and table names, order view definitions by their
//! dependencies, render DROP/CREATE/REFRESH statements and drive them through
//! the [`ports::ViewStore`] port.
//!
//! Public surface:
//! - ViewRegistry (alias to `registry::ViewRegistry`) — registered views and
//!   base tables; name resolution.
//! - ViewDefinition (alias to `definition::ViewDefinition`) — one plain or
//!   materialized view and its rendering.
//! - DependencyGraph and `flatten` — dependency ordering with cycle detection.
//! - ViewMaintenance — render-and-execute operations on a single view.
//! - ViewOrchestrator — batch drop/create/recreate/refresh/vacuum over a scope.

pub mod definition;
pub mod error;
pub mod graph;
pub mod identifier;
pub mod maintenance;
pub mod materialized;
pub mod orchestrator;
pub mod ports;
pub mod registry;
pub mod schedule;
pub mod scope;
pub mod statement;

pub use self::definition::{
    DependencyTables, Materialization, ViewBody, ViewDefinition, render_refresh,
    render_statistics, render_vacuum,
};
pub use self::error::ViewError;
pub use self::graph::DependencyGraph;
pub use self::identifier::{
    CanonicalIdentifier, EntityRef, POSTGRES_MAX_IDENTIFIER_LENGTH, quote_identifier,
};
pub use self::maintenance::ViewMaintenance;
pub use self::materialized::{
    AlwaysRefresh, MaterializedOptions, MinimumRefreshAge, RefreshPolicy, RefreshStatus,
    ViewMetadata,
};
pub use self::orchestrator::ViewOrchestrator;
pub use self::ports::{RecordingViewStore, StatementExecutor, ViewStore, ViewStoreError};
pub use self::registry::{BaseTable, EntityHandle, ViewRegistry};
pub use self::schedule::flatten;
pub use self::scope::Scope;
pub use self::statement::{ExecutionOptions, SqlParam, SqlStatement};
