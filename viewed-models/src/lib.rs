//! Dependency-ordered lifecycle management for PostgreSQL views.
//!
//! View definitions declare the tables and views they read. The crate orders
//! them so dependencies are always created before their dependents and
//! dropped after them, and maintains materialized views: refresh, vacuum,
//! planner statistics and a JSON comment recording the last refresh.
//!
//! - [`domain`]: name resolution, scheduling, rendering and orchestration.
//! - [`outbound`]: the PostgreSQL adapter behind the `ViewStore` port.
//! - [`inbound`]: manifest loading, configuration and command-line support.

pub mod domain;
pub mod inbound;
pub mod outbound;
