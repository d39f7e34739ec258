//! Domain ports defining the edges of the hexagon.
//!
//! The only driven adapter this crate needs is the storage engine, so the
//! port surface is a single statement executor plus a transactional wrapper.

mod macros;
pub(crate) use macros::define_port_error;

mod view_store;

#[cfg(test)]
pub use view_store::MockStatementExecutor;
pub use view_store::{
    AtomicWork, RecordingViewStore, StatementExecutor, ViewStore, ViewStoreError,
};
