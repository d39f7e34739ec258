//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL-backed [`crate::domain::ports::ViewStore`]
//!   using the synchronous `postgres` client.
//!
//! Adapters are thin translators between domain statements and the driver.
//! They contain no scheduling or rendering logic.

pub mod persistence;
