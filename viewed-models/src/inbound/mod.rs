//! Inbound adapters: how views reach the registry and how operators drive
//! maintenance.
//!
//! - **manifest**: JSON view manifest loading and SQL template validation.
//! - **config**: OrthoConfig-backed settings shared by the binaries.
//! - **cli**: clap argument types and the entry points behind
//!   `recreate-views` and `refresh-views`.

pub mod cli;
pub mod config;
pub mod manifest;
