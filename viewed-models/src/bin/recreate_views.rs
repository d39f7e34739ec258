//! Drop and recreate every managed view in dependency order.
//!
//! Delegates to `viewed_models::inbound::cli` so the behaviour is testable
//! without spawning a process.

use std::ffi::OsString;
use std::io;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use ortho_config::OrthoConfig;
use viewed_models::inbound::cli::{RecreateArgs, init_tracing, recreate, write_statements};
use viewed_models::inbound::config::ViewSettings;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = RecreateArgs::parse();
    let settings = ViewSettings::load_from_iter([OsString::from("recreate-views")])
        .map_err(|error| eyre!("failed to load configuration: {error}"))?;
    init_tracing(settings.log_format());

    let statements = recreate(&args, &settings)?;
    if args.common.dry_run {
        write_statements(io::stdout().lock(), &statements)
            .wrap_err("failed to write statements")?;
    }
    Ok(())
}
