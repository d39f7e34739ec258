//! Refresh materialized views in dependency order.
//!
//! Optionally sets planner statistics and runs `VACUUM ANALYZE` afterwards.

use std::ffi::OsString;
use std::io;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use ortho_config::OrthoConfig;
use viewed_models::inbound::cli::{RefreshArgs, init_tracing, refresh, write_statements};
use viewed_models::inbound::config::ViewSettings;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = RefreshArgs::parse();
    let settings = ViewSettings::load_from_iter([OsString::from("refresh-views")])
        .map_err(|error| eyre!("failed to load configuration: {error}"))?;
    init_tracing(settings.log_format());

    let report = refresh(&args, &settings)?;
    if args.common.dry_run {
        write_statements(io::stdout().lock(), report.statements())
            .wrap_err("failed to write statements")?;
    }
    Ok(())
}
