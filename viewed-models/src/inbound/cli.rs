//! Command-line support for the view maintenance binaries.
//!
//! The binaries parse arguments and delegate to these functions so the
//! behaviour can be exercised in tests without spawning a process or
//! connecting to a database.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Parser};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use super::config::{LogFormat, ViewSettings};
use super::manifest::{ManifestError, load_registry};
use crate::domain::{
    ExecutionOptions, RecordingViewStore, Scope, SqlParam, SqlStatement, ViewError,
    ViewOrchestrator, ViewRegistry, ViewStore,
};
use crate::outbound::persistence::PostgresViewStore;

/// Errors surfaced by the command-line entry points.
#[derive(Debug, Error)]
pub enum CliError {
    /// No manifest path was given on the command line or in the settings.
    #[error("no view manifest configured; pass --registry or set VIEWED_MODELS_REGISTRY_PATH")]
    MissingRegistry,

    /// No connection string was found.
    #[error(
        "no database configured; pass --database-url or set \
         VIEWED_MODELS_DATABASE_URL or DATABASE_URL"
    )]
    MissingDatabaseUrl,

    /// The manifest could not be loaded.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Scheduling, rendering or execution failed.
    #[error(transparent)]
    View(#[from] ViewError),
}

/// Arguments shared by both binaries.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Path to the JSON view manifest.
    #[arg(long = "registry", value_name = "PATH")]
    pub registry: Option<PathBuf>,

    /// `all` or a comma separated list of namespaces.
    #[arg(long = "apps", value_name = "SCOPE", default_value = "all")]
    pub apps: Scope,

    /// PostgreSQL connection string.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Print the statements instead of executing them.
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

/// Drop and recreate every view in dependency order.
#[derive(Debug, Clone, Parser)]
#[command(name = "recreate-views", version, about)]
pub struct RecreateArgs {
    /// Shared arguments.
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Refresh materialized views in dependency order.
#[derive(Debug, Clone, Parser)]
#[command(name = "refresh-views", version, about)]
pub struct RefreshArgs {
    /// Shared arguments.
    #[command(flatten)]
    pub common: CommonArgs,

    /// Run `VACUUM ANALYZE` on every materialized view after refreshing.
    #[arg(long = "vacuum")]
    pub vacuum: bool,

    /// Override each view's `CONCURRENTLY` setting.
    #[arg(long = "concurrently", value_name = "BOOL")]
    pub concurrently: Option<bool>,

    /// Set this planner statistics target on every materialized column.
    #[arg(long = "statistics", value_name = "TARGET")]
    pub statistics: Option<i32>,
}

/// Statements produced by a refresh run, per phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    /// `REFRESH MATERIALIZED VIEW` statements.
    pub refreshed: Vec<SqlStatement>,
    /// `ALTER ... SET STATISTICS` statements.
    pub statistics: Vec<SqlStatement>,
    /// `VACUUM ANALYZE` statements.
    pub vacuumed: Vec<SqlStatement>,
}

impl RefreshReport {
    /// Every statement in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &SqlStatement> {
        self.refreshed
            .iter()
            .chain(&self.statistics)
            .chain(&self.vacuumed)
    }
}

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(io::stderr);
    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    if let Err(e) = result {
        warn!(error = %e, "tracing init failed");
    }
}

/// Recreate every in-scope view.
///
/// Dry runs render against an in-memory store and never connect.
///
/// # Errors
///
/// Returns [`CliError`] when configuration is missing, the manifest is
/// invalid or any view operation fails.
pub fn recreate(
    args: &RecreateArgs,
    settings: &ViewSettings,
) -> Result<Vec<SqlStatement>, CliError> {
    let registry = load_registry(&registry_path(&args.common, settings)?)?;
    if args.common.dry_run {
        return recreate_with(&registry, RecordingViewStore::new(), &args.common.apps);
    }
    let store = connect(&args.common, settings)?;
    recreate_with(&registry, store, &args.common.apps)
}

/// Recreate every view in `scope` against `store`.
///
/// # Errors
///
/// Returns [`CliError::View`] when scheduling or execution fails.
pub fn recreate_with<S: ViewStore>(
    registry: &ViewRegistry,
    store: S,
    scope: &Scope,
) -> Result<Vec<SqlStatement>, CliError> {
    let statements = ViewOrchestrator::new(registry, store).recreate(scope)?;
    info!(%scope, statements = statements.len(), "recreate finished");
    Ok(statements)
}

/// Refresh, and optionally analyse and vacuum, every in-scope materialized
/// view.
///
/// Dry runs render against an in-memory store and never connect.
///
/// # Errors
///
/// Returns [`CliError`] when configuration is missing, the manifest is
/// invalid or any view operation fails.
pub fn refresh(args: &RefreshArgs, settings: &ViewSettings) -> Result<RefreshReport, CliError> {
    let registry = load_registry(&registry_path(&args.common, settings)?)?;
    if args.common.dry_run {
        return refresh_with(&registry, RecordingViewStore::new(), args);
    }
    let store = connect(&args.common, settings)?;
    refresh_with(&registry, store, args)
}

/// Run the refresh phases requested by `args` against `store`.
///
/// # Errors
///
/// Returns [`CliError::View`] when scheduling or execution fails.
pub fn refresh_with<S: ViewStore>(
    registry: &ViewRegistry,
    store: S,
    args: &RefreshArgs,
) -> Result<RefreshReport, CliError> {
    let scope = &args.common.apps;
    let options = ExecutionOptions {
        dry_run: args.common.dry_run,
        concurrently: args.concurrently,
        ..ExecutionOptions::default()
    };
    let mut orchestrator = ViewOrchestrator::new(registry, store);

    let refreshed = orchestrator.refresh_all(scope, &options)?;
    let statistics = args
        .statistics
        .map(|target| orchestrator.set_statistics(scope, target, &options))
        .transpose()?
        .unwrap_or_default();
    let vacuumed = if args.vacuum {
        orchestrator.vacuum_all(scope, &options)?
    } else {
        Vec::new()
    };

    info!(
        %scope,
        refreshed = refreshed.len(),
        statistics = statistics.len(),
        vacuumed = vacuumed.len(),
        "refresh finished"
    );
    Ok(RefreshReport {
        refreshed,
        statistics,
        vacuumed,
    })
}

/// Write statements to `out`, one per line, terminated with `;`.
///
/// Parameters follow as a trailing `-- params: $1 = ...` comment.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_statements<'a, W, I>(mut out: W, statements: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a SqlStatement>,
{
    for statement in statements {
        write!(out, "{statement};")?;
        if let Some(params) = statement.params().filter(|params| !params.is_empty()) {
            write!(out, " -- params: {}", describe_params(params))?;
        }
        writeln!(out)?;
    }
    out.flush()
}

fn describe_params(params: &[SqlParam]) -> String {
    params
        .iter()
        .zip(1_usize..)
        .map(|(param, position)| format!("${position} = {param}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn registry_path(common: &CommonArgs, settings: &ViewSettings) -> Result<PathBuf, CliError> {
    common
        .registry
        .clone()
        .or_else(|| settings.registry_path.clone())
        .ok_or(CliError::MissingRegistry)
}

fn database_url(common: &CommonArgs, settings: &ViewSettings) -> Result<String, CliError> {
    common
        .database_url
        .clone()
        .or_else(|| settings.database_url())
        .ok_or(CliError::MissingDatabaseUrl)
}

fn connect(common: &CommonArgs, settings: &ViewSettings) -> Result<PostgresViewStore, CliError> {
    let url = database_url(common, settings)?;
    PostgresViewStore::connect(&url).map_err(|error| CliError::View(error.into()))
}
