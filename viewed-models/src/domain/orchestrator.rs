//! Batch operations over every view in a scope.
//!
//! The orchestrator schedules in-scope definitions, renders them in
//! dependency order and drives a [`ViewStore`]. `recreate`, `refresh_all` and
//! `set_statistics` run as one atomic unit; `vacuum_all` cannot run inside a
//! transaction block and executes each statement independently.

use tracing::{debug, info, instrument};

use super::definition::ViewDefinition;
use super::error::ViewError;
use super::graph::DependencyGraph;
use super::maintenance::ViewMaintenance;
use super::ports::{StatementExecutor, ViewStore};
use super::registry::ViewRegistry;
use super::schedule::flatten;
use super::scope::Scope;
use super::statement::{ExecutionOptions, SqlStatement};

/// Coordinates view maintenance over a registry and a store.
///
/// # Examples
///
/// ```rust
/// use viewed_models::domain::{
///     DependencyTables, RecordingViewStore, Scope, ViewDefinition, ViewOrchestrator,
///     ViewRegistry,
/// };
/// use viewed_models::domain::BaseTable;
///
/// let mut registry = ViewRegistry::new();
/// registry
///     .register_table(BaseTable::new("shop", "orders"))
///     .expect("table")
///     .register_view(
///         ViewDefinition::view("shop", "recent")
///             .depends_on("shop", "orders")
///             .with_body(|tables: &DependencyTables| {
///                 format!("SELECT * FROM {}", tables.table("shop", "orders"))
///             }),
///     )
///     .expect("view");
///
/// let mut orchestrator = ViewOrchestrator::new(&registry, RecordingViewStore::new());
/// let executed = orchestrator.recreate(&Scope::All).expect("recreated");
/// assert_eq!(executed.len(), 2);
/// ```
#[derive(Debug)]
pub struct ViewOrchestrator<'r, S> {
    maintenance: ViewMaintenance<'r>,
    store: S,
}

impl<'r, S: ViewStore> ViewOrchestrator<'r, S> {
    /// Orchestrator resolving names through `registry` and executing against
    /// `store`.
    pub const fn new(registry: &'r ViewRegistry, store: S) -> Self {
        Self {
            maintenance: ViewMaintenance::new(registry),
            store,
        }
    }

    /// Per-view operations bound to the same registry.
    #[must_use]
    pub const fn maintenance(&self) -> ViewMaintenance<'r> {
        self.maintenance
    }

    /// Borrow the store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Mutably borrow the store, e.g. for single-view maintenance.
    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Release the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// In-scope concrete definitions ordered so every dependency precedes its
    /// dependents.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::DependencyResolution`] when a declared dependency
    /// does not exist and [`ViewError::Cycle`] when the dependencies are
    /// cyclic.
    pub fn schedule(&self, scope: &Scope) -> Result<Vec<&'r ViewDefinition>, ViewError> {
        let registry = self.maintenance.registry();
        let definitions = registry.discover(scope);
        let graph = DependencyGraph::build(registry, &definitions)?;
        let scheduled: Vec<&'r ViewDefinition> = flatten(&graph)?
            .iter()
            .filter(|identifier| graph.dependencies(identifier).is_some())
            .filter_map(|identifier| registry.view(identifier))
            .collect();
        debug!(
            %scope,
            views = ?scheduled.iter().map(|view| view.entity().to_string()).collect::<Vec<_>>(),
            "views scheduled"
        );
        Ok(scheduled)
    }

    /// Drop every in-scope view, dependents first, without `CASCADE`.
    ///
    /// # Errors
    ///
    /// Returns scheduling errors and the first engine failure. Statements
    /// already executed stay executed.
    #[instrument(skip(self, scope), fields(scope = %scope))]
    pub fn plan_drop(
        &mut self,
        scope: &Scope,
        dry_run: bool,
    ) -> Result<Vec<SqlStatement>, ViewError> {
        let schedule = self.schedule(scope)?;
        drop_in_reverse(self.maintenance, &mut self.store, &schedule, dry_run)
    }

    /// Create every in-scope view, dependencies first.
    ///
    /// # Errors
    ///
    /// Returns scheduling and rendering errors and the first engine failure.
    /// Statements already executed stay executed.
    #[instrument(skip(self, scope), fields(scope = %scope))]
    pub fn plan_create(
        &mut self,
        scope: &Scope,
        dry_run: bool,
    ) -> Result<Vec<SqlStatement>, ViewError> {
        let schedule = self.schedule(scope)?;
        create_in_order(self.maintenance, &mut self.store, &schedule, dry_run)
    }

    /// Drop then create every in-scope view in one transaction.
    ///
    /// Returns the executed batch. On failure nothing is committed.
    ///
    /// # Errors
    ///
    /// Returns scheduling and rendering errors and the first engine failure.
    #[instrument(skip(self, scope), fields(scope = %scope))]
    pub fn recreate(&mut self, scope: &Scope) -> Result<Vec<SqlStatement>, ViewError> {
        let schedule = self.schedule(scope)?;
        let maintenance = self.maintenance;
        let mut executed = Vec::with_capacity(schedule.len().saturating_mul(2));
        self.store.atomically(&mut |executor: &mut dyn StatementExecutor| {
            executed = drop_in_reverse(maintenance, executor, &schedule, false)?;
            executed.extend(create_in_order(maintenance, executor, &schedule, false)?);
            Ok(())
        })?;
        info!(statements = executed.len(), "views recreated");
        Ok(executed)
    }

    /// Refresh every in-scope materialized view in dependency order, in one
    /// transaction. Refreshes declined by a policy produce no statement.
    ///
    /// # Errors
    ///
    /// Returns scheduling errors and the first engine or metadata failure.
    #[instrument(skip(self, scope, options), fields(scope = %scope))]
    pub fn refresh_all(
        &mut self,
        scope: &Scope,
        options: &ExecutionOptions,
    ) -> Result<Vec<SqlStatement>, ViewError> {
        let materialized = self.materialized_schedule(scope)?;
        let maintenance = self.maintenance;
        let mut refreshed = Vec::with_capacity(materialized.len());
        self.store.atomically(&mut |executor: &mut dyn StatementExecutor| {
            refreshed.clear();
            for view in &materialized {
                if let Some(statement) = maintenance.refresh(executor, view, options)? {
                    refreshed.push(statement);
                }
            }
            Ok(())
        })?;
        info!(
            refreshed = refreshed.len(),
            skipped = materialized.len().saturating_sub(refreshed.len()),
            "materialized views refreshed"
        );
        Ok(refreshed)
    }

    /// `VACUUM ANALYZE` every in-scope materialized view outside a
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns scheduling errors and the first engine failure. Views already
    /// vacuumed stay vacuumed.
    #[instrument(skip(self, scope, options), fields(scope = %scope))]
    pub fn vacuum_all(
        &mut self,
        scope: &Scope,
        options: &ExecutionOptions,
    ) -> Result<Vec<SqlStatement>, ViewError> {
        let materialized = self.materialized_schedule(scope)?;
        let mut vacuumed = Vec::with_capacity(materialized.len());
        for view in materialized {
            if let Some(statement) = self.maintenance.vacuum(&mut self.store, view, options)? {
                vacuumed.push(statement);
            }
        }
        Ok(vacuumed)
    }

    /// Set the planner statistics target on every column of every in-scope
    /// materialized view, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns scheduling errors and the first engine failure.
    #[instrument(skip(self, scope, options), fields(scope = %scope))]
    pub fn set_statistics(
        &mut self,
        scope: &Scope,
        target: i32,
        options: &ExecutionOptions,
    ) -> Result<Vec<SqlStatement>, ViewError> {
        let materialized = self.materialized_schedule(scope)?;
        let maintenance = self.maintenance;
        let mut altered = Vec::new();
        self.store.atomically(&mut |executor: &mut dyn StatementExecutor| {
            altered.clear();
            for view in &materialized {
                altered.extend(maintenance.set_statistics(executor, view, target, options)?);
            }
            Ok(())
        })?;
        Ok(altered)
    }

    fn materialized_schedule(&self, scope: &Scope) -> Result<Vec<&'r ViewDefinition>, ViewError> {
        Ok(self
            .schedule(scope)?
            .into_iter()
            .filter(|view| view.is_materialized())
            .collect())
    }
}

fn drop_in_reverse(
    maintenance: ViewMaintenance<'_>,
    executor: &mut dyn StatementExecutor,
    schedule: &[&ViewDefinition],
    dry_run: bool,
) -> Result<Vec<SqlStatement>, ViewError> {
    let options = ExecutionOptions {
        dry_run,
        drop_cascade: false,
        ..ExecutionOptions::default()
    };
    schedule
        .iter()
        .rev()
        .map(|view| maintenance.drop_view(executor, view, &options))
        .collect()
}

fn create_in_order(
    maintenance: ViewMaintenance<'_>,
    executor: &mut dyn StatementExecutor,
    schedule: &[&ViewDefinition],
    dry_run: bool,
) -> Result<Vec<SqlStatement>, ViewError> {
    let options = ExecutionOptions {
        dry_run,
        drop_cascade: false,
        ..ExecutionOptions::default()
    };
    let mut statements = Vec::with_capacity(schedule.len());
    for view in schedule {
        statements.extend(maintenance.create_view(executor, view, &options)?);
    }
    Ok(statements)
}
