//! Per-view render-and-execute operations.
//!
//! Every operation renders one statement, executes it unless the options ask
//! for a dry run, and returns what it rendered. Operations take the executor
//! explicitly so they run unchanged inside or outside a transaction.

use tracing::{debug, error, info, warn};

use super::definition::{ViewDefinition, render_refresh, render_statistics, render_vacuum};
use super::error::ViewError;
use super::identifier::CanonicalIdentifier;
use super::materialized::{RefreshPolicy, RefreshStatus, ViewMetadata};
use super::ports::StatementExecutor;
use super::registry::{EntityHandle, ViewRegistry};
use super::statement::{ExecutionOptions, SqlStatement};

/// Renders and executes statements for single view definitions.
#[derive(Debug, Clone, Copy)]
pub struct ViewMaintenance<'r> {
    registry: &'r ViewRegistry,
}

impl<'r> ViewMaintenance<'r> {
    /// Maintenance operations resolving names through `registry`.
    #[must_use]
    pub const fn new(registry: &'r ViewRegistry) -> Self {
        Self { registry }
    }

    /// Registry used for name resolution.
    #[must_use]
    pub const fn registry(&self) -> &'r ViewRegistry {
        self.registry
    }

    fn identifier(&self, view: &ViewDefinition) -> CanonicalIdentifier {
        self.registry.identifier_of(view.entity())
    }

    fn storage_name(&self, view: &ViewDefinition) -> String {
        self.registry.storage_name(EntityHandle::View(view))
    }

    /// Drop `view`, honouring `options.drop_cascade`.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Store`] when the engine rejects the statement.
    pub fn drop_view(
        &self,
        executor: &mut dyn StatementExecutor,
        view: &ViewDefinition,
        options: &ExecutionOptions,
    ) -> Result<SqlStatement, ViewError> {
        let statement = view.render_drop(&self.storage_name(view), options.drop_cascade);
        execute_unless_dry_run(executor, &statement, options.dry_run)?;
        Ok(statement)
    }

    /// Create `view`, dropping it first when `options.drop_first` is set.
    ///
    /// Returns the statements in execution order.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::DependencyResolution`] or
    /// [`ViewError::UnimplementedBody`] when the body cannot be rendered, and
    /// [`ViewError::Store`] when the engine rejects a statement.
    pub fn create_view(
        &self,
        executor: &mut dyn StatementExecutor,
        view: &ViewDefinition,
        options: &ExecutionOptions,
    ) -> Result<Vec<SqlStatement>, ViewError> {
        let tables = self.registry.dependency_tables(view)?;
        let create = view.render_create(&self.identifier(view), &self.storage_name(view), &tables)?;

        let mut statements = Vec::with_capacity(2);
        if options.drop_first {
            statements.push(self.drop_view(executor, view, options)?);
        }
        execute_unless_dry_run(executor, &create, options.dry_run)?;
        statements.push(create);
        Ok(statements)
    }

    /// Refresh a materialized view if its policy allows it.
    ///
    /// Returns `None` for plain views and for refreshes the policy declined.
    /// After a successful refresh the engine's current timestamp is merged
    /// into the view's metadata comment. Dry runs render the statement but
    /// neither execute it nor touch the metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Store`] when the engine rejects the refresh or a
    /// metadata read or write, and [`ViewError::Metadata`] when the metadata
    /// cannot be serialised.
    pub fn refresh(
        &self,
        executor: &mut dyn StatementExecutor,
        view: &ViewDefinition,
        options: &ExecutionOptions,
    ) -> Result<Option<SqlStatement>, ViewError> {
        let Some(materialized) = view.materialized_options() else {
            return Ok(None);
        };
        let identifier = self.identifier(view);
        let storage_name = self.storage_name(view);

        let policy = materialized.refresh_policy();
        let status = refresh_status(executor, &identifier, &storage_name, policy)?;
        if !policy.should_refresh(&status) {
            info!(
                view = %identifier,
                last_updated = status.metadata.as_ref().and_then(ViewMetadata::last_updated),
                "refresh skipped by policy"
            );
            return Ok(None);
        }

        let concurrently = options.concurrently.unwrap_or(materialized.concurrently());
        let statement = render_refresh(&storage_name, concurrently);
        if options.dry_run {
            return Ok(Some(statement));
        }
        execute(executor, &statement)?;
        self.write_metadata(executor, view)?;
        Ok(Some(statement))
    }

    /// `VACUUM ANALYZE` a materialized view; `None` for plain views.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Store`] when the engine rejects the statement.
    pub fn vacuum(
        &self,
        executor: &mut dyn StatementExecutor,
        view: &ViewDefinition,
        options: &ExecutionOptions,
    ) -> Result<Option<SqlStatement>, ViewError> {
        if !view.is_materialized() {
            return Ok(None);
        }
        let statement = render_vacuum(&self.storage_name(view));
        execute_unless_dry_run(executor, &statement, options.dry_run)?;
        Ok(Some(statement))
    }

    /// Set the planner statistics target on every column of a materialized
    /// view. Plain views yield no statements.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Store`] when the column listing or a statement
    /// fails.
    pub fn set_statistics(
        &self,
        executor: &mut dyn StatementExecutor,
        view: &ViewDefinition,
        target: i32,
        options: &ExecutionOptions,
    ) -> Result<Vec<SqlStatement>, ViewError> {
        if !view.is_materialized() {
            return Ok(Vec::new());
        }
        let storage_name = self.storage_name(view);
        let columns = executor.list_columns(&storage_name)?;
        let mut statements = Vec::with_capacity(columns.len());
        for column in columns {
            let statement = render_statistics(&storage_name, &column, target);
            execute_unless_dry_run(executor, &statement, options.dry_run)?;
            statements.push(statement);
        }
        Ok(statements)
    }

    /// Current metadata comment of `view`, if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Store`] when the catalog read fails.
    pub fn read_metadata(
        &self,
        executor: &mut dyn StatementExecutor,
        view: &ViewDefinition,
    ) -> Result<Option<ViewMetadata>, ViewError> {
        read_metadata(executor, &self.storage_name(view))
    }

    /// Merge the engine's current timestamp into the metadata of `view` as
    /// `last_updated` and store it back. Returns the stored metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Store`] when the engine fails and
    /// [`ViewError::Metadata`] when serialisation fails.
    pub fn write_metadata(
        &self,
        executor: &mut dyn StatementExecutor,
        view: &ViewDefinition,
    ) -> Result<ViewMetadata, ViewError> {
        let storage_name = self.storage_name(view);
        let mut metadata = read_metadata(executor, &storage_name)?.unwrap_or_default();
        metadata.set_last_updated(executor.current_timestamp()?);
        let comment = metadata.to_comment().map_err(|err| ViewError::Metadata {
            view: self.identifier(view),
            message: err.to_string(),
        })?;
        executor.write_comment(&storage_name, &comment)?;
        debug!(view = %self.identifier(view), %comment, "metadata written");
        Ok(metadata)
    }
}

fn read_metadata(
    executor: &mut dyn StatementExecutor,
    storage_name: &str,
) -> Result<Option<ViewMetadata>, ViewError> {
    let comment = executor.read_comment(storage_name)?;
    Ok(comment.as_deref().map(ViewMetadata::from_comment))
}

fn refresh_status(
    executor: &mut dyn StatementExecutor,
    identifier: &CanonicalIdentifier,
    storage_name: &str,
    policy: &dyn RefreshPolicy,
) -> Result<RefreshStatus, ViewError> {
    let metadata = read_metadata(executor, storage_name)?;
    let seconds_since_refresh = metadata
        .as_ref()
        .and_then(ViewMetadata::last_updated)
        .filter(|_| policy.needs_refresh_age())
        .and_then(|last_updated| refresh_age(executor, identifier, last_updated));
    Ok(RefreshStatus {
        metadata,
        seconds_since_refresh,
    })
}

/// An age the engine cannot compute reads as "never refreshed".
fn refresh_age(
    executor: &mut dyn StatementExecutor,
    identifier: &CanonicalIdentifier,
    last_updated: &str,
) -> Option<f64> {
    executor.seconds_since(last_updated).map_or_else(
        |err| {
            warn!(view = %identifier, last_updated, error = %err, "refresh age unavailable");
            None
        },
        Some,
    )
}

fn execute_unless_dry_run(
    executor: &mut dyn StatementExecutor,
    statement: &SqlStatement,
    dry_run: bool,
) -> Result<(), ViewError> {
    if dry_run {
        debug!(%statement, "dry run; statement not executed");
        return Ok(());
    }
    execute(executor, statement)
}

fn execute(
    executor: &mut dyn StatementExecutor,
    statement: &SqlStatement,
) -> Result<(), ViewError> {
    debug!(%statement, "executing statement");
    executor.execute(statement).map_err(|err| {
        error!(%statement, error = %err, "statement failed");
        ViewError::from(err)
    })
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::domain::materialized::MockRefreshPolicy;
    use crate::domain::ports::{MockStatementExecutor, RecordingViewStore, ViewStoreError};
    use crate::domain::registry::BaseTable;

    fn sales_body(tables: &crate::domain::DependencyTables) -> String {
        format!(
            "SELECT day, sum(total) AS total FROM {} GROUP BY day",
            tables.table("shop", "orders")
        )
    }

    #[fixture]
    fn registry() -> ViewRegistry {
        let mut registry = ViewRegistry::new();
        registry
            .register_table(BaseTable::new("shop", "orders"))
            .expect("table")
            .register_view(
                ViewDefinition::materialized("shop", "sales")
                    .depends_on("shop", "orders")
                    .with_body(sales_body),
            )
            .expect("sales")
            .register_view(
                ViewDefinition::view("shop", "recent")
                    .depends_on("shop", "orders")
                    .with_body(|tables: &crate::domain::DependencyTables| {
                        format!("SELECT * FROM {}", tables.table("shop", "orders"))
                    }),
            )
            .expect("recent");
        registry
    }

    fn view<'a>(registry: &'a ViewRegistry, entity: &str) -> &'a ViewDefinition {
        registry
            .lookup_entity("shop", entity)
            .expect("registered")
            .as_view()
            .expect("a view")
    }

    #[rstest]
    fn create_with_drop_first_emits_both_statements(registry: ViewRegistry) {
        let mut store = RecordingViewStore::new();
        let options = ExecutionOptions {
            drop_first: true,
            ..ExecutionOptions::default()
        };

        let statements = ViewMaintenance::new(&registry)
            .create_view(&mut store, view(&registry, "recent"), &options)
            .expect("created");

        assert_eq!(
            store.executed_sql(),
            vec![
                "DROP VIEW IF EXISTS \"shop_recent\" CASCADE",
                "CREATE VIEW \"shop_recent\" AS (SELECT * FROM \"shop_orders\")",
            ]
        );
        assert_eq!(statements.len(), 2);
    }

    #[rstest]
    fn dry_runs_do_not_execute(registry: ViewRegistry) {
        let mut store = RecordingViewStore::new();
        let statement = ViewMaintenance::new(&registry)
            .drop_view(&mut store, view(&registry, "sales"), &ExecutionOptions::dry_run())
            .expect("rendered");

        assert_eq!(statement.sql(), "DROP MATERIALIZED VIEW IF EXISTS \"shop_sales\" CASCADE");
        assert!(store.executed().is_empty());
    }

    #[rstest]
    fn refresh_executes_then_records_the_engine_clock(registry: ViewRegistry) {
        let mut executor = MockStatementExecutor::new();
        executor
            .expect_read_comment()
            .withf(|relation| relation == "shop_sales")
            .returning(|_| Ok(Some(r#"{"owner": "analytics"}"#.to_owned())));
        executor
            .expect_execute()
            .withf(|statement| {
                statement.sql() == "REFRESH MATERIALIZED VIEW CONCURRENTLY \"shop_sales\""
            })
            .times(1)
            .returning(|_| Ok(()));
        executor
            .expect_current_timestamp()
            .times(1)
            .returning(|| Ok("2024-05-01 10:00:00+00".to_owned()));
        executor
            .expect_write_comment()
            .withf(|relation, comment| {
                relation == "shop_sales"
                    && serde_json::from_str::<serde_json::Value>(comment).ok()
                        == Some(json!({
                            "owner": "analytics",
                            "last_updated": "2024-05-01 10:00:00+00",
                        }))
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let statement = ViewMaintenance::new(&registry)
            .refresh(&mut executor, view(&registry, "sales"), &ExecutionOptions::default())
            .expect("refreshed");
        assert!(statement.is_some());
    }

    #[rstest]
    fn failed_refreshes_leave_metadata_alone(registry: ViewRegistry) {
        let mut executor = MockStatementExecutor::new();
        executor.expect_read_comment().returning(|_| Ok(None));
        executor
            .expect_execute()
            .returning(|statement| Err(ViewStoreError::execution(statement.sql(), "lock timeout")));
        executor.expect_write_comment().never();

        let result = ViewMaintenance::new(&registry).refresh(
            &mut executor,
            view(&registry, "sales"),
            &ExecutionOptions::default(),
        );
        assert!(matches!(result, Err(ViewError::Store(ViewStoreError::Execution { .. }))));
    }

    fn registry_with_policy(policy: MockRefreshPolicy) -> ViewRegistry {
        let mut registry = ViewRegistry::new();
        registry
            .register_view(
                ViewDefinition::materialized("shop", "sales")
                    .with_body(|_: &crate::domain::DependencyTables| "SELECT 1".to_owned())
                    .with_refresh_policy(policy),
            )
            .expect("sales");
        registry
    }

    #[rstest]
    fn default_policy_never_asks_the_engine_for_an_age(registry: ViewRegistry) {
        let mut executor = MockStatementExecutor::new();
        executor
            .expect_read_comment()
            .returning(|_| Ok(Some(r#"{"last_updated": "never"}"#.to_owned())));
        executor.expect_seconds_since().never();
        executor.expect_execute().times(1).returning(|_| Ok(()));
        executor
            .expect_current_timestamp()
            .returning(|| Ok("2024-05-01 10:00:00+00".to_owned()));
        executor.expect_write_comment().times(1).returning(|_, _| Ok(()));

        let statement = ViewMaintenance::new(&registry)
            .refresh(&mut executor, view(&registry, "sales"), &ExecutionOptions::default())
            .expect("refreshed");
        assert!(statement.is_some());
    }

    #[rstest]
    fn unreadable_refresh_age_counts_as_never_refreshed() {
        let mut policy = MockRefreshPolicy::new();
        policy.expect_needs_refresh_age().return_const(true);
        policy
            .expect_should_refresh()
            .withf(|status| status.seconds_since_refresh.is_none() && status.metadata.is_some())
            .times(1)
            .return_const(true);
        let registry = registry_with_policy(policy);
        let mut executor = MockStatementExecutor::new();
        executor
            .expect_read_comment()
            .returning(|_| Ok(Some(r#"{"last_updated": "never"}"#.to_owned())));
        executor
            .expect_seconds_since()
            .withf(|timestamp| timestamp == "never")
            .times(1)
            .returning(|_| Err(ViewStoreError::query("unrecognised timestamp 'never'")));
        executor
            .expect_execute()
            .withf(|statement| {
                statement.sql() == "REFRESH MATERIALIZED VIEW CONCURRENTLY \"shop_sales\""
            })
            .times(1)
            .returning(|_| Ok(()));
        executor
            .expect_current_timestamp()
            .returning(|| Ok("2024-05-01 10:00:00+00".to_owned()));
        executor.expect_write_comment().times(1).returning(|_, _| Ok(()));

        let statement = ViewMaintenance::new(&registry)
            .refresh(&mut executor, view(&registry, "sales"), &ExecutionOptions::default())
            .expect("refreshed despite the unreadable age");
        assert!(statement.is_some());
    }

    #[rstest]
    fn declined_refreshes_produce_nothing() {
        let mut policy = MockRefreshPolicy::new();
        policy.expect_needs_refresh_age().return_const(true);
        policy
            .expect_should_refresh()
            .withf(|status| status.seconds_since_refresh == Some(12.0))
            .times(1)
            .return_const(false);
        let registry = registry_with_policy(policy);
        let mut store = RecordingViewStore::new()
            .with_comment("shop_sales", r#"{"last_updated": "2024-05-01 10:00:00+00"}"#)
            .with_seconds_since_refresh(12.0);

        let statement = ViewMaintenance::new(&registry)
            .refresh(&mut store, view(&registry, "sales"), &ExecutionOptions::default())
            .expect("no error");

        assert_eq!(statement, None);
        assert!(store.executed().is_empty());
    }

    #[rstest]
    #[case(None, "REFRESH MATERIALIZED VIEW CONCURRENTLY \"shop_sales\"")]
    #[case(Some(false), "REFRESH MATERIALIZED VIEW \"shop_sales\"")]
    fn concurrently_override(
        registry: ViewRegistry,
        #[case] concurrently: Option<bool>,
        #[case] expected: &str,
    ) {
        let mut store = RecordingViewStore::new();
        let options = ExecutionOptions {
            concurrently,
            dry_run: true,
            ..ExecutionOptions::default()
        };

        let statement = ViewMaintenance::new(&registry)
            .refresh(&mut store, view(&registry, "sales"), &options)
            .expect("rendered")
            .expect("materialized");

        assert_eq!(statement.sql(), expected);
        assert_eq!(store.comment("shop_sales"), None);
    }

    #[rstest]
    fn plain_views_are_not_refreshed_or_vacuumed(registry: ViewRegistry) {
        let mut store = RecordingViewStore::new();
        let maintenance = ViewMaintenance::new(&registry);
        let recent = view(&registry, "recent");

        assert_eq!(
            maintenance.refresh(&mut store, recent, &ExecutionOptions::default()).expect("ok"),
            None
        );
        assert_eq!(
            maintenance.vacuum(&mut store, recent, &ExecutionOptions::default()).expect("ok"),
            None
        );
        assert!(store.executed().is_empty());
    }

    #[rstest]
    fn metadata_round_trips_and_wraps_legacy_comments(registry: ViewRegistry) {
        let mut store = RecordingViewStore::new()
            .with_timestamp("2024-06-01 00:00:00+00")
            .with_comment("shop_sales", "hello");
        let maintenance = ViewMaintenance::new(&registry);
        let sales = view(&registry, "sales");

        let written = maintenance.write_metadata(&mut store, sales).expect("written");
        let read = maintenance.read_metadata(&mut store, sales).expect("read").expect("present");

        assert_eq!(read, written);
        assert_eq!(read.last_updated(), Some("2024-06-01 00:00:00+00"));
        assert_eq!(read.get("old_content"), Some(&json!("hello")));
    }

    #[rstest]
    fn missing_comments_read_as_none(registry: ViewRegistry) {
        let mut store = RecordingViewStore::new();
        let metadata = ViewMaintenance::new(&registry)
            .read_metadata(&mut store, view(&registry, "sales"))
            .expect("read");
        assert_eq!(metadata, None);
    }

    #[rstest]
    fn statistics_target_every_column(registry: ViewRegistry) {
        let mut store = RecordingViewStore::new().with_columns("shop_sales", ["day", "total"]);

        ViewMaintenance::new(&registry)
            .set_statistics(&mut store, view(&registry, "sales"), 500, &ExecutionOptions::default())
            .expect("altered");

        insta::assert_debug_snapshot!(store.executed_sql(), @r#"
        [
            "ALTER MATERIALIZED VIEW \"shop_sales\" ALTER COLUMN \"day\" SET STATISTICS 500",
            "ALTER MATERIALIZED VIEW \"shop_sales\" ALTER COLUMN \"total\" SET STATISTICS 500",
        ]
        "#);
    }
}
