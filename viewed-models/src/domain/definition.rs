//! View definitions and their DROP/CREATE/REFRESH rendering.
//!
//! A definition is declared once at start-up and never mutated. Rendering is
//! pure: the physical name and resolved dependency tables are supplied by the
//! registry, and the body renderer turns them into the view's query.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::error::ViewError;
use super::identifier::{CanonicalIdentifier, EntityRef, quote_identifier};
use super::materialized::{MaterializedOptions, RefreshPolicy};
use super::statement::{SqlParam, SqlStatement};

/// Produces the query wrapped by `CREATE VIEW ... AS (...)`.
///
/// Closures of the shape `Fn(&DependencyTables) -> String` implement this
/// trait.
pub trait ViewBody: Send + Sync {
    /// Render the query given the quoted names of the declared dependencies.
    fn render(&self, tables: &DependencyTables) -> String;
}

impl<F> ViewBody for F
where
    F: Fn(&DependencyTables) -> String + Send + Sync,
{
    fn render(&self, tables: &DependencyTables) -> String {
        self(tables)
    }
}

/// Quoted physical names of a definition's dependencies, keyed by canonical
/// identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyTables {
    tables: BTreeMap<CanonicalIdentifier, String>,
    max_identifier_length: usize,
}

impl DependencyTables {
    pub(crate) const fn new(max_identifier_length: usize) -> Self {
        Self {
            tables: BTreeMap::new(),
            max_identifier_length,
        }
    }

    pub(crate) fn insert(&mut self, identifier: CanonicalIdentifier, quoted_name: String) {
        self.tables.insert(identifier, quoted_name);
    }

    /// Quoted physical name for a declared dependency.
    ///
    /// Falls back to the quoted canonical identifier when the pair was not
    /// declared, which matches the storage name of any entity that does not
    /// override it.
    #[must_use]
    pub fn table(&self, namespace: &str, entity: &str) -> String {
        let identifier = CanonicalIdentifier::resolve_with_limit(
            namespace,
            entity,
            self.max_identifier_length,
        );
        self.tables
            .get(&identifier)
            .cloned()
            .unwrap_or_else(|| quote_identifier(identifier.as_str()))
    }

    /// Quoted physical name keyed by canonical identifier.
    #[must_use]
    pub fn by_identifier(&self, identifier: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|(key, _)| key.as_str() == identifier)
            .map(|(_, name)| name.as_str())
    }

    /// Iterate over `(identifier, quoted name)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalIdentifier, &str)> {
        self.tables.iter().map(|(key, name)| (key, name.as_str()))
    }
}

/// Whether a definition renders a plain or a materialized view.
#[derive(Debug, Clone)]
pub enum Materialization {
    /// `CREATE VIEW`.
    Plain,
    /// `CREATE MATERIALIZED VIEW`, with refresh settings.
    Materialized(MaterializedOptions),
}

/// A named, dependency-aware view declaration.
#[derive(Clone)]
pub struct ViewDefinition {
    entity: EntityRef,
    table_name: Option<String>,
    dependencies: Vec<EntityRef>,
    body: Option<Arc<dyn ViewBody>>,
    params: Option<Vec<SqlParam>>,
    materialization: Materialization,
    is_abstract: bool,
}

impl ViewDefinition {
    /// Declare a plain view.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use viewed_models::domain::{DependencyTables, ViewDefinition};
    ///
    /// let view = ViewDefinition::view("reports", "active_projects")
    ///     .depends_on("aims", "project")
    ///     .with_body(|tables: &DependencyTables| {
    ///         format!("SELECT id FROM {} WHERE active", tables.table("aims", "project"))
    ///     });
    /// assert!(!view.is_materialized());
    /// ```
    #[must_use]
    pub fn view(namespace: impl AsRef<str>, entity: impl AsRef<str>) -> Self {
        Self {
            entity: EntityRef::new(namespace, entity),
            table_name: None,
            dependencies: Vec::new(),
            body: None,
            params: None,
            materialization: Materialization::Plain,
            is_abstract: false,
        }
    }

    /// Declare a materialized view, refreshed concurrently by default.
    #[must_use]
    pub fn materialized(namespace: impl AsRef<str>, entity: impl AsRef<str>) -> Self {
        Self {
            materialization: Materialization::Materialized(MaterializedOptions::default()),
            ..Self::view(namespace, entity)
        }
    }

    /// Add a dependency on another view or a base table.
    #[must_use]
    pub fn depends_on(mut self, namespace: impl AsRef<str>, entity: impl AsRef<str>) -> Self {
        self.dependencies.push(EntityRef::new(namespace, entity));
        self
    }

    /// Attach the body renderer.
    #[must_use]
    pub fn with_body(mut self, body: impl ViewBody + 'static) -> Self {
        self.body = Some(Arc::new(body));
        self
    }

    /// Store the view under `table_name` instead of its canonical identifier.
    #[must_use]
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Bind literal parameters referenced by the body as `$1`, `$2`, ...
    #[must_use]
    pub fn with_params(mut self, params: Vec<SqlParam>) -> Self {
        self.params = Some(params);
        self
    }

    /// Set the default `CONCURRENTLY` behaviour of refreshes.
    ///
    /// Has no effect on plain views.
    #[must_use]
    pub fn concurrently(mut self, concurrently: bool) -> Self {
        if let Materialization::Materialized(options) = &mut self.materialization {
            options.concurrently = concurrently;
        }
        self
    }

    /// Replace the refresh policy of a materialized view.
    ///
    /// Has no effect on plain views.
    #[must_use]
    pub fn with_refresh_policy(mut self, policy: impl RefreshPolicy + 'static) -> Self {
        if let Materialization::Materialized(options) = &mut self.materialization {
            options.refresh_policy = Arc::new(policy);
        }
        self
    }

    /// Mark the definition as a placeholder that is never scheduled.
    #[must_use]
    pub fn abstract_definition(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Namespace and entity name.
    #[must_use]
    pub const fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Storage name override, if any.
    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    /// Declared dependencies, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[EntityRef] {
        &self.dependencies
    }

    /// Whether the definition is a placeholder.
    #[must_use]
    pub const fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Materialization settings.
    #[must_use]
    pub const fn materialization(&self) -> &Materialization {
        &self.materialization
    }

    /// Materialized options, when this is a materialized view.
    #[must_use]
    pub const fn materialized_options(&self) -> Option<&MaterializedOptions> {
        match &self.materialization {
            Materialization::Materialized(options) => Some(options),
            Materialization::Plain => None,
        }
    }

    /// Whether this is a materialized view.
    #[must_use]
    pub const fn is_materialized(&self) -> bool {
        matches!(self.materialization, Materialization::Materialized(_))
    }

    const fn object_type(&self) -> &'static str {
        match self.materialization {
            Materialization::Plain => "VIEW",
            Materialization::Materialized(_) => "MATERIALIZED VIEW",
        }
    }

    /// Render the body.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::UnimplementedBody`] when no body was attached.
    pub fn render_body(
        &self,
        identifier: &CanonicalIdentifier,
        tables: &DependencyTables,
    ) -> Result<String, ViewError> {
        self.body
            .as_ref()
            .map(|body| body.render(tables))
            .ok_or_else(|| ViewError::UnimplementedBody {
                view: identifier.clone(),
            })
    }

    /// `DROP [MATERIALIZED] VIEW IF EXISTS "<name>" [CASCADE]`.
    #[must_use]
    pub fn render_drop(&self, physical_name: &str, cascade: bool) -> SqlStatement {
        let cascade_clause = if cascade { " CASCADE" } else { "" };
        SqlStatement::new(format!(
            "DROP {} IF EXISTS {}{cascade_clause}",
            self.object_type(),
            quote_identifier(physical_name),
        ))
    }

    /// `CREATE [MATERIALIZED] VIEW "<name>" AS (<body>)`.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::UnimplementedBody`] when no body was attached.
    pub fn render_create(
        &self,
        identifier: &CanonicalIdentifier,
        physical_name: &str,
        tables: &DependencyTables,
    ) -> Result<SqlStatement, ViewError> {
        let body = self.render_body(identifier, tables)?;
        let sql = format!(
            "CREATE {} {} AS ({body})",
            self.object_type(),
            quote_identifier(physical_name),
        );
        Ok(match &self.params {
            Some(params) => SqlStatement::with_params(sql, params.clone()),
            None => SqlStatement::new(sql),
        })
    }
}

impl fmt::Debug for ViewDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewDefinition")
            .field("entity", &self.entity)
            .field("table_name", &self.table_name)
            .field("dependencies", &self.dependencies)
            .field("has_body", &self.body.is_some())
            .field("materialization", &self.materialization)
            .field("is_abstract", &self.is_abstract)
            .finish_non_exhaustive()
    }
}

/// `REFRESH MATERIALIZED VIEW [CONCURRENTLY] "<name>"`.
#[must_use]
pub fn render_refresh(physical_name: &str, concurrently: bool) -> SqlStatement {
    let concurrently_clause = if concurrently { "CONCURRENTLY " } else { "" };
    SqlStatement::new(format!(
        "REFRESH MATERIALIZED VIEW {concurrently_clause}{}",
        quote_identifier(physical_name)
    ))
}

/// `VACUUM ANALYZE "<name>"`.
#[must_use]
pub fn render_vacuum(physical_name: &str) -> SqlStatement {
    SqlStatement::new(format!("VACUUM ANALYZE {}", quote_identifier(physical_name)))
}

/// `ALTER MATERIALIZED VIEW "<name>" ALTER COLUMN "<column>" SET STATISTICS <n>`.
#[must_use]
pub fn render_statistics(physical_name: &str, column: &str, target: i32) -> SqlStatement {
    SqlStatement::new(format!(
        "ALTER MATERIALIZED VIEW {} ALTER COLUMN {} SET STATISTICS {target}",
        quote_identifier(physical_name),
        quote_identifier(column),
    ))
}
