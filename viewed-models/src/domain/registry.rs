//! Process-wide registry of view definitions and the base tables they read.
//!
//! The registry is the single source of truth for name resolution: it maps
//! `(namespace, entity)` references to canonical identifiers, to live entity
//! handles and to quoted physical names.

use std::collections::{BTreeMap, BTreeSet};

use super::definition::{DependencyTables, ViewDefinition};
use super::error::ViewError;
use super::identifier::{
    CanonicalIdentifier, EntityRef, POSTGRES_MAX_IDENTIFIER_LENGTH, quote_identifier,
};
use super::scope::Scope;

/// A base table that views may depend on but never manage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTable {
    entity: EntityRef,
    table_name: Option<String>,
}

impl BaseTable {
    /// Table stored under its canonical identifier.
    #[must_use]
    pub fn new(namespace: impl AsRef<str>, entity: impl AsRef<str>) -> Self {
        Self {
            entity: EntityRef::new(namespace, entity),
            table_name: None,
        }
    }

    /// Table stored under a custom name.
    #[must_use]
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
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
}

/// A resolved reference to a registered entity.
#[derive(Debug, Clone, Copy)]
pub enum EntityHandle<'a> {
    /// A managed view definition.
    View(&'a ViewDefinition),
    /// An opaque base table.
    Table(&'a BaseTable),
}

impl<'a> EntityHandle<'a> {
    /// Namespace and entity name of the handle.
    #[must_use]
    pub const fn entity(&self) -> &'a EntityRef {
        match *self {
            Self::View(view) => view.entity(),
            Self::Table(table) => table.entity(),
        }
    }

    fn table_name(&self) -> Option<&'a str> {
        match *self {
            Self::View(view) => view.table_name(),
            Self::Table(table) => table.table_name(),
        }
    }

    /// The view definition, when the handle names one.
    #[must_use]
    pub const fn as_view(&self) -> Option<&'a ViewDefinition> {
        match *self {
            Self::View(view) => Some(view),
            Self::Table(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    View(ViewDefinition),
    Table(BaseTable),
}

impl Entry {
    const fn handle(&self) -> EntityHandle<'_> {
        match self {
            Self::View(view) => EntityHandle::View(view),
            Self::Table(table) => EntityHandle::Table(table),
        }
    }
}

/// Registry of view definitions and base tables.
#[derive(Debug, Clone)]
pub struct ViewRegistry {
    max_identifier_length: usize,
    entries: BTreeMap<CanonicalIdentifier, Entry>,
    by_entity: BTreeMap<EntityRef, CanonicalIdentifier>,
    namespaces: BTreeSet<String>,
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewRegistry {
    /// Registry using the PostgreSQL identifier limit.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_identifier_length(POSTGRES_MAX_IDENTIFIER_LENGTH)
    }

    /// Registry for an engine with a different identifier limit.
    #[must_use]
    pub const fn with_max_identifier_length(max_identifier_length: usize) -> Self {
        Self {
            max_identifier_length,
            entries: BTreeMap::new(),
            by_entity: BTreeMap::new(),
            namespaces: BTreeSet::new(),
        }
    }

    /// Identifier limit applied by [`Self::resolve`].
    #[must_use]
    pub const fn max_identifier_length(&self) -> usize {
        self.max_identifier_length
    }

    /// Canonical identifier of a namespace/entity pair.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use viewed_models::domain::ViewRegistry;
    ///
    /// let registry = ViewRegistry::new();
    /// assert_eq!(registry.resolve("Aims", "Activity").as_str(), "aims_activity");
    /// ```
    #[must_use]
    pub fn resolve(&self, namespace: &str, entity: &str) -> CanonicalIdentifier {
        CanonicalIdentifier::resolve_with_limit(namespace, entity, self.max_identifier_length)
    }

    /// Canonical identifier of an entity reference.
    #[must_use]
    pub fn identifier_of(&self, entity: &EntityRef) -> CanonicalIdentifier {
        CanonicalIdentifier::of(entity, self.max_identifier_length)
    }

    /// Register a base table.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::DuplicateIdentifier`] when the table's canonical
    /// identifier is already taken.
    pub fn register_table(&mut self, table: BaseTable) -> Result<&mut Self, ViewError> {
        let entity = table.entity().clone();
        self.insert(entity, Entry::Table(table))
    }

    /// Register a view definition.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::DuplicateIdentifier`] when the definition's
    /// canonical identifier is already taken.
    pub fn register_view(&mut self, view: ViewDefinition) -> Result<&mut Self, ViewError> {
        let entity = view.entity().clone();
        self.insert(entity, Entry::View(view))
    }

    fn insert(&mut self, entity: EntityRef, entry: Entry) -> Result<&mut Self, ViewError> {
        let identifier = self.identifier_of(&entity);
        if let Some(existing) = self.entries.get(&identifier) {
            return Err(ViewError::DuplicateIdentifier {
                identifier,
                existing: existing.handle().entity().clone(),
                incoming: entity,
            });
        }
        self.namespaces.insert(entity.namespace().to_owned());
        self.by_entity.insert(entity, identifier.clone());
        self.entries.insert(identifier, entry);
        Ok(self)
    }

    /// Resolve a reference to a registered entity.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::NamespaceNotFound`] when nothing is registered in
    /// the namespace and [`ViewError::EntityNotFound`] when the namespace
    /// exists but the entity does not.
    pub fn lookup_entity(
        &self,
        namespace: &str,
        entity: &str,
    ) -> Result<EntityHandle<'_>, ViewError> {
        let reference = EntityRef::new(namespace, entity);
        if !self.namespaces.contains(reference.namespace()) {
            return Err(ViewError::NamespaceNotFound {
                namespace: reference.namespace().to_owned(),
            });
        }
        self.by_entity
            .get(&reference)
            .and_then(|identifier| self.entries.get(identifier))
            .map(Entry::handle)
            .ok_or_else(|| ViewError::EntityNotFound {
                namespace: reference.namespace().to_owned(),
                entity: reference.entity().to_owned(),
            })
    }

    /// Resolve an [`EntityRef`]; see [`Self::lookup_entity`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::lookup_entity`].
    pub fn lookup(&self, reference: &EntityRef) -> Result<EntityHandle<'_>, ViewError> {
        self.lookup_entity(reference.namespace(), reference.entity())
    }

    /// Unquoted storage name of an entity.
    #[must_use]
    pub fn storage_name(&self, handle: EntityHandle<'_>) -> String {
        handle
            .table_name()
            .map_or_else(|| self.identifier_of(handle.entity()).to_string(), str::to_owned)
    }

    /// Storage name of an entity, quoted for literal use in SQL.
    #[must_use]
    pub fn physical_name(&self, handle: EntityHandle<'_>) -> String {
        quote_identifier(&self.storage_name(handle))
    }

    /// View definition registered under `identifier`, if any.
    #[must_use]
    pub fn view(&self, identifier: &CanonicalIdentifier) -> Option<&ViewDefinition> {
        match self.entries.get(identifier) {
            Some(Entry::View(view)) => Some(view),
            Some(Entry::Table(_)) | None => None,
        }
    }

    /// Every registered view definition, abstract ones included.
    pub fn views(&self) -> impl Iterator<Item = &ViewDefinition> {
        self.entries.values().filter_map(|entry| match entry {
            Entry::View(view) => Some(view),
            Entry::Table(_) => None,
        })
    }

    /// Concrete view definitions whose namespace falls inside `scope`.
    #[must_use]
    pub fn discover(&self, scope: &Scope) -> Vec<&ViewDefinition> {
        self.views()
            .filter(|view| !view.is_abstract())
            .filter(|view| scope.includes(view.entity().namespace()))
            .collect()
    }

    /// Resolve every dependency of `view` into quoted physical names.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::DependencyResolution`] for the first dependency
    /// that cannot be resolved.
    pub fn dependency_tables(&self, view: &ViewDefinition) -> Result<DependencyTables, ViewError> {
        let mut tables = DependencyTables::new(self.max_identifier_length);
        for dependency in view.dependencies() {
            let handle = self.lookup(dependency).map_err(|source| ViewError::DependencyResolution {
                definition: view.entity().clone(),
                dependency: dependency.clone(),
                source: Box::new(source),
            })?;
            tables.insert(self.identifier_of(dependency), self.physical_name(handle));
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn registry() -> ViewRegistry {
        let mut registry = ViewRegistry::new();
        registry
            .register_table(BaseTable::new("aims", "activity").with_table_name("legacy_activity"))
            .expect("register table")
            .register_view(
                ViewDefinition::view("reports", "summary").depends_on("aims", "activity"),
            )
            .expect("register view")
            .register_view(ViewDefinition::view("reports", "base").abstract_definition())
            .expect("register abstract view");
        registry
    }

    #[rstest]
    fn lookup_resolves_views_and_tables(registry: ViewRegistry) {
        let table = registry.lookup_entity("Aims", "Activity").expect("table");
        assert!(table.as_view().is_none());
        assert_eq!(registry.physical_name(table), "\"legacy_activity\"");

        let view = registry.lookup_entity("reports", "summary").expect("view");
        assert!(view.as_view().is_some());
        assert_eq!(registry.physical_name(view), "\"reports_summary\"");
    }

    #[rstest]
    fn unknown_namespace_is_reported(registry: ViewRegistry) {
        let result = registry
            .lookup_entity("ghost", "summary")
            .map(|handle| handle.entity().clone());
        assert_eq!(
            result,
            Err(ViewError::NamespaceNotFound {
                namespace: "ghost".to_owned()
            })
        );
    }

    #[rstest]
    fn unknown_entity_is_reported(registry: ViewRegistry) {
        let result = registry.lookup_entity("aims", "budget").map(|handle| handle.entity().clone());
        assert_eq!(
            result,
            Err(ViewError::EntityNotFound {
                namespace: "aims".to_owned(),
                entity: "budget".to_owned()
            })
        );
    }

    #[rstest]
    fn discover_skips_abstract_and_out_of_scope_views(registry: ViewRegistry) {
        let all: Vec<_> = registry
            .discover(&Scope::All)
            .iter()
            .map(|view| view.entity().to_string())
            .collect();
        assert_eq!(all, vec!["reports.summary"]);

        let aims_only = Scope::parse("aims").expect("scope");
        assert!(registry.discover(&aims_only).is_empty());
    }

    #[test]
    fn colliding_identifiers_are_rejected() {
        let mut registry = ViewRegistry::new();
        registry
            .register_table(BaseTable::new("a_b", "c"))
            .expect("first registration");

        let result = registry.register_view(ViewDefinition::view("a", "b_c")).map(|_| ());
        assert_eq!(
            result,
            Err(ViewError::DuplicateIdentifier {
                identifier: CanonicalIdentifier::resolve("a", "b_c"),
                existing: EntityRef::new("a_b", "c"),
                incoming: EntityRef::new("a", "b_c"),
            })
        );
    }

    #[rstest]
    fn dependency_tables_use_physical_names(registry: ViewRegistry) {
        let view = ViewDefinition::view("reports", "other").depends_on("aims", "activity");
        let tables = registry.dependency_tables(&view).expect("resolved");
        assert_eq!(tables.table("aims", "activity"), "\"legacy_activity\"");
    }

    #[rstest]
    fn unresolved_dependencies_name_the_declaring_view(registry: ViewRegistry) {
        let view = ViewDefinition::view("reports", "broken").depends_on("aims", "budget");
        let result = registry.dependency_tables(&view);
        assert!(matches!(
            result,
            Err(ViewError::DependencyResolution { ref definition, .. })
                if *definition == EntityRef::new("reports", "broken")
        ));
    }
}
