//! JSON view manifest parsing.
//!
//! A manifest declares the base tables views may read and the views
//! themselves, with SQL templates referencing dependencies through
//! `{canonical_identifier}` placeholders. Loading validates every template
//! against its declared dependencies, so a manifest that loads can always be
//! rendered.

use std::collections::BTreeMap;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{
    BaseTable, DependencyTables, EntityRef, MinimumRefreshAge, SqlParam, ViewBody, ViewDefinition,
    ViewError, ViewRegistry,
};

/// Current supported manifest version.
const SUPPORTED_VERSION: u32 = 1;

/// Errors raised while reading or validating a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("failed to read view manifest at '{path}': {message}")]
    Io {
        /// Path to the manifest.
        path: PathBuf,
        /// Description of the I/O error.
        message: String,
    },

    /// The manifest JSON is malformed or missing required fields.
    #[error("invalid view manifest JSON: {message}")]
    Parse {
        /// Description of the parse error.
        message: String,
    },

    /// The manifest version is not supported.
    #[error("unsupported view manifest version: expected {expected}, found {actual}")]
    UnsupportedVersion {
        /// Expected version number.
        expected: u32,
        /// Version found in the manifest.
        actual: u32,
    },

    /// A SQL template is syntactically invalid.
    #[error("invalid SQL template for view {view}: {message}")]
    Template {
        /// View declaring the template.
        view: EntityRef,
        /// What is wrong with the template.
        message: String,
    },

    /// A template placeholder names no declared dependency.
    #[error("placeholder {{{placeholder}}} in view {view} names no declared dependency")]
    UnknownPlaceholder {
        /// View declaring the template.
        view: EntityRef,
        /// Placeholder text between the braces.
        placeholder: String,
    },

    /// A parameter is not a JSON scalar.
    #[error("parameter {index} of view {view} must be null, a boolean, a number or a string")]
    InvalidParam {
        /// View declaring the parameter.
        view: EntityRef,
        /// Zero-based parameter position.
        index: usize,
    },

    /// Registration was rejected by the registry.
    #[error(transparent)]
    Registry(#[from] ViewError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Table(EntityRef),
}

/// SQL template rendered against resolved dependency names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBody {
    segments: Vec<Segment>,
}

impl TemplateBody {
    /// Parse `template`, resolving placeholders against `dependencies`.
    ///
    /// `{{` and `}}` produce literal braces.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Template`] for unbalanced braces and
    /// [`ManifestError::UnknownPlaceholder`] for placeholders that do not
    /// name a declared dependency's canonical identifier.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use viewed_models::domain::{EntityRef, ViewRegistry};
    /// use viewed_models::inbound::manifest::TemplateBody;
    ///
    /// let registry = ViewRegistry::new();
    /// let view = EntityRef::new("reports", "summary");
    /// let orders = EntityRef::new("shop", "orders");
    /// let body = TemplateBody::parse(&registry, &view, "SELECT * FROM {shop_orders}", &[orders])
    ///     .expect("valid template");
    /// # drop(body);
    /// ```
    pub fn parse(
        registry: &ViewRegistry,
        view: &EntityRef,
        template: &str,
        dependencies: &[EntityRef],
    ) -> Result<Self, ManifestError> {
        let known: BTreeMap<String, &EntityRef> = dependencies
            .iter()
            .map(|dependency| (registry.identifier_of(dependency).to_string(), dependency))
            .collect();
        let template_error = |message: &str| ManifestError::Template {
            view: view.clone(),
            message: message.to_owned(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut placeholder = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => {
                                return Err(template_error("nested '{' inside placeholder"));
                            }
                            Some(inner) => placeholder.push(inner),
                            None => return Err(template_error("unterminated placeholder")),
                        }
                    }
                    let dependency = known.get(placeholder.trim()).ok_or_else(|| {
                        ManifestError::UnknownPlaceholder {
                            view: view.clone(),
                            placeholder: placeholder.clone(),
                        }
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(mem::take(&mut literal)));
                    }
                    segments.push(Segment::Table((*dependency).clone()));
                }
                '}' => return Err(template_error("unmatched '}'; write '}}' for a literal brace")),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }
}

impl ViewBody for TemplateBody {
    fn render(&self, tables: &DependencyTables) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Table(entity) => tables.table(entity.namespace(), entity.entity()),
            })
            .collect()
    }
}

/// Validated manifest contents ready for registration.
#[derive(Debug, Clone)]
pub struct ViewManifest {
    tables: Vec<BaseTable>,
    views: Vec<ViewDefinition>,
}

impl ViewManifest {
    /// Parse a manifest from a JSON string, validating templates against the
    /// PostgreSQL identifier limit.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] if:
    /// - The JSON is malformed or missing required fields
    /// - The version is unsupported
    /// - A template is invalid or names an undeclared dependency
    /// - A parameter is not a JSON scalar
    ///
    /// # Examples
    ///
    /// ```rust
    /// use viewed_models::inbound::manifest::ViewManifest;
    ///
    /// let json = r#"{
    ///     "version": 1,
    ///     "tables": [{"namespace": "shop", "entity": "orders"}],
    ///     "views": [{
    ///         "namespace": "shop",
    ///         "entity": "daily",
    ///         "dependencies": [["shop", "orders"]],
    ///         "sql": "SELECT day FROM {shop_orders}",
    ///         "materialized": true
    ///     }]
    /// }"#;
    ///
    /// let registry = ViewManifest::from_json(json)
    ///     .and_then(ViewManifest::into_registry)
    ///     .expect("valid manifest");
    /// assert!(registry.lookup_entity("shop", "daily").is_ok());
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Self::from_json_for(&ViewRegistry::new(), json)
    }

    /// Parse a manifest, resolving template placeholders with the identifier
    /// limit of `registry`.
    ///
    /// # Errors
    ///
    /// See [`Self::from_json`].
    pub fn from_json_for(registry: &ViewRegistry, json: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(json).map_err(|e| ManifestError::Parse {
            message: e.to_string(),
        })?;
        Self::from_raw(registry, raw)
    }

    /// Load a manifest from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let contents = fs::read_to_string(path).map_err(|e| ManifestError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    fn from_raw(registry: &ViewRegistry, raw: RawManifest) -> Result<Self, ManifestError> {
        if raw.version != SUPPORTED_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                expected: SUPPORTED_VERSION,
                actual: raw.version,
            });
        }

        let tables = raw
            .tables
            .into_iter()
            .map(|table| {
                let base = BaseTable::new(&table.namespace, &table.entity);
                match table.table_name {
                    Some(name) => base.with_table_name(name),
                    None => base,
                }
            })
            .collect();

        let views = raw
            .views
            .into_iter()
            .map(|view| view.into_definition(registry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { tables, views })
    }

    /// Declared base tables.
    #[must_use]
    pub fn tables(&self) -> &[BaseTable] {
        &self.tables
    }

    /// Declared view definitions.
    #[must_use]
    pub fn views(&self) -> &[ViewDefinition] {
        &self.views
    }

    /// Register every table and view into `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Registry`] when two entries resolve to the
    /// same canonical identifier.
    pub fn register_into(self, registry: &mut ViewRegistry) -> Result<(), ManifestError> {
        for table in self.tables {
            registry.register_table(table)?;
        }
        for view in self.views {
            registry.register_view(view)?;
        }
        Ok(())
    }

    /// Build a fresh registry holding the manifest contents.
    ///
    /// # Errors
    ///
    /// See [`Self::register_into`].
    pub fn into_registry(self) -> Result<ViewRegistry, ManifestError> {
        let mut registry = ViewRegistry::new();
        self.register_into(&mut registry)?;
        Ok(registry)
    }
}

/// Load a manifest file into a new registry.
///
/// # Errors
///
/// Returns [`ManifestError`] if the file cannot be read, parsed or
/// registered.
pub fn load_registry(path: &Path) -> Result<ViewRegistry, ManifestError> {
    ViewManifest::from_file(path)?.into_registry()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawManifest {
    version: u32,
    #[serde(default)]
    tables: Vec<RawTable>,
    #[serde(default)]
    views: Vec<RawView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawTable {
    namespace: String,
    entity: String,
    table_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawView {
    namespace: String,
    entity: String,
    #[serde(default)]
    dependencies: Vec<(String, String)>,
    sql: Option<String>,
    #[serde(default)]
    params: Option<Vec<Value>>,
    #[serde(default)]
    materialized: bool,
    concurrently: Option<bool>,
    table_name: Option<String>,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    min_refresh_age_seconds: Option<u64>,
}

impl RawView {
    fn into_definition(self, registry: &ViewRegistry) -> Result<ViewDefinition, ManifestError> {
        let entity = EntityRef::new(&self.namespace, &self.entity);
        let mut definition = if self.materialized {
            ViewDefinition::materialized(&self.namespace, &self.entity)
        } else {
            ViewDefinition::view(&self.namespace, &self.entity)
        };
        for (namespace, dependency) in &self.dependencies {
            definition = definition.depends_on(namespace, dependency);
        }

        if let Some(template) = &self.sql {
            let body = TemplateBody::parse(registry, &entity, template, definition.dependencies())?;
            definition = definition.with_body(body);
        }
        if let Some(values) = self.params {
            let params = values
                .into_iter()
                .enumerate()
                .map(|(index, value)| {
                    to_param(value).ok_or_else(|| ManifestError::InvalidParam {
                        view: entity.clone(),
                        index,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            definition = definition.with_params(params);
        }
        if let Some(table_name) = self.table_name {
            definition = definition.with_table_name(table_name);
        }
        if let Some(concurrently) = self.concurrently {
            definition = definition.concurrently(concurrently);
        }
        if let Some(seconds) = self.min_refresh_age_seconds {
            definition = definition
                .with_refresh_policy(MinimumRefreshAge::new(Duration::from_secs(seconds)));
        }
        if self.is_abstract {
            definition = definition.abstract_definition();
        }
        Ok(definition)
    }
}

fn to_param(value: Value) -> Option<SqlParam> {
    match value {
        Value::Null => Some(SqlParam::Null),
        Value::Bool(flag) => Some(SqlParam::Bool(flag)),
        Value::Number(number) => number
            .as_i64()
            .map(SqlParam::Integer)
            .or_else(|| number.as_f64().map(SqlParam::Float)),
        Value::String(text) => Some(SqlParam::Text(text)),
        Value::Array(_) | Value::Object(_) => None,
    }
}
