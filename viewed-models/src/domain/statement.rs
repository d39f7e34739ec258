//! Rendered SQL statements and the flags that control their execution.

use std::fmt;

/// A literal value bound to a positional placeholder (`$1`, `$2`, ...).
///
/// Literals are never formatted into statement text by the domain; adapters
/// hand them to the engine for quoting or binding.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// SQL `NULL`.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// 64-bit integer literal.
    Integer(i64),
    /// Double precision literal.
    Float(f64),
    /// Text literal.
    Text(String),
}

/// Renders the value as a SQL literal for display only; statements are never
/// built from this text.
impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One entry of a statement batch: SQL text plus optional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    sql: String,
    params: Option<Vec<SqlParam>>,
}

impl SqlStatement {
    /// Statement without parameters.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use viewed_models::domain::SqlStatement;
    ///
    /// let statement = SqlStatement::new("VACUUM ANALYZE \"reports_totals\"");
    /// assert!(statement.params().is_none());
    /// ```
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: None,
        }
    }

    /// Statement with positional parameters.
    #[must_use]
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params: Some(params),
        }
    }

    /// Statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters, if any.
    #[must_use]
    pub fn params(&self) -> Option<&[SqlParam]> {
        self.params.as_deref()
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Flags recognised by every rendering operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Render statements without executing them.
    pub dry_run: bool,
    /// Append `CASCADE` to `DROP` statements.
    pub drop_cascade: bool,
    /// Drop the view before a single create call.
    pub drop_first: bool,
    /// Override the definition's `concurrently` flag on refresh.
    pub concurrently: Option<bool>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            drop_cascade: true,
            drop_first: false,
            concurrently: None,
        }
    }
}

impl ExecutionOptions {
    /// Options that only render statements.
    #[must_use]
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}
