//! Execution scopes restricting orchestration to a subset of namespaces.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::error::ViewError;

const ALL: &str = "all";

/// Namespaces an orchestration run may touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Scope {
    /// Every registered namespace.
    #[default]
    All,
    /// Only the listed namespaces (lower-cased).
    Namespaces(BTreeSet<String>),
}

impl Scope {
    /// Parse `all` or a comma separated namespace list.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::InvalidScope`] when the list contains no names.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use viewed_models::domain::Scope;
    ///
    /// let scope = Scope::parse("aims, Reports").expect("valid scope");
    /// assert!(scope.includes("reports"));
    /// assert!(!scope.includes("auth"));
    /// assert_eq!(Scope::parse("all").expect("valid scope"), Scope::All);
    /// ```
    pub fn parse(raw: &str) -> Result<Self, ViewError> {
        if raw.trim().eq_ignore_ascii_case(ALL) {
            return Ok(Self::All);
        }
        let namespaces: BTreeSet<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_lowercase)
            .collect();
        if namespaces.is_empty() {
            return Err(ViewError::InvalidScope {
                raw: raw.to_owned(),
            });
        }
        Ok(Self::Namespaces(namespaces))
    }

    /// Whether `namespace` falls inside this scope.
    #[must_use]
    pub fn includes(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Namespaces(names) => names.contains(&namespace.to_lowercase()),
        }
    }
}

impl FromStr for Scope {
    type Err = ViewError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(ALL),
            Self::Namespaces(names) => {
                f.write_str(&names.iter().map(String::as_str).collect::<Vec<_>>().join(","))
            }
        }
    }
}
