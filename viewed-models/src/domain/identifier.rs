//! Canonical identifiers for namespaced entities.
//!
//! A canonical identifier is `"{namespace}_{entity}"`, lower-cased and cut to
//! the engine's identifier limit. Over-long names keep a prefix and gain a
//! four digit SHA-256 suffix of the full name, so two long names sharing a
//! prefix still map to different identifiers. Collisions remain possible in
//! principle; the registry rejects them at registration time.

use std::fmt;

use sha2::{Digest, Sha256};

/// Maximum identifier length, in bytes, accepted by PostgreSQL.
pub const POSTGRES_MAX_IDENTIFIER_LENGTH: usize = 63;

const HASH_LENGTH: usize = 4;

/// A `(namespace, entity)` pair naming a view or base table.
///
/// Both parts are stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef {
    namespace: String,
    entity: String,
}

impl EntityRef {
    /// Build a reference from its namespace and entity name.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use viewed_models::domain::EntityRef;
    ///
    /// let reference = EntityRef::new("Aims", "Activity");
    /// assert_eq!(reference.to_string(), "aims.activity");
    /// ```
    #[must_use]
    pub fn new(namespace: impl AsRef<str>, entity: impl AsRef<str>) -> Self {
        Self {
            namespace: namespace.as_ref().trim().to_lowercase(),
            entity: entity.as_ref().trim().to_lowercase(),
        }
    }

    /// Namespace part.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Entity part.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.entity)
    }
}

impl<N: AsRef<str>, E: AsRef<str>> From<(N, E)> for EntityRef {
    fn from((namespace, entity): (N, E)) -> Self {
        Self::new(namespace, entity)
    }
}

/// Normalised storage-level name of an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalIdentifier(String);

impl CanonicalIdentifier {
    /// Resolve a namespace/entity pair using the PostgreSQL identifier limit.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use viewed_models::domain::CanonicalIdentifier;
    ///
    /// let identifier = CanonicalIdentifier::resolve("Aims", "Activity");
    /// assert_eq!(identifier.as_str(), "aims_activity");
    /// ```
    #[must_use]
    pub fn resolve(namespace: &str, entity: &str) -> Self {
        Self::resolve_with_limit(namespace, entity, POSTGRES_MAX_IDENTIFIER_LENGTH)
    }

    /// Resolve a namespace/entity pair against an explicit byte limit.
    #[must_use]
    pub fn resolve_with_limit(namespace: &str, entity: &str, max_length: usize) -> Self {
        let full = format!("{}_{}", namespace.trim(), entity.trim()).to_lowercase();
        Self(truncate_name(&full, max_length))
    }

    /// Canonical identifier of an entity reference.
    #[must_use]
    pub fn of(entity: &EntityRef, max_length: usize) -> Self {
        Self::resolve_with_limit(entity.namespace(), entity.entity(), max_length)
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalIdentifier {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Wrap an identifier in double quotes, doubling embedded quotes.
///
/// # Examples
///
/// ```rust
/// use viewed_models::domain::quote_identifier;
///
/// assert_eq!(quote_identifier("aims_activity"), "\"aims_activity\"");
/// assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
/// ```
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn truncate_name(name: &str, max_length: usize) -> String {
    if name.len() <= max_length {
        return name.to_owned();
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let suffix: String = digest.chars().take(HASH_LENGTH).collect();
    let mut truncated = prefix_within(name, max_length.saturating_sub(HASH_LENGTH));
    truncated.push_str(&suffix);
    truncated
}

fn prefix_within(name: &str, max_bytes: usize) -> String {
    let mut used = 0;
    name.chars()
        .take_while(|ch| {
            used += ch.len_utf8();
            used <= max_bytes
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("aims", "activity", "aims_activity")]
    #[case("Aims", "ActivitySummary", "aims_activitysummary")]
    #[case(" reports ", " totals ", "reports_totals")]
    fn resolves_short_names(#[case] namespace: &str, #[case] entity: &str, #[case] expected: &str) {
        assert_eq!(CanonicalIdentifier::resolve(namespace, entity).as_str(), expected);
    }

    #[test]
    fn long_names_fit_the_limit_and_stay_deterministic() {
        let entity = "a".repeat(80);
        let first = CanonicalIdentifier::resolve("reports", &entity);
        let second = CanonicalIdentifier::resolve("reports", &entity);

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), POSTGRES_MAX_IDENTIFIER_LENGTH);
    }

    #[test]
    fn long_names_sharing_a_prefix_get_distinct_suffixes() {
        let stem = "x".repeat(70);
        let left = CanonicalIdentifier::resolve("reports", &format!("{stem}_left"));
        let right = CanonicalIdentifier::resolve("reports", &format!("{stem}_right"));

        assert_ne!(left, right);
    }

    #[test]
    fn truncation_respects_character_boundaries() {
        let entity = "é".repeat(40);
        let identifier = CanonicalIdentifier::resolve("ns", &entity);

        assert!(identifier.as_str().len() <= POSTGRES_MAX_IDENTIFIER_LENGTH);
    }

    #[test]
    fn custom_limits_are_honoured() {
        let identifier = CanonicalIdentifier::resolve_with_limit("reports", "totals", 10);
        assert_eq!(identifier.as_str().len(), 10);
        assert!(identifier.as_str().starts_with("report"));
    }

    #[test]
    fn entity_refs_are_case_insensitive() {
        assert_eq!(EntityRef::new("AIMS", "Activity"), EntityRef::from(("aims", "activity")));
    }
}
