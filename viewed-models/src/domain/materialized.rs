//! Materialized view extensions: refresh policies and comment metadata.
//!
//! Freshness is never stored as an explicit state. The only observable signal
//! is the `last_updated` key of the JSON comment attached to the physical
//! view, written with the engine's clock after every successful refresh.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const LAST_UPDATED: &str = "last_updated";
const OLD_CONTENT: &str = "old_content";

/// JSON object stored as the comment of a materialized view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewMetadata(Map<String, Value>);

impl ViewMetadata {
    /// Interpret a raw comment.
    ///
    /// Comments that are not a JSON object are preserved under
    /// `old_content` instead of being discarded.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use viewed_models::domain::ViewMetadata;
    ///
    /// let metadata = ViewMetadata::from_comment("hello");
    /// assert_eq!(metadata.get("old_content").and_then(|v| v.as_str()), Some("hello"));
    /// ```
    #[must_use]
    pub fn from_comment(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self(map),
            Ok(_) | Err(_) => {
                let mut map = Map::new();
                map.insert(OLD_CONTENT.to_owned(), Value::String(raw.to_owned()));
                Self(map)
            }
        }
    }

    /// Engine timestamp of the last successful refresh.
    #[must_use]
    pub fn last_updated(&self) -> Option<&str> {
        self.0.get(LAST_UPDATED).and_then(Value::as_str)
    }

    /// Record `timestamp` as the last refresh, keeping every other key.
    pub fn set_last_updated(&mut self, timestamp: impl Into<String>) {
        self.0
            .insert(LAST_UPDATED.to_owned(), Value::String(timestamp.into()));
    }

    /// Look up an arbitrary key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying JSON object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Serialise back into comment text.
    ///
    /// # Errors
    ///
    /// Returns the serialiser error; a JSON map of strings cannot normally
    /// fail.
    pub fn to_comment(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

impl From<Map<String, Value>> for ViewMetadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// What a refresh policy knows about a view before deciding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshStatus {
    /// Current metadata comment, if any.
    pub metadata: Option<ViewMetadata>,
    /// Engine-computed seconds since `last_updated`, when recorded.
    pub seconds_since_refresh: Option<f64>,
}

/// Decides whether a materialized view should be refreshed now.
#[cfg_attr(test, mockall::automock)]
pub trait RefreshPolicy: Send + Sync {
    /// Return `false` to skip the refresh.
    fn should_refresh(&self, status: &RefreshStatus) -> bool;

    /// Whether [`RefreshStatus::seconds_since_refresh`] should be computed
    /// before [`Self::should_refresh`] is consulted.
    fn needs_refresh_age(&self) -> bool {
        true
    }
}

/// Refresh on every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRefresh;

impl RefreshPolicy for AlwaysRefresh {
    fn should_refresh(&self, _status: &RefreshStatus) -> bool {
        true
    }

    fn needs_refresh_age(&self) -> bool {
        false
    }
}

/// Skip views refreshed less than `min_age` ago.
///
/// Views without a recorded refresh, or whose recorded timestamp the engine
/// cannot interpret, are always refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimumRefreshAge {
    min_age: Duration,
}

impl MinimumRefreshAge {
    /// Policy with the given minimum age.
    #[must_use]
    pub const fn new(min_age: Duration) -> Self {
        Self { min_age }
    }
}

impl RefreshPolicy for MinimumRefreshAge {
    fn should_refresh(&self, status: &RefreshStatus) -> bool {
        status
            .seconds_since_refresh
            .is_none_or(|age| age >= self.min_age.as_secs_f64())
    }
}

/// Settings specific to materialized definitions.
#[derive(Clone)]
pub struct MaterializedOptions {
    pub(crate) concurrently: bool,
    pub(crate) refresh_policy: Arc<dyn RefreshPolicy>,
}

impl MaterializedOptions {
    /// Whether refreshes use `CONCURRENTLY` by default.
    #[must_use]
    pub const fn concurrently(&self) -> bool {
        self.concurrently
    }

    /// Policy consulted before each refresh.
    #[must_use]
    pub fn refresh_policy(&self) -> &dyn RefreshPolicy {
        self.refresh_policy.as_ref()
    }
}

impl Default for MaterializedOptions {
    fn default() -> Self {
        Self {
            concurrently: true,
            refresh_policy: Arc::new(AlwaysRefresh),
        }
    }
}

impl fmt::Debug for MaterializedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedOptions")
            .field("concurrently", &self.concurrently)
            .finish_non_exhaustive()
    }
}
