//! Port abstraction for executing view statements against the storage engine.
//!
//! The orchestrator never talks to a database driver directly. It drives a
//! [`ViewStore`], which executes rendered statements, exposes the handful of
//! catalog reads that materialized-view maintenance needs, and runs closures
//! inside a single transaction.

use std::collections::BTreeMap;

use crate::domain::error::ViewError;
use crate::domain::statement::SqlStatement;

use super::define_port_error;

define_port_error! {
    /// Errors raised by storage engine adapters.
    pub enum ViewStoreError {
        /// Connection to the backing datastore failed.
        Connection {
            /// Driver-supplied description.
            message: String,
        } => "view store connection failed: {message}",
        /// A catalog or bookkeeping query failed.
        Query {
            /// Driver-supplied description.
            message: String,
        } => "view store query failed: {message}",
        /// A rendered statement was rejected by the engine.
        Execution {
            /// Full text of the failing statement.
            statement: String,
            /// Engine-supplied description.
            message: String,
        } => "statement failed: {message} (statement: {statement})",
        /// Beginning, committing or rolling back a transaction failed.
        Transaction {
            /// Driver-supplied description.
            message: String,
        } => "view store transaction failed: {message}",
    }
}

/// Executes statements and performs the catalog reads used by view
/// maintenance.
///
/// Relation names passed to these methods are unquoted physical names.
#[cfg_attr(test, mockall::automock)]
pub trait StatementExecutor {
    /// Execute one statement together with its parameters, if any.
    fn execute(&mut self, statement: &SqlStatement) -> Result<(), ViewStoreError>;

    /// Return the engine's current timestamp rendered as text.
    fn current_timestamp(&mut self) -> Result<String, ViewStoreError>;

    /// Seconds elapsed between `timestamp` and the engine's current time.
    fn seconds_since(&mut self, timestamp: &str) -> Result<f64, ViewStoreError>;

    /// Read the comment attached to a relation, if any.
    fn read_comment(&mut self, relation: &str) -> Result<Option<String>, ViewStoreError>;

    /// Replace the comment attached to a materialized view.
    fn write_comment(&mut self, relation: &str, comment: &str) -> Result<(), ViewStoreError>;

    /// List the column names of a relation in attribute order.
    fn list_columns(&mut self, relation: &str) -> Result<Vec<String>, ViewStoreError>;
}

/// Unit of work run inside [`ViewStore::atomically`].
pub type AtomicWork<'a> =
    dyn FnMut(&mut dyn StatementExecutor) -> Result<(), ViewError> + 'a;

/// Storage engine handle owned by the orchestrator.
pub trait ViewStore: StatementExecutor {
    /// Run `work` inside one transaction.
    ///
    /// The transaction commits when `work` returns `Ok` and rolls back on any
    /// error, which is then returned unchanged.
    fn atomically(&mut self, work: &mut AtomicWork<'_>) -> Result<(), ViewError>;
}

/// In-memory store that records executed statements.
///
/// Comments and column lists are kept in maps so metadata round-trips can be
/// observed. [`ViewStore::atomically`] snapshots the recorded state and
/// restores it when the unit of work fails, mirroring a rollback.
#[derive(Debug, Clone)]
pub struct RecordingViewStore {
    executed: Vec<SqlStatement>,
    comments: BTreeMap<String, String>,
    columns: BTreeMap<String, Vec<String>>,
    timestamp: String,
    seconds_since_refresh: f64,
    fail_on: Option<String>,
    transactions: usize,
}

impl Default for RecordingViewStore {
    fn default() -> Self {
        Self {
            executed: Vec::new(),
            comments: BTreeMap::new(),
            columns: BTreeMap::new(),
            timestamp: "2024-01-01 00:00:00+00".to_owned(),
            seconds_since_refresh: 0.0,
            fail_on: None,
            transactions: 0,
        }
    }
}

impl RecordingViewStore {
    /// Construct an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `timestamp` as the engine clock.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Report `seconds` as the age of every recorded refresh.
    #[must_use]
    pub fn with_seconds_since_refresh(mut self, seconds: f64) -> Self {
        self.seconds_since_refresh = seconds;
        self
    }

    /// Seed the comment attached to `relation`.
    #[must_use]
    pub fn with_comment(mut self, relation: impl Into<String>, comment: impl Into<String>) -> Self {
        self.comments.insert(relation.into(), comment.into());
        self
    }

    /// Seed the column list of `relation`.
    #[must_use]
    pub fn with_columns<I, C>(mut self, relation: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.columns
            .insert(relation.into(), columns.into_iter().map(Into::into).collect());
        self
    }

    /// Fail any statement whose text contains `fragment`.
    #[must_use]
    pub fn failing_on(mut self, fragment: impl Into<String>) -> Self {
        self.fail_on = Some(fragment.into());
        self
    }

    /// Statements executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> &[SqlStatement] {
        &self.executed
    }

    /// SQL text of the statements executed so far.
    #[must_use]
    pub fn executed_sql(&self) -> Vec<&str> {
        self.executed.iter().map(SqlStatement::sql).collect()
    }

    /// Comment currently attached to `relation`.
    #[must_use]
    pub fn comment(&self, relation: &str) -> Option<&str> {
        self.comments.get(relation).map(String::as_str)
    }

    /// Number of units of work run through [`ViewStore::atomically`].
    #[must_use]
    pub const fn transactions(&self) -> usize {
        self.transactions
    }
}

impl StatementExecutor for RecordingViewStore {
    fn execute(&mut self, statement: &SqlStatement) -> Result<(), ViewStoreError> {
        let rejected = self
            .fail_on
            .as_deref()
            .is_some_and(|fragment| statement.sql().contains(fragment));
        if rejected {
            return Err(ViewStoreError::execution(
                statement.sql(),
                "rejected by recording store",
            ));
        }
        self.executed.push(statement.clone());
        Ok(())
    }

    fn current_timestamp(&mut self) -> Result<String, ViewStoreError> {
        Ok(self.timestamp.clone())
    }

    fn seconds_since(&mut self, _timestamp: &str) -> Result<f64, ViewStoreError> {
        Ok(self.seconds_since_refresh)
    }

    fn read_comment(&mut self, relation: &str) -> Result<Option<String>, ViewStoreError> {
        Ok(self.comments.get(relation).cloned())
    }

    fn write_comment(&mut self, relation: &str, comment: &str) -> Result<(), ViewStoreError> {
        self.comments.insert(relation.to_owned(), comment.to_owned());
        Ok(())
    }

    fn list_columns(&mut self, relation: &str) -> Result<Vec<String>, ViewStoreError> {
        Ok(self.columns.get(relation).cloned().unwrap_or_default())
    }
}

impl ViewStore for RecordingViewStore {
    fn atomically(&mut self, work: &mut AtomicWork<'_>) -> Result<(), ViewError> {
        self.transactions += 1;
        let executed = self.executed.clone();
        let comments = self.comments.clone();
        let result = work(self);
        if result.is_err() {
            self.executed = executed;
            self.comments = comments;
        }
        result
    }
}
