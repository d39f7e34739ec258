//! PostgreSQL-backed view store built on the synchronous `postgres` client.

use postgres::{Client, GenericClient, NoTls, Row};
use tracing::{debug, warn};

use crate::domain::error::ViewError;
use crate::domain::ports::{AtomicWork, StatementExecutor, ViewStore, ViewStoreError};
use crate::domain::statement::{SqlParam, SqlStatement};

const READ_COMMENT: &str = concat!(
    "SELECT pg_catalog.obj_description(cls.oid, 'pg_class') AS comment ",
    "FROM pg_catalog.pg_class cls ",
    "WHERE cls.relname = $1 ",
    "  AND pg_catalog.pg_table_is_visible(cls.oid)"
);

// Literal quoting happens in the engine; the resulting text is executed as-is.
const RENDER_COMMENT: &str =
    "SELECT format('COMMENT ON MATERIALIZED VIEW %I IS %L', $1::text, $2::text) AS statement";

// Utility statements such as CREATE VIEW cannot take bind parameters, so the
// engine quotes each value and the literal is spliced into the statement.
const QUOTE_LITERAL: &str = "SELECT quote_nullable($1::text) AS literal";

const CURRENT_TIMESTAMP: &str = "SELECT now()::text AS now";

// Text that does not look like `now()::text` yields NULL instead of a cast
// error, which would abort an enclosing transaction.
const SECONDS_SINCE: &str = concat!(
    "SELECT CASE WHEN $1::text ~ ",
    r"'^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(\.\d+)?([+-]\d{2}(:?\d{2})?|Z)?$' ",
    "THEN EXTRACT(EPOCH FROM (now() - $1::text::timestamptz))::float8 ",
    "END AS age"
);

const LIST_COLUMNS: &str = concat!(
    "SELECT attr.attname AS column_name ",
    "FROM pg_catalog.pg_attribute attr ",
    "JOIN pg_catalog.pg_class cls ",
    "  ON cls.oid = attr.attrelid ",
    "WHERE cls.relname = $1 ",
    "  AND pg_catalog.pg_table_is_visible(cls.oid) ",
    "  AND attr.attnum > 0 ",
    "  AND NOT attr.attisdropped ",
    "ORDER BY attr.attnum"
);

/// View store executing statements on a PostgreSQL connection.
pub struct PostgresViewStore {
    client: Client,
}

impl PostgresViewStore {
    /// Open a connection to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ViewStoreError::Connection`] when the server cannot be
    /// reached or rejects the credentials.
    pub fn connect(database_url: &str) -> Result<Self, ViewStoreError> {
        let client = Client::connect(database_url, NoTls)
            .map_err(|error| ViewStoreError::connection(describe(&error)))?;
        Ok(Self::from_client(client))
    }

    /// Wrap an existing connection.
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Release the underlying connection.
    #[must_use]
    pub fn into_client(self) -> Client {
        self.client
    }
}

impl std::fmt::Debug for PostgresViewStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresViewStore")
            .field("closed", &self.client.is_closed())
            .finish_non_exhaustive()
    }
}

impl StatementExecutor for PostgresViewStore {
    fn execute(&mut self, statement: &SqlStatement) -> Result<(), ViewStoreError> {
        PgExecutor(&mut self.client).execute(statement)
    }

    fn current_timestamp(&mut self) -> Result<String, ViewStoreError> {
        PgExecutor(&mut self.client).current_timestamp()
    }

    fn seconds_since(&mut self, timestamp: &str) -> Result<f64, ViewStoreError> {
        PgExecutor(&mut self.client).seconds_since(timestamp)
    }

    fn read_comment(&mut self, relation: &str) -> Result<Option<String>, ViewStoreError> {
        PgExecutor(&mut self.client).read_comment(relation)
    }

    fn write_comment(&mut self, relation: &str, comment: &str) -> Result<(), ViewStoreError> {
        PgExecutor(&mut self.client).write_comment(relation, comment)
    }

    fn list_columns(&mut self, relation: &str) -> Result<Vec<String>, ViewStoreError> {
        PgExecutor(&mut self.client).list_columns(relation)
    }
}

impl ViewStore for PostgresViewStore {
    fn atomically(&mut self, work: &mut AtomicWork<'_>) -> Result<(), ViewError> {
        let mut transaction = self
            .client
            .transaction()
            .map_err(|error| ViewStoreError::transaction(describe(&error)))?;

        match work(&mut PgExecutor(&mut transaction)) {
            Ok(()) => {
                transaction
                    .commit()
                    .map_err(|error| ViewStoreError::transaction(describe(&error)))?;
                debug!("transaction committed");
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_error) = transaction.rollback() {
                    warn!(error = %rollback_error, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Executor over either a plain connection or an open transaction.
struct PgExecutor<'c, C>(&'c mut C);

impl<C: GenericClient> PgExecutor<'_, C> {
    fn quote_literal(&mut self, param: &SqlParam) -> Result<String, ViewStoreError> {
        let text = param_text(param);
        let row = self
            .0
            .query_one(QUOTE_LITERAL, &[&text])
            .map_err(|error| ViewStoreError::query(describe(&error)))?;
        column(&row, "literal")
    }
}

impl<C: GenericClient> StatementExecutor for PgExecutor<'_, C> {
    fn execute(&mut self, statement: &SqlStatement) -> Result<(), ViewStoreError> {
        let sql = match statement.params() {
            None | Some([]) => statement.sql().to_owned(),
            Some(params) => {
                let literals = params
                    .iter()
                    .map(|param| self.quote_literal(param))
                    .collect::<Result<Vec<_>, _>>()?;
                inline_params(statement.sql(), &literals)
            }
        };
        self.0
            .batch_execute(&sql)
            .map_err(|error| ViewStoreError::execution(sql.as_str(), describe(&error)))
    }

    fn current_timestamp(&mut self) -> Result<String, ViewStoreError> {
        let row = self
            .0
            .query_one(CURRENT_TIMESTAMP, &[])
            .map_err(|error| ViewStoreError::query(describe(&error)))?;
        column(&row, "now")
    }

    fn seconds_since(&mut self, timestamp: &str) -> Result<f64, ViewStoreError> {
        let row = self
            .0
            .query_one(SECONDS_SINCE, &[&timestamp])
            .map_err(|error| ViewStoreError::query(describe(&error)))?;
        column::<Option<f64>>(&row, "age")?
            .ok_or_else(|| ViewStoreError::query(format!("unrecognised timestamp '{timestamp}'")))
    }

    fn read_comment(&mut self, relation: &str) -> Result<Option<String>, ViewStoreError> {
        let row = self
            .0
            .query_opt(READ_COMMENT, &[&relation])
            .map_err(|error| ViewStoreError::query(describe(&error)))?;
        match row {
            Some(found) => column::<Option<String>>(&found, "comment"),
            None => Ok(None),
        }
    }

    fn write_comment(&mut self, relation: &str, comment: &str) -> Result<(), ViewStoreError> {
        let row = self
            .0
            .query_one(RENDER_COMMENT, &[&relation, &comment])
            .map_err(|error| ViewStoreError::query(describe(&error)))?;
        let statement: String = column(&row, "statement")?;
        self.0
            .batch_execute(&statement)
            .map_err(|error| ViewStoreError::execution(statement.as_str(), describe(&error)))
    }

    fn list_columns(&mut self, relation: &str) -> Result<Vec<String>, ViewStoreError> {
        let rows = self
            .0
            .query(LIST_COLUMNS, &[&relation])
            .map_err(|error| ViewStoreError::query(describe(&error)))?;
        rows.iter().map(|row| column(row, "column_name")).collect()
    }
}

fn param_text(param: &SqlParam) -> Option<String> {
    match param {
        SqlParam::Null => None,
        SqlParam::Bool(value) => Some(value.to_string()),
        SqlParam::Integer(value) => Some(value.to_string()),
        SqlParam::Float(value) => Some(value.to_string()),
        SqlParam::Text(value) => Some(value.clone()),
    }
}

/// Replace `$n` placeholders with `literals[n - 1]`.
///
/// Quoted literals, quoted identifiers, dollar-quoted bodies and comments are
/// copied unchanged, as is a `$` continuing an identifier. Placeholders
/// beyond the supplied literals are left for the engine to report.
fn inline_params(sql: &str, literals: &[String]) -> String {
    let mut rendered = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        let previous = rendered.chars().next_back();
        rendered.push(ch);
        match ch {
            '\'' => {
                let escapes = previous.is_some_and(|before| before.eq_ignore_ascii_case(&'e'));
                copy_quoted(&mut chars, &mut rendered, '\'', escapes);
            }
            '"' => copy_quoted(&mut chars, &mut rendered, '"', false),
            '-' if chars.next_if_eq(&'-').is_some() => {
                rendered.push('-');
                copy_line_comment(&mut chars, &mut rendered);
            }
            '/' if chars.next_if_eq(&'*').is_some() => {
                rendered.push('*');
                copy_block_comment(&mut chars, &mut rendered);
            }
            '$' if !previous.is_some_and(is_identifier_char) => {
                rendered.pop();
                splice_dollar(&mut chars, &mut rendered, literals);
            }
            _ => {}
        }
    }
    rendered
}

type SqlChars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

const fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || !ch.is_ascii()
}

/// Copy up to and including the closing `quote`; a doubled quote stays
/// inside the literal.
fn copy_quoted(chars: &mut SqlChars<'_>, rendered: &mut String, quote: char, escapes: bool) {
    while let Some(ch) = chars.next() {
        rendered.push(ch);
        if escapes && ch == '\\' {
            if let Some(escaped) = chars.next() {
                rendered.push(escaped);
            }
        } else if ch == quote {
            match chars.next_if_eq(&quote) {
                Some(doubled) => rendered.push(doubled),
                None => return,
            }
        }
    }
}

fn copy_line_comment(chars: &mut SqlChars<'_>, rendered: &mut String) {
    for ch in chars.by_ref() {
        rendered.push(ch);
        if ch == '\n' {
            return;
        }
    }
}

/// Block comments nest.
fn copy_block_comment(chars: &mut SqlChars<'_>, rendered: &mut String) {
    let mut depth = 1_usize;
    while let Some(ch) = chars.next() {
        rendered.push(ch);
        if ch == '/' && chars.next_if_eq(&'*').is_some() {
            rendered.push('*');
            depth = depth.saturating_add(1);
        } else if ch == '*' && chars.next_if_eq(&'/').is_some() {
            rendered.push('/');
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return;
            }
        }
    }
}

/// Handle the text after a standalone `$`: a positional placeholder, a
/// dollar-quoted body, or a plain character.
fn splice_dollar(chars: &mut SqlChars<'_>, rendered: &mut String, literals: &[String]) {
    let mut digits = String::new();
    while let Some(digit) = chars.next_if(char::is_ascii_digit) {
        digits.push(digit);
    }
    if !digits.is_empty() {
        let literal = digits
            .parse::<usize>()
            .ok()
            .and_then(|position| position.checked_sub(1))
            .and_then(|index| literals.get(index));
        match literal {
            Some(value) => rendered.push_str(value),
            None => {
                rendered.push('$');
                rendered.push_str(&digits);
            }
        }
        return;
    }

    let mut tag = String::new();
    while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
        tag.push(ch);
    }
    rendered.push('$');
    rendered.push_str(&tag);
    if chars.next_if_eq(&'$').is_none() {
        return;
    }
    rendered.push('$');

    let delimiter = format!("${tag}$");
    let mut body = String::new();
    for ch in chars.by_ref() {
        body.push(ch);
        if body.ends_with(&delimiter) {
            break;
        }
    }
    rendered.push_str(&body);
}

fn column<T>(row: &Row, name: &str) -> Result<T, ViewStoreError>
where
    T: for<'a> postgres::types::FromSql<'a>,
{
    row.try_get(name)
        .map_err(|error| ViewStoreError::query(format!("column {name}: {error}")))
}

/// Prefer the server's message over the driver's generic wrapper text.
fn describe(error: &postgres::Error) -> String {
    error
        .as_db_error()
        .map_or_else(|| error.to_string(), |db| db.message().to_owned())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn literals(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[rstest]
    #[case("SELECT $1", &["'C'"], "SELECT 'C'")]
    #[case("SELECT $2, $1", &["1", "'two'"], "SELECT 'two', 1")]
    #[case("SELECT $10", &["a", "b", "c", "d", "e", "f", "g", "h", "i", "'ten'"], "SELECT 'ten'")]
    #[case("SELECT $$body$$, $1", &["NULL"], "SELECT $$body$$, NULL")]
    #[case("SELECT $3", &["1"], "SELECT $3")]
    #[case("SELECT $0", &["1"], "SELECT $0")]
    #[case(
        "SELECT 'US$1' AS label, amount$1 FROM t WHERE code = $1",
        &["'C'"],
        "SELECT 'US$1' AS label, amount$1 FROM t WHERE code = 'C'"
    )]
    #[case("SELECT 'it''s $1', $1", &["'C'"], "SELECT 'it''s $1', 'C'")]
    #[case("SELECT E'\\' $1', $1", &["'C'"], "SELECT E'\\' $1', 'C'")]
    #[case(
        "SELECT \"col$1\", \"a\"\"$1\" FROM t WHERE a = $1",
        &["2"],
        "SELECT \"col$1\", \"a\"\"$1\" FROM t WHERE a = 2"
    )]
    #[case("SELECT $fn$ $1 $fn$, $1", &["'C'"], "SELECT $fn$ $1 $fn$, 'C'")]
    #[case("SELECT $1 -- $1\nFROM t", &["'C'"], "SELECT 'C' -- $1\nFROM t")]
    #[case("SELECT /* $1 /* $1 */ $1 */ $1", &["'C'"], "SELECT /* $1 /* $1 */ $1 */ 'C'")]
    #[case("SELECT a-$1, b/$2", &["1", "2"], "SELECT a-1, b/2")]
    fn placeholders_are_replaced_by_position(
        #[case] sql: &str,
        #[case] values: &[&str],
        #[case] expected: &str,
    ) {
        assert_eq!(inline_params(sql, &literals(values)), expected);
    }

    #[rstest]
    #[case(SqlParam::Null, None)]
    #[case(SqlParam::Bool(true), Some("true"))]
    #[case(SqlParam::Integer(-7), Some("-7"))]
    #[case(SqlParam::Text("O'Hara".to_owned()), Some("O'Hara"))]
    fn params_are_sent_as_text(#[case] param: SqlParam, #[case] expected: Option<&str>) {
        assert_eq!(param_text(&param).as_deref(), expected);
    }

    #[test]
    fn refresh_age_query_guards_the_timestamp_cast() {
        let guard = SECONDS_SINCE.find("CASE WHEN").expect("guard present");
        let cast = SECONDS_SINCE.find("::timestamptz").expect("cast present");
        assert!(guard < cast);
    }

    #[test]
    fn catalog_queries_stay_in_visible_schemas() {
        assert!(READ_COMMENT.contains("pg_table_is_visible"));
        assert!(LIST_COLUMNS.contains("pg_table_is_visible"));
    }
}
