//! Parameterized SQL fragments for archive table statements.
//!
//! Archive tables are created per month, so their names cannot be baked into
//! static queries. Table and column names are validated identifiers and get
//! interpolated (quoted); every value predicate is rendered as a placeholder
//! and returned alongside the SQL in bind order.

use std::{fmt::Write as _, ops::Range};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::db::error::{DbError, DbResult};

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"));

/// Placeholder style of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?` placeholders, `rowid` row addressing.
    Sqlite,
    /// `$n` placeholders, `ctid` row addressing.
    Postgres,
}

impl Dialect {
    fn row_locator(self) -> &'static str {
        match self {
            Dialect::Sqlite => "rowid",
            Dialect::Postgres => "ctid",
        }
    }
}

/// A validated SQL identifier (table or column name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: &str) -> DbResult<Self> {
        if IDENT_RE.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(DbError::InvalidIdentifier(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form, valid for both SQLite and PostgreSQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

/// A value bound to a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// Row filter over an archive table.
///
/// Column names are `'static` because they only ever come from the archive
/// schema known at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    NotEq(&'static str, SqlValue),
    In {
        column: &'static str,
        values: Vec<SqlValue>,
        negated: bool,
    },
    Like {
        column: &'static str,
        pattern: String,
        negated: bool,
    },
    /// `column >= start AND column < end`
    Between(&'static str, Range<i64>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn not_eq(column: &'static str, value: impl Into<SqlValue>) -> Self {
        Predicate::NotEq(column, value.into())
    }

    pub fn is_in<V: Into<SqlValue>>(
        column: &'static str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::In {
            column,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<V: Into<SqlValue>>(
        column: &'static str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::In {
            column,
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn like(column: &'static str, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            column,
            pattern: pattern.into(),
            negated: false,
        }
    }

    pub fn not_like(column: &'static str, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            column,
            pattern: pattern.into(),
            negated: true,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    fn write(&self, out: &mut SqlWriter) {
        match self {
            Predicate::NotEq(column, value) => {
                let _ = write!(out.sql, "{column} <> ");
                out.push_value(value.clone());
            }
            Predicate::In {
                values, negated, ..
            } if values.is_empty() => {
                // `x IN ()` is not valid SQL; an empty list matches nothing.
                out.sql.push_str(if *negated { "1 = 1" } else { "1 = 0" });
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                let op = if *negated { "NOT IN" } else { "IN" };
                let _ = write!(out.sql, "{column} {op} (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        out.sql.push_str(", ");
                    }
                    out.push_value(value.clone());
                }
                out.sql.push(')');
            }
            Predicate::Like {
                column,
                pattern,
                negated,
            } => {
                let op = if *negated { "NOT LIKE" } else { "LIKE" };
                let _ = write!(out.sql, "{column} {op} ");
                out.push_value(SqlValue::Text(pattern.clone()));
            }
            Predicate::Between(column, range) => {
                let _ = write!(out.sql, "{column} >= ");
                out.push_value(SqlValue::Int(range.start));
                let _ = write!(out.sql, " AND {column} < ");
                out.push_value(SqlValue::Int(range.end));
            }
            Predicate::And(parts) => out.write_joined(parts, " AND ", "1 = 1"),
            Predicate::Or(parts) => out.write_joined(parts, " OR ", "1 = 0"),
        }
    }
}

/// Rendered SQL and the values to bind, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

struct SqlWriter {
    dialect: Dialect,
    sql: String,
    values: Vec<SqlValue>,
}

impl SqlWriter {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            values: Vec::new(),
        }
    }

    fn push_value(&mut self, value: SqlValue) {
        self.values.push(value);
        match self.dialect {
            Dialect::Sqlite => self.sql.push('?'),
            Dialect::Postgres => {
                let _ = write!(self.sql, "${}", self.values.len());
            }
        }
    }

    fn write_joined(&mut self, parts: &[Predicate], sep: &str, empty: &str) {
        if parts.is_empty() {
            self.sql.push_str(empty);
            return;
        }
        self.sql.push('(');
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(sep);
            }
            part.write(self);
        }
        self.sql.push(')');
    }

    fn push_where(&mut self, filter: Option<&Predicate>) {
        if let Some(filter) = filter {
            self.sql.push_str(" WHERE ");
            filter.write(self);
        }
    }

    fn finish(self) -> Rendered {
        Rendered {
            sql: self.sql,
            values: self.values,
        }
    }
}

fn with_range(filter: Option<&Predicate>, column: &'static str, range: Range<i64>) -> Predicate {
    let bounds = Predicate::Between(column, range);
    match filter {
        Some(filter) => filter.clone().and(bounds),
        None => bounds,
    }
}

/// A standalone ` WHERE ...` fragment (empty when there is no filter).
pub fn where_clause(dialect: Dialect, filter: Option<&Predicate>) -> Rendered {
    let mut out = SqlWriter::new(dialect);
    out.push_where(filter);
    out.finish()
}

/// `SELECT COUNT(*)` over one id sub-range.
pub fn count_in_range(
    dialect: Dialect,
    table: &Ident,
    id_column: &'static str,
    filter: Option<&Predicate>,
    range: Range<i64>,
) -> Rendered {
    let mut out = SqlWriter::new(dialect);
    let _ = write!(out.sql, "SELECT COUNT(*) FROM {}", table.quoted());
    out.push_where(Some(&with_range(filter, id_column, range)));
    out.finish()
}

/// `SELECT DISTINCT id_column` over one id sub-range.
pub fn fetch_ids_in_range(
    dialect: Dialect,
    table: &Ident,
    id_column: &'static str,
    filter: Option<&Predicate>,
    range: Range<i64>,
) -> Rendered {
    let mut out = SqlWriter::new(dialect);
    let _ = write!(
        out.sql,
        "SELECT DISTINCT {id_column} FROM {}",
        table.quoted()
    );
    out.push_where(Some(&with_range(filter, id_column, range)));
    let _ = write!(out.sql, " ORDER BY {id_column} ASC");
    out.finish()
}

/// Deletes at most `limit` matching rows, lowest ids first.
pub fn delete_chunk(
    dialect: Dialect,
    table: &Ident,
    order_column: &'static str,
    filter: Option<&Predicate>,
    limit: u64,
) -> Rendered {
    let locator = dialect.row_locator();
    let quoted = table.quoted();
    let mut out = SqlWriter::new(dialect);
    let _ = write!(
        out.sql,
        "DELETE FROM {quoted} WHERE {locator} IN (SELECT {locator} FROM {quoted}"
    );
    out.push_where(filter);
    let _ = write!(out.sql, " ORDER BY {order_column} ASC LIMIT ");
    out.push_value(SqlValue::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
    out.sql.push(')');
    out.finish()
}

/// Largest id in the table, `0` when empty.
pub fn max_id(table: &Ident, column: &Ident) -> String {
    format!(
        "SELECT CAST(COALESCE(MAX({}), 0) AS BIGINT) FROM {}",
        column.as_str(),
        table.quoted()
    )
}

/// Binds every [`SqlValue`] of a rendered statement, in order.
#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
macro_rules! bind_values {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                $crate::db::query::SqlValue::Int(v) => query.bind(*v),
                $crate::db::query::SqlValue::Text(v) => query.bind(v.as_str()),
            };
        }
        query
    }};
}

#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
pub(crate) use bind_values;

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Ident {
        Ident::new("archive_blob_2013_01").unwrap()
    }

    #[test]
    fn test_ident_rejects_injection() {
        assert!(Ident::new("archive_numeric_2013_01").is_ok());
        assert!(Ident::new("piwik_archive_blob_2012_12").is_ok());
        assert!(Ident::new("t; DROP TABLE x").is_err());
        assert!(Ident::new("\"quoted\"").is_err());
        assert!(Ident::new("").is_err());
        assert!(Ident::new("1table").is_err());
    }

    #[test]
    fn test_count_in_range_sqlite() {
        let filter = Predicate::not_in("period", [1_i64, 3]);
        let rendered = count_in_range(
            Dialect::Sqlite,
            &table(),
            "idarchive",
            Some(&filter),
            0..100_000,
        );
        assert_eq!(
            rendered.sql,
            "SELECT COUNT(*) FROM \"archive_blob_2013_01\" WHERE \
             (period NOT IN (?, ?) AND idarchive >= ? AND idarchive < ?)"
        );
        assert_eq!(
            rendered.values,
            vec![
                SqlValue::Int(1),
                SqlValue::Int(3),
                SqlValue::Int(0),
                SqlValue::Int(100_000)
            ]
        );
    }

    #[test]
    fn test_postgres_placeholders_are_numbered() {
        let filter = Predicate::not_eq("name", "done").and(Predicate::like("name", "done_%.%"));
        let rendered = fetch_ids_in_range(
            Dialect::Postgres,
            &table(),
            "idarchive",
            Some(&filter),
            100..200,
        );
        assert_eq!(
            rendered.sql,
            "SELECT DISTINCT idarchive FROM \"archive_blob_2013_01\" WHERE \
             (name <> $1 AND name LIKE $2 AND idarchive >= $3 AND idarchive < $4) \
             ORDER BY idarchive ASC"
        );
        assert_eq!(rendered.values.len(), 4);
    }

    #[test]
    fn test_or_nested_inside_range() {
        let filter =
            Predicate::not_in("period", [1_i64]).or(Predicate::is_in("idarchive", [7_i64, 9]));
        let rendered = count_in_range(Dialect::Sqlite, &table(), "idarchive", Some(&filter), 0..10);
        assert_eq!(
            rendered.sql,
            "SELECT COUNT(*) FROM \"archive_blob_2013_01\" WHERE \
             ((period NOT IN (?) OR idarchive IN (?, ?)) AND idarchive >= ? AND idarchive < ?)"
        );
    }

    #[test]
    fn test_empty_lists_render_constants() {
        let none: [i64; 0] = [];
        let filter = Predicate::is_in("idarchive", none).or(Predicate::not_in("period", none));
        let rendered = count_in_range(Dialect::Sqlite, &table(), "idarchive", Some(&filter), 0..1);
        assert!(rendered.sql.contains("(1 = 0 OR 1 = 1)"));
        assert_eq!(rendered.values.len(), 2);
    }

    #[test]
    fn test_delete_chunk_without_filter_has_no_empty_where() {
        let rendered = delete_chunk(Dialect::Sqlite, &table(), "idarchive", None, 500);
        assert_eq!(
            rendered.sql,
            "DELETE FROM \"archive_blob_2013_01\" WHERE rowid IN \
             (SELECT rowid FROM \"archive_blob_2013_01\" ORDER BY idarchive ASC LIMIT ?)"
        );
        assert_eq!(rendered.values, vec![SqlValue::Int(500)]);
        assert!(!rendered.sql.contains("WHERE  "));
    }

    #[test]
    fn test_delete_chunk_postgres_uses_ctid() {
        let filter = Predicate::not_like("name", "done%");
        let rendered = delete_chunk(Dialect::Postgres, &table(), "idarchive", Some(&filter), 10);
        assert_eq!(
            rendered.sql,
            "DELETE FROM \"archive_blob_2013_01\" WHERE ctid IN \
             (SELECT ctid FROM \"archive_blob_2013_01\" WHERE name NOT LIKE $1 \
             ORDER BY idarchive ASC LIMIT $2)"
        );
    }

    #[test]
    fn test_where_clause_fragment() {
        assert_eq!(where_clause(Dialect::Postgres, None).sql, "");
        let filter = Predicate::is_in("option_name", ["a", "b"]);
        let rendered = where_clause(Dialect::Postgres, Some(&filter));
        assert_eq!(rendered.sql, " WHERE option_name IN ($1, $2)");
    }

    #[test]
    fn test_values_never_interpolated() {
        let filter = Predicate::not_in("name", ["nb_visits'); DROP TABLE x; --"]);
        let rendered = delete_chunk(Dialect::Sqlite, &table(), "idarchive", Some(&filter), 1);
        assert!(!rendered.sql.contains("DROP TABLE"));
        assert_eq!(
            rendered.values[0],
            SqlValue::Text("nb_visits'); DROP TABLE x; --".into())
        );
    }
}
