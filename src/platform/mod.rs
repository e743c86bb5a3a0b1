//! SQL dialect collaborators.
//!
//! A [`Platform`] answers the dialect questions the compiler cannot decide on
//! its own: identifier quoting, placeholder syntax, lock clauses, and which
//! comparisons the database understands natively.

use std::fmt;

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlPlatform;
pub use postgres::PostgreSqlPlatform;
pub use sqlite::SqlitePlatform;

/// Dialect hooks consulted while emitting SQL.
pub trait Platform: fmt::Debug + Send + Sync {
    /// Short dialect name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Quotes an identifier. Dotted identifiers are quoted per segment and `*`
    /// passes through.
    fn quote_identifier(&self, id: &str) -> String;

    /// Placeholder for the parameter at 1-based `index`.
    fn parameter_placeholder(&self, index: usize) -> String {
        let _ = index;
        "?".to_owned()
    }

    /// Expression for the current timestamp, optionally with fractional precision.
    fn current_timestamp_sql(&self, precision: Option<u8>) -> String {
        match precision {
            Some(p) => format!("CURRENT_TIMESTAMP({p})"),
            None => "CURRENT_TIMESTAMP".to_owned(),
        }
    }

    /// Clause appended for shared row locks. Empty when unsupported.
    fn read_lock_sql(&self) -> &'static str {
        "FOR SHARE"
    }

    /// Clause appended for exclusive row locks. Empty when unsupported.
    fn write_lock_sql(&self) -> &'static str {
        "FOR UPDATE"
    }

    /// True when inserts can report generated keys through `RETURNING`.
    fn uses_returning_statement(&self) -> bool {
        false
    }

    /// True when `(a, b) IN ((?, ?))` style row-value comparisons are accepted.
    fn allows_row_value_comparison(&self) -> bool {
        true
    }

    /// Argument of `COUNT(DISTINCT ...)` over several columns.
    fn count_distinct_columns_sql(&self, columns: &[String]) -> String {
        if self.allows_row_value_comparison() {
            format!("({})", columns.join(", "))
        } else {
            columns.join(" || '|' || ")
        }
    }

    /// True when `DEFAULT` may stand in for a missing value in `VALUES` rows.
    fn uses_default_keyword(&self) -> bool {
        true
    }

    /// Operator for regular expression matching, if the dialect has one.
    fn regexp_operator(&self, flags: &str) -> Option<&'static str> {
        let _ = flags;
        None
    }

    /// Operator used for `$ilike`.
    fn ilike_operator(&self) -> &'static str {
        "LIKE"
    }

    /// Statement that empties a table.
    fn truncate_sql(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.quote_identifier(table))
    }

    /// `LIMIT` literal emitted when only an offset is set, for dialects that
    /// cannot express a bare `OFFSET`.
    fn offset_without_limit(&self) -> Option<&'static str> {
        None
    }

    /// Tail of an insert that supplies no column values.
    fn empty_insert_sql(&self) -> &'static str {
        "DEFAULT VALUES"
    }
}

/// Dialect-neutral platform: no identifier quoting, `?` placeholders, no
/// row-value comparisons, no regex operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericPlatform;

impl Platform for GenericPlatform {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn quote_identifier(&self, id: &str) -> String {
        id.to_owned()
    }

    fn allows_row_value_comparison(&self) -> bool {
        false
    }
}

/// Quotes each dotted segment with `quote`, doubling embedded quote characters.
pub(crate) fn quote_segments(id: &str, quote: char) -> String {
    let doubled = format!("{quote}{quote}");
    id.split('.')
        .map(|segment| {
            if segment == "*" {
                segment.to_owned()
            } else {
                let escaped = segment.replace(quote, &doubled);
                format!("{quote}{escaped}{quote}")
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}
