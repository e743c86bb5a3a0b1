use super::{quote_segments, Platform};

/// SQLite dialect.
///
/// `REGEXP` only works when the connection registers a `regexp` function.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlitePlatform;

impl Platform for SqlitePlatform {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, id: &str) -> String {
        quote_segments(id, '"')
    }

    fn current_timestamp_sql(&self, _precision: Option<u8>) -> String {
        "CURRENT_TIMESTAMP".to_owned()
    }

    fn read_lock_sql(&self) -> &'static str {
        ""
    }

    fn write_lock_sql(&self) -> &'static str {
        ""
    }

    fn uses_returning_statement(&self) -> bool {
        true
    }

    // Row values are only accepted in comparisons.
    fn count_distinct_columns_sql(&self, columns: &[String]) -> String {
        columns.join(" || '|' || ")
    }

    fn uses_default_keyword(&self) -> bool {
        false
    }

    fn regexp_operator(&self, _flags: &str) -> Option<&'static str> {
        Some("REGEXP")
    }

    fn truncate_sql(&self, table: &str) -> String {
        format!("DELETE FROM {}", self.quote_identifier(table))
    }

    fn offset_without_limit(&self) -> Option<&'static str> {
        Some("-1")
    }
}
