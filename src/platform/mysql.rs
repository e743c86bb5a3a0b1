use super::{quote_segments, Platform};

/// MySQL dialect.
#[derive(Clone, Copy, Debug, Default)]
pub struct MySqlPlatform;

impl Platform for MySqlPlatform {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, id: &str) -> String {
        quote_segments(id, '`')
    }

    fn read_lock_sql(&self) -> &'static str {
        "LOCK IN SHARE MODE"
    }

    fn count_distinct_columns_sql(&self, columns: &[String]) -> String {
        columns.join(", ")
    }

    fn regexp_operator(&self, _flags: &str) -> Option<&'static str> {
        Some("REGEXP")
    }

    // Largest unsigned BIGINT; MySQL has no bare OFFSET.
    fn offset_without_limit(&self) -> Option<&'static str> {
        Some("18446744073709551615")
    }

    fn empty_insert_sql(&self) -> &'static str {
        "() VALUES ()"
    }
}
