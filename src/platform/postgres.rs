use super::{quote_segments, Platform};

/// PostgreSQL dialect: numbered `$n` placeholders, `~` regex matching, `ILIKE`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PostgreSqlPlatform;

impl Platform for PostgreSqlPlatform {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn quote_identifier(&self, id: &str) -> String {
        quote_segments(id, '"')
    }

    fn parameter_placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn uses_returning_statement(&self) -> bool {
        true
    }

    fn regexp_operator(&self, flags: &str) -> Option<&'static str> {
        if flags.contains('i') {
            Some("~*")
        } else {
            Some("~")
        }
    }

    fn ilike_operator(&self) -> &'static str {
        "ILIKE"
    }
}
