mod common;

use std::io::Write;

use ormql::query::{AliasStrategy, ConfigError, QueryConfig};
use serde_json::json;
use tempfile::NamedTempFile;

use common::context;

#[test]
fn loads_config_file_and_applies_it() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "alias_prefix = \"t_\"").unwrap();
    writeln!(file, "elide_empty_nin = true").unwrap();

    let config = QueryConfig::load(file.path()).unwrap();
    assert_eq!(config.alias_strategy, AliasStrategy::Sequential);
    assert_eq!(config.alias_prefix, "t_");

    let mut qb = context()
        .with_config(config)
        .query("Book")
        .r#where(json!({ "author": { "name": "x" }, "id": { "$nin": [] } }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT t_0.* FROM book AS t_0 LEFT JOIN author AS t_1 ON t_0.author_id = t_1.id WHERE t_1.name = ?"
    );
}

#[test]
fn table_name_aliases_fall_back_to_numbered_names() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "alias_strategy = \"table_name\"").unwrap();
    let config = QueryConfig::load(file.path()).unwrap();

    let mut qb = context()
        .with_config(config)
        .query("Book")
        .r#where(json!({ "author": { "books": { "title": "x" } } }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT book.* FROM book \
         LEFT JOIN author ON book.author_id = author.id \
         LEFT JOIN book AS book2 ON author.id = book2.author_id \
         WHERE book2.title = ?"
    );
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = QueryConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("absent.toml"));
}
