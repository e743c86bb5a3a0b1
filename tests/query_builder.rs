mod common;

use std::collections::HashSet;

use ormql::platform::{MySqlPlatform, PostgreSqlPlatform, SqlitePlatform};
use ormql::query::{EntityRef, LockMode, QueryConfig, QueryKind, RegexPattern, Value};
use serde_json::json;

use common::{context, context_for, init_tracing, readable_context};

fn sql_and_params(qb: &mut ormql::QueryBuilder) -> (String, Vec<Value>) {
    let compiled = qb.compile().expect("query should compile");
    (compiled.sql, compiled.params)
}

#[test]
fn insert_lists_columns_in_data_order() {
    init_tracing();
    let mut qb = context()
        .query("Publisher")
        .insert(json!({ "name": "test 123", "type": "GLOBAL" }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(sql, "INSERT INTO publisher (name, type) VALUES (?, ?)");
    assert_eq!(params, vec![Value::from("test 123"), Value::from("GLOBAL")]);
    assert_eq!(qb.kind(), QueryKind::Insert);
}

#[test]
fn update_renders_unqualified_columns() {
    let mut qb = context()
        .query("Publisher")
        .update(json!({ "name": "test 123" }))
        .r#where(json!({ "id": 123 }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(sql, "UPDATE publisher SET name = ? WHERE id = ?");
    assert_eq!(params, vec![Value::from("test 123"), Value::Int(123)]);
    assert_eq!(
        qb.get_formatted_query().unwrap(),
        "UPDATE publisher SET name = 'test 123' WHERE id = 123"
    );
}

#[test]
fn nested_relation_criteria_join_through_collection() {
    let mut qb = readable_context()
        .query("Publisher")
        .r#where(json!({ "books": { "author": 123 } }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT publisher.* FROM publisher \
         LEFT JOIN book ON publisher.id = book.publisher_id \
         WHERE book.author_id = ?"
    );
    assert_eq!(params, vec![Value::Int(123)]);
}

#[test]
fn or_group_in_delete_is_parenthesized() {
    let mut qb = context()
        .query("Item")
        .delete()
        .r#where(json!({ "$or": [{ "a": 1 }, { "b": 2 }] }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(sql, "DELETE FROM item WHERE (a = ? OR b = ?)");
    assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn empty_in_matches_nothing() {
    let mut qb = context()
        .query("Publisher")
        .r#where(json!({ "id": { "$in": [] } }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(sql, "SELECT e0.* FROM publisher AS e0 WHERE 1 = 0");
    assert!(params.is_empty());
}

#[test]
fn empty_nin_matches_everything_or_is_elided() {
    let mut qb = context()
        .query("Publisher")
        .r#where(json!({ "id": { "$nin": [] } }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.* FROM publisher AS e0 WHERE 1 = 1"
    );

    let config = QueryConfig {
        elide_empty_nin: true,
        ..QueryConfig::default()
    };
    let mut qb = context()
        .with_config(config)
        .query("Publisher")
        .r#where(json!({ "id": { "$nin": [] } }));
    assert_eq!(qb.get_query().unwrap(), "SELECT e0.* FROM publisher AS e0");
}

#[test]
fn relation_path_is_joined_once() {
    let mut qb = context()
        .query("Book")
        .r#where(json!({ "author.name": "Tolkien", "author.email": "jrr@example.com" }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT e0.* FROM book AS e0 \
         LEFT JOIN author AS e1 ON e0.author_id = e1.id \
         WHERE e1.name = ? AND e1.email = ?"
    );
    assert_eq!(params.len(), 2);
    assert_eq!(qb.joins().count(), 1);
}

#[test]
fn every_join_gets_a_distinct_alias() {
    let mut qb = context().query("Book").r#where(json!({
        "author": { "name": "x", "books": { "title": "y" } },
        "publisher": { "name": "p" },
        "tags": { "name": "t" }
    }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT e0.* FROM book AS e0 \
         LEFT JOIN author AS e1 ON e0.author_id = e1.id \
         LEFT JOIN book AS e2 ON e1.id = e2.author_id \
         LEFT JOIN publisher AS e3 ON e0.publisher_id = e3.id \
         LEFT JOIN book_tags AS e5 ON e0.id = e5.book_id \
         LEFT JOIN tag AS e4 ON e5.tag_id = e4.id \
         WHERE e1.name = ? AND e2.title = ? AND e3.name = ? AND e4.name = ?"
    );
    assert_eq!(params.len(), 4);

    let aliases: HashSet<&str> = qb.joins().map(|join| join.alias.as_str()).collect();
    assert_eq!(aliases.len(), qb.joins().count());
    assert!(!aliases.contains(qb.alias()));
}

#[test]
fn owning_reference_by_primary_key_needs_no_join() {
    let mut qb = context()
        .query("Book")
        .r#where(json!({ "author": { "id": 1 } }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.* FROM book AS e0 WHERE e0.author_id = ?"
    );
    assert_eq!(qb.joins().count(), 0);
}

#[test]
fn collection_scalars_compare_target_primary_key() {
    let mut qb = context()
        .query("Publisher")
        .r#where(json!({ "books": [1, 2] }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT e0.* FROM publisher AS e0 \
         LEFT JOIN book AS e1 ON e0.id = e1.publisher_id \
         WHERE e1.id IN (?, ?)"
    );
    assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn many_to_many_joins_through_pivot() {
    let mut qb = context()
        .query("Book")
        .r#where(json!({ "tags": { "name": "fantasy" } }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.* FROM book AS e0 \
         LEFT JOIN book_tags AS e2 ON e0.id = e2.book_id \
         LEFT JOIN tag AS e1 ON e2.tag_id = e1.id \
         WHERE e1.name = ?"
    );

    let mut qb = context().query("Book").r#where(json!({ "tags": 3 }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.* FROM book AS e0 \
         LEFT JOIN book_tags AS e2 ON e0.id = e2.book_id \
         LEFT JOIN tag AS e1 ON e2.tag_id = e1.id \
         WHERE e1.id = ?"
    );
}

#[test]
fn inverse_one_to_one_scalar_joins_owner_side() {
    let mut qb = context().query("Author").r#where(json!({ "profile": 5 }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.* FROM author AS e0 \
         LEFT JOIN profile AS e1 ON e0.id = e1.author_id \
         WHERE e1.id = ?"
    );
}

#[test]
fn shorthand_operators_match_explicit_form() {
    let mut shorthand = context()
        .query("Author")
        .r#where(json!({ "age >": 18, "name:like": "A%" }));
    let mut explicit = context()
        .query("Author")
        .r#where(json!({ "age": { "$gt": 18 }, "name": { "$like": "A%" } }));
    let expected = "SELECT e0.* FROM author AS e0 WHERE e0.age > ? AND e0.name LIKE ?";
    assert_eq!(shorthand.get_query().unwrap(), expected);
    assert_eq!(explicit.get_query().unwrap(), expected);
    assert_eq!(shorthand.get_params().unwrap(), explicit.get_params().unwrap());
}

#[test]
fn null_and_exists_render_is_null_checks() {
    let mut qb = context().query("Author").r#where(json!({
        "email": null,
        "age": { "$ne": null },
        "name": { "$exists": false }
    }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT e0.* FROM author AS e0 \
         WHERE e0.email IS NULL AND e0.age IS NOT NULL AND e0.name IS NULL"
    );
    assert!(params.is_empty());
}

#[test]
fn not_group_wraps_condition() {
    let mut qb = context()
        .query("Author")
        .r#where(json!({ "$not": { "name": "a" } }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.* FROM author AS e0 WHERE NOT (e0.name = ?)"
    );
}

#[test]
fn entity_references_become_primary_keys() {
    let mut qb = context().query("Book").r#where(Value::object([(
        "author",
        Value::from(EntityRef::new("Author", 5)),
    )]));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(sql, "SELECT e0.* FROM book AS e0 WHERE e0.author_id = ?");
    assert_eq!(params, vec![Value::Int(5)]);

    let mut qb = context().query("Book").r#where(EntityRef::new("Book", 3));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.* FROM book AS e0 WHERE e0.id = ?"
    );

    let mut qb = context().query("Book").r#where(7);
    assert_eq!(qb.get_params().unwrap(), vec![Value::Int(7)]);
}

#[test]
fn null_criteria_select_everything() {
    let mut qb = context().query("Book").r#where(Value::Null);
    assert_eq!(qb.get_query().unwrap(), "SELECT e0.* FROM book AS e0");
}

#[test]
fn composite_keys_fall_back_without_row_values() {
    let mut qb = context()
        .query("Translation")
        .r#where(json!([[1, "en"], [2, "de"]]));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT e0.* FROM translation AS e0 \
         WHERE ((e0.book_id = ? AND e0.language = ?) OR (e0.book_id = ? AND e0.language = ?))"
    );
    assert_eq!(
        params,
        vec![
            Value::Int(1),
            Value::from("en"),
            Value::Int(2),
            Value::from("de")
        ]
    );
}

#[test]
fn composite_keys_use_row_values_when_supported() {
    let mut qb = context_for(SqlitePlatform)
        .query("Translation")
        .r#where(json!([[1, "en"], [2, "de"]]));
    assert_eq!(
        qb.get_query().unwrap(),
        r#"SELECT "e0".* FROM "translation" AS "e0" WHERE ("e0"."book_id", "e0"."language") IN ((?, ?), (?, ?))"#
    );

    let mut qb = context().query("Translation").r#where(json!([1, "en"]));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.* FROM translation AS e0 WHERE e0.book_id = ? AND e0.language = ?"
    );
}

#[test]
fn composite_key_counts() {
    let mut qb = context().query("Translation").count(None, false);
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT COUNT(*) AS count FROM translation AS e0"
    );

    let mut qb = context().query("Translation").count(None, true);
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT COUNT(DISTINCT e0.book_id || '|' || e0.language) AS count FROM translation AS e0"
    );

    let mut qb = context_for(PostgreSqlPlatform)
        .query("Translation")
        .count(None, true);
    assert_eq!(
        qb.get_query().unwrap(),
        r#"SELECT COUNT(DISTINCT ("e0"."book_id", "e0"."language")) AS "count" FROM "translation" AS "e0""#
    );
}

#[test]
fn primary_key_lists_under_relations_use_in() {
    for criteria in [
        json!({ "author": { "id": [1, 2] } }),
        json!({ "author.id": [1, 2] }),
    ] {
        let mut qb = context().query("Book").r#where(criteria);
        let (sql, params) = sql_and_params(&mut qb);
        assert_eq!(sql, "SELECT e0.* FROM book AS e0 WHERE e0.author_id IN (?, ?)");
        assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
    }
}

#[test]
fn lists_under_scalar_operators_are_rejected() {
    for criteria in [
        json!({ "title": { "$eq": ["a", "b"] } }),
        json!({ "price": { "$gt": [1, 2] } }),
    ] {
        let err = context()
            .query("Book")
            .r#where(criteria)
            .compile()
            .unwrap_err();
        assert_eq!(err.code(), "InvalidCondition");
    }
}

#[test]
fn simple_regex_becomes_like() {
    let mut qb = context().query("Book").r#where(Value::object([(
        "title",
        Value::from(RegexPattern::new("^Harry.*")),
    )]));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(sql, "SELECT e0.* FROM book AS e0 WHERE e0.title LIKE ?");
    assert_eq!(params, vec![Value::from("Harry%")]);
}

#[test]
fn advanced_regex_needs_a_regex_operator() {
    let criteria = json!({ "title": { "$re": "^The (Hobbit|Silmarillion)$" } });
    let err = context()
        .query("Book")
        .r#where(criteria.clone())
        .get_query()
        .unwrap_err();
    assert_eq!(err.code(), "UnsupportedRegex");

    let mut qb = context_for(SqlitePlatform).query("Book").r#where(criteria.clone());
    assert_eq!(
        qb.get_query().unwrap(),
        r#"SELECT "e0".* FROM "book" AS "e0" WHERE "e0"."title" REGEXP ?"#
    );

    let mut qb = context_for(PostgreSqlPlatform).query("Book").r#where(criteria);
    assert_eq!(
        qb.get_query().unwrap(),
        r#"SELECT "e0".* FROM "book" AS "e0" WHERE "e0"."title" ~ $1"#
    );
}

#[test]
fn postgres_numbers_placeholders_in_order() {
    let mut qb = context_for(PostgreSqlPlatform)
        .query("Author")
        .r#where(json!({
            "name": "a",
            "age": { "$gte": 1, "$lt": 9 },
            "email": { "$ilike": "%@x" }
        }))
        .limit(5)
        .offset(10);
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        r#"SELECT "e0".* FROM "author" AS "e0" WHERE "e0"."name" = $1 AND "e0"."age" >= $2 AND "e0"."age" < $3 AND "e0"."email" ILIKE $4 LIMIT $5 OFFSET $6"#
    );
    assert_eq!(
        params,
        vec![
            Value::from("a"),
            Value::Int(1),
            Value::Int(9),
            Value::from("%@x"),
            Value::Int(5),
            Value::Int(10)
        ]
    );
}

#[test]
fn mysql_offset_without_limit_uses_max_limit() {
    let mut qb = context_for(MySqlPlatform).query("Author").offset(5);
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT `e0`.* FROM `author` AS `e0` LIMIT 18446744073709551615 OFFSET ?"
    );
    assert_eq!(params, vec![Value::Int(5)]);
}

#[test]
fn pessimistic_locks_require_a_transaction() {
    let qb = context()
        .query("Book")
        .set_lock_mode(Some(LockMode::PessimisticWrite));
    assert_eq!(qb.error().map(|e| e.code()), Some("TransactionRequired"));

    let mut qb = context()
        .query("Book")
        .transactional(true)
        .set_lock_mode(Some(LockMode::PessimisticWrite));
    assert_eq!(qb.get_query().unwrap(), "SELECT e0.* FROM book AS e0 FOR UPDATE");

    let mut qb = context_for(MySqlPlatform)
        .query("Book")
        .transactional(true)
        .set_lock_mode(Some(LockMode::PessimisticRead));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT `e0`.* FROM `book` AS `e0` LOCK IN SHARE MODE"
    );
}

#[test]
fn optimistic_lock_needs_a_version_property() {
    let mut versioned = context()
        .query("Book")
        .set_lock_mode(Some(LockMode::Optimistic));
    assert_eq!(versioned.get_query().unwrap(), "SELECT e0.* FROM book AS e0");

    let err = context()
        .query("Author")
        .set_lock_mode(Some(LockMode::Optimistic))
        .get_query()
        .unwrap_err();
    assert_eq!(err.code(), "OptimisticLockUnsupported");
}

#[test]
fn joined_mutations_filter_through_primary_key_subselect() {
    let mut qb = context()
        .query("Book")
        .update(json!({ "title": "x" }))
        .r#where(json!({ "author": { "name": "A" } }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "UPDATE book SET title = ? WHERE id IN (SELECT e0.id FROM (\
         SELECT e0.id FROM book AS e0 \
         LEFT JOIN author AS e1 ON e0.author_id = e1.id \
         WHERE e1.name = ?) AS e0)"
    );
    assert_eq!(params, vec![Value::from("x"), Value::from("A")]);

    let mut qb = context()
        .query("Book")
        .delete_where(json!({ "tags": { "name": "old" } }));
    assert_eq!(
        qb.get_query().unwrap(),
        "DELETE FROM book WHERE id IN (SELECT e0.id FROM (\
         SELECT e0.id FROM book AS e0 \
         LEFT JOIN book_tags AS e2 ON e0.id = e2.book_id \
         LEFT JOIN tag AS e1 ON e2.tag_id = e1.id \
         WHERE e1.name = ?) AS e0)"
    );
}

#[test]
fn order_by_joins_relation_paths() {
    let mut qb = context()
        .query("Book")
        .order_by(json!({ "author": { "name": "desc" }, "title": "asc" }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.* FROM book AS e0 \
         LEFT JOIN author AS e1 ON e0.author_id = e1.id \
         ORDER BY e1.name DESC, e0.title ASC"
    );

    let err = context()
        .query("Book")
        .order_by(json!({ "title": "sideways" }))
        .get_query()
        .unwrap_err();
    assert_eq!(err.code(), "InvalidOrder");
}

#[test]
fn count_uses_primary_key() {
    let mut qb = context()
        .query("Book")
        .count(None, true)
        .r#where(json!({ "title:like": "A%" }))
        .limit(10);
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT COUNT(DISTINCT e0.id) AS count FROM book AS e0 WHERE e0.title LIKE ?"
    );
    assert_eq!(qb.get_params().unwrap(), vec![Value::from("A%")]);
}

#[test]
fn group_by_and_having_with_custom_expressions() {
    let mut qb = context()
        .query("Book")
        .select(["e0.author", "count(e0.id) as total"])
        .group_by(["e0.author"])
        .having(json!({ "count(e0.id) > ?": [2] }));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT e0.author_id, count(e0.id) as total FROM book AS e0 \
         GROUP BY e0.author_id HAVING count(e0.id) > ?"
    );
    assert_eq!(params, vec![Value::Int(2)]);
}

#[test]
fn distinct_select_of_explicit_fields() {
    let mut qb = context()
        .query("Book")
        .select(["title"])
        .add_select(["e0.price"])
        .distinct();
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT DISTINCT e0.title, e0.price FROM book AS e0"
    );
}

#[test]
fn populate_exposes_join_keys() {
    let mut qb = context().query("Author").populate(["profile"]);
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.*, e1.id AS profile FROM author AS e0 \
         LEFT JOIN profile AS e1 ON e0.id = e1.author_id"
    );

    let mut qb = context().query("Book").populate(["tags"]);
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.*, e2.book_id AS fk__book_id, e2.tag_id AS fk__tag_id FROM book AS e0 \
         LEFT JOIN book_tags AS e2 ON e0.id = e2.book_id \
         LEFT JOIN tag AS e1 ON e2.tag_id = e1.id"
    );

    let err = context()
        .query("Book")
        .populate(["nope"])
        .get_query()
        .unwrap_err();
    assert_eq!(err.code(), "UnknownProperty");
}

#[test]
fn manual_joins_are_reused_by_criteria() {
    let mut qb = context()
        .query("Book")
        .left_join("author", "a")
        .inner_join("a.profile", "p")
        .r#where(json!({ "author": { "name": "x" } }))
        .select(["e0.title", "a.name", "p.bio"]);
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.title, a.name, p.bio FROM book AS e0 \
         LEFT JOIN author AS a ON e0.author_id = a.id \
         INNER JOIN profile AS p ON a.id = p.author_id \
         WHERE a.name = ?"
    );
}

#[test]
fn join_misuse_is_reported() {
    let dup = context()
        .query("Book")
        .left_join("author", "a")
        .left_join("author", "b");
    assert_eq!(dup.error().map(|e| e.code()), Some("DuplicateJoin"));

    let unknown = context().query("Book").left_join("x.author", "a");
    assert_eq!(unknown.error().map(|e| e.code()), Some("UnknownAlias"));

    let scalar = context().query("Book").left_join("title", "t");
    assert_eq!(scalar.error().map(|e| e.code()), Some("NotARelation"));
}

#[test]
fn criteria_errors_carry_codes() {
    let err = context()
        .query("Book")
        .r#where(json!({ "titel": "a" }))
        .get_query()
        .unwrap_err();
    assert_eq!(err.code(), "UnknownProperty");
    assert_eq!(err.to_string(), "trying to query by not existing property Book.titel");

    let err = context()
        .query("Book")
        .r#where(json!({ "title": { "$regex": "x" } }))
        .get_query()
        .unwrap_err();
    assert_eq!(err.code(), "UnknownOperator");

    let err = context()
        .query("Book")
        .r#where(json!({ "title": { "foo": 1 } }))
        .get_query()
        .unwrap_err();
    assert_eq!(err.code(), "InvalidCondition");

    let err = context().query("Nope").get_query().unwrap_err();
    assert_eq!(err.code(), "UnknownEntity");
}

#[test]
fn criteria_depth_is_bounded() {
    let config = QueryConfig {
        max_criteria_depth: 1,
        ..QueryConfig::default()
    };
    let qb = context()
        .with_config(config)
        .query("Book")
        .r#where(json!({ "author": { "name": "x" } }));
    assert_eq!(qb.error().map(|e| e.code()), Some("CriteriaTooDeep"));
}

#[test]
fn first_error_wins() {
    let qb = context()
        .query("Book")
        .r#where(json!({ "titel": "a" }))
        .order_by(json!({ "title": "sideways" }));
    assert_eq!(qb.error().map(|e| e.code()), Some("UnknownProperty"));
}

#[test]
fn embedded_properties_map_to_flattened_columns() {
    let mut nested = context()
        .query("Author")
        .r#where(json!({ "address": { "city": "Paris" } }));
    let mut dotted = context()
        .query("Author")
        .r#where(json!({ "address.city": "Paris" }));
    let expected = "SELECT e0.* FROM author AS e0 WHERE e0.address_city = ?";
    assert_eq!(nested.get_query().unwrap(), expected);
    assert_eq!(dotted.get_query().unwrap(), expected);

    let mut insert = context().query("Author").insert(json!({
        "name": "n",
        "address": { "street": "s", "city": "c" }
    }));
    assert_eq!(
        insert.get_query().unwrap(),
        "INSERT INTO author (name, address_street, address_city) VALUES (?, ?, ?)"
    );
}

#[test]
fn formulas_and_conversions_follow_the_property() {
    let mut qb = context().query("Product");
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.*, e0.price * 1.2 AS gross, ST_AsText(e0.location) AS location FROM product AS e0"
    );

    let mut qb = context()
        .query("Product")
        .insert(json!({ "price": 10, "location": "POINT(0 0)" }));
    assert_eq!(
        qb.get_query().unwrap(),
        "INSERT INTO product (price, location) VALUES (?, ST_GeomFromText(?))"
    );

    let mut qb = context().query("Product").r#where(json!({ "gross >": 10 }));
    assert_eq!(
        qb.get_query().unwrap(),
        "SELECT e0.*, e0.price * 1.2 AS gross, ST_AsText(e0.location) AS location FROM product AS e0 \
         WHERE e0.price * 1.2 > ?"
    );
}

#[test]
fn inserts_per_platform() {
    let mut qb = context_for(SqlitePlatform)
        .query("Publisher")
        .insert(json!([{ "name": "a" }, { "name": "b", "type": "LOCAL" }]));
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        r#"INSERT INTO "publisher" ("name", "type") VALUES (?, NULL), (?, ?) RETURNING "id""#
    );
    assert_eq!(params.len(), 3);

    let mut qb = context()
        .query("Publisher")
        .insert(json!([{ "name": "a" }, { "type": "LOCAL" }]));
    assert_eq!(
        qb.get_query().unwrap(),
        "INSERT INTO publisher (name, type) VALUES (?, DEFAULT), (DEFAULT, ?)"
    );

    let mut qb = context().query("Publisher").insert(json!({}));
    assert_eq!(qb.get_query().unwrap(), "INSERT INTO publisher DEFAULT VALUES");

    let mut qb = context_for(MySqlPlatform).query("Publisher").insert(json!({}));
    assert_eq!(qb.get_query().unwrap(), "INSERT INTO `publisher` () VALUES ()");

    let err = context()
        .query("Publisher")
        .insert(json!({ "books": [1] }))
        .get_query()
        .unwrap_err();
    assert_eq!(err.code(), "NotPersistable");
}

#[test]
fn truncate_per_platform() {
    let mut generic = context().query("Publisher").truncate();
    assert_eq!(generic.get_query().unwrap(), "TRUNCATE TABLE publisher");

    let mut sqlite = context_for(SqlitePlatform).query("Publisher").truncate();
    assert_eq!(sqlite.get_query().unwrap(), r#"DELETE FROM "publisher""#);
}

#[test]
fn predicate_builder_composes_groups() {
    let mut qb = context().query("Author").where_with(|p| {
        p.ge("age", 18).or_group(|g| {
            g.eq("name", "a").is_null("email");
        });
    });
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT e0.* FROM author AS e0 WHERE e0.age >= ? AND (e0.name = ? OR e0.email IS NULL)"
    );
    assert_eq!(params, vec![Value::Int(18), Value::from("a")]);

    let qb = context().query("Author").where_with(|_| {});
    assert_eq!(qb.error().map(|e| e.code()), Some("InvalidCondition"));
}

#[test]
fn raw_expressions_bind_in_order() {
    let mut qb = context().query("Book").where_with(|p| {
        p.raw("e0.price * ? > ?", [Value::Float(1.2), Value::Int(10)])
            .raw("e0.version > 0", Vec::<Value>::new());
    });
    let (sql, params) = sql_and_params(&mut qb);
    assert_eq!(
        sql,
        "SELECT e0.* FROM book AS e0 WHERE e0.price * ? > ? AND e0.version > 0"
    );
    assert_eq!(params, vec![Value::Float(1.2), Value::Int(10)]);
}

#[test]
fn compiling_twice_is_stable() {
    let mut qb = context()
        .query("Book")
        .r#where(json!({ "author": { "name": "x" }, "tags": [1, 2] }))
        .order_by(json!({ "title": "asc" }))
        .limit(3);
    let first = qb.compile().unwrap();
    let second = qb.compile().unwrap();
    assert_eq!(first, second);

    let mut rebuilt = context()
        .query("Book")
        .r#where(json!({ "author": { "name": "x" }, "tags": [1, 2] }))
        .order_by(json!({ "title": "asc" }))
        .limit(3);
    assert_eq!(rebuilt.compile().unwrap(), first);
}
