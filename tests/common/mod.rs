#![allow(dead_code)]

use std::sync::Arc;

use ormql::platform::Platform;
use ormql::query::{EntityMetadata, EntityProperty, InMemoryMetadata, QueryContext, QueryConfig};
use ormql::GenericPlatform;

/// Library schema shared by the integration tests.
///
/// Publisher 1:n Book n:1 Author, Book m:n Tag through `book_tags`,
/// Author 1:1 Profile (owned by Profile), Translation keyed by
/// `(book_id, language)`, plus a few odd entities for formulas and
/// conversions.
pub fn metadata() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_entity(
            EntityMetadata::new("Publisher", "publisher")
                .with_primary_key("id")
                .with_property(EntityProperty::scalar("name"))
                .with_property(EntityProperty::scalar("type"))
                .with_property(EntityProperty::one_to_many("books", "Book", "publisher")),
        )
        .with_entity(
            EntityMetadata::new("Author", "author")
                .with_primary_key("id")
                .with_property(EntityProperty::scalar("name"))
                .with_property(EntityProperty::scalar("email"))
                .with_property(EntityProperty::scalar("age"))
                .with_property(EntityProperty::embedded(
                    "address",
                    [("street", "address_street"), ("city", "address_city")],
                ))
                .with_property(EntityProperty::one_to_many("books", "Book", "author"))
                .with_property(EntityProperty::one_to_one_inverse("profile", "Profile", "author")),
        )
        .with_entity(
            EntityMetadata::new("Book", "book")
                .with_primary_key("id")
                .with_property(EntityProperty::scalar("title"))
                .with_property(EntityProperty::scalar("price"))
                .with_property(EntityProperty::many_to_one("author", "Author"))
                .with_property(EntityProperty::many_to_one("publisher", "Publisher"))
                .with_property(
                    EntityProperty::many_to_many("tags", "Tag", "book_tags")
                        .pivot_columns(["book_id"], ["tag_id"]),
                )
                .with_property(EntityProperty::scalar("version").versioned()),
        )
        .with_entity(
            EntityMetadata::new("Tag", "tag")
                .with_primary_key("id")
                .with_property(EntityProperty::scalar("name"))
                .with_property(EntityProperty::many_to_many_inverse("books", "Book", "tags")),
        )
        .with_entity(
            EntityMetadata::new("Profile", "profile")
                .with_primary_key("id")
                .with_property(EntityProperty::scalar("bio"))
                .with_property(EntityProperty::one_to_one("author", "Author")),
        )
        .with_entity(
            EntityMetadata::new("Translation", "translation")
                .with_key_property(EntityProperty::many_to_one("book", "Book"))
                .with_primary_key("language")
                .with_property(EntityProperty::scalar("title")),
        )
        .with_entity(
            EntityMetadata::new("Item", "item")
                .with_primary_key("id")
                .with_property(EntityProperty::scalar("a"))
                .with_property(EntityProperty::scalar("b")),
        )
        .with_entity(
            EntityMetadata::new("Product", "product")
                .with_primary_key("id")
                .with_property(EntityProperty::scalar("price"))
                .with_property(EntityProperty::formula("gross", "{alias}.price * 1.2"))
                .with_property(
                    EntityProperty::scalar("location")
                        .converted(Some("ST_GeomFromText(?)"), Some("ST_AsText({column})")),
                ),
        )
}

pub fn context() -> QueryContext {
    context_for(GenericPlatform)
}

pub fn context_for<P: Platform + 'static>(platform: P) -> QueryContext {
    QueryContext::new(Arc::new(metadata()), Arc::new(platform))
}

pub fn readable_context() -> QueryContext {
    context().with_config(QueryConfig::readable())
}

/// Routes `tracing` output through the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
