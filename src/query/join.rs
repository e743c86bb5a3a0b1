//! Join descriptors registered by the builder, keyed by relationship path.

use std::fmt;

use crate::query::errors::{QueryError, Result};
use crate::query::metadata::{
    mapped_property, pivot_layout, target_metadata, EntityMetadata, EntityProperty,
    MetadataProvider, ReferenceKind,
};

/// Suffix appended to a many-to-many path to key its pivot hop.
pub const PIVOT_SUFFIX: &str = "[pivot]";

/// How a joined table participates in the query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// `INNER JOIN`.
    Inner,
    /// `LEFT JOIN`.
    Left,
    /// Pivot hop of a many-to-many; rendered as `LEFT JOIN`.
    Pivot,
}

impl JoinType {
    /// SQL keyword for the join.
    pub fn sql(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left | JoinType::Pivot => "LEFT JOIN",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => f.write_str("inner"),
            JoinType::Left => f.write_str("left"),
            JoinType::Pivot => f.write_str("pivot"),
        }
    }
}

/// One joined table. `primary_keys[i]` on the owner alias is matched with
/// `join_columns[i]` on this alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinDescriptor {
    /// Joined table.
    pub table: String,
    /// Alias of the joined table.
    pub alias: String,
    /// Join flavour.
    pub join_type: JoinType,
    /// Alias the join hangs off.
    pub owner_alias: String,
    /// Columns on the joined table.
    pub join_columns: Vec<String>,
    /// Columns on the joined table pointing onward (pivot target columns, or
    /// the target primary key of an inverse relation).
    pub inverse_join_columns: Vec<String>,
    /// Columns on the owner side.
    pub primary_keys: Vec<String>,
    /// Relationship property that produced the join.
    pub property: EntityProperty,
    /// Dotted relationship path from the root entity.
    pub path: String,
}

/// Where a joined relationship lands.
#[derive(Debug)]
pub(crate) struct JoinPlan {
    pub hops: Vec<JoinDescriptor>,
    pub target_entity: String,
}

/// Builds the join hops for `prop` hanging off `owner_alias`.
///
/// Many-to-many relations produce two hops: the pivot table (keyed by
/// `path` + [`PIVOT_SUFFIX`]) and the target table.
#[allow(clippy::too_many_arguments)]
pub(crate) fn plan_join(
    metadata: &dyn MetadataProvider,
    owner: &EntityMetadata,
    prop: &EntityProperty,
    owner_alias: &str,
    alias: &str,
    pivot_alias: Option<&str>,
    join_type: JoinType,
    path: &str,
) -> Result<JoinPlan> {
    let target = target_metadata(metadata, prop).map_err(|_| QueryError::NotARelation {
        entity: owner.name.clone(),
        property: prop.name.clone(),
    })?;
    let hop = |table: &str, alias: &str, owner_alias: &str, join_type: JoinType, path: String| {
        JoinDescriptor {
            table: table.to_owned(),
            alias: alias.to_owned(),
            join_type,
            owner_alias: owner_alias.to_owned(),
            join_columns: Vec::new(),
            inverse_join_columns: Vec::new(),
            primary_keys: Vec::new(),
            property: prop.clone(),
            path,
        }
    };

    let hops = match prop.kind {
        ReferenceKind::Scalar | ReferenceKind::Embedded => {
            return Err(QueryError::NotARelation {
                entity: owner.name.clone(),
                property: prop.name.clone(),
            })
        }
        _ if prop.is_owning_reference() => {
            let mut join = hop(&target.table, alias, owner_alias, join_type, path.to_owned());
            join.primary_keys = prop.field_names.clone();
            join.join_columns = if prop.referenced_column_names.is_empty() {
                target.require_primary_key()?
            } else {
                prop.referenced_column_names.clone()
            };
            vec![join]
        }
        ReferenceKind::ManyToOne | ReferenceKind::OneToOne | ReferenceKind::OneToMany => {
            let mapped = mapped_property(metadata, prop)?;
            let mut join = hop(&target.table, alias, owner_alias, join_type, path.to_owned());
            join.primary_keys = if mapped.referenced_column_names.is_empty() {
                owner.require_primary_key()?
            } else {
                mapped.referenced_column_names.clone()
            };
            join.join_columns = mapped.field_names.clone();
            join.inverse_join_columns = target.require_primary_key()?;
            vec![join]
        }
        ReferenceKind::ManyToMany => {
            let layout = pivot_layout(metadata, owner, prop)?;
            let pivot_alias = pivot_alias.unwrap_or(layout.table.as_str());
            let (pivot_type, target_type) = match join_type {
                JoinType::Inner => (JoinType::Inner, JoinType::Inner),
                _ => (JoinType::Pivot, JoinType::Left),
            };
            let mut pivot = hop(
                &layout.table,
                pivot_alias,
                owner_alias,
                pivot_type,
                format!("{path}{PIVOT_SUFFIX}"),
            );
            pivot.primary_keys = layout.owner_referenced;
            pivot.join_columns = layout.owner_columns;
            pivot.inverse_join_columns = layout.target_columns.clone();

            let mut joined = hop(&target.table, alias, pivot_alias, target_type, path.to_owned());
            joined.primary_keys = layout.target_columns;
            joined.join_columns = layout.target_referenced;
            vec![pivot, joined]
        }
    };

    for join in &hops {
        if join.primary_keys.len() != join.join_columns.len() || join.join_columns.is_empty() {
            return Err(QueryError::invalid_condition(
                join.path.clone(),
                format!(
                    "join columns {:?} do not line up with {:?}",
                    join.join_columns, join.primary_keys
                ),
            ));
        }
    }

    Ok(JoinPlan {
        hops,
        target_entity: target.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::metadata::InMemoryMetadata;

    fn metadata() -> InMemoryMetadata {
        InMemoryMetadata::new()
            .with_entity(
                EntityMetadata::new("Publisher", "publisher")
                    .with_primary_key("id")
                    .with_property(EntityProperty::one_to_many("books", "Book", "publisher")),
            )
            .with_entity(
                EntityMetadata::new("Book", "book")
                    .with_primary_key("id")
                    .with_property(EntityProperty::many_to_one("publisher", "Publisher"))
                    .with_property(
                        EntityProperty::many_to_many("tags", "Tag", "book_tags")
                            .pivot_columns(["book_id"], ["tag_id"]),
                    ),
            )
            .with_entity(EntityMetadata::new("Tag", "tag").with_primary_key("id"))
    }

    #[test]
    fn many_to_one_matches_foreign_key_to_target_pk() {
        let metadata = metadata();
        let book = metadata.get("Book").unwrap();
        let prop = book.property("publisher").unwrap();
        let plan = plan_join(
            &metadata,
            book,
            prop,
            "e0",
            "e1",
            None,
            JoinType::Left,
            "Book.publisher",
        )
        .unwrap();
        let join = &plan.hops[0];
        assert_eq!(join.primary_keys, vec!["publisher_id".to_string()]);
        assert_eq!(join.join_columns, vec!["id".to_string()]);
        assert_eq!(plan.target_entity, "Publisher");
    }

    #[test]
    fn one_to_many_uses_mapped_foreign_key() {
        let metadata = metadata();
        let publisher = metadata.get("Publisher").unwrap();
        let prop = publisher.property("books").unwrap();
        let plan = plan_join(
            &metadata,
            publisher,
            prop,
            "e0",
            "e1",
            None,
            JoinType::Left,
            "Publisher.books",
        )
        .unwrap();
        let join = &plan.hops[0];
        assert_eq!(join.primary_keys, vec!["id".to_string()]);
        assert_eq!(join.join_columns, vec!["publisher_id".to_string()]);
        assert_eq!(join.inverse_join_columns, vec!["id".to_string()]);
    }

    #[test]
    fn many_to_many_goes_through_pivot() {
        let metadata = metadata();
        let book = metadata.get("Book").unwrap();
        let prop = book.property("tags").unwrap();
        let plan = plan_join(
            &metadata,
            book,
            prop,
            "e0",
            "e2",
            Some("e1"),
            JoinType::Left,
            "Book.tags",
        )
        .unwrap();
        let [pivot, tag] = plan.hops.as_slice() else {
            panic!("expected two hops");
        };
        assert_eq!(pivot.path, "Book.tags[pivot]");
        assert_eq!(pivot.join_type, JoinType::Pivot);
        assert_eq!(pivot.join_columns, vec!["book_id".to_string()]);
        assert_eq!(tag.owner_alias, "e1");
        assert_eq!(tag.primary_keys, vec!["tag_id".to_string()]);
        assert_eq!(tag.join_columns, vec!["id".to_string()]);
    }

    #[test]
    fn scalar_property_is_not_joinable() {
        let metadata = metadata();
        let book = metadata.get("Book").unwrap();
        let prop = EntityProperty::scalar("title");
        let err = plan_join(&metadata, book, &prop, "e0", "e1", None, JoinType::Left, "Book.title")
            .unwrap_err();
        assert_eq!(err.code(), "NotARelation");
    }
}
