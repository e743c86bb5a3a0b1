//! Entity metadata consumed by the compiler.
//!
//! The compiler never discovers metadata on its own: callers hand it a
//! [`MetadataProvider`] describing tables, columns, and relationships. The
//! in-memory provider can be assembled fluently or loaded from a JSON snapshot.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::query::errors::{QueryError, Result};

/// Relationship classification of a property.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Plain column.
    #[default]
    Scalar,
    /// Foreign key on this entity pointing at one target row.
    ManyToOne,
    /// One-to-one; the owning side carries the foreign key.
    OneToOne,
    /// Collection whose foreign key lives on the target entity.
    OneToMany,
    /// Collection linked through a pivot table.
    ManyToMany,
    /// Value object flattened into columns of the owning table.
    Embedded,
}

impl ReferenceKind {
    /// True for kinds that point at another entity.
    pub fn is_relation(self) -> bool {
        !matches!(self, ReferenceKind::Scalar | ReferenceKind::Embedded)
    }

    /// True for collection kinds.
    pub fn is_to_many(self) -> bool {
        matches!(self, ReferenceKind::OneToMany | ReferenceKind::ManyToMany)
    }
}

/// SQL templates applied when a column is written or read.
///
/// `to_db` wraps the bound placeholder (`?`), `from_db` wraps the column
/// reference (`{column}`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlConversion {
    /// Template for values written to the database.
    #[serde(default)]
    pub to_db: Option<String>,
    /// Template for values read back.
    #[serde(default)]
    pub from_db: Option<String>,
}

fn default_true() -> bool {
    true
}

/// One property of an entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProperty {
    /// Property name used in criteria and data payloads.
    pub name: String,
    /// Column names backing the property, in order.
    #[serde(default)]
    pub field_names: Vec<String>,
    /// Relationship kind.
    #[serde(default)]
    pub kind: ReferenceKind,
    /// True on the side of a one-to-one or many-to-many that owns the mapping.
    #[serde(default)]
    pub owner: bool,
    /// Target entity name for relations.
    #[serde(default)]
    pub target_entity: Option<String>,
    /// Name of the owning-side property on the target (inverse sides only).
    #[serde(default)]
    pub mapped_by: Option<String>,
    /// Pivot table name for owning many-to-many properties.
    #[serde(default)]
    pub pivot_table: Option<String>,
    /// Pivot columns referencing this entity (owning many-to-many).
    #[serde(default)]
    pub join_columns: Vec<String>,
    /// Pivot columns referencing the target entity (owning many-to-many).
    #[serde(default)]
    pub inverse_join_columns: Vec<String>,
    /// Columns on the referenced table matched by `field_names` or `join_columns`.
    #[serde(default)]
    pub referenced_column_names: Vec<String>,
    /// SQL computed in place of a column; `{alias}` is replaced by the table alias.
    #[serde(default)]
    pub formula: Option<String>,
    /// Custom read/write conversion.
    #[serde(default)]
    pub conversion: Option<SqlConversion>,
    /// Sub-property to column mapping for embedded value objects.
    #[serde(default)]
    pub embedded: IndexMap<String, String>,
    /// False for properties that never reach the database.
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Marks the optimistic-lock version column.
    #[serde(default)]
    pub version: bool,
}

impl EntityProperty {
    fn base(name: &str, kind: ReferenceKind) -> Self {
        Self {
            name: name.to_owned(),
            field_names: Vec::new(),
            kind,
            owner: false,
            target_entity: None,
            mapped_by: None,
            pivot_table: None,
            join_columns: Vec::new(),
            inverse_join_columns: Vec::new(),
            referenced_column_names: Vec::new(),
            formula: None,
            conversion: None,
            embedded: IndexMap::new(),
            persist: true,
            version: false,
        }
    }

    /// Plain column named after the property.
    pub fn scalar(name: &str) -> Self {
        let mut prop = Self::base(name, ReferenceKind::Scalar);
        prop.field_names = vec![name.to_owned()];
        prop
    }

    /// Many-to-one with a `<name>_id` foreign key referencing `id`.
    pub fn many_to_one(name: &str, target: &str) -> Self {
        let mut prop = Self::base(name, ReferenceKind::ManyToOne);
        prop.owner = true;
        prop.target_entity = Some(target.to_owned());
        prop.field_names = vec![format!("{name}_id")];
        prop.referenced_column_names = vec!["id".to_owned()];
        prop
    }

    /// Owning one-to-one with a `<name>_id` foreign key referencing `id`.
    pub fn one_to_one(name: &str, target: &str) -> Self {
        let mut prop = Self::many_to_one(name, target);
        prop.kind = ReferenceKind::OneToOne;
        prop
    }

    /// Inverse one-to-one, mapped by `mapped_by` on the target.
    pub fn one_to_one_inverse(name: &str, target: &str, mapped_by: &str) -> Self {
        let mut prop = Self::base(name, ReferenceKind::OneToOne);
        prop.target_entity = Some(target.to_owned());
        prop.mapped_by = Some(mapped_by.to_owned());
        prop.field_names = vec![name.to_owned()];
        prop
    }

    /// Collection mapped by the many-to-one `mapped_by` on the target.
    pub fn one_to_many(name: &str, target: &str, mapped_by: &str) -> Self {
        let mut prop = Self::base(name, ReferenceKind::OneToMany);
        prop.target_entity = Some(target.to_owned());
        prop.mapped_by = Some(mapped_by.to_owned());
        prop.field_names = vec![name.to_owned()];
        prop
    }

    /// Owning many-to-many through `pivot_table`.
    pub fn many_to_many(name: &str, target: &str, pivot_table: &str) -> Self {
        let mut prop = Self::base(name, ReferenceKind::ManyToMany);
        prop.owner = true;
        prop.target_entity = Some(target.to_owned());
        prop.pivot_table = Some(pivot_table.to_owned());
        prop.field_names = vec![name.to_owned()];
        prop.referenced_column_names = vec!["id".to_owned()];
        prop
    }

    /// Inverse many-to-many, mapped by `mapped_by` on the target.
    pub fn many_to_many_inverse(name: &str, target: &str, mapped_by: &str) -> Self {
        let mut prop = Self::base(name, ReferenceKind::ManyToMany);
        prop.target_entity = Some(target.to_owned());
        prop.mapped_by = Some(mapped_by.to_owned());
        prop.field_names = vec![name.to_owned()];
        prop
    }

    /// Embedded value object flattened into `(sub_property, column)` pairs.
    pub fn embedded<'a, I>(name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut prop = Self::base(name, ReferenceKind::Embedded);
        prop.embedded = columns
            .into_iter()
            .map(|(sub, column)| (sub.to_owned(), column.to_owned()))
            .collect();
        prop.field_names = prop.embedded.values().cloned().collect();
        prop
    }

    /// Computed property; `{alias}` in the template is replaced by the table alias.
    pub fn formula(name: &str, template: &str) -> Self {
        let mut prop = Self::base(name, ReferenceKind::Scalar);
        prop.field_names = vec![name.to_owned()];
        prop.formula = Some(template.to_owned());
        prop.persist = false;
        prop
    }

    /// Overrides the backing columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_names = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the referenced columns on the other side of the relation.
    pub fn referencing<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.referenced_column_names = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the pivot columns of an owning many-to-many.
    pub fn pivot_columns<I, J, S, T>(mut self, join_columns: I, inverse_join_columns: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.join_columns = join_columns.into_iter().map(Into::into).collect();
        self.inverse_join_columns = inverse_join_columns.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches a read/write conversion.
    pub fn converted(mut self, to_db: Option<&str>, from_db: Option<&str>) -> Self {
        self.conversion = Some(SqlConversion {
            to_db: to_db.map(str::to_owned),
            from_db: from_db.map(str::to_owned),
        });
        self
    }

    /// Marks the property as the optimistic-lock version.
    pub fn versioned(mut self) -> Self {
        self.version = true;
        self
    }

    /// Excludes the property from inserts and updates.
    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }

    /// True when the property spans more than one column.
    pub fn is_composite(&self) -> bool {
        self.field_names.len() > 1
    }

    /// Target entity of a relation.
    pub fn target(&self) -> Option<&str> {
        self.target_entity.as_deref()
    }

    /// True for owning to-one relations, whose foreign key lives on this table.
    pub fn is_owning_reference(&self) -> bool {
        match self.kind {
            ReferenceKind::ManyToOne => true,
            ReferenceKind::OneToOne => self.owner,
            _ => false,
        }
    }
}

/// Table-level description of an entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Entity name used by criteria and relations.
    pub name: String,
    /// Backing table.
    pub table: String,
    /// Primary key property names, in declaration order.
    #[serde(default)]
    pub primary_keys: Vec<String>,
    /// Properties by name.
    #[serde(default, with = "property_list")]
    pub properties: IndexMap<String, EntityProperty>,
}

impl EntityMetadata {
    /// Creates metadata with no properties.
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_owned(),
            table: table.to_owned(),
            primary_keys: Vec::new(),
            properties: IndexMap::new(),
        }
    }

    /// Registers a property.
    pub fn with_property(mut self, prop: EntityProperty) -> Self {
        self.properties.insert(prop.name.clone(), prop);
        self
    }

    /// Registers a scalar primary key property.
    pub fn with_primary_key(mut self, name: &str) -> Self {
        if !self.properties.contains_key(name) {
            self.properties
                .insert(name.to_owned(), EntityProperty::scalar(name));
        }
        self.primary_keys.push(name.to_owned());
        self
    }

    /// Marks an already registered property as part of the primary key.
    pub fn with_key_property(mut self, prop: EntityProperty) -> Self {
        self.primary_keys.push(prop.name.clone());
        self.properties.insert(prop.name.clone(), prop);
        self
    }

    /// Looks a property up by name, falling back to a single-column field name.
    pub fn property(&self, name: &str) -> Option<&EntityProperty> {
        self.properties.get(name).or_else(|| {
            self.properties
                .values()
                .find(|p| p.field_names.len() == 1 && p.field_names[0] == name)
        })
    }

    /// Columns of the primary key, expanding composite foreign keys.
    pub fn primary_key_columns(&self) -> Vec<String> {
        self.primary_keys
            .iter()
            .flat_map(|name| match self.properties.get(name) {
                Some(prop) if !prop.field_names.is_empty() => prop.field_names.clone(),
                _ => vec![name.clone()],
            })
            .collect()
    }

    /// Primary key columns, or an error for key-less entities.
    pub fn require_primary_key(&self) -> Result<Vec<String>> {
        let columns = self.primary_key_columns();
        if columns.is_empty() {
            return Err(QueryError::MissingPrimaryKey {
                entity: self.name.clone(),
            });
        }
        Ok(columns)
    }

    /// True when the primary key spans several columns.
    pub fn has_composite_key(&self) -> bool {
        self.primary_key_columns().len() > 1
    }

    /// The optimistic-lock version property, if any.
    pub fn version_property(&self) -> Option<&EntityProperty> {
        self.properties.values().find(|p| p.version)
    }
}

mod property_list {
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::EntityProperty;

    pub fn serialize<S>(
        props: &IndexMap<String, EntityProperty>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let list: Vec<&EntityProperty> = props.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<IndexMap<String, EntityProperty>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<EntityProperty>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|p| (p.name.clone(), p)).collect())
    }
}

/// Provides entity metadata by name.
pub trait MetadataProvider: Send + Sync {
    /// Looks an entity up by name.
    fn find(&self, entity: &str) -> Option<&EntityMetadata>;

    /// Looks an entity up by name, failing for unknown entities.
    fn get(&self, entity: &str) -> Result<&EntityMetadata> {
        self.find(entity).ok_or_else(|| QueryError::UnknownEntity {
            entity: entity.to_owned(),
        })
    }
}

/// Simple in-memory metadata provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InMemoryMetadata {
    #[serde(with = "entity_list")]
    entities: IndexMap<String, EntityMetadata>,
}

mod entity_list {
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::EntityMetadata;

    pub fn serialize<S>(
        entities: &IndexMap<String, EntityMetadata>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let list: Vec<&EntityMetadata> = entities.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<IndexMap<String, EntityMetadata>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<EntityMetadata>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|e| (e.name.clone(), e)).collect())
    }
}

impl InMemoryMetadata {
    /// Creates a new empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity.
    pub fn with_entity(mut self, meta: EntityMetadata) -> Self {
        self.entities.insert(meta.name.clone(), meta);
        self
    }

    /// Parses a snapshot of the form `{ "entities": [ ... ] }`.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Serializes the snapshot back to JSON.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Iterates registered entities in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities.values()
    }
}

impl MetadataProvider for InMemoryMetadata {
    fn find(&self, entity: &str) -> Option<&EntityMetadata> {
        self.entities.get(entity)
    }
}

/// Resolved pivot table layout of a many-to-many property, seen from the
/// side the query starts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PivotLayout {
    /// Pivot table name.
    pub table: String,
    /// Pivot columns referencing the starting entity.
    pub owner_columns: Vec<String>,
    /// Pivot columns referencing the target entity.
    pub target_columns: Vec<String>,
    /// Starting entity columns matched by `owner_columns`.
    pub owner_referenced: Vec<String>,
    /// Target entity columns matched by `target_columns`.
    pub target_referenced: Vec<String>,
}

/// Resolves the owning-side property an inverse relation is mapped by.
pub fn mapped_property<'a>(
    metadata: &'a dyn MetadataProvider,
    prop: &EntityProperty,
) -> Result<&'a EntityProperty> {
    let target = target_metadata(metadata, prop)?;
    let mapped_by = prop.mapped_by.as_deref().unwrap_or_default();
    target
        .properties
        .get(mapped_by)
        .ok_or_else(|| QueryError::UnknownProperty {
            entity: target.name.clone(),
            key: mapped_by.to_owned(),
        })
}

/// Metadata of a relation's target entity.
pub fn target_metadata<'a>(
    metadata: &'a dyn MetadataProvider,
    prop: &EntityProperty,
) -> Result<&'a EntityMetadata> {
    match prop.target() {
        Some(target) => metadata.get(target),
        None => Err(QueryError::NotARelation {
            entity: String::new(),
            property: prop.name.clone(),
        }),
    }
}

/// Resolves the pivot layout for either side of a many-to-many.
pub fn pivot_layout(
    metadata: &dyn MetadataProvider,
    owner: &EntityMetadata,
    prop: &EntityProperty,
) -> Result<PivotLayout> {
    let target = target_metadata(metadata, prop)?;
    let owner_pk = owner.require_primary_key()?;
    let target_pk = target.require_primary_key()?;
    let (owning, owning_is_self) = if prop.owner {
        (prop, true)
    } else {
        (mapped_property(metadata, prop)?, false)
    };
    let table = owning
        .pivot_table
        .clone()
        .ok_or_else(|| QueryError::InvalidCondition {
            key: prop.name.clone(),
            reason: "many-to-many property has no pivot table".to_owned(),
        })?;
    let (owner_columns, target_columns) = if owning_is_self {
        (owning.join_columns.clone(), owning.inverse_join_columns.clone())
    } else {
        (owning.inverse_join_columns.clone(), owning.join_columns.clone())
    };
    Ok(PivotLayout {
        table,
        owner_columns,
        target_columns,
        owner_referenced: owner_pk,
        target_referenced: target_pk,
    })
}
