//! Criteria tree.
//!
//! Normalized criteria are parsed into an arena of nodes that remember which
//! entity and property each key refers to. Processing walks the arena,
//! registers the joins the criteria imply on the builder, and produces a flat
//! condition map whose keys are alias-qualified field references.

use tracing::trace;

use crate::query::builder::QueryBuilder;
use crate::query::errors::{QueryError, Result};
use crate::query::helper::is_custom_expression;
use crate::query::join::JoinType;
use crate::query::metadata::{EntityProperty, MetadataProvider, ReferenceKind};
use crate::query::operator::{
    is_comparison_key, is_dollar_key, is_operator, GroupOperator, PK_SEPARATOR,
};
use crate::query::value::{Value, ValueMap};

/// Index of a node in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Payload shape of a node.
#[derive(Clone, Debug)]
pub enum NodePayload {
    /// Leaf value.
    Scalar(Value),
    /// Ordered children without keys.
    Array(Vec<NodeId>),
    /// Keyed children in source order.
    Object(indexmap::IndexMap<String, NodeId>),
}

/// One node of the criteria tree.
#[derive(Clone, Debug)]
pub struct CriteriaNode {
    /// Entity whose properties the node's children refer to.
    pub entity_name: String,
    /// Enclosing node; `None` for the root.
    pub parent: Option<NodeId>,
    /// Key under which the node appears in its parent object.
    pub key: Option<String>,
    /// Property the key resolved to, if any.
    pub prop: Option<EntityProperty>,
    /// Children or leaf value.
    pub payload: NodePayload,
}

/// Arena-backed criteria tree rooted at a single entity.
#[derive(Clone, Debug)]
pub struct CriteriaTree {
    nodes: Vec<CriteriaNode>,
    root: NodeId,
}

impl CriteriaTree {
    /// Builds a tree from normalized criteria.
    pub fn build(
        metadata: &dyn MetadataProvider,
        entity: &str,
        criteria: ValueMap,
        max_depth: usize,
    ) -> Result<Self> {
        metadata.get(entity)?;
        let mut builder = TreeBuilder {
            metadata,
            nodes: Vec::new(),
            max_depth,
        };
        let root = builder.node(entity, Value::Object(criteria), None, None, None, 0)?;
        Ok(Self {
            nodes: builder.nodes,
            root,
        })
    }

    /// Root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Borrows a node.
    pub fn node(&self, id: NodeId) -> &CriteriaNode {
        &self.nodes[id.0]
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the arena is empty. A built tree always has a root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Relationship path of a node: the root entity name followed by the
    /// property keys leading to it. Arrays and operator keys add no segment.
    pub fn path(&self, id: NodeId) -> String {
        let node = self.node(id);
        let Some(parent) = node.parent else {
            return node.entity_name.clone();
        };
        let base = self.path(parent);
        if matches!(node.payload, NodePayload::Array(_)) {
            return base;
        }
        match node.key.as_deref() {
            Some(key) if !is_dollar_key(key) => format!("{base}.{key}"),
            _ => base,
        }
    }

    /// Processes the tree against `qb`, registering implied joins and
    /// returning the alias-qualified condition map.
    pub fn process(&self, qb: &mut QueryBuilder) -> Result<ValueMap> {
        let alias = qb.alias().to_owned();
        match self.process_node(self.root, qb, &alias)? {
            Value::Object(map) => Ok(map),
            other => Err(QueryError::invalid_condition(
                self.node(self.root).entity_name.clone(),
                format!("criteria must be an object, got {other:?}"),
            )),
        }
    }

    fn process_node(&self, id: NodeId, qb: &mut QueryBuilder, alias: &str) -> Result<Value> {
        match &self.node(id).payload {
            NodePayload::Scalar(value) => self.process_scalar(id, value, qb, alias),
            NodePayload::Array(items) => items
                .iter()
                .map(|item| self.process_node(*item, qb, alias))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            NodePayload::Object(children) => self.process_object(id, children, qb, alias),
        }
    }

    fn process_scalar(
        &self,
        id: NodeId,
        value: &Value,
        qb: &mut QueryBuilder,
        alias: &str,
    ) -> Result<Value> {
        if self.should_join_scalar(id) {
            let path = self.path(id);
            if qb.alias_for_join_path(&path).is_none() {
                self.join(id, qb, alias, &path)?;
            }
        }
        Ok(value.clone())
    }

    fn process_object(
        &self,
        id: NodeId,
        children: &indexmap::IndexMap<String, NodeId>,
        qb: &mut QueryBuilder,
        owner_alias: &str,
    ) -> Result<Value> {
        let node = self.node(id);
        let path = self.path(id);
        let current = match qb.alias_for_join_path(&path) {
            Some(alias) => alias,
            None if self.should_auto_join(id, qb) => self.join(id, qb, owner_alias, &path)?,
            None => owner_alias.to_owned(),
        };
        let embedded = node
            .prop
            .as_ref()
            .filter(|p| p.kind == ReferenceKind::Embedded);

        let mut out = ValueMap::with_capacity(children.len());
        for (key, &child) in children {
            let child_alias = if node.prop.is_some() {
                current.as_str()
            } else {
                owner_alias
            };
            let payload = self.process_node(child, qb, child_alias)?;

            if let Some(prop) = embedded {
                let field = if is_operator(key) {
                    key.clone()
                } else {
                    format!("{owner_alias}.{}.{key}", prop.name)
                };
                inline_condition(&mut out, field, payload);
            } else if self.should_inline(child, &payload) {
                inline_child_payload(&mut out, payload, key, &current);
            } else if self.should_rename(child, &payload) {
                let field = self.rename_to_primary_key(child, qb, &current)?;
                inline_condition(&mut out, field, payload);
            } else if is_operator(key) || is_custom_expression(key) || key.contains('.') {
                inline_condition(&mut out, key.clone(), payload);
            } else if key.contains(PK_SEPARATOR) {
                let field = key
                    .split(PK_SEPARATOR)
                    .map(|part| format!("{current}.{part}"))
                    .collect::<Vec<_>>()
                    .join(PK_SEPARATOR);
                inline_condition(&mut out, field, payload);
            } else {
                inline_condition(&mut out, format!("{current}.{key}"), payload);
            }
        }
        Ok(Value::Object(out))
    }

    fn join(
        &self,
        id: NodeId,
        qb: &mut QueryBuilder,
        owner_alias: &str,
        path: &str,
    ) -> Result<String> {
        let node = self.node(id);
        let prop = node.prop.as_ref().ok_or_else(|| {
            QueryError::invalid_condition(path, "cannot join a node without a property")
        })?;
        let target = qb.metadata().get(&node.entity_name)?.table.clone();
        let alias = qb.next_alias(&target);
        trace!(path, alias = %alias, property = %prop.name, "auto-joining criteria path");
        qb.register_join(owner_alias, &prop.name, &alias, JoinType::Left, Some(path.to_owned()))?;
        Ok(alias)
    }

    /// Scalar conditions on collections and inverse one-to-ones need the
    /// target table to compare against its primary key.
    fn should_join_scalar(&self, id: NodeId) -> bool {
        let node = self.node(id);
        let (Some(prop), Some(_)) = (&node.prop, node.parent) else {
            return false;
        };
        match prop.kind {
            ReferenceKind::OneToMany | ReferenceKind::ManyToMany => true,
            ReferenceKind::OneToOne => !prop.owner,
            _ => false,
        }
    }

    fn should_auto_join(&self, id: NodeId, qb: &QueryBuilder) -> bool {
        let node = self.node(id);
        let (Some(prop), Some(_)) = (&node.prop, node.parent) else {
            return false;
        };
        if !prop.kind.is_relation() {
            return false;
        }
        let NodePayload::Object(children) = &node.payload else {
            return false;
        };
        if !prop.is_owning_reference() {
            return true;
        }
        if children.keys().all(|k| is_comparison_key(k)) {
            return false;
        }
        let metadata = qb.metadata();
        let primary_keys_only = metadata
            .find(&node.entity_name)
            .is_some_and(|target| children.keys().all(|k| target.primary_keys.contains(k)));
        !primary_keys_only
    }

    fn should_inline(&self, id: NodeId, payload: &Value) -> bool {
        let node = self.node(id);
        let Some(prop) = &node.prop else {
            return false;
        };
        (prop.kind.is_relation() || prop.kind == ReferenceKind::Embedded)
            && matches!(payload, Value::Object(_))
            && !payload.is_operator_object()
    }

    fn should_rename(&self, id: NodeId, payload: &Value) -> bool {
        let node = self.node(id);
        let Some(prop) = &node.prop else {
            return false;
        };
        let scalar_or_operator =
            !matches!(payload, Value::Object(_)) || payload.is_operator_object();
        match prop.kind {
            ReferenceKind::OneToOne => !prop.owner && scalar_or_operator,
            ReferenceKind::OneToMany | ReferenceKind::ManyToMany => scalar_or_operator,
            _ => false,
        }
    }

    /// Condition key addressing the joined target's primary key.
    fn rename_to_primary_key(
        &self,
        id: NodeId,
        qb: &QueryBuilder,
        fallback: &str,
    ) -> Result<String> {
        let node = self.node(id);
        let alias = qb
            .alias_for_join_path(&self.path(id))
            .unwrap_or_else(|| fallback.to_owned());
        let target = qb.metadata().get(&node.entity_name)?.require_primary_key()?;
        Ok(target
            .iter()
            .map(|column| format!("{alias}.{column}"))
            .collect::<Vec<_>>()
            .join(PK_SEPARATOR))
    }
}

struct TreeBuilder<'m> {
    metadata: &'m dyn MetadataProvider,
    nodes: Vec<CriteriaNode>,
    max_depth: usize,
}

impl<'m> TreeBuilder<'m> {
    fn node(
        &mut self,
        entity: &str,
        payload: Value,
        parent: Option<NodeId>,
        key: Option<String>,
        prop: Option<EntityProperty>,
        depth: usize,
    ) -> Result<NodeId> {
        if depth > self.max_depth {
            return Err(QueryError::CriteriaTooDeep {
                max: self.max_depth,
            });
        }
        let custom = key.as_deref().is_some_and(is_custom_expression);
        let composite_tuple = prop.as_ref().is_some_and(EntityProperty::is_composite)
            && payload.is_key_tuple();
        let scalar = payload.is_scalar() || custom || composite_tuple;

        let id = NodeId(self.nodes.len());
        self.nodes.push(CriteriaNode {
            entity_name: entity.to_owned(),
            parent,
            key,
            prop,
            payload: NodePayload::Scalar(Value::Null),
        });
        if scalar {
            self.nodes[id.0].payload = NodePayload::Scalar(payload);
            return Ok(id);
        }

        let built = match payload {
            Value::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    children.push(self.node(entity, item, Some(id), None, None, depth + 1)?);
                }
                NodePayload::Array(children)
            }
            Value::Object(map) => {
                let mut children = indexmap::IndexMap::with_capacity(map.len());
                for (child_key, child_value) in map {
                    let child_prop = self.resolve_key(id, entity, &child_key)?;
                    let child_entity = match &child_prop {
                        Some(p) if p.kind.is_relation() => p.target().unwrap_or(entity).to_owned(),
                        _ => entity.to_owned(),
                    };
                    let child = self.node(
                        &child_entity,
                        child_value,
                        Some(id),
                        Some(child_key.clone()),
                        child_prop,
                        depth + 1,
                    )?;
                    children.insert(child_key, child);
                }
                NodePayload::Object(children)
            }
            other => NodePayload::Scalar(other),
        };
        self.nodes[id.0].payload = built;
        Ok(id)
    }

    /// Validates `key` under the object node `parent` and resolves its property.
    fn resolve_key(
        &self,
        parent: NodeId,
        entity: &str,
        key: &str,
    ) -> Result<Option<EntityProperty>> {
        if is_operator(key) {
            return Ok(None);
        }
        if is_dollar_key(key) {
            return Err(QueryError::UnknownOperator {
                operator: key.to_owned(),
            });
        }
        if is_custom_expression(key) || key.contains('.') {
            return Ok(None);
        }
        let parent_node = &self.nodes[parent.0];
        if let Some(prop) = parent_node
            .prop
            .as_ref()
            .filter(|p| p.kind == ReferenceKind::Embedded)
        {
            return if prop.embedded.contains_key(key) {
                Ok(None)
            } else {
                Err(QueryError::UnknownProperty {
                    entity: format!("{entity}.{}", prop.name),
                    key: key.to_owned(),
                })
            };
        }
        if parent_node
            .prop
            .as_ref()
            .is_some_and(|p| p.kind == ReferenceKind::Scalar)
        {
            return Err(QueryError::invalid_condition(
                key,
                format!("'{}' is not a relation", parent_node.key.as_deref().unwrap_or_default()),
            ));
        }
        let meta = self.metadata.get(entity)?;
        if key.contains(PK_SEPARATOR) {
            for part in key.split(PK_SEPARATOR) {
                if meta.property(part).is_none() {
                    return Err(QueryError::UnknownProperty {
                        entity: entity.to_owned(),
                        key: part.to_owned(),
                    });
                }
            }
            return Ok(None);
        }
        match meta.property(key) {
            Some(prop) => Ok(Some(prop.clone())),
            None => Err(QueryError::UnknownProperty {
                entity: entity.to_owned(),
                key: key.to_owned(),
            }),
        }
    }
}

/// Inserts a condition, folding duplicate keys into `$and`.
fn inline_condition(out: &mut ValueMap, key: String, value: Value) {
    let and = GroupOperator::And.key();
    if key == and {
        if let Some(Value::Array(items)) = out.get_mut(and) {
            match value {
                Value::Array(more) => items.extend(more),
                other => items.push(other),
            }
            return;
        }
    }
    let Some(existing) = out.shift_remove(&key) else {
        out.insert(key, value);
        return;
    };
    let first = Value::object([(key.clone(), existing)]);
    let second = Value::object([(key, value)]);
    match out.get_mut(and) {
        Some(Value::Array(items)) => {
            items.push(first);
            items.push(second);
        }
        _ => {
            out.insert(and.to_owned(), Value::Array(vec![first, second]));
        }
    }
}

/// Lifts a joined child's qualified keys into the parent condition. Operator
/// keys stay attached to the relation column on the parent alias.
fn inline_child_payload(out: &mut ValueMap, payload: Value, field: &str, alias: &str) {
    let Value::Object(map) = payload else {
        inline_condition(out, format!("{alias}.{field}"), payload);
        return;
    };
    let column = format!("{alias}.{field}");
    for (key, value) in map {
        if is_comparison_key(&key) {
            match out.get_mut(&column) {
                Some(Value::Object(ops)) if !ops.contains_key(&key) => {
                    ops.insert(key, value);
                }
                _ => inline_condition(out, column.clone(), Value::object([(key, value)])),
            }
        } else {
            inline_condition(out, key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::metadata::{EntityMetadata, InMemoryMetadata};
    use serde_json::json;

    fn metadata() -> InMemoryMetadata {
        InMemoryMetadata::new()
            .with_entity(
                EntityMetadata::new("Author", "author")
                    .with_primary_key("id")
                    .with_property(EntityProperty::scalar("name"))
                    .with_property(EntityProperty::one_to_many("books", "Book", "author")),
            )
            .with_entity(
                EntityMetadata::new("Book", "book")
                    .with_primary_key("id")
                    .with_property(EntityProperty::scalar("title"))
                    .with_property(EntityProperty::many_to_one("author", "Author")),
            )
    }

    fn build(entity: &str, criteria: serde_json::Value, depth: usize) -> Result<CriteriaTree> {
        let Value::Object(map) = Value::from(criteria) else {
            panic!("criteria must be an object");
        };
        CriteriaTree::build(&metadata(), entity, map, depth)
    }

    #[test]
    fn nodes_resolve_entities_and_paths() {
        let tree = build("Author", json!({ "books": { "author": { "name": "x" } } }), 16).unwrap();
        let root = tree.node(tree.root());
        let NodePayload::Object(children) = &root.payload else {
            panic!("root must be an object");
        };
        let books = children["books"];
        assert_eq!(tree.node(books).entity_name, "Book");
        assert_eq!(tree.path(books), "Author.books");
        let NodePayload::Object(grand) = &tree.node(books).payload else {
            panic!("books must be an object");
        };
        let author = grand["author"];
        assert_eq!(tree.node(author).entity_name, "Author");
        assert_eq!(tree.path(author), "Author.books.author");
        assert_eq!(tree.node(author).parent, Some(books));
    }

    #[test]
    fn operator_keys_add_no_path_segment() {
        let tree = build("Author", json!({ "$or": [{ "books": 1 }] }), 16).unwrap();
        let NodePayload::Object(children) = &tree.node(tree.root()).payload else {
            panic!("root must be an object");
        };
        let or = children["$or"];
        let NodePayload::Array(items) = &tree.node(or).payload else {
            panic!("$or must be an array");
        };
        let NodePayload::Object(item) = &tree.node(items[0]).payload else {
            panic!("item must be an object");
        };
        assert_eq!(tree.path(item["books"]), "Author.books");
    }

    #[test]
    fn unknown_property_is_rejected() {
        let err = build("Book", json!({ "titel": "x" }), 16).unwrap_err();
        assert!(matches!(
            err,
            QueryError::UnknownProperty { ref entity, ref key }
                if entity == "Book" && key == "titel"
        ));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = build("Book", json!({ "title": { "$regex": "x" } }), 16).unwrap_err();
        assert_eq!(err.code(), "UnknownOperator");
    }

    #[test]
    fn custom_expressions_and_foreign_key_columns_are_accepted() {
        assert!(build("Book", json!({ "lower(title) = ?": ["x"] }), 16).is_ok());
        assert!(build("Book", json!({ "author_id": 3 }), 16).is_ok());
    }

    #[test]
    fn depth_limit_is_enforced() {
        let criteria = json!({ "books": { "author": { "books": { "title": "x" } } } });
        let err = build("Author", criteria, 2).unwrap_err();
        assert!(matches!(err, QueryError::CriteriaTooDeep { max: 2 }));
    }

    #[test]
    fn duplicate_keys_fold_into_and() {
        let mut out = ValueMap::new();
        inline_condition(&mut out, "e0.id".into(), Value::Int(1));
        inline_condition(&mut out, "e0.id".into(), Value::Int(2));
        assert_eq!(
            Value::Object(out),
            Value::from(json!({ "$and": [{ "e0.id": 1 }, { "e0.id": 2 }] }))
        );
    }
}
