//! Rewrites caller criteria into the canonical shape the criteria tree expects.
//!
//! The normalized form has only plain property keys, `$` operators, alias or
//! embedded paths, and custom expressions. Entity references are reduced to
//! primary keys, bare arrays become `$in`, shorthand keys such as `'age >'`
//! become operator objects, and dotted relation keys are folded into nested
//! objects.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::query::errors::{QueryError, Result};
use crate::query::helper::is_custom_expression;
use crate::query::metadata::{target_metadata, EntityMetadata, EntityProperty, MetadataProvider};
use crate::query::operator::{
    is_comparison_key, is_dollar_key, GroupOperator, Operator, PK_SEPARATOR,
};
use crate::query::value::{Value, ValueMap};

static SHORTHAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w.]+)\s*(>=|<=|!=|>|<|!)$").unwrap());
static NAMED_OPERATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([\w.]+):(\w+)$").unwrap());

/// Normalizes criteria against entity metadata.
pub struct CriteriaNormalizer<'a> {
    metadata: &'a dyn MetadataProvider,
}

impl<'a> CriteriaNormalizer<'a> {
    /// Creates a normalizer bound to the supplied metadata.
    pub fn new(metadata: &'a dyn MetadataProvider) -> Self {
        Self { metadata }
    }

    /// Normalizes `criteria` for queries rooted at `entity`.
    ///
    /// Scalars and entity references at the root become primary-key
    /// conditions, and `Null` yields an empty condition.
    pub fn normalize(&self, entity: &str, criteria: Value) -> Result<ValueMap> {
        let meta = self.metadata.get(entity)?;
        self.condition(meta, criteria)
    }

    fn condition(&self, meta: &EntityMetadata, criteria: Value) -> Result<ValueMap> {
        match criteria {
            Value::Null => Ok(ValueMap::new()),
            Value::Object(map) => self.object(meta, map),
            Value::Entity(entity) => primary_key_condition(meta, entity.pk),
            Value::Array(items) => {
                let items: Vec<Value> = items.into_iter().map(normalize_operand).collect();
                if meta.primary_keys.len() > 1
                    && items.len() == meta.primary_keys.len()
                    && items.iter().all(Value::is_primary_key_like)
                {
                    return primary_key_condition(meta, items);
                }
                if meta.primary_keys.is_empty() {
                    return Err(QueryError::MissingPrimaryKey {
                        entity: meta.name.clone(),
                    });
                }
                let key = meta.primary_keys.join(PK_SEPARATOR);
                Ok(single(
                    key,
                    Value::object([(Operator::In.key(), Value::Array(items))]),
                ))
            }
            scalar if scalar.is_primary_key_like() => primary_key_condition(meta, vec![scalar]),
            other => Err(QueryError::invalid_condition(
                meta.name.clone(),
                format!("cannot use {other:?} as a condition"),
            )),
        }
    }

    fn object(&self, meta: &EntityMetadata, map: ValueMap) -> Result<ValueMap> {
        let mut expanded = ValueMap::new();
        for (key, value) in map {
            if let Some(group) = GroupOperator::parse(&key) {
                let value = match (group, value) {
                    (GroupOperator::Not, value) => Value::Object(self.condition(meta, value)?),
                    (_, Value::Array(items)) => Value::Array(
                        items
                            .into_iter()
                            .map(|item| self.condition(meta, item).map(Value::Object))
                            .collect::<Result<_>>()?,
                    ),
                    (_, value) => Value::Array(vec![Value::Object(self.condition(meta, value)?)]),
                };
                merge_field(&mut expanded, key, value);
                continue;
            }
            if is_dollar_key(&key) {
                expanded.insert(key, normalize_operand(value));
                continue;
            }
            let (field, value) = split_shorthand(&key, value);
            let (field, value) = self.fold_relation_path(meta, field, value);
            let value = self.field_value(meta, &field, value)?;
            merge_field(&mut expanded, field, value);
        }
        Ok(expanded)
    }

    /// `author.name` becomes `author: { name }` when `author` is a relation.
    fn fold_relation_path(
        &self,
        meta: &EntityMetadata,
        field: String,
        value: Value,
    ) -> (String, Value) {
        let Some((head, rest)) = field.split_once('.') else {
            return (field, value);
        };
        match meta.properties.get(head) {
            Some(prop) if prop.kind.is_relation() => {
                (head.to_owned(), Value::object([(rest.to_owned(), value)]))
            }
            _ => (field, value),
        }
    }

    fn field_value(&self, meta: &EntityMetadata, key: &str, value: Value) -> Result<Value> {
        let prop = meta.property(key);
        match value {
            Value::Entity(entity) => Ok(entity.pk_value()),
            Value::Array(items) => {
                let items: Vec<Value> = items.into_iter().map(normalize_operand).collect();
                if is_custom_expression(key) || key.contains(PK_SEPARATOR) {
                    return Ok(Value::Array(items));
                }
                let tuple = Value::Array(items);
                if prop.is_some_and(EntityProperty::is_composite) && tuple.is_key_tuple() {
                    return Ok(tuple);
                }
                Ok(Value::object([(Operator::In.key(), tuple)]))
            }
            Value::Object(map) => match prop {
                Some(prop) if prop.kind.is_relation() => {
                    let target = target_metadata(self.metadata, prop)?;
                    if let Some(pk) = collapse_primary_key(target, &map) {
                        return Ok(pk);
                    }
                    if map.keys().all(|k| is_comparison_key(k)) {
                        return Ok(Value::Object(normalize_operands(map)));
                    }
                    Ok(Value::Object(self.object(target, map)?))
                }
                _ => Ok(Value::Object(normalize_operands(map))),
            },
            other => Ok(other),
        }
    }
}

fn single(key: String, value: Value) -> ValueMap {
    let mut map = ValueMap::with_capacity(1);
    map.insert(key, value);
    map
}

fn primary_key_condition(meta: &EntityMetadata, values: Vec<Value>) -> Result<ValueMap> {
    if meta.primary_keys.is_empty() {
        return Err(QueryError::MissingPrimaryKey {
            entity: meta.name.clone(),
        });
    }
    if values.len() != meta.primary_keys.len() {
        return Err(QueryError::invalid_condition(
            meta.primary_keys.join(", "),
            format!(
                "expected {} primary key values, got {}",
                meta.primary_keys.len(),
                values.len()
            ),
        ));
    }
    Ok(meta
        .primary_keys
        .iter()
        .cloned()
        .zip(values.into_iter().map(normalize_operand))
        .collect())
}

/// Collapses `{ id: 5 }` under a relation to `5`, or to a tuple for
/// composite keys whose parts are all plain values. A list of keys
/// collapses to `{ $in: [...] }`.
fn collapse_primary_key(target: &EntityMetadata, map: &ValueMap) -> Option<Value> {
    if map.is_empty()
        || map.len() != target.primary_keys.len()
        || !map.keys().all(|k| target.primary_keys.contains(k))
    {
        return None;
    }
    if let [pk] = target.primary_keys.as_slice() {
        return map.get(pk).cloned().map(|value| match normalize_operand(value) {
            Value::Array(items) => Value::object([(Operator::In.key(), Value::Array(items))]),
            other => other,
        });
    }
    let parts: Vec<Value> = target
        .primary_keys
        .iter()
        .filter_map(|pk| map.get(pk).cloned().map(normalize_operand))
        .collect();
    parts
        .iter()
        .all(Value::is_primary_key_like)
        .then_some(Value::Array(parts))
}

fn normalize_operand(value: Value) -> Value {
    match value {
        Value::Entity(entity) => entity.pk_value(),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_operand).collect()),
        other => other,
    }
}

fn normalize_operands(map: ValueMap) -> ValueMap {
    map.into_iter()
        .map(|(k, v)| (k, normalize_operand(v)))
        .collect()
}

fn split_shorthand(key: &str, value: Value) -> (String, Value) {
    if let Some(caps) = SHORTHAND.captures(key) {
        if let Some(op) = Operator::from_symbol(&caps[2]) {
            return (caps[1].to_owned(), Value::object([(op.key(), value)]));
        }
    }
    if let Some(caps) = NAMED_OPERATOR.captures(key) {
        if let Some(op) = Operator::from_name(&caps[2]) {
            return (caps[1].to_owned(), Value::object([(op.key(), value)]));
        }
    }
    (key.to_owned(), value)
}

/// Inserts `field`, combining with an existing entry for the same key.
fn merge_field(out: &mut ValueMap, field: String, value: Value) {
    let rejected = match out.get_mut(&field) {
        Some(existing) => try_merge(existing, &field, value),
        None => {
            out.insert(field, value);
            return;
        }
    };
    let Some(value) = rejected else {
        return;
    };
    let condition = Value::Object(single(field, value));
    match out.get_mut(GroupOperator::And.key()) {
        Some(Value::Array(items)) => items.push(condition),
        _ => {
            out.insert(GroupOperator::And.key().to_owned(), Value::Array(vec![condition]));
        }
    }
}

/// Merges `value` into `existing`, handing it back when the two cannot share a key.
fn try_merge(existing: &mut Value, field: &str, value: Value) -> Option<Value> {
    let group = GroupOperator::parse(field).is_some_and(|g| g != GroupOperator::Not);
    match (existing, value) {
        (Value::Array(items), Value::Array(more)) if group => {
            items.extend(more);
            None
        }
        (Value::Object(current), Value::Object(extra))
            if extra.keys().all(|k| !current.contains_key(k)) =>
        {
            current.extend(extra);
            None
        }
        (current, Value::Object(extra))
            if current.is_scalar() && extra.keys().all(|k| is_comparison_key(k)) =>
        {
            let mut merged = ValueMap::with_capacity(extra.len() + 1);
            merged.insert(Operator::Eq.key().to_owned(), current.clone());
            merged.extend(extra);
            *current = Value::Object(merged);
            None
        }
        (_, value) => Some(value),
    }
}
