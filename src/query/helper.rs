//! SQL emission helper.
//!
//! Turns processed criteria, data payloads, and join descriptors into SQL
//! fragments. The helper borrows everything it needs from the builder and
//! only ever mutates the parameter list handed to it, so placeholder order
//! always follows emission order.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::platform::Platform;
use crate::query::builder::{QueryKind, QueryOrder};
use crate::query::errors::{QueryError, Result};
use crate::query::join::JoinDescriptor;
use crate::query::metadata::{MetadataProvider, ReferenceKind};
use crate::query::operator::{
    is_comparison_key, GroupOperator, Operator, FLAGS_KEY, PK_SEPARATOR,
};
use crate::query::value::{RegexPattern, Value, ValueMap};

static CUSTOM_EXPRESSION: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[ ?<>=()'"`]|^\d"#).unwrap());

/// True for keys that are SQL expressions rather than property references,
/// such as `count(e1.id)` or `price * ? > 10`.
pub fn is_custom_expression(field: &str) -> bool {
    CUSTOM_EXPRESSION.is_match(field)
}

/// What an alias points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AliasTarget {
    /// Table of a registered entity.
    Entity(String),
    /// Pivot table without entity metadata.
    Pivot(String),
}

/// Field reference resolved against metadata.
#[derive(Clone, Debug)]
enum FieldSql {
    Columns {
        columns: Vec<String>,
        to_db: Option<String>,
        read_as: Option<(String, String)>,
    },
    Expression {
        sql: String,
        name: Option<String>,
    },
}

impl FieldSql {
    fn column(sql: String) -> Self {
        FieldSql::Columns {
            columns: vec![sql],
            to_db: None,
            read_as: None,
        }
    }

    fn width(&self) -> usize {
        match self {
            FieldSql::Columns { columns, .. } => columns.len(),
            FieldSql::Expression { .. } => 1,
        }
    }

    fn columns(&self) -> Vec<&str> {
        match self {
            FieldSql::Columns { columns, .. } => columns.iter().map(String::as_str).collect(),
            FieldSql::Expression { sql, .. } => vec![sql.as_str()],
        }
    }

    fn to_db(&self) -> Option<&str> {
        match self {
            FieldSql::Columns { to_db, .. } => to_db.as_deref(),
            FieldSql::Expression { .. } => None,
        }
    }

    fn condition_sql(&self) -> String {
        match self {
            FieldSql::Columns { columns, .. } if columns.len() == 1 => columns[0].clone(),
            FieldSql::Columns { columns, .. } => format!("({})", columns.join(", ")),
            FieldSql::Expression { sql, .. } => sql.clone(),
        }
    }
}

/// Borrowed view over the builder state needed to emit SQL.
pub struct QueryBuilderHelper<'a> {
    pub(crate) entity_name: &'a str,
    pub(crate) alias: &'a str,
    pub(crate) aliases: &'a IndexMap<String, AliasTarget>,
    pub(crate) metadata: &'a dyn MetadataProvider,
    pub(crate) platform: &'a dyn Platform,
    pub(crate) elide_empty_nin: bool,
}

impl<'a> QueryBuilderHelper<'a> {
    /// Quotes an identifier through the platform.
    pub fn quote(&self, id: &str) -> String {
        self.platform.quote_identifier(id)
    }

    /// Renders `table AS alias`, or just `table` when both are equal.
    pub fn table_with_alias(&self, table: &str, alias: &str) -> String {
        if table == alias {
            self.quote(table)
        } else {
            format!("{} AS {}", self.quote(table), self.quote(alias))
        }
    }

    /// Maps a field reference to SQL for conditions, grouping, and ordering.
    pub fn mapper(&self, field: &str, kind: QueryKind) -> Result<String> {
        Ok(self.resolve(field, kind)?.condition_sql())
    }

    /// Maps a field reference for the select list. Formulas and read
    /// conversions are aliased back to the property name.
    pub fn mapper_select(&self, field: &str, kind: QueryKind) -> Result<String> {
        Ok(match self.resolve(field, kind)? {
            FieldSql::Columns {
                read_as: Some((sql, name)),
                ..
            } => format!("{sql} AS {}", self.quote(&name)),
            FieldSql::Columns { columns, .. } => columns.join(", "),
            FieldSql::Expression {
                sql,
                name: Some(name),
            } => format!("{sql} AS {}", self.quote(&name)),
            FieldSql::Expression { sql, name: None } => sql,
        })
    }

    fn split_alias<'f>(&self, field: &'f str) -> Result<(&'f str, &'f str)>
    where
        'a: 'f,
    {
        if let Some((head, rest)) = field.split_once('.') {
            if self.aliases.contains_key(head) {
                return Ok((head, rest));
            }
            let root = self.metadata.get(self.entity_name)?;
            if !root.properties.contains_key(head) {
                return Err(QueryError::UnknownAlias {
                    alias: head.to_owned(),
                    field: field.to_owned(),
                });
            }
        }
        Ok((self.alias, field))
    }

    fn resolve(&self, field: &str, kind: QueryKind) -> Result<FieldSql> {
        if field.contains(PK_SEPARATOR) {
            let mut columns = Vec::new();
            for part in field.split(PK_SEPARATOR) {
                match self.resolve(part, kind)? {
                    FieldSql::Columns { columns: more, .. } => columns.extend(more),
                    FieldSql::Expression { sql, .. } => columns.push(sql),
                }
            }
            return Ok(FieldSql::Columns {
                columns,
                to_db: None,
                read_as: None,
            });
        }
        if is_custom_expression(field) {
            return Ok(FieldSql::Expression {
                sql: field.to_owned(),
                name: None,
            });
        }

        let (alias, rest) = self.split_alias(field)?;
        let qualify = kind.requires_alias();
        let column = |col: &str| {
            if qualify {
                self.quote(&format!("{alias}.{col}"))
            } else {
                self.quote(col)
            }
        };
        if rest == "*" {
            return Ok(FieldSql::Expression {
                sql: if qualify { column("*") } else { "*".to_owned() },
                name: None,
            });
        }

        let entity = match self.aliases.get(alias) {
            Some(AliasTarget::Entity(name)) => name.as_str(),
            _ => return Ok(FieldSql::column(column(rest))),
        };
        let meta = self.metadata.get(entity)?;

        if let Some((head, sub)) = rest.split_once('.') {
            let embedded = meta
                .properties
                .get(head)
                .filter(|p| p.kind == ReferenceKind::Embedded)
                .and_then(|p| p.embedded.get(sub));
            return match embedded {
                Some(col) => Ok(FieldSql::column(column(col))),
                None => Err(QueryError::UnknownProperty {
                    entity: meta.name.clone(),
                    key: rest.to_owned(),
                }),
            };
        }

        let Some(prop) = meta.property(rest) else {
            return Ok(FieldSql::column(column(rest)));
        };
        if let Some(formula) = &prop.formula {
            let table_ref = if qualify {
                self.quote(alias)
            } else {
                self.quote(&meta.table)
            };
            return Ok(FieldSql::Expression {
                sql: formula.replace("{alias}", &table_ref),
                name: Some(prop.name.clone()),
            });
        }
        let columns: Vec<String> = if prop.field_names.is_empty() {
            vec![column(&prop.name)]
        } else {
            prop.field_names.iter().map(|c| column(c)).collect()
        };
        let conversion = prop.conversion.as_ref().filter(|_| columns.len() == 1);
        let read_as = conversion
            .and_then(|c| c.from_db.as_ref())
            .map(|template| (template.replace("{column}", &columns[0]), prop.name.clone()));
        let to_db = conversion.and_then(|c| c.to_db.clone());
        Ok(FieldSql::Columns {
            columns,
            to_db,
            read_as,
        })
    }

    /// Maps a data payload for `entity` to `column -> value`.
    pub fn map_data(&self, entity: &str, data: &Value) -> Result<ValueMap> {
        let meta = self.metadata.get(entity)?;
        let Value::Object(map) = data else {
            return Err(QueryError::InvalidData {
                entity: entity.to_owned(),
                reason: "data must be an object".to_owned(),
            });
        };
        let mut out = ValueMap::with_capacity(map.len());
        for (key, value) in map {
            let Some(prop) = meta.property(key) else {
                out.insert(key.clone(), value.clone());
                continue;
            };
            let inverse_one_to_one = prop.kind == ReferenceKind::OneToOne && !prop.owner;
            if !prop.persist
                || prop.formula.is_some()
                || prop.kind.is_to_many()
                || inverse_one_to_one
            {
                return Err(QueryError::NotPersistable {
                    entity: entity.to_owned(),
                    property: prop.name.clone(),
                });
            }
            if prop.kind == ReferenceKind::Embedded {
                match value {
                    Value::Null => {
                        for column in prop.embedded.values() {
                            out.insert(column.clone(), Value::Null);
                        }
                    }
                    Value::Object(parts) => {
                        for (sub, part) in parts {
                            let column = prop.embedded.get(sub).ok_or_else(|| {
                                QueryError::InvalidData {
                                    entity: entity.to_owned(),
                                    reason: format!(
                                        "unknown embedded property {}.{sub}",
                                        prop.name
                                    ),
                                }
                            })?;
                            out.insert(column.clone(), part.clone());
                        }
                    }
                    other => {
                        return Err(QueryError::InvalidData {
                            entity: entity.to_owned(),
                            reason: format!(
                                "embedded {} expects an object, got {other:?}",
                                prop.name
                            ),
                        })
                    }
                }
                continue;
            }
            let value = match value {
                Value::Entity(reference) => reference.pk_value(),
                other => other.clone(),
            };
            if !prop.is_composite() {
                let column = prop.field_names.first().unwrap_or(&prop.name);
                out.insert(column.clone(), value);
                continue;
            }
            match value {
                Value::Null => {
                    for column in &prop.field_names {
                        out.insert(column.clone(), Value::Null);
                    }
                }
                Value::Array(parts) if parts.len() == prop.field_names.len() => {
                    for (column, part) in prop.field_names.iter().zip(parts) {
                        out.insert(column.clone(), part);
                    }
                }
                other => {
                    return Err(QueryError::InvalidData {
                        entity: entity.to_owned(),
                        reason: format!(
                            "{} expects {} key values, got {other:?}",
                            prop.name,
                            prop.field_names.len()
                        ),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Write conversion template for a column of the root entity.
    pub fn column_to_db(&self, column: &str) -> Option<String> {
        let meta = self.metadata.find(self.entity_name)?;
        meta.property(column)
            .and_then(|p| p.conversion.as_ref())
            .and_then(|c| c.to_db.clone())
    }

    /// Renders `value`, pushing bound parameters onto `params`.
    ///
    /// `Null` renders as `NULL`, raw fragments inline verbatim, and arrays
    /// expand to comma-separated placeholders.
    pub fn value_replacement(
        &self,
        value: &Value,
        to_db: Option<&str>,
        params: &mut Vec<Value>,
    ) -> String {
        match value {
            Value::Null => "NULL".to_owned(),
            Value::Raw(sql) => sql.clone(),
            Value::Entity(reference) => {
                self.value_replacement(&reference.pk_value(), to_db, params)
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.value_replacement(item, to_db, params))
                .collect::<Vec<_>>()
                .join(", "),
            other => {
                params.push(other.clone());
                let placeholder = self.platform.parameter_placeholder(params.len());
                match to_db {
                    Some(template) => template.replace('?', &placeholder),
                    None => placeholder,
                }
            }
        }
    }

    /// Renders a processed condition map, joining top-level entries with `AND`.
    pub fn append_query_condition(
        &self,
        kind: QueryKind,
        cond: &ValueMap,
        params: &mut Vec<Value>,
    ) -> Result<String> {
        Ok(self
            .condition_parts(kind, cond, params)?
            .join(GroupOperator::And.connective()))
    }

    fn condition_parts(
        &self,
        kind: QueryKind,
        cond: &ValueMap,
        params: &mut Vec<Value>,
    ) -> Result<Vec<String>> {
        let mut parts = Vec::new();
        for (key, value) in cond {
            match GroupOperator::parse(key) {
                Some(GroupOperator::And) => {
                    for item in group_items(key, value)? {
                        parts.extend(self.condition_parts(kind, item, params)?);
                    }
                }
                Some(GroupOperator::Or) => {
                    let mut alternatives = Vec::new();
                    for item in group_items(key, value)? {
                        let sub = self.condition_parts(kind, item, params)?;
                        match sub.len() {
                            0 => {}
                            1 => alternatives.extend(sub),
                            _ => alternatives
                                .push(format!("({})", sub.join(GroupOperator::And.connective()))),
                        }
                    }
                    match alternatives.len() {
                        0 => {}
                        1 => parts.extend(alternatives),
                        _ => parts.push(format!(
                            "({})",
                            alternatives.join(GroupOperator::Or.connective())
                        )),
                    }
                }
                Some(GroupOperator::Not) => {
                    let Value::Object(inner) = value else {
                        return Err(QueryError::invalid_condition(key, "$not expects an object"));
                    };
                    let sub = self.condition_parts(kind, inner, params)?;
                    if !sub.is_empty() {
                        parts.push(format!(
                            "NOT ({})",
                            sub.join(GroupOperator::Not.connective())
                        ));
                    }
                }
                None => parts.extend(self.sub_condition(kind, key, value, params)?),
            }
        }
        Ok(parts)
    }

    fn sub_condition(
        &self,
        kind: QueryKind,
        key: &str,
        value: &Value,
        params: &mut Vec<Value>,
    ) -> Result<Vec<String>> {
        if is_custom_expression(key) && (key.contains('?') || matches!(value, Value::Array(_))) {
            let values = match value {
                Value::Array(items) => items.as_slice(),
                other => std::slice::from_ref(other),
            };
            return Ok(vec![self.bind_expression(key, values, params)?]);
        }

        let field = self.resolve(key, kind)?;
        match value {
            Value::Object(ops) => {
                if ops.is_empty() {
                    return Err(QueryError::invalid_condition(key, "empty condition object"));
                }
                if let Some(bad) = ops.keys().find(|k| !is_comparison_key(k)) {
                    return Err(if bad.starts_with('$') {
                        QueryError::UnknownOperator {
                            operator: bad.clone(),
                        }
                    } else {
                        QueryError::invalid_condition(
                            key,
                            format!("'{bad}' is not an operator"),
                        )
                    });
                }
                let flags = ops.get(FLAGS_KEY).and_then(Value::as_str).unwrap_or("");
                let mut out = Vec::new();
                for (op_key, operand) in ops {
                    let Some(op) = Operator::parse(op_key) else {
                        continue;
                    };
                    let sql = self.operator_condition(&field, key, op, operand, flags, params)?;
                    out.extend(sql);
                }
                if out.is_empty() && !ops.keys().any(|k| k != FLAGS_KEY) {
                    return Err(QueryError::invalid_condition(key, "$flags without $re"));
                }
                Ok(out)
            }
            other => Ok(self
                .operator_condition(&field, key, Operator::Eq, other, "", params)?
                .into_iter()
                .collect()),
        }
    }

    fn operator_condition(
        &self,
        field: &FieldSql,
        key: &str,
        op: Operator,
        operand: &Value,
        flags: &str,
        params: &mut Vec<Value>,
    ) -> Result<Option<String>> {
        let column = field.condition_sql();
        let sql = match (op, operand) {
            (Operator::Eq, Value::Null) => format!("{column} IS NULL"),
            (Operator::Ne, Value::Null) => format!("{column} IS NOT NULL"),
            (Operator::Eq, Value::Regex(re)) => self.regex_condition(&column, re, params)?,
            (Operator::Exists, operand) => {
                let exists = operand.as_bool().unwrap_or(!matches!(operand, Value::Null));
                if exists {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
            (Operator::In | Operator::Nin, operand) => {
                let items = match operand {
                    Value::Array(items) => items.as_slice(),
                    other => std::slice::from_ref(other),
                };
                if items.is_empty() {
                    return Ok(match op {
                        Operator::In => Some("1 = 0".to_owned()),
                        _ if self.elide_empty_nin => None,
                        _ => Some("1 = 1".to_owned()),
                    });
                }
                if field.width() > 1 {
                    self.tuple_in(field, key, op, items, params)?
                } else {
                    let items = Value::Array(items.to_vec());
                    let list = self.value_replacement(&items, field.to_db(), params);
                    format!("{column} {} ({list})", op.sql())
                }
            }
            (Operator::Re, operand) => {
                let source = match operand {
                    Value::Regex(re) => re.source.clone(),
                    Value::String(s) => s.clone(),
                    other => {
                        return Err(QueryError::invalid_condition(
                            key,
                            format!("$re expects a pattern, got {other:?}"),
                        ))
                    }
                };
                let flags = match operand {
                    Value::Regex(re) if flags.is_empty() => re.flags.as_str(),
                    _ => flags,
                };
                let regexp = self.platform.regexp_operator(flags).ok_or_else(|| {
                    QueryError::UnsupportedRegex {
                        platform: self.platform.name().to_owned(),
                        pattern: source.clone(),
                    }
                })?;
                let placeholder = self.value_replacement(&Value::String(source), None, params);
                format!("{column} {regexp} {placeholder}")
            }
            (op, Value::Array(_))
                if field.width() == 1 || !matches!(op, Operator::Eq | Operator::Ne) =>
            {
                return Err(QueryError::invalid_condition(
                    key,
                    format!("{} does not accept a list", op.key()),
                ));
            }
            (Operator::Ilike, operand) => {
                let placeholder = self.value_replacement(operand, field.to_db(), params);
                format!("{column} {} {placeholder}", self.platform.ilike_operator())
            }
            (Operator::Eq | Operator::Ne, Value::Array(parts)) if field.width() > 1 => {
                let tuple = self.tuple_equals(field, key, parts, params)?;
                if op == Operator::Ne {
                    format!("NOT {tuple}")
                } else {
                    tuple
                }
            }
            (op, operand) => {
                let placeholder = self.value_replacement(operand, field.to_db(), params);
                format!("{column} {} {placeholder}", op.sql())
            }
        };
        Ok(Some(sql))
    }

    fn tuple_equals(
        &self,
        field: &FieldSql,
        key: &str,
        parts: &[Value],
        params: &mut Vec<Value>,
    ) -> Result<String> {
        let columns = field.columns();
        if parts.len() != columns.len() {
            return Err(QueryError::invalid_condition(
                key,
                format!("expected {} key values, got {}", columns.len(), parts.len()),
            ));
        }
        if self.platform.allows_row_value_comparison() {
            let values = self.value_replacement(&Value::Array(parts.to_vec()), None, params);
            return Ok(format!("({}) = ({values})", columns.join(", ")));
        }
        let pairs: Vec<String> = columns
            .iter()
            .zip(parts)
            .map(|(column, part)| {
                let placeholder = self.value_replacement(part, None, params);
                format!("{column} = {placeholder}")
            })
            .collect();
        Ok(format!("({})", pairs.join(" AND ")))
    }

    fn tuple_in(
        &self,
        field: &FieldSql,
        key: &str,
        op: Operator,
        items: &[Value],
        params: &mut Vec<Value>,
    ) -> Result<String> {
        let columns = field.columns();
        let tuples = items
            .iter()
            .map(|item| match item {
                Value::Array(parts) if parts.len() == columns.len() => Ok(parts.as_slice()),
                other => Err(QueryError::invalid_condition(
                    key,
                    format!("expected a {}-value key tuple, got {other:?}", columns.len()),
                )),
            })
            .collect::<Result<Vec<_>>>()?;

        if self.platform.allows_row_value_comparison() {
            let rows: Vec<String> = tuples
                .iter()
                .map(|parts| {
                    format!(
                        "({})",
                        self.value_replacement(&Value::Array(parts.to_vec()), None, params)
                    )
                })
                .collect();
            return Ok(format!(
                "({}) {} ({})",
                columns.join(", "),
                op.sql(),
                rows.join(", ")
            ));
        }

        let alternatives: Vec<String> = tuples
            .iter()
            .map(|parts| {
                let pairs: Vec<String> = columns
                    .iter()
                    .zip(parts.iter())
                    .map(|(column, part)| {
                        format!("{column} = {}", self.value_replacement(part, None, params))
                    })
                    .collect();
                format!("({})", pairs.join(" AND "))
            })
            .collect();
        let joined = format!("({})", alternatives.join(" OR "));
        Ok(match op {
            Operator::Nin => format!("NOT {joined}"),
            _ => joined,
        })
    }

    fn regex_condition(
        &self,
        column: &str,
        re: &RegexPattern,
        params: &mut Vec<Value>,
    ) -> Result<String> {
        if is_simple_regex(re) {
            let placeholder =
                self.value_replacement(&Value::String(regexp_to_like(&re.source)), None, params);
            return Ok(format!("{column} LIKE {placeholder}"));
        }
        let regexp = self.platform.regexp_operator(&re.flags).ok_or_else(|| {
            QueryError::UnsupportedRegex {
                platform: self.platform.name().to_owned(),
                pattern: re.source.clone(),
            }
        })?;
        let placeholder = self.value_replacement(&Value::String(re.source.clone()), None, params);
        Ok(format!("{column} {regexp} {placeholder}"))
    }

    fn bind_expression(
        &self,
        expr: &str,
        values: &[Value],
        params: &mut Vec<Value>,
    ) -> Result<String> {
        let mut out = String::with_capacity(expr.len());
        let mut values = values.iter();
        for ch in expr.chars() {
            if ch != '?' {
                out.push(ch);
                continue;
            }
            let value = values.next().ok_or_else(|| {
                QueryError::invalid_condition(expr, "not enough values for placeholders")
            })?;
            out.push_str(&self.value_replacement(value, None, params));
        }
        if values.next().is_some() {
            return Err(QueryError::invalid_condition(expr, "more values than placeholders"));
        }
        Ok(out)
    }

    /// Renders a join as `<kind> JOIN <table> AS <alias> ON ...`.
    pub fn join_clause(&self, join: &JoinDescriptor) -> String {
        let on: Vec<String> = join
            .primary_keys
            .iter()
            .zip(&join.join_columns)
            .map(|(pk, column)| {
                format!(
                    "{} = {}",
                    self.quote(&format!("{}.{pk}", join.owner_alias)),
                    self.quote(&format!("{}.{column}", join.alias))
                )
            })
            .collect();
        format!(
            "{} {} ON {}",
            join.join_type.sql(),
            self.table_with_alias(&join.table, &join.alias),
            on.join(" AND ")
        )
    }

    /// Select-list columns exposing a populated join's foreign keys.
    ///
    /// Inverse one-to-one joins expose the target key under the owning
    /// property name; pivot joins expose both pivot columns as `fk__<column>`.
    pub fn map_join_columns(&self, join: &JoinDescriptor) -> Vec<String> {
        let column = |col: &str| self.quote(&format!("{}.{col}", join.alias));
        let prop = &join.property;
        if prop.kind == ReferenceKind::OneToOne && !prop.owner {
            return prop
                .field_names
                .iter()
                .zip(&join.inverse_join_columns)
                .map(|(name, col)| format!("{} AS {}", column(col), self.quote(name)))
                .collect();
        }
        join.join_columns
            .iter()
            .chain(&join.inverse_join_columns)
            .map(|col| format!("{} AS {}", column(col), self.quote(&format!("fk__{col}"))))
            .collect()
    }

    /// Renders `ORDER BY` items.
    pub fn order_items(
        &self,
        orders: &[(String, QueryOrder)],
        kind: QueryKind,
    ) -> Result<Vec<String>> {
        orders
            .iter()
            .map(|(field, order)| Ok(format!("{} {}", self.mapper(field, kind)?, order.sql())))
            .collect()
    }

    /// Renames result columns of the root entity back to property names.
    /// Composite foreign keys are gathered into tuples.
    pub fn map_result(&self, row: ValueMap) -> ValueMap {
        let Some(meta) = self.metadata.find(self.entity_name) else {
            return row;
        };
        let mut row = row;
        let mut out = ValueMap::with_capacity(row.len());
        for prop in meta.properties.values() {
            if prop.kind.is_to_many() || prop.field_names.is_empty() {
                continue;
            }
            if prop.kind == ReferenceKind::Embedded {
                let mut parts = ValueMap::new();
                for (sub, column) in &prop.embedded {
                    if let Some(value) = row.shift_remove(column) {
                        parts.insert(sub.clone(), value);
                    }
                }
                if !parts.is_empty() {
                    out.insert(prop.name.clone(), Value::Object(parts));
                }
                continue;
            }
            if !prop.field_names.iter().all(|c| row.contains_key(c)) {
                continue;
            }
            let mut values: Vec<Value> = prop
                .field_names
                .iter()
                .filter_map(|c| row.shift_remove(c))
                .collect();
            let value = if values.len() == 1 {
                values.remove(0)
            } else if values.iter().all(|v| matches!(v, Value::Null)) {
                Value::Null
            } else {
                Value::Array(values)
            };
            out.insert(prop.name.clone(), value);
        }
        out.extend(row);
        out
    }
}

fn group_items<'v>(key: &str, value: &'v Value) -> Result<Vec<&'v ValueMap>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object().ok_or_else(|| {
                    QueryError::invalid_condition(key, "group items must be objects")
                })
            })
            .collect(),
        Value::Object(map) => Ok(vec![map]),
        _ => Err(QueryError::invalid_condition(key, "expected a list of conditions")),
    }
}

/// True when the pattern can be expressed with `LIKE`: no flags, no
/// character classes, groups, alternation, or quantifiers other than `.*`.
pub fn is_simple_regex(re: &RegexPattern) -> bool {
    if re.flags.contains('i') {
        return false;
    }
    let (body, _, _) = strip_anchors(&re.source);
    let mut chars = body.chars().peekable();
    let mut prev_dot = false;
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if chars.next() != Some('.') {
                    return false;
                }
                prev_dot = false;
                continue;
            }
            '*' if !prev_dot => return false,
            '[' | ']' | '(' | ')' | '{' | '}' | '|' | '+' | '?' | '^' | '$' => return false,
            _ => {}
        }
        prev_dot = ch == '.';
    }
    true
}

/// Converts a simple regex to a `LIKE` pattern: `.*` becomes `%`, `.`
/// becomes `_`, `\.` becomes a literal dot, and unanchored ends get `%`.
pub fn regexp_to_like(source: &str) -> String {
    let (body, starts, ends) = strip_anchors(source);
    let mut out = String::with_capacity(body.len() + 2);
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '.' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push('%');
            }
            '.' => out.push('_'),
            other => out.push(other),
        }
    }
    let lead = if starts || out.starts_with('%') { "" } else { "%" };
    let trail = if ends || out.ends_with('%') { "" } else { "%" };
    format!("{lead}{out}{trail}")
}

fn strip_anchors(source: &str) -> (&str, bool, bool) {
    let (body, starts) = match source.strip_prefix('^') {
        Some(rest) => (rest, true),
        None => (source, false),
    };
    if body.ends_with('$') && !body.ends_with("\\$") {
        (&body[..body.len() - 1], starts, true)
    } else {
        (body, starts, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_expressions_are_detected() {
        assert!(is_custom_expression("count(e1.id)"));
        assert!(is_custom_expression("price * ? > 10"));
        assert!(is_custom_expression("1 = 1"));
        assert!(!is_custom_expression("e0.name"));
        assert!(!is_custom_expression("e0.*"));
        assert!(!is_custom_expression("author_id"));
    }

    #[test]
    fn simple_regexes_become_like_patterns() {
        assert!(is_simple_regex(&RegexPattern::new("^foo.*bar$")));
        assert_eq!(regexp_to_like("^foo.*bar$"), "foo%bar");
        assert_eq!(regexp_to_like("^Jo.n"), "Jo_n%");
        assert_eq!(regexp_to_like("book"), "%book%");
        assert_eq!(regexp_to_like(r"\.com$"), "%.com");
        assert_eq!(regexp_to_like("^Harry.*"), "Harry%");
    }

    #[test]
    fn advanced_regexes_are_rejected() {
        assert!(!is_simple_regex(&RegexPattern::new("^(a|b)")));
        assert!(!is_simple_regex(&RegexPattern::new("colou?r")));
        assert!(!is_simple_regex(&RegexPattern::new("a+")));
        assert!(!is_simple_regex(&RegexPattern::new(r"\d")));
        assert!(!is_simple_regex(&RegexPattern::new("foo").with_flags("i")));
    }
}
