//! Fluent query builder.
//!
//! A [`QueryBuilder`] owns every piece of state a single query needs: the
//! root alias, the alias counter, joins keyed by relationship path, and the
//! processed conditions. Fluent methods take and return the builder by value;
//! the first failure is parked and surfaced by [`QueryBuilder::compile`].

use std::fmt;
use std::mem;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};

use crate::connection::{Connection, ExecMethod, QueryOutput};
use crate::platform::Platform;
use crate::query::config::{AliasStrategy, QueryConfig};
use crate::query::criteria::CriteriaTree;
use crate::query::errors::{QueryError, Result};
use crate::query::helper::{AliasTarget, QueryBuilderHelper};
use crate::query::join::{plan_join, JoinDescriptor, JoinType, PIVOT_SUFFIX};
use crate::query::metadata::{pivot_layout, target_metadata, MetadataProvider, ReferenceKind};
use crate::query::normalize::CriteriaNormalizer;
use crate::query::operator::GroupOperator;
use crate::query::predicate::PredicateBuilder;
use crate::query::value::{Value, ValueMap};

/// Statement kind produced by a builder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// `SELECT`.
    #[default]
    Select,
    /// `SELECT COUNT(...)`.
    Count,
    /// `INSERT`.
    Insert,
    /// `UPDATE`.
    Update,
    /// `DELETE`.
    Delete,
    /// Table truncation.
    Truncate,
}

impl QueryKind {
    /// True for statements whose column references carry the table alias.
    pub fn requires_alias(self) -> bool {
        matches!(self, QueryKind::Select | QueryKind::Count)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::Select => "select",
            QueryKind::Count => "count",
            QueryKind::Insert => "insert",
            QueryKind::Update => "update",
            QueryKind::Delete => "delete",
            QueryKind::Truncate => "truncate",
        };
        f.write_str(name)
    }
}

/// Row locking requested for a select.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Version-column check; no SQL clause.
    Optimistic,
    /// Shared row lock.
    PessimisticRead,
    /// Exclusive row lock.
    PessimisticWrite,
}

impl LockMode {
    /// True for modes that take database row locks.
    pub fn is_pessimistic(self) -> bool {
        !matches!(self, LockMode::Optimistic)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockMode::Optimistic => "optimistic",
            LockMode::PessimisticRead => "pessimistic_read",
            LockMode::PessimisticWrite => "pessimistic_write",
        };
        f.write_str(name)
    }
}

/// Sort direction of an `ORDER BY` item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryOrder {
    /// `ASC`.
    Asc,
    /// `DESC`.
    Desc,
    /// `ASC NULLS FIRST`.
    AscNullsFirst,
    /// `ASC NULLS LAST`.
    AscNullsLast,
    /// `DESC NULLS FIRST`.
    DescNullsFirst,
    /// `DESC NULLS LAST`.
    DescNullsLast,
}

impl QueryOrder {
    /// SQL spelling.
    pub fn sql(self) -> &'static str {
        match self {
            QueryOrder::Asc => "ASC",
            QueryOrder::Desc => "DESC",
            QueryOrder::AscNullsFirst => "ASC NULLS FIRST",
            QueryOrder::AscNullsLast => "ASC NULLS LAST",
            QueryOrder::DescNullsFirst => "DESC NULLS FIRST",
            QueryOrder::DescNullsLast => "DESC NULLS LAST",
        }
    }

    /// Parses `asc`, `desc nulls last`, `DESC_NULLS_FIRST`, `1` or `-1`.
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Int(1) => Some(QueryOrder::Asc),
            Value::Int(-1) => Some(QueryOrder::Desc),
            Value::String(text) => {
                let normalized = text.trim().to_ascii_lowercase().replace('_', " ");
                match normalized.as_str() {
                    "asc" => Some(QueryOrder::Asc),
                    "desc" => Some(QueryOrder::Desc),
                    "asc nulls first" => Some(QueryOrder::AscNullsFirst),
                    "asc nulls last" => Some(QueryOrder::AscNullsLast),
                    "desc nulls first" => Some(QueryOrder::DescNullsFirst),
                    "desc nulls last" => Some(QueryOrder::DescNullsLast),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// SQL text with its positional parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    /// Statement text.
    pub sql: String,
    /// Bound values in placeholder order.
    pub params: Vec<Value>,
}

impl CompiledQuery {
    /// Inlines the parameters as SQL literals. Output is for logs and
    /// debugging only and must never be executed.
    pub fn formatted(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 4);
        let mut quote: Option<char> = None;
        let mut next = 0;
        let mut chars = self.sql.chars().peekable();
        while let Some(ch) = chars.next() {
            if let Some(open) = quote {
                out.push(ch);
                if ch == open {
                    quote = None;
                }
                continue;
            }
            match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    out.push(ch);
                }
                '?' => {
                    match self.params.get(next) {
                        Some(value) => out.push_str(&value.to_string()),
                        None => out.push('?'),
                    }
                    next += 1;
                }
                '$' if chars.peek().is_some_and(char::is_ascii_digit) => {
                    let mut digits = String::new();
                    while let Some(digit) = chars.peek().copied().filter(char::is_ascii_digit) {
                        digits.push(digit);
                        chars.next();
                    }
                    let index: usize = digits.parse().unwrap_or(0);
                    match index.checked_sub(1).and_then(|i| self.params.get(i)) {
                        Some(value) => out.push_str(&value.to_string()),
                        None => {
                            out.push('$');
                            out.push_str(&digits);
                        }
                    }
                }
                _ => out.push(ch),
            }
        }
        out
    }
}

/// Shared metadata, dialect, and configuration that builders are created from.
#[derive(Clone)]
pub struct QueryContext {
    metadata: Arc<dyn MetadataProvider>,
    platform: Arc<dyn Platform>,
    config: QueryConfig,
}

impl QueryContext {
    /// Creates a context with the default configuration.
    pub fn new(metadata: Arc<dyn MetadataProvider>, platform: Arc<dyn Platform>) -> Self {
        Self {
            metadata,
            platform,
            config: QueryConfig::default(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts a builder rooted at `entity` with a generated alias.
    pub fn query(&self, entity: &str) -> QueryBuilder {
        QueryBuilder::new(self, entity, None)
    }

    /// Starts a builder rooted at `entity` under an explicit alias.
    pub fn query_as(&self, entity: &str, alias: &str) -> QueryBuilder {
        QueryBuilder::new(self, entity, Some(alias))
    }

    /// Metadata snapshot.
    pub fn metadata(&self) -> &dyn MetadataProvider {
        self.metadata.as_ref()
    }

    /// SQL dialect.
    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Builder configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }
}

/// Fluent builder for a single statement.
///
/// Cloning yields an independent builder; the two share only the immutable
/// metadata and platform.
#[derive(Clone)]
pub struct QueryBuilder {
    entity_name: String,
    alias: String,
    metadata: Arc<dyn MetadataProvider>,
    platform: Arc<dyn Platform>,
    config: QueryConfig,
    kind: QueryKind,
    alias_counter: usize,
    aliases: IndexMap<String, AliasTarget>,
    fields: Vec<String>,
    distinct: bool,
    count_distinct: bool,
    data: Vec<ValueMap>,
    joins: IndexMap<String, JoinDescriptor>,
    cond: ValueMap,
    having: ValueMap,
    order_by: Vec<(String, QueryOrder)>,
    group_by: Vec<String>,
    populate: Vec<String>,
    populate_map: IndexMap<String, String>,
    limit: Option<u64>,
    offset: Option<u64>,
    lock_mode: Option<LockMode>,
    in_transaction: bool,
    finalized: bool,
    error: Option<QueryError>,
}

impl QueryBuilder {
    fn new(ctx: &QueryContext, entity: &str, alias: Option<&str>) -> Self {
        let mut qb = Self {
            entity_name: entity.to_owned(),
            alias: String::new(),
            metadata: Arc::clone(&ctx.metadata),
            platform: Arc::clone(&ctx.platform),
            config: ctx.config.clone(),
            kind: QueryKind::Select,
            alias_counter: 0,
            aliases: IndexMap::new(),
            fields: Vec::new(),
            distinct: false,
            count_distinct: false,
            data: Vec::new(),
            joins: IndexMap::new(),
            cond: ValueMap::new(),
            having: ValueMap::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            populate: Vec::new(),
            populate_map: IndexMap::new(),
            limit: None,
            offset: None,
            lock_mode: None,
            in_transaction: false,
            finalized: false,
            error: None,
        };
        let table = qb.metadata.get(entity).map(|meta| meta.table.clone());
        match table {
            Ok(table) => {
                let alias = match alias {
                    Some(alias) => alias.to_owned(),
                    None => qb.next_alias(&table),
                };
                qb.aliases
                    .insert(alias.clone(), AliasTarget::Entity(entity.to_owned()));
                qb.alias = alias;
            }
            Err(err) => {
                qb.alias = alias.unwrap_or(entity).to_owned();
                qb.error = Some(err);
            }
        }
        qb
    }

    fn attempt<F>(mut self, op: F) -> Self
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.error.is_none() {
            if let Err(err) = op(&mut self) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Selects the given fields. An empty list selects `alias.*`.
    pub fn select<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.attempt(|qb| {
            qb.kind = QueryKind::Select;
            qb.fields = fields;
            Ok(())
        })
    }

    /// Appends fields to the select list.
    pub fn add_select<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.attempt(|qb| {
            qb.fields.extend(fields);
            Ok(())
        })
    }

    /// Marks the select as `DISTINCT`.
    pub fn distinct(self) -> Self {
        self.attempt(|qb| {
            qb.distinct = true;
            Ok(())
        })
    }

    /// Turns the builder into an insert. An array of objects inserts several rows.
    pub fn insert(self, data: impl Into<Value>) -> Self {
        let data = data.into();
        self.attempt(|qb| {
            qb.kind = QueryKind::Insert;
            let rows = match data {
                Value::Array(rows) if rows.is_empty() => {
                    return Err(QueryError::InvalidData {
                        entity: qb.entity_name.clone(),
                        reason: "multi-row insert needs at least one row".to_owned(),
                    })
                }
                Value::Array(rows) => rows,
                row => vec![row],
            };
            let helper = qb.helper();
            let mapped = rows
                .iter()
                .map(|row| helper.map_data(&qb.entity_name, row))
                .collect::<Result<Vec<_>>>()?;
            qb.data = mapped;
            Ok(())
        })
    }

    /// Turns the builder into an update of the given data.
    pub fn update(self, data: impl Into<Value>) -> Self {
        let data = data.into();
        self.attempt(|qb| {
            qb.kind = QueryKind::Update;
            let mapped = qb.helper().map_data(&qb.entity_name, &data)?;
            if mapped.is_empty() {
                return Err(QueryError::InvalidData {
                    entity: qb.entity_name.clone(),
                    reason: "nothing to update".to_owned(),
                });
            }
            qb.data = vec![mapped];
            Ok(())
        })
    }

    /// Turns the builder into a delete.
    pub fn delete(self) -> Self {
        self.attempt(|qb| {
            qb.kind = QueryKind::Delete;
            Ok(())
        })
    }

    /// Turns the builder into a delete restricted by `cond`.
    pub fn delete_where(self, cond: impl Into<Value>) -> Self {
        self.delete().r#where(cond)
    }

    /// Turns the builder into a table truncation.
    pub fn truncate(self) -> Self {
        self.attempt(|qb| {
            qb.kind = QueryKind::Truncate;
            Ok(())
        })
    }

    /// Turns the builder into a row count, over the primary key unless a
    /// field is given.
    pub fn count(self, field: Option<&str>, distinct: bool) -> Self {
        let field = field.map(str::to_owned);
        self.attempt(|qb| {
            qb.kind = QueryKind::Count;
            qb.count_distinct = distinct;
            qb.fields = match field {
                Some(field) => vec![field],
                None => qb
                    .metadata
                    .get(&qb.entity_name)?
                    .require_primary_key()?
                    .into_iter()
                    .map(|column| format!("{}.{column}", qb.alias))
                    .collect(),
            };
            Ok(())
        })
    }

    /// Joins a relation. `field` is `alias.property`, or a property of the
    /// root entity.
    pub fn join(self, field: &str, alias: &str, join_type: JoinType) -> Self {
        self.attempt(|qb| {
            let (owner_alias, prop) = match field.split_once('.') {
                Some((owner, prop)) => (owner.to_owned(), prop.to_owned()),
                None => (qb.alias.clone(), field.to_owned()),
            };
            qb.register_join(&owner_alias, &prop, alias, join_type, None)
        })
    }

    /// `LEFT JOIN` shorthand for [`join`](Self::join).
    pub fn left_join(self, field: &str, alias: &str) -> Self {
        self.join(field, alias, JoinType::Left)
    }

    /// `INNER JOIN` shorthand for [`join`](Self::join).
    pub fn inner_join(self, field: &str, alias: &str) -> Self {
        self.join(field, alias, JoinType::Inner)
    }

    /// Replaces the condition.
    pub fn r#where(self, cond: impl Into<Value>) -> Self {
        self.where_op(cond.into(), None)
    }

    /// Adds a condition joined with `AND`.
    pub fn and_where(self, cond: impl Into<Value>) -> Self {
        self.where_op(cond.into(), Some(GroupOperator::And))
    }

    /// Adds a condition joined with `OR`.
    pub fn or_where(self, cond: impl Into<Value>) -> Self {
        self.where_op(cond.into(), Some(GroupOperator::Or))
    }

    /// Adds the conditions built by `build`, joined with `AND`.
    pub fn where_with<F>(self, build: F) -> Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        let mut pred = PredicateBuilder::new();
        build(&mut pred);
        match pred.finish() {
            Ok(Some(cond)) => self.and_where(cond),
            Ok(None) => self.attempt(|_| {
                Err(QueryError::invalid_condition(
                    "where_with",
                    "requires at least one predicate",
                ))
            }),
            Err(err) => self.attempt(|_| Err(err)),
        }
    }

    fn where_op(self, cond: Value, op: Option<GroupOperator>) -> Self {
        self.attempt(|qb| {
            let processed = qb.process_criteria(cond)?;
            merge_condition(&mut qb.cond, processed, op);
            Ok(())
        })
    }

    /// Orders by a map of field to direction. Relation paths join their
    /// target, so `{ author: { name: "asc" } }` is accepted.
    pub fn order_by(self, orders: impl Into<Value>) -> Self {
        let orders = orders.into();
        self.attempt(|qb| {
            if !matches!(orders, Value::Object(_)) {
                return Err(QueryError::InvalidOrder {
                    field: qb.entity_name.clone(),
                    direction: orders.to_string(),
                });
            }
            let processed = qb.process_criteria(orders)?;
            let mut items = Vec::new();
            flatten_and(processed, &mut items);
            for (field, direction) in items {
                let order = QueryOrder::parse(&direction).ok_or_else(|| QueryError::InvalidOrder {
                    field: field.clone(),
                    direction: direction.to_string(),
                })?;
                qb.order_by.push((field, order));
            }
            Ok(())
        })
    }

    /// Groups by the given fields.
    pub fn group_by<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.attempt(|qb| {
            qb.group_by.extend(fields);
            Ok(())
        })
    }

    /// Sets the `HAVING` condition.
    pub fn having(self, cond: impl Into<Value>) -> Self {
        let cond = cond.into();
        self.attempt(|qb| {
            qb.having = qb.process_criteria(cond)?;
            Ok(())
        })
    }

    /// Relations whose keys should be fetched alongside the root rows.
    pub fn populate<I, S>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        self.attempt(|qb| {
            qb.populate.extend(paths);
            Ok(())
        })
    }

    /// Caps the number of rows.
    pub fn limit(self, limit: u64) -> Self {
        self.attempt(|qb| {
            qb.limit = Some(limit);
            Ok(())
        })
    }

    /// Skips rows.
    pub fn offset(self, offset: u64) -> Self {
        self.attempt(|qb| {
            qb.offset = Some(offset);
            Ok(())
        })
    }

    /// Declares whether the builder runs inside a transaction.
    pub fn transactional(self, in_transaction: bool) -> Self {
        self.attempt(|qb| {
            qb.in_transaction = in_transaction;
            Ok(())
        })
    }

    /// Sets or clears row locking. Pessimistic modes require
    /// [`transactional(true)`](Self::transactional) first.
    pub fn set_lock_mode(self, mode: Option<LockMode>) -> Self {
        self.attempt(|qb| {
            if let Some(mode) = mode.filter(|m| m.is_pessimistic()) {
                if !qb.in_transaction {
                    return Err(QueryError::TransactionRequired {
                        mode: mode.to_string(),
                    });
                }
            }
            qb.lock_mode = mode;
            Ok(())
        })
    }

    /// The first error recorded by a fluent call, if any.
    pub fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    /// Statement kind.
    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Root alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Root entity name.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Registered joins in registration order.
    pub fn joins(&self) -> impl Iterator<Item = &JoinDescriptor> {
        self.joins.values()
    }

    /// Renders the SQL text.
    pub fn get_query(&mut self) -> Result<String> {
        self.compile().map(|compiled| compiled.sql)
    }

    /// Renders the parameters, in placeholder order.
    pub fn get_params(&mut self) -> Result<Vec<Value>> {
        self.compile().map(|compiled| compiled.params)
    }

    /// Renders the SQL with parameters inlined, for debugging.
    pub fn get_formatted_query(&mut self) -> Result<String> {
        self.compile().map(|compiled| compiled.formatted())
    }

    /// Finalizes the builder on first use and renders SQL plus parameters.
    pub fn compile(&mut self) -> Result<CompiledQuery> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if let Err(err) = self.finalize() {
            self.error = Some(err.clone());
            return Err(err);
        }
        self.render()
    }

    /// Compiles and runs the statement. With `map_results`, selected rows are
    /// renamed from columns back to property names.
    pub fn execute(
        &mut self,
        conn: &dyn Connection,
        method: ExecMethod,
        map_results: bool,
    ) -> Result<QueryOutput> {
        let compiled = self.compile()?;
        debug!(
            sql = %compiled.sql,
            params = compiled.params.len(),
            ?method,
            "executing query"
        );
        let output = conn.execute(&compiled.sql, &compiled.params, method)?;
        if map_results && self.kind == QueryKind::Select {
            let helper = self.helper();
            return Ok(output.map_rows(|row| helper.map_result(row)));
        }
        Ok(output)
    }

    pub(crate) fn metadata(&self) -> &dyn MetadataProvider {
        self.metadata.as_ref()
    }

    pub(crate) fn alias_for_join_path(&self, path: &str) -> Option<String> {
        self.joins.get(path).map(|join| join.alias.clone())
    }

    /// Allocates a fresh alias. The counter advances on every call, so
    /// aliases are never reused within a builder.
    pub(crate) fn next_alias(&mut self, table: &str) -> String {
        loop {
            let index = self.alias_counter;
            self.alias_counter += 1;
            let candidate = match self.config.alias_strategy {
                AliasStrategy::Sequential => format!("{}{index}", self.config.alias_prefix),
                AliasStrategy::TableName if !self.aliases.contains_key(table) => table.to_owned(),
                AliasStrategy::TableName => format!("{table}{index}"),
            };
            if !self.aliases.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Registers the join for `owner_alias.prop_name` under `alias`.
    /// Registering the same path twice with the same alias is a no-op.
    pub(crate) fn register_join(
        &mut self,
        owner_alias: &str,
        prop_name: &str,
        alias: &str,
        join_type: JoinType,
        path: Option<String>,
    ) -> Result<()> {
        let metadata = Arc::clone(&self.metadata);
        let owner_entity = match self.aliases.get(owner_alias) {
            Some(AliasTarget::Entity(entity)) => entity.clone(),
            _ => {
                return Err(QueryError::UnknownAlias {
                    alias: owner_alias.to_owned(),
                    field: format!("{owner_alias}.{prop_name}"),
                })
            }
        };
        let owner = metadata.get(&owner_entity)?;
        let prop = owner
            .properties
            .get(prop_name)
            .ok_or_else(|| QueryError::UnknownProperty {
                entity: owner.name.clone(),
                key: prop_name.to_owned(),
            })?;
        let path = match path {
            Some(path) => path,
            None => format!("{}.{prop_name}", self.path_for_alias(owner_alias)?),
        };
        if let Some(existing) = self.joins.get(&path) {
            if existing.alias == alias {
                return Ok(());
            }
            return Err(QueryError::DuplicateJoin {
                path,
                existing: existing.alias.clone(),
            });
        }
        if self.aliases.contains_key(alias) {
            return Err(QueryError::invalid_condition(
                path,
                format!("alias '{alias}' is already bound"),
            ));
        }

        let pivot_alias = if prop.kind == ReferenceKind::ManyToMany {
            let pivot_path = format!("{path}{PIVOT_SUFFIX}");
            Some(match self.alias_for_join_path(&pivot_path) {
                Some(existing) => existing,
                None => {
                    let table = pivot_layout(metadata.as_ref(), owner, prop)?.table;
                    self.next_alias(&table)
                }
            })
        } else {
            None
        };

        let plan = plan_join(
            metadata.as_ref(),
            owner,
            prop,
            owner_alias,
            alias,
            pivot_alias.as_deref(),
            join_type,
            &path,
        )?;
        for hop in plan.hops {
            let target = if hop.path.ends_with(PIVOT_SUFFIX) {
                AliasTarget::Pivot(hop.table.clone())
            } else {
                AliasTarget::Entity(plan.target_entity.clone())
            };
            debug!(
                path = %hop.path,
                alias = %hop.alias,
                owner = %hop.owner_alias,
                join = %hop.join_type,
                table = %hop.table,
                "registered join"
            );
            self.aliases.insert(hop.alias.clone(), target);
            self.joins.insert(hop.path.clone(), hop);
        }
        Ok(())
    }

    fn path_for_alias(&self, alias: &str) -> Result<String> {
        if alias == self.alias {
            return Ok(self.entity_name.clone());
        }
        self.joins
            .values()
            .find(|join| join.alias == alias && !join.path.ends_with(PIVOT_SUFFIX))
            .map(|join| join.path.clone())
            .ok_or_else(|| QueryError::UnknownAlias {
                alias: alias.to_owned(),
                field: alias.to_owned(),
            })
    }

    pub(crate) fn helper(&self) -> QueryBuilderHelper<'_> {
        QueryBuilderHelper {
            entity_name: &self.entity_name,
            alias: &self.alias,
            aliases: &self.aliases,
            metadata: self.metadata.as_ref(),
            platform: self.platform.as_ref(),
            elide_empty_nin: self.config.elide_empty_nin,
        }
    }

    fn process_criteria(&mut self, criteria: Value) -> Result<ValueMap> {
        let metadata = Arc::clone(&self.metadata);
        let normalized =
            CriteriaNormalizer::new(metadata.as_ref()).normalize(&self.entity_name, criteria)?;
        let tree = CriteriaTree::build(
            metadata.as_ref(),
            &self.entity_name,
            normalized,
            self.config.max_criteria_depth,
        )?;
        trace!(entity = %self.entity_name, nodes = tree.len(), "built criteria tree");
        tree.process(self)
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if self.kind == QueryKind::Select {
            let metadata = Arc::clone(&self.metadata);
            let root = metadata.get(&self.entity_name)?;
            let root_alias = self.alias.clone();
            for field in mem::take(&mut self.populate) {
                let head = field.split('.').next().unwrap_or_default();
                let prop = root
                    .properties
                    .get(head)
                    .ok_or_else(|| QueryError::UnknownProperty {
                        entity: root.name.clone(),
                        key: head.to_owned(),
                    })?;
                let path = format!("{}.{}", self.entity_name, prop.name);
                let keyed = match prop.kind {
                    ReferenceKind::OneToOne if !prop.owner => path.clone(),
                    ReferenceKind::ManyToMany => format!("{path}{PIVOT_SUFFIX}"),
                    _ => {
                        trace!(populate = %field, kind = ?prop.kind, "left to hydration");
                        continue;
                    }
                };
                if self.alias_for_join_path(&path).is_none() {
                    let table = target_metadata(metadata.as_ref(), prop)?.table.clone();
                    let alias = self.next_alias(&table);
                    self.register_join(
                        &root_alias,
                        &prop.name,
                        &alias,
                        JoinType::Left,
                        Some(path),
                    )?;
                }
                if let Some(alias) = self.alias_for_join_path(&keyed) {
                    self.populate_map.insert(keyed, alias);
                }
            }
        }
        self.finalized = true;
        debug!(
            entity = %self.entity_name,
            kind = %self.kind,
            joins = self.joins.len(),
            "finalized query"
        );
        Ok(())
    }

    fn render(&self) -> Result<CompiledQuery> {
        let mut params = Vec::new();
        let sql = match self.kind {
            QueryKind::Select | QueryKind::Count => self.render_select(&mut params)?,
            QueryKind::Insert => self.render_insert(&mut params)?,
            QueryKind::Update => self.render_update(&mut params)?,
            QueryKind::Delete => self.render_delete(&mut params)?,
            QueryKind::Truncate => {
                let table = &self.metadata.get(&self.entity_name)?.table;
                self.platform.truncate_sql(table)
            }
        };
        Ok(CompiledQuery { sql, params })
    }

    fn render_select(&self, params: &mut Vec<Value>) -> Result<String> {
        let helper = self.helper();
        let root = self.metadata.get(&self.entity_name)?;
        let kind = self.kind;
        let mut sql = String::from("SELECT ");

        if kind == QueryKind::Count {
            let columns = self
                .fields
                .iter()
                .map(|field| helper.mapper(field, kind))
                .collect::<Result<Vec<_>>>()?;
            let argument = match columns.as_slice() {
                [column] if self.count_distinct => format!("DISTINCT {column}"),
                [column] => column.clone(),
                _ if self.count_distinct => format!(
                    "DISTINCT {}",
                    self.platform.count_distinct_columns_sql(&columns)
                ),
                _ => "*".to_owned(),
            };
            sql.push_str(&format!("COUNT({argument}) AS {}", helper.quote("count")));
        } else {
            if self.distinct {
                sql.push_str("DISTINCT ");
            }
            let star = [String::from("*")];
            let fields = if self.fields.is_empty() {
                &star[..]
            } else {
                &self.fields[..]
            };
            let mut columns: IndexSet<String> = IndexSet::new();
            for field in fields {
                columns.insert(helper.mapper_select(field, kind)?);
                if field == "*" || *field == format!("{}.*", self.alias) {
                    for prop in root.properties.values() {
                        let read_converted = prop
                            .conversion
                            .as_ref()
                            .is_some_and(|c| c.from_db.is_some());
                        if prop.formula.is_some() || read_converted {
                            columns.insert(helper.mapper_select(&prop.name, kind)?);
                        }
                    }
                }
            }
            for path in self.populate_map.keys() {
                if let Some(join) = self.joins.get(path) {
                    columns.extend(helper.map_join_columns(join));
                }
            }
            sql.push_str(&columns.into_iter().collect::<Vec<_>>().join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&helper.table_with_alias(&root.table, &self.alias));
        for join in self.joins.values() {
            sql.push(' ');
            sql.push_str(&helper.join_clause(join));
        }
        self.push_condition(&mut sql, " WHERE ", &self.cond, kind, params)?;
        if !self.group_by.is_empty() {
            let fields = self
                .group_by
                .iter()
                .map(|field| helper.mapper(field, kind))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&fields.join(", "));
        }
        self.push_condition(&mut sql, " HAVING ", &self.having, kind, params)?;
        if kind == QueryKind::Count {
            return Ok(sql);
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&helper.order_items(&self.order_by, kind)?.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), _) => {
                let placeholder = helper.value_replacement(&Value::Int(clamp(limit)), None, params);
                sql.push_str(&format!(" LIMIT {placeholder}"));
            }
            (None, Some(_)) => {
                if let Some(literal) = self.platform.offset_without_limit() {
                    sql.push_str(&format!(" LIMIT {literal}"));
                }
            }
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            let placeholder = helper.value_replacement(&Value::Int(clamp(offset)), None, params);
            sql.push_str(&format!(" OFFSET {placeholder}"));
        }

        let lock_sql = match self.lock_mode {
            Some(LockMode::Optimistic) => {
                if root.version_property().is_none() {
                    return Err(QueryError::OptimisticLockUnsupported {
                        entity: root.name.clone(),
                    });
                }
                ""
            }
            Some(LockMode::PessimisticRead) => self.platform.read_lock_sql(),
            Some(LockMode::PessimisticWrite) => self.platform.write_lock_sql(),
            None => "",
        };
        if !lock_sql.is_empty() {
            sql.push(' ');
            sql.push_str(lock_sql);
        }
        Ok(sql)
    }

    fn render_insert(&self, params: &mut Vec<Value>) -> Result<String> {
        let helper = self.helper();
        let root = self.metadata.get(&self.entity_name)?;
        let mut sql = format!("INSERT INTO {}", helper.quote(&root.table));
        let columns: IndexSet<&String> = self.data.iter().flat_map(|row| row.keys()).collect();

        if columns.is_empty() {
            sql.push(' ');
            sql.push_str(self.platform.empty_insert_sql());
        } else {
            let missing = if self.platform.uses_default_keyword() {
                "DEFAULT"
            } else {
                "NULL"
            };
            let names: Vec<String> = columns.iter().map(|c| helper.quote(c)).collect();
            let rows: Vec<String> = self
                .data
                .iter()
                .map(|row| {
                    let values: Vec<String> = columns
                        .iter()
                        .map(|column| match row.get(*column) {
                            Some(value) => helper.value_replacement(
                                value,
                                helper.column_to_db(column).as_deref(),
                                params,
                            ),
                            None => missing.to_owned(),
                        })
                        .collect();
                    format!("({})", values.join(", "))
                })
                .collect();
            sql.push_str(&format!(" ({}) VALUES {}", names.join(", "), rows.join(", ")));
        }

        if self.platform.uses_returning_statement() {
            let returning: Vec<String> = root
                .primary_key_columns()
                .iter()
                .map(|c| helper.quote(c))
                .collect();
            if !returning.is_empty() {
                sql.push_str(" RETURNING ");
                sql.push_str(&returning.join(", "));
            }
        }
        Ok(sql)
    }

    fn render_update(&self, params: &mut Vec<Value>) -> Result<String> {
        let helper = self.helper();
        let root = self.metadata.get(&self.entity_name)?;
        let row = self.data.first().ok_or_else(|| QueryError::InvalidData {
            entity: self.entity_name.clone(),
            reason: "nothing to update".to_owned(),
        })?;
        let assignments: Vec<String> = row
            .iter()
            .map(|(column, value)| {
                let to_db = helper.column_to_db(column);
                format!(
                    "{} = {}",
                    helper.quote(column),
                    helper.value_replacement(value, to_db.as_deref(), params)
                )
            })
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            helper.quote(&root.table),
            assignments.join(", ")
        );
        self.push_mutation_condition(&mut sql, params)?;
        Ok(sql)
    }

    fn render_delete(&self, params: &mut Vec<Value>) -> Result<String> {
        let helper = self.helper();
        let root = self.metadata.get(&self.entity_name)?;
        let mut sql = format!("DELETE FROM {}", helper.quote(&root.table));
        self.push_mutation_condition(&mut sql, params)?;
        Ok(sql)
    }

    /// `WHERE` of an update or delete. Conditions that needed joins are moved
    /// into a primary key sub-select, since neither statement can join.
    fn push_mutation_condition(&self, sql: &mut String, params: &mut Vec<Value>) -> Result<()> {
        if self.joins.is_empty() {
            return self.push_condition(sql, " WHERE ", &self.cond, self.kind, params);
        }
        let helper = self.helper();
        let root = self.metadata.get(&self.entity_name)?;
        let pks = root.require_primary_key()?;
        let selected: Vec<String> = pks
            .iter()
            .map(|pk| helper.quote(&format!("{}.{pk}", self.alias)))
            .collect();
        let selected = selected.join(", ");

        let mut inner = format!(
            "SELECT {selected} FROM {}",
            helper.table_with_alias(&root.table, &self.alias)
        );
        for join in self.joins.values() {
            inner.push(' ');
            inner.push_str(&helper.join_clause(join));
        }
        self.push_condition(&mut inner, " WHERE ", &self.cond, QueryKind::Select, params)?;

        let target = match pks.as_slice() {
            [pk] => helper.quote(pk),
            _ => format!(
                "({})",
                pks.iter().map(|pk| helper.quote(pk)).collect::<Vec<_>>().join(", ")
            ),
        };
        debug!(
            entity = %self.entity_name,
            joins = self.joins.len(),
            "wrapping joined mutation condition in a primary key sub-select"
        );
        sql.push_str(&format!(
            " WHERE {target} IN (SELECT {selected} FROM ({inner}) AS {})",
            helper.quote(&self.alias)
        ));
        Ok(())
    }

    fn push_condition(
        &self,
        sql: &mut String,
        keyword: &str,
        cond: &ValueMap,
        kind: QueryKind,
        params: &mut Vec<Value>,
    ) -> Result<()> {
        if cond.is_empty() {
            return Ok(());
        }
        let rendered = self.helper().append_query_condition(kind, cond, params)?;
        if !rendered.is_empty() {
            sql.push_str(keyword);
            sql.push_str(&rendered);
        }
        Ok(())
    }
}

/// First call replaces; later calls append to a matching top-level group or
/// wrap the existing condition and the new one under `op`.
fn merge_condition(current: &mut ValueMap, cond: ValueMap, op: Option<GroupOperator>) {
    let Some(op) = op else {
        *current = cond;
        return;
    };
    if cond.is_empty() {
        return;
    }
    if current.is_empty() {
        *current = cond;
        return;
    }
    let key = op.key();
    if current.len() == 1 {
        if let Some(Value::Array(items)) = current.get_mut(key) {
            items.push(Value::Object(cond));
            return;
        }
    }
    let previous = mem::take(current);
    current.insert(
        key.to_owned(),
        Value::Array(vec![Value::Object(previous), Value::Object(cond)]),
    );
}

fn flatten_and(map: ValueMap, out: &mut Vec<(String, Value)>) {
    for (key, value) in map {
        match (GroupOperator::parse(&key), value) {
            (Some(GroupOperator::And), Value::Array(items)) => {
                for item in items {
                    if let Value::Object(inner) = item {
                        flatten_and(inner, out);
                    }
                }
            }
            (_, value) => out.push((key, value)),
        }
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
