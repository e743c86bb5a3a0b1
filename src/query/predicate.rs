//! Closure-driven predicate builder producing criteria values.

use std::mem;

use crate::query::errors::{QueryError, Result};
use crate::query::operator::{GroupOperator, Operator};
use crate::query::value::{RegexPattern, Value};

#[derive(Clone, Copy, Debug)]
enum PredicateMode {
    And,
    Or,
}

/// Builder used by [`QueryBuilder::where_with`](crate::query::QueryBuilder::where_with)
/// to assemble criteria without spelling out operator objects by hand.
///
/// Every method appends one condition; the collected conditions are joined
/// with `$and` (or `$or` inside [`or_group`](Self::or_group)).
pub struct PredicateBuilder {
    mode: PredicateMode,
    exprs: Vec<Value>,
    error: Option<QueryError>,
}

impl Default for PredicateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PredicateBuilder {
    pub(crate) fn new() -> Self {
        Self::with_mode(PredicateMode::And)
    }

    fn with_mode(mode: PredicateMode) -> Self {
        Self {
            mode,
            exprs: Vec::new(),
            error: None,
        }
    }

    fn push_expr(&mut self, expr: Value) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        self.exprs.push(expr);
        self
    }

    fn push_op<P, V>(&mut self, prop: P, op: Operator, value: V) -> &mut Self
    where
        P: Into<String>,
        V: Into<Value>,
    {
        let condition = Value::object([(op.key().to_owned(), value.into())]);
        self.push_expr(Value::object([(prop.into(), condition)]))
    }

    fn record_error(&mut self, err: QueryError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Consumes the builder. `Ok(None)` when nothing was added.
    pub(crate) fn finish(self) -> Result<Option<Value>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut exprs = self.exprs;
        Ok(match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => {
                let op = match self.mode {
                    PredicateMode::And => GroupOperator::And,
                    PredicateMode::Or => GroupOperator::Or,
                };
                Some(Value::object([(op.key().to_owned(), Value::Array(exprs))]))
            }
        })
    }

    fn build_group_expr<F>(mode: PredicateMode, build: F) -> Result<Value>
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        let mut nested = PredicateBuilder::with_mode(mode);
        build(&mut nested);
        nested.finish()?.ok_or_else(|| {
            QueryError::invalid_condition(
                "group",
                "predicate group must emit at least one predicate",
            )
        })
    }

    fn push_group<F>(&mut self, mode: PredicateMode, negate: bool, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        match PredicateBuilder::build_group_expr(mode, build) {
            Ok(expr) if negate => {
                self.push_expr(Value::object([(GroupOperator::Not.key().to_owned(), expr)]))
            }
            Ok(expr) => self.push_expr(expr),
            Err(err) => {
                self.record_error(err);
                self
            }
        }
    }

    /// Adds an equality predicate comparing the property to a literal.
    pub fn eq<P, V>(&mut self, prop: P, value: V) -> &mut Self
    where
        P: Into<String>,
        V: Into<Value>,
    {
        self.push_op(prop, Operator::Eq, value)
    }

    /// Adds an inequality predicate.
    pub fn ne<P, V>(&mut self, prop: P, value: V) -> &mut Self
    where
        P: Into<String>,
        V: Into<Value>,
    {
        self.push_op(prop, Operator::Ne, value)
    }

    /// Adds a strict less-than predicate.
    pub fn lt<P, V>(&mut self, prop: P, value: V) -> &mut Self
    where
        P: Into<String>,
        V: Into<Value>,
    {
        self.push_op(prop, Operator::Lt, value)
    }

    /// Adds a less-than-or-equal predicate.
    pub fn le<P, V>(&mut self, prop: P, value: V) -> &mut Self
    where
        P: Into<String>,
        V: Into<Value>,
    {
        self.push_op(prop, Operator::Lte, value)
    }

    /// Adds a strict greater-than predicate.
    pub fn gt<P, V>(&mut self, prop: P, value: V) -> &mut Self
    where
        P: Into<String>,
        V: Into<Value>,
    {
        self.push_op(prop, Operator::Gt, value)
    }

    /// Adds a greater-than-or-equal predicate.
    pub fn ge<P, V>(&mut self, prop: P, value: V) -> &mut Self
    where
        P: Into<String>,
        V: Into<Value>,
    {
        self.push_op(prop, Operator::Gte, value)
    }

    /// Adds an inclusive between predicate.
    pub fn between<P, L, H>(&mut self, prop: P, low: L, high: H) -> &mut Self
    where
        P: Into<String>,
        L: Into<Value>,
        H: Into<Value>,
    {
        let condition = Value::object([
            (Operator::Gte.key().to_owned(), low.into()),
            (Operator::Lte.key().to_owned(), high.into()),
        ]);
        self.push_expr(Value::object([(prop.into(), condition)]))
    }

    /// Adds an `IN` predicate over a homogeneous literal set. An empty set
    /// matches nothing.
    pub fn in_list<P, I, V>(&mut self, prop: P, values: I) -> &mut Self
    where
        P: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        if self.error.is_some() {
            return self;
        }
        let prop = prop.into();
        let collected: Vec<Value> = values.into_iter().map(Into::into).collect();
        if let Some(first) = collected.first() {
            let first_tag = mem::discriminant(first);
            if !collected.iter().all(|value| mem::discriminant(value) == first_tag) {
                self.record_error(QueryError::invalid_condition(
                    prop,
                    "in_list requires all values to share the same type",
                ));
                return self;
            }
        }
        self.push_op(prop, Operator::In, Value::Array(collected))
    }

    /// Adds a `LIKE` predicate.
    pub fn like<P, V>(&mut self, prop: P, pattern: V) -> &mut Self
    where
        P: Into<String>,
        V: Into<Value>,
    {
        self.push_op(prop, Operator::Like, pattern)
    }

    /// Adds a case-insensitive `LIKE` predicate.
    pub fn ilike<P, V>(&mut self, prop: P, pattern: V) -> &mut Self
    where
        P: Into<String>,
        V: Into<Value>,
    {
        self.push_op(prop, Operator::Ilike, pattern)
    }

    /// Matches the property against a regular expression. Simple patterns
    /// are rewritten to `LIKE`.
    pub fn matches<P>(&mut self, prop: P, pattern: RegexPattern) -> &mut Self
    where
        P: Into<String>,
    {
        self.push_expr(Value::object([(prop.into(), Value::Regex(pattern))]))
    }

    /// Asserts that the column holds a value.
    pub fn exists<P>(&mut self, prop: P) -> &mut Self
    where
        P: Into<String>,
    {
        self.push_op(prop, Operator::Exists, true)
    }

    /// Tests whether the property is null.
    pub fn is_null<P>(&mut self, prop: P) -> &mut Self
    where
        P: Into<String>,
    {
        self.push_expr(Value::object([(prop.into(), Value::Null)]))
    }

    /// Tests whether the property is not null.
    pub fn is_not_null<P>(&mut self, prop: P) -> &mut Self
    where
        P: Into<String>,
    {
        self.push_op(prop, Operator::Ne, Value::Null)
    }

    /// Adds a custom SQL expression; each `?` binds the next value.
    pub fn raw<E, I, V>(&mut self, expr: E, values: I) -> &mut Self
    where
        E: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_expr(Value::object([(expr.into(), Value::Array(values))]))
    }

    /// Nests a group of predicates combined with logical AND.
    pub fn and_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        self.push_group(PredicateMode::And, false, build)
    }

    /// Nests a group of predicates combined with logical OR.
    pub fn or_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        self.push_group(PredicateMode::Or, false, build)
    }

    /// Nests a group of predicates and negates the result.
    pub fn not_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        self.push_group(PredicateMode::And, true, build)
    }
}
