//! Closed operator vocabulary understood by criteria objects.
use std::fmt;

/// Key carrying regular expression flags next to `$re`.
pub const FLAGS_KEY: &str = "$flags";

/// Separator used when several columns are folded into a single condition key.
pub const PK_SEPARATOR: &str = "~~~";

/// Logical operators that combine nested conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupOperator {
    /// Every sub-condition must hold.
    And,
    /// At least one sub-condition must hold.
    Or,
    /// Negates the nested condition.
    Not,
}

impl GroupOperator {
    /// Parses a `$`-prefixed key.
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "$and" => Some(GroupOperator::And),
            "$or" => Some(GroupOperator::Or),
            "$not" => Some(GroupOperator::Not),
            _ => None,
        }
    }

    /// Criteria key for the operator.
    pub fn key(self) -> &'static str {
        match self {
            GroupOperator::And => "$and",
            GroupOperator::Or => "$or",
            GroupOperator::Not => "$not",
        }
    }

    /// SQL connective used between sub-conditions.
    pub fn connective(self) -> &'static str {
        match self {
            GroupOperator::And | GroupOperator::Not => " AND ",
            GroupOperator::Or => " OR ",
        }
    }
}

/// Comparison operators applied to a single field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `IN (...)`
    In,
    /// `NOT IN (...)`
    Nin,
    /// `LIKE`
    Like,
    /// Case-insensitive `LIKE` where the platform offers one.
    Ilike,
    /// Regular expression match.
    Re,
    /// `IS NOT NULL` for `true`, `IS NULL` for `false`.
    Exists,
}

impl Operator {
    /// Every comparison operator, in declaration order.
    pub const ALL: [Operator; 12] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Like,
        Operator::Ilike,
        Operator::Re,
        Operator::Exists,
    ];

    /// Parses a `$`-prefixed key.
    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == key)
    }

    /// Parses the bare operator name used by `field:op` shorthand.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| &op.key()[1..] == name)
    }

    /// Criteria key for the operator.
    pub fn key(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Like => "$like",
            Operator::Ilike => "$ilike",
            Operator::Re => "$re",
            Operator::Exists => "$exists",
        }
    }

    /// SQL token for operators with a fixed spelling. Platform-specific
    /// operators (`$ilike`, `$re`) and null checks resolve elsewhere.
    pub fn sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "IN",
            Operator::Nin => "NOT IN",
            Operator::Like | Operator::Ilike => "LIKE",
            Operator::Re => "REGEXP",
            Operator::Exists => "IS NOT NULL",
        }
    }

    /// Maps a trailing shorthand symbol (`age >`) to its operator.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Gte),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Lte),
            "!=" | "!" => Some(Operator::Ne),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// True for comparison operator keys and `$flags`.
pub fn is_comparison_key(key: &str) -> bool {
    key == FLAGS_KEY || Operator::parse(key).is_some()
}

/// True for any recognised `$` key.
pub fn is_operator(key: &str) -> bool {
    is_comparison_key(key) || GroupOperator::parse(key).is_some()
}

/// True for keys that start with `$`, recognised or not.
pub fn is_dollar_key(key: &str) -> bool {
    key.starts_with('$')
}
