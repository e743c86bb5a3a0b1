#![allow(missing_docs)]

use std::sync::Arc;

use thiserror::Error;

/// Convenience alias for results produced by the query compiler.
pub type Result<T, E = QueryError> = std::result::Result<T, E>;

/// Structured errors emitted while normalizing criteria, building the
/// criteria tree, emitting SQL, or executing it.
///
/// Each variant carries a stable [`code`](QueryError::code) so callers can
/// branch on the failure class without matching message text.
#[derive(Clone, Debug, Error)]
pub enum QueryError {
    /// Entity name is absent from the metadata snapshot.
    #[error("entity '{entity}' is not registered")]
    UnknownEntity { entity: String },
    /// Criteria key is neither an operator, a custom expression, nor a property.
    #[error("trying to query by not existing property {entity}.{key}")]
    UnknownProperty { entity: String, key: String },
    /// `$`-prefixed key outside the operator vocabulary.
    #[error("unknown operator '{operator}'")]
    UnknownOperator { operator: String },
    /// Condition shape cannot be rendered.
    #[error("invalid query condition for '{key}': {reason}")]
    InvalidCondition { key: String, reason: String },
    /// Criteria nest deeper than the configured limit.
    #[error("criteria exceed the maximum nesting depth of {max}")]
    CriteriaTooDeep { max: usize },
    /// Field reference names an alias the builder never registered.
    #[error("unknown alias '{alias}' referenced by '{field}'")]
    UnknownAlias { alias: String, field: String },
    /// Join requested on a property that is not a relationship.
    #[error("property {entity}.{property} is not a relation")]
    NotARelation { entity: String, property: String },
    /// Join path is already bound to a different alias.
    #[error("join path '{path}' is already bound to alias '{existing}'")]
    DuplicateJoin { path: String, existing: String },
    /// Data payload references a property that has no backing column.
    #[error("property {entity}.{property} cannot be persisted")]
    NotPersistable { entity: String, property: String },
    /// Data payload has the wrong shape.
    #[error("invalid data for {entity}: {reason}")]
    InvalidData { entity: String, reason: String },
    /// Order direction is not recognised.
    #[error("invalid order direction for '{field}': {direction}")]
    InvalidOrder { field: String, direction: String },
    /// Regex cannot be reduced to `LIKE` and the platform has no regex operator.
    #[error("platform '{platform}' cannot evaluate regular expression '{pattern}'")]
    UnsupportedRegex { platform: String, pattern: String },
    /// Pessimistic locks only make sense inside a transaction.
    #[error("lock mode {mode} requires an active transaction")]
    TransactionRequired { mode: String },
    /// Optimistic locks need a version property.
    #[error("cannot obtain optimistic lock on unversioned entity {entity}")]
    OptimisticLockUnsupported { entity: String },
    /// Entity declares no primary key.
    #[error("entity {entity} has no primary key")]
    MissingPrimaryKey { entity: String },
    /// Failure reported by the database driver.
    #[error(transparent)]
    Driver(Arc<rusqlite::Error>),
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Driver(Arc::new(err))
    }
}

impl QueryError {
    /// Returns the stable error code associated with this error.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::UnknownEntity { .. } => "UnknownEntity",
            QueryError::UnknownProperty { .. } => "UnknownProperty",
            QueryError::UnknownOperator { .. } => "UnknownOperator",
            QueryError::InvalidCondition { .. } => "InvalidCondition",
            QueryError::CriteriaTooDeep { .. } => "CriteriaTooDeep",
            QueryError::UnknownAlias { .. } => "UnknownAlias",
            QueryError::NotARelation { .. } => "NotARelation",
            QueryError::DuplicateJoin { .. } => "DuplicateJoin",
            QueryError::NotPersistable { .. } => "NotPersistable",
            QueryError::InvalidData { .. } => "InvalidData",
            QueryError::InvalidOrder { .. } => "InvalidOrder",
            QueryError::UnsupportedRegex { .. } => "UnsupportedRegex",
            QueryError::TransactionRequired { .. } => "TransactionRequired",
            QueryError::OptimisticLockUnsupported { .. } => "OptimisticLockUnsupported",
            QueryError::MissingPrimaryKey { .. } => "MissingPrimaryKey",
            QueryError::Driver(_) => "Driver",
        }
    }

    pub(crate) fn invalid_condition(key: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::InvalidCondition {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Wrapper that ensures errors carry a stable string code.
#[derive(Debug, Error)]
#[error("{code}: {source}")]
pub struct QueryErrorWithCode {
    pub code: &'static str,
    #[source]
    pub source: QueryError,
}

impl From<QueryError> for QueryErrorWithCode {
    fn from(source: QueryError) -> Self {
        Self {
            code: source.code(),
            source,
        }
    }
}
