#![forbid(unsafe_code)]

//! Criteria compilation.
//!
//! Raw criteria are normalized, parsed into a criteria tree bound to entity
//! metadata, processed against a [`QueryBuilder`] (which registers the joins
//! they imply), and finally rendered to SQL by the emission helper.

/// Fluent query builder.
///
/// Owns aliases, joins, and conditions for one statement and renders SQL
/// with its parameter list.
pub mod builder;

/// Builder tunables and their TOML loader.
pub mod config;

/// Arena-backed criteria tree.
///
/// Resolves every criteria key against metadata and decides which relation
/// paths need joins.
pub mod criteria;

/// Structured errors with stable codes.
pub mod errors;

/// SQL emission helper.
pub mod helper;

/// Join descriptors and join planning per relationship kind.
pub mod join;

/// Entity metadata and the provider trait.
pub mod metadata;

/// Shorthand expansion and entity unwrapping.
pub mod normalize;

/// Closed operator vocabulary.
pub mod operator;

/// Closure-driven predicate builder.
pub mod predicate;

/// Value model shared by criteria, payloads, and rows.
pub mod value;

pub use builder::{CompiledQuery, LockMode, QueryBuilder, QueryContext, QueryKind, QueryOrder};
pub use config::{AliasStrategy, ConfigError, QueryConfig};
pub use errors::{QueryError, QueryErrorWithCode, Result};
pub use join::{JoinDescriptor, JoinType};
pub use metadata::{
    EntityMetadata, EntityProperty, InMemoryMetadata, MetadataProvider, ReferenceKind,
};
pub use predicate::PredicateBuilder;
pub use value::{EntityRef, RegexPattern, Value, ValueMap};
