//! Criteria normalization and parameterized SQL generation.
//!
//! `ormql` turns nested criteria such as
//! `{ "books": { "author": 123 }, "name:like": "A%" }` into SQL plus an
//! ordered parameter list, resolving relationship paths into joins through
//! entity metadata. Dialect rules come from a [`platform::Platform`];
//! execution is delegated to a [`connection::Connection`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use ormql::platform::SqlitePlatform;
//! use ormql::query::{EntityMetadata, EntityProperty, InMemoryMetadata, QueryContext};
//!
//! let metadata = InMemoryMetadata::new().with_entity(
//!     EntityMetadata::new("Publisher", "publisher")
//!         .with_primary_key("id")
//!         .with_property(EntityProperty::scalar("name")),
//! );
//! let ctx = QueryContext::new(Arc::new(metadata), Arc::new(SqlitePlatform));
//! let mut qb = ctx
//!     .query("Publisher")
//!     .r#where(serde_json::json!({ "name:like": "A%" }))
//!     .limit(10);
//! let sql = qb.get_query()?;
//! # Ok::<(), ormql::query::QueryError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod platform;
pub mod query;

pub use connection::{Connection, ExecMethod, QueryOutput, SqliteConnection};
pub use platform::{GenericPlatform, Platform};
pub use query::{QueryBuilder, QueryContext, QueryError, Value};
