//! Database connection collaborators.
//!
//! The compiler never opens connections itself. [`QueryBuilder::execute`]
//! hands finished SQL and parameters to a [`Connection`].
//!
//! [`QueryBuilder::execute`]: crate::query::QueryBuilder::execute

use indexmap::IndexMap;

use crate::query::errors::Result;
use crate::query::value::Value;

mod sqlite;

pub use sqlite::SqliteConnection;

/// Result row keyed by column name, in select-list order.
pub type Row = IndexMap<String, Value>;

/// How a statement's result is consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMethod {
    /// Every row.
    All,
    /// The first row, if any.
    Get,
    /// No rows; report affected count and generated key.
    Run,
}

/// Outcome of [`Connection::execute`], shaped by the [`ExecMethod`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutput {
    /// Rows from [`ExecMethod::All`].
    Rows(Vec<Row>),
    /// Row from [`ExecMethod::Get`].
    Row(Option<Row>),
    /// Summary from [`ExecMethod::Run`].
    Run {
        /// Rows changed by the statement.
        affected_rows: u64,
        /// Last generated row id, when the driver reports one.
        insert_id: Option<i64>,
    },
}

impl QueryOutput {
    /// Applies `f` to every row; run summaries pass through untouched.
    pub fn map_rows<F>(self, mut f: F) -> Self
    where
        F: FnMut(Row) -> Row,
    {
        match self {
            QueryOutput::Rows(rows) => QueryOutput::Rows(rows.into_iter().map(f).collect()),
            QueryOutput::Row(row) => QueryOutput::Row(row.map(&mut f)),
            run @ QueryOutput::Run { .. } => run,
        }
    }

    /// Rows of the result; a single row becomes a one-element list.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Row(row) => row.into_iter().collect(),
            QueryOutput::Run { .. } => Vec::new(),
        }
    }

    /// Affected row count of a run summary.
    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            QueryOutput::Run { affected_rows, .. } => Some(*affected_rows),
            _ => None,
        }
    }
}

/// Executes compiled SQL.
pub trait Connection {
    /// Runs `sql` with positional `params`.
    fn execute(&self, sql: &str, params: &[Value], method: ExecMethod) -> Result<QueryOutput>;

    /// True while a transaction is open on the connection.
    fn in_transaction(&self) -> bool {
        false
    }
}
