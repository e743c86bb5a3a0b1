//! rusqlite-backed [`Connection`].

use std::path::Path;

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, ToSql};
use tracing::trace;

use super::{Connection, ExecMethod, QueryOutput, Row};
use crate::query::errors::Result;
use crate::query::value::Value;

/// SQLite connection with a `regexp` function registered, so `REGEXP`
/// conditions work out of the box.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(rusqlite::Connection::open_in_memory()?)
    }

    /// Opens or creates a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(rusqlite::Connection::open(path)?)
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.create_scalar_function(
            "regexp",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let pattern: String = ctx.get(0)?;
                let text: Option<String> = ctx.get(1)?;
                let re = Regex::new(&pattern)
                    .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))?;
                Ok(text.is_some_and(|text| re.is_match(&text)))
            },
        )?;
        Ok(Self { conn })
    }

    /// Runs a batch of statements without parameters, e.g. schema setup.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Underlying rusqlite connection.
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    fn execute(&self, sql: &str, params: &[Value], method: ExecMethod) -> Result<QueryOutput> {
        trace!(sql, params = params.len(), ?method, "sqlite execute");
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();

        if method == ExecMethod::Run {
            let affected_rows = if columns.is_empty() {
                stmt.execute(params_from_iter(params.iter()))? as u64
            } else {
                let mut rows = stmt.query(params_from_iter(params.iter()))?;
                while rows.next()?.is_some() {}
                self.conn.changes() as u64
            };
            let insert_id = Some(self.conn.last_insert_rowid()).filter(|id| *id != 0);
            return Ok(QueryOutput::Run {
                affected_rows,
                insert_id,
            });
        }

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut mapped = Row::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                mapped.insert(name.clone(), value_from_sql(row.get_ref(idx)?));
            }
            out.push(mapped);
            if method == ExecMethod::Get {
                break;
            }
        }
        Ok(match method {
            ExecMethod::Get => QueryOutput::Row(out.pop()),
            _ => QueryOutput::Rows(out),
        })
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

fn sql_value(value: &Value) -> rusqlite::Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) | Value::Raw(s) => SqlValue::Text(s.clone()),
        Value::Bytes(bytes) => SqlValue::Blob(bytes.clone()),
        Value::DateTime(nanos) => SqlValue::Text(value.datetime_rfc3339().ok_or_else(|| {
            rusqlite::Error::ToSqlConversionFailure(
                format!("datetime {nanos} is out of range").into(),
            )
        })?),
        Value::Regex(re) => SqlValue::Text(re.source.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_json().to_string()),
        Value::Entity(entity) => sql_value(&entity.pk_value())?,
    })
}

/// Binds values as owned SQLite values. Datetimes bind as RFC 3339 text and
/// nested arrays or objects as JSON text.
impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        sql_value(self).map(ToSqlOutput::Owned)
    }
}
