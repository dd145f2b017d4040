//! Reference relational backend: a `rusqlite` connection behind a
//! mutex, parameterized statements throughout, and one migration step
//! run at `open()`. This is a runnable stand-in for the concrete
//! driver a hosting application would supply; it is not itself part
//! of the protocol surface.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;

use crate::error::ODataError;
use crate::plan::{CompiledQuery, SqlValue};
use crate::store::{Row, Store};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn map_err(e: rusqlite::Error) -> ODataError {
    ODataError::internal(format!("storage error: {e}"))
}

impl SqliteStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        tracing::info!(path, "sqlite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn execute_batch(&self, sql: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn row_from_statement(stmt: &rusqlite::Statement, row: &rusqlite::Row) -> Result<Row, ODataError> {
        let mut map = HashMap::new();
        for (i, name) in stmt.column_names().iter().enumerate() {
            let value: SqlValue = match row.get_ref(i).map_err(map_err)? {
                rusqlite::types::ValueRef::Null => SqlValue::Null,
                rusqlite::types::ValueRef::Integer(n) => SqlValue::Int(n),
                rusqlite::types::ValueRef::Real(f) => SqlValue::Real(f),
                rusqlite::types::ValueRef::Text(t) => {
                    SqlValue::Text(String::from_utf8_lossy(t).into_owned())
                }
                rusqlite::types::ValueRef::Blob(_) => SqlValue::Null,
            };
            map.insert((*name).to_string(), value);
        }
        Ok(Row(map))
    }

    pub fn query_compiled(&self, compiled: &CompiledQuery) -> Result<Vec<Row>, ODataError> {
        self.query_sync(&compiled.to_sql(), &compiled.params)
    }

    pub fn count_compiled(&self, compiled: &CompiledQuery) -> Result<i64, ODataError> {
        self.count_sync(&compiled.count_sql(), &compiled.params)
    }

    pub(crate) fn query_sync(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ODataError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let mut stmt = conn.prepare(sql).map_err(map_err)?;
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
        let mut rows = stmt.query(params_refs.as_slice()).map_err(map_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_err)? {
            out.push(Self::row_from_statement(rows.as_ref(), row)?);
        }
        Ok(out)
    }

    pub(crate) fn count_sync(&self, sql: &str, params: &[SqlValue]) -> Result<i64, ODataError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
        conn.query_row(sql, params_refs.as_slice(), |row| row.get(0))
            .map_err(map_err)
    }

    /// Execute a single parameterized statement, returning rows affected
    /// and, for INSERTs, the new rowid.
    pub fn execute_sync(&self, sql: &str, params: &[SqlValue]) -> Result<(usize, i64), ODataError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
        let affected = conn.execute(sql, params_refs.as_slice()).map_err(map_err)?;
        Ok((affected, conn.last_insert_rowid()))
    }

    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<(usize, i64), ODataError> {
        self.execute_sync(sql, params)
    }

    /// Runs `f` against an open transaction, committing on `Ok` and
    /// rolling back on `Err`. Synchronous by design: SQLite statements
    /// complete fast enough that holding the connection mutex for the
    /// duration of one request's writes (the write pipeline, or one
    /// batch changeset) does not meaningfully block other requests, and
    /// it avoids smuggling a borrowed `rusqlite::Transaction` across an
    /// await point.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T, ODataError>,
    ) -> Result<T, ODataError> {
        let mut conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let tx = conn.transaction().map_err(map_err)?;
        let result = f(&tx);
        match result {
            Ok(value) => {
                tx.commit().map_err(map_err)?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ODataError> {
        self.query_sync(sql, params)
    }

    async fn count(&self, sql: &str, params: &[SqlValue]) -> Result<i64, ODataError> {
        self.count_sync(sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executes_and_queries_a_table() {
        let store = SqliteStore::open(":memory:").unwrap();
        store
            .execute_batch("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .unwrap();
        let (affected, rowid) = store
            .execute_sync(
                "INSERT INTO products (name) VALUES (?)",
                &[SqlValue::Text("Mouse".to_string())],
            )
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(rowid, 1);

        let rows = store
            .query_sync("SELECT id, name FROM products WHERE id = ?", &[SqlValue::Int(1)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&SqlValue::Text("Mouse".to_string())));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = SqliteStore::open(":memory:").unwrap();
        store
            .execute_batch("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT UNIQUE NOT NULL);")
            .unwrap();

        let result: Result<(), ODataError> = store.with_transaction(|tx| {
            tx.execute("INSERT INTO products (name) VALUES ('A')", [])
                .map_err(map_err)?;
            Err(ODataError::internal("forced rollback"))
        });
        assert!(result.is_err());

        let rows = store.query_sync("SELECT id FROM products", &[]).unwrap();
        assert!(rows.is_empty());
    }
}
