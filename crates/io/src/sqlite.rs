// SQLite-backed fixture connection

use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, OptionalExtension};

use dbfixture_engine::sql;
use dbfixture_engine::{Connection, ConnectionFactory, FixtureError, FixtureResult, Row, SqlValue};

/// Opens a SQLite database file for every logical connection name.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionFactory for SqliteConnector {
    type Conn = SqliteConnection;

    fn open(&self, name: &str) -> FixtureResult<SqliteConnection> {
        SqliteConnection::open(name, &self.path)
    }
}

pub struct SqliteConnection {
    name: String,
    conn: Option<rusqlite::Connection>,
}

fn sql_err(e: rusqlite::Error) -> FixtureError {
    FixtureError::sql(e)
}

fn introspection_err(e: rusqlite::Error) -> FixtureError {
    FixtureError::SchemaIntrospection(e.to_string())
}

fn to_sqlite(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Integer(n) => SqliteValue::Integer(*n),
        SqlValue::Real(f) => SqliteValue::Real(*f),
        SqlValue::Text(s) => SqliteValue::Text(s.clone()),
        SqlValue::Blob(b) => SqliteValue::Blob(b.clone()),
    }
}

fn from_sqlite(value: SqliteValue) -> SqlValue {
    match value {
        SqliteValue::Null => SqlValue::Null,
        SqliteValue::Integer(n) => SqlValue::Integer(n),
        SqliteValue::Real(f) => SqlValue::Real(f),
        SqliteValue::Text(s) => SqlValue::Text(s),
        SqliteValue::Blob(b) => SqlValue::Blob(b),
    }
}

fn read_row(names: &[String], row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for (i, name) in names.iter().enumerate() {
        let value: SqliteValue = row.get(i)?;
        out.push(name.clone(), from_sqlite(value));
    }
    Ok(out)
}

impl SqliteConnection {
    pub fn open(name: &str, path: &Path) -> FixtureResult<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| FixtureError::sql(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self {
            name: name.to_string(),
            conn: Some(conn),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying handle; fails once the connection has been released.
    pub fn raw(&mut self) -> FixtureResult<&mut rusqlite::Connection> {
        let name = &self.name;
        self.conn
            .as_mut()
            .ok_or_else(|| FixtureError::sql(format!("connection {name} already released")))
    }

    /// Run several `;`-separated statements at once (schema setup).
    pub fn execute_batch(&mut self, sql: &str) -> FixtureResult<()> {
        self.raw()?.execute_batch(sql).map_err(sql_err)
    }

    fn has_sequence_table(&mut self) -> FixtureResult<bool> {
        self.table_exists("sqlite_sequence")
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> FixtureResult<()> {
        self.raw()?
            .execute(sql, params_from_iter(params.iter().map(to_sqlite)))
            .map_err(sql_err)?;
        Ok(())
    }

    fn query_one(&mut self, sql: &str, params: &[SqlValue]) -> FixtureResult<Option<Row>> {
        let conn = self.raw()?;
        let mut stmt = conn.prepare(sql).map_err(sql_err)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sqlite)))
            .map_err(sql_err)?;
        let first = match rows.next().map_err(sql_err)? {
            Some(row) => Some(read_row(&names, row).map_err(sql_err)?),
            None => None,
        };
        Ok(first)
    }

    fn for_each_row(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        visit: &mut dyn FnMut(Row) -> FixtureResult<()>,
    ) -> FixtureResult<()> {
        let conn = self.raw()?;
        let mut stmt = conn.prepare(sql).map_err(sql_err)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sqlite)))
            .map_err(sql_err)?;
        while let Some(row) = rows.next().map_err(sql_err)? {
            visit(read_row(&names, row).map_err(sql_err)?)?;
        }
        Ok(())
    }

    fn primary_key_columns(&mut self, table: &str) -> FixtureResult<Vec<String>> {
        if !self.table_exists(table)? {
            return Err(FixtureError::SchemaIntrospection(format!(
                "table {table} does not exist"
            )));
        }
        let conn = self.raw()?;
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")
            .map_err(introspection_err)?;
        let columns = stmt
            .query_map([table], |row| row.get::<_, String>(0))
            .map_err(introspection_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(introspection_err)?;
        Ok(columns)
    }

    fn table_exists(&mut self, name: &str) -> FixtureResult<bool> {
        let found = self
            .raw()?
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
                [name],
                |_| Ok(()),
            )
            .optional()
            .map_err(introspection_err)?;
        Ok(found.is_some())
    }

    /// SQLite keeps one sequence per AUTOINCREMENT table, named after it.
    fn sequence_exists(&mut self, name: &str) -> FixtureResult<bool> {
        if !self.has_sequence_table()? {
            return Ok(false);
        }
        let found = self
            .raw()?
            .query_row("SELECT 1 FROM sqlite_sequence WHERE name = ?1", [name], |_| Ok(()))
            .optional()
            .map_err(introspection_err)?;
        Ok(found.is_some())
    }

    fn reset_sequence(&mut self, name: &str) -> FixtureResult<()> {
        if !self.has_sequence_table()? {
            return Ok(());
        }
        self.execute(
            "DELETE FROM sqlite_sequence WHERE name = ?",
            &[SqlValue::from(name)],
        )
    }

    fn drop_sequence(&mut self, name: &str) -> FixtureResult<()> {
        self.reset_sequence(name)
    }

    fn fetch_lob(
        &mut self,
        table: &str,
        column: &str,
        identifying: &[(String, SqlValue)],
        size_column: Option<&str>,
    ) -> FixtureResult<Option<Vec<u8>>> {
        let mut columns = vec![column.to_string()];
        if let Some(size) = size_column {
            columns.push(size.to_string());
        }
        let stmt = sql::select(table, &columns, identifying);
        let Some(row) = self.query_one(&stmt.sql, &stmt.params)? else {
            return Ok(None);
        };

        let content = match row.get(column) {
            Some(SqlValue::Blob(bytes)) => bytes.clone(),
            Some(SqlValue::Text(text)) => text.clone().into_bytes(),
            _ => return Ok(None),
        };
        let size = size_column
            .and_then(|c| row.get(c))
            .and_then(|v| match v {
                SqlValue::Integer(n) if *n >= 0 => Some(*n as usize),
                _ => None,
            });

        Ok(Some(match size {
            Some(n) if n < content.len() => content[..n].to_vec(),
            _ => content,
        }))
    }

    fn write_lob(
        &mut self,
        table: &str,
        column: &str,
        content: &[u8],
        identifying: &[(String, SqlValue)],
        size_column: Option<&str>,
    ) -> FixtureResult<()> {
        let mut fields = vec![(column.to_string(), SqlValue::Blob(content.to_vec()))];
        if let Some(size) = size_column {
            fields.push((size.to_string(), SqlValue::Integer(content.len() as i64)));
        }
        let stmt = sql::update(table, &fields, identifying);
        self.execute(&stmt.sql, &stmt.params)
    }

    fn release(&mut self) -> FixtureResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| sql_err(e))?;
        }
        Ok(())
    }
}
