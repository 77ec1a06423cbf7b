use std::ops::{Deref, DerefMut};

use crate::error::FixtureResult;
use crate::model::{Row, SqlValue};

/// Database capability the engine is injected with.
///
/// Every call blocks. Errors are propagated unmodified; the engine never
/// retries and never rolls back.
pub trait Connection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> FixtureResult<()>;

    /// First row of the result, or `None` when the query returns nothing.
    fn query_one(&mut self, sql: &str, params: &[SqlValue]) -> FixtureResult<Option<Row>>;

    /// Forward-only cursor: `visit` is called once per row, in result order.
    fn for_each_row(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        visit: &mut dyn FnMut(Row) -> FixtureResult<()>,
    ) -> FixtureResult<()>;

    /// Primary-key columns of `table` in key order; empty when it has none.
    fn primary_key_columns(&mut self, table: &str) -> FixtureResult<Vec<String>>;

    fn table_exists(&mut self, name: &str) -> FixtureResult<bool>;

    fn sequence_exists(&mut self, name: &str) -> FixtureResult<bool>;

    fn reset_sequence(&mut self, name: &str) -> FixtureResult<()>;

    fn drop_sequence(&mut self, name: &str) -> FixtureResult<()> {
        self.execute(&format!("DROP SEQUENCE {name}"), &[])
    }

    /// Live content of a large-object column for the row identified by
    /// `identifying`, truncated to `size_column` when one is given.
    fn fetch_lob(
        &mut self,
        table: &str,
        column: &str,
        identifying: &[(String, SqlValue)],
        size_column: Option<&str>,
    ) -> FixtureResult<Option<Vec<u8>>>;

    /// Store large-object content, recording its length in `size_column`.
    fn write_lob(
        &mut self,
        table: &str,
        column: &str,
        content: &[u8],
        identifying: &[(String, SqlValue)],
        size_column: Option<&str>,
    ) -> FixtureResult<()>;

    /// Give the underlying handle back. Called once when the scope ends.
    fn release(&mut self) -> FixtureResult<()> {
        Ok(())
    }
}

/// Opens connections by logical connection name.
pub trait ConnectionFactory {
    type Conn: Connection;

    fn open(&self, name: &str) -> FixtureResult<Self::Conn>;
}

/// A connection acquired for one top-level operation. Released on drop,
/// whether the operation succeeded or failed.
pub struct ScopedConnection<C: Connection> {
    name: String,
    conn: C,
}

impl<C: Connection> ScopedConnection<C> {
    pub fn acquire<F>(factory: &F, name: &str) -> FixtureResult<Self>
    where
        F: ConnectionFactory<Conn = C>,
    {
        let conn = factory.open(name)?;
        tracing::debug!(connection = name, "connection acquired");
        Ok(Self {
            name: name.to_string(),
            conn,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<C: Connection> Deref for ScopedConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C: Connection> DerefMut for ScopedConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

impl<C: Connection> Drop for ScopedConnection<C> {
    fn drop(&mut self) {
        match self.conn.release() {
            Ok(()) => tracing::debug!(connection = %self.name, "connection released"),
            Err(e) => tracing::warn!(connection = %self.name, error = %e, "connection release failed"),
        }
    }
}
