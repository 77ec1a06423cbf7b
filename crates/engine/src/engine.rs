use crate::apply;
use crate::codec;
use crate::compare;
use crate::connection::{Connection, ConnectionFactory, ScopedConnection};
use crate::difference::Difference;
use crate::error::{FixtureError, FixtureResult};
use crate::keys::PrimaryKeyCache;
use crate::model::{Dataset, DatasetSource, LoadStrategy};
use crate::planner::tables_to_delete;
use crate::snapshot;

/// Loads datasets into, and verifies datasets against, one logical
/// connection. Not meant to be shared across threads.
pub struct ReconciliationEngine<F: ConnectionFactory> {
    factory: F,
    connection_name: String,
    strategy: LoadStrategy,
    keys: PrimaryKeyCache,
}

impl<F: ConnectionFactory> ReconciliationEngine<F> {
    pub fn new(factory: F, connection_name: impl Into<String>) -> FixtureResult<Self> {
        let connection_name = connection_name.into();
        if connection_name.trim().is_empty() {
            return Err(FixtureError::Configuration(
                "a connection name is required".into(),
            ));
        }
        Ok(Self {
            factory,
            connection_name,
            strategy: LoadStrategy::default(),
            keys: PrimaryKeyCache::new(),
        })
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn load_strategy(&self) -> LoadStrategy {
        self.strategy
    }

    pub fn set_load_strategy(&mut self, strategy: LoadStrategy) {
        self.strategy = strategy;
    }

    /// Forget cached primary keys, e.g. after a test altered the schema.
    pub fn invalidate_primary_keys(&mut self) {
        self.keys.invalidate();
    }

    /// Run `f` on a connection that is released however `f` exits.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut F::Conn) -> FixtureResult<T>,
    ) -> FixtureResult<T> {
        let mut conn = ScopedConnection::acquire(&self.factory, &self.connection_name)?;
        f(&mut conn)
    }

    /// Clear the planned tables, then write every row of `dataset`.
    ///
    /// Every row is split before the first statement runs; an unreadable LOB
    /// file or a predicate field leaves the live tables untouched.
    pub fn load(&mut self, dataset: &Dataset) -> FixtureResult<()> {
        let rows = apply::prepare(dataset)?;
        self.load_prepared(dataset, &rows)
    }

    /// Apply the document's properties, reset its sequences, then load it.
    pub fn load_source(&mut self, source: &DatasetSource) -> FixtureResult<()> {
        let rows = apply::prepare(&source.dataset)?;
        if let Some(strategy) = source.properties.load_strategy {
            self.strategy = strategy;
        }
        for name in &source.properties.reset_sequences {
            self.reset_sequence(name)?;
        }
        self.load_prepared(&source.dataset, &rows)
    }

    fn load_prepared(&mut self, dataset: &Dataset, rows: &[apply::PreparedRow<'_>]) -> FixtureResult<()> {
        let strategy = self.strategy;
        let mut conn = ScopedConnection::acquire(&self.factory, &self.connection_name)?;

        let plan = tables_to_delete(dataset, strategy);
        tracing::debug!(?plan, %strategy, "delete plan");
        apply::delete_tables(&mut *conn, &plan)?;

        let stats = apply::apply(&mut *conn, &mut self.keys, rows, strategy)?;
        tracing::info!(
            connection = %self.connection_name,
            %strategy,
            rows = dataset.len(),
            inserted = stats.inserted,
            updated = stats.updated,
            unchanged = stats.unchanged,
            lobs = stats.lobs_written,
            "dataset loaded"
        );
        Ok(())
    }

    /// First difference between `expected` and the live tables, if any.
    pub fn verify(&mut self, expected: &Dataset) -> FixtureResult<Option<Difference>> {
        let strategy = self.strategy;
        let mut conn = ScopedConnection::acquire(&self.factory, &self.connection_name)?;

        let result = match strategy {
            LoadStrategy::Insert => self.verify_inserted(&mut *conn, expected)?,
            LoadStrategy::Refresh => self.verify_refreshed(&mut *conn, expected)?,
        };

        match &result {
            Some(diff) => tracing::info!(connection = %self.connection_name, %strategy, table = diff.table(), "difference found"),
            None => tracing::info!(connection = %self.connection_name, %strategy, rows = expected.len(), "dataset verified"),
        }
        Ok(result)
    }

    pub fn verify_source(&mut self, source: &DatasetSource) -> FixtureResult<Option<Difference>> {
        if let Some(strategy) = source.properties.load_strategy {
            self.strategy = strategy;
        }
        self.verify(&source.dataset)
    }

    /// Reset a sequence if the live schema has it.
    pub fn reset_sequence(&self, name: &str) -> FixtureResult<()> {
        self.with_connection(|conn| {
            if conn.sequence_exists(name)? {
                tracing::debug!(sequence = name, "resetting sequence");
                conn.reset_sequence(name)?;
            }
            Ok(())
        })
    }

    fn verify_inserted(
        &mut self,
        conn: &mut F::Conn,
        expected: &Dataset,
    ) -> FixtureResult<Option<Difference>> {
        let tables = snapshot::required_columns(expected);
        let mut snapshots = snapshot::fetch(conn, &mut self.keys, &tables)?;

        for (table, row) in expected.iter() {
            if row.is_empty() {
                continue;
            }
            let split = codec::split(row)?;
            let key = self.keys.columns(conn, table)?;
            let snap = snapshots.entry(table.to_string()).or_default();
            if let Some(diff) = compare::match_in_snapshot(conn, table, &key, &split, snap)? {
                return Ok(Some(diff));
            }
        }

        compare::validate_row_counts(conn, &compare::expected_row_counts(expected))
    }

    fn verify_refreshed(
        &mut self,
        conn: &mut F::Conn,
        expected: &Dataset,
    ) -> FixtureResult<Option<Difference>> {
        for (table, row) in expected.iter() {
            if row.is_empty() {
                continue;
            }
            let split = codec::split(row)?;
            let key = self.keys.columns(conn, table)?;
            if let Some(diff) = compare::compare_live(conn, table, &key, &split)? {
                return Ok(Some(diff));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Row, RowSpec, SqlValue, Value};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Fails every write; counts releases.
    struct BrokenConnection {
        released: Rc<Cell<usize>>,
    }

    impl Connection for BrokenConnection {
        fn execute(&mut self, _sql: &str, _params: &[SqlValue]) -> FixtureResult<()> {
            Err(FixtureError::sql("disk I/O error"))
        }
        fn query_one(&mut self, _sql: &str, _params: &[SqlValue]) -> FixtureResult<Option<Row>> {
            Ok(None)
        }
        fn for_each_row(
            &mut self,
            _sql: &str,
            _params: &[SqlValue],
            _visit: &mut dyn FnMut(Row) -> FixtureResult<()>,
        ) -> FixtureResult<()> {
            Ok(())
        }
        fn primary_key_columns(&mut self, _table: &str) -> FixtureResult<Vec<String>> {
            Ok(vec!["id".into()])
        }
        fn table_exists(&mut self, _name: &str) -> FixtureResult<bool> {
            Ok(true)
        }
        fn sequence_exists(&mut self, _name: &str) -> FixtureResult<bool> {
            Ok(false)
        }
        fn reset_sequence(&mut self, _name: &str) -> FixtureResult<()> {
            Ok(())
        }
        fn fetch_lob(
            &mut self,
            _table: &str,
            _column: &str,
            _identifying: &[(String, SqlValue)],
            _size_column: Option<&str>,
        ) -> FixtureResult<Option<Vec<u8>>> {
            Ok(None)
        }
        fn write_lob(
            &mut self,
            _table: &str,
            _column: &str,
            _content: &[u8],
            _identifying: &[(String, SqlValue)],
            _size_column: Option<&str>,
        ) -> FixtureResult<()> {
            Ok(())
        }
        fn release(&mut self) -> FixtureResult<()> {
            self.released.set(self.released.get() + 1);
            Ok(())
        }
    }

    struct BrokenFactory {
        released: Rc<Cell<usize>>,
    }

    impl ConnectionFactory for BrokenFactory {
        type Conn = BrokenConnection;

        fn open(&self, _name: &str) -> FixtureResult<BrokenConnection> {
            Ok(BrokenConnection {
                released: Rc::clone(&self.released),
            })
        }
    }

    fn engine() -> (ReconciliationEngine<BrokenFactory>, Rc<Cell<usize>>) {
        let released = Rc::new(Cell::new(0));
        let factory = BrokenFactory {
            released: Rc::clone(&released),
        };
        (ReconciliationEngine::new(factory, "main").unwrap(), released)
    }

    #[test]
    fn requires_connection_name() {
        let factory = BrokenFactory {
            released: Rc::new(Cell::new(0)),
        };
        let err = ReconciliationEngine::new(factory, "  ").err().unwrap();
        assert!(matches!(err, FixtureError::Configuration(_)));
    }

    #[test]
    fn strategy_defaults_to_insert_and_is_settable() {
        let (mut engine, _) = engine();
        assert_eq!(engine.load_strategy(), LoadStrategy::Insert);
        engine.set_load_strategy(LoadStrategy::Refresh);
        assert_eq!(engine.load_strategy(), LoadStrategy::Refresh);
        assert_eq!(engine.connection_name(), "main");
    }

    #[test]
    fn connection_released_when_load_fails() {
        let (mut engine, released) = engine();
        let ds = Dataset::new().with_row("emp", RowSpec::new().with("id", 1));
        let err = engine.load(&ds).unwrap_err();
        assert!(err.to_string().contains("disk I/O error"));
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn connection_released_after_verify() {
        let (mut engine, released) = engine();
        assert!(engine.verify(&Dataset::new()).unwrap().is_none());
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn predicates_rejected_in_load_datasets() {
        let (mut engine, _) = engine();
        engine.set_load_strategy(LoadStrategy::Refresh);
        let ds = Dataset::new().with_row("emp", RowSpec::new().with("id", Value::predicate(|_| true)));
        let err = engine.load(&ds).unwrap_err();
        assert!(matches!(err, FixtureError::Dataset(_)));
    }

    #[test]
    fn unreadable_lob_fails_before_any_statement() {
        let (mut engine, released) = engine();
        let ds = Dataset::new()
            .with_row("emp", RowSpec::new().with("id", 9))
            .with_row(
                "doc",
                RowSpec::new()
                    .with("id", 1)
                    .with("body", crate::model::LobRef::file("/no/such/file.bin")),
            );
        // every execute on this connection fails with a SQL error, so an IO
        // error means nothing was sent
        let err = engine.load(&ds).unwrap_err();
        assert!(matches!(err, FixtureError::Io { .. }), "{err}");
        assert_eq!(released.get(), 0);
    }

    #[test]
    fn source_properties_switch_strategy() {
        let (mut engine, _) = engine();
        let source = DatasetSource {
            properties: crate::model::DatasetProperties {
                load_strategy: Some(LoadStrategy::Refresh),
                reset_sequences: vec!["emp_seq".into()],
            },
            dataset: Dataset::new(),
        };
        engine.load_source(&source).unwrap();
        assert_eq!(engine.load_strategy(), LoadStrategy::Refresh);
    }
}
