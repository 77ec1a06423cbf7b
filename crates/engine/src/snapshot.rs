use std::collections::{BTreeMap, HashMap};

use crate::connection::Connection;
use crate::error::FixtureResult;
use crate::keys::PrimaryKeyCache;
use crate::model::{Dataset, Row, Value};
use crate::sql;

pub const KEY_SEPARATOR: &str = "#";

/// Live rows of one table, keyed by joined primary-key values, or by `__N`
/// ordinals when the table has no primary key. Built per verify call.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    rows: BTreeMap<String, Row>,
}

impl LiveSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, row: Row) {
        self.rows.insert(key, row);
    }

    pub fn get(&self, key: &str) -> Option<&Row> {
        self.rows.get(key)
    }

    /// Consume an entry so it cannot be matched twice.
    pub fn take(&mut self, key: &str) -> Option<Row> {
        self.rows.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Row)> {
        self.rows.iter().map(|(k, r)| (k.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// `a#b` from the live row's key columns.
pub fn live_row_key(key: &[String], row: &Row) -> String {
    key.iter()
        .map(|k| row.get(k).map(|v| v.compare_text()).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

/// Columns requested for each table of `dataset`, tables in first-occurrence
/// order. A table's list is the union of the scalar columns of every row
/// listed for it, since rows may name different columns.
pub fn required_columns(dataset: &Dataset) -> Vec<(String, Vec<String>)> {
    let mut tables: Vec<(String, Vec<String>)> = Vec::new();
    for (table, row) in dataset.iter() {
        let idx = match tables.iter().position(|(t, _)| t == table) {
            Some(i) => i,
            None => {
                tables.push((table.to_string(), Vec::new()));
                tables.len() - 1
            }
        };
        let cols = &mut tables[idx].1;
        for (column, value) in row.iter() {
            if matches!(value, Value::Lob(_)) {
                continue;
            }
            if !cols.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                cols.push(column.to_string());
            }
        }
    }
    tables
}

/// Pull every live row of each table, restricted to the requested columns
/// plus the table's primary-key columns.
pub fn fetch(
    conn: &mut dyn Connection,
    keys: &mut PrimaryKeyCache,
    tables: &[(String, Vec<String>)],
) -> FixtureResult<HashMap<String, LiveSnapshot>> {
    let mut snapshots = HashMap::new();

    for (table, requested) in tables {
        let key = keys.columns(conn, table)?;
        let mut columns = requested.clone();
        for k in &key {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(k)) {
                columns.push(k.clone());
            }
        }

        let mut snapshot = LiveSnapshot::new();
        if !columns.is_empty() {
            let stmt = sql::select(table, &columns, &[]);
            let mut ordinal = 0usize;
            conn.for_each_row(&stmt.sql, &stmt.params, &mut |row| {
                let row_key = if key.is_empty() {
                    format!("__{ordinal}")
                } else {
                    live_row_key(&key, &row)
                };
                ordinal += 1;
                snapshot.insert(row_key, row);
                Ok(())
            })?;
        }

        tracing::debug!(table = %table, rows = snapshot.len(), "fetched live snapshot");
        snapshots.insert(table.clone(), snapshot);
    }

    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LobRef, RowSpec, SqlValue};

    #[test]
    fn required_columns_union_across_rows() {
        let ds = Dataset::new()
            .with_row("emp", RowSpec::new().with("id", 1).with("name", "a"))
            .with_row("bonus", RowSpec::new().with("emp_id", 1))
            .with_row("emp", RowSpec::new().with("id", 2).with("salary", 10))
            .with_row("emp", RowSpec::new().with("ID", 3).with("photo", LobRef::bytes(vec![1u8])));
        let cols = required_columns(&ds);
        assert_eq!(
            cols,
            vec![
                ("emp".to_string(), vec!["id".to_string(), "name".to_string(), "salary".to_string()]),
                ("bonus".to_string(), vec!["emp_id".to_string()]),
            ]
        );
    }

    #[test]
    fn marker_only_table_requests_nothing() {
        let ds = Dataset::new().with_delete_marker("audit");
        assert_eq!(required_columns(&ds), vec![("audit".to_string(), Vec::new())]);
    }

    #[test]
    fn live_key_joins_with_hash() {
        let row = Row::new().with("a", 1).with("b", "x").with("c", SqlValue::Real(2.0));
        let key = vec!["a".to_string(), "c".to_string()];
        assert_eq!(live_row_key(&key, &row), "1#2");
    }

    #[test]
    fn take_consumes_entry() {
        let mut snap = LiveSnapshot::new();
        snap.insert("1".into(), Row::new().with("id", 1));
        assert!(snap.take("1").is_some());
        assert!(snap.take("1").is_none());
        assert!(snap.is_empty());
    }
}
