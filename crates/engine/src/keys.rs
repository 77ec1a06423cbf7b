use std::collections::HashMap;

use crate::connection::Connection;
use crate::error::FixtureResult;
use crate::model::SqlValue;

/// Primary-key columns per table, fetched from the live schema on first use
/// and kept until [`PrimaryKeyCache::invalidate`] is called.
#[derive(Debug, Default)]
pub struct PrimaryKeyCache {
    tables: HashMap<String, Vec<String>>,
}

impl PrimaryKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&mut self, conn: &mut dyn Connection, table: &str) -> FixtureResult<Vec<String>> {
        if let Some(cols) = self.tables.get(table) {
            return Ok(cols.clone());
        }
        let cols = conn.primary_key_columns(table)?;
        tracing::debug!(table, columns = ?cols, "resolved primary key");
        self.tables.insert(table.to_string(), cols.clone());
        Ok(cols)
    }

    pub fn invalidate(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Values of every key column, taken from `fields`. `None` when the table has
/// no key or any key column is absent.
pub fn key_values(key: &[String], fields: &[(String, SqlValue)]) -> Option<Vec<(String, SqlValue)>> {
    if key.is_empty() {
        return None;
    }
    key.iter()
        .map(|k| {
            fields
                .iter()
                .find(|(c, _)| c.eq_ignore_ascii_case(k))
                .map(|(c, v)| (c.clone(), v.clone()))
        })
        .collect()
}
