//! Splits a dataset row into scalar fields and large-object fields.

use crate::error::{FixtureError, FixtureResult};
use crate::model::{LobSource, RowSpec, SqlValue, Value};

/// Large-object field with its content already in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct LobField {
    pub column: String,
    pub content: Vec<u8>,
    pub size_column: Option<String>,
}

/// A row split by field kind. Scalars keep predicates; LOB references are
/// resolved to bytes.
#[derive(Debug, Clone, Default)]
pub struct SplitRow {
    pub scalars: Vec<(String, Value)>,
    pub lobs: Vec<LobField>,
}

impl SplitRow {
    pub fn scalar(&self, column: &str) -> Option<&Value> {
        self.scalars.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Plain scalar values, predicates left out. These are the fields that
    /// can be bound into statements.
    pub fn bindable(&self) -> Vec<(String, SqlValue)> {
        self.scalars
            .iter()
            .filter_map(|(c, v)| v.as_scalar().map(|s| (c.clone(), s.clone())))
            .collect()
    }

    pub fn has_predicates(&self) -> bool {
        self.scalars.iter().any(|(_, v)| matches!(v, Value::Predicate(_)))
    }
}

/// Split `row`. File-backed LOB references are read eagerly; an unreadable
/// file aborts the whole operation.
pub fn split(row: &RowSpec) -> FixtureResult<SplitRow> {
    let mut out = SplitRow::default();
    for (column, value) in row.iter() {
        match value {
            Value::Lob(lob) => {
                let content = match &lob.source {
                    LobSource::Bytes(bytes) => bytes.clone(),
                    LobSource::File(path) => {
                        std::fs::read(path).map_err(|e| FixtureError::io(path, e))?
                    }
                };
                out.lobs.push(LobField {
                    column: column.to_string(),
                    content,
                    size_column: lob.size_column.clone(),
                });
            }
            other => out.scalars.push((column.to_string(), other.clone())),
        }
    }
    Ok(out)
}
