use std::fmt;

use crate::model::{Row, SqlValue, Value};

/// First discrepancy found by `verify`. Rendered by `Display` into the
/// human-readable report handed to assertion layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    /// A column's live value differs from the expected value.
    Field {
        table: String,
        column: String,
        expected_row: String,
        live_row: String,
    },
    /// A predicate column rejected the live value.
    Predicate {
        table: String,
        column: String,
        live_row: String,
    },
    /// No live row matched the expected row.
    MissingEntry { table: String, expected_row: String },
    /// Live large-object content differs in length or bytes.
    Lob {
        table: String,
        column: String,
        identifying: String,
    },
    /// Live row count differs from the expected row count (INSERT only).
    RowCount {
        table: String,
        actual: u64,
        expected: u64,
    },
}

impl Difference {
    pub fn table(&self) -> &str {
        match self {
            Self::Field { table, .. }
            | Self::Predicate { table, .. }
            | Self::MissingEntry { table, .. }
            | Self::Lob { table, .. }
            | Self::RowCount { table, .. } => table,
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Field { column, .. } | Self::Predicate { column, .. } | Self::Lob { column, .. } => {
                Some(column)
            }
            Self::MissingEntry { .. } | Self::RowCount { .. } => None,
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { table, column, expected_row, live_row } => {
                write!(f, "found difference in {table} {column}:\n  {expected_row}\n  {live_row}")
            }
            Self::Predicate { table, column, live_row } => {
                write!(f, "found difference in {table} {column}:\n  {live_row}")
            }
            Self::MissingEntry { table, expected_row } => {
                write!(f, "found difference in {table} - missing entry: \n  {expected_row}")
            }
            Self::Lob { table, column, identifying } => {
                write!(f, "found difference at LOB value {table}.{column}: {identifying}")
            }
            Self::RowCount { table, actual, expected } => write!(
                f,
                "found difference in number of the {table} rows - has {actual} rows, should have {expected}"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Row formatting
// ---------------------------------------------------------------------------

/// `{id: 1, name: 'Alice', photo: <lob>}`
pub fn format_expected<'a>(fields: impl IntoIterator<Item = (&'a str, &'a Value)>) -> String {
    join_fields(fields.into_iter().map(|(c, v)| format!("{c}: {v}")))
}

pub fn format_live(row: &Row) -> String {
    join_fields(row.iter().map(|(c, v)| format!("{c}: {v}")))
}

pub fn format_values<'a>(fields: impl IntoIterator<Item = (&'a str, &'a SqlValue)>) -> String {
    join_fields(fields.into_iter().map(|(c, v)| format!("{c}: {v}")))
}

fn join_fields(parts: impl Iterator<Item = String>) -> String {
    format!("{{{}}}", parts.collect::<Vec<_>>().join(", "))
}
