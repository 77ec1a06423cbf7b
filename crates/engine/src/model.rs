use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FixtureError;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A column value as bound into, or read back from, the live schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String form used for equality checks.
    ///
    /// Null renders empty and reals without a fractional part render as
    /// integers, so `3`, `"3"` and `3.0` compare equal while `"3.0"` does not.
    pub fn compare_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Integer(n) => n.to_string(),
            Self::Real(f) => format_real(*f),
            Self::Text(s) => s.clone(),
            Self::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

fn format_real(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Real(r) => write!(f, "{}", format_real(*r)),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Blob(bytes) => write!(f, "<blob {} bytes>", bytes.len()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for SqlValue {
    fn from(n: i32) -> Self {
        Self::Integer(n as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        Self::Real(f)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Blob(bytes)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Check evaluated against the live value of a column during `verify`.
/// The live value is `SqlValue::Null` when the live row lacks the column.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&SqlValue) -> bool + Send + Sync>);

impl Predicate {
    pub fn new(check: impl Fn(&SqlValue) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(check))
    }

    pub fn test(&self, live: &SqlValue) -> bool {
        (self.0)(live)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Where the content of a large-object field comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum LobSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// Large-object reference: content plus an optional column that stores its size.
#[derive(Debug, Clone, PartialEq)]
pub struct LobRef {
    pub source: LobSource,
    pub size_column: Option<String>,
}

impl LobRef {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: LobSource::File(path.into()),
            size_column: None,
        }
    }

    pub fn bytes(content: impl Into<Vec<u8>>) -> Self {
        Self {
            source: LobSource::Bytes(content.into()),
            size_column: None,
        }
    }

    pub fn with_size_column(mut self, column: impl Into<String>) -> Self {
        self.size_column = Some(column.into());
        self
    }
}

/// One field value in a dataset row.
#[derive(Debug, Clone)]
pub enum Value {
    Scalar(SqlValue),
    /// Only meaningful in expected datasets.
    Predicate(Predicate),
    Lob(LobRef),
}

impl Value {
    pub fn predicate(check: impl Fn(&SqlValue) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Predicate::new(check))
    }

    pub fn as_scalar(&self) -> Option<&SqlValue> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "{v}"),
            Self::Predicate(_) => write!(f, "<predicate>"),
            Self::Lob(_) => write!(f, "<lob>"),
        }
    }
}

macro_rules! scalar_value_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Scalar(value.into())
                }
            }
        )*
    };
}

scalar_value_from!(SqlValue, &str, String, i64, i32, f64);

impl<T: Into<SqlValue>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<Predicate> for Value {
    fn from(p: Predicate) -> Self {
        Self::Predicate(p)
    }
}

impl From<LobRef> for Value {
    fn from(lob: LobRef) -> Self {
        Self::Lob(lob)
    }
}

// ---------------------------------------------------------------------------
// Rows + Datasets
// ---------------------------------------------------------------------------

/// Ordered column/value pairs for one dataset row.
/// Setting a column twice overwrites the earlier value in place.
#[derive(Debug, Clone, Default)]
pub struct RowSpec {
    fields: Vec<(String, Value)>,
}

impl RowSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RowSpec {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RowSpec::new();
        for (column, value) in iter {
            row.set(column, value);
        }
        row
    }
}

/// Ordered (table, row) pairs. Order drives delete sequencing and
/// positional matching; an empty row marks its table for deletion.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    entries: Vec<(String, RowSpec)>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: impl Into<String>, row: RowSpec) {
        self.entries.push((table.into(), row));
    }

    pub fn with_row(mut self, table: impl Into<String>, row: RowSpec) -> Self {
        self.push(table, row);
        self
    }

    pub fn with_delete_marker(self, table: impl Into<String>) -> Self {
        self.with_row(table, RowSpec::new())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowSpec)> {
        self.entries.iter().map(|(t, r)| (t.as_str(), r))
    }

    /// Distinct table names in first-occurrence order.
    pub fn tables(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for (table, _) in &self.entries {
            if !seen.contains(&table.as_str()) {
                seen.push(table);
            }
        }
        seen
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<T: Into<String>> FromIterator<(T, RowSpec)> for Dataset {
    fn from_iter<I: IntoIterator<Item = (T, RowSpec)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(t, r)| (t.into(), r)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy + Dataset source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    /// Clear every touched table, insert all rows, verify exact row counts.
    #[default]
    Insert,
    /// Upsert listed rows, never mass-delete, verify listed rows only.
    Refresh,
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Refresh => write!(f, "REFRESH"),
        }
    }
}

impl FromStr for LoadStrategy {
    type Err = FixtureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "REFRESH" => Ok(Self::Refresh),
            other => Err(FixtureError::Dataset(format!(
                "unknown load strategy \"{other}\" (expected INSERT or REFRESH)"
            ))),
        }
    }
}

/// Document-level properties attached to a dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetProperties {
    pub load_strategy: Option<LoadStrategy>,
    pub reset_sequences: Vec<String>,
}

impl DatasetProperties {
    /// Parse the comma-separated `resetSequences` property.
    pub fn parse_sequence_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    }
}

/// A parsed dataset document: properties plus the ordered rows.
#[derive(Debug, Clone, Default)]
pub struct DatasetSource {
    pub properties: DatasetProperties,
    pub dataset: Dataset,
}

// ---------------------------------------------------------------------------
// Live rows
// ---------------------------------------------------------------------------

/// A row read back from the live schema, columns in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.push((column.into(), value));
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(column, value.into());
        self
    }

    /// Exact column match first, then ASCII case-insensitive.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .or_else(|| self.columns.iter().find(|(c, _)| c.eq_ignore_ascii_case(column)))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn has_non_null(&self) -> bool {
        self.columns.iter().any(|(_, v)| !v.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

impl<K: Into<String>> FromIterator<(K, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, SqlValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().map(|(c, v)| (c.into(), v)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
