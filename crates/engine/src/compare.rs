//! Expected-vs-live row comparison. Every function stops at the first
//! discrepancy it finds.

use crate::codec::{LobField, SplitRow};
use crate::connection::Connection;
use crate::difference::{format_expected, format_live, format_values, Difference};
use crate::error::{FixtureError, FixtureResult};
use crate::keys::key_values;
use crate::model::{Dataset, Row, SqlValue, Value};
use crate::snapshot::{LiveSnapshot, KEY_SEPARATOR};
use crate::sql;

/// Compare each expected column against the live row, in expected order.
///
/// Predicates are called with the live value. Scalars compare by
/// [`SqlValue::compare_text`]; a column missing from the live row compares
/// as empty. LOB fields are ignored here.
pub fn compare_fields(table: &str, live: &Row, expected: &[(String, Value)]) -> Option<Difference> {
    for (column, value) in expected {
        let live_value = live.get(column).cloned().unwrap_or(SqlValue::Null);
        match value {
            Value::Predicate(check) => {
                if !check.test(&live_value) {
                    return Some(Difference::Predicate {
                        table: table.to_string(),
                        column: column.clone(),
                        live_row: format_live(live),
                    });
                }
            }
            Value::Scalar(expected_value) => {
                if live_value.compare_text() != expected_value.compare_text() {
                    return Some(Difference::Field {
                        table: table.to_string(),
                        column: column.clone(),
                        expected_row: format_expected(expected.iter().map(|(c, v)| (c.as_str(), v))),
                        live_row: format_live(live),
                    });
                }
            }
            Value::Lob(_) => {}
        }
    }
    None
}

/// Compare live LOB content by length, then bytes. A missing live value
/// compares as empty content.
pub fn validate_lobs(
    conn: &mut dyn Connection,
    table: &str,
    lobs: &[LobField],
    identifying: &[(String, SqlValue)],
) -> FixtureResult<Option<Difference>> {
    for lob in lobs {
        let live = conn
            .fetch_lob(table, &lob.column, identifying, lob.size_column.as_deref())?
            .unwrap_or_default();
        if live.len() != lob.content.len() || live != lob.content {
            tracing::debug!(
                table,
                column = %lob.column,
                expected_len = lob.content.len(),
                live_len = live.len(),
                "lob content differs"
            );
            return Ok(Some(Difference::Lob {
                table: table.to_string(),
                column: lob.column.clone(),
                identifying: format_values(identifying.iter().map(|(c, v)| (c.as_str(), v))),
            }));
        }
    }
    Ok(None)
}

/// Joined key of the expected row, or `None` when the table has no key or
/// the row lacks a plain value for some key column.
pub fn expected_row_key(key: &[String], split: &SplitRow) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    let parts: Option<Vec<String>> = key
        .iter()
        .map(|k| {
            split
                .scalars
                .iter()
                .find(|(c, _)| c.eq_ignore_ascii_case(k))
                .and_then(|(_, v)| v.as_scalar())
                .map(SqlValue::compare_text)
        })
        .collect();
    parts.map(|p| p.join(KEY_SEPARATOR))
}

/// Match one expected row against a table snapshot (INSERT strategy).
///
/// By key when the row carries the full primary key; otherwise by scanning
/// for a live row whose values for the expected columns join to the same
/// `-`-separated signature. A matched entry is consumed.
pub fn match_in_snapshot(
    conn: &mut dyn Connection,
    table: &str,
    key: &[String],
    split: &SplitRow,
    snapshot: &mut LiveSnapshot,
) -> FixtureResult<Option<Difference>> {
    if !split.lobs.is_empty() {
        let identifying = identifying_fields(key, split);
        if let Some(diff) = validate_lobs(conn, table, &split.lobs, &identifying)? {
            return Ok(Some(diff));
        }
    }

    match expected_row_key(key, split) {
        Some(row_key) => {
            if let Some(live) = snapshot.get(&row_key) {
                if let Some(diff) = compare_fields(table, live, &split.scalars) {
                    return Ok(Some(diff));
                }
                snapshot.take(&row_key);
                return Ok(None);
            }
        }
        None => {
            let bindable = split.bindable();
            let wanted = signature(bindable.iter().map(|(c, v)| (c.as_str(), Some(v))));
            let found = snapshot
                .iter()
                .find(|(_, live)| {
                    signature(bindable.iter().map(|(c, _)| (c.as_str(), live.get(c)))) == wanted
                        && compare_fields(table, live, &split.scalars).is_none()
                })
                .map(|(k, _)| k.to_string());
            if let Some(found) = found {
                snapshot.take(&found);
                return Ok(None);
            }
        }
    }

    Ok(Some(missing_entry(table, split)))
}

/// Query one live row and compare it (REFRESH strategy).
///
/// The row is located by primary-key equality, or by equality over every
/// non-predicate expected column when the table has no primary key.
pub fn compare_live(
    conn: &mut dyn Connection,
    table: &str,
    key: &[String],
    split: &SplitRow,
) -> FixtureResult<Option<Difference>> {
    let bindable = split.bindable();
    let condition = if key.is_empty() {
        bindable
    } else {
        match key_values(key, &bindable) {
            Some(key_vals) => key_vals,
            None => return Ok(Some(missing_entry(table, split))),
        }
    };

    if !split.lobs.is_empty() {
        if let Some(diff) = validate_lobs(conn, table, &split.lobs, &condition)? {
            return Ok(Some(diff));
        }
    }

    let columns: Vec<String> = split.scalars.iter().map(|(c, _)| c.clone()).collect();
    let stmt = sql::select(table, &columns, &condition);
    match conn.query_one(&stmt.sql, &stmt.params)? {
        Some(live) if live.has_non_null() => Ok(compare_fields(table, &live, &split.scalars)),
        _ => Ok(Some(missing_entry(table, split))),
    }
}

/// Number of non-empty rows listed per table, tables in first-occurrence
/// order. A table listed only through delete markers expects zero rows.
pub fn expected_row_counts(dataset: &Dataset) -> Vec<(String, u64)> {
    let mut counts: Vec<(String, u64)> = Vec::new();
    for (table, row) in dataset.iter() {
        let idx = match counts.iter().position(|(t, _)| t == table) {
            Some(i) => i,
            None => {
                counts.push((table.to_string(), 0));
                counts.len() - 1
            }
        };
        if !row.is_empty() {
            counts[idx].1 += 1;
        }
    }
    counts
}

pub fn count_rows(conn: &mut dyn Connection, table: &str) -> FixtureResult<u64> {
    let row = conn.query_one(&sql::count(table), &[])?;
    let value = row.and_then(|r| r.iter().next().map(|(_, v)| v.clone()));
    match value {
        Some(SqlValue::Integer(n)) if n >= 0 => Ok(n as u64),
        Some(SqlValue::Real(f)) if f >= 0.0 => Ok(f as u64),
        Some(SqlValue::Text(s)) => s
            .trim()
            .parse()
            .map_err(|_| FixtureError::Sql(format!("count of {table} is not a number: {s}"))),
        other => Err(FixtureError::Sql(format!(
            "count query for {table} returned {}",
            other.map(|v| v.to_string()).unwrap_or_else(|| "no rows".into())
        ))),
    }
}

/// First table whose live row count differs from the expected count.
pub fn validate_row_counts(
    conn: &mut dyn Connection,
    expected: &[(String, u64)],
) -> FixtureResult<Option<Difference>> {
    for (table, expected_count) in expected {
        let actual = count_rows(conn, table)?;
        if actual != *expected_count {
            return Ok(Some(Difference::RowCount {
                table: table.clone(),
                actual,
                expected: *expected_count,
            }));
        }
    }
    Ok(None)
}

fn identifying_fields(key: &[String], split: &SplitRow) -> Vec<(String, SqlValue)> {
    let bindable = split.bindable();
    key_values(key, &bindable).unwrap_or(bindable)
}

fn signature<'a>(values: impl Iterator<Item = (&'a str, Option<&'a SqlValue>)>) -> String {
    values
        .map(|(_, v)| v.map(SqlValue::compare_text).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("-")
}

fn missing_entry(table: &str, split: &SplitRow) -> Difference {
    Difference::MissingEntry {
        table: table.to_string(),
        expected_row: format_expected(split.scalars.iter().map(|(c, v)| (c.as_str(), v))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
