use crate::codec::{self, LobField, SplitRow};
use crate::connection::Connection;
use crate::error::{FixtureError, FixtureResult};
use crate::keys::{key_values, PrimaryKeyCache};
use crate::model::{Dataset, LoadStrategy, SqlValue};
use crate::sql;

/// What `merge` did with one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// A matching row exists but there is no key to update it by.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub lobs_written: usize,
}

pub fn delete_tables(conn: &mut dyn Connection, tables: &[String]) -> FixtureResult<()> {
    for table in tables {
        tracing::debug!(table = %table, "clearing table");
        conn.execute(&sql::delete_all(table), &[])?;
    }
    Ok(())
}

/// One dataset row after splitting, ready to write.
#[derive(Debug, Clone)]
pub struct PreparedRow<'a> {
    pub table: &'a str,
    pub split: SplitRow,
}

/// Split every row of `dataset` up front. LOB files are read and predicates
/// rejected here, so a bad row fails the load before anything is written.
pub fn prepare(dataset: &Dataset) -> FixtureResult<Vec<PreparedRow<'_>>> {
    dataset
        .iter()
        .map(|(table, row)| {
            let split = codec::split(row)?;
            if split.has_predicates() {
                return Err(FixtureError::Dataset(format!(
                    "table {table}: predicate fields are only valid in expected datasets"
                )));
            }
            Ok(PreparedRow { table, split })
        })
        .collect()
}

/// Write every prepared row in order. Deletes must already have run.
///
/// Rows with no scalar fields are skipped (delete markers). LOB fields are
/// written after the row's scalar fields, keyed by primary key when the row
/// carries it, else by all of its scalar fields.
pub fn apply(
    conn: &mut dyn Connection,
    keys: &mut PrimaryKeyCache,
    rows: &[PreparedRow<'_>],
    strategy: LoadStrategy,
) -> FixtureResult<ApplyStats> {
    let mut stats = ApplyStats::default();

    for PreparedRow { table, split } in rows {
        let table = *table;
        let fields = split.bindable();
        if fields.is_empty() {
            continue;
        }

        match strategy {
            LoadStrategy::Insert => {
                insert(conn, table, &fields)?;
                stats.inserted += 1;
            }
            LoadStrategy::Refresh => match merge(conn, keys, table, &fields)? {
                MergeOutcome::Inserted => stats.inserted += 1,
                MergeOutcome::Updated => stats.updated += 1,
                MergeOutcome::Unchanged => stats.unchanged += 1,
            },
        }

        if !split.lobs.is_empty() {
            let key = keys.columns(conn, table)?;
            let identifying = key_values(&key, &fields).unwrap_or_else(|| fields.clone());
            write_lobs(conn, table, &split.lobs, &identifying)?;
            stats.lobs_written += split.lobs.len();
        }
    }

    Ok(stats)
}

pub fn insert(conn: &mut dyn Connection, table: &str, fields: &[(String, SqlValue)]) -> FixtureResult<()> {
    let stmt = sql::insert(table, fields);
    tracing::trace!(sql = %stmt.sql, "insert");
    conn.execute(&stmt.sql, &stmt.params)
}

/// Update the row if it exists, insert it otherwise.
///
/// Existence is probed by primary-key equality when the row carries every
/// key column, else by equality over all of the row's fields.
pub fn merge(
    conn: &mut dyn Connection,
    keys: &mut PrimaryKeyCache,
    table: &str,
    fields: &[(String, SqlValue)],
) -> FixtureResult<MergeOutcome> {
    let key = keys.columns(conn, table)?;
    let key_vals = key_values(&key, fields);

    let probe = sql::exists(table, key_vals.as_deref().unwrap_or(fields));
    let exists = conn.query_one(&probe.sql, &probe.params)?.is_some();

    match (exists, key_vals) {
        (false, _) => {
            insert(conn, table, fields)?;
            Ok(MergeOutcome::Inserted)
        }
        (true, Some(key_vals)) => {
            update(conn, table, fields, &key_vals)?;
            Ok(MergeOutcome::Updated)
        }
        (true, None) => {
            tracing::warn!(table, "row exists and has no usable key; left as is");
            Ok(MergeOutcome::Unchanged)
        }
    }
}

pub fn update(
    conn: &mut dyn Connection,
    table: &str,
    fields: &[(String, SqlValue)],
    key_vals: &[(String, SqlValue)],
) -> FixtureResult<()> {
    let stmt = sql::update(table, fields, key_vals);
    tracing::trace!(sql = %stmt.sql, "update");
    conn.execute(&stmt.sql, &stmt.params)
}

fn write_lobs(
    conn: &mut dyn Connection,
    table: &str,
    lobs: &[LobField],
    identifying: &[(String, SqlValue)],
) -> FixtureResult<()> {
    for lob in lobs {
        conn.write_lob(
            table,
            &lob.column,
            &lob.content,
            identifying,
            lob.size_column.as_deref(),
        )?;
    }
    Ok(())
}
