//! Parameterized statement builders. Placeholders are positional `?` and
//! always line up with the returned parameter list.

use crate::model::SqlValue;

/// A statement plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// `a = ? AND b IS NULL`. Null values are matched with `IS NULL` and bind
/// nothing. Empty input yields an empty condition.
pub fn equality_condition(fields: &[(String, SqlValue)]) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::with_capacity(fields.len());
    let mut params = Vec::new();
    for (column, value) in fields {
        if value.is_null() {
            clauses.push(format!("{column} IS NULL"));
        } else {
            clauses.push(format!("{column} = ?"));
            params.push(value.clone());
        }
    }
    (clauses.join(" AND "), params)
}

fn with_where(mut sql: String, condition: &str) -> String {
    if !condition.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(condition);
    }
    sql
}

pub fn insert(table: &str, fields: &[(String, SqlValue)]) -> Statement {
    let columns: Vec<&str> = fields.iter().map(|(c, _)| c.as_str()).collect();
    let placeholders = vec!["?"; fields.len()].join(", ");
    Statement {
        sql: format!("INSERT INTO {table} ({}) VALUES ({placeholders})", columns.join(", ")),
        params: fields.iter().map(|(_, v)| v.clone()).collect(),
    }
}

/// `UPDATE table SET ... WHERE key = ?`, keys sorted by column name.
pub fn update(table: &str, fields: &[(String, SqlValue)], keys: &[(String, SqlValue)]) -> Statement {
    let assignments: Vec<String> = fields.iter().map(|(c, _)| format!("{c} = ?")).collect();
    let mut params: Vec<SqlValue> = fields.iter().map(|(_, v)| v.clone()).collect();

    let mut sorted_keys = keys.to_vec();
    sorted_keys.sort_by(|a, b| a.0.cmp(&b.0));
    let (condition, key_params) = equality_condition(&sorted_keys);
    params.extend(key_params);

    Statement {
        sql: with_where(format!("UPDATE {table} SET {}", assignments.join(", ")), &condition),
        params,
    }
}

pub fn select(table: &str, columns: &[String], condition: &[(String, SqlValue)]) -> Statement {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    };
    let (clause, params) = equality_condition(condition);
    Statement {
        sql: with_where(format!("SELECT {projection} FROM {table}"), &clause),
        params,
    }
}

/// Existence probe by equality over `condition`.
pub fn exists(table: &str, condition: &[(String, SqlValue)]) -> Statement {
    let (clause, params) = equality_condition(condition);
    Statement {
        sql: with_where(format!("SELECT 1 AS found FROM {table}"), &clause),
        params,
    }
}

pub fn count(table: &str) -> String {
    format!("SELECT COUNT(*) AS row_count FROM {table}")
}

pub fn delete_all(table: &str) -> String {
    format!("DELETE FROM {table}")
}
