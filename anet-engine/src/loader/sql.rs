//! SQL helpers shared by the bulk loaders

use anet_common::{time, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

/// Bound in place of an empty key list so the statement keeps its shape;
/// matches no row
pub const EMPTY_LIST_SENTINEL: &str = "";

/// Push `(?, ?, ...)` binding every key
pub fn push_uuid_list(builder: &mut QueryBuilder<'_, Sqlite>, keys: &[Uuid]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    if keys.is_empty() {
        separated.push_bind(EMPTY_LIST_SENTINEL.to_string());
    }
    for key in keys {
        separated.push_bind(key.to_string());
    }
    separated.push_unseparated(")");
}

/// Read a required UUID column
pub fn uuid_col(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.try_get(column)?;
    Ok(Uuid::parse_str(&value)?)
}

/// Read a nullable UUID column
pub fn opt_uuid_col(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let value: Option<String> = row.try_get(column)?;
    Ok(anet_common::uuid_utils::parse_opt(value)?)
}

/// Read a required timestamp column
pub fn ts_col(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.try_get(column)?;
    time::from_db(&value)
}

/// Read a nullable timestamp column
pub fn opt_ts_col(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.try_get(column)?;
    time::from_db_opt(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_list_binds_each_key() {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT 1 WHERE x IN ");
        push_uuid_list(&mut builder, &[Uuid::new_v4(), Uuid::new_v4()]);
        assert_eq!(builder.sql(), "SELECT 1 WHERE x IN (?, ?)");
    }

    #[test]
    fn test_empty_uuid_list_keeps_statement_shape() {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT 1 WHERE x IN ");
        push_uuid_list(&mut builder, &[]);
        assert_eq!(builder.sql(), "SELECT 1 WHERE x IN (?)");
    }
}
