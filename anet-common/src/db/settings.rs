//! Settings database operations
//!
//! Key/value accessors for the `settings` table. Deployment values stored here
//! take precedence over the same values in the config-file dictionary.

use crate::{Error, Result};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::info;
use uuid::Uuid;

/// Settings key for the default approval organization
pub const DEFAULT_APPROVAL_ORGANIZATION: &str = "default_approval_organization";

/// Get the default approval organization, if set in the database
pub async fn get_default_approval_organization(db: &Pool<Sqlite>) -> Result<Option<Uuid>> {
    get_setting::<Uuid>(db, DEFAULT_APPROVAL_ORGANIZATION).await
}

/// Set the default approval organization
pub async fn set_default_approval_organization(db: &Pool<Sqlite>, org_uuid: Uuid) -> Result<()> {
    set_setting(db, DEFAULT_APPROVAL_ORGANIZATION, org_uuid).await
}

/// Generic setting getter; NULL and empty values read as unset
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row.and_then(|(value,)| value).filter(|v| !v.is_empty()) {
        Some(value) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

/// Ensure every known setting has a row
pub(crate) async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, DEFAULT_APPROVAL_ORGANIZATION, None).await?;
    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: Option<&str>) -> Result<()> {
    let result = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        info!("Initialized setting '{}' with default value: {:?}", key, default_value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[tokio::test]
    async fn test_default_org_unset_on_fresh_database() {
        let pool = init_memory_database().await.unwrap();
        assert_eq!(get_default_approval_organization(&pool).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_default_org_round_trip() {
        let pool = init_memory_database().await.unwrap();
        let org = Uuid::new_v4();
        set_default_approval_organization(&pool, org).await.unwrap();
        assert_eq!(get_default_approval_organization(&pool).await.unwrap(), Some(org));
    }

    #[tokio::test]
    async fn test_unparseable_setting_is_config_error() {
        let pool = init_memory_database().await.unwrap();
        set_setting(&pool, DEFAULT_APPROVAL_ORGANIZATION, "not-a-uuid").await.unwrap();
        let err = get_default_approval_organization(&pool).await.unwrap_err();
        assert!(err.is_config());
    }
}
