//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in the `schema_version` table.
//! Existing migrations are never modified; schema changes add a new one.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: subscription acknowledgement column
///
/// Databases created before acknowledgements existed lack the column that
/// pending-update detection compares against.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('subscriptions') WHERE name = 'acknowledged_at'",
    )
    .fetch_one(pool)
    .await?;

    if has_column == 0 {
        sqlx::query("ALTER TABLE subscriptions ADD COLUMN acknowledged_at TEXT")
            .execute(pool)
            .await?;
        info!("Migration v1: Added acknowledged_at to subscriptions table");
    }

    Ok(())
}

/// Migration v2: derive explicit step order from legacy next-step links
///
/// Steps imported with only `next_step_uuid` linkage get their `sequence`
/// computed by walking each chain from its head. Steps caught in a cycle keep
/// a NULL sequence and are excluded from chain resolution.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let result = sqlx::query(
        r#"
        WITH RECURSIVE chain(uuid, seq) AS (
            SELECT s.uuid, 0
            FROM approval_steps s
            WHERE s.sequence IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM approval_steps p WHERE p.next_step_uuid = s.uuid
              )
            UNION ALL
            SELECT n.uuid, chain.seq + 1
            FROM chain
            JOIN approval_steps c ON c.uuid = chain.uuid
            JOIN approval_steps n ON n.uuid = c.next_step_uuid
            WHERE chain.seq < 10000
        )
        UPDATE approval_steps
        SET sequence = (SELECT MIN(seq) FROM chain WHERE chain.uuid = approval_steps.uuid)
        WHERE sequence IS NULL
          AND uuid IN (SELECT uuid FROM chain)
        "#,
    )
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        info!(
            "Migration v2: Assigned explicit sequence to {} approval steps",
            result.rows_affected()
        );
    }

    let unordered: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM approval_steps WHERE sequence IS NULL")
            .fetch_one(pool)
            .await?;
    if unordered > 0 {
        warn!(
            "Migration v2: {} approval steps form a cycle and were left unordered",
            unordered
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[tokio::test]
    async fn test_fresh_database_is_at_current_version() {
        let pool = init_memory_database().await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_memory_database().await.unwrap();
        run_migrations(&pool).await.unwrap();
        migrate_v1(&pool).await.unwrap();
        migrate_v2(&pool).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_v2_orders_legacy_linked_steps() {
        let pool = init_memory_database().await.unwrap();
        let org = "00000000-0000-0000-0000-0000000000aa";
        // Inserted tail-first so insertion order differs from chain order
        for (uuid, next) in [("s3", None), ("s2", Some("s3")), ("s1", Some("s2"))] {
            sqlx::query(
                "INSERT INTO approval_steps (uuid, name, type, related_object_uuid, next_step_uuid, created_at, updated_at) \
                 VALUES (?, ?, 1, ?, ?, 'x', 'x')",
            )
            .bind(uuid)
            .bind(uuid)
            .bind(org)
            .bind(next)
            .execute(&pool)
            .await
            .unwrap();
        }

        migrate_v2(&pool).await.unwrap();

        let order: Vec<String> = sqlx::query_scalar(
            "SELECT uuid FROM approval_steps WHERE related_object_uuid = ? ORDER BY sequence",
        )
        .bind(org)
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(order, vec!["s1", "s2", "s3"]);
    }
}
