//! Database initialization
//!
//! Creates the database on first run, applies pragmas, creates every table
//! idempotently, runs migrations and ensures default settings.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    prepare(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database, for tests and dry runs
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    prepare(&pool).await?;
    Ok(pool)
}

async fn prepare(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;

    // Organizational graph
    create_organizations_table(pool).await?;
    create_people_table(pool).await?;
    create_positions_table(pool).await?;
    create_position_relationships_table(pool).await?;
    create_organization_administrative_positions_table(pool).await?;
    create_tasks_table(pool).await?;
    create_task_responsible_positions_table(pool).await?;
    create_task_tasked_organizations_table(pool).await?;
    create_locations_table(pool).await?;
    create_events_table(pool).await?;

    // Approval workflow
    create_approval_steps_table(pool).await?;
    create_approvers_table(pool).await?;

    // Reports
    create_reports_table(pool).await?;
    create_report_people_table(pool).await?;
    create_report_tasks_table(pool).await?;
    create_report_actions_table(pool).await?;

    // Polymorphic items and their links
    create_authorization_groups_tables(pool).await?;
    create_notes_tables(pool).await?;
    create_assessments_tables(pool).await?;
    create_attachments_tables(pool).await?;

    create_subscriptions_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;
    crate::db::settings::init_default_settings(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_organizations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organizations (
            uuid TEXT PRIMARY KEY,
            short_name TEXT NOT NULL,
            long_name TEXT,
            parent_org_uuid TEXT REFERENCES organizations(uuid),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_organizations_parent ON organizations(parent_org_uuid)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_people_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS people (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email_address TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_positions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type INTEGER NOT NULL DEFAULT 0,
            organization_uuid TEXT REFERENCES organizations(uuid),
            current_person_uuid TEXT REFERENCES people(uuid),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_current_person ON positions(current_person_uuid)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_position_relationships_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS position_relationships (
            position_uuid_a TEXT NOT NULL REFERENCES positions(uuid),
            position_uuid_b TEXT NOT NULL REFERENCES positions(uuid),
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (position_uuid_a, position_uuid_b)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_organization_administrative_positions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organization_administrative_positions (
            organization_uuid TEXT NOT NULL REFERENCES organizations(uuid),
            position_uuid TEXT NOT NULL REFERENCES positions(uuid),
            PRIMARY KEY (organization_uuid, position_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            uuid TEXT PRIMARY KEY,
            short_name TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_task_responsible_positions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_responsible_positions (
            task_uuid TEXT NOT NULL REFERENCES tasks(uuid),
            position_uuid TEXT NOT NULL REFERENCES positions(uuid),
            PRIMARY KEY (task_uuid, position_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_task_tasked_organizations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_tasked_organizations (
            task_uuid TEXT NOT NULL REFERENCES tasks(uuid),
            organization_uuid TEXT NOT NULL REFERENCES organizations(uuid),
            PRIMARY KEY (task_uuid, organization_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_locations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS locations (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_approval_steps_table(pool: &SqlitePool) -> Result<()> {
    // sequence is the authoritative order; next_step_uuid is kept in sync on
    // every chain write for readers of the legacy linkage
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS approval_steps (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type INTEGER NOT NULL,
            related_object_uuid TEXT NOT NULL,
            next_step_uuid TEXT,
            sequence INTEGER,
            restricted_approval INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (related_object_uuid, type, sequence)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_approval_steps_related ON approval_steps(related_object_uuid)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_approvers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS approvers (
            approval_step_uuid TEXT NOT NULL REFERENCES approval_steps(uuid) ON DELETE CASCADE,
            position_uuid TEXT NOT NULL REFERENCES positions(uuid),
            PRIMARY KEY (approval_step_uuid, position_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_reports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            uuid TEXT PRIMARY KEY,
            intent TEXT,
            state INTEGER NOT NULL DEFAULT 0,
            approval_step_uuid TEXT REFERENCES approval_steps(uuid),
            engagement_date TEXT,
            released_at TEXT,
            cancelled_reason INTEGER,
            advisor_organization_uuid TEXT REFERENCES organizations(uuid),
            interlocutor_organization_uuid TEXT REFERENCES organizations(uuid),
            location_uuid TEXT REFERENCES locations(uuid),
            event_uuid TEXT REFERENCES events(uuid),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_state ON reports(state)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_report_people_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS report_people (
            report_uuid TEXT NOT NULL REFERENCES reports(uuid),
            person_uuid TEXT NOT NULL REFERENCES people(uuid),
            is_primary INTEGER NOT NULL DEFAULT 0,
            is_attendee INTEGER NOT NULL DEFAULT 1,
            is_author INTEGER NOT NULL DEFAULT 0,
            is_interlocutor INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (report_uuid, person_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_report_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS report_tasks (
            report_uuid TEXT NOT NULL REFERENCES reports(uuid),
            task_uuid TEXT NOT NULL REFERENCES tasks(uuid),
            position INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (report_uuid, task_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_report_actions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS report_actions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report_uuid TEXT NOT NULL REFERENCES reports(uuid),
            approval_step_uuid TEXT,
            person_uuid TEXT,
            type INTEGER NOT NULL,
            planned INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_report_actions_report ON report_actions(report_uuid)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Owner table plus its polymorphic link table
async fn create_linked_table(
    pool: &SqlitePool,
    owner_ddl: &str,
    link_table: &str,
    owner_column: &str,
    owner_table: &str,
) -> Result<()> {
    sqlx::query(owner_ddl).execute(pool).await?;

    let link_ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {link_table} (
            {owner_column} TEXT NOT NULL REFERENCES {owner_table}(uuid) ON DELETE CASCADE,
            related_object_type TEXT NOT NULL,
            related_object_uuid TEXT NOT NULL,
            PRIMARY KEY ({owner_column}, related_object_type, related_object_uuid)
        )
        "#
    );
    sqlx::query(&link_ddl).execute(pool).await?;

    let index_ddl = format!(
        "CREATE INDEX IF NOT EXISTS idx_{link_table}_related ON {link_table}(related_object_uuid)"
    );
    sqlx::query(&index_ddl).execute(pool).await?;

    Ok(())
}

async fn create_authorization_groups_tables(pool: &SqlitePool) -> Result<()> {
    create_linked_table(
        pool,
        r#"
        CREATE TABLE IF NOT EXISTS authorization_groups (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "authorization_group_related_objects",
        "authorization_group_uuid",
        "authorization_groups",
    )
    .await
}

async fn create_notes_tables(pool: &SqlitePool) -> Result<()> {
    create_linked_table(
        pool,
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            uuid TEXT PRIMARY KEY,
            author_uuid TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "note_related_objects",
        "note_uuid",
        "notes",
    )
    .await
}

async fn create_assessments_tables(pool: &SqlitePool) -> Result<()> {
    create_linked_table(
        pool,
        r#"
        CREATE TABLE IF NOT EXISTS assessments (
            uuid TEXT PRIMARY KEY,
            author_uuid TEXT NOT NULL,
            assessment_key TEXT NOT NULL,
            assessment_values TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "assessment_related_objects",
        "assessment_uuid",
        "assessments",
    )
    .await
}

async fn create_attachments_tables(pool: &SqlitePool) -> Result<()> {
    create_linked_table(
        pool,
        r#"
        CREATE TABLE IF NOT EXISTS attachments (
            uuid TEXT PRIMARY KEY,
            author_uuid TEXT NOT NULL,
            file_name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            content_length INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "attachment_related_objects",
        "attachment_uuid",
        "attachments",
    )
    .await
}

async fn create_subscriptions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            uuid TEXT PRIMARY KEY,
            subscriber_uuid TEXT NOT NULL REFERENCES positions(uuid),
            subscribed_object_type TEXT NOT NULL,
            subscribed_object_uuid TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            acknowledged_at TEXT,
            UNIQUE (subscriber_uuid, subscribed_object_type, subscribed_object_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_object ON subscriptions(subscribed_object_type, subscribed_object_uuid)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
