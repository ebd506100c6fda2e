//! Tasks, report tasks and responsible-task search

use crate::loader::sql::{push_uuid_list, uuid_col};
use crate::loader::{BatchLoader, SearchLoader};
use anet_common::enums::{Ordinal, TaskStatus};
use anet_common::{time, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Task record
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub uuid: Uuid,
    pub short_name: String,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(short_name: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            short_name: short_name.into(),
            status,
        }
    }
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    Ok(Task {
        uuid: uuid_col(row, "uuid")?,
        short_name: row.try_get("short_name")?,
        status: TaskStatus::decode(row.try_get("status")?)?,
    })
}

/// Save task to database
pub async fn insert_task(pool: &SqlitePool, task: &Task) -> Result<()> {
    let now = time::to_db(&time::now());
    sqlx::query("INSERT INTO tasks (uuid, short_name, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(task.uuid.to_string())
        .bind(&task.short_name)
        .bind(task.status.ordinal())
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;

    Ok(())
}

/// Make a position responsible for a task
pub async fn add_responsible_position(pool: &SqlitePool, task_uuid: Uuid, position_uuid: Uuid) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO task_responsible_positions (task_uuid, position_uuid) VALUES (?, ?)")
        .bind(task_uuid.to_string())
        .bind(position_uuid.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Assign an organization to a task
pub async fn add_tasked_organization(pool: &SqlitePool, task_uuid: Uuid, organization_uuid: Uuid) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO task_tasked_organizations (task_uuid, organization_uuid) VALUES (?, ?)")
        .bind(task_uuid.to_string())
        .bind(organization_uuid.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Tasks by uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskById;

#[async_trait]
impl BatchLoader for TaskById {
    type Key = Uuid;
    type Value = Task;
    const NAME: &'static str = "tasks.by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Task)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM tasks WHERE uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter().map(|row| task_from_row(row).map(|t| (t.uuid, t))).collect()
    }
}

/// Tasks of each report, in report order
#[derive(Debug, Clone, Copy, Default)]
pub struct TasksForReport;

#[async_trait]
impl BatchLoader for TasksForReport {
    type Key = Uuid;
    type Value = Task;
    const NAME: &'static str = "tasks.for_report";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Task)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT tasks.*, report_tasks.report_uuid AS batch_uuid FROM tasks \
             JOIN report_tasks ON report_tasks.task_uuid = tasks.uuid \
             WHERE report_tasks.report_uuid IN ",
        );
        push_uuid_list(&mut builder, keys);
        builder.push(" ORDER BY report_tasks.position, tasks.short_name");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| Ok((uuid_col(row, "batch_uuid")?, task_from_row(row)?)))
            .collect()
    }
}

/// Organizations tasked with each task
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskedOrganizations;

#[async_trait]
impl BatchLoader for TaskedOrganizations {
    type Key = Uuid;
    type Value = Uuid;
    const NAME: &'static str = "tasks.tasked_organizations";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Uuid)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT task_uuid, organization_uuid FROM task_tasked_organizations WHERE task_uuid IN ",
        );
        push_uuid_list(&mut builder, keys);
        builder.push(" ORDER BY organization_uuid");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| Ok((uuid_col(row, "task_uuid")?, uuid_col(row, "organization_uuid")?)))
            .collect()
    }
}

/// Filters for the responsible-task search
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TaskSearchQuery {
    pub status: Option<TaskStatus>,
    pub text: Option<String>,
}

impl TaskSearchQuery {
    pub fn active() -> Self {
        Self {
            status: Some(TaskStatus::Active),
            text: None,
        }
    }
}

/// Tasks a position is responsible for, filtered by a search query
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsibleTasks;

#[async_trait]
impl SearchLoader for ResponsibleTasks {
    type Query = TaskSearchQuery;
    type Value = Task;
    const NAME: &'static str = "tasks.responsible_search";

    async fn search(&self, pool: &SqlitePool, query: &TaskSearchQuery, owners: &[Uuid]) -> Result<Vec<(Uuid, Task)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT tasks.*, trp.position_uuid AS batch_uuid FROM tasks \
             JOIN task_responsible_positions trp ON trp.task_uuid = tasks.uuid \
             WHERE trp.position_uuid IN ",
        );
        push_uuid_list(&mut builder, owners);
        if let Some(status) = query.status {
            builder.push(" AND tasks.status = ");
            builder.push_bind(status.ordinal());
        }
        if let Some(text) = &query.text {
            builder.push(" AND tasks.short_name LIKE ");
            builder.push_bind(format!("%{}%", text));
        }
        builder.push(" ORDER BY tasks.short_name");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| Ok((uuid_col(row, "batch_uuid")?, task_from_row(row)?)))
            .collect()
    }
}

/// Link tasks to a report, keeping the given order
pub async fn set_report_tasks(conn: &mut SqliteConnection, report_uuid: Uuid, task_uuids: &[Uuid]) -> Result<()> {
    sqlx::query("DELETE FROM report_tasks WHERE report_uuid = ?")
        .bind(report_uuid.to_string())
        .execute(&mut *conn)
        .await?;
    for (position, task_uuid) in task_uuids.iter().enumerate() {
        sqlx::query("INSERT INTO report_tasks (report_uuid, task_uuid, position) VALUES (?, ?, ?)")
            .bind(report_uuid.to_string())
            .bind(task_uuid.to_string())
            .bind(position as i64)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}
