//! Organizations

use crate::loader::sql::{opt_uuid_col, push_uuid_list, ts_col, uuid_col};
use crate::loader::BatchLoader;
use anet_common::{time, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

/// Organization record
#[derive(Debug, Clone, PartialEq)]
pub struct Organization {
    pub uuid: Uuid,
    pub short_name: String,
    pub long_name: Option<String>,
    pub parent_org_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(short_name: impl Into<String>, parent_org_uuid: Option<Uuid>) -> Self {
        let now = time::now();
        Self {
            uuid: Uuid::new_v4(),
            short_name: short_name.into(),
            long_name: None,
            parent_org_uuid,
            created_at: now,
            updated_at: now,
        }
    }
}

fn organization_from_row(row: &SqliteRow) -> Result<Organization> {
    Ok(Organization {
        uuid: uuid_col(row, "uuid")?,
        short_name: row.try_get("short_name")?,
        long_name: row.try_get("long_name")?,
        parent_org_uuid: opt_uuid_col(row, "parent_org_uuid")?,
        created_at: ts_col(row, "created_at")?,
        updated_at: ts_col(row, "updated_at")?,
    })
}

/// Save organization to database
pub async fn insert_organization(pool: &SqlitePool, org: &Organization) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO organizations (uuid, short_name, long_name, parent_org_uuid, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org.uuid.to_string())
    .bind(&org.short_name)
    .bind(&org.long_name)
    .bind(org.parent_org_uuid.map(|u| u.to_string()))
    .bind(time::to_db(&org.created_at))
    .bind(time::to_db(&org.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Organizations by uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct OrganizationById;

#[async_trait]
impl BatchLoader for OrganizationById {
    type Key = Uuid;
    type Value = Organization;
    const NAME: &'static str = "organizations.by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Organization)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM organizations WHERE uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| organization_from_row(row).map(|o| (o.uuid, o)))
            .collect()
    }
}
