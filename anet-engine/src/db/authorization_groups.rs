//! Authorization groups: named sets of positions, people and organizations

use super::related::{self, GroupMembers};
use anet_common::entity::EntityRef;
use anet_common::{time, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Create a group with its members; returns the group uuid
pub async fn insert_group(pool: &SqlitePool, name: &str, members: &[EntityRef]) -> Result<Uuid> {
    let uuid = Uuid::new_v4();
    let now = time::to_db(&time::now());

    let mut tx = pool.begin().await?;
    sqlx::query("INSERT INTO authorization_groups (uuid, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(uuid.to_string())
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    related::insert_links::<GroupMembers>(&mut *tx, uuid, members).await?;
    tx.commit().await?;

    Ok(uuid)
}
