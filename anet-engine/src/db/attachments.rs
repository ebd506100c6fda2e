//! Attachment metadata (content storage lives elsewhere)

use super::related::{self, AttachmentLinks};
use crate::loader::sql::{push_uuid_list, ts_col, uuid_col};
use crate::loader::BatchLoader;
use anet_common::entity::EntityRef;
use anet_common::{time, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Attachment record
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub uuid: Uuid,
    pub author_uuid: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub content_length: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(author_uuid: Uuid, file_name: impl Into<String>, mime_type: impl Into<String>, content_length: i64) -> Self {
        let now = time::now();
        Self {
            uuid: Uuid::new_v4(),
            author_uuid,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            content_length,
            created_at: now,
            updated_at: now,
        }
    }
}

fn attachment_from_row(row: &SqliteRow) -> Result<Attachment> {
    Ok(Attachment {
        uuid: uuid_col(row, "uuid")?,
        author_uuid: uuid_col(row, "author_uuid")?,
        file_name: row.try_get("file_name")?,
        mime_type: row.try_get("mime_type")?,
        content_length: row.try_get("content_length")?,
        created_at: ts_col(row, "created_at")?,
        updated_at: ts_col(row, "updated_at")?,
    })
}

/// Save attachment and its links
pub async fn insert_attachment(conn: &mut SqliteConnection, attachment: &Attachment, links: &[EntityRef]) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO attachments (uuid, author_uuid, file_name, mime_type, content_length, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(attachment.uuid.to_string())
    .bind(attachment.author_uuid.to_string())
    .bind(&attachment.file_name)
    .bind(&attachment.mime_type)
    .bind(attachment.content_length)
    .bind(time::to_db(&attachment.created_at))
    .bind(time::to_db(&attachment.updated_at))
    .execute(&mut *conn)
    .await?;

    related::insert_links::<AttachmentLinks>(conn, attachment.uuid, links).await
}

/// Delete attachment and its links
pub async fn delete_attachment(conn: &mut SqliteConnection, attachment_uuid: Uuid) -> Result<u64> {
    related::delete_links::<AttachmentLinks>(conn, attachment_uuid).await?;
    let result = sqlx::query("DELETE FROM attachments WHERE uuid = ?")
        .bind(attachment_uuid.to_string())
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Attachments by uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachmentById;

#[async_trait]
impl BatchLoader for AttachmentById {
    type Key = Uuid;
    type Value = Attachment;
    const NAME: &'static str = "attachments.by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Attachment)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM attachments WHERE uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| attachment_from_row(row).map(|a| (a.uuid, a)))
            .collect()
    }
}
