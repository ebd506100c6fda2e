//! Notes attached to arbitrary entities

use super::related::{self, NoteLinks};
use crate::loader::sql::{push_uuid_list, ts_col, uuid_col};
use crate::loader::BatchLoader;
use anet_common::entity::EntityRef;
use anet_common::{time, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Note record
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub uuid: Uuid,
    pub author_uuid: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(author_uuid: Uuid, text: impl Into<String>) -> Self {
        let now = time::now();
        Self {
            uuid: Uuid::new_v4(),
            author_uuid,
            text: text.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

fn note_from_row(row: &SqliteRow) -> Result<Note> {
    Ok(Note {
        uuid: uuid_col(row, "uuid")?,
        author_uuid: uuid_col(row, "author_uuid")?,
        text: row.try_get("text")?,
        created_at: ts_col(row, "created_at")?,
        updated_at: ts_col(row, "updated_at")?,
    })
}

/// Save note and its links
pub async fn insert_note(conn: &mut SqliteConnection, note: &Note, links: &[EntityRef]) -> Result<()> {
    sqlx::query("INSERT INTO notes (uuid, author_uuid, text, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(note.uuid.to_string())
        .bind(note.author_uuid.to_string())
        .bind(&note.text)
        .bind(time::to_db(&note.created_at))
        .bind(time::to_db(&note.updated_at))
        .execute(&mut *conn)
        .await?;

    related::insert_links::<NoteLinks>(conn, note.uuid, links).await
}

/// Rewrite note text
pub async fn update_note(conn: &mut SqliteConnection, note: &Note) -> Result<u64> {
    let result = sqlx::query("UPDATE notes SET text = ?, updated_at = ? WHERE uuid = ?")
        .bind(&note.text)
        .bind(time::to_db(&note.updated_at))
        .bind(note.uuid.to_string())
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Delete note; links go with it
pub async fn delete_note(conn: &mut SqliteConnection, note_uuid: Uuid) -> Result<u64> {
    related::delete_links::<NoteLinks>(conn, note_uuid).await?;
    let result = sqlx::query("DELETE FROM notes WHERE uuid = ?")
        .bind(note_uuid.to_string())
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Notes by uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteById;

#[async_trait]
impl BatchLoader for NoteById {
    type Key = Uuid;
    type Value = Note;
    const NAME: &'static str = "notes.by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Note)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM notes WHERE uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter().map(|row| note_from_row(row).map(|n| (n.uuid, n))).collect()
    }
}
