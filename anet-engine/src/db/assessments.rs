//! Assessments: dictionary-keyed JSON payloads linked to entities
//!
//! The payload is stored verbatim as JSON text. Its `__recurrence` field must
//! agree with the dictionary definition of the key; that is checked by
//! [`crate::authz::assessment`], not here.

use super::related::{self, AssessmentLinks};
use crate::loader::sql::{push_uuid_list, ts_col, uuid_col};
use crate::loader::BatchLoader;
use anet_common::dictionary::RECURRENCE_FIELD;
use anet_common::entity::EntityRef;
use anet_common::{time, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Assessment record
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub uuid: Uuid,
    pub author_uuid: Uuid,
    pub assessment_key: String,
    pub values: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assessment {
    pub fn new(author_uuid: Uuid, assessment_key: impl Into<String>, values: Value) -> Self {
        let now = time::now();
        Self {
            uuid: Uuid::new_v4(),
            author_uuid,
            assessment_key: assessment_key.into(),
            values,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recurrence code recorded in the payload, if any
    pub fn payload_recurrence(&self) -> Option<&str> {
        self.values.get(RECURRENCE_FIELD).and_then(Value::as_str)
    }
}

fn assessment_from_row(row: &SqliteRow) -> Result<Assessment> {
    let raw: String = row.try_get("assessment_values")?;
    let values = serde_json::from_str(&raw)
        .map_err(|e| Error::InvalidInput(format!("Malformed assessment payload: {}", e)))?;
    Ok(Assessment {
        uuid: uuid_col(row, "uuid")?,
        author_uuid: uuid_col(row, "author_uuid")?,
        assessment_key: row.try_get("assessment_key")?,
        values,
        created_at: ts_col(row, "created_at")?,
        updated_at: ts_col(row, "updated_at")?,
    })
}

/// Save assessment and its links
pub async fn insert_assessment(conn: &mut SqliteConnection, assessment: &Assessment, links: &[EntityRef]) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assessments (uuid, author_uuid, assessment_key, assessment_values, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(assessment.uuid.to_string())
    .bind(assessment.author_uuid.to_string())
    .bind(&assessment.assessment_key)
    .bind(assessment.values.to_string())
    .bind(time::to_db(&assessment.created_at))
    .bind(time::to_db(&assessment.updated_at))
    .execute(&mut *conn)
    .await?;

    related::insert_links::<AssessmentLinks>(conn, assessment.uuid, links).await
}

/// Rewrite the payload; the key is immutable
pub async fn update_assessment(conn: &mut SqliteConnection, assessment: &Assessment) -> Result<u64> {
    let result = sqlx::query("UPDATE assessments SET assessment_values = ?, updated_at = ? WHERE uuid = ?")
        .bind(assessment.values.to_string())
        .bind(time::to_db(&assessment.updated_at))
        .bind(assessment.uuid.to_string())
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Delete assessment and its links
pub async fn delete_assessment(conn: &mut SqliteConnection, assessment_uuid: Uuid) -> Result<u64> {
    related::delete_links::<AssessmentLinks>(conn, assessment_uuid).await?;
    let result = sqlx::query("DELETE FROM assessments WHERE uuid = ?")
        .bind(assessment_uuid.to_string())
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Assessments by uuid
///
/// A row whose payload fails to parse fails the whole batch; listings that
/// must tolerate malformed rows use [`AssessmentRowsById`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AssessmentById;

#[async_trait]
impl BatchLoader for AssessmentById {
    type Key = Uuid;
    type Value = Assessment;
    const NAME: &'static str = "assessments.by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Assessment)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM assessments WHERE uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| assessment_from_row(row).map(|a| (a.uuid, a)))
            .collect()
    }
}

/// Assessments by uuid, keeping a per-row decode result
#[derive(Debug, Clone, Copy, Default)]
pub struct AssessmentRowsById;

#[async_trait]
impl BatchLoader for AssessmentRowsById {
    type Key = Uuid;
    type Value = std::result::Result<Assessment, String>;
    const NAME: &'static str = "assessments.rows_by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Self::Value)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM assessments WHERE uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| {
                let uuid = uuid_col(row, "uuid")?;
                Ok((uuid, assessment_from_row(row).map_err(|e| e.to_string())))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_recurrence() {
        let assessment = Assessment::new(Uuid::new_v4(), "fields.task.monthly", json!({"__recurrence": "monthly"}));
        assert_eq!(assessment.payload_recurrence(), Some("monthly"));

        let missing = Assessment::new(Uuid::new_v4(), "fields.task.monthly", json!({"score": 3}));
        assert_eq!(missing.payload_recurrence(), None);
    }
}
